//! Flash waveforms and per-nanodomain flash state.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]

use crate::datamap::Roi;
use crate::error::{Error, Result};
use crate::temporal::Nanodomain;
use ndarray::Array2;
use rand::Rng;

/// Source of flash waveforms, sampled once per nanodomain.
///
/// A curve holds the molecule multiplier at each flash time step; `0` means
/// the nanodomain is at rest.
pub trait FlashSource {
    /// Samples the waveform for one nanodomain.
    fn sample_curve(&mut self, nanodomain: usize) -> Vec<f64>;

    /// Number of curve steps spanning one decay time.
    fn decay_steps(&self) -> usize;
}

/// Rescales a sampled curve to non-negative integers by a divider.
#[must_use]
pub fn rescale_curve(curve: &[f64], divider: f64) -> Vec<u32> {
    let divider = if divider.is_finite() && divider > 0.0 {
        divider
    } else {
        1.0
    };
    curve
        .iter()
        .map(|&value| {
            let scaled = (value / divider).round();
            if scaled.is_finite() && scaled > 0.0 {
                scaled.min(f64::from(u32::MAX)) as u32
            } else {
                0
            }
        })
        .collect()
}

/// Deterministic flash waveform: a rest period, a jump to the peak, then an
/// exponential decay back to rest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HandCraftedLightCurve {
    /// Rest steps before the peak.
    pub delay: usize,
    /// Steps spent decaying from the peak.
    pub n_decay_steps: usize,
    /// Peak molecule multiplier.
    pub n_molecules_multiplier: f64,
}

impl HandCraftedLightCurve {
    #[must_use]
    pub fn new(delay: usize, n_decay_steps: usize, n_molecules_multiplier: f64) -> Self {
        Self {
            delay,
            n_decay_steps,
            n_molecules_multiplier,
        }
    }

    /// The curve itself; ends with one rest step.
    #[must_use]
    pub fn curve(&self) -> Vec<f64> {
        let steps = self.n_decay_steps.max(1);
        let mut curve = vec![0.0; self.delay];
        curve.extend(
            (0..steps).map(|k| self.n_molecules_multiplier * (-3.0 * k as f64 / steps as f64).exp()),
        );
        curve.push(0.0);
        curve
    }
}

impl Default for HandCraftedLightCurve {
    fn default() -> Self {
        Self::new(2, 10, 28.0)
    }
}

impl FlashSource for HandCraftedLightCurve {
    fn sample_curve(&mut self, _nanodomain: usize) -> Vec<f64> {
        self.curve()
    }

    fn decay_steps(&self) -> usize {
        self.n_decay_steps.max(1)
    }
}

/// Randomly started flashes, one slot per nanodomain.
///
/// State is kept as parallel arrays indexed by nanodomain id.
#[derive(Debug, Clone)]
pub struct StochasticFlashes {
    flash_prob: f64,
    divider: f64,
    flashing: Vec<bool>,
    progress: Vec<usize>,
    curves: Vec<Vec<u32>>,
}

impl StochasticFlashes {
    /// Creates the flash state for `n` nanodomains, all at rest.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] when `flash_prob` is not a probability.
    pub fn new(n: usize, flash_prob: f64, divider: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&flash_prob) {
            return Err(Error::Configuration(format!(
                "flash probability must be in [0, 1], got {flash_prob}"
            )));
        }
        Ok(Self {
            flash_prob,
            divider,
            flashing: vec![false; n],
            progress: vec![0; n],
            curves: vec![Vec::new(); n],
        })
    }

    /// Number of nanodomains tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.flashing.len()
    }

    /// Returns true when no nanodomain is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flashing.is_empty()
    }

    /// Whether a nanodomain is currently flashing.
    #[must_use]
    pub fn is_flashing(&self, id: usize) -> bool {
        self.flashing.get(id).copied().unwrap_or(false)
    }

    /// Current multiplier of a nanodomain, 0 at rest.
    #[must_use]
    pub fn multiplier(&self, id: usize) -> u32 {
        if !self.is_flashing(id) {
            return 0;
        }
        self.curves[id].get(self.progress[id]).copied().unwrap_or(0)
    }

    /// Advances every nanodomain by one step, starting new flashes at random.
    pub fn step<R: Rng>(&mut self, rng: &mut R, source: &mut dyn FlashSource) {
        for id in 0..self.flashing.len() {
            if self.flashing[id] {
                self.progress[id] += 1;
                if self.progress[id] >= self.curves[id].len() {
                    self.flashing[id] = false;
                    self.progress[id] = 0;
                }
            } else if rng.gen_bool(self.flash_prob) {
                self.curves[id] = rescale_curve(&source.sample_curve(id), self.divider);
                self.flashing[id] = !self.curves[id].is_empty();
                self.progress[id] = 0;
            }
        }
    }

    /// Live grid for a base density, adding each flashing nanodomain's delta.
    ///
    /// # Errors
    /// Returns [`Error::Domain`] when the nanodomain count does not match or a
    /// nanodomain lies outside the ROI.
    pub fn apply(
        &self,
        base: &Array2<u32>,
        nanodomains: &[Nanodomain],
        roi: Roi,
    ) -> Result<Array2<u32>> {
        if nanodomains.len() != self.len() {
            return Err(Error::Domain(format!(
                "{} nanodomains for {} flash slots",
                nanodomains.len(),
                self.len()
            )));
        }
        let mut live = base.clone();
        for (id, domain) in nanodomains.iter().enumerate() {
            let multiplier = self.multiplier(id);
            if multiplier == 0 {
                continue;
            }
            if !roi.contains(domain.row, domain.col) {
                return Err(Error::Domain(format!(
                    "nanodomain {id} at ({}, {}) is outside the ROI",
                    domain.row, domain.col
                )));
            }
            let (row, col) = roi.to_whole(domain.row, domain.col);
            live[[row, col]] =
                live[[row, col]].saturating_add(domain.molecules.saturating_mul(multiplier));
        }
        Ok(live)
    }
}
