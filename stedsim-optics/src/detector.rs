//! Point detector behind a confocal pinhole.

use ndarray::Array2;
use rand::Rng;
use rand_distr::{Distribution, Poisson};
use stedsim_core::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Detection model: efficiencies, background, pinhole and time gating.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Detector {
    /// Apply Poisson shot noise to detected counts.
    pub noise: bool,
    /// Background rate (counts/s).
    pub background: f64,
    /// Dark count rate (counts/s).
    pub darkcount: f64,
    /// Photon collection efficiency.
    pub pcef: f64,
    /// Photon detection efficiency.
    pub pdef: f64,
    /// Pinhole diameter in Airy units.
    pub pinhole_au: f64,
    /// Gate opening delay after the excitation pulse (s).
    pub det_delay: f64,
    /// Gate width (s); `None` keeps the gate open until the next pulse.
    pub det_width: Option<f64>,
}

impl Default for Detector {
    fn default() -> Self {
        Self {
            noise: false,
            background: 0.0,
            darkcount: 0.0,
            pcef: 0.1,
            pdef: 0.5,
            pinhole_au: 1.0,
            det_delay: 0.0,
            det_width: None,
        }
    }
}

impl Detector {
    #[must_use]
    pub fn with_noise(mut self, noise: bool) -> Self {
        self.noise = noise;
        self
    }

    #[must_use]
    pub fn with_background(mut self, background: f64) -> Self {
        self.background = background;
        self
    }

    #[must_use]
    pub fn with_darkcount(mut self, darkcount: f64) -> Self {
        self.darkcount = darkcount;
        self
    }

    #[must_use]
    pub fn with_efficiencies(mut self, pcef: f64, pdef: f64) -> Self {
        self.pcef = pcef;
        self.pdef = pdef;
        self
    }

    #[must_use]
    pub fn with_pinhole(mut self, pinhole_au: f64) -> Self {
        self.pinhole_au = pinhole_au;
        self
    }

    #[must_use]
    pub fn with_gate(mut self, det_delay: f64, det_width: Option<f64>) -> Self {
        self.det_delay = det_delay;
        self.det_width = det_width;
        self
    }

    /// Fraction of an exponential decay with lifetime `tau` falling inside the gate.
    #[must_use]
    pub fn gate_fraction(&self, tau: f64) -> f64 {
        if tau <= 0.0 {
            return 1.0;
        }
        let open = (-self.det_delay / tau).exp();
        match self.det_width {
            Some(width) => open - (-(self.det_delay + width) / tau).exp(),
            None => open,
        }
    }

    /// Fraction of emitted photons that are counted.
    #[must_use]
    pub fn efficiency(&self, transmission: f64, tau: f64) -> f64 {
        self.pcef * self.pdef * transmission * self.gate_fraction(tau)
    }

    /// Expected counts over a dwell time from an expected photon count at
    /// the detector, including background and dark counts.
    #[inline]
    #[must_use]
    pub fn expected_counts(&self, photons: f64, dwell: f64) -> f64 {
        photons.max(0.0) + (self.background + self.darkcount) * dwell.max(0.0)
    }

    /// Realizes a detected count from its expectation.
    pub fn sample<R: Rng>(&self, mean: f64, rng: &mut R) -> f64 {
        if !self.noise {
            return mean.max(0.0);
        }
        // Poisson requires a strictly positive mean
        match Poisson::new(mean) {
            Ok(poisson) if mean > 0.0 => poisson.sample(rng),
            _ => 0.0,
        }
    }

    /// Realizes a detected-count image from an expectation map.
    pub fn get_signal<R: Rng>(&self, expected: &Array2<f64>, rng: &mut R) -> Array2<f64> {
        expected.map(|&mean| self.sample(mean, rng))
    }

    /// Validates the detector parameters.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] for negative rates or efficiencies
    /// outside [0, 1].
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("pcef", self.pcef), ("pdef", self.pdef)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Configuration(format!(
                    "{name} must be in [0, 1], got {value}"
                )));
            }
        }
        let non_negative = [
            ("background", self.background),
            ("darkcount", self.darkcount),
            ("pinhole_au", self.pinhole_au),
            ("det_delay", self.det_delay),
            ("det_width", self.det_width.unwrap_or(0.0)),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(Error::Configuration(format!(
                    "{name} must be non-negative, got {value}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_gate_fraction() {
        let open = Detector::default();
        assert_relative_eq!(open.gate_fraction(2.6e-9), 1.0);

        let delayed = Detector::default().with_gate(2.6e-9, None);
        assert_relative_eq!(delayed.gate_fraction(2.6e-9), (-1.0f64).exp());

        let windowed = Detector::default().with_gate(0.0, Some(2.6e-9));
        assert_relative_eq!(windowed.gate_fraction(2.6e-9), 1.0 - (-1.0f64).exp());
    }

    #[test]
    fn test_efficiency() {
        let detector = Detector::default();
        assert_relative_eq!(detector.efficiency(0.84, 2.6e-9), 0.1 * 0.5 * 0.84);
    }

    #[test]
    fn test_expected_counts_include_background() {
        let detector = Detector::default().with_background(1e5).with_darkcount(1e4);
        assert_relative_eq!(detector.expected_counts(3.0, 10e-6), 3.0 + 1.1);
    }

    #[test]
    fn test_sample_without_noise_is_expectation() {
        let detector = Detector::default();
        let mut rng = StdRng::seed_from_u64(3);
        assert_relative_eq!(detector.sample(4.5, &mut rng), 4.5);
        assert_relative_eq!(detector.sample(-1.0, &mut rng), 0.0);
    }

    #[test]
    fn test_poisson_noise_mean() {
        let detector = Detector::default().with_noise(true);
        let mut rng = StdRng::seed_from_u64(11);
        assert_relative_eq!(detector.sample(0.0, &mut rng), 0.0);

        let expected = Array2::from_elem((100, 100), 20.0);
        let signal = detector.get_signal(&expected, &mut rng);
        assert!(signal.iter().all(|v| v.fract() == 0.0));
        let mean = signal.mean().unwrap();
        assert_relative_eq!(mean, 20.0, max_relative = 0.02);
    }

    #[test]
    fn test_validate() {
        assert!(Detector::default().validate().is_ok());
        assert!(Detector::default().with_efficiencies(1.5, 0.5).validate().is_err());
        assert!(Detector::default().with_background(-1.0).validate().is_err());
    }
}
