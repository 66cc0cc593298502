//! Fluorophore species parameters.
#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use crate::error::{Error, Result};
use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Planck constant (J·s).
pub const PLANCK: f64 = 6.626_070_15e-34;
/// Speed of light in vacuum (m/s).
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Converts a wavelength in meters to the integer nanometer key used by the
/// cross-section tables.
#[inline]
#[must_use]
pub fn wavelength_key(lambda: f64) -> u32 {
    (lambda * 1e9).round().max(0.0) as u32
}

/// Photon flux (photons / s / m²) carried by an irradiance (W/m²) at a wavelength (m).
#[inline]
#[must_use]
pub fn photon_flux(intensity: f64, lambda: f64) -> f64 {
    intensity * lambda / (PLANCK * SPEED_OF_LIGHT)
}

/// Immutable description of a single fluorophore species.
///
/// Cross-section tables are keyed by wavelength in nanometers and hold
/// cross-sections in m². A wavelength absent from a table has a cross-section
/// of zero.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Fluorophore {
    /// Emission wavelength (m).
    #[cfg_attr(feature = "serde", serde(alias = "lambda_"))]
    pub lambda_em: f64,
    /// Fluorescence quantum yield.
    pub qy: f64,
    /// One-photon absorption cross-sections (nm -> m²).
    pub sigma_abs: BTreeMap<u32, f64>,
    /// Stimulated-emission cross-sections (nm -> m²).
    pub sigma_ste: BTreeMap<u32, f64>,
    /// Fluorescence lifetime (s).
    pub tau: f64,
    /// Vibrational relaxation lifetime (s).
    pub tau_vib: f64,
    /// Triplet-state lifetime (s).
    pub tau_tri: f64,
    /// Constant bleaching rate term.
    #[cfg_attr(feature = "serde", serde(default))]
    pub k0: f64,
    /// Intensity-dependent bleaching rate coefficient.
    #[cfg_attr(feature = "serde", serde(default))]
    pub k1: f64,
    /// Bleaching intensity exponent.
    #[cfg_attr(feature = "serde", serde(default = "default_bleach_exponent"))]
    pub b: f64,
    /// Fraction of excitation cycles that end in the triplet state.
    #[cfg_attr(feature = "serde", serde(default))]
    pub triplet_dynamics_frac: f64,
}

#[cfg(feature = "serde")]
fn default_bleach_exponent() -> f64 {
    1.0
}

impl Fluorophore {
    /// Enhanced GFP, excited at 488 nm and depleted at 575 nm.
    #[must_use]
    pub fn egfp() -> Self {
        Self {
            lambda_em: 507e-9,
            qy: 0.6,
            sigma_abs: BTreeMap::from([(488, 2.14e-20), (575, 9.64e-23)]),
            sigma_ste: BTreeMap::from([(575, 1.5e-20)]),
            tau: 2.6e-9,
            tau_vib: 1.2e-12,
            tau_tri: 25e-6,
            k0: 0.0,
            k1: 1.3e-15,
            b: 1.4,
            triplet_dynamics_frac: 0.0,
        }
    }

    /// abberior STAR 635, excited at 635 nm and depleted at 750 nm.
    #[must_use]
    pub fn star635() -> Self {
        Self {
            lambda_em: 655e-9,
            qy: 0.88,
            sigma_abs: BTreeMap::from([(635, 4.21e-20), (750, 2.81e-23)]),
            sigma_ste: BTreeMap::from([(750, 4.8e-22)]),
            tau: 2.8e-9,
            tau_vib: 1.0e-12,
            tau_tri: 25e-6,
            k0: 0.0,
            k1: 1.3e-15,
            b: 1.4,
            triplet_dynamics_frac: 0.0,
        }
    }

    /// ATTO 647N, excited at 635 nm and depleted at 750 nm.
    #[must_use]
    pub fn atto647n() -> Self {
        Self {
            lambda_em: 690e-9,
            qy: 0.65,
            sigma_abs: BTreeMap::from([(635, 1.0e-20), (750, 3.5e-25)]),
            sigma_ste: BTreeMap::from([(750, 4.8e-22)]),
            tau: 3.5e-9,
            tau_vib: 1.0e-12,
            tau_tri: 25e-6,
            k0: 0.0,
            k1: 1.3e-15,
            b: 1.4,
            triplet_dynamics_frac: 0.0,
        }
    }

    /// ATTO 590, sharing the ATTO 647N lifetimes with its own bleaching law.
    #[must_use]
    pub fn atto590() -> Self {
        let mut fluo = Self::atto647n();
        fluo.sigma_abs.insert(750, 8e-26);
        fluo.sigma_ste.insert(750, 4e-22);
        fluo.k0 = 2.5e-5 / 100f64.powi(2);
        fluo.k1 = 9e-18 / (100f64.powi(2)).powf(1.9);
        fluo.b = 1.9;
        fluo
    }

    /// Looks up a built-in species by name.
    #[must_use]
    pub fn preset(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "egfp" => Some(Self::egfp()),
            "star635" => Some(Self::star635()),
            "atto647n" => Some(Self::atto647n()),
            "atto590" => Some(Self::atto590()),
            _ => None,
        }
    }

    /// Sets the bleaching law constants.
    #[must_use]
    pub fn with_bleaching(mut self, k0: f64, k1: f64, b: f64) -> Self {
        self.k0 = k0;
        self.k1 = k1;
        self.b = b;
        self
    }

    /// Sets the triplet-dynamics fraction.
    #[must_use]
    pub fn with_triplet_fraction(mut self, frac: f64) -> Self {
        self.triplet_dynamics_frac = frac;
        self
    }

    /// Absorption cross-section (m²) at a wavelength (m), zero when not tabulated.
    #[inline]
    #[must_use]
    pub fn sigma_abs_at(&self, lambda: f64) -> f64 {
        self.sigma_abs
            .get(&wavelength_key(lambda))
            .copied()
            .unwrap_or(0.0)
    }

    /// Stimulated-emission cross-section (m²) at a wavelength (m), zero when not tabulated.
    #[inline]
    #[must_use]
    pub fn sigma_ste_at(&self, lambda: f64) -> f64 {
        self.sigma_ste
            .get(&wavelength_key(lambda))
            .copied()
            .unwrap_or(0.0)
    }

    /// Checks that every parameter lies in its physical range.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] naming the first offending parameter.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("lambda_em", self.lambda_em),
            ("tau", self.tau),
            ("tau_vib", self.tau_vib),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::config(format!("{name} must be positive, got {value}")));
            }
        }
        let non_negative = [
            ("tau_tri", self.tau_tri),
            ("k0", self.k0),
            ("k1", self.k1),
            ("b", self.b),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(Error::config(format!(
                    "{name} must be non-negative, got {value}"
                )));
            }
        }
        if !(self.qy > 0.0 && self.qy <= 1.0) {
            return Err(Error::config(format!("qy must be in (0, 1], got {}", self.qy)));
        }
        if !(0.0..=1.0).contains(&self.triplet_dynamics_frac) {
            return Err(Error::config(format!(
                "triplet_dynamics_frac must be in [0, 1], got {}",
                self.triplet_dynamics_frac
            )));
        }
        for (table, entries) in [("sigma_abs", &self.sigma_abs), ("sigma_ste", &self.sigma_ste)] {
            if let Some((nm, value)) = entries
                .iter()
                .find(|(_, v)| !(v.is_finite() && **v >= 0.0))
            {
                return Err(Error::config(format!(
                    "{table}[{nm}] must be non-negative, got {value}"
                )));
            }
        }
        Ok(())
    }

    /// Checks wavelength coverage for an excitation/depletion pair.
    ///
    /// Excitation must be absorbed. Any other missing entry falls back to a
    /// zero cross-section.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] when the excitation wavelength has no
    /// positive absorption cross-section.
    pub fn require_wavelengths(&self, lambda_ex: f64, lambda_sted: f64) -> Result<()> {
        self.validate()?;
        if self.sigma_abs_at(lambda_ex) <= 0.0 {
            return Err(Error::config(format!(
                "no absorption cross-section at excitation wavelength {} nm",
                wavelength_key(lambda_ex)
            )));
        }
        if self.sigma_ste_at(lambda_sted) <= 0.0 {
            log::debug!(
                "no stimulated-emission cross-section at {} nm, depletion has no effect",
                wavelength_key(lambda_sted)
            );
        }
        Ok(())
    }
}

impl Default for Fluorophore {
    fn default() -> Self {
        Self::egfp()
    }
}
