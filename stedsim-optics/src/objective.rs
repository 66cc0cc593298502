//! Microscope objective.

use stedsim_core::fluorophore::wavelength_key;
use stedsim_core::{Error, Result};
use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Objective lens geometry and transmission.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Objective {
    /// Numerical aperture.
    pub na: f64,
    /// Refractive index of the immersion medium.
    pub n: f64,
    /// Transmission by wavelength (nm -> fraction).
    pub transmission: BTreeMap<u32, f64>,
}

impl Default for Objective {
    /// 1.4 NA oil immersion objective.
    fn default() -> Self {
        Self {
            na: 1.4,
            n: 1.5,
            transmission: BTreeMap::from([
                (488, 0.84),
                (535, 0.85),
                (550, 0.86),
                (575, 0.85),
                (585, 0.85),
                (635, 0.84),
                (690, 0.82),
                (750, 0.77),
                (775, 0.75),
            ]),
        }
    }
}

impl Objective {
    /// Sets the numerical aperture.
    #[must_use]
    pub fn with_na(mut self, na: f64) -> Self {
        self.na = na;
        self
    }

    /// Sets the immersion refractive index.
    #[must_use]
    pub fn with_n(mut self, n: f64) -> Self {
        self.n = n;
        self
    }

    /// Replaces the transmission table.
    #[must_use]
    pub fn with_transmission(mut self, transmission: BTreeMap<u32, f64>) -> Self {
        self.transmission = transmission;
        self
    }

    /// Transmission at a wavelength (m), from the nearest table entry.
    ///
    /// An empty table transmits everything.
    #[must_use]
    pub fn transmission_at(&self, lambda: f64) -> f64 {
        let key = wavelength_key(lambda);
        self.transmission
            .iter()
            .min_by_key(|(nm, _)| nm.abs_diff(key))
            .map_or(1.0, |(_, &t)| t)
    }

    /// Validates the objective geometry and transmission table.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] when `0 < na <= n` does not hold or a
    /// transmission lies outside [0, 1].
    pub fn validate(&self) -> Result<()> {
        if !(self.na.is_finite() && self.na > 0.0 && self.na <= self.n) {
            return Err(Error::Configuration(format!(
                "numerical aperture must be in (0, n = {}], got {}",
                self.n, self.na
            )));
        }
        if let Some((nm, t)) = self
            .transmission
            .iter()
            .find(|(_, t)| !(0.0..=1.0).contains(*t))
        {
            return Err(Error::Configuration(format!(
                "transmission at {nm} nm must be in [0, 1], got {t}"
            )));
        }
        Ok(())
    }
}
