//! Beam parameter records.
//!
//! These hold what a beam *is* (wavelength, pulse structure, residual). The
//! spatial intensity profiles are sampled by `stedsim-optics`.

use crate::error::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Gaussian excitation beam.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ExcitationBeam {
    /// Wavelength (m).
    pub lambda: f64,
}

impl ExcitationBeam {
    /// Creates an excitation beam at the given wavelength (m).
    #[must_use]
    pub fn new(lambda: f64) -> Self {
        Self { lambda }
    }

    /// Validates the beam wavelength.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] for a non-positive wavelength.
    pub fn validate(&self) -> Result<()> {
        if self.lambda.is_finite() && self.lambda > 0.0 {
            Ok(())
        } else {
            Err(Error::Configuration(format!(
                "excitation wavelength must be positive, got {}",
                self.lambda
            )))
        }
    }
}

impl Default for ExcitationBeam {
    fn default() -> Self {
        Self::new(488e-9)
    }
}

/// Donut-shaped depletion beam.
///
/// A repetition `rate` of zero describes a continuous-wave laser.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DepletionBeam {
    /// Wavelength (m).
    pub lambda: f64,
    /// Intensity left in the donut center relative to the ring peak, in [0, 1].
    pub zero_residual: f64,
    /// Pulse repetition rate (Hz), 0 for continuous wave.
    pub rate: f64,
    /// Pulse width (s).
    pub tau: f64,
    /// Whether the depletion beam also excites the fluorophore (anti-Stokes).
    pub anti_stokes: bool,
}

impl DepletionBeam {
    /// Creates a pulsed depletion beam with a perfect zero.
    #[must_use]
    pub fn new(lambda: f64) -> Self {
        Self {
            lambda,
            zero_residual: 0.0,
            rate: 40e6,
            tau: 400e-12,
            anti_stokes: false,
        }
    }

    /// Sets the zero residual.
    #[must_use]
    pub fn with_zero_residual(mut self, zero_residual: f64) -> Self {
        self.zero_residual = zero_residual;
        self
    }

    /// Sets the pulse repetition rate and width.
    #[must_use]
    pub fn with_pulses(mut self, rate: f64, tau: f64) -> Self {
        self.rate = rate;
        self.tau = tau;
        self
    }

    /// Makes the beam continuous-wave.
    #[must_use]
    pub fn continuous(mut self) -> Self {
        self.rate = 0.0;
        self
    }

    /// Sets the anti-Stokes excitation flag.
    #[must_use]
    pub fn with_anti_stokes(mut self, anti_stokes: bool) -> Self {
        self.anti_stokes = anti_stokes;
        self
    }

    /// Whether the beam is pulsed.
    #[inline]
    #[must_use]
    pub fn is_pulsed(&self) -> bool {
        self.rate > 0.0 && self.tau > 0.0
    }

    /// Fraction of time the beam is on; 1 for continuous wave.
    #[inline]
    #[must_use]
    pub fn duty_cycle(&self) -> f64 {
        if self.is_pulsed() {
            (self.rate * self.tau).min(1.0)
        } else {
            1.0
        }
    }

    /// Validates the beam parameters.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] for an invalid wavelength, residual or
    /// pulse structure.
    pub fn validate(&self) -> Result<()> {
        if !(self.lambda.is_finite() && self.lambda > 0.0) {
            return Err(Error::Configuration(format!(
                "depletion wavelength must be positive, got {}",
                self.lambda
            )));
        }
        if !(0.0..=1.0).contains(&self.zero_residual) {
            return Err(Error::Configuration(format!(
                "zero_residual must be in [0, 1], got {}",
                self.zero_residual
            )));
        }
        if self.rate < 0.0 || self.tau < 0.0 {
            return Err(Error::Configuration(
                "pulse rate and width must be non-negative".to_string(),
            ));
        }
        if self.is_pulsed() && self.rate * self.tau > 1.0 {
            return Err(Error::Configuration(format!(
                "pulses overlap: rate {} Hz with width {} s",
                self.rate, self.tau
            )));
        }
        Ok(())
    }
}

impl Default for DepletionBeam {
    fn default() -> Self {
        Self::new(575e-9)
    }
}

/// Checks a beam power.
///
/// # Errors
/// Returns [`Error::Configuration`] for a negative or non-finite power.
pub fn check_power(name: &str, power: f64) -> Result<()> {
    if power.is_finite() && power >= 0.0 {
        Ok(())
    } else {
        Err(Error::Configuration(format!(
            "{name} must be a non-negative power, got {power}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_duty_cycle() {
        let beam = DepletionBeam::new(575e-9);
        assert_relative_eq!(beam.duty_cycle(), 0.016);
        assert_relative_eq!(beam.continuous().duty_cycle(), 1.0);
    }

    #[test]
    fn test_validate_zero_residual() {
        let beam = DepletionBeam::new(575e-9).with_zero_residual(1.5);
        assert!(beam.validate().is_err());
        assert!(DepletionBeam::new(575e-9)
            .with_zero_residual(0.01)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_check_power() {
        assert!(check_power("p_ex", 0.0).is_ok());
        assert!(check_power("p_ex", -1e-6).is_err());
        assert!(check_power("p_sted", f64::NAN).is_err());
    }

    #[test]
    fn test_pulse_structure() {
        let beam = DepletionBeam::new(775e-9).with_pulses(80e6, 1e-9);
        assert!(beam.is_pulsed());
        assert_relative_eq!(beam.duty_cycle(), 0.08, max_relative = 1e-12);
        assert!(DepletionBeam::new(775e-9)
            .with_pulses(1e9, 2e-9)
            .validate()
            .is_err());
    }
}
