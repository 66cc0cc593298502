//! Rate-equation photophysics.
//!
//! Maps local excitation and depletion irradiance (W/m², time averaged) to
//! per-molecule emission and bleaching rates. Everything here is a
//! deterministic expectation; callers draw Poisson photon counts and binomial
//! bleaching outcomes from these numbers.
//!
//! The excitation cycle is a two-level saturation `p_s1 = k_ex / (k_ex + k_s1)`.
//! Depletion follows the pulsed-STED survival of Leutenegger et al. (2010),
//! with the stimulated-emission rate limited by vibrational relaxation.
//! Triplet shelving scales the ground-state availability by
//! `1 / (1 + f_tri * k_cycle * tau_tri)`. Bleaching uses
//! `k_bleach = (k0 + k1 * I^b) * p_s1`, with `I` the peak irradiance absorbed
//! by the molecule, so nothing bleaches while the excitation is off.

use crate::beam::{DepletionBeam, ExcitationBeam};
use crate::fluorophore::{photon_flux, Fluorophore};

/// Per-molecule rates at one location.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhotophysicsRates {
    /// Spontaneously emitted photons per second.
    pub emission: f64,
    /// Bleaching rate (1/s).
    pub bleach: f64,
    /// Fraction of excitations left available for spontaneous emission
    /// after depletion and triplet shelving.
    pub residual: f64,
}

impl PhotophysicsRates {
    /// Rates of a molecule that is not excited.
    pub const DARK: Self = Self {
        emission: 0.0,
        bleach: 0.0,
        residual: 1.0,
    };

    /// Expected photons emitted over a dwell time (s).
    #[inline]
    #[must_use]
    pub fn photons(&self, dwell: f64) -> f64 {
        self.emission * dwell
    }

    /// Probability that a molecule bleaches over a dwell time (s).
    #[inline]
    #[must_use]
    pub fn bleach_probability(&self, dwell: f64) -> f64 {
        bleach_probability(self.bleach, dwell)
    }
}

/// Probability of at least one bleaching event for a rate (1/s) over a time (s).
#[inline]
#[must_use]
pub fn bleach_probability(rate: f64, dwell: f64) -> f64 {
    if rate <= 0.0 || dwell <= 0.0 {
        0.0
    } else {
        (-(-rate * dwell).exp_m1()).clamp(0.0, 1.0)
    }
}

/// Clamps a derived rate to a finite non-negative value.
#[inline]
fn clamp_rate(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

/// Photophysics of one fluorophore under one excitation/depletion beam pair.
///
/// Cross-sections are resolved once at construction so evaluating a location
/// is a handful of arithmetic operations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhotophysicsModel {
    lambda_ex: f64,
    lambda_sted: f64,
    sigma_abs_ex: f64,
    sigma_abs_sted: f64,
    sigma_ste: f64,
    qy: f64,
    k_s1: f64,
    k_vib: f64,
    tau_tri: f64,
    triplet_frac: f64,
    k0: f64,
    k1: f64,
    b: f64,
    depletion: DepletionBeam,
}

impl PhotophysicsModel {
    /// Resolves the fluorophore parameters for a beam pair.
    #[must_use]
    pub fn new(fluo: &Fluorophore, excitation: &ExcitationBeam, depletion: &DepletionBeam) -> Self {
        Self {
            lambda_ex: excitation.lambda,
            lambda_sted: depletion.lambda,
            sigma_abs_ex: fluo.sigma_abs_at(excitation.lambda),
            sigma_abs_sted: fluo.sigma_abs_at(depletion.lambda),
            sigma_ste: fluo.sigma_ste_at(depletion.lambda),
            qy: fluo.qy,
            k_s1: 1.0 / fluo.tau,
            k_vib: 1.0 / fluo.tau_vib,
            tau_tri: fluo.tau_tri,
            triplet_frac: fluo.triplet_dynamics_frac,
            k0: fluo.k0,
            k1: fluo.k1,
            b: fluo.b,
            depletion: *depletion,
        }
    }

    /// Peak stimulated-emission rate (1/s) for a time-averaged depletion irradiance.
    #[inline]
    fn k_sted(&self, i_sted: f64) -> f64 {
        let peak = i_sted / self.depletion.duty_cycle();
        clamp_rate(self.sigma_ste * photon_flux(peak, self.lambda_sted))
    }

    /// Fraction of excited molecules that survive depletion and fluoresce.
    #[must_use]
    pub fn depletion_survival(&self, i_sted: f64) -> f64 {
        let k_sted = self.k_sted(clamp_rate(i_sted));
        if k_sted <= 0.0 {
            return 1.0;
        }
        // Depletion cannot outpace vibrational relaxation of the ground state.
        let k_eff = k_sted * self.k_vib / (k_sted + self.k_vib);
        let gamma = k_eff / self.k_s1;
        if !self.depletion.is_pulsed() {
            return 1.0 / (1.0 + gamma);
        }
        let period = 1.0 / self.depletion.rate;
        let pulse = self.depletion.tau;
        let k = self.k_s1;
        let num = (1.0 + gamma * (-k * pulse * (1.0 + gamma)).exp()) / (1.0 + gamma)
            - (-k * (gamma * pulse + period)).exp();
        let den = -(-k * period).exp_m1();
        let eta = num / den;
        if eta.is_finite() {
            eta.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Rates at a location receiving `i_ex` and `i_sted` (W/m², time averaged).
    #[must_use]
    pub fn rates(&self, i_ex: f64, i_sted: f64) -> PhotophysicsRates {
        let i_ex = clamp_rate(i_ex);
        let i_sted = clamp_rate(i_sted);
        let eta = self.depletion_survival(i_sted);
        if i_ex <= 0.0 {
            return PhotophysicsRates {
                residual: eta,
                ..PhotophysicsRates::DARK
            };
        }

        let mut k_ex = self.sigma_abs_ex * photon_flux(i_ex, self.lambda_ex);
        if self.depletion.anti_stokes {
            k_ex += self.sigma_abs_sted * photon_flux(i_sted, self.lambda_sted);
        }
        let k_ex = clamp_rate(k_ex);

        let p_s1 = k_ex / (k_ex + self.k_s1);
        let cycle = self.k_s1 * p_s1;
        let available = 1.0 / (1.0 + self.triplet_frac * cycle * self.tau_tri);
        let emission = clamp_rate(self.qy * cycle * eta * available);

        let absorbed = i_ex + i_sted / self.depletion.duty_cycle();
        let k_bleach = clamp_rate((self.k0 + self.k1 * absorbed.powf(self.b)) * p_s1 * available);

        PhotophysicsRates {
            emission,
            bleach: k_bleach,
            residual: eta * available,
        }
    }

    /// Expected photons, bleaching probability and residual excitable fraction
    /// over a dwell time.
    #[must_use]
    pub fn evaluate(&self, i_ex: f64, i_sted: f64, dwell: f64) -> (f64, f64, f64) {
        let rates = self.rates(i_ex, i_sted);
        (
            rates.photons(dwell),
            rates.bleach_probability(dwell),
            rates.residual,
        )
    }
}
