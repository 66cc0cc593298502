//! Analytic beam shapes sampled on a square pixel grid.
//!
//! Kernels are `(2 * half + 1)` pixels wide with the beam axis on the center
//! pixel. Beam kernels are normalized to unit area (1/m²) so that multiplying
//! by a power in watts gives a time-averaged irradiance in W/m².
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]

use ndarray::{Array2, ArrayBase, Data, Ix2, Zip};
use std::f64::consts::PI;

/// `2 * sqrt(2 * ln 2)`, ratio between a Gaussian's FWHM and its sigma.
const FWHM_PER_SIGMA: f64 = 2.354_820_045_030_949;

/// Excitation focal spot FWHM in units of `lambda / NA`.
pub const EXCITATION_FWHM: f64 = 0.51;

/// Donut ring radius in units of `lambda / NA`.
pub const DONUT_RING_RADIUS: f64 = 0.38;

/// Half-width (pixels) that holds every beam of a system.
#[must_use]
pub fn kernel_half_width(max_lambda: f64, na: f64, pixelsize: f64) -> usize {
    let half = (max_lambda / na / pixelsize).ceil();
    if half.is_finite() && half >= 1.0 {
        half as usize
    } else {
        1
    }
}

/// Samples `profile(r²)` on a centered kernel.
fn sample_radial<F>(half: usize, pixelsize: f64, profile: F) -> Array2<f64>
where
    F: Fn(f64) -> f64 + Sync + Send,
{
    let size = 2 * half + 1;
    let center = half as f64;
    let mut kernel = Array2::<f64>::zeros((size, size));
    Zip::indexed(&mut kernel).par_for_each(|(row, col), value| {
        let dy = (row as f64 - center) * pixelsize;
        let dx = (col as f64 - center) * pixelsize;
        *value = profile(dx * dx + dy * dy);
    });
    kernel
}

fn normalize_area(kernel: &mut Array2<f64>, pixelsize: f64) {
    let area = kernel.sum() * pixelsize * pixelsize;
    if area > 0.0 && area.is_finite() {
        kernel.mapv_inplace(|v| v / area);
    }
}

/// Gaussian with the given FWHM (m), peak value 1.
#[must_use]
pub fn gaussian_shape(fwhm: f64, pixelsize: f64, half: usize) -> Array2<f64> {
    let sigma = fwhm / FWHM_PER_SIGMA;
    let two_sigma_sq = 2.0 * sigma * sigma;
    sample_radial(half, pixelsize, |r_sq| (-r_sq / two_sigma_sq).exp())
}

/// Focused Gaussian excitation spot, unit area.
#[must_use]
pub fn excitation_kernel(lambda: f64, na: f64, pixelsize: f64, half: usize) -> Array2<f64> {
    let mut kernel = gaussian_shape(EXCITATION_FWHM * lambda / na, pixelsize, half);
    normalize_area(&mut kernel, pixelsize);
    kernel
}

/// Donut depletion beam, unit area.
///
/// The ring follows `r² exp(-r² / w²)`. A `zero_residual` fraction of the ring
/// peak is added back at the center as a diffraction-limited Gaussian.
#[must_use]
pub fn donut_kernel(
    lambda: f64,
    na: f64,
    zero_residual: f64,
    pixelsize: f64,
    half: usize,
) -> Array2<f64> {
    let w = DONUT_RING_RADIUS * lambda / na;
    let w_sq = w * w;
    let norm = 1.0 / (PI * w_sq * w_sq);
    let mut kernel = sample_radial(half, pixelsize, |r_sq| norm * r_sq * (-r_sq / w_sq).exp());

    if zero_residual > 0.0 {
        let ring_peak = norm * w_sq * (-1.0f64).exp();
        let floor = gaussian_shape(EXCITATION_FWHM * lambda / na, pixelsize, half);
        kernel.scaled_add(zero_residual * ring_peak, &floor);
    }
    normalize_area(&mut kernel, pixelsize);
    kernel
}

/// Confocal detection PSF at the emission wavelength, peak value 1.
///
/// The pinhole (diameter in Airy units) broadens the emission spot in
/// quadrature by its radius.
#[must_use]
pub fn detection_kernel(
    lambda_em: f64,
    na: f64,
    pinhole_au: f64,
    pixelsize: f64,
    half: usize,
) -> Array2<f64> {
    let sigma_em = EXCITATION_FWHM * lambda_em / na / FWHM_PER_SIGMA;
    let pinhole_radius = pinhole_au.max(0.0) * 0.61 * lambda_em / na;
    let sigma = (sigma_em * sigma_em + pinhole_radius * pinhole_radius / 4.0).sqrt();
    gaussian_shape(sigma * FWHM_PER_SIGMA, pixelsize, half)
}

/// Intensity-weighted RMS radius of a kernel, in pixels.
///
/// Returns 0 for an empty or all-zero kernel.
#[must_use]
pub fn spread<S>(kernel: &ArrayBase<S, Ix2>) -> f64
where
    S: Data<Elem = f64>,
{
    let (rows, cols) = kernel.dim();
    let cy = (rows as f64 - 1.0) / 2.0;
    let cx = (cols as f64 - 1.0) / 2.0;
    let mut total = 0.0;
    let mut moment = 0.0;
    for ((row, col), &value) in kernel.indexed_iter() {
        if value <= 0.0 {
            continue;
        }
        let dy = row as f64 - cy;
        let dx = col as f64 - cx;
        total += value;
        moment += value * (dx * dx + dy * dy);
    }
    if total > 0.0 {
        (moment / total).sqrt()
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const PX: f64 = 20e-9;

    #[test]
    fn test_kernel_half_width() {
        assert_eq!(kernel_half_width(575e-9, 1.4, 20e-9), 21);
        assert_eq!(kernel_half_width(1e-9, 1.4, 1.0), 1);
    }

    #[test]
    fn test_excitation_kernel_has_unit_area() {
        let kernel = excitation_kernel(488e-9, 1.4, PX, 21);
        assert_eq!(kernel.dim(), (43, 43));
        assert_relative_eq!(kernel.sum() * PX * PX, 1.0, max_relative = 1e-9);
        let peak = kernel.iter().copied().fold(f64::MIN, f64::max);
        assert_relative_eq!(kernel[[21, 21]], peak);
    }

    #[test]
    fn test_donut_kernel_has_dark_center() {
        let kernel = donut_kernel(575e-9, 1.4, 0.0, PX, 21);
        assert_relative_eq!(kernel.sum() * PX * PX, 1.0, max_relative = 1e-9);
        assert_relative_eq!(kernel[[21, 21]], 0.0);
        // Ring maximum sits near 0.38 * lambda / NA, about 8 pixels out.
        let ring = kernel.row(21).iter().copied().fold(f64::MIN, f64::max);
        assert_relative_eq!(kernel[[21, 29]], ring);
    }

    #[test]
    fn test_donut_zero_residual_fills_center() {
        let kernel = donut_kernel(575e-9, 1.4, 0.1, PX, 21);
        let ring = kernel.row(21).iter().copied().fold(f64::MIN, f64::max);
        let ratio = kernel[[21, 21]] / ring;
        assert!(ratio > 0.05 && ratio < 0.15, "ratio = {ratio}");
    }

    #[test]
    fn test_pinhole_broadens_detection() {
        let open = detection_kernel(507e-9, 1.4, 2.0, PX, 21);
        let closed = detection_kernel(507e-9, 1.4, 0.0, PX, 21);
        assert_relative_eq!(open[[21, 21]], 1.0);
        assert!(spread(&open) > spread(&closed));
    }

    #[test]
    fn test_spread() {
        let point = Array2::from_shape_fn((5, 5), |(r, c)| if r == 2 && c == 2 { 1.0 } else { 0.0 });
        assert_relative_eq!(spread(&point), 0.0);
        assert_relative_eq!(spread(&Array2::<f64>::zeros((3, 3))), 0.0);
        let narrow = gaussian_shape(100e-9, PX, 10);
        let wide = gaussian_shape(200e-9, PX, 10);
        assert!(spread(&wide) > spread(&narrow));
    }
}
