//! Raster-scan acquisition with photobleaching.
//!
//! An acquisition walks a pixel list over the region of interest. At each
//! pixel the effective kernels are overlaid on the live molecule counts to
//! get the expected detected counts, which accumulate into an intensity map.
//! When bleaching is on, every molecule under the beam survives with
//! probability `exp(-k_bleach * dwell)`, drawn as a binomial per grid cell
//! and per molecule layer.
//!
//! All mutation happens on a working copy of the grid's layers. The grid is
//! only touched through [`MoleculeMap::update_dicts`] and
//! [`MoleculeMap::commit`] once every pixel succeeded, so a failing call
//! leaves it unmodified.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]

use crate::raster::{pixel_sampling, Pixel};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Binomial, Distribution};
use std::collections::HashSet;
use stedsim_core::photophysics::bleach_probability;
use stedsim_core::{Error, FlashIndices, MoleculeLayers, MoleculeMap, Result, Roi};
use stedsim_optics::{EffectiveKernels, OpticalSystem};

/// Relative tolerance when checking that the acquisition pixel size is a
/// multiple of the grid pixel size.
const RATIO_TOLERANCE: f64 = 1e-6;

/// Pixel dwell time (s), uniform or per acquired pixel.
#[derive(Debug, Clone, PartialEq)]
pub enum Dwell {
    Uniform(f64),
    /// One entry per acquired pixel, in the output image shape.
    PerPixel(Array2<f64>),
}

impl From<f64> for Dwell {
    fn from(dwell: f64) -> Self {
        Self::Uniform(dwell)
    }
}

impl From<Array2<f64>> for Dwell {
    fn from(dwell: Array2<f64>) -> Self {
        Self::PerPixel(dwell)
    }
}

impl Dwell {
    /// Dwell of an acquired (output) pixel.
    #[inline]
    #[must_use]
    pub fn at(&self, row: usize, col: usize) -> f64 {
        match self {
            Self::Uniform(dwell) => *dwell,
            Self::PerPixel(map) => map.get((row, col)).copied().unwrap_or(0.0),
        }
    }

    /// Dwell of a grid pixel scanned with a sampling ratio.
    #[inline]
    #[must_use]
    pub fn at_pixel(&self, pixel: Pixel, ratio: usize) -> f64 {
        let ratio = ratio.max(1);
        self.at(pixel.0 / ratio, pixel.1 / ratio)
    }

    /// Validates the dwell for an acquired image shape.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] for a negative or non-finite dwell or a
    /// map of the wrong shape.
    pub fn validate(&self, image_dim: (usize, usize)) -> Result<()> {
        let valid = |dwell: f64| dwell.is_finite() && dwell >= 0.0;
        match self {
            Self::Uniform(dwell) if !valid(*dwell) => Err(Error::Configuration(format!(
                "dwell time must be non-negative, got {dwell}"
            ))),
            Self::PerPixel(map) if map.dim() != image_dim => Err(Error::Configuration(format!(
                "dwell map has shape {:?}, acquisition is {image_dim:?}",
                map.dim()
            ))),
            Self::PerPixel(map) if !map.iter().all(|&d| valid(d)) => Err(Error::Configuration(
                "dwell map holds a negative or non-finite entry".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// Options of one acquisition call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanOptions {
    /// Pixels to scan, in order; the whole region of interest when `None`.
    pub pixel_list: Option<Vec<Pixel>>,
    /// Bleach molecules under the beam.
    pub bleach: bool,
    /// Commit the bleached layers to the grid at the end of the call.
    pub update: bool,
    /// Intensity map returned by a previous partial acquisition.
    pub acquired_intensity: Option<Array2<f64>>,
    /// Flash indices to record on the grid before reading it.
    pub indices: Option<FlashIndices>,
    /// Skip the pixel-list filter (fast path only).
    pub filter_bypass: bool,
}

impl ScanOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_pixel_list(mut self, pixel_list: Vec<Pixel>) -> Self {
        self.pixel_list = Some(pixel_list);
        self
    }

    #[must_use]
    pub fn with_bleach(mut self, bleach: bool) -> Self {
        self.bleach = bleach;
        self
    }

    #[must_use]
    pub fn with_update(mut self, update: bool) -> Self {
        self.update = update;
        self
    }

    #[must_use]
    pub fn with_acquired_intensity(mut self, intensity: Array2<f64>) -> Self {
        self.acquired_intensity = Some(intensity);
        self
    }

    #[must_use]
    pub fn with_indices(mut self, indices: FlashIndices) -> Self {
        self.indices = Some(indices);
        self
    }

    #[must_use]
    pub fn with_filter_bypass(mut self, filter_bypass: bool) -> Self {
        self.filter_bypass = filter_bypass;
        self
    }
}

/// Result of one acquisition call.
#[derive(Debug, Clone, PartialEq)]
pub struct Acquisition {
    /// Detected counts per acquired pixel.
    pub signal: Array2<f64>,
    /// Molecule layers after the scan (bleached when requested).
    pub bleached: MoleculeLayers,
    /// Expected counts accumulated so far; pass back to resume the scan.
    pub intensity: Array2<f64>,
    /// Pixels scanned by this call.
    pub pixels_scanned: usize,
}

/// Acquisition geometry resolved for one call.
#[derive(Debug, Clone, Copy)]
struct Geometry {
    roi: Roi,
    ratio: usize,
    whole_dim: (usize, usize),
    half: (usize, usize),
}

impl Geometry {
    fn image_dim(&self) -> (usize, usize) {
        let (rows, cols) = self.roi.dim();
        (rows.div_ceil(self.ratio), cols.div_ceil(self.ratio))
    }

    /// Checks that a pixel and the beam footprint around it fit the grid.
    fn check(&self, pixel: Pixel) -> Result<()> {
        let (row, col) = pixel;
        if !self.roi.contains(row, col) {
            return Err(Error::OutOfBounds {
                row,
                col,
                reason: format!("outside the {:?} region of interest", self.roi.dim()),
            });
        }
        let (r, c) = self.roi.to_whole(row, col);
        let (hr, hc) = self.half;
        if r < hr || c < hc || r + hr >= self.whole_dim.0 || c + hc >= self.whole_dim.1 {
            return Err(Error::OutOfBounds {
                row,
                col,
                reason: format!(
                    "beam footprint of {}x{} pixels leaves the {:?} grid",
                    2 * hr + 1,
                    2 * hc + 1,
                    self.whole_dim
                ),
            });
        }
        Ok(())
    }
}

/// Resolves the acquisition-to-grid pixel size ratio.
fn sampling_ratio(pixelsize: f64, grid_pixelsize: f64) -> Result<usize> {
    let ratio = (pixelsize / grid_pixelsize).round();
    let exact =
        ratio >= 1.0 && (ratio * grid_pixelsize - pixelsize).abs() <= RATIO_TOLERANCE * pixelsize;
    if !(pixelsize.is_finite() && exact) {
        return Err(Error::Configuration(format!(
            "acquisition pixel size {pixelsize} must be a multiple of the grid pixel size {grid_pixelsize}"
        )));
    }
    Ok(ratio as usize)
}

/// Keeps lattice pixels only, drops repeats, and bounds-checks the rest.
fn filter_pixel_list(pixels: &[Pixel], geometry: &Geometry) -> Result<Vec<Pixel>> {
    let mut seen = HashSet::with_capacity(pixels.len());
    let mut kept = Vec::with_capacity(pixels.len());
    for &pixel in pixels {
        if pixel.0 % geometry.ratio != 0 || pixel.1 % geometry.ratio != 0 {
            continue;
        }
        if seen.insert(pixel) {
            geometry.check(pixel)?;
            kept.push(pixel);
        }
    }
    if kept.len() < pixels.len() {
        log::debug!(
            "pixel list filtered from {} to {} pixels",
            pixels.len(),
            kept.len()
        );
    }
    Ok(kept)
}

/// Expected detected counts (before background) at a whole-grid position.
fn expected_photons(
    layers: &MoleculeLayers,
    kernels: &EffectiveKernels,
    center: (usize, usize),
    dwell: f64,
) -> f64 {
    let (hr, hc) = kernels.half();
    let (r0, c0) = (center.0 - hr, center.1 - hc);
    let mut rate = 0.0;
    for ((dr, dc), &per_molecule) in kernels.photons.indexed_iter() {
        if per_molecule <= 0.0 {
            continue;
        }
        let molecules = layers.live_at(r0 + dr, c0 + dc);
        if molecules > 0 {
            rate += per_molecule * f64::from(molecules);
        }
    }
    rate * dwell
}

/// Bleaches the molecules under the beam; returns the molecules lost.
fn bleach_window<R: Rng>(
    layers: &mut MoleculeLayers,
    kernels: &EffectiveKernels,
    center: (usize, usize),
    dwell: f64,
    rng: &mut R,
) -> u64 {
    let (hr, hc) = kernels.half();
    let (r0, c0) = (center.0 - hr, center.1 - hc);
    let mut lost = 0u64;
    for ((dr, dc), &rate) in kernels.bleach.indexed_iter() {
        let p_bleach = bleach_probability(rate, dwell);
        if p_bleach <= 0.0 {
            continue;
        }
        for layer in layers.values_mut() {
            let count = &mut layer[[r0 + dr, c0 + dc]];
            if *count == 0 {
                continue;
            }
            let survivors = match Binomial::new(u64::from(*count), 1.0 - p_bleach) {
                Ok(binomial) => u32::try_from(binomial.sample(rng)).unwrap_or(*count),
                Err(_) => *count,
            }
            .min(*count);
            lost += u64::from(*count - survivors);
            *count = survivors;
        }
    }
    lost
}

/// Point-scanning microscope: an optical system and a random source.
#[derive(Debug)]
pub struct Microscope {
    optics: OpticalSystem,
    rng: StdRng,
}

impl Microscope {
    /// Creates a microscope seeded from system entropy.
    #[must_use]
    pub fn new(optics: OpticalSystem) -> Self {
        Self {
            optics,
            rng: StdRng::from_entropy(),
        }
    }

    /// Creates a microscope with reproducible noise and bleaching.
    #[must_use]
    pub fn with_seed(optics: OpticalSystem, seed: u64) -> Self {
        Self {
            optics,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    #[must_use]
    pub fn optics(&self) -> &OpticalSystem {
        &self.optics
    }

    pub fn optics_mut(&mut self) -> &mut OpticalSystem {
        &mut self.optics
    }

    /// Acquires the pixel list over a molecule grid.
    ///
    /// `pixelsize` is the acquisition pixel size; it must be a whole multiple
    /// of the grid pixel size. The pixel list is always filtered to that
    /// lattice and deduplicated, and every pixel is bounds-checked before any
    /// work starts.
    ///
    /// # Errors
    /// Returns [`Error::Domain`] when the grid has no region of interest,
    /// [`Error::Configuration`] for invalid powers, dwell or pixel size, and
    /// [`Error::OutOfBounds`] when a pixel (or the beam around it) leaves the
    /// grid. The grid is unchanged on error.
    pub fn get_signal_and_bleach<M: MoleculeMap>(
        &mut self,
        map: &mut M,
        pixelsize: f64,
        dwell: &Dwell,
        p_ex: f64,
        p_sted: f64,
        options: ScanOptions,
    ) -> Result<Acquisition> {
        self.acquire(map, pixelsize, dwell, p_ex, p_sted, options, true)
    }

    /// Same contract as [`Microscope::get_signal_and_bleach`], but honours
    /// `filter_bypass`: a bypassed list is scanned as given, with each pixel
    /// bounds-checked when it is reached.
    ///
    /// # Errors
    /// See [`Microscope::get_signal_and_bleach`].
    pub fn get_signal_and_bleach_fast<M: MoleculeMap>(
        &mut self,
        map: &mut M,
        pixelsize: f64,
        dwell: &Dwell,
        p_ex: f64,
        p_sted: f64,
        options: ScanOptions,
    ) -> Result<Acquisition> {
        let filter = !options.filter_bypass;
        self.acquire(map, pixelsize, dwell, p_ex, p_sted, options, filter)
    }

    #[allow(clippy::too_many_arguments, clippy::needless_pass_by_value)]
    fn acquire<M: MoleculeMap>(
        &mut self,
        map: &mut M,
        pixelsize: f64,
        dwell: &Dwell,
        p_ex: f64,
        p_sted: f64,
        options: ScanOptions,
        filter: bool,
    ) -> Result<Acquisition> {
        let roi = map
            .roi()
            .ok_or_else(|| Error::Domain("region of interest has not been set".to_string()))?;
        let ratio = sampling_ratio(pixelsize, map.pixelsize())?;
        let kernels = self.optics.kernels(map.pixelsize(), p_ex, p_sted)?;
        let geometry = Geometry {
            roi,
            ratio,
            whole_dim: map.whole().dim(),
            half: kernels.half(),
        };
        let image_dim = geometry.image_dim();
        dwell.validate(image_dim)?;

        let mut intensity = match options.acquired_intensity {
            Some(intensity) if intensity.dim() != image_dim => {
                return Err(Error::Configuration(format!(
                    "acquired intensity has shape {:?}, acquisition is {image_dim:?}",
                    intensity.dim()
                )));
            }
            Some(intensity) => intensity,
            None => Array2::zeros(image_dim),
        };

        let pixels = match options.pixel_list {
            Some(list) if filter => filter_pixel_list(&list, &geometry)?,
            Some(list) => list,
            None => {
                let raster = pixel_sampling(roi.dim(), ratio);
                // Raster order puts the extreme rows and columns first and last.
                for pixel in raster.first().into_iter().chain(raster.last()) {
                    geometry.check(*pixel)?;
                }
                raster
            }
        };

        let mut layers = match options.indices {
            Some(indices) => map.layers_at(indices)?,
            None => map.layers()?,
        };
        let detector = *self.optics.detector();
        let bleaching = options.bleach && !kernels.is_non_bleaching();

        let mut lost = 0u64;
        for &pixel in &pixels {
            if !filter {
                geometry.check(pixel)?;
            }
            let out = (pixel.0 / ratio, pixel.1 / ratio);
            let pixel_dwell = dwell.at(out.0, out.1);
            let center = roi.to_whole(pixel.0, pixel.1);

            let photons = expected_photons(&layers, &kernels, center, pixel_dwell);
            intensity[out] += detector.expected_counts(photons, pixel_dwell);

            if bleaching {
                lost += bleach_window(&mut layers, &kernels, center, pixel_dwell, &mut self.rng);
            }
        }

        let signal = detector.get_signal(&intensity, &mut self.rng);
        if let Some(indices) = options.indices {
            map.update_dicts(indices)?;
        }
        if options.update {
            map.commit(&layers)?;
        }
        log::info!(
            "acquired {} pixels at p_ex={p_ex:e} W, p_sted={p_sted:e} W: {lost} molecules bleached{}",
            pixels.len(),
            if options.update { "" } else { " (not committed)" }
        );

        Ok(Acquisition {
            signal,
            bleached: layers,
            intensity,
            pixels_scanned: pixels.len(),
        })
    }
}
