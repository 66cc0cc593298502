//! Molecule grid with precomputed flash dynamics.
//!
//! A [`TemporalDatamap`] keeps a static base density and a stack of flash
//! deltas, one frame per flash time step. Advancing the flash is a two-step
//! protocol: [`TemporalDatamap::update_whole_datamap`] rebuilds the live grid
//! and [`MoleculeMap::update_dicts`] records the frame index that bleaching
//! must be attributed to. Acquisitions refuse to run while the two disagree.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]

use crate::datamap::{pad, Datamap, Roi, RoiMode};
use crate::error::{Error, Result};
use crate::flash::{rescale_curve, FlashSource};
use crate::layers::{
    check_layer_shape, FlashIndices, MoleculeLayers, MoleculeMap, BASE_LAYER, FLASH_LAYER,
};
use ndarray::{s, Array2, Array3, ArrayBase, Axis, Data, Ix2};
use rayon::prelude::*;

/// A flashing site, in ROI-relative coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nanodomain {
    pub row: usize,
    pub col: usize,
    /// Molecules added per unit of flash multiplier.
    pub molecules: u32,
}

impl Nanodomain {
    #[must_use]
    pub fn new(row: usize, col: usize, molecules: u32) -> Self {
        Self { row, col, molecules }
    }
}

/// Datamap whose live grid is `base + flash_tstack[t]`.
#[derive(Debug, Clone)]
pub struct TemporalDatamap {
    datamap: Datamap,
    base: Array2<u32>,
    nanodomains: Vec<Nanodomain>,
    flash_tstack: Option<Array3<u32>>,
    time_usec_between_flash_updates: u64,
    live_frame: usize,
    indices: FlashIndices,
}

impl TemporalDatamap {
    /// Creates a temporal datamap from a base frame and its nanodomains.
    ///
    /// Nanodomain coordinates are relative to the frame, which becomes the
    /// region of interest once padded.
    ///
    /// # Errors
    /// Fails for an invalid pixel size or a nanodomain outside the frame.
    pub fn new(frame: Array2<u32>, pixelsize: f64, nanodomains: Vec<Nanodomain>) -> Result<Self> {
        let (rows, cols) = frame.dim();
        if let Some(outside) = nanodomains.iter().find(|d| d.row >= rows || d.col >= cols) {
            return Err(Error::Configuration(format!(
                "nanodomain at ({}, {}) is outside the {rows}x{cols} frame",
                outside.row, outside.col
            )));
        }
        let base = frame.clone();
        Ok(Self {
            datamap: Datamap::new(frame, pixelsize)?,
            base,
            nanodomains,
            flash_tstack: None,
            time_usec_between_flash_updates: 0,
            live_frame: 0,
            indices: FlashIndices::default(),
        })
    }

    /// Underlying datamap (live grid and ROI).
    #[must_use]
    pub fn datamap(&self) -> &Datamap {
        &self.datamap
    }

    /// Static base density over the whole grid.
    #[must_use]
    pub fn base(&self) -> &Array2<u32> {
        &self.base
    }

    /// Nanodomains, indexed by dense id.
    #[must_use]
    pub fn nanodomains(&self) -> &[Nanodomain] {
        &self.nanodomains
    }

    /// Flash delta stack `(t, rows, cols)`, once built.
    #[must_use]
    pub fn flash_tstack(&self) -> Option<&Array3<u32>> {
        self.flash_tstack.as_ref()
    }

    /// Number of flash frames.
    #[must_use]
    pub fn n_flash_steps(&self) -> usize {
        self.flash_tstack.as_ref().map_or(0, |stack| stack.len_of(Axis(0)))
    }

    /// Microseconds between two flash frames.
    #[must_use]
    pub fn time_usec_between_flash_updates(&self) -> u64 {
        self.time_usec_between_flash_updates
    }

    /// Frame index currently applied to the live grid.
    #[must_use]
    pub fn flash_index(&self) -> usize {
        self.live_frame
    }

    /// Last indices recorded through `update_dicts`.
    #[must_use]
    pub fn indices(&self) -> FlashIndices {
        self.indices
    }

    fn ensure_no_stack(&self) -> Result<()> {
        if self.flash_tstack.is_some() {
            return Err(Error::Domain(
                "the region of interest must be set before the flash stack is built".to_string(),
            ));
        }
        Ok(())
    }

    /// Sets the ROI without resizing the grid.
    ///
    /// # Errors
    /// See [`Datamap::set_roi`]; also fails once the flash stack exists.
    pub fn set_roi<S>(&mut self, psf: &ArrayBase<S, Ix2>, mode: RoiMode) -> Result<Roi>
    where
        S: Data<Elem = f64>,
    {
        self.ensure_no_stack()?;
        self.datamap.set_roi(psf, mode)
    }

    /// Zero-pads base and live grids so the whole frame becomes the ROI.
    ///
    /// # Errors
    /// Fails once the flash stack exists.
    pub fn set_roi_padded<S>(&mut self, psf: &ArrayBase<S, Ix2>, mode: RoiMode) -> Result<Roi>
    where
        S: Data<Elem = f64>,
    {
        self.ensure_no_stack()?;
        let (pad_rows, pad_cols) = mode.padding(psf.dim());
        self.base = pad(&self.base, pad_rows, pad_cols);
        Ok(self.datamap.set_roi_padded(psf, mode))
    }

    /// Builds the flash stack.
    ///
    /// The source is sampled once per nanodomain and each curve is rescaled
    /// to integers by `divider`. Frame `t` composites every nanodomain's delta
    /// at step `t`; the stack is as long as the longest curve. Frames are
    /// spaced by `decay_time_us / source.decay_steps()` microseconds, never
    /// less than one.
    ///
    /// # Errors
    /// Returns [`Error::Domain`] when no ROI has been set or a nanodomain is
    /// outside the ROI.
    pub fn create_t_stack_dmap(
        &mut self,
        decay_time_us: u64,
        source: &mut dyn FlashSource,
        divider: f64,
    ) -> Result<()> {
        let roi = self
            .datamap
            .roi()
            .ok_or_else(|| Error::Domain("region of interest has not been set".to_string()))?;
        for (id, domain) in self.nanodomains.iter().enumerate() {
            if !roi.contains(domain.row, domain.col) {
                return Err(Error::Domain(format!(
                    "nanodomain {id} at ({}, {}) is outside the ROI",
                    domain.row, domain.col
                )));
            }
        }

        let curves: Vec<Vec<u32>> = (0..self.nanodomains.len())
            .map(|id| rescale_curve(&source.sample_curve(id), divider))
            .collect();
        let n_steps = curves.iter().map(Vec::len).max().unwrap_or(0).max(1);
        let dim = self.base.dim();
        let nanodomains = &self.nanodomains;

        let frames: Vec<Array2<u32>> = (0..n_steps)
            .into_par_iter()
            .map(|t| {
                let mut frame = Array2::<u32>::zeros(dim);
                for (domain, curve) in nanodomains.iter().zip(&curves) {
                    let multiplier = curve.get(t).copied().unwrap_or(0);
                    let (row, col) = roi.to_whole(domain.row, domain.col);
                    frame[[row, col]] = frame[[row, col]]
                        .saturating_add(domain.molecules.saturating_mul(multiplier));
                }
                frame
            })
            .collect();

        let mut stack = Array3::<u32>::zeros((n_steps, dim.0, dim.1));
        for (t, frame) in frames.iter().enumerate() {
            stack.index_axis_mut(Axis(0), t).assign(frame);
        }

        self.time_usec_between_flash_updates =
            (decay_time_us / source.decay_steps().max(1) as u64).max(1);
        self.flash_tstack = Some(stack);
        log::debug!(
            "built flash stack: {n_steps} frames, {} us apart, {} nanodomains",
            self.time_usec_between_flash_updates,
            self.nanodomains.len()
        );
        self.update_whole_datamap(0)?;
        self.indices = FlashIndices::new(0);
        Ok(())
    }

    /// Flash delta at frame `t`; frames past the end are at rest.
    fn flash_frame(&self, t: usize) -> Array2<u32> {
        match &self.flash_tstack {
            Some(stack) if t < stack.len_of(Axis(0)) => stack.index_axis(Axis(0), t).to_owned(),
            _ => Array2::zeros(self.base.dim()),
        }
    }

    /// Sets the live grid to `base + flash_tstack[t]`.
    ///
    /// Callers must follow with `update_dicts` carrying the same index.
    ///
    /// # Errors
    /// Returns [`Error::Domain`] when the flash stack has not been built.
    pub fn update_whole_datamap(&mut self, t: usize) -> Result<()> {
        if self.flash_tstack.is_none() {
            return Err(Error::Domain(
                "flash stack has not been built".to_string(),
            ));
        }
        let mut live = self.flash_frame(t);
        live.zip_mut_with(&self.base, |a, &b| *a = a.saturating_add(b));
        self.datamap.replace_whole(live);
        self.live_frame = t;
        Ok(())
    }

    /// Scales flash frames after `t` by the survival ratio of frame `t`.
    fn bleach_future(&mut self, t: usize, before: &Array2<u32>, after: &Array2<u32>) {
        let Some(stack) = self.flash_tstack.as_mut() else {
            return;
        };
        let n_steps = stack.len_of(Axis(0));
        if t + 1 >= n_steps {
            return;
        }
        let mut future = stack.slice_mut(s![t + 1.., .., ..]);
        for ((row, col), &old) in before.indexed_iter() {
            let new = after[[row, col]];
            if old == 0 || new >= old {
                continue;
            }
            let ratio = f64::from(new) / f64::from(old);
            for count in future.slice_mut(s![.., row, col]).iter_mut() {
                *count = (f64::from(*count) * ratio).round() as u32;
            }
        }
    }
}

impl MoleculeMap for TemporalDatamap {
    fn pixelsize(&self) -> f64 {
        self.datamap.pixelsize()
    }

    fn roi(&self) -> Option<Roi> {
        self.datamap.roi()
    }

    fn whole(&self) -> &Array2<u32> {
        self.datamap.whole()
    }

    fn layers(&self) -> Result<MoleculeLayers> {
        self.layers_at(self.indices)
    }

    fn layers_at(&self, indices: FlashIndices) -> Result<MoleculeLayers> {
        let mut layers = MoleculeLayers::new();
        layers.insert(BASE_LAYER, self.base.clone());
        if self.flash_tstack.is_some() {
            if indices.flashes != self.live_frame {
                log::warn!(
                    "flash index out of sync: live frame {}, recorded {}",
                    self.live_frame,
                    indices.flashes
                );
                return Err(Error::Domain(format!(
                    "live flash frame {} does not match recorded index {}",
                    self.live_frame, indices.flashes
                )));
            }
            layers.insert(FLASH_LAYER, self.flash_frame(self.live_frame));
        }
        Ok(layers)
    }

    fn commit(&mut self, layers: &MoleculeLayers) -> Result<()> {
        let dim = self.base.dim();
        let base = check_layer_shape(layers, BASE_LAYER, dim)?;
        let mut live = base.clone();
        if self.flash_tstack.is_some() {
            let flashes = check_layer_shape(layers, FLASH_LAYER, dim)?;
            let t = self.live_frame;
            if t < self.n_flash_steps() {
                let before = self.flash_frame(t);
                self.bleach_future(t, &before, &flashes);
                if let Some(stack) = self.flash_tstack.as_mut() {
                    stack.index_axis_mut(Axis(0), t).assign(&flashes);
                }
            }
            live.zip_mut_with(&flashes, |a, &b| *a = a.saturating_add(b));
        }
        self.base = base;
        self.datamap.replace_whole(live);
        Ok(())
    }

    fn update_dicts(&mut self, indices: FlashIndices) -> Result<()> {
        self.indices = indices;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::HandCraftedLightCurve;

    fn temporal() -> TemporalDatamap {
        let frame = Array2::from_elem((10, 10), 2u32);
        let domains = vec![Nanodomain::new(2, 3, 5), Nanodomain::new(7, 7, 1)];
        let mut dmap = TemporalDatamap::new(frame, 20e-9, domains).unwrap();
        dmap.set_roi_padded(&Array2::<f64>::ones((5, 5)), RoiMode::Max)
            .unwrap();
        dmap
    }

    #[test]
    fn test_create_t_stack() {
        let mut dmap = temporal();
        let mut source = HandCraftedLightCurve::new(1, 4, 10.0);
        dmap.create_t_stack_dmap(1_000_000, &mut source, 1.0).unwrap();

        assert_eq!(dmap.n_flash_steps(), 1 + 4 + 1);
        assert_eq!(dmap.time_usec_between_flash_updates(), 250_000);
        // Frame 0 is the rest period: live grid equals base.
        assert_eq!(dmap.whole(), dmap.base());

        let stack = dmap.flash_tstack().unwrap();
        assert_eq!(stack[[1, 2 + 2, 3 + 2]], 5 * 10);
        assert_eq!(stack[[1, 7 + 2, 7 + 2]], 10);
        assert_eq!(stack[[1, 0, 0]], 0);
    }

    #[test]
    fn test_update_whole_datamap_adds_frame() {
        let mut dmap = temporal();
        let mut source = HandCraftedLightCurve::new(1, 4, 10.0);
        dmap.create_t_stack_dmap(1_000_000, &mut source, 1.0).unwrap();

        dmap.update_whole_datamap(1).unwrap();
        dmap.update_dicts(FlashIndices::new(1)).unwrap();
        assert_eq!(dmap.whole()[[4, 5]], 2 + 50);
        assert_eq!(dmap.flash_index(), 1);

        // Past the end the flash is over.
        dmap.update_whole_datamap(100).unwrap();
        assert_eq!(dmap.whole(), dmap.base());
    }

    #[test]
    fn test_layers_require_synced_indices() {
        let mut dmap = temporal();
        let mut source = HandCraftedLightCurve::new(1, 4, 10.0);
        dmap.create_t_stack_dmap(1_000_000, &mut source, 1.0).unwrap();

        dmap.update_whole_datamap(2).unwrap();
        assert!(dmap.layers().is_err());
        dmap.update_dicts(FlashIndices::new(2)).unwrap();
        let layers = dmap.layers().unwrap();
        assert_eq!(layers.live().unwrap(), *dmap.whole());
    }

    #[test]
    fn test_layers_at_leaves_indices_unrecorded() {
        let mut dmap = temporal();
        let mut source = HandCraftedLightCurve::new(1, 4, 10.0);
        dmap.create_t_stack_dmap(1_000_000, &mut source, 1.0).unwrap();

        dmap.update_whole_datamap(2).unwrap();
        let layers = dmap.layers_at(FlashIndices::new(2)).unwrap();
        assert_eq!(layers.live().unwrap(), *dmap.whole());
        assert_eq!(dmap.indices().flashes, 0);
        assert!(dmap.layers_at(FlashIndices::new(1)).is_err());
    }

    #[test]
    fn test_commit_propagates_bleaching_to_future_frames() {
        let mut dmap = temporal();
        let mut source = HandCraftedLightCurve::new(0, 4, 10.0);
        dmap.create_t_stack_dmap(1_000_000, &mut source, 1.0).unwrap();

        let mut layers = dmap.layers().unwrap();
        // Bleach half of the flash molecules of the first nanodomain.
        let flashes = layers.get_mut(FLASH_LAYER).unwrap();
        assert_eq!(flashes[[4, 5]], 50);
        flashes[[4, 5]] = 25;
        let before_next = dmap.flash_tstack().unwrap()[[1, 4, 5]];
        dmap.commit(&layers).unwrap();

        let stack = dmap.flash_tstack().unwrap();
        assert_eq!(stack[[0, 4, 5]], 25);
        assert_eq!(
            stack[[1, 4, 5]],
            (f64::from(before_next) * 0.5).round() as u32
        );
        assert_eq!(dmap.whole()[[4, 5]], 2 + 25);
    }

    #[test]
    fn test_stack_requires_roi_and_roi_requires_no_stack() {
        let frame = Array2::from_elem((10, 10), 1u32);
        let mut dmap = TemporalDatamap::new(frame, 20e-9, vec![]).unwrap();
        let mut source = HandCraftedLightCurve::default();
        assert!(dmap.create_t_stack_dmap(1000, &mut source, 1.0).is_err());

        let psf = Array2::<f64>::ones((3, 3));
        dmap.set_roi(&psf, RoiMode::Max).unwrap();
        dmap.create_t_stack_dmap(1000, &mut source, 1.0).unwrap();
        assert!(dmap.set_roi(&psf, RoiMode::Max).is_err());
    }

    #[test]
    fn test_nanodomain_outside_frame() {
        let frame = Array2::from_elem((4, 4), 1u32);
        let result = TemporalDatamap::new(frame, 20e-9, vec![Nanodomain::new(4, 0, 1)]);
        assert!(result.is_err());
    }
}
