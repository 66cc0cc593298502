//! Molecule density grid with a beam-safe region of interest.

use crate::error::{Error, Result};
use crate::layers::{check_layer_shape, MoleculeLayers, MoleculeMap, BASE_LAYER};
use ndarray::{s, Array2, ArrayBase, ArrayView2, ArrayViewMut2, Data, Ix2};

/// How the PSF extent sizes the region-of-interest padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoiMode {
    /// Pad both axes by half the widest PSF dimension.
    #[default]
    Max,
    /// Pad rows and columns by half the matching PSF dimension.
    PerAxis,
}

impl RoiMode {
    /// Half-extents `(rows, cols)` required for a PSF of the given shape.
    #[must_use]
    pub fn padding(self, psf_dim: (usize, usize)) -> (usize, usize) {
        let (rows, cols) = psf_dim;
        match self {
            Self::Max => {
                let half = rows.max(cols) / 2;
                (half, half)
            }
            Self::PerAxis => (rows / 2, cols / 2),
        }
    }
}

/// Region of interest inside the whole grid, as half-open row/col ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roi {
    pub row_start: usize,
    pub row_end: usize,
    pub col_start: usize,
    pub col_end: usize,
}

impl Roi {
    /// ROI shape `(rows, cols)`.
    #[must_use]
    pub fn dim(&self) -> (usize, usize) {
        (self.row_end - self.row_start, self.col_end - self.col_start)
    }

    /// Converts ROI-relative coordinates to whole-grid coordinates.
    #[inline]
    #[must_use]
    pub fn to_whole(&self, row: usize, col: usize) -> (usize, usize) {
        (self.row_start + row, self.col_start + col)
    }

    /// Whether ROI-relative coordinates fall inside the ROI.
    #[inline]
    #[must_use]
    pub fn contains(&self, row: usize, col: usize) -> bool {
        row < self.row_end - self.row_start && col < self.col_end - self.col_start
    }
}

/// Ground-truth molecule counts over a padded grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Datamap {
    whole: Array2<u32>,
    pixelsize: f64,
    roi: Option<Roi>,
}

impl Datamap {
    /// Creates a datamap from a molecule-count frame.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] for a non-positive pixel size or an
    /// empty frame.
    pub fn new(frame: Array2<u32>, pixelsize: f64) -> Result<Self> {
        if !(pixelsize.is_finite() && pixelsize > 0.0) {
            return Err(Error::config(format!(
                "pixel size must be positive, got {pixelsize}"
            )));
        }
        if frame.is_empty() {
            return Err(Error::config("molecule frame is empty"));
        }
        Ok(Self {
            whole: frame,
            pixelsize,
            roi: None,
        })
    }

    /// Creates a uniform datamap with `count` molecules per pixel.
    ///
    /// # Errors
    /// See [`Datamap::new`].
    pub fn uniform(dim: (usize, usize), count: u32, pixelsize: f64) -> Result<Self> {
        Self::new(Array2::from_elem(dim, count), pixelsize)
    }

    /// Pixel size (m).
    #[must_use]
    pub fn pixelsize(&self) -> f64 {
        self.pixelsize
    }

    /// Whole padded grid.
    #[must_use]
    pub fn whole(&self) -> &Array2<u32> {
        &self.whole
    }

    /// Region of interest, once set.
    #[must_use]
    pub fn roi(&self) -> Option<Roi> {
        self.roi
    }

    fn require_roi(&self) -> Result<Roi> {
        self.roi
            .ok_or_else(|| Error::domain("region of interest has not been set"))
    }

    /// View of the region of interest.
    ///
    /// # Errors
    /// Returns [`Error::Domain`] when no ROI has been set.
    pub fn roi_view(&self) -> Result<ArrayView2<'_, u32>> {
        let roi = self.require_roi()?;
        Ok(self
            .whole
            .slice(s![roi.row_start..roi.row_end, roi.col_start..roi.col_end]))
    }

    /// Mutable view of the region of interest.
    ///
    /// # Errors
    /// Returns [`Error::Domain`] when no ROI has been set.
    pub fn roi_view_mut(&mut self) -> Result<ArrayViewMut2<'_, u32>> {
        let roi = self.require_roi()?;
        Ok(self
            .whole
            .slice_mut(s![roi.row_start..roi.row_end, roi.col_start..roi.col_end]))
    }

    /// Sets the ROI so that a PSF centered on any ROI pixel stays inside the grid.
    ///
    /// The grid is not resized.
    ///
    /// # Errors
    /// Returns [`Error::Domain`] when the grid cannot fit the padding plus at
    /// least one pixel.
    pub fn set_roi<S>(&mut self, psf: &ArrayBase<S, Ix2>, mode: RoiMode) -> Result<Roi>
    where
        S: Data<Elem = f64>,
    {
        let (pad_rows, pad_cols) = mode.padding(psf.dim());
        let (rows, cols) = self.whole.dim();
        if rows <= 2 * pad_rows || cols <= 2 * pad_cols {
            return Err(Error::domain(format!(
                "grid {rows}x{cols} is too small for a padding of {pad_rows}x{pad_cols}"
            )));
        }
        let roi = Roi {
            row_start: pad_rows,
            row_end: rows - pad_rows,
            col_start: pad_cols,
            col_end: cols - pad_cols,
        };
        self.roi = Some(roi);
        Ok(roi)
    }

    /// Zero-pads the grid so the whole current frame becomes the ROI.
    pub fn set_roi_padded<S>(&mut self, psf: &ArrayBase<S, Ix2>, mode: RoiMode) -> Roi
    where
        S: Data<Elem = f64>,
    {
        let (pad_rows, pad_cols) = mode.padding(psf.dim());
        self.whole = pad(&self.whole, pad_rows, pad_cols);
        let (rows, cols) = self.whole.dim();
        let roi = Roi {
            row_start: pad_rows,
            row_end: rows - pad_rows,
            col_start: pad_cols,
            col_end: cols - pad_cols,
        };
        self.roi = Some(roi);
        roi
    }

    pub(crate) fn replace_whole(&mut self, whole: Array2<u32>) {
        debug_assert_eq!(whole.dim(), self.whole.dim());
        self.whole = whole;
    }
}

/// Zero-pads a grid by `pad_rows`/`pad_cols` on every side.
pub(crate) fn pad(grid: &Array2<u32>, pad_rows: usize, pad_cols: usize) -> Array2<u32> {
    let (rows, cols) = grid.dim();
    let mut padded = Array2::zeros((rows + 2 * pad_rows, cols + 2 * pad_cols));
    padded
        .slice_mut(s![pad_rows..pad_rows + rows, pad_cols..pad_cols + cols])
        .assign(grid);
    padded
}

impl MoleculeMap for Datamap {
    fn pixelsize(&self) -> f64 {
        self.pixelsize
    }

    fn roi(&self) -> Option<Roi> {
        self.roi
    }

    fn whole(&self) -> &Array2<u32> {
        &self.whole
    }

    fn layers(&self) -> Result<MoleculeLayers> {
        let mut layers = MoleculeLayers::new();
        layers.insert(BASE_LAYER, self.whole.clone());
        Ok(layers)
    }

    fn commit(&mut self, layers: &MoleculeLayers) -> Result<()> {
        self.whole = check_layer_shape(layers, BASE_LAYER, self.whole.dim())?;
        Ok(())
    }
}
