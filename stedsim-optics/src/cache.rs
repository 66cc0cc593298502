//! Base beam shape cache and its optional persistence seam.

use ndarray::Array2;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Error type returned by persisted stores.
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// Power-independent kernels for one pixel size.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BaseKernels {
    /// Pixel size the kernels were sampled at (m).
    pub pixelsize: f64,
    /// Excitation shape, unit area (1/m²).
    pub excitation: Array2<f64>,
    /// Depletion shape, unit area (1/m²).
    pub depletion: Array2<f64>,
    /// Detection PSF, peak 1.
    pub detection: Array2<f64>,
}

impl BaseKernels {
    /// Shape shared by the three kernels.
    #[must_use]
    pub fn dim(&self) -> (usize, usize) {
        self.excitation.dim()
    }

    /// Whether the three kernels share one odd square shape.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let (rows, cols) = self.dim();
        rows == cols
            && rows % 2 == 1
            && self.depletion.dim() == (rows, cols)
            && self.detection.dim() == (rows, cols)
    }
}

/// Identity of a set of base kernels.
///
/// Every input the sampled shapes depend on is part of the key, so a store
/// never hands back kernels of a different optical setup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PsfKey {
    pub pixelsize: f64,
    pub lambda_ex: f64,
    pub lambda_sted: f64,
    pub lambda_em: f64,
    pub na: f64,
    pub zero_residual: f64,
    pub pinhole_au: f64,
}

impl fmt::Display for PsfKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "px{:.3}nm_ex{:.1}nm_sted{:.1}nm_em{:.1}nm_na{:.3}_zr{:.4}_ph{:.2}",
            self.pixelsize * 1e9,
            self.lambda_ex * 1e9,
            self.lambda_sted * 1e9,
            self.lambda_em * 1e9,
            self.na,
            self.zero_residual,
            self.pinhole_au
        )
    }
}

/// Durable key -> kernels store shared across runs.
///
/// A store only saves recomputation: failures are reported to the caller,
/// which falls back to sampling the kernels.
pub trait PsfStore: Send + Sync {
    /// Loads kernels for a key, `Ok(None)` when absent.
    ///
    /// # Errors
    /// Returns an error when an entry exists but cannot be read.
    fn load(&self, key: &PsfKey) -> Result<Option<BaseKernels>, StoreError>;

    /// Saves kernels under a key.
    ///
    /// # Errors
    /// Returns an error when the entry cannot be written.
    fn save(&self, key: &PsfKey, kernels: &BaseKernels) -> Result<(), StoreError>;
}

/// In-memory cache holding the base kernels of the current pixel size.
///
/// Asking for another pixel size invalidates the entry.
#[derive(Debug, Clone, Default)]
pub struct PsfCache {
    entry: Option<BaseKernels>,
    hits: u64,
    misses: u64,
}

impl PsfCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached kernels when they were sampled at `pixelsize`.
    pub fn lookup(&mut self, pixelsize: f64) -> Option<&BaseKernels> {
        match &self.entry {
            Some(kernels) if kernels.pixelsize.to_bits() == pixelsize.to_bits() => {
                self.hits += 1;
                self.entry.as_ref()
            }
            _ => {
                self.misses += 1;
                None
            }
        }
    }

    /// Cached kernels, whatever their pixel size.
    #[must_use]
    pub fn current(&self) -> Option<&BaseKernels> {
        self.entry.as_ref()
    }

    /// Replaces the cached entry.
    pub fn insert(&mut self, kernels: BaseKernels) -> &BaseKernels {
        self.entry.insert(kernels)
    }

    /// Drops the cached entry.
    pub fn invalidate(&mut self) {
        self.entry = None;
    }

    /// Pixel size of the cached entry, if any.
    #[must_use]
    pub fn pixelsize(&self) -> Option<f64> {
        self.entry.as_ref().map(|kernels| kernels.pixelsize)
    }

    /// `(hits, misses)` since creation.
    #[must_use]
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kernels(pixelsize: f64) -> BaseKernels {
        BaseKernels {
            pixelsize,
            excitation: Array2::ones((3, 3)),
            depletion: Array2::zeros((3, 3)),
            detection: Array2::ones((3, 3)),
        }
    }

    #[test]
    fn test_cache_is_keyed_by_pixelsize() {
        let mut cache = PsfCache::new();
        assert!(cache.lookup(20e-9).is_none());
        cache.insert(kernels(20e-9));
        assert!(cache.lookup(20e-9).is_some());
        assert!(cache.lookup(10e-9).is_none());
        assert_eq!(cache.stats(), (1, 2));
        cache.invalidate();
        assert!(cache.pixelsize().is_none());
    }

    #[test]
    fn test_kernels_consistency() {
        assert!(kernels(1.0).is_consistent());
        let mut bad = kernels(1.0);
        bad.detection = Array2::ones((5, 5));
        assert!(!bad.is_consistent());
    }

    #[test]
    fn test_key_display_separates_setups() {
        let key = PsfKey {
            pixelsize: 20e-9,
            lambda_ex: 488e-9,
            lambda_sted: 575e-9,
            lambda_em: 507e-9,
            na: 1.4,
            zero_residual: 0.0,
            pinhole_au: 1.0,
        };
        let other = PsfKey {
            zero_residual: 0.01,
            ..key
        };
        assert_eq!(
            key.to_string(),
            "px20.000nm_ex488.0nm_sted575.0nm_em507.0nm_na1.400_zr0.0000_ph1.00"
        );
        assert_ne!(key.to_string(), other.to_string());
    }
}
