//! Optical system: beams, objective, detector and the PSF cache.

use crate::beam::{detection_kernel, donut_kernel, excitation_kernel, kernel_half_width, spread};
use crate::cache::{BaseKernels, PsfCache, PsfKey, PsfStore};
use crate::detector::Detector;
use crate::objective::Objective;
use ndarray::{Array2, Zip};
use stedsim_core::beam::check_power;
use stedsim_core::{DepletionBeam, Error, ExcitationBeam, Fluorophore, PhotophysicsModel, Result};
use std::fmt;

/// Per-molecule kernels for one power pair, centered on the beam axis.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveKernels {
    /// Detected photons per second from one molecule at each offset.
    pub photons: Array2<f64>,
    /// Bleaching rate (1/s) of one molecule at each offset.
    pub bleach: Array2<f64>,
}

impl EffectiveKernels {
    /// Kernel shape.
    #[must_use]
    pub fn dim(&self) -> (usize, usize) {
        self.photons.dim()
    }

    /// Half-extents `(rows, cols)` around the center pixel.
    #[must_use]
    pub fn half(&self) -> (usize, usize) {
        let (rows, cols) = self.dim();
        (rows / 2, cols / 2)
    }

    /// Whether no molecule can bleach under these kernels.
    #[must_use]
    pub fn is_non_bleaching(&self) -> bool {
        self.bleach.iter().all(|&k| k <= 0.0)
    }
}

/// Everything between the lasers and the detector.
///
/// Base beam shapes are cached per pixel size; effective kernels for a power
/// pair are recomposed on each request.
pub struct OpticalSystem {
    excitation: ExcitationBeam,
    depletion: DepletionBeam,
    detector: Detector,
    objective: Objective,
    fluo: Fluorophore,
    model: PhotophysicsModel,
    cache: PsfCache,
    store: Option<Box<dyn PsfStore>>,
}

impl fmt::Debug for OpticalSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpticalSystem")
            .field("excitation", &self.excitation)
            .field("depletion", &self.depletion)
            .field("detector", &self.detector)
            .field("objective", &self.objective)
            .field("fluo", &self.fluo)
            .field("cached_pixelsize", &self.cache.pixelsize())
            .field("store", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

impl OpticalSystem {
    /// Assembles and validates an optical system.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] when any component is invalid or the
    /// fluorophore does not absorb at the excitation wavelength.
    pub fn new(
        excitation: ExcitationBeam,
        depletion: DepletionBeam,
        detector: Detector,
        objective: Objective,
        fluo: Fluorophore,
    ) -> Result<Self> {
        excitation.validate()?;
        depletion.validate()?;
        detector.validate()?;
        objective.validate()?;
        fluo.require_wavelengths(excitation.lambda, depletion.lambda)?;
        let model = PhotophysicsModel::new(&fluo, &excitation, &depletion);
        Ok(Self {
            excitation,
            depletion,
            detector,
            objective,
            fluo,
            model,
            cache: PsfCache::new(),
            store: None,
        })
    }

    /// Attaches a persisted store for base kernels.
    #[must_use]
    pub fn with_store(mut self, store: Box<dyn PsfStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn excitation(&self) -> &ExcitationBeam {
        &self.excitation
    }

    #[must_use]
    pub fn depletion(&self) -> &DepletionBeam {
        &self.depletion
    }

    #[must_use]
    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    #[must_use]
    pub fn objective(&self) -> &Objective {
        &self.objective
    }

    #[must_use]
    pub fn fluorophore(&self) -> &Fluorophore {
        &self.fluo
    }

    #[must_use]
    pub fn model(&self) -> &PhotophysicsModel {
        &self.model
    }

    /// In-memory cache statistics `(hits, misses)`.
    #[must_use]
    pub fn cache_stats(&self) -> (u64, u64) {
        self.cache.stats()
    }

    /// Fraction of emitted photons counted by the detector.
    #[must_use]
    pub fn efficiency(&self) -> f64 {
        let transmission = self.objective.transmission_at(self.fluo.lambda_em);
        self.detector.efficiency(transmission, self.fluo.tau)
    }

    /// Store key for the base kernels at a pixel size.
    #[must_use]
    pub fn key(&self, pixelsize: f64) -> PsfKey {
        PsfKey {
            pixelsize,
            lambda_ex: self.excitation.lambda,
            lambda_sted: self.depletion.lambda,
            lambda_em: self.fluo.lambda_em,
            na: self.objective.na,
            zero_residual: self.depletion.zero_residual,
            pinhole_au: self.detector.pinhole_au,
        }
    }

    fn sample_kernels(&self, pixelsize: f64) -> BaseKernels {
        let na = self.objective.na;
        let max_lambda = self
            .excitation
            .lambda
            .max(self.depletion.lambda)
            .max(self.fluo.lambda_em);
        let half = kernel_half_width(max_lambda, na, pixelsize);
        BaseKernels {
            pixelsize,
            excitation: excitation_kernel(self.excitation.lambda, na, pixelsize, half),
            depletion: donut_kernel(
                self.depletion.lambda,
                na,
                self.depletion.zero_residual,
                pixelsize,
                half,
            ),
            detection: detection_kernel(
                self.fluo.lambda_em,
                na,
                self.detector.pinhole_au,
                pixelsize,
                half,
            ),
        }
    }

    fn load_or_sample(&self, pixelsize: f64) -> BaseKernels {
        let key = self.key(pixelsize);
        if let Some(store) = &self.store {
            match store.load(&key) {
                Ok(Some(mut kernels))
                    if kernels.is_consistent()
                        && (kernels.pixelsize - pixelsize).abs() <= 1e-9 * pixelsize =>
                {
                    log::debug!("loaded base kernels {key} from store");
                    kernels.pixelsize = pixelsize;
                    return kernels;
                }
                Ok(Some(_)) => log::warn!("ignoring inconsistent stored kernels {key}"),
                Ok(None) => log::debug!("no stored kernels for {key}"),
                Err(err) => log::warn!("failed to load stored kernels {key}: {err}"),
            }
        }

        let kernels = self.sample_kernels(pixelsize);
        let (rows, cols) = kernels.dim();
        log::debug!("sampled base kernels {key} ({rows}x{cols})");
        if let Some(store) = &self.store {
            if let Err(err) = store.save(&key, &kernels) {
                log::warn!("failed to store kernels {key}: {err}");
            }
        }
        kernels
    }

    /// Base kernels at a pixel size, sampling them on a cache miss.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] for a non-positive pixel size.
    pub fn cache(&mut self, pixelsize: f64) -> Result<&BaseKernels> {
        if !(pixelsize.is_finite() && pixelsize > 0.0) {
            return Err(Error::Configuration(format!(
                "pixel size must be positive, got {pixelsize}"
            )));
        }
        if self.cache.lookup(pixelsize).is_none() {
            let kernels = self.load_or_sample(pixelsize);
            return Ok(self.cache.insert(kernels));
        }
        self.cache
            .current()
            .ok_or_else(|| Error::Domain("PSF cache lost its entry".to_string()))
    }

    /// Photon-rate and bleach-rate kernels for a power pair (W).
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] for a negative or non-finite power or
    /// an invalid pixel size.
    pub fn kernels(&mut self, pixelsize: f64, p_ex: f64, p_sted: f64) -> Result<EffectiveKernels> {
        check_power("p_ex", p_ex)?;
        check_power("p_sted", p_sted)?;
        let ex_scale = p_ex * self.objective.transmission_at(self.excitation.lambda);
        let sted_scale = p_sted * self.objective.transmission_at(self.depletion.lambda);
        let efficiency = self.efficiency();
        let model = self.model;

        let base = self.cache(pixelsize)?;
        let mut photons = Array2::<f64>::zeros(base.dim());
        let mut bleach = Array2::<f64>::zeros(base.dim());
        Zip::from(&mut photons)
            .and(&mut bleach)
            .and(&base.excitation)
            .and(&base.depletion)
            .and(&base.detection)
            .par_for_each(|photons, bleach, &ex, &dep, &det| {
                let rates = model.rates(ex * ex_scale, dep * sted_scale);
                *photons = rates.emission * det * efficiency;
                *bleach = rates.bleach;
            });
        Ok(EffectiveKernels { photons, bleach })
    }

    /// Effective detection PSF: detected photons per second from one molecule
    /// at each offset from the beam axis.
    ///
    /// # Errors
    /// See [`OpticalSystem::kernels`].
    pub fn get_effective(&mut self, pixelsize: f64, p_ex: f64, p_sted: f64) -> Result<Array2<f64>> {
        Ok(self.kernels(pixelsize, p_ex, p_sted)?.photons)
    }

    /// RMS radius (m) of the effective PSF for a power pair.
    ///
    /// # Errors
    /// See [`OpticalSystem::kernels`].
    pub fn effective_spread(&mut self, pixelsize: f64, p_ex: f64, p_sted: f64) -> Result<f64> {
        let psf = self.get_effective(pixelsize, p_ex, p_sted)?;
        Ok(spread(&psf) * pixelsize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::StoreError;
    use approx::assert_relative_eq;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    const PX: f64 = 20e-9;

    fn system() -> OpticalSystem {
        OpticalSystem::new(
            ExcitationBeam::new(488e-9),
            DepletionBeam::new(575e-9),
            Detector::default(),
            Objective::default(),
            Fluorophore::egfp(),
        )
        .unwrap()
    }

    #[derive(Default, Clone)]
    struct MemoryStore {
        entries: Arc<Mutex<HashMap<String, BaseKernels>>>,
    }

    impl PsfStore for MemoryStore {
        fn load(&self, key: &PsfKey) -> std::result::Result<Option<BaseKernels>, StoreError> {
            Ok(self.entries.lock().unwrap().get(&key.to_string()).cloned())
        }

        fn save(&self, key: &PsfKey, kernels: &BaseKernels) -> std::result::Result<(), StoreError> {
            self.entries
                .lock()
                .unwrap()
                .insert(key.to_string(), kernels.clone());
            Ok(())
        }
    }

    #[test]
    fn test_new_rejects_unabsorbed_excitation() {
        let result = OpticalSystem::new(
            ExcitationBeam::new(635e-9),
            DepletionBeam::new(575e-9),
            Detector::default(),
            Objective::default(),
            Fluorophore::egfp(),
        );
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_cache_reuses_kernels_per_pixelsize() {
        let mut optics = system();
        let dim = optics.cache(PX).unwrap().dim();
        assert_eq!(dim, (43, 43));
        optics.cache(PX).unwrap();
        assert_eq!(optics.cache_stats(), (1, 1));

        let coarse = optics.cache(40e-9).unwrap().dim();
        assert_eq!(coarse, (23, 23));
        assert_eq!(optics.cache_stats(), (1, 2));
        assert!(optics.cache(0.0).is_err());
    }

    #[test]
    fn test_zero_excitation_gives_dark_kernels() {
        let mut optics = system();
        let kernels = optics.kernels(PX, 0.0, 50e-3).unwrap();
        assert!(kernels.photons.iter().all(|&v| v == 0.0));
        assert!(kernels.is_non_bleaching());
    }

    #[test]
    fn test_effective_psf_scales_with_power() {
        let mut optics = system();
        let low = optics.get_effective(PX, 1e-6, 0.0).unwrap();
        let high = optics.get_effective(PX, 2e-6, 0.0).unwrap();
        assert_relative_eq!(high.sum() / low.sum(), 2.0, max_relative = 1e-2);
    }

    #[test]
    fn test_depletion_narrows_effective_psf() {
        let mut optics = system();
        let confocal = optics.effective_spread(PX, 10e-6, 0.0).unwrap();
        let sted = optics.effective_spread(PX, 10e-6, 30e-3).unwrap();
        assert!(sted < confocal, "sted {sted} vs confocal {confocal}");
    }

    #[test]
    fn test_negative_power_is_rejected() {
        let mut optics = system();
        assert!(optics.kernels(PX, -1.0, 0.0).is_err());
        assert!(optics.kernels(PX, 1e-6, f64::NAN).is_err());
    }

    #[test]
    fn test_store_round_trip() {
        let store = MemoryStore::default();
        let mut first = system().with_store(Box::new(store.clone()));
        let sampled = first.cache(PX).unwrap().clone();
        assert_eq!(store.entries.lock().unwrap().len(), 1);

        let mut second = system().with_store(Box::new(store.clone()));
        let loaded = second.cache(PX).unwrap().clone();
        assert_eq!(sampled, loaded);
        assert_eq!(store.entries.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_wider_pinhole_widens_confocal_psf() {
        let mut wide = OpticalSystem::new(
            ExcitationBeam::new(488e-9),
            DepletionBeam::new(575e-9),
            Detector::default().with_pinhole(3.0),
            Objective::default(),
            Fluorophore::egfp(),
        )
        .unwrap();
        let closed = system().effective_spread(PX, 1e-6, 0.0).unwrap();
        let open = wide.effective_spread(PX, 1e-6, 0.0).unwrap();
        assert!(open > closed, "open {open} vs closed {closed}");
    }
}
