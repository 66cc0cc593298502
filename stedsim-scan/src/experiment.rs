//! Timed acquisitions interleaved with flash updates.
//!
//! The experiment clock ticks in fixed quanta. Each tick pays for the pixels
//! its time covers; whenever the flash quantum elapses, the pixels paid for
//! so far are acquired in one partial scan (carrying the intensity map
//! forward) and the temporal grid advances to its next flash frame. A
//! completed pixel list yields one image, and the next image starts right
//! away with whatever time is left in the bank.

use crate::clock::{Clock, TimeReconciler};
use crate::microscope::{Dwell, Microscope, ScanOptions};
use crate::raster::{pixel_sampling, Pixel};
use ndarray::Array2;
use stedsim_core::{Error, FlashIndices, MoleculeMap, Result, TemporalDatamap};

/// Parameters of a timed experiment.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentConfig {
    /// Acquisition pixel size (m).
    pub pixelsize: f64,
    pub dwell: Dwell,
    /// Excitation power (W).
    pub p_ex: f64,
    /// Depletion power (W).
    pub p_sted: f64,
    pub bleach: bool,
    /// Clock tick (us).
    pub time_quantum_us: u64,
    /// Total experiment duration (us).
    pub runtime_us: u64,
}

impl ExperimentConfig {
    /// Confocal imaging with bleaching, 10 us ticks over one second.
    #[must_use]
    pub fn new(pixelsize: f64, dwell: Dwell, p_ex: f64) -> Self {
        Self {
            pixelsize,
            dwell,
            p_ex,
            p_sted: 0.0,
            bleach: true,
            time_quantum_us: 10,
            runtime_us: 1_000_000,
        }
    }

    #[must_use]
    pub fn with_sted(mut self, p_sted: f64) -> Self {
        self.p_sted = p_sted;
        self
    }

    #[must_use]
    pub fn with_bleach(mut self, bleach: bool) -> Self {
        self.bleach = bleach;
        self
    }

    #[must_use]
    pub fn with_timing(mut self, time_quantum_us: u64, runtime_us: u64) -> Self {
        self.time_quantum_us = time_quantum_us;
        self.runtime_us = runtime_us;
        self
    }
}

/// What a timed experiment produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExperimentReport {
    /// Completed images, in acquisition order.
    pub images: Vec<Array2<f64>>,
    /// Signal of the image still in progress when time ran out.
    pub partial_image: Option<Array2<f64>>,
    /// Partial acquisition calls made.
    pub partial_scans: usize,
    /// Flash frames advanced.
    pub flash_updates: usize,
    /// Total pixels scanned.
    pub pixels_scanned: usize,
    /// Live molecules at the start and the end.
    pub molecules_before: u64,
    pub molecules_after: u64,
}

/// Drives a microscope over a temporal grid on a fixed clock.
#[derive(Debug)]
pub struct TimedExperiment {
    microscope: Microscope,
    temporal: TemporalDatamap,
    config: ExperimentConfig,
    clock: Clock,
    reconciler: TimeReconciler,
}

impl TimedExperiment {
    /// Prepares an experiment.
    ///
    /// # Errors
    /// Returns [`Error::Domain`] when the temporal grid has no flash stack,
    /// and [`Error::Configuration`] for a zero time quantum.
    pub fn new(
        microscope: Microscope,
        temporal: TemporalDatamap,
        config: ExperimentConfig,
    ) -> Result<Self> {
        if temporal.flash_tstack().is_none() {
            return Err(Error::Domain(
                "temporal datamap has no flash stack".to_string(),
            ));
        }
        let clock = Clock::new(config.time_quantum_us)?;
        Ok(Self {
            microscope,
            temporal,
            config,
            clock,
            reconciler: TimeReconciler::new(),
        })
    }

    #[must_use]
    pub fn temporal(&self) -> &TemporalDatamap {
        &self.temporal
    }

    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Releases the microscope and the grid.
    #[must_use]
    pub fn into_parts(self) -> (Microscope, TemporalDatamap) {
        (self.microscope, self.temporal)
    }

    fn scan(
        &mut self,
        pixels: Vec<Pixel>,
        intensity: Option<Array2<f64>>,
    ) -> Result<(Array2<f64>, Array2<f64>)> {
        let mut options = ScanOptions::new()
            .with_pixel_list(pixels)
            .with_bleach(self.config.bleach)
            .with_update(true)
            .with_indices(FlashIndices::new(self.temporal.flash_index()));
        if let Some(intensity) = intensity {
            options = options.with_acquired_intensity(intensity);
        }
        let acquisition = self.microscope.get_signal_and_bleach(
            &mut self.temporal,
            self.config.pixelsize,
            &self.config.dwell,
            self.config.p_ex,
            self.config.p_sted,
            options,
        )?;
        Ok((acquisition.signal, acquisition.intensity))
    }

    fn advance_flash(&mut self) -> Result<()> {
        let next = self.temporal.flash_index() + 1;
        self.temporal.update_whole_datamap(next)?;
        self.temporal.update_dicts(FlashIndices::new(next))
    }

    /// Runs the experiment until its duration has elapsed.
    ///
    /// # Errors
    /// Propagates acquisition and flash-update errors; the experiment stops
    /// at the first one.
    pub fn run(&mut self) -> Result<ExperimentReport> {
        let roi = self
            .temporal
            .roi()
            .ok_or_else(|| Error::Domain("region of interest has not been set".to_string()))?;
        let ratio = (self.config.pixelsize / self.temporal.pixelsize()).round().max(1.0);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let ratio = ratio as usize;
        let pixel_list = pixel_sampling(roi.dim(), ratio);
        let flash_quantum_us = self.temporal.time_usec_between_flash_updates().max(1);

        let mut report = ExperimentReport {
            molecules_before: self.temporal.total_molecules(),
            ..ExperimentReport::default()
        };
        let mut intensity: Option<Array2<f64>> = None;
        let mut last_signal: Option<Array2<f64>> = None;
        let mut scanned_to = 0;
        let mut last_flash_us = self.clock.current_time_us();

        while self.clock.current_time_us() < self.config.runtime_us {
            let now = self.reconciler.tick(&mut self.clock);
            let dwell = &self.config.dwell;
            self.reconciler
                .consume(pixel_list.len(), |i| dwell.at_pixel(pixel_list[i], ratio));

            let consumed = self.reconciler.consumed();
            let flash_due = now - last_flash_us >= flash_quantum_us;
            let list_done = consumed == pixel_list.len();
            let timed_out = now >= self.config.runtime_us;

            if (flash_due || list_done || timed_out) && consumed > scanned_to {
                let pixels = pixel_list[scanned_to..consumed].to_vec();
                report.pixels_scanned += pixels.len();
                let (signal, acquired) = self.scan(pixels, intensity.take())?;
                report.partial_scans += 1;
                scanned_to = consumed;
                if list_done {
                    report.images.push(signal);
                    self.reconciler.restart();
                    scanned_to = 0;
                } else {
                    intensity = Some(acquired);
                    last_signal = Some(signal);
                }
            }

            if flash_due {
                self.advance_flash()?;
                report.flash_updates += 1;
                last_flash_us = now;
            }
        }

        if scanned_to > 0 {
            report.partial_image = last_signal;
        }
        report.molecules_after = self.temporal.total_molecules();
        log::info!(
            "timed experiment: {} images, {} partial scans, {} flash updates, {} -> {} molecules",
            report.images.len(),
            report.partial_scans,
            report.flash_updates,
            report.molecules_before,
            report.molecules_after
        );
        Ok(report)
    }
}
