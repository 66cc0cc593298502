//! stedsim-scan: Point-scanning acquisitions over molecule grids.
//!
//! This crate drives acquisitions:
//! - **Microscope** - walks a pixel list, accumulates signal and bleaches
//! - **Raster** - pixel-list construction for full and partial scans
//! - **Clock / TimeReconciler** - couples the pixel clock to a coarse tick
//! - **TimedExperiment** - interleaves partial scans with flash updates
//!

pub mod clock;
pub mod experiment;
pub mod microscope;
pub mod raster;

pub use clock::{time_correspondence, Clock, TimeReconciler};
pub use experiment::{ExperimentConfig, ExperimentReport, TimedExperiment};
pub use microscope::{Acquisition, Dwell, Microscope, ScanOptions};
pub use raster::{generate_raster_pixel_list, pixel_sampling, set_starting_pixel, Pixel};

// Re-export the error types shared with the core crate
pub use stedsim_core::{Error, Result};
