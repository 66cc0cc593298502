//! stedsim-optics: Beam profiles, detection and effective PSFs.
//!
//! Analytic beam shapes are sampled onto the grid once per pixel size and
//! cached by [`OpticalSystem`]. Effective kernels for a power pair are then
//! composed from the cached shapes and the core photophysics model.
//!

pub mod beam;
pub mod cache;
pub mod detector;
pub mod objective;
pub mod system;

pub use beam::{
    detection_kernel, donut_kernel, excitation_kernel, gaussian_shape, kernel_half_width, spread,
};
pub use cache::{BaseKernels, PsfCache, PsfKey, PsfStore, StoreError};
pub use detector::Detector;
pub use objective::Objective;
pub use system::{EffectiveKernels, OpticalSystem};

// Re-export the error types shared with the core crate
pub use stedsim_core::{Error, Result};
