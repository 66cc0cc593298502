//! stedsim-core: Core types for confocal and STED acquisition simulation.
//!
//! This crate provides the foundational pieces that the optics and scan
//! crates build on: fluorophore species, beam records, the photophysics
//! rate model, and the molecule grids that acquisitions read and bleach.
//!

pub mod beam;
pub mod datamap;
pub mod error;
pub mod flash;
pub mod fluorophore;
pub mod layers;
pub mod photophysics;
pub mod temporal;

pub use beam::{DepletionBeam, ExcitationBeam};
pub use datamap::{Datamap, Roi, RoiMode};
pub use error::{Error, Result};
pub use flash::{rescale_curve, FlashSource, HandCraftedLightCurve, StochasticFlashes};
pub use fluorophore::Fluorophore;
pub use layers::{FlashIndices, MoleculeLayers, MoleculeMap};
pub use photophysics::{PhotophysicsModel, PhotophysicsRates};
pub use temporal::{Nanodomain, TemporalDatamap};
