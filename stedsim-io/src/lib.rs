//! stedsim-io: File I/O for stedsim.
//!
//! This crate provides a JSON directory store for sampled beam kernels and
//! loaders for named fluorophore parameter sets.
//!

mod error;
mod fluorophores;
mod store;

pub use error::{Error, Result};
pub use fluorophores::{load_fluorophore_set, save_fluorophore_set};
pub use store::JsonPsfStore;
