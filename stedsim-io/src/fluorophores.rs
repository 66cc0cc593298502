//! Named fluorophore parameter sets stored as JSON.
//!
//! A set is a JSON object mapping a species name to its parameters, with
//! cross-section tables keyed by wavelength in nanometers:
//!
//! ```json
//! { "egfp": { "lambda_em": 507e-9, "qy": 0.6,
//!             "sigma_abs": { "488": 2.14e-20 }, "sigma_ste": { "575": 1.5e-20 },
//!             "tau": 2.6e-9, "tau_vib": 1.2e-12, "tau_tri": 25e-6 } }
//! ```

use crate::{Error, Result};
use stedsim_core::Fluorophore;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Loads and validates every species of a fluorophore set.
///
/// # Errors
/// Returns [`Error::InvalidFormat`] for an empty set or an invalid species,
/// and I/O or JSON errors as they occur.
pub fn load_fluorophore_set<P: AsRef<Path>>(path: P) -> Result<BTreeMap<String, Fluorophore>> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let set: BTreeMap<String, Fluorophore> = serde_json::from_reader(reader)?;
    if set.is_empty() {
        return Err(Error::InvalidFormat(format!(
            "{} holds no fluorophore",
            path.display()
        )));
    }
    for (name, fluo) in &set {
        fluo.validate().map_err(|err| {
            Error::InvalidFormat(format!("fluorophore '{name}' in {}: {err}", path.display()))
        })?;
    }
    log::debug!("loaded {} fluorophores from {}", set.len(), path.display());
    Ok(set)
}

/// Writes a fluorophore set as pretty-printed JSON.
///
/// # Errors
/// Fails when the file cannot be written.
pub fn save_fluorophore_set<P: AsRef<Path>>(
    path: P,
    set: &BTreeMap<String, Fluorophore>,
) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, set)?;
    writer.flush()?;
    Ok(())
}
