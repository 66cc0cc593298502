//! Named molecule layers and the grid trait that acquisitions operate on.

use crate::datamap::Roi;
use crate::error::{Error, Result};
use ndarray::Array2;
use std::collections::BTreeMap;

/// Name of the static density layer.
pub const BASE_LAYER: &str = "base";
/// Name of the current flash delta layer.
pub const FLASH_LAYER: &str = "flashes";

/// Externally tracked frame indices of a temporal grid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlashIndices {
    /// Index of the flash frame currently applied.
    pub flashes: usize,
}

impl FlashIndices {
    /// Creates indices pointing at a flash frame.
    #[must_use]
    pub fn new(flashes: usize) -> Self {
        Self { flashes }
    }
}

/// Molecule counts split into named layers that sum to the live grid.
///
/// Bleaching is applied layer by layer so that each layer keeps its own
/// meaning (static density vs. transient flash molecules).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MoleculeLayers {
    layers: BTreeMap<String, Array2<u32>>,
}

impl MoleculeLayers {
    /// Creates an empty set of layers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a layer.
    pub fn insert(&mut self, name: impl Into<String>, layer: Array2<u32>) {
        self.layers.insert(name.into(), layer);
    }

    /// Returns a layer by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Array2<u32>> {
        self.layers.get(name)
    }

    /// Returns a mutable layer by name.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Array2<u32>> {
        self.layers.get_mut(name)
    }

    /// Returns a layer by name or a domain error naming it.
    ///
    /// # Errors
    /// Returns [`Error::Domain`] when the layer is missing.
    pub fn require(&self, name: &str) -> Result<&Array2<u32>> {
        self.get(name)
            .ok_or_else(|| Error::Domain(format!("missing molecule layer '{name}'")))
    }

    /// Number of layers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Returns true when there are no layers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Layer names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.layers.keys().map(String::as_str)
    }

    /// Iterates over `(name, layer)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Array2<u32>)> {
        self.layers.iter().map(|(name, layer)| (name.as_str(), layer))
    }

    /// Iterates mutably over the layers.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut Array2<u32>> {
        self.layers.values_mut()
    }

    /// Shape shared by every layer, if any.
    #[must_use]
    pub fn dim(&self) -> Option<(usize, usize)> {
        self.layers.values().next().map(Array2::dim)
    }

    /// Live molecule count at one cell, summed over layers.
    #[inline]
    #[must_use]
    pub fn live_at(&self, row: usize, col: usize) -> u32 {
        self.layers
            .values()
            .map(|layer| layer[[row, col]])
            .fold(0u32, u32::saturating_add)
    }

    /// Live molecule grid, summed over layers.
    #[must_use]
    pub fn live(&self) -> Option<Array2<u32>> {
        let mut layers = self.layers.values();
        let mut live = layers.next()?.clone();
        for layer in layers {
            live.zip_mut_with(layer, |a, &b| *a = a.saturating_add(b));
        }
        Some(live)
    }

    /// Total molecules over every layer.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.layers
            .values()
            .flat_map(|layer| layer.iter())
            .map(|&n| u64::from(n))
            .sum()
    }
}

/// A molecule grid that can be scanned and bleached.
///
/// Implementors own the live grid; acquisitions borrow them exclusively for
/// one call, work on a [`MoleculeLayers`] copy, and hand the result back
/// through [`MoleculeMap::commit`].
pub trait MoleculeMap {
    /// Grid pixel size (m).
    fn pixelsize(&self) -> f64;

    /// Region of interest, once set.
    fn roi(&self) -> Option<Roi>;

    /// Live molecule counts over the whole padded grid.
    fn whole(&self) -> &Array2<u32>;

    /// Copies of the named layers that sum to the live grid.
    ///
    /// # Errors
    /// Fails when the grid's internal state is inconsistent.
    fn layers(&self) -> Result<MoleculeLayers>;

    /// Copies of the layers as they read once `indices` are recorded,
    /// without recording them.
    ///
    /// # Errors
    /// Fails when the indices do not match the live grid.
    fn layers_at(&self, _indices: FlashIndices) -> Result<MoleculeLayers> {
        self.layers()
    }

    /// Replaces the layers with (bleached) counts and rebuilds the live grid.
    ///
    /// # Errors
    /// Fails when a layer is missing or has the wrong shape.
    fn commit(&mut self, layers: &MoleculeLayers) -> Result<()>;

    /// Records externally tracked frame indices.
    ///
    /// # Errors
    /// Fails when the indices are not valid for this grid.
    fn update_dicts(&mut self, _indices: FlashIndices) -> Result<()> {
        Ok(())
    }

    /// Total live molecules over the whole grid.
    fn total_molecules(&self) -> u64 {
        self.whole().iter().map(|&n| u64::from(n)).sum()
    }
}

pub(crate) fn check_layer_shape(
    layers: &MoleculeLayers,
    name: &str,
    dim: (usize, usize),
) -> Result<Array2<u32>> {
    let layer = layers.require(name)?;
    if layer.dim() != dim {
        return Err(Error::Domain(format!(
            "layer '{name}' has shape {:?}, grid is {dim:?}",
            layer.dim()
        )));
    }
    Ok(layer.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_live_sums_layers() {
        let mut layers = MoleculeLayers::new();
        layers.insert(BASE_LAYER, array![[1, 2], [3, 4]]);
        layers.insert(FLASH_LAYER, array![[0, 5], [0, 1]]);

        assert_eq!(layers.len(), 2);
        assert_eq!(layers.live().unwrap(), array![[1, 7], [3, 5]]);
        assert_eq!(layers.live_at(0, 1), 7);
        assert_eq!(layers.total(), 16);
        assert_eq!(layers.names().collect::<Vec<_>>(), vec!["base", "flashes"]);
    }

    #[test]
    fn test_empty_layers() {
        let layers = MoleculeLayers::new();
        assert!(layers.is_empty());
        assert!(layers.live().is_none());
        assert!(layers.require(BASE_LAYER).is_err());
    }
}
