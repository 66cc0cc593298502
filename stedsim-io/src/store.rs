//! JSON directory store for sampled beam kernels.

use crate::Result;
use stedsim_optics::{BaseKernels, PsfKey, PsfStore, StoreError};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Persists base kernels as one JSON file per [`PsfKey`] in a directory.
#[derive(Debug, Clone)]
pub struct JsonPsfStore {
    dir: PathBuf,
}

impl JsonPsfStore {
    /// Opens a store, creating the directory if needed.
    ///
    /// # Errors
    /// Returns [`crate::Error::Io`] when the directory cannot be created.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Store directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the kernels of a key.
    #[must_use]
    pub fn path_for(&self, key: &PsfKey) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Reads the kernels of a key, `None` when absent.
    ///
    /// # Errors
    /// Fails when the entry exists but cannot be read or parsed.
    pub fn load_kernels(&self, key: &PsfKey) -> Result<Option<BaseKernels>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let reader = BufReader::new(File::open(&path)?);
        let kernels: BaseKernels = serde_json::from_reader(reader)?;
        log::debug!("read kernels from {}", path.display());
        Ok(Some(kernels))
    }

    /// Writes the kernels of a key, replacing any previous entry.
    ///
    /// # Errors
    /// Fails when the entry cannot be written.
    pub fn save_kernels(&self, key: &PsfKey, kernels: &BaseKernels) -> Result<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer(&mut writer, kernels)?;
            writer.flush()?;
        }
        fs::rename(&tmp, &path)?;
        log::debug!("wrote kernels to {}", path.display());
        Ok(())
    }

    /// Number of stored entries.
    ///
    /// # Errors
    /// Fails when the directory cannot be listed.
    pub fn len(&self) -> Result<usize> {
        let mut count = 0;
        for entry in fs::read_dir(&self.dir)? {
            if entry?.path().extension().is_some_and(|ext| ext == "json") {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Whether the store holds no entry.
    ///
    /// # Errors
    /// Fails when the directory cannot be listed.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Removes every stored entry.
    ///
    /// # Errors
    /// Fails when the directory cannot be listed or an entry removed.
    pub fn clear(&self) -> Result<()> {
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

impl PsfStore for JsonPsfStore {
    fn load(&self, key: &PsfKey) -> std::result::Result<Option<BaseKernels>, StoreError> {
        Ok(self.load_kernels(key)?)
    }

    fn save(&self, key: &PsfKey, kernels: &BaseKernels) -> std::result::Result<(), StoreError> {
        Ok(self.save_kernels(key, kernels)?)
    }
}
