//! One-file-per-key checkpoint store with atomic writes.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tracing::debug;

use super::store::{CheckpointStore, StoreError, validate_key};

/// File-backed store. Each key is a file directly under `dir`.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Create the store, creating `dir` if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self.dir.join(key))
    }
}

fn is_temp_file(name: &str) -> bool {
    name.starts_with('.') || name.ends_with(".tmp")
}

impl CheckpointStore for FileStore {
    /// Atomic write: write a dot-prefixed temp file, then rename over the key.
    fn write(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        let path = self.path(key)?;
        let tmp = self.dir.join(format!(".{key}.tmp"));
        fs::write(&tmp, data)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        debug!(key, path = %path.display(), "checkpoint written");
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path(key)?;
        fs::read(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StoreError::NotFound(key.to_string()),
            _ => e.into(),
        })
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            // Entries can be deleted between readdir and the type check.
            match entry.file_type() {
                Ok(ft) if ft.is_file() => {},
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if is_temp_file(&name) || validate_key(&name).is_err() {
                continue;
            }
            keys.push(name);
        }
        Ok(keys)
    }
}
