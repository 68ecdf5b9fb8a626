//! In-memory checkpoint store. No persistence, for tests and dry runs.

use std::{collections::HashMap, sync::Mutex};

use super::store::{CheckpointStore, StoreError, validate_key};

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryStore {
    fn write(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        validate_key(key)?;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        validate_key(key)?;
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.keys().cloned().collect())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn behaves_like_a_store() {
        let store = MemoryStore::new();
        store.write("a1", b"x").unwrap();
        store.write("b2", b"y").unwrap();
        assert_eq!(store.read("a1").unwrap(), b"x");

        let mut keys = store.list().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a1", "b2"]);

        store.delete("a1").unwrap();
        store.delete("a1").unwrap();
        assert!(store.read("a1").unwrap_err().is_not_found());
        assert!(store.write("bad key", b"z").is_err());
    }
}
