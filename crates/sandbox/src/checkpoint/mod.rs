//! Sandbox checkpoints: the recovery record written before a sandbox starts.
//!
//! A checkpoint holds just enough to tear down networking and report the
//! sandbox identity once the backend has forgotten it. It is serialized as
//! JSON with an embedded version and a SHA-256 checksum over the payload, so
//! a truncated or hand-edited file is reported as corrupted instead of being
//! trusted.

pub mod store;
pub mod store_file;
pub mod store_memory;

use std::sync::Arc;

use {
    serde::{Deserialize, Serialize},
    sha2::{Digest, Sha256},
    tracing::{debug, warn},
};

pub use store::{CheckpointStore, StoreError};

use crate::{
    error::{Error, Result},
    types::{PortMapping, Protocol, SandboxConfig},
};

pub const CHECKPOINT_VERSION: &str = "v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointProtocol {
    Tcp,
    Udp,
}

impl CheckpointProtocol {
    fn from_protocol(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Tcp => Self::Tcp,
            Protocol::Udp => Self::Udp,
            other => {
                warn!(protocol = %other, "unsupported checkpoint protocol, defaulting to tcp");
                Self::Tcp
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointPortMapping {
    pub protocol: CheckpointProtocol,
    pub container_port: i32,
    pub host_port: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointData {
    #[serde(default)]
    pub port_mappings: Vec<CheckpointPortMapping>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: String,
    pub name: String,
    pub namespace: String,
    pub data: CheckpointData,
    #[serde(default)]
    pub checksum: String,
}

impl Checkpoint {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        port_mappings: Vec<CheckpointPortMapping>,
    ) -> Self {
        Self {
            version: CHECKPOINT_VERSION.to_string(),
            name: name.into(),
            namespace: namespace.into(),
            data: CheckpointData { port_mappings },
            checksum: String::new(),
        }
    }

    /// Build the checkpoint for a sandbox about to be started.
    #[must_use]
    pub fn from_config(config: &SandboxConfig) -> Self {
        let port_mappings = config
            .port_mappings
            .iter()
            .map(|pm: &PortMapping| CheckpointPortMapping {
                protocol: CheckpointProtocol::from_protocol(pm.protocol),
                container_port: pm.container_port,
                host_port: pm.host_port,
            })
            .collect();
        Self::new(
            config.metadata.name.clone(),
            config.metadata.namespace.clone(),
            port_mappings,
        )
    }

    fn compute_checksum(&self) -> Result<String> {
        let mut unsummed = self.clone();
        unsummed.checksum.clear();
        let payload = serde_json::to_vec(&unsummed)
            .map_err(|e| Error::Message(format!("failed to encode checkpoint: {e}")))?;
        let mut hasher = Sha256::new();
        hasher.update(&payload);
        Ok(format!("{:x}", hasher.finalize()))
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let mut sealed = self.clone();
        sealed.checksum = self.compute_checksum()?;
        serde_json::to_vec(&sealed)
            .map_err(|e| Error::Message(format!("failed to encode checkpoint: {e}")))
    }

    /// Decode and verify. Any failure is returned as the corruption reason.
    fn decode(bytes: &[u8]) -> std::result::Result<Self, String> {
        let checkpoint: Self = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(format!("unsupported version {:?}", checkpoint.version));
        }
        let expected = checkpoint.compute_checksum().map_err(|e| e.to_string())?;
        if checkpoint.checksum != expected {
            return Err("checksum mismatch".to_string());
        }
        Ok(checkpoint)
    }
}

/// Typed checkpoint access on top of a raw [`CheckpointStore`].
#[derive(Clone)]
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self { store }
    }

    pub fn write(&self, id: &str, checkpoint: &Checkpoint) -> Result<()> {
        let bytes = checkpoint.encode()?;
        self.store
            .write(id, &bytes)
            .map_err(|e| Error::store(id, "write", e))
    }

    /// Read and verify a checkpoint.
    ///
    /// Returns [`Error::NotFound`] when absent and
    /// [`Error::CorruptedCheckpoint`] when present but unusable. The caller
    /// decides whether to remove a corrupted entry.
    pub fn read(&self, id: &str) -> Result<Checkpoint> {
        let bytes = self.store.read(id).map_err(|e| match e {
            StoreError::NotFound(_) => Error::not_found("checkpoint", id),
            other => Error::store(id, "read", other),
        })?;
        Checkpoint::decode(&bytes).map_err(|reason| Error::CorruptedCheckpoint {
            id: id.to_string(),
            reason,
        })
    }

    /// Remove a checkpoint. Absent checkpoints are not an error.
    pub fn remove(&self, id: &str) -> Result<()> {
        match self.store.delete(id) {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(sandbox_id = id, "checkpoint already removed");
                Ok(())
            },
            Err(e) => Err(Error::store(id, "remove", e)),
        }
    }

    pub fn list_ids(&self) -> Result<Vec<String>> {
        self.store.list().map_err(|e| Error::store("*", "list", e))
    }
}
