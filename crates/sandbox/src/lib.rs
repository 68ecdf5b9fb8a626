//! Pod sandbox lifecycle coordination.
//!
//! A sandbox is the long-lived "pause" container that owns a pod's network
//! namespace. [`SandboxService`] creates, stops, removes and inspects
//! sandboxes, and lists them by merging three sources:
//!
//! - containers the backend reports with the sandbox type label,
//! - checkpoints on disk whose container is gone,
//! - legacy-named containers from the previous shim generation.
//!
//! The container engine, network plugin and checkpoint storage are traits
//! ([`ContainerBackend`], [`NetworkPlugin`], [`CheckpointStore`]) so the
//! coordinator can be driven by fakes in tests.

pub mod backend;
pub mod checkpoint;
pub mod create_config;
pub mod docker;
pub mod error;
pub mod labels;
pub mod legacy;
mod list;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod naming;
pub mod network;
pub mod service;
pub mod types;

pub use {
    backend::{BackendError, ContainerBackend},
    checkpoint::{
        Checkpoint, CheckpointManager, CheckpointStore, StoreError, store_file::FileStore,
        store_memory::MemoryStore,
    },
    docker::DockerCli,
    error::{Error, Result, RunSandboxError},
    legacy::{LegacyCleanup, LegacyCleanupFlag},
    network::{ContainerId, NetworkPlugin, NoopNetworkPlugin},
    service::{SandboxService, ServiceOptions},
    types::{
        Sandbox, SandboxConfig, SandboxFilter, SandboxMetadata, SandboxState, SandboxStatus,
    },
};
