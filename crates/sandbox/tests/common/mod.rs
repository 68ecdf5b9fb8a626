//! Fakes shared by the sandbox integration tests.
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use podshim_sandbox::{
    BackendError, CheckpointManager, CheckpointStore, ContainerBackend, ContainerId,
    LegacyCleanupFlag, MemoryStore, NetworkPlugin, SandboxConfig, SandboxMetadata,
    SandboxService, ServiceOptions, StoreError,
    backend::{
        ContainerCreateConfig, ContainerInspect, ContainerSummary, ListOptions, RegistryAuth,
        RemoveOptions,
    },
    labels::{CONTAINER_TYPE_LABEL_KEY, CONTAINER_TYPE_LABEL_SANDBOX, matches_selector},
    types::Labels,
};

pub const CREATED_RFC3339: &str = "2024-03-01T10:00:00Z";
pub const CREATED_SECS: i64 = 1_709_287_200;

// ── Fake backend ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct FakeContainer {
    pub id: String,
    pub name: String,
    pub labels: Labels,
    pub running: bool,
    pub pid: i64,
    pub network_mode: String,
    pub ip_address: String,
    pub global_ipv6_address: String,
}

impl FakeContainer {
    /// A stopped container carrying the sandbox type label.
    pub fn sandbox(id: &str, name: &str) -> Self {
        Self {
            id: id.into(),
            name: format!("/{name}"),
            labels: Labels::from([(
                CONTAINER_TYPE_LABEL_KEY.to_string(),
                CONTAINER_TYPE_LABEL_SANDBOX.to_string(),
            )]),
            ..Self::default()
        }
    }

    pub fn running(mut self, pid: i64) -> Self {
        self.running = true;
        self.pid = pid;
        self
    }
}

#[derive(Default)]
struct BackendState {
    containers: BTreeMap<String, FakeContainer>,
    next_id: u32,
    calls: Vec<String>,
    failures: HashMap<&'static str, String>,
    conflicts: Vec<String>,
}

/// In-memory container engine that records every call.
pub struct FakeBackend {
    state: Mutex<BackendState>,
    api_version: String,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BackendState::default()),
            api_version: "1.41".into(),
        })
    }

    fn state(&self) -> std::sync::MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, container: FakeContainer) {
        self.state()
            .containers
            .insert(container.id.clone(), container);
    }

    pub fn container(&self, id: &str) -> Option<FakeContainer> {
        self.state().containers.get(id).cloned()
    }

    pub fn containers(&self) -> Vec<FakeContainer> {
        self.state().containers.values().cloned().collect()
    }

    pub fn forget(&self, id: &str) {
        self.state().containers.remove(id);
    }

    pub fn set_ip(&self, id: &str, ipv4: &str, ipv6: &str) {
        let mut state = self.state();
        let container = state.containers.get_mut(id).expect("container exists");
        container.ip_address = ipv4.into();
        container.global_ipv6_address = ipv6.into();
    }

    /// Make every call to `op` fail until [`Self::heal`] is called.
    pub fn fail(&self, op: &'static str, message: &str) {
        self.state().failures.insert(op, message.into());
    }

    pub fn heal(&self, op: &'static str) {
        self.state().failures.remove(op);
    }

    /// The next create reports a name conflict with `existing_id`.
    pub fn conflict_once(&self, existing_id: &str) {
        self.state().conflicts.push(existing_id.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.split(' ').next() == Some(op))
            .count()
    }

    fn enter(&self, op: &'static str, subject: &str) -> Result<std::sync::MutexGuard<'_, BackendState>, BackendError> {
        let mut state = self.state();
        state.calls.push(format!("{op} {subject}"));
        if let Some(message) = state.failures.get(op) {
            return Err(BackendError::Message(message.clone()));
        }
        Ok(state)
    }
}

impl ContainerBackend for FakeBackend {
    fn api_version(&self) -> Result<String, BackendError> {
        self.enter("version", "")?;
        Ok(self.api_version.clone())
    }

    fn pull_image(&self, image: &str, _auth: Option<&RegistryAuth>) -> Result<(), BackendError> {
        self.enter("pull", image)?;
        Ok(())
    }

    fn create_container(&self, config: &ContainerCreateConfig) -> Result<String, BackendError> {
        let mut state = self.enter("create", &config.name)?;
        if !state.conflicts.is_empty() {
            let existing_id = state.conflicts.remove(0);
            return Err(BackendError::Conflict {
                name: config.name.clone(),
                existing_id,
            });
        }
        let wanted = format!("/{}", config.name);
        if let Some(existing) = state.containers.values().find(|c| c.name == wanted) {
            return Err(BackendError::Conflict {
                name: config.name.clone(),
                existing_id: existing.id.clone(),
            });
        }
        state.next_id += 1;
        let id = format!("sandbox{:04}", state.next_id);
        state.containers.insert(id.clone(), FakeContainer {
            id: id.clone(),
            name: wanted,
            labels: config.labels.clone(),
            network_mode: config.host_config.network_mode.clone().unwrap_or_default(),
            ..FakeContainer::default()
        });
        Ok(id)
    }

    fn start_container(&self, id: &str) -> Result<(), BackendError> {
        let mut state = self.enter("start", id)?;
        let pid = 1000 + i64::from(state.next_id);
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| BackendError::not_found(id))?;
        container.running = true;
        container.pid = pid;
        Ok(())
    }

    fn stop_container(&self, id: &str, _grace: Duration) -> Result<(), BackendError> {
        let mut state = self.enter("stop", id)?;
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| BackendError::not_found(id))?;
        container.running = false;
        container.pid = 0;
        Ok(())
    }

    fn remove_container(&self, id: &str, _options: RemoveOptions) -> Result<(), BackendError> {
        let mut state = self.enter("remove", id)?;
        state
            .containers
            .remove(id)
            .map(drop)
            .ok_or_else(|| BackendError::not_found(id))
    }

    fn inspect_container(&self, id: &str) -> Result<ContainerInspect, BackendError> {
        let state = self.enter("inspect", id)?;
        let c = state
            .containers
            .get(id)
            .ok_or_else(|| BackendError::not_found(id))?;
        Ok(ContainerInspect {
            id: c.id.clone(),
            name: c.name.clone(),
            created: CREATED_RFC3339.into(),
            running: c.running,
            pid: c.pid,
            labels: c.labels.clone(),
            network_mode: c.network_mode.clone(),
            ip_address: c.ip_address.clone(),
            global_ipv6_address: c.global_ipv6_address.clone(),
        })
    }

    fn list_containers(&self, options: &ListOptions) -> Result<Vec<ContainerSummary>, BackendError> {
        let state = self.enter("list", "")?;
        Ok(state
            .containers
            .values()
            .filter(|c| options.all || c.running)
            .filter(|c| options.id.as_ref().is_none_or(|id| &c.id == id))
            .filter(|c| matches_selector(&c.labels, &options.labels))
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                names: vec![c.name.clone()],
                labels: c.labels.clone(),
                running: c.running,
                created: CREATED_SECS,
            })
            .collect())
    }
}

// ── Recording network plugin ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkCall {
    pub op: &'static str,
    pub namespace: String,
    pub name: String,
    pub container: String,
}

#[derive(Default)]
pub struct RecordingNetwork {
    calls: Mutex<Vec<NetworkCall>>,
    ip: Mutex<Option<String>>,
    failing: Mutex<HashSet<&'static str>>,
}

impl RecordingNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_ip(&self, ip: Option<&str>) {
        *self.ip.lock().unwrap_or_else(|e| e.into_inner()) = ip.map(str::to_string);
    }

    pub fn fail(&self, op: &'static str) {
        self.failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(op);
    }

    pub fn heal(&self, op: &'static str) {
        self.failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(op);
    }

    pub fn calls(&self) -> Vec<NetworkCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn calls_for(&self, op: &str) -> Vec<NetworkCall> {
        self.calls().into_iter().filter(|c| c.op == op).collect()
    }

    fn record(
        &self,
        op: &'static str,
        namespace: &str,
        name: &str,
        id: &ContainerId,
    ) -> anyhow::Result<()> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(NetworkCall {
                op,
                namespace: namespace.into(),
                name: name.into(),
                container: id.to_string(),
            });
        if self
            .failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(op)
        {
            anyhow::bail!("{op} failed for {namespace}/{name}");
        }
        Ok(())
    }
}

impl NetworkPlugin for RecordingNetwork {
    fn name(&self) -> &str {
        "cni"
    }

    fn set_up_pod(&self, namespace: &str, name: &str, id: &ContainerId) -> anyhow::Result<()> {
        self.record("set_up", namespace, name, id)
    }

    fn tear_down_pod(&self, namespace: &str, name: &str, id: &ContainerId) -> anyhow::Result<()> {
        self.record("tear_down", namespace, name, id)
    }

    fn pod_network_status(
        &self,
        namespace: &str,
        name: &str,
        id: &ContainerId,
    ) -> anyhow::Result<Option<String>> {
        self.record("status", namespace, name, id)?;
        Ok(self.ip.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }
}

// ── Store with a switchable list failure ─────────────────────────────────────

#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_list: Mutex<bool>,
}

impl FlakyStore {
    pub fn fail_list(&self) {
        *self.fail_list.lock().unwrap_or_else(|e| e.into_inner()) = true;
    }
}

impl CheckpointStore for FlakyStore {
    fn write(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        self.inner.write(key, data)
    }

    fn read(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.inner.read(key)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.inner.delete(key)
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        if *self.fail_list.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(StoreError::Io(std::io::Error::other("disk unavailable")));
        }
        self.inner.list()
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

pub struct Harness {
    pub backend: Arc<FakeBackend>,
    pub network: Arc<RecordingNetwork>,
    pub store: Arc<FlakyStore>,
    pub legacy: Arc<LegacyCleanupFlag>,
    pub service: SandboxService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_legacy_done(true)
    }

    pub fn with_legacy_done(done: bool) -> Self {
        let backend = FakeBackend::new();
        let network = RecordingNetwork::new();
        let store = Arc::new(FlakyStore::default());
        let legacy = Arc::new(LegacyCleanupFlag::new(done));
        let service = SandboxService::new(
            backend.clone(),
            network.clone(),
            CheckpointManager::new(store.clone()),
            legacy.clone(),
            ServiceOptions::default(),
        );
        Self {
            backend,
            network,
            store,
            legacy,
            service,
        }
    }

    pub fn has_checkpoint(&self, id: &str) -> bool {
        self.store.read(id).is_ok()
    }
}

pub fn pod_config(name: &str, namespace: &str) -> SandboxConfig {
    SandboxConfig {
        metadata: SandboxMetadata::new(name, namespace, format!("uid-{name}"), 0),
        hostname: name.into(),
        ..SandboxConfig::default()
    }
}

pub fn host_network_config(name: &str, namespace: &str) -> SandboxConfig {
    let mut config = pod_config(name, namespace);
    config
        .linux
        .security_context
        .namespace_options
        .host_network = true;
    config
}
