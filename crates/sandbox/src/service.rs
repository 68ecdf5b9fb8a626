//! Sandbox lifecycle: run, stop, remove and status.
//!
//! Every operation is a sequence of independent backend, checkpoint and
//! network-plugin calls. Nothing is transactional: a failed call leaves the
//! sandbox in whatever state the completed steps produced and the caller is
//! expected to retry. Teardown steps therefore treat "already gone" as done.

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    chrono::DateTime,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use crate::metrics::{counter, sandbox as sandbox_metrics};
use crate::{
    backend::{BackendError, ContainerBackend, ContainerCreateConfig, RegistryAuth, RemoveOptions},
    checkpoint::{Checkpoint, CheckpointManager},
    create_config::{CreateParams, make_sandbox_create_config, security_opt_separator},
    error::{Context, Error, Result, RunSandboxError},
    labels::{extract_sandbox_labels, is_legacy},
    legacy::LegacyCleanup,
    naming::{convert_legacy_name_and_labels, parse_sandbox_name, randomize_name},
    network::{ContainerId, NetworkPlugin},
    types::{
        SandboxConfig, SandboxMetadata, SandboxNetworkStatus, SandboxState, SandboxStatus,
    },
};

pub const DEFAULT_SANDBOX_IMAGE: &str = "gcr.io/google_containers/pause-amd64:3.0";
pub const DEFAULT_STOP_GRACE_PERIOD: Duration = Duration::from_secs(10);
pub const DEFAULT_SECCOMP_PROFILE_ROOT: &str = "/var/lib/kubelet/seccomp";

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Overrides [`DEFAULT_SANDBOX_IMAGE`].
    pub sandbox_image: Option<String>,
    pub registry_auth: Option<RegistryAuth>,
    pub seccomp_profile_root: PathBuf,
    pub stop_grace_period: Duration,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            sandbox_image: None,
            registry_auth: None,
            seccomp_profile_root: PathBuf::from(DEFAULT_SECCOMP_PROFILE_ROOT),
            stop_grace_period: DEFAULT_STOP_GRACE_PERIOD,
        }
    }
}

impl ServiceOptions {
    #[must_use]
    pub fn sandbox_image(&self) -> &str {
        self.sandbox_image
            .as_deref()
            .filter(|i| !i.is_empty())
            .unwrap_or(DEFAULT_SANDBOX_IMAGE)
    }
}

/// Coordinates sandbox lifecycle across the container backend, the network
/// plugin and the checkpoint store.
pub struct SandboxService {
    pub(crate) backend: Arc<dyn ContainerBackend>,
    pub(crate) network: Arc<dyn NetworkPlugin>,
    pub(crate) checkpoints: CheckpointManager,
    pub(crate) legacy_cleanup: Arc<dyn LegacyCleanup>,
    options: ServiceOptions,
}

impl SandboxService {
    pub fn new(
        backend: Arc<dyn ContainerBackend>,
        network: Arc<dyn NetworkPlugin>,
        checkpoints: CheckpointManager,
        legacy_cleanup: Arc<dyn LegacyCleanup>,
        options: ServiceOptions,
    ) -> Self {
        Self {
            backend,
            network,
            checkpoints,
            legacy_cleanup,
            options,
        }
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }

    /// Create and start a sandbox, then attach its network.
    ///
    /// Fails without an id until the backend record exists. After that the
    /// error carries the id so the caller can stop and remove it.
    pub fn run_sandbox(&self, config: &SandboxConfig) -> std::result::Result<String, RunSandboxError> {
        let result = self.run_sandbox_inner(config);
        #[cfg(feature = "metrics")]
        match &result {
            Ok(_) => counter!(sandbox_metrics::RUN_TOTAL).increment(1),
            Err(e) => counter!(sandbox_metrics::RUN_ERRORS_TOTAL, "stage" => e.stage()).increment(1),
        }
        result
    }

    fn run_sandbox_inner(&self, config: &SandboxConfig) -> std::result::Result<String, RunSandboxError> {
        let metadata = &config.metadata;
        metadata.validate()?;
        let pod = metadata.to_string();

        let image = self.options.sandbox_image();
        info!(pod = %pod, image, "running pod sandbox");
        self.backend
            .pull_image(image, self.options.registry_auth.as_ref())
            .map_err(|source| Error::ImagePull {
                image: image.to_string(),
                source,
            })?;

        // A failed version query falls back to '='; only engines older than
        // 1.23 need ':'.
        let separator = match self.backend.api_version() {
            Ok(version) => security_opt_separator(&version),
            Err(e) => {
                warn!(error = %e, "cannot query backend api version, assuming a current engine");
                '='
            },
        };
        let create = make_sandbox_create_config(config, CreateParams {
            image,
            network_plugin: self.network.name(),
            security_opt_separator: separator,
            seccomp_profile_root: &self.options.seccomp_profile_root,
        })?;

        let id = self.create_container(&create, &pod)?;
        debug!(sandbox_id = %id, pod = %pod, "sandbox container created");

        // Written before start so a crash in between still leaves enough to
        // tear the sandbox down later.
        self.checkpoints
            .write(&id, &Checkpoint::from_config(config))
            .map_err(|e| RunSandboxError::with_id(&id, e))?;

        self.backend.start_container(&id).map_err(|source| {
            RunSandboxError::with_id(&id, Error::SandboxStart {
                id: id.clone(),
                pod: pod.clone(),
                source,
            })
        })?;

        if config.host_network() {
            info!(sandbox_id = %id, pod = %pod, "sandbox started on host network");
            return Ok(id);
        }

        let container_id = ContainerId::docker(&id);
        if let Err(e) = self
            .network
            .set_up_pod(&metadata.namespace, &metadata.name, &container_id)
        {
            // Stopped rather than left running so the sandbox never reports
            // Ready without a network. The checkpoint stays, so a later stop
            // still retries the plugin teardown on its own.
            warn!(sandbox_id = %id, pod = %pod, error = %e, "network set up failed, stopping sandbox");
            if let Err(stop_err) = self
                .backend
                .stop_container(&id, self.options.stop_grace_period)
            {
                warn!(sandbox_id = %id, error = %stop_err, "failed to stop sandbox after network failure");
            }
            return Err(RunSandboxError::with_id(&id, Error::NetworkPlugin {
                id: id.clone(),
                op: "set up",
                namespace: metadata.namespace.clone(),
                name: metadata.name.clone(),
                source: e.into(),
            }));
        }

        info!(sandbox_id = %id, pod = %pod, "sandbox running");
        Ok(id)
    }

    /// Create the backend record, reclaiming the name once if a stale
    /// container holds it.
    fn create_container(&self, create: &ContainerCreateConfig, pod: &str) -> Result<String> {
        let existing_id = match self.backend.create_container(create) {
            Ok(id) => return Ok(id),
            Err(BackendError::Conflict { existing_id, .. }) => existing_id,
            Err(source) => {
                return Err(Error::SandboxCreate {
                    pod: pod.to_string(),
                    source,
                });
            },
        };

        let retry = self.reclaim_name(create, &existing_id)?;
        #[cfg(feature = "metrics")]
        counter!(sandbox_metrics::CONFLICT_RECOVERIES_TOTAL).increment(1);
        match self.backend.create_container(&retry) {
            Ok(id) => Ok(id),
            Err(BackendError::Conflict { existing_id, .. }) => Err(Error::CreateConflict {
                name: retry.name,
                existing_id,
            }),
            Err(source) => Err(Error::SandboxCreate {
                pod: pod.to_string(),
                source,
            }),
        }
    }

    /// Remove the container squatting on `create.name` and return the config
    /// to retry with. If it is already gone the name is randomized instead,
    /// since the engine may still be holding the name.
    fn reclaim_name(
        &self,
        create: &ContainerCreateConfig,
        existing_id: &str,
    ) -> Result<ContainerCreateConfig> {
        warn!(
            name = %create.name,
            existing_id,
            "sandbox name conflict, removing stale container"
        );
        let options = RemoveOptions {
            remove_volumes: true,
            force: false,
        };
        match self.backend.remove_container(existing_id, options) {
            Ok(()) => Ok(create.clone()),
            Err(e) if e.is_not_found() => {
                let mut retry = create.clone();
                retry.name = randomize_name(&create.name);
                debug!(name = %retry.name, "stale container already gone, retrying with random suffix");
                Ok(retry)
            },
            Err(e) => {
                warn!(existing_id, error = %e, "failed to remove stale container");
                Err(Error::CreateConflict {
                    name: create.name.clone(),
                    existing_id: existing_id.to_string(),
                })
            },
        }
    }

    /// Tear down networking and stop the sandbox.
    ///
    /// Safe to call repeatedly: a sandbox unknown to both the backend and
    /// the checkpoint store still gets an anonymous network teardown, and a
    /// backend that no longer knows the id counts as stopped.
    pub fn stop_sandbox(&self, id: &str) -> Result<()> {
        #[cfg(feature = "metrics")]
        counter!(sandbox_metrics::STOP_TOTAL).increment(1);

        let (namespace, name, tear_down_network) = match self.sandbox_status(id) {
            Ok(status) => (
                status.metadata.namespace,
                status.metadata.name,
                !status.host_network,
            ),
            Err(status_err) => match self.checkpoints.read(id) {
                Ok(checkpoint) => (checkpoint.namespace, checkpoint.name, true),
                Err(cp_err) if cp_err.is_not_found() && status_err.is_not_found() => {
                    warn!(
                        sandbox_id = id,
                        "sandbox and checkpoint both missing, tearing down without pod identity"
                    );
                    (String::new(), String::new(), true)
                },
                Err(cp_err) => {
                    if matches!(cp_err, Error::CorruptedCheckpoint { .. }) {
                        warn!(sandbox_id = id, error = %cp_err, "removing corrupted checkpoint");
                        if let Err(e) = self.checkpoints.remove(id) {
                            warn!(sandbox_id = id, error = %e, "failed to remove corrupted checkpoint");
                        }
                    }
                    return Error::aggregate(vec![status_err, cp_err]);
                },
            },
        };

        let mut errors = Vec::new();
        if tear_down_network {
            let container_id = ContainerId::docker(id);
            if let Err(e) = self.network.tear_down_pod(&namespace, &name, &container_id) {
                errors.push(Error::NetworkPlugin {
                    id: id.to_string(),
                    op: "tear down",
                    namespace: namespace.clone(),
                    name: name.clone(),
                    source: e.into(),
                });
            }
        }
        match self
            .backend
            .stop_container(id, self.options.stop_grace_period)
        {
            Ok(()) => {},
            Err(e) if e.is_not_found() => {
                debug!(sandbox_id = id, "sandbox container already gone");
            },
            Err(e) => errors.push(Error::backend(id, "stop", e)),
        }

        if errors.is_empty() {
            info!(sandbox_id = id, namespace = %namespace, name = %name, "sandbox stopped");
        }
        Error::aggregate(errors)
    }

    /// Remove the backend record and the checkpoint. Both are attempted and
    /// missing entries are not errors.
    pub fn remove_sandbox(&self, id: &str) -> Result<()> {
        #[cfg(feature = "metrics")]
        counter!(sandbox_metrics::REMOVE_TOTAL).increment(1);

        let mut errors = Vec::new();
        let options = RemoveOptions {
            remove_volumes: true,
            force: false,
        };
        match self.backend.remove_container(id, options) {
            Ok(()) => {},
            Err(e) if e.is_not_found() => {
                debug!(sandbox_id = id, "sandbox container already removed");
            },
            Err(e) => errors.push(Error::backend(id, "remove", e)),
        }
        if let Err(e) = self.checkpoints.remove(id) {
            errors.push(e);
        }
        if errors.is_empty() {
            info!(sandbox_id = id, "sandbox removed");
        }
        Error::aggregate(errors)
    }

    /// Inspect one sandbox.
    ///
    /// Records from the previous shim generation are rewritten to the
    /// current name and label form and their host-network flag is inverted.
    pub fn sandbox_status(&self, id: &str) -> Result<SandboxStatus> {
        let inspect = self.backend.inspect_container(id).map_err(|e| {
            if e.is_not_found() {
                Error::not_found("sandbox", id)
            } else {
                Error::backend(id, "inspect", e)
            }
        })?;

        let created_at = DateTime::parse_from_rfc3339(&inspect.created)
            .with_context(|| format!("sandbox {id} has invalid creation time {:?}", inspect.created))?
            .timestamp_nanos_opt()
            .unwrap_or_default();
        let state = if inspect.running {
            SandboxState::Ready
        } else {
            SandboxState::NotReady
        };

        let shares_host_network = inspect.shares_host_network();
        let legacy = is_legacy(&inspect.labels);
        let (name, all_labels) = if legacy {
            let (names, labels) =
                convert_legacy_name_and_labels(std::slice::from_ref(&inspect.name), &inspect.labels)?;
            let name = names.into_iter().next().unwrap_or_default();
            (name, labels)
        } else {
            (inspect.name.clone(), inspect.labels.clone())
        };
        let metadata = parse_sandbox_name(&name)?;
        let (labels, annotations) = extract_sandbox_labels(&all_labels);

        let ip = if shares_host_network {
            String::new()
        } else {
            self.resolve_ip(id, &metadata, &inspect.ip_address, &inspect.global_ipv6_address)
        };
        let network_namespace = if inspect.pid == 0 {
            String::new()
        } else {
            format!("/proc/{}/ns/net", inspect.pid)
        };

        // Previous-generation sandboxes recorded the opposite polarity; the
        // inversion makes callers restart them on the current scheme.
        let host_network = if legacy {
            !shares_host_network
        } else {
            shares_host_network
        };

        Ok(SandboxStatus {
            id: inspect.id,
            metadata,
            state,
            created_at,
            network: SandboxNetworkStatus { ip },
            labels,
            annotations,
            network_namespace,
            host_network,
        })
    }

    /// Plugin first, then the backend's IPv4 and IPv6 addresses.
    fn resolve_ip(
        &self,
        id: &str,
        metadata: &SandboxMetadata,
        backend_ipv4: &str,
        backend_ipv6: &str,
    ) -> String {
        let container_id = ContainerId::docker(id);
        let plugin_err = match self.network.pod_network_status(
            &metadata.namespace,
            &metadata.name,
            &container_id,
        ) {
            Ok(Some(ip)) if !ip.is_empty() => return ip,
            Ok(_) => "plugin reported no address".to_string(),
            Err(e) => e.to_string(),
        };
        if !backend_ipv4.is_empty() {
            return backend_ipv4.to_string();
        }
        if !backend_ipv6.is_empty() {
            return backend_ipv6.to_string();
        }
        warn!(sandbox_id = id, error = %plugin_err, "no pod ip from network plugin or backend");
        String::new()
    }
}
