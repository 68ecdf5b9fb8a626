//! Sandbox listing.
//!
//! Three sources are merged by id with precedence backend > checkpoint >
//! legacy. Checkpoints are only consulted for an unfiltered listing, and
//! legacy sandboxes only until the legacy cleanup reports done.

use std::collections::HashSet;

use tracing::{debug, warn};

#[cfg(feature = "metrics")]
use crate::metrics::{checkpoint as checkpoint_metrics, counter};
use crate::{
    backend::{ContainerSummary, ListOptions},
    error::{Error, Result},
    labels::{
        CONTAINER_TYPE_LABEL_KEY, CONTAINER_TYPE_LABEL_SANDBOX, extract_sandbox_labels,
        is_sandbox,
    },
    naming::{convert_legacy_name_and_labels, parse_sandbox_name},
    service::SandboxService,
    types::{Sandbox, SandboxFilter, SandboxMetadata, SandboxState},
};

/// Backend query plus the client-side state filter it cannot express.
struct Query {
    options: ListOptions,
    drop_ready: bool,
}

impl Query {
    fn new(filter: Option<&SandboxFilter>) -> Self {
        let mut query = Self {
            options: ListOptions {
                all: true,
                ..ListOptions::default()
            },
            drop_ready: false,
        };
        if let Some(filter) = filter {
            query.options.id = filter.id.clone().filter(|id| !id.is_empty());
            match filter.state {
                Some(SandboxState::Ready) => query.options.all = false,
                Some(SandboxState::NotReady) => query.drop_ready = true,
                None => {},
            }
        }
        query
    }

    fn keep(&self, sandbox: &Sandbox) -> bool {
        !(self.drop_ready && sandbox.state == SandboxState::Ready)
            && self.options.id.as_ref().is_none_or(|id| &sandbox.id == id)
    }
}

impl SandboxService {
    /// List sandboxes matching `filter`.
    ///
    /// With `None`, sandboxes known only from a checkpoint are included as
    /// `NotReady` entries carrying just name and namespace. Corrupted
    /// checkpoints found on the way are removed.
    pub fn list_sandboxes(&self, filter: Option<&SandboxFilter>) -> Result<Vec<Sandbox>> {
        let query = Query::new(filter);
        let mut backend_query = query.options.clone();
        backend_query.labels.insert(
            CONTAINER_TYPE_LABEL_KEY.to_string(),
            CONTAINER_TYPE_LABEL_SANDBOX.to_string(),
        );
        if let Some(filter) = filter {
            backend_query
                .labels
                .extend(filter.label_selector.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        // Listed before the containers so a sandbox being created right now
        // does not show up as checkpoint-only.
        let checkpoint_ids = if filter.is_none() {
            self.checkpoints.list_ids().unwrap_or_else(|e| {
                warn!(error = %e, "failed to list checkpoints");
                Vec::new()
            })
        } else {
            Vec::new()
        };

        let containers = self
            .backend
            .list_containers(&backend_query)
            .map_err(|source| Error::ListContainers { source })?;

        let mut result = Vec::with_capacity(containers.len());
        let mut seen = HashSet::new();
        for container in &containers {
            let sandbox = match container_to_sandbox(container) {
                Ok(sandbox) => sandbox,
                Err(e) => {
                    debug!(container_id = %container.id, error = %e, "skipping unconvertible sandbox container");
                    continue;
                },
            };
            if !query.keep(&sandbox) || !seen.insert(sandbox.id.clone()) {
                continue;
            }
            result.push(sandbox);
        }

        for id in checkpoint_ids {
            if seen.contains(&id) {
                continue;
            }
            match self.checkpoints.read(&id) {
                Ok(checkpoint) => {
                    seen.insert(id.clone());
                    result.push(Sandbox {
                        id,
                        metadata: SandboxMetadata {
                            name: checkpoint.name,
                            namespace: checkpoint.namespace,
                            ..SandboxMetadata::default()
                        },
                        state: SandboxState::NotReady,
                        created_at: 0,
                        labels: Default::default(),
                        annotations: Default::default(),
                    });
                },
                Err(e @ Error::CorruptedCheckpoint { .. }) => {
                    warn!(sandbox_id = %id, error = %e, "removing corrupted checkpoint");
                    #[cfg(feature = "metrics")]
                    counter!(checkpoint_metrics::CORRUPTED_TOTAL).increment(1);
                    if let Err(e) = self.checkpoints.remove(&id) {
                        warn!(sandbox_id = %id, error = %e, "failed to remove corrupted checkpoint");
                    }
                },
                Err(e) => {
                    warn!(sandbox_id = %id, error = %e, "failed to read checkpoint");
                },
            }
        }

        if !self.legacy_cleanup.done() {
            for sandbox in self.list_legacy_sandboxes(filter)? {
                if seen.insert(sandbox.id.clone()) {
                    result.push(sandbox);
                }
            }
        }

        Ok(result)
    }

    /// Sandboxes created by the previous shim generation. Label selectors
    /// are not supported for them, so a selector yields nothing.
    pub fn list_legacy_sandboxes(&self, filter: Option<&SandboxFilter>) -> Result<Vec<Sandbox>> {
        if filter.is_some_and(|f| !f.label_selector.is_empty()) {
            return Ok(Vec::new());
        }
        let query = Query::new(filter);
        let containers = self
            .backend
            .list_containers(&query.options)
            .map_err(|source| Error::ListContainers { source })?;

        let mut result = Vec::new();
        for container in containers {
            if container.labels.contains_key(CONTAINER_TYPE_LABEL_KEY) {
                continue;
            }
            let converted = match convert_legacy_name_and_labels(&container.names, &container.labels) {
                Ok((names, labels)) => ContainerSummary {
                    names,
                    labels,
                    ..container
                },
                Err(e) => {
                    debug!(container_id = %container.id, error = %e, "not a legacy managed container");
                    continue;
                },
            };
            if !is_sandbox(&converted.labels) {
                continue;
            }
            match container_to_sandbox(&converted) {
                Ok(sandbox) if query.keep(&sandbox) => result.push(sandbox),
                Ok(_) => {},
                Err(e) => {
                    debug!(container_id = %converted.id, error = %e, "skipping unconvertible legacy sandbox");
                },
            }
        }
        Ok(result)
    }
}

fn container_to_sandbox(container: &ContainerSummary) -> Result<Sandbox> {
    let name = container
        .names
        .first()
        .ok_or_else(|| Error::invalid_name("", "sandbox container has no name"))?;
    let metadata = parse_sandbox_name(name)?;
    let (labels, annotations) = extract_sandbox_labels(&container.labels);
    let state = if container.running {
        SandboxState::Ready
    } else {
        SandboxState::NotReady
    };
    Ok(Sandbox {
        id: container.id.clone(),
        metadata,
        state,
        created_at: container.created.saturating_mul(1_000_000_000),
        labels,
        annotations,
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::types::Labels};

    fn summary(id: &str, name: &str, running: bool) -> ContainerSummary {
        ContainerSummary {
            id: id.into(),
            names: vec![name.into()],
            labels: Labels::from([(
                CONTAINER_TYPE_LABEL_KEY.to_string(),
                CONTAINER_TYPE_LABEL_SANDBOX.to_string(),
            )]),
            running,
            created: 1_700_000_000,
        }
    }

    #[test]
    fn converts_summary() {
        let sandbox = container_to_sandbox(&summary("abc", "/k8s_POD_web_default_u1_2", true)).unwrap();
        assert_eq!(sandbox.metadata, SandboxMetadata::new("web", "default", "u1", 2));
        assert_eq!(sandbox.state, SandboxState::Ready);
        assert_eq!(sandbox.created_at, 1_700_000_000_000_000_000);
        assert!(sandbox.labels.is_empty());
    }

    #[test]
    fn conversion_needs_a_valid_name() {
        let mut container = summary("abc", "nginx", false);
        assert!(container_to_sandbox(&container).is_err());
        container.names.clear();
        assert!(container_to_sandbox(&container).is_err());
    }

    #[test]
    fn query_maps_state_filter() {
        let ready = Query::new(Some(&SandboxFilter {
            state: Some(SandboxState::Ready),
            ..Default::default()
        }));
        assert!(!ready.options.all);
        assert!(!ready.drop_ready);

        let not_ready = Query::new(Some(&SandboxFilter {
            state: Some(SandboxState::NotReady),
            ..Default::default()
        }));
        assert!(not_ready.options.all);
        assert!(not_ready.drop_ready);

        let sandbox = container_to_sandbox(&summary("abc", "k8s_POD_web_default_u1_0", true)).unwrap();
        assert!(!not_ready.keep(&sandbox));
        assert!(Query::new(None).keep(&sandbox));
    }
}
