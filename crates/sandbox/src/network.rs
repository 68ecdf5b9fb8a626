//! Network plugin abstraction.

use std::fmt;

use tracing::debug;

/// Backend-qualified container id handed to network plugins.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerId {
    pub kind: &'static str,
    pub id: String,
}

impl ContainerId {
    pub const DOCKER: &'static str = "docker";

    #[must_use]
    pub fn docker(id: impl Into<String>) -> Self {
        Self {
            kind: Self::DOCKER,
            id: id.into(),
        }
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.kind, self.id)
    }
}

/// Attaches and detaches pod network namespaces.
///
/// Teardown is called with empty `namespace`/`name` when the identity of the
/// sandbox is lost; implementations should still clean up what they can.
pub trait NetworkPlugin: Send + Sync {
    fn name(&self) -> &str;
    fn set_up_pod(&self, namespace: &str, name: &str, id: &ContainerId) -> anyhow::Result<()>;
    fn tear_down_pod(&self, namespace: &str, name: &str, id: &ContainerId) -> anyhow::Result<()>;
    /// The pod IP, or `None` if the plugin does not track it.
    fn pod_network_status(
        &self,
        namespace: &str,
        name: &str,
        id: &ContainerId,
    ) -> anyhow::Result<Option<String>>;
}

/// Plugin that leaves networking to the container engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNetworkPlugin;

impl NoopNetworkPlugin {
    pub const NAME: &'static str = "kubernetes.io/no-op";
}

impl NetworkPlugin for NoopNetworkPlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn set_up_pod(&self, namespace: &str, name: &str, id: &ContainerId) -> anyhow::Result<()> {
        debug!(namespace, name, container = %id, "no-op network set up");
        Ok(())
    }

    fn tear_down_pod(&self, namespace: &str, name: &str, id: &ContainerId) -> anyhow::Result<()> {
        debug!(namespace, name, container = %id, "no-op network tear down");
        Ok(())
    }

    fn pod_network_status(
        &self,
        _namespace: &str,
        _name: &str,
        _id: &ContainerId,
    ) -> anyhow::Result<Option<String>> {
        Ok(None)
    }
}
