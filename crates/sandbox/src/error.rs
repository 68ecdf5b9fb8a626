use {podshim_common::Aggregate, thiserror::Error};

use crate::{backend::BackendError, checkpoint::StoreError};

#[derive(Debug, Error)]
pub enum Error {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("checkpoint for sandbox {id} is corrupted: {reason}")]
    CorruptedCheckpoint { id: String, reason: String },

    #[error("container name {name:?} is in use by {existing_id} and could not be reclaimed")]
    CreateConflict { name: String, existing_id: String },

    #[error("failed to pull sandbox image {image}: {source}")]
    ImagePull {
        image: String,
        #[source]
        source: BackendError,
    },

    #[error("failed to create sandbox for pod {pod}: {source}")]
    SandboxCreate {
        pod: String,
        #[source]
        source: BackendError,
    },

    #[error("failed to start sandbox {id} for pod {pod}: {source}")]
    SandboxStart {
        id: String,
        pod: String,
        #[source]
        source: BackendError,
    },

    #[error("{op} sandbox {id}: {source}")]
    Backend {
        id: String,
        op: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("failed to list containers: {source}")]
    ListContainers {
        #[source]
        source: BackendError,
    },

    #[error("network plugin {op} for pod {namespace}/{name} (sandbox {id}): {source}")]
    NetworkPlugin {
        id: String,
        op: &'static str,
        namespace: String,
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("checkpoint {op} for sandbox {id}: {source}")]
    Store {
        id: String,
        op: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("invalid sandbox name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("invalid sandbox config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Aggregate(#[from] Aggregate<Error>),

    #[error("{0}")]
    Message(String),
}

impl Error {
    #[must_use]
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    #[must_use]
    pub fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn backend(id: impl Into<String>, op: &'static str, source: BackendError) -> Self {
        Self::Backend {
            id: id.into(),
            op,
            source,
        }
    }

    #[must_use]
    pub fn store(id: impl Into<String>, op: &'static str, source: StoreError) -> Self {
        Self::Store {
            id: id.into(),
            op,
            source,
        }
    }

    /// True for the "no such sandbox" class, whether it came from the
    /// backend, the checkpoint store or this crate.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Backend { source, .. } => source.is_not_found(),
            Self::Store { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Fold independent failures into one result: `Ok` when there are none,
    /// the bare error when there is one, an [`Aggregate`] otherwise.
    pub fn aggregate(mut errors: Vec<Error>) -> Result<()> {
        if errors.len() == 1 {
            return Err(errors.remove(0));
        }
        match Aggregate::from_errors(errors) {
            Some(agg) => Err(Self::Aggregate(agg)),
            None => Ok(()),
        }
    }
}

impl podshim_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

podshim_common::impl_context!();

pub type Result<T> = std::result::Result<T, Error>;

/// Failure of [`SandboxService::run_sandbox`](crate::SandboxService::run_sandbox).
///
/// Once the backend record exists the id is carried along, so the caller can
/// stop and remove the half-built sandbox.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct RunSandboxError {
    pub sandbox_id: Option<String>,
    #[source]
    pub source: Error,
}

impl RunSandboxError {
    #[must_use]
    pub fn with_id(sandbox_id: impl Into<String>, source: Error) -> Self {
        Self {
            sandbox_id: Some(sandbox_id.into()),
            source,
        }
    }

    /// The step of the run sequence that failed.
    #[must_use]
    pub fn stage(&self) -> &'static str {
        match &self.source {
            Error::InvalidConfig(_) | Error::InvalidName { .. } => "validate",
            Error::ImagePull { .. } => "pull",
            Error::SandboxCreate { .. } | Error::CreateConflict { .. } => "create",
            Error::Store { .. } => "checkpoint",
            Error::SandboxStart { .. } => "start",
            Error::NetworkPlugin { .. } => "network",
            _ => "other",
        }
    }
}

impl From<Error> for RunSandboxError {
    fn from(source: Error) -> Self {
        Self {
            sandbox_id: None,
            source,
        }
    }
}
