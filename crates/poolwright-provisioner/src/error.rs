use std::time::Duration;

use thiserror::Error;

use poolwright_api::ApiError;
use poolwright_core::{CoreError, Phase, PoolState};

#[derive(Debug, Error)]
pub enum ProvisionerError {
    #[error("invalid pool declaration: {0}")]
    InvalidSpec(String),

    #[error("{kind} reference {name:?} is ambiguous: {} matches ({})", .candidates.len(), .candidates.join(", "))]
    AmbiguousReference {
        kind: &'static str,
        name: String,
        candidates: Vec<String>,
    },

    #[error("{kind} reference {name:?} matches nothing")]
    ReferenceNotFound { kind: &'static str, name: String },

    #[error("{addr}: pool {id} no longer exists")]
    PoolNotFound { addr: String, id: String },

    #[error("{addr}: change rejected by the API: {message}")]
    Rejected {
        addr: String,
        message: String,
        /// Fresh snapshot taken after the rejection, if one could be read.
        observed: Option<Box<PoolState>>,
    },

    #[error("{addr}: pool entered phase {phase}")]
    ResourceFailed { addr: String, phase: Phase },

    #[error("{addr}: replacement required ({}), re-run with replacement allowed", .fields.join(", "))]
    ReplacementRequired { addr: String, fields: Vec<String> },

    #[error("{addr}: creation did not converge within {elapsed:?}: {last}")]
    CreationTimeout {
        addr: String,
        elapsed: Duration,
        last: String,
    },

    #[error("{addr}: scale to {size} did not converge within {elapsed:?}: {last}")]
    ScaleTimeout {
        addr: String,
        size: u64,
        elapsed: Duration,
        last: String,
    },

    #[error("{addr}: update did not converge within {elapsed:?}: {last}")]
    UpdateTimeout {
        addr: String,
        elapsed: Duration,
        last: String,
    },

    #[error("{addr}: delete accepted but not observed after {attempts} checks")]
    DestroyVerificationTimeout { addr: String, attempts: u32 },

    #[error("{addr}: fields still differ after apply: {}", .fields.join(", "))]
    NotConverged { addr: String, fields: Vec<String> },

    #[error("{addr}: cancelled")]
    Cancelled { addr: String },

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("state error: {0}")]
    State(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification callers can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Retrying later may succeed.
    Transient,
    NotFound,
    /// The API refused the request; the declaration has to change.
    Rejected,
    /// Convergence was not observed in time. The operation may still be
    /// in progress on the remote side.
    Timeout,
    /// A symbolic reference could not be resolved to exactly one ID.
    Reference,
    Invalid,
    Cancelled,
    Internal,
}

impl ProvisionerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidSpec(_) | Self::ReplacementRequired { .. } | Self::Core(_) => {
                ErrorKind::Invalid
            }
            Self::AmbiguousReference { .. } | Self::ReferenceNotFound { .. } => {
                ErrorKind::Reference
            }
            Self::PoolNotFound { .. } => ErrorKind::NotFound,
            Self::Rejected { .. } | Self::ResourceFailed { .. } => ErrorKind::Rejected,
            Self::CreationTimeout { .. }
            | Self::ScaleTimeout { .. }
            | Self::UpdateTimeout { .. }
            | Self::DestroyVerificationTimeout { .. }
            | Self::NotConverged { .. } => ErrorKind::Timeout,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Api(err) => match err {
                ApiError::Transient(_) => ErrorKind::Transient,
                ApiError::NotFound(_) => ErrorKind::NotFound,
                ApiError::Rejected { .. } | ApiError::OperationFailed { .. } => {
                    ErrorKind::Rejected
                }
                ApiError::OperationTimeout { .. } => ErrorKind::Timeout,
                ApiError::Decode(_) | ApiError::Config(_) => ErrorKind::Internal,
            },
            Self::State(_)
            | Self::Internal(_)
            | Self::Serialization(_)
            | Self::Io(_) => ErrorKind::Internal,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }
}
