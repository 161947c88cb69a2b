//! Reconciler error types.

use std::time::Duration;
use thiserror::Error;

use crate::backend::BackendError;
use crate::links::LinkError;
use crate::model::ResourceRef;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A control-plane call failed.
    #[error("{op} of {target} failed: {source}")]
    Remote {
        op: &'static str,
        target: ResourceRef,
        #[source]
        source: BackendError,
    },

    /// Deletion waits for the listed resources to go first.
    #[error("{target} is still referenced by {}", join(.blockers))]
    StillReferenced {
        target: ResourceRef,
        blockers: Vec<ResourceRef>,
    },

    #[error("cannot resolve references of {target}: {source}")]
    Link {
        target: ResourceRef,
        #[source]
        source: LinkError,
    },

    /// The spec can never be pushed as it is.
    #[error("{target} is invalid: {reason}")]
    Invalid { target: ResourceRef, reason: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl ReconcileError {
    /// Terminal errors only go away when the spec changes.
    pub fn is_terminal(&self) -> bool {
        match self {
            ReconcileError::Invalid { .. } => true,
            ReconcileError::Link { source, .. } => source.is_terminal(),
            _ => false,
        }
    }
}

fn join(refs: &[ResourceRef]) -> String {
    refs.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// A failed pass and when to try again. `None` waits for the next change.
#[derive(Debug)]
pub struct ReconcileFailure {
    pub error: ReconcileError,
    pub requeue_after: Option<Duration>,
}
