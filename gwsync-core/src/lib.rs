//! Reconciliation core of the gwsync operator.
//!
//! Desired state lives in a [`store::ResourceStore`]; [`reconciler::Reconciler`]
//! pushes it to an API-gateway control plane through the [`backend::Backend`]
//! capability interface, detecting drift with content hashes and guarding
//! deletions of resources that others still reference.

pub mod backend;
pub mod finalizer;
pub mod hash;
pub mod kinds;
pub mod links;
pub mod model;
pub mod reconciler;
pub mod store;

pub use backend::{Backend, BackendError, BackendProvider, RemoteKind, RemoteObject};
pub use finalizer::{DeletionSafety, Phase, deletion_safety};
pub use model::{Environment, GatewayMode, Identity, Kind, Resource, ResourceRef, ResourceStatus};
pub use reconciler::{Action, Reconcile, ReconcileError, ReconcileFailure, Reconciler, RetryPolicy, reconcilers};
pub use store::{Event, MemoryStore, ResourceStore, StoreError};
