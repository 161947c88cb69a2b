//! ResourceStore trait definition.
//!
//! The store stands in for the orchestration runtime's declarative-resource API:
//! owners apply specs and request deletion, reconcilers write status and
//! finalizers with optimistic concurrency.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::model::{Identity, Kind, Resource, ResourceStatus};

use super::error::Result;
use super::event::Event;

#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get(&self, kind: Kind, id: &Identity) -> Result<Option<Resource>>;

    /// Lists resources of `kind`, optionally restricted to one namespace.
    async fn list(&self, kind: Kind, namespace: Option<&str>) -> Result<Vec<Resource>>;

    /// Creates the record or replaces its spec.
    ///
    /// Fails with `Conflict` while the record is pending deletion.
    async fn apply(&self, kind: Kind, id: &Identity, spec: Value) -> Result<Resource>;

    /// Requests deletion. Records without finalizers are removed immediately,
    /// others get a deletion timestamp and stay until their finalizers are gone.
    async fn delete(&self, kind: Kind, id: &Identity) -> Result<()>;

    /// Replaces the status if the record is still at `expected_version`.
    async fn update_status(
        &self,
        kind: Kind,
        id: &Identity,
        expected_version: u64,
        status: ResourceStatus,
    ) -> Result<Resource>;

    /// Replaces the finalizer list if the record is still at `expected_version`.
    ///
    /// Returns `None` when the write released a record pending deletion.
    async fn update_finalizers(
        &self,
        kind: Kind,
        id: &Identity,
        expected_version: u64,
        finalizers: Vec<String>,
    ) -> Result<Option<Resource>>;

    /// Subscribe to store events.
    fn subscribe(&self) -> broadcast::Receiver<Event>;
}
