//! Events emitted by store changes.

use crate::model::{Kind, Resource, ResourceRef};

/// Events emitted when a stored resource changes.
///
/// These events are dispatched via a broadcast channel to the controller,
/// which turns them into reconcile requests.
#[derive(Debug, Clone)]
pub enum Event {
    /// The owner created or changed the desired spec.
    Applied(Resource),
    /// The owner asked for deletion; the resource is still guarded.
    DeletionRequested(Resource),
    /// Status or finalizers were written by a reconciler.
    StatusUpdated(Resource),
    /// The record is gone from the store.
    Removed(ResourceRef),
}

impl Event {
    /// Get the resource kind for this event.
    pub fn kind(&self) -> Kind {
        match self {
            Event::Applied(r) | Event::DeletionRequested(r) | Event::StatusUpdated(r) => r.kind,
            Event::Removed(r) => r.kind,
        }
    }

    /// Get the typed identity for this event.
    pub fn reference(&self) -> ResourceRef {
        match self {
            Event::Applied(r) | Event::DeletionRequested(r) | Event::StatusUpdated(r) => {
                r.reference()
            }
            Event::Removed(r) => r.clone(),
        }
    }

    /// Current resource carried by the event, if it still exists.
    pub fn resource(&self) -> Option<&Resource> {
        match self {
            Event::Applied(r) | Event::DeletionRequested(r) | Event::StatusUpdated(r) => Some(r),
            Event::Removed(_) => None,
        }
    }
}
