//! Desired-state storage.

mod error;
mod event;
mod memory;
mod traits;

pub use error::{Result, StoreError};
pub use event::Event;
pub use memory::MemoryStore;
pub use traits::ResourceStore;

use tracing::debug;

use crate::model::{Identity, Kind, Resource, ResourceStatus};

/// Attempts made by [`modify_status`] before giving up on a contended record.
pub const MAX_CONFLICT_RETRIES: usize = 16;

/// Read-modify-write of a status with optimistic retry.
///
/// `mutate` is re-applied to a fresh copy after every version conflict and
/// returns whether it changed anything. Returns `None` if the record is gone.
pub async fn modify_status<F>(
    store: &dyn ResourceStore,
    kind: Kind,
    id: &Identity,
    mut mutate: F,
) -> Result<Option<Resource>>
where
    F: FnMut(&mut ResourceStatus) -> bool + Send,
{
    for attempt in 1..=MAX_CONFLICT_RETRIES {
        let Some(current) = store.get(kind, id).await? else {
            return Ok(None);
        };

        let mut status = current.status.clone();
        if !mutate(&mut status) {
            return Ok(Some(current));
        }

        match store
            .update_status(kind, id, current.meta.resource_version, status)
            .await
        {
            Ok(updated) => return Ok(Some(updated)),
            Err(StoreError::VersionMismatch { expected, actual }) => {
                debug!(
                    "Status of {} {} changed underneath (expected {}, got {}), attempt {}",
                    kind, id, expected, actual, attempt
                );
            }
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        }
    }

    Err(StoreError::Conflict(format!(
        "status of {} {} still contended after {} attempts",
        kind, id, MAX_CONFLICT_RETRIES
    )))
}
