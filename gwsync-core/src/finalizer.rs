//! Deletion guards and reverse-link bookkeeping.
//!
//! Every decision here is derived from the persisted resource (finalizers,
//! deletion timestamp, reverse links, remote id), so a pass interrupted at any
//! point is completed by the next one.

use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::kinds::references_of;
use crate::model::{Identity, Kind, Resource, ResourceRef};
use crate::store::{self, ResourceStore, Result, StoreError};

/// Lifecycle phase of a resource, as far as deletion is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Stored but not reconciled yet.
    New,
    /// Carries its deletion guard.
    Guarded,
    /// Deletion requested, nothing in the way.
    PendingDeletion,
    /// Deletion requested but other resources still reference it.
    Blocked,
    /// Guard released, waiting for foreign finalizers.
    TornDown,
    /// Gone from the store.
    Removed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::New => "new",
            Phase::Guarded => "guarded",
            Phase::PendingDeletion => "pending_deletion",
            Phase::Blocked => "blocked",
            Phase::TornDown => "torn_down",
            Phase::Removed => "removed",
        }
    }
}

/// Answer of the deletion-safety query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionSafety {
    pub phase: Phase,
    pub blocked: bool,
    pub blockers: Vec<ResourceRef>,
    /// The remote counterpart may still exist.
    pub remote_present: bool,
}

pub fn phase(resource: Option<&Resource>, blockers: &[ResourceRef]) -> Phase {
    let Some(resource) = resource else {
        return Phase::Removed;
    };
    let guarded = resource.meta.has_finalizer(resource.kind.finalizer());
    match (resource.meta.deletion_requested(), guarded) {
        (false, false) => Phase::New,
        (false, true) => Phase::Guarded,
        (true, false) => Phase::TornDown,
        (true, true) if blockers.is_empty() => Phase::PendingDeletion,
        (true, true) => Phase::Blocked,
    }
}

/// Whether `kind` resources can be deleted right now, and what stands in the way.
pub async fn deletion_safety(
    store: &dyn ResourceStore,
    kind: Kind,
    id: &Identity,
) -> Result<DeletionSafety> {
    let resource = store.get(kind, id).await?;
    let blockers = match &resource {
        Some(r) => blockers(store, r).await?,
        None => Vec::new(),
    };

    Ok(DeletionSafety {
        phase: phase(resource.as_ref(), &blockers),
        blocked: !blockers.is_empty(),
        remote_present: resource
            .as_ref()
            .is_some_and(|r| !r.status.remote_id.is_empty()),
        blockers,
    })
}

/// Resources that must go before `resource` can be deleted.
///
/// Union of the recorded reverse links and a live scan of every stored spec
/// that currently references the resource. The scan catches referrers that
/// have not been reconciled yet; the reverse links catch referrers whose spec
/// no longer decodes.
pub async fn blockers(store: &dyn ResourceStore, resource: &Resource) -> Result<Vec<ResourceRef>> {
    let me = resource.reference();
    let mut out: BTreeSet<ResourceRef> = resource.status.reverse_links.clone();

    for kind in Kind::ALL {
        for other in store.list(kind, None).await? {
            let other_ref = other.reference();
            if other_ref == me || out.contains(&other_ref) {
                continue;
            }
            if references_of(&other).iter().any(|r| r.to == me) {
                out.insert(other_ref);
            }
        }
    }

    out.remove(&me);
    Ok(out.into_iter().collect())
}

/// Adds the kind's guard if missing. Returns the up-to-date resource.
pub async fn ensure_guard(store: &dyn ResourceStore, resource: Resource) -> Result<Resource> {
    let guard = resource.kind.finalizer();
    let mut current = resource;

    for _ in 0..store::MAX_CONFLICT_RETRIES {
        if current.meta.has_finalizer(guard) {
            return Ok(current);
        }

        let mut finalizers = current.meta.finalizers.clone();
        finalizers.push(guard.to_string());
        let id = current.identity();

        match store
            .update_finalizers(current.kind, &id, current.meta.resource_version, finalizers)
            .await
        {
            Ok(Some(updated)) => {
                debug!("Guarded {}", updated.reference());
                return Ok(updated);
            }
            Ok(None) => {
                return Err(StoreError::NotFound(current.reference().to_string()));
            }
            Err(StoreError::VersionMismatch { .. }) => {
                current = store
                    .get(current.kind, &id)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(current.reference().to_string()))?;
            }
            Err(e) => return Err(e),
        }
    }

    Err(StoreError::Conflict(format!(
        "could not guard {}",
        current.reference()
    )))
}

/// Removes the kind's guard. The store drops the record once no finalizers remain.
pub async fn release_guard(store: &dyn ResourceStore, kind: Kind, id: &Identity) -> Result<()> {
    let guard = kind.finalizer();

    for _ in 0..store::MAX_CONFLICT_RETRIES {
        let Some(current) = store.get(kind, id).await? else {
            return Ok(());
        };
        if !current.meta.has_finalizer(guard) {
            return Ok(());
        }

        let finalizers: Vec<String> = current
            .meta
            .finalizers
            .iter()
            .filter(|f| f.as_str() != guard)
            .cloned()
            .collect();

        match store
            .update_finalizers(kind, id, current.meta.resource_version, finalizers)
            .await
        {
            Ok(_) => {
                info!("Released deletion guard of {} {}", kind, id);
                return Ok(());
            }
            Err(StoreError::VersionMismatch { .. }) => continue,
            Err(StoreError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        }
    }

    Err(StoreError::Conflict(format!(
        "could not release guard of {} {}",
        kind, id
    )))
}

/// Records `owner` in the reverse links of `after` and drops it from targets
/// only present in `before`.
///
/// Returns the targets `owner` stopped referencing; they may be waiting to be deleted.
pub async fn sync_links(
    store: &dyn ResourceStore,
    owner: &ResourceRef,
    before: &BTreeSet<ResourceRef>,
    after: &BTreeSet<ResourceRef>,
) -> Result<Vec<ResourceRef>> {
    for target in after.iter().filter(|t| *t != owner) {
        let updated = store::modify_status(store, target.kind, &target.identity(), |status| {
            status.reverse_links.insert(owner.clone())
        })
        .await?;
        if updated.is_none() {
            debug!("{} vanished before {} could link to it", target, owner);
        }
    }

    let dropped: Vec<ResourceRef> = before.difference(after).cloned().collect();
    unlink(store, owner, dropped.iter()).await?;
    Ok(dropped)
}

/// Drops `owner` from the reverse links of every target.
pub async fn unlink<'a>(
    store: &dyn ResourceStore,
    owner: &ResourceRef,
    targets: impl Iterator<Item = &'a ResourceRef> + Send,
) -> Result<()> {
    for target in targets {
        store::modify_status(store, target.kind, &target.identity(), |status| {
            status.reverse_links.remove(owner)
        })
        .await?;
    }
    Ok(())
}
