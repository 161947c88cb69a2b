//! Generic create-or-update / delete state machine.
//!
//! One [`Reconciler`] per kind drives a stored resource towards its remote
//! counterpart. A pass reads everything it needs from the store, so passes can
//! be repeated or interrupted at any point and the next one picks up where the
//! last one stopped.

mod error;

pub use error::{ReconcileError, ReconcileFailure};

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::backend::{Backend, BackendError, BackendProvider, RemoteKind, RemoteObject};
use crate::finalizer;
use crate::hash;
use crate::kinds::{
    self, ApiDefinitions, Certificates, OperatorContexts, ResourceKind, SecurityPolicies,
    SubGraphs, SuperGraphs,
};
use crate::links::LinkResolver;
use crate::model::{
    Environment, Identity, Kind, NumberMode, OperatorContextSpec, Resource, ResourceRef,
    TransactionInfo, TransactionStatus,
};
use crate::store::{self, ResourceStore};

/// Exponential backoff for failed passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(5),
            max: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `failures`-th consecutive failure: `base * 2^(failures - 1)`, capped at `max`.
    pub fn backoff(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exp)
            .map_or(self.max, |d| d.min(self.max))
    }
}

/// What the runtime should do after a successful pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Action {
    pub requeue_after: Option<Duration>,
    /// Resources to reconcile next: targets this pass stopped referencing, and
    /// referrers whenever the remote id or pushed content changed.
    pub wake: Vec<ResourceRef>,
}

impl Action {
    /// Nothing to do until the resource changes.
    pub fn await_change() -> Self {
        Self::default()
    }

    pub fn requeue(after: Duration) -> Self {
        Self {
            requeue_after: Some(after),
            wake: Vec::new(),
        }
    }
}

/// Kind-erased reconciler, driven by the controller runtime.
#[async_trait]
pub trait Reconcile: Send + Sync {
    fn kind(&self) -> Kind;

    async fn reconcile(&self, id: &Identity) -> Result<Action, ReconcileFailure>;
}

/// Remote side of a pass.
struct Pushed {
    remote_id: String,
    observed_hash: String,
}

pub struct Reconciler<K> {
    store: Arc<dyn ResourceStore>,
    backends: Arc<dyn BackendProvider>,
    policy: RetryPolicy,
    _kind: PhantomData<fn() -> K>,
}

impl<K: ResourceKind> Reconciler<K> {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        backends: Arc<dyn BackendProvider>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            backends,
            policy,
            _kind: PhantomData,
        }
    }

    fn remote_err(op: &'static str, target: &ResourceRef) -> impl FnOnce(BackendError) -> ReconcileError {
        let target = target.clone();
        move |source| ReconcileError::Remote { op, target, source }
    }

    fn invalid(target: &ResourceRef, reason: impl ToString) -> ReconcileError {
        ReconcileError::Invalid {
            target: target.clone(),
            reason: reason.to_string(),
        }
    }

    /// Create-or-update pass for a live resource.
    async fn apply(&self, resource: Resource) -> Result<Action, ReconcileError> {
        let store = self.store.as_ref();
        let resource = finalizer::ensure_guard(store, resource).await?;
        let id = resource.identity();
        let me = resource.reference();

        let spec: K::Spec = resource
            .decode_spec()
            .map_err(|e| Self::invalid(&me, format!("spec does not decode: {}", e)))?;

        let resolution = LinkResolver::new(store)
            .resolve::<K>(&id, &spec)
            .await
            .map_err(|source| ReconcileError::Link {
                target: me.clone(),
                source,
            })?;

        let env = match &resolution.environment {
            Some(overrides) => self.backends.environment().merged_with(overrides),
            None => self.backends.environment().clone(),
        };

        let mut desired = resolution.spec;
        K::prepare(&mut desired, &id, &env);
        K::validate(&desired).map_err(|reason| Self::invalid(&me, reason))?;
        let desired_hash =
            hash::hash(&desired, &K::hash_rules()).map_err(|e| Self::invalid(&me, e))?;

        let pushed = match K::remote_kind() {
            Some(kind) => {
                self.sync_remote(kind, &resource, &desired, &desired_hash, &env)
                    .await?
            }
            None => Pushed {
                remote_id: String::new(),
                observed_hash: desired_hash.clone(),
            },
        };

        let links: BTreeSet<ResourceRef> =
            resolution.targets.into_iter().map(|t| t.target).collect();
        let mut wake =
            finalizer::sync_links(store, &me, &resource.status.linked_to, &links).await?;
        let moved = resource.status.remote_id != pushed.remote_id
            || resource.status.last_pushed_hash != desired_hash;

        let written = store::modify_status(store, K::KIND, &id, |status| {
            let settled = status.remote_id == pushed.remote_id
                && status.last_pushed_hash == desired_hash
                && status.last_observed_hash == pushed.observed_hash
                && status.linked_to == links
                && status.blocked_by.is_empty()
                && status.failure_count == 0
                && status
                    .last_transaction
                    .as_ref()
                    .is_some_and(|t| t.status == TransactionStatus::Successful);
            if settled {
                return false;
            }
            status.remote_id = pushed.remote_id.clone();
            status.last_pushed_hash = desired_hash.clone();
            status.last_observed_hash = pushed.observed_hash.clone();
            status.linked_to = links.clone();
            status.blocked_by.clear();
            status.failure_count = 0;
            status.last_transaction = Some(TransactionInfo::successful());
            true
        })
        .await?;
        match written {
            // Referrers embed our remote id or content in their own push
            Some(current) if moved => {
                for referrer in &current.status.reverse_links {
                    if !wake.contains(referrer) {
                        wake.push(referrer.clone());
                    }
                }
            }
            Some(_) => {}
            None => debug!("{} vanished during reconcile", me),
        }

        Ok(Action {
            requeue_after: None,
            wake,
        })
    }

    /// Brings the remote object in line with `desired`. Skips the push when
    /// neither side moved since the last successful pass.
    async fn sync_remote(
        &self,
        kind: RemoteKind,
        resource: &Resource,
        desired: &K::Spec,
        desired_hash: &str,
        env: &Environment,
    ) -> Result<Pushed, ReconcileError> {
        let me = resource.reference();
        let status = &resource.status;
        let rules = K::hash_rules();
        let backend = self
            .backends
            .backend(env)
            .map_err(Self::remote_err("connect", &me))?;
        let planned = K::planned_remote_id(desired, env);

        let current = if status.remote_id.is_empty() {
            None
        } else {
            match backend.get(kind, &status.remote_id).await {
                Ok(object) => Some(object),
                Err(e) if e.is_not_found() => {
                    warn!("{} {} of {} vanished remotely, recreating", kind, status.remote_id, me);
                    None
                }
                Err(e) => return Err(Self::remote_err("get", &me)(e)),
            }
        };

        if let Some(object) = &current {
            let remote_hash = hash::hash_value(&object.representation, &rules);
            let same_id = planned.as_ref().is_none_or(|p| *p == object.id);
            if same_id
                && desired_hash == status.last_pushed_hash
                && remote_hash == status.last_observed_hash
            {
                debug!("{} is in sync", me);
                return Ok(Pushed {
                    remote_id: object.id.clone(),
                    observed_hash: remote_hash,
                });
            }
        }

        let body = K::wire_body(desired, NumberMode::Number).map_err(|e| Self::invalid(&me, e))?;
        let object = match current {
            Some(old) if K::REPLACE_ON_CHANGE => {
                if planned.as_deref() == Some(old.id.as_str()) {
                    if self.remote_shared(&me, &old.id).await? {
                        debug!("{} {} of {} is shared, keeping it", kind, old.id, me);
                        old
                    } else {
                        self.delete_remote(backend.as_ref(), kind, &me, &old.id).await?;
                        backend
                            .create(kind, &body)
                            .await
                            .map_err(Self::remote_err("create", &me))?
                    }
                } else {
                    let new = self
                        .create_or_adopt(backend.as_ref(), kind, &me, &body, planned.as_deref())
                        .await?;
                    if new.id != old.id && !self.remote_shared(&me, &old.id).await? {
                        self.delete_remote(backend.as_ref(), kind, &me, &old.id).await?;
                    }
                    new
                }
            }
            Some(old) => backend
                .update(kind, &old.id, &body)
                .await
                .map_err(Self::remote_err("update", &me))?,
            None => {
                self.create_or_adopt(backend.as_ref(), kind, &me, &body, planned.as_deref())
                    .await?
            }
        };
        info!("Pushed {} as {} {}", me, kind, object.id);

        if let Err(e) = backend.activate_changes().await {
            warn!("Failed to activate changes after pushing {}: {}", me, e);
        }

        Ok(Pushed {
            observed_hash: hash::hash_value(&object.representation, &rules),
            remote_id: object.id,
        })
    }

    /// Creates the object, or takes over one already stored under `planned`.
    async fn create_or_adopt(
        &self,
        backend: &dyn Backend,
        kind: RemoteKind,
        me: &ResourceRef,
        body: &Value,
        planned: Option<&str>,
    ) -> Result<RemoteObject, ReconcileError> {
        if let Some(id) = planned {
            match backend.get(kind, id).await {
                Ok(existing) => {
                    info!("Adopting existing {} {} for {}", kind, id, me);
                    if K::REPLACE_ON_CHANGE {
                        return Ok(existing);
                    }
                    return backend
                        .update(kind, id, body)
                        .await
                        .map_err(Self::remote_err("update", me));
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(Self::remote_err("get", me)(e)),
            }
        }
        backend
            .create(kind, body)
            .await
            .map_err(Self::remote_err("create", me))
    }

    async fn delete_remote(
        &self,
        backend: &dyn Backend,
        kind: RemoteKind,
        me: &ResourceRef,
        id: &str,
    ) -> Result<(), ReconcileError> {
        match backend.delete(kind, id).await {
            Ok(()) => {
                info!("Deleted {} {} of {}", kind, id, me);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!("{} {} of {} already gone", kind, id, me);
                Ok(())
            }
            Err(e) => Err(Self::remote_err("delete", me)(e)),
        }
    }

    /// Whether another live resource of this kind holds `remote_id`.
    ///
    /// Content-addressed objects are shared by resources with equal content.
    async fn remote_shared(&self, me: &ResourceRef, remote_id: &str) -> Result<bool, ReconcileError> {
        if !K::REPLACE_ON_CHANGE {
            return Ok(false);
        }
        let others = self.store.list(K::KIND, None).await?;
        Ok(others.iter().any(|r| {
            r.reference() != *me
                && !r.meta.deletion_requested()
                && r.status.remote_id == remote_id
        }))
    }

    /// Environment a stored resource was pushed through.
    async fn environment_of(&self, resource: &Resource) -> Result<Environment, ReconcileError> {
        let base = self.backends.environment();
        let Some(context) = kinds::context_of::<K>(resource) else {
            return Ok(base.clone());
        };

        match self.store.get(Kind::OperatorContext, &context).await? {
            Some(ctx) => match ctx.decode_spec::<OperatorContextSpec>() {
                Ok(spec) => Ok(base.merged_with(&spec.env)),
                Err(e) => {
                    warn!("Operator context {} does not decode ({}), using defaults", context, e);
                    Ok(base.clone())
                }
            },
            None => {
                warn!("Operator context {} of {} is gone, using defaults", context, resource.reference());
                Ok(base.clone())
            }
        }
    }

    /// Deletion pass for a resource with a deletion request.
    async fn finalize(&self, resource: Resource) -> Result<Action, ReconcileError> {
        let store = self.store.as_ref();
        let me = resource.reference();
        let id = resource.identity();

        if !resource.meta.has_finalizer(K::KIND.finalizer()) {
            return Ok(Action::await_change());
        }

        let blockers = finalizer::blockers(store, &resource).await?;
        if !blockers.is_empty() {
            return Err(ReconcileError::StillReferenced {
                target: me,
                blockers,
            });
        }

        let remote_id = &resource.status.remote_id;
        if let Some(kind) = K::remote_kind() {
            if !remote_id.is_empty() && !self.remote_shared(&me, remote_id).await? {
                let env = self.environment_of(&resource).await?;
                let backend = self
                    .backends
                    .backend(&env)
                    .map_err(Self::remote_err("connect", &me))?;
                self.delete_remote(backend.as_ref(), kind, &me, remote_id).await?;
                if let Err(e) = backend.activate_changes().await {
                    warn!("Failed to activate changes after deleting {}: {}", me, e);
                }
            }
        }

        let linked: Vec<ResourceRef> = resource.status.linked_to.iter().cloned().collect();
        finalizer::unlink(store, &me, linked.iter()).await?;
        finalizer::release_guard(store, K::KIND, &id).await?;
        info!("Finalized {}", me);

        Ok(Action {
            requeue_after: None,
            wake: linked,
        })
    }

    /// Records a failed pass and decides when to retry.
    async fn fail(&self, id: &Identity, error: ReconcileError) -> ReconcileFailure {
        let store = self.store.as_ref();

        if let ReconcileError::StillReferenced { blockers, .. } = &error {
            let message = error.to_string();
            let blockers = blockers.clone();
            let written = store::modify_status(store, K::KIND, id, |status| {
                let same = status.blocked_by == blockers
                    && status
                        .last_transaction
                        .as_ref()
                        .is_some_and(|t| t.error == message);
                if same {
                    return false;
                }
                status.blocked_by = blockers.clone();
                status.last_transaction = Some(TransactionInfo::failed(&message));
                true
            })
            .await;
            if let Err(e) = written {
                warn!("Failed to record blockers of {} {}: {}", K::KIND, id, e);
            }
            return ReconcileFailure {
                error,
                requeue_after: Some(self.policy.base),
            };
        }

        let message = error.to_string();
        let written = store::modify_status(store, K::KIND, id, |status| {
            status.failure_count = status.failure_count.saturating_add(1);
            status.last_transaction = Some(TransactionInfo::failed(&message));
            true
        })
        .await;

        let requeue_after = match written {
            Ok(Some(resource)) => {
                let failures = resource.status.failure_count;
                if !error.is_terminal() {
                    Some(self.policy.backoff(failures))
                } else if failures <= 1 {
                    Some(self.policy.base)
                } else {
                    None
                }
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to record failure of {} {}: {}", K::KIND, id, e);
                Some(self.policy.base)
            }
        };

        ReconcileFailure {
            error,
            requeue_after,
        }
    }
}

#[async_trait]
impl<K: ResourceKind> Reconcile for Reconciler<K> {
    fn kind(&self) -> Kind {
        K::KIND
    }

    async fn reconcile(&self, id: &Identity) -> Result<Action, ReconcileFailure> {
        let resource = match self.store.get(K::KIND, id).await {
            Ok(Some(resource)) => resource,
            Ok(None) => return Ok(Action::await_change()),
            Err(e) => {
                return Err(ReconcileFailure {
                    error: e.into(),
                    requeue_after: Some(self.policy.base),
                });
            }
        };

        let outcome = if resource.meta.deletion_requested() {
            self.finalize(resource).await
        } else {
            self.apply(resource).await
        };

        match outcome {
            Ok(action) => Ok(action),
            Err(error) => Err(self.fail(id, error).await),
        }
    }
}

/// One reconciler per kind, sharing a store and backend provider.
pub fn reconcilers(
    store: Arc<dyn ResourceStore>,
    backends: Arc<dyn BackendProvider>,
    policy: RetryPolicy,
) -> BTreeMap<Kind, Arc<dyn Reconcile>> {
    fn entry<K: ResourceKind>(
        store: &Arc<dyn ResourceStore>,
        backends: &Arc<dyn BackendProvider>,
        policy: RetryPolicy,
    ) -> (Kind, Arc<dyn Reconcile>) {
        (
            K::KIND,
            Arc::new(Reconciler::<K>::new(store.clone(), backends.clone(), policy)),
        )
    }

    BTreeMap::from([
        entry::<ApiDefinitions>(&store, &backends, policy),
        entry::<SecurityPolicies>(&store, &backends, policy),
        entry::<Certificates>(&store, &backends, policy),
        entry::<SubGraphs>(&store, &backends, policy),
        entry::<SuperGraphs>(&store, &backends, policy),
        entry::<OperatorContexts>(&store, &backends, policy),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_until_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_secs(5));
        assert_eq!(policy.backoff(1), Duration::from_secs(5));
        assert_eq!(policy.backoff(2), Duration::from_secs(10));
        assert_eq!(policy.backoff(3), Duration::from_secs(20));
        assert_eq!(policy.backoff(7), Duration::from_secs(300));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn test_terminal_errors() {
        let target = ResourceRef::new(Kind::ApiDefinition, &Identity::new("default", "a"));
        let invalid = ReconcileError::Invalid {
            target: target.clone(),
            reason: "name is empty".to_string(),
        };
        assert!(invalid.is_terminal());

        let referenced = ReconcileError::StillReferenced {
            target: target.clone(),
            blockers: vec![ResourceRef::new(Kind::SecurityPolicy, &Identity::new("default", "p"))],
        };
        assert!(!referenced.is_terminal());
        assert_eq!(
            referenced.to_string(),
            format!("{} is still referenced by security_policy default/p", target)
        );
    }
}
