//! Controller runtime.
//!
//! Store events become work items; workers drain the queue and run the
//! reconciler of each item's kind. An identity is never reconciled by two
//! workers at once: a change arriving while it is in flight marks it dirty and
//! it runs again once the current pass ends.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Notify, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use gwsync_core::{
    Event, Kind, Reconcile, ReconcileError, Resource, ResourceRef, ResourceStore,
};

use crate::audit::OperatorAuditLogger;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Concurrent reconciles.
    pub workers: usize,
    /// Only resources in this namespace are reconciled.
    pub namespace: Option<String>,
    /// Periodic full re-reconcile.
    pub resync: Option<Duration>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            namespace: None,
            resync: None,
        }
    }
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<ResourceRef>,
    queued: HashSet<ResourceRef>,
    running: HashSet<ResourceRef>,
    dirty: HashSet<ResourceRef>,
}

/// Deduplicating work queue with per-item exclusivity.
#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add(&self, item: ResourceRef) {
        let mut state = self.state();
        if state.running.contains(&item) {
            state.dirty.insert(item);
            return;
        }
        if state.queued.insert(item.clone()) {
            state.pending.push_back(item);
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Waits for the next item and marks it running.
    pub async fn next(&self) -> ResourceRef {
        loop {
            if let Some(item) = self.try_next() {
                return item;
            }
            self.notify.notified().await;
        }
    }

    fn try_next(&self) -> Option<ResourceRef> {
        let mut state = self.state();
        let item = state.pending.pop_front()?;
        state.queued.remove(&item);
        state.running.insert(item.clone());
        if !state.pending.is_empty() {
            self.notify.notify_one();
        }
        Some(item)
    }

    /// Marks `item` finished and queues it again if it changed meanwhile.
    pub fn done(&self, item: &ResourceRef) {
        let rerun = {
            let mut state = self.state();
            state.running.remove(item);
            state.dirty.remove(item)
        };
        if rerun {
            self.add(item.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.state().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct Controller {
    store: Arc<dyn ResourceStore>,
    reconcilers: BTreeMap<Kind, Arc<dyn Reconcile>>,
    audit: Arc<OperatorAuditLogger>,
    config: ControllerConfig,
    queue: Arc<WorkQueue>,
}

impl Controller {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        reconcilers: BTreeMap<Kind, Arc<dyn Reconcile>>,
        audit: Arc<OperatorAuditLogger>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            store,
            reconcilers,
            audit,
            config,
            queue: Arc::new(WorkQueue::default()),
        }
    }

    fn watches(&self, item: &ResourceRef) -> bool {
        self.config
            .namespace
            .as_deref()
            .is_none_or(|ns| item.namespace == ns)
    }

    fn enqueue(&self, item: ResourceRef) {
        if self.watches(&item) {
            self.queue.add(item);
        }
    }

    fn schedule(&self, item: ResourceRef, after: Duration) {
        debug!("Requeueing {} in {:?}", item, after);
        let queue = Arc::clone(&self.queue);
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            queue.add(item);
        });
    }

    async fn enqueue_all(&self) {
        for kind in Kind::ALL {
            match self.store.list(kind, self.config.namespace.as_deref()).await {
                Ok(resources) => {
                    for resource in resources {
                        self.enqueue(resource.reference());
                    }
                }
                Err(e) => warn!("Failed to list {} resources: {}", kind, e),
            }
        }
    }

    fn handle_event(&self, event: Event) {
        match event {
            Event::Applied(resource) => {
                self.enqueue(resource.reference());
                // Referrers embed what they resolved from this resource. The pass
                // above wakes them again once a new remote id is known.
                for referrer in &resource.status.reverse_links {
                    self.enqueue(referrer.clone());
                }
            }
            Event::DeletionRequested(resource) => self.enqueue(resource.reference()),
            Event::StatusUpdated(_) | Event::Removed(_) => {}
        }
    }

    async fn process(&self, item: &ResourceRef) {
        let Some(reconciler) = self.reconcilers.get(&item.kind) else {
            warn!("No reconciler registered for {}", item.kind);
            return;
        };
        let id = item.identity();

        let before = match self.store.get(item.kind, &id).await {
            Ok(Some(resource)) => Some(resource),
            Ok(None) => {
                debug!("{} is gone, nothing to reconcile", item);
                return;
            }
            Err(e) => {
                warn!("Failed to read {} before reconciling: {}", item, e);
                None
            }
        };

        info!("Reconciling {}", item);
        match reconciler.reconcile(&id).await {
            Ok(action) => {
                if let Some(before) = &before {
                    self.audit_outcome(item, before).await;
                }
                for released in action.wake {
                    self.enqueue(released);
                }
                if let Some(after) = action.requeue_after {
                    self.schedule(item.clone(), after);
                }
            }
            Err(failure) => {
                match &failure.error {
                    ReconcileError::StillReferenced { blockers, .. } => {
                        let newly_blocked = before
                            .as_ref()
                            .is_none_or(|r| &r.status.blocked_by != blockers);
                        if newly_blocked {
                            self.audit.deletion_blocked(item, blockers);
                        }
                        info!("{}", failure.error);
                    }
                    other => error!("Reconciling {} failed: {}", item, other),
                }
                match failure.requeue_after {
                    Some(after) => self.schedule(item.clone(), after),
                    None => warn!("Not retrying {} until it changes", item),
                }
            }
        }
    }

    async fn audit_outcome(&self, item: &ResourceRef, before: &Resource) {
        let after = match self.store.get(item.kind, &item.identity()).await {
            Ok(after) => after,
            Err(_) => return,
        };
        match after {
            None => self.audit.resource_deleted(item),
            Some(after)
                if !after.status.remote_id.is_empty()
                    && after.status.last_pushed_hash != before.status.last_pushed_hash =>
            {
                self.audit.resource_pushed(item, &after.status.remote_id)
            }
            Some(_) => {}
        }
    }

    async fn worker(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let item = tokio::select! {
                item = self.queue.next() => item,
                _ = shutdown.changed() => break,
            };
            self.process(&item).await;
            self.queue.done(&item);
        }
    }

    async fn watch_events(
        self: Arc<Self>,
        mut events: broadcast::Receiver<Event>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => self.handle_event(event),
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Missed {} store events, re-reading everything", missed);
                        self.enqueue_all().await;
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = shutdown.changed() => break,
            }
        }
    }

    async fn resync(self: Arc<Self>, every: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    debug!("Periodic resync");
                    self.enqueue_all().await;
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    /// Reconciles until `shutdown` changes.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        // Subscribe before listing so nothing slips between the two
        let events = self.store.subscribe();
        self.enqueue_all().await;
        info!(
            "Controller started with {} workers{}",
            self.config.workers,
            self.config
                .namespace
                .as_deref()
                .map(|ns| format!(", watching namespace {}", ns))
                .unwrap_or_default()
        );

        let mut tasks: Vec<JoinHandle<()>> = (0..self.config.workers.max(1))
            .map(|_| tokio::spawn(Arc::clone(&self).worker(shutdown.clone())))
            .collect();
        tasks.push(tokio::spawn(
            Arc::clone(&self).watch_events(events, shutdown.clone()),
        ));
        if let Some(every) = self.config.resync.filter(|d| !d.is_zero()) {
            tasks.push(tokio::spawn(Arc::clone(&self).resync(every, shutdown.clone())));
        }

        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                error!("Controller task failed: {}", e);
            }
        }
        info!("Controller stopped");
    }

    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gwsync_core::Identity;

    fn item(name: &str) -> ResourceRef {
        ResourceRef::new(Kind::ApiDefinition, &Identity::new("default", name))
    }

    #[test]
    fn test_queue_deduplicates_pending_items() {
        let queue = WorkQueue::default();
        queue.add(item("a"));
        queue.add(item("b"));
        queue.add(item("a"));
        assert_eq!(queue.len(), 2);

        assert_eq!(tokio_test::block_on(queue.next()), item("a"));
        assert_eq!(tokio_test::block_on(queue.next()), item("b"));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_running_item_is_rerun_when_dirty() {
        let queue = WorkQueue::default();
        queue.add(item("a"));
        let running = tokio_test::block_on(queue.next());

        // Not handed out twice while in flight
        queue.add(item("a"));
        queue.add(item("a"));
        assert!(queue.is_empty());

        queue.done(&running);
        assert_eq!(queue.len(), 1);
        let again = tokio_test::block_on(queue.next());
        queue.done(&again);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_next_waits_for_add() {
        let queue = Arc::new(WorkQueue::default());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.add(item("late"));

        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, item("late"));
    }
}
