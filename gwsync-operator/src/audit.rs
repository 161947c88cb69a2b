use tracing::{info, warn};

use gwsync_core::ResourceRef;

/// Operator audit logger. Entries go to the `audit` tracing target.
pub struct OperatorAuditLogger {
    enabled: bool,
}

impl OperatorAuditLogger {
    pub fn new() -> Self {
        Self { enabled: true }
    }

    pub fn new_noop() -> Self {
        Self { enabled: false }
    }

    fn log(&self, message: String, object: &ResourceRef) {
        if self.enabled {
            info!(target: "audit", kind = %object.kind, namespace = %object.namespace, name = %object.name, "{}", message);
        }
    }

    fn log_warn(&self, message: String, object: &ResourceRef) {
        if self.enabled {
            warn!(target: "audit", kind = %object.kind, namespace = %object.namespace, name = %object.name, "{}", message);
        }
    }

    // Owner requests
    pub fn resource_applied(&self, object: &ResourceRef, generation: u64) {
        self.log(format!("Resource applied: {} (generation {})", object, generation), object);
    }

    pub fn deletion_requested(&self, object: &ResourceRef) {
        self.log(format!("Deletion requested: {}", object), object);
    }

    // Reconcile outcomes
    pub fn resource_pushed(&self, object: &ResourceRef, remote_id: &str) {
        self.log(format!("Resource pushed: {} as {}", object, remote_id), object);
    }

    pub fn resource_deleted(&self, object: &ResourceRef) {
        self.log(format!("Resource deleted: {}", object), object);
    }

    pub fn deletion_blocked(&self, object: &ResourceRef, blockers: &[ResourceRef]) {
        let blockers = blockers
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        self.log_warn(format!("Deletion blocked: {} by {}", object, blockers), object);
    }
}

impl Default for OperatorAuditLogger {
    fn default() -> Self {
        Self::new()
    }
}
