//! Resource model shared by every reconciled kind.

pub mod api;
pub mod cert;
pub mod context;
pub mod graph;
pub mod number;
pub mod policy;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

pub use api::ApiDefinitionSpec;
pub use cert::CertificateSpec;
pub use context::{Environment, GatewayMode, OperatorContextSpec};
pub use graph::{SubGraphSpec, SuperGraphSpec};
pub use number::{Float64, NumberMode};
pub use policy::SecurityPolicySpec;

// =============================================================================
// Kinds and identities
// =============================================================================

/// Every kind of resource the operator reconciles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    ApiDefinition,
    SecurityPolicy,
    Certificate,
    SubGraph,
    SuperGraph,
    OperatorContext,
}

impl Kind {
    pub const ALL: [Kind; 6] = [
        Kind::ApiDefinition,
        Kind::SecurityPolicy,
        Kind::Certificate,
        Kind::SubGraph,
        Kind::SuperGraph,
        Kind::OperatorContext,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::ApiDefinition => "api_definition",
            Kind::SecurityPolicy => "security_policy",
            Kind::Certificate => "certificate",
            Kind::SubGraph => "sub_graph",
            Kind::SuperGraph => "super_graph",
            Kind::OperatorContext => "operator_context",
        }
    }

    /// Plural name used in REST paths.
    pub fn plural(&self) -> &'static str {
        match self {
            Kind::ApiDefinition => "apidefinitions",
            Kind::SecurityPolicy => "securitypolicies",
            Kind::Certificate => "certificates",
            Kind::SubGraph => "subgraphs",
            Kind::SuperGraph => "supergraphs",
            Kind::OperatorContext => "operatorcontexts",
        }
    }

    /// Finalizer string that guards remote teardown for this kind.
    pub fn finalizer(&self) -> &'static str {
        match self {
            Kind::ApiDefinition => "finalizers.gwsync.io/apidefinition",
            Kind::SecurityPolicy => "finalizers.gwsync.io/securitypolicy",
            Kind::Certificate => "finalizers.gwsync.io/certificate",
            Kind::SubGraph => "finalizers.gwsync.io/subgraph",
            Kind::SuperGraph => "finalizers.gwsync.io/supergraph",
            Kind::OperatorContext => "finalizers.gwsync.io/operatorcontext",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Kind::ALL
            .into_iter()
            .find(|k| k.as_str() == s || k.plural() == s)
            .ok_or_else(|| format!("unknown resource kind: {}", s))
    }
}

/// Namespace and name of a stored resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity {
    pub namespace: String,
    pub name: String,
}

impl Identity {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parses `namespace/name`.
    pub fn parse(s: &str) -> Option<Self> {
        let (namespace, name) = s.split_once('/')?;
        if namespace.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self::new(namespace, name))
    }

    /// URL-safe unpadded base64 of `namespace/name`.
    ///
    /// Used as the remote id of API definitions and as the host part of internal
    /// proxy addresses, so the same identity always maps to the same remote value.
    pub fn encoded(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.to_string())
    }

    /// Inverse of [`Identity::encoded`].
    pub fn decode(encoded: &str) -> Option<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(encoded).ok()?;
        let s = String::from_utf8(bytes).ok()?;
        Self::parse(&s)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Kind-qualified identity. Reverse links and forward links are sets of these.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: Kind,
    pub namespace: String,
    pub name: String,
}

impl ResourceRef {
    pub fn new(kind: Kind, id: &Identity) -> Self {
        Self {
            kind,
            namespace: id.namespace.clone(),
            name: id.name.clone(),
        }
    }

    pub fn identity(&self) -> Identity {
        Identity::new(&self.namespace, &self.name)
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Typed reference from one resource's spec to another resource.
///
/// The kind of the referenced resource is fixed by the field the target sits in.
/// A missing namespace means "same namespace as the referencing resource".
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl Target {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Identity of the referenced resource, defaulting the namespace.
    pub fn identity(&self, default_namespace: &str) -> Identity {
        let namespace = match self.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => ns,
            _ => default_namespace,
        };
        Identity::new(namespace, &self.name)
    }

    /// Rejects references that can never resolve to a single resource.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("target name is empty".to_string());
        }
        if self.name.contains('/') {
            return Err(format!("target name {:?} must not contain '/'", self.name));
        }
        if let Some(ns) = &self.namespace {
            if ns.contains('/') {
                return Err(format!("target namespace {:?} must not contain '/'", ns));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Stored resource
// =============================================================================

/// Metadata owned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub namespace: String,
    pub name: String,
    pub uid: String,
    /// Bumped on every write, used for optimistic concurrency.
    pub resource_version: u64,
    /// Bumped on every spec change.
    pub generation: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finalizers: Vec<String>,
}

impl ObjectMeta {
    pub fn identity(&self) -> Identity {
        Identity::new(&self.namespace, &self.name)
    }

    pub fn deletion_requested(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Successful,
    Failed,
}

/// Outcome of the most recent reconcile pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionInfo {
    pub status: TransactionStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub time: DateTime<Utc>,
}

impl TransactionInfo {
    pub fn successful() -> Self {
        Self {
            status: TransactionStatus::Successful,
            error: String::new(),
            time: Utc::now(),
        }
    }

    pub fn failed(error: impl fmt::Display) -> Self {
        Self {
            status: TransactionStatus::Failed,
            error: error.to_string(),
            time: Utc::now(),
        }
    }
}

/// Status sub-record written by the reconcilers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub remote_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_pushed_hash: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_observed_hash: String,
    /// Resources whose specs reference this one.
    #[serde(default)]
    pub reverse_links: BTreeSet<ResourceRef>,
    /// Resources this one referenced on its last successful pass.
    #[serde(default)]
    pub linked_to: BTreeSet<ResourceRef>,
    /// Set while a deletion request is blocked by other resources.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_by: Vec<ResourceRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transaction: Option<TransactionInfo>,
    #[serde(default)]
    pub failure_count: u32,
}

/// A stored desired-state record with its status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub kind: Kind,
    pub meta: ObjectMeta,
    pub spec: serde_json::Value,
    #[serde(default)]
    pub status: ResourceStatus,
}

impl Resource {
    pub fn identity(&self) -> Identity {
        self.meta.identity()
    }

    pub fn reference(&self) -> ResourceRef {
        ResourceRef::new(self.kind, &self.identity())
    }

    pub fn decode_spec<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.spec.clone())
    }
}
