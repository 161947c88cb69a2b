//! Capability interface of the remote control plane.
//!
//! Reconcilers only ever talk to [`Backend`]; gateway and dashboard flavors are
//! separate implementations selected by a [`BackendProvider`].

pub mod mock;

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::model::{Environment, GatewayMode};

/// Remote collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RemoteKind {
    Api,
    Policy,
    Certificate,
}

impl fmt::Display for RemoteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteKind::Api => f.write_str("api"),
            RemoteKind::Policy => f.write_str("policy"),
            RemoteKind::Certificate => f.write_str("certificate"),
        }
    }
}

/// An object as the control plane reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteObject {
    pub id: String,
    pub representation: Value,
}

/// Errors that can occur when talking to the control plane.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The object does not exist remotely.
    #[error("{kind} {id} not found")]
    NotFound { kind: RemoteKind, id: String },

    /// Non-success HTTP status.
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    /// The request never completed.
    #[error("request failed: {0}")]
    Transport(String),

    /// The response could not be decoded.
    #[error("invalid response: {0}")]
    Decode(String),

    /// The control plane answered but refused the change.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The backend cannot be built from the given environment.
    #[error("invalid backend configuration: {0}")]
    Config(String),
}

impl BackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound { .. })
    }
}

/// Result type for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

#[async_trait]
pub trait Backend: Send + Sync {
    fn mode(&self) -> GatewayMode;

    /// Creates an object and returns it as stored remotely.
    async fn create(&self, kind: RemoteKind, body: &Value) -> Result<RemoteObject>;

    async fn get(&self, kind: RemoteKind, id: &str) -> Result<RemoteObject>;

    /// Replaces an object and returns it as stored remotely.
    async fn update(&self, kind: RemoteKind, id: &str, body: &Value) -> Result<RemoteObject>;

    async fn delete(&self, kind: RemoteKind, id: &str) -> Result<()>;

    /// Makes pushed changes live (hot reload).
    async fn activate_changes(&self) -> Result<()>;
}

/// Builds backends for an environment.
pub trait BackendProvider: Send + Sync {
    /// Process-wide environment; operator contexts override it field by field.
    fn environment(&self) -> &Environment;

    fn backend(&self, env: &Environment) -> Result<Arc<dyn Backend>>;
}
