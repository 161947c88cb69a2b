//! gwsync operator: the controller runtime that drives the reconcilers, plus a
//! REST API for applying and inspecting resources.

pub mod audit;
pub mod config;
pub mod controller;
pub mod rest;

pub use audit::OperatorAuditLogger;
pub use config::Args;
pub use controller::{Controller, ControllerConfig, WorkQueue};
