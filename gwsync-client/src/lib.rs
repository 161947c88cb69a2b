//! HTTP implementations of the gwsync [`Backend`](gwsync_core::Backend).
//!
//! [`GatewayClient`] talks to a single gateway's admin API, [`DashboardClient`]
//! to the multi-tenant dashboard. [`HttpBackendProvider`] picks one per
//! environment. Bodies go out exactly as the reconciler built them.

pub mod dashboard;
pub mod gateway;
mod http;
pub mod provider;

pub use dashboard::DashboardClient;
pub use gateway::GatewayClient;
pub use provider::HttpBackendProvider;
