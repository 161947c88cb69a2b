//! Builds the right client for an environment.

use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use gwsync_core::backend::{Backend, BackendError, BackendProvider, Result};
use gwsync_core::model::{Environment, GatewayMode};

use crate::{DashboardClient, GatewayClient};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Hands out HTTP backends. Connection pools are shared between every
/// environment; only the TLS verification setting picks a different pool.
pub struct HttpBackendProvider {
    env: Environment,
    client: Client,
    insecure_client: Client,
}

impl HttpBackendProvider {
    pub fn new(env: Environment) -> Result<Self> {
        let build = |insecure: bool| {
            Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .danger_accept_invalid_certs(insecure)
                .build()
                .map_err(|e| BackendError::Config(format!("failed to build http client: {}", e)))
        };

        Ok(Self {
            env,
            client: build(false)?,
            insecure_client: build(true)?,
        })
    }
}

impl BackendProvider for HttpBackendProvider {
    fn environment(&self) -> &Environment {
        &self.env
    }

    fn backend(&self, env: &Environment) -> Result<Arc<dyn Backend>> {
        let url = env
            .url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| BackendError::Config("no control plane url configured".to_string()))?;
        let auth = env.auth.as_deref().unwrap_or_default();
        let client = if env.insecure_skip_verify.unwrap_or(false) {
            self.insecure_client.clone()
        } else {
            self.client.clone()
        };

        debug!("Using {} backend at {}", env.mode(), url);
        Ok(match env.mode() {
            GatewayMode::Gateway => Arc::new(GatewayClient::new(client, url, auth, env.org())?),
            GatewayMode::Dashboard => Arc::new(DashboardClient::new(client, url, auth)?),
        })
    }
}
