//! Shared test utilities for gwsync-operator integration tests.

#![allow(dead_code)]

use gwsync_core::backend::mock::{MockBackend, MockProvider};
use gwsync_core::{Environment, GatewayMode, MemoryStore, ResourceStore, RetryPolicy, reconcilers};
use gwsync_operator::rest::{AppState, create_router};
use gwsync_operator::{Controller, ControllerConfig, OperatorAuditLogger};
use reqwest::{Client, Response as ReqwestResponse};
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Allocate an available port for testing.
pub fn allocate_port() -> u16 {
    portpicker::pick_unused_port().expect("No available port")
}

/// Retry policy short enough for tests to converge quickly.
pub fn fast_retries() -> RetryPolicy {
    RetryPolicy {
        base: Duration::from_millis(50),
        max: Duration::from_millis(400),
    }
}

pub fn test_environment() -> Environment {
    Environment {
        mode: Some(GatewayMode::Gateway),
        url: Some("http://gateway.test:8080".to_string()),
        auth: Some("secret".to_string()),
        org: Some("org1".to_string()),
        insecure_skip_verify: None,
    }
}

/// Polls `check` until it holds, panicking after a few seconds.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..250 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {}", what);
}

/// Test server running the REST API and the controller against an
/// in-memory store and a mock control plane.
pub struct TestServer {
    pub addr: SocketAddr,
    pub client: Client,
    pub store: Arc<MemoryStore>,
    pub backend: Arc<MockBackend>,
    shutdown_tx: watch::Sender<bool>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        Self::spawn_with(ControllerConfig::default()).await
    }

    pub async fn spawn_with(config: ControllerConfig) -> Self {
        let store = Arc::new(MemoryStore::default());
        let backend = Arc::new(MockBackend::new(GatewayMode::Gateway));
        let provider = Arc::new(MockProvider::new(test_environment(), backend.clone()));
        let shared: Arc<dyn ResourceStore> = store.clone();

        // Create app state with noop audit logger
        let audit = Arc::new(OperatorAuditLogger::new_noop());
        let controller = Arc::new(Controller::new(
            shared.clone(),
            reconcilers(shared.clone(), provider, fast_retries()),
            audit.clone(),
            config,
        ));
        let app_state = Arc::new(AppState {
            store: shared,
            audit,
        });
        let router = create_router(app_state);

        let addr: SocketAddr = format!("127.0.0.1:{}", allocate_port()).parse().unwrap();
        let listener = TcpListener::bind(&addr).await.expect("Failed to bind");
        let actual_addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        controller.spawn(shutdown_tx.subscribe());

        let mut server_shutdown = shutdown_rx;
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    server_shutdown.changed().await.ok();
                })
                .await
                .expect("Server error");
        });

        // Small delay to ensure server is ready
        tokio::time::sleep(Duration::from_millis(50)).await;

        Self {
            addr: actual_addr,
            client: Client::new(),
            store,
            backend,
            shutdown_tx,
        }
    }

    /// Get base URL for the REST API.
    pub fn base_url(&self) -> String {
        format!("http://{}/api/v1", self.addr)
    }

    /// Perform a GET request.
    pub async fn get(&self, path: &str) -> ReqwestResponse {
        self.client
            .get(format!("{}{}", self.base_url(), path))
            .send()
            .await
            .expect("Request failed")
    }

    /// Perform a PUT request with JSON body.
    pub async fn put_json<T: Serialize>(&self, path: &str, body: &T) -> ReqwestResponse {
        self.client
            .put(format!("{}{}", self.base_url(), path))
            .json(body)
            .send()
            .await
            .expect("Request failed")
    }

    /// Perform a DELETE request.
    pub async fn delete(&self, path: &str) -> ReqwestResponse {
        self.client
            .delete(format!("{}{}", self.base_url(), path))
            .send()
            .await
            .expect("Request failed")
    }

    /// GET a resource and return its JSON, or `None` on 404.
    pub async fn resource(&self, path: &str) -> Option<serde_json::Value> {
        let response = self.get(path).await;
        if response.status() == 404 {
            return None;
        }
        assert_eq!(response.status(), 200);
        Some(response.json().await.unwrap())
    }

    /// Shutdown the server and the controller.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
    }
}
