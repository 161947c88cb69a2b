//! Dashboard API (`/api/...`), authenticated with `authorization`.
//!
//! The dashboard assigns its own object ids and wraps API definitions in an
//! `api_definition` envelope. It propagates changes to its gateways by itself,
//! so activation is a no-op.

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

use gwsync_core::backend::{Backend, BackendError, RemoteKind, RemoteObject, Result};
use gwsync_core::model::GatewayMode;

use crate::http::{Transport, cert_form};

pub const AUTH_HEADER: &str = "authorization";

/// Answer of the API and policy write endpoints.
#[derive(Debug, Deserialize)]
struct WriteResponse {
    #[serde(rename = "Status", default)]
    status: String,
    #[serde(rename = "Message", default)]
    message: String,
    /// Id of the written object.
    #[serde(rename = "Meta", default)]
    meta: Value,
}

/// Answer of the certificate upload endpoint.
#[derive(Debug, Deserialize)]
struct CertResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
}

fn rejected(status: &str, message: String) -> Option<BackendError> {
    (!status.is_empty() && !status.eq_ignore_ascii_case("ok")).then_some(BackendError::Rejected(message))
}

fn path(kind: RemoteKind) -> &'static [&'static str] {
    match kind {
        RemoteKind::Api => &["api", "apis"],
        RemoteKind::Policy => &["api", "portal", "policies"],
        RemoteKind::Certificate => &["api", "certs"],
    }
}

pub struct DashboardClient {
    http: Transport,
}

impl DashboardClient {
    pub fn new(client: Client, url: &str, auth: &str) -> Result<Self> {
        Ok(Self {
            http: Transport::new(client, url, AUTH_HEADER, auth)?,
        })
    }

    fn url(&self, kind: RemoteKind, id: Option<&str>) -> Result<Url> {
        let mut segments = path(kind).to_vec();
        segments.extend(id);
        self.http.url(&segments)
    }

    fn envelope(kind: RemoteKind, body: &Value) -> Value {
        match kind {
            RemoteKind::Api => json!({ "api_definition": body }),
            _ => body.clone(),
        }
    }

    async fn upload_cert(&self, body: &Value) -> Result<String> {
        let pem = body
            .get("cert")
            .and_then(Value::as_str)
            .ok_or_else(|| BackendError::Rejected("certificate body carries no PEM".to_string()))?;
        let request = self
            .http
            .request(Method::POST, self.url(RemoteKind::Certificate, None)?)
            .multipart(cert_form(pem)?);
        let response = self.http.send(request, RemoteKind::Certificate, "").await?;
        let written: CertResponse = Transport::json(response).await?;
        if let Some(err) = rejected(&written.status, written.message) {
            return Err(err);
        }
        if written.id.is_empty() {
            return Err(BackendError::Decode("certificate upload returned no id".to_string()));
        }
        Ok(written.id)
    }

    async fn write(&self, method: Method, kind: RemoteKind, id: Option<&str>, body: &Value) -> Result<WriteResponse> {
        let request = self
            .http
            .request(method, self.url(kind, id)?)
            .json(&Self::envelope(kind, body));
        let response = self.http.send(request, kind, id.unwrap_or_default()).await?;
        let written: WriteResponse = Transport::json(response).await?;
        if let Some(err) = rejected(&written.status, written.message.clone()) {
            return Err(err);
        }
        Ok(written)
    }
}

#[async_trait]
impl Backend for DashboardClient {
    fn mode(&self) -> GatewayMode {
        GatewayMode::Dashboard
    }

    async fn create(&self, kind: RemoteKind, body: &Value) -> Result<RemoteObject> {
        let id = match kind {
            RemoteKind::Certificate => self.upload_cert(body).await?,
            _ => {
                let written = self.write(Method::POST, kind, None, body).await?;
                written
                    .meta
                    .as_str()
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .ok_or_else(|| BackendError::Decode(format!("create of {} returned no id", kind)))?
            }
        };
        debug!("Dashboard created {} {}", kind, id);
        self.get(kind, &id).await
    }

    async fn get(&self, kind: RemoteKind, id: &str) -> Result<RemoteObject> {
        let request = self.http.request(Method::GET, self.url(kind, Some(id))?);
        let response = self.http.send(request, kind, id).await?;
        let mut representation: Value = Transport::json(response).await?;
        if kind == RemoteKind::Api {
            if let Some(definition) = representation.get_mut("api_definition") {
                representation = definition.take();
            }
        }
        Ok(RemoteObject {
            id: id.to_string(),
            representation,
        })
    }

    async fn update(&self, kind: RemoteKind, id: &str, body: &Value) -> Result<RemoteObject> {
        if kind == RemoteKind::Certificate {
            return Err(BackendError::Rejected(
                "certificates cannot be updated, only replaced".to_string(),
            ));
        }
        self.write(Method::PUT, kind, Some(id), body).await?;
        self.get(kind, id).await
    }

    async fn delete(&self, kind: RemoteKind, id: &str) -> Result<()> {
        let request = self.http.request(Method::DELETE, self.url(kind, Some(id))?);
        self.http.send(request, kind, id).await?;
        Ok(())
    }

    async fn activate_changes(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_bodies_are_enveloped() {
        let body = json!({"name": "a"});
        assert_eq!(
            DashboardClient::envelope(RemoteKind::Api, &body),
            json!({"api_definition": {"name": "a"}})
        );
        assert_eq!(DashboardClient::envelope(RemoteKind::Policy, &body), body);
    }

    #[test]
    fn test_write_response_status() {
        let ok: WriteResponse =
            serde_json::from_value(json!({"Status": "OK", "Message": "API created", "Meta": "5f1"})).unwrap();
        assert!(rejected(&ok.status, ok.message.clone()).is_none());
        assert_eq!(ok.meta, json!("5f1"));

        let err: WriteResponse =
            serde_json::from_value(json!({"Status": "Error", "Message": "duplicate listen path"})).unwrap();
        assert!(matches!(
            rejected(&err.status, err.message),
            Some(BackendError::Rejected(m)) if m == "duplicate listen path"
        ));
    }
}
