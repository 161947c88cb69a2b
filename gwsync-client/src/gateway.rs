//! Gateway admin API (`/tyk/...`), authenticated with `x-tyk-authorization`.

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use gwsync_core::backend::{Backend, BackendError, RemoteKind, RemoteObject, Result};
use gwsync_core::model::GatewayMode;

use crate::http::{Transport, cert_form};

pub const AUTH_HEADER: &str = "x-tyk-authorization";

/// Answer of the gateway's write endpoints.
#[derive(Debug, Deserialize)]
struct WriteResponse {
    #[serde(default, alias = "id")]
    key: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
}

impl WriteResponse {
    fn check(self) -> Result<Self> {
        if !self.status.is_empty() && !self.status.eq_ignore_ascii_case("ok") {
            return Err(BackendError::Rejected(self.message));
        }
        Ok(self)
    }

    fn into_id(self) -> Result<String> {
        let this = self.check()?;
        if this.key.is_empty() {
            return Err(BackendError::Decode("response carries no id".to_string()));
        }
        Ok(this.key)
    }
}

fn collection(kind: RemoteKind) -> &'static str {
    match kind {
        RemoteKind::Api => "apis",
        RemoteKind::Policy => "policies",
        RemoteKind::Certificate => "certs",
    }
}

pub struct GatewayClient {
    http: Transport,
    org: String,
}

impl GatewayClient {
    pub fn new(client: Client, url: &str, auth: &str, org: &str) -> Result<Self> {
        Ok(Self {
            http: Transport::new(client, url, AUTH_HEADER, auth)?,
            org: org.to_string(),
        })
    }

    fn url(&self, kind: RemoteKind, id: Option<&str>, org: &str) -> Result<Url> {
        let mut segments = vec!["tyk", collection(kind)];
        segments.extend(id);
        let mut url = self.http.url(&segments)?;
        if kind == RemoteKind::Certificate && !org.is_empty() {
            url.query_pairs_mut().append_pair("org_id", org);
        }
        Ok(url)
    }
}

#[async_trait]
impl Backend for GatewayClient {
    fn mode(&self) -> GatewayMode {
        GatewayMode::Gateway
    }

    async fn create(&self, kind: RemoteKind, body: &Value) -> Result<RemoteObject> {
        let request = match kind {
            RemoteKind::Certificate => {
                let pem = body
                    .get("cert")
                    .and_then(Value::as_str)
                    .ok_or_else(|| BackendError::Rejected("certificate body carries no PEM".to_string()))?;
                let org = body
                    .get("org_id")
                    .and_then(Value::as_str)
                    .filter(|o| !o.is_empty())
                    .unwrap_or(self.org.as_str());
                self.http
                    .request(Method::POST, self.url(kind, None, org)?)
                    .multipart(cert_form(pem)?)
            }
            _ => self
                .http
                .request(Method::POST, self.url(kind, None, &self.org)?)
                .json(body),
        };

        let response = self.http.send(request, kind, "").await?;
        let id = Transport::json::<WriteResponse>(response).await?.into_id()?;
        debug!("Gateway created {} {}", kind, id);
        self.get(kind, &id).await
    }

    async fn get(&self, kind: RemoteKind, id: &str) -> Result<RemoteObject> {
        let request = self.http.request(Method::GET, self.url(kind, Some(id), &self.org)?);
        let response = self.http.send(request, kind, id).await?;
        Ok(RemoteObject {
            id: id.to_string(),
            representation: Transport::json(response).await?,
        })
    }

    async fn update(&self, kind: RemoteKind, id: &str, body: &Value) -> Result<RemoteObject> {
        if kind == RemoteKind::Certificate {
            return Err(BackendError::Rejected(
                "certificates cannot be updated, only replaced".to_string(),
            ));
        }

        let request = self
            .http
            .request(Method::PUT, self.url(kind, Some(id), &self.org)?)
            .json(body);
        let response = self.http.send(request, kind, id).await?;
        Transport::json::<WriteResponse>(response).await?.check()?;
        self.get(kind, id).await
    }

    async fn delete(&self, kind: RemoteKind, id: &str) -> Result<()> {
        let request = self.http.request(Method::DELETE, self.url(kind, Some(id), &self.org)?);
        self.http.send(request, kind, id).await?;
        Ok(())
    }

    async fn activate_changes(&self) -> Result<()> {
        let request = self
            .http
            .request(Method::GET, self.http.url(&["tyk", "reload", "group"])?);
        self.http.send(request, RemoteKind::Api, "reload").await?;
        debug!("Gateway group reload requested");
        Ok(())
    }
}
