//! Shared request plumbing for both control-plane flavors.

use reqwest::header::HeaderName;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::warn;
use url::Url;

use gwsync_core::backend::{BackendError, RemoteKind, Result};

pub(crate) struct Transport {
    client: Client,
    base: Url,
    auth_header: HeaderName,
    auth: String,
}

impl Transport {
    pub fn new(client: Client, base: &str, auth_header: &'static str, auth: &str) -> Result<Self> {
        let base = Url::parse(base)
            .map_err(|e| BackendError::Config(format!("invalid control plane url {:?}: {}", base, e)))?;
        if base.cannot_be_a_base() {
            return Err(BackendError::Config(format!("{} cannot be used as a base url", base)));
        }
        Ok(Self {
            client,
            base,
            auth_header: HeaderName::from_static(auth_header),
            auth: auth.to_string(),
        })
    }

    /// Base url with `segments` appended, each one percent-encoded.
    pub fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::Config(format!("{} cannot be used as a base url", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .header(self.auth_header.clone(), &self.auth)
    }

    /// Sends `request`, turning 404 into `NotFound` and other failures into `Status`.
    pub async fn send(&self, request: RequestBuilder, kind: RemoteKind, id: &str) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(BackendError::NotFound {
                kind,
                id: id.to_string(),
            });
        }
        if !status.is_success() {
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    warn!("Failed to read {} error body: {}", status, e);
                    format!("<unreadable body: {}>", e)
                }
            };
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    pub async fn json<T: DeserializeOwned>(response: Response) -> Result<T> {
        response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }
}

/// Multipart form carrying a PEM bundle in the `cert` field.
pub(crate) fn cert_form(pem: &str) -> Result<reqwest::multipart::Form> {
    let part = reqwest::multipart::Part::text(pem.to_string())
        .file_name("cert.pem")
        .mime_str("application/x-pem-file")
        .map_err(|e| BackendError::Config(e.to_string()))?;
    Ok(reqwest::multipart::Form::new().part("cert", part))
}
