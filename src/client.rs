//! HTTP client for the fleet server.
//!
//! Configuration comes from the preference store:
//! - `ServerURL` - Base URL of the server
//! - `BasicAuth` / `key` - HTTP Basic credentials (user is always `sal`)
//! - `CACert` - PEM bundle of an additional trusted root
//! - `SSLClientCertificate` / `SSLClientKey` - PEM client identity

use std::path::Path;
use std::time::Duration;

use reqwest::{Certificate, Client, Identity, StatusCode};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::prefs::Preferences;

/// Username paired with the business-unit key for HTTP Basic auth.
pub const BASIC_AUTH_USER: &str = "sal";

const CONNECT_TIMEOUT: Duration = Duration::from_millis(3050);
const GET_TIMEOUT: Duration = Duration::from_secs(4);
const POST_TIMEOUT: Duration = Duration::from_secs(8);

/// HTTP client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: check the business unit key")]
    Unauthorized,

    #[error("Server error: {0}")]
    Server(String),

    #[error("Could not load certificate {path}: {reason}")]
    Certificate { path: String, reason: String },
}

/// TLS and authentication settings for [`CheckinClient`].
#[derive(Debug, Clone, Default)]
pub struct TransportConfig {
    pub basic_auth_key: Option<String>,
    pub ca_cert: Option<String>,
    pub client_cert: Option<String>,
    pub client_key: Option<String>,
}

impl TransportConfig {
    pub fn from_prefs(prefs: &Preferences) -> Self {
        let basic_auth_key = if prefs.get_bool("BasicAuth", true) {
            Some(prefs.get_str("key").unwrap_or_default())
        } else {
            None
        };

        let config = Self {
            basic_auth_key,
            ca_cert: prefs.get_str("CACert"),
            client_cert: prefs.get_str("SSLClientCertificate"),
            client_key: prefs.get_str("SSLClientKey"),
        };
        config.warn_on_partial_certs();
        config
    }

    fn warn_on_partial_certs(&self) {
        let paths = [&self.ca_cert, &self.client_cert, &self.client_key];
        let existing = paths
            .iter()
            .filter(|p| p.as_deref().map(|p| Path::new(p).exists()).unwrap_or(false))
            .count();
        if existing > 0 && existing < paths.len() {
            warn!(
                "CACert, SSLClientCertificate and SSLClientKey should all be paths to \
                 certificate files when any of them is"
            );
        }
    }
}

/// HTTP client for the fleet server.
#[derive(Debug, Clone)]
pub struct CheckinClient {
    base_url: String,
    basic_auth_key: Option<String>,
    client: Client,
}

impl CheckinClient {
    /// Create from the preference store.
    pub fn from_prefs(prefs: &Preferences) -> Result<Self, ClientError> {
        let base_url = prefs.get_str("ServerURL").unwrap_or_default();
        Self::new(base_url, TransportConfig::from_prefs(prefs))
    }

    /// Create with explicit configuration.
    pub fn new(base_url: impl Into<String>, config: TransportConfig) -> Result<Self, ClientError> {
        let mut builder = Client::builder().connect_timeout(CONNECT_TIMEOUT);

        if let Some(ref ca_cert) = config.ca_cert {
            let pem = read_pem(ca_cert)?;
            let cert = Certificate::from_pem(&pem).map_err(|e| ClientError::Certificate {
                path: ca_cert.clone(),
                reason: e.to_string(),
            })?;
            builder = builder.add_root_certificate(cert);
        }

        if let Some(ref client_cert) = config.client_cert {
            let cert_pem = read_pem(client_cert)?;
            // Without a separate key the certificate file must carry the key too.
            let key_pem = match config.client_key {
                Some(ref key) => read_pem(key)?,
                None => cert_pem.clone(),
            };
            let identity = Identity::from_pkcs8_pem(&cert_pem, &key_pem).map_err(|e| {
                ClientError::Certificate {
                    path: client_cert.clone(),
                    reason: e.to_string(),
                }
            })?;
            builder = builder.identity(identity);
        }

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            basic_auth_key: config.basic_auth_key,
            client: builder.build()?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Join `path` to the base URL, always ending in exactly one `/`.
    pub fn build_url(&self, path: &str) -> String {
        let path = path.trim_matches('/');
        if path.is_empty() {
            format!("{}/", self.base_url)
        } else {
            format!("{}/{}/", self.base_url, path)
        }
    }

    /// Build a request with optional auth header.
    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = self.build_url(path);
        let mut req = self.client.request(method, &url);
        if let Some(ref key) = self.basic_auth_key {
            req = req.basic_auth(BASIC_AUTH_USER, Some(key));
        }
        req
    }

    /// Log the response and turn HTTP errors into ClientError.
    async fn handle_response(&self, response: reqwest::Response) -> Result<String, ClientError> {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        debug!("Response HTTP {}: {}", status.as_u16(), body);

        if status.is_success() {
            Ok(body)
        } else {
            match status {
                StatusCode::NOT_FOUND => Err(ClientError::NotFound(body)),
                StatusCode::BAD_REQUEST => Err(ClientError::BadRequest(body)),
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ClientError::Unauthorized),
                _ => Err(ClientError::Server(format!("{}: {}", status, body))),
            }
        }
    }

    pub async fn get_text(&self, path: &str) -> Result<String, ClientError> {
        let response = self
            .request(reqwest::Method::GET, path)
            .timeout(GET_TIMEOUT)
            .send()
            .await?;
        self.handle_response(response).await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<String, ClientError> {
        let response = self
            .request(reqwest::Method::POST, path)
            .timeout(POST_TIMEOUT)
            .json(body)
            .send()
            .await?;
        self.handle_response(response).await
    }

    pub async fn post_form<T: Serialize + ?Sized>(
        &self,
        path: &str,
        fields: &T,
    ) -> Result<String, ClientError> {
        let response = self
            .request(reqwest::Method::POST, path)
            .timeout(POST_TIMEOUT)
            .form(fields)
            .send()
            .await?;
        self.handle_response(response).await
    }
}

fn read_pem(path: &str) -> Result<Vec<u8>, ClientError> {
    std::fs::read(path).map_err(|e| ClientError::Certificate {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> CheckinClient {
        CheckinClient::new(base, TransportConfig::default()).unwrap()
    }

    #[test]
    fn build_url_normalizes_slashes() {
        let c = client("https://fleet.example.com/");
        assert_eq!(c.build_url("checkin"), "https://fleet.example.com/checkin/");
        assert_eq!(c.build_url("/checkin/"), "https://fleet.example.com/checkin/");
        assert_eq!(
            c.build_url("inventory/hash/C02ABC123DEF"),
            "https://fleet.example.com/inventory/hash/C02ABC123DEF/"
        );
    }

    #[test]
    fn missing_ca_cert_is_a_certificate_error() {
        let result = CheckinClient::new(
            "https://fleet.example.com",
            TransportConfig {
                ca_cert: Some("/nonexistent/ca.pem".to_string()),
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(ClientError::Certificate { .. })));
    }
}
