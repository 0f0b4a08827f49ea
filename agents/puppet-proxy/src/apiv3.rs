//! Puppet Server v3 API Client
//!
//! Talks to the `environments` and `environment_classes` endpoints of a
//! Puppet server over (optionally mutually authenticated) TLS.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, ETAG, IF_NONE_MATCH};
use reqwest::{Certificate, Client, Identity, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use crate::source::{ClassSource, EnvironmentSource, FetchResult};
use crate::types::{ClassesError, ClassesPayload, Environment};

/// Connection settings for the Puppet server
#[derive(Debug, Clone)]
pub struct PuppetApiConfig {
    /// Base URL, e.g. `https://puppet.example.com:8140`
    pub url: String,
    /// CA certificate used to verify the server (PEM)
    pub ssl_ca: Option<PathBuf>,
    /// Client certificate (PEM)
    pub ssl_cert: Option<PathBuf>,
    /// Client private key (PEM)
    pub ssl_key: Option<PathBuf>,
}

impl PuppetApiConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ssl_ca: None,
            ssl_cert: None,
            ssl_key: None,
        }
    }
}

/// Puppet v3 API client
pub struct PuppetApiClient {
    client: Client,
    base_url: String,
}

// ============================================================
// API Response Types
// ============================================================

#[derive(Debug, Deserialize)]
struct EnvironmentsResponse {
    #[serde(default)]
    environments: BTreeMap<String, EnvironmentEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct EnvironmentEntry {
    #[serde(default)]
    settings: EnvironmentSettings,
}

#[derive(Debug, Default, Deserialize)]
struct EnvironmentSettings {
    #[serde(default)]
    modulepath: Vec<String>,
}

// ============================================================
// Client Implementation
// ============================================================

impl PuppetApiClient {
    /// Create a client, loading any configured TLS material from disk
    pub fn new(config: &PuppetApiConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .use_rustls_tls()
            .user_agent(concat!("puppet-proxy/", env!("CARGO_PKG_VERSION")));

        if let Some(ca) = &config.ssl_ca {
            let pem = std::fs::read(ca)
                .with_context(|| format!("Failed to read Puppet CA certificate {}", ca.display()))?;
            let certificate =
                Certificate::from_pem(&pem).context("Failed to parse Puppet CA certificate")?;
            builder = builder.add_root_certificate(certificate);
        }

        if let (Some(cert), Some(key)) = (&config.ssl_cert, &config.ssl_key) {
            let mut pem = std::fs::read(cert)
                .with_context(|| format!("Failed to read client certificate {}", cert.display()))?;
            pem.extend(
                std::fs::read(key)
                    .with_context(|| format!("Failed to read client key {}", key.display()))?,
            );
            let identity = Identity::from_pem(&pem).context("Failed to parse client identity")?;
            builder = builder.identity(identity);
        }

        let client = builder.build().context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }

    fn unavailable(url: &str, error: impl std::fmt::Display) -> ClassesError {
        ClassesError::RemoteUnavailable(format!("{}: {}", url, error))
    }
}

#[async_trait]
impl ClassSource for PuppetApiClient {
    async fn fetch(
        &self,
        environment: &str,
        token: Option<&str>,
        deadline: Duration,
    ) -> Result<FetchResult, ClassesError> {
        let url = format!(
            "{}/puppet/v3/environment_classes?environment={}",
            self.base_url,
            urlencoding::encode(environment)
        );

        let mut request = self
            .client
            .get(&url)
            .timeout(deadline)
            .header(ACCEPT, "application/json");
        if let Some(token) = token {
            request = request.header(IF_NONE_MATCH, token);
        }

        debug!("GET {} (If-None-Match: {:?})", url, token);
        let response = request
            .send()
            .await
            .map_err(|e| Self::unavailable(&url, e))?;

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        match response.status() {
            StatusCode::OK => {
                let payload: ClassesPayload = response
                    .json()
                    .await
                    .map_err(|e| Self::unavailable(&url, e))?;
                Ok(FetchResult::Fresh {
                    payload,
                    token: etag,
                })
            }
            StatusCode::NOT_MODIFIED => Ok(FetchResult::NotModified {
                token: etag.or_else(|| token.map(str::to_string)),
            }),
            StatusCode::NOT_FOUND => Err(ClassesError::EnvironmentNotFound(environment.to_string())),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(Self::unavailable(
                    &url,
                    format!("Puppet returned {}: {}", status, body),
                ))
            }
        }
    }
}

#[async_trait]
impl EnvironmentSource for PuppetApiClient {
    /// All environments, sorted by name
    async fn environments(&self) -> Result<Vec<Environment>, ClassesError> {
        let url = format!("{}/puppet/v3/environments", self.base_url);

        debug!("GET {}", url);
        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| Self::unavailable(&url, e))?;

        if !response.status().is_success() {
            return Err(Self::unavailable(
                &url,
                format!("Puppet returned {}", response.status()),
            ));
        }

        let body: EnvironmentsResponse = response
            .json()
            .await
            .map_err(|e| Self::unavailable(&url, e))?;

        Ok(body
            .environments
            .into_iter()
            .map(|(name, entry)| Environment::new(name, entry.settings.modulepath))
            .collect())
    }
}
