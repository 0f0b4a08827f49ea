//! Cloudflare DNS Backend
//!
//! Record lookup, creation and removal for a single zone through the
//! Cloudflare v4 REST API.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::record::{DnsError, RecordBackend, RecordLookup, RecordType};

const CLOUDFLARE_API: &str = "https://api.cloudflare.com/client/v4";

/// Default TTL for created records, in seconds
pub const DEFAULT_TTL: u32 = 86400;

// ============================================================
// API Response Types
// ============================================================

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiError>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct Zone {
    id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct DnsRecord {
    id: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct CreateRecordRequest<'a> {
    #[serde(rename = "type")]
    record_type: RecordType,
    name: &'a str,
    content: &'a str,
    ttl: u32,
    proxied: bool,
}

impl<T> ApiResponse<T> {
    fn into_result(self) -> Result<Option<T>, DnsError> {
        if !self.success {
            let errors: Vec<String> = self.errors.into_iter().map(|e| e.message).collect();
            return Err(DnsError::Backend(format!(
                "Cloudflare API error: {}",
                errors.join(", ")
            )));
        }
        Ok(self.result)
    }
}

// ============================================================
// Client Implementation
// ============================================================

/// Cloudflare-hosted zone acting as the DNS authority
pub struct CloudflareDnsBackend {
    client: Client,
    api_base: String,
    api_token: String,
    zone_name: String,
    zone_id: OnceCell<String>,
    ttl: u32,
}

impl CloudflareDnsBackend {
    pub fn new(api_token: String, zone_name: String) -> Result<Self, DnsError> {
        let client = Client::builder()
            .user_agent(concat!("dns-proxy/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| DnsError::Backend(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base: CLOUDFLARE_API.to_string(),
            api_token,
            zone_name,
            zone_id: OnceCell::new(),
            ttl: DEFAULT_TTL,
        })
    }

    /// Point at a different API endpoint
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn zone_name(&self) -> &str {
        &self.zone_name
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        action: &str,
    ) -> Result<Option<T>, DnsError> {
        let response: ApiResponse<T> = request
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| DnsError::Backend(format!("Failed to {}: {}", action, e)))?
            .json()
            .await
            .map_err(|e| DnsError::Backend(format!("Failed to parse {} response: {}", action, e)))?;

        response.into_result()
    }

    /// Zone ID, looked up once by name
    async fn zone_id(&self) -> Result<&str, DnsError> {
        let id = self
            .zone_id
            .get_or_try_init(|| async {
                debug!("Looking up zone ID for: {}", self.zone_name);

                let url = format!("{}/zones", self.api_base);
                let zones: Vec<Zone> = self
                    .send(
                        self.client.get(&url).query(&[("name", &self.zone_name)]),
                        "query zones",
                    )
                    .await?
                    .unwrap_or_default();

                zones
                    .into_iter()
                    .next()
                    .map(|zone| zone.id)
                    .ok_or_else(|| DnsError::Backend(format!("Zone not found: {}", self.zone_name)))
            })
            .await?;

        Ok(id)
    }

    async fn records(&self, name: &str, record_type: RecordType) -> Result<Vec<DnsRecord>, DnsError> {
        let zone_id = self.zone_id().await?;
        let url = format!("{}/zones/{}/dns_records", self.api_base, zone_id);
        let record_type = record_type.to_string();

        let records: Vec<DnsRecord> = self
            .send(
                self.client
                    .get(&url)
                    .query(&[("type", record_type.as_str()), ("name", name)]),
                "list DNS records",
            )
            .await?
            .unwrap_or_default();

        Ok(records)
    }
}

#[async_trait]
impl RecordLookup for CloudflareDnsBackend {
    async fn lookup(&self, name: &str, record_type: RecordType) -> Result<Vec<String>, DnsError> {
        let records = self.records(name, record_type).await?;
        Ok(records.into_iter().map(|record| record.content).collect())
    }
}

#[async_trait]
impl RecordBackend for CloudflareDnsBackend {
    async fn create(&self, name: &str, value: &str, record_type: RecordType) -> Result<(), DnsError> {
        let zone_id = self.zone_id().await?;
        let url = format!("{}/zones/{}/dns_records", self.api_base, zone_id);

        let request = CreateRecordRequest {
            record_type,
            name,
            content: value,
            ttl: self.ttl,
            proxied: false,
        };

        let created: Option<serde_json::Value> = self
            .send(self.client.post(&url).json(&request), "create DNS record")
            .await?;
        debug!("Created record: {:?}", created.as_ref().and_then(|r| r.get("id")));
        Ok(())
    }

    async fn remove(&self, name: &str, record_type: RecordType) -> Result<(), DnsError> {
        let records = self.records(name, record_type).await?;
        if records.is_empty() {
            return Err(DnsError::NotFound(format!(
                "Cannot find DNS entry for {}",
                name
            )));
        }

        let zone_id = self.zone_id().await?;
        for record in records {
            let url = format!("{}/zones/{}/dns_records/{}", self.api_base, zone_id, record.id);
            let _: Option<serde_json::Value> = self
                .send(self.client.delete(&url), "delete DNS record")
                .await?;
        }
        Ok(())
    }
}
