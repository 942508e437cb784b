//! Cloudflare DNS record sink

use crate::dns::{DnsSink, RecordType};
use crate::error::{RelayError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;
use tracing::debug;

const CLOUDFLARE_API: &str = "https://api.cloudflare.com/client/v4";

/// TTL for relay records, in seconds
const RECORD_TTL: u32 = 300;

/// Upserts records through the Cloudflare v4 REST API
pub struct CloudflareDnsSink {
    client: Client,
    api_base: String,
    api_token: String,
    zone_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct DnsRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    r#type: String,
    name: String,
    content: String,
    ttl: u32,
    proxied: bool,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiError>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: u32,
    message: String,
}

impl CloudflareDnsSink {
    pub fn new(zone_id: impl Into<String>, api_token: impl Into<String>) -> Result<Self> {
        Self::with_api_base(CLOUDFLARE_API, zone_id, api_token)
    }

    /// Point the sink at a different API root
    pub fn with_api_base(
        api_base: impl Into<String>,
        zone_id: impl Into<String>,
        api_token: impl Into<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RelayError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_token: api_token.into(),
            zone_id: zone_id.into(),
        })
    }

    fn records_url(&self) -> String {
        format!("{}/zones/{}/dns_records", self.api_base, self.zone_id)
    }

    async fn find_record(&self, hostname: &str, record_type: RecordType) -> Result<Option<String>> {
        let response = self
            .client
            .get(self.records_url())
            .bearer_auth(&self.api_token)
            .query(&[("type", record_type.as_str()), ("name", hostname)])
            .send()
            .await?;

        let records: Vec<DnsRecord> = read_response(response).await?.unwrap_or_default();
        Ok(records.into_iter().find_map(|record| record.id))
    }
}

#[async_trait]
impl DnsSink for CloudflareDnsSink {
    async fn upsert(
        &self,
        hostname: &str,
        record_type: RecordType,
        address: IpAddr,
    ) -> Result<()> {
        let record = DnsRecord {
            id: None,
            r#type: record_type.as_str().to_string(),
            name: hostname.to_string(),
            content: address.to_string(),
            ttl: RECORD_TTL,
            proxied: false,
        };

        let request = match self.find_record(hostname, record_type).await? {
            Some(record_id) => {
                debug!(hostname, %record_id, "Updating existing {record_type} record");
                self.client
                    .put(format!("{}/{record_id}", self.records_url()))
            }
            None => {
                debug!(hostname, "Creating {record_type} record");
                self.client.post(self.records_url())
            }
        };

        let response = request
            .bearer_auth(&self.api_token)
            .json(&record)
            .send()
            .await?;
        read_response::<DnsRecord>(response).await?;
        Ok(())
    }
}

async fn read_response<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
) -> Result<Option<T>> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(RelayError::Dns(format!(
            "Cloudflare API returned {status}: {text}"
        )));
    }

    let body: ApiResponse<T> = response
        .json()
        .await
        .map_err(|e| RelayError::Dns(format!("Failed to parse Cloudflare response: {e}")))?;

    if !body.success {
        let errors: Vec<String> = body
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.code, e.message))
            .collect();
        return Err(RelayError::Dns(format!(
            "Cloudflare API error: {}",
            errors.join(", ")
        )));
    }

    Ok(body.result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::net::Ipv4Addr;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ZONE: &str = "zone123";
    const ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7));

    fn record_body(id: &str) -> serde_json::Value {
        json!({
            "success": true,
            "errors": [],
            "result": {
                "id": id,
                "type": "A",
                "name": "blog.alice.spacekit.io",
                "content": "203.0.113.7",
                "ttl": 300,
                "proxied": false
            }
        })
    }

    #[tokio::test]
    async fn test_creates_missing_record() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(format!("/zones/{ZONE}/dns_records")))
            .and(query_param("type", "A"))
            .and(query_param("name", "blog.alice.spacekit.io"))
            .and(header("authorization", "Bearer token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": true, "errors": [], "result": []})),
            )
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path(format!("/zones/{ZONE}/dns_records")))
            .and(body_partial_json(json!({
                "type": "A",
                "name": "blog.alice.spacekit.io",
                "content": "203.0.113.7"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(record_body("new-id")))
            .expect(1)
            .mount(&server)
            .await;

        let sink = CloudflareDnsSink::with_api_base(server.uri(), ZONE, "token").unwrap();
        sink.upsert("blog.alice.spacekit.io", RecordType::A, ADDRESS)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_updates_existing_record() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(format!("/zones/{ZONE}/dns_records")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "errors": [],
                "result": [{
                    "id": "rec-1",
                    "type": "A",
                    "name": "blog.alice.spacekit.io",
                    "content": "198.51.100.1",
                    "ttl": 300,
                    "proxied": false
                }]
            })))
            .mount(&server)
            .await;

        Mock::given(method("PUT"))
            .and(path(format!("/zones/{ZONE}/dns_records/rec-1")))
            .and(body_partial_json(json!({"content": "203.0.113.7"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(record_body("rec-1")))
            .expect(1)
            .mount(&server)
            .await;

        let sink = CloudflareDnsSink::with_api_base(server.uri(), ZONE, "token").unwrap();
        sink.upsert("blog.alice.spacekit.io", RecordType::A, ADDRESS)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_api_failure_is_reported() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "errors": [{"code": 10000, "message": "Authentication error"}],
                "result": null
            })))
            .mount(&server)
            .await;

        let sink = CloudflareDnsSink::with_api_base(server.uri(), ZONE, "bad").unwrap();
        let err = sink
            .upsert("blog.alice.spacekit.io", RecordType::A, ADDRESS)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Authentication error"));
    }
}
