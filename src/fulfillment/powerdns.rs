use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use tracing::{debug, warn};

use crate::crypto;
use crate::error::AcmeResult;
use crate::fulfillment::{ChallengeFulfillment, Fulfillment};
use crate::types::{Challenge, ChallengeType};

const HEADER_API_KEY: &str = "X-API-Key";
const CALL_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_SERVER_ID: &str = "localhost";
const DEFAULT_TTL: u32 = 60;
const DEFAULT_PROPAGATION_TIMEOUT: Duration = Duration::from_secs(60);
const PROPAGATION_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// `dns-01` fulfillment against a PowerDNS authoritative server: the TXT
/// digest is installed at `_acme-challenge.<domain>` through the HTTP API,
/// then a resolver is polled until the record is visible (or the propagation
/// budget runs out).
pub struct PowerDnsFulfillment {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    zone: String,
    server_id: String,
    ttl: u32,
    propagation_timeout: Duration,
}

impl PowerDnsFulfillment {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        zone: impl Into<String>,
    ) -> AcmeResult<Self> {
        let api_url = api_url.into();
        Ok(Self {
            http: reqwest::Client::builder().timeout(CALL_TIMEOUT).build()?,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            zone: zone.into(),
            server_id: DEFAULT_SERVER_ID.to_string(),
            ttl: DEFAULT_TTL,
            propagation_timeout: DEFAULT_PROPAGATION_TIMEOUT,
        })
    }

    #[must_use]
    pub fn server_id(mut self, server_id: impl Into<String>) -> Self {
        self.server_id = server_id.into();
        self
    }

    #[must_use]
    pub fn ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }

    /// Zero disables the propagation wait.
    #[must_use]
    pub fn propagation_timeout(mut self, timeout: Duration) -> Self {
        self.propagation_timeout = timeout;
        self
    }

    fn zone_url(&self) -> String {
        format!(
            "{}/api/v1/servers/{}/zones/{}",
            self.api_url, self.server_id, self.zone
        )
    }

    fn record_name(domain: &str) -> String {
        format!("_acme-challenge.{domain}.")
    }

    async fn patch_rrsets(&self, rrsets: serde_json::Value) -> Result<()> {
        let url = self.zone_url();
        let response = self
            .http
            .patch(&url)
            .header(HEADER_API_KEY, &self.api_key)
            .json(&serde_json::json!({ "rrsets": rrsets }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("powerdns api {url} answered {status}: {body}");
        }
        Ok(())
    }

    async fn wait_for_propagation(&self, record: &str, expected: &str) {
        if self.propagation_timeout.is_zero() {
            return;
        }
        let resolver = match TokioAsyncResolver::tokio_from_system_conf() {
            Ok(resolver) => resolver,
            Err(err) => {
                warn!("cannot build resolver for propagation check: {err}");
                return;
            }
        };

        let deadline = tokio::time::Instant::now() + self.propagation_timeout;
        loop {
            if let Ok(lookup) = resolver.txt_lookup(record.to_string()).await {
                for txt in lookup.iter() {
                    let value: String = txt
                        .txt_data()
                        .iter()
                        .map(|part| String::from_utf8_lossy(part).into_owned())
                        .collect();
                    if value == expected {
                        debug!("TXT record {record} propagated");
                        return;
                    }
                }
            }
            if tokio::time::Instant::now() + PROPAGATION_POLL_INTERVAL > deadline {
                warn!(
                    "TXT record {record} not visible after {:?}, proceeding anyway",
                    self.propagation_timeout
                );
                return;
            }
            tokio::time::sleep(PROPAGATION_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl ChallengeFulfillment for PowerDnsFulfillment {
    fn challenge_types(&self) -> &'static [ChallengeType] {
        &[ChallengeType::Dns01]
    }

    async fn fulfill_dns_01(
        &self,
        domain: &str,
        _challenge: &Challenge,
        key_authorization: &str,
    ) -> Result<Fulfillment> {
        let record = Self::record_name(domain);
        let value = crypto::dns01_txt_value(key_authorization);
        debug!("setting TXT {record} in zone {}", self.zone);
        self.patch_rrsets(serde_json::json!([{
            "name": record,
            "type": "TXT",
            "ttl": self.ttl,
            "changetype": "REPLACE",
            "records": [{
                "content": format!("\"{value}\""),
                "disabled": false,
            }],
        }]))
        .await?;

        self.wait_for_propagation(&record, &value).await;
        Ok(Fulfillment::Handled)
    }

    async fn clear_dns_01(&self, domain: &str, _challenge: &Challenge) -> Result<()> {
        let record = Self::record_name(domain);
        debug!("deleting TXT {record} from zone {}", self.zone);
        self.patch_rrsets(serde_json::json!([{
            "name": record,
            "type": "TXT",
            "changetype": "DELETE",
        }]))
        .await
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::types::ChallengeStatus;

    use super::*;

    fn challenge() -> Challenge {
        Challenge {
            kind: ChallengeType::Dns01,
            url: "https://ca.example/chal/1".to_string(),
            token: "tok-dns".to_string(),
            status: ChallengeStatus::Pending,
            error: None,
        }
    }

    fn handler(server: &MockServer) -> PowerDnsFulfillment {
        PowerDnsFulfillment::new(server.uri(), "pdns-key", "example.org")
            .unwrap()
            .propagation_timeout(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_fulfill_replaces_txt_rrset() {
        let server = MockServer::start().await;
        let expected_value = crypto::dns01_txt_value("ka-value");
        Mock::given(method("PATCH"))
            .and(path("/api/v1/servers/localhost/zones/example.org"))
            .and(header("x-api-key", "pdns-key"))
            .and(body_string_contains("_acme-challenge.www.example.org."))
            .and(body_string_contains("REPLACE"))
            .and(body_string_contains(expected_value.as_str()))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = handler(&server)
            .fulfill_dns_01("www.example.org", &challenge(), "ka-value")
            .await
            .unwrap();
        assert_eq!(outcome, Fulfillment::Handled);
    }

    #[tokio::test]
    async fn test_clear_deletes_txt_rrset() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/api/v1/servers/localhost/zones/example.org"))
            .and(body_string_contains("DELETE"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        handler(&server)
            .clear_dns_01("www.example.org", &challenge())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_api_error_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(422).set_body_string("zone not found"))
            .mount(&server)
            .await;

        let err = handler(&server)
            .fulfill_dns_01("www.example.org", &challenge(), "ka")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("422"));
    }

    #[tokio::test]
    async fn test_custom_server_id_and_ttl() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/api/v1/servers/ns1/zones/example.org"))
            .and(body_string_contains("\"ttl\":120"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let handler = PowerDnsFulfillment::new(server.uri(), "pdns-key", "example.org")
            .unwrap()
            .server_id("ns1")
            .ttl(120)
            .propagation_timeout(Duration::ZERO);
        handler
            .fulfill_dns_01("www.example.org", &challenge(), "ka")
            .await
            .unwrap();
    }
}
