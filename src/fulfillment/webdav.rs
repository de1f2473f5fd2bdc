use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::error::AcmeResult;
use crate::fulfillment::{ChallengeFulfillment, Fulfillment};
use crate::types::{Challenge, ChallengeType};

const CALL_TIMEOUT: Duration = Duration::from_secs(30);
const ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// `http-01` fulfillment that uploads the key authorization over WebDAV to
/// the host serving the domain, with HTTP Basic auth. 5xx answers are retried
/// three times with a one-second backoff.
pub struct WebDavFulfillment {
    http: reqwest::Client,
    username: String,
    password: String,
}

impl WebDavFulfillment {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> AcmeResult<Self> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(CALL_TIMEOUT).build()?,
            username: username.into(),
            password: password.into(),
        })
    }

    fn challenge_url(domain: &str, token: &str) -> String {
        format!("http://{domain}/.well-known/acme-challenge/{token}")
    }

    async fn send_with_retry(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let cloned = request
                .try_clone()
                .context("webdav request has no clonable body")?;
            let response = cloned.send().await?;
            if response.status().is_server_error() && attempt < ATTEMPTS {
                warn!(
                    "webdav call answered {}, retrying ({attempt}/{ATTEMPTS})",
                    response.status()
                );
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }
            return Ok(response);
        }
    }
}

#[async_trait]
impl ChallengeFulfillment for WebDavFulfillment {
    fn challenge_types(&self) -> &'static [ChallengeType] {
        &[ChallengeType::Http01]
    }

    async fn fulfill_http_01(
        &self,
        domain: &str,
        challenge: &Challenge,
        key_authorization: &str,
    ) -> Result<Fulfillment> {
        let url = Self::challenge_url(domain, &challenge.token);
        debug!("uploading http-01 response to {url}");
        let request = self
            .http
            .put(&url)
            .basic_auth(&self.username, Some(&self.password))
            .body(key_authorization.to_string());
        let response = self.send_with_retry(request).await?;
        if !response.status().is_success() {
            bail!("webdav upload to {url} answered {}", response.status());
        }
        Ok(Fulfillment::Handled)
    }

    async fn clear_http_01(&self, domain: &str, challenge: &Challenge) -> Result<()> {
        let url = Self::challenge_url(domain, &challenge.token);
        debug!("deleting http-01 response at {url}");
        let request = self
            .http
            .delete(&url)
            .basic_auth(&self.username, Some(&self.password));
        let response = self.send_with_retry(request).await?;
        let status = response.status();
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            bail!("webdav delete of {url} answered {status}");
        }
        Ok(())
    }
}
