use std::sync::Arc;
use std::time::Duration;

use reqwest::Response;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tracing::{debug, info, warn};

use crate::crypto::AccountKey;
use crate::eab::{self, EabCredentials};
use crate::error::{AcmeError, AcmeResult, Problem, ProblemKind};
use crate::fulfillment::ChallengeFulfillment;
use crate::jws::{self, ALG_RS256, CONTENT_TYPE_JOSE_JSON, ProtectedHeader};
use crate::state::ClientState;
use crate::types::{Authorization, Directory, Identifier, Order};

const HEADER_REPLAY_NONCE: &str = "replay-nonce";
const HEADER_LOCATION: &str = "location";
const CONTENT_TYPE_PEM_CHAIN: &str = "application/pem-certificate-chain";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(40);
const TRANSIENT_ATTEMPTS: u32 = 3;
const TRANSIENT_BASE_DELAY: Duration = Duration::from_secs(1);
const DIRECTORY_FETCH_ATTEMPTS: u32 = 3;
const DIRECTORY_FETCH_MAX_DELAY: Duration = Duration::from_secs(10);

/// An ACME client bound to one directory URL and one account key. A client
/// serves one logical session; run independent clients for parallel issuance.
pub struct AcmeClient {
    http: reqwest::Client,
    directory_url: String,
    directory: Option<Directory>,
    key: AccountKey,
    key_id: Option<String>,
    nonce: Option<String>,
    pub(crate) fulfillers: Vec<Arc<dyn ChallengeFulfillment>>,
}

impl AcmeClient {
    /// Creates a client with a freshly generated 2048-bit RSA account key.
    ///
    /// # Errors
    /// Returns an error if key generation or HTTP client construction fails.
    pub fn new(directory_url: impl Into<String>) -> AcmeResult<Self> {
        Self::with_key(directory_url, AccountKey::generate()?)
    }

    /// Creates a client around an existing account key.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_key(directory_url: impl Into<String>, key: AccountKey) -> AcmeResult<Self> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()?,
            directory_url: directory_url.into(),
            directory: None,
            key,
            key_id: None,
            nonce: None,
            fulfillers: Vec::new(),
        })
    }

    /// Restores a client from serialized state without contacting the CA.
    ///
    /// # Errors
    /// Returns an error if the key components are invalid.
    pub fn from_state(state: &ClientState) -> AcmeResult<Self> {
        let mut client = Self::with_key(state.directory.clone(), AccountKey::from_state(&state.key)?)?;
        client.key_id = state.account_url.clone();
        Ok(client)
    }

    /// Serializes the minimal resumable state: directory URL, private account
    /// key JWK, and the account URL when one exists.
    ///
    /// # Errors
    /// Returns an error if the key cannot be decomposed.
    pub fn state(&self) -> AcmeResult<ClientState> {
        Ok(ClientState {
            directory: self.directory_url.clone(),
            key: self.key.to_state()?,
            account_url: self.key_id.clone(),
            extra: serde_json::Map::new(),
        })
    }

    /// Registers a fulfillment handler. Registration order is the challenge
    /// preference order during dispatch.
    pub fn add_fulfillment(&mut self, fulfillment: Arc<dyn ChallengeFulfillment>) -> &mut Self {
        self.fulfillers.push(fulfillment);
        self
    }

    pub fn account_url(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    pub fn account_key(&self) -> &AccountKey {
        &self.key
    }

    pub(crate) fn require_account(&self) -> AcmeResult<()> {
        if self.key_id.is_none() {
            return Err(AcmeError::InvalidState(
                "account not registered; call new_account or restore serialized state first",
            ));
        }
        Ok(())
    }

    /// Fetches the directory document on first use and memoizes it.
    ///
    /// # Errors
    /// Returns an error if the fetch keeps failing or a mandatory endpoint is
    /// missing from the document.
    pub async fn directory(&mut self) -> AcmeResult<&Directory> {
        if self.directory.is_none() {
            info!("fetching ACME directory from {}", self.directory_url);
            let mut delay = TRANSIENT_BASE_DELAY;
            let mut last_err = None;
            for attempt in 1..=DIRECTORY_FETCH_ATTEMPTS {
                match self.try_fetch_directory().await {
                    Ok(directory) => {
                        self.directory = Some(directory);
                        last_err = None;
                        break;
                    }
                    Err(err) => {
                        last_err = Some(err);
                        if attempt < DIRECTORY_FETCH_ATTEMPTS {
                            warn!(
                                "directory fetch failed (attempt {attempt}/{DIRECTORY_FETCH_ATTEMPTS}), retrying in {delay:?}"
                            );
                            tokio::time::sleep(delay).await;
                            delay = (delay * 2).min(DIRECTORY_FETCH_MAX_DELAY);
                        }
                    }
                }
            }
            if let Some(err) = last_err {
                return Err(err);
            }
        }
        self.directory
            .as_ref()
            .ok_or(AcmeError::InvalidState("directory cache empty"))
    }

    async fn try_fetch_directory(&self) -> AcmeResult<Directory> {
        let response = self
            .http
            .get(&self.directory_url)
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AcmeError::Protocol(Problem::from_status(
                status.as_u16(),
                &body,
            )));
        }
        Ok(response.json::<Directory>().await?)
    }

    /// Returns the cached nonce if present, otherwise refills from the
    /// `newNonce` endpoint (`HEAD`, with a `GET` fallback).
    async fn get_nonce(&mut self) -> AcmeResult<String> {
        if let Some(nonce) = self.nonce.take() {
            return Ok(nonce);
        }

        let new_nonce_url = self.directory().await?.new_nonce.clone();
        debug!("fetching fresh nonce from {new_nonce_url}");
        let response = match self.http.head(&new_nonce_url).send().await {
            Ok(response) if response.headers().contains_key(HEADER_REPLAY_NONCE) => response,
            _ => self.http.get(&new_nonce_url).send().await?,
        };
        header_string(&response, HEADER_REPLAY_NONCE)
            .ok_or(AcmeError::MissingHeader("Replay-Nonce"))
    }

    fn remember_nonce(&mut self, response: &Response) {
        if let Some(nonce) = header_string(response, HEADER_REPLAY_NONCE) {
            self.nonce = Some(nonce);
        }
    }

    /// Signs and POSTs a request, refreshing the nonce from every response.
    /// A `badNonce` problem is retried exactly once with a fresh nonce;
    /// transport errors and 5xx answers are retried up to three times with
    /// exponential backoff.
    async fn post_signed(
        &mut self,
        url: &str,
        payload: Option<&serde_json::Value>,
        force_jwk: bool,
        accept: Option<&'static str>,
    ) -> AcmeResult<Response> {
        let mut nonce_retried = false;
        let mut transient = 0u32;
        let mut delay = TRANSIENT_BASE_DELAY;

        loop {
            let nonce = self.get_nonce().await?;
            let jwk;
            let header = if force_jwk || self.key_id.is_none() {
                jwk = self.key.jwk()?;
                ProtectedHeader {
                    alg: ALG_RS256,
                    nonce: &nonce,
                    url,
                    jwk: Some(&jwk),
                    kid: None,
                }
            } else {
                ProtectedHeader {
                    alg: ALG_RS256,
                    nonce: &nonce,
                    url,
                    jwk: None,
                    kid: self.key_id.as_deref(),
                }
            };
            let body = jws::sign_flattened(&self.key, &header, payload)?;

            debug!("POST {url}");
            let mut request = self
                .http
                .post(url)
                .header(CONTENT_TYPE, CONTENT_TYPE_JOSE_JSON)
                .json(&body);
            if let Some(accept) = accept {
                request = request.header(ACCEPT, accept);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(err) => {
                    if transient < TRANSIENT_ATTEMPTS {
                        transient += 1;
                        warn!("request to {url} failed ({err}), retrying in {delay:?}");
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                        continue;
                    }
                    return Err(err.into());
                }
            };
            self.remember_nonce(&response);

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            let body_text = response.text().await.unwrap_or_default();
            let problem = serde_json::from_str::<Problem>(&body_text)
                .unwrap_or_else(|_| Problem::from_status(status.as_u16(), &body_text));

            if problem.kind() == ProblemKind::BadNonce && !nonce_retried {
                nonce_retried = true;
                debug!("badNonce from {url}, retrying once with a fresh nonce");
                continue;
            }
            if status.is_server_error() && transient < TRANSIENT_ATTEMPTS {
                transient += 1;
                warn!("{url} answered {status}, retrying in {delay:?}");
                tokio::time::sleep(delay).await;
                delay *= 2;
                continue;
            }
            return Err(AcmeError::Protocol(problem));
        }
    }

    async fn post(&mut self, url: &str, payload: &serde_json::Value) -> AcmeResult<Response> {
        self.post_signed(url, Some(payload), false, None).await
    }

    async fn post_as_get(&mut self, url: &str) -> AcmeResult<Response> {
        self.post_signed(url, None, false, None).await
    }

    /// Creates (or fetches) the account for this key and captures its URL as
    /// the JWS `kid`. A server answering with an existing account is not an
    /// error. Adds an `externalAccountBinding` when credentials are supplied;
    /// fails fast when the directory requires one and none is available.
    ///
    /// # Errors
    /// Returns an error on protocol failure or missing EAB credentials.
    pub async fn new_account(
        &mut self,
        email: &str,
        eab: Option<&EabCredentials>,
    ) -> AcmeResult<String> {
        let directory = self.directory().await?;
        let url = directory.new_account.clone();
        let eab_required = directory
            .meta
            .as_ref()
            .is_some_and(|meta| meta.external_account_required);

        let mut payload = serde_json::json!({
            "termsOfServiceAgreed": true,
            "contact": [contact_from_email(email)],
        });
        if let Some(credentials) = eab {
            payload["externalAccountBinding"] =
                eab::external_account_binding(credentials, &self.key.jwk()?, &url)?;
        } else if eab_required {
            return Err(AcmeError::InvalidState(
                "directory requires external account binding credentials",
            ));
        }

        info!("registering account at {url}");
        let response = self.post_signed(&url, Some(&payload), true, None).await?;
        let kid =
            header_string(&response, HEADER_LOCATION).ok_or(AcmeError::MissingHeader("Location"))?;
        info!("account registered: {kid}");
        self.key_id = Some(kid.clone());
        Ok(kid)
    }

    /// Revokes a certificate under the current account key.
    ///
    /// # Errors
    /// Returns an error if no account is bound, the directory has no
    /// `revokeCert` endpoint, or the server rejects the request.
    pub async fn revoke(&mut self, cert_pem: &[u8], reason: u32) -> AcmeResult<()> {
        self.require_account()?;
        let url = self
            .directory()
            .await?
            .revoke_cert
            .clone()
            .ok_or(AcmeError::InvalidState("directory has no revokeCert endpoint"))?;

        let der = openssl::x509::X509::from_pem(cert_pem)?.to_der()?;
        let payload = serde_json::json!({
            "certificate": jws::b64(&der),
            "reason": reason,
        });
        info!("revoking certificate via {url}");
        self.post_signed(&url, Some(&payload), false, None).await?;
        Ok(())
    }

    pub(crate) async fn new_order(&mut self, domain: &str) -> AcmeResult<Order> {
        let url = self.directory().await?.new_order.clone();
        let payload = serde_json::json!({
            "identifiers": [Identifier::for_value(domain)],
        });

        info!("creating order for {domain}");
        let response = self.post(&url, &payload).await?;
        let order_url = header_string(&response, HEADER_LOCATION);
        let mut order: Order = response.json().await?;
        order.url = order_url;
        Ok(order)
    }

    pub(crate) async fn fetch_authorization(&mut self, url: &str) -> AcmeResult<Authorization> {
        let response = self.post_as_get(url).await?;
        Ok(response.json().await?)
    }

    pub(crate) async fn fetch_order(&mut self, url: &str) -> AcmeResult<Order> {
        let response = self.post_as_get(url).await?;
        let mut order: Order = response.json().await?;
        order.url = Some(url.to_string());
        Ok(order)
    }

    /// Signals challenge readiness by POSTing the empty JSON object.
    pub(crate) async fn respond_challenge(&mut self, url: &str) -> AcmeResult<()> {
        debug!("responding to challenge at {url}");
        self.post(url, &serde_json::json!({})).await?;
        Ok(())
    }

    pub(crate) async fn finalize_order(&mut self, url: &str, csr_der: &[u8]) -> AcmeResult<Order> {
        let payload = serde_json::json!({ "csr": jws::b64(csr_der) });
        info!("finalizing order at {url}");
        let response = self
            .post_signed(url, Some(&payload), false, Some(CONTENT_TYPE_PEM_CHAIN))
            .await?;
        Ok(response.json().await?)
    }

    pub(crate) async fn download_certificate(&mut self, url: &str) -> AcmeResult<String> {
        info!("downloading certificate from {url}");
        let response = self
            .post_signed(url, None, false, Some(CONTENT_TYPE_PEM_CHAIN))
            .await?;
        Ok(response.text().await?)
    }
}

fn header_string(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string)
}

fn contact_from_email(email: &str) -> String {
    if email.starts_with("mailto:") {
        email.to_string()
    } else {
        format!("mailto:{email}")
    }
}
