//! The certificate issuance orchestration: order placement, sequential
//! authorization handling with the fulfill/clear bracket, finalization
//! polling, and chain download.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use openssl::x509::X509Req;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::client::AcmeClient;
use crate::error::{AcmeError, AcmeResult};
use crate::fulfillment::{self, ChallengeFulfillment, Fulfillment};
use crate::types::{AuthorizationStatus, Challenge, OrderStatus};

const POLL_INITIAL_DELAY: Duration = Duration::from_secs(1);
const POLL_MAX_DELAY: Duration = Duration::from_secs(30);
const POLL_BUDGET: Duration = Duration::from_secs(300);

/// Exponential poll backoff: 1 s doubling to a 30 s cap, under a 300 s
/// total budget.
struct Backoff {
    delay: Duration,
    deadline: Instant,
}

impl Backoff {
    fn new() -> Self {
        Self::with_budget(POLL_BUDGET)
    }

    fn with_budget(budget: Duration) -> Self {
        Self {
            delay: POLL_INITIAL_DELAY,
            deadline: Instant::now() + budget,
        }
    }

    /// The next sleep interval, or `None` once the budget is spent.
    fn next(&mut self) -> Option<Duration> {
        if Instant::now() + self.delay > self.deadline {
            return None;
        }
        let delay = self.delay;
        self.delay = (self.delay * 2).min(POLL_MAX_DELAY);
        Some(delay)
    }
}

/// Guards a fulfilled challenge so its clear hook runs on every exit path.
/// Dropping an armed guard (unwind or task cancellation) spawns the hook on
/// the runtime; the normal path awaits it inline via [`clear`](Self::clear).
struct CleanupGuard {
    handler: Arc<dyn ChallengeFulfillment>,
    domain: String,
    challenge: Challenge,
    armed: bool,
}

impl CleanupGuard {
    fn new(handler: Arc<dyn ChallengeFulfillment>, domain: &str, challenge: Challenge) -> Self {
        Self {
            handler,
            domain: domain.to_string(),
            challenge,
            armed: true,
        }
    }

    async fn clear(mut self) {
        self.armed = false;
        if let Err(err) =
            fulfillment::dispatch_clear(self.handler.as_ref(), &self.domain, &self.challenge).await
        {
            warn!(
                "cleanup hook for {} challenge failed: {err}",
                self.challenge.kind
            );
        }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let handler = Arc::clone(&self.handler);
        let domain = std::mem::take(&mut self.domain);
        let challenge = self.challenge.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if let Err(err) =
                    fulfillment::dispatch_clear(handler.as_ref(), &domain, &challenge).await
                {
                    warn!("cleanup hook for {} challenge failed: {err}", challenge.kind);
                }
            });
        }
    }
}

impl AcmeClient {
    /// Obtains a certificate chain for `domain` using the supplied CSR.
    ///
    /// Places an order, works through its authorizations sequentially (the
    /// fulfillment handlers registered first get first pick of challenge
    /// types), finalizes, polls to completion, and returns the PEM chain
    /// verbatim, leaf first.
    ///
    /// # Errors
    /// Returns an error when no account is bound, a challenge cannot be
    /// fulfilled, an authorization or the order finalizes as invalid, a
    /// polling budget runs out, or the CA reports a problem.
    pub async fn sign(&mut self, domain: &str, csr: &X509Req) -> AcmeResult<String> {
        self.require_account()?;
        let csr_der = csr.to_der()?;

        let order = self.new_order(domain).await?;
        let order_url = order.url.clone();

        for authz_url in &order.authorizations {
            self.process_authorization(domain, authz_url).await?;
        }

        let mut order = self.finalize_order(&order.finalize, &csr_der).await?;
        let mut backoff = Backoff::new();
        loop {
            match order.status {
                OrderStatus::Valid => break,
                OrderStatus::Invalid => {
                    return Err(AcmeError::OrderFailed {
                        problem: order.error,
                    });
                }
                OrderStatus::Pending | OrderStatus::Ready | OrderStatus::Processing => {
                    let poll_url = order_url
                        .as_deref()
                        .ok_or(AcmeError::MissingHeader("Location"))?;
                    let Some(delay) = backoff.next() else {
                        return Err(AcmeError::Timeout("order finalization"));
                    };
                    debug!("order {:?}, polling again in {delay:?}", order.status);
                    tokio::time::sleep(delay).await;
                    order = self.fetch_order(poll_url).await?;
                }
            }
        }

        let certificate_url = order
            .certificate
            .ok_or(AcmeError::MissingField("certificate"))?;
        self.download_certificate(&certificate_url).await
    }

    /// Brings one authorization to `valid`: skips already-valid ones, picks
    /// the first challenge a registered handler accepts, triggers validation
    /// and polls, clearing the challenge response on every exit path.
    async fn process_authorization(&mut self, domain: &str, authz_url: &str) -> AcmeResult<()> {
        debug!("fetching authorization {authz_url}");
        let authz = self.fetch_authorization(authz_url).await?;
        let identifier = authz.identifier.value.clone();
        match authz.status {
            AuthorizationStatus::Valid => {
                debug!("authorization for {identifier} already valid, skipping");
                return Ok(());
            }
            AuthorizationStatus::Pending => {}
            status => {
                warn!("authorization for {identifier} is {status:?}");
                return Err(AcmeError::AuthorizationFailed {
                    identifier,
                    problem: None,
                });
            }
        }

        let handlers = self.fulfillers.clone();
        for handler in &handlers {
            for kind in handler.challenge_types() {
                let Some(challenge) = authz.challenges.iter().find(|c| c.kind == *kind) else {
                    continue;
                };
                let key_authorization = self.account_key().key_authorization(&challenge.token)?;
                match fulfillment::dispatch_fulfill(
                    handler.as_ref(),
                    domain,
                    challenge,
                    &key_authorization,
                )
                .await
                {
                    Ok(Fulfillment::Handled) => {
                        info!("{kind} challenge fulfilled for {domain}");
                        let guard =
                            CleanupGuard::new(Arc::clone(handler), domain, challenge.clone());
                        let result = self.complete_challenge(authz_url, challenge).await;
                        guard.clear().await;
                        return result;
                    }
                    Ok(Fulfillment::NotHandled) => {
                        debug!("{kind} handler declined challenge for {domain}");
                    }
                    Err(err) => {
                        if let Err(clear_err) =
                            fulfillment::dispatch_clear(handler.as_ref(), domain, challenge).await
                        {
                            warn!("cleanup after failed fulfillment also failed: {clear_err}");
                        }
                        return Err(AcmeError::FulfillmentFailed(err));
                    }
                }
            }
        }
        Err(AcmeError::FulfillmentFailed(anyhow!(
            "no registered handler accepted a challenge for {identifier}"
        )))
    }

    /// Signals readiness for a fulfilled challenge (exactly one POST) and
    /// polls the authorization until it leaves `pending`.
    async fn complete_challenge(&mut self, authz_url: &str, challenge: &Challenge) -> AcmeResult<()> {
        self.respond_challenge(&challenge.url).await?;

        let mut backoff = Backoff::new();
        loop {
            let authz = self.fetch_authorization(authz_url).await?;
            match authz.status {
                AuthorizationStatus::Valid => {
                    info!("authorization for {} valid", authz.identifier.value);
                    return Ok(());
                }
                AuthorizationStatus::Pending => {}
                status => {
                    warn!(
                        "authorization for {} finalized as {status:?}",
                        authz.identifier.value
                    );
                    let problem = authz
                        .challenges
                        .iter()
                        .find(|c| c.url == challenge.url)
                        .and_then(|c| c.error.clone());
                    return Err(AcmeError::AuthorizationFailed {
                        identifier: authz.identifier.value,
                        problem,
                    });
                }
            }
            let Some(delay) = backoff.next() else {
                return Err(AcmeError::Timeout("authorization"));
            };
            tokio::time::sleep(delay).await;
        }
    }
}
