use async_trait::async_trait;

use crate::types::{Challenge, ChallengeType};

pub mod powerdns;
pub mod static_dir;
pub mod webdav;

pub use powerdns::PowerDnsFulfillment;
pub use static_dir::StaticDirFulfillment;
pub use webdav::WebDavFulfillment;

/// Outcome of a fulfillment attempt. A hook that raises maps to the third
/// variant of the contract, `Failed(reason)`, via its `Err` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fulfillment {
    Handled,
    NotHandled,
}

/// Capability set for preparing and tearing down challenge responses. Every
/// hook defaults to "not supported"; implementations override the pairs for
/// the challenge types they can serve and declare those types in
/// [`challenge_types`](ChallengeFulfillment::challenge_types).
///
/// Hooks receive the precomputed key authorization, so implementations never
/// touch the account key.
#[async_trait]
pub trait ChallengeFulfillment: Send + Sync {
    /// Challenge types this handler can attempt, in preference order.
    fn challenge_types(&self) -> &'static [ChallengeType] {
        &[]
    }

    async fn fulfill_http_01(
        &self,
        _domain: &str,
        _challenge: &Challenge,
        _key_authorization: &str,
    ) -> anyhow::Result<Fulfillment> {
        Ok(Fulfillment::NotHandled)
    }

    async fn clear_http_01(&self, _domain: &str, _challenge: &Challenge) -> anyhow::Result<()> {
        Ok(())
    }

    async fn fulfill_dns_01(
        &self,
        _domain: &str,
        _challenge: &Challenge,
        _key_authorization: &str,
    ) -> anyhow::Result<Fulfillment> {
        Ok(Fulfillment::NotHandled)
    }

    async fn clear_dns_01(&self, _domain: &str, _challenge: &Challenge) -> anyhow::Result<()> {
        Ok(())
    }

    async fn fulfill_tls_alpn_01(
        &self,
        _domain: &str,
        _challenge: &Challenge,
        _key_authorization: &str,
    ) -> anyhow::Result<Fulfillment> {
        Ok(Fulfillment::NotHandled)
    }

    async fn clear_tls_alpn_01(&self, _domain: &str, _challenge: &Challenge) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Routes a fulfill call to the hook pair matching the challenge type.
pub(crate) async fn dispatch_fulfill(
    handler: &dyn ChallengeFulfillment,
    domain: &str,
    challenge: &Challenge,
    key_authorization: &str,
) -> anyhow::Result<Fulfillment> {
    match challenge.kind {
        ChallengeType::Http01 => {
            handler
                .fulfill_http_01(domain, challenge, key_authorization)
                .await
        }
        ChallengeType::Dns01 => {
            handler
                .fulfill_dns_01(domain, challenge, key_authorization)
                .await
        }
        ChallengeType::TlsAlpn01 => {
            handler
                .fulfill_tls_alpn_01(domain, challenge, key_authorization)
                .await
        }
        ChallengeType::Unknown => Ok(Fulfillment::NotHandled),
    }
}

pub(crate) async fn dispatch_clear(
    handler: &dyn ChallengeFulfillment,
    domain: &str,
    challenge: &Challenge,
) -> anyhow::Result<()> {
    match challenge.kind {
        ChallengeType::Http01 => handler.clear_http_01(domain, challenge).await,
        ChallengeType::Dns01 => handler.clear_dns_01(domain, challenge).await,
        ChallengeType::TlsAlpn01 => handler.clear_tls_alpn_01(domain, challenge).await,
        ChallengeType::Unknown => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use crate::types::ChallengeStatus;

    use super::*;

    struct Defaults;

    impl ChallengeFulfillment for Defaults {}

    fn challenge(kind: ChallengeType) -> Challenge {
        Challenge {
            kind,
            url: "https://ca.example/chal/1".to_string(),
            token: "tok".to_string(),
            status: ChallengeStatus::Pending,
            error: None,
        }
    }

    #[tokio::test]
    async fn test_every_hook_defaults_to_not_handled() {
        let handler = Defaults;
        assert!(handler.challenge_types().is_empty());
        for kind in [
            ChallengeType::Http01,
            ChallengeType::Dns01,
            ChallengeType::TlsAlpn01,
        ] {
            let outcome = dispatch_fulfill(&handler, "example.com", &challenge(kind), "ka")
                .await
                .unwrap();
            assert_eq!(outcome, Fulfillment::NotHandled);
            dispatch_clear(&handler, "example.com", &challenge(kind))
                .await
                .unwrap();
        }
    }
}
