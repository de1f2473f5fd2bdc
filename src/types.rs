use serde::{Deserialize, Serialize};

use crate::error::Problem;

/// ACME directory document. Deserialization fails when any of the three
/// mandatory endpoints is missing, which doubles as the validation step.
#[derive(Debug, Deserialize, Clone)]
pub struct Directory {
    #[serde(rename = "newNonce")]
    pub new_nonce: String,
    #[serde(rename = "newAccount")]
    pub new_account: String,
    #[serde(rename = "newOrder")]
    pub new_order: String,
    #[serde(rename = "revokeCert")]
    pub revoke_cert: Option<String>,
    #[serde(rename = "keyChange")]
    pub key_change: Option<String>,
    pub meta: Option<DirectoryMeta>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DirectoryMeta {
    #[serde(rename = "termsOfService")]
    pub terms_of_service: Option<String>,
    #[serde(rename = "externalAccountRequired", default)]
    pub external_account_required: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub kind: IdentifierKind,
    pub value: String,
}

impl Identifier {
    /// Classifies the value as `ip` when it parses as an address, `dns`
    /// otherwise.
    pub fn for_value(value: &str) -> Self {
        let kind = if value.parse::<std::net::IpAddr>().is_ok() {
            IdentifierKind::Ip
        } else {
            IdentifierKind::Dns
        };
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierKind {
    Dns,
    Ip,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeType {
    #[serde(rename = "http-01")]
    Http01,
    #[serde(rename = "dns-01")]
    Dns01,
    #[serde(rename = "tls-alpn-01")]
    TlsAlpn01,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ChallengeType::Http01 => "http-01",
            ChallengeType::Dns01 => "dns-01",
            ChallengeType::TlsAlpn01 => "tls-alpn-01",
            ChallengeType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Order {
    pub status: OrderStatus,
    #[serde(default)]
    pub identifiers: Vec<Identifier>,
    pub finalize: String,
    pub authorizations: Vec<String>,
    pub certificate: Option<String>,
    pub error: Option<Problem>,
    /// Order URL from the `Location` header, not part of the wire body.
    #[serde(skip)]
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Authorization {
    pub status: AuthorizationStatus,
    pub identifier: Identifier,
    pub challenges: Vec<Challenge>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Challenge {
    #[serde(rename = "type")]
    pub kind: ChallengeType,
    pub url: String,
    #[serde(default)]
    pub token: String,
    pub status: ChallengeStatus,
    pub error: Option<Problem>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_status_deserialization() {
        let cases = vec![
            ("\"pending\"", OrderStatus::Pending),
            ("\"ready\"", OrderStatus::Ready),
            ("\"processing\"", OrderStatus::Processing),
            ("\"valid\"", OrderStatus::Valid),
            ("\"invalid\"", OrderStatus::Invalid),
        ];
        for (json, expected) in cases {
            let status: OrderStatus = serde_json::from_str(json).unwrap();
            assert_eq!(status, expected);
        }
    }

    #[test]
    fn test_challenge_type_deserialization() {
        let cases = vec![
            (r#""http-01""#, ChallengeType::Http01),
            (r#""dns-01""#, ChallengeType::Dns01),
            (r#""tls-alpn-01""#, ChallengeType::TlsAlpn01),
            (r#""dns-account-01""#, ChallengeType::Unknown),
        ];
        for (json, expected) in cases {
            let kind: ChallengeType = serde_json::from_str(json).unwrap();
            assert_eq!(kind, expected);
        }
    }

    #[test]
    fn test_identifier_classification() {
        assert_eq!(
            Identifier::for_value("example.com").kind,
            IdentifierKind::Dns
        );
        assert_eq!(Identifier::for_value("192.0.2.1").kind, IdentifierKind::Ip);
        assert_eq!(Identifier::for_value("2001:db8::1").kind, IdentifierKind::Ip);
    }

    #[test]
    fn test_directory_requires_core_endpoints() {
        let err = serde_json::from_str::<Directory>(
            r#"{"newNonce":"https://ca/nonce","newAccount":"https://ca/acct"}"#,
        );
        assert!(err.is_err());

        let dir: Directory = serde_json::from_str(
            r#"{
                "newNonce": "https://ca/nonce",
                "newAccount": "https://ca/acct",
                "newOrder": "https://ca/order",
                "meta": {"termsOfService": "https://ca/tos", "externalAccountRequired": true}
            }"#,
        )
        .unwrap();
        assert!(dir.meta.unwrap().external_account_required);
        assert!(dir.revoke_cert.is_none());
    }

    #[test]
    fn test_authorization_with_unknown_challenge_type() {
        let authz: Authorization = serde_json::from_str(
            r#"{
                "status": "pending",
                "identifier": {"type": "dns", "value": "example.com"},
                "challenges": [
                    {"type": "onion-csr-01", "url": "https://ca/chal/1", "status": "pending"},
                    {"type": "http-01", "url": "https://ca/chal/2", "token": "tok", "status": "pending"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(authz.challenges[0].kind, ChallengeType::Unknown);
        assert_eq!(authz.challenges[1].kind, ChallengeType::Http01);
        assert_eq!(authz.challenges[1].token, "tok");
    }
}
