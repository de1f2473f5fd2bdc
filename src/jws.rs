use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Serialize;

use crate::crypto::{AccountKey, Jwk};
use crate::error::AcmeResult;

pub const CONTENT_TYPE_JOSE_JSON: &str = "application/jose+json";

pub(crate) const ALG_RS256: &str = "RS256";

pub fn b64(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// JWS protected header. Exactly one of `jwk` and `kid` is set: `jwk` before
/// the account exists, `kid` afterwards.
#[derive(Serialize)]
pub struct ProtectedHeader<'a> {
    pub alg: &'a str,
    pub nonce: &'a str,
    pub url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwk: Option<&'a Jwk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<&'a str>,
}

/// Flattened JSON serialization of a single-signature JWS (RFC 7515 §7.2.2).
#[derive(Debug, Serialize)]
pub struct FlattenedJws {
    pub protected: String,
    pub payload: String,
    pub signature: String,
}

/// Signs a flattened JWS. `payload = None` produces a POST-as-GET body whose
/// payload is the empty string (not `"{}"`), signed over `protected || '.'`.
pub fn sign_flattened(
    key: &AccountKey,
    header: &ProtectedHeader<'_>,
    payload: Option<&serde_json::Value>,
) -> AcmeResult<FlattenedJws> {
    let protected_b64 = b64(serde_json::to_string(header)?.as_bytes());
    let payload_b64 = match payload {
        Some(value) => b64(serde_json::to_string(value)?.as_bytes()),
        None => String::new(),
    };

    let signing_input = format!("{protected_b64}.{payload_b64}");
    let signature = key.sign_rs256(signing_input.as_bytes())?;

    Ok(FlattenedJws {
        protected: protected_b64,
        payload: payload_b64,
        signature: b64(&signature),
    })
}

#[cfg(test)]
mod tests {
    use openssl::hash::MessageDigest;
    use openssl::sign::Verifier;

    use super::*;

    fn decode(value: &str) -> Vec<u8> {
        URL_SAFE_NO_PAD.decode(value).unwrap()
    }

    #[test]
    fn test_post_as_get_payload_is_empty_string() {
        let key = AccountKey::generate().unwrap();
        let jwk = key.jwk().unwrap();
        let header = ProtectedHeader {
            alg: ALG_RS256,
            nonce: "nonce-1",
            url: "https://ca.example/order/1",
            jwk: Some(&jwk),
            kid: None,
        };
        let jws = sign_flattened(&key, &header, None).unwrap();
        assert_eq!(jws.payload, "");

        let body = serde_json::to_value(&jws).unwrap();
        assert_eq!(body["payload"], "");
    }

    #[test]
    fn test_header_carries_jwk_xor_kid() {
        let key = AccountKey::generate().unwrap();
        let jwk = key.jwk().unwrap();

        let pre_account = ProtectedHeader {
            alg: ALG_RS256,
            nonce: "n",
            url: "https://ca.example/newAccount",
            jwk: Some(&jwk),
            kid: None,
        };
        let jws = sign_flattened(&key, &pre_account, Some(&serde_json::json!({}))).unwrap();
        let header: serde_json::Value = serde_json::from_slice(&decode(&jws.protected)).unwrap();
        assert!(header.get("jwk").is_some());
        assert!(header.get("kid").is_none());
        assert_eq!(header["alg"], "RS256");

        let post_account = ProtectedHeader {
            alg: ALG_RS256,
            nonce: "n",
            url: "https://ca.example/newOrder",
            jwk: None,
            kid: Some("https://ca.example/acct/1"),
        };
        let jws = sign_flattened(&key, &post_account, Some(&serde_json::json!({}))).unwrap();
        let header: serde_json::Value = serde_json::from_slice(&decode(&jws.protected)).unwrap();
        assert!(header.get("jwk").is_none());
        assert_eq!(header["kid"], "https://ca.example/acct/1");
    }

    #[test]
    fn test_signature_verifies_over_protected_dot_payload() {
        let key = AccountKey::generate().unwrap();
        let jwk = key.jwk().unwrap();
        let header = ProtectedHeader {
            alg: ALG_RS256,
            nonce: "nonce-2",
            url: "https://ca.example/newOrder",
            jwk: Some(&jwk),
            kid: None,
        };
        let payload = serde_json::json!({"identifiers": [{"type": "dns", "value": "a.test"}]});
        let jws = sign_flattened(&key, &header, Some(&payload)).unwrap();

        let signing_input = format!("{}.{}", jws.protected, jws.payload);
        let mut verifier = Verifier::new(MessageDigest::sha256(), key.pkey()).unwrap();
        verifier.update(signing_input.as_bytes()).unwrap();
        assert!(verifier.verify(&decode(&jws.signature)).unwrap());
    }
}
