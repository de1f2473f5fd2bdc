use anyhow::anyhow;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use ring::hmac;
use serde::Deserialize;

use crate::crypto::Jwk;
use crate::error::{AcmeError, AcmeResult};
use crate::jws::b64;

const ALG_HS256: &str = "HS256";

/// External Account Binding credentials issued by the CA: a key id and a
/// base64url (or standard base64) encoded HMAC key.
#[derive(Debug, Clone, Deserialize)]
pub struct EabCredentials {
    pub kid: String,
    #[serde(alias = "key")]
    pub hmac: String,
}

impl EabCredentials {
    pub fn new(kid: impl Into<String>, hmac: impl Into<String>) -> Self {
        Self {
            kid: kid.into(),
            hmac: hmac.into(),
        }
    }

    pub fn from_json(json: &str) -> AcmeResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Builds the `externalAccountBinding` sub-JWS for `newAccount`: an HS256
/// signature over the account JWK, keyed by the CA-issued MAC key.
pub fn external_account_binding(
    credentials: &EabCredentials,
    account_jwk: &Jwk,
    url: &str,
) -> AcmeResult<serde_json::Value> {
    let protected = serde_json::json!({
        "alg": ALG_HS256,
        "kid": credentials.kid,
        "url": url,
    });
    let protected_b64 = b64(serde_json::to_string(&protected)?.as_bytes());
    let payload_b64 = b64(serde_json::to_string(account_jwk)?.as_bytes());

    let key_bytes = decode_hmac_key(&credentials.hmac)?;
    let key = hmac::Key::new(hmac::HMAC_SHA256, &key_bytes);
    let signing_input = format!("{protected_b64}.{payload_b64}");
    let signature = hmac::sign(&key, signing_input.as_bytes());

    Ok(serde_json::json!({
        "protected": protected_b64,
        "payload": payload_b64,
        "signature": b64(signature.as_ref()),
    }))
}

fn decode_hmac_key(encoded: &str) -> AcmeResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(encoded)
        .or_else(|_| STANDARD.decode(encoded))
        .map_err(|err| AcmeError::Crypto(anyhow!("failed to decode EAB HMAC key: {err}")))
}
