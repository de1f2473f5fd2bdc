use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::AcmeResult;

/// The minimal state needed to resume a client: directory URL, private
/// account key as a JWK, and the account URL once one exists. Fields this
/// implementation does not know about survive a round-trip.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ClientState {
    pub directory: String,
    pub key: KeyState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Private RSA key in JWK form. All integers are base64url without padding,
/// big-endian with leading zeros stripped.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct KeyState {
    pub n: String,
    pub e: String,
    pub d: String,
    pub p: String,
    pub q: String,
    pub dp: String,
    pub dq: String,
    pub qi: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ClientState {
    pub fn to_json(&self) -> AcmeResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> AcmeResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> AcmeResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn save(&self, path: &Path) -> AcmeResult<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state_json() -> &'static str {
        r#"{
            "directory": "https://ca.example/directory",
            "key": {
                "n": "sXchTqMkbqV4cCJVYXdnbg",
                "e": "AQAB",
                "d": "Jd3Yl4Zf2Q",
                "p": "7eWV2Q",
                "q": "0bGsYw",
                "dp": "BQJdjw",
                "dq": "Cg5Nqw",
                "qi": "DRT2xw",
                "kid_hint": "spare"
            },
            "account_url": "https://ca.example/acct/17",
            "issued_at": "2024-06-01T00:00:00Z"
        }"#
    }

    #[test]
    fn test_round_trip_preserves_state() {
        let state = ClientState::from_json(sample_state_json()).unwrap();
        let reparsed = ClientState::from_json(&state.to_json().unwrap()).unwrap();
        assert_eq!(state, reparsed);
    }

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let state = ClientState::from_json(sample_state_json()).unwrap();
        assert_eq!(
            state.extra.get("issued_at").and_then(Value::as_str),
            Some("2024-06-01T00:00:00Z")
        );
        assert_eq!(
            state.key.extra.get("kid_hint").and_then(Value::as_str),
            Some("spare")
        );

        let json = state.to_json().unwrap();
        assert!(json.contains("issued_at"));
        assert!(json.contains("kid_hint"));
    }

    #[test]
    fn test_account_url_is_optional() {
        let mut state = ClientState::from_json(sample_state_json()).unwrap();
        state.account_url = None;
        let json = state.to_json().unwrap();
        assert!(!json.contains("account_url"));

        let key_only = ClientState::from_json(&json).unwrap();
        assert!(key_only.account_url.is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let state = ClientState::from_json(sample_state_json()).unwrap();
        state.save(&path).unwrap();
        let loaded = ClientState::load(&path).unwrap();
        assert_eq!(state, loaded);
    }
}
