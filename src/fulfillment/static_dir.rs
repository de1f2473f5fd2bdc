use std::path::PathBuf;

use anyhow::{Result, bail};
use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use crate::fulfillment::{ChallengeFulfillment, Fulfillment};
use crate::types::{Challenge, ChallengeType};

/// `http-01` fulfillment that writes the key authorization into a directory
/// an existing web server exposes as `/.well-known/acme-challenge/`.
pub struct StaticDirFulfillment {
    root: PathBuf,
}

impl StaticDirFulfillment {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn token_path(&self, token: &str) -> Result<PathBuf> {
        // Tokens are base64url; anything else could escape the challenge dir.
        if token.is_empty()
            || !token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            bail!("refusing to write challenge file for malformed token {token:?}");
        }
        Ok(self.root.join(token))
    }
}

#[async_trait]
impl ChallengeFulfillment for StaticDirFulfillment {
    fn challenge_types(&self) -> &'static [ChallengeType] {
        &[ChallengeType::Http01]
    }

    async fn fulfill_http_01(
        &self,
        domain: &str,
        challenge: &Challenge,
        key_authorization: &str,
    ) -> Result<Fulfillment> {
        let path = self.token_path(&challenge.token)?;
        fs::create_dir_all(&self.root).await?;
        fs::write(&path, key_authorization).await?;
        debug!("wrote http-01 response for {domain} to {}", path.display());
        Ok(Fulfillment::Handled)
    }

    async fn clear_http_01(&self, domain: &str, challenge: &Challenge) -> Result<()> {
        let path = self.token_path(&challenge.token)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("removed http-01 response for {domain} at {}", path.display());
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
