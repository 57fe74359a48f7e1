use async_trait::async_trait;
use error::TransferError;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

/// Secret retrieval seam; the document-store key comes through here.
#[async_trait]
pub trait SecretProvider: Send + Sync {
    async fn get(&self, vault: &str, name: &str) -> Result<String, TransferError>;
}

/// Fixed secrets for tests and local runs.
#[derive(Default)]
pub struct StaticSecrets {
    secrets: Mutex<HashMap<(String, String), String>>,
}

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, vault: &str, name: &str, value: &str) -> Self {
        self.secrets
            .lock()
            .insert((vault.to_string(), name.to_string()), value.to_string());
        self
    }
}

#[async_trait]
impl SecretProvider for StaticSecrets {
    async fn get(&self, vault: &str, name: &str) -> Result<String, TransferError> {
        self.secrets
            .lock()
            .get(&(vault.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| {
                TransferError::NotFound(format!("secret '{name}' in vault '{vault}'"))
            })
    }
}

/// Resolves secrets from the process environment as `<VAULT>_<NAME>` with
/// non-alphanumeric characters folded to underscores.
pub struct EnvSecrets;

#[async_trait]
impl SecretProvider for EnvSecrets {
    async fn get(&self, vault: &str, name: &str) -> Result<String, TransferError> {
        let key = format!("{}_{}", env_segment(vault), env_segment(name));
        debug!(%key, "resolving secret from environment");
        std::env::var(&key)
            .map_err(|_| TransferError::NotFound(format!("environment variable '{key}'")))
    }
}

fn env_segment(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_secrets_resolve() {
        let secrets = StaticSecrets::new().with("vault", "db-key", "s3cr3t");
        assert_eq!(secrets.get("vault", "db-key").await.unwrap(), "s3cr3t");
        assert!(secrets.get("vault", "missing").await.is_err());
    }

    #[test]
    fn env_keys_are_folded() {
        assert_eq!(env_segment("my-vault"), "MY_VAULT");
    }
}
