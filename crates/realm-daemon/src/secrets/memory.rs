//! In-memory tenant secrets, loaded from the `TENANT_SECRETS` environment
//! variable as `{"tenantName": {"1": "secretKey"}}`.

use std::collections::HashMap;

use async_trait::async_trait;
use regex::Regex;

use super::{Secret, SecretsError, SecretsManager};

/// A secrets manager backed by a fixed in-memory table.
pub struct MemorySecretsManager {
    secrets: HashMap<String, HashMap<u64, Secret>>,
}

impl MemorySecretsManager {
    /// Builds the table from the `TENANT_SECRETS` environment variable.
    /// Each tenant's versions are registered once per entry in
    /// `prefixes`, so a single table can serve APIs that look keys up
    /// under different secret-name prefixes.
    ///
    /// # Errors
    ///
    /// Fails when the variable is missing, is not the expected JSON
    /// shape, or names a non-alphanumeric tenant.
    pub fn from_env(prefixes: &[&str]) -> Result<Self, SecretsError> {
        let raw = std::env::var("TENANT_SECRETS")
            .map_err(|_| SecretsError::Config("missing TENANT_SECRETS".to_string()))?;
        Self::from_json(prefixes, &raw)
    }

    /// Builds the table from a `TENANT_SECRETS`-shaped JSON document.
    ///
    /// # Errors
    ///
    /// Fails on malformed JSON or a non-alphanumeric tenant name.
    pub fn from_json(prefixes: &[&str], json: &str) -> Result<Self, SecretsError> {
        let parsed: HashMap<String, HashMap<String, String>> = serde_json::from_str(json)
            .map_err(|e| SecretsError::Config(format!("invalid TENANT_SECRETS: {e}")))?;

        let tenant_name = Regex::new("^[a-zA-Z0-9]+$").expect("static regex");

        let mut secrets: HashMap<String, HashMap<u64, Secret>> = HashMap::new();
        for (tenant, versions) in parsed {
            if !tenant_name.is_match(&tenant) {
                return Err(SecretsError::Config(format!(
                    "tenant names must be alphanumeric, got {tenant:?}"
                )));
            }
            for (version, secret) in versions {
                let version: u64 = version.parse().map_err(|_| {
                    SecretsError::Config(format!(
                        "secret versions must be integers, got {version:?}"
                    ))
                })?;
                for prefix in prefixes {
                    secrets
                        .entry(format!("{prefix}{tenant}"))
                        .or_default()
                        .insert(version, Secret::new(secret.clone().into_bytes()));
                }
            }
        }

        Ok(Self { secrets })
    }
}

#[async_trait]
impl SecretsManager for MemorySecretsManager {
    async fn get_secret(&self, name: &str, version: u64) -> Result<Secret, SecretsError> {
        self.secrets
            .get(name)
            .and_then(|versions| versions.get(&version))
            .cloned()
            .ok_or_else(|| SecretsError::NotFound {
                name: name.to_string(),
                version,
            })
    }
}
