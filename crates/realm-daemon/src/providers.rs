//! Backend provider selection.
//!
//! A provider bundles the three backend contracts a realm needs. The
//! managed-cloud implementations live out of tree behind the same traits;
//! this build carries the in-memory provider for tests and single-node
//! development.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use realm_core::types::{RealmId, TENANT_LOG_SECRET_PREFIX, TENANT_SECRET_PREFIX};
use thiserror::Error;

use crate::pubsub::{MemoryPubSub, PubSub};
use crate::secrets::{CachingSecretsManager, MemorySecretsManager, SecretsError, SecretsManager};
use crate::store::{MemoryRecordStore, RecordStore};

/// Which backend family to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderName {
    /// Google Cloud (Bigtable, Secret Manager, Pub/Sub).
    Gcp,
    /// AWS (DynamoDB, Secrets Manager, SQS).
    Aws,
    /// MongoDB for all three roles.
    Mongo,
    /// In-process memory; nothing survives a restart.
    Memory,
}

impl FromStr for ProviderName {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, ProviderError> {
        match s.to_lowercase().as_str() {
            "gcp" => Ok(Self::Gcp),
            "aws" => Ok(Self::Aws),
            "mongo" => Ok(Self::Mongo),
            "memory" => Ok(Self::Memory),
            other => Err(ProviderError::Unknown(other.to_string())),
        }
    }
}

impl fmt::Display for ProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Gcp => "gcp",
            Self::Aws => "aws",
            Self::Mongo => "mongo",
            Self::Memory => "memory",
        })
    }
}

/// Errors from provider construction.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The name did not match any provider.
    #[error("invalid provider name: {0}")]
    Unknown(String),
    /// The named provider is not compiled into this binary.
    #[error("provider {0} is not built into this binary")]
    Unsupported(ProviderName),
    /// A backend rejected its configuration.
    #[error(transparent)]
    Secrets(#[from] SecretsError),
}

/// The three backends a realm runs on.
pub struct Provider {
    /// Which family this provider is.
    pub name: ProviderName,
    /// User-record storage.
    pub record_store: Arc<dyn RecordStore>,
    /// Tenant signing keys, behind the standard cache.
    pub secrets_manager: Arc<dyn SecretsManager>,
    /// The audit-event queue.
    pub pub_sub: Arc<dyn PubSub>,
}

impl Provider {
    /// Builds the backends for `name`.
    ///
    /// # Errors
    ///
    /// Fails when the provider is not built in or a backend rejects its
    /// configuration (for memory, a missing or malformed
    /// `TENANT_SECRETS`).
    pub fn new(name: ProviderName, _realm_id: &RealmId) -> Result<Self, ProviderError> {
        match name {
            ProviderName::Memory => {
                // One table serves both the user API and the tenant-log
                // API, so register every tenant key under both prefixes.
                let secrets = MemorySecretsManager::from_env(&[
                    TENANT_SECRET_PREFIX,
                    TENANT_LOG_SECRET_PREFIX,
                ])?;
                Ok(Self {
                    name,
                    record_store: Arc::new(MemoryRecordStore::new()),
                    secrets_manager: Arc::new(CachingSecretsManager::new(secrets)),
                    pub_sub: Arc::new(MemoryPubSub::new()),
                })
            }
            ProviderName::Gcp | ProviderName::Aws | ProviderName::Mongo => {
                Err(ProviderError::Unsupported(name))
            }
        }
    }
}
