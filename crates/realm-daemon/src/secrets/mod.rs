//! Versioned tenant-secret retrieval.
//!
//! Tenant JWT signing keys live in a secrets manager, addressed by name
//! and version. The trait here is the only view the rest of the daemon
//! has of that system; the in-memory backend serves tests and
//! single-node development, and [`cache::CachingSecretsManager`] wraps
//! any backend with a bounded-lifetime cache.

use std::ops::Deref;

use async_trait::async_trait;
use thiserror::Error;
use zeroize::Zeroizing;

pub mod cache;
pub mod memory;

pub use cache::CachingSecretsManager;
pub use memory::MemorySecretsManager;

/// Errors from secret retrieval.
#[derive(Debug, Error)]
pub enum SecretsError {
    /// No secret exists under the requested name and version.
    #[error("no secret named {name:?} at version {version}")]
    NotFound {
        /// The requested secret name.
        name: String,
        /// The requested version.
        version: u64,
    },
    /// The backend rejected its configuration.
    #[error("secrets manager configuration: {0}")]
    Config(String),
    /// The backend was unreachable or failed internally.
    #[error("secrets manager unavailable: {0}")]
    Unavailable(String),
}

/// Secret bytes that zero themselves on drop.
///
/// Cloning shares nothing; each clone owns and later wipes its own copy.
#[derive(Clone)]
pub struct Secret(Zeroizing<Vec<u8>>);

impl Secret {
    /// Wraps raw secret bytes.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }
}

impl Deref for Secret {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        write!(f, "Secret({} bytes)", self.0.len())
    }
}

/// A versioned secret store.
#[async_trait]
pub trait SecretsManager: Send + Sync {
    /// Fetches one version of a named secret.
    ///
    /// # Errors
    ///
    /// Fails when the secret does not exist at that version or the
    /// backend is unavailable.
    async fn get_secret(&self, name: &str, version: u64) -> Result<Secret, SecretsError>;
}
