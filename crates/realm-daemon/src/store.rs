//! The record-store contract and its in-memory implementation.
//!
//! Reads hand back an opaque token alongside the record; writes succeed
//! only while the stored row still matches that token. This
//! compare-and-swap is the sole mechanism that stops two concurrent
//! recoveries from spending the same guess: one write lands, the other
//! fails with [`RecordStoreError::ConcurrentModification`] and the client
//! retries its round.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use realm_core::records::{UserRecord, UserRecordId};
use thiserror::Error;

/// Errors from record-store operations.
#[derive(Debug, Error)]
pub enum RecordStoreError {
    /// The row changed between the read and the conditional write.
    #[error("record was modified since it was read")]
    ConcurrentModification,
    /// A stored record failed to decode.
    #[error("stored record is corrupt: {0}")]
    Corrupt(String),
    /// The backend was unreachable or failed internally.
    #[error("record store unavailable: {0}")]
    Unavailable(String),
    /// The operation was abandoned because the request was cancelled.
    #[error("operation cancelled")]
    Cancelled,
}

/// A compare-and-swap witness returned by [`RecordStore::get_record`] and
/// consumed by [`RecordStore::write_record`].
///
/// Backends choose whichever form their conditional-write primitive
/// needs; callers must treat the token as opaque and single-use.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReadToken {
    /// No row existed at read time.
    #[default]
    None,
    /// A monotonic row version.
    Version(u64),
    /// The raw stored row contents.
    Bytes(Vec<u8>),
}

/// Storage for one realm's user records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Reads a user's record, or a default `NotRegistered` record (and
    /// [`ReadToken::None`]) when no row exists.
    ///
    /// # Errors
    ///
    /// Fails when the backend is unavailable or the stored row is corrupt.
    async fn get_record(
        &self,
        id: &UserRecordId,
    ) -> Result<(UserRecord, ReadToken), RecordStoreError>;

    /// Writes a user's record iff the stored row still matches `token`
    /// ([`ReadToken::None`] means "no row may exist yet"). The check and
    /// the write are atomic.
    ///
    /// # Errors
    ///
    /// Fails with [`RecordStoreError::ConcurrentModification`] on a token
    /// mismatch, or another variant when the backend fails.
    async fn write_record(
        &self,
        id: &UserRecordId,
        record: &UserRecord,
        token: ReadToken,
    ) -> Result<(), RecordStoreError>;
}

/// An in-memory record store for tests and single-node development.
///
/// Each instance owns its own map; records vanish when it drops. Rows are
/// kept in serialized form with a version counter serving as the CAS
/// token, the same discipline the database backends use.
#[derive(Default)]
pub struct MemoryRecordStore {
    rows: Mutex<HashMap<UserRecordId, VersionedRow>>,
}

struct VersionedRow {
    serialized: Vec<u8>,
    version: u64,
}

impl MemoryRecordStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get_record(
        &self,
        id: &UserRecordId,
    ) -> Result<(UserRecord, ReadToken), RecordStoreError> {
        let rows = self.rows.lock().expect("record store mutex poisoned");
        match rows.get(id) {
            None => Ok((UserRecord::not_registered(), ReadToken::None)),
            Some(row) => {
                let record = ciborium::de::from_reader(row.serialized.as_slice())
                    .map_err(|e| RecordStoreError::Corrupt(e.to_string()))?;
                Ok((record, ReadToken::Version(row.version)))
            }
        }
    }

    async fn write_record(
        &self,
        id: &UserRecordId,
        record: &UserRecord,
        token: ReadToken,
    ) -> Result<(), RecordStoreError> {
        let mut serialized = Vec::new();
        ciborium::ser::into_writer(record, &mut serialized)
            .map_err(|e| RecordStoreError::Unavailable(e.to_string()))?;

        let mut rows = self.rows.lock().expect("record store mutex poisoned");
        match (rows.get_mut(id), token) {
            (None, ReadToken::None) => {
                rows.insert(
                    *id,
                    VersionedRow {
                        serialized,
                        version: 1,
                    },
                );
                Ok(())
            }
            (Some(row), ReadToken::Version(version)) if row.version == version => {
                row.serialized = serialized;
                row.version += 1;
                Ok(())
            }
            _ => Err(RecordStoreError::ConcurrentModification),
        }
    }
}

#[cfg(test)]
mod tests {
    use realm_core::records::{RegistrationState, UserRecord};

    use super::*;

    fn record_id(fill: u8) -> UserRecordId {
        UserRecordId([fill; 32])
    }

    fn no_guesses() -> UserRecord {
        UserRecord {
            registration_state: RegistrationState::NoGuesses,
        }
    }

    #[tokio::test]
    async fn test_missing_row_reads_as_not_registered() {
        let store = MemoryRecordStore::new();
        let (record, token) = store.get_record(&record_id(1)).await.unwrap();
        assert_eq!(record, UserRecord::not_registered());
        assert_eq!(token, ReadToken::None);
    }

    #[tokio::test]
    async fn test_write_then_read_returns_fresh_token() {
        let store = MemoryRecordStore::new();
        let id = record_id(1);

        store
            .write_record(&id, &no_guesses(), ReadToken::None)
            .await
            .unwrap();

        let (record, token) = store.get_record(&id).await.unwrap();
        assert_eq!(record, no_guesses());
        assert_ne!(token, ReadToken::None);

        // Writing with the fresh token succeeds and invalidates it.
        store
            .write_record(&id, &UserRecord::not_registered(), token.clone())
            .await
            .unwrap();
        let err = store
            .write_record(&id, &no_guesses(), token)
            .await
            .unwrap_err();
        assert!(matches!(err, RecordStoreError::ConcurrentModification));
    }

    #[tokio::test]
    async fn test_create_requires_no_existing_row() {
        let store = MemoryRecordStore::new();
        let id = record_id(2);

        store
            .write_record(&id, &no_guesses(), ReadToken::None)
            .await
            .unwrap();

        // A second blind create must lose.
        let err = store
            .write_record(&id, &no_guesses(), ReadToken::None)
            .await
            .unwrap_err();
        assert!(matches!(err, RecordStoreError::ConcurrentModification));
    }

    #[tokio::test]
    async fn test_conflicting_writers_serialize() {
        let store = MemoryRecordStore::new();
        let id = record_id(3);
        store
            .write_record(&id, &no_guesses(), ReadToken::None)
            .await
            .unwrap();

        // Two readers get the same token; only one write can land.
        let (_, first) = store.get_record(&id).await.unwrap();
        let (_, second) = store.get_record(&id).await.unwrap();
        assert_eq!(first, second);

        store
            .write_record(&id, &UserRecord::not_registered(), first)
            .await
            .unwrap();
        let err = store
            .write_record(&id, &UserRecord::not_registered(), second)
            .await
            .unwrap_err();
        assert!(matches!(err, RecordStoreError::ConcurrentModification));
    }

    #[tokio::test]
    async fn test_stores_are_independent() {
        let a = MemoryRecordStore::new();
        let b = MemoryRecordStore::new();
        let id = record_id(4);

        a.write_record(&id, &no_guesses(), ReadToken::None)
            .await
            .unwrap();

        let (record, token) = b.get_record(&id).await.unwrap();
        assert_eq!(record, UserRecord::not_registered());
        assert_eq!(token, ReadToken::None);
    }
}
