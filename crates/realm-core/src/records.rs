//! Per-user registration records and their storage identity.
//!
//! A record's registration state is a three-variant union encoded as a
//! one-entry CBOR map `{ "<VariantName>": <payload> }`. The codec is
//! hand-written so that empty variants still encode as maps and unknown
//! variant names are decode errors rather than silent defaults.

use std::fmt;

use blake2::{Blake2s256, Digest};
use serde::de::{self, IgnoredAny, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::types::{
    EncryptedSecret, EncryptedSecretCommitment, EncryptionKeyScalarShare, OprfPrivateKey,
    OprfSignedPublicKey, Policy, RegistrationVersion, UnlockKeyCommitment, UnlockKeyTag,
};

/// Identifies a user record within a realm.
///
/// Derived deterministically from the authenticated tenant and user; the
/// core never addresses a user by any other handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserRecordId(pub [u8; 32]);

impl fmt::Display for UserRecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for UserRecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserRecordId({})", hex::encode(self.0))
    }
}

/// Record-ID derivation failed to serialize its input.
#[derive(Debug, Error)]
#[error("user record id serialization: {0}")]
pub struct RecordIdError(#[from] ciborium::ser::Error<std::io::Error>);

#[derive(Serialize)]
struct UserRecordIdInput<'a> {
    tenant_name: &'a str,
    user_id: &'a str,
}

impl UserRecordId {
    /// Derives the record ID for an authenticated `(tenant, user)` pair as
    /// `BLAKE2s-256(CBOR({tenant_name, user_id}))`, with the map keys in
    /// exactly that order.
    ///
    /// The derivation must stay byte-for-byte stable across releases: it is
    /// the storage key for every existing registration.
    ///
    /// # Errors
    ///
    /// Returns an error if the CBOR serializer fails, which cannot happen
    /// for string inputs in practice.
    pub fn derive(tenant_name: &str, user_id: &str) -> Result<Self, RecordIdError> {
        let mut encoded = Vec::new();
        ciborium::ser::into_writer(
            &UserRecordIdInput {
                tenant_name,
                user_id,
            },
            &mut encoded,
        )?;
        let digest = Blake2s256::digest(&encoded);
        Ok(Self(digest.into()))
    }
}

/// The payload of a [`Registered`] record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registered {
    /// Client-chosen registration generation marker.
    pub version: RegistrationVersion,
    /// The OPRF private scalar for this registration.
    pub oprf_private_key: OprfPrivateKey,
    /// The OPRF public key and its client signature chain.
    pub oprf_signed_public_key: OprfSignedPublicKey,
    /// Commitment to the unlock key.
    pub unlock_key_commitment: UnlockKeyCommitment,
    /// The stored unlock-key authenticator.
    pub unlock_key_tag: UnlockKeyTag,
    /// This realm's share of the secret-encryption key scalar.
    pub encryption_key_scalar_share: EncryptionKeyScalarShare,
    /// The encrypted user secret.
    pub encrypted_secret: EncryptedSecret,
    /// Commitment to the encrypted secret.
    pub encrypted_secret_commitment: EncryptedSecretCommitment,
    /// Guesses consumed so far; always `<= policy.num_guesses`.
    pub guess_count: u16,
    /// The guess policy fixed at registration.
    pub policy: Policy,
}

/// The registration lifecycle of one user record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RegistrationState {
    /// No registration exists (also the state of a never-written record).
    #[default]
    NotRegistered,
    /// The guess budget was exhausted; terminal until a delete or a fresh
    /// registration.
    NoGuesses,
    /// An active registration.
    Registered(Box<Registered>),
}

impl RegistrationState {
    fn variant_name(&self) -> &'static str {
        match self {
            Self::NotRegistered => "NotRegistered",
            Self::NoGuesses => "NoGuesses",
            Self::Registered(_) => "Registered",
        }
    }
}

/// One user's stored state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserRecord {
    /// The record's registration state.
    pub registration_state: RegistrationState,
}

impl UserRecord {
    /// A fresh record in the [`RegistrationState::NotRegistered`] state.
    #[must_use]
    pub fn not_registered() -> Self {
        Self::default()
    }
}

#[derive(Serialize)]
struct EmptyPayload {}

impl Serialize for UserRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        let name = self.registration_state.variant_name();
        match &self.registration_state {
            RegistrationState::Registered(registered) => {
                map.serialize_entry(name, registered)?;
            }
            RegistrationState::NotRegistered | RegistrationState::NoGuesses => {
                map.serialize_entry(name, &EmptyPayload {})?;
            }
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for UserRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(UserRecordVisitor)
    }
}

struct UserRecordVisitor;

impl<'de> Visitor<'de> for UserRecordVisitor {
    type Value = UserRecord;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a one-entry map keyed by a registration state name")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<UserRecord, A::Error> {
        let Some(name) = map.next_key::<String>()? else {
            return Err(de::Error::invalid_length(0, &self));
        };
        let state = match name.as_str() {
            "Registered" => {
                let registered = map.next_value::<Registered>()?;
                RegistrationState::Registered(Box::new(registered))
            }
            "NoGuesses" => {
                map.next_value::<IgnoredAny>()?;
                RegistrationState::NoGuesses
            }
            "NotRegistered" => {
                map.next_value::<IgnoredAny>()?;
                RegistrationState::NotRegistered
            }
            other => {
                return Err(de::Error::unknown_variant(
                    other,
                    &["Registered", "NoGuesses", "NotRegistered"],
                ));
            }
        };
        if map.next_key::<IgnoredAny>()?.is_some() {
            return Err(de::Error::custom("expected a single registration state"));
        }
        Ok(UserRecord {
            registration_state: state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OprfPublicKey;

    fn sample_registered() -> Registered {
        Registered {
            version: RegistrationVersion([1; 16]),
            oprf_private_key: OprfPrivateKey([2; 32]),
            oprf_signed_public_key: OprfSignedPublicKey {
                public_key: OprfPublicKey([1; 32]),
                verifying_key: [2; 32],
                signature: [3; 64],
            },
            unlock_key_commitment: UnlockKeyCommitment([3; 32]),
            unlock_key_tag: UnlockKeyTag([4; 16]),
            encryption_key_scalar_share: EncryptionKeyScalarShare([5; 32]),
            encrypted_secret: EncryptedSecret([6; 145]),
            encrypted_secret_commitment: EncryptedSecretCommitment([7; 16]),
            guess_count: 0,
            policy: Policy { num_guesses: 2 },
        }
    }

    fn round_trip(record: &UserRecord) -> UserRecord {
        let mut encoded = Vec::new();
        ciborium::ser::into_writer(record, &mut encoded).unwrap();
        ciborium::de::from_reader(&encoded[..]).unwrap()
    }

    #[test]
    fn test_round_trip_all_variants() {
        for state in [
            RegistrationState::NotRegistered,
            RegistrationState::NoGuesses,
            RegistrationState::Registered(Box::new(sample_registered())),
        ] {
            let record = UserRecord {
                registration_state: state,
            };
            assert_eq!(round_trip(&record), record);
        }
    }

    #[test]
    fn test_empty_variant_encodes_as_map() {
        let mut encoded = Vec::new();
        ciborium::ser::into_writer(&UserRecord::not_registered(), &mut encoded).unwrap();
        let value: ciborium::Value = ciborium::de::from_reader(&encoded[..]).unwrap();
        let entries = value.as_map().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0.as_text().unwrap(), "NotRegistered");
        assert!(entries[0].1.as_map().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_variant_rejected() {
        let value = ciborium::Value::Map(vec![(
            ciborium::Value::Text("Revoked".to_string()),
            ciborium::Value::Map(Vec::new()),
        )]);
        let mut encoded = Vec::new();
        ciborium::ser::into_writer(&value, &mut encoded).unwrap();
        let result: Result<UserRecord, _> = ciborium::de::from_reader(&encoded[..]);
        assert!(result.is_err());
    }

    #[test]
    fn test_two_entry_map_rejected() {
        let value = ciborium::Value::Map(vec![
            (
                ciborium::Value::Text("NotRegistered".to_string()),
                ciborium::Value::Map(Vec::new()),
            ),
            (
                ciborium::Value::Text("NoGuesses".to_string()),
                ciborium::Value::Map(Vec::new()),
            ),
        ]);
        let mut encoded = Vec::new();
        ciborium::ser::into_writer(&value, &mut encoded).unwrap();
        let result: Result<UserRecord, _> = ciborium::de::from_reader(&encoded[..]);
        assert!(result.is_err());
    }

    #[test]
    fn test_registered_truncated_field_rejected() {
        let record = UserRecord {
            registration_state: RegistrationState::Registered(Box::new(sample_registered())),
        };
        let mut encoded = Vec::new();
        ciborium::ser::into_writer(&record, &mut encoded).unwrap();

        // Corrupt the definite length of the first 16-byte string from 16
        // to 15 and drop a byte, so a length check must fire somewhere.
        let pos = encoded.iter().position(|b| *b == 0x50).unwrap();
        encoded[pos] = 0x4f;
        encoded.remove(pos + 1);
        let result: Result<UserRecord, _> = ciborium::de::from_reader(&encoded[..]);
        assert!(result.is_err());
    }

    #[test]
    fn test_user_record_id_golden() {
        // Derivation must never change: this value is a storage key.
        let id = UserRecordId::derive("apollo", "artemis").unwrap();
        assert_eq!(
            id.to_string(),
            "1033250bfb2d27fd2a7fccba346851d517700a3ea5155429d5b5845875db75d3"
        );
    }

    #[test]
    fn test_user_record_id_depends_on_both_inputs() {
        let base = UserRecordId::derive("apollo", "artemis").unwrap();
        assert_ne!(UserRecordId::derive("apollo", "athena").unwrap(), base);
        assert_ne!(UserRecordId::derive("hermes", "artemis").unwrap(), base);
        // Swapping the fields must not collide.
        assert_ne!(UserRecordId::derive("artemis", "apollo").unwrap(), base);
    }
}
