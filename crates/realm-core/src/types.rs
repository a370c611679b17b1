//! Fixed-size wire types shared across the protocol.
//!
//! Every byte-array newtype here encodes as a CBOR byte string (never an
//! array of integers) and is length-checked at decode time.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Namespace prefix for per-realm record storage (table, database, or
/// collection, depending on the backend).
pub const REALM_DATABASE_PREFIX: &str = "jb-sw-realm-";

/// Secret-name prefix for tenant signing keys used by the user API.
pub const TENANT_SECRET_PREFIX: &str = "jb-sw-tenant-";

/// Secret-name prefix for tenant signing keys used by the tenant-log API.
///
/// Distinct from [`TENANT_SECRET_PREFIX`] so a key issued for one scope
/// cannot be replayed against the other.
pub const TENANT_LOG_SECRET_PREFIX: &str = "tenant-";

/// A value had the wrong number of bytes for its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("expected {expected} bytes, got {actual}")]
pub struct InvalidLength {
    /// The length the type requires.
    pub expected: usize,
    /// The length that was supplied.
    pub actual: usize,
}

macro_rules! byte_array_type {
    ($(#[$meta:meta])* $name:ident, $len:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            /// Size of this value in bytes.
            pub const LEN: usize = $len;

            /// Returns the raw bytes.
            #[must_use]
            pub const fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = InvalidLength;

            fn try_from(bytes: &[u8]) -> Result<Self, InvalidLength> {
                let arr: [u8; $len] = bytes.try_into().map_err(|_| InvalidLength {
                    expected: $len,
                    actual: bytes.len(),
                })?;
                Ok(Self(arr))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), hex::encode(self.0))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_bytes(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let bytes = deserializer.deserialize_bytes(ByteArrayVisitor::<$len>)?;
                Ok(Self(bytes))
            }
        }
    };
}

struct ByteArrayVisitor<const N: usize>;

impl<const N: usize> Visitor<'_> for ByteArrayVisitor<N> {
    type Value = [u8; N];

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a byte string of length {N}")
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
        v.try_into()
            .map_err(|_| E::invalid_length(v.len(), &self))
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
        self.visit_bytes(&v)
    }
}

/// Serde adapter for anonymous fixed-size byte arrays, so they encode as
/// CBOR byte strings like the named newtypes do.
pub mod byte_array {
    use super::{ByteArrayVisitor, Deserializer, Serializer};

    /// Serializes the array as a byte string.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(bytes)
    }

    /// Deserializes a byte string, rejecting any other length.
    ///
    /// # Errors
    ///
    /// Fails on non-byte-string input or a length other than `N`.
    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<[u8; N], D::Error> {
        deserializer.deserialize_bytes(ByteArrayVisitor::<N>)
    }
}

byte_array_type!(
    /// Client-chosen registration generation marker, opaque to the server.
    ///
    /// Lets a client detect that another device re-registered underneath a
    /// recovery already in flight.
    RegistrationVersion, 16
);

byte_array_type!(
    /// The OPRF private scalar β, stored per registration.
    OprfPrivateKey, 32
);

byte_array_type!(
    /// The OPRF public point `V = β·G` in canonical Ristretto encoding.
    OprfPublicKey, 32
);

byte_array_type!(
    /// A blinded input point `U` submitted by the client during recovery.
    OprfBlindedInput, 32
);

byte_array_type!(
    /// The evaluated point `W = β·U` returned to the client.
    OprfBlindedResult, 32
);

byte_array_type!(
    /// Client-side commitment to the unlock key.
    UnlockKeyCommitment, 32
);

byte_array_type!(
    /// The unlock-key authenticator a client presents in the final recovery
    /// round. Compared in constant time; see [`UnlockKeyTag::ct_eq_tag`].
    UnlockKeyTag, 16
);

byte_array_type!(
    /// The realm's additive share of the secret-encryption key scalar.
    EncryptionKeyScalarShare, 32
);

byte_array_type!(
    /// The ciphertext of the user's secret, sized for the fixed wire format.
    EncryptedSecret, 145
);

byte_array_type!(
    /// Client-side commitment to the encrypted secret.
    EncryptedSecretCommitment, 16
);

impl UnlockKeyTag {
    /// Constant-time equality over the full 16 bytes; no early exit on the
    /// first mismatching byte.
    #[must_use]
    pub fn ct_eq_tag(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

/// The OPRF public key together with the signature chain a client uses to
/// authenticate it. The server stores and echoes this without inspecting
/// the signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OprfSignedPublicKey {
    /// The public point `V = β·G`.
    pub public_key: OprfPublicKey,
    /// The client key that signed `public_key`.
    #[serde(with = "byte_array")]
    pub verifying_key: [u8; 32],
    /// Signature over `public_key` by `verifying_key`.
    #[serde(with = "byte_array")]
    pub signature: [u8; 64],
}

/// A Chaum-Pedersen DLEQ proof that the evaluation used the committed
/// private key: `log_G(V) == log_U(W)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OprfProof {
    /// The challenge scalar.
    #[serde(with = "byte_array")]
    pub c: [u8; 32],
    /// The blinded response scalar `βz = βt + β·c`.
    #[serde(with = "byte_array")]
    pub beta_z: [u8; 32],
}

/// Per-registration guess policy, fixed at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// How many recovery guesses may be spent before the record locks out.
    pub num_guesses: u16,
}

/// Identifies one realm. Scopes the record-store namespace, the audit
/// queues, and the JWT audience.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RealmId(pub [u8; 16]);

impl RealmId {
    /// Size of a realm ID in bytes.
    pub const LEN: usize = 16;

    /// Name of this realm's storage namespace.
    #[must_use]
    pub fn database_name(&self) -> String {
        format!("{REALM_DATABASE_PREFIX}{self}")
    }
}

impl fmt::Display for RealmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for RealmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RealmId({})", hex::encode(self.0))
    }
}

/// A string was not a valid 16-byte lowercase or uppercase hex realm ID.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("realm id must be 16 bytes of hex")]
pub struct InvalidRealmId;

impl FromStr for RealmId {
    type Err = InvalidRealmId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Accept the dashed UUID rendering as well as bare hex.
        let compact: String = s.chars().filter(|c| *c != '-').collect();
        let bytes = hex::decode(compact).map_err(|_| InvalidRealmId)?;
        let arr: [u8; 16] = bytes.try_into().map_err(|_| InvalidRealmId)?;
        Ok(Self(arr))
    }
}
