//! Client requests for the `/req` endpoint.
//!
//! The request union uses serde's externally-tagged layout, which matches
//! the wire format: variants without a payload are bare CBOR text strings
//! (`"Register1"`), variants with one are one-entry maps
//! (`{"Recover2": {...}}`). Unknown variants are decode errors.

use serde::{Deserialize, Serialize};

use crate::types::{
    EncryptedSecret, EncryptedSecretCommitment, EncryptionKeyScalarShare, OprfBlindedInput,
    OprfPrivateKey, OprfSignedPublicKey, Policy, RegistrationVersion, UnlockKeyCommitment,
    UnlockKeyTag,
};

/// One round of the registration, recovery, or deletion protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecretsRequest {
    /// Opens a registration. Carries nothing; exists so clients can check
    /// reachability and auth before committing secrets.
    Register1,
    /// Commits a registration, overwriting any existing one.
    Register2(Box<Register2Request>),
    /// Opens a recovery; learns the current registration version.
    Recover1,
    /// Spends a guess to evaluate the OPRF on a blinded input.
    Recover2 {
        /// The registration version the client believes is current.
        version: RegistrationVersion,
        /// The blinded OPRF input derived from the PIN.
        oprf_blinded_input: OprfBlindedInput,
    },
    /// Proves knowledge of the PIN and retrieves the stored share.
    Recover3 {
        /// The registration version the client believes is current.
        version: RegistrationVersion,
        /// The unlock-key authenticator derived from the OPRF output.
        unlock_key_tag: UnlockKeyTag,
    },
    /// Resets the record to the unregistered state.
    Delete,
}

/// Everything a registration stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Register2Request {
    /// Client-chosen registration generation marker.
    pub version: RegistrationVersion,
    /// The OPRF private scalar to evaluate with during recovery.
    pub oprf_private_key: OprfPrivateKey,
    /// The OPRF public key with its client signature chain.
    pub oprf_signed_public_key: OprfSignedPublicKey,
    /// Commitment to the unlock key.
    pub unlock_key_commitment: UnlockKeyCommitment,
    /// The unlock-key authenticator to compare against in recovery.
    pub unlock_key_tag: UnlockKeyTag,
    /// This realm's share of the secret-encryption key scalar.
    pub encryption_key_scalar_share: EncryptionKeyScalarShare,
    /// The encrypted user secret.
    pub encrypted_secret: EncryptedSecret,
    /// Commitment to the encrypted secret.
    pub encrypted_secret_commitment: EncryptedSecretCommitment,
    /// The guess policy for this registration.
    pub policy: Policy,
}
