//! Chaum-Pedersen proof of discrete-log equality for the OPRF.
//!
//! The proof convinces a client that `log_G(V) == log_U(W)` without
//! revealing β. The challenge transcript concatenates the domain
//! separator and the canonical encodings of `U`, `V`, `W`, `Vt`, `Wt` in
//! exactly that order; any deviation produces proofs no client accepts.

use std::io::Read;

use curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT;
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use sha2::{Digest, Sha512};

use super::OprfError;
use crate::types::{OprfBlindedInput, OprfBlindedResult, OprfProof, OprfPublicKey};

/// Domain separator binding challenges to this protocol revision.
const DLEQ_DOMAIN_SEPARATOR: &[u8] = b"Juicebox_DLEQ_2023_1;";

pub(super) fn generate_proof(
    beta: &Scalar,
    u: &RistrettoPoint,
    v: &OprfPublicKey,
    w: &RistrettoPoint,
    rng: &mut dyn Read,
) -> Result<OprfProof, OprfError> {
    let mut beta_t_seed = [0u8; 64];
    rng.read_exact(&mut beta_t_seed)?;
    let beta_t = Scalar::from_bytes_mod_order_wide(&beta_t_seed);

    let v_t = RISTRETTO_BASEPOINT_POINT * beta_t;
    let w_t = u * beta_t;

    let c = hash_to_challenge(
        &u.compress().to_bytes(),
        &v.0,
        &w.compress().to_bytes(),
        &v_t.compress().to_bytes(),
        &w_t.compress().to_bytes(),
    );

    let beta_z = beta_t + beta * c;

    Ok(OprfProof {
        c: c.to_bytes(),
        beta_z: beta_z.to_bytes(),
    })
}

fn hash_to_challenge(
    u: &[u8; 32],
    v: &[u8; 32],
    w: &[u8; 32],
    v_t: &[u8; 32],
    w_t: &[u8; 32],
) -> Scalar {
    let mut hash = Sha512::new();
    hash.update(DLEQ_DOMAIN_SEPARATOR);
    hash.update(u);
    hash.update(v);
    hash.update(w);
    hash.update(v_t);
    hash.update(w_t);
    Scalar::from_bytes_mod_order_wide(&hash.finalize().into())
}

/// Checks a DLEQ proof the way a client would.
///
/// Recomputes `Vt = βz·G − c·V` and `Wt = βz·U − c·W`, rederives the
/// challenge, and accepts only if it matches. The server itself never
/// needs this; it exists for the client half of the protocol and for
/// exercising the prover.
#[must_use]
pub fn verify_proof(
    public_key: &OprfPublicKey,
    blinded_input: &OprfBlindedInput,
    blinded_result: &OprfBlindedResult,
    proof: &OprfProof,
) -> bool {
    let Some(v) = CompressedRistretto(public_key.0).decompress() else {
        return false;
    };
    let Some(u) = CompressedRistretto(blinded_input.0).decompress() else {
        return false;
    };
    let Some(w) = CompressedRistretto(blinded_result.0).decompress() else {
        return false;
    };
    let Some(c) = Option::<Scalar>::from(Scalar::from_canonical_bytes(proof.c)) else {
        return false;
    };
    let Some(beta_z) = Option::<Scalar>::from(Scalar::from_canonical_bytes(proof.beta_z)) else {
        return false;
    };

    let v_t = RISTRETTO_BASEPOINT_POINT * beta_z - v * c;
    let w_t = u * beta_z - w * c;

    let expected = hash_to_challenge(
        &blinded_input.0,
        &public_key.0,
        &blinded_result.0,
        &v_t.compress().to_bytes(),
        &w_t.compress().to_bytes(),
    );

    expected == c
}
