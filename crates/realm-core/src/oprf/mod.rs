//! Server side of the verifiable OPRF.
//!
//! The construction is 2HashDH over Ristretto255: the client submits a
//! blinded point `U`, the server returns `W = β·U` together with a
//! Chaum-Pedersen DLEQ proof that the same `β` underlies its committed
//! public key `V = β·G`. The client unblinds `W` to obtain the PRF output
//! without the server ever learning the input.

use std::io::Read;

use curve25519_dalek::ristretto::CompressedRistretto;
use curve25519_dalek::scalar::Scalar;
use thiserror::Error;

use crate::types::{OprfBlindedInput, OprfBlindedResult, OprfPrivateKey, OprfProof, OprfPublicKey};

mod dleq;

pub use dleq::verify_proof;

/// Errors from a blind evaluation.
#[derive(Debug, Error)]
pub enum OprfError {
    /// The stored private key was not a canonical Ristretto255 scalar.
    #[error("oprf private key is not a canonical scalar")]
    InvalidPrivateKey,
    /// The submitted blinded input was not a canonical Ristretto255 point.
    #[error("blinded input is not a canonical group element")]
    InvalidBlindedInput,
    /// The RNG failed or returned fewer bytes than requested.
    ///
    /// Short reads must surface rather than silently seeding the proof
    /// nonce from less entropy than it needs.
    #[error("rng: {0}")]
    Rng(#[from] std::io::Error),
}

/// Runs the OPRF evaluation and generates a DLEQ proof.
///
/// `rng` must yield 64 bytes for the proof nonce; production callers pass
/// the system CSPRNG, tests pass a fixed byte buffer to reproduce the
/// published vectors. The public key participates in the proof transcript
/// as its canonical 32-byte encoding and is not otherwise interpreted.
///
/// # Errors
///
/// Fails if the private key or blinded input do not decode, or if the RNG
/// cannot supply 64 bytes.
pub fn blind_evaluate(
    private_key: &OprfPrivateKey,
    public_key: &OprfPublicKey,
    blinded_input: &OprfBlindedInput,
    rng: &mut dyn Read,
) -> Result<(OprfBlindedResult, OprfProof), OprfError> {
    let beta = Option::<Scalar>::from(Scalar::from_canonical_bytes(private_key.0))
        .ok_or(OprfError::InvalidPrivateKey)?;

    let u = CompressedRistretto(blinded_input.0)
        .decompress()
        .ok_or(OprfError::InvalidBlindedInput)?;

    let w = beta * u;

    let proof = dleq::generate_proof(&beta, &u, public_key, &w, rng)?;

    Ok((OprfBlindedResult(w.compress().to_bytes()), proof))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(hex_str: &str) -> OprfPrivateKey {
        OprfPrivateKey(hex::decode(hex_str).unwrap().try_into().unwrap())
    }

    fn public(hex_str: &str) -> OprfPublicKey {
        OprfPublicKey(hex::decode(hex_str).unwrap().try_into().unwrap())
    }

    fn input(hex_str: &str) -> OprfBlindedInput {
        OprfBlindedInput(hex::decode(hex_str).unwrap().try_into().unwrap())
    }

    // Regression vector carried from the protocol's reference suite. The
    // proof nonce seed is fed through a fixed 64-byte reader, so the full
    // evaluation is deterministic.
    #[test]
    fn test_fixed_vector() {
        let private_key = key("0202020202020202020202020202020202020202020202020202020202020202");
        let public_key = public("0101010101010101010101010101010101010101010101010101010101010101");
        let blinded_input =
            input("e692d0f32296e90197f4557c744299d23e1dc26cda1aea5aa754b46cee59557c");
        let beta_t_seed = hex::decode(
            "d26f293ccf9cb05517a385986605134a1ce6036ae560bbea8f32745db5a13746\
             c25db6612a8ff96c03a84b5b963061b405fca21a6b80ddfbbb9f4b6a5deffe68",
        )
        .unwrap();

        let (result, proof) = blind_evaluate(
            &private_key,
            &public_key,
            &blinded_input,
            &mut beta_t_seed.as_slice(),
        )
        .unwrap();

        assert_eq!(
            hex::encode(result.0),
            "1c63e037d5990232a8fd52d9898382fce188e0cce31857829e3b93f977c0795c"
        );
        assert_eq!(
            hex::encode(proof.c),
            "fc9adf8139c3c92a14661f314ae19b96c4480628edcbacff9243a47be9e0d802"
        );
        assert_eq!(
            hex::encode(proof.beta_z),
            "6214eb4077723dde98bd519a777d5f54c817ad0d02c440f99396b908a6d77703"
        );
    }

    #[test]
    fn test_deterministic_for_fixed_rng() {
        let private_key = key("cca1a0304b113ec01cafa2545c0428497fd65a4924b4697033f5c19aaec2ac0a");
        let public_key = public("9e2bc4e246e540092324937ed33fd01caf0297137e35345c32ecf49e87e35056");
        let blinded_input =
            input("a8767323a469385742eb85b73a3d51372f4e15d336f72567eb12d3410fa6815c");
        let seed = [0x5Au8; 64];

        let first =
            blind_evaluate(&private_key, &public_key, &blinded_input, &mut &seed[..]).unwrap();
        let second =
            blind_evaluate(&private_key, &public_key, &blinded_input, &mut &seed[..]).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_insufficient_entropy() {
        let private_key = key("cca1a0304b113ec01cafa2545c0428497fd65a4924b4697033f5c19aaec2ac0a");
        let public_key = public("9e2bc4e246e540092324937ed33fd01caf0297137e35345c32ecf49e87e35056");
        let blinded_input =
            input("a8767323a469385742eb85b73a3d51372f4e15d336f72567eb12d3410fa6815c");

        // Intentionally 63 bytes instead of the required 64.
        let seed = hex::decode(
            "e3338a037375a11171895585f670ea0a2a195d99f60c0d75a649ed565364b397\
             6eb10bce2dd4c8eed0ffc0597de08e879142590faa87cee2be4d9241909077",
        )
        .unwrap();

        let err =
            blind_evaluate(&private_key, &public_key, &blinded_input, &mut seed.as_slice())
                .unwrap_err();
        match err {
            OprfError::Rng(io) => {
                assert_eq!(io.kind(), std::io::ErrorKind::UnexpectedEof);
            }
            other => panic!("expected rng error, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_private_key_rejected() {
        // All 0xFF is far above the group order and not canonical.
        let private_key = OprfPrivateKey([0xFF; 32]);
        let public_key = OprfPublicKey([1; 32]);
        let blinded_input =
            input("a8767323a469385742eb85b73a3d51372f4e15d336f72567eb12d3410fa6815c");
        let seed = [0u8; 64];

        let err = blind_evaluate(&private_key, &public_key, &blinded_input, &mut &seed[..])
            .unwrap_err();
        assert!(matches!(err, OprfError::InvalidPrivateKey));
    }

    #[test]
    fn test_invalid_blinded_input_rejected() {
        let private_key = key("cca1a0304b113ec01cafa2545c0428497fd65a4924b4697033f5c19aaec2ac0a");
        let public_key = public("9e2bc4e246e540092324937ed33fd01caf0297137e35345c32ecf49e87e35056");
        // 0xFF.. is not a canonical field element encoding.
        let blinded_input = OprfBlindedInput([0xFF; 32]);
        let seed = [0u8; 64];

        let err = blind_evaluate(&private_key, &public_key, &blinded_input, &mut &seed[..])
            .unwrap_err();
        assert!(matches!(err, OprfError::InvalidBlindedInput));
    }
}
