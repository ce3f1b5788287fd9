//! Signature verification boundary
//!
//! The engine never touches curve arithmetic itself. It normalises the
//! signature encoding (TR-03110 transports EC signatures as the plain
//! `r || s` concatenation, verifiers expect a DER SEQUENCE of two
//! INTEGERs) and hands everything to a [`TaVerifier`]. The built-in
//! [`EcdsaEngine`] covers the id-TA-ECDSA-SHA-256 profile; an embedder
//! with other curves or RSA plugs in its own verifier.

use std::fmt;

use k256::ecdsa::signature::Verifier;
use k256::ecdsa::{Signature, VerifyingKey};

use crate::certificate::CvcPublicKey;
use crate::error::{Result, TaError};
use crate::oid::{HashAlgorithm, SignatureFamily, TaMechanism};
use crate::tlv::{Tlv, TAG_INTEGER, TAG_SEQUENCE};

/// Outcome of a signature verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Signature verifies
    Ok,
    /// Inputs were well-formed but the signature does not match
    BadSignature,
    /// Verification could not be attempted
    Failure(CryptoFailure),
}

/// Why a verification could not be attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoFailure {
    /// The mechanism OID is outside what this verifier supports
    UnsupportedMechanism,
    /// The public key is missing objects or not decodable
    MalformedKey,
    /// The signature bytes are not decodable
    MalformedSignature,
}

impl fmt::Display for CryptoFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::UnsupportedMechanism => "unsupported mechanism",
            Self::MalformedKey => "malformed public key",
            Self::MalformedSignature => "malformed signature",
        };
        write!(f, "{text}")
    }
}

/// Pluggable signature verifier.
///
/// RSA-family signatures are passed through as-is; EC-family signatures
/// arrive already reshaped into a DER SEQUENCE.
pub trait TaVerifier {
    /// Verify `signature` over `message` under `key` and `mechanism`
    fn verify(
        &self,
        mechanism: &TaMechanism,
        key: &CvcPublicKey,
        message: &[u8],
        signature: &[u8],
    ) -> VerifyOutcome;
}

/// Reshape a plain `r || s` signature into the ASN.1 SEQUENCE of two
/// unsigned INTEGERs that signature verifiers expect. Leading zero bytes
/// are stripped and a zero byte is prepended where the most significant
/// bit is set.
pub fn wrap_plain_signature(raw: &[u8]) -> Result<Vec<u8>> {
    if raw.is_empty() || raw.len() % 2 != 0 {
        return Err(TaError::MalformedData(format!(
            "plain EC signature must split evenly, got {} bytes",
            raw.len()
        )));
    }
    let (r, s) = raw.split_at(raw.len() / 2);
    let sequence = Tlv::constructed(TAG_SEQUENCE, &[der_unsigned_integer(r), der_unsigned_integer(s)]);
    Ok(sequence.encode())
}

fn der_unsigned_integer(bytes: &[u8]) -> Tlv {
    let stripped: &[u8] = match bytes.iter().position(|b| *b != 0) {
        Some(pos) => &bytes[pos..],
        None => &[0x00],
    };
    let mut value = Vec::with_capacity(stripped.len() + 1);
    if stripped[0] & 0x80 != 0 {
        value.push(0x00);
    }
    value.extend_from_slice(stripped);
    Tlv::new(TAG_INTEGER, value)
}

/// Built-in ECDSA verification engine (secp256k1, SHA-256).
///
/// Supports exactly the id-TA-ECDSA-SHA-256 mechanism; everything else
/// reports [`CryptoFailure::UnsupportedMechanism`] so an embedder
/// notices rather than silently accepting.
#[derive(Debug, Clone, Copy, Default)]
pub struct EcdsaEngine;

impl TaVerifier for EcdsaEngine {
    fn verify(
        &self,
        mechanism: &TaMechanism,
        key: &CvcPublicKey,
        message: &[u8],
        signature: &[u8],
    ) -> VerifyOutcome {
        if mechanism.family() != SignatureFamily::Ecdsa
            || mechanism.hash() != HashAlgorithm::Sha256
        {
            return VerifyOutcome::Failure(CryptoFailure::UnsupportedMechanism);
        }
        let point = match key.public_point() {
            Some(point) => point,
            None => return VerifyOutcome::Failure(CryptoFailure::MalformedKey),
        };
        let verifying_key = match VerifyingKey::from_sec1_bytes(point) {
            Ok(key) => key,
            Err(_) => return VerifyOutcome::Failure(CryptoFailure::MalformedKey),
        };
        let signature = match Signature::from_der(signature) {
            Ok(sig) => sig,
            Err(_) => return VerifyOutcome::Failure(CryptoFailure::MalformedSignature),
        };
        if verifying_key.verify(message, &signature).is_ok() {
            VerifyOutcome::Ok
        } else {
            VerifyOutcome::BadSignature
        }
    }
}
