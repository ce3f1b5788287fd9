//! Card security status and its mechanism entries
//!
//! The security status is the card-wide record of what the current
//! session has proven. PACE deposits a `PaceMechanism` (and the confined
//! authorization set agreed by the card holder) before Terminal
//! Authentication starts; a successful External Authenticate appends the
//! `TerminalAuthenticationMechanism` and the effective authorization.
//! Entries are only ever appended, never removed.

use serde::{Serialize, Serializer};

use crate::authorization::AuthorizationStore;
use crate::certificate::Extension;
use crate::error::{Result, TaError};
use crate::oid::{HashAlgorithm, Oid, TerminalType};

fn hex_bytes<S: Serializer>(bytes: &Vec<u8>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(bytes))
}

fn hex_bytes_opt<S: Serializer>(
    bytes: &Option<Vec<u8>>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match bytes {
        Some(b) => serializer.serialize_some(&hex::encode(b)),
        None => serializer.serialize_none(),
    }
}

/// Residue of a completed PACE run, as far as Terminal Authentication
/// consumes it
#[derive(Debug, Clone, Serialize)]
pub struct PaceMechanism {
    /// Terminal type the card holder authenticated for
    pub terminal_type: TerminalType,
    /// Compressed ephemeral chip public key (idICC)
    #[serde(serialize_with = "hex_bytes")]
    pub compressed_ephemeral_chip_key: Vec<u8>,
}

/// Authorization set confined by the card holder during PACE
#[derive(Debug, Clone, Serialize)]
pub struct ConfinedAuthorizationMechanism {
    /// OID-keyed starting authorizations
    pub authorizations: AuthorizationStore,
}

/// One auxiliary authenticated datum from MSE:Set AT (tag 73)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuxiliaryDatum {
    /// Datum type
    pub oid: Oid,
    /// Discretionary data (tag 53)
    #[serde(serialize_with = "hex_bytes")]
    pub data: Vec<u8>,
    /// Full encoding of the tag-73 object, preserved for signature input
    /// reconstruction
    #[serde(serialize_with = "hex_bytes")]
    pub encoded: Vec<u8>,
}

/// Record of a successful Terminal Authentication
#[derive(Debug, Clone, Serialize)]
pub struct TerminalAuthenticationMechanism {
    /// Compressed ephemeral public key the terminal committed to
    #[serde(serialize_with = "hex_bytes")]
    pub compressed_terminal_ephemeral_key: Vec<u8>,
    /// Authenticated terminal type
    pub terminal_type: TerminalType,
    /// Auxiliary data the terminal signed, in received order
    pub auxiliary_data: Vec<AuxiliaryDatum>,
    /// First sector public key hash from the terminal certificate
    #[serde(serialize_with = "hex_bytes_opt")]
    pub first_sector_public_key_hash: Option<Vec<u8>>,
    /// Second sector public key hash from the terminal certificate
    #[serde(serialize_with = "hex_bytes_opt")]
    pub second_sector_public_key_hash: Option<Vec<u8>>,
    /// Hash algorithm of the authentication mechanism
    pub hash_algorithm: HashAlgorithm,
    /// Extensions of the terminal certificate
    pub certificate_extensions: Vec<Extension>,
}

/// Authorizations effectively granted to the authenticated terminal
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveAuthorizationMechanism {
    /// Final, chain-narrowed authorization set
    pub authorizations: AuthorizationStore,
}

/// A single entry of the security status
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mechanism")]
pub enum SecurityMechanism {
    /// PACE residue
    Pace(PaceMechanism),
    /// Confined authorizations from PACE
    ConfinedAuthorization(ConfinedAuthorizationMechanism),
    /// Terminal Authentication result
    TerminalAuthentication(TerminalAuthenticationMechanism),
    /// Effective authorizations after Terminal Authentication
    EffectiveAuthorization(EffectiveAuthorizationMechanism),
}

/// Append-only mechanism list shared across the protocols of a session
#[derive(Debug, Clone, Default, Serialize)]
pub struct SecurityStatus {
    mechanisms: Vec<SecurityMechanism>,
}

impl SecurityStatus {
    /// Empty status, the state right after card power-up
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry
    pub fn push(&mut self, mechanism: SecurityMechanism) {
        self.mechanisms.push(mechanism);
    }

    /// All entries in deposit order
    pub fn mechanisms(&self) -> &[SecurityMechanism] {
        &self.mechanisms
    }

    /// All PACE entries
    pub fn pace_mechanisms(&self) -> Vec<&PaceMechanism> {
        self.mechanisms
            .iter()
            .filter_map(|m| match m {
                SecurityMechanism::Pace(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    /// The confined-authorization entry, if PACE deposited one
    pub fn confined_authorization(&self) -> Option<&ConfinedAuthorizationMechanism> {
        self.mechanisms.iter().find_map(|m| match m {
            SecurityMechanism::ConfinedAuthorization(c) => Some(c),
            _ => None,
        })
    }

    /// All Terminal Authentication entries
    pub fn terminal_authentications(&self) -> Vec<&TerminalAuthenticationMechanism> {
        self.mechanisms
            .iter()
            .filter_map(|m| match m {
                SecurityMechanism::TerminalAuthentication(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    /// The effective-authorization entry, present after a successful
    /// Terminal Authentication
    pub fn effective_authorization(&self) -> Option<&EffectiveAuthorizationMechanism> {
        self.mechanisms.iter().find_map(|m| match m {
            SecurityMechanism::EffectiveAuthorization(e) => Some(e),
            _ => None,
        })
    }

    /// Encode to JSON for inspection tooling
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| TaError::ImplementationError(format!("JSON encode error: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authorization::RelativeAuthorization;
    use crate::oid::ID_AT;

    fn pace_status() -> SecurityStatus {
        let mut status = SecurityStatus::new();
        status.push(SecurityMechanism::Pace(PaceMechanism {
            terminal_type: TerminalType::AuthenticationTerminal,
            compressed_ephemeral_chip_key: vec![0x1A; 32],
        }));
        let mut authorizations = AuthorizationStore::new();
        authorizations.insert(
            Oid::from_bytes(ID_AT).unwrap(),
            RelativeAuthorization::from_bytes(&[0x3F, 0xFF, 0xFF, 0xFF, 0xFF]),
        );
        status.push(SecurityMechanism::ConfinedAuthorization(
            ConfinedAuthorizationMechanism { authorizations },
        ));
        status
    }

    #[test]
    fn test_typed_accessors() {
        let status = pace_status();
        assert_eq!(status.pace_mechanisms().len(), 1);
        assert!(status.confined_authorization().is_some());
        assert!(status.terminal_authentications().is_empty());
        assert!(status.effective_authorization().is_none());
        assert_eq!(status.mechanisms().len(), 2);
    }

    #[test]
    fn test_to_json() {
        let json = pace_status().to_json().unwrap();
        assert!(json.contains("\"mechanism\": \"Pace\""));
        assert!(json.contains("AuthenticationTerminal"));
        assert!(json.contains(&hex::encode([0x1A; 32])));
        assert!(json.contains("0.4.0.127.0.7.3.1.2.2"));
    }
}
