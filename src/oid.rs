//! TR-03110 object identifiers
//!
//! The whole identifier space used by Terminal Authentication hangs off
//! the bsi-de root `0.4.0.127.0.7`:
//!
//! ```text
//! id-TA        = bsi-de.2.2.2          protocol family
//! id-TA-RSA    = id-TA.1               RSA signature variants
//! id-TA-ECDSA  = id-TA.2               ECDSA signature variants
//! id-roles     = bsi-de.3.1.2          terminal types (IS, AT, ST)
//! id-sector    = bsi-de.3.1.4.1        sector extension in CV certificates
//! ```
//!
//! OIDs are stored as their DER value bytes (no tag, no length) and
//! compared byte for byte.

use std::fmt;

use crate::error::{Result, TaError};

/// id-TA, the Terminal Authentication protocol identifier
pub const ID_TA: &[u8] = &[0x04, 0x00, 0x7F, 0x00, 0x07, 0x02, 0x02, 0x02];
/// id-TA-ECDSA-SHA-256
pub const ID_TA_ECDSA_SHA_256: &[u8] = &[0x04, 0x00, 0x7F, 0x00, 0x07, 0x02, 0x02, 0x02, 0x02, 0x03];
/// id-IS, inspection system terminal type
pub const ID_IS: &[u8] = &[0x04, 0x00, 0x7F, 0x00, 0x07, 0x03, 0x01, 0x02, 0x01];
/// id-AT, authentication terminal type
pub const ID_AT: &[u8] = &[0x04, 0x00, 0x7F, 0x00, 0x07, 0x03, 0x01, 0x02, 0x02];
/// id-ST, signature terminal type
pub const ID_ST: &[u8] = &[0x04, 0x00, 0x7F, 0x00, 0x07, 0x03, 0x01, 0x02, 0x03];
/// id-sector, the certificate extension carrying sector public key hashes
pub const ID_SECTOR: &[u8] = &[0x04, 0x00, 0x7F, 0x00, 0x07, 0x03, 0x01, 0x04, 0x01];

/// An OBJECT IDENTIFIER value
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Oid(Vec<u8>);

impl Oid {
    /// Parse from DER value bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(TaError::MalformedData("empty OID".into()));
        }
        if bytes.len() > 32 {
            return Err(TaError::MalformedData("OID too long".into()));
        }
        // the last byte of every subidentifier has bit 8 clear
        if bytes[bytes.len() - 1] & 0x80 != 0 {
            return Err(TaError::MalformedData("truncated OID subidentifier".into()));
        }
        Ok(Self(bytes.to_vec()))
    }

    /// Raw DER value bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Dotted-decimal notation
    pub fn to_dotted(&self) -> String {
        let mut arcs: Vec<u64> = Vec::new();
        let mut acc: u64 = 0;
        for &byte in &self.0 {
            acc = (acc << 7) | (byte & 0x7F) as u64;
            if byte & 0x80 == 0 {
                arcs.push(acc);
                acc = 0;
            }
        }
        let mut parts: Vec<String> = Vec::with_capacity(arcs.len() + 1);
        if let Some(&first) = arcs.first() {
            let (x, y) = if first < 40 {
                (0, first)
            } else if first < 80 {
                (1, first - 40)
            } else {
                (2, first - 80)
            };
            parts.push(x.to_string());
            parts.push(y.to_string());
            for arc in &arcs[1..] {
                parts.push(arc.to_string());
            }
        }
        parts.join(".")
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_dotted())
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Oid({})", self.to_dotted())
    }
}

impl serde::Serialize for Oid {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_dotted())
    }
}

/// Terminal type, carried as the CHAT OID of every certificate in a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub enum TerminalType {
    /// Inspection system (border control)
    InspectionSystem,
    /// Authentication terminal (eID services)
    AuthenticationTerminal,
    /// Signature terminal
    SignatureTerminal,
}

impl TerminalType {
    /// Classify a CHAT terminal-type OID
    pub fn from_oid(oid: &Oid) -> Result<Self> {
        match oid.as_bytes() {
            b if b == ID_IS => Ok(Self::InspectionSystem),
            b if b == ID_AT => Ok(Self::AuthenticationTerminal),
            b if b == ID_ST => Ok(Self::SignatureTerminal),
            _ => Err(TaError::MalformedData(format!(
                "unknown terminal type {oid}"
            ))),
        }
    }

    /// The OID this type is encoded as
    pub fn oid(self) -> Oid {
        let bytes = match self {
            Self::InspectionSystem => ID_IS,
            Self::AuthenticationTerminal => ID_AT,
            Self::SignatureTerminal => ID_ST,
        };
        Oid(bytes.to_vec())
    }
}

/// Signature family of a TA mechanism OID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureFamily {
    /// id-TA-RSA subtree
    Rsa,
    /// id-TA-ECDSA subtree
    Ecdsa,
}

/// Hash algorithm bound to a TA mechanism OID
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum HashAlgorithm {
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

/// A parsed terminal-authentication mechanism reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaMechanism {
    oid: Oid,
    family: SignatureFamily,
    hash: HashAlgorithm,
}

impl TaMechanism {
    /// Classify an OID from the id-TA subtree.
    ///
    /// Accepts exactly the RSA variants id-TA.1.{1..6} and the ECDSA
    /// variants id-TA.2.{1..5}; anything else is malformed.
    pub fn from_oid(oid: &Oid) -> Result<Self> {
        let bytes = oid.as_bytes();
        let suffix = bytes
            .strip_prefix(ID_TA)
            .ok_or_else(|| TaError::MalformedData(format!("not a TA mechanism: {oid}")))?;
        let (family, hash) = match suffix {
            [0x01, variant] => {
                let hash = match *variant {
                    0x01 | 0x03 => HashAlgorithm::Sha1,
                    0x02 | 0x04 => HashAlgorithm::Sha256,
                    0x05 | 0x06 => HashAlgorithm::Sha512,
                    _ => {
                        return Err(TaError::MalformedData(format!(
                            "unknown RSA variant in {oid}"
                        )))
                    }
                };
                (SignatureFamily::Rsa, hash)
            }
            [0x02, variant] => {
                let hash = match *variant {
                    0x01 => HashAlgorithm::Sha1,
                    0x02 => HashAlgorithm::Sha224,
                    0x03 => HashAlgorithm::Sha256,
                    0x04 => HashAlgorithm::Sha384,
                    0x05 => HashAlgorithm::Sha512,
                    _ => {
                        return Err(TaError::MalformedData(format!(
                            "unknown ECDSA variant in {oid}"
                        )))
                    }
                };
                (SignatureFamily::Ecdsa, hash)
            }
            _ => {
                return Err(TaError::MalformedData(format!(
                    "not a TA signature mechanism: {oid}"
                )))
            }
        };
        Ok(Self {
            oid: oid.clone(),
            family,
            hash,
        })
    }

    /// The mechanism OID
    pub fn oid(&self) -> &Oid {
        &self.oid
    }

    /// Signature family
    pub fn family(&self) -> SignatureFamily {
        self.family
    }

    /// Bound hash algorithm
    pub fn hash(&self) -> HashAlgorithm {
        self.hash
    }
}
