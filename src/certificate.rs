//! Card-Verifiable Certificates
//!
//! A CVC is the compact certificate format of TR-03110. The outer object
//! `7F21` wraps a body `7F4E` and a signature `5F37`; the body carries, in
//! order, the profile identifier, the issuer reference (CAR), the public
//! key, the holder reference (CHR), the holder authorization template
//! (CHAT), the effective and expiration dates and an optional extensions
//! container:
//!
//! ```text
//! 7F21 ( 7F4E ( 5F29 42 7F49 5F20 7F4C 5F25 5F24 [65] )  5F37 )
//! ```
//!
//! Certificates are value objects, immutable once parsed. The raw body
//! bytes are retained verbatim because they are exactly what the issuer
//! signed.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::{Result, TaError};
use crate::oid::{self, Oid};
use crate::tlv::{self, Tlv};

// Context tags inside the public key object 7F49. For EC keys 81..85 and
// 87 are the domain parameters and 86 is the public point; for RSA keys
// 81 is the modulus and 82 the public exponent.
const TAG_PK_FIRST: u32 = 0x81;
const TAG_PK_LAST: u32 = 0x87;
const TAG_PK_PUBLIC_POINT: u32 = 0x86;

/// Certification authority / certificate holder reference.
///
/// Country code (2), holder mnemonic (up to 9) and sequence number (5),
/// ISO 8859-1. Compared byte for byte everywhere in the protocol.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKeyReference(Vec<u8>);

impl PublicKeyReference {
    /// Parse and validate a reference
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if !(8..=16).contains(&bytes.len()) {
            return Err(TaError::MalformedData(format!(
                "public-key reference must be 8..=16 bytes, got {}",
                bytes.len()
            )));
        }
        if bytes.iter().any(|b| !(0x20..=0x7E).contains(b)) {
            return Err(TaError::MalformedData(
                "public-key reference contains non-printable bytes".into(),
            ));
        }
        Ok(Self(bytes.to_vec()))
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for PublicKeyReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for PublicKeyReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKeyReference({self})")
    }
}

/// Role of a certificate holder, encoded in the top two bits of the
/// first byte of the CHAT relative authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateRole {
    /// Country verifying CA (root of a chain)
    Cvca,
    /// Domestic document verifier
    DvDomestic,
    /// Foreign document verifier
    DvForeign,
    /// Terminal (leaf)
    Terminal,
}

impl CertificateRole {
    /// Whether this is the CVCA role
    pub fn is_cvca(self) -> bool {
        self == Self::Cvca
    }

    /// Whether this is either DV role
    pub fn is_dv(self) -> bool {
        matches!(self, Self::DvDomestic | Self::DvForeign)
    }

    /// Whether this is the terminal role
    pub fn is_terminal(self) -> bool {
        self == Self::Terminal
    }
}

/// Certificate Holder Authorization Template: terminal type plus the
/// relative authorization bitfield
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chat {
    /// Terminal-type OID
    pub terminal_type: Oid,
    /// Relative authorization, big-endian bitfield; the first byte also
    /// carries the role bits
    pub relative_authorization: Vec<u8>,
}

impl Chat {
    fn from_tlv(obj: &Tlv) -> Result<Self> {
        let children = obj.children()?;
        let terminal_type = tlv::find(&children, tlv::TAG_OID)
            .ok_or_else(|| TaError::MalformedData("CHAT without terminal-type OID".into()))?;
        let authorization = tlv::find(&children, tlv::TAG_DISCRETIONARY_DATA)
            .ok_or_else(|| TaError::MalformedData("CHAT without relative authorization".into()))?;
        if authorization.value.is_empty() {
            return Err(TaError::MalformedData("empty relative authorization".into()));
        }
        Ok(Self {
            terminal_type: Oid::from_bytes(&terminal_type.value)?,
            relative_authorization: authorization.value.clone(),
        })
    }

    /// Role encoded in the authorization's leading bits
    pub fn role(&self) -> CertificateRole {
        match self.relative_authorization[0] & 0xC0 {
            0xC0 => CertificateRole::Cvca,
            0x80 => CertificateRole::DvDomestic,
            0x40 => CertificateRole::DvForeign,
            _ => CertificateRole::Terminal,
        }
    }
}

/// Public key carried in a certificate: mechanism OID plus the key
/// objects, kept by their context tag. EC keys may arrive with the
/// domain parameters omitted and inherit them from the issuer key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CvcPublicKey {
    oid: Oid,
    objects: BTreeMap<u32, Vec<u8>>,
}

impl CvcPublicKey {
    /// Parse a public key object (tag `7F49`)
    pub fn from_tlv(obj: &Tlv) -> Result<Self> {
        let children = obj.children()?;
        let oid = tlv::find(&children, tlv::TAG_OID)
            .ok_or_else(|| TaError::MalformedData("public key without mechanism OID".into()))?;
        let mut objects = BTreeMap::new();
        for child in &children {
            if (TAG_PK_FIRST..=TAG_PK_LAST).contains(&child.tag) {
                objects.insert(child.tag, child.value.clone());
            }
        }
        Ok(Self {
            oid: Oid::from_bytes(&oid.value)?,
            objects,
        })
    }

    /// Mechanism OID of this key
    pub fn oid(&self) -> &Oid {
        &self.oid
    }

    /// Key object by its context tag
    pub fn object(&self, tag: u32) -> Option<&[u8]> {
        self.objects.get(&tag).map(Vec::as_slice)
    }

    /// EC public point (tag 86), uncompressed SEC1 encoding
    pub fn public_point(&self) -> Option<&[u8]> {
        self.object(TAG_PK_PUBLIC_POINT)
    }

    /// Inherit domain parameters from the issuer key.
    ///
    /// Fills every key object the certificate omitted, except the public
    /// point itself, from the issuer. A key that already carries a
    /// parameter keeps its own value.
    pub fn update_key(&mut self, issuer: &CvcPublicKey) {
        for (tag, value) in &issuer.objects {
            if *tag == TAG_PK_PUBLIC_POINT {
                continue;
            }
            self.objects.entry(*tag).or_insert_with(|| value.clone());
        }
    }
}

/// One certificate extension: an OID and its data objects in encountered
/// order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Extension {
    /// Extension OID
    pub oid: Oid,
    /// Data objects following the OID, in order
    pub objects: Vec<Tlv>,
}

/// A parsed Card-Verifiable Certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cvc {
    body: Vec<u8>,
    signature: Vec<u8>,
    car: PublicKeyReference,
    chr: PublicKeyReference,
    public_key: CvcPublicKey,
    chat: Chat,
    effective_date: NaiveDate,
    expiration_date: NaiveDate,
    extensions: Vec<Extension>,
}

impl Cvc {
    /// Parse a complete certificate from its outer `7F21` encoding
    pub fn from_bytes(input: &[u8]) -> Result<Self> {
        let outer = Tlv::parse_exact(input)?;
        if outer.tag != tlv::TAG_CVC {
            return Err(TaError::MalformedData(format!(
                "expected certificate tag 7F21, got {:X}",
                outer.tag
            )));
        }
        let children = outer.children()?;
        let body = tlv::find(&children, tlv::TAG_CVC_BODY)
            .ok_or_else(|| TaError::MalformedData("certificate without body".into()))?;
        let signature = tlv::find(&children, tlv::TAG_CVC_SIGNATURE)
            .ok_or_else(|| TaError::MalformedData("certificate without signature".into()))?;
        Self::from_parts(body, &signature.value)
    }

    /// Rebuild the outer certificate from a transmitted body and
    /// signature, as PSO:Verify Certificate delivers them
    pub fn from_body_and_signature(body: &[u8], signature: &[u8]) -> Result<Self> {
        let body_obj = Tlv::parse_exact(body)?;
        if body_obj.tag != tlv::TAG_CVC_BODY {
            return Err(TaError::MalformedData(format!(
                "expected body tag 7F4E, got {:X}",
                body_obj.tag
            )));
        }
        Self::from_parts(&body_obj, signature)
    }

    fn from_parts(body: &Tlv, signature: &[u8]) -> Result<Self> {
        let fields = body.children()?;
        tlv::find(&fields, tlv::TAG_CPI)
            .ok_or_else(|| TaError::MalformedData("missing certificate profile identifier".into()))?;
        let car = tlv::find(&fields, tlv::TAG_CAR)
            .ok_or_else(|| TaError::MalformedData("missing authority reference".into()))?;
        let public_key = tlv::find(&fields, tlv::TAG_PUBLIC_KEY)
            .ok_or_else(|| TaError::MalformedData("missing public key".into()))?;
        let chr = tlv::find(&fields, tlv::TAG_CHR)
            .ok_or_else(|| TaError::MalformedData("missing holder reference".into()))?;
        let chat = tlv::find(&fields, tlv::TAG_CHAT)
            .ok_or_else(|| TaError::MalformedData("missing holder authorization template".into()))?;
        let effective = tlv::find(&fields, tlv::TAG_EFFECTIVE_DATE)
            .ok_or_else(|| TaError::MalformedData("missing effective date".into()))?;
        let expiration = tlv::find(&fields, tlv::TAG_EXPIRATION_DATE)
            .ok_or_else(|| TaError::MalformedData("missing expiration date".into()))?;

        let mut extensions = Vec::new();
        if let Some(container) = tlv::find(&fields, tlv::TAG_EXTENSIONS) {
            for template in container.children()? {
                if template.tag != tlv::TAG_AUXILIARY_DATUM {
                    return Err(TaError::MalformedData(format!(
                        "unexpected extension tag {:X}",
                        template.tag
                    )));
                }
                let mut objects = template.children()?;
                if objects.is_empty() || objects[0].tag != tlv::TAG_OID {
                    return Err(TaError::MalformedData("extension without OID".into()));
                }
                let ext_oid = Oid::from_bytes(&objects.remove(0).value)?;
                extensions.push(Extension {
                    oid: ext_oid,
                    objects,
                });
            }
        }

        Ok(Self {
            body: body.encode(),
            signature: signature.to_vec(),
            car: PublicKeyReference::from_bytes(&car.value)?,
            chr: PublicKeyReference::from_bytes(&chr.value)?,
            public_key: CvcPublicKey::from_tlv(public_key)?,
            chat: Chat::from_tlv(chat)?,
            effective_date: parse_cvc_date(&effective.value)?,
            expiration_date: parse_cvc_date(&expiration.value)?,
            extensions,
        })
    }

    /// The exact byte sequence the issuer signed
    pub fn body_bytes(&self) -> &[u8] {
        &self.body
    }

    /// Raw signature bytes; for EC mechanisms this is the plain `r || s`
    /// concatenation
    pub fn signature_bytes(&self) -> &[u8] {
        &self.signature
    }

    /// Issuer reference
    pub fn car(&self) -> &PublicKeyReference {
        &self.car
    }

    /// Holder reference
    pub fn chr(&self) -> &PublicKeyReference {
        &self.chr
    }

    /// Holder public key
    pub fn public_key(&self) -> &CvcPublicKey {
        &self.public_key
    }

    /// Holder authorization template
    pub fn chat(&self) -> &Chat {
        &self.chat
    }

    /// Holder role from the CHAT
    pub fn role(&self) -> CertificateRole {
        self.chat.role()
    }

    /// First day this certificate is valid
    pub fn effective_date(&self) -> NaiveDate {
        self.effective_date
    }

    /// Last day this certificate is valid (inclusive)
    pub fn expiration_date(&self) -> NaiveDate {
        self.expiration_date
    }

    /// Certificate extensions in encountered order
    pub fn extensions(&self) -> &[Extension] {
        &self.extensions
    }

    /// Inherit missing EC domain parameters from an issuer key
    pub fn inherit_domain_parameters(&mut self, issuer: &CvcPublicKey) {
        self.public_key.update_key(issuer);
    }

    /// Sector public key hashes from the sector extension, if present.
    /// Tag 80 holds the first hash, tag 81 the second; either may be
    /// absent.
    pub fn sector_hashes(&self) -> (Option<&[u8]>, Option<&[u8]>) {
        let sector = self
            .extensions
            .iter()
            .find(|e| e.oid.as_bytes() == oid::ID_SECTOR);
        match sector {
            Some(ext) => (
                tlv::find(&ext.objects, tlv::TAG_CRYPTOGRAPHIC_MECHANISM).map(|o| o.value.as_slice()),
                tlv::find(&ext.objects, tlv::TAG_SECOND_SECTOR_HASH).map(|o| o.value.as_slice()),
            ),
            None => (None, None),
        }
    }
}

/// Parse a CVC date: six unpacked BCD digits, YYMMDD, years 2000-2099
pub fn parse_cvc_date(bytes: &[u8]) -> Result<NaiveDate> {
    if bytes.len() != 6 || bytes.iter().any(|b| *b > 9) {
        return Err(TaError::MalformedData("date must be six BCD digits".into()));
    }
    let year = 2000 + (bytes[0] as i32) * 10 + bytes[1] as i32;
    let month = (bytes[2] as u32) * 10 + bytes[3] as u32;
    let day = (bytes[4] as u32) * 10 + bytes[5] as u32;
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| TaError::MalformedData(format!("invalid date {year}-{month:02}-{day:02}")))
}

/// Encode a date as six unpacked BCD digits, YYMMDD
pub fn encode_cvc_date(date: NaiveDate) -> [u8; 6] {
    use chrono::Datelike;
    let year = (date.year() - 2000).clamp(0, 99) as u8;
    let month = date.month() as u8;
    let day = date.day() as u8;
    [year / 10, year % 10, month / 10, month % 10, day / 10, day % 10]
}
