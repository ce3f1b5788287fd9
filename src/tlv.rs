//! BER-TLV codec
//!
//! Everything the terminal sends and every certificate field is a BER-TLV
//! data object. The engine only needs definite lengths (short form plus
//! one- and two-byte long form) and tags of up to three bytes, which covers
//! the full TR-03110 tag set used here.

use std::fmt;

use serde::ser::SerializeStruct;

use crate::error::{Result, TaError};

/// OBJECT IDENTIFIER
pub const TAG_OID: u32 = 0x06;
/// Discretionary data
pub const TAG_DISCRETIONARY_DATA: u32 = 0x53;
/// Auxiliary authenticated data container
pub const TAG_AUXILIARY_DATA: u32 = 0x67;
/// Individual auxiliary datum (discretionary data template)
pub const TAG_AUXILIARY_DATUM: u32 = 0x73;
/// CV certificate, outer object
pub const TAG_CVC: u32 = 0x7F21;
/// CV certificate body
pub const TAG_CVC_BODY: u32 = 0x7F4E;
/// CV certificate signature
pub const TAG_CVC_SIGNATURE: u32 = 0x5F37;
/// Certificate profile identifier
pub const TAG_CPI: u32 = 0x5F29;
/// Certification authority reference
pub const TAG_CAR: u32 = 0x42;
/// Public key object
pub const TAG_PUBLIC_KEY: u32 = 0x7F49;
/// Certificate holder reference
pub const TAG_CHR: u32 = 0x5F20;
/// Certificate holder authorization template
pub const TAG_CHAT: u32 = 0x7F4C;
/// Certificate effective date
pub const TAG_EFFECTIVE_DATE: u32 = 0x5F25;
/// Certificate expiration date
pub const TAG_EXPIRATION_DATE: u32 = 0x5F24;
/// Certificate extensions container
pub const TAG_EXTENSIONS: u32 = 0x65;
/// Public-key reference (MSE data field)
pub const TAG_PUBLIC_KEY_REFERENCE: u32 = 0x83;
/// Cryptographic mechanism reference (MSE data field), also the first
/// sector public key hash inside the sector extension
pub const TAG_CRYPTOGRAPHIC_MECHANISM: u32 = 0x80;
/// Second sector public key hash inside the sector extension
pub const TAG_SECOND_SECTOR_HASH: u32 = 0x81;
/// Compressed ephemeral public key of the terminal (MSE data field)
pub const TAG_COMPRESSED_EPHEMERAL_KEY: u32 = 0x91;
/// ASN.1 SEQUENCE
pub const TAG_SEQUENCE: u32 = 0x30;
/// ASN.1 INTEGER
pub const TAG_INTEGER: u32 = 0x02;

/// A single BER-TLV data object. The tag is kept as its raw big-endian
/// byte pattern (`0x7F21`, not a decoded tag number).
#[derive(Clone, PartialEq, Eq)]
pub struct Tlv {
    /// Raw tag bytes, big-endian
    pub tag: u32,
    /// Value field
    pub value: Vec<u8>,
}

impl Tlv {
    /// Build an object from tag and value
    pub fn new(tag: u32, value: impl Into<Vec<u8>>) -> Self {
        Self {
            tag,
            value: value.into(),
        }
    }

    /// Build a constructed object from already-encoded children
    pub fn constructed(tag: u32, children: &[Tlv]) -> Self {
        let mut value = Vec::new();
        for child in children {
            value.extend_from_slice(&child.encode());
        }
        Self { tag, value }
    }

    /// Encode tag, length and value
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.value.len() + 6);
        encode_tag(self.tag, &mut out);
        encode_length(self.value.len(), &mut out);
        out.extend_from_slice(&self.value);
        out
    }

    /// Parse one object from the front of `input`, returning it together
    /// with the number of bytes consumed.
    pub fn parse(input: &[u8]) -> Result<(Tlv, usize)> {
        let (tag, tag_len) = parse_tag(input)?;
        let (len, len_len) = parse_length(&input[tag_len..])?;
        let start = tag_len + len_len;
        let end = start
            .checked_add(len)
            .ok_or_else(|| TaError::MalformedData("TLV length overflow".into()))?;
        if end > input.len() {
            return Err(TaError::MalformedData(format!(
                "TLV value truncated: need {} bytes, have {}",
                len,
                input.len() - start
            )));
        }
        Ok((Tlv::new(tag, input[start..end].to_vec()), end))
    }

    /// Parse a run of concatenated objects until the input is exhausted
    pub fn parse_all(input: &[u8]) -> Result<Vec<Tlv>> {
        let mut objects = Vec::new();
        let mut rest = input;
        while !rest.is_empty() {
            let (obj, consumed) = Tlv::parse(rest)?;
            objects.push(obj);
            rest = &rest[consumed..];
        }
        Ok(objects)
    }

    /// Parse exactly one object consuming the whole input
    pub fn parse_exact(input: &[u8]) -> Result<Tlv> {
        let (obj, consumed) = Tlv::parse(input)?;
        if consumed != input.len() {
            return Err(TaError::MalformedData(format!(
                "{} trailing bytes after TLV object",
                input.len() - consumed
            )));
        }
        Ok(obj)
    }

    /// Parse the value field as a run of child objects
    pub fn children(&self) -> Result<Vec<Tlv>> {
        Tlv::parse_all(&self.value)
    }
}

/// First object with the given tag, if any
pub fn find(objects: &[Tlv], tag: u32) -> Option<&Tlv> {
    objects.iter().find(|o| o.tag == tag)
}

fn encode_tag(tag: u32, out: &mut Vec<u8>) {
    let bytes = tag.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count().min(3);
    out.extend_from_slice(&bytes[skip..]);
}

fn encode_length(len: usize, out: &mut Vec<u8>) {
    if len < 0x80 {
        out.push(len as u8);
    } else if len <= 0xFF {
        out.push(0x81);
        out.push(len as u8);
    } else {
        debug_assert!(len <= 0xFFFF);
        out.push(0x82);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    }
}

fn parse_tag(input: &[u8]) -> Result<(u32, usize)> {
    let first = *input
        .first()
        .ok_or_else(|| TaError::MalformedData("empty TLV input".into()))?;
    let mut tag = first as u32;
    let mut consumed = 1;
    if first & 0x1F == 0x1F {
        // multi-byte tag, continuation while bit 8 is set
        loop {
            let byte = *input
                .get(consumed)
                .ok_or_else(|| TaError::MalformedData("truncated TLV tag".into()))?;
            tag = (tag << 8) | byte as u32;
            consumed += 1;
            if byte & 0x80 == 0 {
                break;
            }
            if consumed >= 3 {
                return Err(TaError::MalformedData("TLV tag longer than 3 bytes".into()));
            }
        }
    }
    Ok((tag, consumed))
}

fn parse_length(input: &[u8]) -> Result<(usize, usize)> {
    let first = *input
        .first()
        .ok_or_else(|| TaError::MalformedData("missing TLV length".into()))?;
    match first {
        0x00..=0x7F => Ok((first as usize, 1)),
        0x81 => {
            let byte = *input
                .get(1)
                .ok_or_else(|| TaError::MalformedData("truncated TLV length".into()))?;
            Ok((byte as usize, 2))
        }
        0x82 => {
            if input.len() < 3 {
                return Err(TaError::MalformedData("truncated TLV length".into()));
            }
            Ok((u16::from_be_bytes([input[1], input[2]]) as usize, 3))
        }
        _ => Err(TaError::MalformedData(format!(
            "unsupported TLV length form {first:02X}"
        ))),
    }
}

impl fmt::Debug for Tlv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tlv({:X}, {})", self.tag, hex::encode(&self.value))
    }
}

impl serde::Serialize for Tlv {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut s = serializer.serialize_struct("Tlv", 2)?;
        s.serialize_field("tag", &format!("{:X}", self.tag))?;
        s.serialize_field("value", &hex::encode(&self.value))?;
        s.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_form_roundtrip() {
        let obj = Tlv::new(TAG_CAR, b"DETESTCVCA00001".to_vec());
        let encoded = obj.encode();
        assert_eq!(encoded[0], 0x42);
        assert_eq!(encoded[1], 15);
        let parsed = Tlv::parse_exact(&encoded).unwrap();
        assert_eq!(parsed, obj);
    }

    #[test]
    fn test_two_byte_tag() {
        let obj = Tlv::new(TAG_CVC_BODY, vec![0x01, 0x02]);
        let encoded = obj.encode();
        assert_eq!(&encoded[..2], &[0x7F, 0x4E]);
        assert_eq!(Tlv::parse_exact(&encoded).unwrap().tag, TAG_CVC_BODY);
    }

    #[test]
    fn test_long_form_lengths() {
        let obj = Tlv::new(TAG_CVC, vec![0xAB; 200]);
        let encoded = obj.encode();
        assert_eq!(&encoded[2..4], &[0x81, 200]);
        assert_eq!(Tlv::parse_exact(&encoded).unwrap().value.len(), 200);

        let obj = Tlv::new(TAG_CVC, vec![0xCD; 300]);
        let encoded = obj.encode();
        assert_eq!(&encoded[2..5], &[0x82, 0x01, 0x2C]);
        assert_eq!(Tlv::parse_exact(&encoded).unwrap().value.len(), 300);
    }

    #[test]
    fn test_nested_children() {
        let inner = Tlv::new(TAG_OID, vec![0x04, 0x00]);
        let outer = Tlv::constructed(TAG_CHAT, &[inner.clone(), Tlv::new(TAG_DISCRETIONARY_DATA, vec![0xC0])]);
        let children = outer.children().unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0], inner);
        assert_eq!(find(&children, TAG_DISCRETIONARY_DATA).unwrap().value, vec![0xC0]);
        assert!(find(&children, TAG_CVC).is_none());
    }

    #[test]
    fn test_truncated_input() {
        assert!(Tlv::parse(&[0x42]).is_err());
        assert!(Tlv::parse(&[0x42, 0x05, 0x01]).is_err());
        assert!(Tlv::parse(&[0x7F]).is_err());
        assert!(Tlv::parse(&[]).is_err());
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut encoded = Tlv::new(TAG_CAR, vec![0x01]).encode();
        encoded.push(0x00);
        assert!(Tlv::parse_exact(&encoded).is_err());
    }

    #[test]
    fn test_indefinite_length_rejected() {
        assert!(Tlv::parse(&[0x42, 0x80, 0x00, 0x00]).is_err());
    }

    #[test]
    fn test_parse_all() {
        let mut bytes = Tlv::new(TAG_PUBLIC_KEY_REFERENCE, b"DETEST00001".to_vec()).encode();
        bytes.extend(Tlv::new(TAG_COMPRESSED_EPHEMERAL_KEY, vec![0x02; 33]).encode());
        let objects = Tlv::parse_all(&bytes).unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[1].value.len(), 33);
    }
}
