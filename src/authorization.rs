//! Effective authorization accounting
//!
//! PACE deposits the confined authorization set the card holder agreed
//! to; every certificate in a verified chain can only narrow it further.
//! The store maps an OID (usually a terminal type) to a relative
//! authorization bitfield and intersects on every update: bits may
//! clear, never set.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::certificate::{Chat, Cvc};
use crate::oid::Oid;

/// A big-endian authorization bitfield of fixed length
#[derive(Clone, PartialEq, Eq)]
pub struct RelativeAuthorization {
    bits: Vec<u8>,
}

impl RelativeAuthorization {
    /// Wrap raw bitfield bytes
    pub fn from_bytes(bits: &[u8]) -> Self {
        Self {
            bits: bits.to_vec(),
        }
    }

    /// Raw bytes, big-endian
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    /// Bit length of the field
    pub fn bit_len(&self) -> usize {
        self.bits.len() * 8
    }

    /// Bitwise AND with another authorization. Lengths match for a given
    /// OID by construction; on a mismatch the fields are aligned at the
    /// most significant byte and the result takes the shorter length.
    pub fn intersect(&self, other: &RelativeAuthorization) -> RelativeAuthorization {
        let len = self.bits.len().min(other.bits.len());
        let bits = self.bits[..len]
            .iter()
            .zip(&other.bits[..len])
            .map(|(a, b)| a & b)
            .collect();
        Self { bits }
    }
}

impl fmt::Debug for RelativeAuthorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RelativeAuthorization({})", hex::encode(&self.bits))
    }
}

impl fmt::Display for RelativeAuthorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.bits))
    }
}

impl Serialize for RelativeAuthorization {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&hex::encode(&self.bits))
    }
}

/// OID-keyed authorization map with intersect-on-update semantics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuthorizationStore {
    authorizations: BTreeMap<Oid, RelativeAuthorization>,
}

impl AuthorizationStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// The authorizations a single certificate grants: its CHAT terminal
    /// type mapped to its relative authorization
    pub fn from_chat(chat: &Chat) -> Self {
        let mut store = Self::new();
        store.insert(
            chat.terminal_type.clone(),
            RelativeAuthorization::from_bytes(&chat.relative_authorization),
        );
        store
    }

    /// Authorization for an OID
    pub fn get(&self, oid: &Oid) -> Option<&RelativeAuthorization> {
        self.authorizations.get(oid)
    }

    /// Install an authorization verbatim (personalisation and PACE setup)
    pub fn insert(&mut self, oid: Oid, authorization: RelativeAuthorization) {
        self.authorizations.insert(oid, authorization);
    }

    /// Narrow this store by another: every OID present in `incoming` is
    /// intersected with the stored value, an OID absent before is added
    /// as-is (absent counts as all-ones of the incoming length).
    pub fn update(&mut self, incoming: &AuthorizationStore) {
        for (oid, bits) in &incoming.authorizations {
            match self.authorizations.get_mut(oid) {
                Some(existing) => *existing = existing.intersect(bits),
                None => {
                    self.authorizations.insert(oid.clone(), bits.clone());
                }
            }
        }
    }

    /// Narrow by the CHAT of a chain certificate
    pub fn update_from_certificate(&mut self, certificate: &Cvc) {
        self.update(&Self::from_chat(certificate.chat()));
    }

    /// Iterate over all entries
    pub fn iter(&self) -> impl Iterator<Item = (&Oid, &RelativeAuthorization)> {
        self.authorizations.iter()
    }

    /// Number of OIDs present
    pub fn len(&self) -> usize {
        self.authorizations.len()
    }

    /// Whether the store holds no authorization at all
    pub fn is_empty(&self) -> bool {
        self.authorizations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid::{ID_AT, ID_IS};

    fn oid(bytes: &[u8]) -> Oid {
        Oid::from_bytes(bytes).unwrap()
    }

    #[test]
    fn test_intersect_is_bitwise_and() {
        let a = RelativeAuthorization::from_bytes(&[0xFF, 0x0F]);
        let b = RelativeAuthorization::from_bytes(&[0xC3, 0xFF]);
        assert_eq!(a.intersect(&b).as_bytes(), &[0xC3, 0x0F]);
        assert_eq!(a.bit_len(), 16);
    }

    #[test]
    fn test_update_narrows() {
        let mut store = AuthorizationStore::new();
        store.insert(oid(ID_AT), RelativeAuthorization::from_bytes(&[0x3F, 0xFF]));

        let mut incoming = AuthorizationStore::new();
        incoming.insert(oid(ID_AT), RelativeAuthorization::from_bytes(&[0x1F, 0x0F]));
        store.update(&incoming);
        assert_eq!(store.get(&oid(ID_AT)).unwrap().as_bytes(), &[0x1F, 0x0F]);

        // a second update can only clear bits, never set them
        let mut wider = AuthorizationStore::new();
        wider.insert(oid(ID_AT), RelativeAuthorization::from_bytes(&[0xFF, 0xFF]));
        store.update(&wider);
        assert_eq!(store.get(&oid(ID_AT)).unwrap().as_bytes(), &[0x1F, 0x0F]);
    }

    #[test]
    fn test_absent_oid_added_as_is() {
        let mut store = AuthorizationStore::new();
        store.insert(oid(ID_AT), RelativeAuthorization::from_bytes(&[0x3F]));

        let mut incoming = AuthorizationStore::new();
        incoming.insert(oid(ID_IS), RelativeAuthorization::from_bytes(&[0x23]));
        store.update(&incoming);

        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&oid(ID_IS)).unwrap().as_bytes(), &[0x23]);
        assert_eq!(store.get(&oid(ID_AT)).unwrap().as_bytes(), &[0x3F]);
    }

    #[test]
    fn test_chain_intersection_matches_fold() {
        // the end state equals the AND-fold of the initial set and every
        // CHAT seen along the chain
        let chats: [&[u8]; 3] = [&[0xFF, 0xFF], &[0xBF, 0xF0], &[0x3F, 0x55]];
        let initial: &[u8] = &[0x7F, 0xDD];

        let mut store = AuthorizationStore::new();
        store.insert(oid(ID_AT), RelativeAuthorization::from_bytes(initial));
        for chat in chats {
            let mut incoming = AuthorizationStore::new();
            incoming.insert(oid(ID_AT), RelativeAuthorization::from_bytes(chat));
            store.update(&incoming);
        }

        let expected: Vec<u8> = chats
            .iter()
            .fold(initial.to_vec(), |acc, chat| {
                acc.iter().zip(chat.iter()).map(|(a, b)| a & b).collect()
            });
        assert_eq!(store.get(&oid(ID_AT)).unwrap().as_bytes(), &expected[..]);
    }
}
