//! SecInfo emission for EF.CardAccess / EF.CardSecurity
//!
//! The card advertises Terminal Authentication support as a `TAInfo`
//! SEQUENCE of the protocol OID and the protocol version.

use crate::oid::ID_TA;
use crate::tlv::{Tlv, TAG_INTEGER, TAG_OID, TAG_SEQUENCE};
use crate::TA_VERSION;

/// DER-encoded `TAInfo ::= SEQUENCE { protocol id-TA, version 2 }`
pub fn ta_info() -> Vec<u8> {
    Tlv::constructed(
        TAG_SEQUENCE,
        &[
            Tlv::new(TAG_OID, ID_TA.to_vec()),
            Tlv::new(TAG_INTEGER, vec![TA_VERSION]),
        ],
    )
    .encode()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ta_info_der() {
        let expected = hex::decode("300d060804007f0007020202020102").unwrap();
        assert_eq!(ta_info(), expected);
    }

    #[test]
    fn test_ta_info_structure() {
        let seq = Tlv::parse_exact(&ta_info()).unwrap();
        assert_eq!(seq.tag, TAG_SEQUENCE);
        let children = seq.children().unwrap();
        assert_eq!(children[0].value, ID_TA);
        assert_eq!(children[1].value, vec![2]);
    }
}
