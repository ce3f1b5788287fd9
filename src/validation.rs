//! Chain validation rules
//!
//! Pure predicates over certificate pairs and the chip date. The chip
//! date is the card's rolling notion of "today": it can only move
//! forward, and it is the safety net that lets expired CVCA link
//! certificates still be imported.

use chrono::NaiveDate;

use crate::certificate::{CertificateRole, Cvc};

/// Issuer/holder role compatibility: CVCAs sign CVCAs and DVs, DVs sign
/// terminals, nothing else is a valid link.
pub fn issuer_may_sign(issuer: CertificateRole, candidate: CertificateRole) -> bool {
    match candidate {
        CertificateRole::Cvca | CertificateRole::DvDomestic | CertificateRole::DvForeign => {
            issuer.is_cvca()
        }
        CertificateRole::Terminal => issuer.is_dv(),
    }
}

/// Validity of a candidate under the given issuer on the given chip
/// date. Expiration bounds are inclusive: a certificate expiring today
/// is still valid.
///
/// CVCA-to-CVCA links are always importable; for other links signed by a
/// CVCA both the issuer and the candidate must not be expired, and for
/// DV-signed links only the candidate is checked.
pub fn is_valid_on(issuer: &Cvc, candidate: &Cvc, chip_date: NaiveDate) -> bool {
    let issuer_role = issuer.role();
    let candidate_role = candidate.role();
    if issuer_role.is_cvca() && candidate_role.is_cvca() {
        return true;
    }
    if issuer_role.is_cvca() {
        return chip_date <= issuer.expiration_date() && chip_date <= candidate.expiration_date();
    }
    chip_date <= candidate.expiration_date()
}

/// Chip date after importing the candidate. The date advances to the
/// candidate's effective date when that lies in the future and the
/// candidate is a CVCA or domestic DV, or the issuer is a domestic DV.
/// It never moves backward.
pub fn advanced_chip_date(issuer: &Cvc, candidate: &Cvc, chip_date: NaiveDate) -> NaiveDate {
    let candidate_role = candidate.role();
    let trusted_source = candidate_role.is_cvca()
        || candidate_role == CertificateRole::DvDomestic
        || issuer.role() == CertificateRole::DvDomestic;
    if chip_date < candidate.effective_date() && trusted_source {
        candidate.effective_date()
    } else {
        chip_date
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::encode_cvc_date;
    use crate::oid::{ID_AT, ID_TA_ECDSA_SHA_256};
    use crate::tlv::{self, Tlv};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn cert(role_byte: u8, effective: NaiveDate, expiration: NaiveDate) -> Cvc {
        let body = Tlv::constructed(
            tlv::TAG_CVC_BODY,
            &[
                Tlv::new(tlv::TAG_CPI, vec![0x00]),
                Tlv::new(tlv::TAG_CAR, b"DECVCA00001".to_vec()),
                Tlv::constructed(
                    tlv::TAG_PUBLIC_KEY,
                    &[
                        Tlv::new(tlv::TAG_OID, ID_TA_ECDSA_SHA_256.to_vec()),
                        Tlv::new(0x86, vec![0x04; 65]),
                    ],
                ),
                Tlv::new(tlv::TAG_CHR, b"DEHOLDER00001".to_vec()),
                Tlv::constructed(
                    tlv::TAG_CHAT,
                    &[
                        Tlv::new(tlv::TAG_OID, ID_AT.to_vec()),
                        Tlv::new(tlv::TAG_DISCRETIONARY_DATA, vec![role_byte, 0, 0, 0, 0]),
                    ],
                ),
                Tlv::new(tlv::TAG_EFFECTIVE_DATE, encode_cvc_date(effective).to_vec()),
                Tlv::new(tlv::TAG_EXPIRATION_DATE, encode_cvc_date(expiration).to_vec()),
            ],
        );
        Cvc::from_body_and_signature(&body.encode(), &[0u8; 64]).unwrap()
    }

    #[test]
    fn test_issuer_compatibility() {
        use CertificateRole::*;
        assert!(issuer_may_sign(Cvca, Cvca));
        assert!(issuer_may_sign(Cvca, DvDomestic));
        assert!(issuer_may_sign(Cvca, DvForeign));
        assert!(!issuer_may_sign(Cvca, Terminal));
        assert!(issuer_may_sign(DvDomestic, Terminal));
        assert!(issuer_may_sign(DvForeign, Terminal));
        assert!(!issuer_may_sign(DvDomestic, DvDomestic));
        assert!(!issuer_may_sign(DvForeign, Cvca));
        assert!(!issuer_may_sign(Terminal, Terminal));
        assert!(!issuer_may_sign(Terminal, Cvca));
    }

    #[test]
    fn test_cvca_link_always_importable() {
        let old = cert(0xC0, date(2020, 1, 1), date(2023, 1, 1));
        let new = cert(0xC0, date(2022, 1, 1), date(2025, 1, 1));
        // both expired relative to the chip date, still valid
        assert!(is_valid_on(&old, &new, date(2026, 6, 1)));
    }

    #[test]
    fn test_cvca_signed_dv_needs_both_unexpired() {
        let cvca = cert(0xC0, date(2024, 1, 1), date(2027, 1, 1));
        let dv = cert(0x80, date(2026, 1, 1), date(2026, 12, 1));
        assert!(is_valid_on(&cvca, &dv, date(2026, 6, 1)));
        // candidate expired
        assert!(!is_valid_on(&cvca, &dv, date(2026, 12, 2)));
        // issuer expired
        let dv_long = cert(0x80, date(2026, 1, 1), date(2028, 1, 1));
        assert!(!is_valid_on(&cvca, &dv_long, date(2027, 6, 1)));
    }

    #[test]
    fn test_expiration_is_inclusive() {
        let cvca = cert(0xC0, date(2024, 1, 1), date(2027, 1, 1));
        let dv = cert(0x80, date(2026, 1, 1), date(2026, 12, 1));
        // chip date equal to the candidate expiration: still valid
        assert!(is_valid_on(&cvca, &dv, date(2026, 12, 1)));
        // chip date equal to the issuer expiration: still valid
        let dv_long = cert(0x80, date(2026, 1, 1), date(2028, 1, 1));
        assert!(is_valid_on(&cvca, &dv_long, date(2027, 1, 1)));
        // DV-signed terminal at its expiration date
        let dv_issuer = cert(0x80, date(2026, 1, 1), date(2027, 1, 1));
        let terminal = cert(0x00, date(2026, 1, 1), date(2026, 9, 1));
        assert!(is_valid_on(&dv_issuer, &terminal, date(2026, 9, 1)));
        assert!(!is_valid_on(&dv_issuer, &terminal, date(2026, 9, 2)));
    }

    #[test]
    fn test_dv_signed_terminal_ignores_issuer_expiry() {
        let dv = cert(0x80, date(2024, 1, 1), date(2025, 1, 1));
        let terminal = cert(0x00, date(2026, 1, 1), date(2027, 1, 1));
        // issuer long expired, only the candidate window counts
        assert!(is_valid_on(&dv, &terminal, date(2026, 6, 1)));
    }

    #[test]
    fn test_chip_date_advance() {
        let today = date(2026, 6, 1);
        let cvca = cert(0xC0, date(2026, 8, 1), date(2029, 1, 1));
        let issuer = cert(0xC0, date(2024, 1, 1), date(2027, 1, 1));
        // CVCA candidate pulls the date forward
        assert_eq!(advanced_chip_date(&issuer, &cvca, today), date(2026, 8, 1));

        // domestic DV candidate pulls the date forward
        let dv = cert(0x80, date(2026, 7, 1), date(2027, 1, 1));
        assert_eq!(advanced_chip_date(&issuer, &dv, today), date(2026, 7, 1));

        // foreign DV candidate does not
        let foreign = cert(0x40, date(2026, 7, 1), date(2027, 1, 1));
        assert_eq!(advanced_chip_date(&issuer, &foreign, today), today);

        // terminal signed by a domestic DV does
        let dv_issuer = cert(0x80, date(2026, 1, 1), date(2027, 1, 1));
        let terminal = cert(0x00, date(2026, 9, 1), date(2027, 1, 1));
        assert_eq!(advanced_chip_date(&dv_issuer, &terminal, today), date(2026, 9, 1));

        // terminal signed by a foreign DV does not
        let foreign_issuer = cert(0x40, date(2026, 1, 1), date(2027, 1, 1));
        assert_eq!(advanced_chip_date(&foreign_issuer, &terminal, today), today);
    }

    #[test]
    fn test_chip_date_never_moves_backward() {
        let today = date(2026, 6, 1);
        let issuer = cert(0xC0, date(2024, 1, 1), date(2027, 1, 1));
        let past = cert(0xC0, date(2025, 1, 1), date(2028, 1, 1));
        assert_eq!(advanced_chip_date(&issuer, &past, today), today);
    }
}
