//! # Terminal Authentication v2 card-side engine
//!
//! This crate implements the card side of the Terminal Authentication
//! protocol, version 2, as defined by BSI TR-03110 for electronic
//! identity documents. It is the TA core of an eID card simulator: it
//! receives the terminal's APDUs, validates them against an explicit
//! protocol state machine, verifies a chain of Card-Verifiable
//! Certificates ending in the terminal's signature over a card-bound
//! challenge, and records the effective authorizations the terminal
//! earned.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use chrono::NaiveDate;
//! use rand::rngs::OsRng;
//! use ta_simulator::{
//!     CommandApdu, EcdsaEngine, SecurityStatus, TerminalAuthentication, TrustPointStore,
//! };
//!
//! // trust points and chip date come from personalisation
//! let trust_points = TrustPointStore::new();
//! let chip_date = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
//! let mut ta = TerminalAuthentication::new(trust_points, chip_date, EcdsaEngine, OsRng);
//!
//! // the security status carries the residue of the preceding PACE run
//! let mut status = SecurityStatus::new();
//! # let command = CommandApdu::secure(0x22, 0x81, 0xB6, Vec::new());
//! let response = ta.process(&mut status, &command);
//! println!("SW {}", response.status());
//! ```
//!
//! ## Protocol overview
//!
//! A session walks `Set DST` (select a CVCA anchor), zero or more
//! `PSO:Verify Certificate` (extend the chain link by link), `Set AT`
//! (bind mechanism, ephemeral key and auxiliary data), `Get Challenge`
//! and `External Authenticate`. Authorizations only ever narrow: the
//! effective set is the bitwise AND of PACE's confined set and every
//! CHAT along the chain.
//!
//! Out of scope by design: session key negotiation, Chip Authentication
//! and PACE itself. The crate only consumes what PACE deposited in the
//! [`SecurityStatus`].

pub mod apdu;
pub mod authorization;
pub mod certificate;
pub mod crypto;
pub mod error;
pub mod mechanism;
pub mod oid;
pub mod protocol;
pub mod secinfo;
pub mod tlv;
pub mod trust;
pub mod validation;

// Re-exports
pub use apdu::{CommandApdu, ResponseApdu, StatusWord};
pub use authorization::{AuthorizationStore, RelativeAuthorization};
pub use certificate::{CertificateRole, Chat, Cvc, CvcPublicKey, Extension, PublicKeyReference};
pub use crypto::{CryptoFailure, EcdsaEngine, TaVerifier, VerifyOutcome};
pub use error::{Result, TaError};
pub use mechanism::{
    AuxiliaryDatum, ConfinedAuthorizationMechanism, EffectiveAuthorizationMechanism,
    PaceMechanism, SecurityMechanism, SecurityStatus, TerminalAuthenticationMechanism,
};
pub use oid::{HashAlgorithm, Oid, SignatureFamily, TaMechanism, TerminalType};
pub use protocol::{TaState, TerminalAuthentication};
pub use trust::{TrustPoint, TrustPointStore};

/// Terminal Authentication protocol version advertised in TAInfo
pub const TA_VERSION: u8 = 2;

/// Length of the Get Challenge value in bytes
pub const CHALLENGE_SIZE: usize = 8;
