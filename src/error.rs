//! Error types for the Terminal Authentication engine
//!
//! Every handler failure is one of these kinds; the mapping to ISO 7816-4
//! status words lives with the APDU types (`StatusWord::from(&TaError)`).
//! No error escapes a handler: the state machine converts each one into a
//! response APDU and leaves the session where it was.

use thiserror::Error;

/// Terminal Authentication protocol errors
#[derive(Debug, Error)]
pub enum TaError {
    /// Command did not traverse secure messaging
    #[error("command did not arrive over secure messaging")]
    NotSecureMessaged,

    /// The dispatcher routed an APDU this protocol cannot handle
    #[error("not a terminal-authentication APDU: {0}")]
    WrongApduType(String),

    /// A mandatory TLV tag is absent, or a referenced key is unknown
    #[error("reference data not found: {0}")]
    MissingReference(String),

    /// A TLV is present but badly encoded
    #[error("malformed data object: {0}")]
    MalformedData(String),

    /// Certificate failed signature, validity or issuer checks, or import failed
    #[error("reference data not usable: {0}")]
    NotUsable(String),

    /// Terminal signature did not verify
    #[error("terminal signature verification failed")]
    AuthenticationFailed,

    /// Protocol order violated
    #[error("conditions of use not satisfied: {0}")]
    ConditionsNotSatisfied(String),

    /// A required mechanism is missing, or a forbidden one is present
    #[error("security status not satisfied: {0}")]
    SecurityStatusNotSatisfied(String),

    /// Ambiguous precondition or internal cryptographic failure
    #[error("implementation error: {0}")]
    ImplementationError(String),
}

/// Result type for Terminal Authentication operations
pub type Result<T> = std::result::Result<T, TaError>;
