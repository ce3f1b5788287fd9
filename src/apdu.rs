//! ISO 7816-4 command and response APDUs
//!
//! The engine sits behind a secure-messaging envelope and a card-wide
//! dispatcher; what arrives here is the unwrapped command plus a flag
//! recording whether the envelope was traversed. Every handler emits
//! exactly one response APDU. The human-readable reason attached to a
//! response is for the processing-data sink only and never reaches the
//! wire.

use std::fmt;

use crate::error::TaError;

/// INS byte of MSE (Manage Security Environment)
pub const INS_MSE: u8 = 0x22;
/// INS byte of PSO (Perform Security Operation)
pub const INS_PSO: u8 = 0x2A;
/// INS byte of Get Challenge
pub const INS_GET_CHALLENGE: u8 = 0x84;
/// INS byte of External Authenticate
pub const INS_EXTERNAL_AUTHENTICATE: u8 = 0x82;

/// P1P2 of MSE:Set DST
pub const P1P2_SET_DST: u16 = 0x81B6;
/// P1P2 of MSE:Set AT
pub const P1P2_SET_AT: u16 = 0xC1A4;
/// P1P2 of PSO:Verify Certificate
pub const P1P2_VERIFY_CERTIFICATE: u16 = 0x00BE;

/// Two-byte ISO 7816-4 outcome code
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusWord(u16);

impl StatusWord {
    /// Normal processing
    pub const NO_ERROR: StatusWord = StatusWord(0x9000);
    /// Warning: authentication failed
    pub const AUTHENTICATION_FAILED: StatusWord = StatusWord(0x6300);
    /// Security status not satisfied
    pub const SECURITY_STATUS_NOT_SATISFIED: StatusWord = StatusWord(0x6982);
    /// Referenced data not usable
    pub const REFERENCE_DATA_NOT_USABLE: StatusWord = StatusWord(0x6984);
    /// Conditions of use not satisfied
    pub const CONDITIONS_OF_USE_NOT_SATISFIED: StatusWord = StatusWord(0x6985);
    /// Incorrect parameters in the command data field
    pub const WRONG_DATA: StatusWord = StatusWord(0x6A80);
    /// Referenced data not found
    pub const REFERENCE_DATA_NOT_FOUND: StatusWord = StatusWord(0x6A88);
    /// No precise diagnosis
    pub const IMPLEMENTATION_ERROR: StatusWord = StatusWord(0x6FFF);

    /// Raw 16-bit value
    pub fn value(self) -> u16 {
        self.0
    }

    /// Big-endian wire bytes
    pub fn to_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }

    /// Whether this is `9000`
    pub fn is_ok(self) -> bool {
        self.0 == 0x9000
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}

impl fmt::Debug for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StatusWord({:04X})", self.0)
    }
}

impl From<&TaError> for StatusWord {
    fn from(err: &TaError) -> Self {
        match err {
            TaError::NotSecureMessaged | TaError::SecurityStatusNotSatisfied(_) => {
                StatusWord::SECURITY_STATUS_NOT_SATISFIED
            }
            TaError::WrongApduType(_) | TaError::ImplementationError(_) => {
                StatusWord::IMPLEMENTATION_ERROR
            }
            TaError::MissingReference(_) => StatusWord::REFERENCE_DATA_NOT_FOUND,
            TaError::MalformedData(_) => StatusWord::WRONG_DATA,
            TaError::NotUsable(_) => StatusWord::REFERENCE_DATA_NOT_USABLE,
            TaError::AuthenticationFailed => StatusWord::AUTHENTICATION_FAILED,
            TaError::ConditionsNotSatisfied(_) => StatusWord::CONDITIONS_OF_USE_NOT_SATISFIED,
        }
    }
}

/// Command APDU as delivered by the card dispatcher
#[derive(Debug, Clone)]
pub struct CommandApdu {
    /// Class byte
    pub cla: u8,
    /// Instruction byte
    pub ins: u8,
    /// Parameter 1
    pub p1: u8,
    /// Parameter 2
    pub p2: u8,
    /// Command data field
    pub data: Vec<u8>,
    /// Whether the command traversed the secure-messaging envelope
    pub secure_messaging: bool,
}

impl CommandApdu {
    /// A command that arrived over secure messaging
    pub fn secure(ins: u8, p1: u8, p2: u8, data: Vec<u8>) -> Self {
        Self {
            cla: 0x00,
            ins,
            p1,
            p2,
            data,
            secure_messaging: true,
        }
    }

    /// A command that arrived outside secure messaging
    pub fn plain(ins: u8, p1: u8, p2: u8, data: Vec<u8>) -> Self {
        Self {
            secure_messaging: false,
            ..Self::secure(ins, p1, p2, data)
        }
    }

    /// P1 and P2 as one big-endian word
    pub fn p1p2(&self) -> u16 {
        u16::from_be_bytes([self.p1, self.p2])
    }
}

/// Response APDU emitted by a handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseApdu {
    data: Vec<u8>,
    status: StatusWord,
    reason: Option<String>,
}

impl ResponseApdu {
    /// Response with an empty data field
    pub fn new(status: StatusWord) -> Self {
        Self {
            data: Vec::new(),
            status,
            reason: None,
        }
    }

    /// Response carrying a data field
    pub fn with_data(data: Vec<u8>, status: StatusWord) -> Self {
        Self {
            data,
            status,
            reason: None,
        }
    }

    /// Attach the human-readable reason for the processing-data sink
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Response data field
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Status word
    pub fn status(&self) -> StatusWord {
        self.status
    }

    /// Reason string, if one was attached
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Wire bytes: data field followed by the status word
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.data.clone();
        out.extend_from_slice(&self.status.to_bytes());
        out
    }
}
