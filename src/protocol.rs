//! Terminal Authentication v2 state machine
//!
//! Drives the card side of the TA dialogue:
//!
//! ```text
//! Terminal                              Card
//!    |                                    |
//!    |  MSE:Set DST (anchor reference)    |
//!    |----------------------------------->|  select trust anchor
//!    |  PSO:Verify Certificate (0..n)     |
//!    |----------------------------------->|  extend the chain
//!    |  MSE:Set AT (OID, ephemeral, aux)  |
//!    |----------------------------------->|  bind session parameters
//!    |  Get Challenge                     |
//!    |----------------------------------->|  8 random bytes
//!    |  External Authenticate (signature) |
//!    |----------------------------------->|  verify, publish TA status
//! ```
//!
//! The machine is single threaded and runs each handler to completion on
//! the card-dispatch thread. A handler failure never advances the state;
//! the terminal may retry the step or abandon the session.

use chrono::NaiveDate;
use rand::{CryptoRng, RngCore};
use tracing::{debug, warn};

use crate::apdu::{
    CommandApdu, ResponseApdu, StatusWord, INS_EXTERNAL_AUTHENTICATE, INS_GET_CHALLENGE, INS_MSE,
    INS_PSO, P1P2_SET_AT, P1P2_SET_DST, P1P2_VERIFY_CERTIFICATE,
};
use crate::authorization::AuthorizationStore;
use crate::certificate::{CertificateRole, Cvc, PublicKeyReference};
use crate::crypto::{wrap_plain_signature, TaVerifier, VerifyOutcome};
use crate::error::{Result, TaError};
use crate::mechanism::{
    AuxiliaryDatum, EffectiveAuthorizationMechanism, SecurityMechanism, SecurityStatus,
    TerminalAuthenticationMechanism,
};
use crate::oid::{Oid, SignatureFamily, TaMechanism, TerminalType};
use crate::tlv::{self, Tlv};
use crate::trust::TrustPointStore;
use crate::validation;
use crate::CHALLENGE_SIZE;

/// Protocol state. Every transition is driven by a successful command;
/// failures leave the state untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaState {
    /// No anchor selected yet
    Idle,
    /// A verification anchor is active, the chain may be extended
    AnchorSet,
    /// Session parameters are bound, waiting for the challenge request
    ChainBuilt,
    /// A challenge is outstanding
    Challenged,
    /// The terminal proved possession of the leaf key
    Authenticated,
}

/// Per-session state, wiped by [`TerminalAuthentication::reset`]
#[derive(Default)]
struct Session {
    current_certificate: Option<Cvc>,
    most_recent_temporary_certificate: Option<Cvc>,
    challenge: Option<[u8; CHALLENGE_SIZE]>,
    auxiliary_data: Vec<AuxiliaryDatum>,
    cryptographic_mechanism: Option<TaMechanism>,
    compressed_terminal_ephemeral_key: Option<Vec<u8>>,
    terminal_type: Option<TerminalType>,
    first_sector_public_key_hash: Option<Vec<u8>>,
    second_sector_public_key_hash: Option<Vec<u8>>,
    authorization_store: Option<AuthorizationStore>,
}

/// Card-side Terminal Authentication engine.
///
/// Owns the session state, the trust points and the chip date; reads the
/// PACE residue from the [`SecurityStatus`] handed to [`process`] and
/// appends the TA result to it on success.
///
/// [`process`]: TerminalAuthentication::process
pub struct TerminalAuthentication {
    state: TaState,
    session: Session,
    trust_points: TrustPointStore,
    chip_date: NaiveDate,
    verifier: Box<dyn TaVerifier>,
    rng: Box<dyn RngCore>,
}

impl TerminalAuthentication {
    /// Build an engine from the personalised trust points, the current
    /// chip date, a signature verifier and a cryptographically secure
    /// random source.
    pub fn new(
        trust_points: TrustPointStore,
        chip_date: NaiveDate,
        verifier: impl TaVerifier + 'static,
        rng: impl RngCore + CryptoRng + 'static,
    ) -> Self {
        Self {
            state: TaState::Idle,
            session: Session::default(),
            trust_points,
            chip_date,
            verifier: Box::new(verifier),
            rng: Box::new(rng),
        }
    }

    /// Current protocol state
    pub fn state(&self) -> TaState {
        self.state
    }

    /// Rolling chip date
    pub fn chip_date(&self) -> NaiveDate {
        self.chip_date
    }

    /// Installed trust points
    pub fn trust_points(&self) -> &TrustPointStore {
        &self.trust_points
    }

    /// Active verification anchor, if one is selected
    pub fn current_certificate(&self) -> Option<&Cvc> {
        self.session.current_certificate.as_ref()
    }

    /// Wipe the session, including the temporary import slot, and return
    /// to [`TaState::Idle`]. Trust points and the chip date persist.
    pub fn reset(&mut self) {
        self.session = Session::default();
        self.state = TaState::Idle;
    }

    /// Handle one command APDU. Exactly one response APDU is produced;
    /// no error escapes.
    pub fn process(&mut self, status: &mut SecurityStatus, command: &CommandApdu) -> ResponseApdu {
        if !command.secure_messaging {
            return self.reject(TaError::NotSecureMessaged);
        }
        let result = match (command.ins, command.p1p2()) {
            (INS_MSE, P1P2_SET_DST) => self.set_dst(status, &command.data),
            (INS_PSO, P1P2_VERIFY_CERTIFICATE) => self.verify_certificate(&command.data),
            (INS_MSE, P1P2_SET_AT) => self.set_at(&command.data),
            (INS_GET_CHALLENGE, 0x0000) => self.get_challenge(),
            (INS_EXTERNAL_AUTHENTICATE, 0x0000) => self.external_authenticate(status, &command.data),
            _ => Err(TaError::WrongApduType(format!(
                "INS {:02X} P1P2 {:04X}",
                command.ins,
                command.p1p2()
            ))),
        };
        match result {
            Ok(response) => {
                debug!(
                    sw = %response.status(),
                    state = ?self.state,
                    "{}",
                    response.reason().unwrap_or("command accepted")
                );
                response
            }
            Err(err) => self.reject(err),
        }
    }

    fn reject(&self, err: TaError) -> ResponseApdu {
        let sw = StatusWord::from(&err);
        warn!(%sw, state = ?self.state, "command rejected: {err}");
        ResponseApdu::new(sw).with_reason(err.to_string())
    }

    fn require_state(&self, allowed: &[TaState], command: &str) -> Result<()> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        Err(TaError::ConditionsNotSatisfied(format!(
            "{command} not allowed in state {:?}",
            self.state
        )))
    }

    /// Resolve the terminal type from the PACE residue. Exactly one PACE
    /// mechanism must be present when TA runs.
    fn resolve_terminal_type(status: &SecurityStatus) -> Result<TerminalType> {
        let pace = status.pace_mechanisms();
        match pace.len() {
            0 => Err(TaError::SecurityStatusNotSatisfied(
                "no PACE mechanism in the security status".into(),
            )),
            1 => Ok(pace[0].terminal_type),
            n => Err(TaError::ImplementationError(format!(
                "{n} PACE mechanisms in the security status"
            ))),
        }
    }

    /// MSE:Set DST. Selects the verification anchor: either the live
    /// temporary certificate (continuing an already verified chain, the
    /// authorization store is kept) or a trust-point CVCA (starting a
    /// chain, the store is re-seeded from PACE's confined set).
    fn set_dst(&mut self, status: &SecurityStatus, data: &[u8]) -> Result<ResponseApdu> {
        let objects = Tlv::parse_all(data)?;
        let reference = tlv::find(&objects, tlv::TAG_PUBLIC_KEY_REFERENCE).ok_or_else(|| {
            TaError::MissingReference("no public-key reference in Set DST".into())
        })?;

        let terminal_type = Self::resolve_terminal_type(status)?;
        self.session.terminal_type = Some(terminal_type);
        self.session.current_certificate = None;

        let reference = PublicKeyReference::from_bytes(&reference.value)?;

        if let Some(temporary) = self.session.most_recent_temporary_certificate.as_ref() {
            if temporary.chr() == &reference {
                self.session.current_certificate = Some(temporary.clone());
                self.state = TaState::AnchorSet;
                return Ok(ResponseApdu::new(StatusWord::NO_ERROR)
                    .with_reason("temporary certificate adopted as anchor"));
            }
        }

        let anchor = self
            .trust_points
            .get(terminal_type)
            .and_then(|point| point.find_by_chr(&reference))
            .cloned()
            .ok_or_else(|| {
                TaError::MissingReference(format!("no key matching reference {reference}"))
            })?;
        self.session.current_certificate = Some(anchor.clone());

        if self.session.authorization_store.is_none() {
            let confined = status.confined_authorization().ok_or_else(|| {
                TaError::SecurityStatusNotSatisfied(
                    "no confined-authorization mechanism from PACE".into(),
                )
            })?;
            self.session.authorization_store = Some(confined.authorizations.clone());
        }
        let store = self
            .session
            .authorization_store
            .as_mut()
            .ok_or_else(|| TaError::ImplementationError("authorization store vanished".into()))?;
        if store.get(&terminal_type.oid()).is_none() {
            return Err(TaError::SecurityStatusNotSatisfied(format!(
                "no authorization for terminal type {terminal_type:?}"
            )));
        }
        store.update_from_certificate(&anchor);

        self.state = TaState::AnchorSet;
        Ok(ResponseApdu::new(StatusWord::NO_ERROR).with_reason("trust-point anchor adopted"))
    }

    /// PSO:Verify Certificate. Validates one chain link against the
    /// current anchor and imports it: CVCAs permanently into the trust
    /// point named by their own CHAT, everything else into the temporary
    /// slot, becoming the new anchor.
    fn verify_certificate(&mut self, data: &[u8]) -> Result<ResponseApdu> {
        self.require_state(&[TaState::AnchorSet], "PSO:Verify Certificate")?;
        let current = self
            .session
            .current_certificate
            .clone()
            .ok_or_else(|| TaError::ImplementationError("anchor state without anchor".into()))?;

        let objects = Tlv::parse_all(data)?;
        let body = tlv::find(&objects, tlv::TAG_CVC_BODY)
            .ok_or_else(|| TaError::MissingReference("no certificate body".into()))?;
        let signature = tlv::find(&objects, tlv::TAG_CVC_SIGNATURE)
            .ok_or_else(|| TaError::MissingReference("no certificate signature".into()))?;

        let mut certificate = Cvc::from_body_and_signature(&body.encode(), &signature.value)?;
        certificate.inherit_domain_parameters(current.public_key());

        if certificate.car() != current.chr() {
            return Err(TaError::MissingReference(format!(
                "certificate issued by {}, anchor is {}",
                certificate.car(),
                current.chr()
            )));
        }
        if !validation::issuer_may_sign(current.role(), certificate.role()) {
            return Err(TaError::NotUsable(format!(
                "{:?} may not sign {:?}",
                current.role(),
                certificate.role()
            )));
        }

        let mechanism = TaMechanism::from_oid(current.public_key().oid())
            .map_err(|_| TaError::NotUsable("anchor key mechanism unknown".into()))?;
        let signature_input = if mechanism.family() == SignatureFamily::Ecdsa {
            wrap_plain_signature(certificate.signature_bytes())
                .map_err(|_| TaError::NotUsable("certificate signature not splittable".into()))?
        } else {
            certificate.signature_bytes().to_vec()
        };
        match self.verifier.verify(
            &mechanism,
            current.public_key(),
            certificate.body_bytes(),
            &signature_input,
        ) {
            VerifyOutcome::Ok => {}
            VerifyOutcome::BadSignature => {
                return Err(TaError::NotUsable("certificate signature invalid".into()))
            }
            VerifyOutcome::Failure(kind) => {
                return Err(TaError::NotUsable(format!(
                    "certificate signature not verifiable: {kind}"
                )))
            }
        }

        if !validation::is_valid_on(&current, &certificate, self.chip_date) {
            return Err(TaError::NotUsable(format!(
                "certificate outside validity window on {}",
                self.chip_date
            )));
        }
        self.chip_date = validation::advanced_chip_date(&current, &certificate, self.chip_date);

        let chat = certificate.chat().clone();
        if certificate.role() == CertificateRole::Cvca {
            let target = TerminalType::from_oid(&chat.terminal_type)
                .map_err(|_| TaError::NotUsable("CVCA names an unknown terminal type".into()))?;
            self.trust_points.rollover(target, certificate);
        } else {
            self.session.most_recent_temporary_certificate = Some(certificate.clone());
            self.session.current_certificate = Some(certificate);
        }

        let store = self
            .session
            .authorization_store
            .as_mut()
            .ok_or_else(|| TaError::ImplementationError("authorization store missing".into()))?;
        store.update(&AuthorizationStore::from_chat(&chat));

        Ok(ResponseApdu::new(StatusWord::NO_ERROR).with_reason("certificate imported"))
    }

    /// MSE:Set AT. Binds the signature mechanism, the terminal's
    /// compressed ephemeral key and the optional auxiliary data to the
    /// session. Nothing outside the session is touched.
    fn set_at(&mut self, data: &[u8]) -> Result<ResponseApdu> {
        self.require_state(&[TaState::AnchorSet], "MSE:Set AT")?;
        let current = self
            .session
            .current_certificate
            .as_ref()
            .ok_or_else(|| TaError::ImplementationError("anchor state without anchor".into()))?;

        let objects = Tlv::parse_all(data)?;
        let reference = tlv::find(&objects, tlv::TAG_PUBLIC_KEY_REFERENCE)
            .ok_or_else(|| TaError::MissingReference("no public-key reference in Set AT".into()))?;
        let reference = PublicKeyReference::from_bytes(&reference.value)?;
        if &reference != current.chr() {
            return Err(TaError::MissingReference(format!(
                "referenced key {reference} is not the chain leaf {}",
                current.chr()
            )));
        }

        let mechanism = tlv::find(&objects, tlv::TAG_CRYPTOGRAPHIC_MECHANISM)
            .ok_or_else(|| TaError::MissingReference("no cryptographic mechanism".into()))?;
        // the value arrives without its OID tag, reattach before parsing
        let mechanism = TaMechanism::from_oid(&Oid::from_bytes(&mechanism.value)?)?;

        let ephemeral = tlv::find(&objects, tlv::TAG_COMPRESSED_EPHEMERAL_KEY).ok_or_else(|| {
            TaError::MalformedData("no compressed ephemeral public key".into())
        })?;

        let mut auxiliary = Vec::new();
        if let Some(container) = tlv::find(&objects, tlv::TAG_AUXILIARY_DATA) {
            for entry in container.children()? {
                if entry.tag != tlv::TAG_AUXILIARY_DATUM {
                    return Err(TaError::MalformedData(format!(
                        "unexpected tag {:X} in auxiliary data",
                        entry.tag
                    )));
                }
                let parts = entry.children()?;
                let oid = tlv::find(&parts, tlv::TAG_OID)
                    .ok_or_else(|| TaError::MalformedData("auxiliary datum without OID".into()))?;
                let value = tlv::find(&parts, tlv::TAG_DISCRETIONARY_DATA).ok_or_else(|| {
                    TaError::MalformedData("auxiliary datum without data".into())
                })?;
                auxiliary.push(AuxiliaryDatum {
                    oid: Oid::from_bytes(&oid.value)?,
                    data: value.value.clone(),
                    encoded: entry.encode(),
                });
            }
            if auxiliary.is_empty() {
                return Err(TaError::MalformedData("empty auxiliary data container".into()));
            }
        }

        self.session.cryptographic_mechanism = Some(mechanism);
        self.session.compressed_terminal_ephemeral_key = Some(ephemeral.value.clone());
        self.session.auxiliary_data = auxiliary;
        self.state = TaState::ChainBuilt;
        Ok(ResponseApdu::new(StatusWord::NO_ERROR).with_reason("authentication template set"))
    }

    /// Get Challenge. Draws eight fresh random bytes; a repeated request
    /// overwrites the previous challenge.
    fn get_challenge(&mut self) -> Result<ResponseApdu> {
        self.require_state(&[TaState::ChainBuilt, TaState::Challenged], "Get Challenge")?;
        let mut challenge = [0u8; CHALLENGE_SIZE];
        self.rng.fill_bytes(&mut challenge);
        self.session.challenge = Some(challenge);
        self.state = TaState::Challenged;
        Ok(ResponseApdu::with_data(challenge.to_vec(), StatusWord::NO_ERROR)
            .with_reason("challenge issued"))
    }

    /// External Authenticate. Verifies the terminal's signature over
    /// `idICC || challenge || ephemeral key [|| auxiliary data]` and, on
    /// success, publishes the Terminal Authentication result and the
    /// effective authorizations into the security status.
    fn external_authenticate(
        &mut self,
        status: &mut SecurityStatus,
        data: &[u8],
    ) -> Result<ResponseApdu> {
        self.require_state(&[TaState::Challenged], "External Authenticate")?;
        let challenge = self
            .session
            .challenge
            .ok_or_else(|| TaError::ConditionsNotSatisfied("no challenge outstanding".into()))?;
        if !status.terminal_authentications().is_empty() {
            return Err(TaError::SecurityStatusNotSatisfied(
                "terminal authentication already performed in this session".into(),
            ));
        }

        let pace = status.pace_mechanisms();
        let id_icc = match pace.len() {
            0 => {
                return Err(TaError::ConditionsNotSatisfied(
                    "no PACE mechanism to take the chip key from".into(),
                ))
            }
            1 => pace[0].compressed_ephemeral_chip_key.clone(),
            n => {
                return Err(TaError::ImplementationError(format!(
                    "{n} PACE mechanisms in the security status"
                )))
            }
        };

        let current = self
            .session
            .current_certificate
            .clone()
            .ok_or_else(|| TaError::ImplementationError("challenged state without anchor".into()))?;
        let ephemeral = self
            .session
            .compressed_terminal_ephemeral_key
            .clone()
            .ok_or_else(|| TaError::ImplementationError("no ephemeral key bound".into()))?;
        let mechanism = self
            .session
            .cryptographic_mechanism
            .clone()
            .ok_or_else(|| TaError::ImplementationError("no mechanism bound".into()))?;

        let mut signed_data = Vec::new();
        signed_data.extend_from_slice(&id_icc);
        signed_data.extend_from_slice(&challenge);
        signed_data.extend_from_slice(&ephemeral);
        if !self.session.auxiliary_data.is_empty() {
            let mut container = Vec::new();
            for datum in &self.session.auxiliary_data {
                container.extend_from_slice(&datum.encoded);
            }
            signed_data.extend_from_slice(&Tlv::new(tlv::TAG_AUXILIARY_DATA, container).encode());
        }

        let signature = if mechanism.family() == SignatureFamily::Ecdsa {
            wrap_plain_signature(data).map_err(|_| TaError::AuthenticationFailed)?
        } else {
            data.to_vec()
        };
        match self
            .verifier
            .verify(&mechanism, current.public_key(), &signed_data, &signature)
        {
            VerifyOutcome::Ok => {}
            VerifyOutcome::BadSignature => return Err(TaError::AuthenticationFailed),
            VerifyOutcome::Failure(kind) => {
                return Err(TaError::ImplementationError(format!(
                    "terminal signature not verifiable: {kind}"
                )))
            }
        }

        let (first, second) = current.sector_hashes();
        self.session.first_sector_public_key_hash = first.map(<[u8]>::to_vec);
        self.session.second_sector_public_key_hash = second.map(<[u8]>::to_vec);

        let terminal_type = self
            .session
            .terminal_type
            .ok_or_else(|| TaError::ImplementationError("no terminal type resolved".into()))?;
        let authorizations = self
            .session
            .authorization_store
            .clone()
            .ok_or_else(|| TaError::ImplementationError("authorization store missing".into()))?;

        status.push(SecurityMechanism::TerminalAuthentication(
            TerminalAuthenticationMechanism {
                compressed_terminal_ephemeral_key: ephemeral,
                terminal_type,
                auxiliary_data: self.session.auxiliary_data.clone(),
                first_sector_public_key_hash: self.session.first_sector_public_key_hash.clone(),
                second_sector_public_key_hash: self.session.second_sector_public_key_hash.clone(),
                hash_algorithm: mechanism.hash(),
                certificate_extensions: current.extensions().to_vec(),
            },
        ));
        status.push(SecurityMechanism::EffectiveAuthorization(
            EffectiveAuthorizationMechanism { authorizations },
        ));

        self.state = TaState::Authenticated;
        Ok(ResponseApdu::new(StatusWord::NO_ERROR).with_reason("terminal authenticated"))
    }
}
