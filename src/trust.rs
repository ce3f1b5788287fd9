//! Trust points: the card's CVCA anchors
//!
//! The card keeps one trust point per terminal type. A trust point holds
//! the current CVCA certificate and, after a rollover, the previous one,
//! so chains may still start from an anchor that was just superseded.
//! Permanent import only ever adds information: rollover shifts current
//! into previous and never clears a slot.

use std::collections::BTreeMap;

use crate::certificate::{Cvc, PublicKeyReference};
use crate::oid::TerminalType;

/// CVCA anchor pair for one terminal type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustPoint {
    current: Cvc,
    previous: Option<Cvc>,
}

impl TrustPoint {
    /// Trust point with only a current anchor
    pub fn new(cvca: Cvc) -> Self {
        Self {
            current: cvca,
            previous: None,
        }
    }

    /// Current anchor
    pub fn current(&self) -> &Cvc {
        &self.current
    }

    /// Previous anchor, present after the first rollover
    pub fn previous(&self) -> Option<&Cvc> {
        self.previous.as_ref()
    }

    /// Install a new current anchor, shifting the old one into the
    /// previous slot
    pub fn rollover(&mut self, cvca: Cvc) {
        self.previous = Some(std::mem::replace(&mut self.current, cvca));
    }

    /// Anchor whose holder reference matches, checking current first
    pub fn find_by_chr(&self, reference: &PublicKeyReference) -> Option<&Cvc> {
        if self.current.chr() == reference {
            return Some(&self.current);
        }
        self.previous.as_ref().filter(|c| c.chr() == reference)
    }
}

/// All trust points of the card, keyed by terminal type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustPointStore {
    points: BTreeMap<TerminalType, TrustPoint>,
}

impl TrustPointStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with a single anchor, the common personalisation case
    pub fn with_anchor(terminal_type: TerminalType, cvca: Cvc) -> Self {
        let mut store = Self::new();
        store.points.insert(terminal_type, TrustPoint::new(cvca));
        store
    }

    /// Trust point for a terminal type
    pub fn get(&self, terminal_type: TerminalType) -> Option<&TrustPoint> {
        self.points.get(&terminal_type)
    }

    /// Permanent import: rollover the trust point of the given terminal
    /// type, creating it when the type had no anchor yet
    pub fn rollover(&mut self, terminal_type: TerminalType, cvca: Cvc) {
        match self.points.get_mut(&terminal_type) {
            Some(point) => point.rollover(cvca),
            None => {
                self.points.insert(terminal_type, TrustPoint::new(cvca));
            }
        }
    }

    /// Number of terminal types with an anchor
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether no anchor is installed at all
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
