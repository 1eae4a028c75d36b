//! Contact-ID message layout and checksum
//!
//! A report is `ACCT MT Q XYZ GG CCC S`: 4-digit account, 2-digit message
//! type, event qualifier, 3-digit event code, 2-digit partition, 3-digit
//! zone or user number and a checksum digit. The digit values of all 16
//! symbols (with `0` counted as 10) must sum to a multiple of 15.

use serde::{Deserialize, Serialize};

use crate::decoder::{decode, Symbol};

/// Sum of digit values modulo 15, `None` if any symbol is unreadable
fn weight(symbols: &[Symbol]) -> Option<u32> {
    symbols
        .iter()
        .map(|s| s.value().map(u32::from))
        .sum::<Option<u32>>()
        .map(|sum| sum % 15)
}

/// Whether a full frame satisfies the mod-15 rule
pub fn checksum_valid(symbols: &[Symbol]) -> bool {
    weight(symbols) == Some(0)
}

/// Checksum digit completing `body` (the first 15 symbols).
///
/// A body already summing to a multiple of 15 takes digit value 15 (`C`).
pub fn checksum_digit(body: &[Symbol]) -> Option<Symbol> {
    let remainder = weight(body)?;
    let value = 15 - remainder;
    Some(decode(value as u8))
}

/// Event qualifier digit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventQualifier {
    /// `1`: new event or opening
    NewEvent,
    /// `3`: new restore or closing
    Restore,
    /// `6`: previously reported condition still present
    Repeat,
    Unknown(char),
}

impl From<Symbol> for EventQualifier {
    fn from(symbol: Symbol) -> Self {
        match symbol {
            Symbol::One => EventQualifier::NewEvent,
            Symbol::Three => EventQualifier::Restore,
            Symbol::Six => EventQualifier::Repeat,
            other => EventQualifier::Unknown(other.as_char()),
        }
    }
}

/// Field view of a 16-symbol report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactIdMessage {
    pub account: String,
    pub message_type: String,
    pub qualifier: EventQualifier,
    pub event_code: String,
    pub partition: String,
    pub zone: String,
    pub checksum: char,
}

impl ContactIdMessage {
    pub(crate) fn from_symbols(symbols: &[Symbol; 16]) -> Self {
        let text = |range: std::ops::Range<usize>| -> String {
            symbols[range].iter().map(|s| s.as_char()).collect()
        };

        Self {
            account: text(0..4),
            message_type: text(4..6),
            qualifier: EventQualifier::from(symbols[6]),
            event_code: text(7..10),
            partition: text(10..12),
            zone: text(12..15),
            checksum: symbols[15].as_char(),
        }
    }

    /// `18` (and the legacy `98`) are the defined Contact-ID message types
    pub fn is_known_message_type(&self) -> bool {
        matches!(self.message_type.as_str(), "18" | "98")
    }
}
