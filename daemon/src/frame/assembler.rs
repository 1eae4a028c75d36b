//! Frame accumulation

use std::fmt;

use crate::decoder::Symbol;

use super::contact_id::{checksum_valid, ContactIdMessage};

/// Symbols in one Contact-ID report, checksum included
pub const FRAME_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame already holds 16 symbols")]
    FrameOverflow,

    #[error("frame incomplete: {0} of 16 symbols")]
    FrameIncomplete(usize),

    #[error("no frame in progress")]
    NoFrame,

    #[error("invalid symbol {0:?}")]
    InvalidSymbol(char),

    #[error("expected 16 symbols, got {0}")]
    WrongLength(usize),
}

/// A completed 16-symbol report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    symbols: [Symbol; FRAME_LEN],
    checksum_valid: bool,
}

impl Frame {
    /// Assemble a frame from exactly [`FRAME_LEN`] symbols
    pub fn from_symbols(symbols: &[Symbol]) -> Result<Self, FrameError> {
        if symbols.len() != FRAME_LEN {
            return Err(FrameError::WrongLength(symbols.len()));
        }
        let mut assembler = FrameAssembler::new();
        assembler.begin_frame();
        for symbol in symbols {
            assembler.push_symbol(*symbol)?;
        }
        assembler.finalize()
    }

    pub fn symbols(&self) -> &[Symbol; FRAME_LEN] {
        &self.symbols
    }

    pub fn checksum_valid(&self) -> bool {
        self.checksum_valid
    }

    /// Number of symbols that could not be decoded
    pub fn decode_errors(&self) -> usize {
        self.symbols.iter().filter(|s| s.is_error()).count()
    }

    pub fn message(&self) -> ContactIdMessage {
        ContactIdMessage::from_symbols(&self.symbols)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for symbol in &self.symbols {
            write!(f, "{symbol}")?;
        }
        Ok(())
    }
}

/// Parse keypad text (`0-9 * # A-D`, `?` for unreadable) into symbols
pub fn parse_symbols(text: &str) -> Result<Vec<Symbol>, FrameError> {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| Symbol::from_char(c).ok_or(FrameError::InvalidSymbol(c)))
        .collect()
}

/// Collects sampled symbols into one frame at a time
#[derive(Debug, Default)]
pub struct FrameAssembler {
    pending: Option<Vec<Symbol>>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new, empty frame
    pub fn begin_frame(&mut self) {
        self.pending = Some(Vec::with_capacity(FRAME_LEN));
    }

    pub fn push_symbol(&mut self, symbol: Symbol) -> Result<(), FrameError> {
        let pending = self.pending.as_mut().ok_or(FrameError::NoFrame)?;
        if pending.len() == FRAME_LEN {
            return Err(FrameError::FrameOverflow);
        }
        pending.push(symbol);
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.collected() == FRAME_LEN
    }

    /// Symbols collected so far in the pending frame
    pub fn collected(&self) -> usize {
        self.pending.as_ref().map_or(0, Vec::len)
    }

    pub fn in_progress(&self) -> bool {
        self.pending.is_some()
    }

    /// Close the pending frame and validate its checksum.
    ///
    /// A checksum mismatch still yields a frame, flagged invalid.
    pub fn finalize(&mut self) -> Result<Frame, FrameError> {
        let collected = self.collected();
        if self.pending.is_none() {
            return Err(FrameError::NoFrame);
        }
        if collected != FRAME_LEN {
            return Err(FrameError::FrameIncomplete(collected));
        }

        let pending = self.pending.take().ok_or(FrameError::NoFrame)?;
        let symbols: [Symbol; FRAME_LEN] = pending
            .try_into()
            .map_err(|v: Vec<Symbol>| FrameError::WrongLength(v.len()))?;

        Ok(Frame {
            checksum_valid: checksum_valid(&symbols),
            symbols,
        })
    }

    /// Drop the pending frame, if any
    pub fn discard(&mut self) -> usize {
        self.pending.take().map_or(0, |p| p.len())
    }
}
