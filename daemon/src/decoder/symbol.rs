//! Protocol symbols and the register lookup table

use std::fmt;

/// One decoded DTMF keypad symbol.
///
/// Discriminants equal the decoder register code, which is also the
/// Contact-ID digit value used by the checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Symbol {
    D = 0,
    One = 1,
    Two = 2,
    Three = 3,
    Four = 4,
    Five = 5,
    Six = 6,
    Seven = 7,
    Eight = 8,
    Nine = 9,
    Zero = 10,
    Star = 11,
    Pound = 12,
    A = 13,
    B = 14,
    C = 15,
    /// Register value could not be read or decoded
    Error = 0xFF,
}

/// Decode a latched register value. Values above 15 decode to [`Symbol::Error`].
pub fn decode(register: u8) -> Symbol {
    match register {
        0 => Symbol::D,
        1 => Symbol::One,
        2 => Symbol::Two,
        3 => Symbol::Three,
        4 => Symbol::Four,
        5 => Symbol::Five,
        6 => Symbol::Six,
        7 => Symbol::Seven,
        8 => Symbol::Eight,
        9 => Symbol::Nine,
        10 => Symbol::Zero,
        11 => Symbol::Star,
        12 => Symbol::Pound,
        13 => Symbol::A,
        14 => Symbol::B,
        15 => Symbol::C,
        _ => Symbol::Error,
    }
}

impl Symbol {
    /// Register code / Contact-ID digit value, `None` for [`Symbol::Error`]
    pub fn value(self) -> Option<u8> {
        match self {
            Symbol::Error => None,
            other => Some(other as u8),
        }
    }

    pub fn is_error(self) -> bool {
        self == Symbol::Error
    }

    pub fn as_char(self) -> char {
        match self {
            Symbol::D => 'D',
            Symbol::Zero => '0',
            Symbol::Star => '*',
            Symbol::Pound => '#',
            Symbol::A => 'A',
            Symbol::B => 'B',
            Symbol::C => 'C',
            Symbol::Error => '?',
            digit => char::from(b'0' + digit as u8),
        }
    }

    /// Parse a keypad character. `?` is accepted as an explicit error symbol.
    pub fn from_char(c: char) -> Option<Self> {
        let symbol = match c.to_ascii_uppercase() {
            '0' => Symbol::Zero,
            d @ '1'..='9' => decode(d as u8 - b'0'),
            '*' => Symbol::Star,
            '#' => Symbol::Pound,
            'A' => Symbol::A,
            'B' => Symbol::B,
            'C' => Symbol::C,
            'D' => Symbol::D,
            '?' => Symbol::Error,
            _ => return None,
        };
        Some(symbol)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}
