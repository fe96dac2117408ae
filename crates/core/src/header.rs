use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of qubits spent on every frame header.
pub const HEADER_BITS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HeaderError {
    #[error("reserved frame header 11")]
    Reserved,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameKind {
    Epr,
    DataSuperdense,
    DataSequential,
}

impl FrameKind {
    /// Header bits in transmission order.
    pub fn header_bits(self) -> [bool; HEADER_BITS] {
        match self {
            FrameKind::Epr => [false, false],
            FrameKind::DataSuperdense => [false, true],
            FrameKind::DataSequential => [true, false],
        }
    }

    pub fn from_header_bits(bits: [bool; HEADER_BITS]) -> Result<Self, HeaderError> {
        match bits {
            [false, false] => Ok(FrameKind::Epr),
            [false, true] => Ok(FrameKind::DataSuperdense),
            [true, false] => Ok(FrameKind::DataSequential),
            [true, true] => Err(HeaderError::Reserved),
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameKind::Epr => "EPR",
            FrameKind::DataSuperdense => "DATA_SUPERDENSE",
            FrameKind::DataSequential => "DATA_SEQUENTIAL",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_values() {
        assert_eq!(FrameKind::Epr.header_bits(), [false, false]);
        assert_eq!(FrameKind::DataSuperdense.header_bits(), [false, true]);
        assert_eq!(FrameKind::DataSequential.header_bits(), [true, false]);
    }

    #[test]
    fn test_reserved_header_rejected() {
        assert_eq!(
            FrameKind::from_header_bits([true, true]),
            Err(HeaderError::Reserved)
        );
        for kind in [FrameKind::Epr, FrameKind::DataSuperdense, FrameKind::DataSequential] {
            assert_eq!(FrameKind::from_header_bits(kind.header_bits()), Ok(kind));
        }
    }
}
