//! HDLC-style byte stuffing so that a payload never contains the sentinel.

use thiserror::Error;

use crate::types::{ESCAPE, SENTINEL};

const ESCAPE_MASK: u8 = 0x20;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StuffingError {
    #[error("escape byte at end of payload")]
    DanglingEscape,

    #[error("invalid escape sequence 0x7d {0:#04x}")]
    InvalidEscape(u8),

    #[error("unescaped sentinel at offset {0}")]
    UnescapedSentinel(usize),
}

pub fn stuff(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + payload.len() / 8);
    for &byte in payload {
        if byte == SENTINEL || byte == ESCAPE {
            out.push(ESCAPE);
            out.push(byte ^ ESCAPE_MASK);
        } else {
            out.push(byte);
        }
    }
    out
}

pub fn unstuff(stuffed: &[u8]) -> Result<Vec<u8>, StuffingError> {
    let mut out = Vec::with_capacity(stuffed.len());
    let mut iter = stuffed.iter().enumerate();
    while let Some((offset, &byte)) = iter.next() {
        match byte {
            ESCAPE => {
                let (_, &next) = iter.next().ok_or(StuffingError::DanglingEscape)?;
                let original = next ^ ESCAPE_MASK;
                if original != SENTINEL && original != ESCAPE {
                    return Err(StuffingError::InvalidEscape(next));
                }
                out.push(original);
            }
            SENTINEL => return Err(StuffingError::UnescapedSentinel(offset)),
            _ => out.push(byte),
        }
    }
    Ok(out)
}

/// Stuffs `payload` and appends the terminating sentinel.
pub fn frame_payload(payload: &[u8]) -> Vec<u8> {
    let mut framed = stuff(payload);
    framed.push(SENTINEL);
    framed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_payload_untouched() {
        let payload = b"hello".to_vec();
        assert_eq!(stuff(&payload), payload);
        assert_eq!(frame_payload(&payload).last(), Some(&SENTINEL));
    }

    #[test]
    fn test_sentinel_and_escape_are_stuffed() {
        let payload = vec![0x01, SENTINEL, ESCAPE, 0x02];
        let stuffed = stuff(&payload);
        assert_eq!(stuffed, vec![0x01, 0x7D, 0x5E, 0x7D, 0x5D, 0x02]);
        assert!(!stuffed.contains(&SENTINEL));
        assert_eq!(unstuff(&stuffed), Ok(payload));
    }

    #[test]
    fn test_malformed_stuffing() {
        assert_eq!(unstuff(&[0x10, ESCAPE]), Err(StuffingError::DanglingEscape));
        assert_eq!(unstuff(&[ESCAPE, 0x00]), Err(StuffingError::InvalidEscape(0x00)));
        assert_eq!(unstuff(&[0x00, SENTINEL]), Err(StuffingError::UnescapedSentinel(1)));
    }
}
