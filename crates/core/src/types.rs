use std::fmt;

use serde::{Deserialize, Serialize};

/// Frame terminator, `01111110`.
pub const SENTINEL: u8 = 0b0111_1110;
/// Escape prefix used when a payload byte collides with the sentinel.
pub const ESCAPE: u8 = 0x7D;

pub const BITS_PER_BYTE: usize = 8;

/// Identifier of one half-pair produced by the link; both halves share it.
pub type PairId = u64;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for PeerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Correlation id of a single frame exchange. `origin` is the sending node
/// and `seq` counts the frames it has put on the link, so the sender and the
/// receiver of a frame both derive the same id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameId {
    pub origin: PeerId,
    pub seq: u64,
}

impl FrameId {
    pub fn new(origin: PeerId, seq: u64) -> Self {
        Self { origin, seq }
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.origin, self.seq)
    }
}
