//! wire-level types shared by the qubit bridge protocol engine

pub mod bits;
pub mod header;
pub mod stuffing;
pub mod types;

pub use bits::{BitCursor, Crumb, FrameAssembler};
pub use header::{FrameKind, HeaderError, HEADER_BITS};
pub use stuffing::{frame_payload, stuff, unstuff, StuffingError};
pub use types::{FrameId, PairId, PeerId, ESCAPE, SENTINEL};
