//! quantum link protocol engine for the qubit bridge

use std::time::Duration;

use qubit_bridge_core::{FrameKind, HeaderError, PeerId, StuffingError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod buffer;
pub mod busy;
pub mod channel;
pub mod frame;
pub mod link;
pub mod node;
pub mod scheduler;
pub mod simulated;

pub use buffer::EntanglementBuffer;
pub use busy::{BusyFlag, BusyHolder, LinkLease};
pub use channel::Channel;
pub use frame::{EprOutcome, Frame, FrameContext, FrameMetrics, PeerHandle};
pub use link::{QuantumLink, Qubit, QubitState};
pub use node::{Delivery, Dispatch, Node, Transmission};
pub use scheduler::EprScheduler;
pub use simulated::{SimulatedLink, SimulatedQuantumNetwork};

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("peer {0} is not attached to the link")]
    UnknownPeer(PeerId),

    #[error("link endpoint {0} closed")]
    Closed(PeerId),
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame kind already set to {0}")]
    KindAlreadySet(FrameKind),

    #[error("malformed frame header: {0}")]
    MalformedHeader(#[from] HeaderError),

    #[error("malformed payload: {0}")]
    Stuffing(#[from] StuffingError),

    #[error("frame cancelled")]
    Cancelled,

    #[error("link error: {0}")]
    Link(#[from] LinkError),
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("invalid channel configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown peer {0}")]
    UnknownPeer(String),

    #[error("peer {0} did not deliver within {1:?}")]
    PeerUnresponsive(PeerId, Duration),

    #[error("node {0} is stopped")]
    Stopped(PeerId),

    #[error("requested EPR frame was not sent: {0:?}")]
    EprNotSent(EprOutcome),

    #[error("link error: {0}")]
    Link(#[from] LinkError),
}

/// Locally held halves a node keeps before EPR frames are skipped.
pub const DEFAULT_BUFFER_CAPACITY: usize = 8 * 1000;

/// What the EPR timer does when a frame could not start because either node
/// was mid-frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EprBusyPolicy {
    /// Drop the frame and wait for the next period.
    #[default]
    Skip,
    /// Try again after `backoff`, at most `attempts` more times.
    Retry { attempts: u32, backoff: Duration },
}

/// Who decides when EPR frames are sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EprMode {
    /// The initiator's timer sends one every `epr_period`.
    #[default]
    Periodic,
    /// Sent only through [`Channel::transmit_epr`]; the receiving node
    /// reports each one as a delivery.
    Manual,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Delay applied to every qubit sent over the simulated link.
    pub qubit_latency: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Bytes of entangled-pair material carried by one EPR frame.
    pub mtu: usize,
    pub epr_enabled: bool,
    pub epr_mode: EprMode,
    pub epr_period: Duration,
    pub epr_initial_delay: Duration,
    /// Node owning the EPR timer; the first host when unset.
    pub initiator: Option<PeerId>,
    pub queue_size: usize,
    /// Upper bound on locally held halves per node, unbounded when unset.
    /// EPR frames that would exceed it are skipped.
    pub buffer_capacity: Option<usize>,
    pub epr_busy_policy: EprBusyPolicy,
    /// Base wait between attempts to reserve the link for a data frame.
    pub busy_backoff: Duration,
    /// How long `transmit_packet` waits for the far side, forever when unset.
    pub response_timeout: Option<Duration>,
    pub link: LinkConfig,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            mtu: 80,
            epr_enabled: true,
            epr_mode: EprMode::Periodic,
            epr_period: Duration::from_secs(100),
            epr_initial_delay: Duration::from_secs(1),
            initiator: None,
            queue_size: 512,
            buffer_capacity: Some(DEFAULT_BUFFER_CAPACITY),
            epr_busy_policy: EprBusyPolicy::Skip,
            busy_backoff: Duration::from_millis(1),
            response_timeout: None,
            link: LinkConfig::default(),
        }
    }
}

impl ChannelConfig {
    pub fn pairs_per_epr_frame(&self) -> usize {
        self.mtu * 8
    }

    pub fn validate(&self) -> Result<(), ChannelError> {
        if self.mtu == 0 {
            return Err(ChannelError::InvalidConfig("mtu must be positive".into()));
        }
        if self.queue_size == 0 {
            return Err(ChannelError::InvalidConfig("queue_size must be positive".into()));
        }
        if self.epr_enabled && self.epr_mode == EprMode::Periodic && self.epr_period.is_zero() {
            return Err(ChannelError::InvalidConfig("epr_period must be positive".into()));
        }
        if let Some(capacity) = self.buffer_capacity {
            if capacity < self.pairs_per_epr_frame() {
                return Err(ChannelError::InvalidConfig(format!(
                    "buffer_capacity {} cannot hold one EPR frame of {} pairs",
                    capacity,
                    self.pairs_per_epr_frame()
                )));
            }
        }
        Ok(())
    }
}
