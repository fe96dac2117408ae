//! simulation tools for the qubit bridge

pub mod scenarios;

use std::time::Duration;
use qubit_bridge_channel::{ChannelConfig, EprBusyPolicy, EprMode, LinkConfig};

pub struct SimulationPresets;

impl SimulationPresets {
    pub fn rich_entanglement() -> ChannelConfig {
        ChannelConfig {
            mtu: 80,
            epr_period: Duration::from_millis(50),
            epr_initial_delay: Duration::ZERO,
            epr_busy_policy: EprBusyPolicy::Retry {
                attempts: 5,
                backoff: Duration::from_millis(2),
            },
            response_timeout: Some(Duration::from_secs(30)),
            ..Default::default()
        }
    }

    pub fn scarce_entanglement() -> ChannelConfig {
        ChannelConfig {
            mtu: 4, // 32 pairs per EPR frame
            epr_period: Duration::from_millis(200),
            epr_initial_delay: Duration::ZERO,
            response_timeout: Some(Duration::from_secs(30)),
            ..Default::default()
        }
    }

    /// EPR frames only when a sender asks for them, no timer on either side.
    pub fn manual_entanglement() -> ChannelConfig {
        ChannelConfig {
            mtu: 16,
            epr_mode: EprMode::Manual,
            response_timeout: Some(Duration::from_secs(30)),
            ..Default::default()
        }
    }

    pub fn no_entanglement() -> ChannelConfig {
        ChannelConfig {
            epr_enabled: false,
            response_timeout: Some(Duration::from_secs(30)),
            ..Default::default()
        }
    }

    pub fn slow_link() -> ChannelConfig {
        ChannelConfig {
            mtu: 16,
            epr_period: Duration::from_millis(100),
            epr_initial_delay: Duration::ZERO,
            buffer_capacity: Some(16 * 8 * 4),
            response_timeout: Some(Duration::from_secs(60)),
            link: LinkConfig {
                qubit_latency: Duration::from_micros(50),
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        for config in [
            SimulationPresets::rich_entanglement(),
            SimulationPresets::scarce_entanglement(),
            SimulationPresets::manual_entanglement(),
            SimulationPresets::no_entanglement(),
            SimulationPresets::slow_link(),
        ] {
            assert!(config.validate().is_ok(), "{:?}", config);
        }
    }
}
