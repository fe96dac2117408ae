//! Two connected nodes behind a request/response call.

use std::sync::Arc;

use log::{debug, info};
use qubit_bridge_core::PeerId;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::link::QuantumLink;
use crate::node::{Delivery, Node, Transmission};
use crate::simulated::SimulatedQuantumNetwork;
use crate::{ChannelConfig, ChannelError, EprMode};

pub struct Channel {
    node_a: Arc<Node>,
    node_b: Arc<Node>,
    config: ChannelConfig,
    /// One in-flight `transmit_packet` per direction, indexed by source.
    lanes: [Mutex<()>; 2],
    network: Option<Arc<SimulatedQuantumNetwork>>,
}

impl Channel {
    /// Builds both nodes on a fresh simulated link and starts them.
    pub async fn new(
        host_a: impl Into<PeerId>,
        host_b: impl Into<PeerId>,
        config: ChannelConfig,
    ) -> Result<Self, ChannelError> {
        config.validate()?;
        let network = SimulatedQuantumNetwork::new(config.link.clone());
        let link_a = network.join(host_a).await;
        let link_b = network.join(host_b).await;
        let mut channel = Self::with_links(Arc::new(link_a), Arc::new(link_b), config).await?;
        channel.network = Some(network);
        Ok(channel)
    }

    /// Builds both nodes on caller-provided link endpoints and starts them.
    pub async fn with_links(
        link_a: Arc<dyn QuantumLink>,
        link_b: Arc<dyn QuantumLink>,
        config: ChannelConfig,
    ) -> Result<Self, ChannelError> {
        config.validate()?;
        let id_a = link_a.local_id().clone();
        let id_b = link_b.local_id().clone();
        let initiator = config.initiator.clone().unwrap_or_else(|| id_a.clone());
        if initiator != id_a && initiator != id_b {
            return Err(ChannelError::InvalidConfig(format!(
                "initiator {} is neither {} nor {}",
                initiator, id_a, id_b
            )));
        }

        let periodic = config.epr_mode == EprMode::Periodic;
        let node_a = Arc::new(Node::new(link_a, config.clone(), periodic && initiator == id_a));
        let node_b = Arc::new(Node::new(link_b, config.clone(), periodic && initiator == id_b));
        node_a.connect(&node_b)?;
        node_a.start().await?;
        node_b.start().await?;

        info!(
            "Channel {} <-> {} up, mtu {} bytes, EPR {:?} (initiator {})",
            id_a, id_b, config.mtu, config.epr_mode, initiator
        );
        Ok(Self {
            node_a,
            node_b,
            config,
            lanes: [Mutex::new(()), Mutex::new(())],
            network: None,
        })
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn nodes(&self) -> (&Arc<Node>, &Arc<Node>) {
        (&self.node_a, &self.node_b)
    }

    pub fn node(&self, id: &str) -> Option<&Arc<Node>> {
        [&self.node_a, &self.node_b]
            .into_iter()
            .find(|node| node.id().as_str() == id)
    }

    /// The simulated link, when the channel created its own.
    pub fn network(&self) -> Option<&Arc<SimulatedQuantumNetwork>> {
        self.network.as_ref()
    }

    fn resolve(&self, source_id: &str) -> Result<(usize, &Arc<Node>, &Arc<Node>), ChannelError> {
        if self.node_a.id().as_str() == source_id {
            Ok((0, &self.node_a, &self.node_b))
        } else if self.node_b.id().as_str() == source_id {
            Ok((1, &self.node_b, &self.node_a))
        } else {
            Err(ChannelError::UnknownPeer(source_id.to_string()))
        }
    }

    /// Carries `bits` from `source_id` to the other node and returns what
    /// that node decoded.
    pub async fn transmit_packet(&self, bits: Vec<u8>, source_id: &str) -> Result<Delivery, ChannelError> {
        debug!("transmitting {} bytes from {}", bits.len(), source_id);
        self.exchange(Transmission::Data(bits), source_id).await
    }

    /// Sends one EPR frame from `source_id` and returns the receiving node's
    /// report of it. Only available in [`EprMode::Manual`].
    pub async fn transmit_epr(&self, source_id: &str) -> Result<Delivery, ChannelError> {
        if !self.config.epr_enabled || self.config.epr_mode != EprMode::Manual {
            return Err(ChannelError::InvalidConfig(
                "requested EPR frames need epr_enabled and EprMode::Manual".into(),
            ));
        }
        debug!("requesting EPR frame from {}", source_id);
        self.exchange(Transmission::Epr, source_id).await
    }

    async fn exchange(&self, transmission: Transmission, source_id: &str) -> Result<Delivery, ChannelError> {
        let (lane, source, destination) = self.resolve(source_id)?;
        let _turn = self.lanes[lane].lock().await;

        let delivery = match self.config.response_timeout {
            Some(limit) => timeout(limit, Self::round_trip(transmission, source, destination))
                .await
                .map_err(|_| ChannelError::PeerUnresponsive(destination.id().clone(), limit))??,
            None => Self::round_trip(transmission, source, destination).await?,
        };
        debug!(
            "frame {} delivered to {}: {} pairs, {} sequential qubits",
            delivery.metrics.frame_id,
            destination.id(),
            delivery.metrics.pairs_consumed,
            delivery.metrics.sequential_qubits
        );
        Ok(delivery)
    }

    /// Queues `transmission` at `source` and waits for the delivery of that
    /// exact frame at `destination`. Deliveries of frames whose callers gave
    /// up earlier are discarded on the way.
    async fn round_trip(
        transmission: Transmission,
        source: &Node,
        destination: &Node,
    ) -> Result<Delivery, ChannelError> {
        let dispatched = source.queue_transmission(transmission).await?;
        let frame_id = match dispatched.await {
            Ok(Ok(frame_id)) => frame_id,
            Ok(Err(outcome)) => return Err(ChannelError::EprNotSent(outcome)),
            Err(_) => return Err(ChannelError::Stopped(source.id().clone())),
        };
        loop {
            let delivery = destination.get_from_out_queue().await?;
            if delivery.metrics.frame_id == frame_id {
                return Ok(delivery);
            }
            debug!(
                "{}: discarding stale frame {} while waiting for {}",
                destination.id(),
                delivery.metrics.frame_id,
                frame_id
            );
        }
    }

    /// Stops both nodes and waits for their loops to exit.
    pub async fn shutdown(&self) {
        self.node_a.stop().await;
        self.node_b.stop().await;
        info!("Channel {} <-> {} shut down", self.node_a.id(), self.node_b.id());
    }
}
