//! Simulated quantum link for testing and simulation

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, trace, warn};
use qubit_bridge_core::{Crumb, PeerId};
use rand::Rng;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::sleep;

use crate::link::{QuantumLink, Qubit, QubitState};
use crate::{LinkConfig, LinkError};

struct Transit {
    from: PeerId,
    unit: Qubit,
}

/// Lossless, ordered point-to-point delivery of qubits between attached
/// endpoints. Bell pairs are tracked by pair id and Pauli frame, which is
/// exact for the operations the frame codec uses.
pub struct SimulatedQuantumNetwork {
    endpoints: RwLock<HashMap<PeerId, mpsc::UnboundedSender<Transit>>>,
    config: LinkConfig,
    next_pair: AtomicU64,
    stats: NetworkStats,
}

#[derive(Debug, Default)]
struct NetworkStats {
    qubits_sent: AtomicU64,
    qubits_delivered: AtomicU64,
    pairs_created: AtomicU64,
}

impl SimulatedQuantumNetwork {
    pub fn new(config: LinkConfig) -> Arc<Self> {
        debug!("SimulatedQuantumNetwork initialized with config: {:?}", config);
        Arc::new(Self {
            endpoints: RwLock::new(HashMap::new()),
            config,
            next_pair: AtomicU64::new(0),
            stats: NetworkStats::default(),
        })
    }

    pub async fn join(self: &Arc<Self>, id: impl Into<PeerId>) -> SimulatedLink {
        let id = id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        if self.endpoints.write().await.insert(id.clone(), tx).is_some() {
            warn!("Endpoint {} re-joined the network, previous receiver detached", id);
        }
        SimulatedLink {
            id,
            network: Arc::clone(self),
            receiver: Mutex::new(rx),
        }
    }

    /// `(qubits_sent, qubits_delivered, pairs_created)`
    pub fn get_stats(&self) -> (u64, u64, u64) {
        (
            self.stats.qubits_sent.load(Ordering::Relaxed),
            self.stats.qubits_delivered.load(Ordering::Relaxed),
            self.stats.pairs_created.load(Ordering::Relaxed),
        )
    }

    async fn deliver(&self, from: &PeerId, to: &PeerId, unit: Qubit) -> Result<(), LinkError> {
        if !self.config.qubit_latency.is_zero() {
            sleep(self.config.qubit_latency).await;
        }
        let endpoints = self.endpoints.read().await;
        let channel = endpoints
            .get(to)
            .ok_or_else(|| LinkError::UnknownPeer(to.clone()))?;
        channel
            .send(Transit {
                from: from.clone(),
                unit,
            })
            .map_err(|_| LinkError::Closed(to.clone()))?;
        self.stats.qubits_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

pub struct SimulatedLink {
    id: PeerId,
    network: Arc<SimulatedQuantumNetwork>,
    receiver: Mutex<mpsc::UnboundedReceiver<Transit>>,
}

impl SimulatedLink {
    pub fn network(&self) -> &Arc<SimulatedQuantumNetwork> {
        &self.network
    }
}

fn measure(unit: &Qubit) -> bool {
    match unit.state() {
        QubitState::Basis(bit) => bit,
        // a lone half of a maximally entangled pair
        QubitState::BellHalf { .. } => rand::rng().random(),
    }
}

#[async_trait]
impl QuantumLink for SimulatedLink {
    fn local_id(&self) -> &PeerId {
        &self.id
    }

    fn create_entangled_pair(&self) -> (Qubit, Qubit) {
        let pair = self.network.next_pair.fetch_add(1, Ordering::Relaxed);
        self.network.stats.pairs_created.fetch_add(1, Ordering::Relaxed);
        (Qubit::bell_half(pair), Qubit::bell_half(pair))
    }

    fn apply_correction(&self, half: &mut Qubit, crumb: Crumb) {
        half.apply_pauli(crumb.bit_flip(), crumb.phase_flip());
    }

    fn joint_decode(&self, received: Qubit, local: Qubit) -> Crumb {
        match (received.state(), local.state()) {
            (
                QubitState::BellHalf {
                    pair: a,
                    bit_flip: ax,
                    phase_flip: az,
                },
                QubitState::BellHalf {
                    pair: b,
                    bit_flip: bx,
                    phase_flip: bz,
                },
            ) if a == b => Crumb::from_bits(az ^ bz, ax ^ bx),
            (r, l) => {
                warn!(
                    "{}: joint decode of unpaired qubits ({:?}, {:?}), outcome is random",
                    self.id, r, l
                );
                Crumb::from_bits(measure(&received), measure(&local))
            }
        }
    }

    fn single_encode(&self, bit: bool) -> Qubit {
        let mut unit = Qubit::basis(false);
        if bit {
            unit.apply_pauli(true, false);
        }
        unit
    }

    fn single_decode(&self, unit: Qubit) -> bool {
        measure(&unit)
    }

    async fn send(&self, to: &PeerId, unit: Qubit) -> Result<(), LinkError> {
        trace!("{} -> {}: {:?}", self.id, to, unit.state());
        self.network.deliver(&self.id, to, unit).await
    }

    async fn receive(&self, from: &PeerId) -> Result<Qubit, LinkError> {
        let mut receiver = self.receiver.lock().await;
        loop {
            let transit = receiver
                .recv()
                .await
                .ok_or_else(|| LinkError::Closed(self.id.clone()))?;
            if transit.from == *from {
                self.network
                    .stats
                    .qubits_delivered
                    .fetch_add(1, Ordering::Relaxed);
                return Ok(transit.unit);
            }
            warn!(
                "{}: discarding qubit from {} while listening to {}",
                self.id, transit.from, from
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_superdense_decode_all_crumbs() {
        let network = SimulatedQuantumNetwork::new(LinkConfig::default());
        let alice = network.join("alice").await;
        let bob = network.join("bob").await;

        for value in 0..4u8 {
            let crumb = Crumb::new(value);
            let (local, mut remote) = alice.create_entangled_pair();
            alice.apply_correction(&mut remote, crumb);
            alice.send(bob.local_id(), remote).await.unwrap();
            let received = bob.receive(alice.local_id()).await.unwrap();
            assert_eq!(bob.joint_decode(received, local), crumb);
        }
    }

    #[tokio::test]
    async fn test_sequential_delivery_is_ordered() {
        let network = SimulatedQuantumNetwork::new(LinkConfig::default());
        let alice = network.join("alice").await;
        let bob = network.join("bob").await;

        let bits = [true, false, false, true, true];
        for bit in bits {
            alice
                .send(bob.local_id(), alice.single_encode(bit))
                .await
                .unwrap();
        }
        let mut received = Vec::new();
        for _ in 0..bits.len() {
            let unit = bob.receive(alice.local_id()).await.unwrap();
            received.push(bob.single_decode(unit));
        }
        assert_eq!(received, bits);
        assert_eq!(network.get_stats(), (5, 5, 0));
    }

    #[tokio::test]
    async fn test_send_to_unknown_peer() {
        let network = SimulatedQuantumNetwork::new(LinkConfig::default());
        let alice = network.join("alice").await;
        let result = alice
            .send(&PeerId::from("carol"), alice.single_encode(true))
            .await;
        assert!(matches!(result, Err(LinkError::UnknownPeer(_))));
    }
}
