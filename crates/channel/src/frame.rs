//! Frame codec: one header plus payload exchange over the quantum link.
//!
//! Every frame starts with two header qubits. EPR frames then carry
//! `mtu * 8` remote halves of fresh Bell pairs. Data frames carry the
//! byte-stuffed payload followed by the sentinel byte, superdense coded (one
//! crumb per pre-shared pair) while the entanglement buffer lasts and one bit
//! per qubit after that, switching in the middle of the frame when the buffer
//! runs dry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, trace};
use qubit_bridge_core::{
    frame_payload, unstuff, BitCursor, FrameAssembler, FrameId, FrameKind, PeerId,
};
use rand::Rng;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::buffer::EntanglementBuffer;
use crate::busy::{BusyFlag, BusyHolder, LinkLease};
use crate::link::{QuantumLink, Qubit};
use crate::FrameError;

/// Node state a frame needs while it runs.
#[derive(Clone)]
pub struct FrameContext {
    pub link: Arc<dyn QuantumLink>,
    pub buffer: Arc<EntanglementBuffer>,
    pub busy: Arc<BusyFlag>,
    pub cancel: CancellationToken,
    pub mtu: usize,
    pub busy_backoff: Duration,
}

/// The far end of a frame exchange.
#[derive(Clone, Debug)]
pub struct PeerHandle {
    pub id: PeerId,
    pub busy: Arc<BusyFlag>,
}

#[derive(Debug, Clone)]
pub struct FrameMetrics {
    pub frame_id: FrameId,
    pub kind: Option<FrameKind>,
    pub header_qubits: usize,
    /// Pre-shared pairs spent on superdense crumbs.
    pub pairs_consumed: usize,
    /// Pairs handed out or stored by an EPR frame.
    pub pairs_distributed: usize,
    pub sequential_qubits: usize,
    pub payload_bytes: usize,
    pub measurement_time: Duration,
    pub started_at: Instant,
    /// Header fully on the wire (sender) or fully read (receiver).
    pub created_at: Option<Instant>,
    /// Last payload qubit sent or decoded.
    pub completed_at: Option<Instant>,
}

impl FrameMetrics {
    fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            kind: None,
            header_qubits: 0,
            pairs_consumed: 0,
            pairs_distributed: 0,
            sequential_qubits: 0,
            payload_bytes: 0,
            measurement_time: Duration::ZERO,
            started_at: Instant::now(),
            created_at: None,
            completed_at: None,
        }
    }

    /// Qubits that carried payload or sentinel bits.
    pub fn payload_qubits(&self) -> usize {
        self.pairs_consumed + self.sequential_qubits
    }

    pub fn total_qubits(&self) -> usize {
        self.header_qubits + self.payload_qubits() + self.pairs_distributed
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.completed_at.map(|at| at - self.started_at)
    }
}

/// Result of an attempt to distribute entanglement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EprOutcome {
    Sent { pairs: usize },
    Busy(BusyHolder),
    BufferFull { buffered: usize },
}

pub struct Frame {
    ctx: FrameContext,
    kind: Option<FrameKind>,
    payload: Option<Vec<u8>>,
    metrics: FrameMetrics,
}

impl Frame {
    pub fn new(ctx: FrameContext, frame_id: FrameId) -> Self {
        Self {
            ctx,
            kind: None,
            payload: None,
            metrics: FrameMetrics::new(frame_id),
        }
    }

    pub fn kind(&self) -> Option<FrameKind> {
        self.kind
    }

    pub fn id(&self) -> &FrameId {
        &self.metrics.frame_id
    }

    pub fn metrics(&self) -> &FrameMetrics {
        &self.metrics
    }

    /// Decoded payload, present after a data frame was received.
    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    pub fn into_parts(self) -> (Option<Vec<u8>>, FrameMetrics) {
        (self.payload, self.metrics)
    }

    fn set_kind(&mut self, kind: FrameKind) -> Result<(), FrameError> {
        if let Some(existing) = self.kind {
            return Err(FrameError::KindAlreadySet(existing));
        }
        self.kind = Some(kind);
        self.metrics.kind = Some(kind);
        Ok(())
    }

    fn ensure_unused(&self) -> Result<(), FrameError> {
        match self.kind {
            Some(existing) => Err(FrameError::KindAlreadySet(existing)),
            None => Ok(()),
        }
    }

    /// Sends `payload` as one data frame, waiting until both nodes are idle.
    pub async fn send_data_frame(
        &mut self,
        payload: &[u8],
        destination: &PeerHandle,
    ) -> Result<(), FrameError> {
        self.ensure_unused()?;
        let framed = frame_payload(payload);
        let _lease = self.acquire_lease(destination).await?;

        let kind = if self.ctx.buffer.is_empty().await {
            FrameKind::DataSequential
        } else {
            FrameKind::DataSuperdense
        };
        self.set_kind(kind)?;
        self.metrics.payload_bytes = payload.len();
        debug!(
            "frame {}: sending {} payload bytes to {} as {}",
            self.metrics.frame_id,
            payload.len(),
            destination.id,
            kind
        );

        self.send_header(kind, &destination.id).await?;
        let mut cursor = BitCursor::new(&framed);
        if kind == FrameKind::DataSuperdense {
            self.send_superdense(&mut cursor, &destination.id).await?;
        }
        self.send_sequential(&mut cursor, &destination.id).await?;

        self.metrics.completed_at = Some(Instant::now());
        trace!(
            "frame {}: {} pairs, {} sequential qubits",
            self.metrics.frame_id,
            self.metrics.pairs_consumed,
            self.metrics.sequential_qubits
        );
        Ok(())
    }

    /// Distributes `mtu * 8` fresh pairs to `destination`, keeping the local
    /// halves in this node's buffer in the order the remote halves are sent.
    /// Gives up without sending anything when either node is mid-frame or the
    /// buffer has no room.
    pub async fn send_epr_frame(&mut self, destination: &PeerHandle) -> Result<EprOutcome, FrameError> {
        self.ensure_unused()?;
        if let Some(full) = self.check_room().await {
            return Ok(full);
        }
        let lease = match LinkLease::try_acquire(&self.ctx.busy, &destination.busy) {
            Ok(lease) => lease,
            Err(holder) => {
                debug!(
                    "frame {}: {:?} node busy, EPR frame not started",
                    self.metrics.frame_id, holder
                );
                return Ok(EprOutcome::Busy(holder));
            }
        };
        self.distribute_pairs(destination, lease).await
    }

    /// Like [`Frame::send_epr_frame`], but waits for both nodes to go idle
    /// instead of giving up. Still refuses when the buffer has no room.
    pub async fn send_epr_frame_when_idle(
        &mut self,
        destination: &PeerHandle,
    ) -> Result<EprOutcome, FrameError> {
        self.ensure_unused()?;
        if let Some(full) = self.check_room().await {
            return Ok(full);
        }
        let lease = self.acquire_lease(destination).await?;
        self.distribute_pairs(destination, lease).await
    }

    async fn check_room(&self) -> Option<EprOutcome> {
        if self.ctx.buffer.has_room_for(self.ctx.mtu * 8).await {
            return None;
        }
        let buffered = self.ctx.buffer.len().await;
        debug!(
            "frame {}: entanglement buffer full ({} halves), skipping EPR frame",
            self.metrics.frame_id, buffered
        );
        Some(EprOutcome::BufferFull { buffered })
    }

    async fn distribute_pairs(
        &mut self,
        destination: &PeerHandle,
        _lease: LinkLease,
    ) -> Result<EprOutcome, FrameError> {
        let pairs = self.ctx.mtu * 8;
        self.set_kind(FrameKind::Epr)?;
        self.send_header(FrameKind::Epr, &destination.id).await?;
        for _ in 0..pairs {
            let (local, remote) = self.ctx.link.create_entangled_pair();
            self.ctx.buffer.push(local).await;
            self.transmit(&destination.id, remote).await?;
            self.metrics.pairs_distributed += 1;
        }
        self.metrics.completed_at = Some(Instant::now());
        debug!(
            "frame {}: distributed {} pairs to {}",
            self.metrics.frame_id, pairs, destination.id
        );
        Ok(EprOutcome::Sent { pairs })
    }

    /// Receives exactly one frame from `source`. This node's busy flag is set
    /// from the first header qubit until the frame is fully decoded.
    pub async fn receive(&mut self, source: &PeerId) -> Result<(), FrameError> {
        self.ensure_unused()?;
        let first = self.receive_bit(source).await?;
        self.ctx.busy.occupy();
        let result = self.receive_after_first_bit(first, source).await;
        self.ctx.busy.release();
        result
    }

    async fn receive_after_first_bit(&mut self, first: bool, source: &PeerId) -> Result<(), FrameError> {
        let second = self.receive_bit(source).await?;
        self.metrics.header_qubits = 2;
        self.metrics.created_at = Some(Instant::now());

        let kind = match FrameKind::from_header_bits([first, second]) {
            Ok(kind) => kind,
            Err(e) => {
                error!(
                    "frame {}: header {}{} from {} is reserved, abandoning frame",
                    self.metrics.frame_id, first as u8, second as u8, source
                );
                return Err(e.into());
            }
        };
        self.set_kind(kind)?;
        trace!("frame {}: header {} from {}", self.metrics.frame_id, kind, source);

        let body_start = Instant::now();
        let result = match kind {
            FrameKind::Epr => self.receive_epr(source).await,
            FrameKind::DataSuperdense => self.receive_superdense(source).await,
            FrameKind::DataSequential => self.receive_sequential(FrameAssembler::new(), source).await,
        };
        self.metrics.measurement_time = body_start.elapsed();
        self.metrics.completed_at = Some(Instant::now());
        result
    }

    async fn receive_epr(&mut self, source: &PeerId) -> Result<(), FrameError> {
        for _ in 0..self.ctx.mtu * 8 {
            let half = self.receive_unit(source).await?;
            self.ctx.buffer.push(half).await;
            self.metrics.pairs_distributed += 1;
        }
        Ok(())
    }

    async fn receive_superdense(&mut self, source: &PeerId) -> Result<(), FrameError> {
        let mut assembler = FrameAssembler::new();
        while !assembler.is_complete() {
            let Some(local) = self.ctx.buffer.pop_front().await else {
                debug!(
                    "frame {}: entanglement buffer exhausted after {} pairs, continuing sequentially",
                    self.metrics.frame_id, self.metrics.pairs_consumed
                );
                break;
            };
            let received = self.receive_unit(source).await?;
            let crumb = self.ctx.link.joint_decode(received, local);
            self.metrics.pairs_consumed += 1;
            assembler.push_crumb(crumb);
        }
        if assembler.is_complete() {
            self.finish(assembler)
        } else {
            self.receive_sequential(assembler, source).await
        }
    }

    async fn receive_sequential(
        &mut self,
        mut assembler: FrameAssembler,
        source: &PeerId,
    ) -> Result<(), FrameError> {
        while !assembler.is_complete() {
            let bit = self.receive_bit(source).await?;
            self.metrics.sequential_qubits += 1;
            assembler.push_bit(bit);
        }
        self.finish(assembler)
    }

    fn finish(&mut self, assembler: FrameAssembler) -> Result<(), FrameError> {
        let payload = unstuff(&assembler.into_payload())?;
        self.metrics.payload_bytes = payload.len();
        self.payload = Some(payload);
        Ok(())
    }

    async fn send_header(&mut self, kind: FrameKind, destination: &PeerId) -> Result<(), FrameError> {
        for bit in kind.header_bits() {
            let unit = self.ctx.link.single_encode(bit);
            self.transmit(destination, unit).await?;
            self.metrics.header_qubits += 1;
        }
        self.metrics.created_at = Some(Instant::now());
        Ok(())
    }

    async fn send_superdense(
        &mut self,
        cursor: &mut BitCursor<'_>,
        destination: &PeerId,
    ) -> Result<(), FrameError> {
        while let Some(crumb) = cursor.next_crumb() {
            match self.ctx.buffer.pop_front().await {
                Some(mut half) => {
                    self.ctx.link.apply_correction(&mut half, crumb);
                    self.transmit(destination, half).await?;
                    self.metrics.pairs_consumed += 1;
                }
                None => {
                    debug!(
                        "frame {}: entanglement buffer exhausted after {} pairs, {} bits left for sequential",
                        self.metrics.frame_id,
                        self.metrics.pairs_consumed,
                        cursor.remaining_bits() + 2
                    );
                    for bit in [crumb.first(), crumb.second()] {
                        self.send_bit(bit, destination).await?;
                    }
                    break;
                }
            }
        }
        Ok(())
    }

    async fn send_sequential(
        &mut self,
        cursor: &mut BitCursor<'_>,
        destination: &PeerId,
    ) -> Result<(), FrameError> {
        while let Some(bit) = cursor.next_bit() {
            self.send_bit(bit, destination).await?;
        }
        Ok(())
    }

    async fn send_bit(&mut self, bit: bool, destination: &PeerId) -> Result<(), FrameError> {
        let unit = self.ctx.link.single_encode(bit);
        self.transmit(destination, unit).await?;
        self.metrics.sequential_qubits += 1;
        Ok(())
    }

    async fn acquire_lease(&self, destination: &PeerHandle) -> Result<LinkLease, FrameError> {
        loop {
            match LinkLease::try_acquire(&self.ctx.busy, &destination.busy) {
                Ok(lease) => return Ok(lease),
                Err(holder) => {
                    trace!(
                        "frame {}: waiting for link, {:?} node busy",
                        self.metrics.frame_id,
                        holder
                    );
                    let jitter = rand::rng().random_range(0..=self.ctx.busy_backoff.as_micros() as u64);
                    let wait = self.ctx.busy_backoff + Duration::from_micros(jitter);
                    tokio::select! {
                        biased;
                        () = self.ctx.cancel.cancelled() => return Err(FrameError::Cancelled),
                        () = sleep(wait) => {}
                    }
                }
            }
        }
    }

    async fn transmit(&self, destination: &PeerId, unit: Qubit) -> Result<(), FrameError> {
        tokio::select! {
            biased;
            () = self.ctx.cancel.cancelled() => Err(FrameError::Cancelled),
            res = self.ctx.link.send(destination, unit) => Ok(res?),
        }
    }

    async fn receive_unit(&self, source: &PeerId) -> Result<Qubit, FrameError> {
        tokio::select! {
            biased;
            () = self.ctx.cancel.cancelled() => Err(FrameError::Cancelled),
            res = self.ctx.link.receive(source) => Ok(res?),
        }
    }

    async fn receive_bit(&self, source: &PeerId) -> Result<bool, FrameError> {
        let unit = self.receive_unit(source).await?;
        Ok(self.ctx.link.single_decode(unit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedQuantumNetwork;
    use crate::LinkConfig;
    use qubit_bridge_core::{ESCAPE, SENTINEL};

    struct Side {
        ctx: FrameContext,
        handle: PeerHandle,
    }

    fn side(link: Arc<dyn QuantumLink>, mtu: usize, capacity: Option<usize>) -> Side {
        let busy = Arc::new(BusyFlag::new());
        let handle = PeerHandle {
            id: link.local_id().clone(),
            busy: Arc::clone(&busy),
        };
        Side {
            ctx: FrameContext {
                link,
                buffer: Arc::new(EntanglementBuffer::new(capacity)),
                busy,
                cancel: CancellationToken::new(),
                mtu,
                busy_backoff: Duration::from_millis(1),
            },
            handle,
        }
    }

    async fn two_sides(mtu: usize, capacity: Option<usize>) -> (Side, Side) {
        let network = SimulatedQuantumNetwork::new(LinkConfig::default());
        let alice = network.join("alice").await;
        let bob = network.join("bob").await;
        (
            side(Arc::new(alice), mtu, capacity),
            side(Arc::new(bob), mtu, capacity),
        )
    }

    async fn share_pairs(a: &Side, b: &Side, count: usize) {
        for _ in 0..count {
            let (local, remote) = a.ctx.link.create_entangled_pair();
            a.ctx.buffer.push(local).await;
            b.ctx.buffer.push(remote).await;
        }
    }

    fn frame_for(side: &Side) -> Frame {
        Frame::new(side.ctx.clone(), FrameId::new(side.handle.id.clone(), 0))
    }

    async fn exchange(sender: &Side, receiver: &Side, payload: &[u8]) -> (FrameMetrics, Frame) {
        let mut incoming = frame_for(receiver);
        let source = sender.handle.id.clone();
        let receiving = tokio::spawn(async move {
            let result = incoming.receive(&source).await;
            result.map(|()| incoming)
        });

        let mut outgoing = frame_for(sender);
        outgoing
            .send_data_frame(payload, &receiver.handle)
            .await
            .unwrap();
        let incoming = receiving.await.unwrap().unwrap();
        (outgoing.metrics().clone(), incoming)
    }

    #[tokio::test]
    async fn test_sequential_round_trip_without_pairs() {
        let (alice, bob) = two_sides(1, None).await;
        let payload = b"qubit".to_vec();

        let (sent, received) = exchange(&alice, &bob, &payload).await;

        assert_eq!(sent.kind, Some(FrameKind::DataSequential));
        assert_eq!(sent.pairs_consumed, 0);
        assert_eq!(sent.sequential_qubits, 8 * (payload.len() + 1));
        assert_eq!(received.kind(), Some(FrameKind::DataSequential));
        assert_eq!(received.payload(), Some(payload.as_slice()));
        assert!(!alice.ctx.busy.is_set());
        assert!(!bob.ctx.busy.is_set());
    }

    #[tokio::test]
    async fn test_superdense_round_trip_with_spare_pairs() {
        let (alice, bob) = two_sides(1, None).await;
        share_pairs(&alice, &bob, 100).await;
        let payload = vec![0x00, 0xFF, 0xA5];

        let (sent, received) = exchange(&alice, &bob, &payload).await;

        assert_eq!(sent.kind, Some(FrameKind::DataSuperdense));
        assert_eq!(sent.pairs_consumed, 16);
        assert_eq!(sent.sequential_qubits, 0);
        assert_eq!(received.metrics().pairs_consumed, 16);
        assert_eq!(received.payload(), Some(payload.as_slice()));
        assert_eq!(alice.ctx.buffer.len().await, 84);
        assert_eq!(bob.ctx.buffer.len().await, 84);
    }

    #[tokio::test]
    async fn test_hybrid_fallback_mid_frame() {
        let (alice, bob) = two_sides(1, None).await;
        share_pairs(&alice, &bob, 2).await;
        let payload = vec![0x41, 0x42, 0x43];

        let (sent, received) = exchange(&alice, &bob, &payload).await;

        // 32 bits: two crumbs superdense, the other 28 bits one qubit each
        assert_eq!(sent.kind, Some(FrameKind::DataSuperdense));
        assert_eq!(sent.pairs_consumed, 2);
        assert_eq!(sent.sequential_qubits, 28);
        assert_eq!(sent.payload_qubits(), 30);
        assert_eq!(received.metrics().pairs_consumed, 2);
        assert_eq!(received.metrics().sequential_qubits, 28);
        assert_eq!(received.payload(), Some(payload.as_slice()));
        assert!(alice.ctx.buffer.is_empty().await);
        assert!(bob.ctx.buffer.is_empty().await);
    }

    #[tokio::test]
    async fn test_exhaustion_bit_accounting() {
        let (alice, bob) = two_sides(1, None).await;
        share_pairs(&alice, &bob, 7).await;
        let payload: Vec<u8> = (1..=10).collect();

        let (sent, received) = exchange(&alice, &bob, &payload).await;

        assert!(alice.ctx.buffer.is_empty().await);
        assert_eq!(sent.pairs_consumed, 7);
        assert_eq!(
            2 * sent.pairs_consumed + sent.sequential_qubits,
            8 * (payload.len() + 1)
        );
        assert_eq!(received.payload(), Some(payload.as_slice()));
    }

    #[tokio::test]
    async fn test_sentinel_inside_payload() {
        let (alice, bob) = two_sides(1, None).await;
        share_pairs(&alice, &bob, 5).await;
        let payload = vec![SENTINEL, 0x01, ESCAPE, SENTINEL, SENTINEL];

        let (_, received) = exchange(&alice, &bob, &payload).await;

        assert_eq!(received.payload(), Some(payload.as_slice()));
        assert_eq!(received.metrics().payload_bytes, payload.len());
    }

    #[tokio::test]
    async fn test_epr_frame_pairing_order() {
        let (alice, bob) = two_sides(2, None).await;
        let mut incoming = frame_for(&bob);
        let source = alice.handle.id.clone();
        let receiving = tokio::spawn(async move {
            let result = incoming.receive(&source).await;
            result.map(|()| incoming)
        });

        let mut outgoing = frame_for(&alice);
        let outcome = outgoing.send_epr_frame(&bob.handle).await.unwrap();
        let incoming = receiving.await.unwrap().unwrap();

        assert_eq!(outcome, EprOutcome::Sent { pairs: 16 });
        assert_eq!(incoming.kind(), Some(FrameKind::Epr));
        assert_eq!(incoming.metrics().pairs_distributed, 16);
        assert_eq!(bob.ctx.buffer.len().await, 16);
        assert_eq!(alice.ctx.buffer.pair_ids().await, bob.ctx.buffer.pair_ids().await);
        assert!(!bob.ctx.busy.is_set());
    }

    #[tokio::test]
    async fn test_epr_frame_skipped_when_peer_busy() {
        let (alice, bob) = two_sides(2, None).await;
        bob.ctx.busy.occupy();

        let mut outgoing = frame_for(&alice);
        let outcome = outgoing.send_epr_frame(&bob.handle).await.unwrap();

        assert_eq!(outcome, EprOutcome::Busy(BusyHolder::Peer));
        assert_eq!(outgoing.kind(), None);
        assert!(alice.ctx.buffer.is_empty().await);
        assert!(!alice.ctx.busy.is_set());
    }

    #[tokio::test]
    async fn test_requested_epr_frame_waits_for_idle_peer() {
        let (alice, bob) = two_sides(2, None).await;
        bob.ctx.busy.occupy();

        let mut outgoing = frame_for(&alice);
        let peer = bob.handle.clone();
        let sending = tokio::spawn(async move {
            let outcome = outgoing.send_epr_frame_when_idle(&peer).await;
            outcome.map(|outcome| (outcome, outgoing))
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(alice.ctx.buffer.is_empty().await);

        bob.ctx.busy.release();
        let mut incoming = frame_for(&bob);
        incoming.receive(&alice.handle.id).await.unwrap();
        let (outcome, outgoing) = sending.await.unwrap().unwrap();

        assert_eq!(outcome, EprOutcome::Sent { pairs: 16 });
        assert_eq!(outgoing.kind(), Some(FrameKind::Epr));
        assert_eq!(alice.ctx.buffer.pair_ids().await, bob.ctx.buffer.pair_ids().await);
        assert!(!bob.ctx.busy.is_set());
    }

    #[tokio::test]
    async fn test_epr_frame_skipped_when_buffer_full() {
        let (alice, bob) = two_sides(2, Some(16)).await;
        share_pairs(&alice, &bob, 1).await;

        let mut outgoing = frame_for(&alice);
        let outcome = outgoing.send_epr_frame(&bob.handle).await.unwrap();

        assert_eq!(outcome, EprOutcome::BufferFull { buffered: 1 });
        assert!(!alice.ctx.busy.is_set());
        assert!(!bob.ctx.busy.is_set());
    }

    #[tokio::test]
    async fn test_reserved_header_abandons_frame() {
        let (alice, bob) = two_sides(1, None).await;
        for _ in 0..2 {
            let unit = alice.ctx.link.single_encode(true);
            alice.ctx.link.send(&bob.handle.id, unit).await.unwrap();
        }

        let mut incoming = frame_for(&bob);
        let result = incoming.receive(&alice.handle.id).await;

        assert!(matches!(result, Err(FrameError::MalformedHeader(_))));
        assert_eq!(incoming.payload(), None);
        assert!(!bob.ctx.busy.is_set());
    }

    #[tokio::test]
    async fn test_frame_kind_is_set_once() {
        let (alice, bob) = two_sides(1, None).await;
        let mut incoming = frame_for(&bob);
        let source = alice.handle.id.clone();
        let receiving = tokio::spawn(async move { incoming.receive(&source).await });

        let mut outgoing = frame_for(&alice);
        outgoing.send_data_frame(b"a", &bob.handle).await.unwrap();
        receiving.await.unwrap().unwrap();

        let second = outgoing.send_data_frame(b"b", &bob.handle).await;
        assert!(matches!(
            second,
            Err(FrameError::KindAlreadySet(FrameKind::DataSequential))
        ));
    }

    #[tokio::test]
    async fn test_receive_is_cancellable() {
        let (alice, bob) = two_sides(1, None).await;
        let mut incoming = frame_for(&bob);
        let source = alice.handle.id.clone();
        let cancel = bob.ctx.cancel.clone();
        let receiving = tokio::spawn(async move { incoming.receive(&source).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        let result = receiving.await.unwrap();
        assert!(matches!(result, Err(FrameError::Cancelled)));
    }
}
