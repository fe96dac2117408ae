//! One endpoint of the quantum link.
//!
//! A started node runs a sender loop and a receiver loop, plus the EPR timer
//! when it is the channel's initiator. Application data enters through the
//! inbound queue and decoded frames leave through the outbound queue.
//!
//! Frames are numbered by the node that sends them. The receiver counts the
//! frames it reads from its peer the same way, so a [`Delivery`] carries the
//! sender's [`FrameId`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use log::{debug, error, info, warn};
use qubit_bridge_core::{FrameId, FrameKind, PeerId};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::buffer::EntanglementBuffer;
use crate::busy::BusyFlag;
use crate::frame::{EprOutcome, Frame, FrameContext, FrameMetrics, PeerHandle};
use crate::link::QuantumLink;
use crate::scheduler::{EprRequest, EprScheduler};
use crate::{ChannelConfig, ChannelError, EprMode, FrameError};

/// A decoded frame handed to the application. EPR frames are only delivered
/// in [`EprMode::Manual`] and carry an empty payload.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub payload: Vec<u8>,
    pub metrics: FrameMetrics,
}

/// Work for the sender loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transmission {
    Data(Vec<u8>),
    /// One EPR frame on request, waiting for the link like a data frame.
    Epr,
}

/// Id of the frame a queued transmission put on the link, or why an EPR
/// frame was not started.
pub type Dispatch = Result<FrameId, EprOutcome>;

struct Queued {
    transmission: Transmission,
    dispatched: Option<oneshot::Sender<Dispatch>>,
}

pub struct Node {
    id: PeerId,
    link: Arc<dyn QuantumLink>,
    config: ChannelConfig,
    is_epr_initiator: bool,
    buffer: Arc<EntanglementBuffer>,
    busy: Arc<BusyFlag>,
    peer: OnceLock<PeerHandle>,
    /// Frames this node has put on the link; only the sender loop advances it.
    sent_frames: AtomicU64,
    inbound_tx: mpsc::Sender<Queued>,
    inbound_rx: Mutex<Option<mpsc::Receiver<Queued>>>,
    outbound_tx: Mutex<Option<mpsc::Sender<Delivery>>>,
    outbound_rx: Mutex<mpsc::Receiver<Delivery>>,
    scheduler: OnceLock<Arc<EprScheduler>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    pub fn new(link: Arc<dyn QuantumLink>, config: ChannelConfig, is_epr_initiator: bool) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(config.queue_size);
        let (outbound_tx, outbound_rx) = mpsc::channel(config.queue_size);
        Self {
            id: link.local_id().clone(),
            link,
            buffer: Arc::new(EntanglementBuffer::new(config.buffer_capacity)),
            config,
            is_epr_initiator,
            busy: Arc::new(BusyFlag::new()),
            peer: OnceLock::new(),
            sent_frames: AtomicU64::new(0),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            outbound_tx: Mutex::new(Some(outbound_tx)),
            outbound_rx: Mutex::new(outbound_rx),
            scheduler: OnceLock::new(),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn is_epr_initiator(&self) -> bool {
        self.is_epr_initiator
    }

    pub fn entanglement_buffer(&self) -> &Arc<EntanglementBuffer> {
        &self.buffer
    }

    pub fn busy(&self) -> &Arc<BusyFlag> {
        &self.busy
    }

    pub fn peer(&self) -> Option<&PeerId> {
        self.peer.get().map(|peer| &peer.id)
    }

    pub fn handle(&self) -> PeerHandle {
        PeerHandle {
            id: self.id.clone(),
            busy: Arc::clone(&self.busy),
        }
    }

    /// `(periods, frames_sent, skipped_busy, skipped_full, retries)` of the
    /// EPR timer, `None` on the non-initiator.
    pub async fn epr_stats(&self) -> Option<(u64, u64, u64, u64, u64)> {
        match self.scheduler.get() {
            Some(scheduler) => Some(scheduler.get_stats().await),
            None => None,
        }
    }

    /// Makes `self` and `other` each other's only peer.
    pub fn connect(&self, other: &Node) -> Result<(), ChannelError> {
        if self.id == other.id {
            return Err(ChannelError::InvalidConfig(format!(
                "node {} cannot peer with itself",
                self.id
            )));
        }
        if self.peer.get().is_some() || other.peer.get().is_some() {
            return Err(ChannelError::InvalidConfig(format!(
                "{} or {} is already connected",
                self.id, other.id
            )));
        }
        let _ = self.peer.set(other.handle());
        let _ = other.peer.set(self.handle());
        Ok(())
    }

    /// Spawns the node's loops. Can only be called once, after `connect`.
    pub async fn start(self: &Arc<Self>) -> Result<(), ChannelError> {
        let peer = self.peer.get().cloned().ok_or_else(|| {
            ChannelError::InvalidConfig(format!("node {} started without a peer", self.id))
        })?;
        let inbound = self.inbound_rx.lock().await.take();
        let outbound = self.outbound_tx.lock().await.take();
        let (Some(inbound), Some(outbound)) = (inbound, outbound) else {
            return Err(ChannelError::InvalidConfig(format!(
                "node {} already started",
                self.id
            )));
        };

        let mut tasks = self.tasks.lock().await;
        let periodic = self.config.epr_enabled && self.config.epr_mode == EprMode::Periodic;
        let epr_requests = if self.is_epr_initiator && periodic {
            let (tx, rx) = mpsc::channel(1);
            let scheduler = Arc::new(EprScheduler::new(
                self.id.clone(),
                &self.config,
                tx,
                self.cancel.clone(),
            ));
            let _ = self.scheduler.set(Arc::clone(&scheduler));
            tasks.push(tokio::spawn(async move { scheduler.run().await }));
            Some(rx)
        } else {
            None
        };

        let node = Arc::clone(self);
        let receiver_peer = peer.clone();
        tasks.push(tokio::spawn(async move {
            node.receiver_loop(receiver_peer, outbound).await
        }));
        let node = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            node.sender_loop(peer, inbound, epr_requests).await
        }));

        info!("{} protocols initiated", self.id);
        Ok(())
    }

    /// Signals every loop to stop and waits for them to return.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                error!("{}: task ended abnormally: {}", self.id, e);
            }
        }
        debug!("{} stopped", self.id);
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn add_to_in_queue(&self, data: Vec<u8>) -> Result<(), ChannelError> {
        self.enqueue(Queued {
            transmission: Transmission::Data(data),
            dispatched: None,
        })
        .await
    }

    /// Queues `transmission` and returns a receiver for the id of the frame
    /// that carries it. Dropping the receiver before the frame starts
    /// withdraws the transmission.
    pub async fn queue_transmission(
        &self,
        transmission: Transmission,
    ) -> Result<oneshot::Receiver<Dispatch>, ChannelError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(Queued {
            transmission,
            dispatched: Some(tx),
        })
        .await?;
        Ok(rx)
    }

    async fn enqueue(&self, queued: Queued) -> Result<(), ChannelError> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(ChannelError::Stopped(self.id.clone())),
            sent = self.inbound_tx.send(queued) => {
                sent.map_err(|_| ChannelError::Stopped(self.id.clone()))
            }
        }
    }

    /// Waits for the next decoded frame.
    pub async fn get_from_out_queue(&self) -> Result<Delivery, ChannelError> {
        let mut outbound = self.outbound_rx.lock().await;
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(ChannelError::Stopped(self.id.clone())),
            delivery = outbound.recv() => {
                delivery.ok_or_else(|| ChannelError::Stopped(self.id.clone()))
            }
        }
    }

    fn outgoing_frame(&self) -> Frame {
        let seq = self.sent_frames.load(Ordering::Relaxed);
        Frame::new(self.frame_context(), FrameId::new(self.id.clone(), seq))
    }

    /// Advances the outgoing sequence once `frame` has started on the link.
    fn account_sent(&self, frame: &Frame) {
        if frame.kind().is_some() {
            self.sent_frames.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn frame_context(&self) -> FrameContext {
        FrameContext {
            link: Arc::clone(&self.link),
            buffer: Arc::clone(&self.buffer),
            busy: Arc::clone(&self.busy),
            cancel: self.cancel.clone(),
            mtu: self.config.mtu,
            busy_backoff: self.config.busy_backoff,
        }
    }

    async fn sender_loop(
        self: Arc<Self>,
        peer: PeerHandle,
        mut inbound: mpsc::Receiver<Queued>,
        mut epr_requests: Option<mpsc::Receiver<EprRequest>>,
    ) {
        info!("{} sender protocol started", self.id);
        loop {
            let result = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                Some(queued) = inbound.recv() => self.dispatch(queued, &peer).await,
                Some(reply) = next_epr_request(&mut epr_requests) => {
                    self.transmit_epr_frame(&peer).await.map(|outcome| {
                        // the timer may already be gone
                        let _ = reply.send(outcome);
                    })
                }
            };
            match result {
                Ok(()) => {}
                Err(FrameError::Cancelled) => break,
                Err(e) => {
                    error!("{}: sender protocol stopped: {}", self.id, e);
                    break;
                }
            }
        }
        debug!("{} sender protocol finished", self.id);
    }

    async fn dispatch(&self, queued: Queued, peer: &PeerHandle) -> Result<(), FrameError> {
        let Queued {
            transmission,
            dispatched,
        } = queued;
        if dispatched.as_ref().is_some_and(|tx| tx.is_closed()) {
            debug!("{}: queued transmission withdrawn before it started", self.id);
            return Ok(());
        }
        let outcome = match transmission {
            Transmission::Data(data) => self.transmit_data_frame(data, peer).await.map(Ok)?,
            Transmission::Epr => self.transmit_requested_epr_frame(peer).await?,
        };
        if let Some(tx) = dispatched {
            let _ = tx.send(outcome);
        }
        Ok(())
    }

    async fn receiver_loop(self: Arc<Self>, peer: PeerHandle, outbound: mpsc::Sender<Delivery>) {
        info!("{} receiver protocol started", self.id);
        let mut received_frames = 0u64;
        loop {
            let mut frame = Frame::new(
                self.frame_context(),
                FrameId::new(peer.id.clone(), received_frames),
            );
            let result = frame.receive(&peer.id).await;
            received_frames += 1;
            match result {
                Ok(()) => {}
                Err(FrameError::Cancelled) => break,
                Err(e @ (FrameError::MalformedHeader(_) | FrameError::Stuffing(_))) => {
                    warn!("{}: dropped frame {} from {}: {}", self.id, frame.id(), peer.id, e);
                    continue;
                }
                Err(e) => {
                    error!("{}: receiver protocol stopped: {}", self.id, e);
                    break;
                }
            }

            let (payload, metrics) = frame.into_parts();
            let delivery = match (metrics.kind, payload) {
                (Some(FrameKind::Epr), _) => {
                    info!(
                        "{}: {} available local pairs",
                        self.id,
                        self.buffer.len().await
                    );
                    if self.config.epr_mode != EprMode::Manual {
                        continue;
                    }
                    Delivery {
                        payload: Vec::new(),
                        metrics,
                    }
                }
                (Some(kind), Some(payload)) => {
                    info!(
                        "{}: {} frame {} received, {} bytes",
                        self.id,
                        kind,
                        metrics.frame_id,
                        payload.len()
                    );
                    Delivery { payload, metrics }
                }
                (kind, _) => {
                    warn!("{}: frame {:?} finished without payload", self.id, kind);
                    continue;
                }
            };
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                sent = outbound.send(delivery) => {
                    if sent.is_err() {
                        warn!("{}: outbound queue closed", self.id);
                        break;
                    }
                }
            }
        }
        debug!("{} receiver protocol finished", self.id);
    }

    async fn transmit_data_frame(&self, data: Vec<u8>, peer: &PeerHandle) -> Result<FrameId, FrameError> {
        let mut frame = self.outgoing_frame();
        let sent = frame.send_data_frame(&data, peer).await;
        self.account_sent(&frame);
        sent?;
        debug!(
            "{}: transmitted data frame {} ({:?})",
            self.id,
            frame.id(),
            frame.kind()
        );
        Ok(frame.id().clone())
    }

    async fn transmit_epr_frame(&self, peer: &PeerHandle) -> Result<EprOutcome, FrameError> {
        let mut frame = self.outgoing_frame();
        let outcome = frame.send_epr_frame(peer).await;
        self.account_sent(&frame);
        let outcome = outcome?;
        if let EprOutcome::Sent { .. } = outcome {
            info!(
                "{}: EPR frame {} transmitted, {} local pairs",
                self.id,
                frame.id(),
                self.buffer.len().await
            );
        }
        Ok(outcome)
    }

    async fn transmit_requested_epr_frame(&self, peer: &PeerHandle) -> Result<Dispatch, FrameError> {
        let mut frame = self.outgoing_frame();
        let outcome = frame.send_epr_frame_when_idle(peer).await;
        self.account_sent(&frame);
        match outcome? {
            EprOutcome::Sent { pairs } => {
                info!(
                    "{}: requested EPR frame {} transmitted, {} pairs",
                    self.id,
                    frame.id(),
                    pairs
                );
                Ok(Ok(frame.id().clone()))
            }
            skipped => {
                warn!("{}: requested EPR frame not sent: {:?}", self.id, skipped);
                Ok(Err(skipped))
            }
        }
    }
}

async fn next_epr_request(requests: &mut Option<mpsc::Receiver<EprRequest>>) -> Option<EprRequest> {
    match requests {
        Some(requests) => requests.recv().await,
        None => std::future::pending().await,
    }
}
