//! Traffic scenarios for the qubit bridge channel

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use qubit_bridge_channel::{Channel, ChannelConfig, ChannelError, EprMode};
use qubit_bridge_core::FrameKind;
use rand::Rng;
use serde::Serialize;
use tokio::time::{sleep, Instant};

#[derive(Debug, Default, Clone, Serialize)]
pub struct TrafficReport {
    pub packets: usize,
    pub payload_bytes: usize,
    pub mismatches: usize,
    /// Data frames carried entirely on pre-shared pairs.
    pub superdense_frames: usize,
    /// Data frames that ran out of pairs and finished sequentially.
    pub mixed_frames: usize,
    pub sequential_frames: usize,
    /// EPR frames requested by the scenario itself.
    pub epr_frames: usize,
    pub pairs_consumed: usize,
    pub sequential_qubits: usize,
    pub elapsed: Duration,
    /// Time receivers spent measuring frame bodies.
    pub measurement_time: Duration,
    pub final_buffer_levels: (usize, usize),
    /// `(periods, frames_sent, skipped_busy, skipped_full, retries)`
    pub epr_stats: Option<(u64, u64, u64, u64, u64)>,
}

impl TrafficReport {
    /// Share of payload bits that travelled superdense coded.
    pub fn superdense_share(&self) -> f64 {
        let dense_bits = 2 * self.pairs_consumed;
        let total = dense_bits + self.sequential_qubits;
        if total == 0 {
            return 0.0;
        }
        dense_bits as f64 / total as f64
    }

    pub fn throughput_bps(&self) -> f64 {
        if self.elapsed.is_zero() {
            return 0.0;
        }
        (self.payload_bytes * 8) as f64 / self.elapsed.as_secs_f64()
    }

    /// Throughput with the receivers' measurement time taken out.
    pub fn throughput_without_measurement_bps(&self) -> f64 {
        let transfer = self.elapsed.saturating_sub(self.measurement_time);
        if transfer.is_zero() {
            return 0.0;
        }
        (self.payload_bytes * 8) as f64 / transfer.as_secs_f64()
    }

    pub fn print(&self) {
        println!("  - packets: {} ({} bytes)", self.packets, self.payload_bytes);
        println!("  - mismatched payloads: {}", self.mismatches);
        println!(
            "  - frames: {} superdense, {} mixed, {} sequential, {} EPR",
            self.superdense_frames, self.mixed_frames, self.sequential_frames, self.epr_frames
        );
        println!(
            "  - qubits: {} superdense, {} sequential ({:.1}% of bits superdense)",
            self.pairs_consumed,
            self.sequential_qubits,
            self.superdense_share() * 100.0
        );
        println!(
            "  - time: {:?} (~{:.0} bps), {:?} measuring (~{:.0} bps without)",
            self.elapsed,
            self.throughput_bps(),
            self.measurement_time,
            self.throughput_without_measurement_bps()
        );
        println!(
            "  - buffered pairs at end: {} / {}",
            self.final_buffer_levels.0, self.final_buffer_levels.1
        );
        if let Some((periods, sent, busy, full, retries)) = self.epr_stats {
            println!(
                "  - EPR timer: {} periods, {} frames, {} dropped busy, {} dropped full, {} retries",
                periods, sent, busy, full, retries
            );
        }
    }
}

/// Waits until both nodes hold at least `pairs` halves, or `limit` passes.
pub async fn entanglement_warmup(channel: &Channel, pairs: usize, limit: Duration) -> bool {
    let (a, b) = channel.nodes();
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        let have_a = a.entanglement_buffer().len().await;
        let have_b = b.entanglement_buffer().len().await;
        if have_a >= pairs && have_b >= pairs {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    warn!("entanglement warmup timed out waiting for {} pairs", pairs);
    false
}

/// Sends `packets` random payloads of up to `max_len` bytes, alternating
/// direction, and checks that every one arrives intact.
pub async fn traffic_test(
    config: ChannelConfig,
    packets: usize,
    max_len: usize,
) -> Result<TrafficReport, ChannelError> {
    let manual_epr = config.epr_enabled && config.epr_mode == EprMode::Manual;
    let warmup_pairs = if config.epr_enabled && !manual_epr {
        config.pairs_per_epr_frame()
    } else {
        0
    };
    let channel = Channel::new("alice", "bob", config).await?;
    if warmup_pairs > 0 {
        entanglement_warmup(&channel, warmup_pairs, Duration::from_secs(5)).await;
    }

    let progress = ProgressBar::new(packets as u64);
    progress.set_style(
        ProgressStyle::with_template("  [{bar:40.cyan/blue}] {pos}/{len} packets {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let mut report = TrafficReport::default();
    let start = Instant::now();
    for i in 0..packets {
        let source = if i % 2 == 0 { "alice" } else { "bob" };
        let payload = random_payload(max_len);
        if manual_epr {
            request_pairs(&channel, source, &payload, &mut report).await?;
        }
        let delivery = channel.transmit_packet(payload.clone(), source).await?;

        report.packets += 1;
        report.payload_bytes += payload.len();
        if delivery.payload != payload {
            report.mismatches += 1;
            warn!("packet {} from {} arrived corrupted", i, source);
        }
        let metrics = &delivery.metrics;
        match metrics.kind {
            Some(FrameKind::DataSuperdense) if metrics.sequential_qubits > 0 => report.mixed_frames += 1,
            Some(FrameKind::DataSuperdense) => report.superdense_frames += 1,
            _ => report.sequential_frames += 1,
        }
        report.measurement_time += metrics.measurement_time;
        report.pairs_consumed += delivery.metrics.pairs_consumed;
        report.sequential_qubits += delivery.metrics.sequential_qubits;
        progress.inc(1);
    }
    report.elapsed = start.elapsed();
    progress.finish_with_message("done");

    let (a, b) = channel.nodes();
    report.final_buffer_levels = (
        a.entanglement_buffer().len().await,
        b.entanglement_buffer().len().await,
    );
    report.epr_stats = a.epr_stats().await;
    channel.shutdown().await;

    info!(
        "traffic test finished: {} packets, {} mismatches",
        report.packets, report.mismatches
    );
    Ok(report)
}

/// Requests an EPR frame from `source` when its buffer cannot carry
/// `payload` superdense coded.
async fn request_pairs(
    channel: &Channel,
    source: &str,
    payload: &[u8],
    report: &mut TrafficReport,
) -> Result<(), ChannelError> {
    let Some(node) = channel.node(source) else {
        return Err(ChannelError::UnknownPeer(source.to_string()));
    };
    let needed = (qubit_bridge_core::stuff(payload).len() + 1) * 4;
    if node.entanglement_buffer().len().await >= needed {
        return Ok(());
    }
    match channel.transmit_epr(source).await {
        Ok(_) => {
            report.epr_frames += 1;
            Ok(())
        }
        Err(ChannelError::EprNotSent(outcome)) => {
            debug!("EPR request from {} not served: {:?}", source, outcome);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn random_payload(max_len: usize) -> Vec<u8> {
    let mut rng = rand::rng();
    let len = rng.random_range(1..=max_len.max(1));
    (0..len).map(|_| rng.random()).collect()
}
