//! Periodic EPR frame trigger, run only by the initiator node

use std::sync::Arc;

use log::{debug, info, warn};
use qubit_bridge_core::PeerId;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{interval_at, sleep, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::frame::EprOutcome;
use crate::{ChannelConfig, EprBusyPolicy};

/// Asks the sender loop for one EPR frame and carries back its outcome.
pub(crate) type EprRequest = oneshot::Sender<EprOutcome>;

pub struct EprScheduler {
    node_id: PeerId,
    period: Duration,
    initial_delay: Duration,
    policy: EprBusyPolicy,
    requests: mpsc::Sender<EprRequest>,
    cancel: CancellationToken,
    stats: Arc<Mutex<SchedulerStats>>,
}

#[derive(Debug, Default)]
struct SchedulerStats {
    periods: u64,
    frames_sent: u64,
    skipped_busy: u64,
    skipped_full: u64,
    retries: u64,
}

impl EprScheduler {
    pub(crate) fn new(
        node_id: PeerId,
        config: &ChannelConfig,
        requests: mpsc::Sender<EprRequest>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            node_id,
            period: config.epr_period,
            initial_delay: config.epr_initial_delay,
            policy: config.epr_busy_policy,
            requests,
            cancel,
            stats: Arc::new(Mutex::new(SchedulerStats::default())),
        }
    }

    /// Fires once per period until cancelled. The next period is only armed
    /// after the sender loop has reported back on the current one.
    pub async fn run(&self) {
        let mut ticker = interval_at(Instant::now() + self.initial_delay, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("{}: EPR timer armed, period {:?}", self.node_id, self.period);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            debug!("{}: initiating EPR transmission", self.node_id);
            self.stats.lock().await.periods += 1;
            if !self.run_period().await {
                break;
            }
        }
        debug!("{}: EPR timer stopped", self.node_id);
    }

    /// Returns `false` once the sender loop is gone.
    async fn run_period(&self) -> bool {
        let mut attempt = 0;
        loop {
            let Some(outcome) = self.trigger().await else {
                return false;
            };
            let mut stats = self.stats.lock().await;
            match outcome {
                EprOutcome::Sent { pairs } => {
                    stats.frames_sent += 1;
                    debug!("{}: EPR frame of {} pairs sent", self.node_id, pairs);
                    return true;
                }
                EprOutcome::BufferFull { buffered } => {
                    stats.skipped_full += 1;
                    info!(
                        "{}: EPR frame skipped, {} halves already buffered",
                        self.node_id, buffered
                    );
                    return true;
                }
                EprOutcome::Busy(holder) => match self.policy {
                    EprBusyPolicy::Retry { attempts, backoff } if attempt < attempts => {
                        attempt += 1;
                        stats.retries += 1;
                        drop(stats);
                        debug!(
                            "{}: {:?} node busy, EPR retry {}/{} in {:?}",
                            self.node_id, holder, attempt, attempts, backoff
                        );
                        tokio::select! {
                            biased;
                            () = self.cancel.cancelled() => return false,
                            () = sleep(backoff) => {}
                        }
                    }
                    _ => {
                        stats.skipped_busy += 1;
                        warn!(
                            "{}: EPR frame dropped for this period, {:?} node busy",
                            self.node_id, holder
                        );
                        return true;
                    }
                },
            }
        }
    }

    async fn trigger(&self) -> Option<EprOutcome> {
        let (reply, outcome) = oneshot::channel();
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => return None,
            sent = self.requests.send(reply) => sent.ok()?,
        }
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            outcome = outcome => outcome.ok(),
        }
    }

    /// `(periods, frames_sent, skipped_busy, skipped_full, retries)`
    pub async fn get_stats(&self) -> (u64, u64, u64, u64, u64) {
        let stats = self.stats.lock().await;
        (
            stats.periods,
            stats.frames_sent,
            stats.skipped_busy,
            stats.skipped_full,
            stats.retries,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::busy::BusyHolder;

    fn scheduler(policy: EprBusyPolicy) -> (Arc<EprScheduler>, mpsc::Receiver<EprRequest>) {
        let config = ChannelConfig {
            epr_period: Duration::from_millis(20),
            epr_initial_delay: Duration::ZERO,
            epr_busy_policy: policy,
            ..Default::default()
        };
        let (tx, rx) = mpsc::channel(1);
        let scheduler = EprScheduler::new(
            PeerId::from("alice"),
            &config,
            tx,
            CancellationToken::new(),
        );
        (Arc::new(scheduler), rx)
    }

    #[tokio::test]
    async fn test_retry_policy_retries_busy_frames() {
        let (scheduler, mut requests) = scheduler(EprBusyPolicy::Retry {
            attempts: 2,
            backoff: Duration::from_millis(1),
        });
        let runner = Arc::clone(&scheduler);
        let handle = tokio::spawn(async move { runner.run().await });

        let first = requests.recv().await.unwrap();
        first.send(EprOutcome::Busy(BusyHolder::Peer)).unwrap();
        let second = requests.recv().await.unwrap();
        second.send(EprOutcome::Sent { pairs: 8 }).unwrap();
        let _third = requests.recv().await.unwrap();

        scheduler.cancel.cancel();
        handle.await.unwrap();

        let (periods, sent, busy, full, retries) = scheduler.get_stats().await;
        assert_eq!(periods, 2);
        assert_eq!(sent, 1);
        assert_eq!(busy, 0);
        assert_eq!(full, 0);
        assert_eq!(retries, 1);
    }

    #[tokio::test]
    async fn test_skip_policy_waits_for_next_period() {
        let (scheduler, mut requests) = scheduler(EprBusyPolicy::Skip);
        let runner = Arc::clone(&scheduler);
        let handle = tokio::spawn(async move { runner.run().await });

        let first = requests.recv().await.unwrap();
        first.send(EprOutcome::Busy(BusyHolder::Local)).unwrap();
        let second = requests.recv().await.unwrap();
        second.send(EprOutcome::BufferFull { buffered: 64 }).unwrap();
        let _third = requests.recv().await.unwrap();

        scheduler.cancel.cancel();
        handle.await.unwrap();

        let (periods, sent, busy, full, retries) = scheduler.get_stats().await;
        assert_eq!(periods, 3);
        assert_eq!(sent, 0);
        assert_eq!(busy, 1);
        assert_eq!(full, 1);
        assert_eq!(retries, 0);
    }
}
