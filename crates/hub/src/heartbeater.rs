use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use scrape_common::ids::WorkerId;
use scrape_protocol::envelope::Payload;
use scrape_protocol::messages::{Heartbeat, SingleReceiverHeader};
use scrape_protocol::QueueChannel;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Per-peer liveness probe. One instance per worker known to the
/// Supervisor, created on that worker's first `StatusUpdate` and shut down
/// when the worker is evicted or the hub shuts down.
///
/// `missed` counts *outstanding* probes, not failures: it increments every
/// time we send a heartbeat and resets to zero the moment any heartbeat
/// comes back from the peer. Four consecutive unanswered probes evict the
/// peer on the fifth timer tick.
pub struct Heartbeater {
    self_id: Uuid,
    peer: WorkerId,
    interval: Duration,
    missed_beats_allowed: u32,
    missed: AtomicU32,
    channel: Arc<QueueChannel>,
    down_tx: mpsc::Sender<WorkerId>,
    shutdown: Notify,
}

impl Heartbeater {
    pub fn new(
        self_id: Uuid,
        peer: WorkerId,
        interval: Duration,
        missed_beats_allowed: u32,
        channel: Arc<QueueChannel>,
        down_tx: mpsc::Sender<WorkerId>,
    ) -> Arc<Self> {
        Arc::new(Self {
            self_id,
            peer,
            interval,
            missed_beats_allowed,
            missed: AtomicU32::new(0),
            channel,
            down_tx,
            shutdown: Notify::new(),
        })
    }

    /// Arm the timer and start probing. Returns the task handle so the
    /// Supervisor can join it on shutdown if it wants to.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run().await })
    }

    async fn run(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    let missed_before = self.missed.load(Ordering::SeqCst);
                    if missed_before >= self.missed_beats_allowed {
                        tracing::warn!(peer = %self.peer, "missed beat threshold exceeded, evicting");
                        let _ = self.down_tx.send(self.peer).await;
                        return;
                    }

                    // An outstanding unanswered probe from the previous tick
                    // is a missed beat; this tick's probe is a new one sent.
                    if missed_before > 0 {
                        metrics::counter!("hub.heartbeat.missed").increment(1);
                    }

                    let payload = Payload::Heartbeat(Heartbeat {
                        header: SingleReceiverHeader::new(self.self_id, self.peer.0),
                        response_expected: true,
                    });
                    if let Err(err) = self.channel.send(payload).await {
                        tracing::warn!(peer = %self.peer, error = %err, "failed to publish heartbeat");
                    }
                    metrics::counter!("hub.heartbeat.sent").increment(1);
                    self.missed.fetch_add(1, Ordering::SeqCst);
                }
                _ = self.shutdown.notified() => {
                    return;
                }
            }
        }
    }

    /// Called by the Supervisor whenever the peer heartbeats back at us.
    pub fn handle_incoming_beat(&self) {
        self.missed.store(0, Ordering::SeqCst);
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    #[cfg(test)]
    pub fn missed_count(&self) -> u32 {
        self.missed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrape_protocol::memory_transport::InMemoryTransport;

    fn test_heartbeater(interval: Duration) -> (Arc<Heartbeater>, mpsc::Receiver<WorkerId>) {
        let transport = Arc::new(InMemoryTransport::new());
        let channel = Arc::new(QueueChannel::new(transport, "control"));
        let (down_tx, down_rx) = mpsc::channel(4);
        let hb = Heartbeater::new(Uuid::new_v4(), WorkerId::new(), interval, 4, channel, down_tx);
        (hb, down_rx)
    }

    #[tokio::test]
    async fn evicts_after_four_unanswered_probes() {
        let (hb, mut down_rx) = test_heartbeater(Duration::from_millis(20));
        let peer = hb.peer;
        let handle = hb.start();

        let evicted = tokio::time::timeout(Duration::from_millis(500), down_rx.recv())
            .await
            .expect("expected eviction before timeout")
            .expect("channel should not close first");

        assert_eq!(evicted, peer);
        handle.abort();
    }

    #[tokio::test]
    async fn incoming_beat_resets_missed_counter() {
        let (hb, _down_rx) = test_heartbeater(Duration::from_millis(30));
        let handle = hb.start();

        tokio::time::sleep(Duration::from_millis(65)).await;
        assert!(hb.missed_count() >= 1);

        hb.handle_incoming_beat();
        assert_eq!(hb.missed_count(), 0);

        handle.abort();
    }

    #[tokio::test]
    async fn shutdown_stops_further_probing() {
        let (hb, mut down_rx) = test_heartbeater(Duration::from_millis(15));
        let handle = hb.start();
        hb.shutdown();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(down_rx.try_recv().is_err(), "shut-down heartbeater must not evict");
        assert!(handle.is_finished());
    }
}
