use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use scrape_common::fetcher::Fetcher;
use scrape_common::types::{ServerIdentity, ServerVariant};
use scrape_protocol::envelope::Payload;
use scrape_protocol::messages::{
    GoingAway, Heartbeat, HubWelcome, InfoRetrieved, SingleReceiverHeader, TaskFulfillmentRequest,
};
use scrape_protocol::QueueChannel;
use tokio::sync::{mpsc, Mutex, RwLock, Semaphore};
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 4;

/// Bounds the number of fulfillment requests executing concurrently. The
/// source spawns an unbounded task per request; this caps it with a
/// semaphore-fed pool per the spec's design notes (REDESIGN FLAGS:
/// "a production-grade implementation should bound this").
const MAX_CONCURRENT_FULFILLMENTS: usize = 32;

/// The worker's event-loop state machine. Tracks the current hub identity,
/// replies to heartbeats, and fulfills scrape tasks under the rate-limited
/// fetcher.
pub struct Receiver {
    self_id: Uuid,
    channel: Arc<QueueChannel>,
    fetcher: Arc<dyn Fetcher>,
    current_hub: RwLock<Option<ServerIdentity>>,
    fulfillment_permits: Arc<Semaphore>,

    hub_welcome_tx: mpsc::Sender<HubWelcome>,
    hub_welcome_rx: Mutex<mpsc::Receiver<HubWelcome>>,
    heartbeat_tx: mpsc::Sender<Heartbeat>,
    heartbeat_rx: Mutex<mpsc::Receiver<Heartbeat>>,
    task_tx: mpsc::Sender<TaskFulfillmentRequest>,
    task_rx: Mutex<mpsc::Receiver<TaskFulfillmentRequest>>,
    new_hub_tx: mpsc::Sender<ServerIdentity>,
    new_hub_rx: Mutex<mpsc::Receiver<ServerIdentity>>,
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: Mutex<mpsc::Receiver<()>>,

    tasks_fulfilled: AtomicU32,
    tasks_failed: AtomicU32,
}

impl Receiver {
    pub fn new(self_id: Uuid, channel: Arc<QueueChannel>, fetcher: Arc<dyn Fetcher>) -> Arc<Self> {
        let (hub_welcome_tx, hub_welcome_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (heartbeat_tx, heartbeat_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (task_tx, task_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (new_hub_tx, new_hub_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        Arc::new(Self {
            self_id,
            channel,
            fetcher,
            current_hub: RwLock::new(None),
            fulfillment_permits: Arc::new(Semaphore::new(MAX_CONCURRENT_FULFILLMENTS)),
            hub_welcome_tx,
            hub_welcome_rx: Mutex::new(hub_welcome_rx),
            heartbeat_tx,
            heartbeat_rx: Mutex::new(heartbeat_rx),
            task_tx,
            task_rx: Mutex::new(task_rx),
            new_hub_tx,
            new_hub_rx: Mutex::new(new_hub_rx),
            shutdown_tx,
            shutdown_rx: Mutex::new(shutdown_rx),
            tasks_fulfilled: AtomicU32::new(0),
            tasks_failed: AtomicU32::new(0),
        })
    }

    /// Install the QueueChannel handlers that forward decoded envelopes
    /// onto this Receiver's bounded internal buffers. Call before
    /// `channel.consume()` starts.
    pub async fn register_handlers(self: &Arc<Self>) {
        let tx = self.hub_welcome_tx.clone();
        self.channel
            .register_handler(
                "hubWelcome",
                Arc::new(move |payload: Payload| {
                    let tx = tx.clone();
                    Box::pin(async move {
                        if let Payload::HubWelcome(hw) = payload {
                            let _ = tx.send(hw).await;
                        }
                    })
                }),
            )
            .await;

        let tx = self.heartbeat_tx.clone();
        self.channel
            .register_handler(
                "heartbeat",
                Arc::new(move |payload: Payload| {
                    let tx = tx.clone();
                    Box::pin(async move {
                        if let Payload::Heartbeat(hb) = payload {
                            let _ = tx.send(hb).await;
                        }
                    })
                }),
            )
            .await;

        let tx = self.task_tx.clone();
        self.channel
            .register_handler(
                "taskFulfillmentRequest",
                Arc::new(move |payload: Payload| {
                    let tx = tx.clone();
                    Box::pin(async move {
                        if let Payload::TaskFulfillmentRequest(tfr) = payload {
                            let _ = tx.send(tfr).await;
                        }
                    })
                }),
            )
            .await;
    }

    pub fn shutdown_handle(self: &Arc<Self>) -> mpsc::Sender<()> {
        self.shutdown_tx.clone()
    }

    pub async fn current_hub(&self) -> Option<ServerIdentity> {
        *self.current_hub.read().await
    }

    /// Announce this worker's availability. Called once at startup, before
    /// the event loop begins draining its channels.
    pub async fn announce(&self, available_for_work: bool) -> Result<(), scrape_common::ScrapeError> {
        use scrape_protocol::messages::{FanoutHeader, StatusUpdate};

        self.channel
            .send(Payload::StatusUpdate(StatusUpdate {
                header: FanoutHeader { sender_id: self.self_id },
                available_for_work,
            }))
            .await
            .map_err(Into::into)
    }

    async fn handle_hub_welcome(&self, hw: HubWelcome) {
        let identity = ServerIdentity::new(ServerVariant::Hub, hw.header.sender_id);
        let _ = self.new_hub_tx.send(identity).await;
    }

    async fn handle_new_hub_identity(&self, identity: ServerIdentity) {
        let mut current = self.current_hub.write().await;
        let switched = *current != Some(identity);
        *current = Some(identity);
        if switched {
            tracing::info!(hub = %identity.id, "switched current hub");
        }
    }

    async fn handle_heartbeat(&self, hb: Heartbeat) {
        if hb.header.receiver_id != self.self_id {
            return;
        }

        let payload = Payload::Heartbeat(Heartbeat {
            header: SingleReceiverHeader::new(self.self_id, hb.header.sender_id),
            response_expected: false,
        });
        if let Err(err) = self.channel.send(payload).await {
            tracing::warn!(error = %err, "failed to publish heartbeat reply");
        }
    }

    async fn handle_task_fulfillment_request(self: &Arc<Self>, tfr: TaskFulfillmentRequest) {
        if tfr.header.receiver_id != self.self_id {
            return;
        }

        let this = Arc::clone(self);
        let permits = Arc::clone(&self.fulfillment_permits);
        tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.expect("semaphore is never closed");
            this.fulfill(tfr).await;
        });
    }

    async fn fulfill(&self, tfr: TaskFulfillmentRequest) {
        let hub = match self.current_hub().await {
            Some(hub) => hub,
            None => {
                tracing::warn!(task_id = %tfr.task_id, "no known hub, dropping fulfillment result");
                return;
            }
        };

        match self.fetcher.fetch(&tfr.product_location).await {
            Ok(product_info) => {
                self.tasks_fulfilled.fetch_add(1, Ordering::Relaxed);
                let payload = Payload::InfoRetrieved(InfoRetrieved {
                    header: SingleReceiverHeader::new(self.self_id, hub.id),
                    task_id: tfr.task_id,
                    product_info,
                });
                if let Err(err) = self.channel.send(payload).await {
                    tracing::error!(task_id = %tfr.task_id, error = %err, "failed to publish info retrieved");
                }
            }
            Err(err) => {
                self.tasks_failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(task_id = %tfr.task_id, error = %err, "upstream fetch failed, task dropped this cycle");
            }
        }
    }

    /// Run the event loop until a shutdown signal arrives. Publishes a
    /// `GoingAway` to the current hub (if any) before returning, and waits
    /// for that publish to complete.
    pub async fn run(self: Arc<Self>) {
        let mut hub_welcome_rx = self.hub_welcome_rx.lock().await;
        let mut heartbeat_rx = self.heartbeat_rx.lock().await;
        let mut task_rx = self.task_rx.lock().await;
        let mut new_hub_rx = self.new_hub_rx.lock().await;
        let mut shutdown_rx = self.shutdown_rx.lock().await;

        loop {
            tokio::select! {
                Some(hw) = hub_welcome_rx.recv() => self.handle_hub_welcome(hw).await,
                Some(identity) = new_hub_rx.recv() => self.handle_new_hub_identity(identity).await,
                Some(hb) = heartbeat_rx.recv() => self.handle_heartbeat(hb).await,
                Some(tfr) = task_rx.recv() => self.handle_task_fulfillment_request(tfr).await,
                _ = shutdown_rx.recv() => {
                    self.going_away().await;
                    return;
                }
            }
        }
    }

    async fn going_away(&self) {
        if let Some(hub) = self.current_hub().await {
            let payload = Payload::GoingAway(GoingAway {
                header: SingleReceiverHeader::new(self.self_id, hub.id),
                reason: GoingAway::REASON_SHUTTING_DOWN.to_string(),
            });
            if let Err(err) = self.channel.send(payload).await {
                tracing::warn!(error = %err, "failed to publish going-away notice");
            }
        }
    }

    #[cfg(test)]
    pub fn fulfilled_count(&self) -> u32 {
        self.tasks_fulfilled.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub fn failed_count(&self) -> u32 {
        self.tasks_failed.load(Ordering::Relaxed)
    }
}
