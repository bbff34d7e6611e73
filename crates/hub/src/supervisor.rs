use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use scrape_common::config::HeartbeatConfig;
use scrape_common::ids::{ProductLocationId, TaskId, WorkerId};
use scrape_common::repository::Repository;
use scrape_common::types::{ScrapeTask, WorkerStatus};
use scrape_protocol::envelope::Payload;
use scrape_protocol::messages::{
    GoingAway, Heartbeat, HubWelcome, InfoRetrieved, SingleReceiverHeader, StatusUpdate,
    TaskFulfillmentRequest,
};
use scrape_protocol::QueueChannel;
use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;

use crate::heartbeater::Heartbeater;
use crate::round_robin::RoundRobin;
use crate::task_manager::TaskManager;

const CHANNEL_CAPACITY: usize = 4;

struct WorkerEntry {
    status: WorkerStatus,
    heartbeater: Arc<Heartbeater>,
}

/// The hub's single-threaded event-loop state machine. Owns the worker
/// registry, drives per-worker heartbeating, and dispatches due tasks via
/// round robin.
pub struct Supervisor {
    self_id: Uuid,
    channel: Arc<QueueChannel>,
    repository: Arc<dyn Repository>,
    task_manager: Arc<TaskManager>,
    heartbeat_config: HeartbeatConfig,
    registry: RwLock<HashMap<WorkerId, WorkerEntry>>,
    round_robin: Mutex<RoundRobin>,

    status_tx: mpsc::Sender<StatusUpdate>,
    status_rx: Mutex<mpsc::Receiver<StatusUpdate>>,
    heartbeat_tx: mpsc::Sender<Heartbeat>,
    heartbeat_rx: Mutex<mpsc::Receiver<Heartbeat>>,
    going_away_tx: mpsc::Sender<GoingAway>,
    going_away_rx: Mutex<mpsc::Receiver<GoingAway>>,
    info_retrieved_tx: mpsc::Sender<InfoRetrieved>,
    info_retrieved_rx: Mutex<mpsc::Receiver<InfoRetrieved>>,
    server_down_tx: mpsc::Sender<WorkerId>,
    server_down_rx: Mutex<mpsc::Receiver<WorkerId>>,
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: Mutex<mpsc::Receiver<()>>,
}

impl Supervisor {
    pub fn new(
        self_id: Uuid,
        channel: Arc<QueueChannel>,
        repository: Arc<dyn Repository>,
        task_manager: Arc<TaskManager>,
        heartbeat_config: HeartbeatConfig,
    ) -> Arc<Self> {
        let (status_tx, status_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (heartbeat_tx, heartbeat_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (going_away_tx, going_away_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (info_retrieved_tx, info_retrieved_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (server_down_tx, server_down_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        Arc::new(Self {
            self_id,
            channel,
            repository,
            task_manager,
            heartbeat_config,
            registry: RwLock::new(HashMap::new()),
            round_robin: Mutex::new(RoundRobin::new()),
            status_tx,
            status_rx: Mutex::new(status_rx),
            heartbeat_tx,
            heartbeat_rx: Mutex::new(heartbeat_rx),
            going_away_tx,
            going_away_rx: Mutex::new(going_away_rx),
            info_retrieved_tx,
            info_retrieved_rx: Mutex::new(info_retrieved_rx),
            server_down_tx,
            server_down_rx: Mutex::new(server_down_rx),
            shutdown_tx,
            shutdown_rx: Mutex::new(shutdown_rx),
        })
    }

    /// Install the QueueChannel handlers that forward decoded envelopes
    /// onto this Supervisor's bounded internal buffers. Call before
    /// `channel.consume()` starts.
    pub async fn register_handlers(self: &Arc<Self>) {
        let tx = self.status_tx.clone();
        self.channel
            .register_handler(
                "statusUpdate",
                Arc::new(move |payload: Payload| {
                    let tx = tx.clone();
                    Box::pin(async move {
                        if let Payload::StatusUpdate(su) = payload {
                            let _ = tx.send(su).await;
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

        let tx = self.going_away_tx.clone();
        self.channel
            .register_handler(
                "goingAway",
                Arc::new(move |payload: Payload| {
                    let tx = tx.clone();
                    Box::pin(async move {
                        if let Payload::GoingAway(ga) = payload {
                            let _ = tx.send(ga).await;
                        }
                    })
                }),
            )
            .await;

        let tx = self.info_retrieved_tx.clone();
        self.channel
            .register_handler(
                "infoRetrieved",
                Arc::new(move |payload: Payload| {
                    let tx = tx.clone();
                    Box::pin(async move {
                        if let Payload::InfoRetrieved(ir) = payload {
                            let _ = tx.send(ir).await;
                        }
                    })
                }),
            )
            .await;
    }

    pub fn shutdown_handle(self: &Arc<Self>) -> mpsc::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// The callback TaskManager invokes on its own polling task for every
    /// due task. Resolves a worker via round robin and the task's
    /// ProductLocation via the repository, then publishes a
    /// TaskFulfillmentRequest. A task with no live workers is dropped —
    /// it stays unresolved and will be re-fetched on the next
    /// `TaskManager::initialize`.
    pub async fn dispatch_task(self: &Arc<Self>, task: ScrapeTask) {
        let worker_ids: Vec<WorkerId> = {
            let registry = self.registry.read().await;
            registry.keys().copied().collect()
        };

        if worker_ids.is_empty() {
            tracing::debug!(task_id = %task.id, "no live workers, dropping task this cycle");
            return;
        }

        let idx = self.round_robin.lock().await.next(worker_ids.len());
        let chosen = worker_ids[idx];

        let location = match self
            .repository
            .find_product_location(task.product_location_id)
            .await
        {
            Ok(Some(location)) => location,
            Ok(None) => {
                tracing::error!(
                    task_id = %task.id,
                    location_id = %task.product_location_id,
                    "product location not found, dropping task"
                );
                return;
            }
            Err(err) => {
                tracing::error!(task_id = %task.id, error = %err, "failed to resolve product location");
                return;
            }
        };

        let payload = Payload::TaskFulfillmentRequest(TaskFulfillmentRequest {
            header: SingleReceiverHeader::new(self.self_id, chosen.0),
            task_id: task.id.0,
            product_location: location,
        });

        if let Err(err) = self.channel.send(payload).await {
            tracing::error!(task_id = %task.id, error = %err, "failed to publish task fulfillment request");
            return;
        }
        metrics::counter!("hub.task.dispatched").increment(1);
    }

    async fn handle_status_update(self: &Arc<Self>, su: StatusUpdate) {
        let worker = WorkerId::from_uuid(su.header.sender_id);
        let new_status = WorkerStatus::new(su.available_for_work);

        let is_new = {
            let mut registry = self.registry.write().await;
            match registry.get_mut(&worker) {
                Some(entry) => {
                    if entry.status != new_status {
                        tracing::info!(worker = %worker, available = su.available_for_work, "worker status changed");
                    }
                    entry.status = new_status;
                    false
                }
                None => {
                    let down_tx = self.server_down_tx.clone();
                    let heartbeater = Heartbeater::new(
                        self.self_id,
                        worker,
                        self.heartbeat_config.interval,
                        self.heartbeat_config.missed_beats_allowed,
                        Arc::clone(&self.channel),
                        down_tx,
                    );
                    heartbeater.start();
                    registry.insert(worker, WorkerEntry { status: new_status, heartbeater });
                    true
                }
            }
        };

        if is_new {
            tracing::info!(worker = %worker, "registered new worker");
        }

        let payload = Payload::HubWelcome(HubWelcome {
            header: SingleReceiverHeader::new(self.self_id, su.header.sender_id),
        });
        if let Err(err) = self.channel.send(payload).await {
            tracing::error!(worker = %worker, error = %err, "failed to publish hub welcome");
        }
    }

    async fn handle_heartbeat(&self, hb: Heartbeat) {
        if hb.header.sender_id == self.self_id || hb.header.receiver_id != self.self_id {
            return;
        }

        let worker = WorkerId::from_uuid(hb.header.sender_id);
        let registry = self.registry.read().await;
        match registry.get(&worker) {
            Some(entry) => entry.heartbeater.handle_incoming_beat(),
            None => tracing::error!(worker = %worker, "heartbeat from unknown worker, no Heartbeater to notify"),
        }
    }

    async fn handle_going_away(&self, ga: GoingAway) {
        if ga.header.sender_id == self.self_id || ga.header.receiver_id != self.self_id {
            return;
        }

        let _ = self
            .server_down_tx
            .send(WorkerId::from_uuid(ga.header.sender_id))
            .await;
    }

    async fn handle_info_retrieved(&self, ir: InfoRetrieved) {
        if ir.header.sender_id == self.self_id || ir.header.receiver_id != self.self_id {
            return;
        }

        if let Err(err) = self.repository.insert_product_info(ir.product_info).await {
            tracing::error!(task_id = %ir.task_id, error = %err, "failed to persist product info, task remains unresolved");
            return;
        }

        let task_id = TaskId::from_uuid(ir.task_id);
        match self.repository.find_scrape_task(task_id).await {
            Ok(Some(mut task)) => {
                task.completed = true;
                if let Err(err) = self.repository.update_scrape_task(task.clone()).await {
                    tracing::error!(task_id = %task_id, error = %err, "failed to mark task completed");
                }

                self.task_manager.resolve(task_id).await;
                metrics::counter!("hub.task.resolved").increment(1);

                if let Some(next) = task.next_repetition(Utc::now()) {
                    if let Err(err) = self.repository.insert_scrape_task(next.clone()).await {
                        tracing::error!(task_id = %next.id, error = %err, "failed to persist repeated task");
                        return;
                    }
                    self.task_manager.push_task(next).await;
                }
            }
            Ok(None) => tracing::error!(task_id = %task_id, "resolved task not found in repository"),
            Err(err) => tracing::error!(task_id = %task_id, error = %err, "failed to look up resolved task"),
        }
    }

    async fn handle_server_down(&self, peer: WorkerId) {
        let mut registry = self.registry.write().await;
        if let Some(entry) = registry.remove(&peer) {
            entry.heartbeater.shutdown();
            metrics::counter!("hub.worker.evicted").increment(1);
            tracing::info!(worker = %peer, "evicted worker");
        }
    }

    /// Run the event loop until a shutdown signal arrives. Shuts down
    /// every known Heartbeater before returning.
    pub async fn run(self: Arc<Self>) {
        let mut status_rx = self.status_rx.lock().await;
        let mut heartbeat_rx = self.heartbeat_rx.lock().await;
        let mut going_away_rx = self.going_away_rx.lock().await;
        let mut info_retrieved_rx = self.info_retrieved_rx.lock().await;
        let mut server_down_rx = self.server_down_rx.lock().await;
        let mut shutdown_rx = self.shutdown_rx.lock().await;

        loop {
            tokio::select! {
                Some(su) = status_rx.recv() => self.handle_status_update(su).await,
                Some(hb) = heartbeat_rx.recv() => self.handle_heartbeat(hb).await,
                Some(ga) = going_away_rx.recv() => self.handle_going_away(ga).await,
                Some(ir) = info_retrieved_rx.recv() => self.handle_info_retrieved(ir).await,
                Some(peer) = server_down_rx.recv() => self.handle_server_down(peer).await,
                _ = shutdown_rx.recv() => {
                    let registry = self.registry.read().await;
                    for entry in registry.values() {
                        entry.heartbeater.shutdown();
                    }
                    return;
                }
            }
        }
    }

    pub async fn known_workers(&self) -> Vec<WorkerId> {
        self.registry.read().await.keys().copied().collect()
    }
}
