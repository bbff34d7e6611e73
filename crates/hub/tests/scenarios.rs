use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use scrape_common::config::{HeartbeatConfig, TaskManagerConfig};
use scrape_common::fetcher::{FetchError, Fetcher};
use scrape_common::ids::{ProductId, ProductLocationId};
use scrape_common::repository::{InMemoryRepository, Repository};
use scrape_common::types::{ProductInfo, ProductLocation, ScrapeTask};
use scrape_hub::{Supervisor, TaskManager};
use scrape_protocol::memory_transport::InMemoryTransport;
use scrape_protocol::QueueChannel;
use scrape_worker::Receiver;
use uuid::Uuid;

/// Fixed-result [`Fetcher`] stub standing in for the upstream site in every
/// scenario below.
struct StubFetcher {
    calls: AtomicU32,
    price: f64,
    availability_status: &'static str,
}

impl StubFetcher {
    fn new(price: f64, availability_status: &'static str) -> Self {
        Self {
            calls: AtomicU32::new(0),
            price,
            availability_status,
        }
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, location: &ProductLocation) -> Result<ProductInfo, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ProductInfo::observed(
            location.product_id,
            location.id,
            self.price,
            self.availability_status,
            self.availability_status == "IN_STOCK",
        ))
    }
}

fn test_location() -> ProductLocation {
    ProductLocation {
        id: ProductLocationId::new(),
        product_id: ProductId::new(),
        location_id: "loc-1".to_string(),
        local_id: "l1".to_string(),
        url: "https://example.com/p1".to_string(),
        slug: "s".to_string(),
        category: "Widgets".to_string(),
        category_id: "cat-1".to_string(),
    }
}

struct HubHarness {
    supervisor: Arc<Supervisor>,
    repository: Arc<InMemoryRepository>,
    task_manager: Arc<TaskManager>,
}

async fn spin_up_hub(
    transport: Arc<InMemoryTransport>,
    heartbeat: HeartbeatConfig,
) -> (HubHarness, Uuid) {
    let hub_id = Uuid::new_v4();
    let channel = Arc::new(QueueChannel::new(transport, "control"));
    let repository = Arc::new(InMemoryRepository::new());
    let task_manager = Arc::new(TaskManager::new(
        repository.clone() as Arc<dyn Repository>,
        TaskManagerConfig::default(),
    ));
    task_manager.initialize().await.unwrap();

    let supervisor = Supervisor::new(
        hub_id,
        Arc::clone(&channel),
        repository.clone() as Arc<dyn Repository>,
        Arc::clone(&task_manager),
        heartbeat,
    );
    supervisor.register_handlers().await;

    tokio::spawn(Arc::clone(&channel).consume());

    {
        let supervisor = Arc::clone(&supervisor);
        let task_manager = Arc::clone(&task_manager);
        tokio::spawn(async move {
            task_manager
                .start(move |task| {
                    let supervisor = Arc::clone(&supervisor);
                    async move { supervisor.dispatch_task(task).await }
                })
                .await;
        });
    }

    tokio::spawn(Arc::clone(&supervisor).run());

    (
        HubHarness {
            supervisor,
            repository,
            task_manager,
        },
        hub_id,
    )
}

async fn spin_up_worker(
    transport: Arc<InMemoryTransport>,
    fetcher: Arc<dyn Fetcher>,
) -> (Arc<Receiver>, Uuid) {
    let worker_id = Uuid::new_v4();
    let channel = Arc::new(QueueChannel::new(transport, "control"));
    let receiver = Receiver::new(worker_id, Arc::clone(&channel), fetcher);
    receiver.register_handlers().await;

    tokio::spawn(Arc::clone(&channel).consume());
    tokio::spawn(Arc::clone(&receiver).run());

    receiver.announce(true).await.unwrap();

    (receiver, worker_id)
}

#[tokio::test]
async fn s1_welcome_handshake() {
    let transport = Arc::new(InMemoryTransport::new());
    let heartbeat = HeartbeatConfig {
        interval: Duration::from_millis(200),
        missed_beats_allowed: 4,
    };
    let (hub, hub_id) = spin_up_hub(Arc::clone(&transport), heartbeat).await;
    let fetcher: Arc<dyn Fetcher> = Arc::new(StubFetcher::new(9.99, "IN_STOCK"));
    let (worker, worker_id) = spin_up_worker(Arc::clone(&transport), fetcher).await;

    tokio::time::sleep(Duration::from_millis(100)).await;

    let known = hub.supervisor.known_workers().await;
    assert!(known.iter().any(|w| w.0 == worker_id));

    let current_hub = worker.current_hub().await.expect("worker should know its hub");
    assert_eq!(current_hub.id, hub_id);
}

#[tokio::test]
async fn s2_liveness_and_eviction() {
    let transport = Arc::new(InMemoryTransport::new());
    let heartbeat = HeartbeatConfig {
        interval: Duration::from_millis(30),
        missed_beats_allowed: 4,
    };
    let (hub, _hub_id) = spin_up_hub(Arc::clone(&transport), heartbeat).await;

    // A worker that announces itself but never replies to heartbeats —
    // don't spin up a Receiver, just publish the StatusUpdate directly.
    let channel = Arc::new(QueueChannel::new(Arc::clone(&transport), "control"));
    let worker_id = Uuid::new_v4();
    channel
        .send(scrape_protocol::envelope::Payload::StatusUpdate(
            scrape_protocol::messages::StatusUpdate {
                header: scrape_protocol::messages::FanoutHeader { sender_id: worker_id },
                available_for_work: true,
            },
        ))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(hub
        .supervisor
        .known_workers()
        .await
        .iter()
        .any(|w| w.0 == worker_id));

    // Four unanswered probes (120ms) plus the fifth tick evicts.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!hub
        .supervisor
        .known_workers()
        .await
        .iter()
        .any(|w| w.0 == worker_id));
}

#[tokio::test]
async fn s3_task_dispatch_and_result() {
    let transport = Arc::new(InMemoryTransport::new());
    let heartbeat = HeartbeatConfig {
        interval: Duration::from_millis(200),
        missed_beats_allowed: 4,
    };
    let (hub, _hub_id) = spin_up_hub(Arc::clone(&transport), heartbeat).await;

    let location = test_location();
    hub.repository.seed_location(location.clone()).await;

    let task = ScrapeTask::new(location.id, Utc::now() + chrono::Duration::milliseconds(20), false, Duration::ZERO);
    hub.repository.insert_scrape_task(task.clone()).await.unwrap();
    hub.task_manager.push_task(task.clone()).await;

    let fetcher: Arc<dyn Fetcher> = Arc::new(StubFetcher::new(9.99, "IN_STOCK"));
    let (_worker, _worker_id) = spin_up_worker(Arc::clone(&transport), fetcher).await;

    tokio::time::sleep(Duration::from_millis(150)).await;

    let infos = hub.repository.product_infos_for(location.product_id).await;
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].price, 9.99);
    assert!(infos[0].in_stock);

    let stored = hub.repository.find_scrape_task(task.id).await.unwrap().unwrap();
    assert!(stored.completed);
}

#[tokio::test]
async fn s4_repeat_rescheduling() {
    let transport = Arc::new(InMemoryTransport::new());
    let heartbeat = HeartbeatConfig {
        interval: Duration::from_millis(200),
        missed_beats_allowed: 4,
    };
    let (hub, _hub_id) = spin_up_hub(Arc::clone(&transport), heartbeat).await;

    let location = test_location();
    hub.repository.seed_location(location.clone()).await;

    let task = ScrapeTask::new(location.id, Utc::now(), true, Duration::from_millis(150));
    hub.repository.insert_scrape_task(task.clone()).await.unwrap();
    hub.task_manager.push_task(task.clone()).await;

    let fetcher: Arc<dyn Fetcher> = Arc::new(StubFetcher::new(5.0, "IN_STOCK"));
    let (_worker, _worker_id) = spin_up_worker(Arc::clone(&transport), fetcher).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    let first_batch = hub.repository.product_infos_for(location.product_id).await;
    assert_eq!(first_batch.len(), 1);

    // Second occurrence should fire roughly 150ms after the first resolve.
    tokio::time::sleep(Duration::from_millis(250)).await;
    let second_batch = hub.repository.product_infos_for(location.product_id).await;
    assert_eq!(second_batch.len(), 2);
}

#[tokio::test]
async fn s5_round_robin_fairness() {
    let transport = Arc::new(InMemoryTransport::new());
    let heartbeat = HeartbeatConfig {
        interval: Duration::from_millis(500),
        missed_beats_allowed: 4,
    };
    let (hub, _hub_id) = spin_up_hub(Arc::clone(&transport), heartbeat).await;

    let location = test_location();
    hub.repository.seed_location(location.clone()).await;

    let mut counters = Vec::new();
    for _ in 0..3 {
        let counter = Arc::new(AtomicU32::new(0));
        let fetcher = Arc::new(CountingFetcher {
            inner: StubFetcher::new(1.0, "IN_STOCK"),
            counter: Arc::clone(&counter),
        });
        spin_up_worker(Arc::clone(&transport), fetcher).await;
        counters.push(counter);
    }

    tokio::time::sleep(Duration::from_millis(50)).await;

    for i in 0..6u32 {
        let task = ScrapeTask::new(
            location.id,
            Utc::now() + chrono::Duration::milliseconds(10),
            false,
            Duration::ZERO,
        );
        hub.repository.insert_scrape_task(task.clone()).await.unwrap();
        hub.task_manager.push_task(task).await;
        let _ = i;
    }

    tokio::time::sleep(Duration::from_millis(200)).await;

    for counter in &counters {
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}

struct CountingFetcher {
    inner: StubFetcher,
    counter: Arc<AtomicU32>,
}

#[async_trait]
impl Fetcher for CountingFetcher {
    async fn fetch(&self, location: &ProductLocation) -> Result<ProductInfo, FetchError> {
        self.counter.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch(location).await
    }
}

#[tokio::test]
async fn s6_graceful_going_away() {
    let transport = Arc::new(InMemoryTransport::new());
    let heartbeat = HeartbeatConfig {
        interval: Duration::from_millis(200),
        missed_beats_allowed: 4,
    };
    let (hub, _hub_id) = spin_up_hub(Arc::clone(&transport), heartbeat).await;

    let fetcher: Arc<dyn Fetcher> = Arc::new(StubFetcher::new(1.0, "IN_STOCK"));
    let (worker, worker_id) = spin_up_worker(Arc::clone(&transport), fetcher).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(hub
        .supervisor
        .known_workers()
        .await
        .iter()
        .any(|w| w.0 == worker_id));

    let shutdown = worker.shutdown_handle();
    shutdown.send(()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!hub
        .supervisor
        .known_workers()
        .await
        .iter()
        .any(|w| w.0 == worker_id));
}
