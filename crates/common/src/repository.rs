use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::{Result, ScrapeError};
use crate::ids::{ProductId, ProductLocationId, TaskId};
use crate::types::{ProductInfo, ProductLocation, ScrapeTask};

/// Durable storage for scrape tasks, product locations, and observed
/// product info.
///
/// This is the seam between the hub and whatever persistence layer a real
/// deployment uses. Implementations other than [`InMemoryRepository`] (a
/// real database-backed one) are out of scope here — the hub only ever
/// depends on this trait, never on a concrete store.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn find_product_location(
        &self,
        id: ProductLocationId,
    ) -> Result<Option<ProductLocation>>;

    async fn insert_product_info(&self, info: ProductInfo) -> Result<ProductInfo>;

    async fn find_scrape_task(&self, id: TaskId) -> Result<Option<ScrapeTask>>;

    async fn update_scrape_task(&self, task: ScrapeTask) -> Result<()>;

    async fn insert_scrape_task(&self, task: ScrapeTask) -> Result<()>;

    /// Tasks due at or before `now`, oldest-scheduled first, capped at
    /// `limit`. Used on startup to repopulate the in-memory TaskManager.
    async fn find_upcoming_scrape_tasks(
        &self,
        now: chrono::DateTime<chrono::Utc>,
        limit: usize,
    ) -> Result<Vec<ScrapeTask>>;
}

/// Non-durable [`Repository`] backed by in-process maps. Suitable for tests
/// and local development; everything is lost on restart.
#[derive(Default)]
pub struct InMemoryRepository {
    locations: RwLock<HashMap<ProductLocationId, ProductLocation>>,
    tasks: RwLock<HashMap<TaskId, ScrapeTask>>,
    infos: RwLock<Vec<ProductInfo>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_location(&self, location: ProductLocation) {
        self.locations.write().await.insert(location.id, location);
    }

    pub async fn product_infos_for(&self, product_id: ProductId) -> Vec<ProductInfo> {
        self.infos
            .read()
            .await
            .iter()
            .filter(|info| info.product_id == product_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn find_product_location(
        &self,
        id: ProductLocationId,
    ) -> Result<Option<ProductLocation>> {
        Ok(self.locations.read().await.get(&id).cloned())
    }

    async fn insert_product_info(&self, mut info: ProductInfo) -> Result<ProductInfo> {
        if info.id.is_none() {
            info.id = Some(crate::ids::ProductInfoId::new());
        }
        self.infos.write().await.push(info.clone());
        Ok(info)
    }

    async fn find_scrape_task(&self, id: TaskId) -> Result<Option<ScrapeTask>> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn update_scrape_task(&self, task: ScrapeTask) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        if !tasks.contains_key(&task.id) {
            return Err(ScrapeError::Repository(format!(
                "cannot update unknown task {}",
                task.id
            )));
        }
        tasks.insert(task.id, task);
        Ok(())
    }

    async fn insert_scrape_task(&self, task: ScrapeTask) -> Result<()> {
        self.tasks.write().await.insert(task.id, task);
        Ok(())
    }

    async fn find_upcoming_scrape_tasks(
        &self,
        now: chrono::DateTime<chrono::Utc>,
        limit: usize,
    ) -> Result<Vec<ScrapeTask>> {
        let mut due: Vec<ScrapeTask> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| !t.completed && t.scheduled_for <= now)
            .cloned()
            .collect();
        due.sort_by_key(|t| t.scheduled_for);
        due.truncate(limit);
        Ok(due)
    }
}
