use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use scrape_common::config::TaskManagerConfig;
use scrape_common::ids::TaskId;
use scrape_common::repository::Repository;
use scrape_common::types::ScrapeTask;
use scrape_common::ScrapeError;
use tokio::sync::RwLock;

/// Time-ordered priority queue of scrape tasks, kept in memory.
///
/// The original design sorted-inserts into a linked list; this substitutes
/// a binary heap (ascending `scheduled_for`, insertion order as tie-break)
/// which keeps the same ordering and duplicate-rejection invariants at
/// O(log n) insert instead of O(n).
pub struct TaskManager {
    repository: Arc<dyn Repository>,
    config: TaskManagerConfig,
    state: RwLock<TaskManagerState>,
}

struct TaskManagerState {
    heap: BinaryHeap<Reverse<HeapEntry>>,
    queued_ids: HashSet<TaskId>,
    tasks: HashMap<TaskId, ScrapeTask>,
    resolved: HashSet<TaskId>,
    next_sequence: u64,
}

#[derive(Eq, PartialEq)]
struct HeapEntry {
    scheduled_for: DateTime<Utc>,
    sequence: u64,
    id: TaskId,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.scheduled_for
            .cmp(&other.scheduled_for)
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl TaskManager {
    pub fn new(repository: Arc<dyn Repository>, config: TaskManagerConfig) -> Self {
        Self {
            repository,
            config,
            state: RwLock::new(TaskManagerState {
                heap: BinaryHeap::new(),
                queued_ids: HashSet::new(),
                tasks: HashMap::new(),
                resolved: HashSet::new(),
                next_sequence: 0,
            }),
        }
    }

    /// Pull the next `config.default_limit` upcoming tasks from the
    /// repository and enqueue each. Surfaces repository failures unchanged
    /// — the hub refuses to start if this fails.
    pub async fn initialize(&self) -> Result<(), ScrapeError> {
        let tasks = self
            .repository
            .find_upcoming_scrape_tasks(Utc::now(), self.config.default_limit)
            .await?;

        for task in tasks {
            self.push_task(task).await;
        }

        Ok(())
    }

    /// Store the task and insert its id into the queue. A no-op if the id
    /// is already queued.
    pub async fn push_task(&self, task: ScrapeTask) {
        let mut state = self.state.write().await;
        if state.queued_ids.contains(&task.id) {
            return;
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;

        state.queued_ids.insert(task.id);
        state.heap.push(Reverse(HeapEntry {
            scheduled_for: task.scheduled_for,
            sequence,
            id: task.id,
        }));
        state.tasks.insert(task.id, task);
    }

    /// Pop the due task at the head of the queue, skipping (and dropping)
    /// any already-resolved ids lazily encountered along the way. Returns
    /// nothing if the head isn't due yet or the queue is empty.
    pub async fn try_pop_due(&self) -> Option<ScrapeTask> {
        let now = Utc::now();
        let mut state = self.state.write().await;

        loop {
            let Reverse(head) = state.heap.peek()?;
            if head.scheduled_for > now {
                return None;
            }

            let Reverse(entry) = state.heap.pop().expect("peek just confirmed an entry");
            state.queued_ids.remove(&entry.id);
            state.resolved.remove(&entry.id);

            // `tasks` can already be missing the entry if `resolve` removed
            // it eagerly (still-queued case) — either way, skip and retry.
            match state.tasks.remove(&entry.id) {
                Some(task) => return Some(task),
                None => continue,
            }
        }
    }

    /// Mark `id` resolved. Lazy removal from the queue is acceptable — the
    /// entry is dropped the next time it's popped (or immediately, if it
    /// is still present, to bound memory growth of `resolved`).
    pub async fn resolve(&self, id: TaskId) {
        let mut state = self.state.write().await;
        if state.queued_ids.remove(&id) {
            state.tasks.remove(&id);
        } else {
            state.resolved.insert(id);
        }
    }

    /// The `scheduled_for` of the time-earliest still-queued task, if any.
    /// Used by [`Self::start`] to bound its poll sleep.
    async fn next_due_at(&self) -> Option<DateTime<Utc>> {
        let state = self.state.read().await;
        state.heap.peek().map(|Reverse(entry)| entry.scheduled_for)
    }

    /// Launch a polling loop that repeatedly calls [`Self::try_pop_due`]
    /// and invokes `callback` for each due task. Runs until the returned
    /// future is dropped/aborted — callers own the task handle.
    pub async fn start<F, Fut>(self: Arc<Self>, callback: F)
    where
        F: Fn(ScrapeTask) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        loop {
            while let Some(task) = self.try_pop_due().await {
                callback(task).await;
            }

            let sleep_for = match self.next_due_at().await {
                Some(due) => {
                    let until = due - Utc::now();
                    until
                        .to_std()
                        .unwrap_or(Duration::ZERO)
                        .min(self.config.poll_cap)
                }
                None => self.config.poll_cap,
            };

            tokio::time::sleep(sleep_for.max(Duration::from_millis(1))).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use scrape_common::ids::ProductLocationId;
    use scrape_common::repository::InMemoryRepository;

    fn task_at(offset: ChronoDuration) -> ScrapeTask {
        ScrapeTask::new(
            ProductLocationId::new(),
            Utc::now() + offset,
            false,
            Duration::ZERO,
        )
    }

    #[tokio::test]
    async fn head_is_always_the_earliest_scheduled_task() {
        let tm = TaskManager::new(Arc::new(InMemoryRepository::new()), TaskManagerConfig::default());
        let early = task_at(ChronoDuration::milliseconds(-50));
        let late = task_at(ChronoDuration::milliseconds(500));
        let mid = task_at(ChronoDuration::milliseconds(100));

        tm.push_task(late.clone()).await;
        tm.push_task(early.clone()).await;
        tm.push_task(mid.clone()).await;

        let first = tm.try_pop_due().await.expect("early task is already due");
        assert_eq!(first.id, early.id);
    }

    #[tokio::test]
    async fn try_pop_due_never_returns_a_not_yet_due_task() {
        let tm = TaskManager::new(Arc::new(InMemoryRepository::new()), TaskManagerConfig::default());
        tm.push_task(task_at(ChronoDuration::seconds(10))).await;
        assert!(tm.try_pop_due().await.is_none());
    }

    #[tokio::test]
    async fn resolved_tasks_are_skipped_on_dequeue() {
        let tm = TaskManager::new(Arc::new(InMemoryRepository::new()), TaskManagerConfig::default());
        let t1 = task_at(ChronoDuration::milliseconds(-10));
        let t2 = task_at(ChronoDuration::milliseconds(-5));

        tm.push_task(t1.clone()).await;
        tm.push_task(t2.clone()).await;
        tm.resolve(t1.id).await;

        let popped = tm.try_pop_due().await.expect("t2 should still be due");
        assert_eq!(popped.id, t2.id);
        assert!(tm.try_pop_due().await.is_none());
    }

    #[tokio::test]
    async fn pushing_the_same_id_twice_is_a_no_op() {
        let tm = TaskManager::new(Arc::new(InMemoryRepository::new()), TaskManagerConfig::default());
        let task = task_at(ChronoDuration::milliseconds(-1));
        tm.push_task(task.clone()).await;
        tm.push_task(task.clone()).await;

        assert!(tm.try_pop_due().await.is_some());
        assert!(tm.try_pop_due().await.is_none());
    }
}
