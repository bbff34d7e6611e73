use serde::{Deserialize, Serialize};

/// Tracked status for a single worker known to the Supervisor.
///
/// Created on a worker's first `StatusUpdate`; destroyed when the worker is
/// evicted. One instance per known worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub available_for_work: bool,
}

impl WorkerStatus {
    pub fn new(available_for_work: bool) -> Self {
        Self { available_for_work }
    }
}
