use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which role a server plays in the control protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerVariant {
    Hub,
    Worker,
}

/// Identifies a single hub or worker process. Immutable once created.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerIdentity {
    pub variant: ServerVariant,
    pub id: Uuid,
}

impl ServerIdentity {
    pub fn new(variant: ServerVariant, id: Uuid) -> Self {
        Self { variant, id }
    }

    pub fn hub(id: Uuid) -> Self {
        Self::new(ServerVariant::Hub, id)
    }

    pub fn worker(id: Uuid) -> Self {
        Self::new(ServerVariant::Worker, id)
    }

    pub fn is_worker(&self) -> bool {
        matches!(self.variant, ServerVariant::Worker)
    }
}
