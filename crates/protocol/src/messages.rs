use serde::{Deserialize, Serialize};
use uuid::Uuid;

use scrape_common::types::{ProductInfo, ProductLocation};

/// Header for an envelope meant to be received by a single peer. Every
/// other subscriber on the shared queue MUST drop it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleReceiverHeader {
    #[serde(rename = "SenderID")]
    pub sender_id: Uuid,
    #[serde(rename = "ReceiverID")]
    pub receiver_id: Uuid,
}

impl SingleReceiverHeader {
    pub fn new(sender_id: Uuid, receiver_id: Uuid) -> Self {
        Self { sender_id, receiver_id }
    }

    /// Every non-addressed subscriber must apply this filter before acting
    /// on the enclosing payload.
    pub fn is_for(&self, self_id: Uuid) -> bool {
        self.receiver_id == self_id
    }
}

/// Header for an envelope meant for every subscriber.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanoutHeader {
    #[serde(rename = "SenderID")]
    pub sender_id: Uuid,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    #[serde(flatten)]
    pub header: FanoutHeader,
    #[serde(rename = "AvailableForWork")]
    pub available_for_work: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubWelcome {
    #[serde(flatten)]
    pub header: SingleReceiverHeader,
}

/// Reserved: no component currently sends or handles this tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubWelcomeAck {
    #[serde(flatten)]
    pub header: SingleReceiverHeader,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    #[serde(flatten)]
    pub header: SingleReceiverHeader,
    /// True on an outbound probe from the Heartbeater; false on a reply.
    #[serde(rename = "ResponseExpected")]
    pub response_expected: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoingAway {
    #[serde(flatten)]
    pub header: SingleReceiverHeader,
    #[serde(rename = "Reason")]
    pub reason: String,
}

impl GoingAway {
    pub const REASON_SHUTTING_DOWN: &'static str = "SHUTTING_DOWN";
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskFulfillmentRequest {
    #[serde(flatten)]
    pub header: SingleReceiverHeader,
    #[serde(rename = "TaskID")]
    pub task_id: Uuid,
    #[serde(rename = "ProductLocation")]
    pub product_location: ProductLocation,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InfoRetrieved {
    #[serde(flatten)]
    pub header: SingleReceiverHeader,
    #[serde(rename = "TaskID")]
    pub task_id: Uuid,
    #[serde(rename = "ProductInfo")]
    pub product_info: ProductInfo,
}

/// Reserved for related-item discovery; not produced or consumed by the
/// current component set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlFulfillmentRequest {
    #[serde(flatten)]
    pub header: SingleReceiverHeader,
}

/// Reserved; see [`CrawlFulfillmentRequest`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlRetrieved {
    #[serde(flatten)]
    pub header: SingleReceiverHeader,
}
