use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::messages::{
    CrawlFulfillmentRequest, CrawlRetrieved, GoingAway, Heartbeat, HubWelcome, HubWelcomeAck,
    InfoRetrieved, StatusUpdate, TaskFulfillmentRequest,
};

/// The type-tagged JSON wrapper actually placed on the broker. `content` is
/// kept as raw bytes between decode and handler dispatch so a frame can be
/// routed to its handler before its payload is fully parsed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "Type")]
    pub r#type: String,
    #[serde(rename = "Content", with = "content_as_bytes")]
    pub content: Vec<u8>,
}

impl Envelope {
    pub fn type_tag(&self) -> &str {
        &self.r#type
    }
}

/// The closed set of control messages this protocol carries. The send side
/// maps each variant to its wire tag at compile time — there is no way to
/// construct a payload with an unrecognised tag.
#[derive(Clone, Debug)]
pub enum Payload {
    StatusUpdate(StatusUpdate),
    HubWelcome(HubWelcome),
    HubWelcomeAck(HubWelcomeAck),
    Heartbeat(Heartbeat),
    GoingAway(GoingAway),
    TaskFulfillmentRequest(TaskFulfillmentRequest),
    InfoRetrieved(InfoRetrieved),
    CrawlFulfillmentRequest(CrawlFulfillmentRequest),
    CrawlRetrieved(CrawlRetrieved),
}

/// Wire tags from the message vocabulary. Kept as a separate closed set so
/// `Envelope::decode` can recognise (and reject) unregistered tags without
/// needing a `Payload` instance first.
pub const TAG_STATUS_UPDATE: &str = "statusUpdate";
pub const TAG_HUB_WELCOME: &str = "hubWelcome";
pub const TAG_HUB_WELCOME_ACK: &str = "hubWelcomeAck";
pub const TAG_HEARTBEAT: &str = "heartbeat";
pub const TAG_GOING_AWAY: &str = "goingAway";
pub const TAG_TASK_FULFILLMENT_REQUEST: &str = "taskFulfillmentRequest";
pub const TAG_INFO_RETRIEVED: &str = "infoRetrieved";
pub const TAG_CRAWL_FULFILLMENT_REQUEST: &str = "crawlFulfillmentRequest";
pub const TAG_CRAWL_RETRIEVED: &str = "crawlRetrieved";

impl Payload {
    pub fn type_tag(&self) -> &'static str {
        match self {
            Payload::StatusUpdate(_) => TAG_STATUS_UPDATE,
            Payload::HubWelcome(_) => TAG_HUB_WELCOME,
            Payload::HubWelcomeAck(_) => TAG_HUB_WELCOME_ACK,
            Payload::Heartbeat(_) => TAG_HEARTBEAT,
            Payload::GoingAway(_) => TAG_GOING_AWAY,
            Payload::TaskFulfillmentRequest(_) => TAG_TASK_FULFILLMENT_REQUEST,
            Payload::InfoRetrieved(_) => TAG_INFO_RETRIEVED,
            Payload::CrawlFulfillmentRequest(_) => TAG_CRAWL_FULFILLMENT_REQUEST,
            Payload::CrawlRetrieved(_) => TAG_CRAWL_RETRIEVED,
        }
    }

    /// Encode into the wire envelope. The only failure mode is a payload
    /// whose content can't be serialized, which never happens for the
    /// closed set of message structs above — kept fallible anyway since
    /// it's a codec boundary.
    pub fn encode(&self) -> Result<Envelope, ProtocolError> {
        let content = match self {
            Payload::StatusUpdate(p) => serde_json::to_vec(p),
            Payload::HubWelcome(p) => serde_json::to_vec(p),
            Payload::HubWelcomeAck(p) => serde_json::to_vec(p),
            Payload::Heartbeat(p) => serde_json::to_vec(p),
            Payload::GoingAway(p) => serde_json::to_vec(p),
            Payload::TaskFulfillmentRequest(p) => serde_json::to_vec(p),
            Payload::InfoRetrieved(p) => serde_json::to_vec(p),
            Payload::CrawlFulfillmentRequest(p) => serde_json::to_vec(p),
            Payload::CrawlRetrieved(p) => serde_json::to_vec(p),
        }
        .map_err(|e| ProtocolError::Decode(e.to_string()))?;

        Ok(Envelope {
            r#type: self.type_tag().to_string(),
            content,
        })
    }

    /// Decode a wire envelope into a typed payload. Returns
    /// [`ProtocolError::UnknownType`] for an unrecognised tag and
    /// [`ProtocolError::Decode`] for a tag we know but whose content fails
    /// to parse — callers (the QueueChannel reader) discard the frame in
    /// both cases and keep going.
    pub fn decode(envelope: &Envelope) -> Result<Payload, ProtocolError> {
        let decode = |bytes: &[u8]| -> Result<_, ProtocolError> {
            serde_json::from_slice(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
        };

        match envelope.r#type.as_str() {
            TAG_STATUS_UPDATE => Ok(Payload::StatusUpdate(decode(&envelope.content)?)),
            TAG_HUB_WELCOME => Ok(Payload::HubWelcome(decode(&envelope.content)?)),
            TAG_HUB_WELCOME_ACK => Ok(Payload::HubWelcomeAck(decode(&envelope.content)?)),
            TAG_HEARTBEAT => Ok(Payload::Heartbeat(decode(&envelope.content)?)),
            TAG_GOING_AWAY => Ok(Payload::GoingAway(decode(&envelope.content)?)),
            TAG_TASK_FULFILLMENT_REQUEST => {
                Ok(Payload::TaskFulfillmentRequest(decode(&envelope.content)?))
            }
            TAG_INFO_RETRIEVED => Ok(Payload::InfoRetrieved(decode(&envelope.content)?)),
            TAG_CRAWL_FULFILLMENT_REQUEST => {
                Ok(Payload::CrawlFulfillmentRequest(decode(&envelope.content)?))
            }
            TAG_CRAWL_RETRIEVED => Ok(Payload::CrawlRetrieved(decode(&envelope.content)?)),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

/// `Content` travels as a JSON string on the wire (matching the original's
/// `[]byte` carrier) even though in memory we keep it as raw bytes for
/// polymorphic re-parsing.
mod content_as_bytes {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        let value: serde_json::Value = serde_json::from_slice(bytes).map_err(serde::ser::Error::custom)?;
        value.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let value = serde_json::Value::deserialize(d)?;
        serde_json::to_vec(&value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{FanoutHeader, SingleReceiverHeader};
    use uuid::Uuid;

    #[test]
    fn round_trips_a_status_update() {
        let payload = Payload::StatusUpdate(StatusUpdate {
            header: FanoutHeader { sender_id: Uuid::new_v4() },
            available_for_work: true,
        });

        let envelope = payload.encode().unwrap();
        assert_eq!(envelope.type_tag(), TAG_STATUS_UPDATE);

        let decoded = Payload::decode(&envelope).unwrap();
        match decoded {
            Payload::StatusUpdate(su) => assert!(su.available_for_work),
            other => panic!("expected StatusUpdate, got {other:?}"),
        }
    }

    #[test]
    fn unknown_type_tag_is_rejected_not_panicked() {
        let envelope = Envelope {
            r#type: "somethingFromTheFuture".to_string(),
            content: b"{}".to_vec(),
        };

        let err = Payload::decode(&envelope).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownType(_)));
    }

    #[test]
    fn malformed_content_is_a_decode_error_not_a_panic() {
        let envelope = Envelope {
            r#type: TAG_HEARTBEAT.to_string(),
            content: b"not json".to_vec(),
        };

        let err = Payload::decode(&envelope).unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
    }

    #[test]
    fn single_receiver_header_filters_other_receivers() {
        let me = Uuid::new_v4();
        let header = SingleReceiverHeader::new(Uuid::new_v4(), me);
        assert!(header.is_for(me));
        assert!(!header.is_for(Uuid::new_v4()));
    }
}
