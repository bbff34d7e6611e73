use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! define_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id!(WorkerId, "Typed wrapper for worker server UUIDs.");
define_id!(HubId, "Typed wrapper for hub server UUIDs.");
define_id!(TaskId, "Typed wrapper for scrape task UUIDs.");
define_id!(ProductId, "Typed wrapper for product UUIDs.");
define_id!(
    ProductLocationId,
    "Typed wrapper for product-location UUIDs."
);
define_id!(ProductInfoId, "Typed wrapper for product-info UUIDs.");
