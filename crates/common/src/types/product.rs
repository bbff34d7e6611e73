use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ProductId, ProductInfoId, ProductLocationId};

/// One listing of a product at a particular retailer/storefront.
///
/// `local_id` is the retailer's own identifier for the listing (distinct
/// from our `id`), and `location_id` ties it to wherever the listing is
/// sold from. Both `category` and `category_id` are carried even though
/// they're redundant with each other in practice — retailers are not always
/// consistent about which one is populated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductLocation {
    pub id: ProductLocationId,
    pub product_id: ProductId,
    pub location_id: String,
    pub local_id: String,
    pub url: String,
    pub slug: String,
    pub category: String,
    pub category_id: String,
}

/// A single observation of a product's price and availability, as scraped
/// from a `ProductLocation`.
///
/// Workers build these with `id: None` — the hub assigns the id on persist,
/// since only the hub's `Repository` knows the next identifier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ProductInfoId>,
    pub created_at: DateTime<Utc>,
    pub product_id: ProductId,
    pub product_location_id: ProductLocationId,
    pub price: f64,
    pub availability_status: String,
    pub in_stock: bool,
}

impl ProductInfo {
    /// Construct a fresh, unpersisted observation. `created_at` is stamped
    /// at observation time on the worker, not at persist time on the hub.
    pub fn observed(
        product_id: ProductId,
        product_location_id: ProductLocationId,
        price: f64,
        availability_status: impl Into<String>,
        in_stock: bool,
    ) -> Self {
        Self {
            id: None,
            created_at: Utc::now(),
            product_id,
            product_location_id,
            price,
            availability_status: availability_status.into(),
            in_stock,
        }
    }
}
