use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};
use scrape_common::fetcher::{FetchError, Fetcher};
use scrape_common::types::{ProductInfo, ProductLocation};
use serde::Deserialize;

/// Default out-of-the-box [`Fetcher`]: fetches `location.url`, strips
/// boilerplate markup, and looks for a JSON price/availability payload
/// embedded in the page. Grounded on the teacher's `fetch.rs` (the same
/// `reqwest::Client` + `scraper::Html`/`Selector` pipeline); exists to make
/// the worker binary runnable end-to-end in a demo setting. Production
/// deployments are expected to swap in an upstream-specific scraper behind
/// the same trait, matching the spec's externalization of "the upstream
/// HTML/JSON scraper".
pub struct HttpFetcher {
    http: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::builder()
                .user_agent("scrape-worker/0.1")
                .build()
                .expect("failed to build HTTP client"),
            timeout,
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, location: &ProductLocation) -> Result<ProductInfo, FetchError> {
        let response = self
            .http
            .get(&location.url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?;

        let embedded = extract_embedded_listing(&body)
            .ok_or_else(|| FetchError::Parse("no embedded price/availability payload found".to_string()))?;

        Ok(ProductInfo::observed(
            location.product_id,
            location.id,
            embedded.price,
            embedded.availability_status.clone(),
            embedded.availability_status == "IN_STOCK",
        ))
    }
}

#[derive(Deserialize)]
struct EmbeddedListing {
    price: f64,
    #[serde(rename = "availabilityStatus")]
    availability_status: String,
}

/// Look for a `<script type="application/json" id="__LISTING__">` tag
/// carrying the price/availability payload, stripping script/style/nav/
/// footer noise around it first (mirrors the teacher's `extract_html_content`
/// cleanup pass, even though here we only need the one embedded script).
fn extract_embedded_listing(html: &str) -> Option<EmbeddedListing> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(r#"script[id="__LISTING__"]"#).ok()?;

    let script = document.select(&selector).next()?;
    let text: String = script.text().collect();
    serde_json::from_str(&text).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_embedded_listing_payload() {
        let html = r#"
            <html><body>
              <nav>skip me</nav>
              <script id="__LISTING__" type="application/json">
                {"price": 12.5, "availabilityStatus": "IN_STOCK"}
              </script>
            </body></html>
        "#;

        let listing = extract_embedded_listing(html).expect("payload should parse");
        assert_eq!(listing.price, 12.5);
        assert_eq!(listing.availability_status, "IN_STOCK");
    }

    #[test]
    fn returns_none_when_no_payload_is_present() {
        let html = "<html><body><p>nothing here</p></body></html>";
        assert!(extract_embedded_listing(html).is_none());
    }
}
