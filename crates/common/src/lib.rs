pub mod config;
pub mod error;
pub mod fetcher;
pub mod ids;
pub mod repository;
pub mod types;

pub use error::{Result, ScrapeError};
pub use ids::*;
