// src/source/mod.rs
//! Listing sources: where search hits come from.
//!
//! The pipeline only sees [`ListingSource`]; how a source talks to the
//! marketplace is its own business. Sources are opened through a
//! [`SessionFactory`] so the orchestrator can throw a long-lived session away
//! and start a fresh one.

pub mod fixture;
pub mod http;

use async_trait::async_trait;

use crate::config::KeywordSpec;
use crate::listing::Listing;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub term: String,
    pub price_min: Option<u64>,
    pub price_max: Option<u64>,
}

impl From<&KeywordSpec> for SearchQuery {
    fn from(spec: &KeywordSpec) -> Self {
        Self {
            term: spec.search_term.clone(),
            price_min: spec.price_min,
            price_max: spec.price_max,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceFetchError {
    #[error("search request failed: {0}")]
    Request(String),
    #[error("search returned HTTP {0}")]
    Status(u16),
    #[error("unreadable search response: {0}")]
    Decode(String),
    #[error("source unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Best-effort page of hits, oldest first. May be stale or incomplete.
    async fn search(&self, query: &SearchQuery) -> Result<Vec<Listing>, SourceFetchError>;
    fn name(&self) -> &'static str;
}

#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> anyhow::Result<Box<dyn ListingSource>>;
}
