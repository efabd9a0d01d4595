// src/source/http.rs
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::{ListingSource, SearchQuery, SessionFactory, SourceFetchError};
use crate::listing::Listing;

/// JSON search endpoint returning the newest on-sale hits first.
///
/// Expected body: `{"items": [...]}` or a bare array of
/// `{title|name, price, url, image_url|thumbnail, created?}`.
pub struct HttpSearchSource {
    client: Client,
    endpoint: String,
    page_size: usize,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SearchBody {
    Wrapped { items: Vec<RawItem> },
    Bare(Vec<RawItem>),
}

#[derive(Debug, Deserialize)]
struct RawItem {
    #[serde(alias = "name")]
    title: String,
    price: serde_json::Value,
    url: String,
    #[serde(alias = "thumbnail", default)]
    image_url: String,
    /// Unix seconds.
    #[serde(default)]
    created: Option<i64>,
}

impl RawItem {
    fn into_listing(self) -> Listing {
        let price = match self.price {
            serde_json::Value::String(s) => s,
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        };
        let listed_at: Option<DateTime<Utc>> =
            self.created.and_then(|s| Utc.timestamp_opt(s, 0).single());
        Listing {
            title: self.title.trim().to_string(),
            price,
            url: self.url,
            image_url: self.image_url,
            listed_at,
        }
    }
}

impl HttpSearchSource {
    pub fn new(client: Client, endpoint: String, page_size: usize) -> Self {
        Self {
            client,
            endpoint,
            page_size: page_size.max(1),
        }
    }

    fn params(&self, q: &SearchQuery) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("keyword", q.term.clone()),
            ("sort", "created_time".to_string()),
            ("order", "desc".to_string()),
            ("status", "on_sale".to_string()),
            ("limit", self.page_size.to_string()),
        ];
        if let Some(min) = q.price_min {
            params.push(("price_min", min.to_string()));
        }
        if let Some(max) = q.price_max {
            params.push(("price_max", max.to_string()));
        }
        params
    }
}

/// Newest-first page → at most `page_size` hits, oldest first.
fn into_oldest_first(body: SearchBody, page_size: usize) -> Vec<Listing> {
    let items = match body {
        SearchBody::Wrapped { items } => items,
        SearchBody::Bare(items) => items,
    };
    let mut out: Vec<Listing> = items
        .into_iter()
        .take(page_size)
        .map(RawItem::into_listing)
        .collect();
    out.reverse();
    out
}

#[async_trait]
impl ListingSource for HttpSearchSource {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<Listing>, SourceFetchError> {
        let rsp = self
            .client
            .get(&self.endpoint)
            .query(&self.params(query))
            .send()
            .await
            .map_err(|e| SourceFetchError::Request(e.to_string()))?;

        let status = rsp.status();
        if !status.is_success() {
            return Err(SourceFetchError::Status(status.as_u16()));
        }
        let body: SearchBody = rsp
            .json()
            .await
            .map_err(|e| SourceFetchError::Decode(e.to_string()))?;

        let out = into_oldest_first(body, self.page_size);
        tracing::debug!(term = %query.term, hits = out.len(), "search page fetched");
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Opens a fresh HTTP client (connection pool included) per session.
pub struct HttpSessionFactory {
    pub endpoint: String,
    pub page_size: usize,
    pub timeout: Duration,
    pub user_agent: String,
}

#[async_trait]
impl SessionFactory for HttpSessionFactory {
    async fn open(&self) -> anyhow::Result<Box<dyn ListingSource>> {
        let client = Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent.clone())
            .build()
            .context("building search HTTP client")?;
        tracing::info!(endpoint = %self.endpoint, "search session opened");
        Ok(Box::new(HttpSearchSource::new(
            client,
            self.endpoint.clone(),
            self.page_size,
        )))
    }
}
