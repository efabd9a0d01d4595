// src/source/fixture.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use super::{ListingSource, SearchQuery, SessionFactory, SourceFetchError};
use crate::listing::{parse_price_yen, Listing};

/// Canned search results keyed by search term (oldest first per term).
/// Used for demos, dry runs and tests; honours the query's price bounds.
#[derive(Debug, Clone, Default)]
pub struct FixtureSource {
    by_term: HashMap<String, Vec<Listing>>,
    failing: HashSet<String>,
    usd_to_jpy: f64,
}

impl FixtureSource {
    pub fn new(usd_to_jpy: f64) -> Self {
        Self {
            usd_to_jpy,
            ..Self::default()
        }
    }

    /// Parse a JSON object `{"term": [listing, ...], ...}`.
    pub fn from_json(content: &str, usd_to_jpy: f64) -> Result<Self> {
        let by_term: HashMap<String, Vec<Listing>> =
            serde_json::from_str(content).context("parsing listing fixture")?;
        Ok(Self {
            by_term,
            failing: HashSet::new(),
            usd_to_jpy,
        })
    }

    pub fn with_listings(mut self, term: &str, listings: Vec<Listing>) -> Self {
        self.by_term.insert(term.to_string(), listings);
        self
    }

    /// Make every search for `term` fail.
    pub fn with_failure(mut self, term: &str) -> Self {
        self.failing.insert(term.to_string());
        self
    }

    fn within_bounds(&self, l: &Listing, q: &SearchQuery) -> bool {
        // Unparseable prices are passed through; the classifier deals with them.
        let Some(yen) = parse_price_yen(&l.price, self.usd_to_jpy) else {
            return true;
        };
        q.price_min.map_or(true, |min| yen >= min) && q.price_max.map_or(true, |max| yen <= max)
    }
}

#[async_trait]
impl ListingSource for FixtureSource {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<Listing>, SourceFetchError> {
        if self.failing.contains(&query.term) {
            return Err(SourceFetchError::Unavailable(format!(
                "fixture marked '{}' as failing",
                query.term
            )));
        }
        Ok(self
            .by_term
            .get(&query.term)
            .map(|ls| {
                ls.iter()
                    .filter(|l| self.within_bounds(l, query))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "fixture"
    }
}

/// Re-reads the fixture file every time a session is opened.
pub struct FixtureSessionFactory {
    pub path: PathBuf,
    pub usd_to_jpy: f64,
}

#[async_trait]
impl SessionFactory for FixtureSessionFactory {
    async fn open(&self) -> Result<Box<dyn ListingSource>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading listing fixture {}", self.path.display()))?;
        Ok(Box::new(FixtureSource::from_json(&content, self.usd_to_jpy)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn l(title: &str, price: &str) -> Listing {
        Listing {
            title: title.into(),
            price: price.into(),
            url: format!("https://jp.mercari.com/item/{title}"),
            image_url: format!("https://static.mercdn.net/{title}.jpg"),
            listed_at: None,
        }
    }

    #[tokio::test]
    async fn bounds_filter_and_failure() {
        let src = FixtureSource::new(150.0)
            .with_listings("ps3", vec![l("cheap", "¥500"), l("mid", "¥2,000"), l("odd", "?")])
            .with_failure("ps4");
        let q = SearchQuery {
            term: "ps3".into(),
            price_min: Some(1000),
            price_max: Some(3000),
        };
        let hits = src.search(&q).await.unwrap();
        let titles: Vec<_> = hits.iter().map(|h| h.title.as_str()).collect();
        assert_eq!(titles, vec!["mid", "odd"]);

        let q4 = SearchQuery {
            term: "ps4".into(),
            price_min: None,
            price_max: None,
        };
        assert!(src.search(&q4).await.is_err());
    }
}
