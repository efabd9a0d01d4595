// src/poller.rs
//! One keyword, one poll: search, filter, classify, record, return what is
//! worth telling the user about.

use chrono::{DateTime, Utc};
use metrics::counter;

use crate::classify::{ClassificationKind, Classifier};
use crate::config::KeywordSpec;
use crate::listing::Listing;
use crate::source::{ListingSource, SearchQuery, SourceFetchError};
use crate::store::SeenStore;

/// One actionable listing with the price it was classified at.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem {
    pub listing: Listing,
    pub kind: ClassificationKind,
    pub price: u64,
}

/// Actionable listings for one keyword in one cycle, in source order.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationBatch {
    pub display_name: String,
    pub items: Vec<BatchItem>,
}

impl NotificationBatch {
    pub fn empty(display_name: &str) -> Self {
        Self {
            display_name: display_name.to_string(),
            items: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Recoverable, scoped to a single keyword.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("keyword '{keyword}': {source}")]
    Source {
        keyword: String,
        #[source]
        source: SourceFetchError,
    },
}

impl PollError {
    pub fn keyword(&self) -> &str {
        match self {
            PollError::Source { keyword, .. } => keyword,
        }
    }
}

pub async fn poll(
    spec: &KeywordSpec,
    source: &dyn ListingSource,
    store: &mut SeenStore,
    classifier: &Classifier,
    now: DateTime<Utc>,
) -> Result<NotificationBatch, PollError> {
    let hits = source
        .search(&SearchQuery::from(spec))
        .await
        .map_err(|source| PollError::Source {
            keyword: spec.display_name.clone(),
            source,
        })?;
    let fetched = hits.len();

    let mut batch = NotificationBatch::empty(&spec.display_name);
    let mut filtered = 0usize;
    let mut anomalies = 0usize;

    for listing in hits {
        if !spec.title_matches(&listing.title) {
            filtered += 1;
            continue;
        }

        let c = classifier.classify(&listing, store);
        match c.price {
            Some(price) => store.upsert(c.signature, price, now),
            None => {
                anomalies += 1;
                store.touch(&c.signature, now);
            }
        }

        if let (true, Some(price)) = (c.kind.is_actionable(), c.price) {
            tracing::debug!(keyword = %spec.display_name, title = %listing.title, kind = ?c.kind, "actionable listing");
            batch.items.push(BatchItem {
                listing,
                kind: c.kind,
                price,
            });
        }
    }

    counter!("watch_listings_seen_total").increment(fetched as u64);
    tracing::info!(
        keyword = %spec.display_name,
        fetched,
        filtered,
        anomalies,
        actionable = batch.len(),
        "keyword polled"
    );
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::PriceChangePolicy;
    use crate::source::fixture::FixtureSource;

    fn l(title: &str, price: &str) -> Listing {
        Listing {
            title: title.into(),
            price: price.into(),
            url: format!("https://jp.mercari.com/item/{}", title.replace(' ', "_")),
            image_url: format!("https://static.mercdn.net/{}.jpg", title.replace(' ', "_")),
            listed_at: None,
        }
    }

    #[tokio::test]
    async fn duplicates_within_one_page_notify_once() {
        let spec = KeywordSpec::bare("ps3");
        let mut again = l("PS3 slim", "¥2,000");
        again.title = "ps3 SLIM".into();
        let src = FixtureSource::new(150.0)
            .with_listings("ps3", vec![l("PS3 slim", "¥2,000"), again]);
        let mut store = SeenStore::empty("unused.json");
        let c = Classifier::new(150.0, PriceChangePolicy::Any);

        let batch = poll(&spec, &src, &mut store, &c, Utc::now()).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn title_filter_drops_before_store() {
        let mut spec = KeywordSpec::bare("ps3");
        spec.title_must_contain = vec!["本体".into()];
        let src = FixtureSource::new(150.0)
            .with_listings("ps3", vec![l("PS3 本体", "¥5,000"), l("PS3 controller", "¥900")]);
        let mut store = SeenStore::empty("unused.json");
        let c = Classifier::new(150.0, PriceChangePolicy::Any);

        let batch = poll(&spec, &src, &mut store, &c, Utc::now()).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.items[0].listing.title, "PS3 本体");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn source_failure_is_tagged_with_keyword() {
        let spec = KeywordSpec::bare("ps4");
        let src = FixtureSource::new(150.0).with_failure("ps4");
        let mut store = SeenStore::empty("unused.json");
        let c = Classifier::new(150.0, PriceChangePolicy::Any);

        let err = poll(&spec, &src, &mut store, &c, Utc::now()).await.unwrap_err();
        assert_eq!(err.keyword(), "ps4");
        assert!(store.is_empty());
    }
}
