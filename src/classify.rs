// src/classify.rs
//! Classify a listing against the seen-item store.

use serde::{Deserialize, Serialize};

use crate::listing::{parse_price_yen, Listing, Signature};
use crate::store::SeenStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationKind {
    New,
    PriceChanged { previous: u64 },
    Unchanged,
}

impl ClassificationKind {
    pub fn is_actionable(&self) -> bool {
        !matches!(self, ClassificationKind::Unchanged)
    }
}

/// Which price differences count as worth a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceChangePolicy {
    /// Any difference from the last-known price.
    #[default]
    Any,
    /// Only re-listings cheaper than the last-known price.
    DropsOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub signature: Signature,
    pub kind: ClassificationKind,
    /// Parsed price in yen; `None` marks a classification anomaly.
    pub price: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
pub struct Classifier {
    pub usd_to_jpy: f64,
    pub policy: PriceChangePolicy,
}

impl Classifier {
    pub fn new(usd_to_jpy: f64, policy: PriceChangePolicy) -> Self {
        Self { usd_to_jpy, policy }
    }

    /// Pure read: the caller writes the updated record.
    pub fn classify(&self, listing: &Listing, store: &SeenStore) -> Classification {
        let signature = listing.signature();

        let Some(price) = parse_price_yen(&listing.price, self.usd_to_jpy) else {
            tracing::warn!(
                title = %listing.title,
                raw_price = %listing.price,
                "unparseable price, not notifying"
            );
            return Classification {
                signature,
                kind: ClassificationKind::Unchanged,
                price: None,
            };
        };

        let kind = match store.get(&signature) {
            None => ClassificationKind::New,
            Some(prev) if prev.last_price == price => ClassificationKind::Unchanged,
            Some(prev) => match self.policy {
                PriceChangePolicy::DropsOnly if price > prev.last_price => {
                    ClassificationKind::Unchanged
                }
                _ => ClassificationKind::PriceChanged {
                    previous: prev.last_price,
                },
            },
        };

        Classification {
            signature,
            kind,
            price: Some(price),
        }
    }
}
