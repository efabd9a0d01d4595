// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod aggregate;
pub mod classify;
pub mod config;
pub mod dispatch;
pub mod fx;
pub mod listing;
pub mod metrics;
pub mod orchestrator;
pub mod poller;
pub mod source;
pub mod store;
pub mod summary;

// ---- Re-exports for stable public API ----
pub use crate::aggregate::{aggregate, OutgoingMessage};
pub use crate::classify::{Classification, ClassificationKind, Classifier, PriceChangePolicy};
pub use crate::config::{KeywordSpec, Settings};
pub use crate::dispatch::{DispatchError, DispatchPolicy, Dispatcher, SendOutcome, Transport};
pub use crate::listing::{Listing, Signature};
pub use crate::orchestrator::{CycleReport, CycleSettings, Orchestrator, OrchestratorParts};
pub use crate::poller::{poll, NotificationBatch};
pub use crate::source::{ListingSource, SearchQuery, SessionFactory};
pub use crate::store::SeenStore;
pub use crate::summary::{DailyCounter, DailySummary};
