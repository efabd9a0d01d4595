// src/orchestrator.rs
//! The cycle loop: every keyword in configured order goes through
//! poll → aggregate → dispatch, then the store is checkpointed, the daily
//! summary gets its chance, and the source session is recycled every N cycles.
//!
//! Everything runs on one task. A stop request is only looked at while
//! sleeping, so a message that is being retried is always finished first.

use chrono::{DateTime, Local, NaiveDateTime, Utc};
use html_escape::encode_text;
use metrics::{counter, gauge};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::aggregate::aggregate;
use crate::classify::Classifier;
use crate::config::{KeywordSpec, Settings};
use crate::dispatch::Dispatcher;
use crate::poller::{self, NotificationBatch};
use crate::source::{ListingSource, SessionFactory};
use crate::store::{SeenStore, StoreError};
use crate::summary::{DailyCounter, DailySummary, SummaryOutcome};

/// Consecutive failed checkpoints before the chat is told about it.
const FLUSH_ALERT_AFTER: u32 = 3;
/// Retry budget for best-effort notices (stop, errors) so exit is not held up.
const NOTICE_BUDGET: Duration = Duration::from_secs(30);

pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
    /// Wall-clock time the daily trigger is compared against.
    fn now_local(&self) -> NaiveDateTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn now_local(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CycleSettings {
    pub keyword_delay: Duration,
    pub cycle_delay: Duration,
    /// 0 disables session recycling.
    pub cycles_before_restart: u32,
    pub max_seen_items: usize,
    pub max_message_chars: usize,
}

impl From<&Settings> for CycleSettings {
    fn from(s: &Settings) -> Self {
        Self {
            keyword_delay: s.keyword_delay,
            cycle_delay: s.cycle_delay,
            cycles_before_restart: s.cycles_before_restart,
            max_seen_items: s.max_seen_items,
            max_message_chars: s.max_message_chars,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle: u64,
    pub keywords_polled: usize,
    pub failed_keywords: Vec<String>,
    /// Listings in messages the transport accepted.
    pub notified: u64,
    pub failed_messages: usize,
    pub evicted: usize,
    pub flushed: bool,
    pub summary: SummaryOutcome,
    pub recycled: bool,
    /// A stop request cut the cycle short.
    pub stopped: bool,
}

impl CycleReport {
    fn new(cycle: u64) -> Self {
        Self {
            cycle,
            keywords_polled: 0,
            failed_keywords: Vec::new(),
            notified: 0,
            failed_messages: 0,
            evicted: 0,
            flushed: false,
            summary: SummaryOutcome::NotDue,
            recycled: false,
            stopped: false,
        }
    }
}

/// Send a notice, giving up on retries that would run past `budget`.
/// A transport call that has started is never cut short.
pub async fn notify_best_effort(dispatcher: &Dispatcher, text: &str, budget: Duration) -> bool {
    match dispatcher.dispatch_within(text, budget).await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(error = %e, budget_secs = budget.as_secs(), "best-effort notice not delivered");
            false
        }
    }
}

/// Tell the chat about a fatal condition before the host exits.
pub async fn report_fatal(dispatcher: &Dispatcher, err: &anyhow::Error) {
    let text = format!("❗️ Mercari watcher error: {}", encode_text(&format!("{err:#}")));
    notify_best_effort(dispatcher, &text, NOTICE_BUDGET).await;
}

pub struct Orchestrator {
    keywords: Vec<KeywordSpec>,
    names: Vec<String>,
    settings: CycleSettings,
    store: SeenStore,
    classifier: Classifier,
    factory: Box<dyn SessionFactory>,
    session: Box<dyn ListingSource>,
    dispatcher: Arc<Dispatcher>,
    counter: DailyCounter,
    summary: DailySummary,
    clock: Arc<dyn Clock>,
    stop: watch::Receiver<bool>,
    cycles: u64,
    flush_failures: u32,
}

pub struct OrchestratorParts {
    pub keywords: Vec<KeywordSpec>,
    pub settings: CycleSettings,
    pub store: SeenStore,
    pub classifier: Classifier,
    pub factory: Box<dyn SessionFactory>,
    pub dispatcher: Arc<Dispatcher>,
    pub summary: DailySummary,
    pub clock: Arc<dyn Clock>,
    pub stop: watch::Receiver<bool>,
}

impl Orchestrator {
    /// Open the first source session. Failing here is fatal for the host.
    pub async fn start(parts: OrchestratorParts) -> anyhow::Result<Self> {
        let session = parts.factory.open().await?;
        let names = parts.keywords.iter().map(|k| k.display_name.clone()).collect();
        Ok(Self {
            keywords: parts.keywords,
            names,
            settings: parts.settings,
            store: parts.store,
            classifier: parts.classifier,
            factory: parts.factory,
            session,
            dispatcher: parts.dispatcher,
            counter: DailyCounter::default(),
            summary: parts.summary,
            clock: parts.clock,
            stop: parts.stop,
            cycles: 0,
            flush_failures: 0,
        })
    }

    pub fn store(&self) -> &SeenStore {
        &self.store
    }

    pub fn counter(&self) -> &DailyCounter {
        &self.counter
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub async fn run_one_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::new(self.cycles + 1);
        let total = self.keywords.len();

        for idx in 0..total {
            let batch = self.poll_keyword(idx, &mut report).await;
            self.deliver(&batch, &mut report).await;
            report.keywords_polled += 1;

            if idx + 1 < total && self.pause(self.settings.keyword_delay).await {
                report.stopped = true;
                break;
            }
        }

        report.evicted = self.store.trim(self.settings.max_seen_items);
        gauge!("watch_store_records").set(self.store.len() as f64);
        report.flushed = self.checkpoint().await;

        report.summary = self
            .summary
            .run_due(
                self.clock.now_local(),
                &mut self.counter,
                &self.names,
                &self.dispatcher,
            )
            .await;

        self.cycles += 1;
        counter!("watch_cycles_total").increment(1);

        let every = u64::from(self.settings.cycles_before_restart);
        if every > 0 && self.cycles % every == 0 {
            report.recycled = self.recycle_session().await;
        }

        tracing::info!(
            cycle = report.cycle,
            polled = report.keywords_polled,
            failed = report.failed_keywords.len(),
            notified = report.notified,
            failed_messages = report.failed_messages,
            evicted = report.evicted,
            flushed = report.flushed,
            "cycle finished"
        );
        report
    }

    /// Loop cycles until a stop request arrives at a sleep boundary.
    pub async fn run(&mut self) {
        loop {
            let report = self.run_one_cycle().await;
            if report.stopped {
                break;
            }
            tracing::info!(delay_secs = self.settings.cycle_delay.as_secs(), "waiting for next cycle");
            if self.pause(self.settings.cycle_delay).await {
                break;
            }
        }
        tracing::info!(cycles = self.cycles, "stop requested, leaving cycle loop");
    }

    /// Final checkpoint plus a best-effort "stopped" notice.
    pub async fn shutdown(&mut self) -> Result<(), StoreError> {
        let flushed = self.store.flush();
        match &flushed {
            Ok(()) => tracing::info!(records = self.store.len(), "seen items saved"),
            Err(e) => tracing::error!(error = %e, "final seen-items flush failed"),
        }
        notify_best_effort(&self.dispatcher, "🔴 Mercari watcher has stopped.", NOTICE_BUDGET)
            .await;
        flushed
    }

    async fn poll_keyword(&mut self, idx: usize, report: &mut CycleReport) -> NotificationBatch {
        let spec = &self.keywords[idx];
        let now = self.clock.now_utc();
        tracing::info!(keyword = %spec.display_name, term = %spec.search_term, "polling keyword");

        match poller::poll(
            spec,
            self.session.as_ref(),
            &mut self.store,
            &self.classifier,
            now,
        )
        .await
        {
            Ok(batch) => batch,
            Err(e) => {
                counter!("watch_source_errors_total").increment(1);
                tracing::warn!(keyword = e.keyword(), error = %e, "keyword skipped this cycle");
                report.failed_keywords.push(e.keyword().to_string());
                NotificationBatch::empty(&spec.display_name)
            }
        }
    }

    async fn deliver(&mut self, batch: &NotificationBatch, report: &mut CycleReport) {
        if batch.is_empty() {
            tracing::debug!(keyword = %batch.display_name, "nothing new");
            return;
        }
        tracing::info!(keyword = %batch.display_name, items = batch.len(), "sending listings");

        for msg in aggregate(batch, self.settings.max_message_chars) {
            match self.dispatcher.dispatch(&msg.text).await {
                Ok(ack) => {
                    let n = msg.items as u64;
                    self.counter.add(&batch.display_name, n);
                    report.notified += n;
                    counter!("watch_notifications_sent_total").increment(n);
                    tracing::debug!(keyword = %batch.display_name, items = n, attempts = ack.attempts, "message delivered");
                }
                Err(e) => {
                    report.failed_messages += 1;
                    tracing::warn!(keyword = %batch.display_name, items = msg.items, error = %e, "message dropped");
                }
            }
        }
    }

    async fn checkpoint(&mut self) -> bool {
        match self.store.flush() {
            Ok(()) => {
                if self.flush_failures > 0 {
                    tracing::info!(after = self.flush_failures, "seen-items flush recovered");
                }
                self.flush_failures = 0;
                true
            }
            Err(e) => {
                self.flush_failures += 1;
                counter!("watch_store_flush_failures_total").increment(1);
                tracing::error!(
                    error = %e,
                    consecutive = self.flush_failures,
                    "seen-items flush failed; a crash before the next successful flush will re-send items"
                );
                if self.flush_failures == FLUSH_ALERT_AFTER {
                    let text = format!(
                        "⚠️ Mercari watcher cannot save its state ({} failures in a row): {}",
                        self.flush_failures,
                        encode_text(&e.to_string())
                    );
                    notify_best_effort(&self.dispatcher, &text, NOTICE_BUDGET).await;
                }
                false
            }
        }
    }

    /// Replace the source session; the old one is kept if a new one can't be opened.
    async fn recycle_session(&mut self) -> bool {
        match self.factory.open().await {
            Ok(fresh) => {
                self.session = fresh;
                tracing::info!(cycles = self.cycles, "source session recycled");
                true
            }
            Err(e) => {
                tracing::error!(error = ?e, "source session recycle failed, keeping current session");
                false
            }
        }
    }

    /// Sleep for `d`; returns true as soon as a stop is requested.
    async fn pause(&mut self, d: Duration) -> bool {
        let deadline = Instant::now() + d;
        loop {
            if *self.stop.borrow_and_update() {
                return true;
            }
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return *self.stop.borrow(),
                changed = self.stop.changed() => {
                    if changed.is_err() {
                        // Sender gone: nobody can ask us to stop any more.
                        tokio::time::sleep_until(deadline).await;
                        return false;
                    }
                }
            }
        }
    }
}
