// src/summary.rs
//! Daily activity summary: per-keyword counters plus a cooperative trigger
//! that the orchestrator checks once per cycle.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use html_escape::encode_text;
use std::collections::HashMap;

use crate::dispatch::Dispatcher;

/// Notifications delivered per keyword display name since the last summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DailyCounter {
    counts: HashMap<String, u64>,
}

impl DailyCounter {
    pub fn add(&mut self, display_name: &str, n: u64) {
        if n == 0 {
            return;
        }
        *self.counts.entry(display_name.to_string()).or_insert(0) += n;
    }

    pub fn get(&self, display_name: &str) -> u64 {
        self.counts.get(display_name).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.counts.values().all(|&c| c == 0)
    }

    pub fn clear(&mut self) {
        self.counts.clear();
    }

    /// Non-zero counts, configured keywords first in their order, then any
    /// other names alphabetically.
    pub fn ordered(&self, order: &[String]) -> Vec<(String, u64)> {
        let mut out: Vec<(String, u64)> = order
            .iter()
            .filter_map(|name| {
                let c = self.get(name);
                (c > 0).then(|| (name.clone(), c))
            })
            .collect();
        let mut rest: Vec<(String, u64)> = self
            .counts
            .iter()
            .filter(|(name, c)| **c > 0 && !order.contains(*name))
            .map(|(name, &c)| (name.clone(), c))
            .collect();
        rest.sort();
        out.extend(rest);
        out
    }
}

/// True when a `trigger` wall-clock time lies in `(last_check, now]`.
pub fn trigger_crossed(last_check: NaiveDateTime, now: NaiveDateTime, trigger: NaiveTime) -> bool {
    if now <= last_check {
        return false;
    }
    let today = now.date().and_time(trigger);
    let latest = if today <= now {
        today
    } else {
        today - Duration::days(1)
    };
    latest > last_check
}

pub fn render_summary(date: NaiveDate, counter: &DailyCounter, order: &[String]) -> String {
    let mut lines = vec![format!("📊 <b>Mercari summary</b> {date}"), String::new()];
    let rows = counter.ordered(order);
    if rows.is_empty() {
        lines.push("No activity recorded today.".to_string());
    } else {
        for (name, count) in rows {
            let plural = if count == 1 { "" } else { "s" };
            lines.push(format!("• {}: {count} new item{plural}", encode_text(&name)));
        }
    }
    lines.join("\n")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryOutcome {
    NotDue,
    Sent,
    /// Counts kept; retried at the next check.
    Failed,
}

#[derive(Debug, Clone)]
pub struct DailySummary {
    trigger: NaiveTime,
    last_check: NaiveDateTime,
    /// Date of a summary that is owed but not yet delivered.
    pending: Option<NaiveDate>,
}

impl DailySummary {
    pub fn new(trigger: NaiveTime, started_at: NaiveDateTime) -> Self {
        Self {
            trigger,
            last_check: started_at,
            pending: None,
        }
    }

    /// Advance the check clock to `now`; true when a summary is owed.
    pub fn poll_due(&mut self, now: NaiveDateTime) -> bool {
        if trigger_crossed(self.last_check, now, self.trigger) {
            self.pending = Some(now.date());
        }
        if now > self.last_check {
            self.last_check = now;
        }
        self.pending.is_some()
    }

    pub async fn run_due(
        &mut self,
        now: NaiveDateTime,
        counter: &mut DailyCounter,
        order: &[String],
        dispatcher: &Dispatcher,
    ) -> SummaryOutcome {
        if !self.poll_due(now) {
            return SummaryOutcome::NotDue;
        }
        let date = self.pending.unwrap_or_else(|| now.date());
        let text = render_summary(date, counter, order);

        match dispatcher.dispatch(&text).await {
            Ok(_) => {
                counter.clear();
                self.pending = None;
                tracing::info!(%date, "daily summary sent, counters cleared");
                SummaryOutcome::Sent
            }
            Err(e) => {
                tracing::warn!(%date, error = %e, "daily summary not delivered, will retry next cycle");
                SummaryOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, d)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn noon_thirty() -> NaiveTime {
        NaiveTime::from_hms_opt(12, 30, 0).unwrap()
    }

    #[test]
    fn crossing_is_half_open() {
        let t = noon_thirty();
        assert!(!trigger_crossed(at(1, 12, 0), at(1, 12, 29), t));
        assert!(trigger_crossed(at(1, 12, 29), at(1, 12, 30), t));
        assert!(!trigger_crossed(at(1, 12, 30), at(1, 12, 45), t));
        // overnight gap spanning the trigger of the next day
        assert!(trigger_crossed(at(1, 13, 0), at(2, 12, 31), t));
        assert!(!trigger_crossed(at(1, 13, 0), at(2, 9, 0), t));
    }

    #[test]
    fn poll_due_fires_once_per_day() {
        let mut s = DailySummary::new(noon_thirty(), at(1, 8, 0));
        assert!(!s.poll_due(at(1, 12, 0)));
        assert!(s.poll_due(at(1, 12, 31)));
        s.pending = None;
        assert!(!s.poll_due(at(1, 18, 0)));
        assert!(s.poll_due(at(2, 12, 30)));
    }

    #[test]
    fn render_omits_zero_and_reports_no_activity() {
        let order = vec!["ps3".to_string(), "ps4".to_string()];
        let mut c = DailyCounter::default();
        let date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        assert!(render_summary(date, &c, &order).contains("No activity recorded today."));

        c.add("ps3", 3);
        c.add("ps4", 0);
        let text = render_summary(date, &c, &order);
        assert!(text.contains("• ps3: 3 new items"));
        assert!(!text.contains("ps4"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_summary_keeps_counts_for_retry() {
        use crate::dispatch::local::ScriptedTransport;
        use crate::dispatch::{DispatchPolicy, SendOutcome};
        use std::sync::Arc;

        let transport = Arc::new(ScriptedTransport::with_script([SendOutcome::Fatal(
            "chat not found".into(),
        )]));
        let dispatcher = Dispatcher::new(transport.clone(), DispatchPolicy::default());
        let order = vec!["ps3".to_string()];
        let mut counter = DailyCounter::default();
        counter.add("ps3", 2);

        let mut s = DailySummary::new(noon_thirty(), at(1, 12, 0));
        let first = s.run_due(at(1, 12, 31), &mut counter, &order, &dispatcher).await;
        assert_eq!(first, SummaryOutcome::Failed);
        assert_eq!(counter.get("ps3"), 2);

        let retry = s.run_due(at(1, 12, 32), &mut counter, &order, &dispatcher).await;
        assert_eq!(retry, SummaryOutcome::Sent);
        assert!(counter.is_empty());
        assert!(transport.payloads()[1].contains("2025-06-01"));
    }
}
