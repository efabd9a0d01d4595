// src/aggregate.rs
//! Turn a keyword's batch into Telegram-sized HTML messages.
//!
//! One header, one line per item, items in batch order. When the text would
//! not fit in one message it is split between lines (never inside one), and
//! every follow-on message repeats the header marked "(continued)".

use html_escape::{encode_double_quoted_attribute, encode_text};

use crate::classify::ClassificationKind;
use crate::listing::format_yen;
use crate::poller::{BatchItem, NotificationBatch};

/// Telegram's `sendMessage` text limit.
pub const TELEGRAM_MAX_CHARS: usize = 4096;
/// Smallest limit the settings accept.
pub const MIN_MESSAGE_CHARS: usize = 512;
/// Display names longer than this are cut in headers.
const MAX_NAME_CHARS: usize = 48;
/// Room kept for item lines under a header; fits a bare "¥… (was ¥…)".
const MIN_LINE_CHARS: usize = 24;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub text: String,
    /// Listings carried by this message, for the daily counter.
    pub items: usize,
}

/// Every message stays within `max_chars` as long as a header with an empty
/// name still fits.
pub fn aggregate(batch: &NotificationBatch, max_chars: usize) -> Vec<OutgoingMessage> {
    if batch.is_empty() {
        return Vec::new();
    }

    let (first_header, cont_header) = fit_headers(&batch.display_name, batch.len(), max_chars);
    let header_chars = char_len(&first_header).max(char_len(&cont_header));
    let line_budget = max_chars.saturating_sub(header_chars + 1);

    let mut out = Vec::new();
    let mut text = first_header;
    let mut len = char_len(&text);
    let mut count = 0usize;

    for item in &batch.items {
        let line = render_line(item, line_budget);
        let line_len = char_len(&line);
        if count > 0 && len + 1 + line_len > max_chars {
            out.push(OutgoingMessage { text, items: count });
            text = cont_header.clone();
            len = char_len(&text);
            count = 0;
        }
        text.push('\n');
        text.push_str(&line);
        len += 1 + line_len;
        count += 1;
    }
    out.push(OutgoingMessage { text, items: count });
    out
}

fn header(escaped_name: &str, n: usize) -> String {
    let plural = if n == 1 { "" } else { "s" };
    format!("🔍 <b>{escaped_name}</b>: {n} new listing{plural}")
}

/// First and "(continued)" headers, the name cut until both leave
/// `MIN_LINE_CHARS` for item lines.
fn fit_headers(display_name: &str, n: usize, max_chars: usize) -> (String, String) {
    let mut keep = display_name.chars().count().min(MAX_NAME_CHARS);
    loop {
        let short: String = display_name.chars().take(keep).collect();
        let name = encode_text(&short);
        let first = header(&name, n);
        let cont = format!("🔍 <b>{name}</b> (continued)");
        let widest = char_len(&first).max(char_len(&cont));
        if keep == 0 || widest + 1 + MIN_LINE_CHARS <= max_chars {
            return (first, cont);
        }
        keep -= 1;
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Render one item, shortening its title until the line fits `budget`.
fn render_line(item: &BatchItem, budget: usize) -> String {
    let mut title: String = item.listing.title.clone();
    loop {
        let line = format_line(item, &title);
        let len = char_len(&line);
        if len <= budget {
            return line;
        }
        let title_len = char_len(&title);
        if title_len <= 1 {
            // Not even the link fits; fall back to the bare price.
            return price_part(item).chars().take(budget).collect();
        }
        let keep = title_len.saturating_sub(len - budget).saturating_sub(1);
        title = title.chars().take(keep.min(title_len - 1)).collect();
        title.push('…');
        if keep == 0 {
            title = "…".to_string();
        }
    }
}

fn format_line(item: &BatchItem, title: &str) -> String {
    format!(
        "• <a href=\"{}\">{}</a> {}",
        encode_double_quoted_attribute(&item.listing.url),
        encode_text(title),
        price_part(item)
    )
}

fn price_part(item: &BatchItem) -> String {
    match item.kind {
        ClassificationKind::PriceChanged { previous } => {
            format!("{} (was {})", format_yen(item.price), format_yen(previous))
        }
        _ => format_yen(item.price),
    }
}
