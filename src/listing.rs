// src/listing.rs
//! Listing model, stable signatures and price parsing.
//!
//! A listing is whatever the marketplace returned for one search hit. Its
//! signature (lower-cased title + image reference, hashed) is the identity the
//! seen-item store is keyed by, so two hits with the same signature are treated
//! as the same real-world item even if their URLs differ.

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Rate used when the live USD→JPY lookup fails.
pub const FALLBACK_USD_TO_JPY: f64 = 145.0;

/// A single marketplace item returned by a search. Immutable once returned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Listing {
    pub title: String,
    /// Raw price text as shown by the marketplace, e.g. `¥12,345` or `US$ 80`.
    pub price: String,
    pub url: String,
    pub image_url: String,
    #[serde(default)]
    pub listed_at: Option<DateTime<Utc>>,
}

impl Listing {
    pub fn signature(&self) -> Signature {
        Signature::of(&self.title, &self.image_url)
    }
}

/// Deterministic identity key derived from a listing's stable fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(String);

impl Signature {
    pub fn of(title: &str, image_url: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(title.to_lowercase().as_bytes());
        hasher.update(image_url.as_bytes());
        let digest = hasher.finalize();
        let mut out = String::with_capacity(32);
        for b in digest.iter().take(16) {
            use std::fmt::Write as _;
            let _ = write!(&mut out, "{:02x}", b);
        }
        Self(out)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Signature {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse a raw price text into whole yen.
///
/// Accepts `¥12,345`, `US$ 80`, `$80` anywhere in the text, or a bare number
/// (taken as yen). Dollar amounts are converted with `usd_to_jpy`. Returns
/// `None` when no price is found or the amount is zero.
pub fn parse_price_yen(text: &str, usd_to_jpy: f64) -> Option<u64> {
    static RE_PRICE: OnceCell<Regex> = OnceCell::new();
    static RE_BARE: OnceCell<Regex> = OnceCell::new();
    let re_price =
        RE_PRICE.get_or_init(|| Regex::new(r"(¥|￥|US\$|\$)\s*([\d,]+)").expect("price regex"));
    let re_bare = RE_BARE.get_or_init(|| Regex::new(r"^\s*([\d,]+)\s*$").expect("bare regex"));

    let (symbol, amount) = if let Some(caps) = re_price.captures(text) {
        (caps.get(1)?.as_str(), caps.get(2)?.as_str())
    } else {
        ("¥", re_bare.captures(text)?.get(1)?.as_str())
    };

    let amount: u64 = amount.replace(',', "").parse().ok()?;
    let yen = match symbol {
        "US$" | "$" => (amount as f64 * usd_to_jpy) as u64,
        _ => amount,
    };
    (yen > 0).then_some(yen)
}

/// Render yen the way the marketplace's Japanese storefront does: `¥12.345`.
pub fn format_yen(yen: u64) -> String {
    let digits = yen.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    out.push('¥');
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push('.');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_ignores_title_case_but_not_image() {
        let a = Signature::of("PS3 Slim 120GB", "https://img/1.jpg");
        let b = Signature::of("ps3 slim 120gb", "https://img/1.jpg");
        let c = Signature::of("ps3 slim 120gb", "https://img/2.jpg");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn parses_yen_dollars_and_bare_numbers() {
        assert_eq!(parse_price_yen("PS3 本体\n¥12,345", 150.0), Some(12_345));
        assert_eq!(parse_price_yen("US$ 20", 150.0), Some(3_000));
        assert_eq!(parse_price_yen("$7", 145.0), Some(1_015));
        assert_eq!(parse_price_yen("2000", 150.0), Some(2_000));
    }

    #[test]
    fn rejects_missing_or_zero_price() {
        assert_eq!(parse_price_yen("SOLD", 150.0), None);
        assert_eq!(parse_price_yen("¥0", 150.0), None);
        assert_eq!(parse_price_yen("", 150.0), None);
    }

    #[test]
    fn formats_with_dot_grouping() {
        assert_eq!(format_yen(999), "¥999");
        assert_eq!(format_yen(1_000), "¥1.000");
        assert_eq!(format_yen(1_234_567), "¥1.234.567");
    }
}
