// src/config/keywords.rs
//! Keyword entries as written in the settings file, normalized once into
//! [`KeywordSpec`] before anything in the pipeline sees them.

use serde::Deserialize;
use std::collections::{BTreeSet, HashSet};

use super::ConfigError;

/// One search the watcher runs every cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordSpec {
    /// Unique, user-facing name used in messages and the daily summary.
    pub display_name: String,
    pub search_term: String,
    pub price_min: Option<u64>,
    pub price_max: Option<u64>,
    /// Lower-cased substrings; a title must contain at least one of them.
    pub title_must_contain: Vec<String>,
}

impl KeywordSpec {
    /// Bare keyword: searched as-is and displayed under the same name.
    pub fn bare(term: &str) -> Self {
        Self {
            display_name: term.to_string(),
            search_term: term.to_string(),
            price_min: None,
            price_max: None,
            title_must_contain: Vec::new(),
        }
    }

    /// Case-insensitive OR filter; an empty filter lets every title through.
    pub fn title_matches(&self, title: &str) -> bool {
        if self.title_must_contain.is_empty() {
            return true;
        }
        let lower = title.to_lowercase();
        self.title_must_contain.iter().any(|s| lower.contains(s.as_str()))
    }
}

/// Settings-file shape: either `"ps3"` or a table with bounds and filters.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum KeywordEntry {
    Term(String),
    Detailed(DetailedKeyword),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetailedKeyword {
    #[serde(alias = "search_term")]
    pub term: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub price_min: Option<u64>,
    #[serde(default)]
    pub price_max: Option<u64>,
    #[serde(default)]
    pub title_must_contain: Vec<String>,
}

impl KeywordEntry {
    pub fn into_spec(self) -> Result<KeywordSpec, ConfigError> {
        match self {
            KeywordEntry::Term(term) => {
                let term = term.trim();
                if term.is_empty() {
                    return Err(ConfigError::InvalidKeyword {
                        keyword: String::new(),
                        reason: "empty search term".into(),
                    });
                }
                Ok(KeywordSpec::bare(term))
            }
            KeywordEntry::Detailed(d) => {
                let term = d.term.trim().to_string();
                let display_name = d
                    .display_name
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| term.clone());
                if term.is_empty() {
                    return Err(ConfigError::InvalidKeyword {
                        keyword: display_name,
                        reason: "empty search term".into(),
                    });
                }
                if let (Some(lo), Some(hi)) = (d.price_min, d.price_max) {
                    if lo > hi {
                        return Err(ConfigError::InvalidKeyword {
                            keyword: display_name,
                            reason: format!("price_min {lo} is above price_max {hi}"),
                        });
                    }
                }
                let must: BTreeSet<String> = d
                    .title_must_contain
                    .iter()
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect();
                Ok(KeywordSpec {
                    display_name,
                    search_term: term,
                    price_min: d.price_min,
                    price_max: d.price_max,
                    title_must_contain: must.into_iter().collect(),
                })
            }
        }
    }
}

/// Normalize all entries, keeping configured order. Display names must be unique.
pub fn normalize_keywords(entries: Vec<KeywordEntry>) -> Result<Vec<KeywordSpec>, ConfigError> {
    if entries.is_empty() {
        return Err(ConfigError::NoKeywords);
    }
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(entries.len());
    for e in entries {
        let spec = e.into_spec()?;
        if !seen.insert(spec.display_name.clone()) {
            return Err(ConfigError::DuplicateKeyword(spec.display_name));
        }
        out.push(spec);
    }
    Ok(out)
}
