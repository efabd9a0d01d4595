// src/fx.rs
//! USD→JPY rate for listings priced in dollars. Looked up once at startup.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::listing::FALLBACK_USD_TO_JPY;

#[derive(Debug, Deserialize)]
struct RatesResponse {
    rates: Rates,
}

#[derive(Debug, Deserialize)]
struct Rates {
    #[serde(rename = "JPY")]
    jpy: f64,
}

fn parse_rate(body: &str) -> Result<f64> {
    let r: RatesResponse = serde_json::from_str(body).context("parse exchange rate JSON")?;
    if !r.rates.jpy.is_finite() || r.rates.jpy <= 0.0 {
        anyhow::bail!("exchange rate out of range: {}", r.rates.jpy);
    }
    Ok(r.rates.jpy)
}

async fn fetch_rate(endpoint: &str) -> Result<f64> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .context("build exchange rate client")?;
    let body = client
        .get(endpoint)
        .send()
        .await
        .context("fetch exchange rate")?
        .error_for_status()
        .context("exchange rate non-2xx")?
        .text()
        .await
        .context("read exchange rate body")?;
    parse_rate(&body)
}

/// Configured override, else live rate, else the fallback. Never fails.
pub async fn resolve_usd_to_jpy(override_rate: Option<f64>, endpoint: &str) -> f64 {
    if let Some(rate) = override_rate {
        tracing::info!(rate, "using configured USD to JPY rate");
        return rate;
    }
    match fetch_rate(endpoint).await {
        Ok(rate) => {
            tracing::info!(rate, "fetched USD to JPY rate");
            rate
        }
        Err(e) => {
            tracing::warn!(error = ?e, fallback = FALLBACK_USD_TO_JPY, "exchange rate lookup failed, using fallback");
            FALLBACK_USD_TO_JPY
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_open_er_api_shape() {
        let body = r#"{"result":"success","base_code":"USD","rates":{"USD":1,"JPY":151.23}}"#;
        assert_eq!(parse_rate(body).unwrap(), 151.23);
        assert!(parse_rate(r#"{"rates":{"JPY":0}}"#).is_err());
        assert!(parse_rate("not json").is_err());
    }

    #[tokio::test]
    async fn override_skips_lookup() {
        assert_eq!(resolve_usd_to_jpy(Some(140.0), "http://127.0.0.1:1/never").await, 140.0);
    }
}
