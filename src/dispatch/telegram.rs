// src/dispatch/telegram.rs
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{SendOutcome, Transport};

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Telegram Bot API `sendMessage` transport (HTML parse mode).
#[derive(Clone)]
pub struct TelegramTransport {
    client: Client,
    api_base: String,
    token: String,
    chat_id: String,
    timeout: Duration,
}

impl TelegramTransport {
    pub fn new(token: String, chat_id: String) -> Self {
        Self {
            client: Client::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            token,
            chat_id,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    /// Point at a different Bot API server (local bot API, test doubles).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.token)
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize, Default)]
struct ApiResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

/// Map an HTTP status + Bot API body onto a delivery outcome.
fn classify_response(status: StatusCode, retry_header: Option<u64>, body: &str) -> SendOutcome {
    let parsed: ApiResponse = serde_json::from_str(body).unwrap_or_default();
    let reason = parsed
        .description
        .clone()
        .unwrap_or_else(|| format!("HTTP {status}"));

    if status == StatusCode::TOO_MANY_REQUESTS {
        let hint = parsed
            .parameters
            .and_then(|p| p.retry_after)
            .or(retry_header)
            .map(Duration::from_secs);
        return SendOutcome::RateLimited { retry_after: hint };
    }
    if status.is_server_error() {
        return SendOutcome::Transient(reason);
    }
    if status.is_success() {
        return if parsed.ok {
            SendOutcome::Delivered
        } else {
            SendOutcome::Fatal(reason)
        };
    }
    SendOutcome::Fatal(reason)
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send(&self, payload: &str) -> SendOutcome {
        let body = SendMessage {
            chat_id: &self.chat_id,
            text: payload,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };

        let rsp = match self
            .client
            .post(self.endpoint())
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
        {
            Ok(rsp) => rsp,
            // Never log the URL: it embeds the bot token.
            Err(e) => {
                return SendOutcome::Transient(format!(
                    "telegram request failed: {}",
                    e.without_url()
                ))
            }
        };

        let status = rsp.status();
        let retry_header = rsp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        let text = match rsp.text().await {
            Ok(t) => t,
            Err(e) if status.is_success() => {
                tracing::debug!(error = %e.without_url(), "telegram body unreadable after 2xx");
                return SendOutcome::Delivered;
            }
            Err(e) => {
                tracing::debug!(error = %e.without_url(), %status, "telegram error body unreadable");
                String::new()
            }
        };
        classify_response(status, retry_header, &text)
    }

    fn name(&self) -> &'static str {
        "telegram"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_prefers_body_hint() {
        let body = r#"{"ok":false,"error_code":429,"description":"Too Many Requests: retry after 7","parameters":{"retry_after":7}}"#;
        assert_eq!(
            classify_response(StatusCode::TOO_MANY_REQUESTS, Some(3), body),
            SendOutcome::RateLimited {
                retry_after: Some(Duration::from_secs(7))
            }
        );
        assert_eq!(
            classify_response(StatusCode::TOO_MANY_REQUESTS, Some(3), ""),
            SendOutcome::RateLimited {
                retry_after: Some(Duration::from_secs(3))
            }
        );
    }

    #[test]
    fn bad_request_is_fatal_and_5xx_transient() {
        let body = r#"{"ok":false,"error_code":400,"description":"Bad Request: can't parse entities"}"#;
        assert_eq!(
            classify_response(StatusCode::BAD_REQUEST, None, body),
            SendOutcome::Fatal("Bad Request: can't parse entities".into())
        );
        assert!(matches!(
            classify_response(StatusCode::BAD_GATEWAY, None, ""),
            SendOutcome::Transient(_)
        ));
        assert_eq!(
            classify_response(StatusCode::OK, None, r#"{"ok":true,"result":{}}"#),
            SendOutcome::Delivered
        );
    }
}
