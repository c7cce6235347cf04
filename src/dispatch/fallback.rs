//! Filler content for directed messages nobody claimed.

use crate::error::{PluginError, Result};

use async_trait::async_trait;

/// Apology prepended to every fallback reply.
pub const APOLOGY: &str =
    "Sorry, I don't understand what you are trying to do, but here's a quote to hold you over:";

/// Supplies a short text payload on demand.
#[async_trait]
pub trait FallbackSource: Send + Sync {
    async fn fetch(&self) -> Result<String>;
}

/// Fetches a quote from a JSON endpoint.
#[derive(Debug, Clone)]
pub struct QuoteSource {
    http: reqwest::Client,
    url: String,
}

impl QuoteSource {
    pub fn new(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }
}

#[async_trait]
impl FallbackSource for QuoteSource {
    async fn fetch(&self) -> Result<String> {
        let request_error = |source| PluginError::Request {
            plugin: "fallback".into(),
            source,
        };

        let body = self
            .http
            .get(&self.url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(request_error)?
            .text()
            .await
            .map_err(request_error)?;

        Ok(extract_quote(&body))
    }
}

/// Pull the quote text out of a response body.
///
/// Understands `{"value": {"joke": ...}}` as well as flat `quote`/`content`
/// fields, and otherwise uses the body as-is.
fn extract_quote(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.trim().to_string();
    };

    value
        .pointer("/value/joke")
        .or_else(|| value.get("quote"))
        .or_else(|| value.get("content"))
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string())
}

/// Render the fallback reply. Without a quote only the apology goes out.
pub fn fallback_text(quote: Option<&str>) -> String {
    match quote {
        Some(quote) if !quote.trim().is_empty() => format!("{APOLOGY}\n>{quote}"),
        _ => APOLOGY.to_string(),
    }
}
