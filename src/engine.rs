//! The seam between the capture orchestrator and whatever actually loads,
//! lays out and rasterizes the page.
//!
//! An engine exposes blocking-free async calls for the orchestrator and
//! pushes page lifecycle events into an unbounded channel in the order it
//! observes them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::config::OpenOptions;
use crate::error::EngineError;

/// Engine-assigned resource identifier, unique per page load.
pub type ResourceId = String;

pub type EventSender = mpsc::UnboundedSender<PageEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<PageEvent>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestMeta {
    pub method: String,
    pub url: String,
    pub time: DateTime<Utc>,
    pub headers: Vec<Header>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplyMeta {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<Header>,
    pub content_type: Option<String>,
    pub body_size: Option<i64>,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStage {
    Start,
    End,
}

/// Lifecycle events in the order the engine saw them.
#[derive(Debug, Clone, PartialEq)]
pub enum PageEvent {
    LoadStarted {
        at: DateTime<Utc>,
    },
    ResourceRequested {
        id: ResourceId,
        request: RequestMeta,
    },
    /// A reply stage. `stage: None` is terminal, for engines that report a
    /// finished resource without naming the stage.
    ResourceReply {
        id: ResourceId,
        stage: Option<ReplyStage>,
        reply: Option<ReplyMeta>,
    },
    ResourceError {
        url: String,
        error: String,
    },
    PageError {
        message: String,
    },
    LoadFinished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Success,
    Fail,
}

/// A pixel rectangle in page coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ClipRect {
    pub top: f64,
    pub left: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    #[serde(default, rename = "httpOnly")]
    pub http_only: bool,
    #[serde(default)]
    pub expires: Option<f64>,
}

#[async_trait]
pub trait Engine: Send + Sync {
    /// Opens `address` and resolves once the engine reports the outcome.
    async fn open(&self, address: &str, options: &OpenOptions) -> Result<LoadStatus, EngineError>;

    /// Evaluates `script` in the page context.
    async fn evaluate(&self, script: &str) -> Result<Value, EngineError>;

    async fn set_viewport(&self, width: u32, height: u32) -> Result<(), EngineError>;

    async fn scroll_to(&self, top: f64, left: f64) -> Result<(), EngineError>;

    /// PNG bytes for `clip`, or for the whole page when `clip` is `None`.
    async fn render_region(&self, clip: Option<ClipRect>) -> Result<Vec<u8>, EngineError>;

    /// The serialized DOM as it stands now.
    async fn content(&self) -> Result<String, EngineError>;

    /// The resolved URL after redirects.
    async fn url(&self) -> Result<String, EngineError>;

    async fn cookies(&self) -> Result<Vec<Cookie>, EngineError>;
}

/// Evaluates `script` and deserializes the result.
///
/// Scripts return `JSON.stringify(..)` output so that structured values
/// survive engines that only hand back primitives; engines that already
/// return structured values work too.
pub async fn evaluate_as<T: DeserializeOwned>(
    engine: &dyn Engine,
    script: &str,
) -> Result<T, EngineError> {
    match engine.evaluate(script).await? {
        Value::String(s) => match serde_json::from_str(&s) {
            Ok(v) => Ok(v),
            Err(_) => Ok(serde_json::from_value(Value::String(s))?),
        },
        other => Ok(serde_json::from_value(other)?),
    }
}

/// Quotes `s` as a JavaScript string literal.
pub fn js_string(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn js_string_escapes_quotes() {
        assert_eq!(js_string(r#"a[href="x"]"#), r#""a[href=\"x\"]""#);
    }

    #[test]
    fn cookie_reads_camel_case_http_only() {
        let c: Cookie = serde_json::from_str(
            r#"{"name":"a","value":"b","domain":"x.org","path":"/","secure":true,"httpOnly":true}"#,
        )
        .unwrap();
        assert!(c.http_only);
        assert_eq!(c.expires, None);
    }
}
