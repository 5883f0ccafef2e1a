#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use pagearchive::engine::{
    js_string, ClipRect, Cookie, Engine, EventReceiver, EventSender, LoadStatus, PageEvent,
    ReplyMeta, ReplyStage, RequestMeta,
};
use pagearchive::{CaptureConfig, CaptureSession, EngineError, OpenOptions};

pub const ADDRESS: &str = "http://fake.test/";

pub fn at(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
}

pub fn requested(id: &str, url: &str, ms: i64) -> PageEvent {
    PageEvent::ResourceRequested {
        id: id.into(),
        request: RequestMeta {
            method: "GET".into(),
            url: url.into(),
            time: at(ms),
            headers: vec![],
        },
    }
}

pub fn reply(id: &str, stage: ReplyStage, ms: i64) -> PageEvent {
    PageEvent::ResourceReply {
        id: id.into(),
        stage: Some(stage),
        reply: Some(ReplyMeta {
            status: 200,
            status_text: "OK".into(),
            headers: vec![],
            content_type: Some("text/html".into()),
            body_size: Some(100),
            time: at(ms),
        }),
    }
}

/// Request plus both reply stages, all at `ms`.
pub fn completed(id: &str, url: &str, ms: i64) -> Vec<PageEvent> {
    vec![
        requested(id, url, ms),
        reply(id, ReplyStage::Start, ms + 5),
        reply(id, ReplyStage::End, ms + 10),
    ]
}

/// A scripted engine. Events are emitted at fixed offsets after `open` is
/// called; everything runs on tokio's clock so tests can pause it.
pub struct FakeEngine {
    tx: EventSender,
    open_after: Duration,
    open_status: LoadStatus,
    timeline: Mutex<Vec<(Duration, PageEvent)>>,
    render_delay: Duration,
    stuck_scroll_read: Option<usize>,
    scroll_reads: AtomicUsize,
    elements: HashMap<String, ClipRect>,
    renders: Mutex<Vec<Option<ClipRect>>>,
    viewports: Mutex<Vec<(u32, u32)>>,
}

impl FakeEngine {
    pub fn new() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Self {
            tx,
            open_after: Duration::from_millis(100),
            open_status: LoadStatus::Success,
            timeline: Mutex::new(Vec::new()),
            render_delay: Duration::ZERO,
            stuck_scroll_read: None,
            scroll_reads: AtomicUsize::new(0),
            elements: HashMap::new(),
            renders: Mutex::new(Vec::new()),
            viewports: Mutex::new(Vec::new()),
        };
        (engine, rx)
    }

    pub fn open_status(mut self, status: LoadStatus) -> Self {
        self.open_status = status;
        self
    }

    pub fn render_delay(mut self, delay: Duration) -> Self {
        self.render_delay = delay;
        self
    }

    /// The `n`th scroll offset read (1-based) never returns.
    pub fn stuck_scroll_read(mut self, n: usize) -> Self {
        self.stuck_scroll_read = Some(n);
        self
    }

    pub fn sender(&self) -> EventSender {
        self.tx.clone()
    }

    pub fn element(mut self, selector: &str, rect: ClipRect) -> Self {
        self.elements.insert(selector.to_string(), rect);
        self
    }

    /// Schedules `events` at `ms` after open is called.
    pub fn events_at(self, ms: u64, events: Vec<PageEvent>) -> Self {
        {
            let mut timeline = self.timeline.lock();
            for event in events {
                timeline.push((Duration::from_millis(ms), event));
            }
        }
        self
    }

    pub fn renders(&self) -> Vec<Option<ClipRect>> {
        self.renders.lock().clone()
    }

    pub fn viewports(&self) -> Vec<(u32, u32)> {
        self.viewports.lock().clone()
    }
}

#[async_trait]
impl Engine for FakeEngine {
    async fn open(&self, _address: &str, _options: &OpenOptions) -> Result<LoadStatus, EngineError> {
        let _ = self.tx.send(PageEvent::LoadStarted { at: at(0) });
        let timeline = std::mem::take(&mut *self.timeline.lock());
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let start = tokio::time::Instant::now();
            for (offset, event) in timeline {
                tokio::time::sleep_until(start + offset).await;
                let _ = tx.send(event);
            }
        });
        tokio::time::sleep(self.open_after).await;
        Ok(self.open_status)
    }

    async fn evaluate(&self, script: &str) -> Result<Value, EngineError> {
        if script.contains("document.title") {
            return Ok(json!("\"Fake page\""));
        }
        if script.contains("scrollHeight") {
            return Ok(json!("2400"));
        }
        if script.contains("scrollY") {
            let read = self.scroll_reads.fetch_add(1, Ordering::SeqCst) + 1;
            if self.stuck_scroll_read == Some(read) {
                std::future::pending::<()>().await;
            }
            return Ok(json!("0"));
        }
        if script.contains("offsetParent") {
            let map = json!([
                {"location": {"top": 10.0, "left": 10.0, "width": 50.0, "height": 12.0}, "href": "http://fake.test/next"}
            ]);
            return Ok(Value::String(map.to_string()));
        }
        if script.contains("querySelector") {
            for (selector, rect) in &self.elements {
                if script.contains(&js_string(selector)) {
                    return Ok(Value::String(serde_json::to_string(rect)?));
                }
            }
            return Ok(json!("null"));
        }
        if script.starts_with("window.scrollTo") {
            return Ok(Value::Bool(true));
        }
        Err(EngineError::Evaluation(format!("unexpected script: {}", script)))
    }

    async fn set_viewport(&self, width: u32, height: u32) -> Result<(), EngineError> {
        self.viewports.lock().push((width, height));
        Ok(())
    }

    async fn scroll_to(&self, _top: f64, _left: f64) -> Result<(), EngineError> {
        Ok(())
    }

    async fn render_region(&self, clip: Option<ClipRect>) -> Result<Vec<u8>, EngineError> {
        if !self.render_delay.is_zero() {
            tokio::time::sleep(self.render_delay).await;
        }
        self.renders.lock().push(clip);
        Ok(b"\x89PNG fake".to_vec())
    }

    async fn content(&self) -> Result<String, EngineError> {
        Ok("<html><head><title>Fake page</title></head><body>ok</body></html>".into())
    }

    async fn url(&self) -> Result<String, EngineError> {
        Ok(ADDRESS.into())
    }

    async fn cookies(&self) -> Result<Vec<Cookie>, EngineError> {
        Ok(vec![Cookie {
            name: "session".into(),
            value: "abc".into(),
            domain: "fake.test".into(),
            path: "/".into(),
            secure: false,
            http_only: true,
            expires: None,
        }])
    }
}

pub fn config(quiet_ms: u64, deadline_ms: u64) -> CaptureConfig {
    CaptureConfig {
        quiet_period: Duration::from_millis(quiet_ms),
        hard_deadline: Duration::from_millis(deadline_ms),
        ..CaptureConfig::default()
    }
}

pub fn session(engine: Arc<FakeEngine>, config: CaptureConfig, selectors: &[&str]) -> CaptureSession {
    CaptureSession::new(
        engine,
        config,
        ADDRESS,
        OpenOptions::default(),
        selectors.iter().map(|s| s.to_string()).collect(),
    )
}
