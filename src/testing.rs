//! Scripted engine stub for unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::config::OpenOptions;
use crate::engine::{ClipRect, Cookie, Engine, LoadStatus};
use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Scroll(f64, f64),
    Viewport(u32, u32),
    Render(Option<ClipRect>),
}

/// Answers `evaluate` with the first canned value whose needle occurs in
/// the script, and records every side-effecting call.
#[derive(Default)]
pub struct StubEngine {
    scripts: Vec<(String, Value)>,
    fail_render: bool,
    calls: Mutex<Vec<Call>>,
}

impl StubEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(mut self, needle: &str, value: Value) -> Self {
        self.scripts.push((needle.to_string(), value));
        self
    }

    pub fn failing_render(mut self) -> Self {
        self.fail_render = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Engine for StubEngine {
    async fn open(&self, _address: &str, _options: &OpenOptions) -> Result<LoadStatus, EngineError> {
        Ok(LoadStatus::Success)
    }

    async fn evaluate(&self, script: &str) -> Result<Value, EngineError> {
        self.scripts
            .iter()
            .find(|(needle, _)| script.contains(needle.as_str()))
            .map(|(_, v)| v.clone())
            .ok_or_else(|| EngineError::Evaluation(format!("no stub for {}", script)))
    }

    async fn set_viewport(&self, width: u32, height: u32) -> Result<(), EngineError> {
        self.calls.lock().push(Call::Viewport(width, height));
        Ok(())
    }

    async fn scroll_to(&self, top: f64, left: f64) -> Result<(), EngineError> {
        self.calls.lock().push(Call::Scroll(top, left));
        Ok(())
    }

    async fn render_region(&self, clip: Option<ClipRect>) -> Result<Vec<u8>, EngineError> {
        self.calls.lock().push(Call::Render(clip));
        if self.fail_render {
            return Err(EngineError::Raster("stub raster failure".into()));
        }
        Ok(b"\x89PNG".to_vec())
    }

    async fn content(&self) -> Result<String, EngineError> {
        Ok("<html></html>".into())
    }

    async fn url(&self) -> Result<String, EngineError> {
        Ok("http://stub.test/".into())
    }

    async fn cookies(&self) -> Result<Vec<Cookie>, EngineError> {
        Ok(vec![])
    }
}
