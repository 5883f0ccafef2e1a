//! Viewport fitting and the background auto-scroller.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::config::CaptureConfig;
use crate::engine::{evaluate_as, Engine};
use crate::error::EngineError;

const SCROLL_HEIGHT_SCRIPT: &str =
    "JSON.stringify(document.body != null ? document.body.scrollHeight : 0)";
const SCROLL_TOP_SCRIPT: &str = "JSON.stringify(document.body != null \
     ? (window.scrollY || document.documentElement.scrollTop || document.body.scrollTop || 0) \
     : 0)";

/// Scrolls back to the origin and grows the viewport to the document's
/// full scroll height. Returns the viewport height now in effect.
pub async fn stabilize_viewport(
    engine: &dyn Engine,
    config: &CaptureConfig,
) -> Result<u32, EngineError> {
    // A scrolled page renders as a mostly blank image.
    engine.scroll_to(0.0, 0.0).await?;

    let scroll_height: f64 = evaluate_as(engine, SCROLL_HEIGHT_SCRIPT).await?;
    if !scroll_height.is_finite() || scroll_height <= 0.0 {
        debug!("document has no scroll height, keeping viewport");
        return Ok(config.viewport_height);
    }
    let height = scroll_height.ceil() as u32;
    info!(width = config.viewport_width, height, "resizing viewport to scroll height");
    engine.set_viewport(config.viewport_width, height).await?;
    Ok(height)
}

/// One nudge: read the scroll offset and move `step` pixels further down.
pub async fn auto_scroll_step(engine: &dyn Engine, step: u32) -> Result<(), EngineError> {
    let top: f64 = evaluate_as(engine, SCROLL_TOP_SCRIPT).await?;
    engine.scroll_to(top + f64::from(step), 0.0).await
}

/// Repeating scroll task that surfaces lazily loaded content. Cancelled by
/// [`AutoScroller::stop`] or on drop.
pub struct AutoScroller {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl AutoScroller {
    pub fn spawn(engine: Arc<dyn Engine>, step: u32, every: Duration) -> Self {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticks = interval(every);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticks.tick() => {
                        if let Err(e) = auto_scroll_step(engine.as_ref(), step).await {
                            trace!(error = %e, "auto-scroll step failed");
                        }
                    }
                }
            }
        });
        Self {
            token,
            handle: Some(handle),
        }
    }

    /// Cancels the task without waiting for it. A step stuck inside an
    /// engine call is abandoned.
    pub fn stop(mut self) {
        self.cancel();
    }

    fn cancel(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for AutoScroller {
    fn drop(&mut self) {
        self.cancel();
    }
}
