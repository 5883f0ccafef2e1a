use std::collections::BTreeMap;
use std::time::Duration;

pub const DEFAULT_QUIET_PERIOD_MS: u64 = 2000;
pub const DEFAULT_HARD_DEADLINE_MS: u64 = 30_000;
pub const DEFAULT_VIEWPORT_WIDTH: u32 = 1280;
pub const DEFAULT_VIEWPORT_HEIGHT: u32 = 1024;
pub const DEFAULT_SCROLL_STEP_PX: u32 = 200;
pub const DEFAULT_SCROLL_INTERVAL_MS: u64 = 200;
/// Clip heights below this usually mean the element has no box of its own.
pub const DEFAULT_MIN_CLIP_HEIGHT: f64 = 50.0;
/// Many image tools fail on PNGs taller than this.
pub const DEFAULT_MAX_CLIP_HEIGHT: f64 = 31_500.0;

/// Timing and geometry knobs for one capture run.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Time without network activity before the page counts as stable.
    pub quiet_period: Duration,
    /// Ceiling after page-open beyond which capture is forced. The same
    /// length is used for the safety timer that ends a stalled render.
    pub hard_deadline: Duration,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub scroll_step: u32,
    pub scroll_interval: Duration,
    pub min_clip_height: f64,
    pub max_clip_height: f64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            quiet_period: Duration::from_millis(DEFAULT_QUIET_PERIOD_MS),
            hard_deadline: Duration::from_millis(DEFAULT_HARD_DEADLINE_MS),
            viewport_width: DEFAULT_VIEWPORT_WIDTH,
            viewport_height: DEFAULT_VIEWPORT_HEIGHT,
            scroll_step: DEFAULT_SCROLL_STEP_PX,
            scroll_interval: Duration::from_millis(DEFAULT_SCROLL_INTERVAL_MS),
            min_clip_height: DEFAULT_MIN_CLIP_HEIGHT,
            max_clip_height: DEFAULT_MAX_CLIP_HEIGHT,
        }
    }
}

/// What gets handed to `Engine::open` alongside the address.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpenOptions {
    pub headers: BTreeMap<String, String>,
    pub user_agent: Option<UserAgent>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UserAgent {
    /// Replace the engine's user agent.
    Replace(String),
    /// Append to the engine's default user agent.
    Append(String),
}

impl UserAgent {
    /// Resolves against the engine's default user agent string.
    pub fn resolve(&self, default: &str) -> String {
        match self {
            UserAgent::Replace(ua) => ua.clone(),
            UserAgent::Append(extra) if default.is_empty() => extra.clone(),
            UserAgent::Append(extra) => format!("{} {}", default, extra),
        }
    }
}
