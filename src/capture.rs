//! Rasterizes the regions occupied by CSS selectors.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::archive::base64_bytes;
use crate::config::CaptureConfig;
use crate::engine::{evaluate_as, js_string, ClipRect, Engine};

/// Selector recorded for the fallback full-page capture.
pub const ROOT_SELECTOR: &str = ":root";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImageFormat {
    #[serde(rename = "PNG")]
    Png,
}

impl ImageFormat {
    pub fn mime(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Base64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElementCapture {
    pub selector: String,
    pub format: ImageFormat,
    #[serde(rename = "content", serialize_with = "base64_bytes")]
    pub image: Vec<u8>,
    pub encoding: Encoding,
    /// The clamped clip rectangle; absent for the full-page raster.
    #[serde(rename = "location", skip_serializing_if = "Option::is_none")]
    pub clip: Option<ClipRect>,
}

impl ElementCapture {
    fn png(selector: &str, image: Vec<u8>, clip: Option<ClipRect>) -> Self {
        Self {
            selector: selector.to_string(),
            format: ImageFormat::Png,
            image,
            encoding: Encoding::Base64,
            clip,
        }
    }
}

/// Applies the clip height bounds. A height under the floor means the
/// element has no box of its own, so the whole viewport is used instead;
/// the result is then held inside `[min_clip_height, max_clip_height]`.
pub fn clamp_clip(mut rect: ClipRect, viewport_height: u32, config: &CaptureConfig) -> ClipRect {
    if rect.height.is_nan() || rect.height < config.min_clip_height {
        warn!(height = rect.height, viewport_height, "very small clip, using viewport height");
        rect.height = f64::from(viewport_height);
    }
    if rect.height > config.max_clip_height {
        warn!(height = rect.height, max = config.max_clip_height, "very tall clip, capping");
    }
    rect.height = rect.height.clamp(config.min_clip_height, config.max_clip_height);
    rect
}

fn bounding_rect_script(selector: &str) -> String {
    format!(
        "(function (selector) {{ \
            var e = document.querySelector(selector); \
            if (e == null) {{ return JSON.stringify(null); }} \
            var r = e.getBoundingClientRect(); \
            return JSON.stringify({{ top: r.top, left: r.left, width: r.width, height: r.height }}); \
        }})({})",
        js_string(selector)
    )
}

/// Captures the region occupied by `selector`. `None` when nothing matches
/// or the engine fails; the pass carries on either way.
pub async fn capture_selector(
    engine: &dyn Engine,
    selector: &str,
    viewport_height: u32,
    config: &CaptureConfig,
) -> Option<ElementCapture> {
    let rect: Option<ClipRect> = match evaluate_as(engine, &bounding_rect_script(selector)).await {
        Ok(rect) => rect,
        Err(e) => {
            warn!(selector, error = %e, "could not resolve selector");
            return None;
        }
    };
    let Some(rect) = rect else {
        debug!(selector, "selector matched nothing");
        return None;
    };
    let clip = clamp_clip(rect, viewport_height, config);
    info!(
        selector,
        top = clip.top,
        left = clip.left,
        width = clip.width,
        height = clip.height,
        "rendering clipped region"
    );
    match engine.render_region(Some(clip)).await {
        Ok(image) => Some(ElementCapture::png(selector, image, Some(clip))),
        Err(e) => {
            warn!(selector, error = %e, "failed to capture screenshot");
            None
        }
    }
}

/// Full-page raster recorded under [`ROOT_SELECTOR`]. Pages taller than the
/// clip ceiling are cut off at the ceiling.
pub async fn capture_root(
    engine: &dyn Engine,
    viewport_height: u32,
    config: &CaptureConfig,
) -> Option<ElementCapture> {
    let clip = (f64::from(viewport_height) > config.max_clip_height).then(|| {
        warn!(viewport_height, max = config.max_clip_height, "very tall page, capping root render");
        ClipRect {
            top: 0.0,
            left: 0.0,
            width: f64::from(config.viewport_width),
            height: config.max_clip_height,
        }
    });
    info!("rendering full page");
    match engine.render_region(clip).await {
        Ok(image) => Some(ElementCapture::png(ROOT_SELECTOR, image, clip)),
        Err(e) => {
            warn!(error = %e, "failed to capture full page");
            None
        }
    }
}

/// Captures every selector in order, or the page root when none are given.
pub async fn capture_all(
    engine: &dyn Engine,
    selectors: &[String],
    viewport_height: u32,
    config: &CaptureConfig,
) -> Vec<ElementCapture> {
    if selectors.is_empty() {
        return capture_root(engine, viewport_height, config).await.into_iter().collect();
    }
    let mut captures = Vec::with_capacity(selectors.len());
    for selector in selectors {
        if let Some(capture) = capture_selector(engine, selector, viewport_height, config).await {
            captures.push(capture);
        }
    }
    captures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, StubEngine};
    use serde_json::json;

    fn rect(height: f64) -> ClipRect {
        ClipRect {
            top: 10.0,
            left: 5.0,
            width: 300.0,
            height,
        }
    }

    #[test]
    fn clamp_replaces_tiny_height_with_viewport() {
        let c = CaptureConfig::default();
        assert_eq!(clamp_clip(rect(12.0), 960, &c).height, 960.0);
        assert_eq!(clamp_clip(rect(f64::NAN), 960, &c).height, 960.0);
    }

    #[test]
    fn clamp_caps_tall_height() {
        let c = CaptureConfig::default();
        assert_eq!(clamp_clip(rect(100_000.0), 960, &c).height, 31_500.0);
        assert_eq!(clamp_clip(rect(10.0), 90_000, &c).height, 31_500.0);
    }

    #[test]
    fn clamp_leaves_normal_rect_alone() {
        let c = CaptureConfig::default();
        assert_eq!(clamp_clip(rect(400.0), 960, &c), rect(400.0));
    }

    #[tokio::test]
    async fn no_selectors_renders_full_page_root() {
        let engine = StubEngine::new();
        let captures = capture_all(&engine, &[], 1024, &CaptureConfig::default()).await;
        assert_eq!(captures.len(), 1);
        assert_eq!(captures[0].selector, ROOT_SELECTOR);
        assert_eq!(captures[0].clip, None);
        assert_eq!(engine.calls(), vec![Call::Render(None)]);
    }

    #[tokio::test]
    async fn very_tall_root_is_capped_at_ceiling() {
        let engine = StubEngine::new();
        let config = CaptureConfig::default();
        let captures = capture_all(&engine, &[], 50_000, &config).await;
        let capped = ClipRect {
            top: 0.0,
            left: 0.0,
            width: 1280.0,
            height: 31_500.0,
        };
        assert_eq!(captures[0].selector, ROOT_SELECTOR);
        assert_eq!(captures[0].clip, Some(capped));
        assert_eq!(engine.calls(), vec![Call::Render(Some(capped))]);
    }

    #[tokio::test]
    async fn missing_selector_is_omitted() {
        let engine = StubEngine::new()
            .with_script("#gone", json!("null"))
            .with_script("#here", json!({"top": 0.0, "left": 0.0, "width": 100.0, "height": 200.0}));
        let selectors = vec!["#gone".to_string(), "#here".to_string()];
        let captures = capture_all(&engine, &selectors, 1024, &CaptureConfig::default()).await;
        assert_eq!(captures.len(), 1);
        assert_eq!(captures[0].selector, "#here");
        assert_eq!(captures[0].clip.map(|c| c.height), Some(200.0));
    }

    #[tokio::test]
    async fn raster_failure_degrades_to_absent() {
        let engine = StubEngine::new()
            .with_script("#main", json!({"top": 0.0, "left": 0.0, "width": 100.0, "height": 200.0}))
            .failing_render();
        let captures = capture_all(&engine, &["#main".to_string()], 1024, &CaptureConfig::default()).await;
        assert!(captures.is_empty());
        assert!(capture_root(&engine, 1024, &CaptureConfig::default()).await.is_none());
    }

    #[test]
    fn capture_serializes_as_base64_png() {
        let capture = ElementCapture::png(ROOT_SELECTOR, b"abc".to_vec(), None);
        let v = serde_json::to_value(&capture).unwrap();
        assert_eq!(v["format"], "PNG");
        assert_eq!(v["encoding"], "base64");
        assert_eq!(v["content"], "YWJj");
        assert!(v.get("location").is_none());
    }
}
