//! Collects the map of visible links and click targets.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::engine::{evaluate_as, ClipRect, Engine};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClickableElement {
    pub location: ClipRect,
    /// Absolute URL resolved by the page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    /// Source of the click handler, kept for provenance only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub onclick: Option<String>,
}

const CLICKABLES_SCRIPT: &str = r#"(function () {
    var clickables = [];
    var elements = Array.prototype.slice.call(document.getElementsByTagName("*"));
    elements.forEach(function (element) {
        if (element.offsetParent == null) { return; }
        var hasHref = element.attributes["href"] != undefined;
        if (element.onclick == null && !hasHref) { return; }
        var r = element.getBoundingClientRect();
        var c = { location: { top: r.top, left: r.left, width: r.width, height: r.height } };
        if (hasHref) { c.href = element.href; }
        if (element.onclick != null) { c.onclick = element.onclick.toString(); }
        clickables.push(c);
    });
    return JSON.stringify(clickables);
})()"#;

/// Visible elements that are links or carry a click handler, in document
/// order. An evaluation failure yields an empty map.
pub async fn collect_clickables(engine: &dyn Engine) -> Vec<ClickableElement> {
    match evaluate_as::<Vec<ClickableElement>>(engine, CLICKABLES_SCRIPT).await {
        Ok(found) => {
            debug!(count = found.len(), "collected clickables");
            found
        }
        Err(e) => {
            warn!(error = %e, "could not collect clickables");
            Vec::new()
        }
    }
}
