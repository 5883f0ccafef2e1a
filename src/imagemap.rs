//! Static HTML image map: the full-page raster with a clickable `<area>`
//! over every link that was visible when the page was captured.

use std::fmt::Write as _;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use v_htmlescape::escape;

use crate::archive::{ArchiveRecord, PageRecord};
use crate::capture::ROOT_SELECTOR;

/// Builds the image map page around the record's root PNG, or `None` when
/// the record has no root capture.
pub fn build_imagemap(record: &ArchiveRecord) -> Option<String> {
    let page = record.page();
    let root = page
        .rendered_elements
        .as_ref()?
        .iter()
        .find(|e| e.selector == ROOT_SELECTOR)?;
    Some(imagemap_html(page, &root.image, "image/png"))
}

/// Image map page for `page` embedding `image` as a `mime` data URI.
pub fn imagemap_html(page: &PageRecord, image: &[u8], mime: &str) -> String {
    let title = page.title.as_deref().unwrap_or("");
    let url = page.url.as_deref().unwrap_or(&page.id);

    let mut html = String::new();
    let _ = writeln!(
        html,
        "<html><head><title>{} [Static version of {}]</title>\n</head>\n<body style=\"margin: 0;\">",
        escape(title),
        escape(url)
    );
    let _ = writeln!(
        html,
        "<img src=\"data:{};base64,{}\" usemap=\"#shapes\" alt=\"{}\">",
        mime,
        STANDARD.encode(image),
        escape(title)
    );
    html.push_str("<map name=\"shapes\">\n");
    for clickable in &page.map {
        let Some(href) = &clickable.href else {
            continue;
        };
        let r = &clickable.location;
        let _ = writeln!(
            html,
            "<area shape=rect coords=\"{},{},{},{}\" href=\"{}\">",
            r.left.round() as i64,
            r.top.round() as i64,
            (r.left + r.width).round() as i64,
            (r.top + r.height).round() as i64,
            escape(href)
        );
    }
    html.push_str("</map>\n</body>\n</html>\n");
    html
}
