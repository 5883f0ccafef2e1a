//! Export of a finished capture to warcprox as WARC `resource` records.
//!
//! warcprox accepts a non-standard `WARCPROX_WRITE_RECORD` request whose
//! target is the record URL in absolute form. The record URLs use pseudo
//! schemes (`screenshot:`, `har:` and so on), so the request is written by
//! hand over a plain TCP stream.

use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::archive::ArchiveRecord;
use crate::capture::ROOT_SELECTOR;
use crate::error::ExportError;
use crate::imagemap::imagemap_html;

const WRITE_METHOD: &str = "WARCPROX_WRITE_RECORD";
const THUMBNAIL_WIDTH: u32 = 300;
const JPEG_QUALITY: u8 = 95;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Page keys that only ride along in the HAR when asked for.
const RENDERED_KEYS: [&str; 2] = ["renderedElements", "renderedContent"];

/// One record to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct WarcRecord {
    pub url: String,
    pub content_type: String,
    pub payload: Vec<u8>,
}

impl WarcRecord {
    fn new(url: String, content_type: &str, payload: Vec<u8>) -> Self {
        Self {
            url,
            content_type: content_type.to_string(),
            payload,
        }
    }
}

/// Records for one capture, in write order: the on-ready DOM, every
/// element raster, a thumbnail and image map of the full page, then the
/// archive itself.
pub fn archive_records(
    record: &ArchiveRecord,
    include_rendered: bool,
) -> Result<Vec<WarcRecord>, ExportError> {
    if record.entries().is_empty() {
        return Err(ExportError::NoEntries);
    }
    let page = record.page();
    let page_url = page.url.as_deref().unwrap_or(&page.id);
    let mut records = Vec::new();

    if let Some(content) = &page.rendered_content {
        records.push(WarcRecord::new(
            format!("onreadydom:{}", page_url),
            "text/html",
            content.decode()?,
        ));
    }

    let mut root = None;
    for element in page.rendered_elements.iter().flatten() {
        let url = if element.selector == ROOT_SELECTOR {
            root = Some(element);
            format!("screenshot:{}", page_url)
        } else {
            format!("screenshot:{}#xpointer({})", page_url, element.selector)
        };
        records.push(WarcRecord::new(
            url,
            element.format.mime(),
            element.image.clone(),
        ));
    }

    if let Some(root) = root {
        let (full, thumbnail) = full_and_thumbnail_jpegs(&root.image)?;
        records.push(WarcRecord::new(
            format!("thumbnail:{}", page_url),
            "image/jpeg",
            thumbnail,
        ));
        records.push(WarcRecord::new(
            format!("imagemap:{}", page_url),
            "text/html; charset=\"utf-8\"",
            imagemap_html(page, &full, "image/jpeg").into_bytes(),
        ));
    }

    let mut har = serde_json::to_value(record)?;
    if !include_rendered {
        strip_rendered(&mut har);
    }
    records.push(WarcRecord::new(
        format!("har:{}", page.id),
        "application/json",
        serde_json::to_vec(&har)?,
    ));
    Ok(records)
}

fn strip_rendered(har: &mut Value) {
    let Some(pages) = har.pointer_mut("/log/pages").and_then(Value::as_array_mut) else {
        return;
    };
    for page in pages.iter_mut().filter_map(Value::as_object_mut) {
        for key in RENDERED_KEYS {
            page.remove(key);
        }
    }
}

/// Re-encodes a PNG as a full-size JPEG and a thumbnail of fixed width.
/// Images already narrower than the thumbnail are not scaled up.
pub fn full_and_thumbnail_jpegs(png: &[u8]) -> Result<(Vec<u8>, Vec<u8>), ExportError> {
    // JPEG has no alpha channel.
    let img = DynamicImage::ImageRgb8(image::load_from_memory(png)?.to_rgb8());
    let full = encode_jpeg(&img)?;

    let (width, height) = (img.width(), img.height());
    let thumbnail = if width > THUMBNAIL_WIDTH {
        let scaled = (f64::from(height) * f64::from(THUMBNAIL_WIDTH) / f64::from(width)) as u32;
        img.thumbnail(THUMBNAIL_WIDTH, scaled.max(1))
    } else {
        img
    };
    debug!(
        width,
        height,
        thumb_width = thumbnail.width(),
        thumb_height = thumbnail.height(),
        "thumbnail scaled"
    );
    Ok((full, encode_jpeg(&thumbnail)?))
}

fn encode_jpeg(img: &DynamicImage) -> Result<Vec<u8>, ExportError> {
    let mut out = Vec::new();
    img.write_with_encoder(JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY))?;
    Ok(out)
}

/// Writes records to a warcprox instance.
#[derive(Debug, Clone)]
pub struct WarcproxClient {
    address: String,
    warcprox_meta: String,
    timeout: Duration,
}

impl WarcproxClient {
    /// `address` is `host:port`, with or without an `http://` prefix.
    pub fn new(address: &str, warc_prefix: &str) -> Self {
        let address = address
            .trim()
            .trim_start_matches("http://")
            .trim_end_matches('/')
            .to_string();
        Self {
            address,
            warcprox_meta: serde_json::json!({ "warc-prefix": warc_prefix }).to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Writes every record for `record` and returns how many were sent.
    pub async fn export(
        &self,
        record: &ArchiveRecord,
        include_rendered: bool,
    ) -> Result<usize, ExportError> {
        let records = archive_records(record, include_rendered)?;
        for r in &records {
            self.write_record(r).await?;
        }
        info!(address = %self.address, records = records.len(), "exported to warcprox");
        Ok(records.len())
    }

    /// Sends one record and returns the response status. Anything other
    /// than 204 is logged and returned, not treated as an error.
    pub async fn write_record(&self, record: &WarcRecord) -> Result<u16, ExportError> {
        let head = self.request_head(record);
        let exchange = async {
            let mut stream = TcpStream::connect(&self.address).await?;
            stream.write_all(head.as_bytes()).await?;
            stream.write_all(&record.payload).await?;
            stream.flush().await?;
            let mut status_line = String::new();
            BufReader::new(stream).read_line(&mut status_line).await?;
            Ok::<_, std::io::Error>(status_line)
        };
        let status_line = timeout(self.timeout, exchange)
            .await
            .map_err(|_| ExportError::Timeout(self.timeout.as_millis() as u64))??;

        let status = parse_status(&status_line)
            .ok_or_else(|| ExportError::BadResponse(status_line.trim_end().to_string()))?;
        if status == 204 {
            debug!(url = %record.url, bytes = record.payload.len(), "record written");
        } else {
            warn!(
                url = %record.url,
                response = %status_line.trim_end(),
                "unexpected warcprox response (expected 204)"
            );
        }
        Ok(status)
    }

    fn request_head(&self, record: &WarcRecord) -> String {
        format!(
            "{} {} HTTP/1.1\r\n\
             Host: N/A\r\n\
             Content-Type: {}\r\n\
             WARC-Type: resource\r\n\
             Warcprox-Meta: {}\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\r\n",
            WRITE_METHOD,
            request_target(&record.url),
            record.content_type,
            self.warcprox_meta,
            record.payload.len()
        )
    }
}

/// Percent-encodes the bytes a request line cannot carry.
fn request_target(url: &str) -> String {
    let mut out = String::with_capacity(url.len());
    for b in url.bytes() {
        if b.is_ascii_graphic() {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

fn parse_status(line: &str) -> Option<u16> {
    let mut parts = line.split_whitespace();
    if !parts.next()?.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}
