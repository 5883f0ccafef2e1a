//! The archive record: a HAR-derived document that also carries the
//! rendered DOM, element rasters, the clickable map and cookies.
//!
//! This intentionally extends the HAR layout; `log.pages[0]` holds the
//! extra fields.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use serde_json::Map;
use tracing::debug;

use crate::capture::{ElementCapture, Encoding};
use crate::clickables::ClickableElement;
use crate::engine::{Cookie, Header};
use crate::tracker::ResourceRecord;

const HAR_VERSION: &str = "1.2";
const HTTP_VERSION: &str = "HTTP/1.1";
/// HAR's marker for a timing or size that was not measured.
pub const UNKNOWN: i64 = -1;

pub(crate) fn base64_bytes<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&STANDARD.encode(bytes))
}

fn iso(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn millis_between(from: &DateTime<Utc>, to: &DateTime<Utc>) -> f64 {
    (*to - *from).num_milliseconds() as f64
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchiveRecord {
    pub log: ArchiveLog,
}

impl ArchiveRecord {
    pub fn page(&self) -> &PageRecord {
        &self.log.pages[0]
    }

    pub fn entries(&self) -> &[Entry] {
        &self.log.entries
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchiveLog {
    pub version: &'static str,
    pub creator: Creator,
    pub pages: Vec<PageRecord>,
    pub entries: Vec<Entry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Creator {
    pub name: &'static str,
    pub version: &'static str,
}

impl Default for Creator {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRecord {
    pub started_date_time: String,
    /// The address as requested.
    pub id: String,
    /// The address after redirects.
    pub url: Option<String>,
    pub title: Option<String>,
    pub page_timings: PageTimings,
    pub rendered_content: Option<RenderedContent>,
    pub rendered_elements: Option<Vec<ElementCapture>>,
    pub map: Vec<ClickableElement>,
    pub cookies: Vec<Cookie>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageTimings {
    pub on_load: Option<i64>,
}

/// Serialized DOM, base64 encoded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedContent {
    pub text: String,
    pub encoding: Encoding,
}

impl RenderedContent {
    pub fn from_html(html: &str) -> Self {
        Self {
            text: STANDARD.encode(html.as_bytes()),
            encoding: Encoding::Base64,
        }
    }

    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(&self.text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub started_date_time: String,
    pub time: f64,
    pub request: HarRequest,
    pub response: HarResponse,
    pub cache: Map<String, serde_json::Value>,
    pub timings: Timings,
    pub pageref: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HarRequest {
    pub method: String,
    pub url: String,
    pub http_version: &'static str,
    pub cookies: Vec<Cookie>,
    pub headers: Vec<Header>,
    pub query_string: Vec<Header>,
    pub headers_size: i64,
    pub body_size: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HarResponse {
    pub status: u16,
    pub status_text: String,
    pub http_version: &'static str,
    pub cookies: Vec<Cookie>,
    pub headers: Vec<Header>,
    #[serde(rename = "redirectURL")]
    pub redirect_url: String,
    pub headers_size: i64,
    pub body_size: i64,
    pub content: Content,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    pub size: i64,
    pub mime_type: String,
}

/// Milliseconds per phase; [`UNKNOWN`] where the engine gives no data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timings {
    pub blocked: f64,
    pub dns: f64,
    pub connect: f64,
    pub send: f64,
    pub wait: f64,
    pub receive: f64,
    pub ssl: f64,
}

/// Page-level facts gathered by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct PageInfo {
    pub address: String,
    pub url: Option<String>,
    pub title: Option<String>,
    pub started: DateTime<Utc>,
    pub on_load_ms: Option<i64>,
}

/// Artifacts of the render pass. `Default` is the load-failure shape.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderedArtifacts {
    pub content: Option<String>,
    pub elements: Option<Vec<ElementCapture>>,
    pub clickables: Vec<ClickableElement>,
    pub cookies: Vec<Cookie>,
}

fn is_data_uri(url: &str) -> bool {
    url.get(..5)
        .map(|scheme| scheme.eq_ignore_ascii_case("data:"))
        .unwrap_or(false)
}

fn query_string(url: &str) -> Vec<Header> {
    url::Url::parse(url)
        .map(|u| {
            u.query_pairs()
                .map(|(name, value)| Header::new(name, value))
                .collect()
        })
        .unwrap_or_default()
}

fn entry(record: &ResourceRecord, pageref: &str) -> Option<Entry> {
    let (request, start, end) = record.complete()?;
    if is_data_uri(&request.url) {
        debug!(url = %request.url, "ignoring data URI");
        return None;
    }
    let body_size = end.body_size.or(start.body_size).unwrap_or(UNKNOWN);
    let unknown = UNKNOWN as f64;
    Some(Entry {
        started_date_time: iso(&request.time),
        time: millis_between(&request.time, &end.time),
        request: HarRequest {
            method: request.method.clone(),
            url: request.url.clone(),
            http_version: HTTP_VERSION,
            cookies: Vec::new(),
            headers: request.headers.clone(),
            query_string: query_string(&request.url),
            headers_size: UNKNOWN,
            body_size: UNKNOWN,
        },
        response: HarResponse {
            status: end.status,
            status_text: end.status_text.clone(),
            http_version: HTTP_VERSION,
            cookies: Vec::new(),
            headers: end.headers.clone(),
            redirect_url: String::new(),
            headers_size: UNKNOWN,
            body_size,
            content: Content {
                size: body_size,
                mime_type: end
                    .content_type
                    .clone()
                    .or_else(|| start.content_type.clone())
                    .unwrap_or_default(),
            },
        },
        cache: Map::new(),
        timings: Timings {
            blocked: unknown,
            dns: unknown,
            connect: unknown,
            send: unknown,
            wait: millis_between(&request.time, &start.time),
            receive: millis_between(&start.time, &end.time),
            ssl: unknown,
        },
        pageref: pageref.to_string(),
    })
}

/// Builds the one archive record for a page load. Incomplete and data-URI
/// resources are left out.
pub fn assemble(
    page: PageInfo,
    resources: &[ResourceRecord],
    artifacts: RenderedArtifacts,
) -> ArchiveRecord {
    let entries = resources
        .iter()
        .filter_map(|r| entry(r, &page.address))
        .collect();
    ArchiveRecord {
        log: ArchiveLog {
            version: HAR_VERSION,
            creator: Creator::default(),
            pages: vec![PageRecord {
                started_date_time: iso(&page.started),
                id: page.address,
                url: page.url,
                title: page.title,
                page_timings: PageTimings {
                    on_load: page.on_load_ms,
                },
                rendered_content: artifacts.content.as_deref().map(RenderedContent::from_html),
                rendered_elements: artifacts.elements,
                map: artifacts.clickables,
                cookies: artifacts.cookies,
            }],
            entries,
        },
    }
}
