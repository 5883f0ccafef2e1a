//! `Engine` backed by headless Chrome.
//!
//! headless_chrome is blocking, so every call hops onto the blocking pool.
//! CDP network events arrive on the browser's listener thread and are
//! translated into [`PageEvent`]s there.

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use headless_chrome::protocol::cdp::types::Event;
use headless_chrome::protocol::cdp::Network;
use headless_chrome::protocol::cdp::Page::{CaptureScreenshotFormatOption, Viewport};
use headless_chrome::types::Bounds;
use headless_chrome::{Browser, LaunchOptionsBuilder, Tab};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, trace, warn};

use crate::config::OpenOptions;
use crate::engine::{
    evaluate_as, ClipRect, Cookie, Engine, EventSender, Header, LoadStatus, PageEvent, ReplyMeta,
    ReplyStage, RequestMeta,
};
use crate::error::EngineError;

/// Browser process settings.
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub headful: bool,
    pub user_data_dir: PathBuf,
    pub proxy: Option<String>,
    pub ignore_certificate_errors: bool,
    pub window: (u32, u32),
    /// How long the browser connection may stay silent.
    pub idle_timeout: Duration,
}

/// Default persistent profile location for a named profile.
pub fn profile_dir(profile: &str, override_dir: Option<PathBuf>) -> PathBuf {
    if let Some(p) = override_dir {
        return p;
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".pagearchive")
        .join("profiles")
        .join(profile)
}

fn headers_from_cdp(raw: Value) -> Vec<Header> {
    match raw {
        Value::Object(map) => map
            .into_iter()
            .map(|(name, value)| match value {
                Value::String(s) => Header::new(name, s),
                other => Header::new(name, other.to_string()),
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn wall_clock(secs: f64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis((secs * 1000.0).round() as i64).unwrap_or_else(Utc::now)
}

/// Translates CDP events for one tab.
struct EventBridge {
    tx: EventSender,
    /// Offset from CDP's monotonic clock to wall-clock seconds.
    clock_offset: Mutex<Option<f64>>,
    /// Response metadata held until the resource finishes.
    responses: Mutex<HashMap<String, ReplyMeta>>,
    urls: Mutex<HashMap<String, String>>,
}

impl EventBridge {
    fn new(tx: EventSender) -> Self {
        Self {
            tx,
            clock_offset: Mutex::new(None),
            responses: Mutex::new(HashMap::new()),
            urls: Mutex::new(HashMap::new()),
        }
    }

    fn to_wall(&self, monotonic: f64) -> DateTime<Utc> {
        match *self.clock_offset.lock() {
            Some(offset) => wall_clock(monotonic + offset),
            None => Utc::now(),
        }
    }

    fn emit(&self, event: PageEvent) {
        // The session may already be gone; late events are irrelevant then.
        let _ = self.tx.send(event);
    }

    fn on_event(&self, event: &Event) {
        match event {
            Event::NetworkRequestWillBeSent(e) => {
                let p = &e.params;
                *self.clock_offset.lock() = Some(p.wall_time - p.timestamp);
                let headers = serde_json::to_value(&p.request.headers)
                    .map(headers_from_cdp)
                    .unwrap_or_default();
                self.urls.lock().insert(p.request_id.clone(), p.request.url.clone());
                self.emit(PageEvent::ResourceRequested {
                    id: p.request_id.clone(),
                    request: RequestMeta {
                        method: p.request.method.clone(),
                        url: p.request.url.clone(),
                        time: wall_clock(p.wall_time),
                        headers,
                    },
                });
            }
            Event::NetworkResponseReceived(e) => {
                let p = &e.params;
                let r = &p.response;
                let reply = ReplyMeta {
                    status: u16::try_from(r.status).unwrap_or_default(),
                    status_text: r.status_text.clone(),
                    headers: serde_json::to_value(&r.headers)
                        .map(headers_from_cdp)
                        .unwrap_or_default(),
                    content_type: Some(r.mime_type.clone()).filter(|m| !m.is_empty()),
                    body_size: Some(r.encoded_data_length as i64),
                    time: self.to_wall(p.timestamp),
                };
                self.responses.lock().insert(p.request_id.clone(), reply.clone());
                self.emit(PageEvent::ResourceReply {
                    id: p.request_id.clone(),
                    stage: Some(ReplyStage::Start),
                    reply: Some(reply),
                });
            }
            Event::NetworkLoadingFinished(e) => {
                let p = &e.params;
                let reply = self.responses.lock().remove(&p.request_id).map(|start| ReplyMeta {
                    body_size: Some(p.encoded_data_length as i64),
                    time: self.to_wall(p.timestamp),
                    ..start
                });
                self.urls.lock().remove(&p.request_id);
                // Without a response there is nothing to record, but the
                // resource still counts as finished.
                let stage = reply.as_ref().map(|_| ReplyStage::End);
                self.emit(PageEvent::ResourceReply {
                    id: p.request_id.clone(),
                    stage,
                    reply,
                });
            }
            Event::NetworkLoadingFailed(e) => {
                let p = &e.params;
                self.responses.lock().remove(&p.request_id);
                let url = self.urls.lock().remove(&p.request_id).unwrap_or_default();
                self.emit(PageEvent::ResourceError {
                    url,
                    error: p.error_text.clone(),
                });
                self.emit(PageEvent::ResourceReply {
                    id: p.request_id.clone(),
                    stage: None,
                    reply: None,
                });
            }
            Event::PageLoadEventFired(_) => self.emit(PageEvent::LoadFinished),
            Event::RuntimeExceptionThrown(e) => self.emit(PageEvent::PageError {
                message: e.params.exception_details.text.clone(),
            }),
            _ => {}
        }
    }
}

/// How a navigation fell short.
#[derive(Debug, Clone, PartialEq)]
enum Navigation {
    /// The browser refused the navigation (DNS failure, refused connection).
    Rejected(String),
    /// The document is in but the frame never stopped loading in time.
    Unsettled(String),
}

/// Only a rejected navigation is a failed load. A frame still busy with a
/// hanging subresource is left to the quiet period and the deadline.
fn load_status(outcome: Result<(), Navigation>) -> LoadStatus {
    match outcome {
        Ok(()) => LoadStatus::Success,
        Err(Navigation::Rejected(msg)) => {
            warn!(error = %msg, "navigation rejected");
            LoadStatus::Fail
        }
        Err(Navigation::Unsettled(msg)) => {
            debug!(error = %msg, "page still loading, carrying on");
            LoadStatus::Success
        }
    }
}

pub struct ChromeEngine {
    _browser: Browser,
    tab: Arc<Tab>,
    events: EventSender,
}

impl ChromeEngine {
    /// Starts the browser and wires its network events into `events`.
    pub fn launch(opts: &BrowserOptions, events: EventSender) -> Result<Self, EngineError> {
        std::fs::create_dir_all(&opts.user_data_dir)
            .map_err(|e| EngineError::Launch(format!("{}: {}", opts.user_data_dir.display(), e)))?;

        let mut arg_vec: Vec<OsString> = vec![
            OsString::from("--disable-gpu"),
            OsString::from("--disable-dev-shm-usage"),
            OsString::from("--no-first-run"),
            OsString::from("--no-default-browser-check"),
            OsString::from("--hide-scrollbars"),
        ];
        if !opts.headful {
            arg_vec.push(OsString::from("--headless=new"));
        }
        if let Some(p) = &opts.proxy {
            arg_vec.push(OsString::from(format!("--proxy-server={}", p)));
        }
        if opts.ignore_certificate_errors {
            arg_vec.push(OsString::from("--ignore-certificate-errors"));
        }

        let launch_opts = LaunchOptionsBuilder::default()
            .headless(!opts.headful)
            .user_data_dir(Some(opts.user_data_dir.clone()))
            .window_size(Some(opts.window))
            .idle_browser_timeout(opts.idle_timeout)
            .args(
                arg_vec
                    .iter()
                    .map(|s| s.as_os_str())
                    .collect::<Vec<&OsStr>>(),
            )
            .build()
            .map_err(|e| EngineError::Launch(e.to_string()))?;

        let browser = Browser::new(launch_opts).map_err(|e| EngineError::Launch(e.to_string()))?;
        let tab = browser
            .new_tab()
            .map_err(|e| EngineError::Launch(e.to_string()))?;

        tab.call_method(Network::Enable {
            max_total_buffer_size: None,
            max_resource_buffer_size: None,
            max_post_data_size: None,
            report_direct_socket_traffic: None,
            enable_durable_messages: None,
        })
        .map_err(|e| EngineError::Protocol(e.to_string()))?;

        let bridge = Arc::new(EventBridge::new(events.clone()));
        tab.add_event_listener(Arc::new(move |event: &Event| bridge.on_event(event)))
            .map_err(|e| EngineError::Protocol(e.to_string()))?;

        info!(profile = %opts.user_data_dir.display(), headful = opts.headful, "browser started");
        Ok(Self {
            _browser: browser,
            tab,
            events,
        })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&Tab) -> Result<T, EngineError> + Send + 'static,
        T: Send + 'static,
    {
        let tab = self.tab.clone();
        tokio::task::spawn_blocking(move || f(&tab)).await?
    }
}

#[async_trait]
impl Engine for ChromeEngine {
    async fn open(&self, address: &str, options: &OpenOptions) -> Result<LoadStatus, EngineError> {
        if let Some(ua) = &options.user_agent {
            let default: String = evaluate_as(self, "JSON.stringify(navigator.userAgent)")
                .await
                .unwrap_or_default();
            let ua = ua.resolve(&default);
            debug!(user_agent = %ua, "overriding user agent");
            self.blocking(move |tab| {
                tab.set_user_agent(&ua, None, None)
                    .map(|_| ())
                    .map_err(|e| EngineError::Protocol(e.to_string()))
            })
            .await?;
        }
        if !options.headers.is_empty() {
            for (name, value) in &options.headers {
                info!(%name, %value, "custom header");
            }
            let headers = options.headers.clone();
            self.blocking(move |tab| {
                let map: HashMap<&str, &str> = headers
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect();
                tab.set_extra_http_headers(map)
                    .map(|_| ())
                    .map_err(|e| EngineError::Protocol(e.to_string()))
            })
            .await?;
        }

        let _ = self.events.send(PageEvent::LoadStarted { at: Utc::now() });
        let address = address.to_string();
        let outcome = self
            .blocking(move |tab| {
                if let Err(e) = tab.navigate_to(&address) {
                    return Ok(Err(Navigation::Rejected(e.to_string())));
                }
                Ok(tab
                    .wait_until_navigated()
                    .map(|_| ())
                    .map_err(|e| Navigation::Unsettled(e.to_string())))
            })
            .await?;
        Ok(load_status(outcome))
    }

    async fn evaluate(&self, script: &str) -> Result<Value, EngineError> {
        let script = script.to_string();
        self.blocking(move |tab| {
            tab.evaluate(&script, false)
                .map(|remote| remote.value.unwrap_or(Value::Null))
                .map_err(|e| EngineError::Evaluation(e.to_string()))
        })
        .await
    }

    async fn set_viewport(&self, width: u32, height: u32) -> Result<(), EngineError> {
        self.blocking(move |tab| {
            tab.set_bounds(Bounds::Normal {
                left: None,
                top: None,
                width: Some(f64::from(width)),
                height: Some(f64::from(height)),
            })
            .map(|_| ())
            .map_err(|e| EngineError::Protocol(e.to_string()))
        })
        .await
    }

    async fn scroll_to(&self, top: f64, left: f64) -> Result<(), EngineError> {
        trace!(top, left, "scroll");
        self.evaluate(&format!("window.scrollTo({}, {}); true", left, top))
            .await
            .map(|_| ())
    }

    async fn render_region(&self, clip: Option<ClipRect>) -> Result<Vec<u8>, EngineError> {
        self.blocking(move |tab| {
            let viewport = clip.map(|c| Viewport {
                x: c.left,
                y: c.top,
                width: c.width,
                height: c.height,
                scale: 1.0,
            });
            tab.capture_screenshot(CaptureScreenshotFormatOption::Png, None, viewport, true)
                .map_err(|e| EngineError::Raster(e.to_string()))
        })
        .await
    }

    async fn content(&self) -> Result<String, EngineError> {
        self.blocking(|tab| {
            tab.get_content()
                .map_err(|e| EngineError::Evaluation(e.to_string()))
        })
        .await
    }

    async fn url(&self) -> Result<String, EngineError> {
        Ok(self.tab.get_url())
    }

    async fn cookies(&self) -> Result<Vec<Cookie>, EngineError> {
        self.blocking(|tab| {
            let all = tab
                .get_cookies()
                .map_err(|e| EngineError::Protocol(e.to_string()))?;
            Ok(all
                .into_iter()
                .map(|c| Cookie {
                    name: c.name,
                    value: c.value,
                    domain: c.domain,
                    path: c.path,
                    secure: c.secure,
                    http_only: c.http_only,
                    expires: Some(c.expires),
                })
                .collect())
        })
        .await
    }
}
