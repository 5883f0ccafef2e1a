//! The capture session: one owned value that consumes engine lifecycle
//! events, drives the render scheduler and produces the archive record.
//!
//! The session loop is the only place that mutates the tracker and the
//! scheduler. Suspension happens only at engine calls and timer expiries.

use std::future::{pending, Future};
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::archive::{assemble, ArchiveRecord, PageInfo, RenderedArtifacts};
use crate::capture::capture_all;
use crate::clickables::collect_clickables;
use crate::config::{CaptureConfig, OpenOptions};
use crate::engine::{evaluate_as, Engine, EventReceiver, LoadStatus, PageEvent};
use crate::error::CaptureError;
use crate::scheduler::{CaptureState, RenderScheduler, Tick};
use crate::tracker::{Activity, ResourceTracker};
use crate::viewport::{stabilize_viewport, AutoScroller};

const TITLE_SCRIPT: &str = "JSON.stringify(document.title)";

/// How a run ended. Both variants carry a record worth writing out.
#[derive(Debug)]
pub enum CaptureOutcome {
    Rendered(ArchiveRecord),
    /// The engine reported a failed load before any render started.
    LoadFailed(ArchiveRecord),
}

impl CaptureOutcome {
    pub fn record(&self) -> &ArchiveRecord {
        match self {
            CaptureOutcome::Rendered(r) | CaptureOutcome::LoadFailed(r) => r,
        }
    }

    pub fn into_record(self) -> ArchiveRecord {
        match self {
            CaptureOutcome::Rendered(r) | CaptureOutcome::LoadFailed(r) => r,
        }
    }
}

struct RenderOutput {
    page: PageInfo,
    artifacts: RenderedArtifacts,
}

type RenderFuture = Pin<Box<dyn Future<Output = RenderOutput> + Send>>;

pub struct CaptureSession {
    engine: Arc<dyn Engine>,
    config: Arc<CaptureConfig>,
    address: String,
    options: OpenOptions,
    selectors: Vec<String>,
    tracker: ResourceTracker,
    scheduler: RenderScheduler,
    started: Option<DateTime<Utc>>,
}

impl CaptureSession {
    pub fn new(
        engine: Arc<dyn Engine>,
        config: CaptureConfig,
        address: impl Into<String>,
        options: OpenOptions,
        selectors: Vec<String>,
    ) -> Self {
        let scheduler = RenderScheduler::new(&config);
        Self {
            engine,
            config: Arc::new(config),
            address: address.into(),
            options,
            selectors,
            tracker: ResourceTracker::new(),
            scheduler,
            started: None,
        }
    }

    /// Opens the page and runs until the archive is assembled.
    ///
    /// The only error is a render pass that outlives the safety timer.
    pub async fn run(mut self, mut events: EventReceiver) -> Result<CaptureOutcome, CaptureError> {
        let opened_at = Utc::now();
        let mut scroller = Some(AutoScroller::spawn(
            self.engine.clone(),
            self.config.scroll_step,
            self.config.scroll_interval,
        ));

        let open = {
            let engine = self.engine.clone();
            let address = self.address.clone();
            let options = self.options.clone();
            let limit = self.config.hard_deadline;
            async move { timeout(limit, engine.open(&address, &options)).await }
        };
        tokio::pin!(open);
        let mut opened = false;
        let mut events_open = true;
        let mut render: Option<RenderFuture> = None;

        info!(address = %self.address, "opening page");
        loop {
            tokio::select! {
                biased;

                output = next_render(&mut render) => {
                    let record = assemble(output.page, &self.tracker.snapshot(), output.artifacts);
                    self.scheduler.gate().finish();
                    info!(entries = record.entries().len(), "archive assembled");
                    return Ok(CaptureOutcome::Rendered(record));
                }

                tick = self.scheduler.next_tick() => match tick {
                    Tick::Render(trigger) => {
                        info!(?trigger, in_flight = self.tracker.in_flight(), "starting render pass");
                        if let Some(s) = scroller.take() {
                            s.stop();
                        }
                        render = Some(Box::pin(render_pass(
                            self.engine.clone(),
                            self.config.clone(),
                            self.address.clone(),
                            self.selectors.clone(),
                            self.started.unwrap_or(opened_at),
                        )));
                    }
                    Tick::Ignored(_) => {}
                    Tick::SafetyExpired => {
                        let ms = self.config.hard_deadline.as_millis() as u64;
                        error!(ms, "render pass stalled, giving up");
                        return Err(CaptureError::RenderStalled(ms));
                    }
                },

                event = events.recv(), if events_open => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        debug!("engine event stream closed");
                        events_open = false;
                    }
                },

                status = &mut open, if !opened => {
                    opened = true;
                    self.scheduler.arm_deadline();
                    let status = match status {
                        Ok(Ok(status)) => status,
                        Ok(Err(e)) => {
                            warn!(error = %e, "engine could not open the page");
                            LoadStatus::Fail
                        }
                        Err(_) => {
                            warn!("page open did not report back, waiting for resources anyway");
                            LoadStatus::Success
                        }
                    };
                    if status == LoadStatus::Fail && self.scheduler.gate().abandon() {
                        warn!(address = %self.address, "opening the page did not succeed");
                        if let Some(s) = scroller.take() {
                            s.stop();
                        }
                        return Ok(CaptureOutcome::LoadFailed(self.failed_record(opened_at).await));
                    }
                    if self.tracker.in_flight() == 0
                        && !self.scheduler.quiet_armed()
                        && self.scheduler.gate().state() == CaptureState::AwaitingStability
                    {
                        self.scheduler.on_activity(Activity::Idle);
                    }
                }
            }
        }
    }

    fn handle_event(&mut self, event: PageEvent) {
        match event {
            PageEvent::LoadStarted { at } => {
                debug!(%at, "load started");
                self.started = Some(at);
            }
            PageEvent::ResourceRequested { id, request } => {
                let activity = self.tracker.on_request_started(id, request);
                self.scheduler.on_activity(activity);
            }
            PageEvent::ResourceReply { id, stage, reply } => {
                let activity = self.tracker.on_reply_stage(&id, stage, reply);
                self.scheduler.on_activity(activity);
            }
            PageEvent::ResourceError { url, error } => warn!(%url, %error, "resource error"),
            PageEvent::PageError { message } => warn!(%message, "page error"),
            PageEvent::LoadFinished => info!("load finished"),
        }
    }

    /// Page metadata only: no content, no renders, no entries.
    async fn failed_record(&self, opened_at: DateTime<Utc>) -> ArchiveRecord {
        let page = PageInfo {
            address: self.address.clone(),
            url: timeout(self.config.hard_deadline, self.engine.url())
                .await
                .ok()
                .and_then(Result::ok),
            title: None,
            started: self.started.unwrap_or(opened_at),
            on_load_ms: None,
        };
        assemble(page, &[], RenderedArtifacts::default())
    }
}

async fn next_render(render: &mut Option<RenderFuture>) -> RenderOutput {
    match render.as_mut() {
        Some(fut) => fut.as_mut().await,
        None => pending().await,
    }
}

/// Fits the viewport, then gathers every artifact. Each step degrades to
/// absence on engine errors.
async fn render_pass(
    engine: Arc<dyn Engine>,
    config: Arc<CaptureConfig>,
    address: String,
    selectors: Vec<String>,
    started: DateTime<Utc>,
) -> RenderOutput {
    let rendered_at = Utc::now();
    let engine = engine.as_ref();

    let title = match evaluate_as::<String>(engine, TITLE_SCRIPT).await {
        Ok(title) => Some(title),
        Err(e) => {
            warn!(error = %e, "could not read title");
            None
        }
    };

    let viewport_height = match stabilize_viewport(engine, &config).await {
        Ok(height) => height,
        Err(e) => {
            warn!(error = %e, "could not fit viewport");
            config.viewport_height
        }
    };

    let clickables = collect_clickables(engine).await;

    let content = match engine.content().await {
        Ok(html) => Some(html),
        Err(e) => {
            warn!(error = %e, "could not serialize page content");
            None
        }
    };

    let elements = capture_all(engine, &selectors, viewport_height, &config).await;

    let url = match engine.url().await {
        Ok(url) => Some(url),
        Err(e) => {
            warn!(error = %e, "could not read resolved url");
            None
        }
    };

    let cookies = engine.cookies().await.unwrap_or_else(|e| {
        warn!(error = %e, "could not read cookies");
        Vec::new()
    });

    RenderOutput {
        page: PageInfo {
            address,
            url,
            title,
            started,
            on_load_ms: Some((rendered_at - started).num_milliseconds()),
        },
        artifacts: RenderedArtifacts {
            content,
            elements: Some(elements),
            clickables,
            cookies,
        },
    }
}
