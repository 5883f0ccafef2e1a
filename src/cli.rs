use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;

use crate::chrome::{profile_dir, BrowserOptions};
use crate::config::{
    CaptureConfig, OpenOptions, UserAgent, DEFAULT_HARD_DEADLINE_MS, DEFAULT_MAX_CLIP_HEIGHT,
    DEFAULT_MIN_CLIP_HEIGHT, DEFAULT_QUIET_PERIOD_MS, DEFAULT_SCROLL_INTERVAL_MS,
    DEFAULT_SCROLL_STEP_PX, DEFAULT_VIEWPORT_HEIGHT, DEFAULT_VIEWPORT_WIDTH,
};
use crate::warcprox::WarcproxClient;

fn parse_url(s: &str) -> Result<String, String> {
    url::Url::parse(s)
        .map(|_| s.to_string())
        .map_err(|e| format!("invalid URL {:?}: {}", s, e))
}

/// Capture one page into a HAR-derived archive with rendered elements.
#[derive(Parser, Debug)]
#[command(version)]
pub struct Cli {
    /// URL to capture
    #[arg(value_parser = parse_url)]
    pub url: String,
    /// Where to write the archive JSON ("-" for stdout)
    pub output: String,
    /// CSS selectors to render (defaults to the full page)
    pub selectors: Vec<String>,

    /// Replace the browser user agent
    #[arg(long, env = "USER_AGENT")]
    pub user_agent: Option<String>,
    /// Append to the browser user agent
    #[arg(long, env = "USER_AGENT_ADDITIONAL")]
    pub user_agent_additional: Option<String>,
    /// Send an Accept-Datetime header (e.g. "Thu, 31 May 2007 20:35:00 GMT")
    #[arg(long, env = "MEMENTO_ACCEPT_DATETIME")]
    pub accept_datetime: Option<String>,
    /// WARC prefix sent in a Warcprox-Meta header
    #[arg(long, env = "WARCPROX_WARC_PREFIX")]
    pub warc_prefix: Option<String>,
    /// Crawl identifier sent in a Crawl-ID header
    #[arg(long, env = "CRAWL_ID")]
    pub crawl_id: Option<String>,

    /// Milliseconds without network activity before rendering
    #[arg(long, default_value_t = DEFAULT_QUIET_PERIOD_MS)]
    pub quiet_ms: u64,
    /// Milliseconds after page-open before rendering is forced
    #[arg(long, default_value_t = DEFAULT_HARD_DEADLINE_MS)]
    pub deadline_ms: u64,
    #[arg(long, default_value_t = DEFAULT_VIEWPORT_WIDTH)]
    pub viewport_width: u32,
    #[arg(long, default_value_t = DEFAULT_VIEWPORT_HEIGHT)]
    pub viewport_height: u32,
    /// Pixels per auto-scroll step
    #[arg(long, default_value_t = DEFAULT_SCROLL_STEP_PX)]
    pub scroll_step_px: u32,
    #[arg(long, default_value_t = DEFAULT_SCROLL_INTERVAL_MS)]
    pub scroll_interval_ms: u64,

    /// Also write an HTML image map of the full-page render
    #[arg(long)]
    pub imagemap: Option<PathBuf>,

    /// warcprox address (host:port) to write WARC records to
    #[arg(long, env = "WARCPROX")]
    pub warcprox: Option<String>,
    /// Keep rendered elements and content in the HAR written to warcprox
    #[arg(long, requires = "warcprox")]
    pub warcprox_include_rendered: bool,

    /// Run Chrome in headful mode
    #[arg(long)]
    pub headful: bool,
    /// Named Chrome profile for persistent sessions
    #[arg(long, default_value = "default")]
    pub profile: String,
    /// Override the Chrome user-data-dir
    #[arg(long)]
    pub user_data_dir: Option<PathBuf>,
    /// Proxy server URL (http:// or socks5://)
    #[arg(long, env = "HTTP_PROXY")]
    pub proxy: Option<String>,
    #[arg(long)]
    pub ignore_certificate_errors: bool,
}

impl Cli {
    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            quiet_period: Duration::from_millis(self.quiet_ms),
            hard_deadline: Duration::from_millis(self.deadline_ms),
            viewport_width: self.viewport_width,
            viewport_height: self.viewport_height,
            scroll_step: self.scroll_step_px,
            scroll_interval: Duration::from_millis(self.scroll_interval_ms.max(1)),
            min_clip_height: DEFAULT_MIN_CLIP_HEIGHT,
            max_clip_height: DEFAULT_MAX_CLIP_HEIGHT,
        }
    }

    /// Headers and user agent handed to the engine verbatim.
    pub fn open_options(&self) -> OpenOptions {
        let mut headers = BTreeMap::new();
        if let Some(dt) = &self.accept_datetime {
            headers.insert("Accept-Datetime".to_string(), dt.clone());
        }
        if let Some(prefix) = &self.warc_prefix {
            headers.insert(
                "Warcprox-Meta".to_string(),
                serde_json::json!({ "warc-prefix": prefix }).to_string(),
            );
        }
        if let Some(id) = &self.crawl_id {
            headers.insert("Crawl-ID".to_string(), id.clone());
        }
        let user_agent = self
            .user_agent
            .clone()
            .map(UserAgent::Replace)
            .or_else(|| self.user_agent_additional.clone().map(UserAgent::Append));
        OpenOptions {
            headers,
            user_agent,
        }
    }

    pub fn browser_options(&self) -> BrowserOptions {
        BrowserOptions {
            headful: self.headful,
            user_data_dir: profile_dir(&self.profile, self.user_data_dir.clone()),
            proxy: self.proxy.clone(),
            ignore_certificate_errors: self.ignore_certificate_errors,
            window: (self.viewport_width, self.viewport_height),
            // The connection stays quiet for at most the deadline plus the
            // safety window.
            idle_timeout: Duration::from_millis(self.deadline_ms.saturating_mul(3).max(30_000)),
        }
    }

    /// Client for the warcprox export. The WARC prefix defaults to today's
    /// date.
    pub fn warcprox_client(&self) -> Option<WarcproxClient> {
        let address = self.warcprox.as_deref()?;
        let prefix = self
            .warc_prefix
            .clone()
            .unwrap_or_else(|| Utc::now().format("%Y-%m-%d").to_string());
        Some(WarcproxClient::new(address, &prefix))
    }

    pub fn writes_to_stdout(&self) -> bool {
        self.output == "-"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_url_output_and_selectors() {
        let cli = Cli::try_parse_from([
            "pagearchive",
            "https://example.com",
            "out.json",
            "#main",
            ".nav",
        ])
        .unwrap();
        assert_eq!(cli.url, "https://example.com");
        assert_eq!(cli.output, "out.json");
        assert_eq!(cli.selectors, vec!["#main", ".nav"]);
        assert!(!cli.writes_to_stdout());
    }

    #[test]
    fn no_selectors_is_allowed() {
        let cli = Cli::try_parse_from(["pagearchive", "https://example.com", "-"]).unwrap();
        assert!(cli.selectors.is_empty());
        assert!(cli.writes_to_stdout());
    }

    #[test]
    fn rejects_bad_url() {
        assert!(Cli::try_parse_from(["pagearchive", "not a url", "-"]).is_err());
    }

    #[test]
    fn timing_flags_feed_capture_config() {
        let cli = Cli::try_parse_from([
            "pagearchive",
            "https://example.com",
            "-",
            "--quiet-ms",
            "500",
            "--deadline-ms",
            "10000",
        ])
        .unwrap();
        let config = cli.capture_config();
        assert_eq!(config.quiet_period, Duration::from_millis(500));
        assert_eq!(config.hard_deadline, Duration::from_secs(10));
        assert_eq!(config.viewport_width, 1280);
    }

    #[test]
    fn header_flags_become_open_headers() {
        let cli = Cli::try_parse_from([
            "pagearchive",
            "https://example.com",
            "-",
            "--accept-datetime",
            "Thu, 31 May 2007 20:35:00 GMT",
            "--warc-prefix",
            "bl-2024",
            "--crawl-id",
            "crawl-7",
            "--user-agent",
            "renderbot/2.0",
        ])
        .unwrap();
        let opts = cli.open_options();
        assert_eq!(opts.headers["Accept-Datetime"], "Thu, 31 May 2007 20:35:00 GMT");
        assert_eq!(opts.headers["Warcprox-Meta"], r#"{"warc-prefix":"bl-2024"}"#);
        assert_eq!(opts.headers["Crawl-ID"], "crawl-7");
        assert_eq!(opts.user_agent, Some(UserAgent::Replace("renderbot/2.0".into())));
    }

    #[test]
    fn warcprox_prefix_defaults_to_date() {
        let cli = Cli::try_parse_from([
            "pagearchive",
            "https://example.com",
            "-",
            "--warcprox",
            "http://localhost:8000",
        ])
        .unwrap();
        assert!(!cli.warcprox_include_rendered);
        let client = cli.warcprox_client().unwrap();
        assert_eq!(client.address(), "localhost:8000");

        let none = Cli::try_parse_from(["pagearchive", "https://example.com", "-"]).unwrap();
        assert!(none.warcprox_client().is_none());
    }

    #[test]
    fn include_rendered_needs_warcprox() {
        assert!(Cli::try_parse_from([
            "pagearchive",
            "https://example.com",
            "-",
            "--warcprox-include-rendered",
        ])
        .is_err());
    }
}
