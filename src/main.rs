use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pagearchive::chrome::ChromeEngine;
use pagearchive::imagemap::build_imagemap;
use pagearchive::{ArchiveRecord, CaptureError, CaptureOutcome, CaptureSession, Cli, ExportError};

/// Exit status when the render pass had to be abandoned.
const EXIT_RENDER_STALLED: i32 = 3;

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout may carry the archive, so logs go to stderr.
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .init();
}

fn write_archive(cli: &Cli, record: &ArchiveRecord) -> Result<()> {
    let json = record.to_json_pretty()?;
    if cli.writes_to_stdout() {
        println!("{}", json);
    } else {
        std::fs::write(&cli.output, json)
            .with_context(|| format!("writing archive to {}", cli.output))?;
        info!(path = %cli.output, "archive written");
    }
    if let Some(path) = &cli.imagemap {
        match build_imagemap(record) {
            Some(html) => {
                std::fs::write(path, html)
                    .with_context(|| format!("writing image map to {}", path.display()))?;
                info!(path = %path.display(), "image map written");
            }
            None => warn!("no full-page render, skipping image map"),
        }
    }
    Ok(())
}

async fn export(cli: &Cli, record: &ArchiveRecord) -> Result<()> {
    let Some(client) = cli.warcprox_client() else {
        return Ok(());
    };
    match client.export(record, cli.warcprox_include_rendered).await {
        Ok(_) => Ok(()),
        Err(ExportError::NoEntries) => {
            warn!("nothing was fetched, skipping warcprox export");
            Ok(())
        }
        Err(e) => Err(e).with_context(|| format!("exporting to warcprox at {}", client.address())),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Cli::parse();
    init_logging();

    let (tx, rx) = mpsc::unbounded_channel();
    let engine = ChromeEngine::launch(&args.browser_options(), tx)
        .context("headless-chrome launch failed")?;

    let session = CaptureSession::new(
        Arc::new(engine),
        args.capture_config(),
        args.url.clone(),
        args.open_options(),
        args.selectors.clone(),
    );

    match session.run(rx).await {
        Ok(CaptureOutcome::Rendered(record)) => {
            write_archive(&args, &record)?;
            export(&args, &record).await?;
            Ok(ExitCode::SUCCESS)
        }
        Ok(CaptureOutcome::LoadFailed(record)) => {
            // A failed load is still a recorded outcome.
            write_archive(&args, &record)?;
            export(&args, &record).await?;
            Ok(ExitCode::SUCCESS)
        }
        Err(e @ CaptureError::RenderStalled(_)) => {
            error!(error = %e, "forcing exit");
            // A stuck engine call would keep the runtime from shutting down.
            std::process::exit(EXIT_RENDER_STALLED);
        }
    }
}
