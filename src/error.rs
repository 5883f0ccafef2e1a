//! Error types for the engine seam and the capture run.

use thiserror::Error;

/// Errors reported by a rendering engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The browser process could not be started.
    #[error("browser launch failed: {0}")]
    Launch(String),

    /// A script evaluated in the page threw or returned garbage.
    #[error("script evaluation failed: {0}")]
    Evaluation(String),

    /// Rasterization of a region failed.
    #[error("rasterization failed: {0}")]
    Raster(String),

    /// Any other protocol-level failure.
    #[error("engine protocol error: {0}")]
    Protocol(String),

    /// A blocking engine call could not be joined.
    #[error("engine task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors that end a capture run.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The safety timer expired while a render pass was still running.
    #[error("render pass did not complete within {0} ms after the hard deadline")]
    RenderStalled(u64),
}

/// Errors while handing the archive to warcprox.
#[derive(Debug, Error)]
pub enum ExportError {
    /// Nothing was fetched, so there is nothing worth archiving.
    #[error("no requests or responses were recorded")]
    NoEntries,

    #[error("rendered content is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("image conversion failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("warcprox connection failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("warcprox did not answer within {0} ms")]
    Timeout(u64),

    #[error("malformed warcprox response: {0:?}")]
    BadResponse(String),
}
