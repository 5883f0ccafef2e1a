//! Single-page capture into a self-contained archive record: network
//! transactions, rendered element images, the serialized DOM and a map of
//! clickable elements, taken once the page has settled.

pub mod archive;
pub mod capture;
pub mod chrome;
pub mod cli;
pub mod clickables;
pub mod config;
pub mod engine;
pub mod error;
pub mod imagemap;
pub mod orchestrator;
pub mod scheduler;
pub mod tracker;
pub mod viewport;
pub mod warcprox;

#[cfg(test)]
mod testing;

pub use archive::ArchiveRecord;
pub use cli::Cli;
pub use config::{CaptureConfig, OpenOptions};
pub use engine::{Engine, PageEvent};
pub use error::{CaptureError, EngineError, ExportError};
pub use orchestrator::{CaptureOutcome, CaptureSession};
