//! Macan Downloader - a segmented, resumable HTTP download engine
//!
//! The engine accepts commands through [`DownloadManager`] and reports back
//! through [`EngineEvent`]s; presentation is left to the caller.

pub mod config;
pub mod download;
pub mod error;
pub mod store;

pub use config::{DownloadSettings, Settings};
pub use download::{
    ControlAction, DownloadManager, DownloadSnapshot, DownloadStats, EngineEvent, NewDownload,
    MAX_RETRIES,
};
pub use error::{DownloadError, Result};
pub use store::{DownloadId, DownloadRecord, DownloadStatus, DownloadStore};
