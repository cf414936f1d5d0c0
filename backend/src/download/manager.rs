//! Download manager: the command API in front of the scheduler

use crate::config::{DownloadSettings, Settings};
use crate::download::scheduler::{Command, Pending, Removed, Scheduler};
use crate::download::{part_path, DownloadSnapshot, EngineEvent};
use crate::error::{DownloadError, Result};
use crate::store::{DownloadId, DownloadStore};
use serde::Serialize;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{info, warn};

/// How long to wait for a stopped transfer to wind down
const UNIT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// User actions on an existing download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Pause,
    Resume,
    Stop,
    Retry,
}

impl ControlAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Stop => "stop",
            Self::Retry => "retry",
        }
    }
}

/// Request to add a new download
#[derive(Debug, Clone)]
pub struct NewDownload {
    pub url: String,
    /// File path, or a directory / empty path to name the file after the URL
    pub destination: PathBuf,
    /// Empty means "General"
    pub category: String,
    pub split_count: usize,
    /// Sent as-is with every request for this download
    pub headers: Vec<(String, String)>,
}

impl NewDownload {
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
            category: String::new(),
            split_count: 1,
            headers: Vec::new(),
        }
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn split_count(mut self, split_count: usize) -> Self {
        self.split_count = split_count.max(1);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Fill in category and destination folder from the user's settings.
    ///
    /// An empty category is inferred from the file extension; an empty
    /// destination becomes that category's folder.
    pub fn categorize(mut self, settings: &Settings) -> Self {
        if self.category.trim().is_empty() {
            let filename = crate::download::extract_filename(&self.url);
            self.category = settings.category_for_filename(&filename);
        }
        if self.destination.as_os_str().is_empty() {
            if let Some(dir) = settings.destination_for_category(&self.category) {
                self.destination = dir.to_path_buf();
            }
        }
        self
    }
}

/// Download statistics
#[derive(Debug, Clone, Serialize)]
pub struct DownloadStats {
    pub active: usize,
    pub queued: usize,
    pub max_concurrent: usize,
}

/// Handle to a running download engine.
///
/// Cheap to clone. Every call is a message to the scheduler task, which owns
/// all download state.
#[derive(Clone)]
pub struct DownloadManager {
    commands: mpsc::Sender<Command>,

    /// Broadcast channel for engine events
    events: broadcast::Sender<EngineEvent>,
}

impl DownloadManager {
    /// Load persisted downloads from `store` (if any) and start the scheduler.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(settings: DownloadSettings, store: Option<DownloadStore>) -> Result<Self> {
        let records = match &store {
            Some(store) => store.load()?,
            None => Vec::new(),
        };
        info!("Loaded {} downloads", records.len());

        let (events, _) = broadcast::channel(4096);
        let (commands, commands_rx) = mpsc::channel(64);
        let scheduler = Scheduler::new(settings, store, records, events.clone())?;
        tokio::spawn(scheduler.run(commands_rx));

        Ok(Self { commands, events })
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Add a download and try to start it right away
    pub async fn add(
        &self,
        url: impl Into<String>,
        destination: impl Into<PathBuf>,
        category: impl Into<String>,
        split_count: usize,
    ) -> Result<DownloadSnapshot> {
        let new = NewDownload::new(url, destination)
            .category(category)
            .split_count(split_count);
        self.add_download(new).await
    }

    pub async fn add_download(&self, new: NewDownload) -> Result<DownloadSnapshot> {
        self.request(|reply| Command::Add(new, reply)).await
    }

    pub async fn control(&self, id: &DownloadId, action: ControlAction) -> Result<()> {
        let id = id.clone();
        self.request(|reply| Command::Control(id, action, reply))
            .await
    }

    pub async fn pause(&self, id: &DownloadId) -> Result<()> {
        self.control(id, ControlAction::Pause).await
    }

    pub async fn resume(&self, id: &DownloadId) -> Result<()> {
        self.control(id, ControlAction::Resume).await
    }

    pub async fn stop(&self, id: &DownloadId) -> Result<()> {
        self.control(id, ControlAction::Stop).await
    }

    pub async fn retry(&self, id: &DownloadId) -> Result<()> {
        self.control(id, ControlAction::Retry).await
    }

    /// Stop and forget a download, optionally deleting what it wrote.
    ///
    /// Failing to delete the destination file is reported; leftover part
    /// files that cannot be deleted are only logged.
    pub async fn remove(&self, id: &DownloadId, delete_files: bool) -> Result<()> {
        let id = id.clone();
        let Removed { record, pending } = self.request(|reply| Command::Remove(id, reply)).await?;

        // a running merge would recreate the destination after we delete it
        reap(pending).await;

        if !delete_files {
            return Ok(());
        }

        for index in 0..record.split_count.max(1) {
            let part = part_path(&record.destination, index);
            match tokio::fs::remove_file(&part).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to delete part file {:?}: {}", part, e),
            }
        }

        match tokio::fs::remove_file(&record.destination).await {
            Ok(()) => {
                info!("Deleted {:?}", record.destination);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Drop Finished, Error and Stopped downloads from the list
    pub async fn clear_completed(&self) -> Result<usize> {
        self.request(Command::ClearCompleted).await
    }

    /// All downloads in the order they were added
    pub async fn list(&self) -> Result<Vec<DownloadSnapshot>> {
        self.request(Command::List).await
    }

    pub async fn get(&self, id: &DownloadId) -> Result<DownloadSnapshot> {
        let id = id.clone();
        self.request(|reply| Command::Get(id, reply)).await
    }

    /// Get current statistics
    pub async fn stats(&self) -> Result<DownloadStats> {
        self.request(Command::Stats).await
    }

    /// Replace the engine configuration.
    ///
    /// Applies to admissions and transfers started from now on.
    pub async fn update_config(&self, settings: DownloadSettings) -> Result<()> {
        self.request(|reply| Command::UpdateConfig(settings, reply))
            .await
    }

    /// Write the download list to the store
    pub async fn save(&self) -> Result<()> {
        self.request(Command::Save).await
    }

    /// Stop every transfer, save, and end the scheduler
    pub async fn shutdown(&self) -> Result<()> {
        let pending = self.request(Command::Shutdown).await?;
        reap(pending).await;
        Ok(())
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| DownloadError::EngineClosed)?;
        rx.await.map_err(|_| DownloadError::EngineClosed)?
    }
}

/// Wait for stopped transfers to end, giving up on stragglers, and for
/// merges to run to completion
async fn reap(pending: Pending) {
    for task in pending.transfers {
        if tokio::time::timeout(UNIT_SHUTDOWN_TIMEOUT, task).await.is_err() {
            warn!("Transfer did not stop within {:?}", UNIT_SHUTDOWN_TIMEOUT);
        }
    }
    for merge in pending.merges {
        if let Err(e) = merge.await {
            warn!("Merge task ended abnormally: {}", e);
        }
    }
}
