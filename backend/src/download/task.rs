//! A single resumable HTTP transfer (one file or one segment)

use crate::download::planner::{content_length, ByteRange};
use crate::download::throttle::Throttle;
use crate::error::{DownloadError, Result};
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, CONTENT_RANGE, RANGE};
use reqwest::{Client, StatusCode};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Bytes written (and reported) per step
pub const CHUNK_SIZE: usize = 8 * 1024;

/// How often a paused transfer re-checks its control signal
pub const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// What a transfer should fetch and where to put it
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub url: String,
    /// File to append to; its current size is the resume point
    pub path: PathBuf,
    /// Segment of the remote resource, `None` for the whole file
    pub range: Option<ByteRange>,
    /// Bytes per second, `None` for unlimited
    pub rate_limit: Option<u64>,
    pub headers: Vec<(String, String)>,
    /// Longest wait for the response or the next body chunk
    pub read_timeout: Duration,
}

/// Events emitted by a running transfer, in order
#[derive(Debug)]
pub enum TransferEvent {
    /// The server answered; `total` is 0 when unknown
    Started { total: u64, resumed_from: u64 },
    /// Cumulative bytes on disk for this transfer
    Progress(u64),
    Finished { total: u64 },
    Failed(DownloadError),
    /// Ended on request without finishing
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Run,
    Pause,
    Stop,
}

/// Scheduler-side handle used to pause, resume or stop one transfer
#[derive(Debug)]
pub struct TransferControl {
    tx: watch::Sender<ControlSignal>,
}

impl TransferControl {
    pub fn new(initial: ControlSignal) -> (Self, watch::Receiver<ControlSignal>) {
        let (tx, rx) = watch::channel(initial);
        (Self { tx }, rx)
    }

    pub fn pause(&self) {
        self.tx.send_if_modified(|s| {
            let changed = *s == ControlSignal::Run;
            if changed {
                *s = ControlSignal::Pause;
            }
            changed
        });
    }

    pub fn resume(&self) {
        self.tx.send_if_modified(|s| {
            let changed = *s == ControlSignal::Pause;
            if changed {
                *s = ControlSignal::Run;
            }
            changed
        });
    }

    /// Stop is final; later pause/resume calls are ignored
    pub fn stop(&self) {
        self.tx.send_replace(ControlSignal::Stop);
    }
}

enum Outcome {
    Finished { total: u64 },
    Stopped,
}

/// Run one transfer to its end, reporting through `emit`.
///
/// Exactly one terminal event (`Finished`, `Failed` or `Stopped`) is emitted.
/// Errors never escape; they become `Failed`.
pub async fn run_transfer<F>(
    client: &Client,
    request: TransferRequest,
    mut control: watch::Receiver<ControlSignal>,
    mut emit: F,
) where
    F: FnMut(TransferEvent),
{
    let event = match transfer(client, &request, &mut control, &mut emit).await {
        Ok(Outcome::Finished { total }) => {
            debug!("Transfer finished: {:?} ({} bytes)", request.path, total);
            TransferEvent::Finished { total }
        }
        Ok(Outcome::Stopped) => {
            debug!("Transfer stopped: {:?}", request.path);
            TransferEvent::Stopped
        }
        Err(e) => {
            warn!("Transfer of {} failed: {}", request.url, e);
            TransferEvent::Failed(e)
        }
    };
    emit(event);
}

async fn transfer<F>(
    client: &Client,
    request: &TransferRequest,
    control: &mut watch::Receiver<ControlSignal>,
    emit: &mut F,
) -> Result<Outcome>
where
    F: FnMut(TransferEvent),
{
    if !wait_while_paused(control).await {
        return Ok(Outcome::Stopped);
    }

    if let Some(parent) = request.path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    let mut resume_from = match fs::metadata(&request.path).await {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == ErrorKind::NotFound => 0,
        Err(e) => return Err(e.into()),
    };

    let mut builder = client.get(&request.url);
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    if let Some(range) = request.range {
        let start = range.start + resume_from;
        if start > range.end {
            debug!("Segment {:?} already complete", request.path);
            return Ok(Outcome::Finished { total: range.len() });
        }
        builder = builder.header(RANGE, format!("bytes={}-{}", start, range.end));
    } else if resume_from > 0 {
        builder = builder.header(RANGE, format!("bytes={}-", resume_from));
    }

    let response = tokio::time::timeout(request.read_timeout, builder.send())
        .await
        .map_err(|_| DownloadError::Timeout)??;
    let status = response.status();

    if status == StatusCode::RANGE_NOT_SATISFIABLE {
        info!(
            "Server reports nothing left for {:?}, treating as complete",
            request.path
        );
        return Ok(Outcome::Finished { total: resume_from });
    }

    if !status.is_success() {
        return Err(DownloadError::HttpStatus(status));
    }

    let ranged = status == StatusCode::PARTIAL_CONTENT;
    let body_len = content_length(response.headers());
    let total = match request.range {
        Some(_) if !ranged => return Err(DownloadError::RangeIgnored),
        Some(range) => range.len(),
        None if ranged => content_range_total(response.headers())
            .or_else(|| body_len.map(|len| len + resume_from))
            .unwrap_or(0),
        None => {
            if resume_from > 0 {
                info!("Server ignored resume for {}, restarting", request.url);
            }
            resume_from = 0;
            body_len.unwrap_or(0)
        }
    };

    let mut file = if resume_from > 0 {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&request.path)
            .await?
    } else {
        File::create(&request.path).await?
    };

    emit(TransferEvent::Started {
        total,
        resumed_from: resume_from,
    });

    let mut written = resume_from;
    let mut throttle = request.rate_limit.map(Throttle::new);
    let mut stream = response.bytes_stream();

    loop {
        if !wait_while_paused(control).await {
            file.flush().await?;
            return Ok(Outcome::Stopped);
        }

        let next = tokio::select! {
            biased;
            _ = stop_requested(control) => {
                file.flush().await?;
                return Ok(Outcome::Stopped);
            }
            next = tokio::time::timeout(request.read_timeout, stream.next()) => {
                next.map_err(|_| DownloadError::Timeout)?
            }
        };

        let Some(bytes) = next else {
            break;
        };
        let bytes = bytes?;

        for chunk in bytes.chunks(CHUNK_SIZE) {
            if !wait_while_paused(control).await {
                file.flush().await?;
                return Ok(Outcome::Stopped);
            }

            file.write_all(chunk).await?;
            written += chunk.len() as u64;
            emit(TransferEvent::Progress(written));

            if let Some(throttle) = throttle.as_mut() {
                throttle.consume(chunk.len()).await;
            }
        }
    }

    file.flush().await?;

    if total > 0 && written < total {
        return Err(DownloadError::Incomplete {
            received: written,
            expected: total,
        });
    }

    Ok(Outcome::Finished {
        total: if total > 0 { total } else { written },
    })
}

/// Block while paused. Returns false once a stop is seen.
async fn wait_while_paused(control: &mut watch::Receiver<ControlSignal>) -> bool {
    loop {
        let signal = *control.borrow_and_update();
        match signal {
            ControlSignal::Run => return true,
            ControlSignal::Stop => return false,
            ControlSignal::Pause => {
                // a dropped handle means nobody can resume us
                if let Ok(Err(_)) = tokio::time::timeout(PAUSE_POLL_INTERVAL, control.changed()).await {
                    return false;
                }
            }
        }
    }
}

async fn stop_requested(control: &mut watch::Receiver<ControlSignal>) {
    let _ = control.wait_for(|s| *s == ControlSignal::Stop).await;
}

/// Total size from `Content-Range: bytes 100-199/1000`
fn content_range_total(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_RANGE)?
        .to_str()
        .ok()?
        .rsplit('/')
        .next()?
        .trim()
        .parse()
        .ok()
}
