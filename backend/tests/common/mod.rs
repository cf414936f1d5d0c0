//! Common utilities for integration tests
//!
//! A small HTTP/1.1 server that understands HEAD and byte-range GETs, with
//! knobs for failing requests, ignoring ranges and dribbling bodies slowly.

#![allow(dead_code)]

use macan_downloader::{DownloadId, DownloadManager, DownloadSettings, DownloadSnapshot};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const FILE_PATH: &str = "/files/data.bin";

/// Deterministic, non-repeating-looking payload
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 7) % 256) as u8).collect()
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub data: Vec<u8>,
    pub accept_ranges: bool,
    /// Answer HEAD with 405
    pub reject_head: bool,
    /// Answer 200 with the whole body even when a range is asked for
    pub ignore_ranges: bool,
    /// The first N GET requests get a 500
    pub fail_first: usize,
    /// The N GETs after the failing ones send half their body, without a
    /// Content-Length, and close the connection
    pub truncate_first: usize,
    pub chunk_size: usize,
    /// Pause between body chunks
    pub chunk_delay: Option<Duration>,
}

impl ServerConfig {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            accept_ranges: true,
            reject_head: false,
            ignore_ranges: false,
            fail_first: 0,
            truncate_first: 0,
            chunk_size: 16 * 1024,
            chunk_delay: None,
        }
    }

    pub fn slow(mut self, chunk_size: usize, delay: Duration) -> Self {
        self.chunk_size = chunk_size;
        self.chunk_delay = Some(delay);
        self
    }
}

#[derive(Default)]
struct Stats {
    gets: AtomicUsize,
    heads: AtomicUsize,
    ranges: Mutex<Vec<Option<String>>>,
}

pub struct TestServer {
    addr: SocketAddr,
    stats: Arc<Stats>,
    task: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn start(config: ServerConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stats = Arc::new(Stats::default());
        let config = Arc::new(config);

        let server_stats = Arc::clone(&stats);
        let task = tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let config = Arc::clone(&config);
                let stats = Arc::clone(&server_stats);
                tokio::spawn(async move {
                    let _ = serve(socket, &config, &stats).await;
                });
            }
        });

        Self { addr, stats, task }
    }

    pub fn url(&self) -> String {
        self.url_for(FILE_PATH)
    }

    /// Every path serves the same payload
    pub fn url_for(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn gets(&self) -> usize {
        self.stats.gets.load(Ordering::SeqCst)
    }

    pub fn heads(&self) -> usize {
        self.stats.heads.load(Ordering::SeqCst)
    }

    /// Range header of every GET, in arrival order
    pub fn ranges(&self) -> Vec<Option<String>> {
        self.stats.ranges.lock().unwrap().clone()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(mut socket: TcpStream, config: &ServerConfig, stats: &Stats) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut chunk).await?;
        if n == 0 || buf.len() > 16 * 1024 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let head = String::from_utf8_lossy(&buf).to_string();
    let mut lines = head.split("\r\n");
    let method = lines
        .next()
        .and_then(|l| l.split_whitespace().next())
        .unwrap_or_default()
        .to_string();
    let range = lines
        .filter_map(|l| l.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("range"))
        .map(|(_, value)| value.trim().to_string());

    let len = config.data.len();

    if method == "HEAD" {
        stats.heads.fetch_add(1, Ordering::SeqCst);
        if config.reject_head {
            socket
                .write_all(
                    b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                )
                .await?;
            return socket.shutdown().await;
        }
        let accept = if config.accept_ranges {
            "Accept-Ranges: bytes\r\n"
        } else {
            ""
        };
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {len}\r\n{accept}Connection: close\r\n\r\n"
        );
        socket.write_all(head.as_bytes()).await?;
        return socket.shutdown().await;
    }

    let nth = stats.gets.fetch_add(1, Ordering::SeqCst);
    stats.ranges.lock().unwrap().push(range.clone());

    if nth < config.fail_first {
        socket
            .write_all(
                b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            )
            .await?;
        return socket.shutdown().await;
    }

    let parsed = range
        .as_deref()
        .filter(|_| !config.ignore_ranges)
        .and_then(parse_range);

    let (status, start, end) = match parsed {
        Some((start, _)) if start >= len as u64 => {
            let head = format!(
                "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Range: bytes */{len}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            );
            socket.write_all(head.as_bytes()).await?;
            return socket.shutdown().await;
        }
        Some((start, end)) => {
            let end = end.unwrap_or(len as u64 - 1).min(len as u64 - 1);
            ("206 Partial Content", start as usize, end as usize)
        }
        None => ("200 OK", 0, len.saturating_sub(1)),
    };

    let mut body = if len == 0 { &[][..] } else { &config.data[start..=end] };
    let content_range = if status.starts_with("206") {
        format!("Content-Range: bytes {start}-{end}/{len}\r\n")
    } else {
        String::new()
    };
    let truncated = nth < config.fail_first.saturating_add(config.truncate_first);
    let content_length = if truncated {
        body = &body[..body.len() / 2];
        String::new()
    } else {
        format!("Content-Length: {}\r\n", body.len())
    };
    let head = format!(
        "HTTP/1.1 {status}\r\n{content_length}{content_range}Accept-Ranges: bytes\r\nConnection: close\r\n\r\n"
    );
    socket.write_all(head.as_bytes()).await?;

    for piece in body.chunks(config.chunk_size.max(1)) {
        socket.write_all(piece).await?;
        if let Some(delay) = config.chunk_delay {
            tokio::time::sleep(delay).await;
        }
    }
    socket.shutdown().await
}

/// `bytes=10-20` or `bytes=10-`
fn parse_range(value: &str) -> Option<(u64, Option<u64>)> {
    let bounds = value.strip_prefix("bytes=")?;
    let (start, end) = bounds.split_once('-')?;
    let start = start.trim().parse().ok()?;
    let end = match end.trim() {
        "" => None,
        end => Some(end.parse().ok()?),
    };
    Some((start, end))
}

pub fn settings(max_concurrent: usize) -> DownloadSettings {
    DownloadSettings {
        max_concurrent_downloads: max_concurrent,
        speed_limit_kbps: 0,
        default_destination: std::env::temp_dir(),
        user_agent: "macan-tests".to_string(),
        connect_timeout_secs: 5,
        read_timeout_secs: 10,
    }
}

/// Poll until the download matches `pred` or the timeout passes
pub async fn wait_for(
    manager: &DownloadManager,
    id: &DownloadId,
    timeout: Duration,
    pred: impl Fn(&DownloadSnapshot) -> bool,
) -> DownloadSnapshot {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let snapshot = manager.get(id).await.expect("download exists");
        if pred(&snapshot) {
            return snapshot;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting, last state: {snapshot:?}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Part files left next to `destination`
pub fn leftover_parts(destination: &std::path::Path) -> Vec<std::path::PathBuf> {
    let dir = destination.parent().unwrap();
    let prefix = format!("{}.part", destination.file_name().unwrap().to_string_lossy());
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().starts_with(&prefix))
                .unwrap_or(false)
        })
        .collect()
}
