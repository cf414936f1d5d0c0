//! Segment planning for split downloads

use crate::error::Result;
use reqwest::header::{HeaderMap, ACCEPT_RANGES, CONTENT_LENGTH};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

const HEAD_TIMEOUT: Duration = Duration::from_secs(15);

/// Inclusive byte range `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Outcome of probing a URL for a split download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentPlan {
    pub supports_split: bool,
    pub total_size: u64,
    pub ranges: Vec<ByteRange>,
}

impl SegmentPlan {
    fn unsupported(total_size: u64) -> Self {
        Self {
            supports_split: false,
            total_size,
            ranges: Vec::new(),
        }
    }
}

/// Ask `url` for its size with a HEAD request and split it into `split_count` ranges.
///
/// A server that does not advertise `Accept-Ranges: bytes` or a size yields
/// an unsupported plan; the caller then downloads with a single stream.
pub async fn plan(
    client: &Client,
    url: &str,
    headers: &[(String, String)],
    split_count: usize,
) -> Result<SegmentPlan> {
    let mut request = client.head(url).timeout(HEAD_TIMEOUT);
    for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
    }

    let response = request.send().await?;
    if !response.status().is_success() {
        warn!("HEAD {} returned {}, not splitting", url, response.status());
        return Ok(SegmentPlan::unsupported(0));
    }

    let accepts_ranges = response
        .headers()
        .get(ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(',').any(|unit| unit.trim().eq_ignore_ascii_case("bytes")));
    let total_size = content_length(response.headers()).unwrap_or(0);

    if !accepts_ranges || total_size == 0 {
        info!("Server does not support split download for {}", url);
        return Ok(SegmentPlan::unsupported(total_size));
    }

    Ok(SegmentPlan {
        supports_split: true,
        total_size,
        ranges: partition(total_size, split_count),
    })
}

/// Split `[0, total_size)` into contiguous ranges of equal size, the last
/// one absorbing the remainder.
///
/// Never produces empty ranges: fewer ranges come back when the file is
/// smaller than `split_count` bytes.
pub fn partition(total_size: u64, split_count: usize) -> Vec<ByteRange> {
    if total_size == 0 {
        return Vec::new();
    }

    let count = (split_count.max(1) as u64).min(total_size);
    let part_size = total_size / count;

    (0..count)
        .map(|i| {
            let start = i * part_size;
            let end = if i == count - 1 {
                total_size - 1
            } else {
                start + part_size - 1
            };
            ByteRange::new(start, end)
        })
        .collect()
}

/// Read `Content-Length` from the headers.
///
/// Used instead of `Response::content_length`, which reports the body size
/// hint and is always zero for HEAD responses.
pub(crate) fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}
