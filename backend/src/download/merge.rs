//! Joining the segment files of a split download

use crate::error::{DownloadError, Result};
use parking_lot::Mutex;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Merges are rare and disk-bound; one at a time process-wide.
static MERGE_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Path of segment `index` next to `destination`: `<destination>.part<index>`
pub fn part_path(destination: &Path, index: usize) -> PathBuf {
    let mut name = OsString::from(destination.as_os_str());
    name.push(format!(".part{}", index));
    PathBuf::from(name)
}

/// Concatenate `segment_count` part files into `destination`, deleting each
/// part once it has been copied. Returns the size of the merged file.
///
/// On failure the destination is left as is.
pub fn merge_segments(destination: &Path, segment_count: usize) -> Result<u64> {
    let _guard = MERGE_LOCK.lock();
    info!("Merging {} parts into {:?}", segment_count, destination);

    let mut out = BufWriter::new(
        File::create(destination).map_err(|e| merge_error(destination, "create", e))?,
    );
    let mut total = 0u64;

    for index in 0..segment_count {
        let part = part_path(destination, index);
        let mut src = File::open(&part).map_err(|e| merge_error(&part, "open", e))?;
        total += io::copy(&mut src, &mut out).map_err(|e| merge_error(&part, "copy", e))?;
        drop(src);

        out.flush().map_err(|e| merge_error(destination, "write", e))?;
        if let Err(e) = fs::remove_file(&part) {
            warn!("Failed to delete part file {:?}: {}", part, e);
        }
    }

    out.into_inner()
        .map_err(|e| merge_error(destination, "write", e.into_error()))?
        .sync_all()
        .map_err(|e| merge_error(destination, "sync", e))?;

    info!("Merge complete for {:?} ({} bytes)", destination, total);
    Ok(total)
}

/// Run [`merge_segments`] on the blocking pool
pub async fn merge(destination: PathBuf, segment_count: usize) -> Result<u64> {
    tokio::task::spawn_blocking(move || merge_segments(&destination, segment_count))
        .await
        .map_err(|e| DownloadError::Merge(format!("merge task panicked: {}", e)))?
}

fn merge_error(path: &Path, op: &str, err: io::Error) -> DownloadError {
    DownloadError::Merge(format!("cannot {} {}: {}", op, path.display(), err))
}
