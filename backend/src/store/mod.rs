//! Persistence of the download list across restarts

mod schema;

pub use schema::*;

use crate::error::Result;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// JSON file holding every download record
#[derive(Debug, Clone)]
pub struct DownloadStore {
    path: PathBuf,
}

impl DownloadStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all records. A missing file is an empty list, not an error.
    pub fn load(&self) -> Result<Vec<DownloadRecord>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No download list at {:?}, starting empty", self.path);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let persisted: Vec<PersistedRecord> = serde_json::from_str(&content)?;
        Ok(persisted.into_iter().map(PersistedRecord::into_record).collect())
    }

    /// Write all records, replacing the previous file atomically
    pub fn save(&self, records: &[DownloadRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let persisted: Vec<PersistedRecord> = records.iter().map(PersistedRecord::from).collect();
        let content = serde_json::to_string_pretty(&persisted)?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        if let Err(e) = fs::rename(&tmp, &self.path) {
            warn!("Failed to replace {:?}: {}", self.path, e);
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        debug!("Saved {} downloads to {:?}", records.len(), self.path);
        Ok(())
    }
}
