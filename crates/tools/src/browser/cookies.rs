//! On-disk cookie records, one JSON file per site identity.
//!
//! Cookie attribute sets are opaque pass-through: whatever the browser
//! engine returned is what gets written, and writing always replaces the
//! whole record.

use std::path::PathBuf;

use authshot_core::Result;
use serde_json::Value;
use tracing::{debug, warn};

/// Result of clearing a single record. "Not found" is a normal outcome,
/// not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
    Deleted,
    NotFound,
}

#[derive(Debug, Clone)]
pub struct CookieStore {
    dir: PathBuf,
}

impl CookieStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Stable, filesystem-safe identity for a URL's host. Unparseable
    /// URLs map to a fixed fallback identity.
    pub fn identity_of(url: &str) -> String {
        url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.replace(['.', ':'], "_")))
            .unwrap_or_else(|| "unknown-site".to_string())
    }

    fn record_file(&self, url: &str) -> PathBuf {
        self.dir.join(format!("{}.json", Self::identity_of(url)))
    }

    /// Replace the full cookie list for the URL's site identity.
    pub fn save(&self, url: &str, cookies: &[Value]) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let file = self.record_file(url);
        std::fs::write(&file, serde_json::to_string_pretty(cookies)?)?;
        debug!(file = %file.display(), count = cookies.len(), "Saved cookies");
        Ok(())
    }

    /// Stored cookies for the URL's site identity. Missing or corrupt
    /// records both read as empty; there is no partial-cookie recovery.
    pub fn load(&self, url: &str) -> Vec<Value> {
        let file = self.record_file(url);
        let raw = match std::fs::read_to_string(&file) {
            Ok(raw) => raw,
            Err(_) => return Vec::new(),
        };
        match serde_json::from_str::<Vec<Value>>(&raw) {
            Ok(cookies) => cookies,
            Err(e) => {
                warn!(file = %file.display(), "Ignoring unreadable cookie record: {}", e);
                Vec::new()
            }
        }
    }

    /// Delete the one record for the URL's site identity.
    pub fn clear(&self, url: &str) -> Result<ClearOutcome> {
        let file = self.record_file(url);
        if !file.exists() {
            return Ok(ClearOutcome::NotFound);
        }
        std::fs::remove_file(&file)?;
        Ok(ClearOutcome::Deleted)
    }

    /// Delete every record. Returns the number deleted.
    pub fn clear_all(&self) -> Result<usize> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(0),
        };
        let mut deleted = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                std::fs::remove_file(&path)?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}
