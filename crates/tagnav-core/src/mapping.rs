//! Page ↔ tag UID index, persisted as JSON.
//!
//! File format:
//!
//! ```json
//! {
//!   "page_mappings": { "1": "04a21b22", "2": "04c3d9e1" },
//!   "total_pages": 10,
//!   "created_time": "2024-05-01T10:15:00+08:00"
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_MAPPING_FILE: &str = "page_mappings.json";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    #[error("Invalid page {page} (valid range: 1-{total_pages})")]
    InvalidPage { page: u32, total_pages: u32 },
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("Failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("Malformed mapping file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to serialize mappings: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// On-disk record.
#[derive(Debug, Serialize, Deserialize)]
struct MappingFile {
    #[serde(default)]
    page_mappings: BTreeMap<u32, String>,
    #[serde(default)]
    total_pages: Option<u32>,
    #[serde(default)]
    created_time: Option<String>,
}

/// What `add` changed besides inserting the new pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingChange {
    /// UID that previously occupied the page.
    pub replaced_uid: Option<String>,
    /// Page the UID was previously mapped to.
    pub moved_from: Option<u32>,
}

/// Result of loading the mapping file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// No file yet; the store starts empty.
    Missing,
    Loaded {
        count: usize,
        /// `total_pages` recorded in the file when it disagrees with the session.
        stored_total_pages: Option<u32>,
    },
}

/// Bidirectional page ↔ UID index.
///
/// Invariant: `pages` and `uids` are inverse maps of each other.
#[derive(Debug)]
pub struct MappingStore {
    total_pages: u32,
    path: Option<PathBuf>,
    pages: BTreeMap<u32, String>,
    uids: HashMap<String, u32>,
}

impl MappingStore {
    /// Store persisted at `path`. Nothing is read until [`load`](Self::load).
    pub fn new(total_pages: u32, path: impl Into<PathBuf>) -> Self {
        Self {
            total_pages,
            path: Some(path.into()),
            pages: BTreeMap::new(),
            uids: HashMap::new(),
        }
    }

    /// Store that never touches the filesystem.
    pub fn in_memory(total_pages: u32) -> Self {
        Self {
            total_pages,
            path: None,
            pages: BTreeMap::new(),
            uids: HashMap::new(),
        }
    }

    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Page mapped to `uid_hex`.
    pub fn resolve(&self, uid_hex: &str) -> Option<u32> {
        self.uids.get(uid_hex).copied()
    }

    /// UID mapped to `page`.
    pub fn uid_for(&self, page: u32) -> Option<&str> {
        self.pages.get(&page).map(String::as_str)
    }

    /// Mappings in page order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.pages.iter().map(|(&page, uid)| (page, uid.as_str()))
    }

    /// Map `page` to `uid_hex` and persist.
    ///
    /// Stale entries on either side are cleared so the index stays a
    /// bijection: the page's old UID is unmapped and the UID leaves its old
    /// page.
    pub fn add(&mut self, page: u32, uid_hex: &str) -> Result<MappingChange, MappingError> {
        let change = self.insert(page, uid_hex)?;
        info!(page, uid = %uid_hex, "Mapping added");
        self.persist();
        Ok(change)
    }

    /// Remove the mapping for `page` and persist. Returns the removed UID.
    pub fn remove(&mut self, page: u32) -> Option<String> {
        let uid = self.pages.remove(&page)?;
        self.uids.remove(&uid);
        info!(page, uid = %uid, "Mapping removed");
        self.persist();
        Some(uid)
    }

    fn insert(&mut self, page: u32, uid_hex: &str) -> Result<MappingChange, MappingError> {
        if !(1..=self.total_pages).contains(&page) {
            return Err(MappingError::InvalidPage {
                page,
                total_pages: self.total_pages,
            });
        }

        let mut change = MappingChange::default();
        if let Some(old_page) = self.uids.remove(uid_hex)
            && old_page != page
        {
            self.pages.remove(&old_page);
            change.moved_from = Some(old_page);
        }
        if let Some(old_uid) = self.pages.insert(page, uid_hex.to_string())
            && old_uid != uid_hex
        {
            self.uids.remove(&old_uid);
            change.replaced_uid = Some(old_uid);
        }
        self.uids.insert(uid_hex.to_string(), page);
        Ok(change)
    }

    fn persist(&self) {
        if let Err(e) = self.save() {
            warn!(error = %e, "Mapping not persisted; in-memory mapping remains active");
        }
    }

    /// Replace the in-memory index with the file contents.
    ///
    /// A missing file leaves the store empty. A different stored
    /// `total_pages` is only reported; the stored mappings are used as-is.
    pub fn load(&mut self) -> Result<LoadOutcome, PersistenceError> {
        let Some(path) = self.path.clone() else {
            return Ok(LoadOutcome::Missing);
        };

        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No mapping file yet");
                return Ok(LoadOutcome::Missing);
            }
            Err(source) => return Err(PersistenceError::Read { path, source }),
        };
        let file: MappingFile = serde_json::from_str(&content)
            .map_err(|source| PersistenceError::Parse { path: path.clone(), source })?;

        self.pages.clear();
        self.uids.clear();
        for (page, uid) in file.page_mappings {
            if let Some(previous) = self.uids.insert(uid.clone(), page) {
                warn!(uid = %uid, previous, page, "Duplicate UID in mapping file");
                self.pages.remove(&previous);
            }
            self.pages.insert(page, uid);
        }

        let stored_total_pages = file.total_pages.filter(|&t| t != self.total_pages);
        if let Some(stored) = stored_total_pages {
            warn!(
                stored,
                current = self.total_pages,
                "Stored page count differs from current setting"
            );
        }

        info!(count = self.pages.len(), path = %path.display(), "Mappings loaded");
        Ok(LoadOutcome::Loaded {
            count: self.pages.len(),
            stored_total_pages,
        })
    }

    /// Write the index to disk (temp file + rename).
    pub fn save(&self) -> Result<(), PersistenceError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let file = MappingFile {
            page_mappings: self.pages.clone(),
            total_pages: Some(self.total_pages),
            created_time: Some(chrono::Local::now().to_rfc3339()),
        };
        let json = serde_json::to_string_pretty(&file)?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|source| PersistenceError::Write {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, path).map_err(|source| PersistenceError::Write {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), count = self.pages.len(), "Mappings saved");
        Ok(())
    }
}
