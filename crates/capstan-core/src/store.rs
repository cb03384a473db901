//! On-disk layout for descriptors, resume blobs, and torrent documents.
//!
//! Everything lives under one root:
//!
//! ```text
//! <root>/torrents/   archived .torrent descriptors, copied on add
//! <root>/resume/     per-torrent resume blobs, named <name>.fastresume
//! <root>/settings/   per-torrent JSON documents, named <filename>.json
//! ```
//!
//! The archive copy makes the daemon independent of wherever the user's
//! original descriptor file came from; it can disappear after the add.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

use crate::error::{ControlError, ControlResult};
use crate::settings::StoredTorrent;

const RESUME_EXTENSION: &str = "fastresume";
const DOCUMENT_EXTENSION: &str = "json";

/// Paths and read/write helpers for the persistent stores.
#[derive(Debug, Clone)]
pub struct Stores {
    root: PathBuf,
}

impl Stores {
    /// Stores rooted at `root`. No directories are touched until
    /// [`ensure_layout`](Self::ensure_layout).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The configured root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding archived descriptors.
    #[must_use]
    pub fn torrents_dir(&self) -> PathBuf {
        self.root.join("torrents")
    }

    /// Directory holding resume blobs.
    #[must_use]
    pub fn resume_dir(&self) -> PathBuf {
        self.root.join("resume")
    }

    /// Directory holding per-torrent documents.
    #[must_use]
    pub fn settings_dir(&self) -> PathBuf {
        self.root.join("settings")
    }

    /// Create the store directories if any are missing.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Io`] if a directory cannot be created.
    pub fn ensure_layout(&self) -> ControlResult<()> {
        for dir in [self.torrents_dir(), self.resume_dir(), self.settings_dir()] {
            fs::create_dir_all(&dir).map_err(|source| ControlError::Io {
                operation: "create store directory",
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Path of the archived descriptor for `filename`.
    #[must_use]
    pub fn archived_descriptor(&self, filename: &str) -> PathBuf {
        self.torrents_dir().join(filename)
    }

    /// Copy `source` into the descriptor archive under `filename`.
    ///
    /// An existing archived copy wins; re-adding a torrent never clobbers
    /// the descriptor the daemon has been running from.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Io`] if the copy fails.
    pub fn archive_descriptor(&self, source: &Path, filename: &str) -> ControlResult<PathBuf> {
        let target = self.archived_descriptor(filename);
        if !target.exists() && source != target {
            fs::copy(source, &target).map_err(|error| ControlError::Io {
                operation: "archive descriptor",
                path: source.to_path_buf(),
                source: error,
            })?;
        }
        Ok(target)
    }

    /// Persist the resume blob for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Io`] if the blob cannot be written.
    pub fn write_resume_blob(&self, name: &str, payload: &[u8]) -> ControlResult<()> {
        let path = self.resume_path(name);
        fs::write(&path, payload).map_err(|source| ControlError::Io {
            operation: "write resume blob",
            path,
            source,
        })
    }

    /// Load the resume blob for `name`, `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Io`] for any failure other than the blob
    /// not existing.
    pub fn read_resume_blob(&self, name: &str) -> ControlResult<Option<Vec<u8>>> {
        let path = self.resume_path(name);
        match fs::read(&path) {
            Ok(payload) => Ok(Some(payload)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ControlError::Io {
                operation: "read resume blob",
                path,
                source,
            }),
        }
    }

    /// Delete the resume blob for `name`; absence is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Io`] if an existing blob cannot be removed.
    pub fn clear_resume_blob(&self, name: &str) -> ControlResult<()> {
        let path = self.resume_path(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ControlError::Io {
                operation: "clear resume blob",
                path,
                source,
            }),
        }
    }

    /// Write the document for `filename` into the settings store.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Document`] if encoding fails and
    /// [`ControlError::Io`] if the file cannot be written.
    pub fn save_document(&self, filename: &str, document: &StoredTorrent) -> ControlResult<()> {
        let path = self.document_path(filename);
        let encoded = serde_json::to_vec_pretty(document).map_err(|source| {
            ControlError::Document {
                operation: "encode torrent document",
                path: path.clone(),
                source,
            }
        })?;
        fs::write(&path, encoded).map_err(|source| ControlError::Io {
            operation: "write torrent document",
            path,
            source,
        })
    }

    /// Load the document for `filename`, `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Io`] if the file cannot be read and
    /// [`ControlError::Document`] if it does not decode.
    pub fn load_document(&self, filename: &str) -> ControlResult<Option<StoredTorrent>> {
        let path = self.document_path(filename);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ControlError::Io {
                    operation: "read torrent document",
                    path,
                    source,
                });
            }
        };
        let document = serde_json::from_slice(&raw).map_err(|source| ControlError::Document {
            operation: "decode torrent document",
            path,
            source,
        })?;
        Ok(Some(document))
    }

    /// Remove the document for `filename`; absence is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Io`] if an existing document cannot be
    /// removed.
    pub fn remove_document(&self, filename: &str) -> ControlResult<()> {
        let path = self.document_path(filename);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ControlError::Io {
                operation: "remove torrent document",
                path,
                source,
            }),
        }
    }

    /// Collect every readable document in the settings store, in file
    /// name order.
    ///
    /// Unreadable or malformed entries are logged and skipped so one bad
    /// file cannot keep the rest of the roster from loading.
    #[must_use]
    pub fn sweep_documents(&self) -> Vec<StoredTorrent> {
        let dir = self.settings_dir();
        if !dir.is_dir() {
            return Vec::new();
        }

        let mut documents = Vec::new();
        let walker = WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    warn!(%error, "skipping unreadable settings entry");
                    continue;
                }
            };
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(DOCUMENT_EXTENSION) {
                continue;
            }
            let raw = match fs::read(path) {
                Ok(raw) => raw,
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipping unreadable torrent document");
                    continue;
                }
            };
            match serde_json::from_slice::<StoredTorrent>(&raw) {
                Ok(document) => documents.push(document),
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipping malformed torrent document");
                }
            }
        }
        documents
    }

    fn resume_path(&self, name: &str) -> PathBuf {
        self.resume_dir().join(format!("{name}.{RESUME_EXTENSION}"))
    }

    fn document_path(&self, filename: &str) -> PathBuf {
        self.settings_dir()
            .join(format!("{filename}.{DOCUMENT_EXTENSION}"))
    }
}
