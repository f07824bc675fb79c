//! Document persistence
//!
//! Reads and writes the small JSON (or YAML) documents the bot owns: the dedup
//! state and the 52-week range cache. Writes go to a sibling temp file that is
//! renamed over the target, so a crash mid-write leaves the previous document intact.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },
    #[error("failed to serialize document for {}: {message}", .path.display())]
    Serialize { path: PathBuf, message: String },
}

impl StoreError {
    pub fn path(&self) -> &Path {
        match self {
            StoreError::Read { path, .. }
            | StoreError::Write { path, .. }
            | StoreError::Parse { path, .. }
            | StoreError::Serialize { path, .. } => path,
        }
    }

    /// Operator-facing hint on how to fix the failure
    pub fn remediation(&self) -> &'static str {
        match self {
            StoreError::Read { source, .. } | StoreError::Write { source, .. } => {
                match source.kind() {
                    io::ErrorKind::PermissionDenied => {
                        "check ownership and permissions of the file and its directory"
                    }
                    io::ErrorKind::NotFound => "check that the parent directory exists",
                    _ => "check free disk space and that the path is on a writable filesystem",
                }
            }
            StoreError::Parse { .. } => {
                "fix or delete the file; it is recreated on the next successful run"
            }
            StoreError::Serialize { .. } => "report this as a bug",
        }
    }
}

/// On-disk encoding, chosen from the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("yaml") | Some("yml") => DocumentFormat::Yaml,
            _ => DocumentFormat::Json,
        }
    }
}

/// Parse a document from text in the given format
pub fn parse_document<T: DeserializeOwned>(
    path: &Path,
    text: &str,
    format: DocumentFormat,
) -> Result<T, StoreError> {
    let parsed = match format {
        DocumentFormat::Json => serde_json::from_str(text).map_err(|e| e.to_string()),
        DocumentFormat::Yaml => serde_yaml::from_str(text).map_err(|e| e.to_string()),
    };
    parsed.map_err(|message| StoreError::Parse {
        path: path.to_path_buf(),
        message,
    })
}

/// Load a document. A missing file is `Ok(None)`.
pub fn load_document<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    parse_document(path, &text, DocumentFormat::from_path(path)).map(Some)
}

/// Write a document in full, atomically replacing any previous version
pub fn save_document<T: Serialize>(path: &Path, document: &T) -> Result<(), StoreError> {
    let text = match DocumentFormat::from_path(path) {
        DocumentFormat::Json => serde_json::to_string_pretty(document).map_err(|e| e.to_string()),
        DocumentFormat::Yaml => serde_yaml::to_string(document).map_err(|e| e.to_string()),
    }
    .map_err(|message| StoreError::Serialize {
        path: path.to_path_buf(),
        message,
    })?;

    let write_err = |source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_err)?;
    }

    let tmp = temp_sibling(path);
    fs::write(&tmp, text).map_err(write_err)?;
    if let Err(source) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(write_err(source));
    }

    debug!(path = %path.display(), "Document saved");
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
