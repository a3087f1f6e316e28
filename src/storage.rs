use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use directories::ProjectDirs;
use serde::{de::DeserializeOwned, Serialize};
use tracing::trace;

pub const CONFIG_FILE: &str = "config.toml";
pub const INTAKE_FILE: &str = "intake.json";
pub const CREDENTIALS_FILE: &str = "credentials.json";
pub const LOG_DIR: &str = "logs";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Unable to locate a home directory for app data")]
    NoProjectDir,

    #[error("Unable to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Data in {path} is corrupted: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub fn project_dirs() -> Result<ProjectDirs, StorageError> {
    ProjectDirs::from("fyi", "angelo", "hydrate-tracker").ok_or(StorageError::NoProjectDir)
}

/// Reads a JSON document, returning `None` if the file doesn't exist yet.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    trace!("Loading {path:?}");

    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StorageError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StorageError::Json {
            path: path.to_path_buf(),
            source,
        })
}

/// Writes a JSON document, creating the parent directory when missing.
pub fn save_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StorageError> {
    let io_error = |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error)?;
    }

    let data = serde_json::to_vec_pretty(value).map_err(|source| StorageError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    trace!("Saving {} bytes to {path:?}", data.len());
    fs::write(path, data).map_err(io_error)
}
