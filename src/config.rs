// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use crate::storage::blob_store::TEMP_DIR;
use crate::storage::bucket_index::BUCKET_INDEX_FILE;
use crate::storage::codec::temp_file_name;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// HTTP listen address, e.g. "0.0.0.0:8080"
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// backend can be "file" or "in-memory"
    #[serde(default = "default_backend")]
    pub backend: String,
    /// data directory for the file backend
    #[serde(default = "default_path")]
    pub path: String,
    /// largest request body accepted by PUT, in bytes
    #[serde(default = "default_max_object_size")]
    pub max_object_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    File,
    InMemory,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown storage backend {0:?} (expected \"file\" or \"in-memory\")")]
    UnknownBackend(String),
    #[error("data directory {0:?} cannot be the current working directory")]
    DataDirIsWorkingDir(PathBuf),
    #[error("data directory {0:?} exists but is not a directory")]
    DataDirNotADirectory(PathBuf),
    #[error("data directory {0:?} is not empty and has no {BUCKET_INDEX_FILE}")]
    DataDirForeign(PathBuf),
    #[error("cannot inspect data directory {path:?}: {source}")]
    DataDirIo {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            storage: StorageConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_path(),
            max_object_size: default_max_object_size(),
        }
    }
}

impl StorageConfig {
    pub fn kind(&self) -> Result<BackendKind, ConfigError> {
        match self.backend.as_str() {
            "file" => Ok(BackendKind::File),
            "in-memory" | "memory" => Ok(BackendKind::InMemory),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

impl Config {
    pub fn from_path(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let s = std::fs::read_to_string(path)?;
        let cfg: Config = toml::from_str(&s)?;
        Ok(cfg)
    }

    /// Loads `path` when given, otherwise the built-in defaults.
    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        match path {
            Some(path) => Self::from_path(path),
            None => Ok(Self::default()),
        }
    }
}

/// Refuses data directories the store must not take over.
///
/// The directory may be missing or empty. If it already holds files, they
/// must belong to a previous run, which is recognized by the bucket index.
/// A run that never created a bucket leaves only the store's own staging
/// entries, which do not count.
pub fn validate_data_dir(dir: &Path) -> Result<(), ConfigError> {
    let io_err = |source| ConfigError::DataDirIo {
        path: dir.to_path_buf(),
        source,
    };

    let meta = match std::fs::metadata(dir) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(io_err(e)),
    };
    if !meta.is_dir() {
        return Err(ConfigError::DataDirNotADirectory(dir.to_path_buf()));
    }

    let cwd = std::env::current_dir().map_err(io_err)?;
    let canonical = dir.canonicalize().map_err(io_err)?;
    if cwd.canonicalize().map_err(io_err)? == canonical {
        return Err(ConfigError::DataDirIsWorkingDir(dir.to_path_buf()));
    }

    if dir.join(BUCKET_INDEX_FILE).is_file() {
        return Ok(());
    }
    let index_temp = temp_file_name(BUCKET_INDEX_FILE);
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let name = entry.map_err(io_err)?.file_name();
        if name != TEMP_DIR && name != index_temp.as_str() {
            return Err(ConfigError::DataDirForeign(dir.to_path_buf()));
        }
    }
    Ok(())
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_backend() -> String {
    "file".to_string()
}

fn default_path() -> String {
    "./data".to_string()
}

fn default_max_object_size() -> usize {
    512 * 1024 * 1024 // 512 MB
}
