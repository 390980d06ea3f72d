//! Replay header documents persisted next to each recorded match

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Current schema version for replay header documents
pub const HEADER_SCHEMA_VERSION: u32 = 1;

/// Terrain tuning values keyed by parameter name
pub type TerrainParameters = BTreeMap<String, f64>;

/// Metadata persisted alongside a replay frame log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayHeader {
    pub schema_version: u32,
    #[serde(default)]
    pub match_seed: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub terrain_params: TerrainParameters,
    /// Frame log location, absolute or relative to the header's directory
    pub file_pointer: String,
}

/// Replay header errors
#[derive(Debug, thiserror::Error)]
pub enum HeaderError {
    #[error("failed to read replay header {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to write replay header {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },

    #[error("malformed replay header {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid replay header {}: {reason}", path.display())]
    Rejected { path: PathBuf, reason: &'static str },

    #[error("invalid replay header: {0}")]
    Invalid(&'static str),

    #[error("failed to encode replay header: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ReplayHeader {
    pub fn new(
        match_seed: impl Into<String>,
        terrain_params: TerrainParameters,
        file_pointer: impl Into<String>,
    ) -> Self {
        Self {
            schema_version: HEADER_SCHEMA_VERSION,
            match_seed: match_seed.into(),
            terrain_params,
            file_pointer: file_pointer.into(),
        }
    }

    /// Ensure the header carries enough information for catalog tooling
    pub fn validate(&self) -> Result<(), HeaderError> {
        if self.schema_version == 0 {
            return Err(HeaderError::Invalid("schema_version must be positive"));
        }
        if self.file_pointer.trim().is_empty() {
            return Err(HeaderError::Invalid("file_pointer must not be empty"));
        }
        Ok(())
    }
}

/// Persist `header` as indented JSON, creating parent directories as needed
pub fn write_header(path: &Path, header: &ReplayHeader) -> Result<(), HeaderError> {
    header.validate()?;

    let mut payload = serde_json::to_vec_pretty(header)?;
    payload.push(b'\n');

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|source| HeaderError::Write {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, payload).map_err(|source| HeaderError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Load, decode and validate a header from disk
pub fn read_header(path: &Path) -> Result<ReplayHeader, HeaderError> {
    let data = fs::read(path).map_err(|source| HeaderError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let header: ReplayHeader = serde_json::from_slice(&data).map_err(|source| HeaderError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    header.validate().map_err(|err| match err {
        HeaderError::Invalid(reason) => HeaderError::Rejected {
            path: path.to_path_buf(),
            reason,
        },
        other => other,
    })?;
    Ok(header)
}
