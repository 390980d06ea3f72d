//! Replay catalog: index every persisted header under a directory tree

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use super::header::{read_header, HeaderError, ReplayHeader};

/// Exact file name recognised as a replay header
pub const HEADER_FILE_NAME: &str = "header.json";

/// Suffix recognised for named replay headers
pub const HEADER_FILE_SUFFIX: &str = ".header.json";

/// A replay header alongside its resolved frame log path
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogEntry {
    pub header_path: PathBuf,
    pub replay_path: PathBuf,
    pub header: ReplayHeader,
}

/// Catalog errors; any of them aborts the listing
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("root directory must be provided")]
    EmptyRoot,

    #[error("cannot access catalog root {}: {source}", path.display())]
    Root { path: PathBuf, source: io::Error },

    #[error("catalog root {} is not a directory", path.display())]
    NotADirectory { path: PathBuf },

    #[error("failed to walk {}: {source}", path.display())]
    Walk { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error("failed to encode catalog: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Walk `root` and return every replay header, sorted by (match seed, replay path)
pub fn list(root: impl AsRef<Path>) -> Result<Vec<CatalogEntry>, CatalogError> {
    let root = root.as_ref();
    if root.as_os_str().to_string_lossy().trim().is_empty() {
        return Err(CatalogError::EmptyRoot);
    }
    let metadata = fs::metadata(root).map_err(|source| CatalogError::Root {
        path: root.to_path_buf(),
        source,
    })?;
    if !metadata.is_dir() {
        return Err(CatalogError::NotADirectory {
            path: root.to_path_buf(),
        });
    }

    let mut entries = Vec::new();
    collect(root, &mut entries)?;

    // Traversal order is filesystem dependent; the composite sort is not.
    // Paths compare as whole strings, not component by component.
    entries.sort_by(|a, b| {
        a.header
            .match_seed
            .cmp(&b.header.match_seed)
            .then_with(|| a.replay_path.as_os_str().cmp(b.replay_path.as_os_str()))
    });

    debug!(root = %root.display(), count = entries.len(), "Replay catalog listed");
    Ok(entries)
}

/// Pretty-printed JSON for operators; preserves input order
pub fn marshal(entries: &[CatalogEntry]) -> Result<String, CatalogError> {
    Ok(serde_json::to_string_pretty(entries)?)
}

/// Whether `name` is a replay header file name
pub fn is_header_file(name: &str) -> bool {
    name == HEADER_FILE_NAME || name.ends_with(HEADER_FILE_SUFFIX)
}

/// Resolve a header's file pointer against the directory that holds the header
pub fn resolve_replay_path(header_path: &Path, file_pointer: &str) -> PathBuf {
    let pointer = Path::new(file_pointer);
    if pointer.is_absolute() {
        return pointer.to_path_buf();
    }
    header_path
        .parent()
        .map(|dir| dir.join(pointer))
        .unwrap_or_else(|| pointer.to_path_buf())
}

fn collect(dir: &Path, entries: &mut Vec<CatalogEntry>) -> Result<(), CatalogError> {
    let walk_err = |source| CatalogError::Walk {
        path: dir.to_path_buf(),
        source,
    };

    for item in fs::read_dir(dir).map_err(walk_err)? {
        let item = item.map_err(walk_err)?;
        let path = item.path();
        let file_type = item.file_type().map_err(|source| CatalogError::Walk {
            path: path.clone(),
            source,
        })?;

        if file_type.is_dir() {
            collect(&path, entries)?;
            continue;
        }
        if !is_header_file(&item.file_name().to_string_lossy()) {
            continue;
        }

        let header = read_header(&path)?;
        let replay_path = resolve_replay_path(&path, &header.file_pointer);
        entries.push(CatalogEntry {
            header_path: path,
            replay_path,
            header,
        });
    }
    Ok(())
}
