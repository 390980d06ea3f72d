//! Replay loader: read a recorded frame log back in simulated-time order

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use tracing::debug;
use zstd::stream::read::Decoder;

use super::catalog::{resolve_replay_path, CatalogEntry};
use super::header::{read_header, HeaderError, ReplayHeader};
use crate::ws::protocol::ReplayFrame;

/// Extension of compressed frame logs
const ZSTD_EXTENSION: &str = "zst";

/// Loader errors
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("failed to read frame log {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("malformed frame at {}:{line}: {source}", path.display())]
    Frame {
        path: PathBuf,
        line: usize,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Header(#[from] HeaderError),
}

/// A recorded match held in memory, frames ordered by (simulated time, tick)
#[derive(Debug, Clone)]
pub struct ReplayLoader {
    header: ReplayHeader,
    replay_path: PathBuf,
    frames: Vec<ReplayFrame>,
}

impl ReplayLoader {
    /// Load the frame log a catalog entry points at
    pub fn load_entry(entry: &CatalogEntry) -> Result<Self, LoaderError> {
        let frames = load_frames(&entry.replay_path)?;
        Ok(Self {
            header: entry.header.clone(),
            replay_path: entry.replay_path.clone(),
            frames,
        })
    }

    /// Read a header and load the frame log its pointer resolves to
    pub fn open(header_path: &Path) -> Result<Self, LoaderError> {
        let header = read_header(header_path)?;
        let replay_path = resolve_replay_path(header_path, &header.file_pointer);
        let frames = load_frames(&replay_path)?;
        Ok(Self {
            header,
            replay_path,
            frames,
        })
    }

    pub fn header(&self) -> &ReplayHeader {
        &self.header
    }

    pub fn replay_path(&self) -> &Path {
        &self.replay_path
    }

    pub fn frames(&self) -> &[ReplayFrame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Simulated span between the first and last frame
    pub fn duration_ms(&self) -> i64 {
        match (self.frames.first(), self.frames.last()) {
            (Some(first), Some(last)) => last.simulated_ms - first.simulated_ms,
            _ => 0,
        }
    }

    /// Feed every frame to `apply` in order, stopping at the first error
    pub fn replay<F, E>(&self, mut apply: F) -> Result<(), E>
    where
        F: FnMut(&ReplayFrame) -> Result<(), E>,
    {
        self.frames.iter().try_for_each(|frame| apply(frame))
    }
}

/// Decode a frame log, compressed when its extension is `.zst`; blank lines are skipped
pub fn load_frames(path: &Path) -> Result<Vec<ReplayFrame>, LoaderError> {
    let io_err = |source| LoaderError::Io {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(io_err)?;
    let reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == ZSTD_EXTENSION) {
        Box::new(Decoder::new(file).map_err(io_err)?)
    } else {
        Box::new(file)
    };

    let mut frames = Vec::new();
    for (index, line) in BufReader::new(reader).lines().enumerate() {
        let line = line.map_err(io_err)?;
        if line.trim().is_empty() {
            continue;
        }
        let frame: ReplayFrame =
            serde_json::from_str(&line).map_err(|source| LoaderError::Frame {
                path: path.to_path_buf(),
                line: index + 1,
                source,
            })?;
        frames.push(frame);
    }

    // Stable, so frames sharing a key keep their log order
    frames.sort_by_key(|frame| (frame.simulated_ms, frame.tick));

    debug!(path = %path.display(), frames = frames.len(), "Replay frames loaded");
    Ok(frames)
}
