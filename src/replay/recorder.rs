//! Match recorder: header at match start, then a zstd-compressed JSON-lines frame log

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use zstd::stream::write::Encoder;

use super::catalog::HEADER_FILE_NAME;
use super::header::{write_header, HeaderError, ReplayHeader, TerrainParameters};

/// Simulated time between two recorded frames
pub const FRAME_INTERVAL: Duration = Duration::from_millis(200);

/// Frame log file name, referenced by the header's file pointer
pub const FRAMES_FILE_NAME: &str = "frames.jsonl.zst";

/// zstd level for the frame log
pub const FRAME_COMPRESSION_LEVEL: i32 = 3;

/// Recorder errors
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("replay root must be provided")]
    EmptyRoot,

    #[error("replay I/O failed for {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error("failed to encode replay frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Writes one match's replay bundle
pub struct ReplayRecorder {
    dir: PathBuf,
    frames_path: PathBuf,
    frames: Encoder<'static, BufWriter<File>>,
    since_last_frame: Duration,
    frames_written: u64,
}

impl ReplayRecorder {
    /// Create `<root>/<match>-<timestamp>/`, persist the header and open the frame log
    pub fn start(
        root: &Path,
        match_id: &str,
        match_seed: &str,
        terrain_params: TerrainParameters,
        created_at: DateTime<Utc>,
    ) -> Result<Self, RecorderError> {
        if root.as_os_str().is_empty() {
            return Err(RecorderError::EmptyRoot);
        }

        let dir = root.join(match_folder_name(match_id, created_at));
        fs::create_dir_all(&dir).map_err(|source| RecorderError::Io {
            path: dir.clone(),
            source,
        })?;

        let header = ReplayHeader::new(match_seed, terrain_params, FRAMES_FILE_NAME);
        write_header(&dir.join(HEADER_FILE_NAME), &header)?;

        let frames_path = dir.join(FRAMES_FILE_NAME);
        let file = File::create(&frames_path).map_err(|source| RecorderError::Io {
            path: frames_path.clone(),
            source,
        })?;
        let frames = Encoder::new(BufWriter::new(file), FRAME_COMPRESSION_LEVEL).map_err(
            |source| RecorderError::Io {
                path: frames_path.clone(),
                source,
            },
        )?;

        info!(dir = %dir.display(), match_seed = %match_seed, "Replay recording started");

        Ok(Self {
            dir,
            frames_path,
            frames,
            since_last_frame: FRAME_INTERVAL,
            frames_written: 0,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Account for `step` of simulated time; true when a frame is due.
    ///
    /// The first call after start is always due.
    pub fn frame_due(&mut self, step: Duration) -> bool {
        if self.since_last_frame >= FRAME_INTERVAL {
            self.since_last_frame = Duration::ZERO;
            return true;
        }
        self.since_last_frame += step;
        if self.since_last_frame >= FRAME_INTERVAL {
            self.since_last_frame -= FRAME_INTERVAL;
            return true;
        }
        false
    }

    /// Append one frame as a JSON line to the compressed stream
    pub fn record<T: Serialize>(&mut self, frame: &T) -> Result<(), RecorderError> {
        serde_json::to_writer(&mut self.frames, frame)?;
        self.frames
            .write_all(b"\n")
            .map_err(|source| RecorderError::Io {
                path: self.frames_path.clone(),
                source,
            })?;
        self.frames_written += 1;
        Ok(())
    }

    /// Finish the compressed stream and flush it to disk; returns the match directory
    pub fn finish(self) -> Result<PathBuf, RecorderError> {
        let Self {
            dir,
            frames_path,
            frames,
            frames_written,
            ..
        } = self;
        let io_err = |source| RecorderError::Io {
            path: frames_path.clone(),
            source,
        };

        let mut file = frames.finish().map_err(io_err)?;
        file.flush().map_err(io_err)?;

        info!(dir = %dir.display(), frames = frames_written, "Replay recording finished");
        Ok(dir)
    }
}

/// Folder name for a match: sanitized id plus a compact UTC timestamp
pub fn match_folder_name(match_id: &str, created_at: DateTime<Utc>) -> String {
    let cleaned: String = match_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    let cleaned = if cleaned.is_empty() { "match".to_string() } else { cleaned };
    format!("{}-{}", cleaned, created_at.format("%Y%m%dT%H%M%SZ"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::catalog;
    use chrono::TimeZone;

    fn created_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 45).unwrap()
    }

    #[test]
    fn test_folder_name_is_sanitized() {
        assert_eq!(match_folder_name("alpha/../7", created_at()), "alpha7-20240501T123045Z");
        assert_eq!(match_folder_name("///", created_at()), "match-20240501T123045Z");
    }

    #[test]
    fn test_frame_cadence() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder =
            ReplayRecorder::start(dir.path(), "m", "seed", TerrainParameters::new(), created_at())
                .unwrap();

        let step = Duration::from_millis(50);
        let due: Vec<bool> = (0..9).map(|_| recorder.frame_due(step)).collect();
        assert_eq!(due, vec![true, false, false, false, true, false, false, false, true]);
    }

    #[test]
    fn test_frame_log_is_zstd_compressed() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = ReplayRecorder::start(
            dir.path(),
            "alpha",
            "seed-alpha",
            TerrainParameters::new(),
            created_at(),
        )
        .unwrap();
        recorder.record(&serde_json::json!({ "tick": 1 })).unwrap();
        recorder.record(&serde_json::json!({ "tick": 2 })).unwrap();
        let match_dir = recorder.finish().unwrap();

        let raw = fs::read(match_dir.join(FRAMES_FILE_NAME)).unwrap();
        assert_eq!(&raw[..4], &[0x28, 0xB5, 0x2F, 0xFD]);

        let decoded = String::from_utf8(zstd::stream::decode_all(raw.as_slice()).unwrap()).unwrap();
        let ticks: Vec<u64> = decoded
            .lines()
            .map(|line| {
                let frame: serde_json::Value = serde_json::from_str(line).unwrap();
                frame["tick"].as_u64().unwrap()
            })
            .collect();
        assert_eq!(ticks, vec![1, 2]);
    }

    #[test]
    fn test_recorded_match_is_listed_by_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = ReplayRecorder::start(
            dir.path(),
            "alpha",
            "seed-alpha",
            TerrainParameters::new(),
            created_at(),
        )
        .unwrap();
        let match_dir = recorder.finish().unwrap();

        let entries = catalog::list(dir.path()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].replay_path, match_dir.join(FRAMES_FILE_NAME));
        assert_eq!(entries[0].header.file_pointer, FRAMES_FILE_NAME);
        assert_eq!(entries[0].header.match_seed, "seed-alpha");
    }
}
