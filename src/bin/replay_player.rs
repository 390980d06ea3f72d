//! Prints a recorded match as JSON: its header and every frame in playback order

use std::path::PathBuf;

use clap::Parser;
use serde::Serialize;

use drift_sync_server::replay::{ReplayHeader, ReplayLoader};
use drift_sync_server::ws::protocol::ReplayFrame;

/// Replay frame dumper
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Replay header file; its file pointer locates the frame log
    #[arg(long)]
    path: PathBuf,

    /// Only print the header and frame count
    #[arg(long)]
    summary: bool,
}

#[derive(Serialize)]
struct Playback<'a> {
    header: &'a ReplayHeader,
    frame_count: usize,
    duration_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    frames: Option<&'a [ReplayFrame]>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let loader = ReplayLoader::open(&cli.path)?;
    println!("{}", render(&loader, cli.summary)?);
    Ok(())
}

fn render(loader: &ReplayLoader, summary: bool) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&Playback {
        header: loader.header(),
        frame_count: loader.len(),
        duration_ms: loader.duration_ms(),
        frames: (!summary).then(|| loader.frames()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use drift_sync_server::replay::{ReplayRecorder, TerrainParameters};

    #[test]
    fn test_render_recorded_match() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder =
            ReplayRecorder::start(dir.path(), "m", "11", TerrainParameters::new(), Utc::now())
                .unwrap();
        for (tick, simulated_ms) in [(1, 0), (5, 200)] {
            let frame = ReplayFrame {
                tick,
                simulated_ms,
                actors: Vec::new(),
            };
            recorder.record(&frame).unwrap();
        }
        let match_dir = recorder.finish().unwrap();

        let loader = ReplayLoader::open(&match_dir.join("header.json")).unwrap();

        let full: serde_json::Value =
            serde_json::from_str(&render(&loader, false).unwrap()).unwrap();
        assert_eq!(full["header"]["match_seed"], "11");
        assert_eq!(full["frame_count"], 2);
        assert_eq!(full["duration_ms"], 200);
        assert_eq!(full["frames"][1]["tick"], 5);

        let summary: serde_json::Value =
            serde_json::from_str(&render(&loader, true).unwrap()).unwrap();
        assert!(summary.get("frames").is_none());
    }

    #[test]
    fn test_cli_requires_path() {
        assert!(Cli::try_parse_from(["replay_player"]).is_err());
        let cli = Cli::parse_from(["replay_player", "--path", "r/header.json", "--summary"]);
        assert_eq!(cli.path, PathBuf::from("r/header.json"));
        assert!(cli.summary);
    }
}
