//! Lists recorded replays found under a directory

use std::path::PathBuf;

use clap::Parser;

use drift_sync_server::replay::catalog::{self, CatalogEntry};

/// Replay catalog browser
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Directory containing replay headers
    #[arg(long, default_value = ".")]
    dir: PathBuf,

    /// Emit JSON instead of human-readable output
    #[arg(long)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let entries = catalog::list(&cli.dir)?;

    if cli.json {
        println!("{}", catalog::marshal(&entries)?);
        return Ok(());
    }

    for entry in &entries {
        print!("{}", describe(entry));
    }
    Ok(())
}

fn describe(entry: &CatalogEntry) -> String {
    let header = &entry.header;
    let mut out = format!(
        "{} (schema {})\n",
        entry.replay_path.display(),
        header.schema_version
    );
    if !header.match_seed.is_empty() {
        out.push_str(&format!("  seed: {}\n", header.match_seed));
    }
    // BTreeMap iterates in key order
    if !header.terrain_params.is_empty() {
        out.push_str("  terrain:\n");
        for (key, value) in &header.terrain_params {
            out.push_str(&format!("    {key}: {value:.3}\n"));
        }
    }
    out.push_str(&format!("  header: {}\n", entry.header_path.display()));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use drift_sync_server::replay::ReplayHeader;

    #[test]
    fn test_describe_entry() {
        let header = ReplayHeader::new(
            "42",
            [("ridge".to_string(), 0.5), ("amplitude".to_string(), 12.0)].into(),
            "frames.jsonl",
        );
        let entry = CatalogEntry {
            header_path: PathBuf::from("replays/a/header.json"),
            replay_path: PathBuf::from("replays/a/frames.jsonl"),
            header,
        };

        assert_eq!(
            describe(&entry),
            concat!(
                "replays/a/frames.jsonl (schema 1)\n",
                "  seed: 42\n",
                "  terrain:\n",
                "    amplitude: 12.000\n",
                "    ridge: 0.500\n",
                "  header: replays/a/header.json\n",
            )
        );
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["replay_catalog"]);
        assert_eq!(cli.dir, PathBuf::from("."));
        assert!(!cli.json);
    }
}
