//! depth_coverage - print near-field depth coverage as text
//!
//! Grabs paired frames from a source and prints one character per 10x20 pixel
//! cell: the denser the readings closer than --near, the heavier the character.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;

use depth_guard::{coverage, ingest, Acquired, DepthGuardConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Print near-field depth coverage as ASCII art")]
struct Args {
    /// Config file (.toml or .json).
    #[arg(long, env = "DEPTHGUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Source URI (stub://<name> or a recording directory).
    #[arg(long)]
    source: Option<String>,

    /// Readings closer than this many meters count as covered.
    #[arg(long, default_value_t = 1.0)]
    near: f32,

    /// Number of paired frames to print.
    #[arg(long, default_value_t = 1)]
    frames: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if !(args.near.is_finite() && args.near > 0.0) {
        return Err(anyhow!("--near must be a positive number of meters"));
    }
    let mut config = DepthGuardConfig::load_from(args.config.as_deref())?;
    if let Some(uri) = args.source {
        config.source.uri = uri;
    }

    let mut source = ingest::open_source(&config.source)?;
    ingest::start_source(source.as_mut(), &config.streams)?;

    let mut printed = 0u64;
    while printed < args.frames {
        match source.wait_for_paired_frame()? {
            Acquired::Pair(pair) => {
                for line in coverage::render(&pair.depth, args.near) {
                    println!("{}", line);
                }
                println!();
                printed += 1;
            }
            Acquired::Unavailable => continue,
            Acquired::Finished => {
                log::info!("source finished after {} frames", printed);
                break;
            }
        }
    }
    Ok(())
}
