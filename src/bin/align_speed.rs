//! align_speed - Merge a speed log into an existing session manifest.
//!
//! Re-running against the same session and log rewrites the same speeds, so
//! the tool can be used to repair a session whose automatic merge failed.

use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;

use replay_dataset::{merge_speed_log, AlignOutcome, SessionConfig};

#[derive(Parser, Debug)]
#[command(name = "align_speed", about = "Merge a speed log into a session manifest")]
struct Args {
    /// Session directory containing dataset.csv
    #[arg(value_name = "SESSION_DIR")]
    session: PathBuf,

    /// Speed log (time,speed per line)
    #[arg(value_name = "SPEED_LOG")]
    speed_log: PathBuf,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let session = SessionConfig::from_dir(&args.session)?;
    match merge_speed_log(&session, &args.speed_log)? {
        AlignOutcome::Merged {
            anchor_row,
            anchor_time,
            filled,
            unfilled,
        } => {
            println!(
                "align_speed: {} anchored at row {} (log t={:.6}), {} filled, {} unfilled",
                session.session_id, anchor_row, anchor_time, filled, unfilled
            );
        }
        AlignOutcome::Skipped(reason) => {
            println!("align_speed: {} unchanged ({})", session.session_id, reason);
        }
        AlignOutcome::Failed(err) => bail!("merge failed: {}", err),
    }
    Ok(())
}
