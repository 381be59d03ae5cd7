//! dataset_summary - Report row counts, column ranges and missing files for a
//! recorded session.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use replay_dataset::{summarize, SessionConfig};

#[derive(Parser, Debug)]
#[command(name = "dataset_summary", about = "Summarize a recorded dataset session")]
struct Args {
    /// Session directory containing dataset.csv
    #[arg(value_name = "SESSION_DIR")]
    session: PathBuf,

    /// Exit with an error if images are missing or rows are out of order
    #[arg(long)]
    strict: bool,

    /// List each missing image path
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let session = SessionConfig::from_dir(&args.session)?;
    let summary = summarize(&session)?;
    println!("{summary}");
    if args.verbose {
        for path in &summary.missing_images {
            println!("  missing: {}", path);
        }
    }

    if args.strict && !summary.is_consistent() {
        anyhow::bail!(
            "session {} is inconsistent: {} missing images, {} out-of-order rows",
            summary.session_id,
            summary.missing_images.len(),
            summary.out_of_order
        );
    }
    Ok(())
}
