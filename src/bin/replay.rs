//! replay - Build one dataset session from a recorded simulator run.
//!
//! This tool:
//! 1. Connects to the simulator and replays the configured recording
//! 2. Rides a camera on the chosen ego actor (car or bike)
//! 3. Writes RGB frames, lane masks and controls to a new session directory
//! 4. Merges the speed log into the manifest once the replay ends

use anyhow::Result;
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use replay_dataset::{
    sim, ui, AlignOutcome, HeadlessDisplay, QuitFlag, ReplayConfig, ReplayLoop, SessionConfig,
    Viewpoint,
};

#[derive(Parser, Debug)]
#[command(name = "replay", about = "Replay a recording and capture a driving dataset")]
struct Args {
    /// Ego actor to mount the camera on
    #[arg(value_enum)]
    view: Viewpoint,

    /// Recording to replay (overrides config)
    #[arg(long, value_name = "PATH")]
    recording: Option<String>,

    /// Speed log merged after the replay (overrides config)
    #[arg(long, value_name = "PATH")]
    speed_log: Option<PathBuf>,

    /// Directory that receives the session directory (overrides config)
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(&args.ui, is_tty, !stdout_is_tty);

    let mut config = ReplayConfig::load()?;
    if let Some(recording) = args.recording {
        config.recording = recording;
    }
    if let Some(speed_log) = args.speed_log {
        config.speed_log = speed_log;
    }
    if let Some(dir) = args.output_dir {
        config.output_root = dir;
    }

    let quit = QuitFlag::new();
    quit.install_ctrlc()?;

    let mut simulator = {
        let _stage = ui.stage("Connect to simulator");
        sim::connect(&config.sim_host, config.sim_timeout)?
    };
    let session = SessionConfig::new(&config.output_root, &config.session_prefix)?;
    log::info!(
        "session {} -> {}",
        session.session_id,
        session.dir.display()
    );

    let mut display = HeadlessDisplay::new(quit);
    let report = {
        let _stage = ui.stage("Replay");
        ReplayLoop::new(
            simulator.as_mut(),
            &mut display,
            &config,
            args.view,
            session,
        )
        .with_progress(ui.replay_progress())
        .run()?
    };

    println!("replay: session {}", report.session.session_id);
    println!("  directory:   {}", report.session.dir.display());
    println!("  ended:       {:?}", report.termination);
    println!("  ticks:       {}", report.ticks);
    println!("  frames:      {}", report.frames_accepted);
    println!("  overwritten: {}", report.frames_overwritten);
    match &report.alignment {
        AlignOutcome::Merged {
            anchor_row,
            filled,
            unfilled,
            ..
        } => println!(
            "  speed:       merged at row {} ({} filled, {} unfilled)",
            anchor_row, filled, unfilled
        ),
        AlignOutcome::Skipped(reason) => println!("  speed:       skipped ({})", reason),
        AlignOutcome::Failed(err) => println!("  speed:       failed ({})", err),
    }
    Ok(())
}
