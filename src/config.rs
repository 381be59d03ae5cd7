use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::segment::SegmentationThresholds;
use crate::sim::CameraSpec;

const DEFAULT_SIM_HOST: &str = "stub://town04";
const DEFAULT_SIM_TIMEOUT_SECS: u64 = 10;
const DEFAULT_RECORDING: &str = "/tmp/town04_autopilot.log";
const DEFAULT_SPEED_LOG: &str = "/tmp/town04_speed.csv";
const DEFAULT_OUTPUT_ROOT: &str = ".";
const DEFAULT_SESSION_PREFIX: &str = "Deepracer_BaseMap";
const DEFAULT_CAMERA_WIDTH: u32 = 800;
const DEFAULT_CAMERA_HEIGHT: u32 = 600;
const DEFAULT_CAMERA_FOV: f32 = 90.0;
const DEFAULT_MOUNT_X: f32 = 0.8;
const DEFAULT_MOUNT_Z: f32 = 1.7;
const DEFAULT_FIXED_DELTA: f64 = 0.05;
const DEFAULT_TARGET_FPS: u32 = 30;
const MIN_FIXED_DELTA: f64 = 1e-6;

#[derive(Debug, Deserialize, Default)]
struct ReplayConfigFile {
    simulator: Option<SimulatorConfigFile>,
    recording: Option<String>,
    speed_log: Option<PathBuf>,
    output: Option<OutputConfigFile>,
    camera: Option<CameraConfigFile>,
    fixed_delta_seconds: Option<f64>,
    target_fps: Option<u32>,
    segmentation: Option<SegmentationThresholds>,
}

#[derive(Debug, Deserialize, Default)]
struct SimulatorConfigFile {
    host: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    root: Option<PathBuf>,
    session_prefix: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    fov: Option<f32>,
    mount_x: Option<f32>,
    mount_z: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct ReplayConfig {
    pub sim_host: String,
    pub sim_timeout: Duration,
    pub recording: String,
    pub speed_log: PathBuf,
    pub output_root: PathBuf,
    pub session_prefix: String,
    pub camera: CameraSpec,
    pub fixed_delta_seconds: f64,
    pub target_fps: u32,
    pub segmentation: SegmentationThresholds,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self::from_file(ReplayConfigFile::default())
    }
}

impl ReplayConfig {
    /// Defaults, then `$REPLAY_CONFIG` (JSON), then `REPLAY_*` env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("REPLAY_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ReplayConfigFile) -> Self {
        let sim = file.simulator.unwrap_or_default();
        let output = file.output.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        Self {
            sim_host: sim.host.unwrap_or_else(|| DEFAULT_SIM_HOST.to_string()),
            sim_timeout: Duration::from_secs(sim.timeout_secs.unwrap_or(DEFAULT_SIM_TIMEOUT_SECS)),
            recording: file
                .recording
                .unwrap_or_else(|| DEFAULT_RECORDING.to_string()),
            speed_log: file
                .speed_log
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SPEED_LOG)),
            output_root: output
                .root
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_ROOT)),
            session_prefix: output
                .session_prefix
                .unwrap_or_else(|| DEFAULT_SESSION_PREFIX.to_string()),
            camera: CameraSpec {
                width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
                fov: camera.fov.unwrap_or(DEFAULT_CAMERA_FOV),
                mount_x: camera.mount_x.unwrap_or(DEFAULT_MOUNT_X),
                mount_z: camera.mount_z.unwrap_or(DEFAULT_MOUNT_Z),
            },
            fixed_delta_seconds: file.fixed_delta_seconds.unwrap_or(DEFAULT_FIXED_DELTA),
            target_fps: file.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
            segmentation: file.segmentation.unwrap_or_default(),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(host) = non_empty_env("REPLAY_SIM_HOST") {
            self.sim_host = host;
        }
        if let Some(recording) = non_empty_env("REPLAY_RECORDING") {
            self.recording = recording;
        }
        if let Some(path) = non_empty_env("REPLAY_SPEED_LOG") {
            self.speed_log = PathBuf::from(path);
        }
        if let Some(root) = non_empty_env("REPLAY_OUTPUT_DIR") {
            self.output_root = PathBuf::from(root);
        }
        if let Some(prefix) = non_empty_env("REPLAY_SESSION_PREFIX") {
            self.session_prefix = prefix;
        }
        if let Some(fps) = non_empty_env("REPLAY_TARGET_FPS") {
            self.target_fps = fps
                .parse()
                .map_err(|_| anyhow!("REPLAY_TARGET_FPS must be a positive integer"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        if !(self.camera.fov > 0.0 && self.camera.fov < 180.0) {
            return Err(anyhow!("camera fov must be between 0 and 180 degrees"));
        }
        if !(self.fixed_delta_seconds.is_finite() && self.fixed_delta_seconds >= MIN_FIXED_DELTA) {
            return Err(anyhow!(
                "fixed_delta_seconds must be at least {} (manifest timestamps are microseconds)",
                MIN_FIXED_DELTA
            ));
        }
        if self.target_fps == 0 {
            return Err(anyhow!("target_fps must be >= 1"));
        }
        if self.recording.trim().is_empty() {
            return Err(anyhow!("recording path must not be empty"));
        }
        let seg = &self.segmentation;
        if seg.yellow_hue_min > seg.yellow_hue_max || seg.yellow_hue_max >= 180 {
            return Err(anyhow!("yellow hue band must satisfy min <= max < 180"));
        }
        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<ReplayConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
