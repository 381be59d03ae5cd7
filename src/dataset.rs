//! Dataset session layout and the per-frame sink.
//!
//! A session directory looks like:
//!
//! ```text
//! <root>/<session_id>/
//!   rgb/<session_id>_<timestamp>.png
//!   masks/<session_id>_<timestamp>.png
//!   dataset.csv
//! ```
//!
//! Manifest paths are stored relative to the session directory. The manifest
//! is append-only while the replay runs; the speed column is left empty and is
//! filled afterwards by [`crate::align`].

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::frame::FrameSample;
use crate::segment::SemanticMask;
use crate::sim::VehicleControl;

pub const MANIFEST_FILE: &str = "dataset.csv";
pub const RGB_DIR: &str = "rgb";
pub const MASK_DIR: &str = "masks";
pub const MANIFEST_HEADER: [&str; 7] = [
    "rgb_path",
    "mask_path",
    "timestamp",
    "throttle",
    "steer",
    "brake",
    "speed",
];

/// Where one replay session writes its output.
///
/// Built once at startup and passed to the sink and the merger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    pub session_id: String,
    pub dir: PathBuf,
}

impl SessionConfig {
    /// New session under `root`, named `<prefix>_<unix millis>`.
    pub fn new(root: impl AsRef<Path>, prefix: &str) -> Result<Self> {
        let millis = SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis();
        Ok(Self::with_id(root, format!("{}_{}", prefix, millis)))
    }

    pub fn with_id(root: impl AsRef<Path>, session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        let dir = root.as_ref().join(&session_id);
        Self { session_id, dir }
    }

    /// Reopen an existing session directory.
    pub fn from_dir(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let session_id = dir
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow!("session dir {} has no usable name", dir.display()))?
            .to_string();
        Ok(Self { session_id, dir })
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    pub fn rgb_dir(&self) -> PathBuf {
        self.dir.join(RGB_DIR)
    }

    pub fn mask_dir(&self) -> PathBuf {
        self.dir.join(MASK_DIR)
    }

    /// Deterministic image file name for a timestamp.
    pub fn image_name(&self, timestamp: f64) -> String {
        format!("{}_{:.6}.png", self.session_id, timestamp)
    }
}

/// One manifest line.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ManifestRow {
    pub rgb_path: String,
    pub mask_path: String,
    pub timestamp: f64,
    pub throttle: f64,
    pub steer: f64,
    pub brake: f64,
    /// `None` until the speed log has been merged in.
    pub speed: Option<f64>,
}

impl ManifestRow {
    pub fn to_record(&self) -> [String; 7] {
        [
            self.rgb_path.clone(),
            self.mask_path.clone(),
            format!("{:.6}", self.timestamp),
            format!("{:.6}", self.throttle),
            format!("{:.6}", self.steer),
            format!("{:.6}", self.brake),
            self.speed.map(|s| format!("{:.6}", s)).unwrap_or_default(),
        ]
    }
}

/// Read every row of a manifest.
pub fn read_manifest(path: &Path) -> Result<Vec<ManifestRow>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("open manifest {}", path.display()))?;
    let headers = reader.headers()?.clone();
    if headers.iter().ne(MANIFEST_HEADER.iter().copied()) {
        bail!(
            "manifest {} has unexpected header: {:?}",
            path.display(),
            headers
        );
    }
    let mut rows = Vec::new();
    for (line, record) in reader.deserialize::<ManifestRow>().enumerate() {
        let row = record.with_context(|| {
            format!("malformed manifest row {} in {}", line + 1, path.display())
        })?;
        rows.push(row);
    }
    Ok(rows)
}

/// Write `rows` as a complete manifest (header included).
pub fn write_manifest(path: &Path, rows: &[ManifestRow]) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("create {}", path.display()))?;
    writer.write_record(MANIFEST_HEADER)?;
    for row in rows {
        writer.write_record(row.to_record())?;
    }
    writer.flush()?;
    Ok(())
}

/// Persists image pairs and appends manifest rows during a replay.
pub struct DatasetSink {
    session: SessionConfig,
    writer: csv::Writer<File>,
    rows_written: u64,
    last_timestamp: Option<f64>,
}

impl DatasetSink {
    /// Create the session directories and a manifest holding only the header.
    pub fn create(session: SessionConfig) -> Result<Self> {
        for dir in [session.rgb_dir(), session.mask_dir()] {
            fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        }
        let manifest = session.manifest_path();
        if manifest.exists() {
            bail!("manifest {} already exists", manifest.display());
        }
        let mut writer = csv::Writer::from_path(&manifest)
            .with_context(|| format!("create manifest {}", manifest.display()))?;
        writer.write_record(MANIFEST_HEADER)?;
        writer.flush()?;
        log::info!("dataset session {} at {}", session.session_id, session.dir.display());
        Ok(Self {
            session,
            writer,
            rows_written: 0,
            last_timestamp: None,
        })
    }

    pub fn session(&self) -> &SessionConfig {
        &self.session
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Store one sample. Any error here ends the session.
    pub fn write(
        &mut self,
        timestamp: f64,
        frame: &FrameSample,
        mask: &SemanticMask,
        control: VehicleControl,
        speed: Option<f64>,
    ) -> Result<ManifestRow> {
        self.write_inner(timestamp, frame, mask, control, speed)
            .map_err(|err| {
                log::error!(
                    "dataset write failed at t={:.6} in {}: {:#}",
                    timestamp,
                    self.session.dir.display(),
                    err
                );
                err
            })
    }

    fn write_inner(
        &mut self,
        timestamp: f64,
        frame: &FrameSample,
        mask: &SemanticMask,
        control: VehicleControl,
        speed: Option<f64>,
    ) -> Result<ManifestRow> {
        let recorded = recorded_timestamp(timestamp)?;
        if let Some(last) = self.last_timestamp {
            if recorded <= last {
                bail!(
                    "timestamp {:.6} does not advance past {:.6} at manifest precision",
                    timestamp,
                    last
                );
            }
        }
        if frame.dimensions() != (mask.width(), mask.height()) {
            bail!(
                "mask {}x{} does not match frame {}x{}",
                mask.width(),
                mask.height(),
                frame.width(),
                frame.height()
            );
        }

        let name = self.session.image_name(timestamp);
        let rgb_rel = format!("{}/{}", RGB_DIR, name);
        let mask_rel = format!("{}/{}", MASK_DIR, name);

        save_png(
            &self.session.dir.join(&rgb_rel),
            frame.rgb().to_vec(),
            frame.width(),
            frame.height(),
        )?;
        save_png(
            &self.session.dir.join(&mask_rel),
            mask.render_rgb(),
            mask.width(),
            mask.height(),
        )?;

        let control = control.clamped();
        let row = ManifestRow {
            rgb_path: rgb_rel,
            mask_path: mask_rel,
            timestamp,
            throttle: control.throttle,
            steer: control.steer,
            brake: control.brake,
            speed,
        };
        self.writer
            .write_record(row.to_record())
            .context("append manifest row")?;
        self.writer.flush().context("flush manifest")?;

        self.rows_written += 1;
        self.last_timestamp = Some(recorded);
        log::debug!(
            "sample #{} t={:.6} throttle={:.3} steer={:.3} brake={:.3}",
            self.rows_written,
            timestamp,
            row.throttle,
            row.steer,
            row.brake
        );
        Ok(row)
    }

    /// Flush and close the manifest.
    pub fn finish(mut self) -> Result<SessionConfig> {
        self.writer.flush().context("flush manifest")?;
        log::info!(
            "dataset session {} closed with {} samples",
            self.session.session_id,
            self.rows_written
        );
        Ok(self.session)
    }
}

/// Timestamp as it appears in image names and the manifest column.
fn recorded_timestamp(timestamp: f64) -> Result<f64> {
    if !timestamp.is_finite() {
        bail!("timestamp {} is not finite", timestamp);
    }
    Ok(format!("{:.6}", timestamp).parse()?)
}

fn save_png(path: &Path, rgb: Vec<u8>, width: u32, height: u32) -> Result<()> {
    let image = image::RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| anyhow!("pixel buffer does not fit {}x{}", width, height))?;
    image
        .save(path)
        .with_context(|| format!("encode {}", path.display()))?;
    Ok(())
}
