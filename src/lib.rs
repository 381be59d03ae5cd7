//! Replay Dataset Builder
//!
//! Builds supervised driving datasets by replaying a recorded simulator
//! session and capturing an ego-mounted camera.
//!
//! # Pipeline
//!
//! Every accepted frame becomes one manifest row holding:
//!
//! 1. **RGB image**: the camera frame as a PNG.
//! 2. **Lane mask**: a white/yellow lane-marking segmentation of that frame.
//! 3. **Controls**: throttle, steer and brake sampled on the tick that
//!    consumed the frame.
//! 4. **Speed**: empty while recording, filled afterwards from a separately
//!    logged speed trace.
//!
//! # Module Structure
//!
//! - `frame`: sensor frame copies and the single-slot handoff (`FrameSlot`)
//! - `segment`: HSV lane-marking classification (`Segmenter`)
//! - `dataset`: session layout, manifest I/O, `DatasetSink`
//! - `gate`: recording duration bound and dataset timestamps
//! - `replay`: the tick loop (`ReplayLoop`)
//! - `align`: post-replay speed merge
//! - `sim`: simulator seam and the synthetic backend
//! - `display`, `ui`: frame presentation, quit input and stderr progress
//! - `config`, `summary`: runtime configuration and offline inspection

pub mod align;
pub mod config;
pub mod dataset;
pub mod display;
pub mod frame;
pub mod gate;
pub mod replay;
pub mod segment;
pub mod sim;
pub mod summary;
pub mod ui;

pub use align::{merge_speed_log, read_speed_log, AlignOutcome, SkipReason, SpeedLog, SpeedSample};
pub use config::ReplayConfig;
pub use dataset::{DatasetSink, ManifestRow, SessionConfig};
pub use display::{Display, HeadlessDisplay, QuitFlag, TickClock};
pub use frame::{FrameSample, FrameSlot, PixelFormat};
pub use gate::{parse_recording_duration, ReplayTimeGate};
pub use replay::{ReplayLoop, ReplayReport, ReplayState, TerminationReason, Viewpoint};
pub use segment::{LaneClass, SegmentationThresholds, Segmenter, SemanticMask};
pub use sim::{connect, SyntheticConfig, SyntheticSimulator, Simulator, VehicleControl};
pub use summary::{summarize, DatasetSummary};
