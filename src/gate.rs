//! Replay duration bound and in-session timestamps.

use anyhow::{anyhow, Result};
use regex::Regex;
use std::sync::OnceLock;

/// Extract the recorded length in seconds from recorder metadata text.
///
/// The metadata carries a line such as `Duration: 12.34 seconds`.
pub fn parse_recording_duration(info: &str) -> Result<f64> {
    static DURATION: OnceLock<Regex> = OnceLock::new();
    let re = DURATION.get_or_init(|| {
        Regex::new(r"Duration:\s+([0-9]+(?:\.[0-9]*)?)").expect("static duration regex")
    });
    let caps = re
        .captures(info)
        .ok_or_else(|| anyhow!("recording metadata has no Duration field"))?;
    let secs: f64 = caps[1]
        .parse()
        .map_err(|e| anyhow!("invalid recording duration {:?}: {}", &caps[1], e))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(anyhow!("invalid recording duration {}", secs));
    }
    Ok(secs)
}

/// Decides when a replay ends and turns simulator time into dataset time.
#[derive(Clone, Debug)]
pub struct ReplayTimeGate {
    duration_bound: f64,
    origin: Option<f64>,
}

impl ReplayTimeGate {
    /// `duration` is the recording length, `start_elapsed` the simulator time
    /// at which the replay was started.
    pub fn new(duration: f64, start_elapsed: f64) -> Self {
        Self {
            duration_bound: start_elapsed + duration,
            origin: None,
        }
    }

    /// Absolute simulator time at which the replay ends.
    pub fn duration_bound(&self) -> f64 {
        self.duration_bound
    }

    pub fn remaining(&self, elapsed: f64) -> f64 {
        self.duration_bound - elapsed
    }

    pub fn is_expired(&self, elapsed: f64) -> bool {
        self.remaining(elapsed) <= 0.0
    }

    /// Time origin, latched on the first consumed frame.
    pub fn origin(&self) -> Option<f64> {
        self.origin
    }

    /// Seconds since the first accepted frame. The first call latches the
    /// origin and returns 0.
    pub fn relative_timestamp(&mut self, elapsed: f64) -> f64 {
        let origin = *self.origin.get_or_insert(elapsed);
        elapsed - origin
    }
}
