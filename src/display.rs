//! Display surface, quit input and the fixed-rate tick clock.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::frame::FrameSample;
use crate::segment::SemanticMask;

/// Where accepted frames are shown, and where quit requests come from.
pub trait Display {
    fn present(&mut self, frame: &FrameSample, mask: &SemanticMask) -> Result<()>;

    /// Polled once per tick. Never blocks.
    fn quit_requested(&mut self) -> bool;
}

/// Shared quit signal, typically raised from a Ctrl-C handler.
#[derive(Clone, Debug, Default)]
pub struct QuitFlag(Arc<AtomicBool>);

impl QuitFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Raise this flag on Ctrl-C. Only one handler can exist per process.
    pub fn install_ctrlc(&self) -> Result<()> {
        let flag = self.clone();
        ctrlc::set_handler(move || flag.raise())
            .map_err(|e| anyhow!("failed to set Ctrl-C handler: {}", e))
    }
}

/// Display that shows nothing and counts what it was given.
pub struct HeadlessDisplay {
    quit: QuitFlag,
    presented: u64,
    last_dimensions: Option<(u32, u32)>,
}

impl HeadlessDisplay {
    pub fn new(quit: QuitFlag) -> Self {
        Self {
            quit,
            presented: 0,
            last_dimensions: None,
        }
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }

    pub fn last_dimensions(&self) -> Option<(u32, u32)> {
        self.last_dimensions
    }
}

impl Display for HeadlessDisplay {
    fn present(&mut self, frame: &FrameSample, _mask: &SemanticMask) -> Result<()> {
        self.presented += 1;
        self.last_dimensions = Some(frame.dimensions());
        Ok(())
    }

    fn quit_requested(&mut self) -> bool {
        self.quit.is_raised()
    }
}

/// Caps the loop at a target rate by sleeping out the rest of each interval.
pub struct TickClock {
    interval: Duration,
    last: Option<Instant>,
}

impl TickClock {
    pub fn new(target_fps: u32) -> Self {
        Self {
            interval: frame_interval(target_fps),
            last: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until one interval has passed since the previous call.
    /// Returns the time actually slept.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let slept = match self.last {
            Some(last) => {
                let due = last + self.interval;
                if due > now {
                    let wait = due - now;
                    std::thread::sleep(wait);
                    wait
                } else {
                    Duration::ZERO
                }
            }
            None => Duration::ZERO,
        };
        self.last = Some(Instant::now());
        slept
    }
}

fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::ZERO
    } else {
        Duration::from_secs_f64(1.0 / target_fps as f64)
    }
}
