//! Camera frames and the single-slot hand-off between sensor and replay loop.
//!
//! - `FrameSample`: immutable RGB copy of one sensor image.
//! - `FrameSlot`: capacity-one overwrite buffer. The sensor callback `put`s,
//!   the replay loop `try_take`s. Neither side ever waits.
//!
//! Sensor buffers belong to the simulator and may be reused once the callback
//! returns, so every `FrameSample` owns a private copy of its pixels.

use anyhow::{anyhow, Result};
use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};

/// Raw pixel layouts a sensor callback can hand over.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed R,G,B.
    Rgb24,
    /// Packed B,G,R,A (the simulator's native camera output).
    Bgra32,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb24 => 3,
            PixelFormat::Bgra32 => 4,
        }
    }
}

/// One camera image, converted to RGB at capture time.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameSample {
    rgb: Vec<u8>,
    width: u32,
    height: u32,
    sensor_frame: u64,
}

impl FrameSample {
    /// Copy a raw sensor buffer into a new sample.
    ///
    /// The input slice is only borrowed for the duration of the call.
    pub fn from_raw(
        pixels: &[u8],
        width: u32,
        height: u32,
        format: PixelFormat,
        sensor_frame: u64,
    ) -> Result<Self> {
        let rgb = normalize_to_rgb(pixels, width, height, format)?;
        Ok(Self {
            rgb,
            width,
            height,
            sensor_frame,
        })
    }

    /// Build a sample from an owned RGB buffer.
    pub fn from_rgb(rgb: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        check_len(rgb.len(), width, height, PixelFormat::Rgb24)?;
        Ok(Self {
            rgb,
            width,
            height,
            sensor_frame: 0,
        })
    }

    /// Sensor frame counter, for diagnostics only.
    pub fn sensor_frame(&self) -> u64 {
        self.sensor_frame
    }

    pub fn rgb(&self) -> &[u8] {
        &self.rgb
    }

    /// Same pixels with the channel order swapped to B,G,R.
    pub fn bgr(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.rgb.len());
        for px in self.rgb.chunks_exact(3) {
            out.extend_from_slice(&[px[2], px[1], px[0]]);
        }
        out
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

fn check_len(len: usize, width: u32, height: u32, format: PixelFormat) -> Result<()> {
    let expected = (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(format.bytes_per_pixel()))
        .ok_or_else(|| anyhow!("{:?} frame dimensions overflow", format))?;
    if len != expected {
        return Err(anyhow!(
            "{:?} frame length mismatch: expected {}, got {}",
            format,
            expected,
            len
        ));
    }
    Ok(())
}

/// Convert a raw sensor buffer to packed RGB.
pub fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>> {
    check_len(pixels.len(), width, height, format)?;
    match format {
        PixelFormat::Rgb24 => Ok(pixels.to_vec()),
        PixelFormat::Bgra32 => {
            let mut rgb = Vec::with_capacity(pixels.len() / 4 * 3);
            for px in pixels.chunks_exact(4) {
                rgb.extend_from_slice(&[px[2], px[1], px[0]]);
            }
            Ok(rgb)
        }
    }
}

// ----------------------------------------------------------------------------
// FrameSlot: newest-wins hand-off
// ----------------------------------------------------------------------------

/// Single-capacity, lock-free frame buffer.
///
/// `put` replaces any pending frame (drop-oldest, keep-newest). `try_take`
/// removes and returns the pending frame, if any. Both calls return
/// immediately, so the sensor callback never stalls the simulator tick and the
/// replay loop never stalls on a missing frame.
///
/// Safe for one producer and one consumer; share it behind an `Arc`.
pub struct FrameSlot {
    slot: ArrayQueue<FrameSample>,
    produced: AtomicU64,
    overwritten: AtomicU64,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self {
            slot: ArrayQueue::new(1),
            produced: AtomicU64::new(0),
            overwritten: AtomicU64::new(0),
        }
    }

    /// Publish a frame. Returns true when an unconsumed frame was discarded.
    pub fn put(&self, frame: FrameSample) -> bool {
        self.produced.fetch_add(1, Ordering::Relaxed);
        let evicted = self.slot.force_push(frame);
        if let Some(old) = evicted {
            self.overwritten.fetch_add(1, Ordering::Relaxed);
            log::trace!("frame slot: sensor frame {} overwritten", old.sensor_frame());
            true
        } else {
            false
        }
    }

    /// Take the newest unconsumed frame, or `None` when the slot is empty.
    pub fn try_take(&self) -> Option<FrameSample> {
        self.slot.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.slot.is_empty()
    }

    /// Total frames published since creation.
    pub fn produced(&self) -> u64 {
        self.produced.load(Ordering::Relaxed)
    }

    /// Frames discarded before the consumer saw them.
    pub fn overwritten(&self) -> u64 {
        self.overwritten.load(Ordering::Relaxed)
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn solid(value: u8, sensor_frame: u64) -> FrameSample {
        FrameSample::from_raw(&[value; 2 * 2 * 3], 2, 2, PixelFormat::Rgb24, sensor_frame).unwrap()
    }

    #[test]
    fn bgra_conversion_drops_alpha_and_swaps_channels() -> Result<()> {
        let bgra = [10u8, 20, 30, 255, 1, 2, 3, 0];
        let frame = FrameSample::from_raw(&bgra, 2, 1, PixelFormat::Bgra32, 7)?;
        assert_eq!(frame.rgb(), &[30, 20, 10, 3, 2, 1]);
        assert_eq!(frame.bgr(), vec![10, 20, 30, 1, 2, 3]);
        assert_eq!(frame.dimensions(), (2, 1));
        assert_eq!(frame.sensor_frame(), 7);
        Ok(())
    }

    #[test]
    fn raw_length_is_validated() {
        let err = FrameSample::from_raw(&[0u8; 7], 2, 1, PixelFormat::Bgra32, 0).unwrap_err();
        assert!(err.to_string().contains("length mismatch"));
        assert!(FrameSample::from_rgb(vec![0u8; 5], 1, 2).is_err());
    }

    #[test]
    fn sample_owns_a_copy_of_the_sensor_buffer() -> Result<()> {
        let mut raw = vec![0u8, 0, 255, 255];
        let frame = FrameSample::from_raw(&raw, 1, 1, PixelFormat::Bgra32, 0)?;
        raw.fill(9);
        assert_eq!(frame.rgb(), &[255, 0, 0]);
        Ok(())
    }

    #[test]
    fn slot_keeps_newest_frame() {
        let slot = FrameSlot::new();
        assert!(!slot.put(solid(1, 1)));
        assert!(slot.put(solid(2, 2)));

        let taken = slot.try_take().expect("pending frame");
        assert_eq!(taken.sensor_frame(), 2);
        assert_eq!(taken.rgb()[0], 2);
        assert!(slot.try_take().is_none());
        assert_eq!(slot.produced(), 2);
        assert_eq!(slot.overwritten(), 1);
    }

    #[test]
    fn empty_slot_returns_none() {
        let slot = FrameSlot::new();
        assert!(slot.is_empty());
        assert!(slot.try_take().is_none());
    }

    #[test]
    fn producer_thread_never_blocks_on_slow_consumer() {
        let slot = Arc::new(FrameSlot::new());
        let producer = {
            let slot = slot.clone();
            std::thread::spawn(move || {
                for i in 0..500u64 {
                    slot.put(solid((i % 256) as u8, i));
                }
            })
        };
        producer.join().unwrap();

        let last = slot.try_take().expect("newest frame");
        assert_eq!(last.sensor_frame(), 499);
        assert_eq!(slot.produced(), 500);
        assert_eq!(slot.overwritten(), 499);
    }

    #[test]
    fn concurrent_consumer_sees_frames_in_order() {
        const FRAMES: u64 = 2000;
        let slot = Arc::new(FrameSlot::new());
        let producer = {
            let slot = slot.clone();
            std::thread::spawn(move || {
                for i in 0..FRAMES {
                    slot.put(solid((i % 256) as u8, i));
                    if i % 64 == 0 {
                        std::thread::yield_now();
                    }
                }
            })
        };

        let mut taken = 0u64;
        let mut last_seen: Option<u64> = None;
        loop {
            let done = producer.is_finished();
            while let Some(frame) = slot.try_take() {
                if let Some(prev) = last_seen {
                    assert!(frame.sensor_frame() > prev);
                }
                assert_eq!(frame.rgb()[0], (frame.sensor_frame() % 256) as u8);
                last_seen = Some(frame.sensor_frame());
                taken += 1;
            }
            if done {
                break;
            }
            std::thread::yield_now();
        }
        producer.join().unwrap();

        assert_eq!(last_seen, Some(FRAMES - 1));
        assert_eq!(taken + slot.overwritten(), FRAMES);
        assert_eq!(slot.produced(), FRAMES);
    }
}
