//! Simulator seam.
//!
//! The replay pipeline only needs a narrow slice of a driving simulator:
//! elapsed simulation time, replay start, actor lookup, an RGB camera with an
//! asynchronous callback, live vehicle controls and world settings. `Simulator`
//! captures exactly that slice.
//!
//! `connect` resolves a host string to a backend. `stub://` hosts get the
//! built-in `SyntheticSimulator`, which renders a road with a white and a
//! yellow lane line on its own sensor thread.

use anyhow::{anyhow, bail, Result};
use rand::Rng;
use std::collections::HashMap;
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::frame::PixelFormat;

pub type ActorId = u32;

/// Vehicle type filter for the car viewpoint.
pub const CAR_TYPE_ID: &str = "vehicle.tesla.model3";
/// Vehicle type filter for the bike viewpoint.
pub const BIKE_TYPE_ID: &str = "vehicle.diamondback.century";

/// Throttle, steer and brake as reported by the simulator.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VehicleControl {
    pub throttle: f64,
    pub steer: f64,
    pub brake: f64,
}

impl VehicleControl {
    /// Clamp to throttle/brake in [0, 1] and steer in [-1, 1].
    pub fn clamped(self) -> Self {
        Self {
            throttle: self.throttle.clamp(0.0, 1.0),
            steer: self.steer.clamp(-1.0, 1.0),
            brake: self.brake.clamp(0.0, 1.0),
        }
    }
}

/// The world settings a replay session changes and later restores.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WorldSettings {
    pub synchronous_mode: bool,
    pub fixed_delta_seconds: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Actor {
    pub id: ActorId,
    pub type_id: String,
}

/// RGB camera attachment parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraSpec {
    pub width: u32,
    pub height: u32,
    pub fov: f32,
    /// Mount offset relative to the vehicle origin, in meters.
    pub mount_x: f32,
    pub mount_z: f32,
}

/// A sensor image borrowed from the simulator for the duration of a callback.
pub struct SensorImage<'a> {
    pub raw: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub frame: u64,
}

/// Camera callback. Runs on a simulator-owned thread.
pub type ImageCallback = Box<dyn FnMut(SensorImage<'_>) + Send + 'static>;

pub trait Simulator {
    /// Simulation seconds elapsed since the world started.
    fn elapsed_seconds(&self) -> Result<f64>;

    /// Advance the world by one step.
    fn tick(&mut self) -> Result<()>;

    fn settings(&self) -> Result<WorldSettings>;

    fn apply_settings(&mut self, settings: &WorldSettings) -> Result<()>;

    /// Recorder metadata for a log file. Contains a `Duration: <secs>` line.
    fn recording_info(&mut self, recording: &str) -> Result<String>;

    /// Start replaying a recorded log from the beginning.
    fn start_replay(&mut self, recording: &str) -> Result<()>;

    /// Vehicles currently in the world matching `type_id`.
    fn find_vehicles(&self, type_id: &str) -> Result<Vec<Actor>>;

    /// Spawn an RGB camera on `vehicle` and start streaming into `on_image`.
    fn attach_camera(
        &mut self,
        vehicle: ActorId,
        spec: &CameraSpec,
        on_image: ImageCallback,
    ) -> Result<ActorId>;

    /// Current control input of a vehicle.
    fn vehicle_control(&self, vehicle: ActorId) -> Result<VehicleControl>;

    /// Stop a sensor's stream. No callbacks run after this returns.
    fn stop_sensor(&mut self, sensor: ActorId) -> Result<()>;

    fn destroy_actor(&mut self, actor: ActorId) -> Result<()>;
}

/// Resolve a simulator host string to a backend.
pub fn connect(host: &str, timeout: Duration) -> Result<Box<dyn Simulator>> {
    if let Some(world) = host.strip_prefix("stub://") {
        log::info!("simulator: connected to {} (synthetic)", host);
        let config = SyntheticConfig {
            map: world.to_string(),
            ..SyntheticConfig::default()
        };
        return Ok(Box::new(SyntheticSimulator::new(config)));
    }
    bail!(
        "no simulator client for {} (timeout {:?}); only stub:// hosts are built in",
        host,
        timeout
    )
}

// ----------------------------------------------------------------------------
// Synthetic backend (stub://)
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub map: String,
    /// Length of every recording this backend "replays", in seconds.
    pub recording_duration: f64,
    /// Elapsed seconds the world reports before the first tick.
    pub start_elapsed: f64,
    /// Step used while the world is not in synchronous mode.
    pub default_delta: f64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            map: "town04".to_string(),
            recording_duration: 20.0,
            start_elapsed: 3.0,
            default_delta: 0.05,
        }
    }
}

struct SensorTick {
    frame: u64,
    elapsed: f64,
}

struct SyntheticCamera {
    tx: Option<mpsc::Sender<SensorTick>>,
    join: Option<JoinHandle<()>>,
}

impl SyntheticCamera {
    fn stop(&mut self) {
        self.tx = None;
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::warn!("synthetic camera thread panicked");
            }
        }
    }
}

pub struct SyntheticSimulator {
    config: SyntheticConfig,
    settings: WorldSettings,
    elapsed: f64,
    frame: u64,
    replay_pending: bool,
    actors: Vec<Actor>,
    cameras: HashMap<ActorId, SyntheticCamera>,
    next_id: ActorId,
}

impl SyntheticSimulator {
    pub fn new(config: SyntheticConfig) -> Self {
        let elapsed = config.start_elapsed;
        Self {
            config,
            settings: WorldSettings::default(),
            elapsed,
            frame: 0,
            replay_pending: false,
            actors: Vec::new(),
            cameras: HashMap::new(),
            next_id: 100,
        }
    }

    fn delta(&self) -> f64 {
        match (self.settings.synchronous_mode, self.settings.fixed_delta_seconds) {
            (true, Some(delta)) => delta,
            _ => self.config.default_delta,
        }
    }

    fn spawn(&mut self, type_id: &str) -> ActorId {
        let id = self.next_id;
        self.next_id += 1;
        self.actors.push(Actor {
            id,
            type_id: type_id.to_string(),
        });
        id
    }

    fn has_actor(&self, id: ActorId) -> bool {
        self.actors.iter().any(|a| a.id == id)
    }

    /// Actors currently alive (vehicles and sensors).
    pub fn actors(&self) -> &[Actor] {
        &self.actors
    }

    pub fn active_cameras(&self) -> usize {
        self.cameras.values().filter(|c| c.tx.is_some()).count()
    }
}

impl Simulator for SyntheticSimulator {
    fn elapsed_seconds(&self) -> Result<f64> {
        Ok(self.elapsed)
    }

    fn tick(&mut self) -> Result<()> {
        self.elapsed += self.delta();
        self.frame += 1;

        if self.replay_pending {
            self.spawn(CAR_TYPE_ID);
            self.spawn(BIKE_TYPE_ID);
            self.replay_pending = false;
        }

        for camera in self.cameras.values() {
            if let Some(tx) = &camera.tx {
                // A closed receiver only means the sensor thread already exited.
                let _ = tx.send(SensorTick {
                    frame: self.frame,
                    elapsed: self.elapsed,
                });
            }
        }
        Ok(())
    }

    fn settings(&self) -> Result<WorldSettings> {
        Ok(self.settings)
    }

    fn apply_settings(&mut self, settings: &WorldSettings) -> Result<()> {
        if let Some(delta) = settings.fixed_delta_seconds {
            if delta <= 0.0 {
                bail!("fixed delta must be positive, got {}", delta);
            }
        }
        self.settings = *settings;
        Ok(())
    }

    fn recording_info(&mut self, recording: &str) -> Result<String> {
        if recording.trim().is_empty() {
            bail!("recording path is empty");
        }
        let frames = (self.config.recording_duration / self.config.default_delta).round() as u64;
        Ok(format!(
            "Version: 1\nMap: {}\nDate: synthetic\n\nFile: {}\nFrames: {}\nDuration: {:.2} seconds\n",
            self.config.map, recording, frames, self.config.recording_duration
        ))
    }

    fn start_replay(&mut self, recording: &str) -> Result<()> {
        log::info!("synthetic replay of {} on {}", recording, self.config.map);
        self.replay_pending = true;
        Ok(())
    }

    fn find_vehicles(&self, type_id: &str) -> Result<Vec<Actor>> {
        Ok(self
            .actors
            .iter()
            .filter(|a| a.type_id == type_id)
            .cloned()
            .collect())
    }

    fn attach_camera(
        &mut self,
        vehicle: ActorId,
        spec: &CameraSpec,
        mut on_image: ImageCallback,
    ) -> Result<ActorId> {
        if !self.has_actor(vehicle) {
            bail!("cannot attach camera: actor {} does not exist", vehicle);
        }
        if spec.width == 0 || spec.height == 0 {
            bail!("camera size must be non-zero");
        }
        let id = self.spawn("sensor.camera.rgb");
        let (tx, rx) = mpsc::channel::<SensorTick>();
        let (width, height) = (spec.width, spec.height);
        let join = std::thread::Builder::new()
            .name(format!("synthetic-camera-{}", id))
            .spawn(move || {
                let mut rng = rand::thread_rng();
                // Reused between frames, so callbacks must copy what they keep.
                let mut buffer = vec![0u8; width as usize * height as usize * 4];
                while let Ok(tick) = rx.recv() {
                    std::thread::sleep(Duration::from_micros(rng.gen_range(0..1500)));
                    render_road(&mut buffer, width, height, tick.elapsed);
                    on_image(SensorImage {
                        raw: &buffer,
                        width,
                        height,
                        format: PixelFormat::Bgra32,
                        frame: tick.frame,
                    });
                }
            })
            .map_err(|e| anyhow!("spawn camera thread: {}", e))?;
        self.cameras.insert(
            id,
            SyntheticCamera {
                tx: Some(tx),
                join: Some(join),
            },
        );
        log::debug!("synthetic camera {} attached to actor {}", id, vehicle);
        Ok(id)
    }

    fn vehicle_control(&self, vehicle: ActorId) -> Result<VehicleControl> {
        if !self.has_actor(vehicle) {
            bail!("actor {} does not exist", vehicle);
        }
        let t = self.elapsed;
        let braking = t % 10.0 > 9.0;
        Ok(VehicleControl {
            throttle: if braking { 0.0 } else { 0.5 + 0.3 * (t * 0.5).sin() },
            steer: 0.2 * (t * 0.3).sin(),
            brake: if braking { 0.4 } else { 0.0 },
        })
    }

    fn stop_sensor(&mut self, sensor: ActorId) -> Result<()> {
        let camera = self
            .cameras
            .get_mut(&sensor)
            .ok_or_else(|| anyhow!("sensor {} is not a camera", sensor))?;
        camera.stop();
        Ok(())
    }

    fn destroy_actor(&mut self, actor: ActorId) -> Result<()> {
        if let Some(mut camera) = self.cameras.remove(&actor) {
            camera.stop();
        }
        let before = self.actors.len();
        self.actors.retain(|a| a.id != actor);
        if self.actors.len() == before {
            bail!("actor {} does not exist", actor);
        }
        Ok(())
    }
}

impl Drop for SyntheticSimulator {
    fn drop(&mut self) {
        for camera in self.cameras.values_mut() {
            camera.stop();
        }
    }
}

/// Paint a gray road with a dashed white line and a solid yellow line, BGRA.
fn render_road(buffer: &mut [u8], width: u32, height: u32, elapsed: f64) {
    const ASPHALT: [u8; 4] = [70, 70, 70, 255];
    const WHITE: [u8; 4] = [245, 245, 245, 255];
    const YELLOW: [u8; 4] = [40, 200, 230, 255];

    let w = width as usize;
    let h = height as usize;
    let horizon = h / 3;
    let stripe = (w / 40).max(1);
    let white_x = w * 3 / 10;
    let yellow_x = w * 7 / 10;
    let dash = (h / 12).max(1);
    let offset = (elapsed * 120.0) as usize;

    for y in 0..h {
        for x in 0..w {
            let px = if y < horizon {
                [200, 160, 120, 255]
            } else if x >= yellow_x && x < yellow_x + stripe {
                YELLOW
            } else if x >= white_x && x < white_x + stripe && ((y + offset) / dash) % 2 == 0 {
                WHITE
            } else {
                ASPHALT
            };
            let idx = (y * w + x) * 4;
            buffer[idx..idx + 4].copy_from_slice(&px);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn controls_are_clamped() {
        let c = VehicleControl {
            throttle: 1.4,
            steer: -3.0,
            brake: -0.2,
        }
        .clamped();
        assert_eq!(
            c,
            VehicleControl {
                throttle: 1.0,
                steer: -1.0,
                brake: 0.0
            }
        );
    }

    #[test]
    fn non_stub_hosts_are_rejected() {
        assert!(connect("localhost:3010", Duration::from_secs(1)).is_err());
        assert!(connect("stub://town04", Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn actors_appear_after_first_tick() -> Result<()> {
        let mut sim = SyntheticSimulator::new(SyntheticConfig::default());
        sim.start_replay("/tmp/a.log")?;
        assert!(sim.find_vehicles(CAR_TYPE_ID)?.is_empty());
        sim.tick()?;
        assert_eq!(sim.find_vehicles(CAR_TYPE_ID)?.len(), 1);
        assert_eq!(sim.find_vehicles(BIKE_TYPE_ID)?.len(), 1);
        Ok(())
    }

    #[test]
    fn synchronous_mode_uses_fixed_delta() -> Result<()> {
        let mut sim = SyntheticSimulator::new(SyntheticConfig {
            start_elapsed: 1.0,
            ..SyntheticConfig::default()
        });
        sim.apply_settings(&WorldSettings {
            synchronous_mode: true,
            fixed_delta_seconds: Some(0.25),
        })?;
        sim.tick()?;
        sim.tick()?;
        assert!((sim.elapsed_seconds()? - 1.5).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn recording_info_reports_duration() -> Result<()> {
        let mut sim = SyntheticSimulator::new(SyntheticConfig {
            recording_duration: 12.34,
            ..SyntheticConfig::default()
        });
        let info = sim.recording_info("/tmp/a.log")?;
        assert!(info.contains("Duration: 12.34 seconds"));
        Ok(())
    }

    #[test]
    fn camera_streams_until_stopped() -> Result<()> {
        let mut sim = SyntheticSimulator::new(SyntheticConfig::default());
        sim.start_replay("/tmp/a.log")?;
        sim.tick()?;
        let car = sim.find_vehicles(CAR_TYPE_ID)?[0].id;

        let (tx, rx) = mpsc::channel();
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let seen = sizes.clone();
        let spec = CameraSpec {
            width: 8,
            height: 6,
            fov: 90.0,
            mount_x: 0.8,
            mount_z: 1.7,
        };
        let camera = sim.attach_camera(
            car,
            &spec,
            Box::new(move |img: SensorImage<'_>| {
                seen.lock().unwrap().push(img.raw.len());
                let _ = tx.send(img.frame);
            }),
        )?;
        sim.tick()?;
        let frame = rx.recv_timeout(Duration::from_secs(5))?;
        assert_eq!(frame, 2);
        assert_eq!(sizes.lock().unwrap()[0], 8 * 6 * 4);

        sim.stop_sensor(camera)?;
        assert_eq!(sim.active_cameras(), 0);
        sim.destroy_actor(camera)?;
        sim.destroy_actor(car)?;
        assert!(sim.find_vehicles(CAR_TYPE_ID)?.is_empty());
        Ok(())
    }

    #[test]
    fn rendered_road_contains_both_lane_colors() {
        use crate::frame::FrameSample;
        use crate::segment::{LaneClass, Segmenter};

        let (w, h) = (80u32, 60u32);
        let mut buffer = vec![0u8; (w * h * 4) as usize];
        render_road(&mut buffer, w, h, 0.0);
        let frame = FrameSample::from_raw(&buffer, w, h, PixelFormat::Bgra32, 0).unwrap();
        let mask = Segmenter::default().segment(&frame);
        assert!(mask.count(LaneClass::White) > 0);
        assert!(mask.count(LaneClass::Yellow) > 0);
    }
}
