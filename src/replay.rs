//! Replay loop.
//!
//! Drives one session from setup to speed alignment:
//!
//! 1. Switch the world to synchronous mode, read the recording length, start
//!    the replay and find the ego vehicle.
//! 2. Attach a camera whose callback copies each image into the `FrameSlot`.
//! 3. Tick until the time gate expires or quit is requested. Ticks without a
//!    pending frame only service input and the termination check.
//! 4. Close the manifest, release the camera and vehicle, restore world
//!    settings, then merge the speed log exactly once.
//!
//! Once the dataset exists, step 4 runs on every exit path, including write
//! failures. A setup failure only releases what was already acquired; no
//! manifest exists yet, so nothing is merged.

use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::align::{merge_speed_log, AlignOutcome};
use crate::config::ReplayConfig;
use crate::dataset::{DatasetSink, SessionConfig};
use crate::display::{Display, TickClock};
use crate::frame::{FrameSample, FrameSlot};
use crate::gate::{parse_recording_duration, ReplayTimeGate};
use crate::segment::Segmenter;
use crate::sim::{ActorId, SensorImage, Simulator, WorldSettings, BIKE_TYPE_ID, CAR_TYPE_ID};
use crate::ui::ReplayProgress;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Which replay actor the camera rides on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Viewpoint {
    Car,
    Bike,
}

impl Viewpoint {
    pub fn type_id(self) -> &'static str {
        match self {
            Viewpoint::Car => CAR_TYPE_ID,
            Viewpoint::Bike => BIKE_TYPE_ID,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminationReason {
    DurationElapsed,
    QuitRequested,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplayState {
    WaitingForFrame,
    Ready,
    Terminated(TerminationReason),
}

/// What a finished session did.
#[derive(Clone, Debug)]
pub struct ReplayReport {
    pub session: SessionConfig,
    pub ticks: u64,
    pub frames_accepted: u64,
    pub frames_overwritten: u64,
    pub termination: TerminationReason,
    pub alignment: AlignOutcome,
}

/// Simulator-side resources acquired during setup.
#[derive(Default)]
struct Acquired {
    saved_settings: Option<WorldSettings>,
    vehicle: Option<ActorId>,
    sensor: Option<ActorId>,
}

struct Running {
    gate: ReplayTimeGate,
    slot: Arc<FrameSlot>,
    vehicle: ActorId,
}

#[derive(Default)]
struct LoopStats {
    ticks: u64,
    accepted: u64,
    last_elapsed: f64,
}

pub struct ReplayLoop<'a> {
    sim: &'a mut dyn Simulator,
    display: &'a mut dyn Display,
    config: &'a ReplayConfig,
    viewpoint: Viewpoint,
    session: SessionConfig,
    segmenter: Segmenter,
    progress: Option<ReplayProgress>,
}

impl<'a> ReplayLoop<'a> {
    pub fn new(
        sim: &'a mut dyn Simulator,
        display: &'a mut dyn Display,
        config: &'a ReplayConfig,
        viewpoint: Viewpoint,
        session: SessionConfig,
    ) -> Self {
        Self {
            sim,
            display,
            config,
            viewpoint,
            session,
            segmenter: Segmenter::new(config.segmentation),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ReplayProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Run the whole session. Cleanup and the speed merge happen on every
    /// path that got far enough to open the dataset.
    pub fn run(mut self) -> Result<ReplayReport> {
        let mut acquired = Acquired::default();

        let setup = self.setup(&mut acquired);
        let (running, sink) = match setup {
            Ok(ready) => ready,
            Err(err) => {
                log::error!("replay setup failed: {:#}", err);
                self.release(&mut acquired);
                return Err(err);
            }
        };

        let mut stats = LoopStats::default();
        let outcome = self.run_loop(&running, &mut stats, sink);
        let overwritten = running.slot.overwritten();

        self.release(&mut acquired);
        if let Some(progress) = self.progress.take() {
            progress.finish(stats.accepted);
        }

        let alignment = self.finalize();

        let termination = outcome?;
        Ok(ReplayReport {
            session: self.session,
            ticks: stats.ticks,
            frames_accepted: stats.accepted,
            frames_overwritten: overwritten,
            termination,
            alignment,
        })
    }

    fn setup(&mut self, acquired: &mut Acquired) -> Result<(Running, DatasetSink)> {
        let saved = self.sim.settings()?;
        acquired.saved_settings = Some(saved);
        self.sim.apply_settings(&WorldSettings {
            synchronous_mode: true,
            fixed_delta_seconds: Some(self.config.fixed_delta_seconds),
        })?;

        let info = self.sim.recording_info(&self.config.recording)?;
        let duration = parse_recording_duration(&info)?;
        let start_elapsed = self.sim.elapsed_seconds()?;
        let gate = ReplayTimeGate::new(duration, start_elapsed);
        log::info!(
            "replaying {} ({:.2} s), ends at simulation time {:.2} s",
            self.config.recording,
            duration,
            gate.duration_bound()
        );

        self.sim.start_replay(&self.config.recording)?;
        // Replay actors only exist after one world step.
        self.sim.tick()?;

        let type_id = self.viewpoint.type_id();
        let vehicles = self.sim.find_vehicles(type_id)?;
        let Some(ego) = vehicles.first() else {
            bail!("no {} found in the replay", type_id);
        };
        let vehicle = ego.id;
        acquired.vehicle = Some(vehicle);
        log::info!("using ego id={} type={}", ego.id, ego.type_id);

        let slot = Arc::new(FrameSlot::new());
        let producer = slot.clone();
        let sensor = self.sim.attach_camera(
            vehicle,
            &self.config.camera,
            Box::new(move |image: SensorImage<'_>| {
                match FrameSample::from_raw(
                    image.raw,
                    image.width,
                    image.height,
                    image.format,
                    image.frame,
                ) {
                    Ok(frame) => {
                        producer.put(frame);
                    }
                    Err(err) => log::warn!("dropping sensor frame {}: {:#}", image.frame, err),
                }
            }),
        )?;
        acquired.sensor = Some(sensor);

        if let Some(progress) = &self.progress {
            progress.set_total(duration);
        }

        let sink = DatasetSink::create(self.session.clone())?;
        Ok((
            Running {
                gate,
                slot,
                vehicle,
            },
            sink,
        ))
    }

    fn run_loop(
        &mut self,
        running: &Running,
        stats: &mut LoopStats,
        mut sink: DatasetSink,
    ) -> Result<TerminationReason> {
        let result = self.tick_until_terminated(running, stats, &mut sink);
        if let Err(err) = sink.finish() {
            log::error!("failed to close manifest: {:#}", err);
        }
        result
    }

    fn tick_until_terminated(
        &mut self,
        running: &Running,
        stats: &mut LoopStats,
        sink: &mut DatasetSink,
    ) -> Result<TerminationReason> {
        let mut gate = running.gate.clone();
        let mut clock = TickClock::new(self.config.target_fps);
        let mut last_health = Instant::now();

        loop {
            clock.tick();
            let state = self.step(&mut gate, running, stats, sink)?;

            if last_health.elapsed() >= HEALTH_LOG_INTERVAL {
                log::info!(
                    "replay health: state={:?} ticks={} accepted={} overwritten={} remaining={:.2}s",
                    state,
                    stats.ticks,
                    stats.accepted,
                    running.slot.overwritten(),
                    gate.remaining(stats.last_elapsed)
                );
                last_health = Instant::now();
            }

            if let ReplayState::Terminated(reason) = state {
                match reason {
                    TerminationReason::DurationElapsed => log::info!("replay finished"),
                    TerminationReason::QuitRequested => log::info!("quit requested, stopping replay"),
                }
                return Ok(reason);
            }
        }
    }

    /// One tick: quit check, world step, expiry check, then at most one frame.
    fn step(
        &mut self,
        gate: &mut ReplayTimeGate,
        running: &Running,
        stats: &mut LoopStats,
        sink: &mut DatasetSink,
    ) -> Result<ReplayState> {
        if self.display.quit_requested() {
            return Ok(ReplayState::Terminated(TerminationReason::QuitRequested));
        }

        self.sim.tick()?;
        stats.ticks += 1;
        let elapsed = self.sim.elapsed_seconds()?;
        stats.last_elapsed = elapsed;
        if gate.is_expired(elapsed) {
            return Ok(ReplayState::Terminated(TerminationReason::DurationElapsed));
        }
        if let Some(progress) = &self.progress {
            progress.update(gate.remaining(elapsed));
        }

        let Some(frame) = running.slot.try_take() else {
            return Ok(ReplayState::WaitingForFrame);
        };
        self.accept(gate, running.vehicle, sink, elapsed, frame)?;
        stats.accepted += 1;
        Ok(ReplayState::Ready)
    }

    fn accept(
        &mut self,
        gate: &mut ReplayTimeGate,
        vehicle: ActorId,
        sink: &mut DatasetSink,
        elapsed: f64,
        frame: FrameSample,
    ) -> Result<()> {
        let timestamp = gate.relative_timestamp(elapsed);
        let mask = self.segmenter.segment(&frame);
        self.display.present(&frame, &mask)?;
        // Controls are sampled at this tick, not at the frame's capture time.
        let control = self.sim.vehicle_control(vehicle)?;
        sink.write(timestamp, &frame, &mask, control, None)?;
        Ok(())
    }

    fn release(&mut self, acquired: &mut Acquired) {
        if let Some(sensor) = acquired.sensor.take() {
            if let Err(err) = self.sim.stop_sensor(sensor) {
                log::warn!("failed to stop camera {}: {:#}", sensor, err);
            }
            if let Err(err) = self.sim.destroy_actor(sensor) {
                log::warn!("failed to destroy camera {}: {:#}", sensor, err);
            }
        }
        if let Some(vehicle) = acquired.vehicle.take() {
            if let Err(err) = self.sim.destroy_actor(vehicle) {
                log::warn!("failed to destroy vehicle {}: {:#}", vehicle, err);
            }
        }
        if let Some(settings) = acquired.saved_settings.take() {
            if let Err(err) = self.sim.apply_settings(&settings) {
                log::warn!("failed to restore world settings: {:#}", err);
            }
        }
    }

    fn finalize(&self) -> AlignOutcome {
        match merge_speed_log(&self.session, &self.config.speed_log) {
            Ok(outcome) => outcome,
            Err(err) => {
                log::warn!(
                    "speed merge failed, manifest left as recorded: {:#}",
                    err
                );
                AlignOutcome::Failed(format!("{:#}", err))
            }
        }
    }
}
