//! control_loop.rs
//! Composition root: one observe -> decide -> act iteration, repeated for a
//! configured number of episodes. Cancellation is an explicit shared flag
//! handed in by the caller, never process-wide signal state.

use std::collections::HashMap;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::{Duration, Instant};

use log::{info, warn};
use spin_sleep::{SpinSleeper, SpinStrategy};

use crate::config::{ActionMode, RuntimeConfig};
use crate::error::{BridgeError, Result};
use crate::motion::hardware::HardwareInterface;
use crate::motion::joints::JointSet;
use crate::motion::mapper::JointSpaceMapper;
use crate::runtime::decision::{DecisionProcess, Observation};
use crate::runtime::subscriber::Subscriber;
use crate::utils::telemetry::{BridgeEvent, EventRecorder};
use crate::vision::frame_buffer::FrameBuffer;

pub struct ControlLoop {
    prompt: String,
    joint_set: JointSet,
    mapper: JointSpaceMapper,
    cameras: Vec<FrameBuffer>,
    hardware: Box<dyn HardwareInterface>,
    process: Box<dyn DecisionProcess>,
    subscribers: Vec<Box<dyn Subscriber>>,
    recorder: Arc<EventRecorder>,
    action_mode: ActionMode,
    continuous_capture: bool,
    start_home: bool,
    episodes: u32,
    max_steps: u64,
    step_interval: Option<Duration>,
    sleeper: SpinSleeper,
}

impl ControlLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        prompt: String,
        joint_set: JointSet,
        runtime: &RuntimeConfig,
        continuous_capture: bool,
        cameras: Vec<FrameBuffer>,
        hardware: Box<dyn HardwareInterface>,
        process: Box<dyn DecisionProcess>,
        recorder: Arc<EventRecorder>,
    ) -> Self {
        let mapper = JointSpaceMapper::new(runtime.delta_gain, recorder.clone());
        Self {
            prompt,
            joint_set,
            mapper,
            cameras,
            hardware,
            process,
            subscribers: Vec::new(),
            recorder,
            action_mode: runtime.action_mode,
            continuous_capture,
            start_home: runtime.start_home,
            episodes: runtime.episodes,
            max_steps: runtime.max_steps,
            step_interval: runtime.control_hz.map(|hz| Duration::from_secs_f64(1.0 / hz)),
            sleeper: SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread),
        }
    }

    pub fn add_subscriber(&mut self, subscriber: Box<dyn Subscriber>) {
        self.subscribers.push(subscriber);
    }

    /// Runs every configured episode, checking `cancel` between steps.
    /// Cameras are started before the first episode and stopped on every
    /// exit path, early error included.
    pub fn run(&mut self, cancel: &Arc<AtomicBool>) -> Result<()> {
        self.start_cameras()?;
        let outcome = self.run_episodes(cancel);
        self.stop_cameras();
        outcome
    }

    fn run_episodes(&mut self, cancel: &Arc<AtomicBool>) -> Result<()> {
        if self.start_home {
            self.dispatch_home()?;
        }

        for episode in 0..self.episodes {
            if cancel.load(Ordering::Acquire) {
                break;
            }

            self.recorder.record(BridgeEvent::EpisodeStarted {
                episode,
                ts_ns: self.recorder.now_ns(),
            });
            for subscriber in &mut self.subscribers {
                subscriber.on_episode_start(episode);
            }

            let mut steps = 0u64;
            while steps < self.max_steps && !cancel.load(Ordering::Acquire) {
                let step_start = Instant::now();
                self.step(episode, steps)?;
                steps += 1;

                if let Some(interval) = self.step_interval {
                    let elapsed = step_start.elapsed();
                    if elapsed < interval {
                        self.sleeper.sleep(interval - elapsed);
                    }
                }
            }

            self.process.reset();
            self.recorder.record(BridgeEvent::EpisodeEnded {
                episode,
                steps,
                ts_ns: self.recorder.now_ns(),
            });
            for subscriber in &mut self.subscribers {
                subscriber.on_episode_end(episode, steps);
            }
        }
        Ok(())
    }

    /// One observe -> decide -> act iteration.
    pub fn step(&mut self, episode: u32, step: u64) -> Result<()> {
        let started = Instant::now();
        let observation = self.observe()?;

        let mut chunk = self.process.infer(&observation)?;
        let action = match chunk.pop_front() {
            Some(action) => action,
            None => {
                return Err(BridgeError::Decision(
                    "decision process returned no action".to_string(),
                ));
            }
        };

        let joints = self.joint_set.all_joints();
        let goal = match self.action_mode {
            ActionMode::Absolute => self.mapper.write_absolute(&action, joints)?,
            ActionMode::Delta => {
                self.mapper
                    .write_delta(&action, joints, &observation.joint_position)?
            }
        };
        self.hardware.send_action(&goal)?;

        for subscriber in &mut self.subscribers {
            subscriber.on_step(&observation, &goal);
        }
        self.recorder.record(BridgeEvent::StepCompleted {
            episode,
            step,
            ts_ns: self.recorder.now_ns(),
            exec_us: started.elapsed().as_micros() as u64,
        });
        Ok(())
    }

    /// Assembles the observation record: prompt, gripper vector, full joint
    /// vector, one frame per camera.
    pub fn observe(&mut self) -> Result<Observation> {
        let raw = self.hardware.get_observation()?;
        let gripper_position = self
            .mapper
            .read(&raw, std::slice::from_ref(self.joint_set.gripper()))?;
        let joint_position = self.mapper.read(&raw, self.joint_set.all_joints())?;

        let mut frames = HashMap::with_capacity(self.cameras.len());
        for camera in &self.cameras {
            let frame = if self.continuous_capture {
                match camera.get_latest(1).pop() {
                    Some(frame) => frame,
                    // Cold start: the producer has not filled the ring yet
                    None => camera.capture_one()?,
                }
            } else {
                camera.capture_one()?
            };
            frames.insert(camera.name().to_string(), frame);
        }

        Ok(Observation {
            prompt: self.prompt.clone(),
            gripper_position,
            joint_position,
            frames,
        })
    }

    /// Sends every joint to its configured home as one absolute action.
    /// Skipped with a warning unless all joints define one.
    fn dispatch_home(&mut self) -> Result<()> {
        match self.joint_set.homes() {
            Some(homes) => {
                info!("dispatching home positions before first episode");
                let goal = self
                    .mapper
                    .write_absolute(&homes, self.joint_set.all_joints())?;
                self.hardware.send_action(&goal)
            }
            None => {
                warn!("start_home set but not every joint defines a home, skipping");
                Ok(())
            }
        }
    }

    fn start_cameras(&mut self) -> Result<()> {
        if !self.continuous_capture {
            return Ok(());
        }
        for camera in &mut self.cameras {
            camera.start()?;
        }
        Ok(())
    }

    fn stop_cameras(&mut self) {
        for camera in &mut self.cameras {
            camera.stop();
        }
    }

    /// Read access for teardown reporting.
    pub fn cameras(&self) -> &[FrameBuffer] {
        &self.cameras
    }
}
