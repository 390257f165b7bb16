//! subscriber.rs
//! Episode boundary hooks. Subscribers observe the loop, they never steer it:
//! nothing a hook does can alter the observation or the dispatched action.

use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;

use csv::Writer;
use log::{debug, error, info};
use serde::Serialize;

use crate::runtime::decision::Observation;

/// Side-effect-only notifications around the control loop. All hooks default
/// to no-ops so a subscriber implements only what it cares about.
pub trait Subscriber: Send {
    fn on_episode_start(&mut self, _episode: u32) {}

    fn on_step(&mut self, _observation: &Observation, _action: &HashMap<String, f64>) {}

    fn on_episode_end(&mut self, _episode: u32, _steps: u64) {}
}

/// Episode lifecycle at info level, per-step detail at debug.
#[derive(Default)]
pub struct LoggingSubscriber;

impl Subscriber for LoggingSubscriber {
    fn on_episode_start(&mut self, episode: u32) {
        info!("episode {episode} started");
    }

    fn on_step(&mut self, observation: &Observation, action: &HashMap<String, f64>) {
        debug!(
            "step: joints={:?} gripper={:?} cameras={} action={action:?}",
            observation.joint_position,
            observation.gripper_position,
            observation.frames.len()
        );
    }

    fn on_episode_end(&mut self, episode: u32, steps: u64) {
        info!("episode {episode} ended after {steps} steps");
    }
}

#[derive(Debug, Serialize)]
struct StepRow {
    episode: u32,
    step: u64,
    /// Joint positions in set order, semicolon-joined.
    joints: String,
    gripper: f64,
    /// Dispatched goal map, "key=value" pairs sorted by key, semicolon-joined.
    action: String,
}

/// Writes one CSV row per step for offline inspection of an episode.
/// Write errors are logged, never surfaced; recording must not stop the arm.
pub struct CsvStepLogger {
    writer: Writer<File>,
    path: PathBuf,
    episode: u32,
    step: u64,
}

impl CsvStepLogger {
    pub fn create(path: PathBuf) -> std::io::Result<Self> {
        let file = File::create(&path)?;
        Ok(Self {
            writer: Writer::from_writer(file),
            path,
            episode: 0,
            step: 0,
        })
    }
}

impl Subscriber for CsvStepLogger {
    fn on_episode_start(&mut self, episode: u32) {
        self.episode = episode;
        self.step = 0;
    }

    fn on_step(&mut self, observation: &Observation, action: &HashMap<String, f64>) {
        let joints = observation
            .joint_position
            .iter()
            .map(|v| format!("{v:.4}"))
            .collect::<Vec<_>>()
            .join(";");

        let mut pairs: Vec<String> = action
            .iter()
            .map(|(k, v)| format!("{k}={v:.4}"))
            .collect();
        pairs.sort();

        let row = StepRow {
            episode: self.episode,
            step: self.step,
            joints,
            gripper: observation.gripper_position.first().copied().unwrap_or(0.0),
            action: pairs.join(";"),
        };
        if let Err(e) = self.writer.serialize(row) {
            error!("step log write failed: {e}");
        }
        self.step += 1;
    }

    fn on_episode_end(&mut self, _episode: u32, _steps: u64) {
        if let Err(e) = self.writer.flush() {
            error!("step log flush failed for {:?}: {e}", self.path);
        }
    }
}
