//! Demo runner for the perception-action bridge.
//!
//! Loads a YAML/JSON bridge configuration (path as the single argument, or a
//! built-in demo config without one), wires a simulated arm and synthetic
//! cameras into the control loop, and drives it with the configured policy:
//! a scripted waypoint policy served through the chunk broker, or a
//! simulated teleop leader in delta mode. Telemetry lands in
//! `data/events.csv`, per-step rows in `data/steps.csv`.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, atomic::AtomicBool};

use log::{error, info};

use arm_bridge::config::{BridgeConfig, PolicyKind};
use arm_bridge::error::Result;
use arm_bridge::motion::hardware::SimulatedArm;
use arm_bridge::motion::joints::{JointDescriptor, JointSet};
use arm_bridge::runtime::control_loop::ControlLoop;
use arm_bridge::runtime::decision::{ChunkBroker, DecisionProcess, ScriptedPolicy, TeleopProcess};
use arm_bridge::runtime::subscriber::{CsvStepLogger, LoggingSubscriber};
use arm_bridge::utils::telemetry::EventRecorder;
use arm_bridge::vision::capture::default_device;
use arm_bridge::vision::frame_buffer::FrameBuffer;

const DATA_DIR: &str = "data";

fn main() {
    env_logger::init();
    info!("=== ARM BRIDGE START ===");

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            error!("configuration rejected: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(&config) {
        error!("bridge run failed: {e}");
        std::process::exit(1);
    }
    info!("=== ARM BRIDGE FINISHED ===");
}

fn load_config() -> Result<BridgeConfig> {
    match env::args().nth(1) {
        Some(path) => {
            info!("loading configuration from {path}");
            BridgeConfig::from_file(Path::new(&path))
        }
        None => {
            info!("no configuration path given, using the built-in demo config");
            let config: BridgeConfig = serde_yaml::from_str(DEMO_CONFIG)
                .map_err(|e| arm_bridge::BridgeError::ConfigParse(e.to_string()))?;
            config.validate()?;
            Ok(config)
        }
    }
}

fn run(config: &BridgeConfig) -> Result<()> {
    fs::create_dir_all(DATA_DIR)?;

    let recorder = Arc::new(EventRecorder::new());
    recorder.start_exporter(PathBuf::from(DATA_DIR).join("events.csv"));

    let joint_set = config.robot.joint_set()?;
    let cameras: Vec<FrameBuffer> = config
        .cameras
        .iter()
        .map(|spec| {
            FrameBuffer::new(
                spec,
                default_device(spec),
                config.capture.clone(),
                recorder.clone(),
            )
        })
        .collect();

    let arm = SimulatedArm::new(joint_set.all_joints()).with_noise(0.01);
    let process = build_process(config, &joint_set);

    let mut control = ControlLoop::new(
        config.prompt.clone(),
        joint_set,
        &config.runtime,
        config.capture.continuous,
        cameras,
        Box::new(arm),
        process,
        recorder.clone(),
    );
    control.add_subscriber(Box::new(LoggingSubscriber));
    match CsvStepLogger::create(PathBuf::from(DATA_DIR).join("steps.csv")) {
        Ok(logger) => control.add_subscriber(Box::new(logger)),
        Err(e) => error!("step logger disabled: {e}"),
    }

    // Explicit cancellation token; a surrounding process may share and set it
    let cancel = Arc::new(AtomicBool::new(false));
    let outcome = control.run(&cancel);

    for camera in control.cameras() {
        let stats = camera.stats();
        info!(
            "[{}] {} produced / {} evicted / {} read failures",
            camera.name(),
            stats.frames_produced,
            stats.frames_evicted,
            stats.read_failures
        );
    }
    recorder.stop_exporter();
    outcome
}

/// Teleop follows a simulated leader parked at its home positions; anything
/// else runs the scripted waypoints through the chunk broker the way a
/// remote policy would be consumed.
fn build_process(config: &BridgeConfig, joint_set: &JointSet) -> Box<dyn DecisionProcess> {
    match config.runtime.policy {
        PolicyKind::Teleop => {
            let leader = SimulatedArm::new(joint_set.all_joints());
            Box::new(TeleopProcess::new(
                Box::new(leader),
                joint_set.all_joints().to_vec(),
            ))
        }
        PolicyKind::Scripted => {
            let waypoints = demo_waypoints(joint_set.all_joints());
            Box::new(ChunkBroker::new(
                ScriptedPolicy::new(waypoints),
                config.runtime.action_horizon,
            ))
        }
    }
}

/// Sweep each joint between quarter points of its range, gripper included.
fn demo_waypoints(joints: &[JointDescriptor]) -> Vec<Vec<f64>> {
    let at = |fraction: f64| -> Vec<f64> {
        joints
            .iter()
            .map(|j| j.min_limit + fraction * j.range())
            .collect()
    };
    vec![at(0.5), at(0.25), at(0.75), at(0.5)]
}

const DEMO_CONFIG: &str = r#"
prompt: "wave at the camera"
robot:
  port: /dev/null
  id: demo
  joints:
    - { name: shoulder_pan, min_limit: -110.0, max_limit: 110.0, home: 0.0 }
    - { name: shoulder_lift, min_limit: -100.0, max_limit: 100.0, home: -20.0 }
    - { name: elbow_flex, min_limit: -100.0, max_limit: 90.0, home: 25.0 }
    - { name: wrist_flex, min_limit: -95.0, max_limit: 95.0, home: 40.0 }
    - { name: wrist_roll, min_limit: -160.0, max_limit: 160.0, home: 78.0 }
  gripper: { name: gripper, min_limit: 0.0, max_limit: 100.0, home: 1.0 }
cameras:
  - { name: front, index: 0 }
  - { name: wrist_cam, index: 2, flipped: true }
capture:
  sample_rate_hz: 8.0
runtime:
  policy: scripted
  action_mode: absolute
  start_home: true
  episodes: 1
  max_steps: 200
  control_hz: 20.0
"#;
