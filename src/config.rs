//! config.rs
//! Bridge configuration: robot, cameras, capture tuning, and runtime policy.
//! Loaded from YAML or JSON (picked by file extension) and validated up
//! front so a malformed deployment fails at startup, not mid-episode.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{BridgeError, Result};
use crate::motion::joints::{JointDescriptor, JointSet};

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Task prompt forwarded with every observation.
    pub prompt: String,
    pub robot: RobotConfig,
    pub cameras: Vec<CameraSpec>,
    #[serde(default)]
    pub teleop: Option<TeleopConfig>,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RobotConfig {
    pub port: String,
    pub id: String,
    pub joints: Vec<JointDescriptor>,
    pub gripper: JointDescriptor,
}

impl RobotConfig {
    /// Validated joint ordering: primary joints followed by the gripper.
    pub fn joint_set(&self) -> Result<JointSet> {
        JointSet::new(self.joints.clone(), self.gripper.clone())
    }
}

/// Leader-arm connection for teleoperation sessions.
#[derive(Debug, Clone, Deserialize)]
pub struct TeleopConfig {
    pub port: String,
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraSpec {
    pub name: String,
    pub index: u32,
    #[serde(default)]
    pub flipped: bool,
    #[serde(default)]
    pub crop: Option<CropRect>,
}

/// Pixel region kept before resizing, in source-frame coordinates.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CropRect {
    pub min_x: u32,
    pub max_x: u32,
    pub min_y: u32,
    pub max_y: u32,
}

impl CropRect {
    #[inline]
    pub fn width(&self) -> u32 {
        self.max_x - self.min_x
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.max_y - self.min_y
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Frames sampled per second by each producer thread.
    pub sample_rate_hz: f64,
    /// Output resolution after letterbox resize.
    pub image_width: u32,
    pub image_height: u32,
    /// Frames retained per camera after a reaper pass.
    pub cleanup_threshold: usize,
    pub cleanup_interval_ms: u64,
    /// Reads discarded at start while the sensor settles.
    pub warmup_reads: u32,
    /// Bound on waiting for producer and reaper exit during stop.
    pub join_timeout_ms: u64,
    /// Consecutive read failures tolerated before the producer gives up.
    pub max_consecutive_failures: u32,
    /// Continuous background sampling; off means on-demand capture per step.
    pub continuous: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 4.0,
            image_width: 224,
            image_height: 224,
            cleanup_threshold: 30,
            cleanup_interval_ms: 2_000,
            warmup_reads: 3,
            join_timeout_ms: 4_000,
            max_consecutive_failures: 30,
            continuous: true,
        }
    }
}

impl CaptureConfig {
    #[inline]
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.sample_rate_hz)
    }

    #[inline]
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    #[inline]
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

/// How action vectors from the decision process are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionMode {
    /// Components are goal positions, clipped to limits.
    Absolute,
    /// Components are range fractions applied on top of current position.
    Delta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    /// Built-in waypoint policy, used by the demo binary.
    Scripted,
    /// Follow a leader arm configured in [teleop].
    Teleop,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub policy: PolicyKind,
    pub action_mode: ActionMode,
    /// Scale on delta actions; 1.0 reaches the requested fraction in one step.
    pub delta_gain: f64,
    /// Dispatch home positions before the first episode when all joints
    /// define one.
    pub start_home: bool,
    pub episodes: u32,
    pub max_steps: u64,
    /// Optional cap on loop rate; uncapped runs as fast as inference allows.
    pub control_hz: Option<f64>,
    /// Steps served from one decision-process query before re-querying.
    pub action_horizon: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            policy: PolicyKind::Scripted,
            action_mode: ActionMode::Absolute,
            delta_gain: 0.25,
            start_home: false,
            episodes: 1,
            max_steps: 1_000,
            control_hz: None,
            action_horizon: 10,
        }
    }
}

impl BridgeConfig {
    /// Loads and validates a configuration file, YAML or JSON by extension.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let config: BridgeConfig = match ext.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&text)
                .map_err(|e| BridgeError::ConfigParse(e.to_string()))?,
            "json" => serde_json::from_str(&text)
                .map_err(|e| BridgeError::ConfigParse(e.to_string()))?,
            other => {
                return Err(BridgeError::ConfigParse(format!(
                    "unsupported config format '{other}', expected .yaml or .json"
                )));
            }
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        // Joint names and limits are checked by the set constructor
        self.robot.joint_set()?;

        let mut camera_names = HashSet::new();
        for camera in &self.cameras {
            if camera.name.trim().is_empty() {
                return Err(BridgeError::InvalidConfig(
                    "camera name must not be empty".to_string(),
                ));
            }
            if !camera_names.insert(camera.name.as_str()) {
                return Err(BridgeError::InvalidConfig(format!(
                    "duplicate camera name '{}'",
                    camera.name
                )));
            }
            if let Some(crop) = &camera.crop {
                if crop.min_x >= crop.max_x || crop.min_y >= crop.max_y {
                    return Err(BridgeError::InvalidConfig(format!(
                        "camera '{}' has an empty crop rectangle",
                        camera.name
                    )));
                }
            }
        }

        let capture = &self.capture;
        if !capture.sample_rate_hz.is_finite() || capture.sample_rate_hz <= 0.0 {
            return Err(BridgeError::InvalidConfig(format!(
                "sample_rate_hz must be positive, got {}",
                capture.sample_rate_hz
            )));
        }
        if capture.image_width == 0 || capture.image_height == 0 {
            return Err(BridgeError::InvalidConfig(
                "image dimensions must be at least 1x1".to_string(),
            ));
        }
        if capture.cleanup_threshold == 0 {
            return Err(BridgeError::InvalidConfig(
                "cleanup_threshold must be at least 1".to_string(),
            ));
        }
        if capture.cleanup_interval_ms == 0 {
            return Err(BridgeError::InvalidConfig(
                "cleanup_interval_ms must be at least 1".to_string(),
            ));
        }
        if capture.max_consecutive_failures == 0 {
            return Err(BridgeError::InvalidConfig(
                "max_consecutive_failures must be at least 1".to_string(),
            ));
        }

        let runtime = &self.runtime;
        if !runtime.delta_gain.is_finite() || runtime.delta_gain <= 0.0 {
            return Err(BridgeError::InvalidConfig(format!(
                "delta_gain must be positive, got {}",
                runtime.delta_gain
            )));
        }
        if runtime.episodes == 0 || runtime.max_steps == 0 {
            return Err(BridgeError::InvalidConfig(
                "episodes and max_steps must be at least 1".to_string(),
            ));
        }
        if let Some(hz) = runtime.control_hz {
            if !hz.is_finite() || hz <= 0.0 {
                return Err(BridgeError::InvalidConfig(format!(
                    "control_hz must be positive, got {hz}"
                )));
            }
        }
        if runtime.action_horizon == 0 {
            return Err(BridgeError::InvalidConfig(
                "action_horizon must be at least 1".to_string(),
            ));
        }
        if runtime.policy == PolicyKind::Teleop && self.teleop.is_none() {
            return Err(BridgeError::InvalidConfig(
                "teleop policy selected but no [teleop] section configured".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const YAML_CONFIG: &str = r#"
prompt: "pick up the red block"
robot:
  port: /dev/ttyACM0
  id: follower
  joints:
    - { name: shoulder, min_limit: -100.0, max_limit: 100.0, home: 0.0 }
    - { name: elbow, min_limit: -90.0, max_limit: 90.0, home: 0.0 }
  gripper: { name: gripper, min_limit: 0.0, max_limit: 100.0 }
cameras:
  - { name: front, index: 0 }
  - name: wrist_cam
    index: 2
    flipped: true
    crop: { min_x: 40, max_x: 600, min_y: 0, max_y: 440 }
capture:
  sample_rate_hz: 8.0
runtime:
  action_mode: delta
  delta_gain: 0.5
"#;

    fn parse_yaml(text: &str) -> BridgeConfig {
        serde_yaml::from_str(text).expect("yaml parses")
    }

    fn write_config(dir: &tempfile::TempDir, name: &str, text: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).expect("create config file");
        file.write_all(text.as_bytes()).expect("write config file");
        path
    }

    #[test]
    fn test_defaults_match_expected_tuning() {
        let capture = CaptureConfig::default();
        assert_eq!(capture.sample_rate_hz, 4.0);
        assert_eq!(capture.frame_interval(), Duration::from_millis(250));
        assert_eq!(capture.cleanup_threshold, 30);
        assert_eq!(capture.warmup_reads, 3);
        assert_eq!(capture.join_timeout(), Duration::from_secs(4));
        assert!(capture.continuous);

        let runtime = RuntimeConfig::default();
        assert_eq!(runtime.action_mode, ActionMode::Absolute);
        assert_eq!(runtime.delta_gain, 0.25);
        assert_eq!(runtime.max_steps, 1_000);
        assert_eq!(runtime.action_horizon, 10);
    }

    #[test]
    fn test_load_yaml_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_config(&dir, "bridge.yaml", YAML_CONFIG);
        let config = BridgeConfig::from_file(&path).expect("config loads");

        assert_eq!(config.prompt, "pick up the red block");
        assert_eq!(config.robot.joints.len(), 2);
        assert_eq!(config.cameras[1].name, "wrist_cam");
        assert!(config.cameras[1].flipped);
        assert_eq!(config.cameras[1].crop.as_ref().map(|c| c.width()), Some(560));
        assert_eq!(config.capture.sample_rate_hz, 8.0);
        // Unspecified capture fields fall back to defaults
        assert_eq!(config.capture.cleanup_threshold, 30);
        assert_eq!(config.runtime.action_mode, ActionMode::Delta);
        assert_eq!(config.runtime.delta_gain, 0.5);
    }

    #[test]
    fn test_load_json_file() {
        let json = r#"{
            "prompt": "wave",
            "robot": {
                "port": "/dev/ttyACM0",
                "id": "follower",
                "joints": [{ "name": "shoulder", "min_limit": -1.0, "max_limit": 1.0 }],
                "gripper": { "name": "gripper", "min_limit": 0.0, "max_limit": 1.0 }
            },
            "cameras": []
        }"#;
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_config(&dir, "bridge.json", json);
        let config = BridgeConfig::from_file(&path).expect("config loads");
        assert_eq!(config.prompt, "wave");
        assert!(config.cameras.is_empty());
    }

    #[test]
    fn test_unsupported_extension_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_config(&dir, "bridge.toml", "prompt = 'x'");
        let err = BridgeConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, BridgeError::ConfigParse(_)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = BridgeConfig::from_file(Path::new("/nonexistent/bridge.yaml")).unwrap_err();
        assert!(matches!(err, BridgeError::Io(_)));
    }

    #[test]
    fn test_duplicate_camera_names_rejected() {
        let mut config = parse_yaml(YAML_CONFIG);
        config.cameras[1].name = "front".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("front"));
    }

    #[test]
    fn test_empty_crop_rejected() {
        let mut config = parse_yaml(YAML_CONFIG);
        config.cameras[0].crop = Some(CropRect {
            min_x: 100,
            max_x: 100,
            min_y: 0,
            max_y: 50,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_joint_name_rejected() {
        let mut config = parse_yaml(YAML_CONFIG);
        config.robot.joints[1].name = "shoulder".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_limits_rejected() {
        let mut config = parse_yaml(YAML_CONFIG);
        config.robot.joints[0].min_limit = 200.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_sample_rate_rejected() {
        let mut config = parse_yaml(YAML_CONFIG);
        config.capture.sample_rate_hz = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_delta_gain_rejected() {
        let mut config = parse_yaml(YAML_CONFIG);
        config.runtime.delta_gain = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_teleop_policy_requires_teleop_section() {
        let mut config = parse_yaml(YAML_CONFIG);
        config.runtime.policy = PolicyKind::Teleop;
        assert!(config.validate().is_err());

        config.teleop = Some(TeleopConfig {
            port: "/dev/ttyACM1".to_string(),
            id: "leader".to_string(),
        });
        assert!(config.validate().is_ok());
    }
}
