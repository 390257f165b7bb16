//! hardware.rs
//! Seam between the bridge and the physical arm.
//! Observation and action both travel as "<name>.pos" keyed maps; the
//! connect/disconnect lifecycle of real hardware stays outside the bridge.

use std::collections::HashMap;

use rand::random_range;

use crate::error::Result;
use crate::motion::joints::JointDescriptor;

pub trait HardwareInterface: Send {
    /// Current joint positions keyed "<name>.pos".
    fn get_observation(&mut self) -> Result<HashMap<String, f64>>;

    /// Dispatches goal positions keyed "<name>.pos".
    fn send_action(&mut self, action: &HashMap<String, f64>) -> Result<()>;
}

/// In-memory arm for demos and tests: actions take effect instantly, clamped
/// to each joint's limits, and observations optionally carry sensor noise.
pub struct SimulatedArm {
    joints: Vec<JointDescriptor>,
    positions: HashMap<String, f64>,
    noise: f64,
}

impl SimulatedArm {
    /// Starts every joint at its home position, or mid-range without one.
    pub fn new(joints: &[JointDescriptor]) -> Self {
        let positions = joints
            .iter()
            .map(|j| {
                let start = j.home.unwrap_or((j.min_limit + j.max_limit) / 2.0);
                (j.key(), start)
            })
            .collect();
        Self {
            joints: joints.to_vec(),
            positions,
            noise: 0.0,
        }
    }

    /// Adds symmetric noise of the given amplitude to every observation.
    pub fn with_noise(mut self, amplitude: f64) -> Self {
        self.noise = amplitude;
        self
    }

    /// True position of one joint, noise-free. Test and inspection helper.
    pub fn position(&self, name: &str) -> Option<f64> {
        self.positions.get(&format!("{name}.pos")).copied()
    }
}

impl HardwareInterface for SimulatedArm {
    fn get_observation(&mut self) -> Result<HashMap<String, f64>> {
        let mut observed = self.positions.clone();
        if self.noise > 0.0 {
            for value in observed.values_mut() {
                *value += random_range(-self.noise..self.noise);
            }
        }
        Ok(observed)
    }

    fn send_action(&mut self, action: &HashMap<String, f64>) -> Result<()> {
        for joint in &self.joints {
            if let Some(&target) = action.get(&joint.key()) {
                self.positions.insert(joint.key(), joint.clip(target));
            }
        }
        Ok(())
    }
}
