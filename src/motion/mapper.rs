//! mapper.rs
//! Conversion between raw hardware position maps and fixed-order vectors.
//!
//! Observation direction: name-keyed map in, vector out, order taken from the
//! joint slice. Action direction: vector in, "<name>.pos" map out, every
//! component clipped to its joint's limits. Delta actions are range fractions
//! scaled by a configured gain and applied on top of current position.

use std::collections::HashMap;
use std::sync::Arc;

use log::warn;

use crate::error::{BridgeError, Result};
use crate::motion::joints::JointDescriptor;
use crate::utils::telemetry::{BridgeEvent, EventRecorder};

/// Joint values aligned 1:1 with a joint ordering.
pub type PositionVector = Vec<f64>;

pub struct JointSpaceMapper {
    delta_gain: f64,
    recorder: Arc<EventRecorder>,
}

impl JointSpaceMapper {
    pub fn new(delta_gain: f64, recorder: Arc<EventRecorder>) -> Self {
        Self {
            delta_gain,
            recorder,
        }
    }

    #[inline]
    pub fn delta_gain(&self) -> f64 {
        self.delta_gain
    }

    /// Extracts joint values from a raw position map in slice order.
    /// A joint whose "<name>.pos" key is absent fails the whole read; a
    /// partial vector would silently misalign every index after the gap.
    pub fn read(
        &self,
        positions: &HashMap<String, f64>,
        joints: &[JointDescriptor],
    ) -> Result<PositionVector> {
        let mut vector = Vec::with_capacity(joints.len());
        for joint in joints {
            let key = joint.key();
            match positions.get(&key) {
                Some(value) => vector.push(*value),
                None => return Err(BridgeError::MissingJointKey(key)),
            }
        }
        Ok(vector)
    }

    /// Maps an absolute action vector onto "<name>.pos" keys, clipping each
    /// component to its joint's limits. In-range values pass through
    /// unchanged, so re-applying an observed position is a no-op.
    pub fn write_absolute(
        &self,
        action: &[f64],
        joints: &[JointDescriptor],
    ) -> Result<HashMap<String, f64>> {
        if action.len() != joints.len() {
            return Err(BridgeError::ShapeMismatch {
                expected: joints.len(),
                actual: action.len(),
            });
        }

        let mut goal = HashMap::with_capacity(joints.len());
        for (joint, &requested) in joints.iter().zip(action) {
            goal.insert(joint.key(), self.clip_component(joint, requested));
        }
        Ok(goal)
    }

    /// Interprets each action component as a fraction of the joint's range,
    /// scales it by the delta gain, and applies it on top of the current
    /// position before clipping.
    pub fn write_delta(
        &self,
        action: &[f64],
        joints: &[JointDescriptor],
        current: &[f64],
    ) -> Result<HashMap<String, f64>> {
        if action.len() != joints.len() {
            return Err(BridgeError::ShapeMismatch {
                expected: joints.len(),
                actual: action.len(),
            });
        }
        if current.len() != joints.len() {
            return Err(BridgeError::ShapeMismatch {
                expected: joints.len(),
                actual: current.len(),
            });
        }

        let mut goal = HashMap::with_capacity(joints.len());
        for ((joint, &fraction), &position) in joints.iter().zip(action).zip(current) {
            let requested = position + fraction * joint.range() * self.delta_gain;
            goal.insert(joint.key(), self.clip_component(joint, requested));
        }
        Ok(goal)
    }

    /// Clipping is a warning, not a failure: the adjusted value is dispatched.
    fn clip_component(&self, joint: &JointDescriptor, requested: f64) -> f64 {
        let applied = joint.clip(requested);
        if applied != requested {
            warn!(
                "[{}] action {} clipped to {} (limits [{}, {}])",
                joint.name, requested, applied, joint.min_limit, joint.max_limit
            );
            self.recorder.record(BridgeEvent::ClipAdjusted {
                joint: joint.name.clone(),
                requested,
                applied,
                ts_ns: self.recorder.now_ns(),
            });
        }
        applied
    }
}
