//! decision.rs
//! The opaque decision seam and the in-repo processes behind it.
//! A remote policy server and a local teleoperation device look identical to
//! the control loop: infer(observation) -> action chunk. The chunk broker
//! wraps any process and doles out one action per step across a horizon.

use std::collections::{HashMap, VecDeque};

use log::debug;

use crate::error::{BridgeError, Result};
use crate::motion::hardware::HardwareInterface;
use crate::motion::joints::JointDescriptor;
use crate::motion::mapper::PositionVector;
use crate::vision::frame::Frame;

/// Snapshot handed to the decision process each step: task prompt, gripper
/// and full joint vectors, one frame per camera keyed by camera name.
#[derive(Debug, Clone)]
pub struct Observation {
    pub prompt: String,
    pub gripper_position: PositionVector,
    pub joint_position: PositionVector,
    pub frames: HashMap<String, Frame>,
}

/// One or more action vectors in execution order. Policies that plan ahead
/// return several; single-step processes return one.
#[derive(Debug, Clone, Default)]
pub struct ActionChunk {
    actions: VecDeque<PositionVector>,
}

impl ActionChunk {
    pub fn new(actions: Vec<PositionVector>) -> Self {
        Self {
            actions: actions.into(),
        }
    }

    pub fn single(action: PositionVector) -> Self {
        Self {
            actions: VecDeque::from([action]),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn pop_front(&mut self) -> Option<PositionVector> {
        self.actions.pop_front()
    }

    /// The next action to execute without consuming it.
    pub fn front(&self) -> Option<&PositionVector> {
        self.actions.front()
    }
}

/// Anything that turns an observation into actions. Implementations must not
/// assume they are queried every step; a broker may cache their output.
pub trait DecisionProcess: Send {
    fn infer(&mut self, observation: &Observation) -> Result<ActionChunk>;

    /// Called at episode boundaries so stateful processes can clear caches.
    fn reset(&mut self) {}
}

/// Wraps a decision process and serves its chunk one action at a time,
/// re-querying once `horizon` actions have been consumed (or the chunk runs
/// out early). Keeps slow inference off the per-step critical path.
pub struct ChunkBroker<P> {
    inner: P,
    horizon: usize,
    pending: VecDeque<PositionVector>,
    queries: u64,
}

impl<P: DecisionProcess> ChunkBroker<P> {
    pub fn new(inner: P, horizon: usize) -> Self {
        Self {
            inner,
            horizon: horizon.max(1),
            pending: VecDeque::new(),
            queries: 0,
        }
    }

    /// How many times the wrapped process has been queried.
    #[inline]
    pub fn queries(&self) -> u64 {
        self.queries
    }
}

impl<P: DecisionProcess> DecisionProcess for ChunkBroker<P> {
    fn infer(&mut self, observation: &Observation) -> Result<ActionChunk> {
        if self.pending.is_empty() {
            let mut chunk = self.inner.infer(observation)?;
            if chunk.is_empty() {
                return Err(BridgeError::Decision(
                    "decision process returned an empty action chunk".to_string(),
                ));
            }
            self.queries += 1;
            let serve = chunk.len().min(self.horizon);
            debug!(
                "chunk broker refilled: {} of {} actions kept (query {})",
                serve,
                chunk.len(),
                self.queries
            );
            for _ in 0..serve {
                if let Some(action) = chunk.pop_front() {
                    self.pending.push_back(action);
                }
            }
        }
        // Refill above guarantees at least one pending action
        let action = self
            .pending
            .pop_front()
            .ok_or_else(|| BridgeError::Decision("chunk broker underflow".to_string()))?;
        Ok(ActionChunk::single(action))
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.inner.reset();
    }
}

/// Follows a leader arm: each component is the leader/follower position gap
/// as a fraction of that joint's range. Routed through `write_delta`, a gain
/// of 1.0 closes the gap in a single step; lower gains damp the motion.
pub struct TeleopProcess {
    leader: Box<dyn HardwareInterface>,
    joints: Vec<JointDescriptor>,
}

impl TeleopProcess {
    pub fn new(leader: Box<dyn HardwareInterface>, joints: Vec<JointDescriptor>) -> Self {
        Self { leader, joints }
    }
}

impl DecisionProcess for TeleopProcess {
    fn infer(&mut self, observation: &Observation) -> Result<ActionChunk> {
        if observation.joint_position.len() != self.joints.len() {
            return Err(BridgeError::ShapeMismatch {
                expected: self.joints.len(),
                actual: observation.joint_position.len(),
            });
        }

        let leader_positions = self.leader.get_observation()?;
        let mut delta = Vec::with_capacity(self.joints.len());
        for (joint, &current) in self.joints.iter().zip(&observation.joint_position) {
            let key = joint.key();
            let target = *leader_positions
                .get(&key)
                .ok_or(BridgeError::MissingJointKey(key))?;
            let range = joint.range();
            // A fixed joint can only hold position
            let fraction = if range > 0.0 {
                (target - current) / range
            } else {
                0.0
            };
            delta.push(fraction);
        }
        Ok(ActionChunk::single(delta))
    }
}

/// Cycles through fixed absolute waypoints, emitting the remainder of the
/// cycle as one chunk per query. Demo and test stand-in for a remote policy.
pub struct ScriptedPolicy {
    waypoints: Vec<PositionVector>,
    cursor: usize,
}

impl ScriptedPolicy {
    pub fn new(waypoints: Vec<PositionVector>) -> Self {
        Self {
            waypoints,
            cursor: 0,
        }
    }
}

impl DecisionProcess for ScriptedPolicy {
    fn infer(&mut self, _observation: &Observation) -> Result<ActionChunk> {
        if self.waypoints.is_empty() {
            return Err(BridgeError::Decision(
                "scripted policy has no waypoints".to_string(),
            ));
        }
        let mut actions = Vec::with_capacity(self.waypoints.len());
        for offset in 0..self.waypoints.len() {
            let idx = (self.cursor + offset) % self.waypoints.len();
            actions.push(self.waypoints[idx].clone());
        }
        self.cursor = (self.cursor + 1) % self.waypoints.len();
        Ok(ActionChunk::new(actions))
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }
}
