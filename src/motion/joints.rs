//! joints.rs
//! Joint descriptors and the ordered joint set.
//! Position maps exchanged with hardware are keyed "<name>.pos"; every vector
//! operation indexes by the set's fixed ordering (primary joints, then gripper).

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// One controllable joint with its safety limits and optional rest position.
/// Immutable after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointDescriptor {
    pub name: String,
    pub min_limit: f64,
    pub max_limit: f64,
    #[serde(default)]
    pub home: Option<f64>,
}

impl JointDescriptor {
    pub fn new(name: &str, min_limit: f64, max_limit: f64) -> Self {
        Self {
            name: name.to_string(),
            min_limit,
            max_limit,
            home: None,
        }
    }

    pub fn with_home(mut self, home: f64) -> Self {
        self.home = Some(home);
        self
    }

    /// Key for this joint in a raw hardware position map.
    pub fn key(&self) -> String {
        format!("{}.pos", self.name)
    }

    #[inline]
    pub fn range(&self) -> f64 {
        self.max_limit - self.min_limit
    }

    #[inline]
    pub fn clip(&self, value: f64) -> f64 {
        value.clamp(self.min_limit, self.max_limit)
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(BridgeError::InvalidConfig(
                "joint name must not be empty".to_string(),
            ));
        }
        if !self.min_limit.is_finite() || !self.max_limit.is_finite() {
            return Err(BridgeError::InvalidConfig(format!(
                "joint '{}' has non-finite limits",
                self.name
            )));
        }
        if self.min_limit > self.max_limit {
            return Err(BridgeError::InvalidConfig(format!(
                "joint '{}' has min_limit {} above max_limit {}",
                self.name, self.min_limit, self.max_limit
            )));
        }
        if let Some(home) = self.home {
            if home < self.min_limit || home > self.max_limit {
                return Err(BridgeError::InvalidConfig(format!(
                    "joint '{}' home {} is outside [{}, {}]",
                    self.name, home, self.min_limit, self.max_limit
                )));
            }
        }
        Ok(())
    }
}

/// Primary joints followed by the gripper. The stored order defines the index
/// mapping for every position vector crossing the bridge.
#[derive(Debug, Clone)]
pub struct JointSet {
    all: Vec<JointDescriptor>,
}

impl JointSet {
    /// Builds the set and rejects inverted limits, out-of-range homes, and
    /// duplicate names (gripper included) up front.
    pub fn new(primary: Vec<JointDescriptor>, gripper: JointDescriptor) -> Result<Self> {
        if primary.is_empty() {
            return Err(BridgeError::InvalidConfig(
                "joint set needs at least one primary joint".to_string(),
            ));
        }

        let mut all = primary;
        all.push(gripper);

        let mut seen = std::collections::HashSet::new();
        for joint in &all {
            joint.validate()?;
            if !seen.insert(joint.name.clone()) {
                return Err(BridgeError::InvalidConfig(format!(
                    "duplicate joint name '{}'",
                    joint.name
                )));
            }
        }

        Ok(Self { all })
    }

    /// Every joint in vector order: primary joints, then the gripper.
    #[inline]
    pub fn all_joints(&self) -> &[JointDescriptor] {
        &self.all
    }

    #[inline]
    pub fn primary(&self) -> &[JointDescriptor] {
        &self.all[..self.all.len() - 1]
    }

    #[inline]
    pub fn gripper(&self) -> &JointDescriptor {
        &self.all[self.all.len() - 1]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.all.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }

    /// Home positions in vector order, or None unless every joint defines one.
    pub fn homes(&self) -> Option<Vec<f64>> {
        self.all.iter().map(|j| j.home).collect()
    }
}
