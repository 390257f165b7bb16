//! Perception-action bridge between a robot arm and an external decision
//! process (remote policy or teleoperation leader).
//!
//! Two independent leaves compose into a control loop:
//! - `vision`: per-camera frame acquisition decoupled from consumer demand
//!   (background producer and reaper threads over a locked frame ring);
//! - `motion`: joint-space mapping between raw name-keyed hardware positions
//!   and fixed-order vectors, with per-joint limit enforcement.
//!
//! `runtime` composes both with an opaque decision process into the
//! observe -> decide -> act step; `config` validates the deployment up
//! front; `utils::telemetry` records pipeline events without blocking.

pub mod config;
pub mod error;
pub mod motion;
pub mod runtime;
pub mod utils;
pub mod vision;

pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
