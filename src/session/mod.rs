pub mod sim;
#[cfg(test)]
pub mod mock;

pub use sim::{DetectorSpec, SimSession, SimSessionConfig, SpawnSpec};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque vehicle identifier. Only unique within the current step's live set;
/// vehicles enter and leave between steps, so never cache one across a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VehicleId(String);

impl VehicleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VehicleId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// The engine's built-in collision avoidance. Policies switch it off to force
/// maneuvers the engine would otherwise refuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyMode {
    Disabled,
    Default,
}

/// Lane-change arbitration mode, same idea as [`SafetyMode`] but for merges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneChangeMode {
    Disabled,
    Default,
}

/// One collision report. Only valid for the step it was reported in.
#[derive(Debug, Clone)]
pub struct Collision {
    pub time: f64,
    pub collider: VehicleId,
    pub victim: VehicleId,
    pub collider_speed: f64,
    pub victim_speed: f64,
    pub lane: String,
    pub pos: f64,
}

/// Step-synchronous control channel into a running traffic engine.
///
/// All operations are synchronous request/response against the snapshot
/// produced by the last `advance`. The caller owns the lifecycle: a session is
/// opened per (mode, seed) run and must be closed on every exit path.
pub trait TrafficSession {
    fn time(&self) -> f64;

    /// Advance the engine by exactly one discrete step.
    fn advance(&mut self) -> Result<()>;

    /// Ids of every vehicle alive this step.
    fn vehicle_ids(&self) -> Result<Vec<VehicleId>>;

    fn lane_position(&self, id: &VehicleId) -> Result<f64>;
    fn speed(&self, id: &VehicleId) -> Result<f64>;
    fn acceleration(&self, id: &VehicleId) -> Result<f64>;
    fn type_id(&self, id: &VehicleId) -> Result<String>;
    fn lane(&self, id: &VehicleId) -> Result<String>;

    /// Pin a vehicle to an exact speed until released.
    fn set_speed(&mut self, id: &VehicleId, speed: f64) -> Result<()>;

    /// Release a pinned speed back to free-running.
    fn release_speed(&mut self, id: &VehicleId) -> Result<()>;

    /// Command a fixed acceleration for the given horizon in seconds.
    fn set_acceleration(&mut self, id: &VehicleId, accel: f64, duration: f64) -> Result<()>;

    fn set_max_speed(&mut self, id: &VehicleId, speed: f64) -> Result<()>;
    fn set_safety_mode(&mut self, id: &VehicleId, mode: SafetyMode) -> Result<()>;
    fn set_lane_change_mode(&mut self, id: &VehicleId, mode: LaneChangeMode) -> Result<()>;

    /// Request a merge into `lane_index`, to finish within `duration` seconds.
    fn change_lane(&mut self, id: &VehicleId, lane_index: u8, duration: f64) -> Result<()>;

    /// Bounded ramp from the current speed down to `target` over `duration`.
    fn slow_down(&mut self, id: &VehicleId, target: f64, duration: f64) -> Result<()>;

    /// Collisions reported for the current step.
    fn collisions(&self) -> Result<Vec<Collision>>;

    /// Vehicle count seen by a lane-area detector during the last step.
    fn detector_count(&self, detector: &str) -> Result<u32>;

    fn close(&mut self) -> Result<()>;
}
