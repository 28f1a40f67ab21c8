pub mod emergency_brake;
pub mod lane_closure;
pub mod rear_end;
pub mod rsu_spoofing;
pub mod target_speed;
pub mod vsl;

pub use emergency_brake::EmergencyBrake;
pub use lane_closure::LaneClosure;
pub use rear_end::RearEnd;
pub use rsu_spoofing::RsuSpoofing;
pub use target_speed::TargetSpeedOverride;
pub use vsl::VariableSpeedLimit;

use crate::session::{TrafficSession, VehicleId};
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

pub const MPH_TO_MPS: f64 = 0.44704;

/// The closed set of attack policies. New attacks get a variant here, which
/// keeps dispatch compile-time-checked instead of string-keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackKind {
    EmergencyBrake,
    RearEnd,
    LaneClosure,
    Vsl,
    TargetSpeed,
    RsuSpoofing,
}

impl AttackKind {
    pub fn all() -> [AttackKind; 6] {
        [
            AttackKind::EmergencyBrake,
            AttackKind::RearEnd,
            AttackKind::LaneClosure,
            AttackKind::Vsl,
            AttackKind::TargetSpeed,
            AttackKind::RsuSpoofing,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            AttackKind::EmergencyBrake => "emergency_brake",
            AttackKind::RearEnd => "rear_end",
            AttackKind::LaneClosure => "lane_closure",
            AttackKind::Vsl => "vsl",
            AttackKind::TargetSpeed => "target_speed",
            AttackKind::RsuSpoofing => "rsu_spoofing",
        }
    }
}

impl fmt::Display for AttackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AttackKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "emergency_brake" => Ok(AttackKind::EmergencyBrake),
            "rear_end" => Ok(AttackKind::RearEnd),
            "lane_closure" => Ok(AttackKind::LaneClosure),
            "vsl" => Ok(AttackKind::Vsl),
            "target_speed" => Ok(AttackKind::TargetSpeed),
            "rsu_spoofing" => Ok(AttackKind::RsuSpoofing),
            other => bail!("unknown attack type: {}", other),
        }
    }
}

/// One attack instance with its per-run state. Freshly constructed per
/// (mode, seed) run; nothing survives across run boundaries.
#[derive(Debug)]
pub enum ActiveAttack {
    EmergencyBrake(EmergencyBrake),
    RearEnd(RearEnd),
    LaneClosure(LaneClosure),
    Vsl(VariableSpeedLimit),
    TargetSpeed(TargetSpeedOverride),
    RsuSpoofing(RsuSpoofing),
}

impl ActiveAttack {
    pub fn kind(&self) -> AttackKind {
        match self {
            ActiveAttack::EmergencyBrake(_) => AttackKind::EmergencyBrake,
            ActiveAttack::RearEnd(_) => AttackKind::RearEnd,
            ActiveAttack::LaneClosure(_) => AttackKind::LaneClosure,
            ActiveAttack::Vsl(_) => AttackKind::Vsl,
            ActiveAttack::TargetSpeed(_) => AttackKind::TargetSpeed,
            ActiveAttack::RsuSpoofing(_) => AttackKind::RsuSpoofing,
        }
    }

    /// Advance the policy by one step against the current snapshot.
    pub fn step(&mut self, session: &mut dyn TrafficSession) -> Result<()> {
        match self {
            ActiveAttack::EmergencyBrake(a) => a.step(session),
            ActiveAttack::RearEnd(a) => a.step(session),
            ActiveAttack::LaneClosure(a) => a.step(session),
            ActiveAttack::Vsl(a) => a.step(session),
            ActiveAttack::TargetSpeed(a) => a.step(session),
            ActiveAttack::RsuSpoofing(a) => a.step(session),
        }
    }
}

/// Monotonic completion flag: flips false -> true at most once per run and
/// there is no way to reset it.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompletionFlag(bool);

impl CompletionFlag {
    pub fn is_done(&self) -> bool {
        self.0
    }

    pub fn mark(&mut self) {
        self.0 = true;
    }
}

/// Per-vehicle monotonic completion map. Entries only ever appear as done.
#[derive(Debug, Clone, Default)]
pub struct CompletionMap(HashSet<VehicleId>);

impl CompletionMap {
    pub fn is_done(&self, id: &VehicleId) -> bool {
        self.0.contains(id)
    }

    pub fn mark(&mut self, id: VehicleId) {
        self.0.insert(id);
    }

    pub fn done_count(&self) -> usize {
        self.0.len()
    }
}

/// Transient per-vehicle map of in-progress ramp targets. Membership must
/// match zone/maneuver membership at every step evaluation.
#[derive(Debug, Clone, Default)]
pub struct RampTracker(HashMap<VehicleId, f64>);

impl RampTracker {
    pub fn track(&mut self, id: VehicleId, target: f64) {
        self.0.insert(id, target);
    }

    /// Idempotent removal.
    pub fn release(&mut self, id: &VehicleId) {
        self.0.remove(id);
    }

    pub fn contains(&self, id: &VehicleId) -> bool {
        self.0.contains_key(id)
    }

    pub fn retain_members(&mut self, keep: &HashSet<VehicleId>) {
        self.0.retain(|id, _| keep.contains(id));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Target selection for the dual-mode attacks: an explicit id list, or a
/// substring matched against vehicle type ids. Exactly one, checked at
/// configuration time.
#[derive(Debug, Clone)]
pub enum Selection {
    Ids(Vec<VehicleId>),
    TypeSubstring(String),
}

impl Selection {
    pub fn from_options(ids: Option<Vec<String>>, substring: Option<String>) -> Result<Self> {
        match (ids, substring) {
            (Some(_), Some(_)) => {
                bail!("supply either target_vehicles or target_type, not both")
            }
            (None, None) => bail!("must supply target_vehicles or target_type"),
            (Some(ids), None) => {
                if ids.is_empty() {
                    bail!("target_vehicles must not be empty");
                }
                Ok(Selection::Ids(ids.into_iter().map(VehicleId::new).collect()))
            }
            (None, Some(sub)) => {
                if sub.is_empty() {
                    bail!("target_type must not be empty");
                }
                Ok(Selection::TypeSubstring(sub))
            }
        }
    }

    /// Resolve this step's target set. Explicit ids are fixed for the whole
    /// run; substring selection is re-matched against the live population.
    pub fn resolve(&self, session: &dyn TrafficSession) -> Result<Vec<VehicleId>> {
        match self {
            Selection::Ids(ids) => Ok(ids.clone()),
            Selection::TypeSubstring(sub) => {
                let mut out = Vec::new();
                for id in session.vehicle_ids()? {
                    if session.type_id(&id)?.contains(sub.as_str()) {
                        out.push(id);
                    }
                }
                Ok(out)
            }
        }
    }
}

/// Half-open position interval `[min, max)` along a lane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub min: f64,
    pub max: f64,
}

impl Zone {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.min < self.max) {
            bail!("zone min ({}) must be below max ({})", self.min, self.max);
        }
        Ok(())
    }

    pub fn contains(&self, pos: f64) -> bool {
        self.min <= pos && pos < self.max
    }

    /// True once a vehicle has driven past the zone's downstream end.
    pub fn is_past(&self, pos: f64) -> bool {
        pos >= self.max
    }
}
