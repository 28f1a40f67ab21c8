use crate::attacks::{
    ActiveAttack, AttackKind, EmergencyBrake, LaneClosure, RearEnd, RsuSpoofing, Selection,
    TargetSpeedOverride, VariableSpeedLimit, Zone, rsu_spoofing::parse_schedule,
};
use crate::session::{DetectorSpec, SimSessionConfig, SpawnSpec, VehicleId};
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Label under which one (seed, mode) execution's rows are recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Baseline,
    Attack(AttackKind),
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Baseline => f.write_str("baseline"),
            RunMode::Attack(kind) => f.write_str(kind.name()),
        }
    }
}

impl FromStr for RunMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "base" | "baseline" => Ok(RunMode::Baseline),
            other => Ok(RunMode::Attack(other.parse()?)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub name: String,
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    pub detectors: Vec<DetectorConfig>,
    #[serde(default)]
    pub road: RoadConfig,
    pub attack: AttackConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_step_length")]
    pub step_length: f64,
    pub end_time: f64,
    #[serde(default = "default_seed_count")]
    pub seed_count: u32,
    /// Pinned seed list; when absent, `seed_count` distinct seeds are drawn.
    #[serde(default)]
    pub seeds: Option<Vec<u64>>,
    /// Run modes; when absent: baseline plus the configured attack.
    #[serde(default)]
    pub modes: Option<Vec<String>>,
}

fn default_step_length() -> f64 {
    0.1
}

fn default_seed_count() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Detector decimation period in seconds; together with `step_length`
    /// this fixes how many steps sit between detector polls.
    pub detector_poll_period_s: f64,
    /// Accelerations below this magnitude threshold count as emergency brakes.
    pub ebrake_threshold: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            detector_poll_period_s: 1.0,
            ebrake_threshold: -4.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub id: String,
    pub lane: String,
    pub zone: Zone,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoadConfig {
    pub lanes: u8,
    pub length_m: f64,
    pub arrival_rate_veh_s: f64,
    pub cav_share: f64,
    pub desired_speed_mps: f64,
    #[serde(default)]
    pub spawns: Vec<SpawnConfig>,
}

impl Default for RoadConfig {
    fn default() -> Self {
        Self {
            lanes: 2,
            length_m: 4000.0,
            arrival_rate_veh_s: 0.3,
            cav_share: 0.4,
            desired_speed_mps: 27.8,
            spawns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnConfig {
    pub id: String,
    #[serde(default = "default_spawn_type")]
    pub type_id: String,
    #[serde(default)]
    pub lane: u8,
    #[serde(default)]
    pub depart_time: f64,
    pub speed: f64,
}

fn default_spawn_type() -> String {
    "CAV".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaneClosureParams {
    #[serde(default = "default_closed_lane")]
    pub lane_id: String,
    #[serde(default = "default_merge_lane")]
    pub merge_to_lane: u8,
    #[serde(default = "default_closure_zone")]
    pub zone: Zone,
    #[serde(default = "default_target_type")]
    pub target_type: String,
}

fn default_closed_lane() -> String {
    "main_0".to_string()
}

fn default_merge_lane() -> u8 {
    1
}

fn default_closure_zone() -> Zone {
    Zone::new(3000.0, 3500.0)
}

fn default_target_type() -> String {
    "CAV".to_string()
}

impl LaneClosureParams {
    fn build(&self) -> LaneClosure {
        LaneClosure::new(
            self.lane_id.clone(),
            self.merge_to_lane,
            self.zone,
            self.target_type.clone(),
        )
    }
}

/// Per-attack parameters, strongly typed at the configuration boundary. The
/// only string-keyed lookup is serde's tag match right here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttackConfig {
    EmergencyBrake {
        vehicle_id: String,
        stop_position: f64,
        #[serde(default = "default_deceleration")]
        deceleration: f64,
    },
    RearEnd {
        aggressive_accel: f64,
        #[serde(default)]
        target_vehicles: Option<Vec<String>>,
        #[serde(default)]
        target_type: Option<String>,
    },
    LaneClosure(LaneClosureParams),
    Vsl {
        vsl_mph: f64,
        zone: Zone,
        #[serde(default = "default_free_speed")]
        default_speed_mps: f64,
        #[serde(default = "default_max_decel")]
        max_deceleration: f64,
        #[serde(default = "default_target_type")]
        target_type: String,
    },
    TargetSpeed {
        target_speed_mps: f64,
        accel_rate: f64,
        #[serde(default)]
        target_vehicles: Option<Vec<String>>,
        #[serde(default)]
        target_type: Option<String>,
    },
    RsuSpoofing {
        vsl_schedule: String,
        lane_closure_start: f64,
        zone: Zone,
        #[serde(default = "default_target_type")]
        target_type: String,
        #[serde(default)]
        lane_closure: Option<LaneClosureParams>,
    },
}

fn default_deceleration() -> f64 {
    4.5
}

fn default_free_speed() -> f64 {
    55.56
}

fn default_max_decel() -> f64 {
    3.0
}

impl AttackConfig {
    pub fn kind(&self) -> AttackKind {
        match self {
            AttackConfig::EmergencyBrake { .. } => AttackKind::EmergencyBrake,
            AttackConfig::RearEnd { .. } => AttackKind::RearEnd,
            AttackConfig::LaneClosure(_) => AttackKind::LaneClosure,
            AttackConfig::Vsl { .. } => AttackKind::Vsl,
            AttackConfig::TargetSpeed { .. } => AttackKind::TargetSpeed,
            AttackConfig::RsuSpoofing { .. } => AttackKind::RsuSpoofing,
        }
    }

    /// Build a fresh policy instance with zeroed state. Called once per
    /// (mode, seed) run, so no completion history leaks across runs.
    pub fn build(&self) -> Result<ActiveAttack> {
        Ok(match self {
            AttackConfig::EmergencyBrake {
                vehicle_id,
                stop_position,
                deceleration,
            } => ActiveAttack::EmergencyBrake(EmergencyBrake::new(
                VehicleId::new(vehicle_id.clone()),
                *stop_position,
                *deceleration,
            )),
            AttackConfig::RearEnd {
                aggressive_accel,
                target_vehicles,
                target_type,
            } => ActiveAttack::RearEnd(RearEnd::new(
                *aggressive_accel,
                Selection::from_options(target_vehicles.clone(), target_type.clone())?,
            )),
            AttackConfig::LaneClosure(params) => ActiveAttack::LaneClosure(params.build()),
            AttackConfig::Vsl {
                vsl_mph,
                zone,
                default_speed_mps,
                max_deceleration,
                target_type,
            } => ActiveAttack::Vsl(VariableSpeedLimit::new(
                *vsl_mph,
                *zone,
                *default_speed_mps,
                *max_deceleration,
                target_type.clone(),
            )),
            AttackConfig::TargetSpeed {
                target_speed_mps,
                accel_rate,
                target_vehicles,
                target_type,
            } => ActiveAttack::TargetSpeed(TargetSpeedOverride::new(
                *target_speed_mps,
                *accel_rate,
                Selection::from_options(target_vehicles.clone(), target_type.clone())?,
            )),
            AttackConfig::RsuSpoofing {
                vsl_schedule,
                lane_closure_start,
                zone,
                target_type,
                lane_closure,
            } => ActiveAttack::RsuSpoofing(RsuSpoofing::new(
                parse_schedule(vsl_schedule)?,
                *lane_closure_start,
                *zone,
                target_type.clone(),
                lane_closure.clone().unwrap_or_else(|| LaneClosureParams {
                    lane_id: default_closed_lane(),
                    merge_to_lane: default_merge_lane(),
                    zone: default_closure_zone(),
                    target_type: default_target_type(),
                }).build(),
            )),
        })
    }

    fn validate(&self) -> Result<()> {
        match self {
            AttackConfig::EmergencyBrake { deceleration, stop_position, .. } => {
                if *deceleration == 0.0 {
                    bail!("emergency_brake deceleration must be non-zero");
                }
                if *stop_position < 0.0 {
                    bail!("emergency_brake stop_position must be non-negative");
                }
            }
            AttackConfig::RearEnd { target_vehicles, target_type, .. } => {
                Selection::from_options(target_vehicles.clone(), target_type.clone())?;
            }
            AttackConfig::TargetSpeed { accel_rate, target_vehicles, target_type, .. } => {
                Selection::from_options(target_vehicles.clone(), target_type.clone())?;
                // An accel_rate of zero would size the slow-down ramp as
                // infinite.
                if *accel_rate == 0.0 {
                    bail!("target_speed accel_rate must be non-zero");
                }
            }
            AttackConfig::LaneClosure(params) => params.zone.validate()?,
            AttackConfig::Vsl { zone, max_deceleration, .. } => {
                zone.validate()?;
                if *max_deceleration == 0.0 {
                    bail!("vsl max_deceleration must be non-zero");
                }
            }
            AttackConfig::RsuSpoofing { vsl_schedule, zone, lane_closure, .. } => {
                parse_schedule(vsl_schedule)?;
                zone.validate()?;
                if let Some(params) = lane_closure {
                    params.zone.validate()?;
                }
            }
        }
        Ok(())
    }
}

impl ScenarioConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading scenario file {}", path.display()))?;
        let config: ScenarioConfig = serde_json::from_str(&raw)
            .with_context(|| format!("parsing scenario file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// All configuration errors are fatal here, before any session opens.
    pub fn validate(&self) -> Result<()> {
        if self.simulation.step_length <= 0.0 {
            bail!("step_length must be positive");
        }
        if self.simulation.end_time <= 0.0 {
            bail!("end_time must be positive");
        }
        if self.simulation.seeds.is_none() && u64::from(self.simulation.seed_count) > super::MAX_SEED {
            bail!(
                "seed_count {} exceeds the {} available seeds",
                self.simulation.seed_count,
                super::MAX_SEED
            );
        }
        if self.metrics.detector_poll_period_s <= 0.0 {
            bail!("detector_poll_period_s must be positive");
        }
        if self.detectors.is_empty() {
            bail!("at least one detector is required");
        }
        for det in &self.detectors {
            det.zone
                .validate()
                .with_context(|| format!("detector {}", det.id))?;
        }
        self.attack.validate()?;
        self.modes()?;
        Ok(())
    }

    pub fn modes(&self) -> Result<Vec<RunMode>> {
        match &self.simulation.modes {
            Some(list) => list.iter().map(|m| m.parse()).collect(),
            None => Ok(vec![RunMode::Baseline, RunMode::Attack(self.attack.kind())]),
        }
    }

    /// Steps between detector polls, derived from the configured poll period
    /// and the step length.
    pub fn detector_poll_steps(&self) -> u64 {
        (self.metrics.detector_poll_period_s / self.simulation.step_length).round() as u64
    }

    pub fn session_config(&self) -> SimSessionConfig {
        SimSessionConfig {
            step_length: self.simulation.step_length,
            road_length: self.road.length_m,
            lanes: self.road.lanes,
            arrival_rate: self.road.arrival_rate_veh_s,
            cav_share: self.road.cav_share,
            desired_speed: self.road.desired_speed_mps,
            spawns: self
                .road
                .spawns
                .iter()
                .map(|s| SpawnSpec {
                    id: s.id.clone(),
                    type_id: s.type_id.clone(),
                    lane: s.lane,
                    depart_time: s.depart_time,
                    speed: s.speed,
                })
                .collect(),
            detectors: self
                .detectors
                .iter()
                .map(|d| DetectorSpec {
                    id: d.id.clone(),
                    lane: d.lane.clone(),
                    zone: d.zone,
                })
                .collect(),
        }
    }
}
