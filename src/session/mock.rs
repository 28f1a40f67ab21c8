// Scripted in-memory session for policy unit tests. Records every command so
// tests can assert on exactly what a policy issued.

use super::{Collision, LaneChangeMode, SafetyMode, TrafficSession, VehicleId};
use anyhow::{Result, bail};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct MockVehicle {
    pub pos: f64,
    pub speed: f64,
    pub accel: f64,
    pub type_id: String,
    pub lane: String,
}

impl Default for MockVehicle {
    fn default() -> Self {
        Self {
            pos: 0.0,
            speed: 0.0,
            accel: 0.0,
            type_id: "CAV".to_string(),
            lane: "main_0".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetSpeed(VehicleId, f64),
    ReleaseSpeed(VehicleId),
    SetAcceleration(VehicleId, f64, f64),
    SetMaxSpeed(VehicleId, f64),
    SetSafetyMode(VehicleId, SafetyMode),
    SetLaneChangeMode(VehicleId, LaneChangeMode),
    ChangeLane(VehicleId, u8, f64),
    SlowDown(VehicleId, f64, f64),
}

#[derive(Debug, Default)]
pub struct MockSession {
    pub time: f64,
    pub step_length: f64,
    // insertion order preserved so substring selection is deterministic
    order: Vec<VehicleId>,
    vehicles: HashMap<VehicleId, MockVehicle>,
    pub collisions: Vec<Collision>,
    pub detector_counts: HashMap<String, u32>,
    pub commands: Vec<Command>,
    pub closed: bool,
}

impl MockSession {
    pub fn new() -> Self {
        Self {
            step_length: 0.1,
            ..Default::default()
        }
    }

    pub fn add_vehicle(&mut self, id: &str, vehicle: MockVehicle) {
        let id = VehicleId::new(id);
        if !self.vehicles.contains_key(&id) {
            self.order.push(id.clone());
        }
        self.vehicles.insert(id, vehicle);
    }

    pub fn remove_vehicle(&mut self, id: &str) {
        let id = VehicleId::new(id);
        self.order.retain(|v| *v != id);
        self.vehicles.remove(&id);
    }

    pub fn vehicle_mut(&mut self, id: &str) -> &mut MockVehicle {
        self.vehicles
            .get_mut(&VehicleId::new(id))
            .expect("unknown mock vehicle")
    }

    pub fn commands_for(&self, id: &str) -> Vec<Command> {
        let id = VehicleId::new(id);
        self.commands
            .iter()
            .filter(|c| {
                matches!(c,
                    Command::SetSpeed(v, _)
                    | Command::ReleaseSpeed(v)
                    | Command::SetAcceleration(v, _, _)
                    | Command::SetMaxSpeed(v, _)
                    | Command::SetSafetyMode(v, _)
                    | Command::SetLaneChangeMode(v, _)
                    | Command::ChangeLane(v, _, _)
                    | Command::SlowDown(v, _, _) if *v == id)
            })
            .cloned()
            .collect()
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    fn get(&self, id: &VehicleId) -> Result<&MockVehicle> {
        match self.vehicles.get(id) {
            Some(v) => Ok(v),
            None => bail!("vehicle {} is not in the simulation", id),
        }
    }

    fn require(&self, id: &VehicleId) -> Result<()> {
        self.get(id).map(|_| ())
    }
}

impl TrafficSession for MockSession {
    fn time(&self) -> f64 {
        self.time
    }

    fn advance(&mut self) -> Result<()> {
        self.time += self.step_length;
        self.collisions.clear();
        Ok(())
    }

    fn vehicle_ids(&self) -> Result<Vec<VehicleId>> {
        Ok(self.order.clone())
    }

    fn lane_position(&self, id: &VehicleId) -> Result<f64> {
        Ok(self.get(id)?.pos)
    }

    fn speed(&self, id: &VehicleId) -> Result<f64> {
        Ok(self.get(id)?.speed)
    }

    fn acceleration(&self, id: &VehicleId) -> Result<f64> {
        Ok(self.get(id)?.accel)
    }

    fn type_id(&self, id: &VehicleId) -> Result<String> {
        Ok(self.get(id)?.type_id.clone())
    }

    fn lane(&self, id: &VehicleId) -> Result<String> {
        Ok(self.get(id)?.lane.clone())
    }

    fn set_speed(&mut self, id: &VehicleId, speed: f64) -> Result<()> {
        self.require(id)?;
        self.commands.push(Command::SetSpeed(id.clone(), speed));
        Ok(())
    }

    fn release_speed(&mut self, id: &VehicleId) -> Result<()> {
        self.require(id)?;
        self.commands.push(Command::ReleaseSpeed(id.clone()));
        Ok(())
    }

    fn set_acceleration(&mut self, id: &VehicleId, accel: f64, duration: f64) -> Result<()> {
        self.require(id)?;
        self.commands
            .push(Command::SetAcceleration(id.clone(), accel, duration));
        Ok(())
    }

    fn set_max_speed(&mut self, id: &VehicleId, speed: f64) -> Result<()> {
        self.require(id)?;
        self.commands.push(Command::SetMaxSpeed(id.clone(), speed));
        Ok(())
    }

    fn set_safety_mode(&mut self, id: &VehicleId, mode: SafetyMode) -> Result<()> {
        self.require(id)?;
        self.commands.push(Command::SetSafetyMode(id.clone(), mode));
        Ok(())
    }

    fn set_lane_change_mode(&mut self, id: &VehicleId, mode: LaneChangeMode) -> Result<()> {
        self.require(id)?;
        self.commands
            .push(Command::SetLaneChangeMode(id.clone(), mode));
        Ok(())
    }

    fn change_lane(&mut self, id: &VehicleId, lane_index: u8, duration: f64) -> Result<()> {
        self.require(id)?;
        self.commands
            .push(Command::ChangeLane(id.clone(), lane_index, duration));
        Ok(())
    }

    fn slow_down(&mut self, id: &VehicleId, target: f64, duration: f64) -> Result<()> {
        self.require(id)?;
        self.commands
            .push(Command::SlowDown(id.clone(), target, duration));
        Ok(())
    }

    fn collisions(&self) -> Result<Vec<Collision>> {
        Ok(self.collisions.clone())
    }

    fn detector_count(&self, detector: &str) -> Result<u32> {
        match self.detector_counts.get(detector) {
            Some(n) => Ok(*n),
            None => bail!("unknown detector {}", detector),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
