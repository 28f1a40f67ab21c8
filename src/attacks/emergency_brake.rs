use super::CompletionFlag;
use crate::session::{LaneChangeMode, SafetyMode, TrafficSession, VehicleId};
use anyhow::Result;
use tracing::{debug, info};

/// Forces a single target vehicle to a full stop once it reaches a position
/// along its lane. One-shot: the completion flag never resets within a run.
#[derive(Debug)]
pub struct EmergencyBrake {
    vehicle: VehicleId,
    stop_position: f64,
    deceleration: f64,
    done: CompletionFlag,
}

impl EmergencyBrake {
    pub fn new(vehicle: VehicleId, stop_position: f64, deceleration: f64) -> Self {
        Self {
            vehicle,
            stop_position,
            deceleration: deceleration.abs(),
            done: CompletionFlag::default(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.done.is_done()
    }

    pub fn step(&mut self, session: &mut dyn TrafficSession) -> Result<()> {
        if self.done.is_done() {
            return Ok(());
        }

        if !session.vehicle_ids()?.contains(&self.vehicle) {
            // Target left the simulation before the stop point. Counted as
            // complete so the policy goes quiet for the rest of the run.
            debug!(vehicle = %self.vehicle, "target departed before brake point");
            self.done.mark();
            return Ok(());
        }

        let pos = session.lane_position(&self.vehicle)?;
        if pos < self.stop_position {
            return Ok(());
        }

        session.set_safety_mode(&self.vehicle, SafetyMode::Disabled)?;
        session.set_lane_change_mode(&self.vehicle, LaneChangeMode::Disabled)?;

        // Ramp duration comes from the target's own speed, not some fixed
        // reference vehicle.
        let ramp = session.speed(&self.vehicle)? / self.deceleration;
        session.slow_down(&self.vehicle, 0.0, ramp)?;
        self.done.mark();
        info!(vehicle = %self.vehicle, pos, ramp_s = ramp, "emergency brake applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::mock::{Command, MockSession, MockVehicle};

    fn brake() -> EmergencyBrake {
        EmergencyBrake::new(VehicleId::new("ego"), 500.0, 4.0)
    }

    #[test]
    fn idle_before_stop_position() {
        let mut session = MockSession::new();
        session.add_vehicle("ego", MockVehicle { pos: 499.9, speed: 20.0, ..Default::default() });

        let mut attack = brake();
        attack.step(&mut session).unwrap();

        assert!(session.commands.is_empty());
        assert!(!attack.is_complete());
    }

    #[test]
    fn brakes_once_past_threshold_then_goes_quiet() {
        let mut session = MockSession::new();
        session.add_vehicle("ego", MockVehicle { pos: 500.0, speed: 20.0, ..Default::default() });

        let mut attack = brake();
        attack.step(&mut session).unwrap();

        assert_eq!(
            session.commands_for("ego"),
            vec![
                Command::SetSafetyMode(VehicleId::new("ego"), crate::session::SafetyMode::Disabled),
                Command::SetLaneChangeMode(
                    VehicleId::new("ego"),
                    crate::session::LaneChangeMode::Disabled
                ),
                Command::SlowDown(VehicleId::new("ego"), 0.0, 5.0),
            ]
        );
        assert!(attack.is_complete());

        session.clear_commands();
        attack.step(&mut session).unwrap();
        attack.step(&mut session).unwrap();
        assert!(session.commands.is_empty());
    }

    #[test]
    fn departed_target_counts_as_complete() {
        let mut session = MockSession::new();
        let mut attack = brake();
        attack.step(&mut session).unwrap();
        assert!(attack.is_complete());
        assert!(session.commands.is_empty());
    }

    #[test]
    fn ramp_uses_targets_own_speed() {
        let mut session = MockSession::new();
        session.add_vehicle("ego", MockVehicle { pos: 600.0, speed: 10.0, ..Default::default() });
        session.add_vehicle("other", MockVehicle { pos: 100.0, speed: 30.0, ..Default::default() });

        let mut attack = brake();
        attack.step(&mut session).unwrap();

        let ramp = session.commands_for("ego").into_iter().find_map(|c| match c {
            Command::SlowDown(_, _, d) => Some(d),
            _ => None,
        });
        assert_eq!(ramp, Some(2.5));
    }
}
