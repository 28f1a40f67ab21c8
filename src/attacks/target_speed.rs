use super::Selection;
use crate::session::{LaneChangeMode, SafetyMode, TrafficSession, VehicleId};
use anyhow::Result;
use std::collections::HashSet;

/// Continuous speed override: every step, push each selected vehicle toward
/// the target speed with safety arbitration off. No completion state; the
/// override lives for as long as the run does.
#[derive(Debug)]
pub struct TargetSpeedOverride {
    target: f64,
    accel_rate: f64,
    selection: Selection,
}

impl TargetSpeedOverride {
    pub fn new(target: f64, accel_rate: f64, selection: Selection) -> Self {
        Self {
            target,
            accel_rate: accel_rate.abs(),
            selection,
        }
    }

    pub fn step(&mut self, session: &mut dyn TrafficSession) -> Result<()> {
        let live: HashSet<VehicleId> = session.vehicle_ids()?.into_iter().collect();

        for vid in self.selection.resolve(session)? {
            if !live.contains(&vid) {
                continue;
            }

            session.set_safety_mode(&vid, SafetyMode::Disabled)?;
            session.set_lane_change_mode(&vid, LaneChangeMode::Disabled)?;

            let current = session.speed(&vid)?;
            if current < self.target {
                session.set_acceleration(&vid, self.accel_rate, 1.0)?;
            } else if current > self.target {
                let duration = (current - self.target) / self.accel_rate;
                if duration > 0.0 {
                    session.slow_down(&vid, self.target, duration)?;
                }
            }

            // Overshoot guard, applied on every branch.
            session.set_max_speed(&vid, self.target)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::mock::{Command, MockSession, MockVehicle};

    fn attack() -> TargetSpeedOverride {
        TargetSpeedOverride::new(15.0, 3.0, Selection::TypeSubstring("CAV".into()))
    }

    #[test]
    fn slow_vehicle_is_accelerated_and_capped() {
        let mut session = MockSession::new();
        session.add_vehicle("cav_1", MockVehicle { speed: 10.0, ..Default::default() });

        attack().step(&mut session).unwrap();

        let cmds = session.commands_for("cav_1");
        assert!(cmds.contains(&Command::SetAcceleration(VehicleId::new("cav_1"), 3.0, 1.0)));
        assert!(cmds.contains(&Command::SetMaxSpeed(VehicleId::new("cav_1"), 15.0)));
    }

    #[test]
    fn fast_vehicle_gets_a_bounded_slowdown_and_cap() {
        let mut session = MockSession::new();
        session.add_vehicle("cav_1", MockVehicle { speed: 24.0, ..Default::default() });

        attack().step(&mut session).unwrap();

        let cmds = session.commands_for("cav_1");
        assert!(cmds.contains(&Command::SlowDown(VehicleId::new("cav_1"), 15.0, 3.0)));
        assert!(cmds.contains(&Command::SetMaxSpeed(VehicleId::new("cav_1"), 15.0)));
    }

    #[test]
    fn at_target_only_the_cap_is_issued() {
        let mut session = MockSession::new();
        session.add_vehicle("cav_1", MockVehicle { speed: 15.0, ..Default::default() });

        attack().step(&mut session).unwrap();

        let cmds = session.commands_for("cav_1");
        assert_eq!(
            cmds,
            vec![
                Command::SetSafetyMode(VehicleId::new("cav_1"), SafetyMode::Disabled),
                Command::SetLaneChangeMode(VehicleId::new("cav_1"), LaneChangeMode::Disabled),
                Command::SetMaxSpeed(VehicleId::new("cav_1"), 15.0),
            ]
        );
    }

    #[test]
    fn absent_explicit_target_is_skipped_silently() {
        let mut session = MockSession::new();
        let mut a = TargetSpeedOverride::new(15.0, 3.0, Selection::Ids(vec![VehicleId::new("ghost")]));
        a.step(&mut session).unwrap();
        assert!(session.commands.is_empty());
    }
}
