use super::Zone;
use crate::session::TrafficSession;
use anyhow::Result;
use tracing::debug;

/// Advisory duration for merges requested inside the detection zone.
pub const LANE_CHANGE_DURATION_S: f64 = 2.0;

/// Spoofed lane-closure advisory. An ongoing rule, not a one-shot attack:
/// every step, eligible vehicles still on the closed lane get pushed off it,
/// and vehicles that already merged are released back to free-running.
#[derive(Debug, Clone)]
pub struct LaneClosure {
    lane_id: String,
    merge_to_lane: u8,
    zone: Zone,
    target_type: String,
}

impl LaneClosure {
    pub fn new(lane_id: String, merge_to_lane: u8, zone: Zone, target_type: String) -> Self {
        Self {
            lane_id,
            merge_to_lane,
            zone,
            target_type,
        }
    }

    pub fn step(&mut self, session: &mut dyn TrafficSession) -> Result<()> {
        for vid in session.vehicle_ids()? {
            if !session.type_id(&vid)?.contains(self.target_type.as_str()) {
                continue;
            }

            if session.lane(&vid)? != self.lane_id {
                // Already merged off the closed lane; drop any speed cap we
                // imposed during the escalation path.
                session.release_speed(&vid)?;
                continue;
            }

            let pos = session.lane_position(&vid)?;
            if self.zone.contains(pos) {
                session.change_lane(&vid, self.merge_to_lane, LANE_CHANGE_DURATION_S)?;
            } else if self.zone.is_past(pos) {
                // Missed the merge window: stop dead and force the merge.
                debug!(vehicle = %vid, pos, "past detection zone, escalating");
                session.set_speed(&vid, 0.0)?;
                session.change_lane(&vid, self.merge_to_lane, LANE_CHANGE_DURATION_S)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::VehicleId;
    use crate::session::mock::{Command, MockSession, MockVehicle};

    fn closure() -> LaneClosure {
        LaneClosure::new("main_0".into(), 1, Zone::new(3000.0, 3500.0), "CAV".into())
    }

    #[test]
    fn advisory_merge_inside_zone() {
        let mut session = MockSession::new();
        session.add_vehicle("cav_1", MockVehicle { pos: 3100.0, ..Default::default() });

        closure().step(&mut session).unwrap();

        assert_eq!(
            session.commands_for("cav_1"),
            vec![Command::ChangeLane(VehicleId::new("cav_1"), 1, LANE_CHANGE_DURATION_S)]
        );
    }

    #[test]
    fn escalates_past_the_zone() {
        let mut session = MockSession::new();
        session.add_vehicle("cav_1", MockVehicle { pos: 3500.0, ..Default::default() });

        closure().step(&mut session).unwrap();

        assert_eq!(
            session.commands_for("cav_1"),
            vec![
                Command::SetSpeed(VehicleId::new("cav_1"), 0.0),
                Command::ChangeLane(VehicleId::new("cav_1"), 1, LANE_CHANGE_DURATION_S),
            ]
        );
    }

    #[test]
    fn merged_vehicles_are_released() {
        let mut session = MockSession::new();
        session.add_vehicle("cav_1", MockVehicle { pos: 3200.0, lane: "main_1".into(), ..Default::default() });

        closure().step(&mut session).unwrap();

        assert_eq!(
            session.commands_for("cav_1"),
            vec![Command::ReleaseSpeed(VehicleId::new("cav_1"))]
        );
    }

    #[test]
    fn ignores_unmatched_types_and_upstream_vehicles() {
        let mut session = MockSession::new();
        session.add_vehicle("hv_1", MockVehicle { pos: 3200.0, type_id: "HV".into(), ..Default::default() });
        session.add_vehicle("cav_2", MockVehicle { pos: 100.0, ..Default::default() });

        closure().step(&mut session).unwrap();
        assert!(session.commands.is_empty());
    }
}
