use super::{MPH_TO_MPS, RampTracker, Zone};
use crate::session::{TrafficSession, VehicleId};
use anyhow::Result;
use std::collections::HashSet;

/// Spoofed variable speed limit over a zone. Vehicles above the limit get a
/// bounded ramp sized by the maximum deceleration; vehicles at or below it
/// just have their max speed pinned. Leaving the zone restores the default.
#[derive(Debug)]
pub struct VariableSpeedLimit {
    target: f64,
    zone: Zone,
    default_speed: f64,
    max_decel: f64,
    target_type: String,
    tracker: RampTracker,
}

/// Time to ramp from `current` down to `target` at `max_decel` magnitude.
pub fn ramp_duration(current: f64, target: f64, max_decel: f64) -> f64 {
    (current - target) / max_decel.abs()
}

impl VariableSpeedLimit {
    pub fn new(
        limit_mph: f64,
        zone: Zone,
        default_speed: f64,
        max_decel: f64,
        target_type: String,
    ) -> Self {
        Self {
            // mph -> m/s once, never per step
            target: limit_mph * MPH_TO_MPS,
            zone,
            default_speed,
            max_decel,
            target_type,
            tracker: RampTracker::default(),
        }
    }

    pub fn target_speed(&self) -> f64 {
        self.target
    }

    pub fn is_ramping(&self, id: &VehicleId) -> bool {
        self.tracker.contains(id)
    }

    pub fn step(&mut self, session: &mut dyn TrafficSession) -> Result<()> {
        let mut in_zone = HashSet::new();

        for vid in session.vehicle_ids()? {
            if !session.type_id(&vid)?.contains(self.target_type.as_str()) {
                continue;
            }

            let pos = session.lane_position(&vid)?;
            if self.zone.contains(pos) {
                in_zone.insert(vid.clone());
                let speed = session.speed(&vid)?;
                if speed > self.target {
                    let duration = ramp_duration(speed, self.target, self.max_decel);
                    session.slow_down(&vid, self.target, duration)?;
                    self.tracker.track(vid, self.target);
                } else {
                    session.set_max_speed(&vid, self.target)?;
                }
            } else {
                session.set_max_speed(&vid, self.default_speed)?;
                self.tracker.release(&vid);
            }
        }

        // Vehicles that left the simulation mid-ramp would otherwise linger;
        // membership must match zone membership every step.
        self.tracker.retain_members(&in_zone);
        Ok(())
    }
}
