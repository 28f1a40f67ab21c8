use super::{CompletionMap, Selection};
use crate::session::{Collision, LaneChangeMode, SafetyMode, TrafficSession, VehicleId};
use anyhow::Result;
use std::collections::HashSet;
use tracing::{debug, info};

/// Drives selected vehicles into the one ahead by sustained acceleration with
/// safety arbitration off, then freezes both participants at the crash site.
#[derive(Debug)]
pub struct RearEnd {
    accel: f64,
    selection: Selection,
    done: CompletionMap,
}

impl RearEnd {
    pub fn new(accel: f64, selection: Selection) -> Self {
        Self {
            accel,
            selection,
            done: CompletionMap::default(),
        }
    }

    pub fn collisions_caused(&self) -> usize {
        self.done.done_count()
    }

    pub fn is_done(&self, id: &VehicleId) -> bool {
        self.done.is_done(id)
    }

    pub fn step(&mut self, session: &mut dyn TrafficSession) -> Result<()> {
        let live: HashSet<VehicleId> = session.vehicle_ids()?.into_iter().collect();
        let targets = self.selection.resolve(session)?;
        let collisions = session.collisions()?;

        for vid in targets {
            if self.done.is_done(&vid) {
                continue;
            }
            if !live.contains(&vid) {
                // Departed before colliding; counted as complete so we never
                // chase an id that may be recycled later.
                debug!(vehicle = %vid, "target departed, marking done");
                self.done.mark(vid);
                continue;
            }

            session.set_safety_mode(&vid, SafetyMode::Disabled)?;
            session.set_lane_change_mode(&vid, LaneChangeMode::Disabled)?;
            session.set_acceleration(&vid, self.accel, 1.0)?;

            // First report (in report order) where this target is the
            // collider wins; later reports for the same step are ignored.
            if let Some(coll) = collisions.iter().find(|c| c.collider == vid) {
                self.halt_participants(session, coll, &live)?;
                info!(collider = %coll.collider, victim = %coll.victim, "rear-end collision");
                self.done.mark(vid);
            }
        }
        Ok(())
    }

    fn halt_participants(
        &self,
        session: &mut dyn TrafficSession,
        coll: &Collision,
        live: &HashSet<VehicleId>,
    ) -> Result<()> {
        for v in [&coll.collider, &coll.victim] {
            if !live.contains(v) {
                continue;
            }
            session.set_acceleration(v, 0.0, 0.0)?;
            session.set_speed(v, 0.0)?;
            session.set_safety_mode(v, SafetyMode::Default)?;
            session.set_lane_change_mode(v, LaneChangeMode::Default)?;
        }
        Ok(())
    }
}
