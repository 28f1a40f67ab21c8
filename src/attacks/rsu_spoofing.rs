use super::{LaneClosure, MPH_TO_MPS, Zone};
use crate::session::TrafficSession;
use anyhow::{Context, Result, bail};
use tracing::debug;

/// One speed-limit broadcast window: active over `(start, end]` sim seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleEntry {
    pub start: f64,
    pub end: f64,
    pub speed_mph: f64,
}

impl ScheduleEntry {
    pub fn contains(&self, t: f64) -> bool {
        self.start < t && t <= self.end
    }
}

/// Parse a schedule of the form `"0-50:45,50-100:30"` (seconds ranges to mph)
/// and reject empty, inverted, or overlapping windows.
pub fn parse_schedule(s: &str) -> Result<Vec<ScheduleEntry>> {
    let mut entries = Vec::new();
    for piece in s.split(',') {
        let piece = piece.trim();
        let (range, speed) = piece
            .split_once(':')
            .with_context(|| format!("schedule entry '{}' is missing ':'", piece))?;
        let (start, end) = range
            .split_once('-')
            .with_context(|| format!("schedule range '{}' is missing '-'", range))?;
        let entry = ScheduleEntry {
            start: start.trim().parse().with_context(|| format!("bad start '{}'", start))?,
            end: end.trim().parse().with_context(|| format!("bad end '{}'", end))?,
            speed_mph: speed.trim().parse().with_context(|| format!("bad speed '{}'", speed))?,
        };
        if entry.end <= entry.start {
            bail!("schedule entry '{}' ends before it starts", piece);
        }
        entries.push(entry);
    }
    if entries.is_empty() {
        bail!("empty speed schedule");
    }

    // Overlapping windows would make the enforced limit order-dependent, so
    // they are a configuration error rather than a tiebreak rule.
    let mut sorted = entries.clone();
    sorted.sort_by(|a, b| a.start.total_cmp(&b.start));
    for pair in sorted.windows(2) {
        if pair[1].start < pair[0].end {
            bail!(
                "schedule windows {}-{} and {}-{} overlap",
                pair[0].start, pair[0].end, pair[1].start, pair[1].end
            );
        }
    }
    Ok(entries)
}

/// Compromised roadside unit: a timed speed-limit schedule composed with a
/// lane closure that switches on at `lane_closure_start` and stays on. Both
/// sub-policies can be active in the same step.
#[derive(Debug)]
pub struct RsuSpoofing {
    schedule: Vec<ScheduleEntry>,
    lane_closure_start: f64,
    zone: Zone,
    target_type: String,
    lane_closure: LaneClosure,
}

impl RsuSpoofing {
    pub fn new(
        schedule: Vec<ScheduleEntry>,
        lane_closure_start: f64,
        zone: Zone,
        target_type: String,
        lane_closure: LaneClosure,
    ) -> Self {
        Self {
            schedule,
            lane_closure_start,
            zone,
            target_type,
            lane_closure,
        }
    }

    /// The limit broadcast at time `t`, in canonical units.
    pub fn enforced_speed(&self, t: f64) -> Option<f64> {
        self.schedule
            .iter()
            .find(|e| e.contains(t))
            .map(|e| e.speed_mph * MPH_TO_MPS)
    }

    pub fn step(&mut self, session: &mut dyn TrafficSession) -> Result<()> {
        let t = session.time();

        if let Some(limit) = self.enforced_speed(t) {
            for vid in session.vehicle_ids()? {
                if !session.type_id(&vid)?.contains(self.target_type.as_str()) {
                    continue;
                }
                if self.zone.contains(session.lane_position(&vid)?) {
                    session.set_max_speed(&vid, limit)?;
                }
            }
        } else {
            debug!(time = t, "no schedule window active");
        }

        if t >= self.lane_closure_start {
            self.lane_closure.step(session)?;
        }
        Ok(())
    }
}
