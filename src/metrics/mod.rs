pub mod logger;

use crate::session::TrafficSession;
use anyhow::Result;
use serde::Serialize;

/// Effective length of a lane-area detector, used to turn counts into
/// densities.
pub const DETECTOR_LENGTH_M: f64 = 100.0;

#[derive(Debug, Clone, Serialize)]
pub struct DetectorRow {
    pub time: f64,
    pub det_id: String,
    pub veh_cnt: u32,
    pub dens_veh_km: f64,
    pub mode: String,
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BrakeRow {
    pub time: f64,
    pub veh_id: String,
    pub acc_m_s2: f64,
    pub mode: String,
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollisionRow {
    pub time: f64,
    pub collider: String,
    pub victim: String,
    pub col_speed: f64,
    pub vic_speed: f64,
    pub lane: String,
    pub pos: f64,
    pub mode: String,
    pub seed: u64,
}

/// Three independent read-only samplers, run every step of every mode
/// (baseline included). Rows accumulate here and are persisted once the run
/// ends.
#[derive(Debug)]
pub struct MetricsCollector {
    detectors: Vec<String>,
    poll_every_steps: u64,
    ebrake_threshold: f64,
    mode: String,
    seed: u64,
    step: u64,
    detector_rows: Vec<DetectorRow>,
    brake_rows: Vec<BrakeRow>,
    collision_rows: Vec<CollisionRow>,
}

impl MetricsCollector {
    pub fn new(
        detectors: Vec<String>,
        poll_every_steps: u64,
        ebrake_threshold: f64,
        mode: impl Into<String>,
        seed: u64,
    ) -> Self {
        Self {
            detectors,
            poll_every_steps: poll_every_steps.max(1),
            ebrake_threshold,
            mode: mode.into(),
            seed,
            step: 0,
            detector_rows: Vec::new(),
            brake_rows: Vec::new(),
            collision_rows: Vec::new(),
        }
    }

    pub fn sample(&mut self, session: &dyn TrafficSession) -> Result<()> {
        self.step += 1;
        let t = session.time();

        // Detector polling is decimated to roughly 1 Hz; the ratio comes from
        // configuration, not a hardcoded step count.
        if self.step % self.poll_every_steps == 0 {
            for det in &self.detectors {
                let cnt = session.detector_count(det)?;
                let dens_veh_km = cnt as f64 / DETECTOR_LENGTH_M * 1000.0;
                self.detector_rows.push(DetectorRow {
                    time: t,
                    det_id: det.clone(),
                    veh_cnt: cnt,
                    dens_veh_km,
                    mode: self.mode.clone(),
                    seed: self.seed,
                });
            }
        }

        for vid in session.vehicle_ids()? {
            let acc = session.acceleration(&vid)?;
            if acc < self.ebrake_threshold {
                self.brake_rows.push(BrakeRow {
                    time: t,
                    veh_id: vid.as_str().to_string(),
                    acc_m_s2: acc,
                    mode: self.mode.clone(),
                    seed: self.seed,
                });
            }
        }

        for coll in session.collisions()? {
            self.collision_rows.push(CollisionRow {
                time: t,
                collider: coll.collider.as_str().to_string(),
                victim: coll.victim.as_str().to_string(),
                col_speed: coll.collider_speed,
                vic_speed: coll.victim_speed,
                lane: coll.lane,
                pos: coll.pos,
                mode: self.mode.clone(),
                seed: self.seed,
            });
        }

        Ok(())
    }

    pub fn detector_rows(&self) -> &[DetectorRow] {
        &self.detector_rows
    }

    pub fn brake_rows(&self) -> &[BrakeRow] {
        &self.brake_rows
    }

    pub fn collision_rows(&self) -> &[CollisionRow] {
        &self.collision_rows
    }
}
