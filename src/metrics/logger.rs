use super::MetricsCollector;
use anyhow::{Context, Result};
use csv::Writer;
use serde::Serialize;
use std::fs::File;
use std::path::Path;

pub struct CsvLogger {
    writer: Writer<File>,
}

impl CsvLogger {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let writer = Writer::from_path(&path)
            .with_context(|| format!("opening {}", path.as_ref().display()))?;
        Ok(Self { writer })
    }

    pub fn log_batch<T: Serialize>(&mut self, rows: &[T]) -> Result<()> {
        for row in rows {
            self.writer.serialize(row)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

/// Write one run's three streams under `out_dir`, tagged by (mode, seed) in
/// both the rows and the filenames.
pub fn persist_run(
    out_dir: impl AsRef<Path>,
    mode: &str,
    seed: u64,
    metrics: &MetricsCollector,
) -> Result<()> {
    let out_dir = out_dir.as_ref();
    let data_dir = out_dir.join("data");
    let brake_dir = out_dir.join("emergency");
    let collision_dir = out_dir.join("collision");
    for dir in [&data_dir, &brake_dir, &collision_dir] {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }

    CsvLogger::new(data_dir.join(format!("data_{}_{}.csv", mode, seed)))?
        .log_batch(metrics.detector_rows())?;
    CsvLogger::new(brake_dir.join(format!("ebrake_{}_{}.csv", mode, seed)))?
        .log_batch(metrics.brake_rows())?;
    CsvLogger::new(collision_dir.join(format!("coll_{}_{}.csv", mode, seed)))?
        .log_batch(metrics.collision_rows())?;

    Ok(())
}
