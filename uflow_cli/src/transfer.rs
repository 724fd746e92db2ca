//! JSONL transfer collaborator: one line per transferred cycle.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use serde_json::{Value, json};
use uflow_core::{BoxError, CycleRecord, Transfer};

enum Sink {
    Stdout,
    /// Opened on the first connect attempt.
    File {
        path: PathBuf,
        file: Option<BufWriter<File>>,
    },
}

pub struct JsonlTransfer {
    sink: Sink,
    slope_window: usize,
    sent: u32,
}

impl JsonlTransfer {
    pub fn new(out: Option<PathBuf>, slope_window: usize) -> Self {
        let sink = match out {
            Some(path) => Sink::File { path, file: None },
            None => Sink::Stdout,
        };
        Self {
            sink,
            slope_window,
            sent: 0,
        }
    }

    pub fn sent(&self) -> u32 {
        self.sent
    }
}

impl Transfer for JsonlTransfer {
    fn poll_connect(&mut self) -> Result<bool, BoxError> {
        if let Sink::File { path, file } = &mut self.sink
            && file.is_none()
        {
            let f = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&*path)
                .map_err(|e| format!("open {}: {e}", path.display()))?;
            tracing::debug!(path = %path.display(), "transfer file opened");
            *file = Some(BufWriter::new(f));
        }
        Ok(true)
    }

    fn send(&mut self, record: &CycleRecord) -> Result<(), BoxError> {
        let line = record_json(record, self.slope_window).to_string();
        match &mut self.sink {
            Sink::Stdout => {
                let mut out = io::stdout().lock();
                writeln!(out, "{line}")?;
                out.flush()?;
            }
            Sink::File { file: Some(f), .. } => {
                writeln!(f, "{line}")?;
                f.flush()?;
            }
            Sink::File { path, file: None } => {
                return Err(format!("{} is not open", path.display()).into());
            }
        }
        self.sent += 1;
        Ok(())
    }
}

/// The session report of one cycle.
pub fn record_json(record: &CycleRecord, slope_window: usize) -> Value {
    let s = &record.summary;
    let period_s = record.period_s;
    let outliers: Vec<Value> = record
        .outliers
        .iter()
        .map(|o| json!({ "ndx": o.ndx, "raw": o.raw }))
        .collect();
    let curve: Vec<Value> = record
        .curve(slope_window)
        .iter()
        .map(|p| {
            json!({
                "t_s": p.t_s,
                "volume_ml": p.volume_ml,
                "raw_volume_ml": p.raw_volume_ml,
                "flow_ml_s": p.flow_ml_s,
            })
        })
        .collect();
    json!({
        "cycle": record.cycle,
        "period_s": period_s,
        "final_volume_ml": s.final_volume_ml,
        "visual_volume_ml": s.visual_volume_ml,
        "rescale": s.rescale,
        "strain_gauge_scale": s.strain_gauge_scale,
        "zero_counts": record.calibration.zero_counts,
        "start_t": s.start_t,
        "end_t": s.end_t,
        "max_ndx": s.max_ndx,
        "q_max_ml_s": s.q_max_ml_s,
        "voiding_time_s": s.voiding_time_s(period_s),
        "time_to_peak_s": s.time_to_peak_s(period_s),
        "average_flow_ml_s": s.average_flow_ml_s(period_s),
        "samples": record.samples.len(),
        "outliers": outliers,
        "curve": curve,
    })
}
