#![no_main]
use libfuzzer_sys::fuzz_target;
use uflow_config::{Calibration, CalibrationRow};

fuzz_target!(|pairs: Vec<(i64, f32)>| {
    let rows: Vec<CalibrationRow> = pairs
        .into_iter()
        .map(|(raw, ml)| CalibrationRow { raw, ml })
        .collect();
    if let Ok(c) = Calibration::from_rows(rows) {
        assert!(c.counts_per_ml.is_finite() && c.counts_per_ml > 0.0);
    }
});
