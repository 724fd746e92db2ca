//! Human-readable error descriptions and structured JSON error formatting.

use uflow_core::{FaultKind, FaultReason};

/// Full message of a report including every wrapped cause.
fn chain_text(err: &eyre::Report) -> String {
    err.chain()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(": ")
}

fn explain(what: &str, causes: &str, fix: &str) -> String {
    format!("What happened: {what}.\nLikely causes: {causes}.\nHow to fix: {fix}.")
}

fn humanize_fault(reason: &FaultReason) -> String {
    match reason {
        FaultReason::NoSample => explain(
            "The scale stopped sending samples",
            "Load cell converter stalled, loose cable, or timeouts.sensor_ms set too low",
            "Check the load cell cable and power, then raise timeouts.sensor_ms if the converter is slow",
        ),
        FaultReason::ImplausibleReading(raw) => explain(
            &format!("The scale reported a saturated reading ({raw})"),
            "Load cell overloaded, disconnected, or shorted",
            "Remove any load, reseat the load cell connector and power-cycle the instrument",
        ),
        FaultReason::TareUnstable { spread } => explain(
            &format!("The empty beaker did not settle during tare (spread {spread} counts)"),
            "Beaker moved, vibration near the stand, or calibration.max_tare_spread too tight",
            "Keep the beaker still during tare; raise calibration.max_tare_spread only if the stand is noisy",
        ),
        FaultReason::SelfTestFailed(msg) => explain(
            &format!("Power-on self-test failed ({msg})"),
            "Unreadable calibration state file or a faulty load cell",
            "Check the state file (--state-file) or delete it and recalibrate",
        ),
        FaultReason::CalibrationFailed(msg) => explain(
            &format!("Calibration failed ({msg})"),
            "Reference volume not placed, wrong reference volume, or scale not cleared first",
            "Clear the scale, place the stated reference volume and run `uflow calibrate` again",
        ),
        FaultReason::OnsetTimeout => explain(
            "No voiding was detected before the onset timeout",
            "Patient did not void, beaker not under the funnel, or timeouts.onset_ms too short",
            "Position the beaker and start a new cycle; raise timeouts.onset_ms if needed",
        ),
        FaultReason::CalibrationTimeout => explain(
            "The reference volume was never confirmed",
            "Operator did not confirm the reference, or timeouts.calibration_ms too short",
            "Place the reference volume promptly and confirm it",
        ),
        FaultReason::ConnectTimeout => explain(
            "The network link did not come up in time",
            "Network down or timeouts.connect_ms too short",
            "Check connectivity; the cycle was not transferred and must be repeated",
        ),
        FaultReason::TransferFailed(msg) => explain(
            &format!("Sending the cycle failed ({msg})"),
            "Output file not writable or link dropped mid-transfer",
            "Check the --out path and permissions, then repeat the cycle",
        ),
        FaultReason::BufferOverrun { dropped } => explain(
            &format!("Samples were lost during acquisition ({dropped} dropped)"),
            "Control loop too slow for the sample rate, or the void outlasted sampling.buffer_len",
            "Lower sampling.sample_rate_hz, raise sampling.buffer_len, or use --direct",
        ),
        FaultReason::TooManyOutliers { count, limit } => explain(
            &format!("Too many spikes in one cycle ({count} > {limit})"),
            "Stream hitting the beaker wall hard, bumping the stand, or electrical noise",
            "Steady the stand and repeat the cycle; raise outlier.max_outliers only with care",
        ),
        FaultReason::ImplausibleVolume(v) => explain(
            &format!("The measured volume is implausible ({v:.1} mL)"),
            "Beaker lifted or emptied during the cycle",
            "Leave the beaker in place until the result is shown, then repeat",
        ),
        FaultReason::NoPeak => explain(
            "No flow peak could be qualified",
            "Very small or interrupted void, or flow.end_flow_ml_s set too high",
            "Repeat the cycle; review the [flow] thresholds",
        ),
        FaultReason::OperatorAbort => explain(
            "The cycle was aborted",
            "Abort pressed or the process was interrupted (Ctrl-C)",
            "Start a new cycle when ready",
        ),
    }
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    use uflow_core::error::{BuildError, UflowError};

    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingTransfer => explain(
                "No transfer collaborator was provided to the measurement machine",
                "The output sink was not wired into the builder",
                "Pass a transfer via with_transfer(...)",
            ),
            BuildError::MissingOperator => explain(
                "No operator panel was provided to the measurement machine",
                "The operator collaborator was not wired into the builder",
                "Pass an operator via with_operator(...)",
            ),
            BuildError::InvalidConfig(msg) => explain(
                &format!("Invalid configuration ({msg})"),
                "Missing or out-of-range values in the TOML",
                "Edit the config file, then rerun",
            ),
        };
    }

    if let Some(ue) = err.downcast_ref::<UflowError>() {
        return match ue {
            UflowError::Fault(f) => humanize_fault(&f.reason),
            UflowError::TickBudget(n) => explain(
                &format!("The run did not finish within {n} ticks"),
                "Machine waiting on an operator action that never came",
                "Re-run with --log-level=debug to see the state it stopped in",
            ),
            other => explain(
                &other.to_string(),
                "See logs",
                "Re-run with --log-level=debug or set RUST_LOG for more detail",
            ),
        };
    }

    // String-based heuristics for errors coming from init or config
    let msg = chain_text(err);
    let lower = msg.to_ascii_lowercase();

    if lower.contains("calibration csv must have headers") {
        return "Invalid headers in calibration CSV. Expected 'raw,ml'.".to_string();
    }

    if lower.contains("session csv") {
        return explain(
            &format!("The recorded session could not be read ({msg})"),
            "Wrong file, missing 'raw' column, or values outside the i16 range",
            "Export the session with a 'raw' column of ADC counts",
        );
    }

    if lower.contains("read config") {
        return explain(
            &format!("The config file could not be read ({msg})"),
            "Wrong --config path or missing permissions",
            "Pass an existing TOML file with --config",
        );
    }

    if lower.contains("parse config") || lower.contains("invalid configuration") {
        return explain(
            &format!("Configuration is invalid or incomplete ({msg})"),
            "Missing [sampling] section, a typo in a key, or an out-of-range value",
            "Edit the TOML config and try again",
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Map fault kinds to stable exit codes; everything else is 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    use uflow_core::error::UflowError;
    if let Some(UflowError::Fault(f)) = err.downcast_ref::<UflowError>() {
        return match f.kind() {
            FaultKind::Sensor => 3,
            FaultKind::Timing => 4,
            FaultKind::Data => 5,
            FaultKind::Aborted => 6,
        };
    }
    1
}

pub fn fault_reason_name(r: &FaultReason) -> &'static str {
    match r {
        FaultReason::NoSample => "NoSample",
        FaultReason::ImplausibleReading(_) => "ImplausibleReading",
        FaultReason::TareUnstable { .. } => "TareUnstable",
        FaultReason::SelfTestFailed(_) => "SelfTestFailed",
        FaultReason::CalibrationFailed(_) => "CalibrationFailed",
        FaultReason::OnsetTimeout => "OnsetTimeout",
        FaultReason::CalibrationTimeout => "CalibrationTimeout",
        FaultReason::ConnectTimeout => "ConnectTimeout",
        FaultReason::TransferFailed(_) => "TransferFailed",
        FaultReason::BufferOverrun { .. } => "BufferOverrun",
        FaultReason::TooManyOutliers { .. } => "TooManyOutliers",
        FaultReason::ImplausibleVolume(_) => "ImplausibleVolume",
        FaultReason::NoPeak => "NoPeak",
        FaultReason::OperatorAbort => "OperatorAbort",
    }
}

fn kind_name(k: FaultKind) -> &'static str {
    match k {
        FaultKind::Sensor => "sensor",
        FaultKind::Timing => "timing",
        FaultKind::Data => "data",
        FaultKind::Aborted => "aborted",
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;
    use uflow_core::error::UflowError;

    if let Some(UflowError::Fault(f)) = err.downcast_ref::<UflowError>() {
        let details = match &f.reason {
            FaultReason::ImplausibleReading(raw) => Some(json!({ "raw": raw })),
            FaultReason::TareUnstable { spread } => Some(json!({ "spread": spread })),
            FaultReason::BufferOverrun { dropped } => Some(json!({ "dropped": dropped })),
            FaultReason::TooManyOutliers { count, limit } => {
                Some(json!({ "count": count, "limit": limit }))
            }
            FaultReason::ImplausibleVolume(v) => Some(json!({ "volume_ml": v })),
            _ => None,
        };
        let mut obj = json!({
            "reason": fault_reason_name(&f.reason),
            "kind": kind_name(f.kind()),
            "state": f.state.name(),
            "message": humanize(err),
        });
        if let Some(d) = details {
            obj["details"] = d;
        }
        return obj.to_string();
    }

    // Generic error JSON
    json!({ "reason": "Error", "message": humanize(err) }).to_string()
}
