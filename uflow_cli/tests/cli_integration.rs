use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::tempdir;

// Minimal config for the simulated scale; `extra` appends whole tables
fn write_valid_config(dir: &tempfile::TempDir, onset_ms: u64, extra: &str) -> PathBuf {
    let toml = format!(
        r#"
[sampling]
sample_rate_hz = 10

[timeouts]
sensor_ms = 300
onset_ms = {onset_ms}
connect_ms = 1000

{extra}
"#
    );
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

fn uflow(dir: &tempfile::TempDir, cfg: &Path) -> Command {
    let mut cmd = Command::cargo_bin("uflow").unwrap();
    cmd.arg("--config")
        .arg(cfg)
        .arg("--state-file")
        .arg(dir.path().join("state.toml"))
        .arg("--log-level")
        .arg("warn");
    cmd
}

#[rstest]
#[case(&["--help"], 120_000, "", 0, "Usage:", "stdout")]
#[case(&["measure", "--virtual-time"], 120_000, "", 0, "measure complete: 1 cycle(s)", "stdout")]
#[case(&["measure", "--cycles", "0"], 120_000, "", 2, "invalid value", "stderr")]
#[case(&["calibrate"], 120_000, "", 2, "required", "stderr")]
#[case(&["measure", "--virtual-time"], 500, "", 4, "No voiding was detected", "stderr")]
#[case(&["measure", "--virtual-time"], 120_000, "[outlier]\nratio = 0.5", 1, "outlier.ratio", "stderr")]
#[case(&["self-check"], 120_000, "[sampling]\nsample_rate_hz = 5", 1, "Configuration is invalid", "stderr")]
#[case(&["self-check"], 120_000, "", 0, "OK: 20.000 counts/mL, 100 ms per sample", "stdout")]
fn cli_table_cases(
    #[case] args: &[&str],
    #[case] onset_ms: u64,
    #[case] extra: &str,
    #[case] exit_code: i32,
    #[case] needle: &str,
    #[case] stream: &str,
) {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir, onset_ms, extra);

    let mut cmd = uflow(&dir, &cfg);
    for a in args {
        cmd.arg(a);
    }

    let assert = cmd.assert().code(exit_code);
    match stream {
        "stdout" => {
            assert.stdout(predicate::str::contains(needle));
        }
        "stderr" => {
            assert.stderr(predicate::str::contains(needle));
        }
        other => panic!("unknown stream: {other}"),
    }
}

#[test]
fn spiky_scale_is_a_data_fault() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir, 120_000, "");
    uflow(&dir, &cfg)
        .env("UFLOW_SIM_SPIKE_EVERY", "5")
        .args(["measure", "--virtual-time"])
        .assert()
        .code(5)
        .stderr(predicate::str::contains("Too many spikes in one cycle (21 > 20)"));
}

#[test]
fn cli_reports_bad_calibration_header() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir, 120_000, "");

    // Write a bad-header CSV
    let bad_csv = dir.path().join("calib.csv");
    let mut f = fs::File::create(&bad_csv).unwrap();
    writeln!(f, "raw,value").unwrap();
    writeln!(f, "1200,0.0").unwrap();
    writeln!(f, "11200,500.0").unwrap();

    uflow(&dir, &cfg)
        .arg("--calibration")
        .arg(&bad_csv)
        .arg("self-check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid headers"));
}

#[test]
fn calibration_csv_seeds_the_scale() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir, 120_000, "");
    let csv = dir.path().join("calib.csv");
    fs::write(&csv, "raw,ml\n1200,0.0\n7200,250.0\n13200,500.0\n").unwrap();

    uflow(&dir, &cfg)
        .arg("--calibration")
        .arg(&csv)
        .arg("self-check")
        .assert()
        .success()
        .stdout(predicate::str::contains("OK: 24.000 counts/mL"));
}

#[test]
fn calibrate_persists_and_later_runs_use_it() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir, 120_000, "");

    uflow(&dir, &cfg)
        .env("UFLOW_SIM_COUNTS_PER_ML", "18")
        .args(["calibrate", "--reference-ml", "500", "--virtual-time"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "calibration complete: 18.000 counts/mL (zero 1200)",
        ));

    let state = fs::read_to_string(dir.path().join("state.toml")).unwrap();
    assert!(state.contains("[persisted]"), "{state}");
    assert!(state.contains("counts_per_ml = 18"), "{state}");

    uflow(&dir, &cfg)
        .arg("self-check")
        .assert()
        .success()
        .stdout(predicate::str::contains("OK: 18.000 counts/mL"));
}

#[test]
fn corrupt_state_file_fails_the_self_test() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir, 120_000, "");
    fs::write(dir.path().join("state.toml"), "persisted = [").unwrap();

    uflow(&dir, &cfg)
        .args(["measure", "--virtual-time"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Power-on self-test failed"));
}

#[test]
fn replay_reports_recorded_timing() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir, 120_000, "");
    // Idle readings for POWERON, STANDBY and tare, then a 40 mL void.
    let mut rows = vec![1_200i32; 15];
    rows.extend((1..=20).map(|j| 1_200 + 40 * j));
    rows.extend([2_000; 10]);
    let mut csv = String::from("raw\n");
    for r in rows {
        csv.push_str(&format!("{r}\n"));
    }
    let input = dir.path().join("session.csv");
    fs::write(&input, csv).unwrap();

    let out = uflow(&dir, &cfg)
        .args(["replay", "--input"])
        .arg(&input)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let stdout = String::from_utf8_lossy(&out);
    let line = stdout
        .lines()
        .find(|l| l.starts_with('{'))
        .unwrap_or_else(|| panic!("no JSONL record; stdout was: {stdout}"));
    let v: serde_json::Value = serde_json::from_str(line).unwrap();
    assert_eq!(v["start_t"], 7);
    assert_eq!(v["end_t"], 25);
    assert!((v["final_volume_ml"].as_f64().unwrap() - 40.0).abs() < 1e-3);
}

#[test]
fn truncated_replay_is_a_sensor_fault() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir, 120_000, "");
    let input = dir.path().join("session.csv");
    fs::write(&input, "raw\n1200\n1200\n1200\n1200\n").unwrap();

    uflow(&dir, &cfg)
        .args(["replay", "--input"])
        .arg(&input)
        .assert()
        .code(3)
        .stderr(predicate::str::contains(
            "What happened: The scale stopped sending samples",
        ));
}
