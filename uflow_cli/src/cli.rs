//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "uflow", version, about = "Uroflowmeter measurement CLI")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/uflow_config.toml")]
    pub config: PathBuf,

    /// Optional calibration CSV (strict header `raw,ml`); seeds the strain gauge scale
    #[arg(long, value_name = "FILE")]
    pub calibration: Option<PathBuf>,

    /// Where the strain gauge scale is persisted between runs
    #[arg(long = "state-file", value_name = "FILE", default_value = "uflow_state.toml")]
    pub state_file: PathBuf,

    /// Log and report as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); defaults to
    /// `[logging].level`, then `info`
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run measurement cycles against the simulated scale
    Measure {
        /// Volume the operator reads off the beaker, in mL
        #[arg(long = "visual-ml", value_name = "ML")]
        visual_ml: Option<f32>,
        /// Number of cycles to transfer before powering off
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        cycles: u32,
        /// Read the scale inside the control loop instead of a sampler thread
        #[arg(long, action = ArgAction::SetTrue)]
        direct: bool,
        /// Run on a virtual clock (no real sleeping; implies --direct)
        #[arg(long = "virtual-time", action = ArgAction::SetTrue)]
        virtual_time: bool,
        /// Append transferred cycles to this JSONL file instead of stdout
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
    /// Calibrate the strain gauge scale with a reference volume and persist it
    Calibrate {
        /// Reference volume placed on the scale, in mL
        #[arg(long = "reference-ml", value_name = "ML")]
        reference_ml: f32,
        /// Run on a virtual clock (no real sleeping)
        #[arg(long = "virtual-time", action = ArgAction::SetTrue)]
        virtual_time: bool,
    },
    /// Feed a recorded session (CSV with a `raw` column) through the machine
    Replay {
        /// Recorded raw samples, idle readings first
        #[arg(long, value_name = "FILE")]
        input: PathBuf,
        /// Volume the operator read off the beaker, in mL
        #[arg(long = "visual-ml", value_name = "ML")]
        visual_ml: Option<f32>,
        /// Append the transferred cycle to this JSONL file instead of stdout
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
    /// Validate the config, calibration CSV and persisted scale
    SelfCheck,
}
