#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! `uflow`: drive the uroflowmeter measurement machine from the command line.

mod cli;
mod error_fmt;
mod operator;
mod session;
mod store;
mod transfer;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use eyre::WrapErr;
use serde_json::json;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};
use crate::session::{RunReport, Session};

fn main() {
    let _ = color_eyre::install();
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    if let Err(err) = run(cli) {
        if JSON_MODE.get().copied().unwrap_or(false) {
            println!("{}", format_error_json(&err));
        } else {
            eprintln!("{}", humanize(&err));
        }
        tracing::error!(error = %err, "uflow failed");
        std::process::exit(exit_code_for_error(&err));
    }
}

fn run(cli: Cli) -> eyre::Result<()> {
    let cfg = load_config(&cli.config)?;
    init_logging(&cli, &cfg.logging)?;
    tracing::info!(config = %cli.config.display(), "configuration loaded");

    let seed = match &cli.calibration {
        Some(path) => {
            let cal = uflow_config::load_calibration_csv(path)
                .wrap_err_with(|| format!("load calibration {}", path.display()))?;
            tracing::info!(
                counts_per_ml = cal.counts_per_ml,
                zero_counts = cal.zero_counts,
                "calibration CSV fitted"
            );
            Some(cal.counts_per_ml)
        }
        None => None,
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = shutdown.clone();
        ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed))
            .wrap_err("install Ctrl-C handler")?;
    }

    let session = Session {
        cfg: &cfg,
        state_file: cli.state_file.clone(),
        seed,
        shutdown,
    };

    match cli.cmd {
        Commands::Measure {
            visual_ml,
            cycles,
            direct,
            virtual_time,
            out,
        } => {
            let report = session.measure(visual_ml, cycles, direct, virtual_time, out)?;
            print_done(cli.json, "measure", &report);
        }
        Commands::Calibrate {
            reference_ml,
            virtual_time,
        } => {
            let report = session.calibrate(reference_ml, virtual_time)?;
            print_done(cli.json, "calibrate", &report);
        }
        Commands::Replay {
            input,
            visual_ml,
            out,
        } => {
            let report = session.replay(&input, visual_ml, out)?;
            print_done(cli.json, "replay", &report);
        }
        Commands::SelfCheck => self_check(&cli.state_file, cli.json, &cfg, seed)?,
    }
    Ok(())
}

fn load_config(path: &Path) -> eyre::Result<uflow_config::Config> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("read config {}", path.display()))?;
    let cfg = uflow_config::load_toml(&text)
        .wrap_err_with(|| format!("parse config {}", path.display()))?;
    cfg.validate()
        .wrap_err_with(|| format!("invalid configuration in {}", path.display()))?;
    Ok(cfg)
}

fn init_logging(cli: &Cli, logging: &uflow_config::Logging) -> eyre::Result<()> {
    // RUST_LOG wins over --log-level, which wins over [logging].level.
    let level = effective_level(cli.log_level.as_deref(), logging.level.as_deref());
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .wrap_err_with(|| format!("invalid log level '{level}'"))?;

    // Console logs go to stderr; stdout carries results.
    let console = if cli.json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer().with_writer(std::io::stderr).boxed()
    };

    let file_layer = match &logging.file {
        Some(file) => {
            let path = Path::new(file);
            let dir = path
                .parent()
                .filter(|d| !d.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| eyre::eyre!("logging.file has no file name: {file}"))?;
            let appender = match logging.rotation.as_deref().unwrap_or("never") {
                "daily" => tracing_appender::rolling::daily(dir, name),
                "hourly" => tracing_appender::rolling::hourly(dir, name),
                "never" => tracing_appender::rolling::never(dir, name),
                other => eyre::bail!("logging.rotation must be never|daily|hourly, got {other}"),
            };
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            Some(fmt::layer().json().with_writer(writer).with_ansi(false))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .wrap_err("initialize logging")?;
    Ok(())
}

fn effective_level<'a>(flag: Option<&'a str>, configured: Option<&'a str>) -> &'a str {
    flag.or(configured).unwrap_or("info")
}

fn print_done(json_mode: bool, command: &str, report: &RunReport) {
    let o = &report.outcome;
    let cal = &report.calibration;
    if json_mode {
        println!(
            "{}",
            json!({
                "command": command,
                "status": "ok",
                "cycles": o.cycles,
                "ticks": o.ticks,
                "final_state": o.final_state.name(),
                "counts_per_ml": cal.counts_per_ml,
                "zero_counts": cal.zero_counts,
            })
        );
    } else {
        match command {
            "calibrate" => println!(
                "calibration complete: {:.3} counts/mL (zero {})",
                cal.counts_per_ml, cal.zero_counts
            ),
            _ => println!(
                "{command} complete: {} cycle(s) in {} ticks",
                o.cycles, o.ticks
            ),
        }
    }
}

fn self_check(
    state_file: &Path,
    json_mode: bool,
    cfg: &uflow_config::Config,
    seed: Option<f32>,
) -> eyre::Result<()> {
    let persisted = store::read_persisted(state_file.to_path_buf())
        .map_err(|e| eyre::eyre!("{e}"))
        .wrap_err("read calibration state")?;
    let counts_per_ml = persisted
        .or(seed)
        .or(cfg.persisted.map(|p| p.counts_per_ml))
        .unwrap_or(cfg.calibration.counts_per_ml);
    if !(counts_per_ml.is_finite() && counts_per_ml > 0.0) {
        eyre::bail!("persisted strain gauge scale is invalid ({counts_per_ml})");
    }
    let period_ms = uflow_core::util::period_ms(cfg.sampling.sample_rate_hz);
    tracing::info!(counts_per_ml, period_ms, "self-check passed");
    if json_mode {
        println!(
            "{}",
            json!({
                "command": "self-check",
                "status": "ok",
                "counts_per_ml": counts_per_ml,
                "period_ms": period_ms,
                "buffer_len": cfg.sampling.buffer_len,
            })
        );
    } else {
        println!("OK: {counts_per_ml:.3} counts/mL, {period_ms} ms per sample");
    }
    Ok(())
}
