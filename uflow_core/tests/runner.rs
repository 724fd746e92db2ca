//! Driving the machine from a scale: direct reads on a virtual clock, and a
//! paced sampler thread in real time.
mod common;

use common::{FakeOperator, FakeTransfer, Rig, synthetic_void};
use uflow_core::MeasurementState::*;
use uflow_core::config::MachineCfg;
use uflow_core::runner::{RunParams, SamplingMode, Until, run};
use uflow_core::{FaultReason, MeasurementMachine, UflowError};
use uflow_hardware::{ReplayScale, SimParams, SimulatedScale};

fn direct(until: Until) -> RunParams {
    RunParams {
        mode: SamplingMode::Direct,
        until,
        max_ticks: Some(2_000),
        stop_on_fault: true,
    }
}

#[test]
fn direct_run_completes_a_simulated_cycle() {
    let mut rig = Rig::new(MachineCfg::default());
    let scale = SimulatedScale::new(SimParams::default());
    {
        let mut op = rig.operator.borrow_mut();
        op.sim = Some(scale.control());
        op.start_on_standby = true;
    }

    let out = run(&mut rig.machine, scale, &direct(Until::Cycles(1))).unwrap();

    assert_eq!(out.cycles, 1);
    assert_eq!(out.final_state, Standby);
    assert!(out.last_fault.is_none());
    // One virtual sample period per tick.
    assert_eq!(rig.clock.elapsed().as_millis(), u128::from(out.ticks - 1) * 100);
    assert_eq!(rig.sent()[0].summary.start_t, Some(56));
}

#[test]
fn replayed_session_gives_the_same_summary() {
    let mut samples = vec![1_200; 12];
    samples.extend(synthetic_void());
    let mut rig = Rig::new(MachineCfg::default());
    rig.operator.borrow_mut().start_on_standby = true;

    let out = run(
        &mut rig.machine,
        ReplayScale::new(samples),
        &direct(Until::Cycles(1)),
    )
    .unwrap();

    assert_eq!(out.cycles, 1);
    let s = rig.sent()[0].summary.clone();
    assert_eq!(s.start_t, Some(7));
    assert_eq!(s.end_t, Some(25));
}

#[test]
fn exhausted_replay_faults_on_silence() {
    let mut rig = Rig::new(MachineCfg::default());
    rig.operator.borrow_mut().start_on_standby = true;

    let err = run(
        &mut rig.machine,
        ReplayScale::new(vec![1_200; 5]),
        &direct(Until::Cycles(1)),
    )
    .unwrap_err();

    match err.downcast_ref::<UflowError>() {
        Some(UflowError::Fault(f)) => {
            assert_eq!(f.reason, FaultReason::NoSample);
            assert_eq!(f.state, Tare);
        }
        other => panic!("expected a NoSample fault, got {other:?}"),
    }
}

#[test]
fn acknowledged_faults_retry_until_the_budget_is_spent() {
    let mut rig = Rig::new(MachineCfg::default());
    {
        let mut op = rig.operator.borrow_mut();
        op.start_on_standby = true;
        op.ack_faults = true;
    }
    let params = RunParams {
        stop_on_fault: false,
        ..direct(Until::Cycles(1))
    };

    let out = run(&mut rig.machine, ReplayScale::new(vec![1_200; 5]), &params).unwrap();

    // Three retries are allowed; the fourth acknowledgement powers off.
    assert_eq!(out.final_state, PowerOff);
    assert_eq!(out.cycles, 0);
    assert_eq!(out.last_fault.unwrap().reason, FaultReason::NoSample);
    assert_eq!(rig.operator.borrow().faults.len(), 4);
}

#[test]
fn idle_run_stops_at_tick_budget() {
    let mut rig = Rig::new(MachineCfg::default());
    let params = RunParams {
        max_ticks: Some(50),
        ..direct(Until::PowerOff)
    };
    let err = run(
        &mut rig.machine,
        SimulatedScale::new(SimParams::default()),
        &params,
    )
    .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<UflowError>(),
        Some(UflowError::TickBudget(50))
    ));
    assert_eq!(rig.state(), Standby);
}

#[test]
fn paced_run_calibrates_in_real_time() {
    let mut cfg = MachineCfg::default();
    cfg.sampling.sample_rate_hz = 200;
    let scale = SimulatedScale::new(SimParams {
        counts_per_ml: 18.0,
        sample_rate_hz: 200,
        ..SimParams::default()
    });
    let (transfer, _) = FakeTransfer::new();
    let (operator, olog) = FakeOperator::new();
    {
        let mut op = olog.borrow_mut();
        op.sim = Some(scale.control());
        op.calibrate_on_standby = Some(250.0);
    }
    let mut machine = MeasurementMachine::builder()
        .with_transfer(transfer)
        .with_operator(operator)
        .with_config(cfg)
        .build()
        .unwrap();

    let params = RunParams {
        mode: SamplingMode::Paced(200),
        until: Until::Calibrated,
        max_ticks: Some(20_000),
        stop_on_fault: true,
    };
    let out = run(&mut machine, scale, &params).unwrap();

    assert_eq!(out.final_state, Standby);
    assert_eq!(machine.calibrations_completed(), 1);
    assert!((machine.calibration().counts_per_ml - 18.0).abs() < 1e-3);
}
