//! Random operator input and sensor noise never break the sequencing rules.
mod common;

use common::Rig;
use proptest::prelude::*;
use uflow_core::MeasurementState::*;
use uflow_core::config::MachineCfg;
use uflow_core::{OperatorEvent, StepStatus};

fn event() -> impl Strategy<Value = OperatorEvent> {
    prop_oneof![
        4 => Just(OperatorEvent::Start),
        2 => Just(OperatorEvent::Acknowledge),
        1 => Just(OperatorEvent::Abort),
        1 => Just(OperatorEvent::CalibrationReady),
        1 => Just(OperatorEvent::Calibrate { reference_ml: 100.0 }),
    ]
}

fn sample() -> impl Strategy<Value = Option<i16>> {
    prop_oneof![
        1 => Just(None),
        6 => (1_100i16..2_400).prop_map(Some),
        1 => any::<i16>().prop_map(Some),
    ]
}

fn small_cfg() -> MachineCfg {
    let mut cfg = MachineCfg::default();
    cfg.sampling.buffer_len = 64;
    cfg.calibration.tare_samples = 3;
    cfg.calibration.max_tare_spread = 2_000;
    cfg.flow.settle_samples = 1;
    cfg.timeouts.onset_ms = 3_000;
    cfg.timeouts.calibration_ms = 3_000;
    cfg.safety.retry_budget = 1_000;
    cfg
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn acquire_is_only_reached_through_onset(
        ticks in prop::collection::vec((sample(), prop::option::weighted(0.1, event())), 1..400),
    ) {
        let mut rig = Rig::new(small_cfg());
        for (s, ev) in ticks {
            if let Some(e) = ev {
                rig.push(e);
            }
            let before = rig.state();
            let status = rig.tick(s);
            if rig.state() == Acquire {
                prop_assert!(rig.machine.summary().start_t.is_some());
                if before != Acquire {
                    prop_assert_eq!(before, WaitFor10ml);
                    prop_assert_eq!(status, StepStatus::Transition(Acquire));
                }
            }
            if rig.state() == ErrorState {
                prop_assert!(rig.machine.fault().is_some());
            }
        }
        for rec in rig.sent() {
            prop_assert!(rec.summary.start_t.is_some());
            prop_assert!(rec.summary.end_t.is_some());
            prop_assert!(rec.summary.q_max_ml_s.is_some());
            prop_assert!(rec.summary.final_volume_ml > 0.0);
            prop_assert!(rec.outliers.len() <= 20);
        }
    }
}
