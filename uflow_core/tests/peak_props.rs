//! Properties of the streaming peak qualifier.
use proptest::prelude::*;
use uflow_core::{PeakQualifier, SummaryData};

const END_FLOW: f32 = 2.0;
const SETTLE: usize = 3;

/// Strictly increasing flows above the end-of-flow threshold.
fn rise(steps: &[u8]) -> Vec<f32> {
    let mut v = END_FLOW;
    steps
        .iter()
        .map(|&s| {
            v += f32::from(s);
            v
        })
        .collect()
}

/// Strictly decreasing flows from just under `peak`.
fn fall(peak: f32, steps: &[u8]) -> Vec<f32> {
    let mut v = peak;
    steps
        .iter()
        .map(|&s| {
            v -= f32::from(s);
            v
        })
        .collect()
}

fn feed(q: &mut PeakQualifier, s: &mut SummaryData, flows: &[f32], from: usize) -> bool {
    let mut settled = false;
    for (i, &f) in flows.iter().enumerate() {
        settled = q.qualify(f, from + i, s);
    }
    settled
}

proptest! {
    #[test]
    fn single_hump_reports_its_maximum(
        up in prop::collection::vec(1u8..=10, 3..20),
        down in prop::collection::vec(1u8..=10, 0..20),
    ) {
        let r = rise(&up);
        let peak = *r.last().unwrap();
        let mut flows = r.clone();
        flows.extend(fall(peak, &down));
        flows.extend([0.0; SETTLE]);

        let mut q = PeakQualifier::new(END_FLOW, SETTLE);
        let mut s = SummaryData::default();
        prop_assert!(feed(&mut q, &mut s, &flows, 0));
        prop_assert_eq!(s.q_max_ml_s, Some(peak));
        prop_assert_eq!(s.max_ndx, Some(r.len() - 1));
        prop_assert_eq!(q.onset_ndx(), Some(0));
    }

    #[test]
    fn lower_second_hump_never_replaces_the_first(
        up in prop::collection::vec(1u8..=10, 3..15),
        dip in 1usize..SETTLE,
        frac in 0.1f32..0.9,
    ) {
        let first = rise(&up);
        let p1 = *first.last().unwrap();
        let p2 = END_FLOW + (p1 - END_FLOW) * frac;
        prop_assume!(p2 < p1);

        let mut flows = first.clone();
        flows.extend(std::iter::repeat_n(0.5, dip));
        flows.extend([END_FLOW + 1.0, p2, END_FLOW + 1.0]);
        flows.extend([0.0; SETTLE]);

        let mut q = PeakQualifier::new(END_FLOW, SETTLE);
        let mut s = SummaryData::default();
        prop_assert!(feed(&mut q, &mut s, &flows, 0));
        prop_assert_eq!(s.q_max_ml_s, Some(p1));
        prop_assert_eq!(s.max_ndx, Some(first.len() - 1));
        // The short dip did not end the flow; the final run did.
        prop_assert_eq!(q.offset_ndx(), Some(flows.len() - SETTLE));
    }

    #[test]
    fn qualify_after_settling_changes_nothing(
        up in prop::collection::vec(1u8..=10, 3..15),
        extra in prop::collection::vec(0.0f32..1000.0, 1..20),
    ) {
        let mut flows = rise(&up);
        flows.extend([0.0; SETTLE]);
        let mut q = PeakQualifier::new(END_FLOW, SETTLE);
        let mut s = SummaryData::default();
        prop_assert!(feed(&mut q, &mut s, &flows, 0));
        let settled = s.clone();

        prop_assert!(feed(&mut q, &mut s, &extra, flows.len()));
        q.finalize(&mut s);
        prop_assert_eq!(s, settled);
    }

    #[test]
    fn one_low_sample_never_finalizes(flow in -5.0f32..END_FLOW) {
        let mut q = PeakQualifier::new(END_FLOW, SETTLE);
        let mut s = SummaryData::default();
        prop_assert!(!q.qualify(flow, 0, &mut s));
        prop_assert_eq!(s.q_max_ml_s, None);
        prop_assert_eq!(s.max_ndx, None);
    }
}
