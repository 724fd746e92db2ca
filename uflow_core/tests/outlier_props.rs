//! Properties of the neighbourhood outlier filter.
use proptest::prelude::*;
use uflow_core::config::OutlierCfg;
use uflow_core::outlier::{OutlierFilter, OutlierRecord};

fn filter() -> OutlierFilter {
    let mut f = OutlierFilter::new(OutlierCfg::default(), 64);
    f.reset(0);
    f
}

/// Non-decreasing buffer: `base` plus accumulated steps of at most 8 counts.
fn monotone(base: i16, steps: &[i16]) -> Vec<i16> {
    let mut v = base;
    let mut out = vec![v];
    for s in steps {
        v += s;
        out.push(v);
    }
    out
}

proptest! {
    #[test]
    fn smooth_buffers_are_left_alone(
        base in 0i16..1000,
        steps in prop::collection::vec(0i16..=8, 0..60),
    ) {
        let mut buf = monotone(base, &steps);
        let before = buf.clone();
        let mut f = filter();
        prop_assert_eq!(f.remove_outliers(&mut buf), 0);
        prop_assert_eq!(buf, before);
        prop_assert!(f.is_empty());
    }

    #[test]
    fn single_spike_is_the_only_correction(
        base in 100i16..1000,
        steps in prop::collection::vec(0i16..=8, 4..60),
        pick in any::<prop::sample::Index>(),
        up in any::<bool>(),
    ) {
        let mut buf = monotone(base, &steps);
        let k = 1 + pick.index(buf.len() - 2);
        let spiked = if up { buf[k] + 5_000 } else { buf[k] - 5_000 };
        buf[k] = spiked;
        let before = buf.clone();

        let mut f = filter();
        prop_assert_eq!(f.remove_outliers(&mut buf), 1);
        prop_assert_eq!(f.records(), &[OutlierRecord { ndx: k, raw: spiked }][..]);
        prop_assert_eq!(f.original_data(&buf, k), Some(spiked));
        prop_assert!(buf[k] >= before[k - 1] && buf[k] <= before[k + 1]);
        for i in (0..buf.len()).filter(|&i| i != k) {
            prop_assert_eq!(buf[i], before[i], "index {} changed", i);
            prop_assert_eq!(f.original_data(&buf, i), Some(before[i]));
        }

        // A second pass finds nothing and keeps the table.
        prop_assert_eq!(f.remove_outliers(&mut buf), 0);
        prop_assert_eq!(f.len(), 1);
    }

    #[test]
    fn incremental_filtering_matches_one_pass(
        base in 100i16..1000,
        steps in prop::collection::vec(0i16..=8, 4..60),
        pick in any::<prop::sample::Index>(),
    ) {
        let mut whole = monotone(base, &steps);
        let k = 1 + pick.index(whole.len() - 2);
        whole[k] += 5_000;

        let mut streamed = Vec::new();
        let mut f = filter();
        for &s in &whole {
            streamed.push(s);
            if streamed.len() >= 2 {
                let ndx = streamed.len() - 2;
                f.check_at(&mut streamed, ndx);
            }
        }
        let last = streamed.len() - 1;
        f.check_at(&mut streamed, last);

        let mut g = filter();
        g.remove_outliers(&mut whole);
        prop_assert_eq!(streamed, whole);
        prop_assert_eq!(f.records(), g.records());
    }
}

#[test]
fn single_sample_is_never_corrected() {
    let mut f = filter();
    let mut buf = [30_000];
    assert_eq!(f.remove_outliers(&mut buf), 0);
    assert_eq!(buf, [30_000]);
    assert_eq!(f.original_data(&buf, 1), None);
}
