//! Streaming peak-flow qualification.
//!
//! Flow samples arrive one per index in increasing order. The qualifier keeps
//! the best candidate seen so far and finalizes it into the summary only once
//! flow has *sustainably* ended: `settle_samples` consecutive samples above the
//! end-of-flow threshold establish onset, and `settle_samples` consecutive
//! samples below it after onset establish offset. A dip shorter than that does
//! not finalize, so a multi-hump curve still reports its global maximum.
//!
//! Once settled the qualifier ignores further samples until `reset()`.

use crate::summary::SummaryData;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakCandidate {
    pub flow_ml_s: f32,
    pub ndx: usize,
}

#[derive(Debug, Clone)]
pub struct PeakQualifier {
    end_flow_ml_s: f32,
    settle_samples: usize,
    candidate: Option<PeakCandidate>,
    above_run: usize,
    below_run: usize,
    below_start: Option<usize>,
    onset_ndx: Option<usize>,
    offset_ndx: Option<usize>,
    last_ndx: Option<usize>,
    settled: bool,
}

impl PeakQualifier {
    pub fn new(end_flow_ml_s: f32, settle_samples: usize) -> Self {
        Self {
            end_flow_ml_s,
            settle_samples: settle_samples.max(1),
            candidate: None,
            above_run: 0,
            below_run: 0,
            below_start: None,
            onset_ndx: None,
            offset_ndx: None,
            last_ndx: None,
            settled: false,
        }
    }

    /// Forget everything; start a new measurement cycle.
    pub fn reset(&mut self) {
        *self = Self::new(self.end_flow_ml_s, self.settle_samples);
    }

    /// Feed the flow at `ndx`. Returns `true` once the peak is settled and
    /// written to `summary`.
    pub fn qualify(&mut self, flow_ml_s: f32, ndx: usize, summary: &mut SummaryData) -> bool {
        if self.settled {
            return true;
        }
        if self.last_ndx.is_some_and(|last| ndx <= last) {
            tracing::warn!(ndx, last = ?self.last_ndx, "flow sample out of order; ignored");
            return false;
        }
        if !flow_ml_s.is_finite() {
            tracing::warn!(ndx, "non-finite flow sample; ignored");
            return false;
        }
        self.last_ndx = Some(ndx);

        if flow_ml_s > 0.0 && self.candidate.is_none_or(|c| flow_ml_s > c.flow_ml_s) {
            self.candidate = Some(PeakCandidate { flow_ml_s, ndx });
        }

        if flow_ml_s < self.end_flow_ml_s {
            self.above_run = 0;
            if self.below_run == 0 {
                self.below_start = Some(ndx);
            }
            self.below_run += 1;
            if self.onset_ndx.is_some()
                && self.candidate.is_some()
                && self.below_run >= self.settle_samples
            {
                self.offset_ndx = self.below_start;
                self.write(summary);
                tracing::debug!(
                    q_max = ?summary.q_max_ml_s,
                    max_ndx = ?summary.max_ndx,
                    offset = ?self.offset_ndx,
                    "peak settled"
                );
            }
        } else {
            self.below_run = 0;
            self.below_start = None;
            self.above_run += 1;
            if self.onset_ndx.is_none() && self.above_run >= self.settle_samples {
                self.onset_ndx = Some(ndx + 1 - self.settle_samples);
                tracing::debug!(onset = ?self.onset_ndx, "flow onset");
            }
        }
        self.settled
    }

    /// Settle now with whatever is known. Without a candidate the summary gets
    /// the no-peak sentinel (`None`). No-op when already settled.
    pub fn finalize(&mut self, summary: &mut SummaryData) {
        if self.settled {
            return;
        }
        if self.below_run > 0 {
            self.offset_ndx = self.below_start;
        }
        self.write(summary);
    }

    fn write(&mut self, summary: &mut SummaryData) {
        summary.q_max_ml_s = self.candidate.map(|c| c.flow_ml_s);
        summary.max_ndx = self.candidate.map(|c| c.ndx);
        self.settled = true;
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }

    pub fn candidate(&self) -> Option<PeakCandidate> {
        self.candidate
    }

    /// First index of the sustained above-threshold run.
    pub fn onset_ndx(&self) -> Option<usize> {
        self.onset_ndx
    }

    /// First index of the sustained below-threshold run that ended the flow.
    pub fn offset_ndx(&self) -> Option<usize> {
        self.offset_ndx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(q: &mut PeakQualifier, flows: &[f32]) -> SummaryData {
        let mut s = SummaryData::default();
        for (i, &f) in flows.iter().enumerate() {
            q.qualify(f, i, &mut s);
        }
        s
    }

    #[test]
    fn settles_after_sustained_drop() {
        let mut q = PeakQualifier::new(2.0, 2);
        let s = run(&mut q, &[0.0, 5.0, 9.0, 14.0, 8.0, 1.0, 0.5, 0.0]);
        assert!(q.is_settled());
        assert_eq!(s.q_max_ml_s, Some(14.0));
        assert_eq!(s.max_ndx, Some(3));
        assert_eq!(q.onset_ndx(), Some(1));
        assert_eq!(q.offset_ndx(), Some(5));
    }

    #[test]
    fn short_dip_does_not_finalize() {
        let mut q = PeakQualifier::new(2.0, 3);
        let s = run(
            &mut q,
            &[4.0, 8.0, 12.0, 1.0, 1.0, 10.0, 20.0, 6.0, 0.0, 0.0, 0.0],
        );
        assert_eq!(s.q_max_ml_s, Some(20.0));
        assert_eq!(s.max_ndx, Some(6));
        assert_eq!(q.offset_ndx(), Some(8));
    }

    #[test]
    fn finalize_without_candidate_writes_sentinel() {
        let mut q = PeakQualifier::new(2.0, 3);
        let mut s = SummaryData {
            q_max_ml_s: Some(99.0),
            max_ndx: Some(7),
            ..SummaryData::default()
        };
        q.qualify(0.0, 0, &mut s);
        q.finalize(&mut s);
        assert!(q.is_settled());
        assert_eq!(s.q_max_ml_s, None);
        assert_eq!(s.max_ndx, None);
    }

    #[test]
    fn out_of_order_and_non_finite_samples_are_ignored() {
        let mut q = PeakQualifier::new(2.0, 1);
        let mut s = SummaryData::default();
        q.qualify(5.0, 3, &mut s);
        q.qualify(50.0, 2, &mut s);
        q.qualify(f32::NAN, 4, &mut s);
        assert_eq!(q.candidate(), Some(PeakCandidate { flow_ml_s: 5.0, ndx: 3 }));
    }

    #[test]
    fn reset_starts_a_new_cycle() {
        let mut q = PeakQualifier::new(2.0, 1);
        let _ = run(&mut q, &[6.0, 0.0]);
        assert!(q.is_settled());
        q.reset();
        assert!(!q.is_settled());
        assert_eq!(q.candidate(), None);
        let s = run(&mut q, &[3.0, 0.0]);
        assert_eq!(s.q_max_ml_s, Some(3.0));
    }
}
