//! Weighted-stage progress aggregation.
//!
//! Each pipeline stage registers a weight; the reported value is the
//! weighted sum of per-stage fractions, clamped to be monotone so a
//! host progress bar never runs backwards.

use std::sync::{Arc, Mutex};

/// Host-facing progress callback, fed values in `0.0..=1.0`
pub type ReportProgress = Arc<dyn Fn(f64) + Send + Sync>;

struct ProgressState {
    /// `(weight, fraction)` per registered stage
    stages: Vec<(f64, f64)>,
    reported: f64,
}

pub struct Progress {
    report: ReportProgress,
    state: Mutex<ProgressState>,
}

impl Progress {
    pub fn new(report: ReportProgress) -> Arc<Self> {
        Arc::new(Self {
            report,
            state: Mutex::new(ProgressState {
                stages: Vec::new(),
                reported: 0.0,
            }),
        })
    }

    /// Callback that swallows progress, for hosts that do not care
    pub fn sink() -> Arc<Self> {
        Self::new(Arc::new(|_| {}))
    }

    /// Register a stage worth `weight` of the total
    pub fn stage(self: &Arc<Self>, weight: f64) -> StageProgress {
        let index = {
            let mut state = self.state.lock().expect("progress lock");
            state.stages.push((weight, 0.0));
            state.stages.len() - 1
        };
        StageProgress {
            progress: Arc::clone(self),
            index,
        }
    }

    fn submit(&self, index: usize, fraction: f64) {
        let value = {
            let mut state = self.state.lock().expect("progress lock");
            let fraction = fraction.clamp(0.0, 1.0);
            let slot = &mut state.stages[index];
            // Per-stage monotone too: parallel workers may report late
            if fraction > slot.1 {
                slot.1 = fraction;
            }
            let sum: f64 = state.stages.iter().map(|(w, f)| w * f).sum();
            if sum > state.reported {
                state.reported = sum;
                Some(sum)
            } else {
                None
            }
        };
        if let Some(value) = value {
            (self.report)(value);
        }
    }
}

/// Handle for one registered stage
#[derive(Clone)]
pub struct StageProgress {
    progress: Arc<Progress>,
    index: usize,
}

impl StageProgress {
    pub fn set(&self, fraction: f64) {
        self.progress.submit(self.index, fraction);
    }

    pub fn done(&self) {
        self.set(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording() -> (Arc<Progress>, Arc<Mutex<Vec<f64>>>) {
        let values = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&values);
        let progress = Progress::new(Arc::new(move |value| {
            sink.lock().unwrap().push(value);
        }));
        (progress, values)
    }

    #[test]
    fn test_weighted_sum() {
        let (progress, values) = recording();
        let unzip = progress.stage(0.05);
        let spine = progress.stage(0.80);

        unzip.done();
        spine.set(0.5);

        let values = values.lock().unwrap();
        assert!((values[0] - 0.05).abs() < 1e-9);
        assert!((values[1] - 0.45).abs() < 1e-9);
    }

    #[test]
    fn test_progress_never_regresses() {
        let (progress, values) = recording();
        let stage = progress.stage(1.0);
        stage.set(0.6);
        stage.set(0.3); // late report, swallowed
        stage.set(0.9);
        stage.done();

        let values = values.lock().unwrap();
        assert_eq!(values.as_slice(), &[0.6, 0.9, 1.0]);
    }

    #[test]
    fn test_full_pipeline_reaches_one() {
        let (progress, values) = recording();
        let stages = [
            progress.stage(0.05),
            progress.stage(0.10),
            progress.stage(0.80),
            progress.stage(0.05),
        ];
        for stage in &stages {
            stage.done();
        }
        let values = values.lock().unwrap();
        assert!((values.last().unwrap() - 1.0).abs() < 1e-9);
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_out_of_range_fractions_clamped() {
        let (progress, values) = recording();
        let stage = progress.stage(1.0);
        stage.set(7.0);
        let values = values.lock().unwrap();
        assert_eq!(values.as_slice(), &[1.0]);
    }
}
