//! Metrics sinks handed to the driver.

use std::collections::BTreeMap;
use std::time::Duration;
use log::{debug, info};
use crate::error::Stage;
use super::driver::IterationReport;
use super::stabilize::StabilizerTrial;
use super::traits::MetricsSink;

/// Forwards everything to the `log` facade.
#[derive(Copy, Clone, Debug, Default)]
pub struct LogMetrics;

impl MetricsSink for LogMetrics {
    fn stage_finished(&mut self, stage: Stage, elapsed: Duration) {
        debug!("stage {} took {:.3?}", stage, elapsed);
    }

    fn trial_recorded(&mut self, iteration: usize, trial: &StabilizerTrial) {
        debug!(
            "iteration {} trial: shift {:.4e}, cost {:.8}",
            iteration, trial.shift, trial.cost
        );
    }

    fn iteration_finished(&mut self, report: &IterationReport) {
        info!(
            "iteration {}: E = {:.6} (var {:.6}), cost {:.8} -> {:.8}, shift {:.4e}, max change {:.3e}",
            report.iteration,
            report.energy,
            report.variance,
            report.start_cost,
            report.cost,
            report.shift,
            report.max_change
        );
    }
}

/// Keeps per-stage totals and every report in memory.
#[derive(Clone, Debug, Default)]
pub struct RecordingMetrics {
    pub stage_time: BTreeMap<Stage, Duration>,
    pub stage_calls: BTreeMap<Stage, usize>,
    pub trials: Vec<(usize, StabilizerTrial)>,
    pub reports: Vec<IterationReport>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self, stage: Stage) -> Duration {
        self.stage_time.get(&stage).copied().unwrap_or_default()
    }

    pub fn calls(&self, stage: Stage) -> usize {
        self.stage_calls.get(&stage).copied().unwrap_or(0)
    }

    /// One line per stage, in execution order.
    pub fn summary(&self) -> String {
        Stage::ALL
            .iter()
            .map(|s| format!("{:<18} {:>5} calls  {:.3?}", s.name(), self.calls(*s), self.total(*s)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl MetricsSink for RecordingMetrics {
    fn stage_finished(&mut self, stage: Stage, elapsed: Duration) {
        *self.stage_time.entry(stage).or_default() += elapsed;
        *self.stage_calls.entry(stage).or_default() += 1;
    }

    fn trial_recorded(&mut self, iteration: usize, trial: &StabilizerTrial) {
        self.trials.push((iteration, trial.clone()));
    }

    fn iteration_finished(&mut self, report: &IterationReport) {
        self.reports.push(report.clone());
    }
}

/// Discards everything.
#[derive(Copy, Clone, Debug, Default)]
pub struct NullMetrics;

impl MetricsSink for NullMetrics {
    fn stage_finished(&mut self, _stage: Stage, _elapsed: Duration) {}
}
