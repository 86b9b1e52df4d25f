pub mod raccoon;

use crate::report::{Report, ReportState};
use tracing::debug;

/// Post-scan analysis over the accumulated report. Runs on the coordinator
/// after the scheduler has terminated, so writes stay single-threaded.
pub trait AfterAnalysis: Send + Sync {
    fn name(&self) -> &'static str;

    fn analyze(&self, state: &mut ReportState);
}

pub fn default_analyses() -> Vec<Box<dyn AfterAnalysis>> {
    vec![Box::new(raccoon::RaccoonAnalysis)]
}

pub fn run_analyses(report: &Report, analyses: &[Box<dyn AfterAnalysis>]) {
    for analysis in analyses {
        debug!(analysis = analysis.name(), "running after-analysis");
        report.with_state_mut(|state| analysis.analyze(state));
    }
}
