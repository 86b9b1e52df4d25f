pub mod pool;
pub mod scheduler;

use crate::analysis::{default_analyses, run_analyses, AfterAnalysis};
use crate::executor::{ConnectivityStatus, ScriptExecutor};
use crate::model::{Config, TargetView};
use crate::probe::{default_probes, Probe};
use crate::report::Report;
use scheduler::Scheduler;
use std::sync::Arc;
use tracing::{info, warn};

/// Whole-scan driver: connectivity gate, probe scheduling, after-analysis.
pub struct Engine {
    cfg: Arc<Config>,
    target: TargetView,
    executor: Arc<dyn ScriptExecutor>,
    probes: Vec<Probe>,
    analyses: Vec<Box<dyn AfterAnalysis>>,
}

impl Engine {
    pub fn new(cfg: Config, target: TargetView, executor: Arc<dyn ScriptExecutor>) -> Self {
        let cfg = Arc::new(cfg);
        let probes = default_probes(&cfg);
        Self {
            cfg,
            target,
            executor,
            probes,
            analyses: default_analyses(),
        }
    }

    /// Engine over an explicit probe set and analysis list.
    pub fn with_parts(
        cfg: Config,
        target: TargetView,
        executor: Arc<dyn ScriptExecutor>,
        probes: Vec<Probe>,
        analyses: Vec<Box<dyn AfterAnalysis>>,
    ) -> Self {
        Self {
            cfg: Arc::new(cfg),
            target,
            executor,
            probes,
            analyses,
        }
    }

    /// A scan always terminates and always yields a report, even when the
    /// target is unreachable or individual probes misbehave.
    pub async fn run(self) -> Report {
        let report = Report::new(self.target.clone());
        info!(host = %self.target.host, port = self.target.port, "starting scan");

        match self.executor.connectivity().await {
            ConnectivityStatus::Unreachable => {
                warn!(host = %self.target.host, "target is unreachable");
                report.set_server_alive(false);
                report.finish();
                return report;
            }
            ConnectivityStatus::NoTls => {
                warn!(host = %self.target.host, "target does not speak TLS");
                report.set_server_alive(true);
                report.set_speaks_tls(false);
                report.finish();
                return report;
            }
            ConnectivityStatus::SpeaksTls => {
                report.set_server_alive(true);
                report.set_speaks_tls(true);
            }
        }

        let scheduler = Scheduler::new(self.cfg.clone());
        scheduler.run(self.probes, &report, self.executor).await;
        run_analyses(&report, &self.analyses);
        report.finish();
        info!(host = %self.target.host, "finished scan");
        report
    }
}
