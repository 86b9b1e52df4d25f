use super::pool::{TaskHandle, WorkerPool};
use crate::executor::ScriptExecutor;
use crate::model::{Config, Outcome, ProbeId, ProbeStatus, Property};
use crate::probe::{Probe, ProbeContext, ProbeFindings};
use crate::report::Report;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, warn};

struct RunningProbe {
    id: ProbeId,
    declared: Vec<Property>,
    handle: TaskHandle<anyhow::Result<ProbeFindings>>,
    dispatched: Instant,
}

/// Dependency-aware concurrent probe driver. One coordinating task runs the
/// dispatch/collect/stall passes; probe bodies execute on the worker pool.
pub struct Scheduler {
    cfg: Arc<Config>,
    pool: WorkerPool,
}

impl Scheduler {
    pub fn new(cfg: Arc<Config>) -> Self {
        Self {
            pool: WorkerPool::new(cfg.concurrency),
            cfg,
        }
    }

    /// Drive every probe to a terminal state. Terminates when nothing is
    /// running and no pending probe's requirement can newly become true;
    /// whatever remains pending is recorded as skipped with its missing
    /// requirement and merged as `CouldNotTest`.
    pub async fn run(
        &self,
        probes: Vec<Probe>,
        report: &Report,
        executor: Arc<dyn ScriptExecutor>,
    ) {
        let mut pending = probes;
        let mut running: Vec<RunningProbe> = Vec::new();

        loop {
            let mut progressed = self.dispatch(&mut pending, &mut running, report, &executor);
            progressed |= self.collect(&mut running, report).await;
            progressed |= self.kill_stalled(&mut running, report);
            if progressed {
                // A merge may have unblocked pending probes; rescan the full
                // set instead of sleeping. The probe count is tens, not
                // thousands.
                continue;
            }
            if running.is_empty() {
                break;
            }
            self.backoff().await;
        }

        for probe in pending {
            let missing = probe.requirement.missing(&report.snapshot());
            warn!(probe = %probe.id, missing = %missing, "probe requirement never satisfied");
            report.record_skipped(probe.id, missing);
            report.merge_outcome(
                probe.id,
                &probe.declared,
                Outcome::CouldNotTest,
                ProbeStatus::Skipped,
                Duration::ZERO,
            );
        }
    }

    fn dispatch(
        &self,
        pending: &mut Vec<Probe>,
        running: &mut Vec<RunningProbe>,
        report: &Report,
        executor: &Arc<dyn ScriptExecutor>,
    ) -> bool {
        let snapshot = report.snapshot();
        let mut dispatched = false;
        let mut idx = 0;
        while idx < pending.len() {
            if !pending[idx].requirement.evaluate(&snapshot) {
                idx += 1;
                continue;
            }
            let probe = pending.remove(idx);
            debug!(probe = %probe.id, "dispatching probe");
            let ctx = ProbeContext {
                config: self.cfg.clone(),
                executor: executor.clone(),
                snapshot: report.snapshot(),
            };
            let runner = probe.runner.clone();
            let handle = self.pool.submit(async move { runner.run(ctx).await });
            running.push(RunningProbe {
                id: probe.id,
                declared: probe.declared,
                handle,
                dispatched: Instant::now(),
            });
            dispatched = true;
        }
        dispatched
    }

    async fn collect(&self, running: &mut Vec<RunningProbe>, report: &Report) -> bool {
        let mut merged = false;
        let mut idx = 0;
        while idx < running.len() {
            if !running[idx].handle.is_finished() {
                idx += 1;
                continue;
            }
            let probe = running.remove(idx);
            let duration = probe.dispatched.elapsed();
            match probe.handle.join().await {
                Ok(Ok(findings)) => {
                    debug!(probe = %probe.id, ms = duration.as_millis() as u64, "probe completed");
                    report.merge(
                        probe.id,
                        &probe.declared,
                        findings,
                        ProbeStatus::Completed,
                        duration,
                    );
                }
                Ok(Err(err)) => {
                    error!(probe = %probe.id, error = %err, "probe failed");
                    report.merge_outcome(
                        probe.id,
                        &probe.declared,
                        Outcome::ErrorDuringTest,
                        ProbeStatus::Failed,
                        duration,
                    );
                }
                Err(join_err) if join_err.is_cancelled() => {
                    report.merge_outcome(
                        probe.id,
                        &probe.declared,
                        Outcome::Timeout,
                        ProbeStatus::Killed,
                        duration,
                    );
                }
                Err(join_err) => {
                    error!(probe = %probe.id, error = %join_err, "probe panicked");
                    report.merge_outcome(
                        probe.id,
                        &probe.declared,
                        Outcome::ErrorDuringTest,
                        ProbeStatus::Failed,
                        duration,
                    );
                }
            }
            merged = true;
        }
        merged
    }

    /// Each in-flight probe carries its own inactivity timer; a kill never
    /// re-targets an already removed task and never waits for the aborted
    /// task to actually stop.
    fn kill_stalled(&self, running: &mut Vec<RunningProbe>, report: &Report) -> bool {
        let mut killed = false;
        let mut idx = 0;
        while idx < running.len() {
            if running[idx].dispatched.elapsed() < self.cfg.probe_timeout {
                idx += 1;
                continue;
            }
            let probe = running.remove(idx);
            warn!(probe = %probe.id, "probe exceeded its inactivity bound, killing");
            probe.handle.cancel();
            report.merge_outcome(
                probe.id,
                &probe.declared,
                Outcome::Timeout,
                ProbeStatus::Killed,
                probe.dispatched.elapsed(),
            );
            killed = true;
        }
        killed
    }

    async fn backoff(&self) {
        let jitter_ms: u64 = rand::thread_rng().gen_range(5..20);
        sleep(self.cfg.poll_interval + Duration::from_millis(jitter_ms)).await;
    }
}
