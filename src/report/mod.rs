use crate::analysis::raccoon::RaccoonAttackRecord;
use crate::leak::InformationLeakTest;
use crate::model::{Outcome, ProbeId, ProbeStatus, Property, TargetView};
use crate::probe::requirement::Requirement;
use crate::probe::ProbeFindings;
use crate::util::now_iso8601;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::warn;

/// One Diffie-Hellman server key observed during a scripted exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DhObservation {
    pub modulus: BigUint,
    pub generator: BigUint,
    pub public_key: BigUint,
}

/// Recoverable merge anomalies. Surfaced to operators through the report,
/// never aborting the scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum MergeInconsistency {
    UnsetDeclaredProperty { probe: ProbeId, property: Property },
    UndeclaredProperty { probe: ProbeId, property: Property },
    DoubleMerge { probe: ProbeId, property: Property },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedProbe {
    pub probe: ProbeId,
    pub missing: Requirement,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeTiming {
    pub probe: ProbeId,
    pub status: ProbeStatus,
    pub duration_ms: u128,
}

/// Consistent view of the report taken under the read lock. Requirements are
/// evaluated against snapshots only, so a merge in flight can never be
/// observed half-applied.
#[derive(Debug, Clone, Default)]
pub struct ReportSnapshot {
    properties: BTreeMap<Property, Outcome>,
    executed: BTreeSet<ProbeId>,
}

impl ReportSnapshot {
    pub fn get(&self, property: Property) -> Option<Outcome> {
        self.properties.get(&property).copied()
    }

    pub fn has_executed(&self, probe: ProbeId) -> bool {
        self.executed.contains(&probe)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportState {
    pub target: TargetView,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub server_alive: Option<bool>,
    pub speaks_tls: Option<bool>,
    pub properties: BTreeMap<Property, Outcome>,
    pub executed: BTreeSet<ProbeId>,
    pub dh_observations: Vec<DhObservation>,
    pub leak_tests: Vec<InformationLeakTest>,
    pub raccoon: Vec<RaccoonAttackRecord>,
    pub timings: Vec<ProbeTiming>,
    pub skipped: Vec<SkippedProbe>,
    pub inconsistencies: Vec<MergeInconsistency>,
}

/// Shared scan-wide accumulator of findings. Cloning shares the underlying
/// store. Writes go through `merge`, which applies a probe's findings as one
/// atomic unit behind the write lock; the scheduler is the only writer for
/// the duration of a scan.
#[derive(Clone)]
pub struct Report {
    inner: Arc<RwLock<ReportState>>,
}

impl Report {
    pub fn new(target: TargetView) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ReportState {
                target,
                started_at: now_iso8601(),
                finished_at: None,
                server_alive: None,
                speaks_tls: None,
                properties: BTreeMap::new(),
                executed: BTreeSet::new(),
                dh_observations: Vec::new(),
                leak_tests: Vec::new(),
                raccoon: Vec::new(),
                timings: Vec::new(),
                skipped: Vec::new(),
                inconsistencies: Vec::new(),
            })),
        }
    }

    pub fn snapshot(&self) -> ReportSnapshot {
        let state = self.inner.read().expect("report lock poisoned");
        ReportSnapshot {
            properties: state.properties.clone(),
            executed: state.executed.clone(),
        }
    }

    pub fn get(&self, property: Property) -> Option<Outcome> {
        self.inner
            .read()
            .expect("report lock poisoned")
            .properties
            .get(&property)
            .copied()
    }

    pub fn has_executed(&self, probe: ProbeId) -> bool {
        self.inner
            .read()
            .expect("report lock poisoned")
            .executed
            .contains(&probe)
    }

    /// Apply a completed probe's findings in a single critical section.
    /// Declared-but-unset and undeclared properties are recorded as
    /// recoverable inconsistencies, not scan failures.
    pub fn merge(
        &self,
        probe: ProbeId,
        declared: &[Property],
        findings: ProbeFindings,
        status: ProbeStatus,
        duration: Duration,
    ) {
        let mut state = self.inner.write().expect("report lock poisoned");
        for (property, outcome) in &findings.properties {
            if !declared.contains(property) {
                warn!(probe = %probe, property = ?property, "probe set a property it never declared");
                state.inconsistencies.push(MergeInconsistency::UndeclaredProperty {
                    probe,
                    property: *property,
                });
                continue;
            }
            if state.properties.contains_key(property) {
                warn!(probe = %probe, property = ?property, "property merged twice");
                state
                    .inconsistencies
                    .push(MergeInconsistency::DoubleMerge { probe, property: *property });
            }
            state.properties.insert(*property, *outcome);
        }
        for property in declared {
            if !findings.properties.iter().any(|(p, _)| p == property) {
                warn!(probe = %probe, property = ?property, "declared property left unset");
                state.inconsistencies.push(MergeInconsistency::UnsetDeclaredProperty {
                    probe,
                    property: *property,
                });
            }
        }
        state.dh_observations.extend(findings.dh_observations);
        state.leak_tests.extend(findings.leak_tests);
        state.executed.insert(probe);
        state.timings.push(ProbeTiming {
            probe,
            status,
            duration_ms: duration.as_millis(),
        });
    }

    /// Merge a scheduler-synthesized outcome (timeout, error, skip) for every
    /// property the probe declared.
    pub fn merge_outcome(
        &self,
        probe: ProbeId,
        declared: &[Property],
        outcome: Outcome,
        status: ProbeStatus,
        duration: Duration,
    ) {
        let findings = ProbeFindings {
            properties: declared.iter().map(|p| (*p, outcome)).collect(),
            ..ProbeFindings::default()
        };
        self.merge(probe, declared, findings, status, duration);
    }

    pub fn record_skipped(&self, probe: ProbeId, missing: Requirement) {
        let mut state = self.inner.write().expect("report lock poisoned");
        state.skipped.push(SkippedProbe { probe, missing });
    }

    pub fn set_server_alive(&self, alive: bool) {
        self.inner.write().expect("report lock poisoned").server_alive = Some(alive);
    }

    pub fn set_speaks_tls(&self, speaks: bool) {
        self.inner.write().expect("report lock poisoned").speaks_tls = Some(speaks);
    }

    pub fn finish(&self) {
        self.inner.write().expect("report lock poisoned").finished_at = Some(now_iso8601());
    }

    /// Serialized single-writer access for the after-analysis stage, which
    /// runs on the coordinator once the scheduler has terminated.
    pub(crate) fn with_state_mut<R>(&self, f: impl FnOnce(&mut ReportState) -> R) -> R {
        let mut state = self.inner.write().expect("report lock poisoned");
        f(&mut state)
    }

    /// Clone of the full state, for rendering and inspection after the scan.
    pub fn to_state(&self) -> ReportState {
        self.inner.read().expect("report lock poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Outcome;

    fn report() -> Report {
        Report::new(TargetView {
            host: "example".into(),
            addr: "192.0.2.1".into(),
            port: 443,
        })
    }

    #[test]
    fn merge_marks_probe_executed_and_sets_properties() {
        let report = report();
        let findings = ProbeFindings {
            properties: vec![(Property::SupportsTls12, Outcome::True)],
            ..ProbeFindings::default()
        };
        report.merge(
            ProbeId::ProtocolVersion,
            &[Property::SupportsTls12],
            findings,
            ProbeStatus::Completed,
            Duration::from_millis(10),
        );
        assert!(report.has_executed(ProbeId::ProtocolVersion));
        assert_eq!(report.get(Property::SupportsTls12), Some(Outcome::True));
        assert!(report.to_state().inconsistencies.is_empty());
    }

    #[test]
    fn unset_declared_property_is_a_recoverable_warning() {
        let report = report();
        report.merge(
            ProbeId::ProtocolVersion,
            &[Property::SupportsTls12, Property::SupportsTls13],
            ProbeFindings {
                properties: vec![(Property::SupportsTls12, Outcome::True)],
                ..ProbeFindings::default()
            },
            ProbeStatus::Completed,
            Duration::ZERO,
        );
        let state = report.to_state();
        assert_eq!(
            state.inconsistencies,
            vec![MergeInconsistency::UnsetDeclaredProperty {
                probe: ProbeId::ProtocolVersion,
                property: Property::SupportsTls13,
            }]
        );
        assert_eq!(report.get(Property::SupportsTls13), None);
    }

    #[test]
    fn double_merge_is_recorded_and_last_write_wins() {
        let report = report();
        report.merge_outcome(
            ProbeId::ProtocolVersion,
            &[Property::SupportsTls12],
            Outcome::True,
            ProbeStatus::Completed,
            Duration::ZERO,
        );
        report.merge_outcome(
            ProbeId::CipherSuite,
            &[Property::SupportsTls12],
            Outcome::False,
            ProbeStatus::Completed,
            Duration::ZERO,
        );
        let state = report.to_state();
        assert_eq!(state.properties[&Property::SupportsTls12], Outcome::False);
        assert_eq!(
            state.inconsistencies,
            vec![MergeInconsistency::DoubleMerge {
                probe: ProbeId::CipherSuite,
                property: Property::SupportsTls12,
            }]
        );
    }

    #[test]
    fn snapshot_is_stable_while_report_changes() {
        let report = report();
        let before = report.snapshot();
        report.merge_outcome(
            ProbeId::DhValue,
            &[Property::ReusesDhPublicKey],
            Outcome::False,
            ProbeStatus::Completed,
            Duration::ZERO,
        );
        assert_eq!(before.get(Property::ReusesDhPublicKey), None);
        assert!(!before.has_executed(ProbeId::DhValue));
        assert_eq!(
            report.snapshot().get(Property::ReusesDhPublicKey),
            Some(Outcome::False)
        );
    }
}
