mod cipher_suite;
mod dh_value;
mod heartbleed;
mod protocol_version;
mod padding_oracle;
pub mod registry;
pub mod requirement;

use crate::executor::ScriptExecutor;
use crate::leak::InformationLeakTest;
use crate::model::{Config, Outcome, ProbeId, Property};
use crate::report::{DhObservation, ReportSnapshot};
use async_trait::async_trait;
use requirement::Requirement;
use std::sync::Arc;

pub use registry::default_probes;

/// Flat probe descriptor: identity, precondition, the properties it promises
/// to write, and its execution body. A probe is scheduled at most once.
pub struct Probe {
    pub id: ProbeId,
    pub requirement: Requirement,
    pub declared: Vec<Property>,
    pub runner: Arc<dyn ProbeRunner>,
}

impl Probe {
    pub fn new(
        id: ProbeId,
        requirement: Requirement,
        declared: Vec<Property>,
        runner: Arc<dyn ProbeRunner>,
    ) -> Self {
        Self {
            id,
            requirement,
            declared,
            runner,
        }
    }
}

/// Execution body of a probe. Errors are caught at the scheduling boundary
/// and converted to `ErrorDuringTest`; they never abort sibling probes.
#[async_trait]
pub trait ProbeRunner: Send + Sync {
    async fn run(&self, ctx: ProbeContext) -> anyhow::Result<ProbeFindings>;
}

/// Everything a probe body gets to work with: the scan config, the scripted
/// exchange executor, and the report snapshot taken at dispatch time.
#[derive(Clone)]
pub struct ProbeContext {
    pub config: Arc<Config>,
    pub executor: Arc<dyn ScriptExecutor>,
    pub snapshot: ReportSnapshot,
}

/// What a finished probe hands back for merging.
#[derive(Default)]
pub struct ProbeFindings {
    pub properties: Vec<(Property, Outcome)>,
    pub dh_observations: Vec<DhObservation>,
    pub leak_tests: Vec<InformationLeakTest>,
}

impl ProbeFindings {
    pub fn set(&mut self, property: Property, outcome: Outcome) {
        self.properties.push((property, outcome));
    }

    pub fn get(&self, property: Property) -> Option<Outcome> {
        self.properties
            .iter()
            .find(|(p, _)| *p == property)
            .map(|(_, outcome)| *outcome)
    }
}

/// Highest pre-TLS1.3 version the report already knows to be supported.
pub(crate) fn best_supported_pre13(snapshot: &ReportSnapshot) -> Option<crate::model::TlsVersion> {
    use crate::model::TlsVersion;
    [
        TlsVersion::Tls12,
        TlsVersion::Tls11,
        TlsVersion::Tls10,
        TlsVersion::Ssl3,
    ]
    .into_iter()
    .find(|version| snapshot.get(version.support_property()) == Some(Outcome::True))
}
