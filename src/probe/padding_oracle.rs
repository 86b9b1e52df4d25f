use super::{ProbeContext, ProbeFindings, ProbeRunner};
use crate::executor::{CipherOffer, ProtocolScript};
use crate::leak::{
    classify_response, run_leak_test, vectors_for, LeakTestInfo, RecordStrategy, ResponseClass,
    VectorStrategy,
};
use crate::model::{Outcome, Property, ScanDetail, TlsVersion};
use async_trait::async_trait;
use tracing::debug;

/// Sends semantically equivalent malformed records and compares the
/// per-vector response distributions for a distinguishing oracle.
pub(super) struct PaddingOracleProbe;

#[async_trait]
impl ProbeRunner for PaddingOracleProbe {
    async fn run(&self, ctx: ProbeContext) -> anyhow::Result<ProbeFindings> {
        let mut findings = ProbeFindings::default();
        let detail = ctx.config.detail;

        // CBC padding only exists below TLS 1.3, and SSLv3 padding is its own
        // (POODLE-shaped) problem.
        let versions: Vec<TlsVersion> = [TlsVersion::Tls10, TlsVersion::Tls11, TlsVersion::Tls12]
            .into_iter()
            .filter(|version| {
                ctx.snapshot.get(version.support_property()) == Some(Outcome::True)
            })
            .collect();

        let record_strategy = if detail.at_least(ScanDetail::Normal) {
            RecordStrategy::Short
        } else {
            RecordStrategy::VeryShort
        };
        let mut strategies = vec![VectorStrategy::ClassicDynamic];
        if detail == ScanDetail::All {
            strategies.push(VectorStrategy::Finished);
            strategies.push(VectorStrategy::CloseNotify);
        }

        for strategy in strategies {
            for version in &versions {
                let version = *version;
                let info = LeakTestInfo {
                    version,
                    offer: CipherOffer::BlockCipher,
                    vector_strategy: strategy,
                    record_strategy,
                };
                let vectors = vectors_for(strategy, record_strategy);
                debug!(%version, ?strategy, "running padding oracle leak test");
                let test = run_leak_test(info, &vectors, detail, |vector| {
                    let executor = ctx.executor.clone();
                    async move {
                        let script = ProtocolScript::malformed_record(
                            version,
                            CipherOffer::BlockCipher,
                            vector.malformation,
                        );
                        match executor.execute(&script).await {
                            Ok(outcome) => classify_response(&outcome),
                            Err(_) => ResponseClass::IoError,
                        }
                    }
                })
                .await;
                findings.leak_tests.push(test);
            }
        }

        let outcome = if findings.leak_tests.is_empty() {
            Outcome::CouldNotTest
        } else if findings
            .leak_tests
            .iter()
            .any(|test| test.is_significant_distinct())
        {
            Outcome::True
        } else {
            Outcome::False
        };
        findings.set(Property::VulnerableToPaddingOracle, outcome);
        Ok(findings)
    }
}
