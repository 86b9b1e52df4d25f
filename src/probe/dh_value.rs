use super::{best_supported_pre13, ProbeContext, ProbeFindings, ProbeRunner};
use crate::executor::{CipherOffer, ProtocolScript};
use crate::model::{Outcome, Property};
use async_trait::async_trait;
use std::collections::BTreeSet;
use tracing::debug;

/// Samples the server's DH public values over repeated handshakes. The
/// observations feed the post-scan Raccoon analysis; the probe itself only
/// decides whether public values get reused across connections.
pub(super) struct DhValueProbe;

#[async_trait]
impl ProbeRunner for DhValueProbe {
    async fn run(&self, ctx: ProbeContext) -> anyhow::Result<ProbeFindings> {
        let mut findings = ProbeFindings::default();

        let Some(version) = best_supported_pre13(&ctx.snapshot) else {
            findings.set(Property::ReusesDhPublicKey, Outcome::CouldNotTest);
            return Ok(findings);
        };

        let samples = ctx.config.dh_samples.max(2);
        for _ in 0..samples {
            match ctx
                .executor
                .execute(&ProtocolScript::offer(version, CipherOffer::Dhe))
                .await
            {
                Ok(outcome) => {
                    if let Some(key) = outcome.session.and_then(|s| s.server_dh_key) {
                        findings.dh_observations.push(key);
                    }
                }
                Err(err) => debug!(error = %err, "dh sampling exchange failed"),
            }
        }

        let outcome = if findings.dh_observations.is_empty() {
            Outcome::CouldNotTest
        } else {
            let distinct: BTreeSet<_> = findings
                .dh_observations
                .iter()
                .map(|key| key.public_key.clone())
                .collect();
            if distinct.len() < findings.dh_observations.len() {
                Outcome::True
            } else {
                Outcome::False
            }
        };
        findings.set(Property::ReusesDhPublicKey, outcome);
        Ok(findings)
    }
}
