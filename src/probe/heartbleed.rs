use super::{best_supported_pre13, ProbeContext, ProbeFindings, ProbeRunner};
use crate::executor::{MessageKind, ProtocolScript};
use crate::model::{Outcome, Property};
use async_trait::async_trait;
use tracing::debug;

const SENT_PAYLOAD_BYTES: u16 = 16;
const DECLARED_PAYLOAD_BYTES: u16 = 0x4000;

/// Heartbeat request declaring far more payload than it carries. A target
/// that echoes the declared length leaks process memory.
pub(super) struct HeartbleedProbe;

#[async_trait]
impl ProbeRunner for HeartbleedProbe {
    async fn run(&self, ctx: ProbeContext) -> anyhow::Result<ProbeFindings> {
        let mut findings = ProbeFindings::default();

        let Some(version) = best_supported_pre13(&ctx.snapshot) else {
            findings.set(Property::VulnerableToHeartbleed, Outcome::CouldNotTest);
            return Ok(findings);
        };

        let script =
            ProtocolScript::heartbeat(version, SENT_PAYLOAD_BYTES, DECLARED_PAYLOAD_BYTES);
        let outcome = match ctx.executor.execute(&script).await {
            Ok(outcome) => match outcome.record_of(MessageKind::Heartbeat) {
                // Response type byte + 2 length bytes + the echoed payload.
                Some(record) if record.len() > SENT_PAYLOAD_BYTES as usize + 3 => Outcome::True,
                Some(_) => Outcome::False,
                None => Outcome::False,
            },
            Err(err) => {
                debug!(error = %err, "heartbeat exchange failed");
                Outcome::CouldNotTest
            }
        };
        findings.set(Property::VulnerableToHeartbleed, outcome);
        Ok(findings)
    }
}
