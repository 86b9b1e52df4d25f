use super::{best_supported_pre13, ProbeContext, ProbeFindings, ProbeRunner};
use crate::executor::{CipherOffer, ProtocolScript};
use crate::model::{Outcome, Property, TlsVersion};
use async_trait::async_trait;
use tracing::debug;

/// Determines whether the target accepts CBC block-cipher suites and
/// finite-field DHE key exchange, on the best version the report knows.
pub(super) struct CipherSuiteProbe;

#[async_trait]
impl ProbeRunner for CipherSuiteProbe {
    async fn run(&self, ctx: ProbeContext) -> anyhow::Result<ProbeFindings> {
        let mut findings = ProbeFindings::default();

        let Some(version) = best_supported_pre13(&ctx.snapshot) else {
            // TLS 1.3-only targets dropped CBC suites and classic DHE
            // negotiation entirely.
            findings.set(Property::SupportsBlockCiphers, Outcome::Unsupported);
            findings.set(Property::SupportsDhe, Outcome::Unsupported);
            return Ok(findings);
        };

        findings.set(
            Property::SupportsBlockCiphers,
            self.offer_outcome(&ctx, version, CipherOffer::BlockCipher, |cipher| {
                cipher.block_cipher
            })
            .await,
        );
        findings.set(
            Property::SupportsDhe,
            self.offer_outcome(&ctx, version, CipherOffer::Dhe, |cipher| cipher.ephemeral_dh)
                .await,
        );
        Ok(findings)
    }
}

impl CipherSuiteProbe {
    async fn offer_outcome(
        &self,
        ctx: &ProbeContext,
        version: TlsVersion,
        offer: CipherOffer,
        accepts: impl Fn(&crate::executor::NegotiatedCipher) -> bool,
    ) -> Outcome {
        match ctx
            .executor
            .execute(&ProtocolScript::offer(version, offer))
            .await
        {
            Ok(outcome) => match &outcome.session {
                Some(session) if accepts(&session.cipher) => Outcome::True,
                Some(_) => Outcome::False,
                None => Outcome::False,
            },
            Err(err) => {
                debug!(?offer, error = %err, "cipher offer exchange failed");
                Outcome::CouldNotTest
            }
        }
    }
}
