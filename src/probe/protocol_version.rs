use super::{ProbeContext, ProbeFindings, ProbeRunner};
use crate::executor::{CipherOffer, PrfHash, ProtocolScript};
use crate::model::{Outcome, Property, TlsVersion};
use async_trait::async_trait;
use tracing::debug;

const VERSIONS: [TlsVersion; 5] = [
    TlsVersion::Ssl3,
    TlsVersion::Tls10,
    TlsVersion::Tls11,
    TlsVersion::Tls12,
    TlsVersion::Tls13,
];

/// Tries one hello per protocol version and derives the PRF-construction
/// support properties from what got negotiated.
pub(super) struct ProtocolVersionProbe;

#[async_trait]
impl ProbeRunner for ProtocolVersionProbe {
    async fn run(&self, ctx: ProbeContext) -> anyhow::Result<ProbeFindings> {
        let mut findings = ProbeFindings::default();

        for version in VERSIONS {
            let outcome = match ctx.executor.execute(&ProtocolScript::hello(version)).await {
                Ok(outcome) => match &outcome.session {
                    Some(session) if session.version == version => Outcome::True,
                    Some(_) => Outcome::False,
                    None if outcome.alert().is_some() => Outcome::False,
                    None if outcome.received.is_empty() => Outcome::False,
                    None => Outcome::Uncertain,
                },
                Err(err) => {
                    debug!(version = %version, error = %err, "version exchange failed");
                    Outcome::CouldNotTest
                }
            };
            findings.set(version.support_property(), outcome);
        }

        let tls10 = findings.get(Property::SupportsTls10).unwrap_or(Outcome::CouldNotTest);
        let tls11 = findings.get(Property::SupportsTls11).unwrap_or(Outcome::CouldNotTest);
        let tls12 = findings.get(Property::SupportsTls12).unwrap_or(Outcome::CouldNotTest);

        findings.set(Property::SupportsLegacyPrf, any_true(tls10, tls11));
        findings.set(Property::SupportsSha256Prf, tls12);
        findings.set(Property::SupportsSha384Prf, match tls12 {
            Outcome::True => self.sha384_outcome(&ctx).await,
            other => other,
        });

        Ok(findings)
    }
}

impl ProtocolVersionProbe {
    /// A dedicated exchange offering only SHA-384 suites decides whether the
    /// TLS 1.2 SHA-384 PRF is in play.
    async fn sha384_outcome(&self, ctx: &ProbeContext) -> Outcome {
        let script = ProtocolScript::offer(TlsVersion::Tls12, CipherOffer::Sha384);
        match ctx.executor.execute(&script).await {
            Ok(outcome) => match &outcome.session {
                Some(session) if session.prf() == PrfHash::Sha384 => Outcome::True,
                Some(_) => Outcome::False,
                None => Outcome::False,
            },
            Err(err) => {
                debug!(error = %err, "sha384 exchange failed");
                Outcome::CouldNotTest
            }
        }
    }
}

fn any_true(a: Outcome, b: Outcome) -> Outcome {
    if a == Outcome::True || b == Outcome::True {
        Outcome::True
    } else if a == Outcome::CouldNotTest && b == Outcome::CouldNotTest {
        Outcome::CouldNotTest
    } else {
        Outcome::False
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_true_prefers_definite_answers() {
        assert_eq!(any_true(Outcome::True, Outcome::False), Outcome::True);
        assert_eq!(any_true(Outcome::False, Outcome::True), Outcome::True);
        assert_eq!(any_true(Outcome::False, Outcome::False), Outcome::False);
        assert_eq!(any_true(Outcome::False, Outcome::CouldNotTest), Outcome::False);
        assert_eq!(
            any_true(Outcome::CouldNotTest, Outcome::CouldNotTest),
            Outcome::CouldNotTest
        );
    }
}
