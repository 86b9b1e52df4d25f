use super::cipher_suite::CipherSuiteProbe;
use super::dh_value::DhValueProbe;
use super::heartbleed::HeartbleedProbe;
use super::padding_oracle::PaddingOracleProbe;
use super::protocol_version::ProtocolVersionProbe;
use super::requirement::Requirement;
use super::Probe;
use crate::model::{Config, Outcome, ProbeId, Property};
use std::sync::Arc;

/// The default probe set, honoring a `--probe` restriction when present.
pub fn default_probes(cfg: &Config) -> Vec<Probe> {
    let mut probes = vec![
        Probe::new(
            ProbeId::ProtocolVersion,
            Requirement::Always,
            vec![
                Property::SupportsSsl3,
                Property::SupportsTls10,
                Property::SupportsTls11,
                Property::SupportsTls12,
                Property::SupportsTls13,
                Property::SupportsLegacyPrf,
                Property::SupportsSha256Prf,
                Property::SupportsSha384Prf,
            ],
            Arc::new(ProtocolVersionProbe),
        ),
        Probe::new(
            ProbeId::CipherSuite,
            Requirement::ProbeExecuted(ProbeId::ProtocolVersion),
            vec![Property::SupportsBlockCiphers, Property::SupportsDhe],
            Arc::new(CipherSuiteProbe),
        ),
        Probe::new(
            ProbeId::DhValue,
            Requirement::PropertyEquals(Property::SupportsDhe, Outcome::True),
            vec![Property::ReusesDhPublicKey],
            Arc::new(DhValueProbe),
        ),
        Probe::new(
            ProbeId::PaddingOracle,
            Requirement::PropertyEquals(Property::SupportsBlockCiphers, Outcome::True),
            vec![Property::VulnerableToPaddingOracle],
            Arc::new(PaddingOracleProbe),
        ),
        Probe::new(
            ProbeId::Heartbleed,
            Requirement::or(
                Requirement::PropertyEquals(Property::SupportsTls10, Outcome::True),
                Requirement::or(
                    Requirement::PropertyEquals(Property::SupportsTls11, Outcome::True),
                    Requirement::PropertyEquals(Property::SupportsTls12, Outcome::True),
                ),
            ),
            vec![Property::VulnerableToHeartbleed],
            Arc::new(HeartbleedProbe),
        ),
    ];
    if let Some(selected) = &cfg.probes {
        probes.retain(|probe| selected.contains(&probe.id));
    }
    probes
}
