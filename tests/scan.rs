use async_trait::async_trait;
use num_bigint::BigUint;
use std::sync::Arc;
use std::time::Duration;
use tls_prober::analysis::raccoon::RaccoonConstruction;
use tls_prober::engine::Engine;
use tls_prober::executor::{
    cipher_from_id, CipherOffer, ConnectivityStatus, ExecutionOutcome, MessageKind,
    ProtocolScript, RecordMalformation, ScriptExecutor, ScriptStep, SessionContext,
};
use tls_prober::model::{
    Config, Outcome, OutputConfig, OutputFormat, Property, ScanDetail, TargetSpec, TargetView,
    TlsVersion,
};
use tls_prober::report::DhObservation;

/// In-process stand-in for a TLS 1.2 server with a reused DH key and a
/// MAC/padding distinguishing oracle.
struct MockServer {
    connectivity: ConnectivityStatus,
}

impl MockServer {
    fn session(cipher_id: u16, dh_key: bool) -> SessionContext {
        SessionContext {
            version: TlsVersion::Tls12,
            cipher: cipher_from_id(cipher_id).unwrap(),
            server_dh_key: dh_key.then(|| DhObservation {
                modulus: BigUint::from_bytes_be(&[0xff; 64]),
                generator: BigUint::from(2u32),
                public_key: BigUint::from(0x1234u32),
            }),
        }
    }

    fn handshake_flight(session: SessionContext) -> ExecutionOutcome {
        ExecutionOutcome {
            sent: vec![MessageKind::ClientHello],
            received: vec![
                MessageKind::ServerHello,
                MessageKind::Certificate,
                MessageKind::ServerKeyExchange,
                MessageKind::ServerHelloDone,
            ],
            records: vec![Vec::new(), Vec::new(), Vec::new(), Vec::new()],
            session: Some(session),
        }
    }

    fn alert_flight(description: u8) -> ExecutionOutcome {
        ExecutionOutcome {
            sent: vec![MessageKind::ClientHello],
            received: vec![MessageKind::Alert {
                level: 2,
                description,
            }],
            records: vec![vec![2, description]],
            session: None,
        }
    }

    fn oracle_response(malformation: RecordMalformation) -> ExecutionOutcome {
        // MAC errors answer differently from padding errors: the oracle.
        let description = match malformation {
            RecordMalformation::InvalidMac => 20,
            _ => 51,
        };
        ExecutionOutcome {
            sent: vec![MessageKind::ClientHello, MessageKind::ApplicationData],
            received: vec![
                MessageKind::ServerHello,
                MessageKind::ServerHelloDone,
                MessageKind::Alert {
                    level: 2,
                    description,
                },
            ],
            records: vec![Vec::new(), Vec::new(), vec![2, description]],
            session: Some(Self::session(0x0033, false)),
        }
    }
}

#[async_trait]
impl ScriptExecutor for MockServer {
    async fn connectivity(&self) -> ConnectivityStatus {
        self.connectivity
    }

    async fn execute(&self, script: &ProtocolScript) -> anyhow::Result<ExecutionOutcome> {
        if let Some(malformation) = script.steps.iter().find_map(|step| match step {
            ScriptStep::SendMalformedRecord(m) => Some(*m),
            _ => None,
        }) {
            return Ok(Self::oracle_response(malformation));
        }
        if script
            .steps
            .iter()
            .any(|step| matches!(step, ScriptStep::SendHeartbeat { .. }))
        {
            // No heartbeat answer at all: not vulnerable.
            return Ok(ExecutionOutcome {
                sent: vec![MessageKind::ClientHello, MessageKind::Heartbeat],
                received: vec![MessageKind::ServerHello, MessageKind::ServerHelloDone],
                records: vec![Vec::new(), Vec::new()],
                session: Some(Self::session(0x009e, false)),
            });
        }
        if script.version != TlsVersion::Tls12 {
            return Ok(Self::alert_flight(70)); // protocol_version
        }
        let outcome = match script.offer {
            CipherOffer::Default => Self::handshake_flight(Self::session(0x009e, false)),
            CipherOffer::BlockCipher => Self::handshake_flight(Self::session(0x0033, false)),
            CipherOffer::Dhe => Self::handshake_flight(Self::session(0x0033, true)),
            CipherOffer::Sha384 => Self::handshake_flight(Self::session(0x009f, false)),
        };
        Ok(outcome)
    }
}

fn config() -> Config {
    Config {
        target: TargetSpec {
            host: "mock.example".into(),
            port: 443,
        },
        detail: ScanDetail::Normal,
        probes: None,
        concurrency: 4,
        connect_timeout: Duration::from_millis(100),
        exchange_timeout: Duration::from_millis(100),
        probe_timeout: Duration::from_secs(30),
        poll_interval: Duration::from_millis(20),
        dh_samples: 4,
        output: OutputConfig {
            format: OutputFormat::Json,
            path: None,
        },
    }
}

fn target() -> TargetView {
    TargetView {
        host: "mock.example".into(),
        addr: "192.0.2.1".into(),
        port: 443,
    }
}

#[tokio::test]
async fn full_scan_against_a_vulnerable_tls12_server() {
    let engine = Engine::new(
        config(),
        target(),
        Arc::new(MockServer {
            connectivity: ConnectivityStatus::SpeaksTls,
        }),
    );
    let state = engine.run().await.to_state();

    assert_eq!(state.server_alive, Some(true));
    assert_eq!(state.speaks_tls, Some(true));
    assert!(state.finished_at.is_some());
    assert!(state.skipped.is_empty());
    assert_eq!(state.executed.len(), 5);

    // Version and construction support.
    assert_eq!(state.properties[&Property::SupportsTls12], Outcome::True);
    assert_eq!(state.properties[&Property::SupportsTls10], Outcome::False);
    assert_eq!(state.properties[&Property::SupportsSsl3], Outcome::False);
    assert_eq!(state.properties[&Property::SupportsLegacyPrf], Outcome::False);
    assert_eq!(state.properties[&Property::SupportsSha256Prf], Outcome::True);
    assert_eq!(state.properties[&Property::SupportsSha384Prf], Outcome::True);
    assert_eq!(state.properties[&Property::SupportsBlockCiphers], Outcome::True);
    assert_eq!(state.properties[&Property::SupportsDhe], Outcome::True);

    // The mock reuses its DH public value on every handshake.
    assert_eq!(state.properties[&Property::ReusesDhPublicKey], Outcome::True);
    assert_eq!(state.properties[&Property::VulnerableToRaccoon], Outcome::True);
    assert!(!state.dh_observations.is_empty());
    let constructions: Vec<RaccoonConstruction> = state
        .raccoon
        .iter()
        .map(|record| record.construction)
        .collect();
    assert!(constructions.contains(&RaccoonConstruction::Tls12Sha256Prf));
    assert!(constructions.contains(&RaccoonConstruction::Tls12Sha384Prf));

    // The MAC/padding oracle is detected and escalated.
    assert_eq!(
        state.properties[&Property::VulnerableToPaddingOracle],
        Outcome::True
    );
    assert_eq!(state.leak_tests.len(), 1);
    let test = &state.leak_tests[0];
    assert!(test.is_significant_distinct());
    // 3 initial + 7 escalation rounds across 4 vectors, nothing discarded.
    assert_eq!(test.sample_count(), 40);

    assert_eq!(
        state.properties[&Property::VulnerableToHeartbleed],
        Outcome::False
    );
    assert!(state.inconsistencies.is_empty());
}

#[tokio::test]
async fn unreachable_target_short_circuits_to_a_minimal_report() {
    let engine = Engine::new(
        config(),
        target(),
        Arc::new(MockServer {
            connectivity: ConnectivityStatus::Unreachable,
        }),
    );
    let state = engine.run().await.to_state();

    assert_eq!(state.server_alive, Some(false));
    assert_eq!(state.speaks_tls, None);
    assert!(state.properties.is_empty());
    assert!(state.executed.is_empty());
    assert!(state.finished_at.is_some());
}

#[tokio::test]
async fn non_tls_target_is_reported_without_scheduling() {
    let engine = Engine::new(
        config(),
        target(),
        Arc::new(MockServer {
            connectivity: ConnectivityStatus::NoTls,
        }),
    );
    let state = engine.run().await.to_state();

    assert_eq!(state.server_alive, Some(true));
    assert_eq!(state.speaks_tls, Some(false));
    assert!(state.properties.is_empty());
    assert!(state.timings.is_empty());
}
