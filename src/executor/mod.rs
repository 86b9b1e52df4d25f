pub mod tcp;

pub use tcp::TcpScriptExecutor;

use crate::model::TlsVersion;
use crate::report::DhObservation;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Declarative sequence of protocol actions. The executor decides how the
/// actions are put on the wire; probes only describe the exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolScript {
    pub version: TlsVersion,
    pub offer: CipherOffer,
    pub steps: Vec<ScriptStep>,
}

impl ProtocolScript {
    /// Plain hello exchange: send a hello, collect the server's first flight.
    pub fn hello(version: TlsVersion) -> Self {
        Self::offer(version, CipherOffer::Default)
    }

    pub fn offer(version: TlsVersion, offer: CipherOffer) -> Self {
        Self {
            version,
            offer,
            steps: vec![ScriptStep::SendClientHello, ScriptStep::AwaitServerResponse],
        }
    }

    /// Hello exchange followed by one deliberately malformed record.
    pub fn malformed_record(
        version: TlsVersion,
        offer: CipherOffer,
        malformation: RecordMalformation,
    ) -> Self {
        Self {
            version,
            offer,
            steps: vec![
                ScriptStep::SendClientHello,
                ScriptStep::AwaitServerResponse,
                ScriptStep::SendMalformedRecord(malformation),
                ScriptStep::AwaitServerResponse,
            ],
        }
    }

    /// Hello exchange followed by a heartbeat request whose declared payload
    /// length exceeds the payload actually sent.
    pub fn heartbeat(version: TlsVersion, payload_length: u16, declared_length: u16) -> Self {
        Self {
            version,
            offer: CipherOffer::Default,
            steps: vec![
                ScriptStep::SendClientHello,
                ScriptStep::AwaitServerResponse,
                ScriptStep::SendHeartbeat {
                    payload_length,
                    declared_length,
                },
                ScriptStep::AwaitServerResponse,
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CipherOffer {
    Default,
    BlockCipher,
    Dhe,
    Sha384,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptStep {
    SendClientHello,
    AwaitServerResponse,
    SendMalformedRecord(RecordMalformation),
    SendHeartbeat {
        payload_length: u16,
        declared_length: u16,
    },
}

/// Ways a record can be broken to probe padding/MAC handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordMalformation {
    InvalidPaddingByte,
    ShortPadding,
    InvalidMac,
    MissingMacByte,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    ClientHello,
    ServerHello,
    Certificate,
    ServerKeyExchange,
    ServerHelloDone,
    ChangeCipherSpec,
    Alert { level: u8, description: u8 },
    ApplicationData,
    Heartbeat,
    Unknown(u8),
}

/// PRF hash a cipher suite mandates under TLS 1.2. Below 1.2 the legacy
/// MD5/SHA-1 construction applies regardless of the suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrfHash {
    Legacy,
    Sha256,
    Sha384,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiatedCipher {
    pub id: u16,
    pub prf: PrfHash,
    pub block_cipher: bool,
    pub ephemeral_dh: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub version: TlsVersion,
    pub cipher: NegotiatedCipher,
    pub server_dh_key: Option<DhObservation>,
}

impl SessionContext {
    /// Effective PRF construction for this session.
    pub fn prf(&self) -> PrfHash {
        match self.version {
            TlsVersion::Ssl3 | TlsVersion::Tls10 | TlsVersion::Tls11 => PrfHash::Legacy,
            TlsVersion::Tls12 | TlsVersion::Tls13 => self.cipher.prf,
        }
    }
}

/// Observable result of one scripted exchange. `records` holds the raw
/// payload of each received record, index-aligned with `received`.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutcome {
    pub sent: Vec<MessageKind>,
    pub received: Vec<MessageKind>,
    pub records: Vec<Vec<u8>>,
    pub session: Option<SessionContext>,
}

impl ExecutionOutcome {
    pub fn alert(&self) -> Option<(u8, u8)> {
        self.received.iter().find_map(|kind| match kind {
            MessageKind::Alert { level, description } => Some((*level, *description)),
            _ => None,
        })
    }

    /// Raw payload of the first received record of the given kind.
    pub fn record_of(&self, kind: MessageKind) -> Option<&[u8]> {
        self.received
            .iter()
            .position(|k| *k == kind)
            .and_then(|idx| self.records.get(idx))
            .map(|record| record.as_slice())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityStatus {
    Unreachable,
    NoTls,
    SpeaksTls,
}

/// The handshake/record-layer collaborator. The core never speaks TLS
/// itself; it hands a script to this trait and inspects the outcome.
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    async fn connectivity(&self) -> ConnectivityStatus;

    async fn execute(&self, script: &ProtocolScript) -> anyhow::Result<ExecutionOutcome>;
}

/// Suite parameters for every cipher suite the shipped scripts offer.
pub fn cipher_from_id(id: u16) -> Option<NegotiatedCipher> {
    let (prf, block_cipher, ephemeral_dh) = match id {
        0x002f | 0x0035 => (PrfHash::Sha256, true, false),
        0x003c | 0x003d => (PrfHash::Sha256, true, false),
        0x0033 | 0x0039 => (PrfHash::Sha256, true, true),
        0x009e => (PrfHash::Sha256, false, true),
        0x009f => (PrfHash::Sha384, false, true),
        0xc030 => (PrfHash::Sha384, false, false),
        0xc02f => (PrfHash::Sha256, false, false),
        0x1301 => (PrfHash::Sha256, false, false),
        0x1302 => (PrfHash::Sha384, false, false),
        _ => return None,
    };
    Some(NegotiatedCipher {
        id,
        prf,
        block_cipher,
        ephemeral_dh,
    })
}

/// Suites offered for a given script configuration, most preferred first.
pub fn offered_suites(version: TlsVersion, offer: CipherOffer) -> &'static [u16] {
    if version == TlsVersion::Tls13 {
        return &[0x1301, 0x1302];
    }
    match offer {
        CipherOffer::Default => &[0xc030, 0xc02f, 0x009e, 0x003c, 0x002f, 0x0035],
        CipherOffer::BlockCipher => &[0x0033, 0x0039, 0x003c, 0x003d, 0x002f, 0x0035],
        CipherOffer::Dhe => &[0x0033, 0x0039, 0x009e, 0x009f],
        CipherOffer::Sha384 => &[0x009f, 0xc030, 0x1302],
    }
}
