use super::{
    cipher_from_id, offered_suites, CipherOffer, ConnectivityStatus, ExecutionOutcome, MessageKind,
    ProtocolScript, RecordMalformation, ScriptExecutor, ScriptStep, SessionContext,
};
use crate::model::{Target, TlsVersion};
use crate::report::DhObservation;
use anyhow::Context;
use async_trait::async_trait;
use num_bigint::BigUint;
use rand::RngCore;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

const CONTENT_CCS: u8 = 20;
const CONTENT_ALERT: u8 = 21;
const CONTENT_HANDSHAKE: u8 = 22;
const CONTENT_APPDATA: u8 = 23;
const CONTENT_HEARTBEAT: u8 = 24;

const MAX_RECORD_LEN: usize = (1 << 14) + 2048;
const MAX_FLIGHT_RECORDS: usize = 16;

/// Scripted-exchange executor speaking plain TCP. Sends canned hello and
/// attack records and performs light record parsing, enough to expose which
/// message kinds came back and the negotiated session parameters.
pub struct TcpScriptExecutor {
    target: Target,
    connect_timeout: Duration,
    exchange_timeout: Duration,
}

impl TcpScriptExecutor {
    pub fn new(target: Target, connect_timeout: Duration, exchange_timeout: Duration) -> Self {
        Self {
            target,
            connect_timeout,
            exchange_timeout,
        }
    }

    async fn connect(&self) -> anyhow::Result<TcpStream> {
        timeout(self.connect_timeout, TcpStream::connect(self.target.resolved))
            .await
            .map_err(|_| anyhow::anyhow!("connect timeout for {}", self.target.resolved))?
            .with_context(|| format!("cannot connect to {}", self.target.resolved))
    }
}

#[async_trait]
impl ScriptExecutor for TcpScriptExecutor {
    async fn connectivity(&self) -> ConnectivityStatus {
        let mut stream = match self.connect().await {
            Ok(stream) => stream,
            Err(err) => {
                debug!(error = %err, "connectivity check failed");
                return ConnectivityStatus::Unreachable;
            }
        };
        let hello = build_client_hello(
            TlsVersion::Tls12,
            CipherOffer::Default,
            &self.target.original.host,
        );
        if stream.write_all(&hello).await.is_err() {
            return ConnectivityStatus::NoTls;
        }
        match read_record(&mut stream, self.exchange_timeout).await {
            Ok(Some((content_type, _)))
                if (CONTENT_CCS..=CONTENT_HEARTBEAT).contains(&content_type) =>
            {
                ConnectivityStatus::SpeaksTls
            }
            _ => ConnectivityStatus::NoTls,
        }
    }

    async fn execute(&self, script: &ProtocolScript) -> anyhow::Result<ExecutionOutcome> {
        let mut stream = self.connect().await?;
        let mut outcome = ExecutionOutcome::default();
        let mut flight = FlightState::default();

        for step in &script.steps {
            match step {
                ScriptStep::SendClientHello => {
                    let hello = build_client_hello(
                        script.version,
                        script.offer,
                        &self.target.original.host,
                    );
                    stream.write_all(&hello).await.context("hello write failed")?;
                    outcome.sent.push(MessageKind::ClientHello);
                }
                ScriptStep::AwaitServerResponse => {
                    read_flight(
                        &mut stream,
                        self.exchange_timeout,
                        &mut outcome,
                        &mut flight,
                    )
                    .await;
                }
                ScriptStep::SendMalformedRecord(malformation) => {
                    let record = build_malformed_record(script.version, *malformation);
                    stream
                        .write_all(&record)
                        .await
                        .context("malformed record write failed")?;
                    outcome.sent.push(MessageKind::ApplicationData);
                }
                ScriptStep::SendHeartbeat {
                    payload_length,
                    declared_length,
                } => {
                    let record =
                        build_heartbeat_record(script.version, *payload_length, *declared_length);
                    stream
                        .write_all(&record)
                        .await
                        .context("heartbeat write failed")?;
                    outcome.sent.push(MessageKind::Heartbeat);
                }
            }
        }

        outcome.session = flight.into_session();
        Ok(outcome)
    }
}

/// Pieces of the server's first flight needed to derive the session context.
#[derive(Default)]
struct FlightState {
    version: Option<TlsVersion>,
    cipher_id: Option<u16>,
    dh_key: Option<DhObservation>,
    done: bool,
}

impl FlightState {
    fn into_session(self) -> Option<SessionContext> {
        let version = self.version?;
        let cipher = cipher_from_id(self.cipher_id?)?;
        let server_dh_key = if cipher.ephemeral_dh && version.is_pre_tls13() {
            self.dh_key
        } else {
            None
        };
        Some(SessionContext {
            version,
            cipher,
            server_dh_key,
        })
    }
}

async fn read_flight(
    stream: &mut TcpStream,
    first_timeout: Duration,
    outcome: &mut ExecutionOutcome,
    flight: &mut FlightState,
) {
    // The first record gets the full exchange timeout; once the server has
    // started talking, follow-up records either arrive promptly or the
    // flight is over.
    let mut wait = first_timeout;
    let follow_up = first_timeout.min(Duration::from_millis(500));

    while outcome.records.len() < MAX_FLIGHT_RECORDS {
        let (content_type, payload) = match read_record(stream, wait).await {
            Ok(Some(record)) => record,
            Ok(None) | Err(_) => return,
        };
        wait = follow_up;

        match content_type {
            CONTENT_HANDSHAKE => parse_handshake_record(&payload, outcome, flight),
            CONTENT_ALERT => {
                let level = payload.first().copied().unwrap_or(0);
                let description = payload.get(1).copied().unwrap_or(0);
                outcome.received.push(MessageKind::Alert { level, description });
                outcome.records.push(payload);
                return;
            }
            CONTENT_CCS => {
                outcome.received.push(MessageKind::ChangeCipherSpec);
                outcome.records.push(payload);
            }
            CONTENT_APPDATA => {
                outcome.received.push(MessageKind::ApplicationData);
                outcome.records.push(payload);
            }
            CONTENT_HEARTBEAT => {
                outcome.received.push(MessageKind::Heartbeat);
                outcome.records.push(payload);
            }
            other => {
                outcome.received.push(MessageKind::Unknown(other));
                outcome.records.push(payload);
            }
        }
        if flight.done {
            return;
        }
    }
}

/// A handshake record may carry several handshake messages back to back.
fn parse_handshake_record(
    payload: &[u8],
    outcome: &mut ExecutionOutcome,
    flight: &mut FlightState,
) {
    let mut offset = 0;
    while offset + 4 <= payload.len() {
        let msg_type = payload[offset];
        let len = u32::from_be_bytes([
            0,
            payload[offset + 1],
            payload[offset + 2],
            payload[offset + 3],
        ]) as usize;
        let body_start = offset + 4;
        let body_end = body_start.saturating_add(len).min(payload.len());
        let body = &payload[body_start..body_end];

        let kind = match msg_type {
            2 => {
                parse_server_hello(body, flight);
                MessageKind::ServerHello
            }
            11 => MessageKind::Certificate,
            12 => {
                parse_server_key_exchange(body, flight);
                MessageKind::ServerKeyExchange
            }
            14 => {
                flight.done = true;
                MessageKind::ServerHelloDone
            }
            other => MessageKind::Unknown(other),
        };
        outcome.received.push(kind);
        outcome.records.push(body.to_vec());
        offset = body_end;
    }
}

fn parse_server_hello(body: &[u8], flight: &mut FlightState) {
    if body.len() < 38 {
        return;
    }
    let mut version = TlsVersion::from_wire([body[0], body[1]]);
    let session_id_len = body[34] as usize;
    let cipher_offset = 35 + session_id_len;
    if body.len() < cipher_offset + 3 {
        return;
    }
    let cipher_id = u16::from_be_bytes([body[cipher_offset], body[cipher_offset + 1]]);

    // supported_versions wins over the legacy field when present (TLS 1.3).
    let mut ext_offset = cipher_offset + 3;
    if body.len() >= ext_offset + 2 {
        ext_offset += 2;
        while body.len() >= ext_offset + 4 {
            let ext_type = u16::from_be_bytes([body[ext_offset], body[ext_offset + 1]]);
            let ext_len =
                u16::from_be_bytes([body[ext_offset + 2], body[ext_offset + 3]]) as usize;
            let data_start = ext_offset + 4;
            if body.len() < data_start + ext_len {
                break;
            }
            if ext_type == 0x002b && ext_len == 2 {
                version = TlsVersion::from_wire([body[data_start], body[data_start + 1]]);
            }
            ext_offset = data_start + ext_len;
        }
    }

    flight.version = version;
    flight.cipher_id = Some(cipher_id);
}

/// ServerKeyExchange for a finite-field DHE suite: p, g, Ys, each with a
/// 16-bit length prefix.
fn parse_server_key_exchange(body: &[u8], flight: &mut FlightState) {
    fn take(body: &[u8], offset: &mut usize) -> Option<Vec<u8>> {
        if body.len() < *offset + 2 {
            return None;
        }
        let len = u16::from_be_bytes([body[*offset], body[*offset + 1]]) as usize;
        *offset += 2;
        if body.len() < *offset + len {
            return None;
        }
        let value = body[*offset..*offset + len].to_vec();
        *offset += len;
        Some(value)
    }

    let mut offset = 0;
    let Some(p) = take(body, &mut offset) else { return };
    let Some(g) = take(body, &mut offset) else { return };
    let Some(ys) = take(body, &mut offset) else { return };
    flight.dh_key = Some(DhObservation {
        modulus: BigUint::from_bytes_be(&p),
        generator: BigUint::from_bytes_be(&g),
        public_key: BigUint::from_bytes_be(&ys),
    });
}

async fn read_record(
    stream: &mut TcpStream,
    wait: Duration,
) -> anyhow::Result<Option<(u8, Vec<u8>)>> {
    let mut header = [0u8; 5];
    match timeout(wait, stream.read_exact(&mut header)).await {
        Ok(Ok(_)) => {}
        // Timeout and clean close both end the flight.
        Ok(Err(_)) | Err(_) => return Ok(None),
    }
    let len = u16::from_be_bytes([header[3], header[4]]) as usize;
    if len > MAX_RECORD_LEN {
        anyhow::bail!("oversized record ({} bytes)", len);
    }
    let mut payload = vec![0u8; len];
    match timeout(wait, stream.read_exact(&mut payload)).await {
        Ok(Ok(_)) => Ok(Some((header[0], payload))),
        Ok(Err(_)) | Err(_) => Ok(None),
    }
}

fn record_version(version: TlsVersion) -> [u8; 2] {
    match version {
        TlsVersion::Ssl3 => [0x03, 0x00],
        // TLS 1.3 keeps 1.0 on the outer record layer of the hello.
        TlsVersion::Tls13 => [0x03, 0x01],
        other => other.wire_bytes(),
    }
}

fn put_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_be_bytes());
}

fn build_client_hello(version: TlsVersion, offer: CipherOffer, host: &str) -> Vec<u8> {
    let mut body = Vec::with_capacity(256);
    body.extend_from_slice(&version.wire_bytes());
    let mut random = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut random);
    body.extend_from_slice(&random);
    body.push(0); // empty session id

    let suites = offered_suites(version, offer);
    put_u16(&mut body, (suites.len() as u16 + 1) * 2);
    for suite in suites {
        put_u16(&mut body, *suite);
    }
    put_u16(&mut body, 0x00ff); // renegotiation SCSV
    body.extend_from_slice(&[1, 0]); // null compression

    let mut extensions = Vec::with_capacity(128);

    // server_name
    let host_bytes = host.as_bytes();
    put_u16(&mut extensions, 0x0000);
    put_u16(&mut extensions, host_bytes.len() as u16 + 5);
    put_u16(&mut extensions, host_bytes.len() as u16 + 3);
    extensions.push(0);
    put_u16(&mut extensions, host_bytes.len() as u16);
    extensions.extend_from_slice(host_bytes);

    // heartbeat: peer_allowed_to_send
    put_u16(&mut extensions, 0x000f);
    put_u16(&mut extensions, 1);
    extensions.push(1);

    // supported_groups
    let groups: &[u16] = &[0x001d, 0x0017, 0x0100];
    put_u16(&mut extensions, 0x000a);
    put_u16(&mut extensions, groups.len() as u16 * 2 + 2);
    put_u16(&mut extensions, groups.len() as u16 * 2);
    for group in groups {
        put_u16(&mut extensions, *group);
    }

    if matches!(version, TlsVersion::Tls12 | TlsVersion::Tls13) {
        let algorithms: &[u16] = &[0x0401, 0x0501, 0x0601, 0x0403, 0x0503, 0x0804, 0x0805];
        put_u16(&mut extensions, 0x000d);
        put_u16(&mut extensions, algorithms.len() as u16 * 2 + 2);
        put_u16(&mut extensions, algorithms.len() as u16 * 2);
        for algorithm in algorithms {
            put_u16(&mut extensions, *algorithm);
        }
    }

    if version == TlsVersion::Tls13 {
        // supported_versions
        put_u16(&mut extensions, 0x002b);
        put_u16(&mut extensions, 5);
        extensions.push(4);
        extensions.extend_from_slice(&[0x03, 0x04, 0x03, 0x03]);

        // key_share: one x25519 share
        let mut share = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut share);
        put_u16(&mut extensions, 0x0033);
        put_u16(&mut extensions, 38);
        put_u16(&mut extensions, 36);
        put_u16(&mut extensions, 0x001d);
        put_u16(&mut extensions, 32);
        extensions.extend_from_slice(&share);
    }

    put_u16(&mut body, extensions.len() as u16);
    body.extend_from_slice(&extensions);

    let mut handshake = Vec::with_capacity(body.len() + 4);
    handshake.push(1); // client_hello
    handshake.push(0);
    put_u16(&mut handshake, body.len() as u16);
    handshake.extend_from_slice(&body);

    let mut record = Vec::with_capacity(handshake.len() + 5);
    record.push(CONTENT_HANDSHAKE);
    record.extend_from_slice(&record_version(version));
    put_u16(&mut record, handshake.len() as u16);
    record.extend_from_slice(&handshake);
    record
}

/// Crafted ciphertext-shaped records. The payloads are constant garbage of
/// shapes that trip padding and MAC checks differently on a decrypting peer.
fn build_malformed_record(version: TlsVersion, malformation: RecordMalformation) -> Vec<u8> {
    let payload = match malformation {
        RecordMalformation::InvalidPaddingByte => {
            let mut p = vec![0x3a; 48];
            p[47] = 0xff;
            p
        }
        RecordMalformation::ShortPadding => {
            let mut p = vec![0x3a; 32];
            p[31] = 0x00;
            p
        }
        RecordMalformation::InvalidMac => {
            let mut p = vec![0x3a; 48];
            for byte in &mut p[28..48] {
                *byte = 0x5c;
            }
            p
        }
        RecordMalformation::MissingMacByte => vec![0x3a; 24],
    };
    let mut record = Vec::with_capacity(payload.len() + 5);
    record.push(CONTENT_APPDATA);
    record.extend_from_slice(&record_version(version));
    put_u16(&mut record, payload.len() as u16);
    record.extend_from_slice(&payload);
    record
}

fn build_heartbeat_record(
    version: TlsVersion,
    payload_length: u16,
    declared_length: u16,
) -> Vec<u8> {
    let mut payload = Vec::with_capacity(payload_length as usize + 3);
    payload.push(1); // heartbeat_request
    put_u16(&mut payload, declared_length);
    payload.extend(std::iter::repeat(0x41).take(payload_length as usize));

    let mut record = Vec::with_capacity(payload.len() + 5);
    record.push(CONTENT_HEARTBEAT);
    record.extend_from_slice(&record_version(version));
    put_u16(&mut record, payload.len() as u16);
    record.extend_from_slice(&payload);
    record
}
