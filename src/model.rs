use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSpec {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct Target {
    pub original: TargetSpec,
    pub resolved: SocketAddr,
}

impl Target {
    pub fn view(&self) -> TargetView {
        TargetView {
            host: self.original.host.clone(),
            addr: self.resolved.ip().to_string(),
            port: self.resolved.port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetView {
    pub host: String,
    pub addr: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub target: TargetSpec,
    pub detail: ScanDetail,
    pub probes: Option<Vec<ProbeId>>,
    pub concurrency: usize,
    pub connect_timeout: Duration,
    pub exchange_timeout: Duration,
    pub probe_timeout: Duration,
    pub poll_interval: Duration,
    pub dh_samples: usize,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub format: OutputFormat,
    pub path: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum OutputFormat {
    Json,
    Pretty,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Pretty => write!(f, "pretty"),
        }
    }
}

/// How thorough the scan is. Steers leak-test sample sizes and which
/// malformation vectors get exercised.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum ScanDetail {
    Quick,
    Normal,
    Detailed,
    All,
}

impl ScanDetail {
    pub fn at_least(self, other: ScanDetail) -> bool {
        self >= other
    }
}

impl fmt::Display for ScanDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ScanDetail::Quick => "quick",
            ScanDetail::Normal => "normal",
            ScanDetail::Detailed => "detailed",
            ScanDetail::All => "all",
        };
        write!(f, "{}", label)
    }
}

/// The closed set of values a report property can take. Probe bodies and
/// requirements never exchange free-form strings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Outcome {
    True,
    False,
    Uncertain,
    CouldNotTest,
    ErrorDuringTest,
    Timeout,
    Unsupported,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Outcome::True => "true",
            Outcome::False => "false",
            Outcome::Uncertain => "uncertain",
            Outcome::CouldNotTest => "could not test",
            Outcome::ErrorDuringTest => "error during test",
            Outcome::Timeout => "timeout",
            Outcome::Unsupported => "unsupported",
        };
        write!(f, "{}", label)
    }
}

/// Everything the shipped probe set can assert about a target.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Property {
    SupportsSsl3,
    SupportsTls10,
    SupportsTls11,
    SupportsTls12,
    SupportsTls13,
    SupportsLegacyPrf,
    SupportsSha256Prf,
    SupportsSha384Prf,
    SupportsBlockCiphers,
    SupportsDhe,
    ReusesDhPublicKey,
    VulnerableToPaddingOracle,
    VulnerableToHeartbleed,
    VulnerableToRaccoon,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum ProbeId {
    ProtocolVersion,
    CipherSuite,
    DhValue,
    PaddingOracle,
    Heartbleed,
}

impl fmt::Display for ProbeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProbeId::ProtocolVersion => "protocol-version",
            ProbeId::CipherSuite => "cipher-suite",
            ProbeId::DhValue => "dh-value",
            ProbeId::PaddingOracle => "padding-oracle",
            ProbeId::Heartbleed => "heartbleed",
        };
        write!(f, "{}", label)
    }
}

/// Terminal state of a scheduled probe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProbeStatus {
    Completed,
    Failed,
    Killed,
    Skipped,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TlsVersion {
    Ssl3,
    Tls10,
    Tls11,
    Tls12,
    Tls13,
}

impl TlsVersion {
    pub fn wire_bytes(self) -> [u8; 2] {
        match self {
            TlsVersion::Ssl3 => [0x03, 0x00],
            TlsVersion::Tls10 => [0x03, 0x01],
            TlsVersion::Tls11 => [0x03, 0x02],
            TlsVersion::Tls12 => [0x03, 0x03],
            // TLS 1.3 keeps the 1.2 legacy version on the record layer and
            // negotiates via the supported_versions extension.
            TlsVersion::Tls13 => [0x03, 0x03],
        }
    }

    pub fn from_wire(bytes: [u8; 2]) -> Option<TlsVersion> {
        match bytes {
            [0x03, 0x00] => Some(TlsVersion::Ssl3),
            [0x03, 0x01] => Some(TlsVersion::Tls10),
            [0x03, 0x02] => Some(TlsVersion::Tls11),
            [0x03, 0x03] => Some(TlsVersion::Tls12),
            [0x03, 0x04] => Some(TlsVersion::Tls13),
            _ => None,
        }
    }

    pub fn is_pre_tls13(self) -> bool {
        !matches!(self, TlsVersion::Tls13)
    }

    pub fn support_property(self) -> Property {
        match self {
            TlsVersion::Ssl3 => Property::SupportsSsl3,
            TlsVersion::Tls10 => Property::SupportsTls10,
            TlsVersion::Tls11 => Property::SupportsTls11,
            TlsVersion::Tls12 => Property::SupportsTls12,
            TlsVersion::Tls13 => Property::SupportsTls13,
        }
    }
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TlsVersion::Ssl3 => "SSLv3",
            TlsVersion::Tls10 => "TLS 1.0",
            TlsVersion::Tls11 => "TLS 1.1",
            TlsVersion::Tls12 => "TLS 1.2",
            TlsVersion::Tls13 => "TLS 1.3",
        };
        write!(f, "{}", label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_view_formats() {
        let target = Target {
            original: TargetSpec {
                host: "example".into(),
                port: 443,
            },
            resolved: "127.0.0.1:443".parse().unwrap(),
        };
        let view = target.view();
        assert_eq!(view.addr, "127.0.0.1");
        assert_eq!(view.port, 443);
    }

    #[test]
    fn detail_levels_are_ordered() {
        assert!(ScanDetail::Normal.at_least(ScanDetail::Quick));
        assert!(ScanDetail::Normal.at_least(ScanDetail::Normal));
        assert!(!ScanDetail::Normal.at_least(ScanDetail::Detailed));
        assert!(ScanDetail::All.at_least(ScanDetail::Detailed));
    }

    #[test]
    fn wire_versions_round_trip_below_tls13() {
        for version in [
            TlsVersion::Ssl3,
            TlsVersion::Tls10,
            TlsVersion::Tls11,
            TlsVersion::Tls12,
        ] {
            assert_eq!(TlsVersion::from_wire(version.wire_bytes()), Some(version));
        }
    }
}
