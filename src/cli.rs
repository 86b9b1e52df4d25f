use crate::model::{Config, OutputConfig, OutputFormat, ProbeId, ScanDetail, TargetSpec};
use clap::{ArgAction, Parser};
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(author, version, about = "TLS endpoint vulnerability prober", long_about = None)]
pub struct Cli {
    /// Host to scan
    #[arg(short = 'H', long = "host", value_name = "HOST")]
    pub host: String,

    /// Port to scan
    #[arg(short = 'p', long = "port", default_value_t = 443)]
    pub port: u16,

    /// Scan thoroughness
    #[arg(long = "detail", value_enum, default_value_t = ScanDetail::Normal)]
    pub detail: ScanDetail,

    /// Restrict the scan to specific probes (repeatable)
    #[arg(long = "probe", value_enum)]
    pub probes: Vec<ProbeId>,

    /// Concurrent probe limit
    #[arg(long = "concurrency", default_value_t = 4)]
    pub concurrency: usize,

    /// Connect timeout in milliseconds
    #[arg(long = "connect-timeout", default_value_t = 1500)]
    pub connect_timeout_ms: u64,

    /// Timeout per scripted exchange in milliseconds
    #[arg(long = "exchange-timeout", default_value_t = 5000)]
    pub exchange_timeout_ms: u64,

    /// Inactivity bound per running probe in seconds
    #[arg(long = "probe-timeout", default_value_t = 1800)]
    pub probe_timeout_secs: u64,

    /// Scheduler poll interval in milliseconds
    #[arg(long = "poll-interval", default_value_t = 250)]
    pub poll_interval_ms: u64,

    /// Handshakes sampled for DH public value reuse
    #[arg(long = "dh-samples", default_value_t = 6)]
    pub dh_samples: usize,

    /// Output format
    #[arg(long = "output", default_value_t = OutputFormat::Json)]
    pub output: OutputFormat,

    /// Write the report to a file instead of stdout
    #[arg(long = "output-file", value_name = "FILE")]
    pub output_file: Option<String>,

    /// Shorthand for --output pretty
    #[arg(long = "pretty", action = ArgAction::SetTrue)]
    pub pretty: bool,
}

impl Cli {
    pub fn into_config(self) -> anyhow::Result<Config> {
        if self.host.trim().is_empty() {
            anyhow::bail!("--host must not be empty");
        }
        if self.concurrency == 0 {
            anyhow::bail!("concurrency must be greater than zero");
        }
        if self.probe_timeout_secs == 0 {
            anyhow::bail!("probe timeout must be greater than zero");
        }
        if self.dh_samples < 2 {
            anyhow::bail!("dh-samples must be at least 2 to detect reuse");
        }

        Ok(Config {
            target: TargetSpec {
                host: self.host,
                port: self.port,
            },
            detail: self.detail,
            probes: if self.probes.is_empty() {
                None
            } else {
                Some(self.probes)
            },
            concurrency: self.concurrency,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            exchange_timeout: Duration::from_millis(self.exchange_timeout_ms),
            probe_timeout: Duration::from_secs(self.probe_timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            dh_samples: self.dh_samples,
            output: OutputConfig {
                format: if self.pretty {
                    OutputFormat::Pretty
                } else {
                    self.output
                },
                path: self.output_file,
            },
        })
    }
}
