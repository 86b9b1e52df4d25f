use crate::model::{OutputConfig, OutputFormat};
use crate::report::ReportState;
use anyhow::Context;
use num_traits::ToPrimitive;
use std::fmt::Write as _;
use std::io::Write as _;

pub struct OutputSink {
    cfg: OutputConfig,
}

impl OutputSink {
    pub fn new(cfg: OutputConfig) -> Self {
        Self { cfg }
    }

    pub fn write_report(&self, state: &ReportState) -> anyhow::Result<()> {
        let rendered = match self.cfg.format {
            OutputFormat::Json => render_json(state)?,
            OutputFormat::Pretty => render_pretty(state),
        };
        match &self.cfg.path {
            Some(path) => std::fs::write(path, rendered.as_bytes())
                .with_context(|| format!("cannot write report to {}", path)),
            None => {
                let stdout = std::io::stdout();
                writeln!(stdout.lock(), "{}", rendered).context("cannot write report to stdout")
            }
        }
    }
}

pub fn render_json(state: &ReportState) -> anyhow::Result<String> {
    serde_json::to_string_pretty(state).context("report serialization failed")
}

pub fn render_pretty(state: &ReportState) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "scan of {} ({}:{})",
        state.target.host, state.target.addr, state.target.port
    );
    let _ = writeln!(
        out,
        "  alive: {:?}  speaks tls: {:?}",
        state.server_alive, state.speaks_tls
    );

    if !state.properties.is_empty() {
        let _ = writeln!(out, "properties:");
        for (property, outcome) in &state.properties {
            let _ = writeln!(out, "  {:?}: {}", property, outcome);
        }
    }

    if !state.skipped.is_empty() {
        let _ = writeln!(out, "not executed:");
        for skipped in &state.skipped {
            let _ = writeln!(out, "  {}: missing {}", skipped.probe, skipped.missing);
        }
    }

    if !state.leak_tests.is_empty() {
        let _ = writeln!(out, "information leak tests:");
        for test in &state.leak_tests {
            let _ = writeln!(
                out,
                "  {} / {:?} / {:?}: {} samples, distinct: {}",
                test.info.version,
                test.info.vector_strategy,
                test.info.record_strategy,
                test.sample_count(),
                test.is_significant_distinct()
            );
        }
    }

    if !state.raccoon.is_empty() {
        let _ = writeln!(out, "raccoon attack probabilities:");
        for record in &state.raccoon {
            let probability = record.probability.to_f64().unwrap_or(0.0);
            let _ = writeln!(
                out,
                "  {:?}: {} boundary bits, p = {:.3e}, {} psk candidates",
                record.construction,
                record.boundary_bits,
                probability,
                record.psk_candidates.len()
            );
        }
    }

    for timing in &state.timings {
        let _ = writeln!(
            out,
            "  {} {:?} in {}ms",
            timing.probe, timing.status, timing.duration_ms
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Outcome, ProbeId, ProbeStatus, Property, TargetView};
    use crate::probe::ProbeFindings;
    use crate::report::Report;
    use std::time::Duration;

    fn sample_state() -> ReportState {
        let report = Report::new(TargetView {
            host: "example.com".into(),
            addr: "192.0.2.1".into(),
            port: 443,
        });
        report.set_server_alive(true);
        report.set_speaks_tls(true);
        report.merge(
            ProbeId::ProtocolVersion,
            &[Property::SupportsTls12],
            ProbeFindings {
                properties: vec![(Property::SupportsTls12, Outcome::True)],
                ..Default::default()
            },
            ProbeStatus::Completed,
            Duration::from_millis(12),
        );
        report.finish();
        report.to_state()
    }

    #[test]
    fn json_rendering_round_trips() {
        let state = sample_state();
        let json = render_json(&state).unwrap();
        let parsed: ReportState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.properties, state.properties);
        assert_eq!(parsed.executed, state.executed);
    }

    #[test]
    fn pretty_rendering_mentions_the_findings() {
        let rendered = render_pretty(&sample_state());
        assert!(rendered.contains("example.com"));
        assert!(rendered.contains("SupportsTls12"));
        assert!(rendered.contains("protocol-version"));
    }

    #[test]
    fn report_can_be_written_to_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let sink = OutputSink::new(crate::model::OutputConfig {
            format: crate::model::OutputFormat::Json,
            path: Some(path.to_string_lossy().into_owned()),
        });
        sink.write_report(&sample_state()).unwrap();
        let written = std::fs::read_to_string(path).unwrap();
        assert!(written.contains("SupportsTls12"));
    }
}
