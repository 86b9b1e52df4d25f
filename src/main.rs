use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tls_prober::cli::Cli;
use tls_prober::engine::Engine;
use tls_prober::executor::TcpScriptExecutor;
use tls_prober::model::Target;
use tls_prober::output::OutputSink;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    let cfg = cli.into_config()?;

    let resolved = tokio::net::lookup_host((cfg.target.host.as_str(), cfg.target.port))
        .await
        .with_context(|| format!("cannot resolve {}", cfg.target.host))?
        .next()
        .ok_or_else(|| anyhow::anyhow!("no address found for {}", cfg.target.host))?;
    let target = Target {
        original: cfg.target.clone(),
        resolved,
    };

    let executor = Arc::new(TcpScriptExecutor::new(
        target.clone(),
        cfg.connect_timeout,
        cfg.exchange_timeout,
    ));
    let sink = OutputSink::new(cfg.output.clone());
    let engine = Engine::new(cfg, target.view(), executor);
    let report = engine.run().await;
    sink.write_report(&report.to_state())?;

    Ok(())
}
