use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use handoff_config::{
    validate_config, AppConfig, ConfigLoader, ConfigWatcher, LogFormat, StoreBackend, ENV_PREFIX,
};
use handoff_coordination::{ClaimJournal, ItemStore, ScheduleRequestStore};
use handoff_metrics::{init_tracing, MetricsCollector, MetricsServer};
use tracing::{error, info, warn};
use unlost_handoff::{in_memory_service, sqlite_service, HandoffService};

/// Coordination service for UnLost item handoffs
#[derive(Debug, Parser)]
#[command(name = "handoffd", version, about)]
struct Cli {
    /// Config file (TOML, YAML or JSON). Without one, defaults plus
    /// `UNLOST_HANDOFF_*` environment variables are used.
    #[arg(short, long, env = "UNLOST_HANDOFF_CONFIG")]
    config: Option<PathBuf>,

    /// Validate the configuration and exit
    #[arg(long)]
    check_config: bool,

    /// Do not reload the config file when it changes
    #[arg(long)]
    no_watch: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigLoader::from_file_with_env(path, ENV_PREFIX)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ConfigLoader::from_env()?,
    };
    validate_config(&config)?;

    if cli.check_config {
        println!("configuration OK");
        return Ok(());
    }

    let collector = Arc::new(MetricsCollector::new());
    init_tracing(
        config.service.log_format == LogFormat::Json,
        &config.service.log_level,
        collector.clone(),
    )?;

    info!(
        environment = ?config.service.environment,
        backend = ?config.store.backend,
        "starting handoffd"
    );

    match config.store.backend {
        StoreBackend::Memory => {
            let service = in_memory_service(&config).with_collector(collector);
            run(service, &config, &cli).await
        }
        StoreBackend::Sqlite => {
            let service = sqlite_service(&config)
                .await
                .with_context(|| format!("opening {}", config.store.sqlite_path))?
                .with_collector(collector);
            run(service, &config, &cli).await
        }
    }
}

async fn run<S, I>(
    mut service: HandoffService<S, I>,
    config: &AppConfig,
    cli: &Cli,
) -> anyhow::Result<()>
where
    S: ScheduleRequestStore + ClaimJournal + 'static,
    I: ItemStore + 'static,
{
    service.start().await?;

    let metrics = config.service.metrics_enabled.then(|| {
        let server = MetricsServer::new(service.collector().clone(), &config.service.metrics_addr);
        tokio::spawn(server.serve(service.shutdown_signal()))
    });

    let config_watch = match (&cli.config, cli.no_watch) {
        (Some(path), false) => {
            let watcher = ConfigWatcher::with_env(path.clone(), ENV_PREFIX)?;
            let handle = watcher.start_watching()?;
            service.follow_config(watcher.subscribe());
            Some((watcher, handle))
        }
        _ => None,
    };

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("shutdown requested");

    service.shutdown().await;

    if let Some((_watcher, handle)) = config_watch {
        handle.abort();
    }

    if let Some(metrics) = metrics {
        match metrics.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "metrics server failed"),
            Err(e) => error!(error = %e, "metrics server task panicked"),
        }
    }

    Ok(())
}
