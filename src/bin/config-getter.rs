//! config-getter CLI: run the controller, or check a directive value.

use clap::{Parser, Subcommand};
use config_getter::cluster::memory::MemoryCluster;
use config_getter::config::Config;
use config_getter::controller::Controller;
use config_getter::event::TracingRecorder;
use config_getter::fetch::HttpFetcher;
use config_getter::handler::{AnnotationHandler, Directive, normalize_url};
use config_getter::telemetry::{TelemetryConfig, init_telemetry};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "config-getter", about = "Fetch annotated URLs into resource data")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller until interrupted
    Serve {
        /// TOML file of `[[resource]]` tables to load into the in-memory store
        #[arg(long)]
        resources: PathBuf,
        /// Worker loops (overrides WORKERS)
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Parse and normalize a directive value without fetching it
    Check {
        /// Directive value, e.g. `joke=curl-a-joke.herokuapp.com`
        directive: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { resources, workers } => cmd_serve(resources, workers).await,
        Command::Check { directive } => cmd_check(&directive),
    }
}

async fn cmd_serve(resources: PathBuf, workers: Option<usize>) -> anyhow::Result<()> {
    let mut config = Config::from_env()?;
    if let Some(workers) = workers {
        anyhow::ensure!(workers > 0, "--workers must be at least 1");
        config.workers = workers;
    }

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "config-getter".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let cluster = MemoryCluster::load_seed(&resources)?;
    let fetcher = HttpFetcher::new(config.fetch_timeout)?;

    let controller = Controller::new(
        Arc::new(cluster.informer()),
        Arc::new(cluster.clone()),
        Arc::new(AnnotationHandler::new(Arc::new(fetcher))),
        Arc::new(TracingRecorder),
        config.controller_config(),
    );

    let stop = CancellationToken::new();
    let signal = stop.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        signal.cancel();
    });

    controller.run(stop).await?;

    println!("{}", serde_json::to_string_pretty(&cluster.resources())?);
    Ok(())
}

fn cmd_check(value: &str) -> anyhow::Result<()> {
    let directive = Directive::parse(value)?;
    let url = normalize_url(&directive.target)?;

    println!("Key:  {}", directive.key);
    println!("URL:  {url}");
    Ok(())
}
