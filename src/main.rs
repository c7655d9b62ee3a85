use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cachefront::cache::{CacheStorage, FileStorage, MemoryStorage};
use cachefront::config::{CliSettings, Config};
use cachefront::fetch::{Fetch, HttpFetcher};
use cachefront::lifecycle::{CacheFirstWorker, Registration, Runtime};
use cachefront::preload::NavigationPreloadManager;
use cachefront::server::Server;

const INSTALL_RETRY_INITIAL: Duration = Duration::from_secs(1);
const INSTALL_RETRY_MAX: Duration = Duration::from_secs(300);

/// Cache-first offline agent for a web application.
#[derive(Debug, Parser)]
#[command(name = "cachefront", version, about)]
struct Cli {
    /// Path to the configuration file (defaults to ./cachefront.toml if present).
    #[arg(short, long, env = "CACHEFRONT_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on.
    #[arg(short, long)]
    port: Option<u16>,

    /// Origin of the fronted application.
    #[arg(long, env = "CACHEFRONT_ORIGIN")]
    origin: Option<String>,

    /// Directory for the durable cache store.
    #[arg(long)]
    cache_dir: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cachefront=info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = CliSettings {
        host: cli.host,
        port: cli.port,
        origin: cli.origin,
        cache_dir: cli.cache_dir,
    };
    let config =
        Config::load(cli.config.as_deref(), Some(&settings)).context("loading configuration")?;

    let origin = config.origin()?;
    let assets = config.assets()?;
    let fallback = config.fallback()?;

    let storage: Arc<dyn CacheStorage> = match &config.cache.dir {
        Some(dir) => {
            info!(dir = %dir.display(), "using file cache");
            Arc::new(FileStorage::new(dir.clone()))
        }
        None => {
            warn!("no cache.dir configured, cache will not survive restarts");
            Arc::new(MemoryStorage::new())
        }
    };
    let fetcher: Arc<dyn Fetch> =
        Arc::new(HttpFetcher::new(config.timeout()).context("building HTTP client")?);

    let worker = CacheFirstWorker::new(
        Arc::clone(&storage),
        Arc::clone(&fetcher),
        &config.cache.name,
        assets,
        &fallback,
    );

    let mut registration = Registration::new(origin.clone());
    if config.preload.enabled {
        registration = registration.with_navigation_preload(NavigationPreloadManager::with_header_value(
            config.preload.header_value.as_str(),
        ));
    }

    let runtime = Arc::new(Runtime::new(Arc::new(worker), fetcher, registration));
    let server = Server::bind(config.listen_addr(), origin).await?;

    // Requests pass through to the origin until install succeeds.
    let installer = Arc::clone(&runtime);
    tokio::spawn(async move {
        let attempts = installer
            .start_with_retry(INSTALL_RETRY_INITIAL, INSTALL_RETRY_MAX)
            .await;
        info!(attempts, "worker ready, serving cache-first");
    });
    tokio::select! {
        result = server.run(runtime) => result?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    Ok(())
}
