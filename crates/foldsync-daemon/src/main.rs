//! foldsync Daemon - Background folder synchronization service
//!
//! This binary runs as a long-lived service and handles:
//! - Loading and validating the YAML configuration
//! - Opening the SQLite state database
//! - Applying the configured sync flows
//! - Running the watchers, dispatcher and periodic timers
//! - Graceful shutdown on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! All engine state lives in one [`SyncContext`] built at startup. The main
//! task only waits for a shutdown signal; a `CancellationToken` triggered by
//! SIGTERM or SIGINT starts the orderly teardown. With `--once` the daemon
//! instead runs a single reconciliation pass, drains the queues and exits.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use foldsync_cache::{DatabasePool, SqliteStateRepository};
use foldsync_core::config::{Config, LoggingConfig};
use foldsync_core::ports::IStateRepository;
use foldsync_remote::{RemoteCopyClient, ResticSnapshot};
use foldsync_sync::filesystem::LocalFileSystemAdapter;
use foldsync_sync::SyncContext;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "foldsyncd", version, about = "Folder synchronization daemon")]
struct Cli {
    /// Use alternate config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run one reconciliation pass, drain the queues and exit
    #[arg(long)]
    once: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    check_config: bool,
}

// ============================================================================
// DaemonService
// ============================================================================

/// Owns the database pool and the sync context for the process lifetime
struct DaemonService {
    config: Config,
    db_pool: DatabasePool,
    context: Arc<SyncContext>,
    shutdown: CancellationToken,
}

impl DaemonService {
    /// Opens the database and builds the sync context with its collaborators
    async fn new(config: Config, shutdown: CancellationToken) -> Result<Self> {
        let db_path = &config.database.path;
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let db_pool = DatabasePool::new(db_path)
            .await
            .context("Failed to open database")?;
        info!(path = %db_path.display(), "State database opened");

        let repo: Arc<dyn IStateRepository> =
            Arc::new(SqliteStateRepository::new(db_pool.pool().clone()));
        let mut context = SyncContext::new(&config, repo, Arc::new(LocalFileSystemAdapter::new()));

        if config.remote_copy.enabled {
            let base_url = config
                .remote_copy
                .base_url
                .clone()
                .context("remote_copy.base_url is required when remote copy is enabled")?;
            let client = RemoteCopyClient::new(base_url.as_str())
                .context("Failed to build remote-copy client")?;
            info!(%base_url, "Remote-copy service configured");
            context = context.with_remote_copy(Arc::new(client));
        }

        if config.snapshot.enabled {
            let snapshot = ResticSnapshot::from_config(&config.snapshot)
                .context("Failed to configure snapshots")?;
            info!(binary = %config.snapshot.binary, "Snapshot service configured");
            context = context.with_snapshot(Arc::new(snapshot));
        }

        Ok(Self {
            config,
            db_pool,
            context: Arc::new(context),
            shutdown,
        })
    }

    /// Ensure every configured flow; a bad definition is logged and skipped
    async fn apply_flows(&self) -> usize {
        let mut applied = 0;
        for definition in &self.config.flows {
            match self.context.define_flow(definition).await {
                Ok(flow) => {
                    info!(
                        flow_id = %flow.id,
                        name = %flow.name,
                        flow_type = %flow.flow_type,
                        status = %flow.status,
                        "Flow ready"
                    );
                    applied += 1;
                }
                Err(e) => error!(name = %definition.name, error = %e, "Failed to apply flow"),
            }
        }
        applied
    }

    /// Run until a shutdown signal arrives
    async fn run(&self) -> Result<()> {
        let applied = self.apply_flows().await;
        info!(flows = applied, configured = self.config.flows.len(), "Configured flows applied");

        self.context.start().await.context("Failed to start sync context")?;
        info!("foldsyncd running");

        self.shutdown.cancelled().await;
        info!("Shutdown signal received");

        self.context.shutdown().await;
        self.db_pool.close().await;
        Ok(())
    }

    /// One reconciliation pass over every folder and flow, then exit
    async fn run_once(&self) -> Result<()> {
        let applied = self.apply_flows().await;
        self.context.activate_all().await?;
        self.context.recover_interrupted().await?;

        let (scans, checks) = self.context.reconcile_all().await?;
        let handled = self.context.drain().await;
        let realigned = self.context.check_consistency().await?;

        let drifted = scans.iter().filter(|s| !s.in_sync()).count()
            + checks.iter().filter(|c| !c.in_sync()).count();
        info!(
            flows = applied,
            folders = scans.len(),
            drifted,
            handled,
            realigned,
            "Single pass completed"
        );

        self.context.shutdown().await;
        self.db_pool.close().await;
        Ok(())
    }
}

// ============================================================================
// Bootstrap
// ============================================================================

/// Load `--config` if given (must exist), else the default path if present,
/// else built-in defaults
fn load_config(explicit: Option<&Path>) -> Result<Config> {
    match explicit {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => {
            let path = Config::default_path();
            if path.exists() {
                Config::load(&path)
                    .with_context(|| format!("Failed to load configuration from {}", path.display()))
            } else {
                Ok(Config::default())
            }
        }
    }
}

/// `RUST_LOG` wins; otherwise the configured level
fn build_filter(logging: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
}

fn init_logging(logging: &LoggingConfig) {
    let filter = build_filter(logging);
    if logging.format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C)"),
        _ = terminate => info!("Received SIGTERM"),
    }

    token.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_logging(&config.logging);

    let problems = config.validate();
    if !problems.is_empty() {
        for problem in &problems {
            error!(field = %problem.field, "{}", problem.message);
        }
        anyhow::bail!("Invalid configuration ({} problems)", problems.len());
    }
    if cli.check_config {
        info!(flows = config.flows.len(), "Configuration is valid");
        return Ok(());
    }

    info!(version = env!("CARGO_PKG_VERSION"), "foldsync daemon starting (foldsyncd)");

    let shutdown_token = CancellationToken::new();
    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let service = DaemonService::new(config, shutdown_token).await?;
    let result = if cli.once {
        service.run_once().await
    } else {
        service.run().await
    };

    match &result {
        Ok(()) => info!("foldsync daemon shut down gracefully"),
        Err(e) => error!(error = %e, "foldsync daemon exiting with error"),
    }
    result
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use foldsync_core::config::FlowDefinition;
    use foldsync_core::domain::{FlowType, LayoutMode};

    use super::*;

    #[test]
    fn test_cli_parses_flags() {
        let cli = Cli::parse_from(["foldsyncd", "--config", "/etc/foldsync.yaml", "--once"]);
        assert_eq!(cli.config.as_deref(), Some(Path::new("/etc/foldsync.yaml")));
        assert!(cli.once);
        assert!(!cli.check_config);
    }

    #[test]
    fn test_explicit_config_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(Some(&dir.path().join("missing.yaml"))).unwrap_err();
        assert!(format!("{err:#}").contains("missing.yaml"));
    }

    #[test]
    fn test_explicit_config_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "sync:\n  workers: 9\nlogging:\n  format: json\n").unwrap();

        let config = load_config(Some(&path)).unwrap();

        assert_eq!(config.sync.workers, 9);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_empty());
    }

    #[tokio::test]
    async fn test_enabled_remote_copy_requires_base_url() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.database.path = dir.path().join("state.db");
        config.remote_copy.enabled = true;

        let result = DaemonService::new(config, CancellationToken::new()).await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_single_pass_propagates_configured_flows() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("camera");
        let internal = dir.path().join("library");
        std::fs::create_dir_all(source.join("2024")).unwrap();
        std::fs::create_dir_all(&internal).unwrap();
        std::fs::write(source.join("2024/img.jpg"), b"pixels").unwrap();

        let mut config = Config::default();
        config.database.path = dir.path().join("db/state.db");
        config.sync.poll_interval_ms = 60_000;
        config.flows.push(FlowDefinition {
            name: "ingest".to_string(),
            source: source.clone(),
            destination: internal.clone(),
            flow_type: FlowType::SourceToInternal,
            layout: LayoutMode::Mirror,
            filters: Vec::new(),
        });

        let service = DaemonService::new(config, CancellationToken::new()).await.unwrap();
        service.run_once().await.unwrap();

        assert_eq!(std::fs::read(internal.join("2024/img.jpg")).unwrap(), b"pixels");
        assert!(dir.path().join("db/state.db").exists());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.database.path = dir.path().join("state.db");
        let token = CancellationToken::new();

        let service = DaemonService::new(config, token.clone()).await.unwrap();
        let handle = tokio::spawn(async move { service.run().await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(10), handle).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
    }
}
