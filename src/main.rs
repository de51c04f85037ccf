//! replay-guard: replays captured requests to user-supplied targets without
//! letting them reach internal networks.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use replay_guard::config::{Overrides, ReplayConfig};
use replay_guard::server::{router, AppState, TrustedHeaderAuthorizer};
use replay_guard::{
    InMemoryRequestStore, ReplayExecutor, ReplayService, TargetValidator, TracingAuditSink,
};

/// Replays captured requests to user-chosen URLs without reaching internal networks.
#[derive(Parser, Debug)]
#[command(name = "replay-guard", version, about = "SSRF-safe request replay server")]
struct Cli {
    /// Listen address, e.g. 127.0.0.1:8080
    #[arg(long, env = "REPLAY_GUARD_LISTEN")]
    listen: Option<String>,

    /// Config file path
    #[arg(long, default_value = "replay-guard.toml")]
    config: PathBuf,

    /// JSON file of captured requests to load at startup
    #[arg(long)]
    requests: Option<PathBuf>,

    /// DNS lookup timeout in milliseconds
    #[arg(long)]
    dns_timeout_ms: Option<u64>,

    /// Whole-replay timeout in milliseconds
    #[arg(long)]
    replay_timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config = match ReplayConfig::load(
        Some(&cli.config),
        Overrides {
            listen: cli.listen,
            requests: cli.requests,
            dns_timeout_ms: cli.dns_timeout_ms,
            replay_timeout_ms: cli.replay_timeout_ms,
        },
    ) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let store = match &config.requests {
        Some(path) => match InMemoryRequestStore::from_json_file(path) {
            Ok(store) => store,
            Err(e) => {
                error!(error = %e, "failed to load captured requests");
                std::process::exit(1);
            }
        },
        None => InMemoryRequestStore::new(),
    };

    let validator = TargetValidator::new(config.policy(), config.resolver.build())
        .with_dns_timeout(config.dns_timeout);
    let executor = ReplayExecutor::new(config.replay_timeout, config.max_body_bytes);
    let service = ReplayService::new(validator, executor, Arc::new(store))
        .with_audit_sink(Arc::new(TracingAuditSink));
    let app = router(AppState::new(service, Arc::new(TrustedHeaderAuthorizer)));

    let listener = match tokio::net::TcpListener::bind(config.listen).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, addr = %config.listen, "failed to bind");
            std::process::exit(1);
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.listen,
        dns_timeout_ms = config.dns_timeout.as_millis() as u64,
        replay_timeout_ms = config.replay_timeout.as_millis() as u64,
        "starting replay-guard"
    );

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "server error");
        std::process::exit(1);
    }

    info!("replay-guard stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await;

    info!("received shutdown signal");
}
