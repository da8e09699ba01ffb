//! vaultops-daemon - GitOps reconciler for a Vault-style HTTP API
//!
//! Watches a signed Git branch and applies the declarative resources it
//! contains to the configured API. Runs in the foreground; process
//! supervision is the platform's job (systemd, a container runtime).

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use secrecy::SecretString;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use vaultops_core::apply::Target;
use vaultops_core::cancel::CancelFlag;
use vaultops_core::gate::SignaturePolicy;
use vaultops_core::source::{BasicAuth, FetchOptions};
use vaultops_core::store::RootConfig;
use vaultops_daemon::config::{ReconcilerConfig, required_env};
use vaultops_daemon::file_store::FileStateStore;
use vaultops_daemon::git_cli::GitCliSource;
use vaultops_daemon::gpg::GpgVerifier;
use vaultops_daemon::poller::Poller;

/// vaultops daemon - signed-GitOps reconciler
#[derive(Parser, Debug)]
#[command(name = "vaultops-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "vaultops.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log to file instead of stdout
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Run a single reconcile cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    if let Some(log_file) = &args.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .context("failed to open log file")?;
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let config = ReconcilerConfig::from_file(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;

    let trusted_keys = config.load_trusted_keys().context("loading trusted keys")?;
    if config.signatures.required == 0 {
        warn!("signature verification disabled (signatures.required = 0)");
    }

    let token = required_env(&config.target.token_env).context("reading API token")?;
    let target = Target::new(config.target.endpoint.clone(), SecretString::new(token));

    let auth = match (&config.git.username, &config.git.password_env) {
        (Some(username), Some(password_env)) => Some(BasicAuth {
            username: username.clone(),
            password: SecretString::new(
                required_env(password_env).context("reading git password")?,
            ),
        }),
        _ => None,
    };
    let ca_bundle = match &config.git.ca_bundle_path {
        Some(path) => Some(
            std::fs::read(path)
                .with_context(|| format!("reading CA bundle {}", path.display()))?,
        ),
        None => None,
    };
    let fetch = FetchOptions {
        url: config.git.url.clone(),
        branch: config.git.branch.clone(),
        auth,
        ca_bundle,
        max_clone_size_bytes: config.git.max_clone_size_bytes,
    };
    let policy = SignaturePolicy {
        trusted_keys,
        required: config.signatures.required,
    };

    let store = FileStateStore::open(&config.reconcile.state_dir)
        .context("opening state directory")?;
    RootConfig {
        path: config.reconcile.root_path.clone(),
    }
    .save(&store)
    .context("persisting loader root configuration")?;

    let poller = Poller::new(
        Box::new(GitCliSource::new()),
        Box::new(GpgVerifier::new()),
        Box::new(store),
        fetch,
        policy,
        target,
        config.reconcile.interval,
    );

    info!(
        url = %config.git.url,
        branch = %config.git.branch,
        endpoint = %config.target.endpoint,
        "vaultops daemon started"
    );

    let cancel = CancelFlag::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received; finishing current cycle");
        signal_cancel.cancel();
    });

    if args.once {
        poller.tick(&cancel).await;
    } else {
        poller.run(&cancel).await;
    }

    info!("daemon shutdown complete");
    Ok(())
}

/// Resolves when SIGTERM or SIGINT arrives (ctrl-c elsewhere).
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                warn!(error = %err, "failed to register SIGTERM handler");
                return std::future::pending().await;
            },
        };
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(sigint) => sigint,
            Err(err) => {
                warn!(error = %err, "failed to register SIGINT handler");
                return std::future::pending().await;
            },
        };
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to wait for ctrl-c");
            std::future::pending::<()>().await;
        }
    }
}
