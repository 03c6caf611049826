//! Serac Server
//!
//! Loads `serac.yaml`, keeps one configuration entry per location and polls
//! the upstream sources until interrupted.
//!
//! Signals: SIGHUP reloads the configuration, SIGUSR1 logs diagnostics for
//! every entry, Ctrl-C shuts down.

mod reload;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serac_config::{PollingConfig, SeracConfig};
use serac_config_entries::ConfigEntries;
use serac_coordinator::{PollSettings, RetryPolicy, SeracIntegration};
use serac_registries::Registries;
use serac_sources::{HttpSources, SourceSettings};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// The running instance
pub struct Serac {
    /// Host entity and device registries
    pub registries: Arc<Registries>,
    /// One entry per configured location
    pub entries: Arc<ConfigEntries>,
    pub integration: Arc<SeracIntegration>,
    polling: PollingConfig,
}

impl Serac {
    pub fn new(config: &SeracConfig) -> Result<Self> {
        let registries = Arc::new(Registries::new());
        let entries = Arc::new(ConfigEntries::new());
        let sources = HttpSources::new(SourceSettings::default().timeout(config.polling.timeout()))
            .context("failed to build HTTP client")?;
        let integration = Arc::new(SeracIntegration::new(
            entries.clone(),
            registries.clone(),
            Arc::new(sources),
            poll_settings(&config.polling),
        ));

        Ok(Self {
            registries,
            entries,
            integration,
            polling: config.polling,
        })
    }

    /// Re-read the configuration directory and apply its locations
    pub async fn reload(&self, config_dir: &Path) {
        let config = match SeracConfig::load(config_dir) {
            Ok(config) => config,
            Err(e) => {
                error!("Reload failed, keeping current configuration: {}", e);
                return;
            }
        };
        if poll_settings(&config.polling) != poll_settings(&self.polling) {
            warn!("Polling settings changed; they apply after a restart");
        }
        reload::apply_locations(&self.entries, &config).await;
    }

    pub async fn dump_diagnostics(&self) {
        for entry_id in self.entries.entry_ids() {
            let Some(diagnostics) = self.integration.diagnostics(&entry_id).await else {
                continue;
            };
            match diagnostics.to_json_string() {
                Ok(json) => info!(entry_id = %entry_id, "Diagnostics: {}", json),
                Err(e) => error!(entry_id = %entry_id, "Cannot serialize diagnostics: {}", e),
            }
        }
    }
}

fn poll_settings(polling: &PollingConfig) -> PollSettings {
    PollSettings {
        weather_interval: polling.weather(),
        bulletin_interval: polling.bulletin(),
        alert_interval: polling.alert(),
        retry: RetryPolicy::standard(),
    }
}

fn init_tracing(level: &str) -> Result<()> {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("invalid log level '{}'", level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}

enum Signal {
    Shutdown,
    Reload,
    Diagnostics,
}

#[cfg(unix)]
struct Signals {
    hangup: tokio::signal::unix::Signal,
    user1: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn install() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            hangup: signal(SignalKind::hangup()).context("failed to listen for SIGHUP")?,
            user1: signal(SignalKind::user_defined1()).context("failed to listen for SIGUSR1")?,
        })
    }

    async fn next(&mut self) -> Signal {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => Signal::Shutdown,
            _ = self.hangup.recv() => Signal::Reload,
            _ = self.user1.recv() => Signal::Diagnostics,
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn install() -> Result<Self> {
        Ok(Self)
    }

    async fn next(&mut self) -> Signal {
        match tokio::signal::ctrl_c().await {
            Ok(()) => Signal::Shutdown,
            Err(e) => {
                error!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
                Signal::Shutdown
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_dir = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let config = SeracConfig::load(&config_dir)
        .with_context(|| format!("failed to load configuration from {}", config_dir.display()))?;

    init_tracing(&config.logging.level)?;
    info!(
        "Starting Serac with {} locations from {}",
        config.locations.len(),
        config_dir.display()
    );

    let serac = Serac::new(&config)?;
    let cancel = CancellationToken::new();
    let listener = serac.integration.spawn_listener(cancel.clone());

    reload::apply_locations(&serac.entries, &config).await;
    info!("Serac is running");

    let mut signals = Signals::install()?;
    loop {
        match signals.next().await {
            Signal::Shutdown => break,
            Signal::Reload => {
                info!("Reloading configuration");
                serac.reload(&config_dir).await;
            }
            Signal::Diagnostics => serac.dump_diagnostics().await,
        }
    }

    info!("Shutting down...");
    cancel.cancel();
    if let Err(e) = listener.await {
        warn!("Configuration listener ended abnormally: {}", e);
    }
    serac.integration.shutdown().await;
    Ok(())
}
