use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde_json::json;
use tracing::{Level, info, warn};
use tracing_subscriber::EnvFilter;

use chatwatch::analytics::DisabledAnalytics;
use chatwatch::analytics::axiom::AxiomAnalytics;
use chatwatch::config::BotConfig;
use chatwatch::engine::bot::{self, BotContext, BotState};
use chatwatch::engine::capabilities::{AnalyticsBackend, LogSink};
use chatwatch::engine::discovery::DiscoverySettings;
use chatwatch::irc::client::TwitchClient;
use chatwatch::telemetry::TracingSink;
use chatwatch::telemetry::axiom::AxiomSink;

/// Twitch chat monitoring bot with analytics-driven channel discovery.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(short, long, default_value = "chatwatch.toml")]
    config: String,

    /// Bootstrap channel (repeatable). Replaces the configured list.
    #[arg(short, long = "bootstrap")]
    bootstrap: Vec<String>,

    /// Stop discovering after this many phases.
    #[arg(long)]
    max_phases: Option<u32>,

    /// Channels requested per discovery phase.
    #[arg(long)]
    batch_size: Option<usize>,
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = format!("{e:#}"), "invalid configuration");
            std::process::exit(1);
        }
    };

    let (sink, analytics): (Arc<dyn LogSink>, Arc<dyn AnalyticsBackend>) =
        match config.axiom.token.clone() {
            Some(token) => {
                let sink: Arc<dyn LogSink> =
                    Arc::new(AxiomSink::spawn(&config.axiom, token.clone(), &config.logging));
                let analytics: Arc<dyn AnalyticsBackend> =
                    Arc::new(AxiomAnalytics::new(&config.axiom, token));
                (sink, analytics)
            }
            None => {
                warn!("AXIOM_TOKEN not set; logging locally and skipping discovery");
                let sink: Arc<dyn LogSink> = Arc::new(TracingSink);
                let analytics: Arc<dyn AnalyticsBackend> = Arc::new(DisabledAnalytics);
                (sink, analytics)
            }
        };

    let chat = Arc::new(TwitchClient::new(&config.twitch));
    info!(nick = chat.nick(), "Chatwatch starting");

    let ctx = BotContext {
        chat,
        analytics,
        sink: sink.clone(),
        bootstrap_channels: config.twitch.bootstrap_channels.clone(),
        discovery: DiscoverySettings {
            batch_size: config.discovery.batch_size,
            cooldown: config.cooldown(),
            max_phases: config.discovery.max_phases,
        },
        stats_interval: config.stats_interval(),
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    if let Err(e) = bot::run(ctx, BotState::default(), shutdown).await {
        sink.emit(
            Level::ERROR,
            "Application crashed",
            json!({ "error": format!("{:#}", anyhow::Error::new(e)) }),
        );
        sink.flush().await;
        std::process::exit(1);
    }

    info!("Chatwatch stopped");
}

fn load_config(cli: &Cli) -> anyhow::Result<BotConfig> {
    let mut config =
        BotConfig::load(&cli.config).with_context(|| format!("loading {}", cli.config))?;

    if !cli.bootstrap.is_empty() {
        config.twitch.bootstrap_channels = cli.bootstrap.clone();
    }
    if let Some(n) = cli.max_phases {
        config.discovery.max_phases = Some(n);
    }
    if let Some(n) = cli.batch_size {
        config.discovery.batch_size = n;
    }
    config.validate().context("command-line overrides")?;
    Ok(config)
}
