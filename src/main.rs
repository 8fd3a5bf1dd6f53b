use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use waav_voice::core::audio::{RouteMode, VirtualAudioHardware};
use waav_voice::core::realtime::openai::CredentialNegotiator;
use waav_voice::{VoiceConfig, VoiceSessionListener, create_voice_session};

/// WaaV Voice - Realtime voice companion sessions
#[derive(Parser, Debug)]
#[command(name = "waav-voice")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Place a call and hang up on Ctrl-C
    Call {
        /// Only respond when asked (disables automatic responses)
        #[arg(long = "listen-only")]
        listen_only: bool,

        /// Route audio to the earpiece instead of the loudspeaker
        #[arg(long)]
        earpiece: bool,
    },

    /// Fetch an ephemeral session token and print it
    Token,
}

/// Logs every session notification.
struct LoggingListener;

#[async_trait]
impl VoiceSessionListener for LoggingListener {
    async fn on_connected(&self) {
        info!("Connected, start talking");
    }

    async fn on_disconnected(&self) {
        info!("Disconnected");
    }

    async fn on_speaking_started(&self) {
        info!("Companion is speaking");
    }

    async fn on_speaking_stopped(&self) {
        info!("Companion stopped speaking");
    }

    async fn on_audio_received(&self) {
        info!("Receiving companion audio");
    }

    async fn on_error(&self, message: String) {
        error!("Session error: {message}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Must be installed before the first TLS connection
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let config = if let Some(config_path) = cli.config {
        info!("Loading configuration from {}", config_path.display());
        VoiceConfig::from_file(&config_path)?
    } else {
        VoiceConfig::from_env()?
    };

    match cli.command {
        Commands::Token => print_token(&config).await,
        Commands::Call {
            listen_only,
            earpiece,
        } => run_call(&config, listen_only, earpiece).await,
    }
}

async fn print_token(config: &VoiceConfig) -> anyhow::Result<()> {
    let api_key = config
        .openai_api_key
        .as_deref()
        .ok_or_else(|| anyhow!("OPENAI_API_KEY is not set"))?;

    let negotiator = CredentialNegotiator::new(config.base_url.clone(), config.http_timeout)?;
    let credential = negotiator
        .fetch_session_credential(api_key, &config.model)
        .await?;

    info!(
        model = credential.model(),
        expires_at = ?credential.expires_at(),
        "Session token issued"
    );
    println!("{}", credential.token());
    Ok(())
}

async fn run_call(config: &VoiceConfig, listen_only: bool, earpiece: bool) -> anyhow::Result<()> {
    let api_key = config
        .api_key()
        .ok_or_else(|| anyhow!("No API key configured for the {} transport", config.transport))?;

    let audio_route = Arc::new(config.audio_route(Arc::new(VirtualAudioHardware::new())));
    if earpiece {
        audio_route.set_route(RouteMode::Earpiece);
    }

    let session = create_voice_session(config.transport, config, Arc::clone(&audio_route))?;
    session.set_listener(Arc::new(LoggingListener));

    info!(transport = %config.transport, model = %config.model, "Starting call");
    session
        .connect(api_key, &config.model, &config.instructions())
        .await?;

    if listen_only {
        session.set_listening_mode(true).await;
    }

    tokio::signal::ctrl_c().await?;
    info!("Hanging up ({})", session.audio_state());
    session.disconnect().await;
    Ok(())
}
