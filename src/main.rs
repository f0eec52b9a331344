use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use aircheck::{
    FfmpegCapture, FfmpegConverter, JsonlSessionStore, Orchestrator, PostProcessor, SessionStage,
    Settings, SftpTransfer, StreamConfig,
};

#[derive(Parser)]
#[command(name = "aircheck", about = "Scheduled audio stream recorder: capture, tag, deliver")]
struct Args {
    /// Optional TOML config file (environment variables override it)
    #[arg(long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record one stream now and deliver the result
    Record {
        /// Stream name, used in metadata and file naming
        #[arg(long)]
        name: String,

        /// Source stream URL (http/https/rtmp/rtmps)
        #[arg(long)]
        url: String,

        /// Delivery target, user@host[:port]:/path
        #[arg(long)]
        destination: String,

        /// Stop capturing after this many minutes
        #[arg(long)]
        duration_mins: Option<u64>,

        #[arg(long, default_value = "")]
        artist: String,

        #[arg(long, default_value = "")]
        album: String,

        #[arg(long, default_value = "")]
        album_artist: String,

        /// Cover image embedded into the artifact
        #[arg(long)]
        artwork: Option<PathBuf>,

        /// Private key for delivery (default from config)
        #[arg(long)]
        ssh_key: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let settings = Settings::load(args.config.as_deref())?;

    match args.command {
        Command::Record {
            name,
            url,
            destination,
            duration_mins,
            artist,
            album,
            album_artist,
            artwork,
            ssh_key,
        } => {
            let config = StreamConfig {
                name,
                stream_url: url,
                artist,
                album,
                album_artist,
                artwork_path: artwork,
                output_pattern: "{name}_{date}.mp3".to_string(),
                destination,
                ssh_key_path: ssh_key,
            };
            let duration = duration_mins.map(|m| Duration::from_secs(m * 60));
            record_once(settings, config, duration).await
        }
    }
}

async fn record_once(
    settings: Settings,
    config: StreamConfig,
    duration: Option<Duration>,
) -> Result<()> {
    let capture = Arc::new(FfmpegCapture::new(&settings.recorder));
    let converter = Arc::new(FfmpegConverter::new(&settings.processing));
    let processor = Arc::new(PostProcessor::new(
        converter,
        settings.processing.max_artwork_bytes,
    ));
    let transfer = Arc::new(SftpTransfer::new(settings.transfer.clone()));
    let store = Arc::new(JsonlSessionStore::new(
        settings.recorder.work_dir.join("session-events.jsonl"),
    ));

    let orchestrator = Orchestrator::new(&settings, capture, processor, transfer, store);

    // Subscribe before admission so no transition is missed.
    let mut events = orchestrator.subscribe();
    let id = orchestrator
        .start_session(config, duration)
        .await
        .map_err(|e| anyhow::anyhow!("session rejected: {e}"))?;

    info!("Session {id} started");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupt received, cancelling session {id}");
                orchestrator.cancel_session(id).await;
            }
            event = events.recv() => match event {
                Ok(event) if event.session_id == id && event.stage.is_terminal() => {
                    match event.stage {
                        SessionStage::Completed => {
                            info!("Recording delivered");
                            return Ok(());
                        }
                        SessionStage::Cancelled => {
                            warn!("Recording cancelled");
                            return Ok(());
                        }
                        _ => {
                            let reason = event.error.unwrap_or_else(|| "unknown".to_string());
                            bail!("recording failed: {reason}");
                        }
                    }
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Event stream lagged by {n} messages");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    bail!("event stream closed before the session finished");
                }
            }
        }
    }
}
