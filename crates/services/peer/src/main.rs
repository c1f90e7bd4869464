//! Headless whiteboard peer
//!
//! Joins a room on the signaling relay and keeps a copy of the shared board.
//! Useful as an always-on participant that new members sync from.
//!
//! # Usage
//!
//! ```bash
//! # Join room "design" on a local relay
//! cargo run -p sketchboard-peer -- --room design --label archive
//!
//! # Load settings from a JSON file, override the relay URL
//! cargo run -p sketchboard-peer -- \
//!   --config ./peer.json \
//!   --signaling-url wss://relay.example.com \
//!   --room design
//! ```

use clap::Parser;
use sketchboard_webrtc::board::SceneStore;
use sketchboard_webrtc::engine::RtcEngine;
use sketchboard_webrtc::media::NoMediaSource;
use sketchboard_webrtc::session::SessionBuilder;
use sketchboard_webrtc::signaling::SignalingClient;
use sketchboard_webrtc::SessionConfig;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Sketchboard headless peer
///
/// Connects to the signaling relay, joins a room and mirrors the board.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Room to join
    #[arg(short, long, env = "SKETCHBOARD_ROOM")]
    room: String,

    /// Label shown to other members
    #[arg(short, long, default_value = "headless-peer", env = "SKETCHBOARD_LABEL")]
    label: String,

    /// JSON configuration file (defaults are used when absent)
    #[arg(short, long, env = "SKETCHBOARD_CONFIG")]
    config: Option<PathBuf>,

    /// Signaling relay URL
    #[arg(long, env = "SKETCHBOARD_SIGNALING_URL")]
    signaling_url: Option<String>,

    /// STUN servers (comma-separated)
    #[arg(long, value_delimiter = ',', env = "SKETCHBOARD_STUN_SERVERS")]
    stun_servers: Vec<String>,

    /// Maximum concurrent peer connections
    #[arg(long, env = "SKETCHBOARD_MAX_PEERS")]
    max_peers: Option<u32>,

    /// Seconds between status log lines (0 disables them)
    #[arg(long, default_value_t = 30, env = "SKETCHBOARD_STATUS_INTERVAL")]
    status_interval: u64,
}

impl Args {
    /// File configuration with command line overrides applied
    fn session_config(&self) -> sketchboard_webrtc::Result<SessionConfig> {
        let mut config = match &self.config {
            Some(path) => SessionConfig::from_file(path)?,
            None => SessionConfig::default(),
        };

        if let Some(url) = &self.signaling_url {
            config.signaling_url = url.clone();
        }
        if !self.stun_servers.is_empty() {
            config.stun_servers = self.stun_servers.clone();
        }
        if let Some(max_peers) = self.max_peers {
            config = config.with_max_peers(max_peers);
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);

    ctrlc::set_handler(move || {
        let was_already_set = shutdown_flag_handler.swap(true, Ordering::SeqCst);
        if was_already_set {
            eprintln!("Shutdown already in progress, forcing exit");
            std::process::exit(0);
        }
        eprintln!("\nCtrl+C received, leaving the room...");
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("sketchboard-peer")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(
    args: Args,
    shutdown_flag: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = args.session_config()?;
    info!(
        version = sketchboard_webrtc::version(),
        signaling_url = %config.signaling_url,
        room = %args.room,
        max_peers = config.max_peers,
        stun_servers = config.stun_servers.len(),
        turn_servers = config.turn_servers.len(),
        "Sketchboard peer starting"
    );

    let builder = SessionBuilder::new(config.clone());
    let signaling = SignalingClient::connect(&config.signaling_url, builder.event_sender()).await?;

    let (session, handle) = builder
        .engine(Arc::new(RtcEngine::new(&config)?))
        .signaling(Arc::new(signaling))
        .renderer(Box::new(SceneStore::new()))
        .media_source(Arc::new(NoMediaSource))
        .build()?;

    let session_task = tokio::spawn(session.run());
    handle.join_room(args.room.clone(), args.label.clone())?;
    info!("Peer running. Press Ctrl+C to leave.");

    let status_every = Duration::from_secs(args.status_interval);
    let mut since_status = Duration::ZERO;
    let tick = Duration::from_millis(100);

    while !shutdown_flag.load(Ordering::SeqCst) {
        if session_task.is_finished() {
            warn!("Session stopped unexpectedly");
            break;
        }
        tokio::time::sleep(tick).await;

        since_status += tick;
        if !status_every.is_zero() && since_status >= status_every {
            since_status = Duration::ZERO;
            match handle.info().await {
                Ok(info) => info!(
                    members = info.members.len(),
                    peers = info.peers.len(),
                    pages = info.page_count,
                    current_page = info.current_page,
                    "Session status"
                ),
                Err(e) => warn!("Session status unavailable: {}", e),
            }
        }
    }

    info!("Leaving room...");
    handle.leave().await?;
    session_task.await??;
    info!("Peer shut down gracefully");

    Ok(())
}

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
