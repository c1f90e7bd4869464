//! Whiteboard session test harness
//!
//! Provides infrastructure for running several sessions in one process:
//! - In-memory signaling relay with rooms and a capacity limit
//! - Loopback peer links that connect when an answer is applied
//! - Recording renderer, observer and media source
//!
//! Basic usage pattern:
//!
//! 1. Create a `Relay` and a `Network`
//! 2. Start sessions with `spawn_peer`
//! 3. Drive them through their `SessionHandle`
//! 4. Wait for outcomes with `eventually` / `wait_for_info`

#![allow(dead_code)]

pub mod loopback;
pub mod recording;
pub mod relay;

use sketchboard_webrtc::media::{MediaSource, NoMediaSource};
use sketchboard_webrtc::peer::PeerId;
use sketchboard_webrtc::session::{SessionBuilder, SessionHandle, SessionInfo};
use sketchboard_webrtc::SessionConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub use loopback::{LinkStats, Network};
pub use recording::{empty_scene, GrantingSource, RecordingObserver, RecordingRenderer};
pub use relay::Relay;

/// Result type for test harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Error type for test harness operations
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Session error: {0}")]
    Session(#[from] sketchboard_webrtc::Error),

    #[error("Timeout: {0}")]
    Timeout(String),
}

/// A running session and its recorders
pub struct TestPeer {
    pub id: PeerId,
    pub handle: SessionHandle,
    pub observer: Arc<RecordingObserver>,
    pub renderer: RecordingRenderer,
    pub task: JoinHandle<sketchboard_webrtc::Result<()>>,
}

impl TestPeer {
    pub async fn info(&self) -> HarnessResult<SessionInfo> {
        Ok(self.handle.info().await?)
    }
}

/// Install a test log subscriber (`RUST_LOG` overrides the filter)
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn,sketchboard_webrtc=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Default configuration for a test peer with a fixed ID
pub fn test_config(id: &str) -> SessionConfig {
    SessionConfig::default().with_peer_id(id)
}

/// Start a session with default configuration and no media devices
pub fn spawn_peer(relay: &Relay, network: &Network, id: &str) -> HarnessResult<TestPeer> {
    spawn_peer_with(relay, network, test_config(id), Arc::new(NoMediaSource))
}

/// Start a session with the given configuration and media source
pub fn spawn_peer_with(
    relay: &Relay,
    network: &Network,
    config: SessionConfig,
    media: Arc<dyn MediaSource>,
) -> HarnessResult<TestPeer> {
    init_logging();
    let id = PeerId::from(config.peer_id.clone().unwrap_or_default());
    let builder = SessionBuilder::new(config);
    let sink = relay.register(&id, builder.event_sender())?;

    let observer = Arc::new(RecordingObserver::default());
    let renderer = RecordingRenderer::new();

    let (session, handle) = builder
        .engine(network.engine(&id))
        .signaling(sink)
        .renderer(Box::new(renderer.clone()))
        .media_source(media)
        .observer(observer.clone())
        .build()?;

    Ok(TestPeer {
        id,
        handle,
        observer,
        renderer,
        task: tokio::spawn(session.run()),
    })
}

/// Poll `check` until it holds (about five seconds of test time)
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) -> HarnessResult<()> {
    for _ in 0..500 {
        if check() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Err(HarnessError::Timeout(what.to_string()))
}

/// Poll a session's info until `check` holds
pub async fn wait_for_info(
    peer: &TestPeer,
    what: &str,
    mut check: impl FnMut(&SessionInfo) -> bool,
) -> HarnessResult<SessionInfo> {
    for _ in 0..500 {
        let info = peer.info().await?;
        if check(&info) {
            return Ok(info);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Err(HarnessError::Timeout(what.to_string()))
}

/// Let queued events drain
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(500)).await;
}

/// Two peers in room "x", connected to each other
///
/// `a1` joins first, so it is the existing member and the initiator.
pub async fn connected_pair(relay: &Relay, network: &Network) -> HarnessResult<(TestPeer, TestPeer)> {
    let a = spawn_peer(relay, network, "a1")?;
    a.handle.join_room("x", "Ada")?;
    eventually("a1 waiting", || {
        a.observer
            .has_status("Waiting for someone", sketchboard_webrtc::Severity::Info)
    })
    .await?;

    let b = spawn_peer(relay, network, "b2")?;
    b.handle.join_room("x", "Bo")?;

    eventually("pair connected", || {
        a.observer.connected().len() == 1 && b.observer.connected().len() == 1
    })
    .await?;
    Ok((a, b))
}
