//! Peer session orchestrator for a collaborative whiteboard
//!
//! Every participant runs one `Session`. Peers meet in a named room on a
//! signaling relay, then form a full WebRTC mesh: one peer connection per
//! remote member, each with two data channels.
//!
//! # Features
//!
//! - **Deterministic role election**: the lower peer ID offers, no coordination
//! - **Glare handling**: one fixed resolution when both sides offer at once
//! - **ICE candidate queueing**: remote candidates wait for the remote description
//! - **Single ICE restart**: a failed connection gets one recovery attempt
//! - **Sync channel**: reliable, ordered, backpressured page snapshots
//! - **Stroke channel**: paced, coalesced live drawing
//! - **Reconciliation**: last-write-wins pages, structure that only grows
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Application (canvas, toolbar, video tiles)              │
//! │  ↓ SessionHandle (commands)      ↑ SessionObserver       │
//! │  Session (single event queue, owns all state)            │
//! │  ├─ Room (membership, labels)                            │
//! │  ├─ PeerManager (PeerConnection per remote member)       │
//! │  │   └─ ChannelSet: sync + stroke data channels          │
//! │  ├─ Whiteboard (pages, StrokeAssembler, RenderEngine)    │
//! │  └─ TimerSet (debounce, stroke pacing, ICE restart)      │
//! │     ↓                          ↓                         │
//! │  SignalingSink (relay)      TransportEngine (webrtc-rs)  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use sketchboard_webrtc::SessionConfig;
//!
//! let config = SessionConfig {
//!     signaling_url: "ws://localhost:3000".to_string(),
//!     max_peers: 4,
//!     ..Default::default()
//! };
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.sync_channel.buffered_threshold_bytes, 64 * 1024);
//! ```

#![warn(clippy::all)]

pub mod board;
pub mod channels;
pub mod config;
pub mod engine;
pub mod error;
pub mod media;
pub mod peer;
pub mod room;
pub mod session;
pub mod signaling;

pub use board::{RenderEngine, SceneStore, Whiteboard};
pub use channels::{ChannelKind, PageStructure, Point, SceneBlob, StrokeEvent, StrokeKind, WireMessage};
pub use config::{DataChannelMode, SessionConfig, TurnServerConfig};
pub use engine::{RtcEngine, TransportEngine};
pub use error::{Error, Result};
pub use media::{LocalMedia, MediaRequest, MediaSource, NoMediaSource, RemoteStream, TrackKind};
pub use peer::{ConnectionState, PeerId, PeerInfo, Role};
pub use session::{
    BroadcastStats, Session, SessionBuilder, SessionEvent, SessionHandle, SessionInfo,
    SessionObserver, Severity,
};
pub use signaling::{InboundSignal, OutboundSignal, SignalingClient, SignalingSink};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
