//! Configuration types for the whiteboard peer session

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Buffered-bytes threshold above which a send is dropped (64 KiB)
pub const DEFAULT_BUFFERED_THRESHOLD_BYTES: usize = 64 * 1024;

/// Main configuration for a peer session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// WebSocket signaling relay URL (ws:// or wss://)
    pub signaling_url: String,

    /// STUN server URLs (at least one required)
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Fixed local peer ID (relay-assigned if None)
    pub peer_id: Option<String>,

    /// Maximum peers in mesh (default: 10, max: 10)
    pub max_peers: u32,

    /// How long a single ICE restart may take before the peer is dropped
    pub ice_restart_timeout_ms: u64,

    /// Reliable sync channel settings
    pub sync_channel: SyncChannelConfig,

    /// Live stroke channel settings
    pub stroke_channel: StrokeChannelConfig,

    /// Local media preferences
    pub media: MediaConfig,
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn:// or turns://)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

/// Reliable sync channel (snapshots, page structure, navigation)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncChannelConfig {
    /// Drop outbound messages while more than this many bytes are buffered
    pub buffered_threshold_bytes: usize,

    /// Debounce window for local edits (range: 50-200ms)
    pub debounce_ms: u64,
}

/// Live stroke channel (incremental stroke events)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrokeChannelConfig {
    /// Delivery mode of the stroke channel
    pub mode: DataChannelMode,

    /// Pacing window; moves arriving inside it are coalesced
    pub flush_interval_ms: u64,

    /// Hold the stroke queue while more than this many bytes are buffered
    pub buffered_threshold_bytes: usize,
}

/// Local media preferences
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Request a camera track
    pub video: bool,

    /// Request a microphone track
    pub audio: bool,
}

/// Data channel delivery mode
///
/// Determines the reliability of message delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataChannelMode {
    /// Reliable, ordered delivery
    Reliable,
    /// Ordered delivery with a bounded number of retransmissions
    BoundedRetransmit(u16),
    /// Unordered, no retransmissions
    Unreliable,
}

impl DataChannelMode {
    /// Get the ordered setting for webrtc-rs
    pub fn ordered(&self) -> bool {
        match self {
            DataChannelMode::Reliable | DataChannelMode::BoundedRetransmit(_) => true,
            DataChannelMode::Unreliable => false,
        }
    }

    /// Get the max retransmits setting for webrtc-rs
    pub fn max_retransmits(&self) -> Option<u16> {
        match self {
            DataChannelMode::Reliable => None, // Unlimited retransmits
            DataChannelMode::BoundedRetransmit(n) => Some(*n),
            DataChannelMode::Unreliable => Some(0),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:3000".to_string(),
            stun_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
            turn_servers: Vec::new(),
            peer_id: None,
            max_peers: 10,
            ice_restart_timeout_ms: 10_000,
            sync_channel: SyncChannelConfig::default(),
            stroke_channel: StrokeChannelConfig::default(),
            media: MediaConfig::default(),
        }
    }
}

impl Default for SyncChannelConfig {
    fn default() -> Self {
        Self {
            buffered_threshold_bytes: DEFAULT_BUFFERED_THRESHOLD_BYTES,
            debounce_ms: 100,
        }
    }
}

impl Default for StrokeChannelConfig {
    fn default() -> Self {
        Self {
            mode: DataChannelMode::BoundedRetransmit(3),
            flush_interval_ms: 16,
            buffered_threshold_bytes: DEFAULT_BUFFERED_THRESHOLD_BYTES,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            video: true,
            audio: true,
        }
    }
}

impl SessionConfig {
    /// Load a configuration from a JSON file
    ///
    /// Missing fields fall back to their defaults. The result is validated.
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: SessionConfig = serde_json::from_str(&text).map_err(|e| {
            crate::Error::InvalidConfig(format!(
                "Failed to parse {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `stun_servers` is empty
    /// - `max_peers` is not in range 1-10
    /// - `sync_channel.debounce_ms` is not in range 50-200
    /// - a buffered threshold is zero
    /// - `stroke_channel.flush_interval_ms` is zero
    /// - `signaling_url` is not a valid WebSocket URL
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.stun_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one STUN server is required".to_string(),
            ));
        }

        if self.max_peers == 0 || self.max_peers > 10 {
            return Err(Error::InvalidConfig(format!(
                "max_peers must be in range 1-10, got {}",
                self.max_peers
            )));
        }

        if !(50..=200).contains(&self.sync_channel.debounce_ms) {
            return Err(Error::InvalidConfig(format!(
                "sync_channel.debounce_ms must be in range 50-200, got {}",
                self.sync_channel.debounce_ms
            )));
        }

        if self.sync_channel.buffered_threshold_bytes == 0
            || self.stroke_channel.buffered_threshold_bytes == 0
        {
            return Err(Error::InvalidConfig(
                "buffered_threshold_bytes must be greater than zero".to_string(),
            ));
        }

        if self.stroke_channel.flush_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "stroke_channel.flush_interval_ms must be greater than zero".to_string(),
            ));
        }

        if self.ice_restart_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "ice_restart_timeout_ms must be greater than zero".to_string(),
            ));
        }

        if !self.signaling_url.starts_with("ws://") && !self.signaling_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "signaling_url must start with ws:// or wss://, got {}",
                self.signaling_url
            )));
        }

        Ok(())
    }

    /// Debounce window for local edits
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.sync_channel.debounce_ms)
    }

    /// Pacing window for the stroke channel
    pub fn stroke_flush_interval(&self) -> Duration {
        Duration::from_millis(self.stroke_channel.flush_interval_ms)
    }

    /// Deadline for a single ICE restart
    pub fn ice_restart_timeout(&self) -> Duration {
        Duration::from_millis(self.ice_restart_timeout_ms)
    }

    /// Create a configuration preset for a single LAN or loopback host
    ///
    /// No STUN round trips beyond the default server, shortest debounce,
    /// and a short ICE restart deadline.
    ///
    /// # Example
    ///
    /// ```
    /// use sketchboard_webrtc::config::SessionConfig;
    ///
    /// let config = SessionConfig::local_preset("ws://localhost:3000");
    /// assert_eq!(config.sync_channel.debounce_ms, 50);
    /// assert!(config.validate().is_ok());
    /// ```
    pub fn local_preset(signaling_url: &str) -> Self {
        Self {
            signaling_url: signaling_url.to_string(),
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            ice_restart_timeout_ms: 5_000,
            sync_channel: SyncChannelConfig {
                debounce_ms: 50,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Create a configuration preset for cellular or lossy networks
    ///
    /// Longer debounce, a stroke channel with more retransmissions,
    /// and more time for the ICE restart to complete.
    /// Requires TURN servers (set via `with_turn_servers()`).
    ///
    /// # Example
    ///
    /// ```
    /// use sketchboard_webrtc::config::{SessionConfig, TurnServerConfig};
    ///
    /// let config = SessionConfig::mobile_network_preset("wss://relay.example.com")
    ///     .with_turn_servers(vec![TurnServerConfig {
    ///         url: "turn:turn.example.com:3478".to_string(),
    ///         username: "user".to_string(),
    ///         credential: "pass".to_string(),
    ///     }]);
    /// assert_eq!(config.sync_channel.debounce_ms, 200);
    /// ```
    pub fn mobile_network_preset(signaling_url: &str) -> Self {
        Self {
            signaling_url: signaling_url.to_string(),
            max_peers: 5,
            ice_restart_timeout_ms: 20_000,
            sync_channel: SyncChannelConfig {
                debounce_ms: 200,
                ..Default::default()
            },
            stroke_channel: StrokeChannelConfig {
                mode: DataChannelMode::BoundedRetransmit(5),
                flush_interval_ms: 33,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Add TURN servers to this configuration
    pub fn with_turn_servers(mut self, turn_servers: Vec<TurnServerConfig>) -> Self {
        self.turn_servers = turn_servers;
        self
    }

    /// Set the peer ID for this configuration
    pub fn with_peer_id(mut self, peer_id: &str) -> Self {
        self.peer_id = Some(peer_id.to_string());
        self
    }

    /// Set the maximum number of peers
    pub fn with_max_peers(mut self, max_peers: u32) -> Self {
        self.max_peers = max_peers;
        self
    }

    /// Set the debounce window for local edits
    pub fn with_debounce_ms(mut self, debounce_ms: u64) -> Self {
        self.sync_channel.debounce_ms = debounce_ms;
        self
    }

    /// Set which local media tracks are requested
    pub fn with_media(mut self, video: bool, audio: bool) -> Self {
        self.media = MediaConfig { video, audio };
        self
    }
}
