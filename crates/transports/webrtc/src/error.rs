//! Error types for the peer session orchestrator

/// Result type alias using the session Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a whiteboard peer session
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Relay unreachable or malformed relay payload
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// Description apply failure or message received in an unexpected state
    #[error("Negotiation error: {0}")]
    NegotiationError(String),

    /// Local camera/microphone could not be acquired
    #[error("Media acquisition error: {0}")]
    MediaAcquisitionError(String),

    /// Outbound buffer above threshold, message dropped
    #[error("Transport congested: {buffered} bytes buffered (threshold {threshold})")]
    TransportCongestion {
        /// Bytes currently waiting in the channel's send buffer
        buffered: usize,
        /// Configured threshold for the channel
        threshold: usize,
    },

    /// ICE connectivity failed and could not be recovered
    #[error("ICE failure: {0}")]
    IceFailure(String),

    /// Page index out of range, or an edit that would leave no pages
    #[error("Invalid page: {0}")]
    InvalidPage(String),

    /// Data channel missing or not open
    #[error("Data channel error: {0}")]
    DataChannelError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// The session event loop is no longer running
    #[error("Session closed")]
    SessionClosed,

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}

impl Error {
    /// Check if this error only affects a single peer connection
    ///
    /// Peer-scoped errors tear down that connection and nothing else.
    pub fn is_peer_error(&self) -> bool {
        matches!(
            self,
            Error::NegotiationError(_)
                | Error::IceFailure(_)
                | Error::DataChannelError(_)
                | Error::WebRtcError(_)
        )
    }

    /// Check if this error is a dropped send due to backpressure
    pub fn is_congestion(&self) -> bool {
        matches!(self, Error::TransportCongestion { .. })
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}
