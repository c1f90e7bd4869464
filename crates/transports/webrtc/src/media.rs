//! Local and remote media
//!
//! Capture itself is out of scope: a `MediaSource` hands the session
//! ready-made local tracks. The session adds them to every peer link and
//! reports remote tracks through the observer.

use crate::session::Severity;
use crate::{Error, Result};
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

/// Audio or video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Which tracks to request from a media source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaRequest {
    pub video: bool,
    pub audio: bool,
}

impl MediaRequest {
    pub fn new(video: bool, audio: bool) -> Self {
        Self { video, audio }
    }

    /// Requests tried in order until one succeeds
    ///
    /// Both, then video only, then audio only. Kinds not asked for are
    /// never tried.
    pub fn fallback_chain(&self) -> Vec<MediaRequest> {
        let mut chain = Vec::new();
        if self.video && self.audio {
            chain.push(MediaRequest::new(true, true));
        }
        if self.video {
            chain.push(MediaRequest::new(true, false));
        }
        if self.audio {
            chain.push(MediaRequest::new(false, true));
        }
        chain
    }

    fn describe(&self) -> &'static str {
        match (self.video, self.audio) {
            (true, true) => "camera and microphone",
            (true, false) => "camera",
            (false, true) => "microphone",
            (false, false) => "no media",
        }
    }
}

/// One captured local track
#[derive(Clone)]
pub struct LocalTrack {
    kind: TrackKind,
    id: String,
    track: Arc<TrackLocalStaticSample>,
    enabled: Arc<AtomicBool>,
}

impl LocalTrack {
    /// Create a sample-based track (Opus for audio, VP8 for video)
    ///
    /// # Arguments
    ///
    /// * `kind` - Audio or video
    /// * `stream_id` - Stream the track belongs to
    pub fn new(kind: TrackKind, stream_id: &str) -> Self {
        let capability = match kind {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: "audio/opus".to_string(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: "video/VP8".to_string(),
                clock_rate: 90000, // Standard 90kHz clock for video
                channels: 0,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
        };
        let track_id = match kind {
            TrackKind::Audio => format!("audio-{}", stream_id),
            TrackKind::Video => format!("video-{}", stream_id),
        };
        Self::with_id(kind, capability, track_id, stream_id)
    }

    /// Create a VP8 screen capture track
    ///
    /// It replaces the camera track on existing senders, so it reuses the
    /// camera's stream ID.
    pub fn screen(stream_id: &str) -> Self {
        let capability = RTCRtpCodecCapability {
            mime_type: "video/VP8".to_string(),
            clock_rate: 90000,
            channels: 0,
            sdp_fmtp_line: String::new(),
            rtcp_feedback: vec![],
        };
        Self::with_id(
            TrackKind::Video,
            capability,
            format!("screen-{}", stream_id),
            stream_id,
        )
    }

    fn with_id(
        kind: TrackKind,
        capability: RTCRtpCodecCapability,
        track_id: String,
        stream_id: &str,
    ) -> Self {
        Self {
            kind,
            id: track_id.clone(),
            track: Arc::new(TrackLocalStaticSample::new(
                capability,
                track_id,
                stream_id.to_string(),
            )),
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Underlying webrtc-rs track, shared by every peer link
    pub fn rtc_track(&self) -> &Arc<TrackLocalStaticSample> {
        &self.track
    }

    /// Whether the capture side should keep writing samples
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Local media acquired for this session
#[derive(Debug, Clone)]
pub struct LocalMedia {
    stream_id: String,
    tracks: Vec<LocalTrack>,
}

impl LocalMedia {
    /// Create tracks for the requested kinds under a fresh stream ID
    pub fn for_request(request: MediaRequest) -> Self {
        let stream_id = format!("sketchboard-{}", uuid::Uuid::new_v4());
        let mut tracks = Vec::new();
        if request.audio {
            tracks.push(LocalTrack::new(TrackKind::Audio, &stream_id));
        }
        if request.video {
            tracks.push(LocalTrack::new(TrackKind::Video, &stream_id));
        }
        Self { stream_id, tracks }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    pub fn has(&self, kind: TrackKind) -> bool {
        self.tracks.iter().any(|t| t.kind == kind)
    }

    /// Camera track, if video was acquired
    pub fn video_track(&self) -> Option<&LocalTrack> {
        self.tracks.iter().find(|t| t.kind == TrackKind::Video)
    }

    /// Flip every track of `kind`, returning the new state
    ///
    /// Returns `None` when no track of that kind exists.
    pub fn toggle(&self, kind: TrackKind) -> Option<bool> {
        let mut state = None;
        for track in self.tracks.iter().filter(|t| t.kind == kind) {
            let enabled = !track.is_enabled();
            track.set_enabled(enabled);
            state = Some(enabled);
        }
        state
    }

    /// Stop all tracks
    pub fn release(&self) {
        for track in &self.tracks {
            track.set_enabled(false);
        }
    }
}

/// A track received from a remote peer
#[derive(Clone)]
pub struct RemoteStream {
    /// Remote stream the track belongs to
    pub stream_id: String,
    /// Remote track identifier
    pub track_id: String,
    /// Audio or video
    pub kind: TrackKind,
    /// Underlying webrtc-rs track (absent for in-memory links)
    pub track: Option<Arc<TrackRemote>>,
}

impl fmt::Debug for RemoteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteStream")
            .field("stream_id", &self.stream_id)
            .field("track_id", &self.track_id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Device access collaborator
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Acquire exactly the requested tracks
    ///
    /// # Errors
    ///
    /// `MediaAcquisitionError` when permission is denied, the device is busy
    /// or missing.
    async fn acquire(&self, request: MediaRequest) -> Result<LocalMedia>;

    /// Capture the screen as a video track for `stream_id`
    ///
    /// The default implementation has no screen capture.
    async fn acquire_screen(&self, _stream_id: &str) -> Result<LocalTrack> {
        Err(Error::MediaAcquisitionError(
            "screen capture not available".to_string(),
        ))
    }
}

/// Media source for headless peers: every request fails
#[derive(Debug, Default)]
pub struct NoMediaSource;

#[async_trait]
impl MediaSource for NoMediaSource {
    async fn acquire(&self, request: MediaRequest) -> Result<LocalMedia> {
        Err(Error::MediaAcquisitionError(format!(
            "no capture devices for {}",
            request.describe()
        )))
    }
}

/// Walk the fallback chain, reporting each step through `report`
///
/// Never fails: when nothing can be acquired the session continues without
/// local media and `None` is returned.
///
/// ```
/// use sketchboard_webrtc::media::{acquire_with_fallback, MediaRequest, NoMediaSource};
///
/// # tokio_test::block_on(async {
/// let mut statuses = Vec::new();
/// let media = acquire_with_fallback(&NoMediaSource, MediaRequest::new(true, true), |message, _| {
///     statuses.push(message)
/// })
/// .await;
///
/// assert!(media.is_none());
/// // three failed attempts, then the final notice
/// assert_eq!(statuses.len(), 4);
/// # });
/// ```
pub async fn acquire_with_fallback(
    source: &dyn MediaSource,
    request: MediaRequest,
    mut report: impl FnMut(String, Severity),
) -> Option<LocalMedia> {
    let chain = request.fallback_chain();
    if chain.is_empty() {
        return None;
    }

    for attempt in chain {
        match source.acquire(attempt).await {
            Ok(media) => {
                info!(request = attempt.describe(), "Local media acquired");
                let severity = if attempt == request {
                    Severity::Success
                } else {
                    Severity::Warning
                };
                report(format!("Using {}", attempt.describe()), severity);
                return Some(media);
            }
            Err(e) => {
                warn!(request = attempt.describe(), "Media acquisition failed: {}", e);
                report(
                    format!("Could not access {}: {}", attempt.describe(), e),
                    Severity::Warning,
                );
            }
        }
    }

    report(
        "Continuing without camera or microphone".to_string(),
        Severity::Error,
    );
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Grants only the listed request shapes
    struct PickySource {
        grants: Vec<MediaRequest>,
        seen: Mutex<Vec<MediaRequest>>,
    }

    #[async_trait]
    impl MediaSource for PickySource {
        async fn acquire(&self, request: MediaRequest) -> Result<LocalMedia> {
            self.seen.lock().unwrap().push(request);
            if self.grants.contains(&request) {
                Ok(LocalMedia::for_request(request))
            } else {
                Err(Error::MediaAcquisitionError("denied".to_string()))
            }
        }
    }

    #[test]
    fn test_fallback_chain_order() {
        let chain = MediaRequest::new(true, true).fallback_chain();
        assert_eq!(
            chain,
            vec![
                MediaRequest::new(true, true),
                MediaRequest::new(true, false),
                MediaRequest::new(false, true),
            ]
        );
        assert_eq!(
            MediaRequest::new(false, true).fallback_chain(),
            vec![MediaRequest::new(false, true)]
        );
        assert!(MediaRequest::new(false, false).fallback_chain().is_empty());
    }

    #[tokio::test]
    async fn test_falls_back_to_audio_only() {
        let source = PickySource {
            grants: vec![MediaRequest::new(false, true)],
            seen: Mutex::new(Vec::new()),
        };
        let mut statuses = Vec::new();
        let media = acquire_with_fallback(&source, MediaRequest::new(true, true), |m, s| {
            statuses.push((m, s))
        })
        .await
        .expect("audio should be granted");

        assert!(media.has(TrackKind::Audio));
        assert!(!media.has(TrackKind::Video));
        assert_eq!(source.seen.lock().unwrap().len(), 3);
        assert_eq!(statuses.len(), 3);
        assert_eq!(statuses[2].1, Severity::Warning);
    }

    #[tokio::test]
    async fn test_all_denied_is_not_fatal() {
        let mut statuses = Vec::new();
        let media = acquire_with_fallback(&NoMediaSource, MediaRequest::new(true, true), |m, s| {
            statuses.push((m, s))
        })
        .await;

        assert!(media.is_none());
        assert_eq!(statuses.last().map(|(_, s)| *s), Some(Severity::Error));
    }

    #[test]
    fn test_toggle_flips_only_matching_tracks() {
        let media = LocalMedia::for_request(MediaRequest::new(true, true));
        assert_eq!(media.toggle(TrackKind::Video), Some(false));
        assert!(media.tracks().iter().any(|t| t.kind() == TrackKind::Audio && t.is_enabled()));
        assert_eq!(media.toggle(TrackKind::Video), Some(true));

        let audio_only = LocalMedia::for_request(MediaRequest::new(false, true));
        assert_eq!(audio_only.toggle(TrackKind::Video), None);
    }

    #[tokio::test]
    async fn test_screen_track_shares_camera_stream() {
        let media = LocalMedia::for_request(MediaRequest::new(true, false));
        let camera = media.video_track().expect("camera track");
        let screen = LocalTrack::screen(media.stream_id());

        assert_eq!(screen.kind(), TrackKind::Video);
        assert_ne!(screen.id(), camera.id());
        assert!(screen.id().starts_with("screen-"));
        assert!(NoMediaSource.acquire_screen(media.stream_id()).await.is_err());
    }
}
