//! Core types for the tuner pipeline

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a tuning session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport/container family of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    /// Progressive HTTP download (single demuxed file)
    HttpProgressive,
    /// Adaptive HLS (chunked, playlist-driven)
    Hls,
    /// Adaptive DASH (MPD-driven)
    Dash,
    /// Multicast MPEG transport stream over UDP
    MpegTsMulticast,
}

impl SourceKind {
    /// Numeric code used in program provider data
    pub fn code(&self) -> u32 {
        match self {
            SourceKind::HttpProgressive => 0,
            SourceKind::Hls => 1,
            SourceKind::Dash => 2,
            SourceKind::MpegTsMulticast => 3,
        }
    }

    /// Decode a numeric provider-data code
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(SourceKind::HttpProgressive),
            1 => Some(SourceKind::Hls),
            2 => Some(SourceKind::Dash),
            3 => Some(SourceKind::MpegTsMulticast),
            _ => None,
        }
    }

    /// Decode a provider-data type label
    pub fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_uppercase().as_str() {
            "HTTP_PROGRESSIVE" | "PROGRESSIVE" => Some(SourceKind::HttpProgressive),
            "HLS" => Some(SourceKind::Hls),
            "DASH" | "MPEG_DASH" => Some(SourceKind::Dash),
            "MPEGTS_MCAST" | "MPEGTS" => Some(SourceKind::MpegTsMulticast),
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::HttpProgressive => write!(f, "http-progressive"),
            SourceKind::Hls => write!(f, "hls"),
            SourceKind::Dash => write!(f, "dash"),
            SourceKind::MpegTsMulticast => write!(f, "mpegts-mcast"),
        }
    }
}

/// Renderer/track kind. The numeric order matches the host framework's track
/// type constants, which is why audio comes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackKind {
    Audio,
    Video,
    Subtitle,
}

/// Number of renderer slots per player instance
pub const TRACK_KIND_COUNT: usize = 3;

impl TrackKind {
    /// All kinds in slot order
    pub const ALL: [TrackKind; TRACK_KIND_COUNT] =
        [TrackKind::Audio, TrackKind::Video, TrackKind::Subtitle];

    /// Slot index for this kind
    pub fn index(&self) -> usize {
        match self {
            TrackKind::Audio => 0,
            TrackKind::Video => 1,
            TrackKind::Subtitle => 2,
        }
    }

    /// Decode a raw host-framework track type. Returns `None` for an
    /// out-of-range value; queries treat that as a caller contract violation,
    /// selection treats it as an observable `false`.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(TrackKind::Audio),
            1 => Some(TrackKind::Video),
            2 => Some(TrackKind::Subtitle),
            _ => None,
        }
    }
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
            TrackKind::Subtitle => write!(f, "subtitle"),
        }
    }
}

/// One selectable elementary stream. Ids are assigned by the source builder
/// at construction time and are unique within their kind for the lifetime of
/// a single player instance only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Renderer kind this track belongs to
    pub kind: TrackKind,
    /// Opaque id, unique within `kind` for one player instance
    pub id: String,
    /// BCP-47 language code, when the manifest provides it
    pub language: Option<String>,
    /// Audio channel count, when known
    pub channel_count: Option<u32>,
    /// Audio sample rate in Hz, when known
    pub sample_rate: Option<u32>,
}

impl Track {
    pub fn new(kind: TrackKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            language: None,
            channel_count: None,
            sample_rate: None,
        }
    }

    pub fn audio(id: impl Into<String>) -> Self {
        Self::new(TrackKind::Audio, id)
    }

    pub fn subtitle(id: impl Into<String>) -> Self {
        Self::new(TrackKind::Subtitle, id)
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_channel_count(mut self, channels: u32) -> Self {
        self.channel_count = Some(channels);
        self
    }

    pub fn with_sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = Some(rate);
        self
    }
}

/// Flattened content rating string, e.g. `com.android.tv/US_TV/US_TV_MA`.
/// Opaque to the core; only compared for equality against the policy
/// collaborator and the viewer's unblocked set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentRating(pub String);

impl ContentRating {
    pub fn new(flattened: impl Into<String>) -> Self {
        Self(flattened.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentRating {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A timed-text cue decoded from the stream, forwarded to the host's overlay
/// widget as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cue {
    /// Cue text (may contain markup)
    pub text: String,
    /// Line position (fraction of the viewport), when positioned
    pub line: Option<f32>,
    /// Horizontal position (fraction of the viewport), when positioned
    pub position: Option<f32>,
}

impl Cue {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            line: None,
            position: None,
        }
    }
}

/// Opaque handle to a display surface owned by the hosting framework. The
/// core never draws; it only routes the handle to the video renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Surface {
    handle: u64,
}

impl Surface {
    pub fn new(handle: u64) -> Self {
        Self { handle }
    }

    pub fn raw(&self) -> u64 {
        self.handle
    }
}

/// Player controller state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerState {
    /// No renderers constructed
    Idle,
    /// Renderers constructed, underlying player preparing
    Preparing,
    /// Waiting on media data
    Buffering,
    /// Enough buffered to render; frames may be drawn iff play is requested
    Ready,
    /// Playback reached the end of the source
    Ended,
    /// Absorbing error state
    Error,
}

impl PlayerState {
    /// Check if a transition to `target` is valid
    pub fn can_transition_to(&self, target: PlayerState) -> bool {
        use PlayerState::*;
        matches!(
            (self, target),
            // From Idle
            (Idle, Preparing) |
            // From Preparing
            (Preparing, Buffering) | (Preparing, Ready) | (Preparing, Error) |
            // From Buffering
            (Buffering, Ready) | (Buffering, Ended) | (Buffering, Error) |
            // From Ready
            (Ready, Buffering) | (Ready, Ended) | (Ready, Error) |
            // Release paths
            (Ended, Idle) | (Error, Idle)
        )
    }
}

impl std::fmt::Display for PlayerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayerState::Idle => write!(f, "idle"),
            PlayerState::Preparing => write!(f, "preparing"),
            PlayerState::Buffering => write!(f, "buffering"),
            PlayerState::Ready => write!(f, "ready"),
            PlayerState::Ended => write!(f, "ended"),
            PlayerState::Error => write!(f, "error"),
        }
    }
}

/// Reason reported alongside a video-unavailable notice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoUnavailableReason {
    Unknown,
    /// A tune request is in flight
    Tuning,
    WeakSignal,
    /// Playback stalled waiting on media data
    Buffering,
    AudioOnly,
}

impl std::fmt::Display for VideoUnavailableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoUnavailableReason::Unknown => write!(f, "unknown"),
            VideoUnavailableReason::Tuning => write!(f, "tuning"),
            VideoUnavailableReason::WeakSignal => write!(f, "weak-signal"),
            VideoUnavailableReason::Buffering => write!(f, "buffering"),
            VideoUnavailableReason::AudioOnly => write!(f, "audio-only"),
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunerConfig {
    /// User agent for manifest/data fetches; derived from the crate
    /// name/version when unset
    pub user_agent: Option<String>,
    /// Manifest request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Delay between program-lookup retries in milliseconds
    pub lookup_retry_delay_ms: u64,
    /// Margin past a program's end time before re-resolving, in milliseconds
    pub program_end_margin_ms: u64,
    /// Minimum buffered media before playback starts, in milliseconds
    pub min_buffer_ms: u64,
    /// Minimum buffered media before playback resumes after a stall, in
    /// milliseconds
    pub min_rebuffer_ms: u64,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            user_agent: None,
            request_timeout_ms: 10_000,
            lookup_retry_delay_ms: 2_000,
            program_end_margin_ms: 1_000,
            min_buffer_ms: 1_000,
            min_rebuffer_ms: 5_000,
        }
    }
}

impl TunerConfig {
    pub fn lookup_retry_delay(&self) -> Duration {
        Duration::from_millis(self.lookup_retry_delay_ms)
    }

    pub fn program_end_margin(&self) -> Duration {
        Duration::from_millis(self.program_end_margin_ms)
    }

    /// Effective user agent string
    pub fn user_agent(&self) -> String {
        self.user_agent.clone().unwrap_or_else(|| {
            format!(
                "{}/{} (TunerCore)",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_kind_codes_round_trip() {
        for kind in [
            SourceKind::HttpProgressive,
            SourceKind::Hls,
            SourceKind::Dash,
            SourceKind::MpegTsMulticast,
        ] {
            assert_eq!(SourceKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(SourceKind::from_code(42), None);
    }

    #[test]
    fn test_track_kind_from_raw() {
        assert_eq!(TrackKind::from_raw(0), Some(TrackKind::Audio));
        assert_eq!(TrackKind::from_raw(1), Some(TrackKind::Video));
        assert_eq!(TrackKind::from_raw(2), Some(TrackKind::Subtitle));
        assert_eq!(TrackKind::from_raw(3), None);
        assert_eq!(TrackKind::from_raw(-1), None);
    }

    #[test]
    fn test_player_state_transitions() {
        // Valid transitions
        assert!(PlayerState::Idle.can_transition_to(PlayerState::Preparing));
        assert!(PlayerState::Preparing.can_transition_to(PlayerState::Buffering));
        assert!(PlayerState::Buffering.can_transition_to(PlayerState::Ready));
        assert!(PlayerState::Ready.can_transition_to(PlayerState::Buffering));
        assert!(PlayerState::Ready.can_transition_to(PlayerState::Ended));

        // Invalid transitions
        assert!(!PlayerState::Idle.can_transition_to(PlayerState::Ready));
        assert!(!PlayerState::Ended.can_transition_to(PlayerState::Buffering));
        assert!(!PlayerState::Error.can_transition_to(PlayerState::Ready));
    }

    #[test]
    fn test_config_defaults() {
        let config = TunerConfig::default();
        assert_eq!(config.lookup_retry_delay_ms, 2_000);
        assert_eq!(config.program_end_margin_ms, 1_000);
        assert!(config.user_agent().contains("tuner-core"));
    }
}
