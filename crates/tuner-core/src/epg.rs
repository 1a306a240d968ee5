//! Program-guide collaborators and the `Program` record
//!
//! The guide store, the sync adapter, and the parental-control policy are
//! external. The session only sees these trait boundaries; the hosting layer
//! injects the implementations.

use crate::{
    error::{Error, Result},
    types::{ContentRating, SourceKind},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Where a program's stream lives and how to open it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub source_kind: SourceKind,
    pub locator: Url,
}

/// Opaque provider-data payload carried on a program row
#[derive(Debug, Serialize, Deserialize)]
struct ProviderData {
    #[serde(rename = "type")]
    kind: String,
    url: String,
}

/// A scheduled content item looked up from the program guide. Consumed
/// read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    /// Channel this program airs on
    pub channel: Url,
    pub title: Option<String>,
    /// Ordered content ratings; the first element is primary
    pub content_ratings: Vec<ContentRating>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// JSON blob holding the stream locator and source kind
    pub internal_provider_data: String,
}

impl Program {
    pub fn new(channel: Url, start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        Self {
            channel,
            title: None,
            content_ratings: Vec::new(),
            start_time,
            end_time,
            internal_provider_data: String::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_rating(mut self, rating: ContentRating) -> Self {
        self.content_ratings.push(rating);
        self
    }

    /// Attach the stream locator and source kind as provider data
    pub fn with_video(mut self, source_kind: SourceKind, locator: &Url) -> Self {
        let data = ProviderData {
            kind: source_kind.to_string(),
            url: locator.to_string(),
        };
        // Both fields are plain strings; serialization cannot fail.
        self.internal_provider_data =
            serde_json::to_string(&data).unwrap_or_default();
        self
    }

    /// Primary content rating, when the program carries any
    pub fn primary_rating(&self) -> Option<&ContentRating> {
        self.content_ratings.first()
    }

    pub fn start_time_utc_millis(&self) -> i64 {
        self.start_time.timestamp_millis()
    }

    pub fn end_time_utc_millis(&self) -> i64 {
        self.end_time.timestamp_millis()
    }

    /// Decode the provider-data blob into a playable stream description
    pub fn video(&self) -> Result<VideoInfo> {
        let data: ProviderData = serde_json::from_str(&self.internal_provider_data)
            .map_err(|e| Error::ProviderData(e.to_string()))?;
        let source_kind = SourceKind::from_label(&data.kind)
            .or_else(|| data.kind.parse::<u32>().ok().and_then(SourceKind::from_code))
            .ok_or_else(|| Error::UnknownSourceKind(data.kind.clone()))?;
        let locator = Url::parse(&data.url)
            .map_err(|e| Error::ProviderData(format!("bad stream url: {e}")))?;
        Ok(VideoInfo {
            source_kind,
            locator,
        })
    }
}

/// Lookup of the program currently airing on a channel. Synchronous from the
/// caller's perspective; the session invokes it off the dispatch task.
pub trait ProgramLookup: Send + Sync {
    fn current_program(&self, channel: &Url) -> Option<Program>;
}

/// Out-of-band program-guide refresh. Fire-and-forget.
pub trait GuideSync: Send + Sync {
    fn request_sync(&self, input_id: &str, expedite: bool);
}

/// Parental-control policy queries, answered by the hosting framework
pub trait ParentalPolicy: Send + Sync {
    fn parental_controls_enabled(&self) -> bool;
    fn is_rating_blocked(&self, rating: &ContentRating) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn program() -> Program {
        let channel = Url::parse("tv://input/channel/5").unwrap();
        let stream = Url::parse("https://example.com/live/master.m3u8").unwrap();
        Program::new(
            channel,
            Utc.timestamp_millis_opt(1_000).unwrap(),
            Utc.timestamp_millis_opt(61_000).unwrap(),
        )
        .with_title("News")
        .with_video(SourceKind::Hls, &stream)
    }

    #[test]
    fn test_video_round_trip() {
        let video = program().video().unwrap();
        assert_eq!(video.source_kind, SourceKind::Hls);
        assert_eq!(video.locator.as_str(), "https://example.com/live/master.m3u8");
    }

    #[test]
    fn test_video_rejects_garbage_provider_data() {
        let mut p = program();
        p.internal_provider_data = "not json".into();
        assert!(matches!(p.video(), Err(Error::ProviderData(_))));
    }

    #[test]
    fn test_video_rejects_unknown_kind() {
        let mut p = program();
        p.internal_provider_data = r#"{"type":"RTSP","url":"rtsp://x/y"}"#.into();
        assert!(matches!(p.video(), Err(Error::UnknownSourceKind(_))));
    }

    #[test]
    fn test_video_accepts_numeric_kind() {
        let mut p = program();
        p.internal_provider_data = r#"{"type":"3","url":"udp://239.0.0.1:1234"}"#.into();
        assert_eq!(p.video().unwrap().source_kind, SourceKind::MpegTsMulticast);
    }

    #[test]
    fn test_time_accessors() {
        let p = program();
        assert_eq!(p.start_time_utc_millis(), 1_000);
        assert_eq!(p.end_time_utc_millis(), 61_000);
    }
}
