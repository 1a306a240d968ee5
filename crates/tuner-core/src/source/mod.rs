//! Source construction for the supported transport kinds
//!
//! Given a stream locator and a declared source kind, builds the
//! track-carrying media source and the renderer set bound to it. Progressive
//! and multicast construction is synchronous; the adaptive kinds fetch and
//! parse their manifest first and only then construct renderers.

mod dash;
mod hls;

pub use dash::MpdManifest;
pub use hls::HlsManifest;

use crate::{
    error::{Error, Result},
    renderer::{RendererCommand, RendererHandle, RendererSlots},
    tracks::TrackLists,
    types::{SourceKind, Track, TrackKind},
};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument};
use url::Url;

const BUFFER_SEGMENT_SIZE: usize = 64 * 1024;
const VIDEO_BUFFER_SEGMENTS: usize = 200;
const AUDIO_BUFFER_SEGMENTS: usize = 60;

/// Buffer allocated to a demuxing source, in bytes
pub const VIDEO_BUFFER_SIZE: usize = VIDEO_BUFFER_SEGMENTS * BUFFER_SEGMENT_SIZE;
/// Buffer allocated to an audio-only chunk source, in bytes
pub const AUDIO_BUFFER_SIZE: usize = AUDIO_BUFFER_SEGMENTS * BUFFER_SEGMENT_SIZE;

/// HTTP data connection for manifests and progressive streams
#[derive(Debug, Clone)]
pub struct HttpDataSource {
    pub url: Url,
    pub user_agent: String,
}

impl HttpDataSource {
    pub fn new(url: Url, user_agent: impl Into<String>) -> Self {
        Self {
            url,
            user_agent: user_agent.into(),
        }
    }

    /// Fetch the full body. Used for manifest loads; segment delivery is the
    /// decode collaborator's business.
    pub async fn fetch(&self, client: &Client) -> Result<Bytes> {
        let response = client
            .get(self.url.clone())
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .send()
            .await
            .map_err(|e| Error::ManifestFetch(e.to_string()))?;
        response
            .bytes()
            .await
            .map_err(|e| Error::ManifestFetch(e.to_string()))
    }
}

/// UDP data connection for multicast transport streams
#[derive(Debug, Clone)]
pub struct UdpDataSource {
    pub url: Url,
}

impl UdpDataSource {
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    /// Bind the local receive socket. Group join and packet delivery belong
    /// to the decode collaborator.
    pub async fn open(&self, local: &str) -> Result<tokio::net::UdpSocket> {
        Ok(tokio::net::UdpSocket::bind(local).await?)
    }
}

/// Container format hint for a demuxing source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    /// Sniff the container from the stream
    Auto,
    MpegTs,
}

/// A demuxed single-stream source (progressive or multicast)
#[derive(Debug)]
pub struct ExtractorSource {
    pub data: ExtractorData,
    pub format: ContainerFormat,
    pub buffer_size: usize,
}

/// Data connection feeding an extractor source
#[derive(Debug)]
pub enum ExtractorData {
    Http(HttpDataSource),
    Udp(UdpDataSource),
}

/// A chunked adaptive HLS source built from a fetched playlist
#[derive(Debug)]
pub struct HlsSource {
    pub locator: Url,
    pub manifest: HlsManifest,
    pub buffer_size: usize,
}

/// An adaptive DASH source built from a fetched MPD
#[derive(Debug)]
pub struct DashSource {
    pub locator: Url,
    pub manifest: MpdManifest,
    pub buffer_size: usize,
    /// How far behind the live edge playback starts, in milliseconds
    pub live_edge_latency_ms: u64,
}

const LIVE_EDGE_LATENCY_MS: u64 = 30_000;

/// The demuxed/adaptive stream abstraction produced by construction
#[derive(Debug)]
pub enum MediaSource {
    Extractor(ExtractorSource),
    Hls(HlsSource),
    Dash(DashSource),
}

/// Receiving half of a bound renderer's command channel, handed to the
/// decode collaborator along with the source.
#[derive(Debug)]
pub struct RendererBinding {
    pub kind: TrackKind,
    pub commands: mpsc::UnboundedReceiver<RendererCommand>,
}

/// Everything `build` produces: the source, the renderer slots bound to it,
/// the command receivers for the decode side, and the track lists.
#[derive(Debug)]
pub struct BuiltSource {
    pub source: MediaSource,
    pub slots: RendererSlots,
    pub bindings: Vec<RendererBinding>,
    pub tracks: TrackLists,
    /// Audio track preselected at construction time, when the manifest
    /// carries multiple audio variants
    pub default_audio: Option<String>,
}

/// Single-load manifest fetching. A trait so tests and alternative transports
/// can stand in for the HTTP fetcher.
#[async_trait]
pub trait ManifestFetch: Send + Sync {
    async fn fetch_hls(&self, url: &Url) -> Result<HlsManifest>;
    async fn fetch_mpd(&self, url: &Url) -> Result<MpdManifest>;
}

/// Default fetcher: one HTTP GET per manifest, parsed in place
pub struct HttpManifestFetcher {
    client: Client,
    user_agent: String,
}

impl HttpManifestFetcher {
    pub fn new(user_agent: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .expect("Failed to create HTTP client"),
            user_agent: user_agent.into(),
        }
    }
}

#[async_trait]
impl ManifestFetch for HttpManifestFetcher {
    #[instrument(skip(self))]
    async fn fetch_hls(&self, url: &Url) -> Result<HlsManifest> {
        debug!("Fetching HLS playlist: {}", url);
        let body = HttpDataSource::new(url.clone(), self.user_agent.clone())
            .fetch(&self.client)
            .await?;
        hls::parse(&body)
    }

    #[instrument(skip(self))]
    async fn fetch_mpd(&self, url: &Url) -> Result<MpdManifest> {
        debug!("Fetching DASH MPD: {}", url);
        let body = HttpDataSource::new(url.clone(), self.user_agent.clone())
            .fetch(&self.client)
            .await?;
        let content = std::str::from_utf8(&body)
            .map_err(|e| Error::ManifestParse(format!("MPD is not UTF-8: {e}")))?;
        dash::parse(content)
    }
}

/// Builds track-carrying sources and their renderer sets
#[derive(Clone)]
pub struct SourceBuilder {
    fetcher: Arc<dyn ManifestFetch>,
}

impl SourceBuilder {
    pub fn new(user_agent: impl Into<String>, timeout: Duration) -> Self {
        Self {
            fetcher: Arc::new(HttpManifestFetcher::new(user_agent, timeout)),
        }
    }

    /// Swap the manifest fetcher (tests, alternative transports)
    pub fn with_fetcher(fetcher: Arc<dyn ManifestFetch>) -> Self {
        Self { fetcher }
    }

    /// Construct the source and renderer set for one stream. Progressive and
    /// multicast construction never fails; the adaptive kinds fail when their
    /// manifest cannot be fetched or parsed, in which case no renderers are
    /// constructed.
    #[instrument(skip(self, user_agent))]
    pub async fn build(
        &self,
        locator: &Url,
        kind: SourceKind,
        user_agent: &str,
    ) -> Result<BuiltSource> {
        info!(locator = %locator, kind = %kind, "Building source");
        match kind {
            SourceKind::HttpProgressive => Ok(Self::build_extractor(
                ExtractorData::Http(HttpDataSource::new(locator.clone(), user_agent)),
                ContainerFormat::Auto,
            )),
            SourceKind::MpegTsMulticast => Ok(Self::build_extractor(
                ExtractorData::Udp(UdpDataSource::new(locator.clone())),
                ContainerFormat::MpegTs,
            )),
            SourceKind::Hls => {
                let manifest = self.fetcher.fetch_hls(locator).await?;
                Ok(Self::build_hls(locator.clone(), manifest))
            }
            SourceKind::Dash => {
                let manifest = self.fetcher.fetch_mpd(locator).await?;
                Ok(Self::build_dash(locator.clone(), manifest))
            }
        }
    }

    /// Progressive/multicast: audio and video bound straight to the demuxed
    /// source, no subtitle extraction, no enumerable track metadata.
    fn build_extractor(data: ExtractorData, format: ContainerFormat) -> BuiltSource {
        let (video, video_rx) = RendererHandle::bound(TrackKind::Video);
        let (audio, audio_rx) = RendererHandle::bound(TrackKind::Audio);
        BuiltSource {
            source: MediaSource::Extractor(ExtractorSource {
                data,
                format,
                buffer_size: VIDEO_BUFFER_SIZE,
            }),
            slots: RendererSlots {
                video,
                audio,
                text: RendererHandle::noop(TrackKind::Subtitle),
            },
            bindings: vec![
                RendererBinding {
                    kind: TrackKind::Video,
                    commands: video_rx,
                },
                RendererBinding {
                    kind: TrackKind::Audio,
                    commands: audio_rx,
                },
            ],
            tracks: Default::default(),
            default_audio: None,
        }
    }

    /// HLS: chunked adaptive source plus a timed-text renderer decoding
    /// in-band caption cues. Exactly one subtitle track is advertised; the
    /// playlist is not inspected for actual subtitle presence.
    fn build_hls(locator: Url, manifest: HlsManifest) -> BuiltSource {
        let (video, video_rx) = RendererHandle::bound(TrackKind::Video);
        let (audio, audio_rx) = RendererHandle::bound(TrackKind::Audio);
        let (text, text_rx) = RendererHandle::bound(TrackKind::Subtitle);

        let mut tracks: TrackLists = Default::default();
        tracks[TrackKind::Audio.index()] = manifest.audio_tracks.clone();
        tracks[TrackKind::Subtitle.index()] = vec![Track::subtitle("1")];

        BuiltSource {
            source: MediaSource::Hls(HlsSource {
                locator,
                manifest,
                buffer_size: VIDEO_BUFFER_SIZE,
            }),
            slots: RendererSlots {
                video,
                audio,
                text,
            },
            bindings: vec![
                RendererBinding {
                    kind: TrackKind::Video,
                    commands: video_rx,
                },
                RendererBinding {
                    kind: TrackKind::Audio,
                    commands: audio_rx,
                },
                RendererBinding {
                    kind: TrackKind::Subtitle,
                    commands: text_rx,
                },
            ],
            tracks,
            default_audio: None,
        }
    }

    /// DASH: one audio track per representation with manifest metadata, the
    /// first preselected. No in-band subtitle extraction.
    fn build_dash(locator: Url, manifest: MpdManifest) -> BuiltSource {
        let (video, video_rx) = RendererHandle::bound(TrackKind::Video);
        let (audio, audio_rx) = RendererHandle::bound(TrackKind::Audio);

        let mut tracks: TrackLists = Default::default();
        tracks[TrackKind::Audio.index()] = manifest.audio_tracks.clone();
        let default_audio = manifest.audio_tracks.first().map(|t| t.id.clone());

        BuiltSource {
            source: MediaSource::Dash(DashSource {
                locator,
                manifest,
                buffer_size: AUDIO_BUFFER_SIZE,
                live_edge_latency_ms: LIVE_EDGE_LATENCY_MS,
            }),
            slots: RendererSlots {
                video,
                audio,
                text: RendererHandle::noop(TrackKind::Subtitle),
            },
            bindings: vec![
                RendererBinding {
                    kind: TrackKind::Video,
                    commands: video_rx,
                },
                RendererBinding {
                    kind: TrackKind::Audio,
                    commands: audio_rx,
                },
            ],
            tracks,
            default_audio,
        }
    }
}
