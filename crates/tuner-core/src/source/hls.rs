//! HLS playlist parsing for source construction
//!
//! Only the top-level playlist is loaded here; segment scheduling belongs to
//! the decode collaborator. Both master and media playlists are accepted as
//! entry points.

use crate::{
    error::{Error, Result},
    types::Track,
};
use m3u8_rs::{AlternativeMediaType, MasterPlaylist, Playlist};
use std::time::Duration;

/// Summary of a fetched top-level playlist
#[derive(Debug, Clone)]
pub struct HlsManifest {
    /// Entry point was a master (multivariant) playlist
    pub is_master: bool,
    /// Number of variant streams (1 for a media-playlist entry point)
    pub variant_count: usize,
    /// Live stream (no end-list marker). Unknown for a master entry point
    /// until a media playlist is loaded; reported as false.
    pub is_live: bool,
    /// Total duration for VOD content, when known
    pub duration: Option<Duration>,
    /// Alternative audio renditions advertised by the playlist
    pub audio_tracks: Vec<Track>,
}

/// Parse a top-level playlist body
pub fn parse(bytes: &[u8]) -> Result<HlsManifest> {
    let playlist = m3u8_rs::parse_playlist_res(bytes)
        .map_err(|e| Error::ManifestParse(format!("Failed to parse HLS playlist: {e:?}")))?;

    match playlist {
        Playlist::MasterPlaylist(master) => Ok(HlsManifest {
            is_master: true,
            variant_count: master.variants.len(),
            is_live: false,
            duration: None,
            audio_tracks: extract_audio_tracks(&master),
        }),
        Playlist::MediaPlaylist(media) => {
            let is_live = !media.end_list;
            let duration = media.end_list.then(|| {
                Duration::from_secs_f32(media.segments.iter().map(|s| s.duration).sum())
            });
            Ok(HlsManifest {
                is_master: false,
                variant_count: 1,
                is_live,
                duration,
                audio_tracks: Vec::new(),
            })
        }
    }
}

/// Audio renditions from EXT-X-MEDIA, with language and channel count when
/// the playlist provides them
fn extract_audio_tracks(master: &MasterPlaylist) -> Vec<Track> {
    master
        .alternatives
        .iter()
        .filter(|alt| alt.media_type == AlternativeMediaType::Audio)
        .enumerate()
        .map(|(idx, alt)| {
            let mut track = Track::audio(idx.to_string());
            if let Some(lang) = &alt.language {
                track = track.with_language(lang.clone());
            }
            if let Some(channels) = alt.channels.as_deref().and_then(parse_channel_count) {
                track = track.with_channel_count(channels);
            }
            track
        })
        .collect()
}

/// CHANNELS is "count" or "count/extra"; only the count matters here
fn parse_channel_count(channels: &str) -> Option<u32> {
    channels.split('/').next()?.parse().ok()
}
