//! DASH MPD parsing for source construction
//!
//! Lightweight attribute scanning rather than a full XML parse; the core
//! only needs the adaptation-set shape and per-representation audio
//! metadata, not the segment addressing scheme.

use crate::{
    error::{Error, Result},
    types::Track,
};

/// Summary of a fetched MPD
#[derive(Debug, Clone)]
pub struct MpdManifest {
    /// Dynamic (live) presentation
    pub is_live: bool,
    /// Number of video representations across video adaptation sets
    pub video_representation_count: usize,
    /// One track per audio representation, with manifest metadata
    pub audio_tracks: Vec<Track>,
}

/// Parse an MPD body
pub fn parse(content: &str) -> Result<MpdManifest> {
    if !content.contains("<MPD") {
        return Err(Error::ManifestParse("not an MPD document".into()));
    }

    let is_live = content.contains("type=\"dynamic\"");

    let mut video_representation_count = 0;
    let mut audio_tracks = Vec::new();

    for set in adaptation_sets(content) {
        let set_attrs = element_attrs(set);
        if is_content_type(set_attrs, "video") {
            video_representation_count += representations(set).count();
        } else if is_content_type(set_attrs, "audio") {
            let set_lang = extract_attr(set_attrs, "lang");
            for (idx, rep) in representations(set).enumerate() {
                audio_tracks.push(audio_track(rep, idx, set_lang.as_deref()));
            }
        }
    }

    Ok(MpdManifest {
        is_live,
        video_representation_count,
        audio_tracks,
    })
}

fn audio_track(rep: &str, idx: usize, set_lang: Option<&str>) -> Track {
    let attrs = element_attrs(rep);
    let id = extract_attr(attrs, "id").unwrap_or_else(|| idx.to_string());
    let mut track = Track::audio(id);
    if let Some(lang) = extract_attr(attrs, "lang").or_else(|| set_lang.map(str::to_string)) {
        track = track.with_language(lang);
    }
    if let Some(rate) = extract_attr(attrs, "audioSamplingRate").and_then(|s| s.parse().ok()) {
        track = track.with_sample_rate(rate);
    }
    if let Some(channels) = channel_configuration(rep) {
        track = track.with_channel_count(channels);
    }
    track
}

/// AdaptationSet blocks, each spanning to its closing tag (or the next set
/// when the document is malformed)
fn adaptation_sets(content: &str) -> impl Iterator<Item = &str> {
    content.split("<AdaptationSet").skip(1).map(|block| {
        block
            .find("</AdaptationSet>")
            .map(|end| &block[..end])
            .unwrap_or(block)
    })
}

fn representations(set: &str) -> impl Iterator<Item = &str> {
    set.split("<Representation").skip(1)
}

/// The attribute region of the element starting this block
fn element_attrs(block: &str) -> &str {
    block.find('>').map(|end| &block[..end]).unwrap_or(block)
}

fn is_content_type(attrs: &str, kind: &str) -> bool {
    extract_attr(attrs, "contentType").as_deref() == Some(kind)
        || extract_attr(attrs, "mimeType")
            .map(|m| m.starts_with(&format!("{kind}/")))
            .unwrap_or(false)
}

/// Channel count from a nested AudioChannelConfiguration element
fn channel_configuration(rep: &str) -> Option<u32> {
    let block = rep.split("<AudioChannelConfiguration").nth(1)?;
    extract_attr(element_attrs(block), "value")?.parse().ok()
}

fn extract_attr(attrs: &str, name: &str) -> Option<String> {
    let needle = format!("{name}=\"");
    let start = attrs.find(&needle)? + needle.len();
    let end = attrs[start..].find('"')?;
    Some(attrs[start..start + end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MPD: &str = r#"<?xml version="1.0"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="static" mediaPresentationDuration="PT1H">
  <Period>
    <AdaptationSet contentType="video" mimeType="video/mp4">
      <Representation id="v720" bandwidth="2000000" width="1280" height="720"/>
      <Representation id="v1080" bandwidth="4500000" width="1920" height="1080"/>
    </AdaptationSet>
    <AdaptationSet contentType="audio" lang="en" mimeType="audio/mp4">
      <Representation id="a-main" bandwidth="128000" audioSamplingRate="48000">
        <AudioChannelConfiguration schemeIdUri="urn:mpeg:dash:23003:3:audio_channel_configuration:2011" value="2"/>
      </Representation>
    </AdaptationSet>
    <AdaptationSet mimeType="audio/mp4" lang="es">
      <Representation id="a-alt" bandwidth="96000" audioSamplingRate="44100"/>
    </AdaptationSet>
  </Period>
</MPD>"#;

    #[test]
    fn test_parse_representations() {
        let manifest = parse(MPD).unwrap();
        assert!(!manifest.is_live);
        assert_eq!(manifest.video_representation_count, 2);
        assert_eq!(manifest.audio_tracks.len(), 2);
    }

    #[test]
    fn test_audio_metadata() {
        let manifest = parse(MPD).unwrap();
        let main = &manifest.audio_tracks[0];
        assert_eq!(main.id, "a-main");
        assert_eq!(main.language.as_deref(), Some("en"));
        assert_eq!(main.sample_rate, Some(48_000));
        assert_eq!(main.channel_count, Some(2));

        let alt = &manifest.audio_tracks[1];
        assert_eq!(alt.language.as_deref(), Some("es"));
        assert_eq!(alt.channel_count, None);
    }

    #[test]
    fn test_dynamic_mpd_is_live() {
        let live = MPD.replace("type=\"static\"", "type=\"dynamic\"");
        assert!(parse(&live).unwrap().is_live);
    }

    #[test]
    fn test_non_mpd_fails() {
        assert!(matches!(
            parse("#EXTM3U"),
            Err(Error::ManifestParse(_))
        ));
    }
}
