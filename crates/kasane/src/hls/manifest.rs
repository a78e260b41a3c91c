use std::collections::HashMap;

use m3u8_rs::{AlternativeMediaType, MasterPlaylist, MediaPlaylist, Playlist, VariantStream};
use reqwest::Url;

use crate::{
    asset::{unique_id, MediaCharacteristic, MediaSelection, TrackGroup, TrackOption},
    error::{KasaneError, KasaneResult},
    util::{http::HttpClient, range::ByteRange},
};

pub(crate) async fn load_playlist(
    client: &HttpClient,
    url: &Url,
    total_retry: u32,
) -> KasaneResult<Playlist> {
    log::info!("Start fetching M3U8 file {url}.");

    let mut retry = total_retry.max(1);
    loop {
        if retry == 0 {
            return Err(KasaneError::ManifestFetchError);
        }
        retry -= 1;

        let resp = match client.get(url.clone()).send().await {
            Ok(resp) => resp,
            Err(error) => {
                log::warn!("Failed to fetch M3U8 file: {error}");
                continue;
            }
        };
        if !resp.status().is_success() {
            log::warn!("Failed to fetch M3U8 file: HTTP {}", resp.status());
            continue;
        }
        match resp.bytes().await {
            Ok(m3u8_bytes) => match m3u8_rs::parse_playlist_res(&m3u8_bytes) {
                Ok(parsed) => {
                    log::info!("M3U8 file fetched.");
                    return Ok(parsed);
                }
                Err(error) => log::warn!("Failed to parse M3U8 file: {error}"),
            },
            Err(error) => log::warn!("Failed to fetch M3U8 file: {error}"),
        }
    }
}

pub(crate) async fn load_media_playlist(
    client: &HttpClient,
    url: &Url,
    total_retry: u32,
) -> KasaneResult<MediaPlaylist> {
    match load_playlist(client, url, total_retry).await? {
        Playlist::MediaPlaylist(playlist) => Ok(playlist),
        Playlist::MasterPlaylist(_) => Err(KasaneError::M3u8ParseError(format!(
            "{url} is a master playlist, expected a media playlist"
        ))),
    }
}

/// An alternative rendition of the presentation.
#[derive(Debug, Clone)]
pub(crate) struct Rendition {
    pub characteristic: MediaCharacteristic,
    pub option: TrackOption,
    pub group_id: String,
    /// `None` when the rendition is muxed into the variant.
    pub uri: Option<Url>,
}

/// What a master playlist offers, reduced to the best variant and the
/// audio and subtitle renditions.
#[derive(Debug, Clone)]
pub(crate) struct Presentation {
    pub video: Url,
    audio_group: Option<String>,
    subtitle_group: Option<String>,
    renditions: Vec<Rendition>,
}

impl Presentation {
    pub(crate) async fn load(client: &HttpClient, url: &Url, retries: u32) -> KasaneResult<Self> {
        match load_playlist(client, url, retries).await? {
            Playlist::MasterPlaylist(master) => Self::from_master(url, master),
            Playlist::MediaPlaylist(_) => {
                log::info!("Media playlist input detected, no alternative renditions.");
                Ok(Self {
                    video: url.clone(),
                    audio_group: None,
                    subtitle_group: None,
                    renditions: Vec::new(),
                })
            }
        }
    }

    pub(crate) fn from_master(url: &Url, master: MasterPlaylist) -> KasaneResult<Self> {
        log::info!("Master playlist input detected. Auto selecting best quality streams.");
        let variant = best_variant(master.variants)
            .ok_or_else(|| KasaneError::M3u8ParseError("No variant found".to_string()))?;
        let video = url.join(&variant.uri)?;
        log::info!(
            "Best stream: {video}; Bandwidth: {bandwidth}",
            bandwidth = variant.bandwidth
        );

        let mut renditions = Vec::new();
        for media in master.alternatives {
            let characteristic = match media.media_type {
                AlternativeMediaType::Audio => MediaCharacteristic::Audible,
                AlternativeMediaType::Subtitles => MediaCharacteristic::Legible,
                _ => continue,
            };
            let uri = media.uri.as_deref().map(|uri| url.join(uri)).transpose()?;
            let id = match &media.language {
                Some(language) => unique_id(&format!("{language}-{}", media.name)),
                None => unique_id(&media.name),
            };

            let mut option = TrackOption::new(id, media.name);
            option.language = media.language;
            option.is_default = media.default;
            renditions.push(Rendition {
                characteristic,
                option,
                group_id: media.group_id,
                uri,
            });
        }

        Ok(Self {
            video,
            audio_group: variant.audio,
            subtitle_group: variant.subtitles,
            renditions,
        })
    }

    /// Renditions sharing a name and a language across group ids are one
    /// option. An option is the default when any of its renditions is.
    pub(crate) fn track_groups(&self) -> Vec<TrackGroup> {
        let mut groups = Vec::new();
        for characteristic in MediaCharacteristic::PRIORITY {
            let mut options: Vec<TrackOption> = Vec::new();
            for rendition in self
                .renditions
                .iter()
                .filter(|r| r.characteristic == characteristic)
            {
                match options.iter_mut().find(|o| o.id == rendition.option.id) {
                    Some(option) => option.is_default |= rendition.option.is_default,
                    None => options.push(rendition.option.clone()),
                }
            }
            if !options.is_empty() {
                groups.push(TrackGroup::new(characteristic, options));
            }
        }
        groups
    }

    /// Complete `requested` with the default option of every group it leaves
    /// out. Unknown options are replaced by the default.
    pub(crate) fn resolve_selection(&self, requested: &MediaSelection) -> MediaSelection {
        let mut selection = MediaSelection::new();
        for group in self.track_groups() {
            let requested = requested.get(group.characteristic);
            let option = match requested.and_then(|id| group.option(id)) {
                Some(option) => Some(option),
                None => {
                    if let Some(id) = requested {
                        tracing::warn!(
                            "{} option {id} is not offered, using the default.",
                            group.characteristic
                        );
                    }
                    group.default_option()
                }
            };
            if let Some(option) = option {
                selection.select(group.characteristic, option.id.clone());
            }
        }
        selection
    }

    /// The rendition to download for an option, preferring the group the
    /// best variant refers to.
    pub(crate) fn rendition(
        &self,
        characteristic: MediaCharacteristic,
        option_id: &str,
    ) -> Option<&Rendition> {
        let preferred = match characteristic {
            MediaCharacteristic::Audible => self.audio_group.as_deref(),
            MediaCharacteristic::Legible => self.subtitle_group.as_deref(),
        };
        let mut candidates = self
            .renditions
            .iter()
            .filter(|r| r.characteristic == characteristic && r.option.id == option_id);
        let first = candidates.next()?;
        if preferred.is_none() || preferred == Some(first.group_id.as_str()) {
            return Some(first);
        }
        candidates
            .find(|r| Some(r.group_id.as_str()) == preferred)
            .or(Some(first))
    }
}

fn best_variant(variants: Vec<VariantStream>) -> Option<VariantStream> {
    let mut variants: Vec<_> = variants.into_iter().filter(|v| !v.is_i_frame).collect();
    variants.sort_by(|a, b| {
        // compare resolution first
        if let (Some(a), Some(b)) = (a.resolution, b.resolution) {
            if a.width != b.width {
                return b.width.cmp(&a.width);
            }
        }

        // compare framerate then
        if let (Some(a), Some(b)) = (a.frame_rate, b.frame_rate) {
            let a = a as u64;
            let b = b as u64;
            if a != b {
                return b.cmp(&a);
            }
        }

        // compare bandwidth finally
        b.bandwidth.cmp(&a.bandwidth)
    });
    variants.into_iter().next()
}

/// A file to download for one media playlist.
#[derive(Debug, Clone)]
pub(crate) struct SegmentEntry {
    pub url: Url,
    pub file_name: String,
    pub byte_range: Option<ByteRange>,
    /// Media time covered by the segment, zero for initialization sections.
    pub start: f64,
    pub duration: f64,
}

fn file_name(url: &Url) -> String {
    let name = url
        .path_segments()
        .and_then(|mut c| c.next_back())
        .filter(|name| !name.is_empty())
        .unwrap_or("output.ts");
    let name: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    // keep the extension when the name is too long
    match name.len() {
        0..=64 => name,
        len => name[len - 64..].to_string(),
    }
}

fn byte_range(
    range: &m3u8_rs::ByteRange,
    url: &Url,
    last_end: &mut HashMap<Url, u64>,
) -> KasaneResult<ByteRange> {
    if range.length == 0 {
        return Err(KasaneError::M3u8ParseError(format!("Empty byte range of {url}")));
    }
    let offset = range
        .offset
        .unwrap_or_else(|| last_end.get(url).copied().unwrap_or(0));
    let range = ByteRange::new(offset, Some(range.length));
    if let Some(end) = range.end() {
        last_end.insert(url.clone(), end);
    }
    Ok(range)
}

/// Files to download for `playlist`, and the same playlist pointing to them.
pub(crate) fn plan_segments(
    url: &Url,
    playlist: &MediaPlaylist,
) -> KasaneResult<(Vec<SegmentEntry>, MediaPlaylist)> {
    let mut local = playlist.clone();
    let mut entries = Vec::with_capacity(playlist.segments.len());
    let mut maps: HashMap<Url, String> = HashMap::new();
    let mut last_end = HashMap::new();
    let mut start = 0.;

    for (i, segment) in local.segments.iter_mut().enumerate() {
        if let Some(map) = &mut segment.map {
            let map_url = url.join(&map.uri)?;
            let name = match maps.get(&map_url) {
                Some(name) => name.clone(),
                None => {
                    let name = format!("init_{:02}_{}", maps.len(), file_name(&map_url));
                    entries.push(SegmentEntry {
                        url: map_url.clone(),
                        file_name: name.clone(),
                        byte_range: map
                            .byte_range
                            .as_ref()
                            .map(|r| byte_range(r, &map_url, &mut last_end))
                            .transpose()?,
                        start,
                        duration: 0.,
                    });
                    maps.insert(map_url, name.clone());
                    name
                }
            };
            map.uri = name;
            map.byte_range = None;
        }

        if let Some(uri) = segment.key.as_mut().and_then(|key| key.uri.as_mut()) {
            *uri = url.join(uri)?.to_string();
        }

        let segment_url = url.join(&segment.uri)?;
        let name = format!("{i:06}_{}", file_name(&segment_url));
        let duration = segment.duration as f64;
        entries.push(SegmentEntry {
            byte_range: segment
                .byte_range
                .as_ref()
                .map(|r| byte_range(r, &segment_url, &mut last_end))
                .transpose()?,
            url: segment_url,
            file_name: name.clone(),
            start,
            duration,
        });
        start += duration;

        segment.uri = name;
        segment.byte_range = None;
    }

    Ok((entries, local))
}

/// Total media time of the planned segments.
pub(crate) fn total_duration(entries: &[SegmentEntry]) -> f64 {
    entries.iter().map(|e| e.duration).sum()
}
