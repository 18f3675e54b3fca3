use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One page of listing results.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage<R> {
    pub results: Vec<R>,
    pub current_page: Option<u32>,
    pub has_next_page: Option<bool>,
    pub total_pages: Option<u32>,
    pub total_results: Option<u32>,
}

impl<R> SearchPage<R> {
    pub fn single(results: Vec<R>) -> Self {
        SearchPage {
            results,
            current_page: None,
            has_next_page: None,
            total_pages: None,
            total_results: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MediaResult {
    /// Upstream-relative handle, only meaningful to the provider that produced it.
    pub id: String,
    pub title: String,
    pub japanese_title: Option<String>,
    pub image: Option<String>,
    #[serde(rename = "type")]
    pub media_type: Option<String>,
    pub sub: Option<u32>,
    pub dub: Option<u32>,
    pub episodes: Option<u32>,
    pub relation_type: Option<String>,
    pub year: Option<String>,
    pub url: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaStatus {
    Completed,
    Ongoing,
    NotYetAired,
    #[default]
    Unknown,
}

impl MediaStatus {
    /// Maps the free-text status label of a detail page.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "completed" | "finished airing" => MediaStatus::Completed,
            "releasing" | "ongoing" | "currently airing" => MediaStatus::Ongoing,
            "not yet aired" | "upcoming" => MediaStatus::NotYetAired,
            _ => MediaStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            MediaStatus::Completed => "Completed",
            MediaStatus::Ongoing => "Ongoing",
            MediaStatus::NotYetAired => "Not yet aired",
            MediaStatus::Unknown => "Unknown",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    #[serde(flatten)]
    pub base: MediaResult,
    pub description: String,
    pub genres: Vec<String>,
    pub status: MediaStatus,
    pub season: Option<String>,
    pub has_sub: bool,
    pub has_dub: bool,
    pub total_episodes: Option<u32>,
    pub episodes: Vec<Episode>,
    pub recommendations: Vec<MediaResult>,
    pub relations: Vec<MediaResult>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    /// `<mediaId>$ep=<n>$token=<t>` for AnimeKai; carries the authorization into extraction.
    pub id: String,
    /// Fractional for recap or special episodes, e.g. `12.5`.
    pub number: f64,
    pub title: Option<String>,
    pub url: String,
    pub is_subbed: bool,
    pub is_dubbed: bool,
    pub is_filler: Option<bool>,
}

/// Skip range in seconds.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct SkipRange {
    pub start: f64,
    pub end: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EpisodeServer {
    pub name: String,
    pub url: String,
    pub intro: Option<SkipRange>,
    pub outro: Option<SkipRange>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    pub url: String,
    pub quality: Option<String>,
    #[serde(rename = "isM3U8")]
    pub is_m3u8: bool,
    #[serde(rename = "isDASH")]
    pub is_dash: bool,
}

impl Video {
    pub fn from_file(file: &str) -> Self {
        Video {
            url: file.to_string(),
            quality: None,
            is_m3u8: is_hls(file),
            is_dash: false,
        }
    }
}

/// HLS manifest detection on a file path.
pub fn is_hls(file: &str) -> bool {
    file.contains(".m3u8") || file.ends_with("m3u8")
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Subtitle {
    pub id: Option<String>,
    pub kind: Option<String>,
    pub lang: String,
    pub url: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub sources: Vec<Video>,
    pub subtitles: Vec<Subtitle>,
    pub download: Option<String>,
    #[serde(rename = "embedURL")]
    pub embed_url: Option<String>,
    /// Must be replayed on every downstream fetch of `sources`; the CDN rejects requests without them.
    pub headers: HashMap<String, String>,
    pub intro: Option<SkipRange>,
    pub outro: Option<SkipRange>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpotlightEntry {
    #[serde(flatten)]
    pub base: MediaResult,
    pub banner: Option<String>,
    pub description: String,
    pub genres: Vec<String>,
    pub quality: String,
    pub release_date: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    pub id: String,
    pub title: String,
    pub japanese_title: Option<String>,
    pub airing_time: String,
    pub airing_episode: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStats {
    pub name: String,
    pub base_url: String,
    pub class_path: String,
    pub is_nsfw: bool,
    pub is_working: bool,
    pub languages: Vec<String>,
    pub logo: Option<String>,
}
