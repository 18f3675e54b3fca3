use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    env::ResolverConfig,
    error::Result,
    http::{header_map, HttpClient, HttpClientOptions},
    kkey::{KeyConstants, KkeyCipher, ResourceType},
    model::{SkipRange, Source, Subtitle, Video},
};

/// Desktop Chrome agent the decode service and the video hosts expect.
pub const DESKTOP_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/137.0.0.0 Safari/537.36";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StreamingServer {
    #[default]
    MegaUp,
    /// Matched as a lower-case substring of the upstream server label, e.g. `megaup server 2`.
    Named(String),
}

impl StreamingServer {
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "" | "megaup" => StreamingServer::MegaUp,
            other => StreamingServer::Named(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            StreamingServer::MegaUp => "megaup",
            StreamingServer::Named(name) => name,
        }
    }

    pub fn matches(&self, server_name: &str) -> bool {
        server_name.to_lowercase().contains(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SubOrDub {
    #[default]
    Sub,
    Dub,
}

impl SubOrDub {
    pub fn from_str(s: &str) -> Self {
        match s {
            "dub" => SubOrDub::Dub,
            _ => SubOrDub::Sub,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SubOrDub::Sub => "sub",
            SubOrDub::Dub => "dub",
        }
    }

    /// `data-id` of the server group on AnimeKai's link list.
    pub fn lang_group(&self) -> &str {
        match self {
            SubOrDub::Sub => "softsub",
            SubOrDub::Dub => "dub",
        }
    }
}

/// Produces the `_` query token AnimeKai's ajax endpoints check.
#[async_trait]
pub trait TokenSource: Send + Sync + fmt::Debug {
    async fn generate(&self, text: &str) -> Result<String>;
}

/// In-process tokens from the kkey cipher.
#[derive(Debug, Clone, Default)]
pub struct KkeyTokens {
    cipher: KkeyCipher,
    constants: KeyConstants,
}

impl KkeyTokens {
    pub fn new(cipher: KkeyCipher, constants: KeyConstants) -> Self {
        KkeyTokens { cipher, constants }
    }
}

#[async_trait]
impl TokenSource for KkeyTokens {
    async fn generate(&self, text: &str) -> Result<String> {
        Ok(self
            .cipher
            .derive_key(text, ResourceType::Video, &self.constants))
    }
}

#[derive(Debug, Deserialize)]
struct WithResult<T> {
    result: T,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct SkipMarks {
    #[serde(default)]
    pub intro: Option<[f64; 2]>,
    #[serde(default)]
    pub outro: Option<[f64; 2]>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct IframeData {
    pub url: String,
    #[serde(default)]
    pub skip: SkipMarks,
}

impl IframeData {
    pub fn intro(&self) -> Option<SkipRange> {
        self.skip.intro.map(skip_range)
    }

    pub fn outro(&self) -> Option<SkipRange> {
        self.skip.outro.map(skip_range)
    }
}

fn skip_range([start, end]: [f64; 2]) -> SkipRange {
    SkipRange {
        start: start.max(0.0),
        end: end.max(0.0),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaFile {
    pub file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Track {
    pub file: String,
    pub kind: Option<String>,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DecodedMedia {
    #[serde(default)]
    pub download: Option<String>,
    #[serde(default)]
    pub sources: Vec<MediaFile>,
    #[serde(default)]
    pub tracks: Vec<Track>,
}

impl From<DecodedMedia> for Source {
    fn from(media: DecodedMedia) -> Self {
        Source {
            download: media.download.filter(|d| !d.is_empty()),
            sources: media
                .sources
                .iter()
                .map(|source| Video::from_file(&source.file))
                .collect(),
            subtitles: media
                .tracks
                .into_iter()
                .map(|track| Subtitle {
                    id: None,
                    kind: track.kind,
                    lang: track.label.unwrap_or_default(),
                    url: track.file,
                })
                .collect(),
            ..Source::default()
        }
    }
}

/// Client of the enc-dec service that decodes MegaUp payloads. Holds no per-request state.
#[derive(Debug, Clone)]
pub struct MegaUp {
    client: HttpClient,
}

impl MegaUp {
    pub fn new(client: HttpClient) -> Self {
        MegaUp { client }
    }

    pub fn from_config(config: &ResolverConfig) -> Result<Self> {
        let client =
            HttpClient::new(HttpClientOptions::new(&config.enc_dec_url).timeout(config.timeout))?;
        Ok(MegaUp::new(client))
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    pub async fn generate_token(&self, text: &str) -> Result<String> {
        let url = format!("/enc-kai?text={}", urlencoding::encode(text));
        let res: WithResult<String> = self.client.get_json(&url, None).await?;
        Ok(res.result)
    }

    pub async fn decode_iframe_data(&self, text: &str) -> Result<IframeData> {
        let res: WithResult<IframeData> = self
            .client
            .post_json("/dec-kai", &json!({ "text": text }), None)
            .await?;
        Ok(res.result)
    }

    pub async fn decode(&self, text: &str) -> Result<DecodedMedia> {
        let res: WithResult<DecodedMedia> = self
            .client
            .post_json(
                "/dec-mega",
                &json!({ "agent": DESKTOP_AGENT, "text": text }),
                None,
            )
            .await?;
        Ok(res.result)
    }

    /// Fetches the player's media payload and decodes it into playable sources.
    pub async fn extract(&self, video_url: &str) -> Result<Source> {
        let media_url = video_url.replacen("/e/", "/media/", 1);
        let headers = header_map(&[("Connection", "keep-alive"), ("User-Agent", DESKTOP_AGENT)])?;
        let res: WithResult<String> = self.client.get_json(&media_url, Some(headers)).await?;
        let decoded = self.decode(&res.result).await?;
        Ok(Source::from(decoded))
    }
}

#[async_trait]
impl TokenSource for MegaUp {
    async fn generate(&self, text: &str) -> Result<String> {
        self.generate_token(text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_matching_is_substring() {
        assert!(StreamingServer::MegaUp.matches("MegaUp Server 1"));
        assert!(StreamingServer::from_str("MegaUp Server 2").matches("megaup server 2"));
        assert!(!StreamingServer::from_str("server 3").matches("megaup server 1"));
    }

    #[test]
    fn sub_or_dub_groups() {
        assert_eq!(SubOrDub::from_str("dub").lang_group(), "dub");
        assert_eq!(SubOrDub::from_str("raw").lang_group(), "softsub");
    }

    #[test]
    fn iframe_data_without_skip_has_no_ranges() {
        let data: IframeData =
            serde_json::from_str(r#"{"url":"https://megaup.live/e/abc"}"#).unwrap();
        assert!(data.intro().is_none());

        let data: IframeData = serde_json::from_str(
            r#"{"url":"https://megaup.live/e/abc","skip":{"intro":[0,89.5],"outro":[1300,1390]}}"#,
        )
        .unwrap();
        assert_eq!(data.intro(), Some(SkipRange { start: 0.0, end: 89.5 }));
        assert_eq!(data.outro().map(|r| r.end), Some(1390.0));
    }

    #[test]
    fn decoded_media_maps_tracks_and_hls() {
        let media: DecodedMedia = serde_json::from_str(
            r#"{"download":"","sources":[{"file":"https://cdn/x/list.m3u8"},{"file":"https://cdn/x.mp4"}],
                "tracks":[{"kind":"captions","file":"https://cdn/en.vtt","label":"English"}]}"#,
        )
        .unwrap();
        let source = Source::from(media);
        assert!(source.download.is_none());
        assert!(source.sources[0].is_m3u8);
        assert!(!source.sources[1].is_m3u8);
        assert_eq!(source.subtitles[0].lang, "English");
    }

    #[tokio::test]
    async fn local_tokens_are_deterministic() {
        let tokens = KkeyTokens::default();
        let a = tokens.generate("ani-4213").await.unwrap();
        assert_eq!(a, tokens.generate("ani-4213").await.unwrap());
        assert_ne!(a, tokens.generate("ani-4214").await.unwrap());
    }
}
