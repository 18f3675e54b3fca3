use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use tracing::debug;

use crate::{
    env::ResolverConfig,
    error::{AniResolveError, Result},
    http::{header_map, HttpClient, HttpClientOptions},
    kkey::{KeyConstants, KkeyCipher, ResourceType},
    model::{
        Episode, MediaInfo, MediaResult, MediaStatus, ProviderStats, SearchPage, Source, Subtitle,
        Video,
    },
    provider::{Provider, Toolkit},
    proxy::ProxyConfig,
    servers::{StreamingServer, SubOrDub, DESKTOP_AGENT},
    utils::parse_u64,
};

pub const KISSKH_NAME: &str = "KissKH";
const CLASS_PATH: &str = "MOVIES.KissKH";
const LOGO: &str = "https://kisskh.co/assets/images/logo.png";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DramaCard {
    id: i64,
    title: String,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    episodes_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DramaDetail {
    id: i64,
    title: String,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    release_date: Option<String>,
    #[serde(default)]
    episodes_count: Option<u32>,
    #[serde(default)]
    episodes: Vec<DramaEpisode>,
}

#[derive(Debug, Deserialize)]
struct DramaEpisode {
    id: i64,
    number: f64,
    #[serde(default)]
    sub: u32,
}

#[derive(Debug, Deserialize)]
struct EpisodeVideo {
    #[serde(rename = "Video", default)]
    video: Option<String>,
    #[serde(rename = "ThirdParty", default)]
    third_party: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubtitleTrack {
    src: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    land: Option<String>,
}

/// Drama catalog behind kisskh's JSON api; episode and subtitle urls are signed with kkeys.
#[derive(Debug, Clone)]
pub struct KissKh {
    toolkit: Toolkit,
    cipher: KkeyCipher,
    constants: KeyConstants,
    headers: HeaderMap,
}

impl KissKh {
    pub fn new(client: HttpClient, cipher: KkeyCipher, constants: KeyConstants) -> Result<Self> {
        let referer = format!("{}/", client.base_url().trim_end_matches('/'));
        let headers = header_map(&[("Referer", referer.as_str()), ("User-Agent", DESKTOP_AGENT)])?;
        Ok(KissKh {
            toolkit: Toolkit::new(KISSKH_NAME, client),
            cipher,
            constants,
            headers,
        })
    }

    pub fn from_config(config: &ResolverConfig) -> Result<Self> {
        let client = HttpClient::new(
            HttpClientOptions::new(config.kisskh_url.trim_end_matches('/')).timeout(config.timeout),
        )?;
        KissKh::new(client, config.kkey_cipher(), KeyConstants::default())
    }

    fn base(&self) -> &str {
        self.toolkit.base_url().trim_end_matches('/')
    }

    fn drama_url(&self, id: i64) -> String {
        format!("{}/Drama/Any/?id={}", self.base(), id)
    }

    pub fn video_key(&self, episode_id: i64) -> String {
        self.cipher
            .derive_key(episode_id, ResourceType::Video, &self.constants)
    }

    pub fn subtitle_key(&self, episode_id: i64) -> String {
        self.cipher
            .derive_key(episode_id, ResourceType::Subtitle, &self.constants)
    }

    pub async fn search(&self, query: &str) -> Result<SearchPage<MediaResult>> {
        if query.trim().is_empty() {
            return Err(AniResolveError::validation("Search query is empty"));
        }
        let url = format!(
            "/api/DramaList/Search?q={}&type=0",
            urlencoding::encode(query.trim())
        );
        self.toolkit
            .guard("search", async {
                let cards: Vec<DramaCard> = self
                    .toolkit
                    .client()
                    .get_json(&url, Some(self.headers.clone()))
                    .await?;
                let results = cards
                    .into_iter()
                    .map(|card| MediaResult {
                        id: card.id.to_string(),
                        url: self.drama_url(card.id),
                        title: card.title,
                        image: card.thumbnail,
                        episodes: card.episodes_count,
                        ..MediaResult::default()
                    })
                    .collect();
                Ok(SearchPage::single(results))
            })
            .await
    }

    pub async fn fetch_drama_info(&self, id: &str) -> Result<MediaInfo> {
        let drama_id = parse_id(id, "Drama id")?;
        let url = format!("/api/DramaList/Drama/{}?isq=false", drama_id);
        self.toolkit
            .guard("drama info", async {
                let detail: DramaDetail = self
                    .toolkit
                    .client()
                    .get_json(&url, Some(self.headers.clone()))
                    .await?;
                Ok(self.drama_info(detail))
            })
            .await
    }

    fn drama_info(&self, detail: DramaDetail) -> MediaInfo {
        let mut episodes: Vec<Episode> = detail
            .episodes
            .iter()
            .map(|ep| {
                let number = ep.number.max(0.0);
                Episode {
                    id: ep.id.to_string(),
                    number,
                    title: Some(format!("Episode {}", number)),
                    url: format!("{}&ep={}", self.drama_url(detail.id), number),
                    is_subbed: ep.sub > 0,
                    is_dubbed: false,
                    is_filler: None,
                }
            })
            .collect();
        // The api lists newest first.
        episodes.sort_by(|a, b| a.number.total_cmp(&b.number));

        let total = detail
            .episodes_count
            .unwrap_or(episodes.len() as u32);

        MediaInfo {
            base: MediaResult {
                id: detail.id.to_string(),
                url: self.drama_url(detail.id),
                title: detail.title,
                image: detail.thumbnail,
                media_type: detail.kind,
                episodes: Some(total),
                year: detail
                    .release_date
                    .as_deref()
                    .and_then(|d| d.get(..4))
                    .map(str::to_string),
                ..MediaResult::default()
            },
            description: detail.description.unwrap_or_default(),
            status: detail
                .status
                .as_deref()
                .map(MediaStatus::from_label)
                .unwrap_or_default(),
            has_sub: episodes.iter().any(|ep| ep.is_subbed),
            total_episodes: Some(total),
            episodes,
            ..MediaInfo::default()
        }
    }

    /// Video url and subtitle tracks for one numeric episode id.
    pub async fn fetch_episode_sources(&self, episode_id: &str) -> Result<Source> {
        let id = parse_id(episode_id, "Episode id")?;
        self.toolkit
            .guard("episode sources", async {
                let video_url = format!(
                    "/api/DramaList/Episode/{}.png?err=false&ts=null&time=null&kkey={}",
                    id,
                    self.video_key(id)
                );
                let video: EpisodeVideo = self
                    .toolkit
                    .client()
                    .get_json(&video_url, Some(self.headers.clone()))
                    .await?;

                let sub_url = format!("/api/Sub/{}?kkey={}", id, self.subtitle_key(id));
                let tracks: Vec<SubtitleTrack> = self
                    .toolkit
                    .client()
                    .get_json(&sub_url, Some(self.headers.clone()))
                    .await?;
                debug!(provider = KISSKH_NAME, episode = id, tracks = tracks.len(), "resolved episode");

                let mut source = Source {
                    sources: video
                        .video
                        .iter()
                        .filter(|v| !v.is_empty())
                        .map(|v| Video::from_file(v))
                        .collect(),
                    embed_url: video.third_party.filter(|t| !t.is_empty()),
                    subtitles: tracks
                        .into_iter()
                        .map(|track| Subtitle {
                            id: track.land,
                            kind: Some("captions".to_string()),
                            lang: track.label.unwrap_or_default(),
                            url: track.src,
                        })
                        .collect(),
                    ..Source::default()
                };
                source
                    .headers
                    .insert("Referer".to_string(), format!("{}/", self.base()));
                Ok(source)
            })
            .await
    }
}

fn parse_id(id: &str, what: &str) -> Result<i64> {
    parse_u64(id)
        .ok()
        .and_then(|n| i64::try_from(n).ok())
        .ok_or_else(|| AniResolveError::validation(format!("{} must be numeric: `{}`", what, id)))
}

#[async_trait]
impl Provider for KissKh {
    fn name(&self) -> &str {
        KISSKH_NAME
    }

    fn base_url(&self) -> &str {
        self.base()
    }

    fn stats(&self) -> ProviderStats {
        self.toolkit.stats(CLASS_PATH, &["en"], Some(LOGO))
    }

    async fn search(&self, query: &str, _page: u32) -> Result<SearchPage<MediaResult>> {
        KissKh::search(self, query).await
    }

    async fn fetch_info(&self, id: &str) -> Result<MediaInfo> {
        self.fetch_drama_info(id).await
    }

    async fn fetch_streams(
        &self,
        episode_id: &str,
        _server: StreamingServer,
        _sub_or_dub: SubOrDub,
    ) -> Result<Source> {
        self.fetch_episode_sources(episode_id).await
    }

    fn set_proxy(&self, config: ProxyConfig) -> Result<()> {
        self.toolkit.set_proxy(config)
    }
}
