//! Thin providers over public video platform apis: no scraping, no tokens.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::{
    env::{ResolverConfig, TwitchCredentials},
    error::{AniResolveError, Result},
    http::{HttpClient, HttpClientOptions},
    model::{MediaInfo, MediaResult, ProviderStats, SearchPage, Source, Video},
    provider::{Provider, Toolkit},
    proxy::ProxyConfig,
    servers::{StreamingServer, SubOrDub},
    utils::clamp_page,
};

pub const INVIDIOUS_NAME: &str = "Invidious";
pub const DAILYMOTION_NAME: &str = "Dailymotion";
pub const TWITCH_NAME: &str = "Twitch";
pub const TWITCH_HELIX_URL: &str = "https://api.twitch.tv/helix";

const PLATFORM_AGENT: &str = "aniresolver/0.1";

fn non_empty<'a>(value: &'a str, what: &str) -> Result<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AniResolveError::validation(format!("{} is empty", what)));
    }
    Ok(value)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvidiousVideo {
    video_id: String,
    title: String,
    #[serde(default)]
    description: Option<String>,
}

/// YouTube through an Invidious instance.
#[derive(Debug, Clone)]
pub struct Invidious {
    toolkit: Toolkit,
}

impl Invidious {
    pub fn new(client: HttpClient) -> Self {
        Invidious {
            toolkit: Toolkit::new(INVIDIOUS_NAME, client),
        }
    }

    pub fn from_config(config: &ResolverConfig) -> Result<Self> {
        let client = HttpClient::new(
            HttpClientOptions::new(config.invidious_url.trim_end_matches('/'))
                .timeout(config.timeout),
        )?;
        Ok(Invidious::new(client))
    }

    fn base(&self) -> &str {
        self.toolkit.base_url().trim_end_matches('/')
    }

    fn media(&self, video: InvidiousVideo, thumb: &str) -> MediaResult {
        MediaResult {
            image: Some(format!("{}/vi/{}/{}.jpg", self.base(), video.video_id, thumb)),
            url: format!("https://www.youtube.com/watch?v={}", video.video_id),
            id: video.video_id,
            title: video.title,
            media_type: Some("VIDEO".to_string()),
            ..MediaResult::default()
        }
    }

    pub fn manifest_url(&self, video_id: &str) -> String {
        format!("{}/api/manifest/dash/id/{}", self.base(), video_id)
    }
}

#[async_trait]
impl Provider for Invidious {
    fn name(&self) -> &str {
        INVIDIOUS_NAME
    }

    fn base_url(&self) -> &str {
        self.base()
    }

    fn stats(&self) -> ProviderStats {
        let logo = format!("{}/favicon.ico", self.base());
        self.toolkit.stats("OTHER.Invidious", &["en"], Some(&logo))
    }

    async fn search(&self, query: &str, page: u32) -> Result<SearchPage<MediaResult>> {
        let query = non_empty(query, "Search query")?;
        let page = clamp_page(page);
        let url = format!(
            "/api/v1/search?q={}&page={}&type=video&fields=videoId,title",
            urlencoding::encode(query),
            page
        );
        self.toolkit
            .guard("search", async {
                let videos: Vec<InvidiousVideo> = self.toolkit.client().get_json(&url, None).await?;
                let results: Vec<MediaResult> = videos
                    .into_iter()
                    .map(|video| self.media(video, "mqdefault"))
                    .collect();
                Ok(SearchPage {
                    current_page: Some(page),
                    has_next_page: Some(!results.is_empty()),
                    total_pages: None,
                    total_results: None,
                    results,
                })
            })
            .await
    }

    async fn fetch_info(&self, id: &str) -> Result<MediaInfo> {
        let id = non_empty(id, "Video id")?;
        let url = format!("/api/v1/videos/{}?fields=videoId,title,description", id);
        self.toolkit
            .guard("video details", async {
                let mut video: InvidiousVideo = self.toolkit.client().get_json(&url, None).await?;
                let description = video.description.take().unwrap_or_default();
                Ok(MediaInfo {
                    base: self.media(video, "hqdefault"),
                    description,
                    ..MediaInfo::default()
                })
            })
            .await
    }

    async fn fetch_streams(
        &self,
        episode_id: &str,
        _server: StreamingServer,
        _sub_or_dub: SubOrDub,
    ) -> Result<Source> {
        let id = non_empty(episode_id, "Video id")?;
        Ok(Source {
            sources: vec![Video {
                url: self.manifest_url(id),
                quality: Some("DASH".to_string()),
                is_m3u8: false,
                is_dash: true,
            }],
            ..Source::default()
        })
    }

    fn set_proxy(&self, config: ProxyConfig) -> Result<()> {
        self.toolkit.set_proxy(config)
    }
}

#[derive(Debug, Deserialize)]
struct DailymotionList {
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    total: Option<u32>,
    list: Vec<DailymotionVideo>,
}

#[derive(Debug, Deserialize)]
struct DailymotionVideo {
    id: String,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    thumbnail_360_url: Option<String>,
    #[serde(default)]
    thumbnail_720_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Dailymotion {
    toolkit: Toolkit,
}

impl Dailymotion {
    pub fn new(client: HttpClient) -> Self {
        Dailymotion {
            toolkit: Toolkit::new(DAILYMOTION_NAME, client),
        }
    }

    pub fn from_config(config: &ResolverConfig) -> Result<Self> {
        let client = HttpClient::new(
            HttpClientOptions::new(config.dailymotion_api_url.trim_end_matches('/'))
                .timeout(config.timeout)
                .header("User-Agent", PLATFORM_AGENT),
        )?;
        Ok(Dailymotion::new(client))
    }

    fn media(video: DailymotionVideo, image: Option<String>) -> MediaResult {
        MediaResult {
            url: format!("https://www.dailymotion.com/video/{}", video.id),
            id: video.id,
            title: video.title,
            image,
            media_type: Some("VIDEO".to_string()),
            ..MediaResult::default()
        }
    }
}

#[async_trait]
impl Provider for Dailymotion {
    fn name(&self) -> &str {
        DAILYMOTION_NAME
    }

    fn base_url(&self) -> &str {
        self.toolkit.base_url()
    }

    fn stats(&self) -> ProviderStats {
        self.toolkit.stats(
            "OTHER.Dailymotion",
            &["en"],
            Some("https://www.dailymotion.com/favicon.ico"),
        )
    }

    async fn search(&self, query: &str, page: u32) -> Result<SearchPage<MediaResult>> {
        let query = non_empty(query, "Search query")?;
        let page = clamp_page(page);
        let url = format!(
            "/videos?fields=id,title,thumbnail_360_url&limit=10&page={}&search={}",
            page,
            urlencoding::encode(query)
        );
        self.toolkit
            .guard("search", async {
                let listing: DailymotionList = self.toolkit.client().get_json(&url, None).await?;
                Ok(SearchPage {
                    current_page: Some(listing.page.unwrap_or(page)),
                    has_next_page: Some(listing.has_more),
                    total_pages: None,
                    total_results: listing.total,
                    results: listing
                        .list
                        .into_iter()
                        .map(|mut video| {
                            let thumb = video.thumbnail_360_url.take();
                            Dailymotion::media(video, thumb)
                        })
                        .collect(),
                })
            })
            .await
    }

    async fn fetch_info(&self, id: &str) -> Result<MediaInfo> {
        let id = non_empty(id, "Video id")?;
        let id = id.trim_start_matches("https://www.dailymotion.com/video/");
        let url = format!(
            "/video/{}?fields=id,title,description,thumbnail_720_url",
            id
        );
        self.toolkit
            .guard("video details", async {
                let mut video: DailymotionVideo = self.toolkit.client().get_json(&url, None).await?;
                let description = video.description.take().unwrap_or_default();
                let thumb = video.thumbnail_720_url.take();
                Ok(MediaInfo {
                    base: Dailymotion::media(video, thumb),
                    description,
                    ..MediaInfo::default()
                })
            })
            .await
    }

    /// Dailymotion only exposes its player; the stream is the embed url.
    async fn fetch_streams(
        &self,
        episode_id: &str,
        _server: StreamingServer,
        _sub_or_dub: SubOrDub,
    ) -> Result<Source> {
        let id = non_empty(episode_id, "Video id")?;
        Ok(Source {
            embed_url: Some(format!("https://www.dailymotion.com/embed/video/{}", id)),
            ..Source::default()
        })
    }

    fn set_proxy(&self, config: ProxyConfig) -> Result<()> {
        self.toolkit.set_proxy(config)
    }
}

#[derive(Debug, Deserialize)]
struct HelixData<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct TwitchChannel {
    broadcaster_login: String,
    display_name: String,
    #[serde(default)]
    thumbnail_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TwitchUser {
    login: String,
    display_name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    profile_image_url: Option<String>,
}

fn channel_url(login: &str) -> String {
    format!("https://www.twitch.tv/{}", login)
}

/// Live channels through the Helix api.
#[derive(Debug, Clone)]
pub struct Twitch {
    toolkit: Toolkit,
}

impl Twitch {
    /// Fails unless both the client id and the OAuth token are set.
    pub fn new(base_url: &str, credentials: &TwitchCredentials, config: &ResolverConfig) -> Result<Self> {
        let client_id = non_empty(&credentials.client_id, "Twitch client id")?;
        let token = non_empty(&credentials.oauth_token, "Twitch OAuth token")?.to_string();

        let client = HttpClient::new(
            HttpClientOptions::new(base_url.trim_end_matches('/'))
                .timeout(config.timeout)
                .header("Client-ID", client_id)
                .token_provider(Arc::new(move || Some(token.clone()))),
        )?;
        Ok(Twitch {
            toolkit: Toolkit::new(TWITCH_NAME, client),
        })
    }

    /// `None` when no Twitch credentials are configured.
    pub fn from_config(config: &ResolverConfig) -> Result<Option<Self>> {
        config
            .twitch
            .as_ref()
            .map(|credentials| Twitch::new(TWITCH_HELIX_URL, credentials, config))
            .transpose()
    }
}

#[async_trait]
impl Provider for Twitch {
    fn name(&self) -> &str {
        TWITCH_NAME
    }

    fn base_url(&self) -> &str {
        self.toolkit.base_url()
    }

    fn stats(&self) -> ProviderStats {
        self.toolkit.stats(
            "LIVE.Twitch",
            &["en"],
            Some("https://static.twitchcdn.net/assets/favicon-32-e29e246c157142c94346.png"),
        )
    }

    async fn search(&self, query: &str, _page: u32) -> Result<SearchPage<MediaResult>> {
        let query = non_empty(query, "Search query")?;
        let url = format!(
            "/search/channels?query={}&first=10&live_only=true",
            urlencoding::encode(query)
        );
        self.toolkit
            .guard("search", async {
                let channels: HelixData<TwitchChannel> =
                    self.toolkit.client().get_json(&url, None).await?;
                let results = channels
                    .data
                    .into_iter()
                    .map(|channel| MediaResult {
                        url: channel_url(&channel.broadcaster_login),
                        id: channel.broadcaster_login,
                        title: channel.display_name,
                        image: channel.thumbnail_url,
                        media_type: Some("LIVE".to_string()),
                        ..MediaResult::default()
                    })
                    .collect();
                Ok(SearchPage::single(results))
            })
            .await
    }

    async fn fetch_info(&self, id: &str) -> Result<MediaInfo> {
        let login = non_empty(id, "Channel")?
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        let url = format!("/users?login={}", urlencoding::encode(&login));
        self.toolkit
            .guard("channel details", async {
                let users: HelixData<TwitchUser> =
                    self.toolkit.client().get_json(&url, None).await?;
                let user = users
                    .data
                    .into_iter()
                    .next()
                    .ok_or(AniResolveError::MissingNode("twitch user"))?;
                Ok(MediaInfo {
                    base: MediaResult {
                        url: channel_url(&user.login),
                        id: user.login,
                        title: user.display_name,
                        image: user.profile_image_url,
                        media_type: Some("LIVE".to_string()),
                        ..MediaResult::default()
                    },
                    description: user.description.unwrap_or_default(),
                    ..MediaInfo::default()
                })
            })
            .await
    }

    async fn fetch_streams(
        &self,
        episode_id: &str,
        _server: StreamingServer,
        _sub_or_dub: SubOrDub,
    ) -> Result<Source> {
        let login = non_empty(episode_id, "Channel")?;
        let url = if login.starts_with("http") {
            login.to_string()
        } else {
            channel_url(login)
        };
        Ok(Source {
            sources: vec![Video {
                url,
                quality: Some("auto".to_string()),
                ..Video::default()
            }],
            ..Source::default()
        })
    }

    fn set_proxy(&self, config: ProxyConfig) -> Result<()> {
        self.toolkit.set_proxy(config)
    }
}
