use async_trait::async_trait;
use lazy_static::lazy_static;
use scraper::{Html, Selector};
use tracing::debug;

use crate::{
    dom::Node,
    env::ResolverConfig,
    error::{AniResolveError, Result},
    http::{HttpClient, HttpClientOptions},
    model::{Episode, MediaInfo, MediaResult, ProviderStats, SearchPage, Source, Video},
    provider::{Provider, Toolkit},
    proxy::ProxyConfig,
    schema::{Field, Pick, Rule, Schema},
    servers::{StreamingServer, SubOrDub},
    utils::parse_int_safe,
};

pub const ANIMEON_NAME: &str = "AnimeOn";
const CLASS_PATH: &str = "ANIME.AnimeOn";
const AGENT: &str = "aniresolver/0.1";

lazy_static! {
    static ref SEARCH_CARD: Selector = Selector::parse(".search-card").unwrap();
    static ref SEARCH_TITLE: Selector = Selector::parse(".search-title").unwrap();
    static ref LINK: Selector = Selector::parse("a").unwrap();
    static ref IMG: Selector = Selector::parse("img").unwrap();

    static ref DETAIL_TITLE: Selector = Selector::parse("h1.anime-title").unwrap();
    static ref DETAIL_DESC: Selector = Selector::parse(".anime-description").unwrap();
    static ref DETAIL_POSTER: Selector = Selector::parse(".anime-poster img").unwrap();
    static ref EPISODE_ITEM: Selector = Selector::parse(".episode-item").unwrap();
    static ref EPISODE_NUMBER: Selector = Selector::parse(".episode-number").unwrap();
    static ref EPISODE_TITLE: Selector = Selector::parse(".episode-title").unwrap();
    static ref PLAYER_SOURCE: Selector = Selector::parse(".video-player source").unwrap();

    static ref SEARCH_SCHEMA: Schema = Schema::new(vec![
        Field::new("href", vec![Rule::at(&LINK, Pick::Attr("href"))]),
        Field::new("title", vec![Rule::at(&SEARCH_TITLE, Pick::Text)]),
        Field::new("image", vec![Rule::at(&IMG, Pick::Attr("src"))]),
    ]);

    static ref DETAIL_SCHEMA: Schema = Schema::new(vec![
        Field::new("title", vec![Rule::at(&DETAIL_TITLE, Pick::Text)]),
        Field::new("description", vec![Rule::at(&DETAIL_DESC, Pick::Text)]),
        Field::new("image", vec![Rule::at(&DETAIL_POSTER, Pick::Attr("src"))]),
    ]);

    static ref EPISODE_SCHEMA: Schema = Schema::new(vec![
        Field::new("href", vec![Rule::at(&LINK, Pick::Attr("href"))]),
        Field::new("number", vec![Rule::at(&EPISODE_NUMBER, Pick::Text)]),
        Field::new("title", vec![Rule::at(&EPISODE_TITLE, Pick::Text)]),
    ]);
}

/// Ukrainian anime catalog scraped from plain html pages.
///
/// Ids are site paths such as `/anime/frieren`; absolute urls on the same site are accepted too.
#[derive(Debug, Clone)]
pub struct AnimeOn {
    toolkit: Toolkit,
}

impl AnimeOn {
    pub fn new(client: HttpClient) -> Self {
        AnimeOn {
            toolkit: Toolkit::new(ANIMEON_NAME, client),
        }
    }

    pub fn from_config(config: &ResolverConfig) -> Result<Self> {
        let client = HttpClient::new(
            HttpClientOptions::new(config.animeon_url.trim_end_matches('/'))
                .timeout(config.timeout)
                .header("User-Agent", AGENT),
        )?;
        Ok(AnimeOn::new(client))
    }

    fn base(&self) -> &str {
        self.toolkit.base_url().trim_end_matches('/')
    }

    /// Site path for `id`; urls pointing at another host are refused.
    fn page_path(&self, id: &str, what: &str) -> Result<String> {
        let id = id.trim();
        if id.is_empty() {
            return Err(AniResolveError::validation(format!("{} is empty", what)));
        }
        if id.starts_with("http://") || id.starts_with("https://") {
            return id
                .strip_prefix(self.base())
                .filter(|path| path.is_empty() || path.starts_with('/'))
                .map(|path| format!("/{}", path.trim_start_matches('/')))
                .ok_or_else(|| {
                    AniResolveError::validation(format!("{} is not on {}", what, self.base()))
                });
        }
        Ok(format!("/{}", id.trim_start_matches('/')))
    }

    pub async fn search(&self, query: &str) -> Result<SearchPage<MediaResult>> {
        if query.trim().is_empty() {
            return Err(AniResolveError::validation("Search query is empty"));
        }
        let url = format!("/search?q={}", urlencoding::encode(query.trim()));
        self.toolkit
            .guard("search", async {
                let html = self.toolkit.client().get_text(&url, None).await?;
                Ok(SearchPage::single(parse_search(&html, self.base())))
            })
            .await
    }

    pub async fn fetch_anime_info(&self, id: &str) -> Result<MediaInfo> {
        let path = self.page_path(id, "Anime id")?;
        self.toolkit
            .guard("anime info", async {
                let html = self.toolkit.client().get_text(&path, None).await?;
                let info = parse_info(&html, &path, self.base());
                debug!(provider = ANIMEON_NAME, id = %path, episodes = info.episodes.len(), "parsed anime info");
                Ok(info)
            })
            .await
    }

    /// Player sources of one episode page; a page without a player yields no sources.
    pub async fn fetch_episode_sources(&self, episode_id: &str) -> Result<Source> {
        let path = self.page_path(episode_id, "Episode id")?;
        self.toolkit
            .guard("episode sources", async {
                let html = self.toolkit.client().get_text(&path, None).await?;
                Ok(parse_player(&html))
            })
            .await
    }
}

fn site_path(href: &str, base: &str) -> String {
    let path = href.strip_prefix(base).unwrap_or(href);
    format!("/{}", path.trim_start_matches('/'))
}

pub fn parse_search(html: &str, base: &str) -> Vec<MediaResult> {
    let document = Html::parse_document(html);
    Node::document(&document)
        .select(&SEARCH_CARD)
        .into_iter()
        .filter_map(|card| {
            let record = SEARCH_SCHEMA.extract(card);
            let id = site_path(record.get("href")?, base);
            Some(MediaResult {
                url: format!("{}{}", base, id),
                id,
                title: record.string("title"),
                image: record.optional("image"),
                media_type: Some("ANIME".to_string()),
                ..MediaResult::default()
            })
        })
        .collect()
}

pub fn parse_info(html: &str, path: &str, base: &str) -> MediaInfo {
    let document = Html::parse_document(html);
    let root = Node::document(&document);
    let record = DETAIL_SCHEMA.extract(root);

    let episodes: Vec<Episode> = root
        .select(&EPISODE_ITEM)
        .into_iter()
        .filter_map(|item| {
            let record = EPISODE_SCHEMA.extract(item);
            let id = site_path(record.get("href")?, base);
            Some(Episode {
                url: format!("{}{}", base, id),
                id,
                number: parse_int_safe(record.get("number").unwrap_or_default()) as f64,
                title: record.optional("title"),
                is_subbed: false,
                is_dubbed: false,
                is_filler: None,
            })
        })
        .collect();
    let total = episodes.len() as u32;

    MediaInfo {
        base: MediaResult {
            id: path.to_string(),
            url: format!("{}{}", base, path),
            title: record.string("title"),
            image: record.optional("image"),
            media_type: Some("ANIME".to_string()),
            episodes: Some(total),
            ..MediaResult::default()
        },
        description: record.string("description"),
        total_episodes: Some(total),
        episodes,
        ..MediaInfo::default()
    }
}

pub fn parse_player(html: &str) -> Source {
    let document = Html::parse_document(html);
    let sources = Node::document(&document)
        .select(&PLAYER_SOURCE)
        .into_iter()
        .filter_map(|source| {
            let src = source.attr("src")?.trim();
            if src.is_empty() {
                return None;
            }
            Some(Video {
                quality: source.attr("data-quality").map(str::to_string),
                ..Video::from_file(src)
            })
        })
        .collect();

    Source {
        sources,
        ..Source::default()
    }
}

#[async_trait]
impl Provider for AnimeOn {
    fn name(&self) -> &str {
        ANIMEON_NAME
    }

    fn base_url(&self) -> &str {
        self.base()
    }

    fn stats(&self) -> ProviderStats {
        self.toolkit.stats(
            CLASS_PATH,
            &["uk"],
            Some("https://animeon.club/favicon.ico"),
        )
    }

    async fn search(&self, query: &str, _page: u32) -> Result<SearchPage<MediaResult>> {
        AnimeOn::search(self, query).await
    }

    async fn fetch_info(&self, id: &str) -> Result<MediaInfo> {
        self.fetch_anime_info(id).await
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
