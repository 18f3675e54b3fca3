use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use futures::future::try_join_all;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, REFERER};
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::{
    dom::{from_end, text_of, Node},
    env::{ResolverConfig, TokenSourceKind},
    error::{AniResolveError, Result},
    http::{header_map, HttpClient, HttpClientOptions},
    kkey::KeyConstants,
    model::{
        Episode, EpisodeServer, MediaInfo, MediaResult, MediaStatus, ProviderStats,
        ScheduleEntry, SearchPage, Source, SpotlightEntry,
    },
    provider::{Provider, Toolkit},
    proxy::ProxyConfig,
    schema::{Field, Pick, Record, Rule, Schema},
    servers::{KkeyTokens, MegaUp, StreamingServer, SubOrDub, TokenSource, DESKTOP_AGENT},
    utils::{background_image, clamp_page, keyword_query, parse_int_safe},
};

pub const ANIKAI_NAME: &str = "AnimeKai";
const CLASS_PATH: &str = "ANIME.AnimeKai";
const LOGO: &str =
    "https://anikai.to//assets/uploads/37585a39fe8c8d8fafaa2c7bfbf5374ecac859ea6a0288a6da2c61f5.png";
const COOKIE: &str = "__p_mov=1; usertype=guest; session=vLrU4aKItp0QltI2asH83yugyWDsSSQtyl9sxWKO";
pub const DEFAULT_SCHEDULE_TIMEZONE: f64 = 5.5;

lazy_static! {
    static ref PAGINATION: Selector = Selector::parse("ul.pagination").unwrap();
    static ref ACTIVE_PAGE_LINK: Selector =
        Selector::parse(".page-item.active span.page-link").unwrap();
    static ref ACTIVE_PAGE_ITEM: Selector = Selector::parse(".page-item.active").unwrap();
    static ref PAGE_LINK: Selector = Selector::parse("a.page-link").unwrap();
    static ref LAST_PAGE_LINK: Selector =
        Selector::parse(".page-item:last-child a.page-link").unwrap();

    static ref CARD: Selector = Selector::parse(".aitem").unwrap();
    static ref INNER_WATCH_LINK: Selector =
        Selector::parse(r#"div.inner a[href^="/watch/"]"#).unwrap();
    static ref WATCH_LINK: Selector = Selector::parse(r#"a[href^="/watch/"]"#).unwrap();
    static ref A_TITLE: Selector = Selector::parse("a.title").unwrap();
    static ref TITLE: Selector = Selector::parse(".title").unwrap();
    static ref INFO: Selector = Selector::parse(".info").unwrap();
    static ref INFO_SUB: Selector = Selector::parse(".info span.sub").unwrap();
    static ref INFO_DUB: Selector = Selector::parse(".info span.dub").unwrap();
    static ref IMG: Selector = Selector::parse("img").unwrap();
    static ref POSTER_IMG: Selector = Selector::parse(".poster img").unwrap();

    static ref DETAIL_TITLE: Selector = Selector::parse(".entity-scroll > .title").unwrap();
    static ref DETAIL_TITLE_LOOSE: Selector = Selector::parse(".entity-scroll .title").unwrap();
    static ref DETAIL_POSTER: Selector = Selector::parse("div.poster > div > img").unwrap();
    static ref DETAIL_DESC: Selector = Selector::parse(".entity-scroll > .desc").unwrap();
    static ref DETAIL_INFO: Selector = Selector::parse(".entity-scroll > .info").unwrap();
    static ref DETAIL_SUB: Selector = Selector::parse(".entity-scroll > .info > span.sub").unwrap();
    static ref DETAIL_DUB: Selector = Selector::parse(".entity-scroll > .info > span.dub").unwrap();
    static ref DETAIL_LABELLED: Selector = Selector::parse(".entity-scroll > .detail div").unwrap();
    static ref ANI_ID: Selector = Selector::parse(".rate-box#anime-rating").unwrap();
    static ref RECOMMENDATION: Selector =
        Selector::parse("section.sidebar-section:not(#related-anime) .aitem-col .aitem").unwrap();
    static ref RELATION: Selector =
        Selector::parse("section#related-anime .tab-body .aitem-col").unwrap();
    static ref RELATION_LINK: Selector = Selector::parse("a.aitem").unwrap();
    static ref RELATION_TITLE: Selector = Selector::parse("a.aitem .title").unwrap();
    static ref SPAN: Selector = Selector::parse("span").unwrap();
    static ref SPAN_SUB: Selector = Selector::parse("span.sub").unwrap();
    static ref SPAN_DUB: Selector = Selector::parse("span.dub").unwrap();
    static ref LINK: Selector = Selector::parse("a").unwrap();

    static ref EPISODE_ITEM: Selector = Selector::parse("div.eplist > ul > li").unwrap();
    static ref EPISODE_LINK: Selector = Selector::parse("div.eplist > ul > li > a").unwrap();

    static ref SOFTSUB_SERVERS: Selector =
        Selector::parse(r#".server-items.lang-group[data-id="softsub"] .server"#).unwrap();
    static ref DUB_SERVERS: Selector =
        Selector::parse(r#".server-items.lang-group[data-id="dub"] .server"#).unwrap();

    static ref GENRE_MENU: Selector = Selector::parse("#menu").unwrap();
    static ref GENRE_LINKS: Selector = Selector::parse("ul.c4 li a").unwrap();

    static ref SUGGESTION: Selector = Selector::parse("a.aitem").unwrap();
    static ref SPOTLIGHT_SLIDE: Selector =
        Selector::parse("div.swiper-wrapper > div.swiper-slide").unwrap();
    static ref SPOTLIGHT_TITLE: Selector = Selector::parse("div.detail > p.title").unwrap();
    static ref SPOTLIGHT_BUTTON: Selector = Selector::parse("div.swiper-ctrl > a.btn").unwrap();
    static ref SPOTLIGHT_INFO: Selector = Selector::parse("div.detail > div.info").unwrap();
    static ref SPOTLIGHT_INFO_SUB: Selector =
        Selector::parse("div.detail > div.info span.sub").unwrap();
    static ref SPOTLIGHT_INFO_DUB: Selector =
        Selector::parse("div.detail > div.info span.dub").unwrap();
    static ref SPOTLIGHT_DESC: Selector = Selector::parse("div.detail > p.desc").unwrap();
    static ref SPOTLIGHT_MICS: Selector = Selector::parse("div.detail > div.mics > div").unwrap();

    static ref SCHEDULE_ITEM: Selector = Selector::parse("ul li").unwrap();
    static ref SCHEDULE_TITLE: Selector = Selector::parse("span.title").unwrap();
    static ref SCHEDULE_TIME: Selector = Selector::parse("span.time").unwrap();

    static ref DATE_FULL: Regex = Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap();
    static ref DATE_MONTH: Regex = Regex::new(r"^\d{4}-\d{2}$").unwrap();

    /// Listing card (`.aitem` on browse pages).
    static ref CARD_SCHEMA: Schema = Schema::new(vec![
        Field::new("href", vec![
            Rule::at(&INNER_WATCH_LINK, Pick::Attr("href")),
            Rule::at(&WATCH_LINK, Pick::Attr("href")),
        ]),
        Field::new("title", vec![
            Rule::at(&A_TITLE, Pick::Text),
            Rule::at(&INNER_WATCH_LINK, Pick::Text),
            Rule::at(&WATCH_LINK, Pick::Text),
        ]),
        Field::new("japanese_title", vec![Rule::at(&A_TITLE, Pick::Attr("data-jp"))]),
        Field::new("image", vec![
            Rule::at(&IMG, Pick::Attr("data-src")),
            Rule::at(&IMG, Pick::Attr("src")),
        ]),
        Field::new("type", vec![Rule::at(&INFO, Pick::ChildFromEnd(1))]),
        Field::new("episodes", vec![
            Rule::at(&INFO, Pick::ChildFromEnd(2)),
            Rule::at(&INFO_SUB, Pick::Text),
        ]),
        Field::new("sub", vec![Rule::at(&INFO_SUB, Pick::Text)]),
        Field::new("dub", vec![Rule::at(&INFO_DUB, Pick::Text)]),
    ]);

    /// Sidebar recommendation; the card itself is the link.
    static ref RECOMMENDATION_SCHEMA: Schema = Schema::new(vec![
        Field::new("href", vec![Rule::own(Pick::Attr("href"))]),
        Field::new("style", vec![Rule::own(Pick::Attr("style"))]),
        Field::new("title", vec![Rule::at(&TITLE, Pick::Text)]),
        Field::new("japanese_title", vec![Rule::at(&TITLE, Pick::Attr("data-jp"))]),
        Field::new("type", vec![Rule::at(&INFO, Pick::ChildFromEnd(1))]),
        Field::new("episodes", vec![
            Rule::at(&INFO, Pick::ChildFromEnd(2)),
            Rule::at(&INFO_SUB, Pick::Text),
        ]),
        Field::new("sub", vec![Rule::at(&INFO_SUB, Pick::Text)]),
        Field::new("dub", vec![Rule::at(&INFO_DUB, Pick::Text)]),
    ]);

    static ref RELATION_SCHEMA: Schema = Schema::new(vec![
        Field::new("href", vec![Rule::at(&RELATION_LINK, Pick::Attr("href"))]),
        Field::new("style", vec![Rule::at(&RELATION_LINK, Pick::Attr("style"))]),
        Field::new("title", vec![Rule::at(&RELATION_TITLE, Pick::Text)]),
        Field::new("japanese_title", vec![Rule::at(&RELATION_TITLE, Pick::Attr("data-jp"))]),
        Field::new("relation_type", vec![Rule::at(&INFO, Pick::ChildFromEnd(1))]),
        Field::new("type", vec![Rule::at(&INFO, Pick::ChildFromEnd(2))]),
        Field::new("episodes", vec![
            Rule::at(&INFO, Pick::ChildFromEnd(3)),
            Rule::at(&INFO_SUB, Pick::Text),
        ]),
        Field::new("sub", vec![Rule::at(&INFO_SUB, Pick::Text)]),
        Field::new("dub", vec![Rule::at(&INFO_DUB, Pick::Text)]),
    ]);

    /// Autocomplete card from `/ajax/anime/search`.
    static ref SUGGESTION_SCHEMA: Schema = Schema::new(vec![
        Field::new("href", vec![Rule::own(Pick::Attr("href"))]),
        Field::new("image", vec![Rule::at(&POSTER_IMG, Pick::Attr("src"))]),
        Field::new("title", vec![Rule::at(&TITLE, Pick::Text)]),
        Field::new("japanese_title", vec![Rule::at(&TITLE, Pick::Attr("data-jp"))]),
        Field::new("year", vec![Rule::at(&INFO, Pick::ChildFromEnd(2))]),
        Field::new("type", vec![Rule::at(&INFO, Pick::ChildFromEnd(3))]),
        Field::new("episodes", vec![
            Rule::at(&INFO, Pick::ChildFromEnd(4)),
            Rule::at(&INFO_SUB, Pick::Text),
        ]),
        Field::new("sub", vec![Rule::at(&INFO_SUB, Pick::Text)]),
        Field::new("dub", vec![Rule::at(&INFO_DUB, Pick::Text)]),
    ]);

    /// Home page hero slide.
    static ref SPOTLIGHT_SCHEMA: Schema = Schema::new(vec![
        Field::new("style", vec![Rule::own(Pick::Attr("style"))]),
        Field::new("href", vec![Rule::at(&SPOTLIGHT_BUTTON, Pick::Attr("href"))]),
        Field::new("title", vec![Rule::at(&SPOTLIGHT_TITLE, Pick::Text)]),
        Field::new("japanese_title", vec![Rule::at(&SPOTLIGHT_TITLE, Pick::Attr("data-jp"))]),
        Field::new("description", vec![Rule::at(&SPOTLIGHT_DESC, Pick::Text)]),
        Field::new("genres", vec![Rule::at(&SPOTLIGHT_INFO, Pick::ChildFromEnd(1))]),
        Field::new("type", vec![Rule::at(&SPOTLIGHT_INFO, Pick::ChildFromEnd(2))]),
        Field::new("sub", vec![Rule::at(&SPOTLIGHT_INFO_SUB, Pick::Text)]),
        Field::new("dub", vec![Rule::at(&SPOTLIGHT_INFO_DUB, Pick::Text)]),
    ]);

    static ref SCHEDULE_SCHEMA: Schema = Schema::new(vec![
        Field::new("href", vec![Rule::at(&LINK, Pick::Attr("href"))]),
        Field::new("title", vec![Rule::at(&SCHEDULE_TITLE, Pick::Text)]),
        Field::new("japanese_title", vec![Rule::at(&SCHEDULE_TITLE, Pick::Attr("data-jp"))]),
        Field::new("airing_time", vec![Rule::at(&SCHEDULE_TIME, Pick::Text)]),
    ]);
}

/// Scraper for anikai.to: html listings and detail pages, tokenised ajax endpoints, and
/// MegaUp-hosted streams.
#[derive(Debug, Clone)]
pub struct AnimeKai {
    toolkit: Toolkit,
    tokens: Arc<dyn TokenSource>,
    megaup: MegaUp,
    headers: HeaderMap,
}

#[derive(Debug, Deserialize)]
struct AjaxHtml {
    result: String,
}

#[derive(Debug, Deserialize)]
struct AjaxFragment {
    html: String,
}

#[derive(Debug, Deserialize)]
struct AjaxEnvelope {
    result: AjaxFragment,
}

/// One entry of the link list, before its view endpoint is resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerEntry {
    pub name: String,
    pub link_id: String,
}

/// Detail page fields plus the inputs the episode step needs.
#[derive(Debug, Clone, Default)]
pub struct InfoPage {
    pub info: MediaInfo,
    pub ani_id: Option<String>,
    pub sub_count: u32,
    pub dub_count: u32,
}

impl AnimeKai {
    pub fn new(client: HttpClient, tokens: Arc<dyn TokenSource>, megaup: MegaUp) -> Result<Self> {
        let referer = format!("{}/", client.base_url().trim_end_matches('/'));
        let headers = header_map(&[
            ("Accept", "text/html, */*; q=0.01"),
            ("Accept-Language", "en-US,en;q=0.5"),
            ("Cache-Control", "no-cache"),
            ("Connection", "keep-alive"),
            ("Cookie", COOKIE),
            ("Pragma", "no-cache"),
            ("Priority", "u=0"),
            ("Referer", referer.as_str()),
            ("Sec-Fetch-Dest", "empty"),
            ("Sec-Fetch-Mode", "cors"),
            ("Sec-Fetch-Site", "same-origin"),
            ("Sec-GPC", "1"),
            ("User-Agent", DESKTOP_AGENT),
        ])?;

        Ok(AnimeKai {
            toolkit: Toolkit::new(ANIKAI_NAME, client),
            tokens,
            megaup,
            headers,
        })
    }

    pub fn from_config(config: &ResolverConfig) -> Result<Self> {
        let client = HttpClient::new(
            HttpClientOptions::new(config.anikai_url.trim_end_matches('/')).timeout(config.timeout),
        )?;
        let megaup = MegaUp::from_config(config)?;
        let tokens: Arc<dyn TokenSource> = match config.token_source {
            TokenSourceKind::Local => {
                Arc::new(KkeyTokens::new(config.kkey_cipher(), KeyConstants::default()))
            }
            TokenSourceKind::Remote => Arc::new(megaup.clone()),
        };
        AnimeKai::new(client, tokens, megaup)
    }

    pub fn client(&self) -> &HttpClient {
        self.toolkit.client()
    }

    fn base(&self) -> &str {
        self.toolkit.base_url().trim_end_matches('/')
    }

    fn listing_url(&self, path: &str, page: u32) -> String {
        format!("{}/{}?page={}", self.base(), path, clamp_page(page))
    }

    pub async fn search(&self, query: &str, page: u32) -> Result<SearchPage<MediaResult>> {
        if query.trim().is_empty() {
            return Err(AniResolveError::validation("Search query is empty"));
        }
        let url = format!(
            "{}/browser?keyword={}&page={}",
            self.base(),
            keyword_query(query),
            clamp_page(page)
        );
        self.scrape_card_page(&url).await
    }

    pub async fn fetch_latest_completed(&self, page: u32) -> Result<SearchPage<MediaResult>> {
        self.scrape_card_page(&self.listing_url("completed", page)).await
    }

    pub async fn fetch_recently_added(&self, page: u32) -> Result<SearchPage<MediaResult>> {
        self.scrape_card_page(&self.listing_url("recent", page)).await
    }

    pub async fn fetch_recently_updated(&self, page: u32) -> Result<SearchPage<MediaResult>> {
        self.scrape_card_page(&self.listing_url("updates", page)).await
    }

    pub async fn fetch_new_releases(&self, page: u32) -> Result<SearchPage<MediaResult>> {
        self.scrape_card_page(&self.listing_url("new-releases", page)).await
    }

    pub async fn fetch_movie(&self, page: u32) -> Result<SearchPage<MediaResult>> {
        self.scrape_card_page(&self.listing_url("movie", page)).await
    }

    pub async fn fetch_tv(&self, page: u32) -> Result<SearchPage<MediaResult>> {
        self.scrape_card_page(&self.listing_url("tv", page)).await
    }

    pub async fn fetch_ova(&self, page: u32) -> Result<SearchPage<MediaResult>> {
        self.scrape_card_page(&self.listing_url("ova", page)).await
    }

    pub async fn fetch_ona(&self, page: u32) -> Result<SearchPage<MediaResult>> {
        self.scrape_card_page(&self.listing_url("ona", page)).await
    }

    pub async fn fetch_special(&self, page: u32) -> Result<SearchPage<MediaResult>> {
        self.scrape_card_page(&self.listing_url("special", page)).await
    }

    pub async fn genre_search(&self, genre: &str, page: u32) -> Result<SearchPage<MediaResult>> {
        if genre.trim().is_empty() {
            return Err(AniResolveError::validation("Genre is empty"));
        }
        let path = format!("genres/{}", genre.trim());
        self.scrape_card_page(&self.listing_url(&path, page)).await
    }

    pub async fn fetch_genres(&self) -> Result<Vec<String>> {
        let url = format!("{}/home", self.base());
        self.toolkit
            .guard("genres", async {
                let html = self.client().get_text(&url, Some(self.headers.clone())).await?;
                Ok(parse_genres_menu(&html))
            })
            .await
    }

    /// Airing schedule for `date` (`YYYY-MM-DD`, `YYYY-MM` or RFC 3339; today when `None`).
    pub async fn fetch_schedule(
        &self,
        date: Option<&str>,
        timezone: f64,
    ) -> Result<SearchPage<ScheduleEntry>> {
        let target = parse_schedule_date(date)?;
        let url = format!(
            "{}/ajax/schedule/items?tz={}&time={}",
            self.base(),
            timezone,
            target.timestamp()
        );
        self.toolkit
            .guard("schedule", async {
                let body = self.client().get_text(&url, Some(self.headers.clone())).await?;
                Ok(SearchPage::single(parse_schedule(&schedule_html(&body))))
            })
            .await
    }

    pub async fn fetch_spotlight(&self) -> Result<SearchPage<SpotlightEntry>> {
        let url = format!("{}/home", self.base());
        self.toolkit
            .guard("spotlight", async {
                let html = self.client().get_text(&url, Some(self.headers.clone())).await?;
                Ok(SearchPage::single(parse_spotlight(&html, self.base())))
            })
            .await
    }

    pub async fn fetch_search_suggestions(&self, query: &str) -> Result<SearchPage<MediaResult>> {
        if query.trim().is_empty() {
            return Err(AniResolveError::validation("Search query is empty"));
        }
        let url = format!(
            "{}/ajax/anime/search?keyword={}",
            self.base(),
            keyword_query(query)
        );
        self.toolkit
            .guard("search suggestions", async {
                let res: AjaxEnvelope = self
                    .client()
                    .get_json(&url, Some(self.headers.clone()))
                    .await?;
                Ok(SearchPage::single(parse_suggestions(&res.result.html, self.base())))
            })
            .await
    }

    /// Detail page, then the episode list keyed by the page's `ani_id`.
    pub async fn fetch_anime_info(&self, id: &str) -> Result<MediaInfo> {
        if id.trim().is_empty() {
            return Err(AniResolveError::validation("Anime id is empty"));
        }
        self.toolkit
            .guard("anime info", async {
                let watch_url = format!("{}/watch/{}", self.base(), id);
                let html = self
                    .client()
                    .get_text(&watch_url, Some(self.headers.clone()))
                    .await?;
                let page = parse_info_page(&html, id, self.base());
                let ani_id = page.ani_id.ok_or(AniResolveError::MissingNode("ani_id"))?;

                let token = self.tokens.generate(&ani_id).await?;
                let referer = HeaderValue::from_str(&watch_url)
                    .map_err(|_| AniResolveError::validation("Anime id is not a valid path"))?;
                let mut headers = self.headers.clone();
                headers.insert(REFERER, referer);
                headers.insert("x-requested-with", HeaderValue::from_static("XMLHttpRequest"));

                let episodes_url = format!(
                    "{}/ajax/episodes/list?ani_id={}&_={}",
                    self.base(),
                    ani_id,
                    token
                );
                let ajax: AjaxHtml = self.client().get_json(&episodes_url, Some(headers)).await?;

                let mut info = page.info;
                info.episodes =
                    parse_episodes(&ajax.result, id, self.base(), page.sub_count, page.dub_count);
                let total = count_episode_items(&ajax.result);
                info.total_episodes = Some(total);
                info.base.episodes = Some(total);
                debug!(provider = ANIKAI_NAME, id, episodes = total, "parsed anime info");
                Ok(info)
            })
            .await
    }

    /// Servers for one episode, each resolved through its view endpoint.
    ///
    /// `episode_id` is either the composite `<id>$ep=<n>$token=<t>` or an already built link
    /// list url on this site.
    pub async fn fetch_episode_servers(
        &self,
        episode_id: &str,
        sub_or_dub: SubOrDub,
    ) -> Result<Vec<EpisodeServer>> {
        self.toolkit
            .guard("episode servers", self.load_episode_servers(episode_id, sub_or_dub))
            .await
    }

    /// Accepts an episode id (full pipeline) or a resolved server url (extraction only).
    pub async fn fetch_episode_sources(
        &self,
        episode_id: &str,
        server: StreamingServer,
        sub_or_dub: SubOrDub,
    ) -> Result<Source> {
        if episode_id.starts_with("http") && !self.is_link_list_url(episode_id) {
            return self
                .toolkit
                .guard("episode sources", self.extract_server(episode_id))
                .await;
        }

        self.toolkit
            .guard("episode sources", async {
                let servers = self.load_episode_servers(episode_id, sub_or_dub).await?;
                let selected = servers
                    .into_iter()
                    .find(|s| server.matches(&s.name))
                    .ok_or_else(|| AniResolveError::ServerNotFound(server.as_str().to_string()))?;

                let mut source = self.extract_server(&selected.url).await?;
                source.intro = selected.intro;
                source.outro = selected.outro;
                Ok(source)
            })
            .await
    }

    fn is_link_list_url(&self, episode_id: &str) -> bool {
        episode_id.starts_with(&format!("{}/ajax", self.base()))
    }

    async fn link_list_url(&self, episode_id: &str) -> Result<String> {
        if self.is_link_list_url(episode_id) {
            return Ok(episode_id.to_string());
        }
        let token = episode_id
            .split("$token=")
            .nth(1)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AniResolveError::validation("Episode id should have `$token`"))?;
        let key = self.tokens.generate(token).await?;
        Ok(format!(
            "{}/ajax/links/list?token={}&_={}",
            self.base(),
            token,
            key
        ))
    }

    async fn load_episode_servers(
        &self,
        episode_id: &str,
        sub_or_dub: SubOrDub,
    ) -> Result<Vec<EpisodeServer>> {
        let list_url = self.link_list_url(episode_id).await?;
        let list: AjaxHtml = self
            .client()
            .get_json(&list_url, Some(self.headers.clone()))
            .await?;
        let entries = parse_server_entries(&list.result, sub_or_dub)?;

        // Independent view calls; try_join_all keeps list order.
        try_join_all(entries.iter().map(|entry| self.resolve_server(entry))).await
    }

    async fn resolve_server(&self, entry: &ServerEntry) -> Result<EpisodeServer> {
        let key = self.tokens.generate(&entry.link_id).await?;
        let url = format!(
            "{}/ajax/links/view?id={}&_={}",
            self.base(),
            entry.link_id,
            key
        );
        let view: AjaxHtml = self.client().get_json(&url, Some(self.headers.clone())).await?;
        let iframe = self.megaup.decode_iframe_data(&view.result).await?;

        Ok(EpisodeServer {
            name: entry.name.clone(),
            intro: iframe.intro(),
            outro: iframe.outro(),
            url: iframe.url,
        })
    }

    async fn extract_server(&self, server_url: &str) -> Result<Source> {
        let server_url = Url::parse(server_url)?;
        let href = server_url.as_str();

        let mut source = self.megaup.extract(href).await?;
        source
            .headers
            .insert("Referer".to_string(), href.to_string());
        source.download = Some(href.replacen("/e/", "/download/", 1));
        Ok(source)
    }

    async fn scrape_card_page(&self, url: &str) -> Result<SearchPage<MediaResult>> {
        self.toolkit
            .guard("card page", async {
                let html = self.client().get_text(url, Some(self.headers.clone())).await?;
                Ok(parse_card_page(&html, self.base()))
            })
            .await
    }
}

#[async_trait]
impl Provider for AnimeKai {
    fn name(&self) -> &str {
        ANIKAI_NAME
    }

    fn base_url(&self) -> &str {
        self.base()
    }

    fn stats(&self) -> ProviderStats {
        self.toolkit.stats(CLASS_PATH, &["en"], Some(LOGO))
    }

    async fn search(&self, query: &str, page: u32) -> Result<SearchPage<MediaResult>> {
        AnimeKai::search(self, query, page).await
    }

    async fn fetch_info(&self, id: &str) -> Result<MediaInfo> {
        self.fetch_anime_info(id).await
    }

    async fn fetch_streams(
        &self,
        episode_id: &str,
        server: StreamingServer,
        sub_or_dub: SubOrDub,
    ) -> Result<Source> {
        self.fetch_episode_sources(episode_id, server, sub_or_dub)
            .await
    }

    fn set_proxy(&self, config: ProxyConfig) -> Result<()> {
        self.toolkit.set_proxy(config)
    }
}

fn page_param(href: &str) -> Option<&str> {
    href.split("page=").nth(1).filter(|p| !p.is_empty())
}

/// `(currentPage, hasNextPage, totalPages)` from the pagination markup; zeros without one.
pub fn parse_pagination(root: Node<'_>) -> (u32, bool, u32) {
    let Some(pagination) = root.first(&PAGINATION) else {
        return (0, false, 0);
    };

    let current_page = parse_int_safe(&text_of(pagination.first(&ACTIVE_PAGE_LINK)));

    let has_next_page = pagination
        .first(&ACTIVE_PAGE_ITEM)
        .and_then(|active| active.next_element_sibling())
        .and_then(|next| next.first(&PAGE_LINK))
        .and_then(|link| link.attr("href"))
        .and_then(page_param)
        .is_some();

    let total_pages = pagination
        .first(&LAST_PAGE_LINK)
        .and_then(|link| link.attr("href"))
        .and_then(page_param)
        .map(parse_int_safe)
        .unwrap_or(current_page);

    (current_page, has_next_page, total_pages)
}

/// Listing page: pagination, then cards; a page without cards reports `{0, false, 0}`.
pub fn parse_card_page(html: &str, base: &str) -> SearchPage<MediaResult> {
    let document = Html::parse_document(html);
    let root = Node::document(&document);

    let (current_page, has_next_page, total_pages) = parse_pagination(root);
    let results: Vec<MediaResult> = root
        .select(&CARD)
        .into_iter()
        .filter_map(|card| parse_card(card, base))
        .collect();

    let (current_page, has_next_page, total_pages) = if results.is_empty() {
        (0, false, 0)
    } else {
        (current_page, has_next_page, total_pages)
    };

    SearchPage {
        results,
        current_page: Some(current_page),
        has_next_page: Some(has_next_page),
        total_pages: Some(total_pages),
        total_results: None,
    }
}

fn watch_id(href: &str) -> String {
    href.replacen("/watch/", "", 1)
}

fn counted(record: &Record, name: &str) -> Option<u32> {
    Some(record.int(name))
}

/// A card without a `/watch/` link is skipped.
pub fn parse_card(card: Node<'_>, base: &str) -> Option<MediaResult> {
    let record = CARD_SCHEMA.extract(card);
    let href = record.get("href")?;

    Some(MediaResult {
        id: watch_id(href),
        title: record.string("title"),
        japanese_title: record.optional("japanese_title"),
        image: record.optional("image"),
        media_type: record.optional("type"),
        sub: counted(&record, "sub"),
        dub: counted(&record, "dub"),
        episodes: counted(&record, "episodes"),
        url: format!("{}{}", base, href),
        ..MediaResult::default()
    })
}

fn parse_recommendation(node: Node<'_>, base: &str) -> MediaResult {
    let record = RECOMMENDATION_SCHEMA.extract(node);
    let href = record.string("href");
    MediaResult {
        id: watch_id(&href),
        title: record.string("title"),
        japanese_title: record.optional("japanese_title"),
        image: record.get("style").and_then(background_image),
        media_type: record.optional("type"),
        sub: counted(&record, "sub"),
        dub: counted(&record, "dub"),
        episodes: counted(&record, "episodes"),
        url: format!("{}{}", base, href),
        ..MediaResult::default()
    }
}

fn parse_relation(node: Node<'_>, base: &str) -> MediaResult {
    let record = RELATION_SCHEMA.extract(node);
    let href = record.string("href");
    MediaResult {
        id: watch_id(&href),
        title: record.string("title"),
        japanese_title: record.optional("japanese_title"),
        image: record.get("style").and_then(background_image),
        media_type: record.optional("type"),
        relation_type: Some(record.string("relation_type")),
        sub: counted(&record, "sub"),
        dub: counted(&record, "dub"),
        episodes: counted(&record, "episodes"),
        url: format!("{}{}", base, href),
        ..MediaResult::default()
    }
}

/// First `.detail` div whose text starts with `label`.
fn labelled<'a>(root: Node<'a>, divs: &Selector, label: &str) -> Option<Node<'a>> {
    root.select(divs)
        .into_iter()
        .find(|div| div.text().starts_with(label))
}

fn labelled_value(root: Node<'_>, divs: &Selector, label: &str) -> String {
    text_of(labelled(root, divs, label).and_then(|div| div.first(&SPAN)))
}

fn parse_detail_genres(root: Node<'_>) -> Vec<String> {
    let Some(div) = labelled(root, &DETAIL_LABELLED, "Genres") else {
        return Vec::new();
    };

    let linked: Vec<String> = div
        .select(&LINK)
        .into_iter()
        .map(|a| a.text())
        .filter(|g| !g.is_empty())
        .collect();
    if !linked.is_empty() {
        return linked;
    }

    let text = div.text();
    text.split_once(':')
        .map(|(_, list)| list)
        .unwrap_or(text.as_str())
        .split(',')
        .map(|g| g.trim().to_string())
        .filter(|g| !g.is_empty())
        .collect()
}

/// Everything the watch page offers; episodes come from a separate ajax call.
pub fn parse_info_page(html: &str, id: &str, base: &str) -> InfoPage {
    let document = Html::parse_document(html);
    let root = Node::document(&document);

    let title_node = root
        .first(&DETAIL_TITLE)
        .or_else(|| root.first(&DETAIL_TITLE_LOOSE));
    let info_node = root.first(&DETAIL_INFO);

    let media_type = info_node
        .and_then(|info| from_end(&info.element_children(), 1))
        .map(|last| last.text().to_uppercase());

    let sub_count = parse_int_safe(&text_of(root.first(&DETAIL_SUB)));
    let dub_count = parse_int_safe(&text_of(root.first(&DETAIL_DUB)));

    let season = labelled_value(root, &DETAIL_LABELLED, "Premiered");

    let info = MediaInfo {
        base: MediaResult {
            id: id.to_string(),
            title: text_of(title_node),
            japanese_title: title_node
                .and_then(|t| t.attr("data-jp"))
                .map(|jp| jp.trim().to_string()),
            image: root
                .first(&DETAIL_POSTER)
                .and_then(|img| img.attr("src"))
                .map(str::to_string),
            media_type,
            sub: Some(sub_count),
            dub: Some(dub_count),
            url: format!("{}/watch/{}", base, id),
            ..MediaResult::default()
        },
        description: text_of(root.first(&DETAIL_DESC)),
        genres: parse_detail_genres(root),
        status: MediaStatus::from_label(&labelled_value(root, &DETAIL_LABELLED, "Status")),
        season: Some(season).filter(|s| !s.is_empty()),
        has_sub: info_node.and_then(|info| info.first(&SPAN_SUB)).is_some(),
        has_dub: info_node.and_then(|info| info.first(&SPAN_DUB)).is_some(),
        recommendations: root
            .select(&RECOMMENDATION)
            .into_iter()
            .map(|node| parse_recommendation(node, base))
            .collect(),
        relations: root
            .select(&RELATION)
            .into_iter()
            .map(|node| parse_relation(node, base))
            .collect(),
        ..MediaInfo::default()
    };

    InfoPage {
        info,
        ani_id: root
            .first(&ANI_ID)
            .and_then(|node| node.attr("data-id"))
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string),
        sub_count,
        dub_count,
    }
}

fn count_episode_items(html: &str) -> u32 {
    let document = Html::parse_fragment(html);
    Node::document(&document).select(&EPISODE_ITEM).len() as u32
}

/// Episode list fragment; sub/dub availability is a threshold on the episode number.
pub fn parse_episodes(
    html: &str,
    id: &str,
    base: &str,
    sub_count: u32,
    dub_count: u32,
) -> Vec<Episode> {
    let document = Html::parse_fragment(html);
    let root = Node::document(&document);

    root.select(&EPISODE_LINK)
        .into_iter()
        .map(|link| {
            let num = link.attr("num").unwrap_or_default();
            let number = parse_int_safe(num) as f64;
            let token = link.attr("token").unwrap_or_default();
            let href = link.attr("href").unwrap_or_default();
            let title = text_of(link.first(&SPAN));

            Episode {
                id: format!("{}$ep={}$token={}", id, num, token),
                number,
                title: Some(title).filter(|t| !t.is_empty()),
                url: format!("{}/watch/{}{}ep={}", base, id, href, num),
                is_subbed: number <= sub_count as f64,
                is_dubbed: number <= dub_count as f64,
                is_filler: Some(link.has_class("filler")),
            }
        })
        .collect()
}

/// Server entries of the requested language group; an entry without `data-lid` is an error.
pub fn parse_server_entries(html: &str, sub_or_dub: SubOrDub) -> Result<Vec<ServerEntry>> {
    let document = Html::parse_fragment(html);
    let root = Node::document(&document);
    let selector: &Selector = match sub_or_dub {
        SubOrDub::Sub => &SOFTSUB_SERVERS,
        SubOrDub::Dub => &DUB_SERVERS,
    };

    root.select(selector)
        .into_iter()
        .map(|server| {
            let link_id = server
                .attr("data-lid")
                .filter(|lid| !lid.is_empty())
                .ok_or(AniResolveError::MissingNode("data-lid"))?;
            Ok(ServerEntry {
                name: format!("MegaUp {}", server.text()).to_lowercase(),
                link_id: link_id.to_string(),
            })
        })
        .collect()
}

pub fn parse_genres_menu(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let Some(menu) = Node::document(&document).first(&GENRE_MENU) else {
        return Vec::new();
    };
    menu.select(&GENRE_LINKS)
        .into_iter()
        .map(|a| a.text().to_lowercase())
        .filter(|g| !g.is_empty())
        .collect()
}

pub fn parse_suggestions(html: &str, base: &str) -> Vec<MediaResult> {
    let document = Html::parse_fragment(html);
    Node::document(&document)
        .select(&SUGGESTION)
        .into_iter()
        .map(|card| {
            let record = SUGGESTION_SCHEMA.extract(card);
            let id = record
                .get("href")
                .and_then(|href| href.split('/').nth(2))
                .unwrap_or_default()
                .to_string();
            MediaResult {
                url: format!("{}/watch/{}", base, id),
                id,
                title: record.string("title"),
                japanese_title: record.optional("japanese_title"),
                image: record.optional("image"),
                media_type: record.optional("type"),
                year: record.optional("year"),
                sub: counted(&record, "sub"),
                dub: counted(&record, "dub"),
                episodes: counted(&record, "episodes"),
                ..MediaResult::default()
            }
        })
        .collect()
}

pub fn parse_spotlight(html: &str, base: &str) -> Vec<SpotlightEntry> {
    let document = Html::parse_document(html);
    Node::document(&document)
        .select(&SPOTLIGHT_SLIDE)
        .into_iter()
        .map(|slide| {
            let record = SPOTLIGHT_SCHEMA.extract(slide);
            let id = watch_id(&record.string("href"));
            SpotlightEntry {
                base: MediaResult {
                    url: format!("{}/watch/{}", base, id),
                    id,
                    title: record.string("title"),
                    japanese_title: record.optional("japanese_title"),
                    media_type: record.optional("type"),
                    sub: counted(&record, "sub"),
                    dub: counted(&record, "dub"),
                    ..MediaResult::default()
                },
                banner: record.get("style").and_then(background_image),
                description: record.string("description"),
                genres: record
                    .get("genres")
                    .map(|g| {
                        g.split(',')
                            .map(str::trim)
                            .filter(|s| !s.is_empty())
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
                quality: labelled_value(slide, &SPOTLIGHT_MICS, "Quality"),
                release_date: labelled_value(slide, &SPOTLIGHT_MICS, "Release"),
            }
        })
        .collect()
}

/// The schedule endpoint answers with `{result:{html}}`, `{result: html}` or bare html.
pub fn schedule_html(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.to_string();
    };
    let result = value.get("result").unwrap_or(&value);
    if let Some(html) = result.get("html").and_then(Value::as_str) {
        return html.to_string();
    }
    match result.as_str() {
        Some(html) => html.to_string(),
        None => body.to_string(),
    }
}

pub fn parse_schedule(html: &str) -> Vec<ScheduleEntry> {
    let document = Html::parse_fragment(html);
    Node::document(&document)
        .select(&SCHEDULE_ITEM)
        .into_iter()
        .map(|item| {
            let record = SCHEDULE_SCHEMA.extract(item);
            let episode = text_of(from_end(&item.select(&SPAN), 1));
            ScheduleEntry {
                id: record
                    .get("href")
                    .and_then(|href| href.split('/').nth(2))
                    .unwrap_or_default()
                    .to_string(),
                title: record.string("title"),
                japanese_title: record.optional("japanese_title"),
                airing_time: record.string("airing_time"),
                airing_episode: episode.replacen("EP ", "", 1),
            }
        })
        .collect()
}

pub fn parse_schedule_date(date: Option<&str>) -> Result<DateTime<Utc>> {
    let Some(date) = date.map(str::trim).filter(|d| !d.is_empty()) else {
        return Ok(Utc::now());
    };

    let day = if DATE_FULL.is_match(date) {
        NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
    } else if DATE_MONTH.is_match(date) {
        NaiveDate::parse_from_str(&format!("{}-01", date), "%Y-%m-%d").ok()
    } else {
        return DateTime::parse_from_rfc3339(date)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|_| invalid_date(date));
    };

    day.and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
        .ok_or_else(|| invalid_date(date))
}

fn invalid_date(date: &str) -> AniResolveError {
    AniResolveError::validation(format!(
        "Invalid date format: {}. Use YYYY-MM-DD or YYYY-MM",
        date
    ))
}
