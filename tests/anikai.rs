mod common;

use std::sync::Arc;
use std::time::Duration;

use aniresolver::{
    anikai::AnimeKai,
    env::TokenSourceKind,
    servers::{KkeyTokens, TokenSource},
    with_cancellation, AniResolveError, HttpClient, MegaUp, ResolverConfig, StreamingServer,
    SubOrDub,
};
use common::{fixture, FixtureServer};
use serde_json::json;
use tokio_util::sync::CancellationToken;

const FRIEREN: &str = "frieren-c4s8";

fn config(server: &FixtureServer, token_source: TokenSourceKind) -> ResolverConfig {
    ResolverConfig {
        anikai_url: server.url(),
        enc_dec_url: format!("{}/api", server.url()),
        token_source,
        ..ResolverConfig::default()
    }
}

fn anikai(server: &FixtureServer) -> AnimeKai {
    AnimeKai::from_config(&config(server, TokenSourceKind::Local)).unwrap()
}

fn listing(cards: usize, active: u32, last: u32) -> String {
    let items: String = (1..=cards)
        .map(|n| {
            format!(
                r#"<div class="aitem"><div class="inner">
                    <a href="/watch/demo-{n}" class="poster"><img data-src="https://static.anikai.to/{n}.jpg"></a>
                    <a class="title" href="/watch/demo-{n}" data-jp="Demo {n} JP">Demo {n}</a>
                    <div class="info"><span class="sub">{n}</span><span><b>TV</b></span></div>
                </div></div>"#
            )
        })
        .collect();
    format!(
        r#"<html><body><div id="list-items">{items}</div>
        <ul class="pagination">
          <li class="page-item"><a class="page-link" href="/browser?keyword=demo&amp;page={prev}">{prev}</a></li>
          <li class="page-item active"><span class="page-link">{active}</span></li>
          <li class="page-item"><a class="page-link" href="/browser?keyword=demo&amp;page={next}">{next}</a></li>
          <li class="page-item"><a class="page-link" href="/browser?keyword=demo&amp;page={last}">&raquo;</a></li>
        </ul></body></html>"#,
        prev = active - 1,
        next = active + 1,
    )
}

/// Detail page, episode list, link list, two views and both MegaUp payloads.
fn serve_pipeline(server: &FixtureServer) {
    let base = server.url();
    server.html(&format!("/watch/{}", FRIEREN), fixture("anikai/watch.html"));
    server.json("/ajax/episodes/list", json!({ "result": fixture("anikai/episodes.html") }));
    server.json("/ajax/links/list", json!({ "result": fixture("anikai/links.html") }));

    server.json_when("/ajax/links/view", "id=LidSoft1", json!({ "result": "view-soft-1" }));
    server.json_when("/ajax/links/view", "id=LidSoft2", json!({ "result": "view-soft-2" }));
    server.json_when("/ajax/links/view", "id=LidDub1", json!({ "result": "view-dub-1" }));

    server.json_when(
        "/api/dec-kai",
        "view-soft-1",
        json!({ "status": 200, "result": {
            "url": format!("{}/e/soft1", base),
            "skip": { "intro": [0, 90], "outro": [1300, 1390] }
        }}),
    );
    server.json_when(
        "/api/dec-kai",
        "view-soft-2",
        json!({ "status": 200, "result": { "url": format!("{}/e/soft2", base), "skip": {} } }),
    );
    server.json_when(
        "/api/dec-kai",
        "view-dub-1",
        json!({ "status": 200, "result": { "url": format!("{}/e/dub1", base) } }),
    );

    server.json("/media/soft1", json!({ "status": 200, "result": "media-soft-1" }));
    server.json("/media/soft2", json!({ "status": 200, "result": "media-soft-2" }));
    server.json_when(
        "/api/dec-mega",
        "media-soft-1",
        json!({ "status": 200, "result": {
            "download": "",
            "sources": [
                { "file": "https://cdn.example/hls/soft1/list.m3u8" },
                { "file": "https://cdn.example/mp4/soft1.mp4" }
            ],
            "tracks": [
                { "kind": "captions", "file": "https://cdn.example/subs/en.vtt", "label": "English" },
                { "kind": "thumbnails", "file": "https://cdn.example/thumbs.vtt" }
            ]
        }}),
    );
    server.json_when(
        "/api/dec-mega",
        "media-soft-2",
        json!({ "status": 200, "result": {
            "sources": [{ "file": "https://cdn.example/hls/soft2/master.m3u8" }],
            "tracks": []
        }}),
    );
}

#[tokio::test]
async fn search_page_two_reports_next_page() {
    let server = FixtureServer::start().await;
    server.html("/browser", listing(20, 2, 9));

    let page = anikai(&server).search("demo", 2).await.unwrap();

    assert_eq!(page.results.len(), 20);
    assert_eq!(page.current_page, Some(2));
    assert_eq!(page.has_next_page, Some(true));
    assert_eq!(page.total_pages, Some(9));
    assert_eq!(page.results[19].id, "demo-20");

    let hit = &server.hits_for("/browser")[0];
    assert_eq!(hit.param("keyword").as_deref(), Some("demo"));
    assert_eq!(hit.param("page").as_deref(), Some("2"));
    assert!(hit.header("cookie").is_some_and(|c| c.contains("usertype=guest")));
    assert_eq!(hit.header("referer"), Some(format!("{}/", server.url()).as_str()));
}

#[tokio::test]
async fn empty_listing_ignores_raw_pagination() {
    let server = FixtureServer::start().await;
    server.html("/tv", fixture("anikai/browser_empty.html"));

    let page = anikai(&server).fetch_tv(4).await.unwrap();

    assert!(page.results.is_empty());
    assert_eq!(
        (page.current_page, page.has_next_page, page.total_pages),
        (Some(0), Some(false), Some(0))
    );
}

#[tokio::test]
async fn listing_pages_are_clamped_to_one() {
    let server = FixtureServer::start().await;
    server.html("/recent", listing(3, 1, 1));

    anikai(&server).fetch_recently_added(0).await.unwrap();

    assert_eq!(server.hits_for("/recent")[0].param("page").as_deref(), Some("1"));
}

#[tokio::test]
async fn episode_id_without_token_makes_no_request() {
    let server = FixtureServer::start().await;
    serve_pipeline(&server);

    let err = anikai(&server)
        .fetch_episode_servers(&format!("{}$ep=1", FRIEREN), SubOrDub::Sub)
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert_eq!(server.hit_count(), 0);
}

#[tokio::test]
async fn empty_genre_makes_no_request() {
    let server = FixtureServer::start().await;
    let err = anikai(&server).genre_search("  ", 1).await.unwrap_err();
    assert!(err.is_validation());
    assert_eq!(server.hit_count(), 0);
}

#[tokio::test]
async fn anime_info_threshold_law_and_episode_request() {
    let server = FixtureServer::start().await;
    serve_pipeline(&server);

    let info = anikai(&server).fetch_anime_info(FRIEREN).await.unwrap();

    assert_eq!(info.base.title, "Frieren: Beyond Journey's End");
    assert_eq!(info.total_episodes, Some(4));
    assert_eq!(info.episodes.len(), 4);
    for episode in &info.episodes {
        assert_eq!(episode.is_subbed, episode.number <= 3.0);
        assert_eq!(episode.is_dubbed, episode.number <= 1.0);
    }

    let hit = &server.hits_for("/ajax/episodes/list")[0];
    let expected = KkeyTokens::default().generate("c4S88Q").await.unwrap();
    assert_eq!(hit.param("ani_id").as_deref(), Some("c4S88Q"));
    assert_eq!(hit.param("_"), Some(expected));
    assert_eq!(hit.header("x-requested-with"), Some("XMLHttpRequest"));
    assert_eq!(
        hit.header("referer"),
        Some(format!("{}/watch/{}", server.url(), FRIEREN).as_str())
    );
}

#[tokio::test]
async fn servers_resolve_in_list_order() {
    let server = FixtureServer::start().await;
    serve_pipeline(&server);
    let anikai = anikai(&server);

    let info = anikai.fetch_anime_info(FRIEREN).await.unwrap();
    let servers = anikai
        .fetch_episode_servers(&info.episodes[0].id, SubOrDub::Sub)
        .await
        .unwrap();

    let names: Vec<&str> = servers.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["megaup server 1", "megaup server 2"]);
    assert_eq!(servers[0].url, format!("{}/e/soft1", server.url()));
    assert_eq!(servers[0].intro.map(|r| (r.start, r.end)), Some((0.0, 90.0)));
    assert!(servers[1].intro.is_none());

    let list = &server.hits_for("/ajax/links/list")[0];
    assert_eq!(list.param("token").as_deref(), Some("Ep1TokA"));
    assert_eq!(server.hits_for("/ajax/links/view").len(), 2);

    let dubbed = anikai
        .fetch_episode_servers(&info.episodes[0].id, SubOrDub::Dub)
        .await
        .unwrap();
    assert_eq!(dubbed.len(), 1);
    assert_eq!(dubbed[0].url, format!("{}/e/dub1", server.url()));
}

#[tokio::test]
async fn full_pipeline_selects_server_and_flags_hls() {
    let server = FixtureServer::start().await;
    serve_pipeline(&server);
    let anikai = anikai(&server);

    let info = anikai.fetch_anime_info(FRIEREN).await.unwrap();
    let source = anikai
        .fetch_episode_sources(&info.episodes[0].id, StreamingServer::MegaUp, SubOrDub::Sub)
        .await
        .unwrap();

    let soft1 = format!("{}/e/soft1", server.url());
    assert!(source.sources[0].is_m3u8);
    assert!(!source.sources[1].is_m3u8);
    assert_eq!(source.subtitles.len(), 2);
    assert_eq!(source.subtitles[0].lang, "English");
    assert_eq!(source.headers.get("Referer"), Some(&soft1));
    assert_eq!(
        source.download.as_deref(),
        Some(format!("{}/download/soft1", server.url()).as_str())
    );
    assert_eq!(source.intro.map(|r| r.end), Some(90.0));
    assert_eq!(source.outro.map(|r| r.start), Some(1300.0));

    let media = &server.hits_for("/media/soft1")[0];
    assert_eq!(media.header("connection"), Some("keep-alive"));
    let decode = &server.hits_for("/api/dec-mega")[0];
    assert!(decode.body.contains("\"agent\""));
}

#[tokio::test]
async fn named_server_is_matched_by_substring() {
    let server = FixtureServer::start().await;
    serve_pipeline(&server);
    let anikai = anikai(&server);
    let episode_id = format!("{}$ep=1$token=Ep1TokA", FRIEREN);

    let source = anikai
        .fetch_episode_sources(&episode_id, StreamingServer::from_str("Server 2"), SubOrDub::Sub)
        .await
        .unwrap();
    assert_eq!(source.sources[0].url, "https://cdn.example/hls/soft2/master.m3u8");

    let err = anikai
        .fetch_episode_sources(&episode_id, StreamingServer::from_str("vidstream"), SubOrDub::Sub)
        .await
        .unwrap_err();
    assert!(matches!(err, AniResolveError::Upstream));
}

#[tokio::test]
async fn resolved_server_url_skips_discovery() {
    let server = FixtureServer::start().await;
    serve_pipeline(&server);

    let source = anikai(&server)
        .fetch_episode_sources(
            &format!("{}/e/soft2", server.url()),
            StreamingServer::MegaUp,
            SubOrDub::Sub,
        )
        .await
        .unwrap();

    assert!(source.sources[0].is_m3u8);
    assert!(source.intro.is_none());
    assert!(server.hits_for("/ajax/links/list").is_empty());
    assert!(server.hits_for("/ajax/links/view").is_empty());
}

#[tokio::test]
async fn remote_token_source_uses_enc_kai() {
    let server = FixtureServer::start().await;
    serve_pipeline(&server);
    server.json("/api/enc-kai", json!({ "status": 200, "result": "REMOTE-TOKEN" }));

    let anikai = AnimeKai::from_config(&config(&server, TokenSourceKind::Remote)).unwrap();
    anikai.fetch_anime_info(FRIEREN).await.unwrap();

    let encode = &server.hits_for("/api/enc-kai")[0];
    assert_eq!(encode.param("text").as_deref(), Some("c4S88Q"));
    let episodes = &server.hits_for("/ajax/episodes/list")[0];
    assert_eq!(episodes.param("_").as_deref(), Some("REMOTE-TOKEN"));
}

#[tokio::test]
async fn injected_token_source_is_used() {
    #[derive(Debug)]
    struct Fixed;

    #[async_trait::async_trait]
    impl TokenSource for Fixed {
        async fn generate(&self, text: &str) -> aniresolver::Result<String> {
            Ok(format!("fixed-{}", text))
        }
    }

    let server = FixtureServer::start().await;
    serve_pipeline(&server);
    let client = HttpClient::with_base_url(server.url()).unwrap();
    let megaup = MegaUp::new(HttpClient::with_base_url(format!("{}/api", server.url())).unwrap());
    let anikai = AnimeKai::new(client, Arc::new(Fixed), megaup).unwrap();

    anikai
        .fetch_episode_servers(&format!("{}$ep=2$token=Ep2TokB", FRIEREN), SubOrDub::Sub)
        .await
        .unwrap();

    let list = &server.hits_for("/ajax/links/list")[0];
    assert_eq!(list.param("_").as_deref(), Some("fixed-Ep2TokB"));
    let mut views: Vec<String> = server
        .hits_for("/ajax/links/view")
        .iter()
        .filter_map(|hit| hit.param("_"))
        .collect();
    views.sort();
    assert_eq!(views, vec!["fixed-LidSoft1", "fixed-LidSoft2"]);
}

#[tokio::test]
async fn upstream_failures_collapse_to_generic_error() {
    let server = FixtureServer::start().await;
    server.status("/watch/broken", 500);
    server.html("/watch/no-id", "<html><body><h1 class=\"title\">x</h1></body></html>");
    let anikai = anikai(&server);

    let err = anikai.fetch_anime_info("broken").await.unwrap_err();
    assert!(matches!(err, AniResolveError::Upstream));
    assert_eq!(err.to_string(), "Something went wrong. Please try again later.");

    let err = anikai.fetch_anime_info("no-id").await.unwrap_err();
    assert!(matches!(err, AniResolveError::Upstream));
    assert!(server.hits_for("/ajax/episodes/list").is_empty());
}

#[tokio::test]
async fn cancellation_stops_the_chain() {
    let server = FixtureServer::start().await;
    serve_pipeline(&server);
    server.slow_html("/watch/slow", fixture("anikai/watch.html"), Duration::from_secs(5));
    let anikai = anikai(&server);

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = tokio::time::Instant::now();
    let err = with_cancellation(token, anikai.fetch_anime_info("slow"))
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(server.hits_for("/ajax/episodes/list").is_empty());
}

#[tokio::test]
async fn home_page_features() {
    let server = FixtureServer::start().await;
    server.html("/home", fixture("anikai/home.html"));
    server.json(
        "/ajax/anime/search",
        json!({ "status": "ok", "result": { "html": fixture("anikai/suggestions.html") } }),
    );
    server.json(
        "/ajax/schedule/items",
        json!({ "status": 200, "result": fixture("anikai/schedule.html") }),
    );
    let anikai = anikai(&server);

    assert_eq!(
        anikai.fetch_genres().await.unwrap(),
        vec!["action", "slice of life"]
    );

    let spotlight = anikai.fetch_spotlight().await.unwrap();
    assert_eq!(spotlight.results[0].base.id, "one-piece-abcd");

    let suggestions = anikai.fetch_search_suggestions("naruto").await.unwrap();
    assert_eq!(suggestions.results[0].id, "naruto-9r5k");
    assert_eq!(
        server.hits_for("/ajax/anime/search")[0].param("keyword").as_deref(),
        Some("naruto")
    );

    let schedule = anikai
        .fetch_schedule(Some("2025-02-14"), 5.5)
        .await
        .unwrap();
    assert_eq!(schedule.results.len(), 2);
    let hit = &server.hits_for("/ajax/schedule/items")[0];
    assert_eq!(hit.param("tz").as_deref(), Some("5.5"));
    assert_eq!(hit.param("time").as_deref(), Some("1739491200"));

    let err = anikai.fetch_schedule(Some("yesterday"), 5.5).await.unwrap_err();
    assert!(err.is_validation());
}
