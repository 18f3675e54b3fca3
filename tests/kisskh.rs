mod common;

use aniresolver::{
    derive_key, KeyConstants, KissKh, Provider, ResolverConfig, ResourceType, StreamingServer,
    SubOrDub,
};
use common::{fixture, FixtureServer};
use serde_json::Value;

fn fixture_json(name: &str) -> Value {
    serde_json::from_str(&fixture(name)).unwrap()
}

fn kisskh(server: &FixtureServer) -> KissKh {
    KissKh::from_config(&ResolverConfig {
        kisskh_url: server.url(),
        ..ResolverConfig::default()
    })
    .unwrap()
}

#[tokio::test]
async fn search_is_a_single_page() {
    let server = FixtureServer::start().await;
    server.json("/api/DramaList/Search", fixture_json("kisskh/search.json"));

    let page = kisskh(&server).search("queen").await.unwrap();

    assert_eq!(page.results.len(), 2);
    assert_eq!(page.results[0].id, "9120");
    assert_eq!(page.results[0].episodes, Some(16));
    assert!(page.has_next_page.is_none());

    let hit = &server.hits_for("/api/DramaList/Search")[0];
    assert_eq!(hit.param("q").as_deref(), Some("queen"));
    assert_eq!(hit.param("type").as_deref(), Some("0"));
}

#[tokio::test]
async fn drama_info_marks_subbed_episodes() {
    let server = FixtureServer::start().await;
    server.json("/api/DramaList/Drama/9120", fixture_json("kisskh/drama.json"));

    let info = kisskh(&server).fetch_info("9120").await.unwrap();

    assert_eq!(info.base.title, "Queen of Tears");
    assert_eq!(info.total_episodes, Some(16));
    let flags: Vec<(f64, bool)> = info.episodes.iter().map(|e| (e.number, e.is_subbed)).collect();
    assert_eq!(flags, vec![(1.0, true), (2.0, true), (3.0, false)]);
    assert_eq!(
        server.hits_for("/api/DramaList/Drama/9120")[0].param("isq").as_deref(),
        Some("false")
    );
}

#[tokio::test]
async fn streams_carry_video_and_subtitle_kkeys() {
    let server = FixtureServer::start().await;
    server.json("/api/DramaList/Episode/180521.png", fixture_json("kisskh/episode.json"));
    server.json("/api/Sub/180521", fixture_json("kisskh/subtitles.json"));

    let source = kisskh(&server)
        .fetch_streams("180521", StreamingServer::default(), SubOrDub::Sub)
        .await
        .unwrap();

    assert!(source.sources[0].is_m3u8);
    assert_eq!(
        source.embed_url.as_deref(),
        Some("https://player.example/embed/180521")
    );
    assert_eq!(source.subtitles.len(), 2);
    assert_eq!(source.subtitles[1].lang, "Indonesia");
    assert_eq!(
        source.headers.get("Referer").map(String::as_str),
        Some(format!("{}/", server.url()).as_str())
    );

    let constants = KeyConstants::default();
    let video = &server.hits_for("/api/DramaList/Episode/180521.png")[0];
    assert_eq!(
        video.param("kkey"),
        Some(derive_key(180_521i64, ResourceType::Video, &constants))
    );
    assert_eq!(video.param("err").as_deref(), Some("false"));
    let subtitle = &server.hits_for("/api/Sub/180521")[0];
    assert_eq!(
        subtitle.param("kkey"),
        Some(derive_key(180_521i64, ResourceType::Subtitle, &constants))
    );
}

#[tokio::test]
async fn non_numeric_episode_is_rejected_offline() {
    let server = FixtureServer::start().await;
    let err = kisskh(&server)
        .fetch_streams("ep-one", StreamingServer::default(), SubOrDub::Sub)
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert_eq!(server.hit_count(), 0);
}
