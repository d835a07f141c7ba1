use formsync_client::RemoteBinaryFinder;
use formsync_core::{ArtifactLookup, ArtifactSet, ChangeSet};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn remote_finder_posts_version_and_sources() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/binfinder/find.do"))
        .and(body_json(json!({
            "version": "REL_11_0_0_BRANCH",
            "sources": ["src/a.js", "tools/b.sh"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "windowsBinaries": ["cv-ac-core.jar"],
            "unixBinaries": ["cv-ac-core.jar"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let finder = RemoteBinaryFinder::new(
        format!("{}/binfinder/find.do", server.uri()),
        "REL_11_0_0_BRANCH",
    )
    .expect("finder");
    let changes: ChangeSet = ["tools/b.sh", "src/a.js"].into_iter().collect();
    let found = finder.lookup(&changes).await.unwrap();
    assert_eq!(
        found,
        ArtifactSet::from_lists(["cv-ac-core.jar"], ["cv-ac-core.jar"])
    );
}

#[tokio::test]
async fn remote_finder_missing_families_are_empty() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let finder = RemoteBinaryFinder::new(server.uri(), "REL_11_0_0_BRANCH").expect("finder");
    let found = finder.lookup(&ChangeSet::new()).await.unwrap();
    assert!(found.is_empty());
}
