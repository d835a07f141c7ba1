use std::time::Duration;

use formsync_client::{RetryPolicy, UpdateCenterClient, SOURCE_ARCHIVE};
use formsync_core::{ArtifactSet, LogicalChangeId, TrackingRecord, TrackingStore};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use wiremock::matchers::{header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn client(server: &MockServer) -> UpdateCenterClient {
    UpdateCenterClient::new(server.uri(), "uc-token")
        .expect("client")
        .with_credentials("svc", Some("pw".to_string()))
        .with_retry(RetryPolicy {
            attempts: 2,
            backoff: Duration::from_millis(1),
        })
}

fn draft() -> TrackingRecord {
    TrackingRecord::draft(
        "1100080",
        "dev",
        "Fix login",
        ["src/a.js"].into_iter().collect(),
        ArtifactSet::from_lists(["a.see"], ["a.tar"]),
        "42",
        "9",
    )
}

fn body(request: &Request) -> Value {
    serde_json::from_slice(&request.body).expect("json body")
}

// ---------------------------------------------------------------------------
// find
// ---------------------------------------------------------------------------

#[tokio::test]
async fn find_missing_form_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/updatecenterwebapi/api/gitlabform"))
        .and(query_param("GitMergeID", "42"))
        .and(query_param("GitProjectID", "9"))
        .and(header_exists("Authorization"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let found = client(&server)
        .find(&LogicalChangeId::new("9", "42"))
        .await
        .unwrap();
    assert!(found.is_none());
}

#[tokio::test]
async fn find_parses_form_and_keeps_unknown_fields() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/updatecenterwebapi/api/gitlabform"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "FormID": 5501,
            "BuildID": 1100080,
            "FormType": "GitLabForm",
            "Author": "dev",
            "Summary": "Fix login",
            "Status": "Created",
            "SourceInfo": { "WinFiles": ["src/a.js"], "UnixFiles": [] },
            "BinaryInfo": { "WinBinaries": ["a.see"], "UnixBinaries": [] },
            "GitLabFormProperties": {
                "GitMergeRequestID": "42",
                "GitProjectID": "9",
                "GitMiscInfo": "{\"oldMr\":\"40\",\"note\":\"keep\"}"
            }
        })))
        .mount(&server)
        .await;

    let record = client(&server)
        .find(&LogicalChangeId::new("9", "42"))
        .await
        .unwrap()
        .expect("form");
    assert_eq!(record.id(), "5501");
    assert_eq!(record.build_id, "1100080");
    assert_eq!(record.history().corrective_for(), Some("40"));
    assert_eq!(record.history().extra["note"], "keep");
    assert_eq!(record.extra["Status"], "Created");
}

#[tokio::test]
async fn find_server_error_is_external_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/updatecenterwebapi/api/gitlabform"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    assert!(client(&server)
        .find(&LogicalChangeId::new("9", "42"))
        .await
        .is_err());
}

// ---------------------------------------------------------------------------
// writes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_sends_token_and_returns_form_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/updatecenterwebapi/api/createform"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "FormID": 61597 })))
        .expect(1)
        .mount(&server)
        .await;

    let created = client(&server).create(&draft()).await.unwrap();
    assert_eq!(created.id(), "61597");

    let requests = server.received_requests().await.expect("recorded");
    let sent = body(&requests[0]);
    assert_eq!(sent["AccessToken"], "uc-token");
    assert_eq!(sent["BuildID"], "1100080");
    assert_eq!(sent["BinaryInfo"]["UnixBinaries"], json!(["a.tar"]));
    assert!(sent["GitLabFormProperties"]["GitMiscInfo"].is_string());
}

#[tokio::test]
async fn create_error_reply_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/updatecenterwebapi/api/createform"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "Error": "Build is locked" })),
        )
        .mount(&server)
        .await;

    let err = client(&server).create(&draft()).await.unwrap_err();
    assert!(err.to_string().contains("Build is locked"), "{err}");
}

#[tokio::test]
async fn update_posts_modify_and_build() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/updatecenterwebapi/api/modifyandbuildform"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut record = draft();
    record.form_id = Some("5501".to_string());
    let updated = client(&server).update(&record).await.unwrap();
    assert_eq!(updated, record);

    let requests = server.received_requests().await.expect("recorded");
    assert_eq!(body(&requests[0])["FormID"], "5501");
}

#[tokio::test]
async fn update_properties_sends_linkage_block_only() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/updatecenterwebapi/api/modifygitlabinfo"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut record = draft();
    record.form_id = Some("5501".to_string());
    record.history_mut().superseded_change = Some("42".to_string());
    client(&server).update_properties(&record).await.unwrap();

    let requests = server.received_requests().await.expect("recorded");
    let sent = body(&requests[0]);
    assert_eq!(sent["FormID"], "5501");
    assert_eq!(sent["AccessToken"], "uc-token");
    assert!(sent.get("BinaryInfo").is_none());
    let misc: Value = serde_json::from_str(
        sent["GitLabFormProperties"]["GitMiscInfo"]
            .as_str()
            .expect("string"),
    )
    .unwrap();
    assert_eq!(misc["oldMr"], "42");
}

#[tokio::test]
async fn reset_uses_query_parameters() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path(
            "/updatecenterwebapi/api/ResetUpdateAndMoveFormToCreatedState",
        ))
        .and(query_param("BuildID", "1100080"))
        .and(query_param("FormID", "5501"))
        .and(query_param("Comment", "Build failed"))
        .and(query_param("AccessToken", "uc-token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut record = draft();
    record.form_id = Some("5501".to_string());
    client(&server)
        .reset_to_created(&record, "Build failed")
        .await
        .unwrap();
}

// ---------------------------------------------------------------------------
// download_source
// ---------------------------------------------------------------------------

#[tokio::test]
async fn download_source_saves_zip() {
    let server = MockServer::start().await;
    let zip = b"PK\x03\x04form-source".to_vec();
    Mock::given(method("GET"))
        .and(path("/updatecenterwebapi/api/DownloadFormSourceFiles"))
        .and(query_param("BuildID", "1100080"))
        .and(query_param("FormID", "61597"))
        .and(header_exists("Authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(zip.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let dest = tmp.path().join("tempExternalSrcLocation");
    let saved = client(&server)
        .download_source("1100080", "61597", &dest)
        .await
        .unwrap()
        .expect("archive");

    assert_eq!(saved, dest.join(SOURCE_ARCHIVE));
    assert_eq!(std::fs::read(&saved).unwrap(), zip);
}

#[tokio::test]
async fn download_source_not_found_writes_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/updatecenterwebapi/api/DownloadFormSourceFiles"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let dest = tmp.path().join("tempExternalSrcLocation");
    let saved = client(&server)
        .download_source("1100080", "61597", &dest)
        .await
        .unwrap();

    assert!(saved.is_none());
    assert!(!dest.join(SOURCE_ARCHIVE).exists());
}

#[tokio::test]
async fn download_source_server_error_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/updatecenterwebapi/api/DownloadFormSourceFiles"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    assert!(client(&server)
        .download_source("1100080", "61597", tmp.path())
        .await
        .is_err());
}
