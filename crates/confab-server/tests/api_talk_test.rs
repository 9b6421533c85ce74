//! End-to-end tests of the AI-talk HTTP surface over mock providers.

mod common;

use axum::http::StatusCode;
use common::*;
use std::sync::Arc;
use std::time::Duration;

const STAGE_TIMEOUT: Duration = Duration::from_secs(300);

#[tokio::test]
async fn happy_path_english_turn() {
    let dir = tempfile::tempdir().unwrap();
    let server = setup_app(
        dir.path(),
        vec![english_robot("", 5)],
        Arc::new(ScriptedAsr::single("hello there")),
        Arc::new(ScriptedChat::new(&[
            "Hi", " there,", " my", " friend.", " Nice", " to", " see", " you", " today!",
        ])),
        Arc::new(MockTts::instant()),
        STAGE_TIMEOUT,
    );

    // start: a stage plus the robot roster
    let (status, body) = get(&server.app, "/api/ai-talk/start/").await;
    assert_eq!(status, StatusCode::OK);
    let sid = body["sid"].as_str().unwrap().to_string();
    assert_eq!(body["robots"][0]["uuid"], "default");
    assert_eq!(body["robots"][0]["voice"], "hello-english.aac");
    assert_eq!(server.talk.count_stages(), 1);

    // conversation marks the spoken-turn begin
    let (status, _) = get(&server.app, &format!("/api/ai-talk/conversation/?sid={sid}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(server.talk.conversations(), 1);

    // upload answers synchronously with the transcript
    let (status, body) = upload(&server.app, &sid, "default").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["asr"], "hello there");
    let rid = body["rid"].as_str().unwrap().to_string();

    // poll until the first segment is ready
    let (status, body) = get(
        &server.app,
        &format!("/api/ai-talk/query/?sid={sid}&rid={rid}"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let asid = body["asid"].as_str().unwrap().to_string();
    assert!(!asid.is_empty());
    assert_eq!(body["processing"], false);
    let tts_text = body["tts"].as_str().unwrap();
    assert!(tts_text.contains("Hi there, my friend."));

    // download the audio
    let (status, content_type, bytes) = download_tts(&server.app, &sid, &rid, &asid).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type, "audio/aac");
    assert!(String::from_utf8_lossy(&bytes).starts_with("FAKE-AAC:"));

    // acknowledge it
    let (status, body) = get(
        &server.app,
        &format!("/api/ai-talk/remove/?sid={sid}&rid={rid}&asid={asid}"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_null());

    // the second sentence follows, then the turn drains
    let (status, body) = get(
        &server.app,
        &format!("/api/ai-talk/query/?sid={sid}&rid={rid}"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let second = body["asid"].as_str().unwrap().to_string();
    assert!(body["tts"].as_str().unwrap().contains("Nice to see you"));
    let (status, _) = get(
        &server.app,
        &format!("/api/ai-talk/remove/?sid={sid}&rid={rid}&asid={second}"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = get(
        &server.app,
        &format!("/api/ai-talk/query/?sid={sid}&rid={rid}"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["asid"].as_str().unwrap_or("").is_empty());

    assert_eq!(server.talk.errors(), 0);
    assert_eq!(server.talk.badcases(), 0);
}

#[tokio::test]
async fn badcase_upload_fails_without_segments() {
    let dir = tempfile::tempdir().unwrap();
    let server = setup_app(
        dir.path(),
        vec![english_robot("", 5)],
        Arc::new(ScriptedAsr::single("you")),
        Arc::new(ScriptedChat::new(&["never", " reached."])),
        Arc::new(MockTts::instant()),
        STAGE_TIMEOUT,
    );

    let (_, body) = get(&server.app, "/api/ai-talk/start/").await;
    let sid = body["sid"].as_str().unwrap().to_string();

    let (status, body) = upload(&server.app, &sid, "default").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.as_str().unwrap().contains("badcase"));

    assert_eq!(server.talk.badcases(), 1);
    assert_eq!(server.talk.errors(), 0);
}

#[tokio::test]
async fn empty_and_unknown_ids_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let server = setup_app(
        dir.path(),
        vec![english_robot("", 5)],
        Arc::new(ScriptedAsr::single("hello there")),
        Arc::new(ScriptedChat::new(&["Fine."])),
        Arc::new(MockTts::instant()),
        STAGE_TIMEOUT,
    );

    let (status, body) = get(&server.app, "/api/ai-talk/conversation/").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body.as_str().unwrap(), "empty sid");

    let (status, body) = get(&server.app, "/api/ai-talk/query/?sid=nope&rid=x").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.as_str().unwrap().contains("invalid sid"));

    let (_, body) = get(&server.app, "/api/ai-talk/start/").await;
    let sid = body["sid"].as_str().unwrap().to_string();

    let (status, body) = upload(&server.app, &sid, "nonexistent").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.as_str().unwrap().contains("invalid robot"));

    let (status, body) = get(
        &server.app,
        &format!("/api/ai-talk/query/?sid={sid}&rid="),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body.as_str().unwrap(), "empty rid");

    assert_eq!(server.talk.errors(), 4);
}

#[tokio::test]
async fn remove_is_not_idempotent_but_safe() {
    let dir = tempfile::tempdir().unwrap();
    let server = setup_app(
        dir.path(),
        vec![english_robot("", 5)],
        Arc::new(ScriptedAsr::single("hello there")),
        Arc::new(ScriptedChat::new(&["All", " good,", " thanks", " friend."])),
        Arc::new(MockTts::instant()),
        STAGE_TIMEOUT,
    );

    let (_, body) = get(&server.app, "/api/ai-talk/start/").await;
    let sid = body["sid"].as_str().unwrap().to_string();
    let (_, body) = upload(&server.app, &sid, "default").await;
    let rid = body["rid"].as_str().unwrap().to_string();

    let (_, body) = get(
        &server.app,
        &format!("/api/ai-talk/query/?sid={sid}&rid={rid}"),
    )
    .await;
    let asid = body["asid"].as_str().unwrap().to_string();

    let (status, _) = get(
        &server.app,
        &format!("/api/ai-talk/remove/?sid={sid}&rid={rid}&asid={asid}"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // The second remove reports "no segment" and has no side effects.
    let (status, body) = get(
        &server.app,
        &format!("/api/ai-talk/remove/?sid={sid}&rid={rid}&asid={asid}"),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.as_str().unwrap().contains("no segment"));
}

#[tokio::test]
async fn examples_serves_welcome_clips() {
    let dir = tempfile::tempdir().unwrap();
    tokio::fs::write(dir.path().join("hello-english.aac"), b"clip-bytes")
        .await
        .unwrap();

    let server = setup_app(
        dir.path(),
        vec![english_robot("", 5)],
        Arc::new(ScriptedAsr::single("hello there")),
        Arc::new(ScriptedChat::new(&["Fine."])),
        Arc::new(MockTts::instant()),
        STAGE_TIMEOUT,
    );

    // An extensionless name gets ".aac" appended.
    let (status, _, _) = raw_get(&server.app, "/api/ai-talk/examples/hello-english").await;
    assert_eq!(status, StatusCode::OK);

    let (status, content_type, bytes) =
        raw_get(&server.app, "/api/ai-talk/examples/hello-english.aac").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type, "audio/aac");
    assert_eq!(bytes, b"clip-bytes");

    // Path traversal is rejected.
    let (status, _, _) = raw_get(&server.app, "/api/ai-talk/examples/..%2Fsecret.aac").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

async fn raw_get(app: &axum::Router, uri: &str) -> (StatusCode, String, Vec<u8>) {
    use axum::{body::Body, http::header, http::Request};
    use tower::ServiceExt;

    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .map(|v| v.to_str().unwrap_or_default().to_string())
        .unwrap_or_default();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, content_type, bytes.to_vec())
}
