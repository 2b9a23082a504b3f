//! Config-wired driver against a mock Chat Completions server and SQLite.

use colloquy_engine::{
    ColloquyConfig, CompletionError, CompletionRequest, Role, SessionStore, SqliteSessionStore,
    driver_from_config,
};
use futures_util::future::AbortHandle;
use tokio::sync::mpsc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{OWNER, mount_chat_stream};

fn config(server: &MockServer, db: &std::path::Path) -> ColloquyConfig {
    toml::from_str(&format!(
        r#"
        [session]
        model = "gpt-4o-mini"
        stop_sequences = ["\n\nUser:"]
        initial_system_message = "You answer in one sentence."

        [backend]
        base_url = "{}/v1"
        api_key = "sk-e2e"
        idle_timeout_secs = 5

        [store]
        path = {db:?}
        "#,
        server.uri()
    ))
    .unwrap()
}

fn request(config: &ColloquyConfig, text: &str) -> CompletionRequest {
    CompletionRequest {
        session_id: None,
        owner_id: OWNER.to_string(),
        user_text: text.to_string(),
        settings: config.completion_settings(),
    }
}

#[tokio::test]
async fn streamed_reply_is_persisted_to_sqlite() {
    let server = MockServer::start().await;
    mount_chat_stream(&server, &["The sky ", "is blue."]).await;
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("sessions.db");
    let config = config(&server, &db);
    let driver = driver_from_config(&config).unwrap();

    let (tx, mut rx) = mpsc::channel(8);
    let (_handle, registration) = AbortHandle::new_pair();
    let output = driver
        .execute(request(&config, "Why is the sky blue?"), tx, registration)
        .await
        .unwrap();

    let mut snapshots = Vec::new();
    while let Some(snapshot) = rx.recv().await {
        snapshots.push(snapshot.content);
    }
    assert_eq!(snapshots, ["The sky ", "The sky is blue."]);
    assert_eq!(output.content, "The sky is blue.");
    drop(driver);

    let reopened = SqliteSessionStore::open(&db).unwrap();
    let session = reopened.find_by_id(&output.session_id).unwrap();
    let roles: Vec<Role> = session.buffer().active().iter().map(|m| m.role()).collect();
    assert_eq!(roles, [Role::System, Role::User, Role::Assistant]);
    assert_eq!(
        session.buffer().active()[2].content(),
        "The sky is blue."
    );
    assert!(session.buffer().active().iter().all(|m| m.token_count() > 0));
    assert_eq!(session.config().model().name(), "gpt-4o-mini");
    assert_eq!(session.config().model().max_tokens(), 128_000);
    assert_eq!(session.config().params().stop_sequences(), ["\n\nUser:"]);
}

#[tokio::test]
async fn request_is_authenticated_and_carries_settings() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-e2e"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"ok\"},\"finish_reason\":\"stop\"}]}\n\n",
        ))
        .expect(1)
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let config = config(&server, &dir.path().join("sessions.db"));
    let driver = driver_from_config(&config).unwrap();

    let (tx, _rx) = mpsc::channel(8);
    let (_handle, registration) = AbortHandle::new_pair();
    driver
        .execute(request(&config, "ping"), tx, registration)
        .await
        .unwrap();

    let received = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(body["model"], "gpt-4o-mini");
    assert_eq!(body["stream"], true);
    assert_eq!(body["stop"], serde_json::json!(["\n\nUser:"]));
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][1]["content"], "ping");
}

#[tokio::test]
async fn server_error_surfaces_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("sessions.db");
    let config = config(&server, &db);
    let driver = driver_from_config(&config).unwrap();

    let (tx, _rx) = mpsc::channel(8);
    let (_handle, registration) = AbortHandle::new_pair();
    let err = driver
        .execute(request(&config, "hello"), tx, registration)
        .await
        .unwrap_err();

    let CompletionError::BackendFailure(message) = err else {
        panic!("expected backend failure, got {err:?}");
    };
    assert!(message.contains("500"), "{message}");
    assert!(message.contains("upstream exploded"), "{message}");
}
