//! `CompletionDriver::execute` against scripted collaborators.

use colloquy_engine::colloquy_providers::openai::{OpenAIBackend, OpenAIBackendConfig};
use colloquy_engine::colloquy_types::ConfigurationError;
use colloquy_engine::{
    CompletionDriver, CompletionError, CompletionOutput, CompletionRequest, Role, SessionId,
    Snapshot, StreamEvent,
};
use futures_util::future::AbortHandle;
use tokio::sync::mpsc;

use crate::common::{OWNER, RecordingStore, Reply, TestDriver, WordCount, driver, settings, words};

fn request(session_id: Option<SessionId>, text: &str) -> CompletionRequest {
    CompletionRequest {
        session_id,
        owner_id: OWNER.to_string(),
        user_text: text.to_string(),
        settings: settings(100),
    }
}

async fn execute(
    driver: &TestDriver,
    request: CompletionRequest,
) -> (Result<CompletionOutput, CompletionError>, Vec<Snapshot>) {
    let (tx, mut rx) = mpsc::channel(8);
    let (_handle, registration) = AbortHandle::new_pair();
    let (result, snapshots) = tokio::join!(driver.execute(request, tx, registration), async {
        let mut seen = Vec::new();
        while let Some(snapshot) = rx.recv().await {
            seen.push(snapshot);
        }
        seen
    });
    (result, snapshots)
}

fn contents(snapshots: &[Snapshot]) -> Vec<&str> {
    snapshots.iter().map(|s| s.content.as_str()).collect()
}

#[tokio::test]
async fn unknown_session_is_created_then_saved() {
    let driver = driver([Reply::text(&["Hi!"])]);

    let (result, _) = execute(&driver, request(None, "hello")).await;
    let output = result.unwrap();

    assert_eq!(driver.store().creates(), 1);
    assert_eq!(driver.store().saves(), 1);
    let stored = driver.store().stored(&output.session_id);
    let roles: Vec<Role> = stored.buffer().active().iter().map(|m| m.role()).collect();
    assert_eq!(roles, [Role::System, Role::User, Role::Assistant]);
    assert_eq!(stored.owner_id(), OWNER);
}

#[tokio::test]
async fn snapshots_grow_one_fragment_at_a_time() {
    let driver = driver([Reply::text(&["Hel", "lo"])]);

    let (result, snapshots) = execute(&driver, request(None, "greet me")).await;
    let output = result.unwrap();

    assert_eq!(contents(&snapshots), ["Hel", "Hello"]);
    assert!(snapshots.iter().all(|s| s.session_id == output.session_id));
    assert!(snapshots.iter().all(|s| s.owner_id == OWNER));
    assert_eq!(output.content, "Hello");

    let stored = driver.store().stored(&output.session_id);
    let last = stored.buffer().active().last().unwrap();
    assert_eq!(last.role(), Role::Assistant);
    assert_eq!(last.content(), "Hello");
}

#[tokio::test]
async fn follow_up_turn_reuses_the_stored_session() {
    let driver = driver([Reply::text(&["first"]), Reply::text(&["second"])]);

    let (first, _) = execute(&driver, request(None, "one")).await;
    let id = first.unwrap().session_id;
    let (second, _) = execute(&driver, request(Some(id), "two")).await;

    assert_eq!(second.unwrap().session_id, id);
    assert_eq!(driver.store().creates(), 1);
    assert_eq!(driver.store().saves(), 2);
    assert_eq!(driver.store().stored(&id).buffer().len(), 5);

    let requests = driver.backend().requests();
    let turns: Vec<&str> = requests[1].turns.iter().map(|t| t.content.as_str()).collect();
    assert_eq!(turns, ["be brief", "one", "first", "two"]);
}

#[tokio::test]
async fn eviction_shapes_the_request_and_the_stored_history() {
    let driver = driver([Reply::text(&["a b c d"]), Reply::text(&["x"])]);
    let mut first = request(None, "one two three four");
    first.settings = settings(10);

    let (result, _) = execute(&driver, first).await;
    let id = result.unwrap().session_id;
    assert_eq!(driver.store().stored(&id).buffer().token_usage(), 10);

    let (result, _) = execute(&driver, request(Some(id), "five six")).await;
    result.unwrap();

    let requests = driver.backend().requests();
    let roles: Vec<Role> = requests[1].turns.iter().map(|t| t.role).collect();
    assert_eq!(roles, [Role::User, Role::Assistant, Role::User]);

    let stored = driver.store().stored(&id);
    let evicted: Vec<&str> = stored.buffer().evicted().iter().map(|m| m.content()).collect();
    assert_eq!(evicted, ["be brief", "one two three four"]);
    let active: Vec<&str> = stored.buffer().active().iter().map(|m| m.content()).collect();
    assert_eq!(active, ["a b c d", "five six", "x"]);
    assert_eq!(stored.buffer().token_usage(), 7);
    assert_eq!(
        stored.initial_system_message().map(|m| m.content()),
        Some("be brief")
    );
}

#[tokio::test]
async fn mid_stream_failure_leaves_the_store_unchanged() {
    let driver = driver([
        Reply::text(&["ok"]),
        Reply::Events(vec![
            StreamEvent::TextDelta("par".to_string()),
            StreamEvent::Error("connection reset".to_string()),
        ]),
    ]);
    let (result, _) = execute(&driver, request(None, "one")).await;
    let id = result.unwrap().session_id;
    let before = driver.store().stored(&id);

    let (result, snapshots) = execute(&driver, request(Some(id), "two")).await;

    assert!(
        matches!(&result, Err(CompletionError::BackendFailure(m)) if m == "connection reset"),
        "{result:?}"
    );
    assert_eq!(contents(&snapshots), ["par"]);
    assert_eq!(driver.store().saves(), 1);
    assert_eq!(driver.store().stored(&id), before);
}

#[tokio::test]
async fn rejected_invocation_is_backend_failure() {
    let driver = driver([Reply::Reject(503)]);

    let (result, snapshots) = execute(&driver, request(None, "hello")).await;

    assert!(
        matches!(&result, Err(CompletionError::BackendFailure(m)) if m.contains("503")),
        "{result:?}"
    );
    assert!(snapshots.is_empty());
    assert_eq!(driver.store().creates(), 1);
    assert_eq!(driver.store().saves(), 0);
}

#[tokio::test]
async fn cancellation_stops_the_call_without_committing() {
    let driver = driver([Reply::Hang(vec![StreamEvent::TextDelta("Hel".to_string())])]);
    let (tx, mut rx) = mpsc::channel(8);
    let (handle, registration) = AbortHandle::new_pair();

    let (result, first) = tokio::join!(
        driver.execute(request(None, "hello"), tx, registration),
        async {
            let first = rx.recv().await;
            handle.abort();
            first
        }
    );

    assert!(matches!(result, Err(CompletionError::Cancelled)), "{result:?}");
    assert_eq!(first.map(|s| s.content), Some("Hel".to_string()));
    assert_eq!(rx.recv().await, None);
    assert_eq!(driver.store().saves(), 0);

    assert_eq!(driver.backend().requests().len(), 1);
}

#[tokio::test]
async fn cancelled_new_session_keeps_only_its_system_message() {
    let driver = driver([Reply::Hang(Vec::new())]);
    let (tx, _rx) = mpsc::channel(8);
    let (handle, registration) = AbortHandle::new_pair();

    let (result, ()) = tokio::join!(
        driver.execute(request(None, "hello"), tx, registration),
        async {
            tokio::task::yield_now().await;
            handle.abort();
        }
    );

    assert!(matches!(result, Err(CompletionError::Cancelled)), "{result:?}");
    assert_eq!(driver.store().creates(), 1);
    assert_eq!(driver.store().saves(), 0);
}

#[tokio::test]
async fn another_owner_cannot_continue_a_session() {
    let driver = driver([Reply::text(&["mine"])]);
    let (result, _) = execute(&driver, request(None, "hello")).await;
    let id = result.unwrap().session_id;

    let mut intruder = request(Some(id), "let me in");
    intruder.owner_id = "someone-else".to_string();
    let (result, _) = execute(&driver, intruder).await;

    assert!(matches!(result, Err(CompletionError::InvalidOwner)), "{result:?}");
    assert_eq!(driver.backend().requests().len(), 1);
    assert_eq!(driver.store().saves(), 1);
}

#[tokio::test]
async fn ended_session_rejects_new_turns() {
    let driver = driver([Reply::text(&["bye"])]);
    let (result, _) = execute(&driver, request(None, "hello")).await;
    let id = result.unwrap().session_id;
    driver.end_session(&id, OWNER).unwrap();
    let before = driver.store().stored(&id);
    let saves = driver.store().saves();

    let (result, snapshots) = execute(&driver, request(Some(id), "still there?")).await;

    assert!(
        matches!(result, Err(CompletionError::SessionEnded(got)) if got == id),
        "{result:?}"
    );
    assert!(snapshots.is_empty());
    assert_eq!(driver.backend().requests().len(), 1);
    assert_eq!(driver.store().saves(), saves);
    assert_eq!(driver.store().stored(&id), before);
}

#[tokio::test]
async fn failed_save_is_persistence_failure() {
    let driver = driver([Reply::text(&["lost"])]);
    driver.store().fail_saves();

    let (result, snapshots) = execute(&driver, request(None, "hello")).await;

    assert!(
        matches!(result, Err(CompletionError::PersistenceFailure(_))),
        "{result:?}"
    );
    assert_eq!(contents(&snapshots), ["lost"]);
    assert_eq!(driver.store().creates(), 1);
}

#[tokio::test]
async fn failed_lookup_does_not_open_a_new_session() {
    let driver = driver([Reply::text(&["never"])]);
    driver.store().fail_lookups();

    let (result, _) = execute(&driver, request(Some(SessionId::generate()), "hello")).await;

    assert!(
        matches!(result, Err(CompletionError::PersistenceFailure(_))),
        "{result:?}"
    );
    assert_eq!(driver.store().creates(), 0);
    assert!(driver.backend().requests().is_empty());
}

#[tokio::test]
async fn empty_stop_sequence_fails_before_the_session_is_created() {
    let driver = driver([Reply::text(&["unused"])]);
    let mut req = request(None, "hello");
    req.settings.stop_sequences = vec![String::new()];

    let (result, _) = execute(&driver, req).await;

    assert!(
        matches!(result, Err(CompletionError::InvalidConfiguration(_))),
        "{result:?}"
    );
    assert_eq!(driver.store().creates(), 0);
}

#[tokio::test]
async fn backend_parameter_limits_are_checked_before_the_session_is_created() {
    let backend = OpenAIBackend::new(
        OpenAIBackendConfig::new("sk-test").with_base_url("http://127.0.0.1:9"),
    )
    .unwrap();
    let driver = CompletionDriver::new(RecordingStore::default(), backend, words as WordCount);
    let mut req = request(None, "hello");
    req.settings.stop_sequences = ["a", "b", "c", "d", "e"].map(String::from).to_vec();

    let (tx, _rx) = mpsc::channel(8);
    let (_handle, registration) = AbortHandle::new_pair();
    let result = driver.execute(req, tx, registration).await;

    assert!(
        matches!(
            result,
            Err(CompletionError::InvalidConfiguration(
                ConfigurationError::TooManyStopSequences { count: 5, max: 4 }
            ))
        ),
        "{result:?}"
    );
    assert_eq!(driver.store().creates(), 0);
}
