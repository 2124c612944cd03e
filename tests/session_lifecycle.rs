use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

use sessionrelay::agent::events::{AssistantMessageData, MessageDeltaData};
use sessionrelay::agent::{NativeEvent, NativeEventData, SessionHandle};
use sessionrelay::events::{EventEnvelope, Lane, SessionEventHub, Subscription};
use sessionrelay::persistence::{migrate, FileSessionStore, SessionStore, SqliteSessionStore};
use sessionrelay::sessions::{Attachment, Message, SessionConfig, SessionRegistry};
use sessionrelay::SessionRelay;

struct NoopHandle(String);

#[async_trait]
impl SessionHandle for NoopHandle {
    fn session_id(&self) -> &str {
        &self.0
    }

    async fn send(&self, _prompt: &str, _attachments: &[Attachment]) -> anyhow::Result<String> {
        Ok("msg-1".into())
    }

    async fn abort(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

async fn recv(sub: &mut Subscription) -> Arc<EventEnvelope> {
    tokio::time::timeout(Duration::from_secs(2), sub.recv())
        .await
        .expect("event should arrive")
        .expect("lane should stay open")
}

async fn register_append_read(store: Arc<dyn SessionStore>) {
    let registry = SessionRegistry::new(store);
    registry
        .register("s1", Box::new(NoopHandle("s1".into())), SessionConfig::with_model("gpt-4"))
        .await
        .unwrap();

    let meta = registry.get_metadata("s1").await.unwrap().unwrap();
    assert_eq!(meta.message_count, 0);
    assert_eq!(meta.config.model, "gpt-4");

    let m1 = Message::user("What is Rust?");
    let m2 = Message::assistant("A systems programming language.");
    registry
        .append_messages("s1", &[m1.clone(), m2.clone()])
        .await
        .unwrap();

    let meta = registry.get_metadata("s1").await.unwrap().unwrap();
    assert_eq!(meta.message_count, 2);
    assert_eq!(registry.store().get_messages("s1").await.unwrap(), vec![m1, m2]);
}

#[tokio::test]
async fn s1_scenario_on_file_store() {
    let tmp = TempDir::new().unwrap();
    register_append_read(Arc::new(FileSessionStore::new(tmp.path()))).await;
}

#[tokio::test]
async fn s1_scenario_on_sqlite_store() {
    let tmp = TempDir::new().unwrap();
    let store = SqliteSessionStore::open(&tmp.path().join("sessions.db")).unwrap();
    register_append_read(Arc::new(store)).await;
}

#[tokio::test]
async fn flat_file_history_migrates_into_sqlite() {
    let tmp = TempDir::new().unwrap();
    let files = Arc::new(FileSessionStore::new(tmp.path().join("data")));
    register_append_read(files.clone()).await;

    let db = SqliteSessionStore::open(&tmp.path().join("sessions.db")).unwrap();
    let first = migrate(&tmp.path().join("data"), &db).await.unwrap();
    assert_eq!(first.sessions_migrated, 1);
    assert_eq!(first.total_messages_migrated, 2);
    assert!(first.errors.is_empty());

    let second = migrate(&tmp.path().join("data"), &db).await.unwrap();
    assert_eq!(second.sessions_migrated, 0);
    assert_eq!(second.skipped, vec!["s1".to_string()]);

    assert_eq!(
        db.get_messages("s1").await.unwrap(),
        files.get_messages("s1").await.unwrap()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn live_events_reach_subscribers_and_history() {
    let tmp = TempDir::new().unwrap();
    let store: Arc<dyn SessionStore> =
        Arc::new(SqliteSessionStore::open(&tmp.path().join("sessions.db")).unwrap());
    let registry = Arc::new(SessionRegistry::new(store.clone()));
    let hub = Arc::new(SessionEventHub::new(32));
    let relay = SessionRelay::new(registry, hub.clone());

    let mut deltas = hub.subscribe("s1", &[Lane::StreamingDelta]);
    let mut events = hub.subscribe("s1", &[Lane::SessionEvent]);

    let (tx, rx) = mpsc::channel(16);
    relay
        .attach("s1", Box::new(NoopHandle("s1".into())), SessionConfig::with_model("gpt-4"), rx)
        .await
        .unwrap();

    for fragment in ["Hel", "lo"] {
        tx.send(NativeEvent::new(NativeEventData::AssistantMessageDelta(
            MessageDeltaData {
                message_id: "m1".into(),
                delta_content: fragment.into(),
                ..Default::default()
            },
        )))
        .await
        .unwrap();
    }
    tx.send(NativeEvent::new(NativeEventData::AssistantMessage(
        AssistantMessageData {
            message_id: "m1".into(),
            content: "Hello".into(),
            ..Default::default()
        },
    )))
    .await
    .unwrap();

    let d1 = recv(&mut deltas).await;
    let d2 = recv(&mut deltas).await;
    let first: serde_json::Value = serde_json::to_value(&*d1).unwrap();
    let second: serde_json::Value = serde_json::to_value(&*d2).unwrap();
    assert_eq!(first["data"]["totalResponseSizeBytes"], 3);
    assert_eq!(second["data"]["totalResponseSizeBytes"], 5);

    let done = recv(&mut events).await;
    assert_eq!(done.event_type, "assistant.message");

    let mut history = Vec::new();
    for _ in 0..100 {
        history = store.get_messages("s1").await.unwrap();
        if !history.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content, "Hello");

    relay.shutdown().await;
    assert!(store.session_exists("s1").await.unwrap());
}
