//! Behavior every `SessionStore` backend must share. Each backend's test
//! module runs [`run_all`] against a fresh instance.

use chrono::{Duration, Utc};
use serde_json::json;

use super::traits::{MessageWrite, SessionRecord, SessionStore};
use crate::agent::{ClientConfig, TransportMode};
use crate::sessions::{
    Attachment, AttachmentType, Message, MessageRole, ProviderConfig, SessionConfig,
    SessionMetadata, SystemMessageConfig, SystemMessageMode, ToolDefinition, ToolParameter,
    ToolParameterType, ToolRequest,
};

pub(crate) fn rich_config() -> SessionConfig {
    SessionConfig {
        model: "gpt-4".into(),
        streaming: true,
        system_message: Some(SystemMessageConfig {
            mode: SystemMessageMode::Replace,
            content: "You are terse.".into(),
        }),
        available_tools: vec!["grep".into(), "view".into()],
        excluded_tools: vec!["shell".into()],
        tools: vec![
            ToolDefinition {
                name: "lookup_ticket".into(),
                description: "Fetch a ticket by key".into(),
                parameters: vec![
                    ToolParameter {
                        name: "key".into(),
                        param_type: ToolParameterType::String,
                        description: "Ticket key".into(),
                        required: true,
                        enum_values: Vec::new(),
                    },
                    ToolParameter {
                        name: "detail".into(),
                        param_type: ToolParameterType::String,
                        description: String::new(),
                        required: false,
                        enum_values: vec!["short".into(), "full".into()],
                    },
                ],
            },
            ToolDefinition {
                name: "now".into(),
                description: "Current time".into(),
                parameters: Vec::new(),
            },
        ],
        provider: Some(ProviderConfig {
            provider_type: "openai".into(),
            base_url: Some("https://llm.internal/v1".into()),
            api_key: None,
            wire_api: Some("responses".into()),
        }),
    }
}

fn tool_message() -> Message {
    let mut msg = Message::new(MessageRole::Tool, "");
    msg.tool_call_id = Some("call-1".into());
    msg.tool_name = Some("lookup_ticket".into());
    msg.tool_result = Some("{\"status\":\"open\"}".into());
    msg
}

fn rich_assistant_message() -> Message {
    let mut msg = Message::assistant("Looking it up");
    msg.reasoning_content = Some("need the ticket".into());
    msg.tool_requests.push(ToolRequest {
        tool_call_id: "call-1".into(),
        name: "lookup_ticket".into(),
        arguments: Some(json!({"key": "OPS-12"})),
    });
    msg
}

fn user_with_attachment(text: &str) -> Message {
    let mut msg = Message::user(text);
    msg.transformed_content = Some(format!("<ctx/>{text}"));
    msg.attachments.push(Attachment {
        attachment_type: AttachmentType::File,
        path: "/repo/src/lib.rs".into(),
        display_name: "lib.rs".into(),
    });
    msg
}

pub(crate) async fn run_all(store: &dyn SessionStore) {
    client_config_upsert(store).await;
    save_and_load_preserves_nested_config(store).await;
    upsert_replaces_metadata(store).await;
    appends_preserve_order(store).await;
    appends_never_lower_the_count(store).await;
    message_write_modes(store).await;
    unknown_sessions_resolve_to_empty(store).await;
    unstorable_ids_resolve_to_empty(store).await;
    load_all_orders_newest_first(store).await;
    delete_cascades(store).await;
}

async fn client_config_upsert(store: &dyn SessionStore) {
    assert!(store.load_client_config().await.unwrap().is_none());

    let mut config = ClientConfig {
        cli_path: Some("/opt/agent/bin/agent".into()),
        transport: TransportMode::Tcp,
        port: 7777,
        ..ClientConfig::default()
    };
    config.environment.insert("LOG".into(), "1".into());
    store.save_client_config(&config).await.unwrap();
    assert_eq!(store.load_client_config().await.unwrap(), Some(config.clone()));

    config.auto_restart = false;
    config.log_level = "debug".into();
    store.save_client_config(&config).await.unwrap();
    assert_eq!(store.load_client_config().await.unwrap(), Some(config));
}

async fn save_and_load_preserves_nested_config(store: &dyn SessionStore) {
    let mut record = SessionRecord::new(SessionMetadata::new("contract-rich", rich_config()));
    record.metadata.summary = Some("ticket triage".into());
    record.messages = vec![
        user_with_attachment("what is OPS-12?"),
        rich_assistant_message(),
        tool_message(),
    ];
    record.metadata.message_count = 3;
    store
        .save_session(&record, MessageWrite::Replace)
        .await
        .unwrap();

    let loaded = store.load_session("contract-rich").await.unwrap().unwrap();
    assert_eq!(loaded, record);
    let metadata = store.load_metadata("contract-rich").await.unwrap().unwrap();
    assert_eq!(metadata, record.metadata);
    assert!(store.session_exists("contract-rich").await.unwrap());
}

async fn upsert_replaces_metadata(store: &dyn SessionStore) {
    let mut record = SessionRecord::new(SessionMetadata::new(
        "contract-upsert",
        SessionConfig::with_model("gpt-4"),
    ));
    store.save_session(&record, MessageWrite::Keep).await.unwrap();

    record.metadata.summary = Some("second".into());
    record.metadata.message_count = 7;
    record.metadata.config.tools = rich_config().tools;
    store.save_session(&record, MessageWrite::Keep).await.unwrap();

    let ids = store.list_session_ids().await.unwrap();
    assert_eq!(ids.iter().filter(|id| *id == "contract-upsert").count(), 1);
    let loaded = store.load_metadata("contract-upsert").await.unwrap().unwrap();
    assert_eq!(loaded.summary.as_deref(), Some("second"));
    assert_eq!(loaded.message_count, 7);
    assert_eq!(loaded.config.tools.len(), 2);

    // Dropping a tool on the next save removes it.
    record.metadata.config.tools.truncate(1);
    store.save_session(&record, MessageWrite::Keep).await.unwrap();
    let loaded = store.load_metadata("contract-upsert").await.unwrap().unwrap();
    assert_eq!(loaded.config.tools, record.metadata.config.tools);
}

async fn appends_preserve_order(store: &dyn SessionStore) {
    let record = SessionRecord::new(SessionMetadata::new("contract-order", SessionConfig::default()));
    store.save_session(&record, MessageWrite::Keep).await.unwrap();

    let first = vec![Message::user("one"), Message::assistant("two")];
    let second = vec![Message::user("three")];
    store.append_messages("contract-order", &first).await.unwrap();
    store.append_messages("contract-order", &second).await.unwrap();

    let contents: Vec<String> = store
        .get_messages("contract-order")
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.content)
        .collect();
    assert_eq!(contents, vec!["one", "two", "three"]);

    let metadata = store.load_metadata("contract-order").await.unwrap().unwrap();
    assert_eq!(metadata.message_count, 3);

    assert!(store
        .append_messages("contract-missing", &second)
        .await
        .is_err());
    assert!(!store.session_exists("contract-missing").await.unwrap());
}

async fn appends_never_lower_the_count(store: &dyn SessionStore) {
    let mut record =
        SessionRecord::new(SessionMetadata::new("contract-count", SessionConfig::default()));
    store.save_session(&record, MessageWrite::Keep).await.unwrap();

    // Counted without a log entry, as an increment through the registry does.
    record.metadata.message_count = 3;
    store.save_session(&record, MessageWrite::Keep).await.unwrap();

    store
        .append_messages("contract-count", &[Message::user("x")])
        .await
        .unwrap();
    let metadata = store.load_metadata("contract-count").await.unwrap().unwrap();
    assert_eq!(metadata.message_count, 4);
    assert_eq!(store.get_messages("contract-count").await.unwrap().len(), 1);

    store.append_messages("contract-count", &[]).await.unwrap();
    let metadata = store.load_metadata("contract-count").await.unwrap().unwrap();
    assert_eq!(metadata.message_count, 4);
}

async fn message_write_modes(store: &dyn SessionStore) {
    let mut record =
        SessionRecord::new(SessionMetadata::new("contract-modes", SessionConfig::default()));
    record.messages = vec![Message::user("a"), Message::assistant("b")];
    store.save_session(&record, MessageWrite::Replace).await.unwrap();

    record.messages = vec![Message::user("ignored")];
    store.save_session(&record, MessageWrite::Keep).await.unwrap();
    assert_eq!(store.get_messages("contract-modes").await.unwrap().len(), 2);

    record.messages = vec![Message::user("c")];
    store.save_session(&record, MessageWrite::Append).await.unwrap();
    let contents: Vec<String> = store
        .get_messages("contract-modes")
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.content)
        .collect();
    assert_eq!(contents, vec!["a", "b", "c"]);

    record.messages = vec![Message::user("fresh")];
    store.save_session(&record, MessageWrite::Replace).await.unwrap();
    let messages = store.get_messages("contract-modes").await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "fresh");
}

async fn unknown_sessions_resolve_to_empty(store: &dyn SessionStore) {
    assert!(store.load_session("contract-none").await.unwrap().is_none());
    assert!(store.load_metadata("contract-none").await.unwrap().is_none());
    assert!(store.get_messages("contract-none").await.unwrap().is_empty());
    assert!(!store.session_exists("contract-none").await.unwrap());
    assert!(!store.delete_session("contract-none").await.unwrap());
}

async fn unstorable_ids_resolve_to_empty(store: &dyn SessionStore) {
    for id in ["a/b", "..", "x\\y"] {
        assert!(store.load_session(id).await.unwrap().is_none(), "{id}");
        assert!(store.load_metadata(id).await.unwrap().is_none(), "{id}");
        assert!(store.get_messages(id).await.unwrap().is_empty(), "{id}");
        assert!(!store.session_exists(id).await.unwrap(), "{id}");
        assert!(!store.delete_session(id).await.unwrap(), "{id}");
    }
}

async fn load_all_orders_newest_first(store: &dyn SessionStore) {
    let base = Utc::now() + Duration::days(365);
    for (id, offset) in [("contract-old", 0), ("contract-newest", 2), ("contract-mid", 1)] {
        let mut metadata = SessionMetadata::new(id, SessionConfig::default());
        metadata.created_at = base + Duration::seconds(offset);
        store
            .save_session(&SessionRecord::new(metadata), MessageWrite::Keep)
            .await
            .unwrap();
    }

    let ids: Vec<String> = store
        .load_all_metadata()
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.session_id)
        .collect();
    assert_eq!(&ids[..3], &["contract-newest", "contract-mid", "contract-old"]);

    let records = store.load_all_sessions().await.unwrap();
    assert_eq!(records[0].session_id(), "contract-newest");
    assert_eq!(records.len(), ids.len());
}

async fn delete_cascades(store: &dyn SessionStore) {
    let mut record = SessionRecord::new(SessionMetadata::new("contract-delete", rich_config()));
    record.messages = vec![Message::user("bye")];
    store.save_session(&record, MessageWrite::Replace).await.unwrap();

    assert!(store.delete_session("contract-delete").await.unwrap());
    assert!(!store.session_exists("contract-delete").await.unwrap());
    assert!(store.get_messages("contract-delete").await.unwrap().is_empty());
    assert!(!store
        .list_session_ids()
        .await
        .unwrap()
        .contains(&"contract-delete".to_string()));

    // Re-creating the id starts from an empty log.
    let fresh = SessionRecord::new(SessionMetadata::new("contract-delete", SessionConfig::default()));
    store.save_session(&fresh, MessageWrite::Keep).await.unwrap();
    assert!(store.get_messages("contract-delete").await.unwrap().is_empty());
}
