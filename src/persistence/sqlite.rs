//! SQLite backend with a normalized schema.
//!
//! All access goes through one connection behind a mutex and runs on the
//! blocking pool. Multi-statement writes are wrapped in a transaction.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;

use super::traits::{MessageWrite, SessionRecord, SessionStore};
use crate::agent::{ClientConfig, TransportMode};
use crate::sessions::{
    Message, MessageRole, ProviderConfig, SessionConfig, SessionMetadata, SystemMessageConfig,
    SystemMessageMode, ToolDefinition, ToolParameter, ToolParameterType,
};

const SCHEMA_VERSION: i64 = 1;

pub struct SqliteSessionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSessionStore {
    /// Open (or create) the database at `path` and bring its schema up to date.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory: {}", parent.display())
            })?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open sessions DB: {}", path.display()))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;",
        )
        .context("Failed to configure sessions DB pragmas")?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory DB")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run_blocking<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock();
            f(&mut conn)
        })
        .await
        .context("SQLite worker task failed")?
    }
}

fn run_migrations(conn: &Connection) -> Result<()> {
    let version: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .context("Failed to query sessions schema version")?;

    if version < 1 {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                last_activity_at TEXT NOT NULL,
                message_count INTEGER NOT NULL DEFAULT 0,
                summary TEXT,
                model TEXT NOT NULL,
                streaming INTEGER NOT NULL DEFAULT 0,
                system_message_mode TEXT,
                system_message_content TEXT,
                available_tools_json TEXT NOT NULL DEFAULT '[]',
                excluded_tools_json TEXT NOT NULL DEFAULT '[]',
                provider_type TEXT,
                provider_base_url TEXT,
                provider_api_key TEXT,
                provider_wire_api TEXT
             );

             CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                transformed_content TEXT,
                tool_call_id TEXT,
                tool_name TEXT,
                tool_result TEXT,
                tool_error TEXT,
                reasoning_content TEXT,
                attachments_json TEXT NOT NULL DEFAULT '[]',
                tool_requests_json TEXT NOT NULL DEFAULT '[]',
                UNIQUE(session_id, position),
                FOREIGN KEY(session_id) REFERENCES sessions(id) ON DELETE CASCADE
             );

             CREATE TABLE IF NOT EXISTS tool_definitions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                UNIQUE(session_id, name),
                FOREIGN KEY(session_id) REFERENCES sessions(id) ON DELETE CASCADE
             );

             CREATE TABLE IF NOT EXISTS tool_parameters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tool_id INTEGER NOT NULL,
                position INTEGER NOT NULL,
                name TEXT NOT NULL,
                param_type TEXT NOT NULL,
                description TEXT NOT NULL,
                required INTEGER NOT NULL DEFAULT 0,
                enum_json TEXT NOT NULL DEFAULT '[]',
                FOREIGN KEY(tool_id) REFERENCES tool_definitions(id) ON DELETE CASCADE
             );

             CREATE TABLE IF NOT EXISTS client_config (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                cli_path TEXT,
                cli_url TEXT,
                port INTEGER NOT NULL,
                transport TEXT NOT NULL,
                log_level TEXT NOT NULL,
                auto_start INTEGER NOT NULL,
                auto_restart INTEGER NOT NULL,
                cwd TEXT,
                environment_json TEXT NOT NULL DEFAULT '{}'
             );

             CREATE INDEX IF NOT EXISTS idx_sessions_created_at ON sessions(created_at DESC);
             CREATE INDEX IF NOT EXISTS idx_messages_session_position ON messages(session_id, position);
             CREATE INDEX IF NOT EXISTS idx_tool_parameters_tool ON tool_parameters(tool_id, position);",
        )
        .context("Failed to apply sessions schema migration v1")?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)
            .context("Failed to set sessions schema version to 1")?;
    }

    Ok(())
}

/// Fixed-width timestamps so lexical order in SQL matches time order.
fn ts(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Invalid stored timestamp: {raw}"))?
        .with_timezone(&Utc))
}

struct SessionRow {
    id: String,
    created_at: String,
    last_activity_at: String,
    message_count: i64,
    summary: Option<String>,
    model: String,
    streaming: bool,
    system_message_mode: Option<String>,
    system_message_content: Option<String>,
    available_tools_json: String,
    excluded_tools_json: String,
    provider_type: Option<String>,
    provider_base_url: Option<String>,
    provider_api_key: Option<String>,
    provider_wire_api: Option<String>,
}

const SESSION_COLUMNS: &str = "id, created_at, last_activity_at, message_count, summary, model, \
     streaming, system_message_mode, system_message_content, available_tools_json, \
     excluded_tools_json, provider_type, provider_base_url, provider_api_key, provider_wire_api";

fn session_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: row.get(0)?,
        created_at: row.get(1)?,
        last_activity_at: row.get(2)?,
        message_count: row.get(3)?,
        summary: row.get(4)?,
        model: row.get(5)?,
        streaming: row.get(6)?,
        system_message_mode: row.get(7)?,
        system_message_content: row.get(8)?,
        available_tools_json: row.get(9)?,
        excluded_tools_json: row.get(10)?,
        provider_type: row.get(11)?,
        provider_base_url: row.get(12)?,
        provider_api_key: row.get(13)?,
        provider_wire_api: row.get(14)?,
    })
}

impl SessionRow {
    fn into_metadata(self, tools: Vec<ToolDefinition>) -> Result<SessionMetadata> {
        let system_message = match (self.system_message_mode, self.system_message_content) {
            (Some(mode), Some(content)) => Some(SystemMessageConfig {
                mode: SystemMessageMode::from_str_opt(&mode)
                    .with_context(|| format!("Unknown system message mode: {mode}"))?,
                content,
            }),
            _ => None,
        };
        let provider = self.provider_type.map(|provider_type| ProviderConfig {
            provider_type,
            base_url: self.provider_base_url,
            api_key: self.provider_api_key,
            wire_api: self.provider_wire_api,
        });

        Ok(SessionMetadata {
            created_at: parse_ts(&self.created_at)?,
            last_activity_at: parse_ts(&self.last_activity_at)?,
            message_count: u64::try_from(self.message_count).unwrap_or(0),
            summary: self.summary,
            config: SessionConfig {
                model: self.model,
                streaming: self.streaming,
                system_message,
                available_tools: serde_json::from_str(&self.available_tools_json)
                    .context("Invalid available_tools_json")?,
                excluded_tools: serde_json::from_str(&self.excluded_tools_json)
                    .context("Invalid excluded_tools_json")?,
                tools,
                provider,
            },
            session_id: self.id,
        })
    }
}

fn upsert_session(conn: &Connection, metadata: &SessionMetadata) -> Result<()> {
    let config = &metadata.config;
    let (mode, content) = match &config.system_message {
        Some(sm) => (Some(sm.mode.as_str()), Some(sm.content.as_str())),
        None => (None, None),
    };
    let provider = config.provider.as_ref();

    // ON CONFLICT DO UPDATE keeps the row, so the message cascade never fires.
    conn.execute(
        "INSERT INTO sessions (id, created_at, last_activity_at, message_count, summary, model,
                streaming, system_message_mode, system_message_content, available_tools_json,
                excluded_tools_json, provider_type, provider_base_url, provider_api_key,
                provider_wire_api)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
         ON CONFLICT(id) DO UPDATE SET
                created_at = excluded.created_at,
                last_activity_at = excluded.last_activity_at,
                message_count = excluded.message_count,
                summary = excluded.summary,
                model = excluded.model,
                streaming = excluded.streaming,
                system_message_mode = excluded.system_message_mode,
                system_message_content = excluded.system_message_content,
                available_tools_json = excluded.available_tools_json,
                excluded_tools_json = excluded.excluded_tools_json,
                provider_type = excluded.provider_type,
                provider_base_url = excluded.provider_base_url,
                provider_api_key = excluded.provider_api_key,
                provider_wire_api = excluded.provider_wire_api",
        params![
            metadata.session_id,
            ts(&metadata.created_at),
            ts(&metadata.last_activity_at),
            i64::try_from(metadata.message_count).unwrap_or(i64::MAX),
            metadata.summary,
            config.model,
            config.streaming,
            mode,
            content,
            serde_json::to_string(&config.available_tools)?,
            serde_json::to_string(&config.excluded_tools)?,
            provider.map(|p| p.provider_type.as_str()),
            provider.and_then(|p| p.base_url.as_deref()),
            provider.and_then(|p| p.api_key.as_deref()),
            provider.and_then(|p| p.wire_api.as_deref()),
        ],
    )
    .with_context(|| format!("Failed to upsert session {}", metadata.session_id))?;
    Ok(())
}

fn replace_tools(conn: &Connection, session_id: &str, tools: &[ToolDefinition]) -> Result<()> {
    conn.execute(
        "DELETE FROM tool_definitions WHERE session_id = ?1",
        params![session_id],
    )?;
    for (position, tool) in tools.iter().enumerate() {
        conn.execute(
            "INSERT INTO tool_definitions (session_id, position, name, description)
             VALUES (?1, ?2, ?3, ?4)",
            params![session_id, position as i64, tool.name, tool.description],
        )
        .with_context(|| format!("Failed to store tool definition {}", tool.name))?;
        let tool_id = conn.last_insert_rowid();
        for (param_position, param) in tool.parameters.iter().enumerate() {
            conn.execute(
                "INSERT INTO tool_parameters
                    (tool_id, position, name, param_type, description, required, enum_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    tool_id,
                    param_position as i64,
                    param.name,
                    param.param_type.as_str(),
                    param.description,
                    param.required,
                    serde_json::to_string(&param.enum_values)?,
                ],
            )?;
        }
    }
    Ok(())
}

fn load_tools(conn: &Connection, session_id: &str) -> Result<Vec<ToolDefinition>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, description FROM tool_definitions
         WHERE session_id = ?1 ORDER BY position ASC",
    )?;
    let rows = stmt
        .query_map(params![session_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut param_stmt = conn.prepare(
        "SELECT name, param_type, description, required, enum_json FROM tool_parameters
         WHERE tool_id = ?1 ORDER BY position ASC",
    )?;
    let mut tools = Vec::with_capacity(rows.len());
    for (tool_id, name, description) in rows {
        let raw_params = param_stmt
            .query_map(params![tool_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, bool>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut parameters = Vec::with_capacity(raw_params.len());
        for (param_name, param_type, param_description, required, enum_json) in raw_params {
            parameters.push(ToolParameter {
                param_type: ToolParameterType::from_str_opt(&param_type)
                    .with_context(|| format!("Unknown tool parameter type: {param_type}"))?,
                name: param_name,
                description: param_description,
                required,
                enum_values: serde_json::from_str(&enum_json).context("Invalid enum_json")?,
            });
        }
        tools.push(ToolDefinition {
            name,
            description,
            parameters,
        });
    }
    Ok(tools)
}

fn load_metadata_row(conn: &Connection, session_id: &str) -> Result<Option<SessionMetadata>> {
    let row = conn
        .query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
            params![session_id],
            session_row,
        )
        .optional()?;
    match row {
        Some(row) => {
            let tools = load_tools(conn, session_id)?;
            Ok(Some(row.into_metadata(tools)?))
        }
        None => Ok(None),
    }
}

fn load_all_metadata_rows(conn: &Connection) -> Result<Vec<SessionMetadata>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY created_at DESC, id ASC"
    ))?;
    let rows = stmt
        .query_map([], session_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    let mut all = Vec::with_capacity(rows.len());
    for row in rows {
        let tools = load_tools(conn, &row.id)?;
        all.push(row.into_metadata(tools)?);
    }
    Ok(all)
}

struct MessageRow {
    message_id: String,
    timestamp: String,
    role: String,
    content: String,
    transformed_content: Option<String>,
    tool_call_id: Option<String>,
    tool_name: Option<String>,
    tool_result: Option<String>,
    tool_error: Option<String>,
    reasoning_content: Option<String>,
    attachments_json: String,
    tool_requests_json: String,
}

impl MessageRow {
    fn into_message(self) -> Result<Message> {
        Ok(Message {
            id: uuid::Uuid::parse_str(&self.message_id)
                .with_context(|| format!("Invalid stored message id: {}", self.message_id))?,
            timestamp: parse_ts(&self.timestamp)?,
            role: MessageRole::from_str_opt(&self.role)
                .with_context(|| format!("Unknown message role: {}", self.role))?,
            content: self.content,
            transformed_content: self.transformed_content,
            tool_call_id: self.tool_call_id,
            tool_name: self.tool_name,
            tool_result: self.tool_result,
            tool_error: self.tool_error,
            reasoning_content: self.reasoning_content,
            attachments: serde_json::from_str(&self.attachments_json)
                .context("Invalid attachments_json")?,
            tool_requests: serde_json::from_str(&self.tool_requests_json)
                .context("Invalid tool_requests_json")?,
        })
    }
}

fn load_messages(conn: &Connection, session_id: &str) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(
        "SELECT message_id, timestamp, role, content, transformed_content, tool_call_id,
                tool_name, tool_result, tool_error, reasoning_content, attachments_json,
                tool_requests_json
         FROM messages WHERE session_id = ?1 ORDER BY position ASC",
    )?;
    let rows = stmt
        .query_map(params![session_id], |row| {
            Ok(MessageRow {
                message_id: row.get(0)?,
                timestamp: row.get(1)?,
                role: row.get(2)?,
                content: row.get(3)?,
                transformed_content: row.get(4)?,
                tool_call_id: row.get(5)?,
                tool_name: row.get(6)?,
                tool_result: row.get(7)?,
                tool_error: row.get(8)?,
                reasoning_content: row.get(9)?,
                attachments_json: row.get(10)?,
                tool_requests_json: row.get(11)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(MessageRow::into_message).collect()
}

/// Insert `messages` after the current tail.
fn insert_messages(conn: &Connection, session_id: &str, messages: &[Message]) -> Result<()> {
    let mut next: i64 = conn.query_row(
        "SELECT COALESCE(MAX(position) + 1, 0) FROM messages WHERE session_id = ?1",
        params![session_id],
        |row| row.get(0),
    )?;
    let mut stmt = conn.prepare(
        "INSERT INTO messages (message_id, session_id, position, timestamp, role, content,
                transformed_content, tool_call_id, tool_name, tool_result, tool_error,
                reasoning_content, attachments_json, tool_requests_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
    )?;
    for message in messages {
        stmt.execute(params![
            message.id.to_string(),
            session_id,
            next,
            ts(&message.timestamp),
            message.role.as_str(),
            message.content,
            message.transformed_content,
            message.tool_call_id,
            message.tool_name,
            message.tool_result,
            message.tool_error,
            message.reasoning_content,
            serde_json::to_string(&message.attachments)?,
            serde_json::to_string(&message.tool_requests)?,
        ])
        .with_context(|| format!("Failed to insert message {} for {session_id}", message.id))?;
        next += 1;
    }
    Ok(())
}

fn session_exists(conn: &Connection, session_id: &str) -> Result<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM sessions WHERE id = ?1",
            params![session_id],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn save_client_config(&self, config: &ClientConfig) -> Result<()> {
        let config = config.clone();
        self.run_blocking(move |conn| {
            conn.execute(
                "INSERT INTO client_config (id, cli_path, cli_url, port, transport, log_level,
                        auto_start, auto_restart, cwd, environment_json)
                 VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET
                        cli_path = excluded.cli_path,
                        cli_url = excluded.cli_url,
                        port = excluded.port,
                        transport = excluded.transport,
                        log_level = excluded.log_level,
                        auto_start = excluded.auto_start,
                        auto_restart = excluded.auto_restart,
                        cwd = excluded.cwd,
                        environment_json = excluded.environment_json",
                params![
                    config.cli_path,
                    config.cli_url,
                    config.port,
                    config.transport.as_str(),
                    config.log_level,
                    config.auto_start,
                    config.auto_restart,
                    config.cwd,
                    serde_json::to_string(&config.environment)?,
                ],
            )
            .context("Failed to save client config")?;
            Ok(())
        })
        .await
    }

    async fn load_client_config(&self) -> Result<Option<ClientConfig>> {
        self.run_blocking(|conn| {
            let row = conn
                .query_row(
                    "SELECT cli_path, cli_url, port, transport, log_level, auto_start,
                            auto_restart, cwd, environment_json
                     FROM client_config WHERE id = 1",
                    [],
                    |row| {
                        Ok((
                            row.get::<_, Option<String>>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, u16>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, bool>(5)?,
                            row.get::<_, bool>(6)?,
                            row.get::<_, Option<String>>(7)?,
                            row.get::<_, String>(8)?,
                        ))
                    },
                )
                .optional()
                .context("Failed to load client config")?;

            let Some((cli_path, cli_url, port, transport, log_level, auto_start, auto_restart, cwd, env)) =
                row
            else {
                return Ok(None);
            };
            Ok(Some(ClientConfig {
                cli_path,
                cli_url,
                port,
                transport: TransportMode::from_str_opt(&transport)
                    .with_context(|| format!("Unknown transport mode: {transport}"))?,
                log_level,
                auto_start,
                auto_restart,
                cwd,
                environment: serde_json::from_str(&env).context("Invalid environment_json")?,
            }))
        })
        .await
    }

    async fn save_session(&self, record: &SessionRecord, messages: MessageWrite) -> Result<()> {
        let record = record.clone();
        self.run_blocking(move |conn| {
            let tx = conn.transaction()?;
            let session_id = record.metadata.session_id.as_str();
            upsert_session(&tx, &record.metadata)?;
            replace_tools(&tx, session_id, &record.metadata.config.tools)?;
            match messages {
                MessageWrite::Keep => {}
                MessageWrite::Replace => {
                    tx.execute(
                        "DELETE FROM messages WHERE session_id = ?1",
                        params![session_id],
                    )?;
                    insert_messages(&tx, session_id, &record.messages)?;
                }
                MessageWrite::Append => {
                    insert_messages(&tx, session_id, &record.messages)?;
                }
            }
            tx.commit()
                .with_context(|| format!("Failed to commit session {session_id}"))?;
            Ok(())
        })
        .await
    }

    async fn load_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let session_id = session_id.to_string();
        self.run_blocking(move |conn| {
            let Some(metadata) = load_metadata_row(conn, &session_id)? else {
                return Ok(None);
            };
            let messages = load_messages(conn, &session_id)?;
            Ok(Some(SessionRecord { metadata, messages }))
        })
        .await
    }

    async fn load_all_sessions(&self) -> Result<Vec<SessionRecord>> {
        self.run_blocking(|conn| {
            let mut records = Vec::new();
            for metadata in load_all_metadata_rows(conn)? {
                let messages = load_messages(conn, &metadata.session_id)?;
                records.push(SessionRecord { metadata, messages });
            }
            Ok(records)
        })
        .await
    }

    async fn load_metadata(&self, session_id: &str) -> Result<Option<SessionMetadata>> {
        let session_id = session_id.to_string();
        self.run_blocking(move |conn| load_metadata_row(conn, &session_id))
            .await
    }

    async fn load_all_metadata(&self) -> Result<Vec<SessionMetadata>> {
        self.run_blocking(|conn| load_all_metadata_rows(conn)).await
    }

    async fn delete_session(&self, session_id: &str) -> Result<bool> {
        let session_id = session_id.to_string();
        self.run_blocking(move |conn| {
            let removed = conn
                .execute("DELETE FROM sessions WHERE id = ?1", params![session_id])
                .with_context(|| format!("Failed to delete session {session_id}"))?;
            Ok(removed > 0)
        })
        .await
    }

    async fn session_exists(&self, session_id: &str) -> Result<bool> {
        let session_id = session_id.to_string();
        self.run_blocking(move |conn| session_exists(conn, &session_id))
            .await
    }

    async fn list_session_ids(&self) -> Result<Vec<String>> {
        self.run_blocking(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM sessions ORDER BY id ASC")?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(ids)
        })
        .await
    }

    async fn append_messages(&self, session_id: &str, messages: &[Message]) -> Result<()> {
        let session_id = session_id.to_string();
        let messages = messages.to_vec();
        self.run_blocking(move |conn| {
            let tx = conn.transaction()?;
            if !session_exists(&tx, &session_id)? {
                bail!("Cannot append messages to unknown session {session_id}");
            }
            insert_messages(&tx, &session_id, &messages)?;
            let added = i64::try_from(messages.len()).unwrap_or(i64::MAX);
            tx.execute(
                "UPDATE sessions SET message_count = message_count + ?1 WHERE id = ?2",
                params![added, session_id],
            )?;
            tx.commit()
                .with_context(|| format!("Failed to commit messages for {session_id}"))?;
            Ok(())
        })
        .await
    }

    async fn get_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        let session_id = session_id.to_string();
        self.run_blocking(move |conn| load_messages(conn, &session_id))
            .await
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}
