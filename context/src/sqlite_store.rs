//! SQLite-backed session store.
//!
//! Two tables: `sessions` holds identity, status and the full configuration
//! (stop sequences as a JSON array); `session_messages` holds every message
//! ever recorded, flagged active or evicted and ordered by position within
//! each list. `save` rewrites both inside one transaction.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Transaction, params};

use colloquy_types::{
    GenerationParams, Message, MessageId, ModelDescriptor, NonEmptyString, RawGenerationParams, Role,
    SessionConfig, SessionId, SessionStatus,
};

use crate::session::Session;
use crate::sqlite_util::{iso8601_to_system_time, open_secure_db, system_time_to_iso8601};
use crate::store::{SessionStore, StoreError};

const SCHEMA: &str = r"
    CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY,
        owner_id TEXT NOT NULL,
        status TEXT NOT NULL,
        model TEXT NOT NULL,
        model_max_tokens INTEGER NOT NULL,
        temperature REAL NOT NULL,
        top_p REAL NOT NULL,
        candidate_count INTEGER NOT NULL,
        stop_sequences TEXT NOT NULL,
        max_output_tokens INTEGER NOT NULL,
        presence_penalty REAL NOT NULL,
        frequency_penalty REAL NOT NULL,
        token_usage INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS session_messages (
        id TEXT PRIMARY KEY,
        session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
        position INTEGER NOT NULL,
        evicted INTEGER NOT NULL,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        token_count INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        UNIQUE(session_id, evicted, position)
    );

    CREATE INDEX IF NOT EXISTS idx_session_messages_session
    ON session_messages(session_id, evicted, position);
";

pub struct SqliteSessionStore {
    db: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSessionStore").finish_non_exhaustive()
    }
}

/// Raw `sessions` row, decoded into domain types outside the rusqlite closure
/// so bad values surface as [`StoreError::Corrupt`].
struct SessionRow {
    owner_id: String,
    status: String,
    model: String,
    model_max_tokens: i64,
    temperature: f64,
    top_p: f64,
    candidate_count: i64,
    stop_sequences: String,
    max_output_tokens: i64,
    presence_penalty: f64,
    frequency_penalty: f64,
    token_usage: i64,
}

struct MessageRow {
    id: String,
    evicted: bool,
    role: String,
    content: String,
    token_count: i64,
    created_at: String,
}

impl SqliteSessionStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db = open_secure_db(path)?;
        let store = Self::initialize(db)?;
        tracing::info!(path = %path.display(), "Opened session store");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::initialize(db)
    }

    fn initialize(db: Connection) -> Result<Self> {
        db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL; PRAGMA foreign_keys=ON;")
            .context("Failed to set pragmas")?;
        db.execute_batch(SCHEMA)
            .context("Failed to create schema")?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.db.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl SessionStore for SqliteSessionStore {
    fn create(&self, session: &Session) -> Result<(), StoreError> {
        let id = session.id();
        let mut db = self.lock()?;
        let tx = db
            .transaction()
            .context("Failed to start create transaction")?;

        let exists = tx
            .query_row(
                "SELECT 1 FROM sessions WHERE id = ?1",
                params![id.to_string()],
                |_| Ok(()),
            )
            .optional()
            .context("Failed to check for existing session")?
            .is_some();
        if exists {
            return Err(StoreError::AlreadyExists(id));
        }

        let now = system_time_to_iso8601(SystemTime::now());
        upsert_session_row(&tx, session, &now)?;
        insert_messages(&tx, session)?;
        tx.commit()
            .context("Failed to commit create transaction")?;

        tracing::debug!(session_id = %id, "Created session row");
        Ok(())
    }

    fn find_by_id(&self, id: &SessionId) -> Result<Session, StoreError> {
        let db = self.lock()?;
        let key = id.to_string();

        let row = db
            .query_row(
                "SELECT owner_id, status, model, model_max_tokens, temperature, top_p,
                        candidate_count, stop_sequences, max_output_tokens,
                        presence_penalty, frequency_penalty, token_usage
                 FROM sessions WHERE id = ?1",
                params![key],
                |row| {
                    Ok(SessionRow {
                        owner_id: row.get(0)?,
                        status: row.get(1)?,
                        model: row.get(2)?,
                        model_max_tokens: row.get(3)?,
                        temperature: row.get(4)?,
                        top_p: row.get(5)?,
                        candidate_count: row.get(6)?,
                        stop_sequences: row.get(7)?,
                        max_output_tokens: row.get(8)?,
                        presence_penalty: row.get(9)?,
                        frequency_penalty: row.get(10)?,
                        token_usage: row.get(11)?,
                    })
                },
            )
            .optional()
            .with_context(|| format!("Failed to load session {id}"))?
            .ok_or(StoreError::NotFound(*id))?;

        let mut stmt = db
            .prepare(
                "SELECT id, evicted, role, content, token_count, created_at
                 FROM session_messages
                 WHERE session_id = ?1
                 ORDER BY evicted DESC, position ASC",
            )
            .context("Failed to prepare message query")?;
        let messages = stmt
            .query_map(params![key], |row| {
                Ok(MessageRow {
                    id: row.get(0)?,
                    evicted: row.get(1)?,
                    role: row.get(2)?,
                    content: row.get(3)?,
                    token_count: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })
            .context("Failed to query session messages")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read session messages")?;

        decode_session(*id, row, messages)
    }

    fn save(&self, session: &Session) -> Result<(), StoreError> {
        let id = session.id();
        let mut db = self.lock()?;
        let tx = db
            .transaction()
            .context("Failed to start save transaction")?;

        let now = system_time_to_iso8601(SystemTime::now());
        upsert_session_row(&tx, session, &now)?;
        tx.execute(
            "DELETE FROM session_messages WHERE session_id = ?1",
            params![id.to_string()],
        )
        .with_context(|| format!("Failed to clear messages for session {id}"))?;
        insert_messages(&tx, session)?;
        tx.commit()
            .context("Failed to commit save transaction")?;

        tracing::debug!(
            session_id = %id,
            active = session.buffer().active().len(),
            evicted = session.buffer().evicted().len(),
            "Saved session"
        );
        Ok(())
    }
}

fn upsert_session_row(tx: &Transaction<'_>, session: &Session, now: &str) -> Result<()> {
    let config = session.config();
    let params = config.params();
    let stop_sequences = serde_json::to_string(params.stop_sequences())
        .context("Failed to encode stop sequences")?;

    tx.execute(
        "INSERT INTO sessions (
            id, owner_id, status, model, model_max_tokens, temperature, top_p,
            candidate_count, stop_sequences, max_output_tokens, presence_penalty,
            frequency_penalty, token_usage, created_at, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
         ON CONFLICT(id) DO UPDATE SET
            owner_id = excluded.owner_id,
            status = excluded.status,
            model = excluded.model,
            model_max_tokens = excluded.model_max_tokens,
            temperature = excluded.temperature,
            top_p = excluded.top_p,
            candidate_count = excluded.candidate_count,
            stop_sequences = excluded.stop_sequences,
            max_output_tokens = excluded.max_output_tokens,
            presence_penalty = excluded.presence_penalty,
            frequency_penalty = excluded.frequency_penalty,
            token_usage = excluded.token_usage,
            updated_at = excluded.updated_at",
        params![
            session.id().to_string(),
            session.owner_id(),
            session.status().as_str(),
            config.model().name(),
            i64::from(config.model().max_tokens()),
            f64::from(params.temperature()),
            f64::from(params.top_p()),
            i64::from(params.candidate_count()),
            stop_sequences,
            i64::from(params.max_output_tokens()),
            f64::from(params.presence_penalty()),
            f64::from(params.frequency_penalty()),
            i64::try_from(session.buffer().token_usage()).unwrap_or(i64::MAX),
            now,
        ],
    )
    .with_context(|| format!("Failed to write session {}", session.id()))?;
    Ok(())
}

fn insert_messages(tx: &Transaction<'_>, session: &Session) -> Result<()> {
    let mut stmt = tx
        .prepare(
            "INSERT INTO session_messages
                (id, session_id, position, evicted, role, content, token_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .context("Failed to prepare message insert")?;

    let session_id = session.id().to_string();
    let buffer = session.buffer();
    let lists = [(false, buffer.active()), (true, buffer.evicted())];
    for (evicted, messages) in lists {
        for (position, message) in messages.iter().enumerate() {
            stmt.execute(params![
                message.id().to_string(),
                session_id,
                position as i64,
                evicted,
                message.role().as_str(),
                message.content(),
                i64::from(message.token_count()),
                system_time_to_iso8601(message.created_at()),
            ])
            .with_context(|| format!("Failed to insert message {}", message.id()))?;
        }
    }
    Ok(())
}

fn corrupt(id: SessionId, reason: impl Into<String>) -> StoreError {
    StoreError::Corrupt {
        id,
        reason: reason.into(),
    }
}

fn to_u32(id: SessionId, column: &str, value: i64) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| corrupt(id, format!("{column} out of range: {value}")))
}

fn decode_session(
    id: SessionId,
    row: SessionRow,
    messages: Vec<MessageRow>,
) -> Result<Session, StoreError> {
    let owner_id =
        NonEmptyString::new(row.owner_id).map_err(|_| corrupt(id, "owner id is empty"))?;
    let status = SessionStatus::parse(&row.status).map_err(|e| corrupt(id, e.to_string()))?;

    let stop_sequences: Vec<String> = serde_json::from_str(&row.stop_sequences)
        .map_err(|e| corrupt(id, format!("stop sequences are not a JSON string array: {e}")))?;
    let model = ModelDescriptor::new(
        row.model,
        to_u32(id, "model_max_tokens", row.model_max_tokens)?,
    )
    .map_err(|e| corrupt(id, e.to_string()))?;
    let params = GenerationParams::try_from(RawGenerationParams {
        temperature: row.temperature as f32,
        top_p: row.top_p as f32,
        candidate_count: to_u32(id, "candidate_count", row.candidate_count)?,
        stop_sequences,
        max_output_tokens: to_u32(id, "max_output_tokens", row.max_output_tokens)?,
        presence_penalty: row.presence_penalty as f32,
        frequency_penalty: row.frequency_penalty as f32,
    })
    .map_err(|e| corrupt(id, e.to_string()))?;
    let config = SessionConfig::new(model, params);

    let mut active = Vec::new();
    let mut evicted = Vec::new();
    for m in messages {
        let message_id = m
            .id
            .parse::<MessageId>()
            .map_err(|e| corrupt(id, format!("message id '{}': {e}", m.id)))?;
        let role = Role::parse(&m.role).map_err(|e| corrupt(id, e.to_string()))?;
        let created_at = iso8601_to_system_time(&m.created_at)
            .ok_or_else(|| corrupt(id, format!("message timestamp '{}'", m.created_at)))?;
        let message = Message::restore(
            message_id,
            role,
            m.content,
            to_u32(id, "token_count", m.token_count)?,
            created_at,
        );
        if m.evicted {
            evicted.push(message);
        } else {
            active.push(message);
        }
    }

    let session = Session::restore(id, owner_id, status, config, active, evicted)
        .map_err(|e| corrupt(id, e.to_string()))?;
    let usage = session.buffer().token_usage();
    if i64::try_from(usage).ok() != Some(row.token_usage) {
        return Err(corrupt(
            id,
            format!(
                "stored token usage {} does not match active messages ({usage})",
                row.token_usage
            ),
        ));
    }
    Ok(session)
}
