use confab_common::{Error, Result};
use rusqlite::Connection;
use rusqlite::params;
use std::path::Path;
use tracing::{info, warn};

/// Persisted message row loaded from the thread store.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub role: String,
    pub content: String,
    pub tool_name: Option<String>,
    pub tool_calls: Option<serde_json::Value>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Point-in-time view of one thread: display name plus full ordered history.
#[derive(Debug, Clone)]
pub struct ThreadSnapshot {
    pub name: Option<String>,
    pub messages: Vec<StoredMessage>,
}

/// One row of the thread listing.
#[derive(Debug, Clone)]
pub struct ThreadSummary {
    pub id: String,
    pub name: Option<String>,
}

/// Persistent storage for conversation threads and their message history.
///
/// Messages are append-only; ordering is the insertion order (rowid). The
/// first write against an unknown thread id creates the thread row, so
/// callers never have to create threads explicitly.
pub struct ThreadStore {
    conn: Connection,
}

impl ThreadStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening thread store at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        let store = Self { conn };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

        let store = Self { conn };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS threads (
                    id TEXT PRIMARY KEY,
                    name TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS messages (
                    id TEXT PRIMARY KEY,
                    thread_id TEXT NOT NULL REFERENCES threads(id),
                    role TEXT NOT NULL,
                    content TEXT NOT NULL,
                    tool_name TEXT,
                    tool_calls TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_messages_thread
                    ON messages(thread_id);",
            )
            .map_err(|e| Error::Database(format!("migration failed: {e}")))?;
        Ok(())
    }

    fn ensure_thread(&self, thread_id: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO threads (id) VALUES (?1)",
                params![thread_id],
            )
            .map_err(|e| Error::Database(format!("failed to create thread: {e}")))?;
        Ok(())
    }

    /// Append a single message to a thread, creating the thread if needed.
    pub fn append_message(
        &self,
        thread_id: &str,
        role: &str,
        content: &str,
        tool_name: Option<&str>,
        tool_calls: Option<&serde_json::Value>,
        timestamp: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        self.ensure_thread(thread_id)?;

        let message_id = uuid::Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO messages (id, thread_id, role, content, tool_name, tool_calls, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    message_id,
                    thread_id,
                    role,
                    content,
                    tool_name,
                    tool_calls.map(|v| v.to_string()),
                    timestamp.to_rfc3339(),
                ],
            )
            .map_err(|e| Error::Database(format!("failed to append message: {e}")))?;
        Ok(())
    }

    /// Load the current persisted state of a thread in insertion order.
    ///
    /// An unknown thread id yields an empty history and no name rather than
    /// an error.
    pub fn snapshot(&self, thread_id: &str) -> Result<ThreadSnapshot> {
        let name: Option<String> = match self.conn.query_row(
            "SELECT name FROM threads WHERE id = ?1",
            params![thread_id],
            |row| row.get(0),
        ) {
            Ok(name) => name,
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(Error::Database(format!("failed to load thread: {e}"))),
        };

        let mut stmt = self
            .conn
            .prepare(
                "SELECT role, content, tool_name, tool_calls, created_at
                 FROM messages
                 WHERE thread_id = ?1
                 ORDER BY rowid ASC",
            )
            .map_err(|e| Error::Database(format!("failed to prepare message query: {e}")))?;

        let rows = stmt
            .query_map(params![thread_id], |row| {
                let tool_calls_raw: Option<String> = row.get(3)?;
                let timestamp_raw: String = row.get(4)?;
                Ok(StoredMessage {
                    role: row.get(0)?,
                    content: row.get(1)?,
                    tool_name: row.get(2)?,
                    tool_calls: tool_calls_raw.and_then(|s| serde_json::from_str(&s).ok()),
                    timestamp: parse_timestamp(&timestamp_raw),
                })
            })
            .map_err(|e| Error::Database(format!("failed to load messages: {e}")))?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(
                row.map_err(|e| Error::Database(format!("failed to read message row: {e}")))?,
            );
        }

        Ok(ThreadSnapshot { name, messages })
    }

    /// Enumerate every thread ever persisted, oldest first.
    pub fn list_threads(&self) -> Result<Vec<ThreadSummary>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name FROM threads ORDER BY rowid ASC")
            .map_err(|e| Error::Database(format!("failed to prepare thread query: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(ThreadSummary {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })
            .map_err(|e| Error::Database(format!("failed to list threads: {e}")))?;

        let mut threads = Vec::new();
        for row in rows {
            threads
                .push(row.map_err(|e| Error::Database(format!("failed to read thread row: {e}")))?);
        }
        Ok(threads)
    }

    /// Set the display name of a thread iff it has never been named.
    /// A second call with a different name is a silent no-op.
    pub fn set_name_once(&self, thread_id: &str, name: &str) -> Result<()> {
        self.ensure_thread(thread_id)?;

        let updated = self
            .conn
            .execute(
                "UPDATE threads SET name = ?2 WHERE id = ?1 AND name IS NULL",
                params![thread_id, name],
            )
            .map_err(|e| Error::Database(format!("failed to set thread name: {e}")))?;

        if updated == 0 {
            warn!("thread {} already named, keeping existing name", thread_id);
        }
        Ok(())
    }
}

fn parse_timestamp(value: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(|e| {
            warn!(
                "failed to parse timestamp '{}': {e}, falling back to now",
                value
            );
            chrono::Utc::now()
        })
}

#[cfg(test)]
mod tests {
    use super::ThreadStore;
    use serde_json::json;

    fn append_text(store: &ThreadStore, thread_id: &str, role: &str, content: &str) {
        store
            .append_message(thread_id, role, content, None, None, chrono::Utc::now())
            .expect("append should succeed");
    }

    #[test]
    fn append_and_snapshot_round_trip() {
        let store = ThreadStore::in_memory().expect("in-memory store should open");

        append_text(&store, "t1", "user", "hello");
        append_text(&store, "t1", "assistant", "hi there");

        let snapshot = store.snapshot("t1").expect("snapshot should succeed");
        assert!(snapshot.name.is_none());
        assert_eq!(snapshot.messages.len(), 2);
        assert_eq!(snapshot.messages[0].role, "user");
        assert_eq!(snapshot.messages[0].content, "hello");
        assert_eq!(snapshot.messages[1].role, "assistant");
        assert_eq!(snapshot.messages[1].content, "hi there");
    }

    #[test]
    fn snapshot_of_unknown_thread_is_empty() {
        let store = ThreadStore::in_memory().expect("in-memory store should open");

        let snapshot = store
            .snapshot("never-seen")
            .expect("unknown thread should not error");
        assert!(snapshot.name.is_none());
        assert!(snapshot.messages.is_empty());
    }

    #[test]
    fn history_is_append_only_and_ordered() {
        let store = ThreadStore::in_memory().expect("in-memory store should open");

        let mut previous_len = 0;
        for i in 0..5 {
            append_text(&store, "t1", "user", &format!("msg-{i}"));
            let len = store.snapshot("t1").unwrap().messages.len();
            assert!(len > previous_len, "history length must be non-decreasing");
            previous_len = len;
        }

        let messages = store.snapshot("t1").unwrap().messages;
        for (i, msg) in messages.iter().enumerate() {
            assert_eq!(msg.content, format!("msg-{i}"));
        }
    }

    #[test]
    fn tool_call_round_trip_preserves_structure() {
        let store = ThreadStore::in_memory().expect("in-memory store should open");

        let calls = json!([{
            "id": "call-1",
            "name": "calculator",
            "arguments": {"first_num": 12.0, "second_num": 4.0, "operation": "div"}
        }]);
        store
            .append_message("t1", "assistant", "", None, Some(&calls), chrono::Utc::now())
            .unwrap();
        store
            .append_message(
                "t1",
                "tool",
                r#"{"result":3.0}"#,
                Some("calculator"),
                None,
                chrono::Utc::now(),
            )
            .unwrap();

        let messages = store.snapshot("t1").unwrap().messages;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].tool_calls.as_ref(), Some(&calls));
        assert_eq!(messages[1].tool_name.as_deref(), Some("calculator"));
        assert_eq!(messages[1].content, r#"{"result":3.0}"#);
    }

    #[test]
    fn set_name_once_keeps_first_name() {
        let store = ThreadStore::in_memory().expect("in-memory store should open");
        append_text(&store, "t1", "user", "hello");

        store.set_name_once("t1", "First name").unwrap();
        store.set_name_once("t1", "Second name").unwrap();

        let snapshot = store.snapshot("t1").unwrap();
        assert_eq!(snapshot.name.as_deref(), Some("First name"));
    }

    #[test]
    fn set_name_once_on_unknown_thread_creates_it() {
        let store = ThreadStore::in_memory().expect("in-memory store should open");
        store.set_name_once("fresh", "A name").unwrap();

        let threads = store.list_threads().unwrap();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].id, "fresh");
        assert_eq!(threads[0].name.as_deref(), Some("A name"));
    }

    #[test]
    fn list_threads_enumerates_all() {
        let store = ThreadStore::in_memory().expect("in-memory store should open");

        append_text(&store, "t1", "user", "a");
        append_text(&store, "t2", "user", "b");
        append_text(&store, "t1", "assistant", "c");

        let threads = store.list_threads().unwrap();
        let ids: Vec<&str> = threads.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2"]);
    }

    #[test]
    fn store_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir should create");
        let path = dir.path().join("threads.db");

        {
            let store = ThreadStore::open(&path).expect("store should open");
            append_text(&store, "t1", "user", "persist me");
            store.set_name_once("t1", "Durable thread").unwrap();
        }

        let store = ThreadStore::open(&path).expect("store should reopen");
        let snapshot = store.snapshot("t1").unwrap();
        assert_eq!(snapshot.name.as_deref(), Some("Durable thread"));
        assert_eq!(snapshot.messages.len(), 1);
        assert_eq!(snapshot.messages[0].content, "persist me");
    }
}
