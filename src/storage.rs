use crate::error::{ChatError, Result};
use crate::models::Session;
use async_trait::async_trait;
use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePoolOptions, Sqlite, SqlitePool};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;

/// Key under which the serialized session list is stored.
pub const SESSIONS_KEY: &str = "xantium-ai-chats";

// Key-value table; each key holds one whole serialized value.
const MIGRATIONS_SQL: &str = "
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
";

/// Process-wide key-value persistence. Writes replace the whole value.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<String>>;
    async fn save(&self, key: &str, value: &str) -> Result<()>;
}

#[derive(Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if needed) the database file and runs migrations.
    pub async fn new(db_path: &Path) -> Result<Self> {
        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    ChatError::Storage(format!("failed to create database directory: {}", e))
                })?;
            }
        }

        let db_url = format!("sqlite://{}?mode=rwc", db_path.to_string_lossy());
        log::info!("Connecting to database: {}", db_url);

        if !Sqlite::database_exists(&db_url).await.unwrap_or(false) {
            log::info!("Database file not found, creating...");
            Sqlite::create_database(&db_url).await?;
        }

        let pool = SqlitePoolOptions::new().connect(&db_url).await?;
        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Private in-memory database. A single connection that never expires keeps
    /// the data alive for the lifetime of the store.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect("sqlite::memory:")
            .await?;
        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<()> {
        log::info!("Running database migrations...");
        sqlx::query(MIGRATIONS_SQL).execute(pool).await?;
        log::info!("Database migrations completed.");
        Ok(())
    }
}

#[async_trait]
impl PersistentStore for SqliteStore {
    async fn load(&self, key: &str) -> Result<Option<String>> {
        log::debug!("Loading value for key '{}'", key);
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn save(&self, key: &str, value: &str) -> Result<()> {
        log::debug!("Saving {} bytes under key '{}'", value.len(), key);
        sqlx::query(
            r#"
            INSERT INTO settings (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// In-memory store used in tests and when nothing has to survive the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(key: &str, value: &str) -> Self {
        let mut values = HashMap::new();
        values.insert(key.to_string(), value.to_string());
        Self {
            values: Mutex::new(values),
        }
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn save(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Reads the session list. A missing value or one that is not a JSON array
/// yields an empty list; individual unreadable sessions are skipped.
pub async fn load_sessions(store: &dyn PersistentStore, key: &str) -> Result<Vec<Session>> {
    let Some(raw) = store.load(key).await? else {
        log::info!("No stored sessions under '{}', starting empty", key);
        return Ok(Vec::new());
    };

    let records: Vec<serde_json::Value> = match serde_json::from_str(&raw) {
        Ok(records) => records,
        Err(e) => {
            log::warn!("Stored sessions under '{}' are malformed, ignoring them: {}", key, e);
            return Ok(Vec::new());
        }
    };

    // A single unreadable record must not take the rest of the history with it.
    let mut sessions = Vec::with_capacity(records.len());
    for (index, record) in records.into_iter().enumerate() {
        match serde_json::from_value::<Session>(record) {
            Ok(session) => sessions.push(session),
            Err(e) => log::warn!("Skipping unreadable stored session #{}: {}", index, e),
        }
    }

    let mut seen = HashSet::new();
    let total = sessions.len();
    let sessions: Vec<Session> = sessions
        .into_iter()
        .filter(|s| seen.insert(s.id.clone()))
        .collect();
    if sessions.len() != total {
        log::warn!("Dropped {} sessions with duplicate ids", total - sessions.len());
    }

    log::info!("Loaded {} sessions", sessions.len());
    Ok(sessions)
}

pub async fn save_sessions(store: &dyn PersistentStore, key: &str, sessions: &[Session]) -> Result<()> {
    let raw = serde_json::to_string(sessions)?;
    store.save(key, &raw).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Message, Profile};

    fn sample_sessions() -> Vec<Session> {
        let mut first = Session::new();
        first.messages.push(Message::user("Hallo Welt", None));
        first.derive_title();
        let mut reply = Message::placeholder();
        reply.text = "Hallo!".into();
        first.messages.push(reply);

        let mut second = Session::new();
        second.profile = Profile::Fast;
        second
            .messages
            .push(Message::user("", Some("data:image/jpeg;base64,/9j/".into())));
        vec![second, first]
    }

    #[tokio::test]
    async fn sqlite_store_round_trips_sessions() {
        let store = SqliteStore::in_memory().await.unwrap();
        let sessions = sample_sessions();

        save_sessions(&store, SESSIONS_KEY, &sessions).await.unwrap();
        let loaded = load_sessions(&store, SESSIONS_KEY).await.unwrap();

        assert_eq!(loaded, sessions);
    }

    #[tokio::test]
    async fn sqlite_store_replaces_whole_value() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.save("k", "one").await.unwrap();
        store.save("k", "two").await.unwrap();
        assert_eq!(store.load("k").await.unwrap().as_deref(), Some("two"));
        assert_eq!(store.load("other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn sqlite_store_persists_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("chats.sqlite");

        {
            let store = SqliteStore::new(&path).await.unwrap();
            save_sessions(&store, SESSIONS_KEY, &sample_sessions()).await.unwrap();
        }

        let reopened = SqliteStore::new(&path).await.unwrap();
        let loaded = load_sessions(&reopened, SESSIONS_KEY).await.unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[tokio::test]
    async fn missing_or_malformed_value_loads_as_empty() {
        let empty = MemoryStore::new();
        assert!(load_sessions(&empty, SESSIONS_KEY).await.unwrap().is_empty());

        let broken = MemoryStore::with_value(SESSIONS_KEY, "{not json");
        assert!(load_sessions(&broken, SESSIONS_KEY).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreadable_record_is_skipped_without_losing_the_rest() {
        let raw = r#"[
            {"id": "a1", "title": "Neuer Chat", "messages": [], "modelProfile": "pro", "createdAt": 1700000000000},
            {"id": "b2", "title": 42},
            {"id": "c3", "title": "Neuer Chat", "messages": [], "modelProfile": "flash", "createdAt": 1700000001000}
        ]"#;
        let store = MemoryStore::with_value(SESSIONS_KEY, raw);

        let loaded = load_sessions(&store, SESSIONS_KEY).await.unwrap();
        let ids: Vec<&str> = loaded.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "c3"]);
        assert_eq!(loaded[1].profile, Profile::Fast);
    }

    #[tokio::test]
    async fn duplicate_ids_are_dropped_on_load() {
        let session = Session::new();
        let store = MemoryStore::new();
        save_sessions(&store, SESSIONS_KEY, &[session.clone(), session.clone()])
            .await
            .unwrap();

        let loaded = load_sessions(&store, SESSIONS_KEY).await.unwrap();
        assert_eq!(loaded, vec![session]);
    }
}
