//! SQLite-backed `MappingStore` implementation with durable persistence.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::{params, Connection, InterruptHandle};

use crate::{
    system_clock, MappingClock, MappingStore, MappingStoreError, PrMessageMapping, StoreResult,
};

/// Matches SQLite's `CURRENT_TIMESTAMP` so defaulted and stamped rows compare alike.
const INSERTED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const CUTOFF_DATE_FORMAT: &str = "%Y-%m-%d";

/// Persistent SQLite mapping store.
///
/// All reads and writes go through one connection behind a mutex, so there is
/// never more than one writer in flight. Dropping an operation's future before
/// it completes cancels it: queued work is skipped and a running statement is
/// interrupted, so an abandoned write is never committed late.
pub struct SqliteMappingStore {
    db_path: PathBuf,
    connection: Arc<Mutex<Connection>>,
    interrupt: Arc<InterruptHandle>,
    clock: MappingClock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallState {
    Queued,
    Running,
    Finished,
    Cancelled,
}

/// Cancels the blocking half of an operation when its future is dropped early.
struct CancelOnDrop {
    state: Arc<Mutex<CallState>>,
    interrupt: Arc<InterruptHandle>,
    armed: bool,
}

impl CancelOnDrop {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        match *state {
            CallState::Queued => *state = CallState::Cancelled,
            // The worker holds the connection until it marks itself finished,
            // so this interrupt can only hit this operation's statements.
            CallState::Running => {
                self.interrupt.interrupt();
                tracing::debug!("interrupted abandoned sqlite mapping statement");
            }
            CallState::Finished | CallState::Cancelled => {}
        }
    }
}

impl std::fmt::Debug for SqliteMappingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteMappingStore")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

impl SqliteMappingStore {
    /// Opens (or creates) the database at `path` and initializes the schema.
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let connection = Connection::open(&db_path)?;
        Self::from_connection(db_path, connection)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(PathBuf::from(":memory:"), Connection::open_in_memory()?)
    }

    /// Replaces the clock used to stamp `inserted_at`.
    pub fn with_clock(mut self, clock: MappingClock) -> Self {
        self.clock = clock;
        self
    }

    fn from_connection(db_path: PathBuf, connection: Connection) -> StoreResult<Self> {
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            "#,
        )?;
        initialize_schema(&connection)?;
        tracing::info!(db_path = %db_path.display(), "sqlite mapping schema initialized");
        let interrupt = Arc::new(connection.get_interrupt_handle());
        Ok(Self {
            db_path,
            connection: Arc::new(Mutex::new(connection)),
            interrupt,
            clock: system_clock(),
        })
    }

    async fn with_connection<T, F>(&self, task: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
    {
        let connection = Arc::clone(&self.connection);
        let state = Arc::new(Mutex::new(CallState::Queued));
        let mut cancel_guard = CancelOnDrop {
            state: Arc::clone(&state),
            interrupt: Arc::clone(&self.interrupt),
            armed: true,
        };
        let result = tokio::task::spawn_blocking(move || {
            let guard = connection
                .lock()
                .map_err(|_| MappingStoreError::LockPoisoned)?;
            {
                let mut state = state.lock().map_err(|_| MappingStoreError::LockPoisoned)?;
                if *state == CallState::Cancelled {
                    return Err(MappingStoreError::Cancelled);
                }
                *state = CallState::Running;
            }
            let result = task(&guard);
            if let Ok(mut state) = state.lock() {
                *state = CallState::Finished;
            }
            drop(guard);
            result
        })
        .await
        .map_err(|error| MappingStoreError::TaskJoin(error.to_string()));
        cancel_guard.disarm();
        result?
    }
}

fn initialize_schema(connection: &Connection) -> StoreResult<()> {
    connection.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS pr_messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            inserted_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            pr_url TEXT NOT NULL,
            message_channel TEXT,
            message_timestamp TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_pr_messages_pr_url ON pr_messages (pr_url);
        CREATE INDEX IF NOT EXISTS idx_pr_messages_inserted_at ON pr_messages (inserted_at);
        "#,
    )?;
    Ok(())
}

#[async_trait]
impl MappingStore for SqliteMappingStore {
    async fn insert(
        &self,
        pr_url: &str,
        channel: &str,
        message_timestamp: &str,
    ) -> StoreResult<()> {
        let inserted_at = timestamp_to_db((self.clock)());
        let pr_url = pr_url.to_string();
        let channel = channel.to_string();
        let message_timestamp = message_timestamp.to_string();
        self.with_connection(move |connection| {
            connection.execute(
                r#"
                INSERT INTO pr_messages (inserted_at, pr_url, message_channel, message_timestamp)
                VALUES (?1, ?2, ?3, ?4)
                "#,
                params![inserted_at, pr_url, channel, message_timestamp],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_by_pr_url(&self, pr_url: &str) -> StoreResult<Vec<PrMessageMapping>> {
        let pr_url = pr_url.to_string();
        self.with_connection(move |connection| {
            let mut statement = connection.prepare(
                r#"
                SELECT id, inserted_at, pr_url, message_channel, message_timestamp
                FROM pr_messages
                WHERE pr_url = ?1
                ORDER BY id
                "#,
            )?;
            let rows = statement
                .query_map(params![pr_url], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(
                    |(id, inserted_at, pr_url, channel, message_timestamp)| -> StoreResult<_> {
                        Ok(PrMessageMapping {
                            id,
                            inserted_at: timestamp_from_db(&inserted_at)?,
                            pr_url,
                            channel: channel.unwrap_or_default(),
                            message_timestamp: message_timestamp.unwrap_or_default(),
                        })
                    },
                )
                .collect::<StoreResult<Vec<_>>>()
        })
        .await
    }

    async fn delete_by_pr_url(&self, pr_url: &str) -> StoreResult<u64> {
        let pr_url = pr_url.to_string();
        self.with_connection(move |connection| {
            let deleted = connection.execute(
                "DELETE FROM pr_messages WHERE pr_url = ?1",
                params![pr_url],
            )?;
            Ok(deleted as u64)
        })
        .await
    }

    async fn delete_older_than(&self, cutoff: NaiveDate) -> StoreResult<u64> {
        // A bare date sorts before any timestamp on that same date, so this
        // keeps rows inserted on the cutoff day and still uses the index.
        let cutoff = cutoff.format(CUTOFF_DATE_FORMAT).to_string();
        self.with_connection(move |connection| {
            let deleted = connection.execute(
                "DELETE FROM pr_messages WHERE inserted_at < ?1",
                params![cutoff],
            )?;
            Ok(deleted as u64)
        })
        .await
    }
}

fn timestamp_to_db(value: DateTime<Utc>) -> String {
    value.format(INSERTED_AT_FORMAT).to_string()
}

fn timestamp_from_db(value: &str) -> StoreResult<DateTime<Utc>> {
    if let Ok(parsed) = NaiveDateTime::parse_from_str(value, INSERTED_AT_FORMAT) {
        return Ok(parsed.and_utc());
    }
    match DateTime::parse_from_rfc3339(value) {
        Ok(parsed) => Ok(parsed.with_timezone(&Utc)),
        Err(_) => Err(MappingStoreError::InvalidPersistedValue {
            field: "inserted_at",
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use chrono::{DateTime, NaiveDate, TimeZone, Utc};
    use rusqlite::{params, Connection};
    use tempfile::tempdir;

    use super::{timestamp_from_db, SqliteMappingStore};
    use crate::{MappingClock, MappingStore, MappingStoreError};

    fn settable_clock(initial: DateTime<Utc>) -> (MappingClock, Arc<Mutex<DateTime<Utc>>>) {
        let now = Arc::new(Mutex::new(initial));
        let handle = Arc::clone(&now);
        let clock: MappingClock = Arc::new(move || *handle.lock().expect("clock lock"));
        (clock, now)
    }

    #[tokio::test]
    async fn integration_persists_mappings_across_reopen() {
        let temp = tempdir().expect("create tempdir");
        let db_path = temp.path().join("state").join("prmoji.db");

        {
            let store = SqliteMappingStore::new(&db_path).expect("create sqlite store");
            store
                .insert("https://github.com/o/r/pull/7", "C1", "100")
                .await
                .expect("insert mapping");
        }

        let reopened = SqliteMappingStore::new(&db_path).expect("reopen sqlite store");
        let rows = reopened
            .list_by_pr_url("https://github.com/o/r/pull/7")
            .await
            .expect("list mappings");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].channel, "C1");
        assert_eq!(rows[0].message_timestamp, "100");
    }

    #[tokio::test]
    async fn functional_list_is_exact_match_and_ordered_by_insertion() {
        let store = SqliteMappingStore::open_in_memory().expect("open store");
        store.insert("https://github.com/o/r/pull/1", "C1", "1.0").await.expect("insert");
        store.insert("https://github.com/o/r/pull/10", "C1", "2.0").await.expect("insert");
        store.insert("https://github.com/o/r/pull/1", "C2", "3.0").await.expect("insert");
        store.insert("https://github.com/O/R/pull/1", "C3", "4.0").await.expect("insert");

        let rows = store
            .list_by_pr_url("https://github.com/o/r/pull/1")
            .await
            .expect("list");
        let locations = rows
            .iter()
            .map(|row| (row.channel.as_str(), row.message_timestamp.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(locations, vec![("C1", "1.0"), ("C2", "3.0")]);
    }

    #[tokio::test]
    async fn functional_delete_by_pr_url_is_idempotent_and_scoped() {
        let store = SqliteMappingStore::open_in_memory().expect("open store");
        store.insert("u1", "C1", "1.0").await.expect("insert");
        store.insert("u1", "C2", "2.0").await.expect("insert");
        store.insert("u2", "C1", "3.0").await.expect("insert");

        assert_eq!(store.delete_by_pr_url("u1").await.expect("delete"), 2);
        assert_eq!(store.delete_by_pr_url("u1").await.expect("delete absent"), 0);
        assert_eq!(store.delete_by_pr_url("missing").await.expect("delete missing"), 0);
        assert!(store.list_by_pr_url("u1").await.expect("list").is_empty());
        assert_eq!(store.list_by_pr_url("u2").await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn functional_delete_older_than_is_strict_on_calendar_date() {
        let (clock, now) = settable_clock(Utc.with_ymd_and_hms(2024, 3, 8, 12, 0, 0).unwrap());
        let store = SqliteMappingStore::open_in_memory()
            .expect("open store")
            .with_clock(clock);
        store.insert("two-days-old", "C1", "1").await.expect("insert");

        *now.lock().expect("clock lock") = Utc.with_ymd_and_hms(2024, 3, 9, 23, 59, 59).unwrap();
        store.insert("day-before", "C1", "2").await.expect("insert");

        *now.lock().expect("clock lock") = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        store.insert("on-cutoff", "C1", "3").await.expect("insert");

        *now.lock().expect("clock lock") = Utc.with_ymd_and_hms(2024, 3, 11, 8, 0, 0).unwrap();
        store.insert("after", "C1", "4").await.expect("insert");

        let cutoff = NaiveDate::from_ymd_opt(2024, 3, 10).expect("date");
        assert_eq!(store.delete_older_than(cutoff).await.expect("sweep"), 2);
        assert!(store.list_by_pr_url("two-days-old").await.expect("list").is_empty());
        assert!(store.list_by_pr_url("day-before").await.expect("list").is_empty());
        assert_eq!(store.list_by_pr_url("on-cutoff").await.expect("list").len(), 1);
        assert_eq!(store.list_by_pr_url("after").await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn integration_rows_defaulted_by_sqlite_are_swept_by_date() {
        let temp = tempdir().expect("create tempdir");
        let db_path = temp.path().join("prmoji.db");
        let store = SqliteMappingStore::new(&db_path).expect("create store");

        let raw = Connection::open(&db_path).expect("open raw connection");
        raw.execute(
            "INSERT INTO pr_messages (inserted_at, pr_url, message_channel, message_timestamp) VALUES (?1, ?2, ?3, ?4)",
            params!["2020-01-01 10:00:00", "legacy", "C1", "1"],
        )
        .expect("insert legacy row");
        raw.execute(
            "INSERT INTO pr_messages (pr_url, message_channel, message_timestamp) VALUES (?1, ?2, ?3)",
            params!["fresh", "C1", "2"],
        )
        .expect("insert defaulted row");
        drop(raw);

        let cutoff = NaiveDate::from_ymd_opt(2021, 1, 1).expect("date");
        assert_eq!(store.delete_older_than(cutoff).await.expect("sweep"), 1);
        let fresh = store.list_by_pr_url("fresh").await.expect("list");
        assert_eq!(fresh.len(), 1);
        assert!(fresh[0].inserted_on() > cutoff);
    }

    #[tokio::test]
    async fn regression_insert_abandoned_while_queued_is_never_committed() {
        let store = SqliteMappingStore::open_in_memory().expect("open store");
        let connection = Arc::clone(&store.connection);
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = std::thread::spawn(move || {
            let _guard = connection.lock().expect("connection lock");
            locked_tx.send(()).expect("signal locked");
            std::thread::sleep(Duration::from_millis(300));
        });
        locked_rx.recv().expect("holder locked connection");

        let attempt = tokio::time::timeout(
            Duration::from_millis(50),
            store.insert("https://github.com/o/r/pull/7", "C1", "100"),
        )
        .await;
        assert!(attempt.is_err(), "insert should miss its deadline");

        holder.join().expect("holder thread");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(store
            .list_by_pr_url("https://github.com/o/r/pull/7")
            .await
            .expect("list")
            .is_empty());
    }

    #[tokio::test]
    async fn regression_running_statement_is_interrupted_when_abandoned() {
        let store = SqliteMappingStore::open_in_memory().expect("open store");
        let endless = tokio::time::timeout(
            Duration::from_millis(100),
            store.with_connection(|connection| {
                let count = connection.query_row(
                    "WITH RECURSIVE counter(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM counter) \
                     SELECT count(*) FROM counter",
                    [],
                    |row| row.get::<_, i64>(0),
                )?;
                Ok(count)
            }),
        )
        .await;
        assert!(endless.is_err(), "endless query should miss its deadline");

        // The connection is released once the statement is interrupted.
        let follow_up = tokio::time::timeout(
            Duration::from_secs(5),
            store.insert("https://github.com/o/r/pull/8", "C1", "1"),
        )
        .await
        .expect("connection freed after interrupt");
        follow_up.expect("insert after interrupt");
        assert_eq!(
            store
                .list_by_pr_url("https://github.com/o/r/pull/8")
                .await
                .expect("list")
                .len(),
            1
        );
    }

    #[test]
    fn unit_timestamp_from_db_accepts_sqlite_and_rfc3339_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 7, 30, 0).unwrap();
        assert_eq!(
            timestamp_from_db("2024-05-01 07:30:00").expect("sqlite format"),
            expected
        );
        assert_eq!(
            timestamp_from_db("2024-05-01T07:30:00+00:00").expect("rfc3339 format"),
            expected
        );
        assert!(matches!(
            timestamp_from_db("yesterday"),
            Err(MappingStoreError::InvalidPersistedValue { field: "inserted_at", .. })
        ));
    }
}
