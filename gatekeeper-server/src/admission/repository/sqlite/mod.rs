//! SQLite implementation of `MemberRepository`.
//!
//! This provides persistent storage that survives service restarts, so a
//! member who joined just before a restart is still swept afterwards.
//!
//! # Schema Versioning
//!
//! The database has a `schema_version` table that tracks the schema version.
//! When the schema needs to change, increment `CURRENT_SCHEMA_VERSION` and add
//! a migration in `run_migrations()`. Migrations run sequentially from the
//! current version to the target version.
//!
//! # Atomicity
//!
//! All statements for one repository call run on a single connection while
//! its mutex is held, and the conditional operations are single statements
//! (`INSERT ... ON CONFLICT DO NOTHING`, `DELETE ... WHERE`) or one
//! transaction. The affected-row count decides who won.


use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gatekeeper_core::{ChatId, ChatScope, MemberKey, MessageId, PendingMember, UserId};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::warn;

use super::{MemberMutator, MemberRepository, RepositoryError};

/// Current schema version. Increment this when making schema changes and add
/// corresponding migration logic in `run_migrations()`.
const CURRENT_SCHEMA_VERSION: i64 = 1;

const MEMBER_COLUMNS: &str =
    "chat_id, user_id, display_name, prompt_message_id, joined_at_ms, retry_count, deadline_ms";

/// SQLite-backed member repository.
///
/// Uses `tokio::task::spawn_blocking` to run synchronous rusqlite operations
/// without blocking the async runtime.
pub struct SqliteRepository {
    /// Exposed as `pub(crate)` so tests can inspect the raw schema.
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    /// Create a new SQLite repository at the given path.
    ///
    /// Creates the database file and schema if they don't exist and runs any
    /// pending migrations.
    ///
    /// # Durability
    ///
    /// The database is configured with:
    /// - `journal_mode = WAL` for concurrency and crash safety
    /// - `synchronous = FULL` so a committed claim survives power loss
    /// - `busy_timeout = 5000ms` to handle concurrent access gracefully
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        let path_ref = path.as_ref();

        // Ensure parent directory exists (unless it's :memory: or empty path)
        let path_str = path_ref.to_string_lossy();
        let is_in_memory = path_str == ":memory:";
        if !is_in_memory && !path_str.is_empty() {
            if let Some(parent) = path_ref.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        RepositoryError::storage(
                            "create database directory",
                            format!("{}: {}", parent.display(), e),
                        )
                    })?;

                    #[cfg(unix)]
                    {
                        use std::os::unix::fs::PermissionsExt;
                        let dir_permissions = std::fs::Permissions::from_mode(0o700);
                        if let Err(e) = std::fs::set_permissions(parent, dir_permissions) {
                            warn!(
                                "Failed to set restrictive permissions on state directory: {}",
                                e
                            );
                        }
                    }
                }
            }
        }

        let conn = Connection::open(path_ref)
            .map_err(|e| RepositoryError::storage("open database", e.to_string()))?;

        // Member names and ids are personal data
        #[cfg(unix)]
        if !is_in_memory && !path_str.is_empty() {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            if let Err(e) = std::fs::set_permissions(path_ref, permissions) {
                warn!(
                    "Failed to set restrictive permissions on database file: {}",
                    e
                );
            }
        }

        // SQLite can silently keep DELETE mode on filesystems without shared
        // memory support, so the returned mode is checked. In-memory databases
        // report "memory".
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| RepositoryError::storage("set journal_mode", e.to_string()))?;

        let journal_mode_ok = journal_mode.eq_ignore_ascii_case("wal")
            || (is_in_memory && journal_mode.eq_ignore_ascii_case("memory"));

        if !journal_mode_ok {
            return Err(RepositoryError::storage(
                "configure journal_mode",
                format!(
                    "Failed to enable WAL mode: SQLite returned '{}' instead of 'wal'. \
                     The database requires WAL mode for durability and concurrency guarantees.",
                    journal_mode
                ),
            ));
        }

        conn.execute_batch(
            r#"
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            "#,
        )
        .map_err(|e| RepositoryError::storage("configure pragmas", e.to_string()))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| RepositoryError::storage("create schema_version table", e.to_string()))?;

        // 0 means a fresh database
        let current_version: i64 = conn
            .query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| RepositoryError::storage("get schema version", e.to_string()))?
            .unwrap_or(0);

        Self::run_migrations(&conn, current_version)?;

        // The migration write has created the WAL sidecars by now
        #[cfg(unix)]
        if !is_in_memory && !path_str.is_empty() {
            restrict_sidecar_permissions(&path_str);
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run migrations from `from_version` to `CURRENT_SCHEMA_VERSION`.
    fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), RepositoryError> {
        if from_version > CURRENT_SCHEMA_VERSION {
            return Err(RepositoryError::storage(
                "schema version",
                format!(
                    "Database schema version {} is newer than supported version {}. \
                     Please upgrade the application.",
                    from_version, CURRENT_SCHEMA_VERSION
                ),
            ));
        }

        if from_version == CURRENT_SCHEMA_VERSION {
            return Ok(());
        }

        if from_version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS pending_members (
                    chat_id INTEGER NOT NULL,
                    user_id INTEGER NOT NULL,
                    display_name TEXT NOT NULL,
                    prompt_message_id INTEGER NOT NULL,
                    joined_at_ms INTEGER NOT NULL,
                    retry_count INTEGER NOT NULL DEFAULT 0 CHECK (retry_count >= 0),
                    deadline_ms INTEGER NOT NULL,
                    PRIMARY KEY (chat_id, user_id)
                );

                CREATE INDEX IF NOT EXISTS idx_pending_members_deadline
                    ON pending_members(deadline_ms);
                "#,
            )
            .map_err(|e| RepositoryError::storage("migration v1", e.to_string()))?;
        }

        conn.execute(
            "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
            params![CURRENT_SCHEMA_VERSION],
        )
        .map_err(|e| RepositoryError::storage("update schema version", e.to_string()))?;

        Ok(())
    }

    /// Create a new in-memory SQLite repository (for testing).
    pub fn new_in_memory() -> Result<Self, RepositoryError> {
        Self::new(":memory:")
    }
}

/// Apply the database file's 0600 mode to the `-wal` and `-shm` files,
/// which hold the same member data.
#[cfg(unix)]
fn restrict_sidecar_permissions(db_path: &str) {
    use std::os::unix::fs::PermissionsExt;

    for suffix in ["-wal", "-shm"] {
        let sidecar = format!("{}{}", db_path, suffix);
        if !Path::new(&sidecar).exists() {
            continue;
        }
        if let Err(e) = std::fs::set_permissions(&sidecar, std::fs::Permissions::from_mode(0o600))
        {
            warn!(file = %sidecar, "Failed to set restrictive permissions on database sidecar: {}", e);
        }
    }
}

/// Milliseconds since the epoch, rounded up.
///
/// Deadlines are stored at millisecond precision; rounding up keeps a stored
/// deadline from ever falling before the real one.
fn ceil_millis(t: DateTime<Utc>) -> i64 {
    let ms = t.timestamp_millis();
    if t.timestamp_subsec_nanos() % 1_000_000 == 0 {
        ms
    } else {
        ms + 1
    }
}

fn lock_conn<'a>(
    conn: &'a Mutex<Connection>,
    operation: &'static str,
) -> Result<MutexGuard<'a, Connection>, RepositoryError> {
    conn.lock()
        .map_err(|_| RepositoryError::storage(operation, "connection mutex poisoned"))
}

fn member_from_row(row: &Row<'_>) -> rusqlite::Result<RawMember> {
    Ok(RawMember {
        chat_id: row.get(0)?,
        user_id: row.get(1)?,
        display_name: row.get(2)?,
        prompt_message_id: row.get(3)?,
        joined_at_ms: row.get(4)?,
        retry_count: row.get(5)?,
        deadline_ms: row.get(6)?,
    })
}

/// A row as stored, before timestamp validation.
struct RawMember {
    chat_id: i64,
    user_id: i64,
    display_name: String,
    prompt_message_id: i64,
    joined_at_ms: i64,
    retry_count: u32,
    deadline_ms: i64,
}

impl RawMember {
    fn into_member(self) -> Result<PendingMember, RepositoryError> {
        let joined_at = DateTime::<Utc>::from_timestamp_millis(self.joined_at_ms)
            .ok_or_else(|| RepositoryError::corruption("joined_at timestamp"))?;
        let deadline = DateTime::<Utc>::from_timestamp_millis(self.deadline_ms)
            .ok_or_else(|| RepositoryError::corruption("deadline timestamp"))?;
        Ok(PendingMember {
            user_id: UserId(self.user_id),
            chat_id: ChatId(self.chat_id),
            display_name: self.display_name,
            prompt_message_id: MessageId(self.prompt_message_id),
            joined_at,
            retry_count: self.retry_count,
            deadline,
        })
    }
}

fn query_members(
    conn: &Connection,
    operation: &'static str,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<PendingMember>, RepositoryError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| RepositoryError::storage(operation, e.to_string()))?;
    let rows = stmt
        .query_map(params, member_from_row)
        .map_err(|e| RepositoryError::storage(operation, e.to_string()))?;

    let mut members = Vec::new();
    for row in rows {
        let raw = row.map_err(|e| RepositoryError::storage(operation, e.to_string()))?;
        members.push(raw.into_member()?);
    }
    Ok(members)
}

fn scope_filter(scope: ChatScope) -> (bool, i64) {
    match scope {
        ChatScope::All => (true, 0),
        ChatScope::Chat(chat_id) => (false, chat_id.0),
    }
}

#[async_trait]
impl MemberRepository for SqliteRepository {
    async fn get(&self, key: &MemberKey) -> Result<Option<PendingMember>, RepositoryError> {
        let conn = self.conn.clone();
        let key = *key;

        tokio::task::spawn_blocking(move || {
            let conn = lock_conn(&conn, "get")?;

            let raw = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM pending_members WHERE chat_id = ?1 AND user_id = ?2",
                        MEMBER_COLUMNS
                    ),
                    params![key.chat_id.0, key.user_id.0],
                    member_from_row,
                )
                .optional()
                .map_err(|e| RepositoryError::storage("get", e.to_string()))?;

            raw.map(RawMember::into_member).transpose()
        })
        .await
        .map_err(|e| RepositoryError::storage("get", e.to_string()))?
    }

    async fn insert_if_absent(&self, member: &PendingMember) -> Result<bool, RepositoryError> {
        let conn = self.conn.clone();
        let member = member.clone();

        tokio::task::spawn_blocking(move || {
            let conn = lock_conn(&conn, "insert_if_absent")?;

            // A conflicting key leaves the existing row untouched and
            // reports zero changes.
            let inserted = conn
                .execute(
                    "INSERT INTO pending_members (chat_id, user_id, display_name, prompt_message_id,
                                                  joined_at_ms, retry_count, deadline_ms)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(chat_id, user_id) DO NOTHING",
                    params![
                        member.chat_id.0,
                        member.user_id.0,
                        member.display_name,
                        member.prompt_message_id.0,
                        member.joined_at.timestamp_millis(),
                        member.retry_count,
                        ceil_millis(member.deadline),
                    ],
                )
                .map_err(|e| RepositoryError::storage("insert_if_absent", e.to_string()))?;

            Ok(inserted == 1)
        })
        .await
        .map_err(|e| RepositoryError::storage("insert_if_absent", e.to_string()))?
    }

    async fn update_if_present(
        &self,
        key: &MemberKey,
        mutator: MemberMutator,
    ) -> Result<Option<PendingMember>, RepositoryError> {
        let conn = self.conn.clone();
        let key = *key;

        tokio::task::spawn_blocking(move || {
            let mut conn = lock_conn(&conn, "update_if_present")?;
            let tx = conn
                .transaction()
                .map_err(|e| RepositoryError::storage("update_if_present", e.to_string()))?;

            let raw = tx
                .query_row(
                    &format!(
                        "SELECT {} FROM pending_members WHERE chat_id = ?1 AND user_id = ?2",
                        MEMBER_COLUMNS
                    ),
                    params![key.chat_id.0, key.user_id.0],
                    member_from_row,
                )
                .optional()
                .map_err(|e| RepositoryError::storage("update_if_present", e.to_string()))?;

            let Some(raw) = raw else {
                return Ok(None);
            };

            let mut member = raw.into_member()?;
            mutator(&mut member);
            if member.key() != key {
                return Err(RepositoryError::storage(
                    "update_if_present",
                    "mutator changed the record key",
                ));
            }

            tx.execute(
                "UPDATE pending_members
                 SET display_name = ?3, prompt_message_id = ?4, joined_at_ms = ?5,
                     retry_count = ?6, deadline_ms = ?7
                 WHERE chat_id = ?1 AND user_id = ?2",
                params![
                    key.chat_id.0,
                    key.user_id.0,
                    member.display_name,
                    member.prompt_message_id.0,
                    member.joined_at.timestamp_millis(),
                    member.retry_count,
                    ceil_millis(member.deadline),
                ],
            )
            .map_err(|e| RepositoryError::storage("update_if_present", e.to_string()))?;

            tx.commit()
                .map_err(|e| RepositoryError::storage("update_if_present", e.to_string()))?;

            Ok(Some(member))
        })
        .await
        .map_err(|e| RepositoryError::storage("update_if_present", e.to_string()))?
    }

    async fn delete_if_present(&self, key: &MemberKey) -> Result<bool, RepositoryError> {
        let conn = self.conn.clone();
        let key = *key;

        tokio::task::spawn_blocking(move || {
            let conn = lock_conn(&conn, "delete_if_present")?;

            let deleted = conn
                .execute(
                    "DELETE FROM pending_members WHERE chat_id = ?1 AND user_id = ?2",
                    params![key.chat_id.0, key.user_id.0],
                )
                .map_err(|e| RepositoryError::storage("delete_if_present", e.to_string()))?;

            Ok(deleted == 1)
        })
        .await
        .map_err(|e| RepositoryError::storage("delete_if_present", e.to_string()))?
    }

    async fn find_expired(
        &self,
        scope: ChatScope,
        deadline_before: DateTime<Utc>,
    ) -> Result<Vec<PendingMember>, RepositoryError> {
        let conn = self.conn.clone();
        let (all_chats, chat_id) = scope_filter(scope);
        let cutoff_ms = deadline_before.timestamp_millis();

        tokio::task::spawn_blocking(move || {
            let conn = lock_conn(&conn, "find_expired")?;
            query_members(
                &conn,
                "find_expired",
                &format!(
                    "SELECT {} FROM pending_members
                     WHERE deadline_ms <= ?1 AND (?2 OR chat_id = ?3)
                     ORDER BY deadline_ms, chat_id, user_id",
                    MEMBER_COLUMNS
                ),
                params![cutoff_ms, all_chats, chat_id],
            )
        })
        .await
        .map_err(|e| RepositoryError::storage("find_expired", e.to_string()))?
    }

    async fn list(&self, scope: ChatScope) -> Result<Vec<PendingMember>, RepositoryError> {
        let conn = self.conn.clone();
        let (all_chats, chat_id) = scope_filter(scope);

        tokio::task::spawn_blocking(move || {
            let conn = lock_conn(&conn, "list")?;
            query_members(
                &conn,
                "list",
                &format!(
                    "SELECT {} FROM pending_members
                     WHERE (?1 OR chat_id = ?2)
                     ORDER BY deadline_ms, chat_id, user_id",
                    MEMBER_COLUMNS
                ),
                params![all_chats, chat_id],
            )
        })
        .await
        .map_err(|e| RepositoryError::storage("list", e.to_string()))?
    }
}
