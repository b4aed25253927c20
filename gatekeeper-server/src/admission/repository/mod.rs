//! Repository abstraction for pending-member records.
//!
//! `MemberRepository` is the single authority for who is pending. Its
//! conditional operations are the only synchronization between the message
//! path and the sweep: whoever deletes a record owns its resolution.
//! Implementations: in-memory and SQLite.

mod memory;
mod sqlite;

pub use memory::InMemoryRepository;
pub use sqlite::SqliteRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gatekeeper_core::{ChatScope, MemberKey, PendingMember};

/// Errors from the storage backend.
///
/// Lost races are not errors; they show up as `false` / `None` results.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("storage error during {operation}: {message}")]
    Storage {
        operation: &'static str,
        message: String,
    },
    #[error("corrupt {what} in storage")]
    Corruption { what: &'static str },
}

impl RepositoryError {
    pub fn storage(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Storage {
            operation,
            message: message.into(),
        }
    }

    pub fn corruption(what: &'static str) -> Self {
        Self::Corruption { what }
    }
}

/// In-place change applied to a record by `update_if_present`.
pub type MemberMutator = Box<dyn FnOnce(&mut PendingMember) + Send>;

/// Keyed storage of pending members with atomic conditional mutation.
#[async_trait]
pub trait MemberRepository: Send + Sync {
    /// Look up the record for a key.
    async fn get(&self, key: &MemberKey) -> Result<Option<PendingMember>, RepositoryError>;

    /// Store a new record unless one already exists for its key.
    ///
    /// Returns `true` if this call created the record.
    async fn insert_if_absent(&self, member: &PendingMember) -> Result<bool, RepositoryError>;

    /// Atomically apply `mutator` to the record if it still exists.
    ///
    /// Returns the record as stored after the change, or `None` if there was
    /// no record. The mutator must not change the key.
    async fn update_if_present(
        &self,
        key: &MemberKey,
        mutator: MemberMutator,
    ) -> Result<Option<PendingMember>, RepositoryError>;

    /// Atomically delete the record if it exists. This is the claim primitive.
    ///
    /// Returns `true` for exactly one caller per live record.
    async fn delete_if_present(&self, key: &MemberKey) -> Result<bool, RepositoryError>;

    /// All records in scope whose deadline is at or before `deadline_before`.
    async fn find_expired(
        &self,
        scope: ChatScope,
        deadline_before: DateTime<Utc>,
    ) -> Result<Vec<PendingMember>, RepositoryError>;

    /// All records in scope, ordered by deadline.
    async fn list(&self, scope: ChatScope) -> Result<Vec<PendingMember>, RepositoryError>;
}
