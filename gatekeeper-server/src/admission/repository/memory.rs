//! In-memory implementation of `MemberRepository`.
//!
//! Records live in a `HashMap` behind a `RwLock` and are lost on restart.
//! Every conditional operation runs under a single write guard, so it is
//! atomic with respect to every other operation on the same repository.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gatekeeper_core::{ChatScope, MemberKey, PendingMember};
use tokio::sync::RwLock;

use super::{MemberMutator, MemberRepository, RepositoryError};

pub struct InMemoryRepository {
    members: RwLock<HashMap<MemberKey, PendingMember>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            members: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted_by_deadline(mut members: Vec<PendingMember>) -> Vec<PendingMember> {
    members.sort_by_key(|m| (m.deadline, m.chat_id, m.user_id));
    members
}

#[async_trait]
impl MemberRepository for InMemoryRepository {
    async fn get(&self, key: &MemberKey) -> Result<Option<PendingMember>, RepositoryError> {
        let members = self.members.read().await;
        Ok(members.get(key).cloned())
    }

    async fn insert_if_absent(&self, member: &PendingMember) -> Result<bool, RepositoryError> {
        let mut members = self.members.write().await;
        match members.entry(member.key()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(entry) => {
                entry.insert(member.clone());
                Ok(true)
            }
        }
    }

    async fn update_if_present(
        &self,
        key: &MemberKey,
        mutator: MemberMutator,
    ) -> Result<Option<PendingMember>, RepositoryError> {
        let mut members = self.members.write().await;
        let Some(member) = members.get_mut(key) else {
            return Ok(None);
        };

        let mut updated = member.clone();
        mutator(&mut updated);
        if updated.key() != *key {
            return Err(RepositoryError::storage(
                "update_if_present",
                "mutator changed the record key",
            ));
        }
        *member = updated.clone();
        Ok(Some(updated))
    }

    async fn delete_if_present(&self, key: &MemberKey) -> Result<bool, RepositoryError> {
        let mut members = self.members.write().await;
        Ok(members.remove(key).is_some())
    }

    async fn find_expired(
        &self,
        scope: ChatScope,
        deadline_before: DateTime<Utc>,
    ) -> Result<Vec<PendingMember>, RepositoryError> {
        let members = self.members.read().await;
        Ok(sorted_by_deadline(
            members
                .values()
                .filter(|m| scope.contains(m.chat_id) && m.is_expired(deadline_before))
                .cloned()
                .collect(),
        ))
    }

    async fn list(&self, scope: ChatScope) -> Result<Vec<PendingMember>, RepositoryError> {
        let members = self.members.read().await;
        Ok(sorted_by_deadline(
            members
                .values()
                .filter(|m| scope.contains(m.chat_id))
                .cloned()
                .collect(),
        ))
    }
}
