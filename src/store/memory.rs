//! In-memory `RuleStore`, used by tests and by the binary when no database
//! path is configured.
//!
//! The outer map lock is held only long enough to look a rule up; counter
//! updates serialize on the rule's own mutex, so rules never contend with
//! each other.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::autoresponder::analytics::{apply_claim, apply_trigger};
use crate::autoresponder::model::AutoresponderRule;
use crate::error::DatabaseError;
use crate::store::traits::{ResponseClaim, RuleStore};

type Slot = Arc<Mutex<AutoresponderRule>>;

#[derive(Default)]
pub struct MemoryRuleStore {
    rules: RwLock<HashMap<Uuid, Slot>>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, id: Uuid) -> Option<Slot> {
        self.rules.read().await.get(&id).cloned()
    }

    async fn snapshot<F>(&self, keep: F) -> Vec<AutoresponderRule>
    where
        F: Fn(&AutoresponderRule) -> bool,
    {
        let slots: Vec<Slot> = self.rules.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(slots.len());
        for slot in slots {
            let rule = slot.lock().await;
            if keep(&rule) {
                out.push(rule.clone());
            }
        }
        out
    }
}

/// Same contract as the libSQL unique index on (owner_id, name). Callers
/// hold the map's write lock.
async fn ensure_unique_name(
    rules: &HashMap<Uuid, Slot>,
    rule: &AutoresponderRule,
) -> Result<(), DatabaseError> {
    for (id, slot) in rules {
        if *id == rule.id {
            continue;
        }
        let existing = slot.lock().await;
        if existing.owner_id == rule.owner_id && existing.name == rule.name {
            return Err(DatabaseError::UniqueViolation(format!(
                "rule '{}' already exists for owner {}",
                rule.name, rule.owner_id
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn list_rules(&self, owner_id: &str) -> Result<Vec<AutoresponderRule>, DatabaseError> {
        Ok(self.snapshot(|r| r.owner_id == owner_id).await)
    }

    async fn list_active_rules(
        &self,
        owner_id: &str,
    ) -> Result<Vec<AutoresponderRule>, DatabaseError> {
        Ok(self
            .snapshot(|r| r.owner_id == owner_id && r.is_active)
            .await)
    }

    async fn get_rule(&self, id: Uuid) -> Result<Option<AutoresponderRule>, DatabaseError> {
        match self.slot(id).await {
            Some(slot) => Ok(Some(slot.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn find_rule_by_name(
        &self,
        owner_id: &str,
        name: &str,
    ) -> Result<Option<AutoresponderRule>, DatabaseError> {
        Ok(self
            .snapshot(|r| r.owner_id == owner_id && r.name == name)
            .await
            .into_iter()
            .next())
    }

    async fn insert_rule(&self, rule: &AutoresponderRule) -> Result<(), DatabaseError> {
        let mut rules = self.rules.write().await;
        if rules.contains_key(&rule.id) {
            return Err(DatabaseError::Query(format!(
                "insert_rule: duplicate id {}",
                rule.id
            )));
        }
        ensure_unique_name(&rules, rule).await?;
        rules.insert(rule.id, Arc::new(Mutex::new(rule.clone())));
        Ok(())
    }

    async fn update_rule(&self, rule: &AutoresponderRule) -> Result<bool, DatabaseError> {
        // Held across the name check so a concurrent rename cannot slip in.
        let rules = self.rules.write().await;
        let Some(slot) = rules.get(&rule.id).cloned() else {
            return Ok(false);
        };
        ensure_unique_name(&rules, rule).await?;
        slot.lock().await.copy_definition_from(rule);
        Ok(true)
    }

    async fn delete_rule(&self, id: Uuid) -> Result<bool, DatabaseError> {
        Ok(self.rules.write().await.remove(&id).is_some())
    }

    async fn record_trigger(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, DatabaseError> {
        let Some(slot) = self.slot(id).await else {
            return Ok(false);
        };
        apply_trigger(&mut *slot.lock().await, at);
        Ok(true)
    }

    async fn claim_response(
        &self,
        id: Uuid,
        claim: &ResponseClaim,
    ) -> Result<bool, DatabaseError> {
        let Some(slot) = self.slot(id).await else {
            return Ok(false);
        };
        Ok(apply_claim(&mut *slot.lock().await, claim))
    }
}
