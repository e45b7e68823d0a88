//! The `RuleStore` trait: what the engine needs from persistence.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use uuid::Uuid;

use crate::autoresponder::model::AutoresponderRule;
use crate::error::DatabaseError;

/// A conditional response-counter increment.
///
/// The store applies it only if, at the moment of the write, the rule still
/// has fewer responses than triggers, has room under `max_per_day` for
/// `day`, and is out of its cooldown relative to `at`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseClaim {
    pub at: DateTime<Utc>,
    /// Local calendar day of `at` in the rule's timezone.
    pub day: NaiveDate,
    pub max_per_day: Option<u32>,
    pub cooldown: Option<Duration>,
    pub response_time_ms: f64,
}

/// Keyed rule storage.
///
/// Runtime counters (`analytics`, `rate_state`) are only ever written through
/// `record_trigger` and `claim_response`, both atomic per rule.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// All rules for an owner, in no particular order.
    async fn list_rules(&self, owner_id: &str) -> Result<Vec<AutoresponderRule>, DatabaseError>;

    /// Active rules for an owner, in no particular order.
    async fn list_active_rules(
        &self,
        owner_id: &str,
    ) -> Result<Vec<AutoresponderRule>, DatabaseError>;

    async fn get_rule(&self, id: Uuid) -> Result<Option<AutoresponderRule>, DatabaseError>;

    async fn find_rule_by_name(
        &self,
        owner_id: &str,
        name: &str,
    ) -> Result<Option<AutoresponderRule>, DatabaseError>;

    /// Fails with `DatabaseError::UniqueViolation` if the owner already has
    /// a rule with this name.
    async fn insert_rule(&self, rule: &AutoresponderRule) -> Result<(), DatabaseError>;

    /// Overwrite the definition fields of an existing rule. Counters are
    /// left alone. Returns false if the rule does not exist; a rename onto a
    /// taken name is a `UniqueViolation`.
    async fn update_rule(&self, rule: &AutoresponderRule) -> Result<bool, DatabaseError>;

    async fn delete_rule(&self, id: Uuid) -> Result<bool, DatabaseError>;

    /// `total_triggers += 1`, `last_triggered = at`. Returns false if the
    /// rule is gone.
    async fn record_trigger(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, DatabaseError>;

    /// Apply a [`ResponseClaim`]. Returns false if the claim was refused or
    /// the rule is gone.
    async fn claim_response(&self, id: Uuid, claim: &ResponseClaim)
    -> Result<bool, DatabaseError>;
}
