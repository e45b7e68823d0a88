//! Per-rule trigger and response counters.
//!
//! Counters only move through the store's atomic `record_trigger` and
//! `claim_response`; this module builds those calls and the in-memory
//! equivalents the memory store applies under its per-rule lock.

use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::autoresponder::conditions::local_day;
use crate::autoresponder::model::AutoresponderRule;
use crate::error::DatabaseError;
use crate::store::{ResponseClaim, RuleStore};

/// Running mean after adding `sample` to `count` previous samples.
pub fn next_average(previous: Option<f64>, count: u64, sample: f64) -> f64 {
    match previous {
        Some(avg) if count > 0 => avg + (sample - avg) / (count + 1) as f64,
        _ => sample,
    }
}

/// In-memory form of `record_trigger`.
pub fn apply_trigger(rule: &mut AutoresponderRule, at: DateTime<Utc>) {
    rule.analytics.total_triggers += 1;
    rule.analytics.last_triggered = Some(at);
}

/// In-memory form of `claim_response`. Returns false and leaves the rule
/// untouched if the claim is refused.
pub fn apply_claim(rule: &mut AutoresponderRule, claim: &ResponseClaim) -> bool {
    let analytics = &rule.analytics;
    if analytics.total_responses >= analytics.total_triggers {
        return false;
    }

    let sent_today = rule.rate_state.responses_on(claim.day);
    if let Some(cap) = claim.max_per_day
        && sent_today >= cap
    {
        return false;
    }

    if let Some(cooldown) = claim.cooldown
        && let Some(last) = rule.rate_state.last_response_at
        && claim.at.signed_duration_since(last) < cooldown
    {
        return false;
    }

    rule.analytics.average_response_time_ms = Some(next_average(
        rule.analytics.average_response_time_ms,
        rule.analytics.total_responses,
        claim.response_time_ms,
    ));
    rule.analytics.total_responses += 1;
    rule.rate_state.day = Some(claim.day);
    rule.rate_state.responses_today = sent_today + 1;
    rule.rate_state.last_response_at = Some(claim.at);
    true
}

/// Writes trigger and response bookkeeping to the rule store.
#[derive(Clone)]
pub struct AnalyticsRecorder {
    store: Arc<dyn RuleStore>,
}

impl AnalyticsRecorder {
    pub fn new(store: Arc<dyn RuleStore>) -> Self {
        Self { store }
    }

    pub async fn record_trigger(
        &self,
        rule_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let recorded = self.store.record_trigger(rule_id, at).await?;
        debug!(rule_id = %rule_id, recorded, "Recorded trigger");
        Ok(recorded)
    }

    /// Claim a response slot for `rule`. The claim re-checks the rule's
    /// daily cap and cooldown against the stored state, so two concurrent
    /// matches cannot both take the last slot. Returns the granted claim,
    /// or `None` if it was refused.
    pub async fn record_response(
        &self,
        rule: &AutoresponderRule,
        at: DateTime<Utc>,
        offset: FixedOffset,
        response_time_ms: f64,
    ) -> Result<Option<ResponseClaim>, DatabaseError> {
        let rate = rule.conditions.rate_limiting.unwrap_or_default();
        let claim = ResponseClaim {
            at,
            day: local_day(at, offset),
            max_per_day: rate.max_responses_per_day,
            cooldown: rate
                .cooldown_hours
                .filter(|h| *h > 0)
                .map(|h| Duration::hours(i64::from(h))),
            response_time_ms,
        };
        let claimed = self.store.claim_response(rule.id, &claim).await?;
        debug!(rule_id = %rule.id, claimed, "Claimed response");
        Ok(claimed.then_some(claim))
    }
}

// ── Summary ─────────────────────────────────────────────────────────

/// Per-rule line in an [`AnalyticsSummary`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleStats {
    pub rule_id: Uuid,
    pub name: String,
    pub is_active: bool,
    pub priority: u8,
    pub total_triggers: u64,
    pub total_responses: u64,
    pub success_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_triggered: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_response_time_ms: Option<f64>,
}

/// Aggregate analytics for one owner.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSummary {
    pub owner_id: String,
    pub total_rules: usize,
    pub active_rules: usize,
    pub total_triggers: u64,
    pub total_responses: u64,
    pub success_rate: f64,
    /// Busiest rules first.
    pub rules: Vec<RuleStats>,
}

impl AnalyticsSummary {
    pub fn from_rules(owner_id: &str, rules: &[AutoresponderRule]) -> Self {
        let mut stats: Vec<RuleStats> = rules
            .iter()
            .map(|r| RuleStats {
                rule_id: r.id,
                name: r.name.clone(),
                is_active: r.is_active,
                priority: r.priority,
                total_triggers: r.analytics.total_triggers,
                total_responses: r.analytics.total_responses,
                success_rate: r.analytics.success_rate(),
                last_triggered: r.analytics.last_triggered,
                average_response_time_ms: r.analytics.average_response_time_ms,
            })
            .collect();
        stats.sort_by(|a, b| {
            b.total_triggers
                .cmp(&a.total_triggers)
                .then_with(|| a.name.cmp(&b.name))
        });

        let total_triggers = stats.iter().map(|s| s.total_triggers).sum();
        let total_responses = stats.iter().map(|s| s.total_responses).sum();
        let success_rate = if total_triggers == 0 {
            0.0
        } else {
            total_responses as f64 / total_triggers as f64
        };

        Self {
            owner_id: owner_id.to_string(),
            total_rules: rules.len(),
            active_rules: rules.iter().filter(|r| r.is_active).count(),
            total_triggers,
            total_responses,
            success_rate,
            rules: stats,
        }
    }
}
