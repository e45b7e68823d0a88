//! Autoresponder rule model and the transient message/outcome types.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::parse_utc_offset;

/// Lowest allowed rule priority.
pub const MIN_PRIORITY: u8 = 1;
/// Highest allowed rule priority.
pub const MAX_PRIORITY: u8 = 10;

// ── Rule ────────────────────────────────────────────────────────────

/// One automation policy, owned by exactly one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoresponderRule {
    pub id: Uuid,
    pub owner_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub is_active: bool,
    /// 1–10, higher is evaluated first.
    pub priority: u8,
    #[serde(default)]
    pub triggers: TriggerSet,
    #[serde(default)]
    pub conditions: Conditions,
    pub response: ResponseConfig,

    // Runtime state (store-managed)
    #[serde(default)]
    pub analytics: RuleAnalytics,
    #[serde(default)]
    pub rate_state: RateState,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AutoresponderRule {
    /// Build a fresh rule from a create request. Analytics start at zero.
    pub fn from_new(owner_id: &str, new: NewRule, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            name: new.name.trim().to_string(),
            description: new.description,
            is_active: new.is_active.unwrap_or(true),
            priority: new.priority.unwrap_or(MIN_PRIORITY),
            triggers: new.triggers,
            conditions: new.conditions,
            response: new.response,
            analytics: RuleAnalytics::default(),
            rate_state: RateState::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a partial update. Id, owner, creation time and analytics are
    /// never touched.
    pub fn apply(&mut self, update: RuleUpdate, now: DateTime<Utc>) {
        if let Some(name) = update.name {
            self.name = name.trim().to_string();
        }
        if let Some(description) = update.description {
            self.description = description;
        }
        if let Some(is_active) = update.is_active {
            self.is_active = is_active;
        }
        if let Some(priority) = update.priority {
            self.priority = priority;
        }
        if let Some(triggers) = update.triggers {
            self.triggers = triggers;
        }
        if let Some(conditions) = update.conditions {
            self.conditions = conditions;
        }
        if let Some(response) = update.response {
            self.response = response;
        }
        self.updated_at = now;
    }

    /// Copy the user-editable fields of `other` onto this rule, leaving
    /// identity and runtime state alone.
    pub fn copy_definition_from(&mut self, other: &AutoresponderRule) {
        self.name = other.name.clone();
        self.description = other.description.clone();
        self.is_active = other.is_active;
        self.priority = other.priority;
        self.triggers = other.triggers.clone();
        self.conditions = other.conditions.clone();
        self.response = other.response.clone();
        self.updated_at = other.updated_at;
    }
}

/// Input for creating a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRule {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub triggers: TriggerSet,
    #[serde(default)]
    pub conditions: Conditions,
    pub response: ResponseConfig,
}

impl NewRule {
    /// A template rule with no triggers and default settings.
    pub fn template(name: &str, template: &str) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            is_active: None,
            priority: None,
            triggers: TriggerSet::default(),
            conditions: Conditions::default(),
            response: ResponseConfig::template(template),
        }
    }

    /// An AI-generated rule with no triggers and default settings.
    pub fn ai_generated(name: &str, prompt: &str) -> Self {
        Self {
            response: ResponseConfig::ai_generated(prompt),
            ..Self::template(name, "")
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_keywords(mut self, keywords: &[&str]) -> Self {
        self.triggers.keywords = keywords.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn with_triggers(mut self, triggers: TriggerSet) -> Self {
        self.triggers = triggers;
        self
    }

    pub fn with_conditions(mut self, conditions: Conditions) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = Some(false);
        self
    }
}

/// Partial update for a rule. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub triggers: Option<TriggerSet>,
    #[serde(default)]
    pub conditions: Option<Conditions>,
    #[serde(default)]
    pub response: Option<ResponseConfig>,
}

// ── Triggers ────────────────────────────────────────────────────────

/// Conjunction of optional match criteria. Empty lists mean "don't care".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerSet {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_criteria: Option<SenderCriteria>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_criteria: Option<MessageCriteria>,
}

/// Criteria over the sender profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderCriteria {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub job_titles: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub companies: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub industries: Vec<String>,
    /// Accepted connection degrees (1, 2, 3).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connection_degree: Vec<u8>,
}

/// Criteria over the message itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageCriteria {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_first_message: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains_links: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_length: Option<LengthBounds>,
}

/// Inclusive character-count bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LengthBounds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<usize>,
}

// ── Conditions ──────────────────────────────────────────────────────

/// Temporal and throughput gates checked before trigger matching.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conditions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_restrictions: Option<TimeRestrictions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limiting: Option<RateLimiting>,
}

impl Conditions {
    /// The offset used for this rule's weekday/hour checks and daily counter.
    ///
    /// Falls back to `default` when the rule declares no timezone or one that
    /// does not parse (validation rejects the latter on write).
    pub fn effective_offset(&self, default: FixedOffset) -> FixedOffset {
        self.time_restrictions
            .as_ref()
            .and_then(|t| t.timezone.as_deref())
            .and_then(parse_utc_offset)
            .unwrap_or(default)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRestrictions {
    /// 0 = Sunday … 6 = Saturday.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub days_of_week: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hours_of_day: Option<HourWindow>,
    /// Fixed UTC offset such as `+02:00`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

/// `start <= hour < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourWindow {
    pub start: u8,
    pub end: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimiting {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_responses_per_day: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_hours: Option<u32>,
}

// ── Response ────────────────────────────────────────────────────────

/// How a rule answers, plus declared follow-ups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseConfig {
    #[serde(flatten)]
    pub strategy: ResponseStrategy,
    /// Declared only; scheduling them is up to the caller.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub follow_up_actions: Vec<FollowUpAction>,
}

impl ResponseConfig {
    pub fn template(text: &str) -> Self {
        Self {
            strategy: ResponseStrategy::Template {
                template: text.to_string(),
            },
            follow_up_actions: Vec::new(),
        }
    }

    pub fn ai_generated(prompt: &str) -> Self {
        Self {
            strategy: ResponseStrategy::AiGenerated {
                ai_prompt: prompt.to_string(),
            },
            follow_up_actions: Vec::new(),
        }
    }
}

/// The two mutually exclusive response strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseStrategy {
    /// Placeholder substitution on a fixed text.
    Template {
        #[serde(default)]
        template: String,
    },
    /// Delegated to the text-generation provider, template fallback on failure.
    AiGenerated {
        #[serde(default, rename = "aiPrompt")]
        ai_prompt: String,
    },
}

impl ResponseStrategy {
    pub fn type_tag(&self) -> &'static str {
        match self {
            ResponseStrategy::Template { .. } => "template",
            ResponseStrategy::AiGenerated { .. } => "ai_generated",
        }
    }
}

/// A follow-up the owner wants after the automatic reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpAction {
    #[serde(default)]
    pub delay_hours: u32,
    #[serde(flatten)]
    pub kind: FollowUpKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum FollowUpKind {
    SendMessage { message: String },
    AddTag { tag: String },
    NotifyOwner,
}

// ── Runtime state ───────────────────────────────────────────────────

/// Per-rule counters. Only the analytics recorder writes these.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleAnalytics {
    pub total_triggers: u64,
    pub total_responses: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_triggered: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_response_time_ms: Option<f64>,
}

impl RuleAnalytics {
    /// `total_responses / total_triggers`, or 0 when nothing has triggered.
    pub fn success_rate(&self) -> f64 {
        if self.total_triggers == 0 {
            0.0
        } else {
            self.total_responses as f64 / self.total_triggers as f64
        }
    }
}

/// Send history backing the rate limiter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateState {
    /// Local day the counter below belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<NaiveDate>,
    #[serde(default)]
    pub responses_today: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_response_at: Option<DateTime<Utc>>,
}

impl RateState {
    /// Responses already counted for `day` (0 once the day has rolled over).
    pub fn responses_on(&self, day: NaiveDate) -> u32 {
        if self.day == Some(day) {
            self.responses_today
        } else {
            0
        }
    }
}

// ── Inbound message ─────────────────────────────────────────────────

/// Free-form sender attributes. Empty strings count as absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderProfile {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub connection_degree: Option<u8>,
    #[serde(default)]
    pub is_first_message: Option<bool>,
}

impl SenderProfile {
    pub fn named(first_name: &str) -> Self {
        Self {
            first_name: Some(first_name.to_string()),
            ..Self::default()
        }
    }

    pub fn first_name(&self) -> Option<&str> {
        non_empty(&self.first_name)
    }

    pub fn last_name(&self) -> Option<&str> {
        non_empty(&self.last_name)
    }

    pub fn full_name(&self) -> Option<&str> {
        non_empty(&self.full_name)
    }

    pub fn job_title(&self) -> Option<&str> {
        non_empty(&self.job_title)
    }

    pub fn company(&self) -> Option<&str> {
        non_empty(&self.company)
    }

    pub fn industry(&self) -> Option<&str> {
        non_empty(&self.industry)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// A message addressed to one owner's autoresponder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingMessage {
    pub text: String,
    #[serde(default)]
    pub sender_profile: Option<SenderProfile>,
    pub recipient_owner_id: String,
}

impl IncomingMessage {
    pub fn new(owner_id: &str, text: &str) -> Self {
        Self {
            text: text.to_string(),
            sender_profile: None,
            recipient_owner_id: owner_id.to_string(),
        }
    }

    pub fn with_sender(mut self, profile: SenderProfile) -> Self {
        self.sender_profile = Some(profile);
        self
    }
}

// ── Outcome ─────────────────────────────────────────────────────────

/// Result of processing (or test-evaluating) a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchOutcome {
    /// On the processing path this is "should respond".
    pub matched: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<AutoresponderRule>,
    pub reasoning: String,
}

impl MatchOutcome {
    pub fn no_match(reasoning: impl Into<String>) -> Self {
        Self {
            matched: false,
            response: None,
            rule: None,
            reasoning: reasoning.into(),
        }
    }

    pub fn responded(
        rule: AutoresponderRule,
        response: String,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            matched: true,
            response: Some(response),
            rule: Some(rule),
            reasoning: reasoning.into(),
        }
    }

    pub fn should_respond(&self) -> bool {
        self.matched && self.response.is_some()
    }
}
