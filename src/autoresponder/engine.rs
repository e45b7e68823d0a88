//! The engine that picks which rule answers an incoming message.
//!
//! For one message the engine:
//! 1. Loads the recipient's active rules, highest priority first
//! 2. Per rule: condition gate, then trigger evaluation
//! 3. On the first match: counts the trigger, resolves the response text,
//!    and claims a response slot atomically at the store
//!
//! A rule whose response turns out empty, or whose claim is refused by a
//! concurrent call, is passed over for the next one. Rule CRUD and test
//! mode live here too so that every path shares the same validation and
//! evaluation code.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::autoresponder::analytics::{
    AnalyticsRecorder, AnalyticsSummary, apply_claim, apply_trigger,
};
use crate::autoresponder::conditions::{self, GateDecision};
use crate::autoresponder::model::{
    AutoresponderRule, IncomingMessage, MatchOutcome, NewRule, RuleUpdate, SenderProfile,
};
use crate::autoresponder::response::ResponseGenerator;
use crate::autoresponder::triggers::{self, TriggerVerdict};
use crate::autoresponder::validation::validate_rule;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{AutoresponderError, DatabaseError};
use crate::llm::LlmProvider;
use crate::store::{ResponseClaim, RuleStore};

type Result<T> = std::result::Result<T, AutoresponderError>;

/// Evaluation order: priority descending, then oldest first, then id.
pub fn evaluation_order(a: &AutoresponderRule, b: &AutoresponderRule) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// The autoresponder engine.
pub struct AutoresponderEngine {
    config: EngineConfig,
    store: Arc<dyn RuleStore>,
    generator: ResponseGenerator,
    analytics: AnalyticsRecorder,
    clock: Arc<dyn Clock>,
}

impl AutoresponderEngine {
    /// Create an engine on the system clock. Without an LLM provider,
    /// AI-generated rules answer with the fallback template.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn RuleStore>,
        llm: Option<Arc<dyn LlmProvider>>,
    ) -> Self {
        Self {
            generator: ResponseGenerator::new(llm, &config),
            analytics: AnalyticsRecorder::new(Arc::clone(&store)),
            clock: Arc::new(SystemClock),
            config,
            store,
        }
    }

    /// Replace the clock (tests use `ManualClock`).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    // ── Message processing ──────────────────────────────────────────

    /// Decide whether and how to answer `message`.
    ///
    /// "No rule matched" is an `Ok` outcome with `matched == false`. Only
    /// store failures are errors.
    pub async fn process_incoming_message(
        &self,
        message: &IncomingMessage,
    ) -> Result<MatchOutcome> {
        let owner = message.recipient_owner_id.as_str();
        let profile = message.sender_profile.as_ref();
        let now = self.clock.now();

        let mut rules = self.store.list_active_rules(owner).await?;
        rules.retain(|r| r.is_active);
        rules.sort_by(evaluation_order);

        debug!(owner = %owner, rules = rules.len(), "Processing incoming message");

        for rule in rules {
            let offset = rule
                .conditions
                .effective_offset(self.config.default_utc_offset);

            if let GateDecision::Deny(reason) =
                conditions::check(&rule.conditions, now, offset, &rule.rate_state)
            {
                debug!(
                    rule_id = %rule.id,
                    reason = reason.label(),
                    "Skipped: {}", reason
                );
                continue;
            }

            if !triggers::evaluate(&rule.triggers, &message.text, profile) {
                continue;
            }

            if !self.analytics.record_trigger(rule.id, now).await? {
                debug!(rule_id = %rule.id, "Skipped: rule deleted during processing");
                continue;
            }

            let resolved = self
                .generator
                .resolve(&rule.response, &message.text, profile)
                .await;

            if !resolved.is_usable() {
                warn!(
                    rule_id = %rule.id,
                    source = resolved.source.label(),
                    "Rule produced an empty response, trying next rule"
                );
                continue;
            }

            let elapsed_ms = resolved.elapsed.as_secs_f64() * 1000.0;
            let Some(claim) = self
                .analytics
                .record_response(&rule, now, offset, elapsed_ms)
                .await?
            else {
                info!(
                    rule_id = %rule.id,
                    "Response claim refused (rate limit taken by a concurrent message)"
                );
                continue;
            };

            info!(
                rule_id = %rule.id,
                owner = %owner,
                priority = rule.priority,
                source = resolved.source.label(),
                "Autoresponse selected"
            );

            let reasoning = format!(
                "Rule '{}' (priority {}) matched; {} response",
                rule.name,
                rule.priority,
                resolved.source.label()
            );
            // The slot is spent; a failed re-read must not lose the reply.
            let rule = match self.store.get_rule(rule.id).await {
                Ok(Some(stored)) => stored,
                Ok(None) => settled(rule, now, &claim),
                Err(e) => {
                    warn!(
                        rule_id = %rule.id,
                        error = %e,
                        "Re-reading rule after response failed"
                    );
                    settled(rule, now, &claim)
                }
            };
            return Ok(MatchOutcome::responded(rule, resolved.text, reasoning));
        }

        debug!(owner = %owner, "No rule matched");
        Ok(MatchOutcome::no_match("No active rule matched the message"))
    }

    /// Evaluate one rule against a hypothetical message.
    ///
    /// Uses the same trigger evaluation and response resolution as
    /// [`process_incoming_message`](Self::process_incoming_message), but
    /// ignores activity and conditions and never touches analytics. The
    /// reasoning notes when the rule would currently be blocked.
    pub async fn test_rule(
        &self,
        owner_id: &str,
        rule_id: Uuid,
        text: &str,
        profile: Option<&SenderProfile>,
    ) -> Result<MatchOutcome> {
        let rule = self.owned_rule(owner_id, rule_id).await?;
        let now = self.clock.now();

        let mut notes = Vec::new();
        if !rule.is_active {
            notes.push("rule is inactive and would not fire".to_string());
        }
        let offset = rule
            .conditions
            .effective_offset(self.config.default_utc_offset);
        if let GateDecision::Deny(reason) =
            conditions::check(&rule.conditions, now, offset, &rule.rate_state)
        {
            notes.push(format!("conditions would currently block it: {reason}"));
        }

        let (matched, response, mut reasoning) =
            match triggers::explain(&rule.triggers, text, profile) {
                TriggerVerdict::Unmet { criterion, detail } => {
                    (false, None, format!("Trigger '{criterion}' not met: {detail}"))
                }
                TriggerVerdict::Matched { checked } => {
                    let resolved = self.generator.resolve(&rule.response, text, profile).await;
                    let summary = if checked == 0 {
                        "Rule has no trigger criteria and matches every message".to_string()
                    } else {
                        format!("All {checked} trigger criteria matched")
                    };
                    if resolved.is_usable() {
                        (true, Some(resolved.text), summary)
                    } else {
                        (true, None, format!("{summary}, but the response is empty"))
                    }
                }
            };

        for note in notes {
            reasoning.push_str("; ");
            reasoning.push_str(&note);
        }

        debug!(rule_id = %rule.id, matched, "Tested rule");

        Ok(MatchOutcome {
            matched,
            response,
            rule: Some(rule),
            reasoning,
        })
    }

    // ── Rule management ─────────────────────────────────────────────

    pub async fn create_rule(&self, owner_id: &str, new: NewRule) -> Result<AutoresponderRule> {
        let rule = AutoresponderRule::from_new(owner_id, new, self.clock.now());
        validate_rule(&rule)?;
        self.ensure_name_free(&rule).await?;

        self.store
            .insert_rule(&rule)
            .await
            .map_err(|e| write_error(e, &rule.name))?;
        info!(rule_id = %rule.id, owner = %owner_id, name = %rule.name, "Rule created");
        Ok(rule)
    }

    /// Fetch a rule. Rules owned by someone else are reported as not found.
    pub async fn get_rule(&self, owner_id: &str, rule_id: Uuid) -> Result<AutoresponderRule> {
        self.owned_rule(owner_id, rule_id).await
    }

    /// All of an owner's rules in evaluation order.
    pub async fn list_rules(&self, owner_id: &str) -> Result<Vec<AutoresponderRule>> {
        let mut rules = self.store.list_rules(owner_id).await?;
        rules.sort_by(evaluation_order);
        Ok(rules)
    }

    pub async fn update_rule(
        &self,
        owner_id: &str,
        rule_id: Uuid,
        update: RuleUpdate,
    ) -> Result<AutoresponderRule> {
        let mut rule = self.owned_rule(owner_id, rule_id).await?;
        let renamed = update.name.is_some();
        rule.apply(update, self.clock.now());
        validate_rule(&rule)?;
        if renamed {
            self.ensure_name_free(&rule).await?;
        }

        let updated = self
            .store
            .update_rule(&rule)
            .await
            .map_err(|e| write_error(e, &rule.name))?;
        if !updated {
            return Err(AutoresponderError::NotFound { id: rule_id });
        }
        info!(rule_id = %rule_id, owner = %owner_id, "Rule updated");

        Ok(self.store.get_rule(rule_id).await?.unwrap_or(rule))
    }

    /// Shortcut for an update that only flips `isActive`.
    pub async fn set_rule_active(
        &self,
        owner_id: &str,
        rule_id: Uuid,
        active: bool,
    ) -> Result<AutoresponderRule> {
        self.update_rule(
            owner_id,
            rule_id,
            RuleUpdate {
                is_active: Some(active),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn delete_rule(&self, owner_id: &str, rule_id: Uuid) -> Result<()> {
        self.owned_rule(owner_id, rule_id).await?;
        if !self.store.delete_rule(rule_id).await? {
            return Err(AutoresponderError::NotFound { id: rule_id });
        }
        info!(rule_id = %rule_id, owner = %owner_id, "Rule deleted");
        Ok(())
    }

    pub async fn analytics_summary(&self, owner_id: &str) -> Result<AnalyticsSummary> {
        let rules = self.store.list_rules(owner_id).await?;
        Ok(AnalyticsSummary::from_rules(owner_id, &rules))
    }

    // ── Helpers ─────────────────────────────────────────────────────

    async fn owned_rule(&self, owner_id: &str, rule_id: Uuid) -> Result<AutoresponderRule> {
        match self.store.get_rule(rule_id).await? {
            Some(rule) if rule.owner_id == owner_id => Ok(rule),
            _ => Err(AutoresponderError::NotFound { id: rule_id }),
        }
    }

    async fn ensure_name_free(&self, rule: &AutoresponderRule) -> Result<()> {
        match self.store.find_rule_by_name(&rule.owner_id, &rule.name).await? {
            Some(existing) if existing.id != rule.id => Err(name_taken(&rule.name)),
            _ => Ok(()),
        }
    }
}

fn name_taken(name: &str) -> AutoresponderError {
    AutoresponderError::Conflict(format!("a rule named '{name}' already exists"))
}

/// A create or rename that lost the race for a name is still a conflict.
fn write_error(e: DatabaseError, name: &str) -> AutoresponderError {
    match e {
        DatabaseError::UniqueViolation(_) => name_taken(name),
        other => other.into(),
    }
}

/// The listed snapshot with this call's trigger and claim applied.
fn settled(
    mut rule: AutoresponderRule,
    at: DateTime<Utc>,
    claim: &ResponseClaim,
) -> AutoresponderRule {
    apply_trigger(&mut rule, at);
    apply_claim(&mut rule, claim);
    rule
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autoresponder::model::{
        Conditions, HourWindow, RateLimiting, ResponseConfig, TimeRestrictions,
    };
    use crate::clock::ManualClock;
    use crate::error::LlmError;
    use crate::llm::{CompletionRequest, CompletionResponse, FinishReason};
    use crate::store::MemoryRuleStore;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    const OWNER: &str = "u1";

    /// Mock LLM that always fails.
    struct FailingLlm;

    #[async_trait::async_trait]
    impl LlmProvider for FailingLlm {
        fn model_name(&self) -> &str {
            "failing"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> std::result::Result<CompletionResponse, LlmError> {
            Err(LlmError::RequestFailed {
                provider: "failing".into(),
                reason: "boom".into(),
            })
        }
    }

    /// Mock LLM that echoes a fixed reply.
    struct FixedLlm(&'static str);

    #[async_trait::async_trait]
    impl LlmProvider for FixedLlm {
        fn model_name(&self) -> &str {
            "fixed"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> std::result::Result<CompletionResponse, LlmError> {
            Ok(CompletionResponse {
                content: self.0.to_string(),
                finish_reason: FinishReason::Stop,
            })
        }
    }

    /// Monday 2025-03-10, 10:00 UTC.
    fn monday_10am() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 10, 0, 0).unwrap()
    }

    fn engine_with(llm: Option<Arc<dyn LlmProvider>>) -> (AutoresponderEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(monday_10am()));
        let engine = AutoresponderEngine::new(
            EngineConfig::default(),
            Arc::new(MemoryRuleStore::new()),
            llm,
        )
        .with_clock(clock.clone());
        (engine, clock)
    }

    fn engine() -> (AutoresponderEngine, Arc<ManualClock>) {
        engine_with(None)
    }

    fn from_sam(text: &str) -> IncomingMessage {
        IncomingMessage::new(OWNER, text).with_sender(SenderProfile::named("Sam"))
    }

    async fn pricing_rules(engine: &AutoresponderEngine) -> (AutoresponderRule, AutoresponderRule) {
        let a = engine
            .create_rule(
                OWNER,
                NewRule::template("Pricing", "Hi {firstName}, here's our pricing page.")
                    .with_priority(5)
                    .with_keywords(&["pricing"]),
            )
            .await
            .unwrap();
        let b = engine
            .create_rule(
                OWNER,
                NewRule::ai_generated("Pricing AI", "Explain pricing briefly")
                    .with_priority(1)
                    .with_keywords(&["pricing"]),
            )
            .await
            .unwrap();
        (a, b)
    }

    // ── Processing ──────────────────────────────────────────────────

    #[tokio::test]
    async fn higher_priority_rule_wins() {
        let (engine, _) = engine();
        let (a, b) = pricing_rules(&engine).await;

        let outcome = engine
            .process_incoming_message(&from_sam("what's your pricing?"))
            .await
            .unwrap();

        assert!(outcome.should_respond());
        assert_eq!(
            outcome.response.as_deref(),
            Some("Hi Sam, here's our pricing page.")
        );
        let fired = outcome.rule.unwrap();
        assert_eq!(fired.id, a.id);
        assert_eq!(fired.analytics.total_triggers, 1);
        assert_eq!(fired.analytics.total_responses, 1);

        let b = engine.get_rule(OWNER, b.id).await.unwrap();
        assert_eq!(b.analytics.total_triggers, 0);
        assert_eq!(b.analytics.total_responses, 0);
    }

    #[tokio::test]
    async fn no_keyword_no_response() {
        let (engine, _) = engine();
        let (a, b) = pricing_rules(&engine).await;

        let outcome = engine
            .process_incoming_message(&from_sam("hello"))
            .await
            .unwrap();

        assert!(!outcome.matched);
        assert!(outcome.response.is_none());
        for id in [a.id, b.id] {
            let rule = engine.get_rule(OWNER, id).await.unwrap();
            assert_eq!(rule.analytics.total_triggers, 0);
        }
    }

    #[tokio::test]
    async fn inactive_rules_are_ignored() {
        let (engine, _) = engine();
        let rule = engine
            .create_rule(OWNER, NewRule::template("Off", "Hi").inactive())
            .await
            .unwrap();

        let outcome = engine
            .process_incoming_message(&from_sam("anything"))
            .await
            .unwrap();
        assert!(!outcome.matched);
        let rule = engine.get_rule(OWNER, rule.id).await.unwrap();
        assert_eq!(rule.analytics.total_triggers, 0);
    }

    #[tokio::test]
    async fn equal_priority_uses_creation_order() {
        let (engine, clock) = engine();
        engine
            .create_rule(OWNER, NewRule::template("First", "first").with_priority(3))
            .await
            .unwrap();
        clock.advance(Duration::seconds(1));
        engine
            .create_rule(OWNER, NewRule::template("Second", "second").with_priority(3))
            .await
            .unwrap();

        let outcome = engine
            .process_incoming_message(&from_sam("hi"))
            .await
            .unwrap();
        assert_eq!(outcome.response.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn daily_cap_stops_rule() {
        let (engine, clock) = engine();
        engine
            .create_rule(
                OWNER,
                NewRule::template("Capped", "Hi {firstName}").with_conditions(Conditions {
                    time_restrictions: None,
                    rate_limiting: Some(RateLimiting {
                        max_responses_per_day: Some(2),
                        cooldown_hours: None,
                    }),
                }),
            )
            .await
            .unwrap();

        for _ in 0..2 {
            let outcome = engine.process_incoming_message(&from_sam("hi")).await.unwrap();
            assert!(outcome.should_respond());
        }
        let outcome = engine.process_incoming_message(&from_sam("hi")).await.unwrap();
        assert!(!outcome.should_respond());

        // New day, new budget.
        clock.advance(Duration::days(1));
        let outcome = engine.process_incoming_message(&from_sam("hi")).await.unwrap();
        assert!(outcome.should_respond());
    }

    #[tokio::test]
    async fn capped_rule_falls_through_to_next() {
        let (engine, _) = engine();
        engine
            .create_rule(
                OWNER,
                NewRule::template("Once", "once")
                    .with_priority(9)
                    .with_conditions(Conditions {
                        time_restrictions: None,
                        rate_limiting: Some(RateLimiting {
                            max_responses_per_day: Some(1),
                            cooldown_hours: None,
                        }),
                    }),
            )
            .await
            .unwrap();
        engine
            .create_rule(OWNER, NewRule::template("Always", "always"))
            .await
            .unwrap();

        let first = engine.process_incoming_message(&from_sam("hi")).await.unwrap();
        let second = engine.process_incoming_message(&from_sam("hi")).await.unwrap();
        assert_eq!(first.response.as_deref(), Some("once"));
        assert_eq!(second.response.as_deref(), Some("always"));
    }

    #[tokio::test]
    async fn cooldown_blocks_until_elapsed() {
        let (engine, clock) = engine();
        engine
            .create_rule(
                OWNER,
                NewRule::template("Cool", "hey").with_conditions(Conditions {
                    time_restrictions: None,
                    rate_limiting: Some(RateLimiting {
                        max_responses_per_day: None,
                        cooldown_hours: Some(2),
                    }),
                }),
            )
            .await
            .unwrap();

        assert!(engine.process_incoming_message(&from_sam("a")).await.unwrap().should_respond());
        clock.advance(Duration::minutes(90));
        assert!(!engine.process_incoming_message(&from_sam("b")).await.unwrap().should_respond());
        clock.advance(Duration::minutes(30));
        assert!(engine.process_incoming_message(&from_sam("c")).await.unwrap().should_respond());
    }

    #[tokio::test]
    async fn outside_business_hours_no_trigger_counted() {
        let (engine, clock) = engine();
        let rule = engine
            .create_rule(
                OWNER,
                NewRule::template("Hours", "hey").with_conditions(Conditions {
                    time_restrictions: Some(TimeRestrictions {
                        hours_of_day: Some(HourWindow { start: 9, end: 17 }),
                        ..Default::default()
                    }),
                    rate_limiting: None,
                }),
            )
            .await
            .unwrap();

        clock.set(Utc.with_ymd_and_hms(2025, 3, 10, 17, 0, 0).unwrap());
        let outcome = engine.process_incoming_message(&from_sam("hi")).await.unwrap();
        assert!(!outcome.matched);
        let rule = engine.get_rule(OWNER, rule.id).await.unwrap();
        assert_eq!(rule.analytics.total_triggers, 0);
    }

    #[tokio::test]
    async fn provider_failure_still_responds_with_fallback() {
        let (engine, _) = engine_with(Some(Arc::new(FailingLlm)));
        let rule = engine
            .create_rule(OWNER, NewRule::ai_generated("AI", "Be nice"))
            .await
            .unwrap();

        let outcome = engine.process_incoming_message(&from_sam("hello")).await.unwrap();
        assert_eq!(
            outcome.response.as_deref(),
            Some("Hi Sam, thanks for reaching out! I'll get back to you soon.")
        );
        let rule = engine.get_rule(OWNER, rule.id).await.unwrap();
        assert_eq!(rule.analytics.total_triggers, 1);
        assert_eq!(rule.analytics.total_responses, 1);
        assert!(rule.analytics.total_responses <= rule.analytics.total_triggers);
    }

    #[tokio::test]
    async fn empty_response_moves_to_next_rule() {
        let (engine, _) = engine();
        let empty = engine
            .create_rule(
                OWNER,
                NewRule::template("Blank", "{unknownField}").with_priority(9),
            )
            .await
            .unwrap();
        engine
            .create_rule(OWNER, NewRule::template("Backup", "backup"))
            .await
            .unwrap();

        let outcome = engine.process_incoming_message(&from_sam("hi")).await.unwrap();
        assert_eq!(outcome.response.as_deref(), Some("backup"));

        let empty = engine.get_rule(OWNER, empty.id).await.unwrap();
        assert_eq!(empty.analytics.total_triggers, 1);
        assert_eq!(empty.analytics.total_responses, 0);
    }

    #[tokio::test]
    async fn other_owners_rules_do_not_fire() {
        let (engine, _) = engine();
        engine
            .create_rule("someone-else", NewRule::template("Theirs", "theirs"))
            .await
            .unwrap();
        let outcome = engine.process_incoming_message(&from_sam("hi")).await.unwrap();
        assert!(!outcome.matched);
    }

    // ── Test mode ───────────────────────────────────────────────────

    #[tokio::test]
    async fn test_rule_matches_processing_output() {
        let (engine, _) = engine();
        let (a, _) = pricing_rules(&engine).await;
        let profile = SenderProfile::named("Sam");

        let tested = engine
            .test_rule(OWNER, a.id, "what's your pricing?", Some(&profile))
            .await
            .unwrap();
        let processed = engine
            .process_incoming_message(&from_sam("what's your pricing?"))
            .await
            .unwrap();

        assert!(tested.matched);
        assert_eq!(tested.response, processed.response);
    }

    #[tokio::test]
    async fn test_rule_has_no_side_effects() {
        let (engine, _) = engine_with(Some(Arc::new(FixedLlm("Generated hello"))));
        let rule = engine
            .create_rule(OWNER, NewRule::ai_generated("AI", "Greet"))
            .await
            .unwrap();

        let tested = engine.test_rule(OWNER, rule.id, "hi", None).await.unwrap();
        assert_eq!(tested.response.as_deref(), Some("Generated hello"));

        let rule = engine.get_rule(OWNER, rule.id).await.unwrap();
        assert_eq!(rule.analytics.total_triggers, 0);
        assert_eq!(rule.rate_state.responses_today, 0);
    }

    #[tokio::test]
    async fn test_rule_reports_failing_criterion() {
        let (engine, _) = engine();
        let (a, _) = pricing_rules(&engine).await;

        let tested = engine.test_rule(OWNER, a.id, "hello", None).await.unwrap();
        assert!(!tested.matched);
        assert!(tested.response.is_none());
        assert!(tested.reasoning.contains("keywords"), "{}", tested.reasoning);
    }

    #[tokio::test]
    async fn test_rule_notes_blocking_conditions() {
        let (engine, clock) = engine();
        let rule = engine
            .create_rule(
                OWNER,
                NewRule::template("Hours", "hey")
                    .inactive()
                    .with_conditions(Conditions {
                        time_restrictions: Some(TimeRestrictions {
                            hours_of_day: Some(HourWindow { start: 9, end: 17 }),
                            ..Default::default()
                        }),
                        rate_limiting: None,
                    }),
            )
            .await
            .unwrap();
        clock.set(Utc.with_ymd_and_hms(2025, 3, 10, 20, 0, 0).unwrap());

        let tested = engine.test_rule(OWNER, rule.id, "hi", None).await.unwrap();
        assert!(tested.matched);
        assert_eq!(tested.response.as_deref(), Some("hey"));
        assert!(tested.reasoning.contains("inactive"));
        assert!(tested.reasoning.contains("outside 09:00-17:00"));
    }

    #[tokio::test]
    async fn test_rule_other_owner_is_not_found() {
        let (engine, _) = engine();
        let (a, _) = pricing_rules(&engine).await;
        let err = engine.test_rule("intruder", a.id, "pricing", None).await;
        assert!(matches!(err, Err(AutoresponderError::NotFound { id }) if id == a.id));
    }

    // ── CRUD ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn create_rejects_invalid_and_duplicate() {
        let (engine, _) = engine();
        let err = engine
            .create_rule(OWNER, NewRule::template("Bad", "hi").with_priority(11))
            .await;
        assert!(matches!(err, Err(AutoresponderError::Validation { .. })));

        engine
            .create_rule(OWNER, NewRule::template("Dup", "hi"))
            .await
            .unwrap();
        let err = engine.create_rule(OWNER, NewRule::template("Dup", "hi")).await;
        assert!(matches!(err, Err(AutoresponderError::Conflict(_))));

        // Same name for a different owner is fine.
        assert!(
            engine
                .create_rule("u2", NewRule::template("Dup", "hi"))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn update_and_toggle() {
        let (engine, clock) = engine();
        let rule = engine
            .create_rule(OWNER, NewRule::template("Greeting", "hi"))
            .await
            .unwrap();
        clock.advance(Duration::minutes(5));

        let updated = engine
            .update_rule(
                OWNER,
                rule.id,
                RuleUpdate {
                    priority: Some(8),
                    response: Some(ResponseConfig::template("hello {firstName}")),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.priority, 8);
        assert_eq!(updated.created_at, rule.created_at);
        assert!(updated.updated_at > rule.updated_at);

        let off = engine.set_rule_active(OWNER, rule.id, false).await.unwrap();
        assert!(!off.is_active);
        let on = engine.set_rule_active(OWNER, rule.id, true).await.unwrap();
        assert!(on.is_active);
    }

    #[tokio::test]
    async fn update_validates_and_checks_names() {
        let (engine, _) = engine();
        let a = engine
            .create_rule(OWNER, NewRule::template("A", "a"))
            .await
            .unwrap();
        engine
            .create_rule(OWNER, NewRule::template("B", "b"))
            .await
            .unwrap();

        let err = engine
            .update_rule(
                OWNER,
                a.id,
                RuleUpdate {
                    name: Some("B".into()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(err, Err(AutoresponderError::Conflict(_))));

        let err = engine
            .update_rule(
                OWNER,
                a.id,
                RuleUpdate {
                    response: Some(ResponseConfig::ai_generated("  ")),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(err, Err(AutoresponderError::Validation { .. })));

        // Renaming to its own name is not a conflict.
        assert!(
            engine
                .update_rule(
                    OWNER,
                    a.id,
                    RuleUpdate {
                        name: Some("A".into()),
                        ..Default::default()
                    },
                )
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn delete_is_terminal_and_owner_scoped() {
        let (engine, _) = engine();
        let rule = engine
            .create_rule(OWNER, NewRule::template("Gone", "bye"))
            .await
            .unwrap();

        assert!(matches!(
            engine.delete_rule("u2", rule.id).await,
            Err(AutoresponderError::NotFound { .. })
        ));
        engine.delete_rule(OWNER, rule.id).await.unwrap();
        assert!(matches!(
            engine.get_rule(OWNER, rule.id).await,
            Err(AutoresponderError::NotFound { .. })
        ));
        assert!(matches!(
            engine.delete_rule(OWNER, rule.id).await,
            Err(AutoresponderError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn list_is_in_evaluation_order() {
        let (engine, _) = engine();
        for (name, priority) in [("low", 1), ("high", 9), ("mid", 5)] {
            engine
                .create_rule(OWNER, NewRule::template(name, "x").with_priority(priority))
                .await
                .unwrap();
        }
        let names: Vec<_> = engine
            .list_rules(OWNER)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["high", "mid", "low"]);
    }

    #[tokio::test]
    async fn analytics_summary_counts_activity() {
        let (engine, _) = engine();
        pricing_rules(&engine).await;
        engine
            .process_incoming_message(&from_sam("pricing?"))
            .await
            .unwrap();
        engine.process_incoming_message(&from_sam("hello")).await.unwrap();

        let summary = engine.analytics_summary(OWNER).await.unwrap();
        assert_eq!(summary.total_rules, 2);
        assert_eq!(summary.active_rules, 2);
        assert_eq!(summary.total_triggers, 1);
        assert_eq!(summary.total_responses, 1);
        assert_eq!(summary.rules[0].name, "Pricing");
    }

    #[test]
    fn evaluation_order_breaks_ties_by_id() {
        let now = monday_10am();
        let mut a = AutoresponderRule::from_new(OWNER, NewRule::template("a", "a"), now);
        let mut b = AutoresponderRule::from_new(OWNER, NewRule::template("b", "b"), now);
        a.id = Uuid::from_u128(1);
        b.id = Uuid::from_u128(2);
        assert_eq!(evaluation_order(&a, &b), Ordering::Less);
        b.priority = 2;
        assert_eq!(evaluation_order(&a, &b), Ordering::Greater);
    }

    /// Memory store that can fail `get_rule` on demand and can hide names
    /// from `find_rule_by_name`, so only the store's own uniqueness check
    /// stands between two creates.
    #[derive(Default)]
    struct ScriptedStore {
        inner: MemoryRuleStore,
        fail_reads: std::sync::atomic::AtomicBool,
        hide_names: bool,
    }

    #[async_trait::async_trait]
    impl RuleStore for ScriptedStore {
        async fn list_rules(
            &self,
            owner_id: &str,
        ) -> std::result::Result<Vec<AutoresponderRule>, DatabaseError> {
            self.inner.list_rules(owner_id).await
        }

        async fn list_active_rules(
            &self,
            owner_id: &str,
        ) -> std::result::Result<Vec<AutoresponderRule>, DatabaseError> {
            self.inner.list_active_rules(owner_id).await
        }

        async fn get_rule(
            &self,
            id: Uuid,
        ) -> std::result::Result<Option<AutoresponderRule>, DatabaseError> {
            if self.fail_reads.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(DatabaseError::Query("get_rule: connection reset".into()));
            }
            self.inner.get_rule(id).await
        }

        async fn find_rule_by_name(
            &self,
            owner_id: &str,
            name: &str,
        ) -> std::result::Result<Option<AutoresponderRule>, DatabaseError> {
            if self.hide_names {
                return Ok(None);
            }
            self.inner.find_rule_by_name(owner_id, name).await
        }

        async fn insert_rule(
            &self,
            rule: &AutoresponderRule,
        ) -> std::result::Result<(), DatabaseError> {
            self.inner.insert_rule(rule).await
        }

        async fn update_rule(
            &self,
            rule: &AutoresponderRule,
        ) -> std::result::Result<bool, DatabaseError> {
            self.inner.update_rule(rule).await
        }

        async fn delete_rule(&self, id: Uuid) -> std::result::Result<bool, DatabaseError> {
            self.inner.delete_rule(id).await
        }

        async fn record_trigger(
            &self,
            id: Uuid,
            at: DateTime<Utc>,
        ) -> std::result::Result<bool, DatabaseError> {
            self.inner.record_trigger(id, at).await
        }

        async fn claim_response(
            &self,
            id: Uuid,
            claim: &ResponseClaim,
        ) -> std::result::Result<bool, DatabaseError> {
            self.inner.claim_response(id, claim).await
        }
    }

    fn engine_on(store: Arc<ScriptedStore>) -> AutoresponderEngine {
        AutoresponderEngine::new(EngineConfig::default(), store, None)
            .with_clock(Arc::new(ManualClock::new(monday_10am())))
    }

    #[tokio::test]
    async fn failed_reread_keeps_the_reply() {
        let store = Arc::new(ScriptedStore::default());
        let engine = engine_on(Arc::clone(&store));
        let rule = engine
            .create_rule(OWNER, NewRule::template("Hi", "Hi {firstName}"))
            .await
            .unwrap();

        store
            .fail_reads
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let outcome = engine.process_incoming_message(&from_sam("hello")).await.unwrap();
        assert!(outcome.should_respond());
        assert_eq!(outcome.response.as_deref(), Some("Hi Sam"));

        let returned = outcome.rule.unwrap();
        assert_eq!(returned.id, rule.id);
        assert_eq!(returned.analytics.total_triggers, 1);
        assert_eq!(returned.analytics.total_responses, 1);
        assert_eq!(returned.rate_state.responses_today, 1);
        assert_eq!(returned.rate_state.last_response_at, Some(monday_10am()));

        store
            .fail_reads
            .store(false, std::sync::atomic::Ordering::SeqCst);
        let stored = engine.get_rule(OWNER, rule.id).await.unwrap();
        assert_eq!(stored.analytics, returned.analytics);
    }

    #[tokio::test]
    async fn store_uniqueness_surfaces_as_conflict() {
        let store = Arc::new(ScriptedStore {
            hide_names: true,
            ..Default::default()
        });
        let engine = engine_on(store);
        engine
            .create_rule(OWNER, NewRule::template("Same", "one"))
            .await
            .unwrap();

        let err = engine
            .create_rule(OWNER, NewRule::template("Same", "two"))
            .await
            .unwrap_err();
        assert!(matches!(err, AutoresponderError::Conflict(_)));

        let other = engine
            .create_rule(OWNER, NewRule::template("Other", "three"))
            .await
            .unwrap();
        let err = engine
            .update_rule(
                OWNER,
                other.id,
                RuleUpdate {
                    name: Some("Same".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AutoresponderError::Conflict(_)));
    }

    #[tokio::test]
    async fn concurrent_creates_with_one_name_admit_one() {
        let (engine, _) = engine();
        let engine = Arc::new(engine);
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    engine
                        .create_rule(OWNER, NewRule::template("Same", &format!("v{i}")))
                        .await
                })
            })
            .collect();

        let mut created = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => created += 1,
                Err(e) => assert!(matches!(e, AutoresponderError::Conflict(_))),
            }
        }
        assert_eq!(created, 1);
        assert_eq!(engine.list_rules(OWNER).await.unwrap().len(), 1);
    }
}
