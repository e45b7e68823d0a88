//! Rule validation, run on every create and update before anything is stored.

use crate::autoresponder::model::{
    AutoresponderRule, Conditions, FollowUpKind, MAX_PRIORITY, MIN_PRIORITY, ResponseConfig,
    ResponseStrategy, TriggerSet,
};
use crate::autoresponder::triggers::DEFAULT_CONNECTION_DEGREE;
use crate::config::parse_utc_offset;
use crate::error::AutoresponderError;

type Check = Result<(), AutoresponderError>;

/// Check a complete rule definition. Returns the first problem found.
pub fn validate_rule(rule: &AutoresponderRule) -> Check {
    if rule.name.trim().is_empty() {
        return Err(AutoresponderError::validation("name", "must not be empty"));
    }
    if rule.owner_id.trim().is_empty() {
        return Err(AutoresponderError::validation("ownerId", "must not be empty"));
    }
    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&rule.priority) {
        return Err(AutoresponderError::validation(
            "priority",
            format!(
                "must be between {MIN_PRIORITY} and {MAX_PRIORITY}, got {}",
                rule.priority
            ),
        ));
    }

    validate_triggers(&rule.triggers)?;
    validate_conditions(&rule.conditions)?;
    validate_response(&rule.response)
}

fn validate_triggers(triggers: &TriggerSet) -> Check {
    if triggers.keywords.iter().any(|k| k.trim().is_empty()) {
        return Err(AutoresponderError::validation(
            "triggers.keywords",
            "keywords must not be blank",
        ));
    }

    if let Some(ref sender) = triggers.sender_criteria
        && let Some(degree) = sender
            .connection_degree
            .iter()
            .find(|d| !(1..=DEFAULT_CONNECTION_DEGREE).contains(*d))
    {
        return Err(AutoresponderError::validation(
            "triggers.senderCriteria.connectionDegree",
            format!("must be 1, 2 or 3, got {degree}"),
        ));
    }

    if let Some(ref message) = triggers.message_criteria
        && let Some(bounds) = message.message_length
        && let (Some(min), Some(max)) = (bounds.min, bounds.max)
        && min > max
    {
        return Err(AutoresponderError::validation(
            "triggers.messageCriteria.messageLength",
            format!("min ({min}) is greater than max ({max})"),
        ));
    }

    Ok(())
}

fn validate_conditions(conditions: &Conditions) -> Check {
    if let Some(ref time) = conditions.time_restrictions {
        if let Some(day) = time.days_of_week.iter().find(|d| **d > 6) {
            return Err(AutoresponderError::validation(
                "conditions.timeRestrictions.daysOfWeek",
                format!("weekday must be 0 (Sunday) to 6 (Saturday), got {day}"),
            ));
        }

        if let Some(window) = time.hours_of_day {
            if window.start > 23 {
                return Err(AutoresponderError::validation(
                    "conditions.timeRestrictions.hoursOfDay.start",
                    format!("must be 0-23, got {}", window.start),
                ));
            }
            if window.end > 24 {
                return Err(AutoresponderError::validation(
                    "conditions.timeRestrictions.hoursOfDay.end",
                    format!("must be 0-24, got {}", window.end),
                ));
            }
            if window.start >= window.end {
                return Err(AutoresponderError::validation(
                    "conditions.timeRestrictions.hoursOfDay",
                    format!("start ({}) must be before end ({})", window.start, window.end),
                ));
            }
        }

        if let Some(ref tz) = time.timezone
            && parse_utc_offset(tz).is_none()
        {
            return Err(AutoresponderError::validation(
                "conditions.timeRestrictions.timezone",
                format!("'{tz}' is not a UTC offset like +02:00 or UTC"),
            ));
        }
    }

    if let Some(ref rate) = conditions.rate_limiting
        && rate.max_responses_per_day == Some(0)
    {
        return Err(AutoresponderError::validation(
            "conditions.rateLimiting.maxResponsesPerDay",
            "must be at least 1",
        ));
    }

    Ok(())
}

fn validate_response(response: &ResponseConfig) -> Check {
    match &response.strategy {
        ResponseStrategy::Template { template } if template.trim().is_empty() => {
            return Err(AutoresponderError::validation(
                "response.template",
                "template responses need a non-empty template",
            ));
        }
        ResponseStrategy::AiGenerated { ai_prompt } if ai_prompt.trim().is_empty() => {
            return Err(AutoresponderError::validation(
                "response.aiPrompt",
                "AI-generated responses need a non-empty prompt",
            ));
        }
        _ => {}
    }

    for (i, action) in response.follow_up_actions.iter().enumerate() {
        let empty = match &action.kind {
            FollowUpKind::SendMessage { message } => message.trim().is_empty(),
            FollowUpKind::AddTag { tag } => tag.trim().is_empty(),
            FollowUpKind::NotifyOwner => false,
        };
        if empty {
            return Err(AutoresponderError::validation(
                format!("response.followUpActions[{i}]"),
                "follow-up payload must not be empty",
            ));
        }
    }

    Ok(())
}
