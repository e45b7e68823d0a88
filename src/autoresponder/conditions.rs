//! Condition gate: rate limits and time windows checked before matching.
//!
//! A denied rule is skipped silently: it does not count as a trigger.

use std::fmt;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Timelike, Utc};

use crate::autoresponder::model::{Conditions, HourWindow, RateLimiting, RateState, TimeRestrictions};

/// Why the gate refused a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    DailyCapReached { sent: u32, cap: u32 },
    CoolingDown { remaining: Duration },
    DayOfWeek { day: u8 },
    OutsideHours { hour: u8, window: HourWindow },
}

impl DenyReason {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            DenyReason::DailyCapReached { .. } => "daily_cap",
            DenyReason::CoolingDown { .. } => "cooldown",
            DenyReason::DayOfWeek { .. } => "day_of_week",
            DenyReason::OutsideHours { .. } => "hours_of_day",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::DailyCapReached { sent, cap } => {
                write!(f, "daily limit reached ({sent}/{cap} responses today)")
            }
            DenyReason::CoolingDown { remaining } => {
                write!(f, "cooling down for another {} minutes", remaining.num_minutes().max(1))
            }
            DenyReason::DayOfWeek { day } => write!(f, "not active on weekday {day}"),
            DenyReason::OutsideHours { hour, window } => write!(
                f,
                "hour {hour} is outside {:02}:00-{:02}:00",
                window.start, window.end
            ),
        }
    }
}

/// Gate decision for one rule at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Deny(DenyReason),
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allow)
    }
}

/// Rate check first, then time check. `offset` is the rule's effective
/// timezone.
pub fn check(
    conditions: &Conditions,
    now: DateTime<Utc>,
    offset: FixedOffset,
    history: &RateState,
) -> GateDecision {
    if let Some(ref rate) = conditions.rate_limiting
        && let Some(reason) = check_rate(rate, now, offset, history)
    {
        return GateDecision::Deny(reason);
    }

    if let Some(ref time) = conditions.time_restrictions
        && let Some(reason) = check_time(time, now.with_timezone(&offset))
    {
        return GateDecision::Deny(reason);
    }

    GateDecision::Allow
}

/// Boolean form of [`check`].
pub fn allow(
    conditions: &Conditions,
    now: DateTime<Utc>,
    offset: FixedOffset,
    history: &RateState,
) -> bool {
    check(conditions, now, offset, history).is_allowed()
}

/// The calendar day `now` falls on in `offset`.
pub fn local_day(now: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    now.with_timezone(&offset).date_naive()
}

fn check_rate(
    rate: &RateLimiting,
    now: DateTime<Utc>,
    offset: FixedOffset,
    history: &RateState,
) -> Option<DenyReason> {
    if let Some(cap) = rate.max_responses_per_day {
        let sent = history.responses_on(local_day(now, offset));
        if sent >= cap {
            return Some(DenyReason::DailyCapReached { sent, cap });
        }
    }

    if let Some(hours) = rate.cooldown_hours
        && hours > 0
        && let Some(last) = history.last_response_at
    {
        let cooldown = Duration::hours(i64::from(hours));
        let elapsed = now.signed_duration_since(last);
        if elapsed < cooldown {
            return Some(DenyReason::CoolingDown {
                remaining: cooldown - elapsed,
            });
        }
    }

    None
}

fn check_time(time: &TimeRestrictions, local: DateTime<FixedOffset>) -> Option<DenyReason> {
    if !time.days_of_week.is_empty() {
        let day = local.weekday().num_days_from_sunday() as u8;
        if !time.days_of_week.contains(&day) {
            return Some(DenyReason::DayOfWeek { day });
        }
    }

    if let Some(window) = time.hours_of_day {
        let hour = local.hour() as u8;
        if !(window.start <= hour && hour < window.end) {
            return Some(DenyReason::OutsideHours { hour, window });
        }
    }

    None
}
