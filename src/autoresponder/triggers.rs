//! Trigger evaluation: does a rule's trigger set match a message?
//!
//! A trigger set is a conjunction of optional criteria. Only the configured
//! ones are materialised as [`Criterion`] values, so matching is a fold over
//! that list: unconfigured criteria simply are not there to fail.

use std::sync::LazyLock;

use regex::Regex;

use crate::autoresponder::model::{LengthBounds, SenderProfile, TriggerSet};

/// Degree assumed when the profile does not say ("not connected").
pub const DEFAULT_CONNECTION_DEGREE: u8 = 3;

static LINK_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)https?://\S+").expect("link pattern is valid"));

/// One configured criterion, borrowed from the rule.
#[derive(Debug, Clone, PartialEq)]
pub enum Criterion<'a> {
    Keywords(&'a [String]),
    JobTitles(&'a [String]),
    Companies(&'a [String]),
    Industries(&'a [String]),
    ConnectionDegree(&'a [u8]),
    FirstMessage(bool),
    ContainsLinks(bool),
    Length(LengthBounds),
}

impl Criterion<'_> {
    /// Short label for logs and reasoning.
    pub fn label(&self) -> &'static str {
        match self {
            Criterion::Keywords(_) => "keywords",
            Criterion::JobTitles(_) => "job_titles",
            Criterion::Companies(_) => "companies",
            Criterion::Industries(_) => "industries",
            Criterion::ConnectionDegree(_) => "connection_degree",
            Criterion::FirstMessage(_) => "is_first_message",
            Criterion::ContainsLinks(_) => "contains_links",
            Criterion::Length(_) => "message_length",
        }
    }

    /// Does this criterion hold for the message?
    pub fn holds(&self, text: &str, profile: Option<&SenderProfile>) -> bool {
        match self {
            Criterion::Keywords(keywords) => contains_any(text, keywords),
            Criterion::JobTitles(titles) => profile
                .and_then(SenderProfile::job_title)
                .is_some_and(|v| contains_any(v, titles)),
            Criterion::Companies(companies) => profile
                .and_then(SenderProfile::company)
                .is_some_and(|v| contains_any(v, companies)),
            Criterion::Industries(industries) => profile
                .and_then(SenderProfile::industry)
                .is_some_and(|v| contains_any(v, industries)),
            Criterion::ConnectionDegree(degrees) => profile.is_some_and(|p| {
                degrees.contains(&p.connection_degree.unwrap_or(DEFAULT_CONNECTION_DEGREE))
            }),
            Criterion::FirstMessage(expected) => {
                profile.and_then(|p| p.is_first_message).unwrap_or(false) == *expected
            }
            Criterion::ContainsLinks(expected) => contains_link(text) == *expected,
            Criterion::Length(bounds) => {
                let len = text.chars().count();
                bounds.min.is_none_or(|min| len >= min) && bounds.max.is_none_or(|max| len <= max)
            }
        }
    }

    /// Human-readable description of what failed.
    pub fn describe_failure(&self, text: &str, profile: Option<&SenderProfile>) -> String {
        match self {
            Criterion::Keywords(keywords) => {
                format!("message contains none of the keywords [{}]", keywords.join(", "))
            }
            Criterion::JobTitles(titles) => match profile.and_then(SenderProfile::job_title) {
                Some(title) => format!(
                    "job title '{title}' matches none of [{}]",
                    titles.join(", ")
                ),
                None => "sender job title is unknown".to_string(),
            },
            Criterion::Companies(companies) => match profile.and_then(SenderProfile::company) {
                Some(company) => format!(
                    "company '{company}' matches none of [{}]",
                    companies.join(", ")
                ),
                None => "sender company is unknown".to_string(),
            },
            Criterion::Industries(industries) => match profile.and_then(SenderProfile::industry) {
                Some(industry) => format!(
                    "industry '{industry}' matches none of [{}]",
                    industries.join(", ")
                ),
                None => "sender industry is unknown".to_string(),
            },
            Criterion::ConnectionDegree(degrees) => match profile {
                Some(p) => format!(
                    "connection degree {} is not one of {:?}",
                    p.connection_degree.unwrap_or(DEFAULT_CONNECTION_DEGREE),
                    degrees
                ),
                None => "no sender profile to check connection degree".to_string(),
            },
            Criterion::FirstMessage(expected) => {
                if *expected {
                    "not the sender's first message".to_string()
                } else {
                    "rule only answers follow-up messages".to_string()
                }
            }
            Criterion::ContainsLinks(expected) => {
                if *expected {
                    "message contains no link".to_string()
                } else {
                    "message contains a link".to_string()
                }
            }
            Criterion::Length(bounds) => format!(
                "message length {} outside {}..={}",
                text.chars().count(),
                bounds.min.map(|m| m.to_string()).unwrap_or_default(),
                bounds.max.map(|m| m.to_string()).unwrap_or_default(),
            ),
        }
    }
}

impl TriggerSet {
    /// The configured criteria, cheapest first.
    pub fn criteria(&self) -> Vec<Criterion<'_>> {
        let mut criteria = Vec::new();

        if !self.keywords.is_empty() {
            criteria.push(Criterion::Keywords(&self.keywords));
        }

        if let Some(ref message) = self.message_criteria {
            if let Some(expected) = message.is_first_message {
                criteria.push(Criterion::FirstMessage(expected));
            }
            if let Some(expected) = message.contains_links {
                criteria.push(Criterion::ContainsLinks(expected));
            }
            if let Some(bounds) = message.message_length
                && (bounds.min.is_some() || bounds.max.is_some())
            {
                criteria.push(Criterion::Length(bounds));
            }
        }

        if let Some(ref sender) = self.sender_criteria {
            if !sender.job_titles.is_empty() {
                criteria.push(Criterion::JobTitles(&sender.job_titles));
            }
            if !sender.companies.is_empty() {
                criteria.push(Criterion::Companies(&sender.companies));
            }
            if !sender.industries.is_empty() {
                criteria.push(Criterion::Industries(&sender.industries));
            }
            if !sender.connection_degree.is_empty() {
                criteria.push(Criterion::ConnectionDegree(&sender.connection_degree));
            }
        }

        criteria
    }
}

/// Result of a detailed trigger check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerVerdict {
    Matched { checked: usize },
    Unmet { criterion: &'static str, detail: String },
}

impl TriggerVerdict {
    pub fn is_match(&self) -> bool {
        matches!(self, TriggerVerdict::Matched { .. })
    }
}

/// Do all configured criteria hold?
pub fn evaluate(triggers: &TriggerSet, text: &str, profile: Option<&SenderProfile>) -> bool {
    triggers
        .criteria()
        .iter()
        .all(|criterion| criterion.holds(text, profile))
}

/// Like [`evaluate`], but reports the first criterion that failed.
pub fn explain(triggers: &TriggerSet, text: &str, profile: Option<&SenderProfile>) -> TriggerVerdict {
    let criteria = triggers.criteria();
    match criteria.iter().find(|c| !c.holds(text, profile)) {
        Some(failed) => TriggerVerdict::Unmet {
            criterion: failed.label(),
            detail: failed.describe_failure(text, profile),
        },
        None => TriggerVerdict::Matched {
            checked: criteria.len(),
        },
    }
}

/// Whether the text contains an http(s) URL.
pub fn contains_link(text: &str) -> bool {
    LINK_PATTERN.is_match(text)
}

/// Case-insensitive "haystack contains any needle".
fn contains_any(haystack: &str, needles: &[String]) -> bool {
    let haystack = haystack.to_lowercase();
    needles
        .iter()
        .any(|needle| haystack.contains(&needle.to_lowercase()))
}
