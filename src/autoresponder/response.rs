//! Turns a rule's response config into reply text.
//!
//! Templates are rendered locally. AI-generated responses go through the
//! configured `LlmProvider` under a hard timeout; any failure falls back to
//! [`FALLBACK_TEMPLATE`] and is reported through a `warn!` event only.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::{Captures, Regex};
use tracing::{debug, warn};

use crate::autoresponder::model::{ResponseConfig, ResponseStrategy, SenderProfile};
use crate::config::EngineConfig;
use crate::error::LlmError;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};

/// Used whenever generation fails or no provider is configured.
pub const FALLBACK_TEMPLATE: &str =
    "Hi {firstName}, thanks for reaching out! I'll get back to you soon.";

/// Incoming text sent to the provider is truncated to this many characters.
const MESSAGE_PREVIEW_CHARS: usize = 1000;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
});

/// Where the resolved text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Template,
    Generated,
    Fallback,
}

impl ResponseSource {
    pub fn label(&self) -> &'static str {
        match self {
            ResponseSource::Template => "template",
            ResponseSource::Generated => "generated",
            ResponseSource::Fallback => "fallback",
        }
    }
}

/// Output of [`ResponseGenerator::resolve`].
#[derive(Debug, Clone)]
pub struct ResolvedResponse {
    pub text: String,
    pub source: ResponseSource,
    /// Wall time spent resolving, including any provider round-trip.
    pub elapsed: Duration,
}

impl ResolvedResponse {
    /// Empty (after trimming) text is not worth sending.
    pub fn is_usable(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

/// Render a template against a sender profile.
///
/// Known placeholders get their fallbacks when the profile lacks the field;
/// any other `{identifier}` is replaced with an empty string. Text outside
/// placeholders is left untouched.
pub fn render_template(template: &str, profile: Option<&SenderProfile>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            placeholder_value(&caps[1], profile)
        })
        .into_owned()
}

fn placeholder_value(name: &str, profile: Option<&SenderProfile>) -> String {
    let first_name = profile.and_then(SenderProfile::first_name);
    let value = match name {
        "firstName" => first_name.unwrap_or("there"),
        "lastName" => profile.and_then(SenderProfile::last_name).unwrap_or(""),
        "fullName" => profile
            .and_then(SenderProfile::full_name)
            .or(first_name)
            .unwrap_or("there"),
        "company" => profile
            .and_then(SenderProfile::company)
            .unwrap_or("your company"),
        "jobTitle" => profile
            .and_then(SenderProfile::job_title)
            .unwrap_or("your role"),
        _ => "",
    };
    value.to_string()
}

/// Produces reply text for a matched rule.
pub struct ResponseGenerator {
    llm: Option<Arc<dyn LlmProvider>>,
    timeout: Duration,
    temperature: f32,
    max_tokens: u32,
}

impl ResponseGenerator {
    /// Create a generator. Without a provider every AI-generated rule answers
    /// with the fallback template.
    pub fn new(llm: Option<Arc<dyn LlmProvider>>, config: &EngineConfig) -> Self {
        Self {
            llm,
            timeout: config.generation_timeout,
            temperature: config.generation_temperature,
            max_tokens: config.generation_max_tokens,
        }
    }

    /// Resolve the response text for `response`. Never fails: provider
    /// problems degrade to the fallback template.
    pub async fn resolve(
        &self,
        response: &ResponseConfig,
        message_text: &str,
        profile: Option<&SenderProfile>,
    ) -> ResolvedResponse {
        let started = tokio::time::Instant::now();

        let (text, source) = match &response.strategy {
            ResponseStrategy::Template { template } => {
                (render_template(template, profile), ResponseSource::Template)
            }
            ResponseStrategy::AiGenerated { ai_prompt } => {
                match self.generate(ai_prompt, message_text, profile).await {
                    Ok(text) => (text, ResponseSource::Generated),
                    Err(e) => {
                        warn!(error = %e, "AI generation failed, using fallback template");
                        (
                            render_template(FALLBACK_TEMPLATE, profile),
                            ResponseSource::Fallback,
                        )
                    }
                }
            }
        };

        ResolvedResponse {
            text,
            source,
            elapsed: started.elapsed(),
        }
    }

    async fn generate(
        &self,
        ai_prompt: &str,
        message_text: &str,
        profile: Option<&SenderProfile>,
    ) -> Result<String, LlmError> {
        let Some(ref llm) = self.llm else {
            return Err(LlmError::RequestFailed {
                provider: "none".to_string(),
                reason: "no text-generation provider configured".to_string(),
            });
        };

        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_system_prompt(ai_prompt, profile)),
            ChatMessage::user(build_user_prompt(message_text)),
        ])
        .with_temperature(self.temperature)
        .with_max_tokens(self.max_tokens);

        debug!(model = llm.model_name(), "Requesting AI response");

        let response = tokio::time::timeout(self.timeout, llm.complete(request))
            .await
            .map_err(|_| LlmError::Timeout {
                provider: llm.model_name().to_string(),
                timeout: self.timeout,
            })??;

        let text = response.content.trim();
        if text.is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: llm.model_name().to_string(),
                reason: "empty completion".to_string(),
            });
        }

        Ok(text.to_string())
    }
}

// ── Prompt construction ─────────────────────────────────────────────

/// System prompt: the owner's instruction plus what we know about the sender.
fn build_system_prompt(ai_prompt: &str, profile: Option<&SenderProfile>) -> String {
    let mut prompt = String::with_capacity(512);

    prompt.push_str(
        "You write short automatic replies to direct messages on behalf of the account owner.\n\
         Reply in plain text, 2-4 sentences, friendly and professional. \
         Do not invent facts or commitments the owner has not stated.\n\n",
    );
    prompt.push_str(&format!("Owner instructions:\n{}\n", ai_prompt.trim()));

    let Some(profile) = profile else {
        return prompt;
    };

    let mut facts = Vec::new();
    if let Some(name) = profile.full_name().or(profile.first_name()) {
        facts.push(format!("Name: {}", name));
    }
    if let Some(title) = profile.job_title() {
        facts.push(format!("Job title: {}", title));
    }
    if let Some(company) = profile.company() {
        facts.push(format!("Company: {}", company));
    }
    if let Some(industry) = profile.industry() {
        facts.push(format!("Industry: {}", industry));
    }
    if let Some(degree) = profile.connection_degree {
        facts.push(format!("Connection degree: {}", degree));
    }
    if profile.is_first_message == Some(true) {
        facts.push("First message from this sender".to_string());
    }

    if !facts.is_empty() {
        prompt.push_str("\nSender:\n");
        for fact in facts {
            prompt.push_str(&format!("- {}\n", fact));
        }
    }

    prompt
}

fn build_user_prompt(message_text: &str) -> String {
    let preview: String = message_text.chars().take(MESSAGE_PREVIEW_CHARS).collect();
    format!("Incoming message:\n{}", preview)
}
