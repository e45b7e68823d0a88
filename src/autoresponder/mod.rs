//! Rule matching and response orchestration for incoming messages.
//!
//! Every incoming message flows through:
//! 1. `conditions::check()`: rate limits and time windows (no side effects)
//! 2. `triggers::evaluate()`: keyword, sender and message criteria
//! 3. `ResponseGenerator::resolve()`: template or AI text, with fallback
//! 4. `AnalyticsRecorder`: atomic trigger/response bookkeeping
//!
//! `AutoresponderEngine` drives the loop and owns rule management.

pub mod analytics;
pub mod conditions;
pub mod engine;
pub mod model;
pub mod response;
pub mod triggers;
pub mod validation;

pub use analytics::{AnalyticsRecorder, AnalyticsSummary, RuleStats};
pub use engine::AutoresponderEngine;
pub use model::{
    AutoresponderRule, IncomingMessage, MatchOutcome, NewRule, ResponseConfig, RuleUpdate,
    SenderProfile,
};
pub use response::{ResponseGenerator, ResponseSource};
