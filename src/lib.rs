//! Prioritized rule matching and automatic replies.

pub mod autoresponder;
pub mod clock;
pub mod commands;
pub mod config;
pub mod error;
pub mod llm;
pub mod store;
