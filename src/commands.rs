//! Line-oriented JSON commands for driving the engine from stdin.
//!
//! One JSON object per line, selected by its `command` field:
//!
//! ```json
//! {"command": "create", "ownerId": "u1", "rule": {"name": "Hi", "response": {"type": "template", "template": "Hi {firstName}"}}}
//! {"command": "process", "message": {"text": "hello", "recipientOwnerId": "u1"}}
//! ```

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::autoresponder::{
    AnalyticsSummary, AutoresponderEngine, AutoresponderRule, IncomingMessage, MatchOutcome,
    NewRule, RuleUpdate, SenderProfile,
};
use crate::error::AutoresponderError;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Command {
    Process {
        message: IncomingMessage,
    },
    Test {
        owner_id: String,
        rule_id: Uuid,
        text: String,
        #[serde(default)]
        sender_profile: Option<SenderProfile>,
    },
    Create {
        owner_id: String,
        rule: NewRule,
    },
    Get {
        owner_id: String,
        rule_id: Uuid,
    },
    Update {
        owner_id: String,
        rule_id: Uuid,
        update: RuleUpdate,
    },
    Delete {
        owner_id: String,
        rule_id: Uuid,
    },
    List {
        owner_id: String,
    },
    Activate {
        owner_id: String,
        rule_id: Uuid,
    },
    Deactivate {
        owner_id: String,
        rule_id: Uuid,
    },
    Analytics {
        owner_id: String,
    },
}

impl Command {
    pub fn label(&self) -> &'static str {
        match self {
            Command::Process { .. } => "process",
            Command::Test { .. } => "test",
            Command::Create { .. } => "create",
            Command::Get { .. } => "get",
            Command::Update { .. } => "update",
            Command::Delete { .. } => "delete",
            Command::List { .. } => "list",
            Command::Activate { .. } => "activate",
            Command::Deactivate { .. } => "deactivate",
            Command::Analytics { .. } => "analytics",
        }
    }
}

/// Result payload of a command.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum CommandOutput {
    Outcome(MatchOutcome),
    Rule(Box<AutoresponderRule>),
    Rules(Vec<AutoresponderRule>),
    Summary(AnalyticsSummary),
    #[serde(rename_all = "camelCase")]
    Deleted {
        deleted_rule_id: Uuid,
    },
}

/// One line of output.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Reply {
    Ok { ok: bool, result: CommandOutput },
    Err { ok: bool, error: String },
}

impl Reply {
    pub fn success(result: CommandOutput) -> Self {
        Reply::Ok { ok: true, result }
    }

    pub fn failure(error: impl ToString) -> Self {
        Reply::Err {
            ok: false,
            error: error.to_string(),
        }
    }
}

/// Run one command against the engine.
pub async fn execute(
    engine: &AutoresponderEngine,
    command: Command,
) -> Result<CommandOutput, AutoresponderError> {
    let output = match command {
        Command::Process { message } => {
            CommandOutput::Outcome(engine.process_incoming_message(&message).await?)
        }
        Command::Test {
            owner_id,
            rule_id,
            text,
            sender_profile,
        } => CommandOutput::Outcome(
            engine
                .test_rule(&owner_id, rule_id, &text, sender_profile.as_ref())
                .await?,
        ),
        Command::Create { owner_id, rule } => {
            CommandOutput::Rule(Box::new(engine.create_rule(&owner_id, rule).await?))
        }
        Command::Get { owner_id, rule_id } => {
            CommandOutput::Rule(Box::new(engine.get_rule(&owner_id, rule_id).await?))
        }
        Command::Update {
            owner_id,
            rule_id,
            update,
        } => CommandOutput::Rule(Box::new(
            engine.update_rule(&owner_id, rule_id, update).await?,
        )),
        Command::Delete { owner_id, rule_id } => {
            engine.delete_rule(&owner_id, rule_id).await?;
            CommandOutput::Deleted {
                deleted_rule_id: rule_id,
            }
        }
        Command::List { owner_id } => CommandOutput::Rules(engine.list_rules(&owner_id).await?),
        Command::Activate { owner_id, rule_id } => CommandOutput::Rule(Box::new(
            engine.set_rule_active(&owner_id, rule_id, true).await?,
        )),
        Command::Deactivate { owner_id, rule_id } => CommandOutput::Rule(Box::new(
            engine.set_rule_active(&owner_id, rule_id, false).await?,
        )),
        Command::Analytics { owner_id } => {
            CommandOutput::Summary(engine.analytics_summary(&owner_id).await?)
        }
    };
    Ok(output)
}
