use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use autoresponder::autoresponder::AutoresponderEngine;
use autoresponder::commands::{self, Command, Reply};
use autoresponder::config::EngineConfig;
use autoresponder::llm::{LlmConfig, create_provider};
use autoresponder::store::{LibSqlRuleStore, MemoryRuleStore, RuleStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    // Logs go to stderr; stdout carries one JSON reply per command.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = EngineConfig::from_env().context("Invalid engine configuration")?;

    // ── Generation provider ─────────────────────────────────────────
    let llm = match LlmConfig::from_env()? {
        Some(llm_config) => Some(create_provider(&llm_config)?),
        None => {
            tracing::info!("No LLM API key set; AI-generated rules will use the fallback template");
            None
        }
    };

    // ── Rule store ──────────────────────────────────────────────────
    let db_path = std::env::var("AUTORESPONDER_DB_PATH")
        .unwrap_or_else(|_| "./data/autoresponder.db".to_string());

    let store: Arc<dyn RuleStore> = if db_path == ":memory:" {
        tracing::info!("Using in-memory rule store");
        Arc::new(MemoryRuleStore::new())
    } else {
        Arc::new(
            LibSqlRuleStore::new_local(Path::new(&db_path))
                .await
                .with_context(|| format!("Failed to open database at {db_path}"))?,
        )
    };

    let engine = AutoresponderEngine::new(config, store, llm);

    eprintln!("autoresponder v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", db_path);
    eprintln!("   Reading JSON commands from stdin, one per line.");

    // ── Command loop ────────────────────────────────────────────────
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await.context("Error reading stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<Command>(line) {
            Ok(command) => {
                let label = command.label();
                match commands::execute(&engine, command).await {
                    Ok(output) => Reply::success(output),
                    Err(e) => {
                        tracing::warn!(command = label, error = %e, "Command failed");
                        Reply::failure(e)
                    }
                }
            }
            Err(e) => Reply::failure(format!("Invalid command: {e}")),
        };

        let mut out = serde_json::to_string(&reply)?;
        out.push('\n');
        stdout.write_all(out.as_bytes()).await?;
        stdout.flush().await?;
    }

    Ok(())
}
