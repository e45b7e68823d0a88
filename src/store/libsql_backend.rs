//! libSQL implementation of `RuleStore`.
//!
//! Triggers, conditions and the response config are stored as JSON text
//! columns; counters and send history are plain columns so that
//! `record_trigger` and `claim_response` are single conditional `UPDATE`s.
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;
use uuid::Uuid;

use crate::autoresponder::model::{AutoresponderRule, RateState, RuleAnalytics};
use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{ResponseClaim, RuleStore};

/// libSQL-backed rule store.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlRuleStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlRuleStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Rule database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;

        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn query_rules(
        &self,
        op: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<AutoresponderRule>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut rules = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => rules.push(row_to_rule(&row)?),
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("{op}: {e}"))),
            }
        }
        Ok(rules)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical timestamp format. Fixed width so that text comparison in SQL
/// matches chronological order.
fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(column: &str, s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .map(|ndt| ndt.and_utc())
        .map_err(|e| DatabaseError::Serialization(format!("{column} '{s}': {e}")))
}

fn optional_text(value: Option<String>) -> libsql::Value {
    match value {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn optional_int(value: Option<i64>) -> libsql::Value {
    match value {
        Some(n) => libsql::Value::Integer(n),
        None => libsql::Value::Null,
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(column: &str, s: &str) -> Result<T, DatabaseError> {
    serde_json::from_str(s).map_err(|e| DatabaseError::Serialization(format!("{column}: {e}")))
}

// ── Row mapping ─────────────────────────────────────────────────────

const RULE_COLUMNS: &str = "id, owner_id, name, description, is_active, priority, triggers, conditions, response, total_triggers, total_responses, last_triggered, average_response_ms, rate_day, responses_today, last_response_at, created_at, updated_at";

fn text(row: &libsql::Row, idx: i32, column: &str) -> Result<String, DatabaseError> {
    row.get::<String>(idx)
        .map_err(|e| DatabaseError::Serialization(format!("{column}: {e}")))
}

fn int(row: &libsql::Row, idx: i32, column: &str) -> Result<i64, DatabaseError> {
    row.get::<i64>(idx)
        .map_err(|e| DatabaseError::Serialization(format!("{column}: {e}")))
}

fn counter<T: TryFrom<i64>>(row: &libsql::Row, idx: i32, column: &str) -> Result<T, DatabaseError> {
    let value = int(row, idx, column)?;
    T::try_from(value)
        .map_err(|_| DatabaseError::Serialization(format!("{column}: {value} out of range")))
}

/// Nullable timestamp column. NULL reads as `None`; anything else must parse.
fn optional_datetime(
    row: &libsql::Row,
    idx: i32,
    column: &str,
) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    row.get::<String>(idx)
        .ok()
        .map(|s| parse_datetime(column, &s))
        .transpose()
}

fn row_to_rule(row: &libsql::Row) -> Result<AutoresponderRule, DatabaseError> {
    let id_str = text(row, 0, "id")?;
    let id = id_str
        .parse::<Uuid>()
        .map_err(|e| DatabaseError::Serialization(format!("id '{id_str}': {e}")))?;

    let rate_day = row
        .get::<String>(13)
        .ok()
        .map(|s| {
            NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .map_err(|e| DatabaseError::Serialization(format!("rate_day '{s}': {e}")))
        })
        .transpose()?;

    Ok(AutoresponderRule {
        id,
        owner_id: text(row, 1, "owner_id")?,
        name: text(row, 2, "name")?,
        description: text(row, 3, "description")?,
        is_active: int(row, 4, "is_active")? != 0,
        priority: counter(row, 5, "priority")?,
        triggers: from_json("triggers", &text(row, 6, "triggers")?)?,
        conditions: from_json("conditions", &text(row, 7, "conditions")?)?,
        response: from_json("response", &text(row, 8, "response")?)?,
        analytics: RuleAnalytics {
            total_triggers: counter(row, 9, "total_triggers")?,
            total_responses: counter(row, 10, "total_responses")?,
            last_triggered: optional_datetime(row, 11, "last_triggered")?,
            average_response_time_ms: row.get::<f64>(12).ok(),
        },
        rate_state: RateState {
            day: rate_day,
            responses_today: counter(row, 14, "responses_today")?,
            last_response_at: optional_datetime(row, 15, "last_response_at")?,
        },
        created_at: parse_datetime("created_at", &text(row, 16, "created_at")?)?,
        updated_at: parse_datetime("updated_at", &text(row, 17, "updated_at")?)?,
    })
}

/// Map a write failure, singling out the (owner, name) unique index.
fn write_error(op: &str, e: libsql::Error) -> DatabaseError {
    let message = e.to_string();
    if message.contains("UNIQUE constraint failed") && message.contains("autoresponder_rules.name")
    {
        DatabaseError::UniqueViolation(format!("{op}: {message}"))
    } else {
        DatabaseError::Query(format!("{op}: {message}"))
    }
}

#[async_trait]
impl RuleStore for LibSqlRuleStore {
    async fn list_rules(&self, owner_id: &str) -> Result<Vec<AutoresponderRule>, DatabaseError> {
        self.query_rules(
            "list_rules",
            &format!(
                "SELECT {RULE_COLUMNS} FROM autoresponder_rules WHERE owner_id = ?1 ORDER BY created_at, id"
            ),
            params![owner_id],
        )
        .await
    }

    async fn list_active_rules(
        &self,
        owner_id: &str,
    ) -> Result<Vec<AutoresponderRule>, DatabaseError> {
        self.query_rules(
            "list_active_rules",
            &format!(
                "SELECT {RULE_COLUMNS} FROM autoresponder_rules WHERE owner_id = ?1 AND is_active = 1"
            ),
            params![owner_id],
        )
        .await
    }

    async fn get_rule(&self, id: Uuid) -> Result<Option<AutoresponderRule>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {RULE_COLUMNS} FROM autoresponder_rules WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_rule: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_rule(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_rule: {e}"))),
        }
    }

    async fn find_rule_by_name(
        &self,
        owner_id: &str,
        name: &str,
    ) -> Result<Option<AutoresponderRule>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {RULE_COLUMNS} FROM autoresponder_rules WHERE owner_id = ?1 AND name = ?2"
                ),
                params![owner_id, name],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_rule_by_name: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_rule(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_rule_by_name: {e}"))),
        }
    }

    async fn insert_rule(&self, rule: &AutoresponderRule) -> Result<(), DatabaseError> {
        let analytics = &rule.analytics;
        let rate = &rule.rate_state;

        self.conn()
            .execute(
                &format!(
                    "INSERT INTO autoresponder_rules ({RULE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)"
                ),
                params![
                    rule.id.to_string(),
                    rule.owner_id.clone(),
                    rule.name.clone(),
                    rule.description.clone(),
                    rule.is_active as i64,
                    i64::from(rule.priority),
                    to_json(&rule.triggers)?,
                    to_json(&rule.conditions)?,
                    to_json(&rule.response)?,
                    analytics.total_triggers as i64,
                    analytics.total_responses as i64,
                    optional_text(analytics.last_triggered.map(format_datetime)),
                    match analytics.average_response_time_ms {
                        Some(ms) => libsql::Value::Real(ms),
                        None => libsql::Value::Null,
                    },
                    optional_text(rate.day.map(|d| d.format("%Y-%m-%d").to_string())),
                    i64::from(rate.responses_today),
                    optional_text(rate.last_response_at.map(format_datetime)),
                    format_datetime(rule.created_at),
                    format_datetime(rule.updated_at),
                ],
            )
            .await
            .map_err(|e| write_error("insert_rule", e))?;

        Ok(())
    }

    async fn update_rule(&self, rule: &AutoresponderRule) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE autoresponder_rules SET name=?1, description=?2, is_active=?3, priority=?4, triggers=?5, conditions=?6, response=?7, updated_at=?8 WHERE id=?9",
                params![
                    rule.name.clone(),
                    rule.description.clone(),
                    rule.is_active as i64,
                    i64::from(rule.priority),
                    to_json(&rule.triggers)?,
                    to_json(&rule.conditions)?,
                    to_json(&rule.response)?,
                    format_datetime(rule.updated_at),
                    rule.id.to_string(),
                ],
            )
            .await
            .map_err(|e| write_error("update_rule", e))?;
        Ok(count > 0)
    }

    async fn delete_rule(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "DELETE FROM autoresponder_rules WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_rule: {e}")))?;
        Ok(count > 0)
    }

    async fn record_trigger(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE autoresponder_rules SET total_triggers = total_triggers + 1, last_triggered = ?1 WHERE id = ?2",
                params![format_datetime(at), id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_trigger: {e}")))?;
        Ok(count > 0)
    }

    async fn claim_response(
        &self,
        id: Uuid,
        claim: &ResponseClaim,
    ) -> Result<bool, DatabaseError> {
        // Every expression on the right-hand side sees the pre-update row.
        let count = self
            .conn()
            .execute(
                "UPDATE autoresponder_rules SET \
                    average_response_ms = CASE WHEN average_response_ms IS NULL OR total_responses = 0 THEN ?1 \
                        ELSE average_response_ms + (?1 - average_response_ms) / (total_responses + 1) END, \
                    total_responses = total_responses + 1, \
                    responses_today = CASE WHEN rate_day = ?2 THEN responses_today + 1 ELSE 1 END, \
                    rate_day = ?2, \
                    last_response_at = ?3 \
                 WHERE id = ?4 \
                    AND total_responses < total_triggers \
                    AND (?5 IS NULL OR rate_day IS NULL OR rate_day != ?2 OR responses_today < ?5) \
                    AND (?6 IS NULL OR last_response_at IS NULL OR last_response_at <= ?6)",
                params![
                    claim.response_time_ms,
                    claim.day.format("%Y-%m-%d").to_string(),
                    format_datetime(claim.at),
                    id.to_string(),
                    optional_int(claim.max_per_day.map(i64::from)),
                    optional_text(claim.cooldown.map(|c| format_datetime(claim.at - c))),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("claim_response: {e}")))?;
        Ok(count > 0)
    }
}
