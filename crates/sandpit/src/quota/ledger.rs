//! Usage ledger: read-only source of monthly consumption.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Months, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::db::{format_timestamp, now_timestamp};

use super::plans::{PlanType, UsageSummary};

/// Half-open `[start, end)` time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    /// The UTC calendar month containing `ts`.
    pub fn month_containing(ts: DateTime<Utc>) -> Self {
        let first = ts.date_naive().with_day(1).unwrap_or_else(|| ts.date_naive());
        let start = first.and_time(NaiveTime::MIN).and_utc();
        let end = start.checked_add_months(Months::new(1)).unwrap_or(ts);
        Self { start, end }
    }

    pub fn current_month() -> Self {
        Self::month_containing(Utc::now())
    }
}

/// Source of plan assignments and usage totals.
#[async_trait]
pub trait UsageLedger: Send + Sync {
    async fn plan_for_user(&self, user_id: &str) -> Result<PlanType>;

    async fn usage(&self, user_id: &str, range: &DateRange) -> Result<UsageSummary>;
}

/// One metered usage entry written by an external collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageRecord {
    pub user_id: String,
    pub session_id: Option<String>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_usd: f64,
}

/// Ledger backed by the local database.
#[derive(Debug, Clone)]
pub struct SqliteUsageLedger {
    pool: SqlitePool,
}

impl SqliteUsageLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a usage record stamped with the current time.
    pub async fn record_usage(&self, record: &UsageRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO usage_records (user_id, session_id, input_tokens, output_tokens, cost_usd, recorded_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.user_id)
        .bind(&record.session_id)
        .bind(record.input_tokens)
        .bind(record.output_tokens)
        .bind(record.cost_usd)
        .bind(now_timestamp())
        .execute(&self.pool)
        .await
        .context("recording usage")?;
        Ok(())
    }

    /// Assign a plan to a user.
    pub async fn set_plan(&self, user_id: &str, plan: PlanType) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_plans (user_id, plan, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET plan = excluded.plan, updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(plan.to_string())
        .bind(now_timestamp())
        .execute(&self.pool)
        .await
        .context("setting user plan")?;
        Ok(())
    }
}

#[async_trait]
impl UsageLedger for SqliteUsageLedger {
    async fn plan_for_user(&self, user_id: &str) -> Result<PlanType> {
        let plan: Option<String> =
            sqlx::query_scalar("SELECT plan FROM user_plans WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .context("fetching user plan")?;

        match plan {
            Some(plan) => plan.parse().map_err(|e: String| anyhow::anyhow!(e)),
            None => Ok(PlanType::default()),
        }
    }

    async fn usage(&self, user_id: &str, range: &DateRange) -> Result<UsageSummary> {
        let start = format_timestamp(range.start);
        let end = format_timestamp(range.end);

        let (input_tokens, output_tokens, cost_usd): (i64, i64, f64) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(input_tokens), 0),
                   COALESCE(SUM(output_tokens), 0),
                   COALESCE(SUM(cost_usd), 0.0)
            FROM usage_records
            WHERE user_id = ? AND recorded_at >= ? AND recorded_at < ?
            "#,
        )
        .bind(user_id)
        .bind(&start)
        .bind(&end)
        .fetch_one(&self.pool)
        .await
        .context("summing usage records")?;

        // Counted from the audit trail, which outlives deleted sessions.
        let terminations: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM governance_events
            WHERE user_id = ? AND event = 'terminated'
              AND created_at >= ? AND created_at < ?
            "#,
        )
        .bind(user_id)
        .bind(&start)
        .bind(&end)
        .fetch_one(&self.pool)
        .await
        .context("counting session terminations")?;

        Ok(UsageSummary {
            input_tokens: input_tokens.max(0) as u64,
            output_tokens: output_tokens.max(0) as u64,
            cost_usd,
            terminations: terminations.max(0) as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use chrono::TimeZone;

    #[test]
    fn month_range_covers_calendar_month() {
        let ts = Utc.with_ymd_and_hms(2025, 12, 17, 8, 30, 0).unwrap();
        let range = DateRange::month_containing(ts);
        assert_eq!(range.start, Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(range.end, Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn sums_usage_for_current_month() {
        let db = Database::in_memory().await.unwrap();
        let ledger = SqliteUsageLedger::new(db.pool().clone());

        for tokens in [100, 250] {
            ledger
                .record_usage(&UsageRecord {
                    user_id: "alice".into(),
                    input_tokens: tokens,
                    output_tokens: 10,
                    cost_usd: 0.25,
                    ..Default::default()
                })
                .await
                .unwrap();
        }
        ledger
            .record_usage(&UsageRecord {
                user_id: "bob".into(),
                input_tokens: 999,
                ..Default::default()
            })
            .await
            .unwrap();

        let usage = ledger.usage("alice", &DateRange::current_month()).await.unwrap();
        assert_eq!(usage.input_tokens, 350);
        assert_eq!(usage.output_tokens, 20);
        assert!((usage.cost_usd - 0.5).abs() < f64::EPSILON);
        assert_eq!(usage.terminations, 0);

        let empty = ledger.usage("carol", &DateRange::current_month()).await.unwrap();
        assert_eq!(empty, UsageSummary::default());
    }

    #[tokio::test]
    async fn counts_terminations_from_governance_events() {
        let db = Database::in_memory().await.unwrap();
        let ledger = SqliteUsageLedger::new(db.pool().clone());
        let events = crate::governance::GovernanceEventRepository::new(db.pool().clone());

        for session in ["s1", "s2"] {
            events
                .record(session, "alice", "terminated", Some("idle_timeout"), None)
                .await
                .unwrap();
        }
        events
            .record("s3", "bob", "terminated", Some("max_lifetime"), None)
            .await
            .unwrap();
        events
            .record("s4", "alice", "warned", None, None)
            .await
            .unwrap();

        let usage = ledger.usage("alice", &DateRange::current_month()).await.unwrap();
        assert_eq!(usage.terminations, 2);

        let last_month = DateRange::month_containing(Utc::now() - chrono::Duration::days(40));
        let usage = ledger.usage("alice", &last_month).await.unwrap();
        assert_eq!(usage.terminations, 0);
    }

    #[tokio::test]
    async fn plans_default_to_free() {
        let db = Database::in_memory().await.unwrap();
        let ledger = SqliteUsageLedger::new(db.pool().clone());

        assert_eq!(ledger.plan_for_user("alice").await.unwrap(), PlanType::Free);
        ledger.set_plan("alice", PlanType::Team).await.unwrap();
        assert_eq!(ledger.plan_for_user("alice").await.unwrap(), PlanType::Team);
        ledger.set_plan("alice", PlanType::Pro).await.unwrap();
        assert_eq!(ledger.plan_for_user("alice").await.unwrap(), PlanType::Pro);
    }
}
