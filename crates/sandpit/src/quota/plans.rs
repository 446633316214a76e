//! Plan limits and usage classification.

use serde::{Deserialize, Serialize};

/// Subscription plan of a user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    #[default]
    Free,
    Pro,
    Team,
}

impl std::fmt::Display for PlanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanType::Free => write!(f, "free"),
            PlanType::Pro => write!(f, "pro"),
            PlanType::Team => write!(f, "team"),
        }
    }
}

impl std::str::FromStr for PlanType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(PlanType::Free),
            "pro" => Ok(PlanType::Pro),
            "team" => Ok(PlanType::Team),
            _ => Err(format!("unknown plan type: {}", s)),
        }
    }
}

/// Monthly caps for one plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanQuota {
    pub monthly_tokens: u64,
    pub monthly_cost_usd: f64,
    /// Governance-triggered session terminations per month.
    pub monthly_terminations: u64,
    pub warn_threshold_pct: f64,
    pub exceeded_threshold_pct: f64,
}

impl PlanQuota {
    pub fn free() -> Self {
        Self {
            monthly_tokens: 1_000_000,
            monthly_cost_usd: 5.0,
            monthly_terminations: 10,
            warn_threshold_pct: 80.0,
            exceeded_threshold_pct: 100.0,
        }
    }

    pub fn pro() -> Self {
        Self {
            monthly_tokens: 10_000_000,
            monthly_cost_usd: 50.0,
            monthly_terminations: 100,
            ..Self::free()
        }
    }

    pub fn team() -> Self {
        Self {
            monthly_tokens: 50_000_000,
            monthly_cost_usd: 250.0,
            monthly_terminations: 500,
            ..Self::free()
        }
    }
}

/// Quota configuration: the static plan table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// When false every check passes without consulting the ledger.
    pub enabled: bool,
    pub free: PlanQuota,
    pub pro: PlanQuota,
    pub team: PlanQuota,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            free: PlanQuota::free(),
            pro: PlanQuota::pro(),
            team: PlanQuota::team(),
        }
    }
}

impl QuotaConfig {
    pub fn plan(&self, plan: PlanType) -> &PlanQuota {
        match plan {
            PlanType::Free => &self.free,
            PlanType::Pro => &self.pro,
            PlanType::Team => &self.team,
        }
    }
}

/// Classification of monthly usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QuotaStatus {
    Ok,
    Warn,
    Exceeded,
}

impl QuotaStatus {
    /// Classify the highest usage percentage against a plan's thresholds.
    pub fn classify(max_pct: f64, quota: &PlanQuota) -> Self {
        if max_pct >= quota.exceeded_threshold_pct {
            QuotaStatus::Exceeded
        } else if max_pct >= quota.warn_threshold_pct {
            QuotaStatus::Warn
        } else {
            QuotaStatus::Ok
        }
    }
}

impl std::fmt::Display for QuotaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaStatus::Ok => write!(f, "OK"),
            QuotaStatus::Warn => write!(f, "WARN"),
            QuotaStatus::Exceeded => write!(f, "EXCEEDED"),
        }
    }
}

/// Aggregated usage for one user over a date range.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub terminations: u64,
}

impl UsageSummary {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Percentage of `limit` consumed, rounded to two decimals.
///
/// A zero limit counts as fully used as soon as anything is used.
pub fn usage_percentage(used: f64, limit: f64) -> f64 {
    if limit <= 0.0 {
        return if used > 0.0 { 100.0 } else { 0.0 };
    }
    round2(used / limit * 100.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Full quota picture for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaEvaluation {
    pub user_id: String,
    pub plan: PlanType,
    pub status: QuotaStatus,
    pub token_pct: f64,
    pub cost_pct: f64,
    pub termination_pct: f64,
    pub max_pct: f64,
    pub usage: UsageSummary,
    pub limits: PlanQuota,
}

/// Evaluate usage against a plan.
pub fn evaluate(
    user_id: &str,
    plan: PlanType,
    usage: UsageSummary,
    quota: &PlanQuota,
) -> QuotaEvaluation {
    let token_pct = usage_percentage(usage.total_tokens() as f64, quota.monthly_tokens as f64);
    let cost_pct = usage_percentage(usage.cost_usd, quota.monthly_cost_usd);
    let termination_pct = usage_percentage(
        usage.terminations as f64,
        quota.monthly_terminations as f64,
    );
    let max_pct = token_pct.max(cost_pct).max(termination_pct);

    QuotaEvaluation {
        user_id: user_id.to_string(),
        plan,
        status: QuotaStatus::classify(max_pct, quota),
        token_pct,
        cost_pct,
        termination_pct,
        max_pct,
        usage,
        limits: quota.clone(),
    }
}
