//! Monthly usage quotas.
//!
//! Usage comes from an external ledger and is classified against the
//! user's plan as OK, WARN or EXCEEDED. Only EXCEEDED blocks work, and an
//! unreachable ledger never blocks anything.

mod gate;
mod ledger;
mod plans;

pub use gate::QuotaGate;
pub use ledger::{DateRange, SqliteUsageLedger, UsageLedger, UsageRecord};
pub use plans::{
    PlanQuota, PlanType, QuotaConfig, QuotaEvaluation, QuotaStatus, UsageSummary, evaluate,
    usage_percentage,
};
