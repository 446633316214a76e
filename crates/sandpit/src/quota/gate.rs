//! Quota gate consulted before governed session operations.

use std::sync::Arc;

use anyhow::Result;
use log::{debug, warn};

use super::ledger::{DateRange, UsageLedger};
use super::plans::{QuotaConfig, QuotaEvaluation, QuotaStatus, evaluate};

/// Classifies monthly usage and blocks users over their plan.
#[derive(Clone)]
pub struct QuotaGate {
    config: QuotaConfig,
    ledger: Arc<dyn UsageLedger>,
}

impl QuotaGate {
    pub fn new(config: QuotaConfig, ledger: Arc<dyn UsageLedger>) -> Self {
        Self { config, ledger }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Evaluate a user's usage for the current month.
    pub async fn evaluate(&self, user_id: &str) -> Result<QuotaEvaluation> {
        let plan = self.ledger.plan_for_user(user_id).await?;
        let usage = self
            .ledger
            .usage(user_id, &DateRange::current_month())
            .await?;
        Ok(evaluate(user_id, plan, usage, self.config.plan(plan)))
    }

    /// Admit or reject an operation for `user_id`.
    ///
    /// Only EXCEEDED rejects. A failed evaluation admits the operation.
    pub async fn check(&self, user_id: &str) -> Result<(), Box<QuotaEvaluation>> {
        if !self.config.enabled {
            return Ok(());
        }

        match self.evaluate(user_id).await {
            Ok(eval) => match eval.status {
                QuotaStatus::Exceeded => {
                    debug!(
                        "quota exceeded for user {} ({}% of {} plan)",
                        user_id, eval.max_pct, eval.plan
                    );
                    Err(Box::new(eval))
                }
                QuotaStatus::Warn => {
                    debug!(
                        "user {} is at {}% of the {} plan",
                        user_id, eval.max_pct, eval.plan
                    );
                    Ok(())
                }
                QuotaStatus::Ok => Ok(()),
            },
            Err(err) => {
                warn!(
                    "quota evaluation failed for user {}, allowing operation: {:#}",
                    user_id, err
                );
                Ok(())
            }
        }
    }
}
