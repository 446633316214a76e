//! The session governor: lazy, per-request enforcement.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};
use serde_json::json;

use crate::container::ContainerRuntimeApi;
use crate::db::{now_timestamp, parse_timestamp};
use crate::quota::QuotaGate;
use crate::session::{Session, SessionRepository};

use super::config::GovernanceConfig;
use super::error::{GovernanceError, GovernanceResult};
use super::events::GovernanceEventRepository;
use super::state::{ExecPermit, GovernanceState};

/// Why governance ended a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    MaxLifetime,
    IdleTimeout,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::MaxLifetime => "max_lifetime",
            TerminationReason::IdleTimeout => "idle_timeout",
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gatekeeper for every session-scoped container operation.
#[derive(Clone)]
pub struct SessionGovernor {
    config: GovernanceConfig,
    sessions: SessionRepository,
    events: GovernanceEventRepository,
    runtime: Arc<dyn ContainerRuntimeApi>,
    quota: QuotaGate,
    state: Arc<GovernanceState>,
    stop_timeout_secs: u32,
}

impl SessionGovernor {
    pub fn new(
        config: GovernanceConfig,
        sessions: SessionRepository,
        events: GovernanceEventRepository,
        runtime: Arc<dyn ContainerRuntimeApi>,
        quota: QuotaGate,
        stop_timeout_secs: u32,
    ) -> Self {
        Self {
            config,
            sessions,
            events,
            runtime,
            quota,
            state: Arc::new(GovernanceState::new()),
            stop_timeout_secs,
        }
    }

    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    pub fn state(&self) -> &GovernanceState {
        &self.state
    }

    pub fn quota(&self) -> &QuotaGate {
        &self.quota
    }

    pub fn events(&self) -> &GovernanceEventRepository {
        &self.events
    }

    /// Run every check except concurrency and return the session.
    pub async fn gate(&self, session_id: &str) -> GovernanceResult<Session> {
        let session = self.admit(session_id).await?;
        self.state.touch(session_id);
        Ok(session)
    }

    /// Run every check and reserve an exec slot for the caller.
    pub async fn gate_exec(&self, session_id: &str) -> GovernanceResult<(Session, ExecPermit)> {
        let session = self.admit(session_id).await?;
        let permit = self
            .state
            .try_acquire_exec(session_id, self.config.max_concurrent_execs_per_session)?;
        self.state.touch(session_id);
        Ok((session, permit))
    }

    /// Governance probe for collaborators that need consistent
    /// termination semantics without touching the container.
    pub async fn assert_usable(&self, session_id: &str) -> GovernanceResult<Session> {
        self.gate(session_id).await
    }

    /// Drop in-memory state after explicit stop or delete.
    pub fn forget(&self, session_id: &str) {
        self.state.clear(session_id);
    }

    async fn admit(&self, session_id: &str) -> GovernanceResult<Session> {
        let session = self
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| GovernanceError::NotFound(session_id.to_string()))?;

        if session.terminated_at.is_some() {
            return Err(GovernanceError::Gone {
                session_id: session.id,
                reason: session
                    .termination_reason
                    .unwrap_or_else(|| "terminated".to_string()),
            });
        }

        let created_at = parse_timestamp(&session.created_at)?;
        let age_ms = (Utc::now() - created_at).num_milliseconds();
        if age_ms > self.config.max_lifetime_ms as i64 {
            let details = json!({
                "age_ms": age_ms,
                "max_lifetime_ms": self.config.max_lifetime_ms,
            });
            return Err(self
                .terminate(&session, TerminationReason::MaxLifetime, details)
                .await);
        }

        if let Some(idle) = self.state.observe_idle(session_id)
            && idle > self.config.idle_timeout()
        {
            let details = json!({
                "idle_ms": idle.as_millis() as u64,
                "idle_timeout_ms": self.config.idle_timeout_ms,
            });
            return Err(self
                .terminate(&session, TerminationReason::IdleTimeout, details)
                .await);
        }

        if let Err(eval) = self.quota.check(&session.user_id).await {
            return Err(GovernanceError::QuotaExceeded(eval));
        }

        Ok(session)
    }

    /// Persist termination, then clean up best-effort.
    ///
    /// Returns the error the caller must surface. Only the persist step can
    /// turn it into a storage error; cleanup failures are logged.
    async fn terminate(
        &self,
        session: &Session,
        reason: TerminationReason,
        details: serde_json::Value,
    ) -> GovernanceError {
        let persisted = match self
            .sessions
            .mark_terminated(&session.id, reason.as_str(), &now_timestamp())
            .await
        {
            Ok(persisted) => persisted,
            Err(err) => return GovernanceError::Storage(err),
        };

        // Another request may have terminated it first; report its reason.
        let reason = if persisted {
            info!("Terminating session {} ({})", session.id, reason);
            if let Err(err) = self
                .events
                .record(
                    &session.id,
                    &session.user_id,
                    "terminated",
                    Some(reason.as_str()),
                    Some(&details),
                )
                .await
            {
                warn!(
                    "failed to record governance event for {}: {:#}",
                    session.id, err
                );
            }
            reason.as_str().to_string()
        } else {
            debug!("session {} already terminated", session.id);
            match self.sessions.get(&session.id).await {
                Ok(Some(stored)) => stored
                    .termination_reason
                    .unwrap_or_else(|| reason.as_str().to_string()),
                _ => reason.as_str().to_string(),
            }
        };

        if let Err(err) = self
            .runtime
            .stop_container(&session.container_name, self.stop_timeout_secs)
            .await
        {
            warn!(
                "failed to stop container {} for terminated session {}: {}",
                session.container_name, session.id, err
            );
        }
        if let Err(err) = self.runtime.remove_container(&session.container_name).await {
            warn!(
                "failed to remove container {} for terminated session {}: {}",
                session.container_name, session.id, err
            );
        }

        self.state.clear(&session.id);

        GovernanceError::Gone {
            session_id: session.id.clone(),
            reason,
        }
    }
}
