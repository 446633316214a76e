//! Session governance: termination, idle and lifetime limits, exec
//! concurrency and quota admission.

use std::sync::Arc;
use std::time::Duration;

use sandpit::container::{ContainerError, container_name_for};
use sandpit::governance::{GovernanceConfig, GovernanceError};
use sandpit::session::{ExecParams, SessionError, SessionStatus};

mod common;
use common::{FailingLedger, TestContext};

fn exec_params(cmd: &[&str]) -> ExecParams {
    ExecParams {
        cmd: cmd.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

fn gone_reason(err: GovernanceError) -> String {
    match err {
        GovernanceError::Gone { reason, .. } => reason,
        other => panic!("expected Gone, got {other:?}"),
    }
}

#[tokio::test]
async fn test_first_operation_never_idles_out() {
    let ctx = TestContext::with_governance(GovernanceConfig {
        idle_timeout_ms: 50,
        ..Default::default()
    })
    .await;
    let session = ctx.create_session("alice").await;

    // Nothing is tracked yet, even though creation was a while ago.
    tokio::time::sleep(Duration::from_millis(120)).await;
    let admitted = ctx.sessions.governor().gate(&session.id).await.unwrap();
    assert_eq!(admitted.id, session.id);
}

#[tokio::test]
async fn test_idle_session_is_terminated() {
    let ctx = TestContext::with_governance(GovernanceConfig {
        idle_timeout_ms: 50,
        ..Default::default()
    })
    .await;
    let session = ctx.create_session("alice").await;
    let governor = ctx.sessions.governor();

    governor.gate(&session.id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let err = governor.gate(&session.id).await.unwrap_err();
    assert_eq!(gone_reason(err), "idle_timeout");

    let stored = ctx.sessions.require_session(&session.id).await.unwrap();
    assert_eq!(stored.status, SessionStatus::Terminated);
    assert_eq!(stored.termination_reason.as_deref(), Some("idle_timeout"));
    assert!(stored.terminated_at.is_some());

    // The container is removed, the workspace stays for snapshots.
    assert!(ctx.runtime.container(&session.container_name).is_none());
    assert!(std::path::Path::new(&stored.workspace_path).is_dir());

    let events = governor.events().list_for_session(&session.id).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event, "terminated");
    assert_eq!(events[0].reason.as_deref(), Some("idle_timeout"));
}

#[tokio::test]
async fn test_activity_keeps_session_alive() {
    let ctx = TestContext::with_governance(GovernanceConfig {
        idle_timeout_ms: 200,
        ..Default::default()
    })
    .await;
    let session = ctx.create_session("alice").await;

    for _ in 0..4 {
        ctx.sessions.assert_usable(&session.id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
    }
    ctx.sessions.assert_usable(&session.id).await.unwrap();
}

#[tokio::test]
async fn test_lifetime_expiry_terminates() {
    let ctx = TestContext::new().await;
    let session = ctx.create_session("alice").await;
    ctx.backdate(&session.id, chrono::Duration::hours(5)).await;

    let err = ctx.sessions.governor().gate(&session.id).await.unwrap_err();
    assert_eq!(gone_reason(err), "max_lifetime");
    assert!(ctx.runtime.container(&session.container_name).is_none());
}

#[tokio::test]
async fn test_termination_survives_restart() {
    let ctx = TestContext::new().await;
    let session = ctx.create_session("alice").await;
    ctx.backdate(&session.id, chrono::Duration::hours(5)).await;
    ctx.sessions.governor().gate(&session.id).await.unwrap_err();

    // Moving the clock back does not revive the session.
    ctx.backdate(&session.id, chrono::Duration::minutes(1)).await;

    let (sessions, preview) = ctx.restarted();
    let err = sessions.governor().gate(&session.id).await.unwrap_err();
    assert_eq!(gone_reason(err), "max_lifetime");

    let err = preview.route(&session.id).await.unwrap_err();
    assert!(matches!(
        err,
        sandpit::preview::PreviewError::Governance(GovernanceError::Gone { .. })
    ));

    // Only the first termination is recorded.
    let events = sessions
        .governor()
        .events()
        .list_for_session(&session.id)
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn test_repeated_gate_keeps_first_reason() {
    let ctx = TestContext::with_governance(GovernanceConfig {
        idle_timeout_ms: 50,
        ..Default::default()
    })
    .await;
    let session = ctx.create_session("alice").await;
    let governor = ctx.sessions.governor();

    governor.gate(&session.id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(gone_reason(governor.gate(&session.id).await.unwrap_err()), "idle_timeout");

    ctx.backdate(&session.id, chrono::Duration::hours(5)).await;
    assert_eq!(gone_reason(governor.gate(&session.id).await.unwrap_err()), "idle_timeout");
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let ctx = TestContext::new().await;
    let err = ctx.sessions.governor().gate("missing").await.unwrap_err();
    assert!(matches!(err, GovernanceError::NotFound(_)));
}

#[tokio::test]
async fn test_concurrent_exec_limit() {
    let ctx = TestContext::with_governance(GovernanceConfig {
        max_concurrent_execs_per_session: 2,
        ..Default::default()
    })
    .await;
    let session = ctx.create_session("alice").await;
    ctx.runtime.set_exec_delay(Duration::from_millis(300));

    let mut running = Vec::new();
    for _ in 0..2 {
        let sessions = ctx.sessions.clone();
        let id = session.id.clone();
        running.push(tokio::spawn(async move {
            sessions.exec(&id, exec_params(&["sleep", "1"])).await
        }));
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(ctx.sessions.governor().state().in_flight(&session.id), 2);

    let err = ctx
        .sessions
        .exec(&session.id, exec_params(&["echo", "third"]))
        .await
        .unwrap_err();
    match err {
        SessionError::Governance(GovernanceError::ConcurrencyLimit { in_flight, limit }) => {
            assert_eq!(in_flight, 2);
            assert_eq!(limit, 2);
        }
        other => panic!("expected ConcurrencyLimit, got {other:?}"),
    }

    for handle in running {
        let output = handle.await.unwrap().unwrap();
        assert_eq!(output.stdout, "sleep 1\n");
    }
    assert_eq!(ctx.sessions.governor().state().in_flight(&session.id), 0);
    assert_eq!(ctx.runtime.peak_execs(), 2);

    // Slots are free again.
    ctx.sessions
        .exec(&session.id, exec_params(&["true"]))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_exec_slot_released_on_timeout_and_error() {
    let ctx = TestContext::new().await;
    let session = ctx.create_session("alice").await;
    ctx.runtime.set_exec_delay(Duration::from_millis(500));

    let err = ctx
        .sessions
        .exec(
            &session.id,
            ExecParams {
                timeout_ms: Some(20),
                ..exec_params(&["sleep", "60"])
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Container(ContainerError::Timeout { timeout_ms: 20 })
    ));
    assert_eq!(ctx.sessions.governor().state().in_flight(&session.id), 0);

    ctx.runtime.set_exec_delay(Duration::ZERO);
    ctx.sessions.stop_session(&session.id).await.unwrap();
    let err = ctx
        .sessions
        .exec(&session.id, exec_params(&["ls"]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Container(ContainerError::ContainerNotFound(_))
    ));
    assert_eq!(ctx.sessions.governor().state().in_flight(&session.id), 0);
}

#[tokio::test]
async fn test_nonzero_exit_is_not_an_error() {
    let ctx = TestContext::new().await;
    let session = ctx.create_session("alice").await;

    let output = ctx
        .sessions
        .exec(&session.id, exec_params(&["false"]))
        .await
        .unwrap();
    assert_eq!(output.exit_code, 1);
    assert!(!output.success());
}

#[tokio::test]
async fn test_quota_exceeded_blocks_operations() {
    let ctx = TestContext::new().await;
    let session = ctx.create_session("alice").await;
    let other = ctx.create_session("bob").await;
    ctx.exhaust_quota("alice").await;

    let err = ctx.sessions.governor().gate(&session.id).await.unwrap_err();
    match err {
        GovernanceError::QuotaExceeded(eval) => {
            assert_eq!(eval.user_id, "alice");
            assert_eq!(eval.token_pct, 100.0);
        }
        other => panic!("expected QuotaExceeded, got {other:?}"),
    }

    // Quota rejection is not a termination.
    let stored = ctx.sessions.require_session(&session.id).await.unwrap();
    assert!(stored.terminated_at.is_none());
    assert!(ctx.runtime.container(&session.container_name).is_some());

    ctx.sessions.governor().gate(&other.id).await.unwrap();
}

#[tokio::test]
async fn test_deleting_terminated_sessions_keeps_termination_count() {
    let ctx = TestContext::new().await;
    let mut ids = Vec::new();
    for _ in 0..10 {
        let session = ctx.create_session("alice").await;
        ctx.backdate(&session.id, chrono::Duration::hours(5)).await;
        ctx.sessions.governor().gate(&session.id).await.unwrap_err();
        ids.push(session.id);
    }

    let eval = ctx.quota.evaluate("alice").await.unwrap();
    assert_eq!(eval.usage.terminations, 10);
    assert_eq!(eval.status, sandpit::quota::QuotaStatus::Exceeded);

    for id in &ids {
        ctx.sessions.delete_session(id).await.unwrap();
    }
    let eval = ctx.quota.evaluate("alice").await.unwrap();
    assert_eq!(eval.usage.terminations, 10);
    assert_eq!(eval.status, sandpit::quota::QuotaStatus::Exceeded);

    let fresh = ctx.create_session("alice").await;
    assert!(matches!(
        ctx.sessions.governor().gate(&fresh.id).await.unwrap_err(),
        GovernanceError::QuotaExceeded(_)
    ));
    assert_eq!(ctx.quota.evaluate("bob").await.unwrap().usage.terminations, 0);
}

#[tokio::test]
async fn test_quota_warning_still_admits() {
    let ctx = TestContext::new().await;
    let session = ctx.create_session("alice").await;
    ctx.ledger
        .record_usage(&sandpit::quota::UsageRecord {
            user_id: "alice".to_string(),
            session_id: Some(session.id.clone()),
            input_tokens: 850_000,
            output_tokens: 0,
            cost_usd: 0.0,
        })
        .await
        .unwrap();

    let eval = ctx.quota.evaluate("alice").await.unwrap();
    assert_eq!(eval.status, sandpit::quota::QuotaStatus::Warn);
    ctx.sessions.governor().gate(&session.id).await.unwrap();
}

#[tokio::test]
async fn test_ledger_failure_fails_open() {
    let ctx = TestContext::with_ledger(Arc::new(FailingLedger)).await;
    let session = ctx.create_session("alice").await;

    assert!(ctx.quota.evaluate("alice").await.is_err());
    ctx.sessions.governor().gate(&session.id).await.unwrap();
    ctx.sessions
        .exec(&session.id, exec_params(&["echo", "ok"]))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_stopped_session_state_is_forgotten() {
    let ctx = TestContext::new().await;
    let session = ctx.create_session("alice").await;
    ctx.sessions.assert_usable(&session.id).await.unwrap();
    assert!(ctx.sessions.governor().state().is_tracked(&session.id));

    ctx.sessions.stop_session(&session.id).await.unwrap();
    assert!(!ctx.sessions.governor().state().is_tracked(&session.id));
    assert!(ctx.runtime.container(&container_name_for(&session.id)).is_none());
}
