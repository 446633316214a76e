//! Test utilities and common setup.
#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::Router;
use sandpit::api::{self, AppState, PreviewState};
use sandpit::auth::{AuthConfig, AuthState, Claims};
use sandpit::container::{
    ContainerError, ContainerInfo, ContainerResult, ContainerRuntimeApi, ContainerSpec,
    ExecLimits, ExecOutput, ExecRequest,
};
use sandpit::db::{Database, format_timestamp};
use sandpit::governance::{GovernanceConfig, GovernanceEventRepository, SessionGovernor};
use sandpit::preview::PreviewProxy;
use sandpit::quota::{
    DateRange, PlanType, QuotaConfig, QuotaGate, SqliteUsageLedger, UsageLedger, UsageRecord,
    UsageSummary,
};
use sandpit::session::{
    CreateSessionRequest, Session, SessionRepository, SessionService, SessionServiceConfig,
};
use sandpit::workspace::{ProjectRepository, WorkspaceArchiver};
use tempfile::TempDir;

pub const JWT_SECRET: &str = "test-secret-for-integration-tests-minimum-32-chars";

const MTIME: i64 = 1_700_000_000;

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub running: bool,
    pub ip_address: Option<String>,
}

#[derive(Default)]
struct FakeState {
    containers: HashMap<String, FakeContainer>,
    specs: Vec<ContainerSpec>,
    calls: Vec<String>,
    /// (container, absolute path) -> content
    files: HashMap<(String, String), Vec<u8>>,
    created: usize,
}

/// In-process stand-in for the container engine.
///
/// Exec understands the file helper commands and keeps an in-memory
/// filesystem per container; any other command echoes its argv.
#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
    exec_delay_ms: AtomicUsize,
    fail_create: AtomicBool,
    active_execs: AtomicUsize,
    peak_execs: AtomicUsize,
    exec_count: AtomicUsize,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_exec_delay(&self, delay: Duration) {
        self.exec_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn container(&self, name: &str) -> Option<FakeContainer> {
        self.state.lock().unwrap().containers.get(name).cloned()
    }

    pub fn container_count(&self) -> usize {
        self.state.lock().unwrap().containers.len()
    }

    pub fn set_ip(&self, name: &str, ip: Option<&str>) {
        if let Some(container) = self.state.lock().unwrap().containers.get_mut(name) {
            container.ip_address = ip.map(str::to_string);
        }
    }

    pub fn last_spec(&self) -> Option<ContainerSpec> {
        self.state.lock().unwrap().specs.last().cloned()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn exec_count(&self) -> usize {
        self.exec_count.load(Ordering::SeqCst)
    }

    pub fn peak_execs(&self) -> usize {
        self.peak_execs.load(Ordering::SeqCst)
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn run(&self, name: &str, request: &ExecRequest) -> ExecOutput {
        let cmd: Vec<&str> = request.cmd.iter().map(String::as_str).collect();
        match cmd.as_slice() {
            ["cat", "--", path] => self.cat(name, path),
            ["sh", "-c", script, "sh", path, ..] if script.contains("cat >") => {
                self.write(name, path, request.stdin.clone().unwrap_or_default())
            }
            ["sh", "-c", script, "sh", path, ..] if script.contains("for entry") => {
                self.list(name, path)
            }
            ["sh", "-c", _, "sh", path, ..] => self.stat(name, path),
            ["false"] => ExecOutput {
                exit_code: 1,
                ..Default::default()
            },
            _ => ExecOutput {
                exit_code: 0,
                stdout: format!("{}\n", cmd.join(" ")),
                stderr: String::new(),
                truncated: false,
            },
        }
    }

    fn is_dir(state: &FakeState, name: &str, path: &str) -> bool {
        if path == "/workspace" {
            return true;
        }
        let prefix = format!("{path}/");
        state
            .files
            .keys()
            .any(|(container, file)| container == name && file.starts_with(&prefix))
    }

    fn cat(&self, name: &str, path: &str) -> ExecOutput {
        let state = self.state.lock().unwrap();
        if let Some(content) = state.files.get(&(name.to_string(), path.to_string())) {
            return ExecOutput {
                exit_code: 0,
                stdout: String::from_utf8_lossy(content).into_owned(),
                ..Default::default()
            };
        }
        let reason = if Self::is_dir(&state, name, path) {
            "Is a directory"
        } else {
            "No such file or directory"
        };
        ExecOutput {
            exit_code: 1,
            stderr: format!("cat: {path}: {reason}\n"),
            ..Default::default()
        }
    }

    fn write(&self, name: &str, path: &str, content: Vec<u8>) -> ExecOutput {
        self.state
            .lock()
            .unwrap()
            .files
            .insert((name.to_string(), path.to_string()), content);
        ExecOutput::default()
    }

    fn list(&self, name: &str, path: &str) -> ExecOutput {
        let state = self.state.lock().unwrap();
        if state
            .files
            .contains_key(&(name.to_string(), path.to_string()))
        {
            return ExecOutput {
                exit_code: 4,
                ..Default::default()
            };
        }
        if !Self::is_dir(&state, name, path) {
            return ExecOutput {
                exit_code: 3,
                ..Default::default()
            };
        }

        let prefix = format!("{path}/");
        let mut dirs = BTreeSet::new();
        let mut lines = Vec::new();
        for ((container, file), content) in &state.files {
            if container != name {
                continue;
            }
            let Some(rest) = file.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((dir, _)) => {
                    dirs.insert(dir.to_string());
                }
                None => lines.push(format!("regular file|{}|{MTIME}|{rest}", content.len())),
            }
        }
        lines.extend(
            dirs.into_iter()
                .map(|dir| format!("directory|4096|{MTIME}|{dir}")),
        );

        ExecOutput {
            exit_code: 0,
            stdout: lines.join("\n"),
            ..Default::default()
        }
    }

    fn stat(&self, name: &str, path: &str) -> ExecOutput {
        let state = self.state.lock().unwrap();
        let line = if let Some(content) = state.files.get(&(name.to_string(), path.to_string())) {
            format!("regular file|{}|{MTIME}|{path}", content.len())
        } else if Self::is_dir(&state, name, path) {
            format!("directory|4096|{MTIME}|{path}")
        } else {
            return ExecOutput {
                exit_code: 3,
                ..Default::default()
            };
        };
        ExecOutput {
            exit_code: 0,
            stdout: format!("{line}\n"),
            ..Default::default()
        }
    }
}

/// Decrements the in-flight counter however the exec ends.
struct ActiveExec<'a>(&'a AtomicUsize);

impl Drop for ActiveExec<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContainerRuntimeApi for FakeRuntime {
    async fn health_check(&self) -> ContainerResult<String> {
        Ok("fake-engine 1.0".to_string())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> ContainerResult<String> {
        self.record(format!("create {}", spec.name));
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ContainerError::ImageNotFound(spec.image.clone()));
        }

        let mut state = self.state.lock().unwrap();
        if state.containers.contains_key(&spec.name) {
            return Err(ContainerError::AlreadyExists(spec.name.clone()));
        }
        state.created += 1;
        let container = FakeContainer {
            id: format!("fake-{}", state.created),
            running: false,
            ip_address: Some(format!("172.18.0.{}", state.created + 1)),
        };
        let id = container.id.clone();
        state.containers.insert(spec.name.clone(), container);
        state.specs.push(spec.clone());
        Ok(id)
    }

    async fn start_container(&self, name: &str) -> ContainerResult<()> {
        self.record(format!("start {name}"));
        let mut state = self.state.lock().unwrap();
        let container = state
            .containers
            .get_mut(name)
            .ok_or_else(|| ContainerError::ContainerNotFound(name.to_string()))?;
        container.running = true;
        Ok(())
    }

    async fn stop_container(&self, name: &str, _timeout_seconds: u32) -> ContainerResult<()> {
        self.record(format!("stop {name}"));
        if let Some(container) = self.state.lock().unwrap().containers.get_mut(name) {
            container.running = false;
        }
        Ok(())
    }

    async fn remove_container(&self, name: &str) -> ContainerResult<()> {
        self.record(format!("remove {name}"));
        let mut state = self.state.lock().unwrap();
        state.containers.remove(name);
        state.files.retain(|(container, _), _| container != name);
        Ok(())
    }

    async fn inspect_container(&self, name: &str) -> ContainerResult<Option<ContainerInfo>> {
        let state = self.state.lock().unwrap();
        Ok(state.containers.get(name).map(|c| ContainerInfo {
            id: c.id.clone(),
            name: name.to_string(),
            running: c.running,
            status: if c.running { "running" } else { "exited" }.to_string(),
            ip_address: c.ip_address.clone(),
        }))
    }

    async fn run_exec(&self, name: &str, request: &ExecRequest) -> ContainerResult<ExecOutput> {
        self.exec_count.fetch_add(1, Ordering::SeqCst);
        match self.container(name) {
            Some(c) if c.running => {}
            Some(_) => return Err(ContainerError::NotRunning(name.to_string())),
            None => return Err(ContainerError::ContainerNotFound(name.to_string())),
        }

        let active = self.active_execs.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = ActiveExec(&self.active_execs);
        self.peak_execs.fetch_max(active, Ordering::SeqCst);

        let delay = self.exec_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        Ok(self.run(name, request))
    }
}

/// Ledger whose every read fails.
pub struct FailingLedger;

#[async_trait]
impl UsageLedger for FailingLedger {
    async fn plan_for_user(&self, _user_id: &str) -> Result<PlanType> {
        anyhow::bail!("ledger unavailable")
    }

    async fn usage(&self, _user_id: &str, _range: &DateRange) -> Result<UsageSummary> {
        anyhow::bail!("ledger unavailable")
    }
}

/// A fully wired service stack over an in-memory database and a fake engine.
pub struct TestContext {
    pub db: Database,
    pub runtime: Arc<FakeRuntime>,
    pub ledger: SqliteUsageLedger,
    pub governance: GovernanceConfig,
    pub sessions: SessionService,
    pub preview: PreviewProxy,
    pub quota: QuotaGate,
    usage: Arc<dyn UsageLedger>,
    dir: TempDir,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_governance(GovernanceConfig::default()).await
    }

    pub async fn with_governance(governance: GovernanceConfig) -> Self {
        Self::build(governance, None).await
    }

    pub async fn with_ledger(ledger: Arc<dyn UsageLedger>) -> Self {
        Self::build(GovernanceConfig::default(), Some(ledger)).await
    }

    async fn build(governance: GovernanceConfig, usage: Option<Arc<dyn UsageLedger>>) -> Self {
        let db = Database::in_memory().await.expect("in-memory database");
        let dir = tempfile::tempdir().expect("temp dir");
        let runtime = FakeRuntime::new();
        let ledger = SqliteUsageLedger::new(db.pool().clone());
        let usage = usage.unwrap_or_else(|| Arc::new(ledger.clone()));

        let (sessions, preview, quota) = wire(&db, &runtime, &usage, &governance, &dir);
        Self {
            db,
            runtime,
            ledger,
            governance,
            sessions,
            preview,
            quota,
            usage,
            dir,
        }
    }

    pub fn workspace_root(&self) -> PathBuf {
        self.dir.path().join("workspaces")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.dir.path().join("archives")
    }

    /// Fresh services on the same database and engine, as after a restart.
    pub fn restarted(&self) -> (SessionService, PreviewProxy) {
        let (sessions, preview, _) =
            wire(&self.db, &self.runtime, &self.usage, &self.governance, &self.dir);
        (sessions, preview)
    }

    pub async fn create_session(&self, user_id: &str) -> Session {
        self.sessions
            .create_session(user_id, CreateSessionRequest::default())
            .await
            .expect("create session")
    }

    /// Move a session's creation time into the past.
    pub async fn backdate(&self, session_id: &str, age: chrono::Duration) {
        let created_at = format_timestamp(chrono::Utc::now() - age);
        sqlx::query("UPDATE sessions SET created_at = ? WHERE id = ?")
            .bind(created_at)
            .bind(session_id)
            .execute(self.db.pool())
            .await
            .expect("backdate session");
    }

    /// Push a user's token usage to the top of the free plan.
    pub async fn exhaust_quota(&self, user_id: &str) {
        self.ledger
            .record_usage(&UsageRecord {
                user_id: user_id.to_string(),
                session_id: None,
                input_tokens: 600_000,
                output_tokens: 400_000,
                cost_usd: 0.0,
            })
            .await
            .expect("record usage");
    }

    pub fn workspace_dirs(&self) -> usize {
        std::fs::read_dir(self.workspace_root())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    pub fn app(&self, auth: AuthConfig) -> Router {
        let state = AppState::new(
            self.sessions.clone(),
            self.preview.clone(),
            self.quota.clone(),
            AuthState::new(auth),
            PreviewState::default(),
        );
        api::create_router(state)
    }

    /// Router with auth disabled; requests run as the dev user.
    pub fn dev_app(&self) -> Router {
        self.app(AuthConfig::default())
    }

    /// Router requiring HS256 tokens signed with [`JWT_SECRET`].
    pub fn secured_app(&self) -> Router {
        self.app(AuthConfig {
            enabled: true,
            jwt_secret: Some(JWT_SECRET.to_string()),
            allowed_origins: Vec::new(),
        })
    }
}

fn wire(
    db: &Database,
    runtime: &Arc<FakeRuntime>,
    usage: &Arc<dyn UsageLedger>,
    governance: &GovernanceConfig,
    dir: &TempDir,
) -> (SessionService, PreviewProxy, QuotaGate) {
    let runtime: Arc<dyn ContainerRuntimeApi> = runtime.clone();
    let pool = db.pool().clone();
    let quota = QuotaGate::new(QuotaConfig::default(), usage.clone());
    let repo = SessionRepository::new(pool.clone());
    let governor = SessionGovernor::new(
        governance.clone(),
        repo.clone(),
        GovernanceEventRepository::new(pool.clone()),
        runtime.clone(),
        quota.clone(),
        1,
    );
    let archiver = WorkspaceArchiver::new(
        dir.path().join("archives"),
        ProjectRepository::new(pool),
    );
    let config = SessionServiceConfig {
        workspace_root: dir.path().join("workspaces"),
        default_image: "sandpit-dev:latest".to_string(),
        network: None,
        stop_timeout_secs: 1,
        exec_limits: ExecLimits {
            timeout: Duration::from_secs(5),
            max_output_bytes: 64 * 1024,
        },
        max_exec_timeout: Duration::from_secs(10),
    };
    let sessions = SessionService::new(repo, runtime.clone(), governor.clone(), archiver, config);
    let preview = PreviewProxy::new(governor, runtime);
    (sessions, preview, quota)
}

/// Signed bearer token for `user_id`.
pub fn token_for(user_id: &str) -> String {
    let claims = Claims {
        exp: Some(chrono::Utc::now().timestamp() + 3600),
        ..Claims::for_user(user_id)
    };
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("encode token")
}
