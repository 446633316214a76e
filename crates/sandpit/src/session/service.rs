//! Session service: creation, teardown and governed container operations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::container::{
    ContainerError, ContainerRuntimeApi, ContainerSpec, ExecLimits, ExecOutput,
    ExecRequest, FileEntry, FileStat, SESSION_LABEL, WORKSPACE_ROOT, container_name_for, files,
    validate_image_name, validate_relative_path,
};
use crate::db::format_timestamp;
use crate::governance::SessionGovernor;
use crate::workspace::{SnapshotInfo, WorkspaceArchiver};

use super::error::{SessionError, SessionResult};
use super::models::{CreateSessionRequest, Session, SessionStatus};
use super::repository::SessionRepository;

/// Label carrying the owning user id.
const USER_LABEL: &str = "io.sandpit.user";

/// Session service configuration.
#[derive(Debug, Clone)]
pub struct SessionServiceConfig {
    /// Parent directory of per-session workspace directories.
    pub workspace_root: PathBuf,
    /// Default container image.
    pub default_image: String,
    /// Engine network for session containers.
    pub network: Option<String>,
    /// Grace period for container stops.
    pub stop_timeout_secs: u32,
    /// Defaults for exec and file primitives.
    pub exec_limits: ExecLimits,
    /// Upper bound on caller-supplied exec timeouts.
    pub max_exec_timeout: Duration,
}

impl Default for SessionServiceConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("./data/workspaces"),
            default_image: "sandpit-dev:latest".to_string(),
            network: None,
            stop_timeout_secs: 10,
            exec_limits: ExecLimits::default(),
            max_exec_timeout: Duration::from_secs(600),
        }
    }
}

/// Caller-facing exec parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecParams {
    pub cmd: Vec<String>,
    /// Working directory relative to the workspace root.
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Service for managing sandbox sessions.
#[derive(Clone)]
pub struct SessionService {
    repo: SessionRepository,
    runtime: Arc<dyn ContainerRuntimeApi>,
    governor: SessionGovernor,
    archiver: WorkspaceArchiver,
    config: SessionServiceConfig,
}

impl SessionService {
    pub fn new(
        repo: SessionRepository,
        runtime: Arc<dyn ContainerRuntimeApi>,
        governor: SessionGovernor,
        archiver: WorkspaceArchiver,
        config: SessionServiceConfig,
    ) -> Self {
        Self {
            repo,
            runtime,
            governor,
            archiver,
            config,
        }
    }

    pub fn governor(&self) -> &SessionGovernor {
        &self.governor
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntimeApi> {
        &self.runtime
    }

    pub fn archiver(&self) -> &WorkspaceArchiver {
        &self.archiver
    }

    /// Create a session: workspace, optional restore, row, then container.
    ///
    /// Any failure undoes the earlier steps, so a failed creation leaves
    /// neither a workspace directory nor a session row behind.
    pub async fn create_session(
        &self,
        user_id: &str,
        request: CreateSessionRequest,
    ) -> SessionResult<Session> {
        let id = Uuid::new_v4().to_string();
        let project_id = request.project_id.unwrap_or_else(|| id.clone());
        self.archiver.authorize(&project_id, user_id).await?;

        let image = request
            .image
            .unwrap_or_else(|| self.config.default_image.clone());
        validate_image_name(&image)?;

        let workspace = self.config.workspace_root.join(&id);
        tokio::fs::create_dir_all(&workspace)
            .await
            .with_context(|| format!("creating workspace {}", workspace.display()))?;
        let workspace = match tokio::fs::canonicalize(&workspace).await {
            Ok(path) => path,
            Err(err) => {
                remove_workspace(&workspace).await;
                return Err(anyhow::Error::from(err)
                    .context("resolving workspace path")
                    .into());
            }
        };

        if request.restore
            && let Err(err) = self.archiver.restore(&project_id, user_id, &workspace).await
        {
            warn!(
                "Restoring project {} for new session {} failed: {}",
                project_id, id, err
            );
            remove_workspace(&workspace).await;
            return Err(err.into());
        }

        let now = Utc::now();
        let max_lifetime = chrono::Duration::milliseconds(
            self.governor.config().max_lifetime_ms.min(i64::MAX as u64) as i64,
        );
        let container_name = container_name_for(&id);
        let session = Session {
            id: id.clone(),
            user_id: user_id.to_string(),
            project_id,
            status: SessionStatus::Starting,
            container_id: None,
            container_name: container_name.clone(),
            workspace_path: workspace.display().to_string(),
            image: image.clone(),
            created_at: format_timestamp(now),
            expires_at: format_timestamp(now + max_lifetime),
            terminated_at: None,
            termination_reason: None,
            error_message: None,
        };

        if let Err(err) = self.repo.create(&session).await {
            remove_workspace(&workspace).await;
            return Err(err.into());
        }

        let mut spec = ContainerSpec::new(
            container_name.as_str(),
            image.as_str(),
            session.workspace_path.as_str(),
            self.governor.config().limits(),
        )
        .network(self.config.network.clone())
        .label(SESSION_LABEL, id.as_str())
        .label(USER_LABEL, user_id);
        spec.env.extend(request.env);

        match self.launch(&spec).await {
            Ok(container_id) => {
                self.repo.mark_running(&id, &container_id).await?;
            }
            Err(err) => {
                error!("Failed to start container for session {}: {}", id, err);
                self.discard(&session).await;
                return Err(err.into());
            }
        }

        info!(
            "Created session {} for user {} (project {})",
            id, user_id, session.project_id
        );
        self.repo
            .get(&id)
            .await?
            .ok_or_else(|| SessionError::NotFound(id))
    }

    async fn launch(&self, spec: &ContainerSpec) -> Result<String, ContainerError> {
        spec.validate()?;
        let container_id = self.runtime.create_container(spec).await?;
        self.runtime.start_container(&spec.name).await?;
        Ok(container_id)
    }

    /// Undo a half-created session.
    async fn discard(&self, session: &Session) {
        if let Err(err) = self.runtime.remove_container(&session.container_name).await {
            warn!(
                "Failed to remove container {} while discarding session {}: {}",
                session.container_name, session.id, err
            );
        }
        if let Err(err) = self.repo.delete(&session.id).await {
            warn!("Failed to delete session row {}: {:?}", session.id, err);
        }
        remove_workspace(Path::new(&session.workspace_path)).await;
    }

    pub async fn get_session(&self, session_id: &str) -> SessionResult<Option<Session>> {
        Ok(self.repo.get(session_id).await?)
    }

    /// Fetch a session or fail with NotFound.
    pub async fn require_session(&self, session_id: &str) -> SessionResult<Session> {
        self.repo
            .get(session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    /// List sessions, optionally restricted to one user.
    pub async fn list_sessions(&self, user_id: Option<&str>) -> SessionResult<Vec<Session>> {
        let sessions = match user_id {
            Some(user_id) => self.repo.list_for_user(user_id).await?,
            None => self.repo.list().await?,
        };
        Ok(sessions)
    }

    /// Stop and remove a session's container, keeping the row and the
    /// workspace for snapshots.
    pub async fn stop_session(&self, session_id: &str) -> SessionResult<Session> {
        let session = self.require_session(session_id).await?;

        if !session.is_active() {
            debug!(
                "Session {} is not active ({}), nothing to stop",
                session_id, session.status
            );
            return Ok(session);
        }

        info!("Stopping session {}", session_id);
        if let Err(err) = self
            .runtime
            .stop_container(&session.container_name, self.config.stop_timeout_secs)
            .await
        {
            warn!(
                "Failed to stop container {}: {}",
                session.container_name, err
            );
        }
        if let Err(err) = self.runtime.remove_container(&session.container_name).await {
            warn!(
                "Failed to remove container {}: {}",
                session.container_name, err
            );
        }
        self.repo
            .update_status(session_id, SessionStatus::Stopped)
            .await?;
        self.governor.forget(session_id);

        self.require_session(session_id).await
    }

    /// Remove the container, the row and the workspace directory.
    ///
    /// The project archive is kept.
    pub async fn delete_session(&self, session_id: &str) -> SessionResult<()> {
        let session = self.require_session(session_id).await?;

        if let Err(err) = self
            .runtime
            .stop_container(&session.container_name, self.config.stop_timeout_secs)
            .await
        {
            debug!(
                "Stop container {} (may already be stopped): {}",
                session.container_name, err
            );
        }
        self.runtime
            .remove_container(&session.container_name)
            .await?;

        self.governor.forget(session_id);
        self.repo.delete(session_id).await?;
        remove_workspace(Path::new(&session.workspace_path)).await;

        info!("Deleted session {}", session_id);
        Ok(())
    }

    /// Archive the session's workspace under its project.
    pub async fn snapshot_session(&self, session_id: &str) -> SessionResult<SnapshotInfo> {
        let session = self.require_session(session_id).await?;
        let info = self
            .archiver
            .snapshot(
                &session.project_id,
                &session.user_id,
                Path::new(&session.workspace_path),
            )
            .await?;
        Ok(info)
    }

    /// Governance probe.
    pub async fn assert_usable(&self, session_id: &str) -> SessionResult<Session> {
        Ok(self.governor.assert_usable(session_id).await?)
    }

    /// Run a command in the session container.
    pub async fn exec(&self, session_id: &str, params: ExecParams) -> SessionResult<ExecOutput> {
        let mut request = ExecRequest::new(params.cmd, self.config.exec_limits).envs(params.env);
        if let Some(ms) = params.timeout_ms {
            request = request.timeout(Duration::from_millis(ms).min(self.config.max_exec_timeout));
        }
        if let Some(cwd) = params.cwd {
            request = request.cwd(resolve_cwd(&cwd)?);
        }
        request.validate()?;

        let (session, _permit) = self.governor.gate_exec(session_id).await?;
        debug!(
            "exec in session {}: {:?}",
            session_id,
            request.cmd.first()
        );
        Ok(self.runtime.exec(&session.container_name, &request).await?)
    }

    pub async fn read_file(&self, session_id: &str, path: &str) -> SessionResult<String> {
        validate_relative_path(path)?;
        let (session, _permit) = self.governor.gate_exec(session_id).await?;
        Ok(files::read_file(
            self.runtime.as_ref(),
            &session.container_name,
            path,
            self.config.exec_limits,
        )
        .await?)
    }

    pub async fn write_file(
        &self,
        session_id: &str,
        path: &str,
        content: &[u8],
    ) -> SessionResult<()> {
        validate_relative_path(path)?;
        let (session, _permit) = self.governor.gate_exec(session_id).await?;
        Ok(files::write_file(
            self.runtime.as_ref(),
            &session.container_name,
            path,
            content,
            self.config.exec_limits,
        )
        .await?)
    }

    pub async fn list_dir(&self, session_id: &str, path: &str) -> SessionResult<Vec<FileEntry>> {
        validate_relative_path(path)?;
        let (session, _permit) = self.governor.gate_exec(session_id).await?;
        Ok(files::list_dir(
            self.runtime.as_ref(),
            &session.container_name,
            path,
            self.config.exec_limits,
        )
        .await?)
    }

    pub async fn stat(&self, session_id: &str, path: &str) -> SessionResult<FileStat> {
        validate_relative_path(path)?;
        let (session, _permit) = self.governor.gate_exec(session_id).await?;
        Ok(files::stat(
            self.runtime.as_ref(),
            &session.container_name,
            path,
            self.config.exec_limits,
        )
        .await?)
    }

    /// Stop every active session (used on shutdown when configured).
    pub async fn shutdown_all(&self) -> SessionResult<usize> {
        let sessions = self.repo.list().await?;
        let mut stopped = 0;
        for session in sessions.into_iter().filter(Session::is_active) {
            match self.stop_session(&session.id).await {
                Ok(_) => stopped += 1,
                Err(err) => warn!("Failed to stop session {}: {}", session.id, err),
            }
        }
        Ok(stopped)
    }
}

/// Map a workspace-relative cwd to its in-container path.
fn resolve_cwd(cwd: &str) -> Result<String, ContainerError> {
    validate_relative_path(cwd)?;
    let trimmed = cwd.trim_start_matches("./").trim_end_matches('/');
    if trimmed.is_empty() || trimmed == "." {
        Ok(WORKSPACE_ROOT.to_string())
    } else {
        Ok(format!("{WORKSPACE_ROOT}/{trimmed}"))
    }
}

async fn remove_workspace(path: &Path) {
    if let Err(err) = tokio::fs::remove_dir_all(path).await
        && err.kind() != std::io::ErrorKind::NotFound
    {
        warn!("Failed to remove workspace {}: {}", path.display(), err);
    }
}
