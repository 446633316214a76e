//! Container runtime management module.
//!
//! Provides an async interface over the container engine: lifecycle calls,
//! attached exec with demultiplexed output, and file primitives layered on
//! top of exec. The engine is reached through [`ContainerRuntimeApi`] so the
//! session layer can be exercised against a fake in tests.

mod docker;
mod error;
pub mod files;
mod spec;

pub use docker::{DockerConfig, DockerRuntime};
pub use error::{ContainerError, ContainerResult};
pub use files::{EntryType, FileEntry, FileStat, validate_relative_path};
pub use spec::{ContainerSpec, ResourceLimits, validate_container_name, validate_image_name};

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Mount point of the session workspace inside every container.
pub const WORKSPACE_ROOT: &str = "/workspace";

/// Prefix of every session container name.
pub const CONTAINER_NAME_PREFIX: &str = "sandpit-";

/// Label carrying the owning session id.
pub const SESSION_LABEL: &str = "io.sandpit.session";

/// Deterministic container name for a session.
///
/// Containers are looked up by this name, so no separate session to
/// container mapping is stored.
pub fn container_name_for(session_id: &str) -> String {
    format!("{CONTAINER_NAME_PREFIX}{session_id}")
}

/// Snapshot of a container as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub running: bool,
    /// Engine status string (`running`, `exited`, ...).
    pub status: String,
    /// Address on the container network, absent when not attached.
    pub ip_address: Option<String>,
}

/// Default timeout and capture limit for exec calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecLimits {
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

impl Default for ExecLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_output_bytes: 1024 * 1024,
        }
    }
}

/// A command to run inside a session container.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub cmd: Vec<String>,
    /// Working directory; the workspace root when unset.
    pub cwd: Option<String>,
    pub env: HashMap<String, String>,
    /// Bytes written to the process stdin, which is then closed.
    pub stdin: Option<Vec<u8>>,
    pub timeout: Duration,
    /// Per-stream capture limit; excess output is dropped.
    pub max_output_bytes: usize,
}

impl ExecRequest {
    pub fn new(cmd: Vec<String>, limits: ExecLimits) -> Self {
        Self {
            cmd,
            cwd: None,
            env: HashMap::new(),
            stdin: None,
            timeout: limits.timeout,
            max_output_bytes: limits.max_output_bytes,
        }
    }

    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn envs(mut self, env: HashMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }

    pub fn stdin(mut self, data: Vec<u8>) -> Self {
        self.stdin = Some(data);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Environment in `KEY=value` form.
    pub fn env_list(&self) -> Vec<String> {
        let mut env: Vec<String> = self
            .env
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        env.sort();
        env
    }

    pub fn validate(&self) -> ContainerResult<()> {
        if self.cmd.is_empty() || self.cmd[0].is_empty() {
            return Err(ContainerError::InvalidInput(
                "command cannot be empty".to_string(),
            ));
        }
        for key in self.env.keys() {
            spec::validate_env_var_key(key)?;
        }
        if self.timeout.is_zero() {
            return Err(ContainerError::InvalidInput(
                "timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Result of a completed exec. A nonzero exit code is a normal outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    /// Set when either stream hit the capture limit.
    pub truncated: bool,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Append `chunk` to `buf` without exceeding `limit`, flagging truncation.
pub(crate) fn append_capped(buf: &mut Vec<u8>, chunk: &[u8], limit: usize, truncated: &mut bool) {
    let room = limit.saturating_sub(buf.len());
    if chunk.len() > room {
        buf.extend_from_slice(&chunk[..room]);
        *truncated = true;
    } else {
        buf.extend_from_slice(chunk);
    }
}

/// Container engine abstraction for testability.
///
/// `start_container`, `stop_container` and `remove_container` are
/// idempotent: repeating them against a stopped or removed container
/// succeeds.
#[async_trait]
pub trait ContainerRuntimeApi: Send + Sync {
    /// Check the engine is reachable and return its version.
    async fn health_check(&self) -> ContainerResult<String>;

    /// Create (but do not start) a container. Returns the engine id.
    async fn create_container(&self, spec: &ContainerSpec) -> ContainerResult<String>;

    async fn start_container(&self, name: &str) -> ContainerResult<()>;

    /// Stop gracefully, killing after `timeout_seconds`.
    async fn stop_container(&self, name: &str, timeout_seconds: u32) -> ContainerResult<()>;

    /// Force-remove a container.
    async fn remove_container(&self, name: &str) -> ContainerResult<()>;

    /// Inspect a container; `None` when it does not exist.
    async fn inspect_container(&self, name: &str) -> ContainerResult<Option<ContainerInfo>>;

    /// Run an attached exec to completion without a deadline.
    async fn run_exec(&self, name: &str, request: &ExecRequest) -> ContainerResult<ExecOutput>;

    /// Run an attached exec, releasing the caller once `request.timeout`
    /// elapses. The in-container process is not signalled on timeout.
    async fn exec(&self, name: &str, request: &ExecRequest) -> ContainerResult<ExecOutput> {
        request.validate()?;
        match tokio::time::timeout(request.timeout, self.run_exec(name, request)).await {
            Ok(result) => result,
            Err(_) => Err(ContainerError::Timeout {
                timeout_ms: request.timeout.as_millis() as u64,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_names_are_deterministic() {
        assert_eq!(container_name_for("abc-123"), "sandpit-abc-123");
        assert_eq!(container_name_for("abc-123"), container_name_for("abc-123"));
        assert!(validate_container_name(&container_name_for("3f2c0a1e-aaaa")).is_ok());
    }

    #[test]
    fn append_capped_truncates_at_limit() {
        let mut buf = Vec::new();
        let mut truncated = false;
        append_capped(&mut buf, b"hello", 8, &mut truncated);
        assert!(!truncated);
        append_capped(&mut buf, b"world", 8, &mut truncated);
        assert!(truncated);
        assert_eq!(buf, b"hellowor");
        append_capped(&mut buf, b"more", 8, &mut truncated);
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn exec_request_validation() {
        let limits = ExecLimits::default();
        assert!(ExecRequest::new(vec![], limits).validate().is_err());
        assert!(ExecRequest::new(vec![String::new()], limits).validate().is_err());

        let mut env = HashMap::new();
        env.insert("BAD-KEY".to_string(), "x".to_string());
        let req = ExecRequest::new(vec!["ls".into()], limits).envs(env);
        assert!(req.validate().is_err());

        let req = ExecRequest::new(vec!["ls".into()], limits).timeout(Duration::ZERO);
        assert!(req.validate().is_err());

        assert!(ExecRequest::new(vec!["ls".into()], limits).validate().is_ok());
    }

    struct SlowRuntime;

    #[async_trait]
    impl ContainerRuntimeApi for SlowRuntime {
        async fn health_check(&self) -> ContainerResult<String> {
            Ok("test".into())
        }
        async fn create_container(&self, spec: &ContainerSpec) -> ContainerResult<String> {
            Ok(spec.name.clone())
        }
        async fn start_container(&self, _name: &str) -> ContainerResult<()> {
            Ok(())
        }
        async fn stop_container(&self, _name: &str, _timeout: u32) -> ContainerResult<()> {
            Ok(())
        }
        async fn remove_container(&self, _name: &str) -> ContainerResult<()> {
            Ok(())
        }
        async fn inspect_container(&self, _name: &str) -> ContainerResult<Option<ContainerInfo>> {
            Ok(None)
        }
        async fn run_exec(&self, _name: &str, _req: &ExecRequest) -> ContainerResult<ExecOutput> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ExecOutput::default())
        }
    }

    #[tokio::test]
    async fn exec_times_out_and_releases_caller() {
        let req = ExecRequest::new(vec!["sleep".into(), "60".into()], ExecLimits::default())
            .timeout(Duration::from_millis(20));
        let started = std::time::Instant::now();
        let err = SlowRuntime.exec("sandpit-x", &req).await.unwrap_err();
        assert!(matches!(err, ContainerError::Timeout { timeout_ms: 20 }));
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
