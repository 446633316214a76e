//! Container creation parameters and their validation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::error::{ContainerError, ContainerResult};
use super::WORKSPACE_ROOT;

/// CPU, memory and process-count limits applied at container creation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Fractional CPU count (0.5 = half a core).
    pub cpus: f64,
    /// Memory ceiling in megabytes.
    pub memory_mb: u64,
    /// Maximum number of processes.
    pub pids: i64,
}

impl ResourceLimits {
    /// CPU quota in the engine's nano-CPU unit.
    pub fn nano_cpus(&self) -> i64 {
        (self.cpus * 1_000_000_000.0).round() as i64
    }

    /// Memory ceiling in bytes.
    pub fn memory_bytes(&self) -> i64 {
        (self.memory_mb as i64) * 1024 * 1024
    }

    pub fn pids_limit(&self) -> i64 {
        self.pids
    }

    pub fn validate(&self) -> ContainerResult<()> {
        if !self.cpus.is_finite() || self.cpus <= 0.0 {
            return Err(ContainerError::InvalidInput(format!(
                "cpu limit must be a positive number, got {}",
                self.cpus
            )));
        }
        if self.memory_mb < 6 {
            return Err(ContainerError::InvalidInput(format!(
                "memory limit must be at least 6MB, got {}MB",
                self.memory_mb
            )));
        }
        if self.pids < 1 {
            return Err(ContainerError::InvalidInput(format!(
                "process limit must be at least 1, got {}",
                self.pids
            )));
        }
        Ok(())
    }
}

/// Everything the runtime needs to create one session container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Host directory bind-mounted at the workspace root.
    pub workspace_host_path: String,
    pub env: HashMap<String, String>,
    pub labels: HashMap<String, String>,
    pub limits: ResourceLimits,
    /// Engine network to attach to; the engine default when unset.
    pub network: Option<String>,
}

impl ContainerSpec {
    pub fn new(
        name: impl Into<String>,
        image: impl Into<String>,
        workspace_host_path: impl Into<String>,
        limits: ResourceLimits,
    ) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            workspace_host_path: workspace_host_path.into(),
            env: HashMap::new(),
            labels: HashMap::new(),
            limits,
            network: None,
        }
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Add a label.
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn network(mut self, network: Option<String>) -> Self {
        self.network = network;
        self
    }

    /// The bind mount in engine syntax.
    pub fn workspace_bind(&self) -> String {
        format!("{}:{}", self.workspace_host_path, WORKSPACE_ROOT)
    }

    /// Environment in `KEY=value` form, sorted for stable output.
    pub fn env_list(&self) -> Vec<String> {
        let mut env: Vec<String> = self
            .env
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        env.sort();
        env
    }

    /// Validate every field before anything reaches the engine.
    pub fn validate(&self) -> ContainerResult<()> {
        validate_container_name(&self.name)?;
        validate_image_name(&self.image)?;
        validate_host_path(&self.workspace_host_path)?;
        for key in self.env.keys() {
            validate_env_var_key(key)?;
        }
        if let Some(ref network) = self.network {
            validate_container_name(network)?;
        }
        self.limits.validate()
    }
}

/// Validate a Docker/OCI image name.
///
/// Image names follow the pattern: `[registry/][namespace/]name[:tag][@digest]`
pub fn validate_image_name(image: &str) -> ContainerResult<()> {
    if image.is_empty() {
        return Err(ContainerError::InvalidInput(
            "image name cannot be empty".to_string(),
        ));
    }

    if image.len() > 256 {
        return Err(ContainerError::InvalidInput(
            "image name exceeds maximum length of 256 characters".to_string(),
        ));
    }

    let valid_chars = |c: char| {
        c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '/' | ':' | '@')
    };
    if !image.chars().all(valid_chars) {
        return Err(ContainerError::InvalidInput(format!(
            "image name '{}' contains invalid characters",
            image
        )));
    }

    if image.contains("..") {
        return Err(ContainerError::InvalidInput(
            "image name cannot contain '..'".to_string(),
        ));
    }

    Ok(())
}

/// Validate a container or network name.
///
/// Names must start with an alphanumeric character or underscore and only
/// contain alphanumerics, hyphens, underscores and dots.
pub fn validate_container_name(name: &str) -> ContainerResult<()> {
    let Some(first_char) = name.chars().next() else {
        return Err(ContainerError::InvalidInput(
            "container name cannot be empty".to_string(),
        ));
    };

    if name.len() > 128 {
        return Err(ContainerError::InvalidInput(
            "container name exceeds maximum length of 128 characters".to_string(),
        ));
    }

    if !first_char.is_ascii_alphanumeric() && first_char != '_' {
        return Err(ContainerError::InvalidInput(
            "container name must start with an alphanumeric character or underscore".to_string(),
        ));
    }

    let valid_chars = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.');
    if !name.chars().all(valid_chars) {
        return Err(ContainerError::InvalidInput(format!(
            "container name '{}' contains invalid characters",
            name
        )));
    }

    Ok(())
}

/// Validate an environment variable key (POSIX naming).
pub fn validate_env_var_key(key: &str) -> ContainerResult<()> {
    let Some(first_char) = key.chars().next() else {
        return Err(ContainerError::InvalidInput(
            "environment variable key cannot be empty".to_string(),
        ));
    };

    if key.len() > 256 {
        return Err(ContainerError::InvalidInput(
            "environment variable key exceeds maximum length of 256 characters".to_string(),
        ));
    }

    if !first_char.is_ascii_alphabetic() && first_char != '_' {
        return Err(ContainerError::InvalidInput(format!(
            "environment variable key '{}' must start with a letter or underscore",
            key
        )));
    }

    if !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ContainerError::InvalidInput(format!(
            "environment variable key '{}' contains invalid characters",
            key
        )));
    }

    Ok(())
}

/// Validate the host side of the workspace bind mount.
fn validate_host_path(path: &str) -> ContainerResult<()> {
    if path.is_empty() {
        return Err(ContainerError::InvalidInput(
            "workspace path cannot be empty".to_string(),
        ));
    }
    if !path.starts_with('/') {
        return Err(ContainerError::InvalidInput(format!(
            "workspace path must be absolute: {}",
            path
        )));
    }
    // ':' would split the bind specification.
    if path.contains('\0') || path.contains(':') || path.contains('\n') {
        return Err(ContainerError::InvalidInput(format!(
            "workspace path contains invalid characters: {}",
            path
        )));
    }
    Ok(())
}
