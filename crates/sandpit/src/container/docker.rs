//! Docker engine implementation of [`ContainerRuntimeApi`] over bollard.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::{ContainerInspectResponse, HostConfig};
use futures::StreamExt;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use super::error::{ContainerError, ContainerResult};
use super::spec::{ContainerSpec, validate_container_name};
use super::{
    ContainerInfo, ContainerRuntimeApi, ExecOutput, ExecRequest, SESSION_LABEL, WORKSPACE_ROOT,
    append_capped,
};

/// Engine connection and container defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Engine socket path; the platform default when unset.
    pub socket: Option<String>,
    /// Engine API request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Image used for new session containers.
    pub image: String,
    /// Network session containers join; the engine default when unset.
    pub network: Option<String>,
    /// Grace period before a stop escalates to a kill.
    pub stop_timeout_secs: u32,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            socket: None,
            request_timeout_secs: 120,
            image: "sandpit-dev:latest".to_string(),
            network: None,
            stop_timeout_secs: 10,
        }
    }
}

/// Container runtime backed by the Docker engine API.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
    network: Option<String>,
}

impl DockerRuntime {
    /// Connect to the engine. No request is made until first use.
    pub fn connect(config: &DockerConfig) -> ContainerResult<Self> {
        let docker = match config.socket {
            Some(ref socket) => Docker::connect_with_socket(
                socket,
                config.request_timeout_secs,
                bollard::API_DEFAULT_VERSION,
            )?,
            None => Docker::connect_with_local_defaults()?,
        };
        Ok(Self {
            docker,
            network: config.network.clone(),
        })
    }

    fn info_from_inspect(&self, name: &str, resp: ContainerInspectResponse) -> ContainerInfo {
        let state = resp.state.unwrap_or_default();
        let running = state.running.unwrap_or(false);
        let status = state
            .status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let ip_address = resp.network_settings.and_then(|settings| {
            let networks = settings.networks.unwrap_or_default();
            let preferred = self
                .network
                .as_ref()
                .and_then(|net| networks.get(net))
                .and_then(|endpoint| endpoint.ip_address.clone());
            preferred
                .or(settings.ip_address)
                .filter(|ip| !ip.is_empty())
                .or_else(|| {
                    networks
                        .values()
                        .filter_map(|endpoint| endpoint.ip_address.clone())
                        .find(|ip| !ip.is_empty())
                })
        });

        ContainerInfo {
            id: resp.id.unwrap_or_default(),
            name: name.to_string(),
            running,
            status,
            ip_address,
        }
    }
}

/// Resource limits and workspace bind in the engine's units.
fn host_config(spec: &ContainerSpec) -> HostConfig {
    HostConfig {
        binds: Some(vec![spec.workspace_bind()]),
        nano_cpus: Some(spec.limits.nano_cpus()),
        memory: Some(spec.limits.memory_bytes()),
        // Equal to memory: no swap on top of the ceiling.
        memory_swap: Some(spec.limits.memory_bytes()),
        pids_limit: Some(spec.limits.pids_limit()),
        init: Some(true),
        network_mode: spec.network.clone(),
        ..Default::default()
    }
}

/// Engine status code of an API error, if it carries one.
fn status_code(err: &BollardError) -> Option<u16> {
    match err {
        BollardError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

#[async_trait]
impl ContainerRuntimeApi for DockerRuntime {
    async fn health_check(&self) -> ContainerResult<String> {
        self.docker.ping().await?;
        let version = self.docker.version().await?;
        Ok(version.version.unwrap_or_else(|| "unknown".to_string()))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> ContainerResult<String> {
        spec.validate()?;

        let mut labels: HashMap<String, String> = spec.labels.clone();
        labels
            .entry(SESSION_LABEL.to_string())
            .or_insert_with(|| spec.name.clone());

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            env: Some(spec.env_list()),
            working_dir: Some(WORKSPACE_ROOT.to_string()),
            labels: Some(labels),
            host_config: Some(host_config(spec)),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        debug!(
            "creating container {} (image {}, cpus {}, memory {}MB, pids {})",
            spec.name, spec.image, spec.limits.cpus, spec.limits.memory_mb, spec.limits.pids
        );

        match self.docker.create_container(Some(options), config).await {
            Ok(resp) => {
                for warning in resp.warnings {
                    warn!("engine warning creating {}: {}", spec.name, warning);
                }
                info!("Created container {} ({})", spec.name, resp.id);
                Ok(resp.id)
            }
            Err(err) => match status_code(&err) {
                Some(404) => Err(ContainerError::ImageNotFound(spec.image.clone())),
                Some(409) => Err(ContainerError::AlreadyExists(spec.name.clone())),
                _ => Err(err.into()),
            },
        }
    }

    async fn start_container(&self, name: &str) -> ContainerResult<()> {
        validate_container_name(name)?;
        match self
            .docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(()) => Ok(()),
            Err(err) => match status_code(&err) {
                // 304: already started
                Some(304) => Ok(()),
                Some(404) => Err(ContainerError::ContainerNotFound(name.to_string())),
                _ => Err(err.into()),
            },
        }
    }

    async fn stop_container(&self, name: &str, timeout_seconds: u32) -> ContainerResult<()> {
        validate_container_name(name)?;
        let options = StopContainerOptions {
            t: i64::from(timeout_seconds),
        };
        match self.docker.stop_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            Err(err) => match status_code(&err) {
                Some(304) | Some(404) => {
                    debug!("container {} already stopped or gone", name);
                    Ok(())
                }
                _ => Err(err.into()),
            },
        }
    }

    async fn remove_container(&self, name: &str) -> ContainerResult<()> {
        validate_container_name(name)?;
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        match self.docker.remove_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            Err(err) => match status_code(&err) {
                // 409: removal already in progress
                Some(404) | Some(409) => {
                    debug!("container {} already removed", name);
                    Ok(())
                }
                _ => Err(err.into()),
            },
        }
    }

    async fn inspect_container(&self, name: &str) -> ContainerResult<Option<ContainerInfo>> {
        validate_container_name(name)?;
        match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(resp) => Ok(Some(self.info_from_inspect(name, resp))),
            Err(err) if status_code(&err) == Some(404) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn run_exec(&self, name: &str, request: &ExecRequest) -> ContainerResult<ExecOutput> {
        let info = self
            .inspect_container(name)
            .await?
            .ok_or_else(|| ContainerError::ContainerNotFound(name.to_string()))?;
        if !info.running {
            return Err(ContainerError::NotRunning(name.to_string()));
        }

        let options = CreateExecOptions::<String> {
            cmd: Some(request.cmd.clone()),
            env: Some(request.env_list()),
            working_dir: Some(
                request
                    .cwd
                    .clone()
                    .unwrap_or_else(|| WORKSPACE_ROOT.to_string()),
            ),
            attach_stdin: Some(request.stdin.is_some()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            ..Default::default()
        };

        let exec = self.docker.create_exec(name, options).await.map_err(|err| {
            match status_code(&err) {
                Some(404) => ContainerError::ContainerNotFound(name.to_string()),
                Some(409) => ContainerError::NotRunning(name.to_string()),
                _ => err.into(),
            }
        })?;

        let StartExecResults::Attached {
            mut output,
            mut input,
        } = self.docker.start_exec(&exec.id, None).await?
        else {
            return Err(ContainerError::Engine(
                "exec started detached".to_string(),
            ));
        };

        let limit = request.max_output_bytes;
        let stdin = request.stdin.as_deref();

        let feed_stdin = async {
            if let Some(data) = stdin {
                input.write_all(data).await?;
                input.shutdown().await?;
            }
            Ok::<(), std::io::Error>(())
        };

        let collect = async {
            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            let mut truncated = false;
            while let Some(chunk) = output.next().await {
                match chunk? {
                    LogOutput::StdOut { message } | LogOutput::Console { message } => {
                        append_capped(&mut stdout, &message, limit, &mut truncated)
                    }
                    LogOutput::StdErr { message } => {
                        append_capped(&mut stderr, &message, limit, &mut truncated)
                    }
                    LogOutput::StdIn { .. } => {}
                }
            }
            Ok::<_, BollardError>((stdout, stderr, truncated))
        };

        let (fed, collected) = tokio::join!(feed_stdin, collect);
        if let Err(err) = fed {
            // The process may exit without reading its input.
            debug!("writing exec stdin for {} failed: {}", name, err);
        }
        let (stdout, stderr, truncated) = collected?;

        let inspected = self.docker.inspect_exec(&exec.id).await?;
        let exit_code = inspected.exit_code.unwrap_or(-1);

        Ok(ExecOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            truncated,
        })
    }
}
