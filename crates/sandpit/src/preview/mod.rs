//! Preview port registry and upstream resolution.
//!
//! A session exposes at most one preview port. The upstream address is
//! looked up from the engine on every request, so containers that restart
//! with a new address keep working without re-registration.

use std::sync::Arc;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::container::{ContainerError, ContainerRuntimeApi, container_name_for};
use crate::governance::{GovernanceError, SessionGovernor};

/// Lowest port a session may register.
pub const MIN_PREVIEW_PORT: u16 = 1024;

#[derive(Debug, Error)]
pub enum PreviewError {
    #[error(transparent)]
    Governance(#[from] GovernanceError),

    #[error("preview port must be between {MIN_PREVIEW_PORT} and 65535, got {0}")]
    InvalidPort(u16),

    #[error("no preview port registered for session {0}")]
    NotRegistered(String),

    #[error("container for session {session_id} is unavailable: {reason}")]
    Unavailable { session_id: String, reason: String },

    #[error(transparent)]
    Container(#[from] ContainerError),
}

/// Where preview traffic for a session goes right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewTarget {
    pub url: String,
    pub ip: String,
    pub port: u16,
}

impl PreviewTarget {
    /// WebSocket URL for `path_and_query` on this target.
    pub fn ws_url(&self, path_and_query: &str) -> String {
        format!("ws://{}:{}{}", self.ip, self.port, path_and_query)
    }

    /// HTTP URL for `path_and_query` on this target.
    pub fn http_url(&self, path_and_query: &str) -> String {
        format!("{}{}", self.url, path_and_query)
    }
}

#[derive(Clone)]
pub struct PreviewProxy {
    governor: SessionGovernor,
    runtime: Arc<dyn ContainerRuntimeApi>,
}

impl PreviewProxy {
    pub fn new(governor: SessionGovernor, runtime: Arc<dyn ContainerRuntimeApi>) -> Self {
        Self { governor, runtime }
    }

    /// Register (or replace) the session's preview port.
    pub async fn register_port(&self, session_id: &str, port: u16) -> Result<(), PreviewError> {
        let session = self.governor.gate(session_id).await?;

        if port < MIN_PREVIEW_PORT {
            return Err(PreviewError::InvalidPort(port));
        }

        match self.runtime.inspect_container(&session.container_name).await? {
            Some(info) if info.running => {}
            Some(info) => {
                return Err(PreviewError::Unavailable {
                    session_id: session_id.to_string(),
                    reason: format!("container is {}", info.status),
                });
            }
            None => {
                return Err(PreviewError::Unavailable {
                    session_id: session_id.to_string(),
                    reason: "container does not exist".to_string(),
                });
            }
        }

        self.governor.state().set_preview_port(session_id, port);
        info!("Registered preview port {} for session {}", port, session_id);
        Ok(())
    }

    pub fn registered_port(&self, session_id: &str) -> Option<u16> {
        self.governor.state().preview_port(session_id)
    }

    pub fn unregister(&self, session_id: &str) -> Option<u16> {
        self.governor.state().remove_preview_port(session_id)
    }

    /// Resolve the upstream for a session from live engine state.
    pub async fn resolve_target(&self, session_id: &str) -> Result<PreviewTarget, PreviewError> {
        let port = self
            .registered_port(session_id)
            .ok_or_else(|| PreviewError::NotRegistered(session_id.to_string()))?;

        let unavailable = |reason: &str| PreviewError::Unavailable {
            session_id: session_id.to_string(),
            reason: reason.to_string(),
        };

        let info = self
            .runtime
            .inspect_container(&container_name_for(session_id))
            .await?
            .ok_or_else(|| unavailable("container does not exist"))?;
        if !info.running {
            return Err(unavailable("container is not running"));
        }
        let ip = info
            .ip_address
            .filter(|ip| !ip.is_empty())
            .ok_or_else(|| unavailable("container has no network address"))?;

        debug!("Preview target for {}: {}:{}", session_id, ip, port);
        Ok(PreviewTarget {
            url: format!("http://{ip}:{port}"),
            ip,
            port,
        })
    }

    /// Gate the session, then resolve its upstream.
    pub async fn route(&self, session_id: &str) -> Result<PreviewTarget, PreviewError> {
        self.governor.gate(session_id).await?;
        self.resolve_target(session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_urls() {
        let target = PreviewTarget {
            url: "http://172.17.0.5:3000".to_string(),
            ip: "172.17.0.5".to_string(),
            port: 3000,
        };
        assert_eq!(target.http_url("/app?x=1"), "http://172.17.0.5:3000/app?x=1");
        assert_eq!(target.ws_url("/socket"), "ws://172.17.0.5:3000/socket");
    }

    #[test]
    fn invalid_port_message() {
        let err = PreviewError::InvalidPort(80);
        assert_eq!(
            err.to_string(),
            "preview port must be between 1024 and 65535, got 80"
        );
    }
}
