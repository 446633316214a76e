//! Authentication configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum JWT secret length when auth is enabled.
const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigValidationError {
    #[error("auth.jwt_secret is required when auth is enabled")]
    MissingSecret,

    #[error("auth.jwt_secret must be at least {MIN_SECRET_LEN} characters")]
    SecretTooShort,

    #[error("environment variable {0} referenced by auth.jwt_secret is not set")]
    MissingEnvVar(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Require a valid token on management routes.
    pub enabled: bool,
    /// HS256 secret. `env:VAR_NAME` reads it from the environment.
    pub jwt_secret: Option<String>,
    /// CORS origins; empty allows any origin.
    pub allowed_origins: Vec<String>,
}

impl AuthConfig {
    /// The secret with `env:` references resolved.
    pub fn resolve_jwt_secret(&self) -> Result<Option<String>, ConfigValidationError> {
        match self.jwt_secret.as_deref() {
            Some(raw) => match raw.strip_prefix("env:") {
                Some(var) => std::env::var(var)
                    .map(Some)
                    .map_err(|_| ConfigValidationError::MissingEnvVar(var.to_string())),
                None => Ok(Some(raw.to_string())),
            },
            None => Ok(None),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if !self.enabled {
            return Ok(());
        }
        let secret = self
            .resolve_jwt_secret()?
            .ok_or(ConfigValidationError::MissingSecret)?;
        if secret.len() < MIN_SECRET_LEN {
            return Err(ConfigValidationError::SecretTooShort);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_auth_needs_no_secret() {
        assert!(AuthConfig::default().validate().is_ok());
    }

    #[test]
    fn enabled_auth_requires_long_secret() {
        let mut config = AuthConfig {
            enabled: true,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigValidationError::MissingSecret));

        config.jwt_secret = Some("short".to_string());
        assert_eq!(config.validate(), Err(ConfigValidationError::SecretTooShort));

        config.jwt_secret = Some("x".repeat(32));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_env_reference_is_reported() {
        let config = AuthConfig {
            enabled: true,
            jwt_secret: Some("env:SANDPIT_TEST_SECRET_THAT_IS_NOT_SET".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::MissingEnvVar(_))
        ));
    }
}
