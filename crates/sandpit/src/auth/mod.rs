//! Authentication module.
//!
//! Validates HS256 JWTs issued elsewhere. With auth disabled every request
//! acts as the `dev` user.

mod claims;
mod config;
mod error;
mod middleware;

pub use claims::Claims;
pub use config::AuthConfig;
pub use error::AuthError;
pub use middleware::{
    AuthState, CurrentUser, DEV_USER_ID, auth_middleware, request_token, strip_credentials,
    strip_token_query,
};
