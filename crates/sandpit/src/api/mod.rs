//! HTTP API module.
//!
//! Session management, governed container operations and the preview proxy.

mod error;
pub mod handlers;
pub mod proxy;
mod routes;
mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::create_router;
pub use state::{AppState, PreviewState};
