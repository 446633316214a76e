//! Sandpit library.
//!
//! Orchestrates sandboxed coding sessions: one container per session,
//! lazy governance on every request, quota checks, preview proxying and
//! durable workspace archives.

pub mod api;
pub mod auth;
pub mod container;
pub mod db;
pub mod governance;
pub mod preview;
pub mod quota;
pub mod session;
pub mod workspace;
