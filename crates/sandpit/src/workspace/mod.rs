//! Durable per-project workspace archives.

mod archiver;
mod repository;

pub use archiver::{ArchiveError, SnapshotInfo, WorkspaceArchiver, validate_project_id};
pub use repository::{Project, ProjectRepository};
