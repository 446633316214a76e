//! Zip snapshots of workspace directories.
//!
//! Archives live at `{archive_dir}/{project_id}.zip`, one per project, and
//! outlive any session. The first user to snapshot a project owns it; only
//! the owner may snapshot over it or restore from it. Snapshots are written
//! to a uniquely named temporary file and renamed into place, so a failed
//! snapshot never clobbers the previous one.

use std::fs::{self, File};
use std::io::{self, Seek, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::db::now_timestamp;

use super::repository::ProjectRepository;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("no archive exists for project {0}")]
    ArchiveNotFound(String),

    #[error("project {0} belongs to another user")]
    Forbidden(String),

    #[error("invalid project id: {0}")]
    InvalidProjectId(String),

    #[error("workspace directory not found: {0}")]
    WorkspaceNotFound(String),

    #[error("archive io error: {0}")]
    Io(#[from] io::Error),

    #[error("archive format error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("archive storage error: {0:#}")]
    Storage(#[from] anyhow::Error),

    #[error("archive task failed: {0}")]
    Task(String),
}

/// Outcome of a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub project_id: String,
    pub archive_path: String,
    pub bytes: u64,
    pub files: u64,
    pub last_modified_at: String,
}

/// Project ids become file names: alphanumerics, `-` and `_` only.
pub fn validate_project_id(project_id: &str) -> Result<(), ArchiveError> {
    let valid = !project_id.is_empty()
        && project_id.len() <= 128
        && project_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ArchiveError::InvalidProjectId(project_id.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct WorkspaceArchiver {
    archive_dir: PathBuf,
    projects: ProjectRepository,
}

impl WorkspaceArchiver {
    pub fn new(archive_dir: impl Into<PathBuf>, projects: ProjectRepository) -> Self {
        Self {
            archive_dir: archive_dir.into(),
            projects,
        }
    }

    pub fn archive_path(&self, project_id: &str) -> Result<PathBuf, ArchiveError> {
        validate_project_id(project_id)?;
        Ok(self.archive_dir.join(format!("{project_id}.zip")))
    }

    pub fn has_archive(&self, project_id: &str) -> bool {
        self.archive_path(project_id)
            .map(|path| path.is_file())
            .unwrap_or(false)
    }

    /// Fail with [`ArchiveError::Forbidden`] when another user owns the
    /// project. Unknown projects are open to anyone.
    pub async fn authorize(&self, project_id: &str, user_id: &str) -> Result<(), ArchiveError> {
        validate_project_id(project_id)?;
        match self.projects.get(project_id).await? {
            Some(project) if !project.is_accessible_by(user_id) => {
                Err(ArchiveError::Forbidden(project_id.to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Archive `workspace`, replacing the project's previous archive.
    ///
    /// Claims the project for `user_id` when it has no owner yet.
    pub async fn snapshot(
        &self,
        project_id: &str,
        user_id: &str,
        workspace: &Path,
    ) -> Result<SnapshotInfo, ArchiveError> {
        let archive = self.archive_path(project_id)?;
        if !workspace.is_dir() {
            return Err(ArchiveError::WorkspaceNotFound(
                workspace.display().to_string(),
            ));
        }

        let project = self
            .projects
            .claim(
                project_id,
                user_id,
                &archive.display().to_string(),
                &now_timestamp(),
            )
            .await?;
        if !project.is_accessible_by(user_id) {
            return Err(ArchiveError::Forbidden(project_id.to_string()));
        }

        let src = workspace.to_path_buf();
        let dest = archive.clone();
        let (files, bytes) = tokio::task::spawn_blocking(move || write_archive(&src, &dest))
            .await
            .map_err(|e| ArchiveError::Task(e.to_string()))??;

        let last_modified_at = now_timestamp();
        self.projects
            .record_snapshot(
                project_id,
                &archive.display().to_string(),
                bytes as i64,
                &last_modified_at,
            )
            .await?;

        info!(
            "Snapshot of project {}: {} files, {} bytes",
            project_id, files, bytes
        );

        Ok(SnapshotInfo {
            project_id: project_id.to_string(),
            archive_path: archive.display().to_string(),
            bytes,
            files,
            last_modified_at,
        })
    }

    /// Replace the contents of `dest` with the project's archive.
    ///
    /// The archive must exist and be accessible to `user_id`. `dest` is
    /// emptied before extraction.
    pub async fn restore(
        &self,
        project_id: &str,
        user_id: &str,
        dest: &Path,
    ) -> Result<(), ArchiveError> {
        self.authorize(project_id, user_id).await?;
        let archive = self.archive_path(project_id)?;
        if !archive.is_file() {
            return Err(ArchiveError::ArchiveNotFound(project_id.to_string()));
        }

        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || extract_archive(&archive, &dest))
            .await
            .map_err(|e| ArchiveError::Task(e.to_string()))??;

        debug!("Restored project {}", project_id);
        Ok(())
    }
}

fn write_archive(src: &Path, dest: &Path) -> Result<(u64, u64), ArchiveError> {
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    // Dropped, and so deleted, if anything below fails.
    let mut tmp = tempfile::Builder::new()
        .prefix(".snapshot-")
        .suffix(".zip.tmp")
        .tempfile_in(parent)?;
    let files = write_zip(src, tmp.as_file_mut())?;
    tmp.persist(dest).map_err(|err| err.error)?;

    let bytes = fs::metadata(dest)?.len();
    Ok((files, bytes))
}

fn write_zip<W: Write + Seek>(src: &Path, target: W) -> Result<u64, ArchiveError> {
    let mut zip = ZipWriter::new(target);
    let base = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut files = 0;

    for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        let Ok(rel) = entry.path().strip_prefix(src) else {
            continue;
        };
        let name = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let file_type = entry.file_type();
        if file_type.is_symlink() {
            let target = fs::read_link(entry.path())?;
            zip.add_symlink(name, target.to_string_lossy(), base)?;
        } else if file_type.is_dir() {
            zip.add_directory(format!("{name}/"), base)?;
        } else if file_type.is_file() {
            let options = base.unix_permissions(file_mode(&entry.metadata().map_err(io::Error::from)?));
            zip.start_file(name, options)?;
            io::copy(&mut File::open(entry.path())?, &mut zip)?;
            files += 1;
        }
    }

    zip.finish()?;
    Ok(files)
}

#[cfg(unix)]
fn file_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn file_mode(_metadata: &fs::Metadata) -> u32 {
    0o644
}

fn extract_archive(archive: &Path, dest: &Path) -> Result<(), ArchiveError> {
    clear_directory(dest)?;
    let mut zip = ZipArchive::new(File::open(archive)?)?;
    zip.extract(dest)?;
    Ok(())
}

/// Empty `dir`, creating it when missing.
fn clear_directory(dir: &Path) -> io::Result<()> {
    if !dir.exists() {
        return fs::create_dir_all(dir);
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}
