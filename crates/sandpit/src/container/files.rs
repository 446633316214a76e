//! File primitives executed inside a session container.
//!
//! Every path is relative to [`WORKSPACE_ROOT`] and validated before any
//! engine call. Paths reach the helper scripts as positional arguments, so
//! they are never spliced into shell source.

use chrono::{DateTime, SecondsFormat};
use serde::{Deserialize, Serialize};

use super::error::{ContainerError, ContainerResult};
use super::{ContainerRuntimeApi, ExecLimits, ExecOutput, ExecRequest, WORKSPACE_ROOT};

/// Exit status the helper scripts use for a missing path.
const EXIT_MISSING: i64 = 3;
/// Exit status the listing script uses when the path is not a directory.
const EXIT_NOT_DIR: i64 = 4;

/// `stat` format shared by listing and stat: type|size|mtime|name.
/// The name goes last so separators inside it survive `splitn`.
const STAT_FORMAT: &str = "%F|%s|%Y|%n";

const WRITE_SCRIPT: &str = r#"mkdir -p -- "$(dirname -- "$1")" && cat > "$1""#;

const LIST_SCRIPT: &str = r#"
if [ ! -e "$1" ]; then exit 3; fi
if [ ! -d "$1" ]; then exit 4; fi
cd -- "$1" || exit 1
for entry in * .[!.]* ..?*; do
  if [ -e "$entry" ] || [ -L "$entry" ]; then
    stat -c "$2" -- "$entry"
  fi
done
"#;

const STAT_SCRIPT: &str = r#"
if [ ! -e "$1" ] && [ ! -L "$1" ]; then exit 3; fi
stat -c "$2" -- "$1"
"#;

/// Kind of a workspace entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    File,
    Directory,
    Symlink,
    Other,
}

impl EntryType {
    /// Map a `stat %F` description.
    fn from_stat(kind: &str) -> Self {
        match kind {
            "directory" => EntryType::Directory,
            "symbolic link" => EntryType::Symlink,
            k if k.starts_with("regular") => EntryType::File,
            _ => EntryType::Other,
        }
    }
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub size: u64,
    pub modified_at: String,
}

/// Result of [`stat`]; only `exists` is set for missing paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub exists: bool,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub entry_type: Option<EntryType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<String>,
}

impl FileStat {
    fn missing() -> Self {
        Self {
            exists: false,
            entry_type: None,
            size: None,
            modified_at: None,
        }
    }
}

/// Validate a workspace-relative path.
///
/// Rejects empty paths, NUL bytes, paths already carrying the workspace
/// root, absolute paths and any `..` segment.
pub fn validate_relative_path(path: &str) -> ContainerResult<()> {
    if path.trim().is_empty() {
        return Err(ContainerError::InvalidPath(
            "path cannot be empty".to_string(),
        ));
    }

    if path.contains('\0') {
        return Err(ContainerError::InvalidPath(
            "path cannot contain null bytes".to_string(),
        ));
    }

    if path.starts_with(WORKSPACE_ROOT) {
        return Err(ContainerError::InvalidPath(format!(
            "path must be relative to {WORKSPACE_ROOT}, got '{path}'"
        )));
    }

    if path.starts_with('/') || path.starts_with('\\') {
        return Err(ContainerError::InvalidPath(format!(
            "absolute paths are not allowed: '{path}'"
        )));
    }

    if path.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(ContainerError::InvalidPath(format!(
            "parent directory segments are not allowed: '{path}'"
        )));
    }

    Ok(())
}

/// Resolve a validated relative path to its in-container location.
fn container_path(path: &str) -> ContainerResult<String> {
    validate_relative_path(path)?;
    let trimmed = path.trim_start_matches("./");
    if trimmed.is_empty() || trimmed == "." {
        return Ok(WORKSPACE_ROOT.to_string());
    }
    Ok(format!("{WORKSPACE_ROOT}/{}", trimmed.trim_end_matches('/')))
}

fn failure(output: &ExecOutput) -> ContainerError {
    ContainerError::CommandFailed {
        exit_code: output.exit_code,
        stderr: output.stderr.trim().to_string(),
    }
}

fn shell(script: &str, args: &[&str], limits: ExecLimits) -> ExecRequest {
    let mut cmd = vec![
        "sh".to_string(),
        "-c".to_string(),
        script.to_string(),
        "sh".to_string(),
    ];
    cmd.extend(args.iter().map(|arg| arg.to_string()));
    ExecRequest::new(cmd, limits).cwd(WORKSPACE_ROOT)
}

/// Read a text file.
pub async fn read_file(
    runtime: &dyn ContainerRuntimeApi,
    container: &str,
    path: &str,
    limits: ExecLimits,
) -> ContainerResult<String> {
    let full = container_path(path)?;
    let request =
        ExecRequest::new(vec!["cat".into(), "--".into(), full], limits).cwd(WORKSPACE_ROOT);
    let output = runtime.exec(container, &request).await?;

    if !output.success() {
        if output.stderr.contains("No such file") {
            return Err(ContainerError::FileNotFound(path.to_string()));
        }
        if output.stderr.contains("Is a directory") {
            return Err(ContainerError::InvalidPath(format!(
                "'{path}' is a directory"
            )));
        }
        return Err(failure(&output));
    }
    if output.truncated {
        return Err(ContainerError::OutputTooLarge {
            limit: limits.max_output_bytes,
        });
    }
    Ok(output.stdout)
}

/// Write a file, creating parent directories as needed.
pub async fn write_file(
    runtime: &dyn ContainerRuntimeApi,
    container: &str,
    path: &str,
    content: &[u8],
    limits: ExecLimits,
) -> ContainerResult<()> {
    let full = container_path(path)?;
    if full == WORKSPACE_ROOT {
        return Err(ContainerError::InvalidPath(
            "cannot write to the workspace root".to_string(),
        ));
    }
    let request = shell(WRITE_SCRIPT, &[&full], limits).stdin(content.to_vec());
    let output = runtime.exec(container, &request).await?;
    if !output.success() {
        return Err(failure(&output));
    }
    Ok(())
}

/// List a directory, sorted by name.
pub async fn list_dir(
    runtime: &dyn ContainerRuntimeApi,
    container: &str,
    path: &str,
    limits: ExecLimits,
) -> ContainerResult<Vec<FileEntry>> {
    let full = container_path(path)?;
    let output = runtime
        .exec(container, &shell(LIST_SCRIPT, &[&full, STAT_FORMAT], limits))
        .await?;

    match output.exit_code {
        0 => {}
        EXIT_MISSING => return Err(ContainerError::FileNotFound(path.to_string())),
        EXIT_NOT_DIR => {
            return Err(ContainerError::InvalidPath(format!(
                "'{path}' is not a directory"
            )));
        }
        _ => return Err(failure(&output)),
    }
    if output.truncated {
        return Err(ContainerError::OutputTooLarge {
            limit: limits.max_output_bytes,
        });
    }

    parse_listing(&output.stdout)
}

/// Stat a path; a missing path is reported, not an error.
pub async fn stat(
    runtime: &dyn ContainerRuntimeApi,
    container: &str,
    path: &str,
    limits: ExecLimits,
) -> ContainerResult<FileStat> {
    let full = container_path(path)?;
    let output = runtime
        .exec(container, &shell(STAT_SCRIPT, &[&full, STAT_FORMAT], limits))
        .await?;

    match output.exit_code {
        0 => {}
        EXIT_MISSING => return Ok(FileStat::missing()),
        _ => return Err(failure(&output)),
    }

    let line = output
        .stdout
        .lines()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| ContainerError::ParseError("empty stat output".to_string()))?;
    let entry = parse_stat_line(line)?;

    Ok(FileStat {
        exists: true,
        entry_type: Some(entry.entry_type),
        size: Some(entry.size),
        modified_at: Some(entry.modified_at),
    })
}

/// Parse listing output into entries sorted by name.
pub fn parse_listing(output: &str) -> ContainerResult<Vec<FileEntry>> {
    let mut entries = output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_stat_line)
        .collect::<ContainerResult<Vec<_>>>()?;
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// Parse one `type|size|mtime|name` line.
fn parse_stat_line(line: &str) -> ContainerResult<FileEntry> {
    let mut parts = line.splitn(4, '|');
    let (Some(kind), Some(size), Some(mtime), Some(name)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ContainerError::ParseError(format!(
            "malformed stat line: {line}"
        )));
    };

    let size = size
        .parse::<u64>()
        .map_err(|e| ContainerError::ParseError(format!("invalid size '{size}': {e}")))?;
    let secs = mtime
        .parse::<i64>()
        .map_err(|e| ContainerError::ParseError(format!("invalid mtime '{mtime}': {e}")))?;
    let modified_at = DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| ContainerError::ParseError(format!("mtime out of range: {secs}")))?
        .to_rfc3339_opts(SecondsFormat::Secs, true);

    // stat prints the full path for the single-path form.
    let name = name.rsplit('/').next().unwrap_or(name).to_string();

    Ok(FileEntry {
        name,
        entry_type: EntryType::from_stat(kind),
        size,
        modified_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_traversal_and_absolute_paths() {
        for path in ["../etc/passwd", "/etc/passwd", "/workspace/x", "", "  ", "a/../../b", "a\0b"] {
            assert!(
                validate_relative_path(path).is_err(),
                "expected '{}' to be rejected",
                path.escape_debug()
            );
        }
    }

    #[test]
    fn accepts_relative_paths() {
        for path in ["src/app.ts", "README.md", ".", "./src", "dir/", "a..b/file"] {
            assert!(
                validate_relative_path(path).is_ok(),
                "expected '{}' to be accepted",
                path
            );
        }
    }

    #[test]
    fn resolves_container_paths() {
        assert_eq!(container_path("src/app.ts").unwrap(), "/workspace/src/app.ts");
        assert_eq!(container_path(".").unwrap(), "/workspace");
        assert_eq!(container_path("./src/").unwrap(), "/workspace/src");
    }

    #[test]
    fn parses_listing_sorted_by_name() {
        let out = "directory|4096|1700000000|src\n\
                   regular file|12|1700000100|README.md\n\
                   regular empty file|0|1700000200|.env\n\
                   symbolic link|7|1700000300|latest\n\
                   fifo|0|1700000400|pipe|with|bars\n";
        let entries = parse_listing(out).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec![".env", "README.md", "latest", "pipe|with|bars", "src"]);

        assert_eq!(entries[0].entry_type, EntryType::File);
        assert_eq!(entries[0].size, 0);
        assert_eq!(entries[1].modified_at, "2023-11-14T22:15:00Z");
        assert_eq!(entries[2].entry_type, EntryType::Symlink);
        assert_eq!(entries[3].entry_type, EntryType::Other);
        assert_eq!(entries[4].entry_type, EntryType::Directory);
    }

    #[test]
    fn malformed_lines_fail_to_parse() {
        assert!(parse_listing("regular file|12\n").is_err());
        assert!(parse_listing("regular file|big|1700000000|a\n").is_err());
        assert!(parse_listing("").unwrap().is_empty());
    }

    #[test]
    fn stat_line_keeps_basename() {
        let entry = parse_stat_line("regular file|5|1700000000|/workspace/src/main.rs").unwrap();
        assert_eq!(entry.name, "main.rs");
    }

    #[test]
    fn entry_type_serializes_lowercase() {
        let json = serde_json::to_value(FileStat::missing()).unwrap();
        assert_eq!(json, serde_json::json!({"exists": false}));
        let json = serde_json::to_value(EntryType::Directory).unwrap();
        assert_eq!(json, "directory");
    }
}
