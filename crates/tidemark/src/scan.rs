//! Change detection over one source directory.
//!
//! Polling-based: each run lists the directory and keeps regular files whose
//! modification time is strictly newer than the source's watermark and whose
//! name matches the configured pattern. No filesystem notification API is
//! used, so this works on network mounts as well.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::trace;

/// A file discovered during a scan, paired with its modification time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    pub mtime: DateTime<Utc>,
}

/// Compile a file-name pattern so it must match the whole name, mirroring
/// `re.fullmatch` semantics rather than a substring search.
pub fn compile_name_pattern(raw: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{raw})$"))
}

/// List candidate files: regular files under `dir` (one level, no recursion)
/// whose name matches `pattern` and whose mtime exceeds `watermark`, sorted
/// ascending by mtime with ties broken by path.
///
/// Files that vanish between listing and stat-ing are skipped; temp files
/// come and go while a scan runs and that race is expected, not a fault.
pub fn scan_dir(
    dir: &Path,
    pattern: Option<&Regex>,
    watermark: DateTime<Utc>,
) -> io::Result<Vec<Candidate>> {
    let mut candidates = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if let Some(pattern) = pattern {
            let name = entry.file_name();
            if !pattern.is_match(&name.to_string_lossy()) {
                continue;
            }
        }

        let Some(mtime) = stat_mtime(&path)? else {
            trace!("skipping {}: vanished or not a regular file", path.display());
            continue;
        };
        if mtime > watermark {
            candidates.push(Candidate { path, mtime });
        }
    }

    candidates.sort_by(|a, b| a.mtime.cmp(&b.mtime).then_with(|| a.path.cmp(&b.path)));
    Ok(candidates)
}

/// Modification time of a regular file; `None` if the path no longer exists
/// or is not a regular file.
fn stat_mtime(path: &Path) -> io::Result<Option<DateTime<Utc>>> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() => {
            let modified = meta.modified()?;
            Ok(Some(DateTime::<Utc>::from(modified)))
        }
        Ok(_) => Ok(None),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}
