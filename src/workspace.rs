//! Working-directory lifecycle.
//!
//! Every run starts by resetting its directories so that no slice, staging file or fragment from
//! a previous run can be consumed. Removal is best-effort per child: one stubborn entry is logged
//! and reported, and the rest of the reset continues.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{PipelineError, PipelineResult};

/// What a reset removed and what it could not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetReport {
    /// Direct children removed across all directories.
    pub removed: usize,
    /// Children that could not be removed.
    pub failures: Vec<PathBuf>,
}

impl ResetReport {
    fn merge(&mut self, other: ResetReport) {
        self.removed += other.removed;
        self.failures.extend(other.failures);
    }

    /// `true` if every child was removed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Ensure every directory in `paths` exists and is empty.
///
/// Fails with [`PipelineError::WriteFailure`] only when a directory cannot be created; failures
/// to remove individual children are logged and collected in the report.
pub fn reset_directories<P: AsRef<Path>>(paths: &[P]) -> PipelineResult<ResetReport> {
    let mut report = ResetReport::default();
    for path in paths {
        report.merge(reset_directory(path.as_ref())?);
    }
    Ok(report)
}

/// Ensure `dir` exists and is empty.
pub fn reset_directory(dir: &Path) -> PipelineResult<ResetReport> {
    fs::create_dir_all(dir).map_err(|e| PipelineError::write_failure(dir, e))?;

    let mut report = ResetReport::default();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf());
                warn!(path = %path.display(), error = %err, "failed to inspect workspace entry");
                report.failures.push(path);
                continue;
            }
        };

        // Symlinks are not followed, so a link to a directory is removed as a file.
        let result = if entry.file_type().is_dir() {
            fs::remove_dir_all(entry.path())
        } else {
            fs::remove_file(entry.path())
        };
        match result {
            Ok(()) => report.removed += 1,
            Err(err) => {
                warn!(path = %entry.path().display(), error = %err, "failed to remove workspace entry");
                report.failures.push(entry.into_path());
            }
        }
    }

    debug!(dir = %dir.display(), removed = report.removed, "workspace directory reset");
    Ok(report)
}
