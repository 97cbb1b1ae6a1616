use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::error::{JudgeError, Result};

/// Full access for owner and compiler group, nothing for others
pub const WORKSPACE_MODE: u32 = 0o770;

/// Identity pair applied to everything the judge hands over to the compiler group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ownership {
    pub uid: u32,
    pub gid: u32,
}

impl Ownership {
    /// Applies ownership and mode to an existing path
    pub fn apply(&self, path: &Path, mode: u32) -> std::io::Result<()> {
        std::os::unix::fs::chown(path, Some(self.uid), Some(self.gid))?;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
    }
}

/// Generates the identifier a submission's workspace is named after
pub fn new_submission_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// A directory owned by exactly one in-flight submission
///
/// The directory is removed by [`Workspace::release`], or on drop if release
/// was never reached, unless `keep` is set.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    keep: bool,
    released: bool,
}

impl Workspace {
    /// Creates `base_dir/submission_id` with the given ownership
    ///
    /// The directory must not exist yet. When ownership or mode cannot be applied
    /// the half-built directory is removed again and the whole setup fails.
    pub fn acquire(
        base_dir: &Path,
        submission_id: &str,
        ownership: Ownership,
        keep: bool,
    ) -> Result<Self> {
        let path = base_dir.join(submission_id);

        if let Err(e) = fs::create_dir(&path) {
            log::error!("Failed to create workspace {}: {e}", path.display());
            return Err(setup_failed());
        }

        if let Err(e) = ownership.apply(&path, WORKSPACE_MODE) {
            log::error!("Failed to set up permissions of workspace {}: {e}", path.display());
            if let Err(e) = fs::remove_dir_all(&path) {
                log::error!("Failed to remove half-built workspace {}: {e}", path.display());
            }
            return Err(setup_failed());
        }

        log::debug!("Workspace {} created", path.display());
        Ok(Self {
            path,
            keep,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the directory tree, reporting failure as a cleanup error
    pub fn release(mut self) -> Result<()> {
        self.remove()
    }

    fn remove(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        if self.keep {
            log::info!("Debug mode: keeping workspace {}", self.path.display());
            return Ok(());
        }

        fs::remove_dir_all(&self.path).map_err(|e| {
            log::error!("Failed to remove workspace {}: {e}", self.path.display());
            JudgeError::JudgeClient("failed to clean runtime dir".to_string())
        })
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        // Reached only when release() was skipped, e.g. by a panic
        let _ = self.remove();
    }
}

fn setup_failed() -> JudgeError {
    JudgeError::JudgeClient("failed to create runtime dir".to_string())
}

/// Runs `f` inside a fresh workspace and releases it on every exit path
///
/// If `f` fails and the cleanup fails as well, the error of `f` is returned and
/// the cleanup error is only logged.
pub fn with_workspace<T>(
    base_dir: &Path,
    submission_id: &str,
    ownership: Ownership,
    keep: bool,
    f: impl FnOnce(&Path) -> Result<T>,
) -> Result<T> {
    let workspace = Workspace::acquire(base_dir, submission_id, ownership, keep)?;
    let outcome = f(workspace.path());
    let released = workspace.release();

    match (outcome, released) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(cleanup)) => Err(cleanup),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(cleanup)) => {
            log::error!("Workspace cleanup failed ({cleanup}) while reporting: {e}");
            Err(e)
        }
    }
}
