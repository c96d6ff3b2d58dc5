//! Advisory git bookkeeping in the shared application repository.
//!
//! Nothing here can fail an environment operation: every outcome is an [`Advisory`].

use crate::core::advisory::Advisory;
use crate::core::runner::{CommandRunner, ToolInvocation, run_captured};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Clone)]
pub struct GitBookkeeper {
    repo_dir: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl GitBookkeeper {
    pub fn new(repo_dir: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            runner,
        }
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    fn git(&self, args: &[&str]) -> ToolInvocation {
        ToolInvocation::new("git", args.iter().copied()).in_dir(&self.repo_dir)
    }

    fn is_repository(&self) -> bool {
        self.repo_dir.is_dir() && run_captured(self.runner.as_ref(), &self.git(&["status"])).success()
    }

    /// `git checkout -b <name>`. Skipped when the directory is not a repository.
    pub fn create_branch(&self, name: &str) -> Advisory {
        if !self.is_repository() {
            return Advisory::skipped(format!(
                "{} is not a git repository; skipping git branch creation",
                self.repo_dir.display()
            ));
        }
        let out = run_captured(self.runner.as_ref(), &self.git(&["checkout", "-b", name]));
        if out.success() {
            tracing::info!(branch = name, "Created and checked out git branch {}", name);
            Advisory::ok()
        } else {
            Advisory::failed(format!(
                "git checkout -b {} failed: {}",
                name,
                out.stderr.trim()
            ))
        }
    }

    /// `git branch -D <name>`.
    pub fn delete_branch(&self, name: &str) -> Advisory {
        if !self.is_repository() {
            return Advisory::skipped(format!(
                "{} is not a git repository; skipping git branch deletion",
                self.repo_dir.display()
            ));
        }
        let out = run_captured(self.runner.as_ref(), &self.git(&["branch", "-D", name]));
        if out.success() {
            tracing::info!(branch = name, "Deleted git branch {}", name);
            Advisory::ok()
        } else {
            Advisory::failed(format!("git branch -D {} failed: {}", name, out.stderr.trim()))
        }
    }
}
