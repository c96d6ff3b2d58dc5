//! External tool invocation.
//!
//! Every shell-out (compose, docker, git) goes through [`CommandRunner`] so the
//! orchestration code can be exercised against scripted tool output.

use crate::core::error::HovelError;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl ToolInvocation {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
        }
    }

    pub fn in_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    /// `program arg1 arg2`, used in logs and error messages.
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Converts a non-zero exit into [`HovelError::ExternalToolFailure`].
    pub fn into_result(self, tool: &str) -> Result<ToolOutput, HovelError> {
        if self.success() {
            return Ok(self);
        }
        Err(HovelError::ExternalToolFailure {
            tool: tool.to_string(),
            exit_code: self.exit_code,
            stdout: self.stdout.trim().to_string(),
            stderr: self.stderr.trim().to_string(),
        })
    }
}

pub trait CommandRunner: Send + Sync {
    /// Runs the tool to completion. `Err` means the process could not be launched;
    /// a launched process that exits non-zero is still `Ok`.
    fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput, HovelError>;
}

/// Runs tools as real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput, HovelError> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &invocation.cwd {
            cmd.current_dir(dir);
        }
        let output = cmd.output().map_err(HovelError::IoError)?;
        Ok(ToolOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Runs `invocation`, folding launch failures into the same structured failure a
/// non-zero exit produces. Nothing here panics or escapes as an untyped fault.
pub fn run_captured(runner: &dyn CommandRunner, invocation: &ToolInvocation) -> ToolOutput {
    match runner.run(invocation) {
        Ok(output) => output,
        Err(e) => ToolOutput {
            exit_code: None,
            stdout: String::new(),
            stderr: format!("failed to launch {}: {}", invocation.program, e),
        },
    }
}
