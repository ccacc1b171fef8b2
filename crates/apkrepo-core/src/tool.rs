//! Thin wrapper for the external programs the generator shells out to.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{IndexError, Result};

/// An external program, located lazily on first use so that runs which
/// never need it (an empty store, say) do not require it to be installed.
#[derive(Debug, Clone)]
pub struct ExternalTool {
    name: &'static str,
    program: PathBuf,
}

impl ExternalTool {
    /// `name` is used in error messages, `program` is a bare name looked up
    /// in `PATH` or an explicit path.
    pub fn new(name: &'static str, program: impl Into<PathBuf>) -> Self {
        Self {
            name,
            program: program.into(),
        }
    }

    /// Display name of the tool.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run the tool with `args` and return its stdout.
    ///
    /// `subject` is the file the invocation is about and only feeds error
    /// messages.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Tool`] if the program cannot be found or
    /// spawned, exits non-zero, or prints non-UTF-8 output.
    pub fn run<I, S>(&self, args: I, subject: &Path) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let program = which::which(&self.program).map_err(|_| IndexError::Tool {
            tool: self.name,
            path: subject.to_path_buf(),
            message: format!("'{}' not found", self.program.display()),
        })?;

        let output = Command::new(&program)
            .args(args)
            .output()
            .map_err(|e| IndexError::Tool {
                tool: self.name,
                path: subject.to_path_buf(),
                message: format!("failed to spawn {}: {e}", program.display()),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(IndexError::Tool {
                tool: self.name,
                path: subject.to_path_buf(),
                message: format!("{}: {}", output.status, stderr.trim()),
            });
        }

        String::from_utf8(output.stdout).map_err(|_| IndexError::Tool {
            tool: self.name,
            path: subject.to_path_buf(),
            message: "output is not valid UTF-8".to_string(),
        })
    }
}
