//! External tool strategy.
//!
//! The archiver, the git client and the registry copy tool are opaque external
//! processes. Each is reached through [`ExternalTool`] so callers can swap in a
//! different binary, or a recording fake in tests.

use crate::error::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// A single command-line argument, optionally secret.
#[derive(Clone)]
pub enum ToolArg {
    /// A plain argument.
    Plain(String),
    /// An argument containing a credential.
    Secret {
        /// What to show in logs and dry-run output.
        display: String,
        /// The real argument passed to the process.
        value: SecretString,
    },
}

impl ToolArg {
    /// Creates a secret argument with its printable stand-in.
    #[must_use]
    pub fn secret(display: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Secret {
            display: display.into(),
            value: SecretString::from(value.into()),
        }
    }

    /// The printable form of the argument.
    #[must_use]
    pub fn display(&self) -> &str {
        match self {
            Self::Plain(s) => s,
            Self::Secret { display, .. } => display,
        }
    }

    /// The argument as passed to the process.
    #[must_use]
    pub fn expose(&self) -> &str {
        match self {
            Self::Plain(s) => s,
            Self::Secret { value, .. } => value.expose_secret(),
        }
    }
}

impl fmt::Debug for ToolArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display())
    }
}

impl From<&str> for ToolArg {
    fn from(s: &str) -> Self {
        Self::Plain(s.to_string())
    }
}

impl From<String> for ToolArg {
    fn from(s: String) -> Self {
        Self::Plain(s)
    }
}

impl From<&Path> for ToolArg {
    fn from(p: &Path) -> Self {
        Self::Plain(p.display().to_string())
    }
}

/// Captured result of a tool run.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// Exit code, `None` when killed by a signal.
    pub code: Option<i32>,
    /// Whether the process exited successfully.
    pub success: bool,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl ToolOutput {
    /// A successful output with the given stdout.
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed output with the given stderr.
    #[must_use]
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Converts an unsuccessful run into [`Error::ToolFailed`].
    ///
    /// # Errors
    ///
    /// Returns an error if the process did not succeed.
    pub fn check(self, tool: &str, args: &[ToolArg]) -> Result<Self> {
        if self.success {
            return Ok(self);
        }
        Err(Error::ToolFailed {
            tool: tool.to_string(),
            args: display_args(args),
            status: self
                .code
                .map_or_else(|| "signal".to_string(), |c| format!("exit code {c}")),
            stderr: self.stderr.trim().to_string(),
        })
    }
}

/// An external program the pipeline delegates to.
pub trait ExternalTool {
    /// Program name used in messages.
    fn name(&self) -> &str;

    /// Whether the program can be run.
    fn is_available(&self) -> bool;

    /// Runs the program and captures its output.
    ///
    /// A non-zero exit is not an error here; see [`ToolOutput::check`].
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be started.
    fn invoke(&self, args: &[ToolArg], cwd: Option<&Path>, env: &[(String, String)]) -> Result<ToolOutput>;

    /// Runs the program and fails on a non-zero exit.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be started or exits unsuccessfully.
    fn run(&self, args: &[ToolArg], cwd: Option<&Path>, env: &[(String, String)]) -> Result<ToolOutput> {
        self.invoke(args, cwd, env)?.check(self.name(), args)
    }

    /// The command line as it would be typed, with secrets replaced.
    fn command_line(&self, args: &[ToolArg]) -> String {
        if args.is_empty() {
            self.name().to_string()
        } else {
            format!("{} {}", self.name(), display_args(args))
        }
    }
}

/// A tool found on `PATH` or at an explicit location.
#[derive(Debug, Clone)]
pub struct SystemTool {
    name: String,
    program: Option<PathBuf>,
}

impl SystemTool {
    /// A tool resolved on `PATH` by name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: None,
        }
    }

    /// A tool at an explicit path.
    #[must_use]
    pub fn at(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: Some(program.into()),
        }
    }

    /// The first of `candidates` found on `PATH`, e.g. `gtar` before `tar`.
    #[must_use]
    pub fn first_available(candidates: &[&str]) -> Option<Self> {
        candidates.iter().find_map(|candidate| {
            which::which(candidate)
                .ok()
                .map(|path| Self::at(*candidate, path))
        })
    }

    fn resolve(&self) -> Result<PathBuf> {
        match &self.program {
            Some(path) => Ok(path.clone()),
            None => which::which(&self.name).map_err(|_| Error::tool_missing(&self.name)),
        }
    }
}

impl ExternalTool for SystemTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        self.resolve().is_ok_and(|p| p.is_file())
    }

    fn invoke(&self, args: &[ToolArg], cwd: Option<&Path>, env: &[(String, String)]) -> Result<ToolOutput> {
        let program = self.resolve()?;
        debug!(tool = %self.name, args = %display_args(args), "Running external tool");

        let mut command = Command::new(&program);
        command.args(args.iter().map(ToolArg::expose));
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }
        command.envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        let output = command.output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::tool_missing(&self.name)
            } else {
                Error::io_at(&program, e)
            }
        })?;

        Ok(ToolOutput {
            code: output.status.code(),
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Joins arguments for display, quoting those with whitespace.
#[must_use]
pub fn display_args(args: &[ToolArg]) -> String {
    args.iter()
        .map(|a| {
            let s = a.display();
            if s.is_empty() || s.contains(char::is_whitespace) {
                format!("'{}'", s.replace('\'', r"'\''"))
            } else {
                s.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_arg_is_hidden() {
        let arg = ToolArg::secret("--creds=bot:$TOKEN", "--creds=bot:hunter2");
        assert_eq!(arg.display(), "--creds=bot:$TOKEN");
        assert_eq!(arg.expose(), "--creds=bot:hunter2");
        assert!(!format!("{arg:?}").contains("hunter2"));
    }

    #[test]
    fn test_display_args_quotes_whitespace() {
        let args: Vec<ToolArg> = vec!["commit".into(), "--message=foo: add 1.0 bottle.".into()];
        assert_eq!(display_args(&args), "commit '--message=foo: add 1.0 bottle.'");
    }

    #[test]
    fn test_check_failure_carries_stderr() {
        let args: Vec<ToolArg> = vec!["inspect".into()];
        let err = ToolOutput::failed(1, "manifest unknown\n")
            .check("skopeo", &args)
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("skopeo inspect"));
        assert!(msg.contains("manifest unknown"));
        assert!(msg.contains("exit code 1"));
    }

    #[test]
    fn test_check_success_passes_through() {
        let out = ToolOutput::ok("done").check("tar", &[]).unwrap();
        assert_eq!(out.stdout, "done");
    }

    #[test]
    fn test_missing_system_tool() {
        let tool = SystemTool::new("definitely-not-a-real-tool-bottler");
        assert!(!tool.is_available());
        let err = tool.invoke(&[], None, &[]).unwrap_err();
        assert!(matches!(err, Error::ToolMissing { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_system_tool_runs() {
        let Some(tool) = SystemTool::first_available(&["sh"]) else {
            return;
        };
        let args: Vec<ToolArg> = vec!["-c".into(), "echo out; echo err >&2; exit 3".into()];
        let output = tool.invoke(&args, None, &[]).unwrap();
        assert!(!output.success);
        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert!(tool.run(&args, None, &[]).is_err());
    }

    #[test]
    fn test_command_line() {
        let tool = SystemTool::new("skopeo");
        let args = vec![
            ToolArg::from("copy"),
            ToolArg::secret("--dest-creds=bot:$BOTTLER_REGISTRY_TOKEN", "--dest-creds=bot:x"),
        ];
        assert_eq!(
            tool.command_line(&args),
            "skopeo copy --dest-creds=bot:$BOTTLER_REGISTRY_TOKEN"
        );
    }
}
