use std::fmt;
use std::process::{Command, Output};

use anyhow::{Context, Result, bail};
use tracing::debug;

/// One external program invocation, kept as argv.
///
/// Nothing is ever passed through a shell, so arguments cannot be
/// re-split or expanded on the way to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Build from a whitespace-separated command line such as
    /// `python3 ./recoder.py`. Returns `None` for an empty line.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program).args(parts))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Program followed by its arguments.
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }

    /// Reject invocations that cannot be passed to `execve` unchanged.
    pub fn validate(&self) -> Result<()> {
        if self.program.trim().is_empty() {
            bail!("empty program name");
        }
        for arg in self.argv() {
            if arg.contains(['\0', '\n', '\r']) {
                bail!("argument {arg:?} of '{}' contains a control character", self.program);
            }
        }
        Ok(())
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv().join(" "))
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Turn a non-zero exit into an error carrying the command and stderr.
    pub fn checked(self, invocation: &Invocation) -> Result<Self> {
        if !self.success {
            bail!(
                "command failed ({}): {invocation}\n{}",
                self.code
                    .map_or_else(|| "killed".to_string(), |c| format!("exit {c}")),
                self.stderr.trim()
            );
        }
        Ok(self)
    }
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// Run `sudo <invocation>` in the root namespace, returning raw output.
pub fn sudo(invocation: &Invocation) -> Result<CommandOutput> {
    invocation.validate()?;
    debug!(cmd = %invocation, "sudo");
    Command::new("sudo")
        .args(invocation.argv())
        .output()
        .map(CommandOutput::from)
        .with_context(|| format!("sudo {invocation}"))
}

/// Run `sudo <invocation>`, bailing with stderr on a non-zero exit.
pub fn sudo_checked(invocation: &Invocation) -> Result<CommandOutput> {
    sudo(invocation)?.checked(invocation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_command_line_splits_on_whitespace() {
        let inv = Invocation::from_command_line("python3  ./recoder.py ").unwrap();
        assert_eq!(inv.program(), "python3");
        assert_eq!(inv.arguments(), ["./recoder.py"]);
        assert!(Invocation::from_command_line("   ").is_none());
    }

    #[test]
    fn test_display_joins_argv() {
        let inv = Invocation::new("ovs-ofctl").args(["dump-flows", "s1"]);
        assert_eq!(inv.to_string(), "ovs-ofctl dump-flows s1");
    }

    #[test]
    fn test_validate_rejects_control_characters() {
        assert!(Invocation::new("iperf").arg("-s").validate().is_ok());
        assert!(Invocation::new("iperf").arg("a\nb").validate().is_err());
        assert!(Invocation::new(" ").validate().is_err());
    }

    #[test]
    fn test_checked_reports_stderr() {
        let inv = Invocation::new("ovs-vsctl").args(["get", "Interface", "s9-h9", "ofport"]);
        let err = CommandOutput::failed(1, "no row \"s9-h9\"\n")
            .checked(&inv)
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("exit 1"), "{msg}");
        assert!(msg.contains("s9-h9"), "{msg}");
        assert!(CommandOutput::ok("7\n").checked(&inv).is_ok());
    }
}
