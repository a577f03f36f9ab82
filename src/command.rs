/// Command execution seam for the filesystem check.
///
/// The enumerator only needs "run this program, give me stdout and whether it
/// succeeded"; putting that behind a trait lets tests feed canned `df` and
/// `mmparam` output.
use std::process::Command;

/// Captured result of a finished command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit code (None if killed by signal).
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs external commands and captures their output.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[&str]) -> std::io::Result<CommandOutput>;
}

/// Runs commands as real child processes and waits for them.
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> std::io::Result<CommandOutput> {
        tracing::debug!(program, args = ?args, "running command");
        let out = Command::new(program).args(args).output()?;
        Ok(CommandOutput {
            exit_code: out.status.code(),
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_requires_zero_exit() {
        let ok = CommandOutput {
            exit_code: Some(0),
            ..Default::default()
        };
        let failed = CommandOutput {
            exit_code: Some(1),
            ..Default::default()
        };
        let killed = CommandOutput::default();
        assert!(ok.success());
        assert!(!failed.success());
        assert!(!killed.success());
    }

    #[test]
    fn system_runner_missing_program_is_io_error() {
        let result = SystemRunner.run("/nonexistent/qstar-mmparam", &[]);
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[test]
    fn system_runner_captures_stdout_and_exit_code() {
        let out = SystemRunner.run("sh", &["-c", "echo hello; exit 3"]).unwrap();
        assert_eq!(out.stdout, "hello\n");
        assert_eq!(out.exit_code, Some(3));
        assert!(!out.success());
    }
}
