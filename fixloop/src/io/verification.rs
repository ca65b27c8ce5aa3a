//! Verification contract: run the external check and normalize its result.
//!
//! Exit code 0 means passed; anything else (including a timeout or a failure
//! to spawn) is `passed: false` with the captured output as diagnostic text.
//! Nothing here returns an error for a failed check.

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::types::VerificationOutcome;
use crate::io::process::run_with_timeout;

/// The externally-defined check for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckDefinition {
    /// Program followed by its arguments.
    pub command: Vec<String>,
    pub workdir: PathBuf,
}

impl CheckDefinition {
    /// Shape checks that do not touch the process table.
    pub fn validate(&self) -> Result<()> {
        let Some(program) = self.command.first() else {
            return Err(anyhow!("check command is empty"));
        };
        if program.trim().is_empty() {
            return Err(anyhow!("check program is blank"));
        }
        if !self.workdir.is_dir() {
            return Err(anyhow!(
                "check working directory {} does not exist",
                self.workdir.display()
            ));
        }
        Ok(())
    }

    pub fn display_command(&self) -> String {
        self.command.join(" ")
    }
}

/// Abstraction over verification backends.
pub trait Verifier {
    /// Confirm the check can be executed at all. Failure here is fatal for a run.
    fn probe(&self, check: &CheckDefinition) -> Result<()> {
        check.validate()
    }

    /// Run the check once. Never fails: problems become `passed: false`.
    fn run(&self, check: &CheckDefinition, timeout: Duration) -> VerificationOutcome;
}

/// Verifier that spawns the check command as a child process.
#[derive(Debug, Clone)]
pub struct CommandVerifier {
    pub output_limit_bytes: usize,
}

impl Verifier for CommandVerifier {
    fn probe(&self, check: &CheckDefinition) -> Result<()> {
        check.validate()?;
        let program = check.command.first().map(String::as_str).unwrap_or_default();
        resolve_program(program, &check.workdir)
            .map(|path| debug!(program = %program, resolved = %path.display(), "check program resolved"))
            .ok_or_else(|| anyhow!("check program '{program}' not found"))
    }

    #[instrument(skip_all, fields(command = %check.display_command(), timeout_ms = timeout.as_millis() as u64))]
    fn run(&self, check: &CheckDefinition, timeout: Duration) -> VerificationOutcome {
        let started = Instant::now();
        let Some((program, args)) = check.command.split_first() else {
            return VerificationOutcome {
                passed: false,
                output: String::new(),
                diagnostic: "check command is empty".to_string(),
                duration_ms: 0,
            };
        };
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&check.workdir);

        let captured = match run_with_timeout(cmd, None, timeout, self.output_limit_bytes) {
            Ok(captured) => captured,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "failed to run check");
                return VerificationOutcome {
                    passed: false,
                    output: String::new(),
                    diagnostic: format!("failed to run check: {err:#}"),
                    duration_ms: started.elapsed().as_millis() as u64,
                };
            }
        };

        let mut diagnostic = captured.stderr_with_notice();
        if captured.timed_out {
            diagnostic.push_str(&format!(
                "\n[verification timed out after {} ms]\n",
                timeout.as_millis()
            ));
        }
        let passed = captured.succeeded();
        info!(passed, exit_code = ?captured.exit_code, "verification finished");
        VerificationOutcome {
            passed,
            output: captured.stdout,
            diagnostic,
            duration_ms: captured.elapsed.as_millis() as u64,
        }
    }
}

/// Locate `program` the way a shell would: paths containing a separator are
/// taken relative to `workdir`, bare names are searched on `PATH`.
pub fn resolve_program(program: &str, workdir: &Path) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        let path = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            workdir.join(candidate)
        };
        return path.is_file().then_some(path);
    }
    let search = env::var_os("PATH")?;
    env::split_paths(&search)
        .map(|dir| dir.join(program))
        .find(|path| path.is_file())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn check(script: &str, workdir: &Path) -> CheckDefinition {
        CheckDefinition {
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            workdir: workdir.to_path_buf(),
        }
    }

    fn verifier() -> CommandVerifier {
        CommandVerifier {
            output_limit_bytes: 10_000,
        }
    }

    #[test]
    fn exit_zero_passes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let outcome = verifier().run(&check("echo ok", temp.path()), Duration::from_secs(10));
        assert!(outcome.passed);
        assert_eq!(outcome.output.trim(), "ok");
    }

    #[test]
    fn nonzero_exit_fails_with_captured_diagnostic() {
        let temp = tempfile::tempdir().expect("tempdir");
        let outcome = verifier().run(
            &check("echo 'AssertionError: boom' 1>&2; exit 2", temp.path()),
            Duration::from_secs(10),
        );
        assert!(!outcome.passed);
        assert!(outcome.diagnostic.contains("AssertionError: boom"));
    }

    #[test]
    fn timeout_is_a_failed_verification() {
        let temp = tempfile::tempdir().expect("tempdir");
        let outcome = verifier().run(&check("sleep 5", temp.path()), Duration::from_millis(100));
        assert!(!outcome.passed);
        assert!(outcome.diagnostic.contains("timed out"));
    }

    #[test]
    fn probe_rejects_missing_program_and_empty_command() {
        let temp = tempfile::tempdir().expect("tempdir");
        let missing = CheckDefinition {
            command: vec!["definitely-not-a-real-program-xyz".to_string()],
            workdir: temp.path().to_path_buf(),
        };
        assert!(verifier().probe(&missing).is_err());

        let empty = CheckDefinition {
            command: Vec::new(),
            workdir: temp.path().to_path_buf(),
        };
        assert!(verifier().probe(&empty).is_err());

        assert!(verifier().probe(&check("true", temp.path())).is_ok());
    }
}
