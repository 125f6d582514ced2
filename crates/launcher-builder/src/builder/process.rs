//! Time-bounded toolchain subprocesses.

use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::log::BuildLog;

/// Outcome of one toolchain invocation.
#[derive(Debug)]
pub enum CommandOutcome {
    Success,
    Failed { code: Option<i32>, stderr_tail: String },
    TimedOut,
}

impl CommandOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CommandOutcome::Success)
    }

    /// One-line description for error messages.
    pub fn describe(&self, program: &str, timeout: Duration) -> String {
        match self {
            CommandOutcome::Success => format!("{program} succeeded"),
            CommandOutcome::Failed { code, stderr_tail } => {
                let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
                if stderr_tail.is_empty() {
                    format!("{program} exited with {code}")
                } else {
                    format!("{program} exited with {code}: {stderr_tail}")
                }
            }
            CommandOutcome::TimedOut => {
                format!("{program} timed out after {}s", timeout.as_secs())
            }
        }
    }
}

/// Run `program args..` in `cwd`, copying its output into `log`.
///
/// The child is killed if `timeout` elapses. Failing to spawn at all is
/// reported as `Err` so callers can tell a missing toolchain from a failed
/// build.
pub async fn run_command<I, S>(
    program: &Path,
    args: I,
    cwd: &Path,
    timeout: Duration,
    log: &mut BuildLog,
) -> Result<CommandOutcome, String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<S> = args.into_iter().collect();
    let label = program
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string());

    let rendered: Vec<String> = args
        .iter()
        .map(|a| a.as_ref().to_string_lossy().into_owned())
        .collect();
    log.push(format!("$ {label} {}", rendered.join(" ")));

    let child = Command::new(program)
        .args(&args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("failed to start {label}: {e}"))?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| format!("failed to wait for {label}: {e}"))?,
        Err(_) => {
            log.push(format!("{label} timed out after {}s", timeout.as_secs()));
            return Ok(CommandOutcome::TimedOut);
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    log.push_output(&label, &stdout);
    log.push_output(&label, &stderr);

    if output.status.success() {
        Ok(CommandOutcome::Success)
    } else {
        let stderr_tail = stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or_default()
            .trim()
            .to_string();
        Ok(CommandOutcome::Failed {
            code: output.status.code(),
            stderr_tail,
        })
    }
}
