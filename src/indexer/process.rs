//! Scoped subprocess invocation with cooperative cancellation.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::error::{Error, Result};

/// Captured output of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// `program arg1 arg2 ...`, used in logs and errors.
pub fn describe(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run `program` to completion and capture its output.
///
/// A non-zero exit is [`Error::Process`] carrying stderr; a launch failure is
/// [`Error::Spawn`]. If `cancel` fires first the child is killed and the call
/// fails with [`Error::Cancelled`]. The child never outlives this call.
pub async fn run_command(
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
    cancel: Option<&CancellationToken>,
) -> Result<CommandOutput> {
    let command = describe(program, args);

    if cancel.is_some_and(CancellationToken::is_cancelled) {
        return Err(Error::Cancelled { command });
    }

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    debug!("Running {}", command);
    let child = cmd.spawn().map_err(|source| Error::Spawn {
        command: command.clone(),
        source,
    })?;

    let output = match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("Cancelled {}", command);
                return Err(Error::Cancelled { command });
            }
            output = child.wait_with_output() => output?,
        },
        None => child.wait_with_output().await?,
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        return Err(Error::Process {
            command,
            code: output.status.code(),
            stderr,
        });
    }

    Ok(CommandOutput { stdout, stderr })
}
