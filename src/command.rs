use std::{ffi::OsStr, io, process::Stdio, time::Duration};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, instrument};

#[derive(Error, Debug)]
pub(crate) enum CommandError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
}

/// Spawn attempts made while the executable is still open for writing somewhere.
const BUSY_ATTEMPTS: u32 = 5;
const BUSY_BACKOFF: Duration = Duration::from_millis(10);

/// Runs an external program to completion and returns its standard output.
///
/// The child is killed if the returned future is dropped before it finishes, so callers can bound
/// the run time with [`tokio::time::timeout`].
#[instrument(skip_all, fields(program = %program.as_ref().to_string_lossy()))]
pub(crate) async fn run<I, S>(program: impl AsRef<OsStr>, args: I) -> Result<Vec<u8>, CommandError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let name = program.as_ref().to_string_lossy().into_owned();
    let mut command = Command::new(program.as_ref());
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut attempt = 1;
    let output = loop {
        match command.output().await {
            Err(e) if e.kind() == io::ErrorKind::ExecutableFileBusy && attempt < BUSY_ATTEMPTS => {
                debug!(attempt, "executable is busy, retrying");
                tokio::time::sleep(BUSY_BACKOFF * attempt).await;
                attempt += 1;
            }
            result => {
                break result.map_err(|source| CommandError::Spawn {
                    program: name.clone(),
                    source,
                })?;
            }
        }
    };

    if !output.status.success() {
        return Err(CommandError::Failed {
            program: name,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_owned(),
        });
    }

    debug!(bytes = output.stdout.len(), "command finished");
    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout() {
        let output = run("echo", ["some output"]).await.unwrap();
        assert_eq!(output, b"some output\n");
    }

    #[tokio::test]
    async fn failing_command_reports_stderr() {
        let err = run("sh", ["-c", "echo broken >&2; exit 3"]).await.unwrap_err();
        match err {
            CommandError::Failed { stderr, status, .. } => {
                assert_eq!(stderr, "broken");
                assert_eq!(status.code(), Some(3));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn retries_while_executable_is_busy() {
        use std::{io::Write, os::unix::fs::PermissionsExt};

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("busy");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"#!/bin/sh\necho ready\n").unwrap();
        file.flush().unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        // Exec fails with ETXTBSY until the writable handle is closed.
        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(file);
        });

        let output = run(&path, std::iter::empty::<&str>()).await.unwrap();
        release.await.unwrap();

        assert_eq!(output, b"ready\n");
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let err = run("/nonexistent/program", std::iter::empty::<&str>())
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
    }
}
