use crate::error::{MergeError, MergeResult};
use crate::ffmpeg::command::ToolCommand;
use bytes::Bytes;
use std::io::{Error as IoError, ErrorKind as IoErrorKind};
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

/// Runs `cmd` with `inputs` written to its standard input in order and returns
/// everything it printed to standard output.
///
/// stdin is fed from a separate task while stdout and stderr are drained together,
/// so a tool that blocks writing output never stalls our writes.
pub async fn run_piped(cmd: &ToolCommand, inputs: Vec<Bytes>) -> MergeResult<Vec<u8>> {
    let started = Instant::now();
    let input_bytes: usize = inputs.iter().map(Bytes::len).sum();
    debug!(program = %cmd.program, input_bytes, "Spawning external tool");

    let mut child = Command::new(&cmd.program)
        .args(&cmd.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|error| {
            if error.kind() == IoErrorKind::NotFound {
                MergeError::ToolFailed {
                    tool: cmd.program.clone(),
                    status: "not found".into(),
                    stderr: error.to_string(),
                }
            } else {
                MergeError::Io(error)
            }
        })?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| IoError::other("stdin was not captured"))?;
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| IoError::other("stdout was not captured"))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| IoError::other("stderr was not captured"))?;

    let writer = tokio::spawn(async move {
        for chunk in inputs {
            stdin.write_all(&chunk).await?;
        }
        stdin.shutdown().await?;
        // dropping stdin closes the pipe and signals EOF
        Ok::<(), IoError>(())
    });

    let mut out = Vec::new();
    let mut err = Vec::new();
    let (out_result, err_result) = tokio::join!(
        stdout.read_to_end(&mut out),
        stderr.read_to_end(&mut err)
    );
    out_result?;
    err_result?;

    let status = child.wait().await?;
    let write_result = writer.await.map_err(IoError::other)?;

    if !status.success() {
        let stderr = String::from_utf8_lossy(&err).trim().to_string();
        warn!(program = %cmd.program, %status, "External tool failed");
        return Err(MergeError::ToolFailed {
            tool: cmd.program.clone(),
            status: status.to_string(),
            stderr,
        });
    }

    match write_result {
        Ok(()) => {}
        // the tool is allowed to stop reading once it has what it needs
        Err(error) if error.kind() == IoErrorKind::BrokenPipe => {
            debug!(program = %cmd.program, "Tool closed stdin before all input was written");
        }
        Err(error) => return Err(error.into()),
    }

    debug!(
        program = %cmd.program,
        output_bytes = out.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "External tool finished"
    );
    Ok(out)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn command(program: &str, args: &[&str]) -> ToolCommand {
        ToolCommand {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_inputs_written_in_order() {
        let out = run_piped(
            &command("cat", &[]),
            vec![Bytes::from_static(b"first "), Bytes::from_static(b"second")],
        )
        .await
        .unwrap();
        assert_eq!(out, b"first second");
    }

    #[tokio::test]
    async fn test_large_round_trip_does_not_deadlock() {
        // far beyond any pipe buffer in both directions
        let chunk = Bytes::from(vec![7u8; 4 * 1024 * 1024]);
        let out = run_piped(&command("cat", &[]), vec![chunk.clone(), chunk])
            .await
            .unwrap();
        assert_eq!(out.len(), 8 * 1024 * 1024);
        assert!(out.iter().all(|&b| b == 7));
    }

    #[tokio::test]
    async fn test_nonzero_exit_surfaces_stderr() {
        let err = run_piped(
            &command("sh", &["-c", "cat >/dev/null; echo 'bad input' >&2; exit 3"]),
            vec![Bytes::from_static(b"data")],
        )
        .await
        .unwrap_err();

        match err {
            MergeError::ToolFailed { tool, stderr, .. } => {
                assert_eq!(tool, "sh");
                assert_eq!(stderr, "bad input");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_tool_may_stop_reading_early() {
        let chunk = Bytes::from(vec![1u8; 2 * 1024 * 1024]);
        let out = run_piped(&command("sh", &["-c", "echo done"]), vec![chunk])
            .await
            .unwrap();
        assert_eq!(out, b"done\n");
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = run_piped(&command("definitely-not-a-real-tool-4f1c", &[]), vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, MergeError::ToolFailed { ref status, .. } if status == "not found"));
    }
}
