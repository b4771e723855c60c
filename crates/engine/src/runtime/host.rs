//! The Host adapter (spec §4.E): runs the built argv as a child process in
//! the declared working directory and environment, propagating
//! cancellation as SIGTERM followed by SIGKILL after a grace period.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use wfl_types::ExecutionKind;

use super::{CancellationToken, RunResult, RunSpec, RuntimeAdapter};

const TERMINATE_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
pub struct HostAdapter;

#[async_trait]
impl RuntimeAdapter for HostAdapter {
    async fn run(&self, spec: &RunSpec, cancel: CancellationToken) -> Result<RunResult, ExecutionKind> {
        spawn_and_capture(&spec.argv, &spec.work_dir, &spec.env, spec.stdin_path.as_deref(), spec.stdout_path.as_deref(), spec.stderr_path.as_deref(), cancel).await
    }
}

/// Spawns `argv` (already fully built, including any `docker`/`apptainer`
/// wrapping the container adapters add) and runs it to completion,
/// propagating `cancel` as SIGTERM then SIGKILL. Shared by the Host and
/// both container adapters so the process-lifecycle handling lives in one
/// place.
pub(super) async fn spawn_and_capture(
    argv: &[String],
    work_dir: &str,
    env: &indexmap::IndexMap<String, String>,
    stdin_path: Option<&str>,
    stdout_path: Option<&str>,
    stderr_path: Option<&str>,
    mut cancel: CancellationToken,
) -> Result<RunResult, ExecutionKind> {
    let Some(program) = argv.first() else {
        return Err(ExecutionKind::SpawnFailed("empty argv".to_string()));
    };

    let mut command = Command::new(program);
    command.args(&argv[1..]);
    command.current_dir(work_dir);
    command.envs(env.iter());
    command.kill_on_drop(true);
    command.stdin(stdio_for_input(&stdin_path.map(str::to_string))?);

    let capture_stdout = stdout_path.is_none();
    let capture_stderr = stderr_path.is_none();
    command.stdout(stdio_for_output(&stdout_path.map(str::to_string))?);
    command.stderr(stdio_for_output(&stderr_path.map(str::to_string))?);

    let mut child = command.spawn().map_err(|e| ExecutionKind::SpawnFailed(e.to_string()))?;
    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();

    // Draining the pipes must run concurrently with `wait()`, not after it:
    // a tool that writes more than the OS pipe buffer would otherwise block
    // on `write()` forever while we block on `wait()`.
    let run = async {
        let (status, stdout_capture, stderr_capture) = tokio::join!(child.wait(), read_pipe(stdout_pipe), read_pipe(stderr_pipe));
        status.map(|status| (status, stdout_capture, stderr_capture)).map_err(|e| ExecutionKind::SpawnFailed(e.to_string()))
    };

    let (status, stdout_capture, stderr_capture) = tokio::select! {
        result = run => result?,
        _ = cancel.cancelled() => {
            terminate_then_kill(&mut child).await;
            return Err(ExecutionKind::Cancelled);
        }
    };

    Ok(RunResult {
        exit_code: status.code().unwrap_or(-1),
        stdout_capture: if capture_stdout { stdout_capture } else { None },
        stderr_capture: if capture_stderr { stderr_capture } else { None },
    })
}

fn stdio_for_input(path: &Option<String>) -> Result<Stdio, ExecutionKind> {
    match path {
        Some(p) => std::fs::File::open(p).map(Stdio::from).map_err(|e| ExecutionKind::SpawnFailed(e.to_string())),
        None => Ok(Stdio::null()),
    }
}

fn stdio_for_output(path: &Option<String>) -> Result<Stdio, ExecutionKind> {
    match path {
        Some(p) => std::fs::File::create(p).map(Stdio::from).map_err(|e| ExecutionKind::SpawnFailed(e.to_string())),
        None => Ok(Stdio::piped()),
    }
}

async fn read_pipe<R: tokio::io::AsyncRead + Unpin>(pipe: Option<R>) -> Option<String> {
    let mut pipe = pipe?;
    let mut buf = String::new();
    pipe.read_to_string(&mut buf).await.ok()?;
    Some(buf)
}

async fn terminate_then_kill(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
    tokio::select! {
        _ = child.wait() => {}
        _ = tokio::time::sleep(TERMINATE_GRACE_PERIOD) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::cancellation::CancellationSource;

    #[tokio::test]
    async fn runs_a_command_and_captures_stdout() {
        let adapter = HostAdapter;
        let (_source, token) = CancellationSource::new();
        let spec = RunSpec { argv: vec!["echo".into(), "hello".into()], work_dir: ".".into(), ..Default::default() };
        let result = adapter.run(&spec, token).await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout_capture.as_deref(), Some("hello\n"));
    }

    #[tokio::test]
    async fn non_zero_exit_is_reported_not_treated_as_spawn_failure() {
        let adapter = HostAdapter;
        let (_source, token) = CancellationSource::new();
        let spec = RunSpec { argv: vec!["false".into()], work_dir: ".".into(), ..Default::default() };
        let result = adapter.run(&spec, token).await.unwrap();
        assert_eq!(result.exit_code, 1);
    }

    #[tokio::test]
    async fn stdout_larger_than_the_pipe_buffer_does_not_deadlock() {
        let adapter = HostAdapter;
        let (_source, token) = CancellationSource::new();
        // Bigger than the ~64 KiB Linux pipe buffer: if the pipes aren't
        // drained concurrently with `wait()`, the child blocks on `write()`
        // while we block on `wait()` and this test hangs.
        let spec = RunSpec { argv: vec!["sh".into(), "-c".into(), "yes | head -c 200000".into()], work_dir: ".".into(), ..Default::default() };
        let result = tokio::time::timeout(Duration::from_secs(10), adapter.run(&spec, token)).await.expect("run deadlocked").unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout_capture.map(|s| s.len()), Some(200_000));
    }

    #[tokio::test]
    async fn cancellation_terminates_a_running_child() {
        let adapter = HostAdapter;
        let (source, token) = CancellationSource::new();
        let spec = RunSpec { argv: vec!["sleep".into(), "30".into()], work_dir: ".".into(), ..Default::default() };

        source.cancel();
        let err = adapter.run(&spec, token).await.unwrap_err();
        assert!(matches!(err, ExecutionKind::Cancelled));
    }
}
