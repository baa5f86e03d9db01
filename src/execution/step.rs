//! Individual Job Execution
//!
//! Runs one job as an external process:
//! - Stale outputs are removed and output directories created beforehand
//! - The program is spawned directly, without a shell
//! - stdout/stderr go to the declared `stdout`/`log` files
//! - Declared outputs are removed again if the job fails or is terminated

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use log::{debug, error, warn};
use tokio::process::Command;
use tokio::sync::watch;

use crate::dag::staleness::await_outputs;
use crate::dag::TaskDescriptor;
use crate::error::JobFailure;

/// Executes a single job.
///
/// # Arguments
///
/// * `name` - Job display name, used in log messages
/// * `task` - What to run
/// * `latency_wait` - How long to wait for outputs after a clean exit
/// * `shutdown` - Flips to `true` when running jobs must be terminated
///
/// # Returns
///
/// * `Ok(())` - The process exited 0 and every output exists
/// * `Err` - The job failed; its outputs have been removed
pub async fn execute_job(
    name: &str,
    task: &TaskDescriptor,
    latency_wait: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), JobFailure> {
    let result = run_process(name, task, latency_wait, &mut shutdown).await;

    if let Err(e) = &result {
        error!("Job '{}' failed: {}", name, e);
        remove_outputs(&task.outputs);
    }
    result
}

async fn run_process(
    name: &str,
    task: &TaskDescriptor,
    latency_wait: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), JobFailure> {
    prepare_outputs(task)?;

    let mut cmd = Command::new(&task.program);
    cmd.args(&task.args)
        .stdin(Stdio::null())
        .kill_on_drop(true);
    configure_output(&mut cmd, task)?;

    debug!("Job '{}': {}", name, task.command_line());

    let mut child = cmd.spawn().map_err(|source| JobFailure::Spawn {
        program: task.program.clone(),
        source,
    })?;

    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = wait_for_shutdown(shutdown) => None,
    };

    let Some(status) = exited else {
        warn!("Terminating job '{}'", name);
        if let Err(e) = child.kill().await {
            warn!("Failed to kill job '{}': {}", name, e);
        }
        return Err(JobFailure::Terminated);
    };
    let status = status?;

    if !status.success() {
        return Err(JobFailure::ExitStatus(status.code()));
    }

    await_outputs(&task.outputs, latency_wait)
        .await
        .map_err(JobFailure::MissingOutputs)
}

/// Resolves once shutdown is requested. Never resolves if the sender is gone.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Points the child's stdout/stderr at the declared files.
fn configure_output(cmd: &mut Command, task: &TaskDescriptor) -> io::Result<()> {
    let log = task.log.as_deref().map(open_log).transpose()?;

    match (&task.stdout, &log) {
        (Some(path), _) => {
            cmd.stdout(File::create(path)?);
        }
        (None, Some(file)) => {
            cmd.stdout(file.try_clone()?);
        }
        (None, None) => {
            cmd.stdout(Stdio::inherit());
        }
    }

    match log {
        Some(file) => cmd.stderr(file),
        None => cmd.stderr(Stdio::inherit()),
    };
    Ok(())
}

fn open_log(path: &str) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Removes existing outputs and creates the parent directories of every
/// path the job writes.
fn prepare_outputs(task: &TaskDescriptor) -> io::Result<()> {
    remove_outputs(&task.outputs);

    let written = task
        .outputs
        .iter()
        .chain(task.stdout.iter())
        .chain(task.log.iter());
    for path in written {
        ensure_parent_directory(Path::new(path))?;
    }
    Ok(())
}

/// Creates the parent directory of a path.
fn ensure_parent_directory(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            debug!("Created directory: {}", parent.display());
        }
    }
    Ok(())
}

/// Deletes every output that exists, files and directories alike.
pub(crate) fn remove_outputs(outputs: &[String]) {
    for output in outputs {
        let path = Path::new(output);
        let result = match fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
            Ok(_) => fs::remove_file(path),
            Err(_) => continue,
        };
        match result {
            Ok(()) => debug!("Removed output {}", output),
            Err(e) => warn!("Failed to remove output {}: {}", output, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn task(program: &str, args: &[&str], outputs: &[&Path]) -> TaskDescriptor {
        TaskDescriptor {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            inputs: Vec::new(),
            outputs: outputs.iter().map(|p| p.to_str().unwrap().to_string()).collect(),
            stdout: None,
            log: None,
            threads: 1,
        }
    }

    /// A receiver whose sender is already gone: shutdown never arrives.
    fn never() -> watch::Receiver<bool> {
        let (_tx, rx) = watch::channel(false);
        rx
    }

    #[test]
    fn test_ensure_parent_directory() {
        let temp_dir = tempdir().unwrap();
        let nested = temp_dir.path().join("subdir1/subdir2/output.txt");

        assert!(ensure_parent_directory(&nested).is_ok());
        assert!(temp_dir.path().join("subdir1/subdir2").exists());
        assert!(ensure_parent_directory(Path::new("plain.txt")).is_ok());
    }

    #[test]
    fn test_remove_outputs() {
        let temp_dir = tempdir().unwrap();
        let file = temp_dir.path().join("a.txt");
        let dir = temp_dir.path().join("index");
        fs::write(&file, "x").unwrap();
        fs::create_dir_all(dir.join("inner")).unwrap();

        remove_outputs(&[
            file.to_str().unwrap().to_string(),
            dir.to_str().unwrap().to_string(),
            temp_dir.path().join("missing").to_str().unwrap().to_string(),
        ]);
        assert!(!file.exists());
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_execute_job_creates_output() {
        let temp_dir = tempdir().unwrap();
        let output = temp_dir.path().join("nested/out.txt");
        let task = task("touch", &[output.to_str().unwrap()], &[&output]);

        let result = execute_job("touch", &task, Duration::from_secs(1), never()).await;
        assert!(result.is_ok());
        assert!(output.exists());
    }

    #[tokio::test]
    async fn test_stdout_redirect_and_log() {
        let temp_dir = tempdir().unwrap();
        let output = temp_dir.path().join("out/hello.txt");
        let log = temp_dir.path().join("logs/hello.log");

        let mut task = task("sh", &["-c", "echo hello; echo oops >&2"], &[&output]);
        task.stdout = Some(output.to_str().unwrap().to_string());
        task.log = Some(log.to_str().unwrap().to_string());

        execute_job("hello", &task, Duration::from_secs(1), never())
            .await
            .unwrap();
        assert_eq!(fs::read_to_string(&output).unwrap(), "hello\n");
        assert_eq!(fs::read_to_string(&log).unwrap(), "oops\n");
    }

    #[tokio::test]
    async fn test_log_receives_stdout_without_redirect() {
        let temp_dir = tempdir().unwrap();
        let log = temp_dir.path().join("job.log");

        let mut task = task("echo", &["to log"], &[]);
        task.log = Some(log.to_str().unwrap().to_string());

        execute_job("echo", &task, Duration::from_secs(1), never())
            .await
            .unwrap();
        assert_eq!(fs::read_to_string(&log).unwrap(), "to log\n");
    }

    #[tokio::test]
    async fn test_failed_job_removes_outputs() {
        let temp_dir = tempdir().unwrap();
        let output = temp_dir.path().join("partial.txt");
        let script = format!("echo partial > {}; exit 3", output.display());
        let task = task("sh", &["-c", &script], &[&output]);

        match execute_job("fail", &task, Duration::from_secs(1), never()).await {
            Err(JobFailure::ExitStatus(code)) => assert_eq!(code, Some(3)),
            other => panic!("Expected ExitStatus, got {:?}", other),
        }
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_missing_output_after_wait() {
        let temp_dir = tempdir().unwrap();
        let output = temp_dir.path().join("never.txt");
        let task = task("true", &[], &[&output]);

        match execute_job("lazy", &task, Duration::from_millis(200), never()).await {
            Err(JobFailure::MissingOutputs(paths)) => assert_eq!(paths.len(), 1),
            other => panic!("Expected MissingOutputs, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let task = task("definitely-not-a-real-program-rr", &[], &[]);
        assert!(matches!(
            execute_job("ghost", &task, Duration::from_secs(1), never()).await,
            Err(JobFailure::Spawn { .. })
        ));
    }

    #[tokio::test]
    async fn test_shutdown_terminates_job() {
        let temp_dir = tempdir().unwrap();
        let output = temp_dir.path().join("slow.txt");
        let script = format!("echo start > {}; sleep 30", output.display());
        let task = task("sh", &["-c", &script], &[&output]);

        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            let _ = tx.send(true);
        });

        let started = std::time::Instant::now();
        let result = execute_job("slow", &task, Duration::from_secs(1), rx).await;
        assert!(matches!(result, Err(JobFailure::Terminated)));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!output.exists());
    }
}
