use std::io::{self, BufReader, Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::process::{self, EngineInvocation, Forward};
use super::{
    BUGS_FOUND_FLAG, CancellationToken, Completion, ERROR_FLAG, EngineRun, MISSING_CLASS_FLAG,
};
use crate::failure::Counters;

pub(crate) const WORKER_SUBCOMMAND: &str = "worker";
const CANCEL_GRACE_PERIOD: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Result returned by an isolated worker on its stdout.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WorkResult {
    pub(crate) bug_count: Option<u64>,
    pub(crate) error_count: Option<u64>,
    pub(crate) missing_class_count: Option<u64>,
    pub(crate) exit_code: Option<i32>,
    pub(crate) failed_to_report: bool,
    pub(crate) error: Option<String>,
}

impl WorkResult {
    fn into_engine_run(self) -> EngineRun {
        EngineRun {
            exit_code: self.exit_code,
            counters: Counters {
                bug_count: self.bug_count,
                error_count: self.error_count,
                missing_class_count: self.missing_class_count,
            },
            failed_to_report: self.failed_to_report,
            error_detail: self.error,
        }
    }
}

/// Runs the engine inside the worker process and summarizes it by counters.
pub(crate) fn execute_work_item(
    item: &EngineInvocation,
    cancel: &CancellationToken,
) -> WorkResult {
    match process::run_engine(item, false, Forward::Stderr, cancel) {
        Ok(Completion::Finished(run)) => {
            let counters = run.counters;
            let mut exit_code = run.exit_code.map(|_| exit_bits(&counters));
            let mut error = None;
            // Without -exitcode any non-zero status means the engine itself failed.
            if let Some(status) = run.exit_code.filter(|status| *status != 0) {
                exit_code = Some(exit_bits(&counters) | ERROR_FLAG);
                error = Some(format!(
                    "Verification failed: SpotBugs execution thrown exception: engine exited with status {status}"
                ));
            }
            WorkResult {
                bug_count: counters.bug_count,
                error_count: counters.error_count,
                missing_class_count: counters.missing_class_count,
                exit_code,
                failed_to_report: run.failed_to_report,
                error,
            }
        }
        Ok(Completion::Cancelled) => WorkResult {
            error: Some("SpotBugs execution was cancelled".to_string()),
            ..WorkResult::default()
        },
        Err(err) => WorkResult {
            error: Some(format!(
                "Verification failed: SpotBugs execution thrown exception: {err:#}"
            )),
            ..WorkResult::default()
        },
    }
}

fn exit_bits(counters: &Counters) -> i32 {
    let mut code = 0;
    if counters.bug_count.is_some_and(|count| count > 0) {
        code |= BUGS_FOUND_FLAG;
    }
    if counters.missing_class_count.is_some_and(|count| count > 0) {
        code |= MISSING_CLASS_FLAG;
    }
    if counters.has_errors() {
        code |= ERROR_FLAG;
    }
    code
}

/// Entry point of the hidden worker subcommand.
///
/// Reads one work item line from stdin; closing stdin afterwards cancels the engine.
pub(crate) fn run_worker() -> Result<()> {
    let mut line = String::new();
    io::stdin()
        .read_line(&mut line)
        .context("failed to read the work item")?;
    let item: EngineInvocation =
        serde_json::from_str(&line).context("failed to parse the work item")?;
    debug!("worker received {}", item.unit_name);

    let cancel = CancellationToken::default();
    let watcher = cancel.clone();
    thread::spawn(move || {
        let mut rest = Vec::new();
        if io::stdin().read_to_end(&mut rest).is_ok() {
            watcher.cancel();
        }
    });

    let result = execute_work_item(&item, &cancel);
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, &result).context("failed to write the work result")?;
    writeln!(stdout).context("failed to write the work result")?;
    stdout.flush().context("failed to write the work result")?;
    Ok(())
}

/// Hands `invocation` to a separate worker process running `worker_executable`.
pub(crate) fn submit_isolated(
    worker_executable: &Path,
    invocation: &EngineInvocation,
    cancel: &CancellationToken,
) -> Result<Completion> {
    let mut child = Command::new(worker_executable)
        .arg(WORKER_SUBCOMMAND)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .with_context(|| format!("failed to start worker {}", worker_executable.display()))?;

    let mut stdin = child.stdin.take().context("worker stdin is not piped")?;
    serde_json::to_writer(&mut stdin, invocation).context("failed to send the work item")?;
    writeln!(stdin).context("failed to send the work item")?;
    stdin.flush().context("failed to send the work item")?;
    let mut stdin = Some(stdin);

    let stdout = child.stdout.take().context("worker stdout is not piped")?;
    let reader = thread::spawn(move || -> io::Result<String> {
        let mut output = String::new();
        BufReader::new(stdout).read_to_string(&mut output)?;
        Ok(output)
    });

    let mut cancelled_at: Option<Instant> = None;
    let status = loop {
        if let Some(status) = child.try_wait().context("failed to wait for the worker")? {
            break status;
        }
        if cancel.is_cancelled() {
            let since = *cancelled_at.get_or_insert_with(|| {
                warn!("cancelling SpotBugs worker for {}", invocation.unit_name);
                Instant::now()
            });
            drop(stdin.take());
            if since.elapsed() >= CANCEL_GRACE_PERIOD {
                if let Err(err) = child.kill() {
                    debug!("failed to kill the worker: {err}");
                }
                child.wait().context("failed to reap the cancelled worker")?;
                return Ok(Completion::Cancelled);
            }
        }
        thread::sleep(POLL_INTERVAL);
    };
    if cancelled_at.is_some() {
        return Ok(Completion::Cancelled);
    }

    let output = reader
        .join()
        .map_err(|_| anyhow!("worker output reader panicked"))?
        .context("failed to read the work result")?;
    if !status.success() {
        bail!("worker for {} exited with {status}", invocation.unit_name);
    }
    let line = output.lines().last().unwrap_or_default();
    let result: WorkResult = serde_json::from_str(line)
        .with_context(|| format!("failed to parse the work result of {}", invocation.unit_name))?;
    Ok(Completion::Finished(result.into_engine_run()))
}

/// Runs `invocation` as a no-isolation work item on a dedicated worker thread.
///
/// The work item itself forks the engine JVM, so heap limits are independent of this process.
pub(crate) fn submit_no_isolation(
    invocation: EngineInvocation,
    with_exit_code: bool,
    cancel: &CancellationToken,
) -> Result<Completion> {
    let cancel = cancel.clone();
    let handle = thread::Builder::new()
        .name(format!("spotbugs-worker-{}", invocation.unit_name))
        .spawn(move || process::run_engine(&invocation, with_exit_code, Forward::Stdout, &cancel))
        .context("failed to start the worker thread")?;
    handle
        .join()
        .map_err(|_| anyhow!("worker thread panicked"))?
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use tempfile::tempdir;

    use super::*;
    use crate::launcher::test_support::{fake_engine, recorded_args};

    fn item(script: &Path) -> EngineInvocation {
        EngineInvocation {
            unit_name: "spotbugsTest".to_string(),
            java: PathBuf::from("/bin/sh"),
            jvm_args: vec![script.display().to_string()],
            max_heap_size: Some("512m".to_string()),
            engine_classpath: vec![PathBuf::from("/opt/spotbugs/spotbugs.jar")],
            program_args: vec!["-timestampNow".to_string()],
        }
    }

    #[test]
    fn work_item_runs_without_exit_code_flag() {
        let dir = tempdir().expect("engine dir");
        let script = fake_engine(
            dir.path(),
            &["Warnings generated: 5", "Analysis errors: 0"],
            0,
        );

        let result = execute_work_item(&item(&script), &CancellationToken::default());

        assert!(!recorded_args(dir.path()).contains(&"-exitcode".to_string()));
        assert_eq!(result.bug_count, Some(5));
        assert_eq!(result.error_count, Some(0));
        assert_eq!(result.exit_code, Some(BUGS_FOUND_FLAG));
        assert_eq!(result.error, None);
    }

    #[test]
    fn engine_crash_is_reported_as_error_not_bugs() {
        let dir = tempdir().expect("engine dir");
        let script = fake_engine(
            dir.path(),
            &["Error: Could not find or load main class edu.umd.cs.findbugs.FindBugs2"],
            1,
        );

        let result = execute_work_item(&item(&script), &CancellationToken::default());

        assert_eq!(result.bug_count, None);
        assert_eq!(result.exit_code, Some(ERROR_FLAG));
        assert!(
            result
                .error
                .as_deref()
                .is_some_and(|error| error.contains("exited with status 1"))
        );
        let run = result.into_engine_run();
        assert!(!run.counters.bug_count.is_some_and(|count| count > 0));
        assert!(run.error_detail.is_some());
    }

    #[test]
    fn zero_status_without_counters_is_clean() {
        let dir = tempdir().expect("engine dir");
        let script = fake_engine(dir.path(), &[], 0);

        let result = execute_work_item(&item(&script), &CancellationToken::default());

        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.error, None);
    }

    #[test]
    fn spawn_failure_is_reported_in_result() {
        let mut item = item(Path::new("/nonexistent.sh"));
        item.java = PathBuf::from("/nonexistent/java");

        let result = execute_work_item(&item, &CancellationToken::default());

        assert_eq!(result.exit_code, None);
        assert!(
            result
                .error
                .as_deref()
                .is_some_and(|error| error.starts_with("Verification failed"))
        );
        let run = result.into_engine_run();
        assert!(run.error_detail.is_some());
    }

    #[test]
    fn cancelled_isolated_worker_is_released_by_closing_stdin() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().expect("worker dir");
        let worker = dir.path().join("worker.sh");
        std::fs::write(&worker, "#!/bin/sh\ncat > /dev/null\n").expect("write worker");
        std::fs::set_permissions(&worker, std::fs::Permissions::from_mode(0o755))
            .expect("chmod worker");
        let cancel = CancellationToken::default();
        let trigger = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            trigger.cancel();
        });
        let started = Instant::now();

        let completion =
            submit_isolated(&worker, &item(Path::new("/unused.sh")), &cancel).expect("submit");

        canceller.join().expect("canceller");
        assert!(matches!(completion, Completion::Cancelled));
        assert!(started.elapsed() < CANCEL_GRACE_PERIOD);
    }

    #[test]
    fn work_result_uses_camel_case_keys() {
        let result = WorkResult {
            bug_count: Some(1),
            exit_code: Some(1),
            ..WorkResult::default()
        };

        let json = serde_json::to_value(&result).expect("serialize");

        assert_eq!(json["bugCount"], 1);
        assert_eq!(json["exitCode"], 1);
        assert_eq!(json["failedToReport"], false);
    }

    #[test]
    fn no_isolation_work_item_runs_on_named_thread() {
        let dir = tempdir().expect("engine dir");
        let script = fake_engine(dir.path(), &[], 1);

        let completion = submit_no_isolation(item(&script), true, &CancellationToken::default())
            .expect("submit");

        match completion {
            Completion::Finished(run) => assert_eq!(run.exit_code, Some(1)),
            Completion::Cancelled => panic!("unexpected cancellation"),
        }
        let args = recorded_args(dir.path());
        assert_eq!(args[0], "-Xmx512m");
        assert!(args.contains(&"-exitcode".to_string()));
    }
}
