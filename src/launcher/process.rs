use std::env;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::scanner::OutputScanner;
use super::{CancellationToken, Completion, EngineRun};
use crate::args::{ExecutionPlan, PATH_SEPARATOR};

pub(crate) const ENGINE_MAIN_CLASS: &str = "edu.umd.cs.findbugs.FindBugs2";
const EXIT_CODE_FLAG: &str = "-exitcode";
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// JVM command line of one engine run. Serialized as the isolated worker's work item.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EngineInvocation {
    pub(crate) unit_name: String,
    pub(crate) java: PathBuf,
    pub(crate) jvm_args: Vec<String>,
    pub(crate) max_heap_size: Option<String>,
    pub(crate) engine_classpath: Vec<PathBuf>,
    pub(crate) program_args: Vec<String>,
}

impl EngineInvocation {
    pub(crate) fn from_plan(plan: &ExecutionPlan) -> Result<Self> {
        Ok(Self {
            unit_name: plan.unit_name.clone(),
            java: resolve_java(plan.java_override.as_deref())?,
            jvm_args: plan.jvm_args.clone(),
            max_heap_size: plan.max_heap_size.clone(),
            engine_classpath: plan.engine_classpath.clone(),
            program_args: plan.program_args.clone(),
        })
    }

    fn command(&self, with_exit_code: bool) -> Command {
        let mut command = Command::new(&self.java);
        command.args(&self.jvm_args);
        if let Some(heap) = &self.max_heap_size {
            command.arg(format!("-Xmx{heap}"));
        }
        let classpath = self
            .engine_classpath
            .iter()
            .map(|entry| entry.display().to_string())
            .collect::<Vec<_>>()
            .join(PATH_SEPARATOR);
        command.arg("-classpath").arg(classpath).arg(ENGINE_MAIN_CLASS);
        if with_exit_code {
            command.arg(EXIT_CODE_FLAG);
        }
        command
            .args(&self.program_args)
            .env_remove("CLASSPATH")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }
}

/// Destination of the engine's console lines.
#[derive(Copy, Clone, Debug)]
pub(crate) enum Forward {
    Stdout,
    /// Used by the isolated worker, whose stdout carries the work result.
    Stderr,
}

impl Forward {
    fn write_line(self, line: &str) {
        let result = match self {
            Self::Stdout => writeln!(io::stdout().lock(), "{line}"),
            Self::Stderr => writeln!(io::stderr().lock(), "{line}"),
        };
        if let Err(err) = result {
            debug!("failed to forward engine output: {err}");
        }
    }
}

/// Locates the `java` executable: explicit override, then `JAVA_HOME`, then `PATH`.
pub(crate) fn resolve_java(java_override: Option<&Path>) -> Result<PathBuf> {
    if let Some(java) = java_override {
        return Ok(java.to_path_buf());
    }
    if let Some(home) = env::var_os("JAVA_HOME") {
        let candidate = Path::new(&home).join("bin").join(java_binary_name());
        if candidate.is_file() {
            return Ok(candidate);
        }
        warn!(
            "JAVA_HOME is set but {} does not exist; searching PATH",
            candidate.display()
        );
    }
    which::which("java").context("could not find a java executable; set JAVA_HOME or PATH")
}

fn java_binary_name() -> &'static str {
    if cfg!(windows) { "java.exe" } else { "java" }
}

/// Forks the engine JVM and waits for it, killing it if `cancel` fires.
pub(crate) fn run_engine(
    invocation: &EngineInvocation,
    with_exit_code: bool,
    forward: Forward,
    cancel: &CancellationToken,
) -> Result<Completion> {
    let mut command = invocation.command(with_exit_code);
    debug!("spawning {:?}", command);
    let mut child = command
        .spawn()
        .with_context(|| format!("failed to start {}", invocation.java.display()))?;

    let scanner = Arc::new(OutputScanner::default());
    let stdout = child.stdout.take().context("engine stdout is not piped")?;
    let stderr = child.stderr.take().context("engine stderr is not piped")?;
    let pumps = [
        pump_lines(stdout, Arc::clone(&scanner), forward),
        pump_lines(stderr, Arc::clone(&scanner), Forward::Stderr),
    ];

    let status = loop {
        if let Some(status) = child.try_wait().context("failed to wait for the engine")? {
            break status;
        }
        if cancel.is_cancelled() {
            warn!("cancelling SpotBugs for {}", invocation.unit_name);
            if let Err(err) = child.kill() {
                debug!("failed to kill the engine: {err}");
            }
            child.wait().context("failed to reap the cancelled engine")?;
            return Ok(Completion::Cancelled);
        }
        thread::sleep(POLL_INTERVAL);
    };
    for pump in pumps {
        if pump.join().is_err() {
            warn!("engine output reader panicked for {}", invocation.unit_name);
        }
    }

    debug!("SpotBugs for {} exited with {status}", invocation.unit_name);
    Ok(Completion::Finished(EngineRun {
        exit_code: status.code(),
        counters: scanner.counters(),
        failed_to_report: scanner.failed_to_report(),
        error_detail: None,
    }))
}

fn pump_lines<R: Read + Send + 'static>(
    source: R,
    scanner: Arc<OutputScanner>,
    forward: Forward,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(source);
        let mut buffer = Vec::new();
        loop {
            buffer.clear();
            match reader.read_until(b'\n', &mut buffer) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buffer);
                    let line = line.trim_end_matches(['\r', '\n']);
                    scanner.inspect(line);
                    forward.write_line(line);
                }
                Err(err) => {
                    debug!("stopped reading engine output: {err}");
                    break;
                }
            }
        }
    })
}
