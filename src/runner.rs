use std::collections::BTreeMap;
use std::process::Command;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use rayon::prelude::*;
use tracing::{debug, error, info, warn};

use crate::args::build_execution_plan;
use crate::config::resolve_effective_config;
use crate::discovery::{AnalysisUnit, discover};
use crate::failure::Failure;
use crate::launcher::{Backend, CancellationToken, FeatureFlags, Launcher, Outcome};
use crate::manifest::{CompileStep, HostProject};
use crate::telemetry::with_span;

/// Options of the `run` subcommand.
#[derive(Clone, Debug, Default)]
pub(crate) struct RunOptions {
    pub(crate) units: Vec<String>,
    pub(crate) jobs: Option<usize>,
    pub(crate) timeout: Option<Duration>,
}

/// Result of every unit of one run, in graph order.
#[derive(Debug)]
pub(crate) struct RunSummary {
    pub(crate) results: Vec<(String, Result<Outcome, Failure>)>,
}

impl RunSummary {
    pub(crate) fn failures(&self) -> Vec<&Failure> {
        self.results
            .iter()
            .filter_map(|(_, result)| result.as_ref().err())
            .collect()
    }
}

/// Runs the selected units after their compile steps.
pub(crate) fn run(project: &HostProject, options: &RunOptions) -> Result<RunSummary> {
    let graph = with_span("discovery", "", || discover(project))?;
    let units = graph.realize(&options.units)?;
    if units.is_empty() {
        warn!("no SpotBugs units were registered for {}", project.name);
        return Ok(RunSummary {
            results: Vec::new(),
        });
    }

    let compile_failures = run_compile_steps(project, &units);
    let backend = Backend::select(FeatureFlags::from_project(project)?);
    let launcher = Launcher::new()?;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.jobs.unwrap_or(0))
        .build()
        .context("failed to build the unit thread pool")?;

    let cancel = CancellationToken::default();
    let watchdog = options
        .timeout
        .map(|timeout| spawn_watchdog(timeout, cancel.clone()))
        .transpose()?;

    let results = pool.install(|| {
        units
            .par_iter()
            .map(|unit| {
                let result = match compile_failures.get(&unit.compile_step.name) {
                    Some(reason) => Err(Failure::Setup {
                        unit: unit.name.clone(),
                        source: anyhow!("{reason}"),
                    }),
                    None => run_unit(project, unit, backend, &launcher, &cancel),
                };
                (unit.name.clone(), result)
            })
            .collect::<Vec<_>>()
    });

    if let Some((stop, handle)) = watchdog {
        drop(stop);
        if handle.join().is_err() {
            warn!("timeout watchdog panicked");
        }
    }
    for (unit, result) in &results {
        match result {
            Ok(Outcome::Success) => info!("{unit} completed"),
            Ok(Outcome::Tolerated(failure)) => debug!("{unit} completed despite: {failure}"),
            Err(failure) => error!("{unit} failed: {failure}"),
        }
    }
    Ok(RunSummary { results })
}

fn run_unit(
    project: &HostProject,
    unit: &AnalysisUnit,
    backend: Backend,
    launcher: &Launcher,
    cancel: &CancellationToken,
) -> Result<Outcome, Failure> {
    if cancel.is_cancelled() {
        return Err(Failure::Cancelled {
            unit: unit.name.clone(),
        });
    }
    debug!("running {} over group {}", unit.name, unit.group);
    let config = with_span("config", &unit.name, || {
        resolve_effective_config(project, &unit.name)
    })?;
    let plan = with_span("arguments", &unit.name, || {
        build_execution_plan(&config, unit, &project.build_dir, backend)
    })
    .map_err(|source| Failure::Setup {
        unit: unit.name.clone(),
        source,
    })?;
    with_span("launch", &unit.name, || launcher.launch(&plan, cancel))
}

/// Runs each distinct compile step once; returns the failed steps with their reason.
fn run_compile_steps(project: &HostProject, units: &[AnalysisUnit]) -> BTreeMap<String, String> {
    let mut seen = BTreeMap::new();
    for unit in units {
        seen.entry(unit.compile_step.name.clone())
            .or_insert_with(|| unit.compile_step.clone());
    }
    let mut failures = BTreeMap::new();
    for step in seen.values() {
        if let Err(err) = with_span("compile", &step.name, || run_compile_step(project, step)) {
            error!("{err:#}");
            failures.insert(step.name.clone(), format!("{err:#}"));
        }
    }
    failures
}

fn run_compile_step(project: &HostProject, step: &CompileStep) -> Result<()> {
    let Some(command) = &step.command else {
        debug!("{} is up to date", step.name);
        return Ok(());
    };
    let Some((program, args)) = command.split_first() else {
        bail!("compile step {} has an empty command", step.name);
    };
    info!("running compile step {}", step.name);
    let status = Command::new(program)
        .args(args)
        .current_dir(&project.project_dir)
        .status()
        .with_context(|| format!("failed to start compile step {}", step.name))?;
    if !status.success() {
        bail!("compile step {} failed with {status}", step.name);
    }
    Ok(())
}

/// Cancels `cancel` unless the returned sender is dropped before `timeout`.
fn spawn_watchdog(
    timeout: Duration,
    cancel: CancellationToken,
) -> Result<(mpsc::Sender<()>, thread::JoinHandle<()>)> {
    let (stop, stopped) = mpsc::channel::<()>();
    let handle = thread::Builder::new()
        .name("spotbugs-timeout".to_string())
        .spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = stopped.recv_timeout(timeout) {
                warn!("timed out after {}s; cancelling SpotBugs", timeout.as_secs());
                cancel.cancel();
            }
        })
        .context("failed to start the timeout watchdog")?;
    Ok((stop, handle))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::{TempDir, tempdir};

    use super::*;
    use crate::launcher::test_support::fake_engine;
    use crate::manifest::parse_manifest;

    fn project(
        dir: &TempDir,
        script_output: &[&str],
        exit_code: i32,
        extra: &str,
    ) -> HostProject {
        let script = fake_engine(dir.path(), script_output, exit_code);
        let manifest = format!(
            r#"
[project]
name = "sample"
version = "1.0"

[properties]
"com.github.spotbugs.snom.worker" = "false"

[engine]
java = "/bin/sh"
classpath = ["libs/spotbugs-4.8.6.jar"]

[[sourceSets]]
name = "main"
outputDirs = ["build/classes/java/main"]
classesTask = {{ command = ["mkdir", "-p", "build/classes/java/main"] }}

[[sourceSets]]
name = "test"
outputDirs = ["build/classes/java/test"]
classesTask = {{ command = ["false"] }}

[spotbugs]
jvmArgs = ["{}"]
{extra}
"#,
            script.display()
        );
        parse_manifest(&manifest, dir.path()).expect("parse manifest")
    }

    #[test]
    fn compile_step_runs_before_unit_and_failures_are_isolated() {
        let dir = tempdir().expect("project dir");
        let project = project(&dir, &[], 0, "");

        let summary = run(&project, &RunOptions::default()).expect("run");

        assert_eq!(summary.results.len(), 2);
        assert_eq!(summary.results[0].0, "spotbugsMain");
        assert!(matches!(summary.results[0].1, Ok(Outcome::Success)));
        assert!(dir.path().join("build/classes/java/main").is_dir());
        let failures = summary.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].unit(), "spotbugsTest");
        assert_eq!(failures[0].kind(), "Setup");
    }

    #[test]
    fn selected_unit_runs_alone() {
        let dir = tempdir().expect("project dir");
        let project = project(&dir, &[], 1, "ignoreFailures = true");
        let options = RunOptions {
            units: vec!["spotbugsMain".to_string()],
            jobs: Some(1),
            timeout: None,
        };

        let summary = run(&project, &options).expect("run");

        assert_eq!(summary.results.len(), 1);
        assert!(matches!(
            summary.results[0].1,
            Ok(Outcome::Tolerated(Failure::AnalysisFailedWithBugs { .. }))
        ));
    }

    #[test]
    fn side_files_are_removed_after_run() {
        let dir = tempdir().expect("project dir");
        let project = project(&dir, &[], 0, "");
        let options = RunOptions {
            units: vec!["spotbugsMain".to_string()],
            ..RunOptions::default()
        };

        run(&project, &options).expect("run");

        let side_dir = dir.path().join("build/spotbugs");
        let leftovers: Vec<_> = fs::read_dir(&side_dir)
            .expect("side dir")
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_file())
            .collect();
        assert!(leftovers.is_empty(), "unexpected side files: {leftovers:?}");
    }

    #[test]
    fn timeout_cancels_running_units() {
        let dir = tempdir().expect("project dir");
        let project = project(&dir, &[], 0, "");
        let slow = dir.path().join("fake-java.sh");
        fs::write(&slow, "#!/bin/sh\nexec sleep 30\n").expect("rewrite script");
        let options = RunOptions {
            units: vec!["spotbugsMain".to_string()],
            jobs: Some(1),
            timeout: Some(Duration::from_millis(300)),
        };

        let summary = run(&project, &options).expect("run");

        let failures = summary.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind(), "Cancelled");
        let leftovers = fs::read_dir(dir.path().join("build/spotbugs"))
            .expect("side dir")
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_file())
            .count();
        assert_eq!(leftovers, 0);
    }
}
