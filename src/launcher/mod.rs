//! Execution backends for the engine and interpretation of their results.

mod process;
mod scanner;
mod worker;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::args::ExecutionPlan;
use crate::failure::{Counters, Failure, report_hint};
use crate::manifest::HostProject;

use process::EngineInvocation;
pub(crate) use worker::run_worker;

pub(crate) const WORKER_API_PROPERTY: &str = "com.github.spotbugs.snom.worker";
pub(crate) const HYBRID_WORKER_PROPERTY: &str = "com.github.spotbugs.snom.javaexec-in-worker";

/// Exit code bits of the engine when run with `-exitcode`.
pub(crate) const BUGS_FOUND_FLAG: i32 = 1;
pub(crate) const MISSING_CLASS_FLAG: i32 = 2;
pub(crate) const ERROR_FLAG: i32 = 4;

/// Strategy used to run the engine.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub(crate) enum Backend {
    InProcessChildJvm,
    IsolatedWorker,
    HybridWorker,
}

/// Host feature flags that pick the backend.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct FeatureFlags {
    pub(crate) worker_api: bool,
    pub(crate) hybrid_worker: bool,
}

impl FeatureFlags {
    pub(crate) fn from_project(project: &HostProject) -> Result<Self> {
        Ok(Self {
            worker_api: bool_property(project, WORKER_API_PROPERTY)?,
            hybrid_worker: bool_property(project, HYBRID_WORKER_PROPERTY)?,
        })
    }
}

fn bool_property(project: &HostProject, name: &str) -> Result<bool> {
    match project.property(name).map(str::trim) {
        None => Ok(true),
        Some(value) if value.eq_ignore_ascii_case("true") => Ok(true),
        Some(value) if value.eq_ignore_ascii_case("false") => Ok(false),
        Some(value) => bail!("property {name} must be true or false, got '{value}'"),
    }
}

impl Backend {
    pub(crate) fn select(flags: FeatureFlags) -> Self {
        match (flags.worker_api, flags.hybrid_worker) {
            (false, _) => Self::InProcessChildJvm,
            (true, true) => Self::HybridWorker,
            (true, false) => Self::IsolatedWorker,
        }
    }

    /// Process backends ask the engine for a bitmask exit code.
    fn uses_exit_code(self) -> bool {
        !matches!(self, Self::IsolatedWorker)
    }
}

/// Shared flag that asks running engines to stop.
#[derive(Clone, Debug, Default)]
pub(crate) struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub(crate) fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Raw result of one engine execution, before interpretation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct EngineRun {
    pub(crate) exit_code: Option<i32>,
    pub(crate) counters: Counters,
    pub(crate) failed_to_report: bool,
    pub(crate) error_detail: Option<String>,
}

pub(crate) enum Completion {
    Finished(EngineRun),
    Cancelled,
}

/// Successful result of a unit.
#[derive(Debug)]
pub(crate) enum Outcome {
    Success,
    /// The unit did not fail the build, but the engine reported a problem.
    Tolerated(Failure),
}

/// Runs execution plans on the backend each plan selects.
pub(crate) struct Launcher {
    worker_executable: PathBuf,
}

impl Launcher {
    /// Launcher whose isolated workers are copies of the running executable.
    pub(crate) fn new() -> Result<Self> {
        let worker_executable =
            std::env::current_exe().context("failed to locate the worker executable")?;
        Ok(Self { worker_executable })
    }

    pub(crate) fn launch(
        &self,
        plan: &ExecutionPlan,
        cancel: &CancellationToken,
    ) -> Result<Outcome, Failure> {
        let setup = |source: anyhow::Error| Failure::Setup {
            unit: plan.unit_name.clone(),
            source,
        };
        let invocation = EngineInvocation::from_plan(plan).map_err(setup)?;
        info!(
            "running SpotBugs for {} with {:?}",
            plan.unit_name, plan.backend
        );
        debug!("side files of {}: {:?}", plan.unit_name, plan.side_file_paths());
        let completion = match plan.backend {
            Backend::InProcessChildJvm => process::run_engine(
                &invocation,
                plan.backend.uses_exit_code(),
                process::Forward::Stdout,
                cancel,
            ),
            Backend::HybridWorker => {
                worker::submit_no_isolation(invocation, plan.backend.uses_exit_code(), cancel)
            }
            Backend::IsolatedWorker => {
                worker::submit_isolated(&self.worker_executable, &invocation, cancel)
            }
        }
        .map_err(setup)?;
        match completion {
            Completion::Finished(run) => interpret(plan, run),
            Completion::Cancelled => Err(Failure::Cancelled {
                unit: plan.unit_name.clone(),
            }),
        }
    }
}

/// Maps a raw engine run to the outcome of the unit.
pub(crate) fn interpret(plan: &ExecutionPlan, run: EngineRun) -> Result<Outcome, Failure> {
    let unit = plan.unit_name.clone();
    let reports = plan.enabled_reports.clone();
    if run.failed_to_report {
        return Err(Failure::HtmlReportGenerationFailed { unit, reports });
    }

    let failure = match run.exit_code {
        Some(raw) => {
            let exit_code = mask_missing_classes(raw);
            if exit_code == 0 {
                if raw != exit_code {
                    debug!(
                        "MISSING_CLASS_FLAG ({MISSING_CLASS_FLAG}) was set to the exit code, but ignore it to keep the task result stable."
                    );
                    return Ok(Outcome::Tolerated(Failure::MissingClassesOnly {
                        unit,
                        exit_code: raw,
                    }));
                }
                return Ok(Outcome::Success);
            }
            if exit_code & ERROR_FLAG != 0 || run.counters.has_errors() || run.error_detail.is_some()
            {
                Failure::AnalysisErrored {
                    unit,
                    exit_code: Some(exit_code),
                    counters: run.counters,
                    detail: run.error_detail,
                    reports,
                }
            } else {
                Failure::AnalysisFailedWithBugs {
                    unit,
                    exit_code: Some(exit_code),
                    counters: run.counters,
                    reports,
                }
            }
        }
        None => Failure::AnalysisErrored {
            unit,
            exit_code: None,
            counters: run.counters,
            detail: run.error_detail,
            reports,
        },
    };

    if plan.ignore_failures && failure.is_ignorable() {
        warn!(
            "SpotBugs ended with exit code {} in {}; ignoring the failure.{}",
            exit_code_label(&failure),
            plan.unit_name,
            report_hint(&plan.enabled_reports)
        );
        if plan.show_stack_traces {
            warn!("{failure:?}");
        }
        return Ok(Outcome::Tolerated(failure));
    }
    Err(failure)
}

fn mask_missing_classes(exit_code: i32) -> i32 {
    exit_code & !MISSING_CLASS_FLAG
}

fn exit_code_label(failure: &Failure) -> String {
    match failure {
        Failure::AnalysisFailedWithBugs {
            exit_code: Some(code),
            ..
        }
        | Failure::AnalysisErrored {
            exit_code: Some(code),
            ..
        } => code.to_string(),
        _ => "<none>".to_string(),
    }
}
