mod args;
mod config;
mod discovery;
mod failure;
mod launcher;
mod manifest;
mod reports;
mod runner;
mod telemetry;
mod version;

use std::collections::BTreeSet;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::error;

use crate::args::build_execution_plan;
use crate::config::resolve_effective_config;
use crate::discovery::{CHECK_TASK, discover};
use crate::launcher::{Backend, FeatureFlags, run_worker};
use crate::manifest::{DEFAULT_MANIFEST_PATH, HostProject, load_manifest};
use crate::runner::RunOptions;
use crate::telemetry::{init_logging, with_span};

/// CLI arguments for spotbugs-runner execution.
#[derive(Parser, Debug)]
#[command(
    name = "spotbugs-runner",
    about = "Runs SpotBugs over the compiled classes of a JVM project, one analysis unit per source set or variant.",
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        default_value = DEFAULT_MANIFEST_PATH,
        help = "Build manifest describing the project."
    )]
    manifest: PathBuf,
    #[arg(
        short = 'P',
        global = true,
        value_name = "KEY=VALUE",
        value_parser = parse_property,
        help = "Project property overriding the manifest's [properties]. Repeatable."
    )]
    properties: Vec<(String, String)>,
    #[arg(
        long,
        global = true,
        value_name = "FILTER",
        default_value = "info",
        help = "Log filter used when RUST_LOG is not set."
    )]
    log_level: String,
    #[command(subcommand)]
    command: Option<Command>,
}

/// Subcommands supported by the CLI.
#[derive(Subcommand, Debug)]
enum Command {
    /// Run SpotBugs units; without --unit every unit behind `check` runs.
    Run(RunArgs),
    /// List the analysis units and the tasks they depend on.
    Units,
    /// Print the JVM and engine arguments of a unit without running it.
    Args(ArgsArgs),
    #[command(hide = true)]
    Worker,
}

/// Arguments for running units.
#[derive(Args, Debug, Clone, Default)]
struct RunArgs {
    #[arg(
        long,
        value_name = "NAME[,NAME...]",
        value_delimiter = ',',
        action = clap::ArgAction::Append,
        help = "Units to run. Accepts comma-separated names. Repeatable."
    )]
    unit: Vec<String>,
    #[arg(long, value_name = "N", help = "Number of units run in parallel.")]
    jobs: Option<usize>,
    #[arg(
        long,
        value_name = "SECONDS",
        help = "Cancel running units after this many seconds."
    )]
    timeout_secs: Option<u64>,
}

/// Arguments for printing a unit's command line.
#[derive(Args, Debug, Clone)]
struct ArgsArgs {
    #[arg(long, value_name = "NAME")]
    unit: String,
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    if let Err(err) = init_logging(&cli.log_level) {
        eprintln!("{err:?}");
        return std::process::ExitCode::from(1);
    }
    match run(cli) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:?}");
            std::process::ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let load_project = || -> Result<HostProject> {
        let mut project = load_manifest(&cli.manifest)?;
        project.properties.extend(cli.properties.iter().cloned());
        Ok(project)
    };
    match cli.command.unwrap_or(Command::Run(RunArgs::default())) {
        Command::Run(args) => run_units(&load_project()?, args),
        Command::Units => list_units(&load_project()?),
        Command::Args(args) => print_arguments(&load_project()?, &args.unit),
        Command::Worker => run_worker(),
    }
}

fn parse_property(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{value}'")),
    }
}

fn run_units(project: &HostProject, args: RunArgs) -> Result<()> {
    let options = RunOptions {
        units: selected_units(args.unit),
        jobs: args.jobs,
        timeout: args.timeout_secs.map(Duration::from_secs),
    };
    let summary = runner::run(project, &options)?;
    let failures = summary.failures();
    if failures.is_empty() {
        return Ok(());
    }
    for failure in &failures {
        error!("{} {}: {failure}", failure.unit(), failure.kind());
    }
    let messages: Vec<String> = failures.iter().map(|failure| failure.to_string()).collect();
    anyhow::bail!(
        "{} of {} SpotBugs units failed:\n{}",
        failures.len(),
        summary.results.len(),
        messages.join("\n")
    )
}

fn list_units(project: &HostProject) -> Result<()> {
    let graph = with_span("discovery", "", || discover(project))?;
    let described = graph.describe();
    let mut stdout = io::stdout().lock();
    for (task, depends_on) in &described {
        writeln!(stdout, "{task} -> {}", depends_on.join(", "))?;
    }
    let mut printed = BTreeSet::new();
    for step_name in described
        .iter()
        .filter(|(task, _)| task != CHECK_TASK)
        .flat_map(|(_, depends_on)| depends_on)
    {
        if !printed.insert(step_name) {
            continue;
        }
        if let Some(command) = graph
            .compile_step(step_name)
            .and_then(|step| step.command.as_ref())
        {
            writeln!(stdout, "{step_name} runs: {}", command.join(" "))?;
        }
    }
    Ok(())
}

fn print_arguments(project: &HostProject, unit_name: &str) -> Result<()> {
    let graph = with_span("discovery", unit_name, || discover(project))?;
    let units = graph.realize(&[unit_name.to_string()])?;
    let unit = units
        .first()
        .with_context(|| format!("unit {unit_name} was not realized"))?;
    let config = with_span("config", unit_name, || {
        resolve_effective_config(project, unit_name)
    })?;
    let backend = Backend::select(FeatureFlags::from_project(project)?);
    let plan = with_span("arguments", unit_name, || {
        build_execution_plan(&config, unit, &project.build_dir, backend)
    })?;
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "backend: {backend:?}")?;
    writeln!(stdout, "jvm args:")?;
    for arg in &plan.jvm_args {
        writeln!(stdout, "  {arg}")?;
    }
    if let Some(heap) = &plan.max_heap_size {
        writeln!(stdout, "  -Xmx{heap}")?;
    }
    writeln!(stdout, "program args:")?;
    for arg in &plan.program_args {
        writeln!(stdout, "  {arg}")?;
    }
    Ok(())
}

/// Selected unit names in first-seen order, without blanks or repeats.
fn selected_units(names: Vec<String>) -> Vec<String> {
    let mut units: Vec<String> = Vec::new();
    for name in names {
        let name = name.trim();
        if !name.is_empty() && !units.iter().any(|unit| unit == name) {
            units.push(name.to_string());
        }
    }
    units
}
