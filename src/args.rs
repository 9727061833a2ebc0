use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempPath;
use tracing::{debug, warn};

use crate::config::EffectiveConfig;
use crate::discovery::AnalysisUnit;
use crate::launcher::Backend;
use crate::reports::{ReportKind, ReportSpec, TextResource};
use crate::version::supports_multiple_reports;

#[cfg(windows)]
pub(crate) const PATH_SEPARATOR: &str = ";";
#[cfg(not(windows))]
pub(crate) const PATH_SEPARATOR: &str = ":";

const SIDE_FILE_DIR: &str = "spotbugs";

/// Ephemeral file handed to the engine; removed when dropped.
#[derive(Debug)]
pub(crate) enum SideFile {
    Temporary(TempPath),
    Deterministic(PathBuf),
}

impl SideFile {
    pub(crate) fn path(&self) -> &Path {
        match self {
            Self::Temporary(path) => &**path,
            Self::Deterministic(path) => path.as_path(),
        }
    }
}

impl Drop for SideFile {
    fn drop(&mut self) {
        if let Self::Deterministic(path) = self {
            match fs::remove_file(path.as_path()) {
                Ok(()) => debug!("removed side file {}", path.display()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => warn!("failed to remove side file {}: {err}", path.display()),
            }
        }
    }
}

/// Everything a backend needs to run the engine for one unit.
#[derive(Debug)]
pub(crate) struct ExecutionPlan {
    pub(crate) unit_name: String,
    pub(crate) backend: Backend,
    pub(crate) java_override: Option<PathBuf>,
    pub(crate) jvm_args: Vec<String>,
    pub(crate) max_heap_size: Option<String>,
    pub(crate) engine_classpath: Vec<PathBuf>,
    pub(crate) program_args: Vec<String>,
    /// `file:` URIs of the enabled reports.
    pub(crate) enabled_reports: Vec<String>,
    pub(crate) ignore_failures: bool,
    pub(crate) show_stack_traces: bool,
    side_files: Vec<SideFile>,
}

impl ExecutionPlan {
    pub(crate) fn side_file_paths(&self) -> Vec<&Path> {
        self.side_files.iter().map(SideFile::path).collect()
    }
}

/// Builds the engine invocation of `unit` from its resolved configuration.
///
/// Side files are written under `<build_dir>/spotbugs` and live as long as the plan.
pub(crate) fn build_execution_plan(
    config: &EffectiveConfig,
    unit: &AnalysisUnit,
    build_dir: &Path,
    backend: Backend,
) -> Result<ExecutionPlan> {
    let side_dir = build_dir.join(SIDE_FILE_DIR);
    let unit_name = unit.name.as_str();
    let mut side_files = Vec::new();
    let mut args: Vec<String> = Vec::new();

    if !unit.engine.plugins.is_empty() {
        args.push("-pluginList".to_string());
        args.push(join_paths(&unit.engine.plugins));
    }
    args.push("-timestampNow".to_string());
    if !unit.aux_classpath.is_empty() {
        if config.use_auxclasspath_file {
            let file = write_aux_classpath_file(&side_dir, unit_name, &unit.aux_classpath)?;
            args.push("-auxclasspathFromFile".to_string());
            args.push(file.path().display().to_string());
            side_files.push(file);
        } else {
            args.push("-auxclasspath".to_string());
            args.push(join_paths(&unit.aux_classpath));
        }
    }
    if !unit.source_roots.is_empty() {
        args.push("-sourcepath".to_string());
        args.push(join_paths(&unit.source_roots));
    }
    if config.show_progress {
        args.push("-progress".to_string());
    }

    let enabled = config.reports.all_enabled();
    for report in &enabled {
        create_parent_dir(&report.output_location)?;
    }
    if supports_multiple_reports(config.tool_version.as_deref())? {
        for report in &enabled {
            let stylesheet = stylesheet_path(report, &side_dir, unit_name, &mut side_files)?;
            args.push(format!(
                "{}={}",
                report.to_command_line_option(stylesheet.as_deref()),
                report.output_location.display()
            ));
        }
    } else if let Some(report) = config.reports.first_enabled() {
        let stylesheet = stylesheet_path(report, &side_dir, unit_name, &mut side_files)?;
        args.push(report.to_command_line_option(stylesheet.as_deref()));
        args.push("-outputFile".to_string());
        args.push(report.output_location.display().to_string());
    }

    if let Some(effort) = config.effort {
        args.push(format!("-effort:{}", effort.as_str()));
    }
    if let Some(option) = config.report_level.and_then(|level| level.command_line_option()) {
        args.push(option.to_string());
    }
    if !config.visitors.is_empty() {
        args.push("-visitors".to_string());
        args.push(config.visitors.join(","));
    }
    if !config.omit_visitors.is_empty() {
        args.push("-omitVisitors".to_string());
        args.push(config.omit_visitors.join(","));
    }
    for (flag, path) in [
        ("-include", &config.include_filter),
        ("-exclude", &config.exclude_filter),
        ("-excludeBugs", &config.baseline_file),
    ] {
        if let Some(path) = path {
            args.push(flag.to_string());
            args.push(path.display().to_string());
        }
    }
    if !config.only_analyze.is_empty() {
        args.push("-onlyAnalyze".to_string());
        args.push(config.only_analyze.join(","));
    }
    args.push("-projectName".to_string());
    args.push(config.project_name.clone());
    args.push("-release".to_string());
    args.push(config.release.clone());

    let class_list = write_class_list(&side_dir, unit_name, &unit.class_roots)?;
    args.push("-analyzeFromFile".to_string());
    args.push(class_list.path().display().to_string());
    side_files.push(class_list);

    args.extend(config.extra_args.iter().cloned());
    debug!("built {} program arguments for {unit_name}", args.len());

    Ok(ExecutionPlan {
        unit_name: unit_name.to_string(),
        backend,
        java_override: if config.use_java_toolchains {
            unit.engine.java.clone()
        } else {
            None
        },
        jvm_args: config.jvm_args.clone(),
        max_heap_size: config.max_heap_size.clone(),
        engine_classpath: unit.engine.classpath_paths(),
        program_args: args,
        enabled_reports: config.reports.enabled_uris(),
        ignore_failures: config.ignore_failures,
        show_stack_traces: config.show_stack_traces,
        side_files,
    })
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(PATH_SEPARATOR)
}

fn create_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create report directory {}", parent.display()))?;
    }
    Ok(())
}

fn stylesheet_path(
    report: &ReportSpec,
    side_dir: &Path,
    unit_name: &str,
    side_files: &mut Vec<SideFile>,
) -> Result<Option<PathBuf>> {
    if report.kind != ReportKind::Html {
        return Ok(None);
    }
    match &report.stylesheet {
        None => Ok(None),
        Some(TextResource::File(path)) => Ok(Some(path.clone())),
        Some(resource @ TextResource::ArchiveEntry { entry, .. }) => {
            let file_name = Path::new(entry)
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("stylesheet.xsl"));
            let target = side_dir.join("stylesheet").join(unit_name).join(file_name);
            let written = resource.materialize(&target)?;
            side_files.push(SideFile::Deterministic(written.clone()));
            Ok(Some(written))
        }
    }
}

fn write_aux_classpath_file(
    side_dir: &Path,
    unit_name: &str,
    aux_classpath: &[PathBuf],
) -> Result<SideFile> {
    let dir = side_dir.join("auxclasspath");
    fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(unit_name);
    let mut content = String::new();
    for entry in aux_classpath {
        content.push_str(utf8_path(entry)?);
        content.push('\n');
    }
    fs::write(&path, content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(SideFile::Deterministic(path))
}

fn write_class_list(side_dir: &Path, unit_name: &str, class_roots: &[PathBuf]) -> Result<SideFile> {
    fs::create_dir_all(side_dir)
        .with_context(|| format!("failed to create {}", side_dir.display()))?;
    let mut file = tempfile::Builder::new()
        .prefix(&format!("{unit_name}-analyse-class-file"))
        .suffix(".txt")
        .tempfile_in(side_dir)
        .with_context(|| format!("failed to create class list in {}", side_dir.display()))?;
    for root in class_roots.iter().filter(|root| root.exists()) {
        writeln!(file, "{}", utf8_path(root)?).context("failed to write class list")?;
    }
    file.flush().context("failed to write class list")?;
    Ok(SideFile::Temporary(file.into_temp_path()))
}

/// Side files are UTF-8; lossy conversion would point the engine at the wrong path.
fn utf8_path(path: &Path) -> Result<&str> {
    path.to_str()
        .with_context(|| format!("{} is not valid UTF-8", path.display()))
}
