use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::failure::Failure;
use crate::manifest::HostProject;
use crate::reports::{ReportKind, ReportSpec, Reports, TextResource};

const DEFAULT_REPORTS_DIR_NAME: &str = "spotbugs";

/// Analysis effort passed as `-effort:<value>`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Effort {
    Min,
    Less,
    Default,
    More,
    Max,
}

impl Effort {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Min => "min",
            Self::Less => "less",
            Self::Default => "default",
            Self::More => "more",
            Self::Max => "max",
        }
    }
}

/// Lowest priority of the bugs to report.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Confidence {
    Low,
    Medium,
    Default,
    High,
}

impl Confidence {
    /// `medium` is the engine default, so it has no flag of its own.
    pub(crate) fn command_line_option(self) -> Option<&'static str> {
        match self {
            Self::Low => Some("-low"),
            Self::High => Some("-high"),
            Self::Medium | Self::Default => None,
        }
    }
}

/// One layer of configuration; `None` means the property is unset in this layer.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct PropertyLayer {
    pub(crate) ignore_failures: Option<bool>,
    pub(crate) show_stack_traces: Option<bool>,
    pub(crate) show_progress: Option<bool>,
    pub(crate) effort: Option<Effort>,
    pub(crate) report_level: Option<Confidence>,
    pub(crate) visitors: Option<Vec<String>>,
    pub(crate) omit_visitors: Option<Vec<String>>,
    pub(crate) only_analyze: Option<Vec<String>>,
    pub(crate) include_filter: Option<PathBuf>,
    pub(crate) exclude_filter: Option<PathBuf>,
    pub(crate) baseline_file: Option<PathBuf>,
    pub(crate) project_name: Option<String>,
    pub(crate) release: Option<String>,
    pub(crate) jvm_args: Option<Vec<String>>,
    pub(crate) extra_args: Option<Vec<String>>,
    pub(crate) max_heap_size: Option<String>,
    pub(crate) reports_dir: Option<PathBuf>,
    pub(crate) use_auxclasspath_file: Option<bool>,
    pub(crate) use_java_toolchains: Option<bool>,
    pub(crate) tool_version: Option<String>,
    #[serde(default)]
    pub(crate) reports: BTreeMap<String, ReportLayer>,
}

/// Report settings of one layer, keyed by report name in [`PropertyLayer::reports`].
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ReportLayer {
    pub(crate) enabled: Option<bool>,
    pub(crate) output_location: Option<PathBuf>,
    /// Path of a stylesheet inside the engine jar.
    pub(crate) stylesheet: Option<String>,
    pub(crate) stylesheet_file: Option<PathBuf>,
}

/// Frozen configuration of one analysis unit.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct EffectiveConfig {
    pub(crate) unit_name: String,
    pub(crate) ignore_failures: bool,
    pub(crate) show_stack_traces: bool,
    pub(crate) show_progress: bool,
    pub(crate) effort: Option<Effort>,
    pub(crate) report_level: Option<Confidence>,
    pub(crate) visitors: Vec<String>,
    pub(crate) omit_visitors: Vec<String>,
    pub(crate) only_analyze: Vec<String>,
    pub(crate) include_filter: Option<PathBuf>,
    pub(crate) exclude_filter: Option<PathBuf>,
    pub(crate) baseline_file: Option<PathBuf>,
    pub(crate) project_name: String,
    pub(crate) release: String,
    pub(crate) jvm_args: Vec<String>,
    pub(crate) extra_args: Vec<String>,
    pub(crate) max_heap_size: Option<String>,
    pub(crate) reports_dir: PathBuf,
    pub(crate) reports: Reports,
    pub(crate) use_auxclasspath_file: bool,
    pub(crate) use_java_toolchains: bool,
    pub(crate) tool_version: Option<String>,
}

/// Layers consulted for one unit, lowest precedence first.
pub(crate) struct ConfigResolver<'a> {
    project: &'a HostProject,
    defaults: PropertyLayer,
    global: &'a PropertyLayer,
    per_unit: Option<&'a PropertyLayer>,
}

impl<'a> ConfigResolver<'a> {
    pub(crate) fn new(project: &'a HostProject, unit_name: &str) -> Self {
        Self {
            project,
            defaults: tool_defaults(project),
            global: &project.extension,
            per_unit: project.task_overrides.get(unit_name),
        }
    }

    /// Topmost layer first.
    fn layers(&self) -> impl Iterator<Item = &PropertyLayer> + '_ {
        self.per_unit
            .into_iter()
            .chain(std::iter::once(self.global))
            .chain(std::iter::once(&self.defaults))
    }

    fn pick<T: Clone>(&self, get: impl Fn(&PropertyLayer) -> Option<&T>) -> Option<T> {
        self.layers().find_map(|layer| get(layer).cloned())
    }

    fn pick_path(&self, get: impl Fn(&PropertyLayer) -> Option<&PathBuf>) -> Option<PathBuf> {
        self.pick(get).map(|path| self.project.resolve_path(&path))
    }

    pub(crate) fn resolve(&self, unit_name: &str) -> Result<EffectiveConfig, Failure> {
        let visitors = self.pick(|l| l.visitors.as_ref()).unwrap_or_default();
        let omit_visitors = self.pick(|l| l.omit_visitors.as_ref()).unwrap_or_default();
        if !visitors.is_empty() && !omit_visitors.is_empty() {
            return Err(Failure::configuration(
                unit_name,
                "visitors and omitVisitors cannot be used together",
            ));
        }

        let release = self.pick(|l| l.release.as_ref()).ok_or_else(|| {
            Failure::configuration(
                unit_name,
                "release is not set and the project has no version",
            )
        })?;

        let project_name = match self.per_unit.and_then(|layer| layer.project_name.clone()) {
            Some(name) => name,
            None => {
                let base = self
                    .pick(|l| l.project_name.as_ref())
                    .unwrap_or_else(|| self.project.name.clone());
                format!("{base} ({unit_name})")
            }
        };

        let reports_dir = self
            .pick_path(|l| l.reports_dir.as_ref())
            .unwrap_or_else(|| self.project.reporting_base_dir.join(DEFAULT_REPORTS_DIR_NAME));
        let reports = self.resolve_reports(unit_name, &reports_dir)?;

        Ok(EffectiveConfig {
            unit_name: unit_name.to_string(),
            ignore_failures: self.pick(|l| l.ignore_failures.as_ref()).unwrap_or(false),
            show_stack_traces: self.pick(|l| l.show_stack_traces.as_ref()).unwrap_or(false),
            show_progress: self.pick(|l| l.show_progress.as_ref()).unwrap_or(false),
            effort: self.pick(|l| l.effort.as_ref()),
            report_level: self.pick(|l| l.report_level.as_ref()),
            visitors,
            omit_visitors,
            only_analyze: self.pick(|l| l.only_analyze.as_ref()).unwrap_or_default(),
            include_filter: self.pick_path(|l| l.include_filter.as_ref()),
            exclude_filter: self.pick_path(|l| l.exclude_filter.as_ref()),
            baseline_file: self.pick_path(|l| l.baseline_file.as_ref()),
            project_name,
            release,
            jvm_args: self.pick(|l| l.jvm_args.as_ref()).unwrap_or_default(),
            extra_args: self.pick(|l| l.extra_args.as_ref()).unwrap_or_default(),
            max_heap_size: self.pick(|l| l.max_heap_size.as_ref()),
            reports_dir,
            reports,
            use_auxclasspath_file: self
                .pick(|l| l.use_auxclasspath_file.as_ref())
                .unwrap_or(true),
            use_java_toolchains: self
                .pick(|l| l.use_java_toolchains.as_ref())
                .unwrap_or(true),
            tool_version: self.pick(|l| l.tool_version.as_ref()),
        })
    }

    fn resolve_reports(&self, unit_name: &str, reports_dir: &Path) -> Result<Reports, Failure> {
        for layer in self.layers() {
            if let Some(unknown) = layer
                .reports
                .keys()
                .find(|name| ReportKind::from_name(name).is_none())
            {
                return Err(Failure::configuration(
                    unit_name,
                    format!("{unknown} is invalid as the report name"),
                ));
            }
        }

        let mut specs = Vec::with_capacity(ReportKind::ALL.len());
        for kind in ReportKind::ALL {
            let blocks: Vec<&ReportLayer> = self
                .layers()
                .filter_map(|layer| layer.reports.get(kind.name()))
                .collect();
            let default_location = reports_dir.join(format!("{unit_name}.{}", kind.extension()));
            if blocks.is_empty() {
                specs.push(ReportSpec::new(kind, false, default_location));
                continue;
            }
            let enabled = blocks
                .iter()
                .find_map(|block| block.enabled)
                .unwrap_or(true);
            let output_location = blocks
                .iter()
                .find_map(|block| block.output_location.as_deref())
                .map(|path| self.project.resolve_path(path))
                .unwrap_or(default_location);
            let mut spec = ReportSpec::new(kind, enabled, output_location);
            if let Some(stylesheet) = self.resolve_stylesheet(unit_name, kind, &blocks)? {
                spec.stylesheet = Some(stylesheet);
            }
            specs.push(spec);
        }
        Reports::from_specs(specs).map_err(|err| Failure::configuration(unit_name, err.to_string()))
    }

    fn resolve_stylesheet(
        &self,
        unit_name: &str,
        kind: ReportKind,
        blocks: &[&ReportLayer],
    ) -> Result<Option<TextResource>, Failure> {
        let Some(block) = blocks
            .iter()
            .find(|block| block.stylesheet.is_some() || block.stylesheet_file.is_some())
        else {
            return Ok(None);
        };
        if kind != ReportKind::Html {
            return Err(Failure::configuration(
                unit_name,
                format!(
                    "stylesheet property is not available in the {} type report",
                    kind.name()
                ),
            ));
        }
        match (&block.stylesheet, &block.stylesheet_file) {
            (Some(_), Some(_)) => Err(Failure::configuration(
                unit_name,
                "stylesheet and stylesheetFile cannot be set in the same scope",
            )),
            (None, Some(file)) => Ok(Some(TextResource::File(self.project.resolve_path(file)))),
            (Some(entry), None) => {
                let archive = self.project.engine.engine_jar().ok_or_else(|| {
                    Failure::configuration(
                        unit_name,
                        "The dependency on SpotBugs not found in the engine classpath",
                    )
                })?;
                Ok(Some(TextResource::ArchiveEntry {
                    archive: archive.to_path_buf(),
                    entry: entry.clone(),
                }))
            }
            (None, None) => Ok(None),
        }
    }
}

fn tool_defaults(project: &HostProject) -> PropertyLayer {
    PropertyLayer {
        ignore_failures: Some(false),
        show_stack_traces: Some(false),
        use_auxclasspath_file: Some(true),
        use_java_toolchains: Some(true),
        reports_dir: Some(project.reporting_base_dir.join(DEFAULT_REPORTS_DIR_NAME)),
        release: project.version.clone(),
        tool_version: project.engine.version.clone(),
        ..PropertyLayer::default()
    }
}

/// Resolves the effective configuration of `unit_name` at run time.
pub(crate) fn resolve_effective_config(
    project: &HostProject,
    unit_name: &str,
) -> Result<EffectiveConfig, Failure> {
    ConfigResolver::new(project, unit_name).resolve(unit_name)
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Write;

    use tempfile::{TempDir, tempdir};
    use zip::write::SimpleFileOptions;

    use super::*;
    use crate::manifest::parse_manifest;

    fn project(manifest: &str) -> (TempDir, HostProject) {
        let dir = tempdir().expect("project dir");
        let project = parse_manifest(manifest, dir.path()).expect("parse manifest");
        (dir, project)
    }

    const BASE: &str = r#"
[project]
name = "sample"
version = "1.0.0"
"#;

    #[test]
    fn defaults_apply_when_nothing_is_configured() {
        let (dir, project) = project(BASE);

        let config = resolve_effective_config(&project, "spotbugsMain").expect("resolve");

        assert!(!config.ignore_failures);
        assert!(!config.show_progress);
        assert!(config.use_auxclasspath_file);
        assert_eq!(config.effort, None);
        assert_eq!(config.report_level, None);
        assert_eq!(config.project_name, "sample (spotbugsMain)");
        assert_eq!(config.release, "1.0.0");
        assert_eq!(
            config.reports_dir,
            dir.path().join("build/reports/spotbugs")
        );
        assert!(config.reports.all_enabled().is_empty());
    }

    #[test]
    fn per_unit_layer_overrides_extension_per_property() {
        let manifest = format!(
            r#"{BASE}
[spotbugs]
ignoreFailures = true
effort = "min"
jvmArgs = ["-Duser.language=ja"]
onlyAnalyze = ["com.example.*"]

[tasks.spotbugsMain]
effort = "max"
onlyAnalyze = []
"#
        );
        let (_dir, project) = project(&manifest);

        let main = resolve_effective_config(&project, "spotbugsMain").expect("main");
        let test = resolve_effective_config(&project, "spotbugsTest").expect("test");

        assert!(main.ignore_failures);
        assert_eq!(main.effort, Some(Effort::Max));
        assert!(main.only_analyze.is_empty(), "set-to-empty wins over extension");
        assert_eq!(main.jvm_args, vec!["-Duser.language=ja".to_string()]);
        assert_eq!(test.effort, Some(Effort::Min));
        assert_eq!(test.only_analyze, vec!["com.example.*".to_string()]);
    }

    #[test]
    fn project_name_from_unit_layer_is_used_verbatim() {
        let manifest = format!(
            r#"{BASE}
[spotbugs]
projectName = "Sample App"

[tasks.spotbugsTest]
projectName = "tests"
"#
        );
        let (_dir, project) = project(&manifest);

        let main = resolve_effective_config(&project, "spotbugsMain").expect("main");
        let test = resolve_effective_config(&project, "spotbugsTest").expect("test");

        assert_eq!(main.project_name, "Sample App (spotbugsMain)");
        assert_eq!(test.project_name, "tests");
    }

    #[test]
    fn missing_release_is_a_configuration_error() {
        let (_dir, project) = project("[project]\nname = \"noversion\"\n");

        let failure = resolve_effective_config(&project, "spotbugsMain").expect_err("release");

        assert_eq!(failure.kind(), "ConfigurationInvalid");
        assert!(failure.to_string().contains("release"));
    }

    #[test]
    fn visitors_and_omit_visitors_are_exclusive() {
        let manifest = format!(
            r#"{BASE}
[spotbugs]
visitors = ["FindSqlInjection"]

[tasks.spotbugsMain]
omitVisitors = ["FindNonShortCircuit"]
"#
        );
        let (_dir, project) = project(&manifest);

        let failure = resolve_effective_config(&project, "spotbugsMain").expect_err("exclusive");

        assert_eq!(failure.kind(), "ConfigurationInvalid");
    }

    #[test]
    fn unknown_report_name_is_rejected() {
        let manifest = format!(
            r#"{BASE}
[tasks.spotbugsMain.reports.pdf]
enabled = true
"#
        );
        let (_dir, project) = project(&manifest);

        let failure = resolve_effective_config(&project, "spotbugsMain").expect_err("pdf");

        assert!(failure.to_string().contains("pdf is invalid as the report name"));
    }

    #[test]
    fn report_blocks_enable_reports_with_default_locations() {
        let manifest = format!(
            r#"{BASE}
[spotbugs.reports.xml]

[spotbugs.reports.html]
enabled = true

[tasks.spotbugsMain.reports.html]
enabled = false
outputLocation = "out/main.html"
"#
        );
        let (dir, project) = project(&manifest);

        let main = resolve_effective_config(&project, "spotbugsMain").expect("main");
        let test = resolve_effective_config(&project, "spotbugsTest").expect("test");

        let main_kinds: Vec<ReportKind> =
            main.reports.all_enabled().iter().map(|r| r.kind).collect();
        assert_eq!(main_kinds, vec![ReportKind::Xml]);
        assert_eq!(
            main.reports.get(ReportKind::Html).output_location,
            dir.path().join("out/main.html")
        );
        assert_eq!(
            test.reports.get(ReportKind::Html).output_location,
            dir.path().join("build/reports/spotbugs/spotbugsTest.html")
        );
        assert_eq!(
            test.reports.first_enabled().map(|r| r.kind),
            Some(ReportKind::Xml)
        );
    }

    #[test]
    fn stylesheet_on_non_html_report_is_rejected() {
        let manifest = format!(
            r#"{BASE}
[spotbugs.reports.xml]
stylesheetFile = "style.xsl"
"#
        );
        let (_dir, project) = project(&manifest);

        let failure = resolve_effective_config(&project, "spotbugsMain").expect_err("xml");

        assert!(failure.to_string().contains("not available in the xml type report"));
    }

    #[test]
    fn archive_stylesheet_requires_engine_jar() {
        let manifest = format!(
            r#"{BASE}
[spotbugs.reports.html]
stylesheet = "fancy-hist.xsl"
"#
        );
        let (_dir, project) = project(&manifest);

        let failure = resolve_effective_config(&project, "spotbugsMain").expect_err("no jar");

        assert_eq!(failure.kind(), "ConfigurationInvalid");
        assert!(failure.to_string().contains("not found"));
    }

    #[test]
    fn archive_stylesheet_resolves_to_engine_jar_entry() {
        let dir = tempdir().expect("project dir");
        let jar = dir.path().join("spotbugs-4.8.6.jar");
        let mut writer = zip::ZipWriter::new(File::create(&jar).expect("create jar"));
        writer
            .start_file("fancy-hist.xsl", SimpleFileOptions::default())
            .expect("start entry");
        writer.write_all(b"<xsl/>").expect("write entry");
        writer.finish().expect("finish jar");
        let manifest = format!(
            r#"{BASE}
[engine]
classpath = ["spotbugs-4.8.6.jar"]

[spotbugs.reports.html]
stylesheet = "fancy-hist.xsl"
"#
        );
        let project = parse_manifest(&manifest, dir.path()).expect("parse manifest");

        let config = resolve_effective_config(&project, "spotbugsMain").expect("resolve");

        let stylesheet = config
            .reports
            .get(ReportKind::Html)
            .stylesheet
            .clone()
            .expect("stylesheet");
        assert_eq!(
            stylesheet,
            TextResource::ArchiveEntry {
                archive: jar,
                entry: "fancy-hist.xsl".to_string(),
            }
        );
        assert_eq!(stylesheet.read_to_string().expect("read"), "<xsl/>");
    }

    #[test]
    fn resolution_is_repeatable() {
        let manifest = format!(
            r#"{BASE}
[spotbugs]
reportLevel = "low"
extraArgs = ["-nested:false"]
"#
        );
        let (_dir, project) = project(&manifest);

        let first = resolve_effective_config(&project, "spotbugsMain").expect("first");
        let second = resolve_effective_config(&project, "spotbugsMain").expect("second");

        assert_eq!(first, second);
    }

    #[test]
    fn confidence_flags_skip_engine_default() {
        assert_eq!(Confidence::Low.command_line_option(), Some("-low"));
        assert_eq!(Confidence::High.command_line_option(), Some("-high"));
        assert_eq!(Confidence::Medium.command_line_option(), None);
        assert_eq!(Confidence::Default.command_line_option(), None);
    }
}
