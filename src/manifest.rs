use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::config::PropertyLayer;

pub(crate) const DEFAULT_MANIFEST_PATH: &str = "spotbugs.toml";
const DEFAULT_BUILD_DIR: &str = "build";
const DEFAULT_REPORTING_DIR: &str = "reports";

/// Coordinates of the engine artifact inside the engine classpath.
pub(crate) const ENGINE_GROUP: &str = "com.github.spotbugs";
pub(crate) const ENGINE_NAME: &str = "spotbugs";

/// On-disk build manifest describing the host project.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct Manifest {
    project: ProjectSection,
    #[serde(default)]
    properties: BTreeMap<String, String>,
    #[serde(default)]
    engine: EngineSection,
    #[serde(default)]
    source_sets: Vec<SourceSetSection>,
    android: Option<AndroidSection>,
    #[serde(default)]
    spotbugs: PropertyLayer,
    #[serde(default)]
    tasks: BTreeMap<String, PropertyLayer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ProjectSection {
    name: String,
    version: Option<String>,
    build_dir: Option<PathBuf>,
    reporting_base_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct EngineSection {
    version: Option<String>,
    #[serde(default)]
    classpath: Vec<ClasspathEntrySection>,
    #[serde(default)]
    plugins: Vec<PathBuf>,
    java: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ClasspathEntrySection {
    Path(PathBuf),
    Artifact {
        path: PathBuf,
        group: Option<String>,
        name: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SourceSetSection {
    name: String,
    #[serde(default)]
    source_dirs: Vec<PathBuf>,
    #[serde(default)]
    output_dirs: Vec<PathBuf>,
    #[serde(default)]
    compile_classpath: Vec<PathBuf>,
    classes_task: Option<CompileTaskSection>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CompileTaskSection {
    name: Option<String>,
    command: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct AndroidSection {
    plugin: String,
    #[serde(default)]
    variants: Vec<VariantSection>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct VariantSection {
    name: String,
    java_compile: JavaCompileSection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct JavaCompileSection {
    name: String,
    #[serde(default)]
    source: Vec<PathBuf>,
    destination_dir: PathBuf,
    #[serde(default)]
    classpath: Vec<PathBuf>,
    command: Option<Vec<String>>,
}

/// Host project as seen by group discovery and unit execution.
#[derive(Debug, Clone)]
pub(crate) struct HostProject {
    pub(crate) name: String,
    pub(crate) version: Option<String>,
    pub(crate) project_dir: PathBuf,
    pub(crate) build_dir: PathBuf,
    pub(crate) reporting_base_dir: PathBuf,
    pub(crate) properties: BTreeMap<String, String>,
    pub(crate) engine: EngineSpec,
    pub(crate) source_sets: Vec<SourceSet>,
    pub(crate) android: Option<AndroidPlugin>,
    pub(crate) extension: PropertyLayer,
    pub(crate) task_overrides: BTreeMap<String, PropertyLayer>,
}

/// Engine classpath and plugins, resolved once per project.
#[derive(Debug, Clone, Default)]
pub(crate) struct EngineSpec {
    pub(crate) version: Option<String>,
    pub(crate) classpath: Vec<ClasspathEntry>,
    pub(crate) plugins: Vec<PathBuf>,
    pub(crate) java: Option<PathBuf>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) struct ClasspathEntry {
    pub(crate) path: PathBuf,
    pub(crate) group: Option<String>,
    pub(crate) name: Option<String>,
}

impl ClasspathEntry {
    /// Whether this entry is the engine artifact itself.
    pub(crate) fn is_engine_artifact(&self) -> bool {
        match (self.group.as_deref(), self.name.as_deref()) {
            (Some(group), Some(name)) => group == ENGINE_GROUP && name == ENGINE_NAME,
            _ => self
                .path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.strip_prefix("spotbugs-"))
                .is_some_and(|rest| {
                    rest.ends_with(".jar") && rest.starts_with(|c: char| c.is_ascii_digit())
                }),
        }
    }
}

impl EngineSpec {
    pub(crate) fn classpath_paths(&self) -> Vec<PathBuf> {
        self.classpath.iter().map(|entry| entry.path.clone()).collect()
    }

    /// Locates the engine jar by its canonical coordinates.
    pub(crate) fn engine_jar(&self) -> Option<&Path> {
        self.classpath
            .iter()
            .filter(|entry| entry.is_engine_artifact())
            .map(|entry| entry.path.as_path())
            .find(|path| path.is_file())
    }
}

/// Compile step producing the classes of a group.
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) struct CompileStep {
    pub(crate) name: String,
    pub(crate) command: Option<Vec<String>>,
}

/// Classical production/test grouping of sources.
#[derive(Debug, Clone)]
pub(crate) struct SourceSet {
    pub(crate) name: String,
    pub(crate) source_dirs: Vec<PathBuf>,
    pub(crate) output_dirs: Vec<PathBuf>,
    pub(crate) compile_classpath: Vec<PathBuf>,
    pub(crate) classes_task: CompileStep,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum AndroidPluginKind {
    Application,
    Library,
}

/// Mobile build plugin with its per-variant compile tasks.
#[derive(Debug, Clone)]
pub(crate) struct AndroidPlugin {
    pub(crate) kind: AndroidPluginKind,
    pub(crate) variants: Vec<Variant>,
}

#[derive(Debug, Clone)]
pub(crate) struct Variant {
    pub(crate) name: String,
    pub(crate) java_compile: JavaCompile,
}

#[derive(Debug, Clone)]
pub(crate) struct JavaCompile {
    pub(crate) step: CompileStep,
    pub(crate) source: Vec<PathBuf>,
    pub(crate) destination_dir: PathBuf,
    pub(crate) classpath: Vec<PathBuf>,
}

impl HostProject {
    /// Returns the value of a host property, if defined.
    pub(crate) fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    pub(crate) fn resolve_path(&self, path: &Path) -> PathBuf {
        resolve_against(&self.project_dir, path)
    }
}

pub(crate) fn load_manifest(path: &Path) -> Result<HostProject> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read build manifest {}", path.display()))?;
    let base = path.parent().unwrap_or_else(|| Path::new(""));
    let base = if base.as_os_str().is_empty() {
        Path::new(".")
    } else {
        base
    };
    let project_dir = base
        .canonicalize()
        .with_context(|| format!("failed to resolve {}", base.display()))?;
    let project = parse_manifest(&content, &project_dir)
        .with_context(|| format!("failed to parse build manifest {}", path.display()))?;
    debug!(
        "loaded build manifest {} with {} source sets",
        path.display(),
        project.source_sets.len()
    );
    Ok(project)
}

pub(crate) fn parse_manifest(content: &str, project_dir: &Path) -> Result<HostProject> {
    let manifest: Manifest = toml::from_str(content)?;
    let resolve = |path: &Path| resolve_against(project_dir, path);
    let resolve_all =
        |paths: &[PathBuf]| -> Vec<PathBuf> { paths.iter().map(|path| resolve(path)).collect() };

    let build_dir = resolve(
        manifest
            .project
            .build_dir
            .as_deref()
            .unwrap_or_else(|| Path::new(DEFAULT_BUILD_DIR)),
    );
    let reporting_base_dir = manifest
        .project
        .reporting_base_dir
        .as_deref()
        .map(|dir| resolve(dir))
        .unwrap_or_else(|| build_dir.join(DEFAULT_REPORTING_DIR));

    let engine = EngineSpec {
        version: manifest.engine.version,
        classpath: manifest
            .engine
            .classpath
            .into_iter()
            .map(|entry| match entry {
                ClasspathEntrySection::Path(path) => ClasspathEntry {
                    path: resolve(&path),
                    group: None,
                    name: None,
                },
                ClasspathEntrySection::Artifact { path, group, name } => ClasspathEntry {
                    path: resolve(&path),
                    group,
                    name,
                },
            })
            .collect(),
        plugins: resolve_all(&manifest.engine.plugins),
        java: manifest.engine.java.as_deref().map(|java| resolve(java)),
    };

    let source_sets = manifest
        .source_sets
        .into_iter()
        .map(|section| {
            let default_task = default_classes_task_name(&section.name);
            let classes_task = match section.classes_task {
                Some(task) => CompileStep {
                    name: task.name.unwrap_or(default_task),
                    command: task.command,
                },
                None => CompileStep {
                    name: default_task,
                    command: None,
                },
            };
            SourceSet {
                source_dirs: resolve_all(&section.source_dirs),
                output_dirs: resolve_all(&section.output_dirs),
                compile_classpath: resolve_all(&section.compile_classpath),
                name: section.name,
                classes_task,
            }
        })
        .collect();

    let android = match manifest.android {
        Some(section) => {
            let kind = match section.plugin.as_str() {
                "application" | "com.android.application" => AndroidPluginKind::Application,
                "library" | "com.android.library" => AndroidPluginKind::Library,
                other => anyhow::bail!("unrecognized Android plugin '{other}'"),
            };
            let variants = section
                .variants
                .into_iter()
                .map(|variant| Variant {
                    name: variant.name,
                    java_compile: JavaCompile {
                        step: CompileStep {
                            name: variant.java_compile.name,
                            command: variant.java_compile.command,
                        },
                        source: resolve_all(&variant.java_compile.source),
                        destination_dir: resolve(&variant.java_compile.destination_dir),
                        classpath: resolve_all(&variant.java_compile.classpath),
                    },
                })
                .collect();
            Some(AndroidPlugin { kind, variants })
        }
        None => None,
    };

    Ok(HostProject {
        name: manifest.project.name,
        version: manifest.project.version,
        project_dir: project_dir.to_path_buf(),
        build_dir,
        reporting_base_dir,
        properties: manifest.properties,
        engine,
        source_sets,
        android,
        extension: manifest.spotbugs,
        task_overrides: manifest.tasks,
    })
}

fn default_classes_task_name(source_set: &str) -> String {
    if source_set == "main" {
        "classes".to_string()
    } else {
        format!("{source_set}Classes")
    }
}

fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
