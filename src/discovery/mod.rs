use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, bail};
use tracing::debug;

use crate::failure::Failure;
use crate::manifest::{CompileStep, EngineSpec, HostProject};

mod android;
mod source_sets;

/// Prefix of every analysis unit name.
pub(crate) const UNIT_NAME_PREFIX: &str = "spotbugs";
/// Aggregate verification gate depending on every unit.
pub(crate) const CHECK_TASK: &str = "check";

/// One scheduled engine invocation over a group of compiled classes.
#[derive(Clone, Debug)]
pub(crate) struct AnalysisUnit {
    pub(crate) name: String,
    pub(crate) group: String,
    pub(crate) source_roots: Vec<PathBuf>,
    pub(crate) class_roots: Vec<PathBuf>,
    pub(crate) aux_classpath: Vec<PathBuf>,
    /// Step that must complete before the unit is runnable.
    pub(crate) compile_step: CompileStep,
    pub(crate) engine: Arc<EngineSpec>,
}

/// Source of named groups of compiled classes in the host project.
pub(crate) trait GroupSource {
    fn id(&self) -> &'static str;
    /// Capability probe; an inapplicable source registers nothing.
    fn is_applicable(&self, project: &HostProject) -> bool;
    fn register(&self, project: &HostProject, graph: &mut TaskGraph) -> Result<(), Failure>;
}

pub(crate) struct GroupSourceRegistration {
    pub(crate) factory: fn() -> Box<dyn GroupSource>,
}

inventory::collect!(GroupSourceRegistration);

pub(crate) fn construct<T: GroupSource + Default + 'static>() -> Box<dyn GroupSource> {
    Box::new(T::default())
}

#[macro_export]
macro_rules! register_group_source {
    ($source:ty) => {
        inventory::submit! {
            $crate::discovery::GroupSourceRegistration {
                factory: $crate::discovery::construct::<$source>,
            }
        }
    };
}

pub(crate) fn all_group_sources() -> Vec<Box<dyn GroupSource>> {
    let mut sources: Vec<Box<dyn GroupSource>> = inventory::iter::<GroupSourceRegistration>
        .into_iter()
        .map(|registration| (registration.factory)())
        .collect();
    sources.sort_by(|a, b| a.id().cmp(b.id()));
    sources
}

/// `spotbugs` followed by the capitalised group name.
pub(crate) fn unit_name(group: &str) -> String {
    let mut chars = group.chars();
    match chars.next() {
        Some(first) => format!(
            "{UNIT_NAME_PREFIX}{}{}",
            first.to_uppercase(),
            chars.as_str()
        ),
        None => UNIT_NAME_PREFIX.to_string(),
    }
}

type Configure = Box<dyn FnOnce() -> AnalysisUnit>;

struct Registration {
    depends_on: String,
    configure: Configure,
}

/// Lazily registered units plus the compile steps they depend on.
#[derive(Default)]
pub(crate) struct TaskGraph {
    compile_steps: BTreeMap<String, CompileStep>,
    units: BTreeMap<String, Registration>,
    order: Vec<String>,
}

impl TaskGraph {
    /// Registers a unit whose configuration runs only when the graph is realized.
    pub(crate) fn register(
        &mut self,
        name: String,
        compile_step: CompileStep,
        configure: impl FnOnce() -> AnalysisUnit + 'static,
    ) -> Result<(), Failure> {
        if name == CHECK_TASK
            || self.units.contains_key(&name)
            || self.compile_steps.contains_key(&name)
        {
            return Err(Failure::configuration(
                &name,
                format!("a task named '{name}' is already registered"),
            ));
        }
        if let Some(known) = self.compile_steps.get(&compile_step.name)
            && known.command != compile_step.command
        {
            return Err(Failure::configuration(
                &name,
                format!(
                    "compile step '{}' is declared with different commands",
                    compile_step.name
                ),
            ));
        }
        debug!("registered {name} depending on {}", compile_step.name);
        let depends_on = compile_step.name.clone();
        self.compile_steps
            .entry(compile_step.name.clone())
            .or_insert(compile_step);
        self.units.insert(
            name.clone(),
            Registration {
                depends_on,
                configure: Box::new(configure),
            },
        );
        self.order.push(name);
        Ok(())
    }

    pub(crate) fn unit_names(&self) -> &[String] {
        &self.order
    }

    pub(crate) fn compile_step(&self, name: &str) -> Option<&CompileStep> {
        self.compile_steps.get(name)
    }

    /// Task names with their direct dependencies, ending with the check gate.
    pub(crate) fn describe(&self) -> Vec<(String, Vec<String>)> {
        let mut tasks: Vec<(String, Vec<String>)> = self
            .order
            .iter()
            .filter_map(|name| {
                self.units
                    .get(name)
                    .map(|registration| (name.clone(), vec![registration.depends_on.clone()]))
            })
            .collect();
        tasks.push((CHECK_TASK.to_string(), self.unit_names().to_vec()));
        tasks
    }

    /// Realizes the selected units; an empty selection or `check` selects every unit.
    pub(crate) fn realize(mut self, selection: &[String]) -> Result<Vec<AnalysisUnit>> {
        let selected: BTreeSet<&str> =
            if selection.is_empty() || selection.iter().any(|name| name == CHECK_TASK) {
                self.order.iter().map(String::as_str).collect()
            } else {
                for name in selection {
                    if !self.units.contains_key(name) {
                        bail!(
                            "task '{name}' not found; available units: {}",
                            self.unit_names().join(", ")
                        );
                    }
                }
                selection.iter().map(String::as_str).collect()
            };
        let mut units = Vec::with_capacity(selected.len());
        for name in &self.order {
            if !selected.contains(name.as_str()) {
                continue;
            }
            let Some(registration) = self.units.remove(name) else {
                continue;
            };
            let unit = (registration.configure)();
            debug_assert_eq!(&unit.name, name);
            units.push(unit);
        }
        Ok(units)
    }
}

/// Builds the task graph of `project` from every applicable group source.
pub(crate) fn discover(project: &HostProject) -> Result<TaskGraph, Failure> {
    let mut graph = TaskGraph::default();
    for source in all_group_sources() {
        if !source.is_applicable(project) {
            debug!("group source {} is not applicable", source.id());
            continue;
        }
        source.register(project, &mut graph)?;
    }
    Ok(graph)
}
