use std::sync::Arc;

use crate::discovery::{AnalysisUnit, GroupSource, TaskGraph, unit_name};
use crate::failure::Failure;
use crate::manifest::HostProject;

/// Production and test source sets of a JVM project.
#[derive(Default)]
pub(crate) struct SourceSetGroups;

crate::register_group_source!(SourceSetGroups);

impl GroupSource for SourceSetGroups {
    fn id(&self) -> &'static str {
        "source-sets"
    }

    fn is_applicable(&self, project: &HostProject) -> bool {
        !project.source_sets.is_empty()
    }

    fn register(&self, project: &HostProject, graph: &mut TaskGraph) -> Result<(), Failure> {
        let engine = Arc::new(project.engine.clone());
        for source_set in &project.source_sets {
            let name = unit_name(&source_set.name);
            let source_set = source_set.clone();
            let engine = Arc::clone(&engine);
            let unit = name.clone();
            graph.register(name, source_set.classes_task.clone(), move || AnalysisUnit {
                name: unit,
                group: source_set.name,
                source_roots: source_set.source_dirs,
                class_roots: source_set.output_dirs,
                aux_classpath: source_set.compile_classpath,
                compile_step: source_set.classes_task,
                engine,
            })?;
        }
        Ok(())
    }
}
