use std::sync::Arc;

use tracing::debug;

use crate::discovery::{AnalysisUnit, GroupSource, TaskGraph, unit_name};
use crate::failure::Failure;
use crate::manifest::HostProject;

/// Per-variant compile tasks of the Android application or library plugin.
#[derive(Default)]
pub(crate) struct AndroidVariantGroups;

crate::register_group_source!(AndroidVariantGroups);

impl GroupSource for AndroidVariantGroups {
    fn id(&self) -> &'static str {
        "android-variants"
    }

    fn is_applicable(&self, project: &HostProject) -> bool {
        project.android.is_some()
    }

    fn register(&self, project: &HostProject, graph: &mut TaskGraph) -> Result<(), Failure> {
        let Some(android) = &project.android else {
            return Ok(());
        };
        debug!("registering variants of the {:?} plugin", android.kind);
        let engine = Arc::new(project.engine.clone());
        for variant in &android.variants {
            let name = unit_name(&variant.name);
            let variant = variant.clone();
            let engine = Arc::clone(&engine);
            let unit = name.clone();
            graph.register(name, variant.java_compile.step.clone(), move || {
                let compile = variant.java_compile;
                AnalysisUnit {
                    name: unit,
                    group: variant.name,
                    source_roots: compile.source,
                    class_roots: vec![compile.destination_dir],
                    aux_classpath: compile.classpath,
                    compile_step: compile.step,
                    engine,
                }
            })?;
        }
        Ok(())
    }
}
