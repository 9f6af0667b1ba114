//! Name-keyed pass registry.
//!
//! Passes are registered through ordinary calls, typically [`register_builtin_passes`] at
//! startup plus whatever the embedding tool adds. Pipelines are resolved from their names
//! before any module is touched.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::PipelineError;
use crate::pass::Pass;
use crate::passes::{
    BroadcastCanonicalizationPass, BroadcastFoldPass, DeadCodeEliminationPass,
    DimensionSizeRewriterPass, ReduceDecomposerPass, ReplicateInvariantHoistingPass,
    ShapeInferencePass,
};
use crate::pipeline::{Pipeline, PipelineOptions};

/// Builds a fresh pass instance.
pub type PassFactory = Box<dyn Fn() -> Arc<dyn Pass> + Send + Sync>;

struct PassEntry {
    description: String,
    factory: PassFactory,
}

#[derive(Default)]
pub struct PassRegistry {
    entries: BTreeMap<String, PassEntry>,
}

impl PassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every pass this crate ships.
    pub fn with_builtin_passes() -> Self {
        let mut registry = Self::new();
        register_builtin_passes(&mut registry);
        registry
    }

    /// Registers `factory` under `name`. Names are unique.
    pub fn register<F>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        factory: F,
    ) -> Result<(), PipelineError>
    where
        F: Fn() -> Arc<dyn Pass> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(PipelineError::DuplicateRegistration { name });
        }
        self.entries.insert(
            name,
            PassEntry {
                description: description.into(),
                factory: Box::new(factory),
            },
        );
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn create(&self, name: &str) -> Result<Arc<dyn Pass>, PipelineError> {
        self.entries
            .get(name)
            .map(|entry| (entry.factory)())
            .ok_or_else(|| PipelineError::UnregisteredPass {
                name: name.to_string(),
            })
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.keys().map(String::as_str)
    }

    pub fn description(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(|entry| entry.description.as_str())
    }

    /// Resolves a comma-separated pass list such as `"broadcast-fold,dce"`.
    ///
    /// Whitespace around names is ignored. An empty string yields an empty list, while an
    /// empty entry inside a list is rejected. Fails on the first unknown name.
    pub fn parse_pipeline(&self, pipeline: &str) -> Result<Vec<Arc<dyn Pass>>, PipelineError> {
        if pipeline.trim().is_empty() {
            return Ok(Vec::new());
        }
        pipeline
            .split(',')
            .map(str::trim)
            .map(|name| {
                if name.is_empty() {
                    return Err(PipelineError::EmptyPipelineEntry {
                        pipeline: pipeline.to_string(),
                    });
                }
                self.create(name)
            })
            .collect()
    }

    pub fn build_pipeline(
        &self,
        pipeline: &str,
        options: PipelineOptions,
    ) -> Result<Pipeline, PipelineError> {
        let passes = self.parse_pipeline(pipeline)?;
        tracing::debug!(pipeline, passes = passes.len(), "pipeline resolved");
        Ok(Pipeline::from_passes(passes, options))
    }
}

/// Registers every pass of [`crate::passes`] under its canonical name.
pub fn register_builtin_passes(registry: &mut PassRegistry) {
    let builtins: [fn() -> Arc<dyn Pass>; 7] = [
        builtin::<BroadcastFoldPass>,
        builtin::<BroadcastCanonicalizationPass>,
        builtin::<ReplicateInvariantHoistingPass>,
        builtin::<ReduceDecomposerPass>,
        builtin::<DimensionSizeRewriterPass>,
        builtin::<ShapeInferencePass>,
        builtin::<DeadCodeEliminationPass>,
    ];
    for factory in builtins {
        let pass = factory();
        if registry
            .register(pass.name(), pass.description(), factory)
            .is_err()
        {
            tracing::debug!(pass = pass.name(), "builtin pass already registered");
        }
    }
}

fn builtin<P: Pass + Default + 'static>() -> Arc<dyn Pass> {
    Arc::new(P::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_names_are_sorted_and_complete() {
        let registry = PassRegistry::with_builtin_passes();
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(
            names,
            vec![
                "broadcast-canonicalize",
                "broadcast-fold",
                "dce",
                "dimension-size-rewriter",
                "reduce-decomposer",
                "replicate-invariant-hoisting",
                "shape-inference",
            ]
        );
    }

    #[test]
    fn empty_entry_is_rejected() {
        let registry = PassRegistry::with_builtin_passes();
        let err = registry.parse_pipeline("dce,,dce").err().unwrap();
        assert!(matches!(err, PipelineError::EmptyPipelineEntry { .. }));
    }
}
