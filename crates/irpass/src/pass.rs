//! Pass interface and run statistics.

use crate::driver::{GreedyConfig, GreedyRewriteStats};
use crate::error::IrError;
use crate::ir::{Computation, Module};

/// Result returned by a [`Pass`] after it runs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassResult {
    /// Whether the pass changed the IR.
    pub changed: bool,
    /// Number of rewrite iterations executed while applying the pass.
    pub iterations: usize,
    /// Total number of rewrites applied by the pass.
    pub rewrites_applied: usize,
    /// Operations removed by the pass, nested region ops included.
    pub erased_ops: usize,
}

impl PassResult {
    /// Merges two run results, accumulating statistics.
    pub fn merge(self, other: PassResult) -> PassResult {
        PassResult {
            changed: self.changed || other.changed,
            iterations: self.iterations + other.iterations,
            rewrites_applied: self.rewrites_applied + other.rewrites_applied,
            erased_ops: self.erased_ops + other.erased_ops,
        }
    }
}

impl From<GreedyRewriteStats> for PassResult {
    fn from(stats: GreedyRewriteStats) -> Self {
        PassResult {
            changed: stats.changed(),
            iterations: stats.iterations,
            rewrites_applied: stats.applied,
            erased_ops: stats.erased,
        }
    }
}

/// State shared by the passes of one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PassContext {
    pub greedy: GreedyConfig,
}

impl PassContext {
    pub fn new(greedy: GreedyConfig) -> Self {
        Self { greedy }
    }
}

/// Named unit of rewriting over a module.
///
/// A pass must be idempotent: a second run right after the first reports `changed == false`.
pub trait Pass: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str {
        ""
    }
    fn run(&self, module: &mut Module, cx: &mut PassContext) -> Result<PassResult, IrError>;
}

/// Runs `f` over every computation of `module` in order and merges the results.
///
/// Passes never touch sibling computations, so the first error aborts the walk and leaves
/// earlier computations rewritten.
pub fn for_each_computation<F>(module: &mut Module, mut f: F) -> Result<PassResult, IrError>
where
    F: FnMut(&mut Computation) -> Result<PassResult, IrError>,
{
    let mut result = PassResult::default();
    for computation in module.computations_mut() {
        result = result.merge(f(computation)?);
    }
    Ok(result)
}
