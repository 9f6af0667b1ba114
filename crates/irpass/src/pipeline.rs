//! Ordered pass execution with optional fixed-point groups.

use std::sync::Arc;

use crate::error::{IrError, PipelineError};
use crate::ir::{verify_module, Module};
use crate::pass::{Pass, PassContext, PassResult};

pub enum Step {
    Pass(Arc<dyn Pass>),
    /// Re-runs `steps` until none of them changes the module, at most `max_iters` times.
    FixedPoint {
        max_iters: usize,
        steps: Vec<Step>,
    },
}

pub struct PipelineBuilder {
    steps: Vec<Step>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn pass(&mut self, pass: Arc<dyn Pass>) -> &mut Self {
        self.steps.push(Step::Pass(pass));
        self
    }

    pub fn fixed_point<F>(&mut self, max_iters: usize, build: F) -> &mut Self
    where
        F: FnOnce(&mut PipelineBuilder),
    {
        let mut inner = PipelineBuilder::new();
        build(&mut inner);
        self.steps.push(Step::FixedPoint {
            max_iters: max_iters.max(1),
            steps: inner.steps,
        });
        self
    }

    pub fn finish(self) -> Vec<Step> {
        self.steps
    }

    pub fn build(self, options: PipelineOptions) -> Pipeline {
        Pipeline {
            steps: self.steps,
            options,
        }
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Iteration cap of the fixed-point loop. Hitting it is not an error.
    pub max_iterations: usize,
    /// Re-run the whole pass list until no pass reports a change.
    pub fixed_point: bool,
    /// Run the structural verifier after every pass.
    pub verify_each: bool,
    /// Log an `info` line per pass run.
    pub log_stats: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_iterations: 8,
            fixed_point: false,
            verify_each: true,
            log_stats: false,
        }
    }
}

impl PipelineOptions {
    /// Defaults overridden by `IRPASS_MAX_ITERS`, `IRPASS_VERIFY_EACH` and
    /// `IRPASS_PASS_STATS`.
    pub fn from_env() -> Self {
        Self {
            max_iterations: crate::env::max_iterations(),
            fixed_point: false,
            verify_each: crate::env::verify_each(),
            log_stats: crate::env::pass_stats_enabled(),
        }
    }

    pub fn with_fixed_point(mut self, max_iterations: usize) -> Self {
        self.fixed_point = true;
        self.max_iterations = max_iterations;
        self
    }
}

pub struct Pipeline {
    steps: Vec<Step>,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(steps: Vec<Step>, options: PipelineOptions) -> Self {
        Self { steps, options }
    }

    /// Flat pass list, wrapped in one fixed-point group when `options.fixed_point` is set.
    pub fn from_passes(passes: Vec<Arc<dyn Pass>>, options: PipelineOptions) -> Self {
        let mut builder = PipelineBuilder::new();
        if options.fixed_point {
            builder.fixed_point(options.max_iterations, |p| {
                for pass in passes {
                    p.pass(pass);
                }
            });
        } else {
            for pass in passes {
                builder.pass(pass);
            }
        }
        builder.build(options)
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Pass names in execution order, fixed-point groups flattened.
    pub fn pass_names(&self) -> Vec<&'static str> {
        fn collect(steps: &[Step], out: &mut Vec<&'static str>) {
            for step in steps {
                match step {
                    Step::Pass(pass) => out.push(pass.name()),
                    Step::FixedPoint { steps, .. } => collect(steps, out),
                }
            }
        }
        let mut names = Vec::new();
        collect(&self.steps, &mut names);
        names
    }

    pub fn run(&self, module: &mut Module) -> Result<PassResult, PipelineError> {
        self.run_with_context(module, &mut PassContext::default())
    }

    /// Runs every step in order. The first failing pass aborts the run; rewrites made by
    /// earlier passes stay in the module.
    pub fn run_with_context(
        &self,
        module: &mut Module,
        cx: &mut PassContext,
    ) -> Result<PassResult, PipelineError> {
        let mut totals = PassResult::default();
        run_steps(&self.steps, module, cx, &self.options, &mut totals)?;
        tracing::debug!(
            module = module.name.as_str(),
            changed = totals.changed,
            rewrites = totals.rewrites_applied,
            erased = totals.erased_ops,
            "pipeline finished"
        );
        Ok(totals)
    }
}

/// Runs `passes` over `module` with `options`.
pub fn run_pipeline(
    module: &mut Module,
    passes: Vec<Arc<dyn Pass>>,
    options: PipelineOptions,
) -> Result<PassResult, PipelineError> {
    Pipeline::from_passes(passes, options).run(module)
}

fn run_steps(
    steps: &[Step],
    module: &mut Module,
    cx: &mut PassContext,
    options: &PipelineOptions,
    totals: &mut PassResult,
) -> Result<bool, PipelineError> {
    let mut changed_any = false;
    for step in steps {
        match step {
            Step::Pass(pass) => {
                let stats = run_pass(pass.as_ref(), module, cx, options)?;
                changed_any |= stats.changed;
                *totals = totals.merge(stats);
            }
            Step::FixedPoint { max_iters, steps } => {
                let mut iter = 0usize;
                loop {
                    if iter >= *max_iters {
                        tracing::warn!(
                            max_iters = *max_iters,
                            "fixed-point group stopped at its iteration cap"
                        );
                        break;
                    }
                    iter += 1;
                    let mut local = PassResult::default();
                    let changed = run_steps(steps, module, cx, options, &mut local)?;
                    *totals = totals.merge(local);
                    changed_any |= changed;
                    if !changed {
                        break;
                    }
                }
            }
        }
    }
    Ok(changed_any)
}

fn run_pass(
    pass: &dyn Pass,
    module: &mut Module,
    cx: &mut PassContext,
    options: &PipelineOptions,
) -> Result<PassResult, PipelineError> {
    let failed = |source: IrError| PipelineError::PassFailed {
        pass: pass.name().to_string(),
        source,
    };
    let stats = pass.run(module, cx).map_err(failed)?;
    if options.verify_each {
        verify_module(module).map_err(failed)?;
    }
    tracing::debug!(
        pass = pass.name(),
        changed = stats.changed,
        iterations = stats.iterations,
        rewrites = stats.rewrites_applied,
        erased = stats.erased_ops,
        "pass finished"
    );
    if options.log_stats {
        tracing::info!(
            pass = pass.name(),
            changed = stats.changed,
            rewrites = stats.rewrites_applied,
            erased = stats.erased_ops,
            "pass stats"
        );
    }
    Ok(stats)
}
