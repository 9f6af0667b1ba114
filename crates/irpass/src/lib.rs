//! Mutable graph IR with a pattern-driven rewrite pass pipeline.

pub mod driver;
pub mod dynamic_dimension;
mod env;
pub mod error;
pub mod ir;
pub mod ir_utils;
pub mod pass;
pub mod passes;
pub mod pattern;
pub mod pipeline;
pub mod registry;
pub mod rewriter;
pub mod shape_inference;

pub use error::{Diagnostic, IrError, PipelineError, ShapeError};
pub use ir::{Computation, ComputationBuilder, Module, OpId, OpKind, ValueId, ValueType};
pub use pass::{Pass, PassContext, PassResult};
pub use pipeline::{run_pipeline, Pipeline, PipelineBuilder, PipelineOptions};
pub use registry::PassRegistry;
