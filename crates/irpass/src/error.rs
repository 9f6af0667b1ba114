use std::fmt;

use thiserror::Error;

use crate::ir::{Computation, DType, Dimension, Location, OpId, ValueType};

/// Failure reported by the shape/type oracle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error("{op} expects {expected} operands, found {found}")]
    OperandCount {
        op: &'static str,
        expected: String,
        found: usize,
    },
    #[error("{op}: incompatible element types {lhs} and {rhs}")]
    ElementTypeMismatch {
        op: &'static str,
        lhs: DType,
        rhs: DType,
    },
    #[error("{op}: element type {dtype} is not supported")]
    UnsupportedElementType { op: &'static str, dtype: DType },
    #[error("{op}: shapes {lhs:?} and {rhs:?} are not broadcast compatible")]
    NotBroadcastable {
        op: &'static str,
        lhs: Vec<Dimension>,
        rhs: Vec<Dimension>,
    },
    #[error("{op}: dimension {dimension} is out of range for rank {rank}")]
    InvalidDimension {
        op: &'static str,
        dimension: usize,
        rank: usize,
    },
    #[error("{op}: expected rank {expected}, found {found}")]
    RankMismatch {
        op: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("{op}: operand {index} has unexpected type {found:?}")]
    UnexpectedType {
        op: &'static str,
        index: usize,
        found: ValueType,
    },
    #[error("{op}: {detail}")]
    InvalidAttribute { op: &'static str, detail: String },
}

/// Error located on a specific operation, so callers can recover its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub computation: String,
    pub op: Option<OpId>,
    pub opcode: Option<&'static str>,
    pub location: Option<Location>,
    pub message: String,
}

impl Diagnostic {
    /// Diagnostic attached to `op`, which must still be live in `computation`.
    pub fn at(computation: &Computation, op: OpId, message: impl Into<String>) -> Self {
        let operation = computation.try_op(op);
        Self {
            computation: computation.name().to_string(),
            op: Some(op),
            opcode: operation.map(|o| o.kind.name()),
            location: operation.and_then(|o| o.location.clone()),
            message: message.into(),
        }
    }

    /// Diagnostic about the computation as a whole.
    pub fn on_computation(computation: &Computation, message: impl Into<String>) -> Self {
        Self {
            computation: computation.name().to_string(),
            op: None,
            opcode: None,
            location: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.computation)?;
        if let Some(op) = self.op {
            write!(f, " op#{}", op.0)?;
        }
        if let Some(opcode) = self.opcode {
            write!(f, " ({opcode})")?;
        }
        if let Some(location) = &self.location {
            write!(f, " at {location}")?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Errors raised while building or rewriting IR.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IrError {
    #[error("invalid operand: {0}")]
    InvalidOperand(Diagnostic),
    #[error("shape inference failed: {diagnostic}: {source}")]
    ShapeInference {
        diagnostic: Diagnostic,
        #[source]
        source: ShapeError,
    },
    #[error("structural invariant violated: {0}")]
    StructuralInvariant(Diagnostic),
    #[error("internal consistency check failed: {0}")]
    InternalConsistency(Diagnostic),
    #[error("duplicate computation name '{name}'")]
    DuplicateComputation { name: String },
}

impl IrError {
    /// Diagnostic of the offending operation, when the error is located.
    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            IrError::InvalidOperand(diagnostic)
            | IrError::StructuralInvariant(diagnostic)
            | IrError::InternalConsistency(diagnostic)
            | IrError::ShapeInference { diagnostic, .. } => Some(diagnostic),
            IrError::DuplicateComputation { .. } => None,
        }
    }

    pub fn op(&self) -> Option<OpId> {
        self.diagnostic().and_then(|d| d.op)
    }
}

/// Errors raised while assembling or running a pass pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unregistered pass '{name}'")]
    UnregisteredPass { name: String },
    #[error("pass '{name}' is already registered")]
    DuplicateRegistration { name: String },
    #[error("empty pass name in pipeline '{pipeline}'")]
    EmptyPipelineEntry { pipeline: String },
    #[error("pass '{pass}' failed: {source}")]
    PassFailed {
        pass: String,
        #[source]
        source: IrError,
    },
}

impl PipelineError {
    /// Operation the failing pass reported, if any.
    pub fn op(&self) -> Option<OpId> {
        match self {
            PipelineError::PassFailed { source, .. } => source.op(),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ModuleIoError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Ir(#[from] IrError),
}
