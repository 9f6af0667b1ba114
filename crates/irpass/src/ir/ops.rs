use std::collections::BTreeMap;

use enumset::{EnumSet, EnumSetType};
use serde::{Deserialize, Serialize};

use super::types::{Shape, TensorLiteral};

/// Elementwise unary ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Abs,
    Exp,
    Log,
    Tanh,
}

/// Elementwise binary ops. All of them broadcast their operands implicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Maximum,
    Minimum,
}

/// Comparison direction for `compare`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonDirection {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ComparisonDirection {
    /// Equality comparisons only broadcast when the op asks for shape errors.
    pub fn is_equality(self) -> bool {
        matches!(self, ComparisonDirection::Eq | ComparisonDirection::Ne)
    }
}

/// Attribute payload for `compare`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompareSpec {
    pub direction: ComparisonDirection,
    /// When set, incompatible operand shapes are an error rather than a `false` result.
    pub incompatible_shape_error: bool,
}

/// Attribute payload for `broadcast_in_dim`.
///
/// Operand dimension `i` maps onto result dimension `dimensions[i]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BroadcastSpec {
    pub result_shape: Shape,
    pub dimensions: Vec<usize>,
}

impl BroadcastSpec {
    /// `true` when operand dimensions map onto the trailing result dimensions in order,
    /// which makes the broadcast equivalent to implicit right-aligned broadcasting.
    pub fn is_right_aligned(&self, operand_rank: usize) -> bool {
        let rank = self.result_shape.rank();
        operand_rank <= rank
            && self.dimensions.len() == operand_rank
            && self
                .dimensions
                .iter()
                .enumerate()
                .all(|(idx, dim)| *dim == rank - operand_rank + idx)
    }
}

/// Attribute payload for `reduce`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReduceSpec {
    pub dimensions: Vec<usize>,
    /// Name of the combiner computation in the enclosing module.
    pub to_apply: String,
}

/// Attribute payload for `replicate`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplicateSpec {
    pub n: usize,
    /// Virtual device name to the concrete device of every replica.
    #[serde(default)]
    pub devices: BTreeMap<String, Vec<String>>,
}

/// Closed set of operation kinds with their typed attributes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    Constant(TensorLiteral),
    Unary(UnaryOp),
    Binary(BinaryOp),
    Compare(CompareSpec),
    Select,
    BroadcastInDim(BroadcastSpec),
    /// `[..., m, k] x [..., k, n] -> [..., m, n]` with broadcast batch dimensions.
    BatchMatMul,
    Reduce(ReduceSpec),
    /// Layout conversion. Logical shape and dtype are unchanged.
    Copy,
    Tuple,
    GetTupleElement { index: usize },
    GetDimensionSize { dimension: usize },
    SetDimensionSize { dimension: usize },
    /// Rank-1 `s32` tensor holding the runtime shape of the operand.
    Shape,
    ReadVariable,
    VariableShape,
    Replicate(ReplicateSpec),
    Yield,
    Return,
}

/// Structural properties queried by matchers and passes.
#[derive(Debug, EnumSetType, Hash, Serialize, Deserialize)]
pub enum OpTrait {
    /// Result shape is the broadcast of the operand shapes.
    ResultsBroadcastable,
    Elementwise,
    SideEffectFree,
    Terminator,
    Commutative,
    HasRegions,
}

impl OpKind {
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Constant(_) => "constant",
            OpKind::Unary(UnaryOp::Neg) => "negate",
            OpKind::Unary(UnaryOp::Abs) => "abs",
            OpKind::Unary(UnaryOp::Exp) => "exponential",
            OpKind::Unary(UnaryOp::Log) => "log",
            OpKind::Unary(UnaryOp::Tanh) => "tanh",
            OpKind::Binary(BinaryOp::Add) => "add",
            OpKind::Binary(BinaryOp::Sub) => "subtract",
            OpKind::Binary(BinaryOp::Mul) => "multiply",
            OpKind::Binary(BinaryOp::Div) => "divide",
            OpKind::Binary(BinaryOp::Maximum) => "maximum",
            OpKind::Binary(BinaryOp::Minimum) => "minimum",
            OpKind::Compare(_) => "compare",
            OpKind::Select => "select",
            OpKind::BroadcastInDim(_) => "broadcast",
            OpKind::BatchMatMul => "batch-matmul",
            OpKind::Reduce(_) => "reduce",
            OpKind::Copy => "copy",
            OpKind::Tuple => "tuple",
            OpKind::GetTupleElement { .. } => "get-tuple-element",
            OpKind::GetDimensionSize { .. } => "get-dimension-size",
            OpKind::SetDimensionSize { .. } => "set-dimension-size",
            OpKind::Shape => "shape",
            OpKind::ReadVariable => "read-variable",
            OpKind::VariableShape => "variable-shape",
            OpKind::Replicate(_) => "replicate",
            OpKind::Yield => "yield",
            OpKind::Return => "return",
        }
    }

    /// Trait bitset of the opcode.
    pub fn traits(&self) -> EnumSet<OpTrait> {
        use OpTrait::*;
        match self {
            OpKind::Constant(_) => SideEffectFree.into(),
            OpKind::Unary(_) => Elementwise | SideEffectFree,
            OpKind::Binary(
                BinaryOp::Add | BinaryOp::Mul | BinaryOp::Maximum | BinaryOp::Minimum,
            ) => ResultsBroadcastable | Elementwise | SideEffectFree | Commutative,
            OpKind::Binary(BinaryOp::Sub | BinaryOp::Div) => {
                ResultsBroadcastable | Elementwise | SideEffectFree
            }
            OpKind::Compare(spec) if spec.direction.is_equality() => {
                Elementwise | SideEffectFree | Commutative
            }
            OpKind::Compare(_) => ResultsBroadcastable | Elementwise | SideEffectFree,
            OpKind::Select => Elementwise | SideEffectFree,
            OpKind::BroadcastInDim(_) => SideEffectFree.into(),
            OpKind::BatchMatMul => ResultsBroadcastable | SideEffectFree,
            OpKind::Reduce(_) => SideEffectFree.into(),
            OpKind::Copy => Elementwise | SideEffectFree,
            OpKind::Tuple | OpKind::GetTupleElement { .. } => SideEffectFree.into(),
            OpKind::GetDimensionSize { .. } | OpKind::SetDimensionSize { .. } => {
                SideEffectFree.into()
            }
            OpKind::Shape | OpKind::VariableShape => SideEffectFree.into(),
            // Reads observe mutable state and must stay ordered with writes.
            OpKind::ReadVariable => EnumSet::empty(),
            OpKind::Replicate(_) => HasRegions.into(),
            OpKind::Yield | OpKind::Return => Terminator.into(),
        }
    }

    pub fn has_trait(&self, t: OpTrait) -> bool {
        self.traits().contains(t)
    }

    pub fn is_terminator(&self) -> bool {
        self.has_trait(OpTrait::Terminator)
    }

    /// Number of regions an operation of this kind owns.
    pub fn num_regions(&self) -> usize {
        match self {
            OpKind::Replicate(_) => 1,
            _ => 0,
        }
    }
}

/// Generic named attribute attached to an operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Attribute {
    Bool(bool),
    Int(i64),
    String(String),
    IntArray(Vec<i64>),
    StringArray(Vec<String>),
}

impl Attribute {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Attribute::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Attribute::Int(value) => Some(*value),
            _ => None,
        }
    }
}

/// Name of the attribute holding an operation's device assignment.
pub const DEVICE_ATTR: &str = "device";

/// Source position an operation was imported from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    pub line: u32,
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}
