//! Graph data model: types, opcodes, computations and modules.

pub mod builder;
pub mod computation;
pub mod module;
pub mod ops;
pub mod text;
pub mod types;
pub mod verify;

pub use builder::ComputationBuilder;
pub use computation::{
    Block, BlockId, Computation, OpId, OpSpec, Operation, ValueData, ValueDef, ValueId,
};
pub use module::Module;
pub use ops::{
    Attribute, BinaryOp, BroadcastSpec, CompareSpec, ComparisonDirection, Location, OpKind,
    OpTrait, ReduceSpec, ReplicateSpec, UnaryOp, DEVICE_ATTR,
};
pub use types::{DType, Dimension, Layout, Shape, TensorLiteral, TensorSpec, ValueType};
pub use verify::{verify_computation, verify_module};
