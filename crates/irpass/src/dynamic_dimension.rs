//! Side table mapping `(value, dimension)` to the value carrying that dimension's runtime size.
//!
//! The table is derived data. It is computed from the graph in one walk and never feeds
//! back into it; passes that consult it drop it when they finish.

use std::collections::HashMap;

use crate::ir::{Computation, Dimension, OpId, OpKind, OpTrait, ValueId};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DynamicDimensionInference {
    sizes: HashMap<(ValueId, usize), ValueId>,
}

impl DynamicDimensionInference {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs inference over `computation` with no caller-provided entries.
    pub fn run(computation: &Computation) -> Self {
        Self::run_with_seeds(computation, std::iter::empty())
    }

    /// Runs inference after seeding entries, typically for parameters whose sizes arrive
    /// as separate scalar parameters.
    pub fn run_with_seeds(
        computation: &Computation,
        seeds: impl IntoIterator<Item = ((ValueId, usize), ValueId)>,
    ) -> Self {
        let mut inference = Self {
            sizes: seeds.into_iter().collect(),
        };
        for op in computation.walk_preorder() {
            inference.propagate(computation, op);
        }
        tracing::trace!(
            computation = computation.name(),
            entries = inference.sizes.len(),
            "dynamic dimension inference finished"
        );
        inference
    }

    pub fn set_dynamic_size(&mut self, value: ValueId, dimension: usize, size: ValueId) {
        self.sizes.insert((value, dimension), size);
    }

    pub fn get_dynamic_size(&self, value: ValueId, dimension: usize) -> Option<ValueId> {
        self.sizes.get(&(value, dimension)).copied()
    }

    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    fn propagate(&mut self, computation: &Computation, op: OpId) {
        let operation = computation.op(op);
        let Some(&result) = operation.results.first() else {
            return;
        };
        match &operation.kind {
            OpKind::SetDimensionSize { dimension } => {
                self.forward_same_rank(computation, operation.operands[0], result);
                self.sizes.insert((result, *dimension), operation.operands[1]);
            }
            OpKind::Unary(_) | OpKind::Copy => {
                self.forward_same_rank(computation, operation.operands[0], result);
            }
            OpKind::Select => {
                for operand in &operation.operands {
                    self.forward_broadcast(computation, *operand, result);
                }
            }
            kind if kind.has_trait(OpTrait::Elementwise) => {
                for operand in &operation.operands {
                    self.forward_broadcast(computation, *operand, result);
                }
            }
            OpKind::BroadcastInDim(spec) => {
                for (operand_dim, result_dim) in spec.dimensions.iter().enumerate() {
                    self.forward_dim(
                        computation,
                        (operation.operands[0], operand_dim),
                        (result, *result_dim),
                    );
                }
            }
            OpKind::Reduce(spec) if operation.operands.len() == 2 => {
                let input = operation.operands[0];
                let rank = tensor_rank(computation, input);
                let kept = (0..rank).filter(|dim| !spec.dimensions.contains(dim));
                for (result_dim, input_dim) in kept.enumerate() {
                    self.forward_dim(computation, (input, input_dim), (result, result_dim));
                }
            }
            _ => {}
        }
    }

    fn forward_same_rank(&mut self, computation: &Computation, from: ValueId, to: ValueId) {
        for dim in 0..tensor_rank(computation, from) {
            self.forward_dim(computation, (from, dim), (to, dim));
        }
    }

    /// Right-aligned forwarding for implicitly broadcasting ops. The first operand that
    /// provides a size for a result dimension wins.
    fn forward_broadcast(&mut self, computation: &Computation, from: ValueId, to: ValueId) {
        let from_rank = tensor_rank(computation, from);
        let to_rank = tensor_rank(computation, to);
        if from_rank > to_rank {
            return;
        }
        for dim in 0..from_rank {
            self.forward_dim(computation, (from, dim), (to, to_rank - from_rank + dim));
        }
    }

    fn forward_dim(
        &mut self,
        computation: &Computation,
        from: (ValueId, usize),
        to: (ValueId, usize),
    ) {
        let Some(size) = self.sizes.get(&from).copied() else {
            return;
        };
        if self.sizes.contains_key(&to) || !is_dynamic_dim(computation, to.0, to.1) {
            return;
        }
        self.sizes.insert(to, size);
    }
}

fn tensor_rank(computation: &Computation, value: ValueId) -> usize {
    computation
        .type_of(value)
        .as_tensor()
        .map_or(0, |spec| spec.rank())
}

fn is_dynamic_dim(computation: &Computation, value: ValueId, dim: usize) -> bool {
    computation
        .type_of(value)
        .as_tensor()
        .and_then(|spec| spec.shape.dim(dim))
        .is_some_and(|extent| extent == Dimension::Dynamic)
}
