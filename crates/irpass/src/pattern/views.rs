use super::{filters, OperationMatcher, OperationView};
use crate::ir::{BroadcastSpec, OpId, OpKind, ReduceSpec, ValueId, ValueType};
use crate::rewriter::Rewriter;

/// Binary op whose result is the broadcast of its two operands.
#[derive(Clone)]
pub struct BroadcastableOpView {
    pub root: OpId,
    pub operands: [ValueId; 2],
    pub result: ValueId,
    pub result_type: ValueType,
    pub kind: OpKind,
}

impl BroadcastableOpView {
    pub fn new(root: OpId, rewriter: &Rewriter) -> Option<Self> {
        let op = rewriter.op(root);
        let [lhs, rhs] = op.operands.as_slice() else {
            return None;
        };
        let [result] = op.results.as_slice() else {
            return None;
        };
        Some(Self {
            root,
            operands: [*lhs, *rhs],
            result: *result,
            result_type: rewriter.type_of(*result).clone(),
            kind: op.kind.clone(),
        })
    }
}

impl OperationView for BroadcastableOpView {
    const MATCHER: OperationMatcher = filters::results_broadcastable_binary;

    fn extract(root: OpId, rewriter: &Rewriter) -> Option<Self> {
        Self::new(root, rewriter)
    }
}

/// `eq`/`ne` comparison that is only well formed on broadcast-compatible operands.
#[derive(Clone)]
pub struct ShapeCheckedEqualityView(pub BroadcastableOpView);

impl OperationView for ShapeCheckedEqualityView {
    const MATCHER: OperationMatcher = filters::shape_checked_equality;

    fn extract(root: OpId, rewriter: &Rewriter) -> Option<Self> {
        BroadcastableOpView::new(root, rewriter).map(Self)
    }
}

#[derive(Clone)]
pub struct BroadcastInDimOpView {
    pub root: OpId,
    pub operand: ValueId,
    pub result: ValueId,
    pub result_type: ValueType,
    pub spec: BroadcastSpec,
}

impl BroadcastInDimOpView {
    pub fn new(root: OpId, rewriter: &Rewriter) -> Option<Self> {
        let op = rewriter.op(root);
        match &op.kind {
            OpKind::BroadcastInDim(spec) => Some(Self {
                root,
                operand: *op.operands.first()?,
                result: op.result(),
                result_type: rewriter.type_of(op.result()).clone(),
                spec: spec.clone(),
            }),
            _ => None,
        }
    }
}

impl OperationView for BroadcastInDimOpView {
    const MATCHER: OperationMatcher = filters::broadcast_in_dim;

    fn extract(root: OpId, rewriter: &Rewriter) -> Option<Self> {
        Self::new(root, rewriter)
    }
}

#[derive(Clone)]
pub struct ReduceOpView {
    pub root: OpId,
    pub operands: Vec<ValueId>,
    pub result: ValueId,
    pub result_type: ValueType,
    pub spec: ReduceSpec,
}

impl ReduceOpView {
    pub fn new(root: OpId, rewriter: &Rewriter) -> Option<Self> {
        let op = rewriter.op(root);
        match &op.kind {
            OpKind::Reduce(spec) => {
                let result = *op.results.first()?;
                Some(Self {
                    root,
                    operands: op.operands.clone(),
                    result,
                    result_type: rewriter.type_of(result).clone(),
                    spec: spec.clone(),
                })
            }
            _ => None,
        }
    }

    /// Number of reduced inputs (and outputs).
    pub fn arity(&self) -> usize {
        self.operands.len() / 2
    }
}

impl OperationView for ReduceOpView {
    const MATCHER: OperationMatcher = filters::reduce;

    fn extract(root: OpId, rewriter: &Rewriter) -> Option<Self> {
        Self::new(root, rewriter)
    }
}

#[derive(Clone)]
pub struct GetDimensionSizeOpView {
    pub root: OpId,
    pub operand: ValueId,
    pub result: ValueId,
    pub result_type: ValueType,
    pub dimension: usize,
}

impl GetDimensionSizeOpView {
    pub fn new(root: OpId, rewriter: &Rewriter) -> Option<Self> {
        let op = rewriter.op(root);
        match op.kind {
            OpKind::GetDimensionSize { dimension } => Some(Self {
                root,
                operand: *op.operands.first()?,
                result: op.result(),
                result_type: rewriter.type_of(op.result()).clone(),
                dimension,
            }),
            _ => None,
        }
    }
}

impl OperationView for GetDimensionSizeOpView {
    const MATCHER: OperationMatcher = filters::get_dimension_size;

    fn extract(root: OpId, rewriter: &Rewriter) -> Option<Self> {
        Self::new(root, rewriter)
    }
}
