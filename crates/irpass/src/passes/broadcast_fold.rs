use crate::driver::apply_patterns_greedily;
use crate::error::IrError;
use crate::ir::{Module, OpKind, ValueId, ValueType};
use crate::pass::{for_each_computation, Pass, PassContext, PassResult};
use crate::pattern::{BroadcastableOpView, OpRewritePattern, PatternSet, ShapeCheckedEqualityView};
use crate::rewriter::Rewriter;
use crate::shape_inference::{broadcast_shapes, infer_result_types};

/// Folds an explicit `broadcast` operand into an op that broadcasts implicitly.
///
/// `R(broadcast(x), b)` becomes `R(x, b)` when `x` and `b` broadcast to exactly the static
/// result shape of `R`. Both operand slots are tried, 0 first.
pub struct FoldBroadcastOperands;

impl OpRewritePattern<BroadcastableOpView> for FoldBroadcastOperands {
    fn match_and_rewrite(
        &self,
        view: BroadcastableOpView,
        rewriter: &mut Rewriter,
    ) -> Result<bool, IrError> {
        fold_broadcast_operands(&view, rewriter)
    }
}

/// Same fold for `eq`/`ne` comparisons, which are only broadcast compatible when they
/// reject incompatible shapes.
pub struct FoldBroadcastIntoEqualityCompare;

impl OpRewritePattern<ShapeCheckedEqualityView> for FoldBroadcastIntoEqualityCompare {
    fn match_and_rewrite(
        &self,
        view: ShapeCheckedEqualityView,
        rewriter: &mut Rewriter,
    ) -> Result<bool, IrError> {
        fold_broadcast_operands(&view.0, rewriter)
    }
}

fn fold_broadcast_operands(
    view: &BroadcastableOpView,
    rewriter: &mut Rewriter,
) -> Result<bool, IrError> {
    let Some(result_spec) = view.result_type.as_tensor() else {
        return Ok(false);
    };
    if !result_spec.shape.is_static() {
        return Ok(false);
    }

    let mut changed = false;
    for index in 0..2 {
        let operands = rewriter.operands(view.root).to_vec();
        let Some(source) = broadcast_source(rewriter, operands[index]) else {
            continue;
        };
        let other = operands[1 - index];
        let (Some(source_spec), Some(other_spec)) = (
            rewriter.type_of(source).as_tensor(),
            rewriter.type_of(other).as_tensor(),
        ) else {
            continue;
        };
        if !source_spec.shape.is_static() || !other_spec.shape.is_static() {
            continue;
        }
        let broadcast = broadcast_shapes(&source_spec.shape, &other_spec.shape);
        if broadcast.as_ref() != Some(&result_spec.shape) {
            continue;
        }

        let mut operand_types: Vec<ValueType> = operands
            .iter()
            .map(|value| rewriter.type_of(*value).clone())
            .collect();
        operand_types[index] = rewriter.type_of(source).clone();
        let preserved = matches!(
            infer_result_types(&view.kind, &operand_types, &[]).as_deref(),
            Ok([inferred]) if inferred.same_logical_type(&view.result_type)
        );
        if !preserved {
            continue;
        }

        tracing::debug!(
            op = view.root.0,
            operand = index,
            source = source.0,
            "folding broadcast operand"
        );
        rewriter.set_operand(view.root, index, source)?;
        changed = true;
    }
    Ok(changed)
}

/// Input of the right-aligned `broadcast` defining `value`, if any.
fn broadcast_source(rewriter: &Rewriter, value: ValueId) -> Option<ValueId> {
    let producer = rewriter.defining_op(value)?;
    let op = rewriter.op(producer);
    let OpKind::BroadcastInDim(spec) = &op.kind else {
        return None;
    };
    let source = *op.operands.first()?;
    let rank = rewriter.type_of(source).as_tensor()?.rank();
    spec.is_right_aligned(rank).then_some(source)
}

/// Greedily folds explicit broadcasts into implicitly broadcasting binary ops.
#[derive(Default)]
pub struct BroadcastFoldPass;

impl BroadcastFoldPass {
    pub const NAME: &'static str = "broadcast-fold";
}

impl Pass for BroadcastFoldPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "fold explicit broadcasts into ops with broadcastable results"
    }

    fn run(&self, module: &mut Module, cx: &mut PassContext) -> Result<PassResult, IrError> {
        let mut patterns = PatternSet::new();
        patterns.insert_view::<BroadcastableOpView, _>(FoldBroadcastOperands);
        patterns.insert_view::<ShapeCheckedEqualityView, _>(FoldBroadcastIntoEqualityCompare);
        let frozen = patterns.freeze();
        for_each_computation(module, |computation| {
            apply_patterns_greedily(computation, &frozen, &cx.greedy).map(PassResult::from)
        })
    }
}
