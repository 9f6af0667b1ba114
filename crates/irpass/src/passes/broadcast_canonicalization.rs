use crate::driver::apply_patterns_greedily;
use crate::error::IrError;
use crate::ir::{BroadcastSpec, Module, OpKind, OpSpec};
use crate::pass::{for_each_computation, Pass, PassContext, PassResult};
use crate::pattern::{BroadcastInDimOpView, OpRewritePattern, PatternSet};
use crate::rewriter::Rewriter;
use crate::shape_inference::infer_result_types;

/// Removes `broadcast` when it is a no-op (identity).
pub struct EliminateIdentityBroadcast;

impl OpRewritePattern<BroadcastInDimOpView> for EliminateIdentityBroadcast {
    fn match_and_rewrite(
        &self,
        view: BroadcastInDimOpView,
        rewriter: &mut Rewriter,
    ) -> Result<bool, IrError> {
        let Some(source_ty) = rewriter.type_of(view.operand).as_tensor() else {
            return Ok(false);
        };
        let Some(result_ty) = view.result_type.as_tensor() else {
            return Ok(false);
        };
        let identity_dims = view
            .spec
            .dimensions
            .iter()
            .enumerate()
            .all(|(idx, dim)| idx == *dim);
        let same_type = source_ty.shape == result_ty.shape && source_ty.layout == result_ty.layout;
        if !same_type || !identity_dims {
            return Ok(false);
        }

        rewriter.replace_all_uses(view.result, view.operand)?;
        rewriter.erase_op(view.root)?;
        Ok(true)
    }
}

/// Folds nested broadcasts into a single broadcast from the original operand.
pub struct CollapseBroadcastChain;

impl OpRewritePattern<BroadcastInDimOpView> for CollapseBroadcastChain {
    fn match_and_rewrite(
        &self,
        view: BroadcastInDimOpView,
        rewriter: &mut Rewriter,
    ) -> Result<bool, IrError> {
        let Some(inner) = rewriter.defining_op(view.operand) else {
            return Ok(false);
        };
        let OpKind::BroadcastInDim(inner_spec) = rewriter.op(inner).kind.clone() else {
            return Ok(false);
        };
        // Base operand that feeds into the inner broadcast.
        let base = rewriter.operands(inner)[0];

        let spec = BroadcastSpec {
            result_shape: view.spec.result_shape.clone(),
            dimensions: inner_spec
                .dimensions
                .iter()
                .map(|dim| view.spec.dimensions[*dim])
                .collect(),
        };
        let kind = OpKind::BroadcastInDim(spec);
        let base_ty = rewriter.type_of(base).clone();
        let Ok(result_types) = infer_result_types(&kind, &[base_ty], &[]) else {
            return Ok(false);
        };
        if !result_types[0].same_logical_type(&view.result_type) {
            return Ok(false);
        }

        let location = rewriter.op(view.root).location.clone();
        let combined = rewriter.insert_before(
            view.root,
            OpSpec::new(kind, vec![base], vec![view.result_type.clone()]).with_location(location),
        )?;
        let combined_value = rewriter.op(combined).result();
        rewriter.replace_all_uses(view.result, combined_value)?;
        rewriter.erase_op(view.root)?;
        Ok(true)
    }
}

/// Applies canonical broadcast simplifications across every computation.
#[derive(Default)]
pub struct BroadcastCanonicalizationPass;

impl BroadcastCanonicalizationPass {
    pub const NAME: &'static str = "broadcast-canonicalize";
}

impl Pass for BroadcastCanonicalizationPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "remove identity broadcasts and collapse broadcast chains"
    }

    fn run(&self, module: &mut Module, cx: &mut PassContext) -> Result<PassResult, IrError> {
        let mut patterns = PatternSet::new();
        patterns.insert_view::<BroadcastInDimOpView, _>(EliminateIdentityBroadcast);
        patterns.insert_view::<BroadcastInDimOpView, _>(CollapseBroadcastChain);
        let frozen = patterns.freeze();
        for_each_computation(module, |computation| {
            apply_patterns_greedily(computation, &frozen, &cx.greedy).map(PassResult::from)
        })
    }
}
