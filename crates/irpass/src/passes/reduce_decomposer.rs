use std::sync::Arc;

use crate::driver::apply_patterns_greedily;
use crate::error::IrError;
use crate::ir::{Module, OpKind, OpSpec, Operation, ValueType};
use crate::pass::{for_each_computation, Pass, PassContext, PassResult};
use crate::pattern::{OpRewritePattern, PatternSet, ReduceOpView};
use crate::rewriter::Rewriter;

/// Predicate that lets a reduce keep a non-natural output layout.
pub type CustomLayoutAllowed = Arc<dyn Fn(&Operation) -> bool + Send + Sync>;

/// Splits a reduce with a non-natural output layout into a natural-layout reduce followed
/// by one `copy` per output.
///
/// Variadic reduces read each output back with `get-tuple-element` and reassemble the
/// copies with `tuple`, keeping the original output order.
#[derive(Clone, Default)]
pub struct DecomposeReduceLayout {
    custom_layout_allowed: Option<CustomLayoutAllowed>,
}

impl DecomposeReduceLayout {
    pub fn new(custom_layout_allowed: Option<CustomLayoutAllowed>) -> Self {
        Self {
            custom_layout_allowed,
        }
    }
}

impl OpRewritePattern<ReduceOpView> for DecomposeReduceLayout {
    fn may_match(&self, view: &ReduceOpView, rewriter: &Rewriter) -> bool {
        let outputs = match &view.result_type {
            ValueType::Tuple(elements) => elements.as_slice(),
            single => std::slice::from_ref(single),
        };
        let natural = outputs
            .iter()
            .all(|ty| ty.as_tensor().map_or(true, |spec| spec.has_natural_layout()));
        if natural {
            return false;
        }
        match &self.custom_layout_allowed {
            Some(allowed) => !allowed(rewriter.op(view.root)),
            None => true,
        }
    }

    fn match_and_rewrite(
        &self,
        view: ReduceOpView,
        rewriter: &mut Rewriter,
    ) -> Result<bool, IrError> {
        let location = rewriter.op(view.root).location.clone();
        let kind = OpKind::Reduce(view.spec.clone());
        let spec = |kind: OpKind, operands, result_types| {
            OpSpec::new(kind, operands, result_types).with_location(location.clone())
        };

        let replacement = match &view.result_type {
            ValueType::Tensor(output) => {
                let natural = ValueType::Tensor(output.without_layout());
                let reduce = rewriter
                    .insert_before(view.root, spec(kind, view.operands.clone(), vec![natural]))?;
                let reduced = rewriter.op(reduce).result();
                let copy = rewriter.insert_before(
                    view.root,
                    spec(OpKind::Copy, vec![reduced], vec![view.result_type.clone()]),
                )?;
                rewriter.op(copy).result()
            }
            ValueType::Tuple(outputs) => {
                let natural: Vec<ValueType> = outputs
                    .iter()
                    .map(|ty| match ty {
                        ValueType::Tensor(output) => ValueType::Tensor(output.without_layout()),
                        other => other.clone(),
                    })
                    .collect();
                let reduce = rewriter.insert_before(
                    view.root,
                    spec(kind, view.operands.clone(), vec![ValueType::Tuple(natural.clone())]),
                )?;
                let reduced = rewriter.op(reduce).result();
                let mut copies = Vec::with_capacity(outputs.len());
                let pairs = natural.into_iter().zip(outputs);
                for (index, (natural_ty, output_ty)) in pairs.enumerate() {
                    let element = rewriter.insert_before(
                        view.root,
                        spec(OpKind::GetTupleElement { index }, vec![reduced], vec![natural_ty]),
                    )?;
                    let element = rewriter.op(element).result();
                    let copy = rewriter.insert_before(
                        view.root,
                        spec(OpKind::Copy, vec![element], vec![output_ty.clone()]),
                    )?;
                    copies.push(rewriter.op(copy).result());
                }
                let tuple = rewriter.insert_before(
                    view.root,
                    spec(OpKind::Tuple, copies, vec![view.result_type.clone()]),
                )?;
                rewriter.op(tuple).result()
            }
            ValueType::Resource(_) => return Ok(false),
        };

        tracing::debug!(
            op = view.root.0,
            outputs = view.arity(),
            "decomposed reduce into natural layout plus copies"
        );
        rewriter.replace_all_uses(view.result, replacement)?;
        rewriter.erase_op(view.root)?;
        Ok(true)
    }
}

/// Pass wrapper around [`DecomposeReduceLayout`].
#[derive(Clone, Default)]
pub struct ReduceDecomposerPass {
    custom_layout_allowed: Option<CustomLayoutAllowed>,
}

impl ReduceDecomposerPass {
    pub const NAME: &'static str = "reduce-decomposer";

    /// Reduces accepted by `allowed` keep their declared layout.
    pub fn with_custom_layout_allowed<F>(allowed: F) -> Self
    where
        F: Fn(&Operation) -> bool + Send + Sync + 'static,
    {
        Self {
            custom_layout_allowed: Some(Arc::new(allowed)),
        }
    }
}

impl Pass for ReduceDecomposerPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "give reduces a natural output layout and restore the declared one with copies"
    }

    fn run(&self, module: &mut Module, cx: &mut PassContext) -> Result<PassResult, IrError> {
        let mut patterns = PatternSet::new();
        patterns.insert_view::<ReduceOpView, _>(DecomposeReduceLayout::new(
            self.custom_layout_allowed.clone(),
        ));
        let frozen = patterns.freeze();
        for_each_computation(module, |computation| {
            apply_patterns_greedily(computation, &frozen, &cx.greedy).map(PassResult::from)
        })
    }
}
