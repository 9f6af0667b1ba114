use crate::error::IrError;
use crate::ir::{BlockId, Computation, Module, OpKind, ValueId, ValueType};
use crate::pass::{for_each_computation, Pass, PassContext, PassResult};
use crate::rewriter::Rewriter;
use crate::shape_inference::infer_for_op;

/// Refines value types whose dimensions the oracle can prove static.
///
/// Region arguments of a `replicate` take the type of their replica-0 operand, and a region
/// is refined before the op that owns it. Declared dtypes and layouts are kept; only the
/// shape is tightened. Ops the oracle rejects are skipped.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShapeInferencePass;

impl ShapeInferencePass {
    pub const NAME: &'static str = "shape-inference";
}

impl Pass for ShapeInferencePass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "tighten dynamic result shapes using the shape oracle"
    }

    fn run(&self, module: &mut Module, _cx: &mut PassContext) -> Result<PassResult, IrError> {
        for_each_computation(module, |computation| {
            let mut rewriter = Rewriter::new(computation);
            let refined = refine_block(&mut rewriter, Computation::ENTRY)?;
            Ok(PassResult {
                changed: refined > 0,
                rewrites_applied: refined,
                ..PassResult::default()
            })
        })
    }
}

fn refine_block(rewriter: &mut Rewriter, block: BlockId) -> Result<usize, IrError> {
    let mut refined = 0;
    let ops = rewriter.computation().block(block).ops.clone();
    for op in ops {
        if rewriter.op(op).kind.is_terminator() {
            continue;
        }
        if let OpKind::Replicate(spec) = &rewriter.op(op).kind {
            let n = spec.n;
            let region = rewriter.op(op).regions[0];
            let args = rewriter.computation().block(region).args.clone();
            for (index, arg) in args.into_iter().enumerate() {
                let Some(&source) = rewriter.operands(op).get(index * n) else {
                    continue;
                };
                let inferred = rewriter.type_of(source).clone();
                refined += usize::from(refine_value(rewriter, arg, &inferred)?);
            }
        }
        for region in rewriter.op(op).regions.clone() {
            refined += refine_block(rewriter, region)?;
        }

        let inferred = match infer_for_op(rewriter.computation(), op) {
            Ok(types) => types,
            Err(err) => {
                tracing::debug!(
                    op = op.0,
                    opcode = rewriter.op(op).kind.name(),
                    error = %err,
                    "shape inference skipped op"
                );
                continue;
            }
        };
        let results = rewriter.op(op).results.clone();
        for (result, inferred) in results.into_iter().zip(&inferred) {
            refined += usize::from(refine_value(rewriter, result, inferred)?);
        }
    }
    Ok(refined)
}

fn refine_value(
    rewriter: &mut Rewriter,
    value: ValueId,
    inferred: &ValueType,
) -> Result<bool, IrError> {
    let Some(merged) = merge_types(rewriter.type_of(value), inferred) else {
        return Ok(false);
    };
    if merged == *rewriter.type_of(value) {
        return Ok(false);
    }
    tracing::debug!(value = value.0, ty = %merged, "refined value type");
    rewriter.refine_value_type(value, merged)
}

/// Current type with its shapes replaced by the inferred ones where those are tighter.
///
/// Returns `None` when the two types disagree structurally or on dtype.
fn merge_types(current: &ValueType, inferred: &ValueType) -> Option<ValueType> {
    match (current, inferred) {
        (ValueType::Tensor(cur), ValueType::Tensor(inf))
        | (ValueType::Resource(cur), ValueType::Resource(inf)) => {
            if cur.dtype != inf.dtype || !inf.shape.refines(&cur.shape) {
                return None;
            }
            let mut spec = cur.clone();
            spec.shape = inf.shape.clone();
            Some(match current {
                ValueType::Resource(_) => ValueType::Resource(spec),
                _ => ValueType::Tensor(spec),
            })
        }
        (ValueType::Tuple(cur), ValueType::Tuple(inf)) if cur.len() == inf.len() => cur
            .iter()
            .zip(inf)
            .map(|(c, i)| merge_types(c, i).or_else(|| Some(c.clone())))
            .collect::<Option<Vec<_>>>()
            .map(ValueType::Tuple),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{DType, Layout};
    use crate::ir_utils::{shape_mixed, tensor_spec_mixed};

    #[test]
    fn merge_keeps_layout_and_takes_static_shape() {
        let current =
            tensor_spec_mixed(DType::F32, &[Some(2), None]).with_layout(Layout::new([0, 1]));
        let inferred = ValueType::tensor(DType::F32, shape_mixed(&[Some(2), Some(3)]));

        let merged = merge_types(&ValueType::Tensor(current.clone()), &inferred).unwrap();
        let spec = merged.as_tensor().unwrap();
        assert_eq!(spec.shape, shape_mixed(&[Some(2), Some(3)]));
        assert_eq!(spec.layout, current.layout);
    }

    #[test]
    fn merge_rejects_dtype_and_rank_changes() {
        let current = ValueType::tensor(DType::F32, shape_mixed(&[None]));
        let other_dtype = ValueType::tensor(DType::S32, shape_mixed(&[Some(4)]));
        let other_rank = ValueType::tensor(DType::F32, shape_mixed(&[Some(4), Some(1)]));
        assert!(merge_types(&current, &other_dtype).is_none());
        assert!(merge_types(&current, &other_rank).is_none());
    }
}
