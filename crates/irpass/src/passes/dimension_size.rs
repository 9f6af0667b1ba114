use crate::dynamic_dimension::DynamicDimensionInference;
use crate::error::{Diagnostic, IrError};
use crate::ir::{Computation, DType, Dimension, Module, OpId, Shape, TensorLiteral, ValueType};
use crate::pass::{for_each_computation, Pass, PassContext, PassResult};
use crate::pattern::{filters, GetDimensionSizeOpView};
use crate::rewriter::Rewriter;
use crate::shape_inference::infer_for_op;

/// Replaces `get-dimension-size` queries with the value that carries the answer.
///
/// A dynamic dimension with a side-table entry resolves to that exact value; a static
/// dimension resolves to an `s32` constant. A dynamic dimension the table knows nothing
/// about is left alone.
#[derive(Debug, Default, Clone, Copy)]
pub struct DimensionSizeRewriterPass;

impl DimensionSizeRewriterPass {
    pub const NAME: &'static str = "dimension-size-rewriter";
}

impl Pass for DimensionSizeRewriterPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "materialize get-dimension-size as constants or inferred dynamic sizes"
    }

    fn run(&self, module: &mut Module, _cx: &mut PassContext) -> Result<PassResult, IrError> {
        for_each_computation(module, |computation| {
            let inference = DynamicDimensionInference::run(computation);
            rewrite_with_inference(computation, &inference)
        })
    }
}

/// Rewrites every `get-dimension-size` of `computation` against a precomputed table.
pub fn rewrite_with_inference(
    computation: &mut Computation,
    inference: &DynamicDimensionInference,
) -> Result<PassResult, IrError> {
    let queries: Vec<OpId> = computation
        .walk_preorder()
        .into_iter()
        .filter(|op| filters::get_dimension_size(computation.op(*op)))
        .collect();

    let mut rewriter = Rewriter::new(computation);
    let mut result = PassResult::default();
    for op in queries {
        if rewrite_query(&mut rewriter, inference, op)? {
            result.changed = true;
            result.rewrites_applied += 1;
        }
    }
    result.erased_ops = rewriter.erased_ops();
    Ok(result)
}

fn rewrite_query(
    rewriter: &mut Rewriter,
    inference: &DynamicDimensionInference,
    op: OpId,
) -> Result<bool, IrError> {
    let Some(query) = GetDimensionSizeOpView::new(op, rewriter) else {
        return Ok(false);
    };
    check_result_type(rewriter.computation(), op)?;

    let (operand, dimension) = (query.operand, query.dimension);
    let extent = rewriter
        .type_of(operand)
        .as_tensor()
        .and_then(|spec| spec.shape.dim(dimension));

    let replacement = match (inference.get_dynamic_size(operand, dimension), extent) {
        (Some(size), _) => size,
        (None, Some(Dimension::Static(extent))) => {
            let Ok(extent) = i32::try_from(extent) else {
                return Err(IrError::InternalConsistency(Diagnostic::at(
                    rewriter.computation(),
                    op,
                    format!("extent {extent} of dimension {dimension} does not fit in s32"),
                )));
            };
            rewriter.materialize_constant(op, TensorLiteral::scalar_s32(extent))?
        }
        (None, _) => {
            tracing::trace!(op = op.0, dimension, "dynamic dimension without a known size");
            return Ok(false);
        }
    };

    tracing::debug!(
        op = op.0,
        dimension,
        replacement = replacement.0,
        "materialized dimension size"
    );
    rewriter.replace_all_uses(query.result, replacement)?;
    rewriter.erase_op(op)?;
    Ok(true)
}

/// The query must already carry exactly the type the oracle derives, an `s32` scalar.
fn check_result_type(computation: &Computation, op: OpId) -> Result<(), IrError> {
    let inferred = infer_for_op(computation, op).map_err(|source| IrError::ShapeInference {
        diagnostic: Diagnostic::at(computation, op, "inferring dimension size type"),
        source,
    })?;
    let declared = computation.type_of(computation.op(op).result());
    let expected = ValueType::tensor(DType::S32, Shape::scalar());
    if inferred.first() != Some(declared) || *declared != expected {
        return Err(IrError::InternalConsistency(Diagnostic::at(
            computation,
            op,
            format!("dimension size result {declared} is not the inferred {expected}"),
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ComputationBuilder, OpKind};
    use crate::ir_utils::tensor_type_static;

    #[test]
    fn mistyped_query_is_an_internal_error() {
        let mut builder = ComputationBuilder::new("main");
        let v = builder.add_parameter(tensor_type_static(DType::F32, &[5, 3]));
        let size = builder
            .emit_single(OpKind::GetDimensionSize { dimension: 0 }, &[v])
            .expect("query");
        let mut computation = builder.finish(&[size]).expect("finish");
        computation.set_value_type(size, tensor_type_static(DType::S64, &[]));

        let inference = DynamicDimensionInference::run(&computation);
        let err = rewrite_with_inference(&mut computation, &inference).unwrap_err();
        assert!(matches!(err, IrError::InternalConsistency(_)), "{err}");
        assert_eq!(err.diagnostic().and_then(|d| d.opcode), Some("get-dimension-size"));
    }
}
