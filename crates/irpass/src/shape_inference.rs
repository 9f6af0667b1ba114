//! Result type oracle.
//!
//! `infer_result_types` is a pure function of an opcode, its attributes and its operand
//! types. It never looks at the graph; `infer_for_op` is the convenience wrapper that
//! gathers those inputs for an operation that already lives in a computation.

use crate::error::ShapeError;
use crate::ir::{
    BroadcastSpec, Computation, DType, Dimension, OpId, OpKind, ReduceSpec, ReplicateSpec, Shape,
    TensorSpec, UnaryOp, ValueType,
};

type InferResult = Result<Vec<ValueType>, ShapeError>;

/// Right-aligned broadcast of two shapes.
///
/// Dimensions are compatible when equal, when either is `1`, or when either is unknown.
pub fn broadcast_shapes(lhs: &Shape, rhs: &Shape) -> Option<Shape> {
    let rank = lhs.rank().max(rhs.rank());
    let mut dims = Vec::with_capacity(rank);
    for idx in 0..rank {
        let l = dim_from_right(lhs, rank - 1 - idx);
        let r = dim_from_right(rhs, rank - 1 - idx);
        dims.push(broadcast_dim(l, r)?);
    }
    Some(Shape::new(dims))
}

fn dim_from_right(shape: &Shape, offset_from_right: usize) -> Dimension {
    let rank = shape.rank();
    if offset_from_right >= rank {
        Dimension::Static(1)
    } else {
        shape.dims()[rank - 1 - offset_from_right]
    }
}

fn broadcast_dim(lhs: Dimension, rhs: Dimension) -> Option<Dimension> {
    use Dimension::{Dynamic, Static};
    match (lhs, rhs) {
        (Static(a), Static(b)) if a == b => Some(Static(a)),
        (Static(1), other) | (other, Static(1)) => Some(other),
        (Dynamic, Static(_)) | (Static(_), Dynamic) | (Dynamic, Dynamic) => {
            // An unknown extent paired with a non-unit static one must equal it at run time.
            match (lhs, rhs) {
                (Static(k), Dynamic) | (Dynamic, Static(k)) => Some(Static(k)),
                _ => Some(Dynamic),
            }
        }
        (Static(_), Static(_)) => None,
    }
}

/// Infers the result types of an operation of `kind`.
///
/// `regions` holds, per owned region, the types yielded by its terminator.
pub fn infer_result_types(
    kind: &OpKind,
    operands: &[ValueType],
    regions: &[Vec<ValueType>],
) -> InferResult {
    let op = kind.name();
    match kind {
        OpKind::Constant(literal) => {
            expect_operands(op, operands, 0)?;
            Ok(vec![ValueType::Tensor(literal.spec.without_layout())])
        }
        OpKind::Unary(unary) => {
            expect_operands(op, operands, 1)?;
            let spec = tensor_operand(op, operands, 0)?;
            let needs_float = matches!(unary, UnaryOp::Exp | UnaryOp::Log | UnaryOp::Tanh);
            if spec.dtype == DType::Pred || (needs_float && !spec.dtype.is_float()) {
                return Err(ShapeError::UnsupportedElementType {
                    op,
                    dtype: spec.dtype,
                });
            }
            Ok(vec![ValueType::Tensor(spec.without_layout())])
        }
        OpKind::Binary(_) => {
            expect_operands(op, operands, 2)?;
            let (dtype, shape) = broadcast_binary(op, operands)?;
            if dtype == DType::Pred {
                return Err(ShapeError::UnsupportedElementType { op, dtype });
            }
            Ok(vec![ValueType::tensor(dtype, shape)])
        }
        OpKind::Compare(spec) => {
            expect_operands(op, operands, 2)?;
            match broadcast_binary(op, operands) {
                Ok((_, shape)) => Ok(vec![ValueType::tensor(DType::Pred, shape)]),
                // Equality without shape errors degrades to a scalar answer.
                Err(ShapeError::NotBroadcastable { .. })
                    if spec.direction.is_equality() && !spec.incompatible_shape_error =>
                {
                    Ok(vec![ValueType::tensor(DType::Pred, Shape::scalar())])
                }
                Err(err) => Err(err),
            }
        }
        OpKind::Select => infer_select(op, operands),
        OpKind::BroadcastInDim(spec) => infer_broadcast_in_dim(op, spec, operands),
        OpKind::BatchMatMul => infer_batch_matmul(op, operands),
        OpKind::Reduce(spec) => infer_reduce(op, spec, operands),
        OpKind::Copy => {
            expect_operands(op, operands, 1)?;
            let spec = tensor_operand(op, operands, 0)?;
            Ok(vec![ValueType::Tensor(spec.without_layout())])
        }
        OpKind::Tuple => Ok(vec![ValueType::Tuple(operands.to_vec())]),
        OpKind::GetTupleElement { index } => {
            expect_operands(op, operands, 1)?;
            let elements = operands[0].as_tuple().ok_or_else(|| unexpected(op, 0, operands))?;
            elements
                .get(*index)
                .cloned()
                .map(|ty| vec![ty])
                .ok_or(ShapeError::InvalidDimension {
                    op,
                    dimension: *index,
                    rank: elements.len(),
                })
        }
        OpKind::GetDimensionSize { dimension } => {
            expect_operands(op, operands, 1)?;
            let spec = tensor_operand(op, operands, 0)?;
            check_dimension(op, *dimension, spec.rank())?;
            Ok(vec![ValueType::tensor(DType::S32, Shape::scalar())])
        }
        OpKind::SetDimensionSize { dimension } => {
            expect_operands(op, operands, 2)?;
            let spec = tensor_operand(op, operands, 0)?;
            check_dimension(op, *dimension, spec.rank())?;
            let size = tensor_operand(op, operands, 1)?;
            if size.dtype != DType::S32 || size.rank() != 0 {
                return Err(unexpected(op, 1, operands));
            }
            let mut dims = spec.shape.dims().to_vec();
            dims[*dimension] = Dimension::Dynamic;
            Ok(vec![ValueType::tensor(spec.dtype, Shape::new(dims))])
        }
        OpKind::Shape => {
            expect_operands(op, operands, 1)?;
            let spec = tensor_operand(op, operands, 0)?;
            Ok(vec![shape_vector(spec.rank())])
        }
        OpKind::ReadVariable => {
            expect_operands(op, operands, 1)?;
            match &operands[0] {
                ValueType::Resource(spec) => Ok(vec![ValueType::Tensor(spec.clone())]),
                _ => Err(unexpected(op, 0, operands)),
            }
        }
        OpKind::VariableShape => {
            expect_operands(op, operands, 1)?;
            match &operands[0] {
                ValueType::Resource(spec) => Ok(vec![shape_vector(spec.rank())]),
                _ => Err(unexpected(op, 0, operands)),
            }
        }
        OpKind::Replicate(spec) => infer_replicate(op, spec, operands, regions),
        OpKind::Yield | OpKind::Return => Ok(Vec::new()),
    }
}

/// Gathers operand and region types of a live operation and runs the oracle.
pub fn infer_for_op(computation: &Computation, op: OpId) -> InferResult {
    let operation = computation.op(op);
    let operand_types: Vec<ValueType> = operation
        .operands
        .iter()
        .map(|value| computation.type_of(*value).clone())
        .collect();
    let region_types: Vec<Vec<ValueType>> = operation
        .regions
        .iter()
        .map(|region| match computation.terminator(*region) {
            Some(term) => computation
                .op(term)
                .operands
                .iter()
                .map(|value| computation.type_of(*value).clone())
                .collect(),
            None => Vec::new(),
        })
        .collect();
    infer_result_types(&operation.kind, &operand_types, &region_types)
}

fn shape_vector(rank: usize) -> ValueType {
    ValueType::tensor(DType::S32, Shape::from(&[rank][..]))
}

fn expect_operands(
    op: &'static str,
    operands: &[ValueType],
    expected: usize,
) -> Result<(), ShapeError> {
    if operands.len() != expected {
        return Err(ShapeError::OperandCount {
            op,
            expected: expected.to_string(),
            found: operands.len(),
        });
    }
    Ok(())
}

fn tensor_operand<'a>(
    op: &'static str,
    operands: &'a [ValueType],
    index: usize,
) -> Result<&'a TensorSpec, ShapeError> {
    operands[index]
        .as_tensor()
        .ok_or_else(|| unexpected(op, index, operands))
}

fn unexpected(op: &'static str, index: usize, operands: &[ValueType]) -> ShapeError {
    ShapeError::UnexpectedType {
        op,
        index,
        found: operands[index].clone(),
    }
}

fn check_dimension(op: &'static str, dimension: usize, rank: usize) -> Result<(), ShapeError> {
    if dimension >= rank {
        return Err(ShapeError::InvalidDimension {
            op,
            dimension,
            rank,
        });
    }
    Ok(())
}

fn broadcast_binary(
    op: &'static str,
    operands: &[ValueType],
) -> Result<(DType, Shape), ShapeError> {
    let lhs = tensor_operand(op, operands, 0)?;
    let rhs = tensor_operand(op, operands, 1)?;
    if lhs.dtype != rhs.dtype {
        return Err(ShapeError::ElementTypeMismatch {
            op,
            lhs: lhs.dtype,
            rhs: rhs.dtype,
        });
    }
    let shape =
        broadcast_shapes(&lhs.shape, &rhs.shape).ok_or_else(|| ShapeError::NotBroadcastable {
            op,
            lhs: lhs.shape.dims().to_vec(),
            rhs: rhs.shape.dims().to_vec(),
        })?;
    Ok((lhs.dtype, shape))
}

fn infer_select(op: &'static str, operands: &[ValueType]) -> InferResult {
    expect_operands(op, operands, 3)?;
    let pred = tensor_operand(op, operands, 0)?;
    let on_true = tensor_operand(op, operands, 1)?;
    let on_false = tensor_operand(op, operands, 2)?;
    if pred.dtype != DType::Pred {
        return Err(ShapeError::UnsupportedElementType {
            op,
            dtype: pred.dtype,
        });
    }
    if on_true.dtype != on_false.dtype {
        return Err(ShapeError::ElementTypeMismatch {
            op,
            lhs: on_true.dtype,
            rhs: on_false.dtype,
        });
    }
    if on_true.shape != on_false.shape {
        return Err(ShapeError::NotBroadcastable {
            op,
            lhs: on_true.shape.dims().to_vec(),
            rhs: on_false.shape.dims().to_vec(),
        });
    }
    if pred.rank() != 0 && pred.shape != on_true.shape {
        return Err(ShapeError::NotBroadcastable {
            op,
            lhs: pred.shape.dims().to_vec(),
            rhs: on_true.shape.dims().to_vec(),
        });
    }
    Ok(vec![ValueType::Tensor(on_true.without_layout())])
}

fn infer_broadcast_in_dim(
    op: &'static str,
    spec: &BroadcastSpec,
    operands: &[ValueType],
) -> InferResult {
    expect_operands(op, operands, 1)?;
    let operand = tensor_operand(op, operands, 0)?;
    if spec.dimensions.len() != operand.rank() {
        return Err(ShapeError::RankMismatch {
            op,
            expected: spec.dimensions.len(),
            found: operand.rank(),
        });
    }
    let result_rank = spec.result_shape.rank();
    let mut previous: Option<usize> = None;
    for (operand_dim, result_dim) in spec.dimensions.iter().enumerate() {
        check_dimension(op, *result_dim, result_rank)?;
        if previous.is_some_and(|prev| prev >= *result_dim) {
            return Err(ShapeError::InvalidAttribute {
                op,
                detail: format!(
                    "broadcast dimensions {:?} must be strictly increasing",
                    spec.dimensions
                ),
            });
        }
        previous = Some(*result_dim);
        let from = operand.shape.dims()[operand_dim];
        let to = spec.result_shape.dims()[*result_dim];
        let compatible = match (from, to) {
            (Dimension::Static(1), _) => true,
            (Dimension::Static(a), Dimension::Static(b)) => a == b,
            _ => true,
        };
        if !compatible {
            return Err(ShapeError::NotBroadcastable {
                op,
                lhs: operand.shape.dims().to_vec(),
                rhs: spec.result_shape.dims().to_vec(),
            });
        }
    }
    Ok(vec![ValueType::tensor(operand.dtype, spec.result_shape.clone())])
}

fn infer_batch_matmul(op: &'static str, operands: &[ValueType]) -> InferResult {
    expect_operands(op, operands, 2)?;
    let lhs = tensor_operand(op, operands, 0)?;
    let rhs = tensor_operand(op, operands, 1)?;
    if lhs.dtype != rhs.dtype {
        return Err(ShapeError::ElementTypeMismatch {
            op,
            lhs: lhs.dtype,
            rhs: rhs.dtype,
        });
    }
    for spec in [lhs, rhs] {
        if spec.rank() < 2 {
            return Err(ShapeError::RankMismatch {
                op,
                expected: 2,
                found: spec.rank(),
            });
        }
    }
    let (l, r) = (lhs.shape.dims(), rhs.shape.dims());
    let (m, k_lhs) = (l[l.len() - 2], l[l.len() - 1]);
    let (k_rhs, n) = (r[r.len() - 2], r[r.len() - 1]);
    if let (Dimension::Static(a), Dimension::Static(b)) = (k_lhs, k_rhs) {
        if a != b {
            return Err(ShapeError::NotBroadcastable {
                op,
                lhs: l.to_vec(),
                rhs: r.to_vec(),
            });
        }
    }
    let lhs_batch = Shape::new(l[..l.len() - 2].to_vec());
    let rhs_batch = Shape::new(r[..r.len() - 2].to_vec());
    let batch =
        broadcast_shapes(&lhs_batch, &rhs_batch).ok_or_else(|| ShapeError::NotBroadcastable {
            op,
            lhs: l.to_vec(),
            rhs: r.to_vec(),
        })?;
    let mut dims = batch.into_dims();
    dims.push(m);
    dims.push(n);
    Ok(vec![ValueType::tensor(lhs.dtype, Shape::new(dims))])
}

fn infer_reduce(op: &'static str, spec: &ReduceSpec, operands: &[ValueType]) -> InferResult {
    if operands.is_empty() || operands.len() % 2 != 0 {
        return Err(ShapeError::OperandCount {
            op,
            expected: "an even, non-zero number of".to_string(),
            found: operands.len(),
        });
    }
    let count = operands.len() / 2;
    let first = tensor_operand(op, operands, 0)?;
    let rank = first.rank();
    for (idx, dimension) in spec.dimensions.iter().enumerate() {
        check_dimension(op, *dimension, rank)?;
        if spec.dimensions[..idx].contains(dimension) {
            return Err(ShapeError::InvalidAttribute {
                op,
                detail: format!("dimension {dimension} is reduced twice"),
            });
        }
    }

    let mut outputs = Vec::with_capacity(count);
    for idx in 0..count {
        let input = tensor_operand(op, operands, idx)?;
        let init = tensor_operand(op, operands, count + idx)?;
        if input.shape != first.shape {
            return Err(ShapeError::NotBroadcastable {
                op,
                lhs: first.shape.dims().to_vec(),
                rhs: input.shape.dims().to_vec(),
            });
        }
        if init.rank() != 0 {
            return Err(ShapeError::RankMismatch {
                op,
                expected: 0,
                found: init.rank(),
            });
        }
        if init.dtype != input.dtype {
            return Err(ShapeError::ElementTypeMismatch {
                op,
                lhs: input.dtype,
                rhs: init.dtype,
            });
        }
        let kept = input
            .shape
            .dims()
            .iter()
            .enumerate()
            .filter(|(dim, _)| !spec.dimensions.contains(dim))
            .map(|(_, extent)| *extent)
            .collect::<Vec<_>>();
        outputs.push(ValueType::tensor(input.dtype, Shape::new(kept)));
    }

    if count == 1 {
        Ok(outputs)
    } else {
        Ok(vec![ValueType::Tuple(outputs)])
    }
}

fn infer_replicate(
    op: &'static str,
    spec: &ReplicateSpec,
    operands: &[ValueType],
    regions: &[Vec<ValueType>],
) -> InferResult {
    if spec.n == 0 {
        return Err(ShapeError::InvalidAttribute {
            op,
            detail: "replica count must be positive".to_string(),
        });
    }
    if operands.len() % spec.n != 0 {
        return Err(ShapeError::OperandCount {
            op,
            expected: format!("a multiple of {}", spec.n),
            found: operands.len(),
        });
    }
    for (arg, group) in operands.chunks(spec.n).enumerate() {
        if let Some(mismatch) = group.iter().position(|ty| !ty.same_logical_type(&group[0])) {
            return Err(unexpected(op, arg * spec.n + mismatch, operands));
        }
    }
    let [yielded] = regions else {
        return Err(ShapeError::InvalidAttribute {
            op,
            detail: format!("expected one region, found {}", regions.len()),
        });
    };
    let mut results = Vec::with_capacity(yielded.len() * spec.n);
    for ty in yielded {
        results.extend(std::iter::repeat(ty.clone()).take(spec.n));
    }
    Ok(results)
}
