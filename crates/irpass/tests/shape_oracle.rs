use std::collections::BTreeMap;

use irpass::ir::{
    BinaryOp, BroadcastSpec, CompareSpec, ComparisonDirection, DType, Dimension, ReduceSpec,
    ReplicateSpec, Shape, UnaryOp,
};
use irpass::ir_utils::{shape_mixed, tensor_spec_static, tensor_type_static};
use irpass::shape_inference::infer_result_types;
use irpass::{OpKind, ShapeError, ValueType};

fn f32s(dims: &[usize]) -> ValueType {
    tensor_type_static(DType::F32, dims)
}

fn s32_scalar() -> ValueType {
    tensor_type_static(DType::S32, &[])
}

fn compare(direction: ComparisonDirection, incompatible_shape_error: bool) -> OpKind {
    OpKind::Compare(CompareSpec {
        direction,
        incompatible_shape_error,
    })
}

fn reduce(dimensions: Vec<usize>) -> OpKind {
    OpKind::Reduce(ReduceSpec {
        dimensions,
        to_apply: "sum".to_string(),
    })
}

fn infer(kind: OpKind, operands: &[ValueType]) -> Result<Vec<ValueType>, ShapeError> {
    infer_result_types(&kind, operands, &[])
}

#[test]
fn binary_ops_broadcast_and_check_operands() {
    let add = OpKind::Binary(BinaryOp::Add);
    assert_eq!(
        infer(add.clone(), &[f32s(&[3, 1]), f32s(&[4])]),
        Ok(vec![f32s(&[3, 4])])
    );
    assert!(matches!(
        infer(add.clone(), &[f32s(&[3])]),
        Err(ShapeError::OperandCount { op: "add", found: 1, .. })
    ));
    assert!(matches!(
        infer(add.clone(), &[f32s(&[3]), tensor_type_static(DType::S32, &[3])]),
        Err(ShapeError::ElementTypeMismatch { .. })
    ));
    assert!(matches!(
        infer(add, &[f32s(&[3]), f32s(&[4])]),
        Err(ShapeError::NotBroadcastable { .. })
    ));
}

#[test]
fn transcendental_unary_ops_need_floats() {
    let ints = tensor_type_static(DType::S32, &[2]);
    assert!(matches!(
        infer(OpKind::Unary(UnaryOp::Exp), &[ints.clone()]),
        Err(ShapeError::UnsupportedElementType { dtype: DType::S32, .. })
    ));
    assert_eq!(infer(OpKind::Unary(UnaryOp::Neg), &[ints.clone()]), Ok(vec![ints]));
}

#[test]
fn unequal_equality_compare_degrades_to_a_scalar() {
    let operands = [f32s(&[3]), f32s(&[4])];
    assert_eq!(
        infer(compare(ComparisonDirection::Eq, false), &operands),
        Ok(vec![tensor_type_static(DType::Pred, &[])])
    );
    assert!(infer(compare(ComparisonDirection::Eq, true), &operands).is_err());
    assert!(infer(compare(ComparisonDirection::Lt, false), &operands).is_err());
    assert_eq!(
        infer(
            compare(ComparisonDirection::Ne, true),
            &[f32s(&[2, 1]), f32s(&[3])]
        ),
        Ok(vec![tensor_type_static(DType::Pred, &[2, 3])])
    );
}

#[test]
fn batch_matmul_broadcasts_batch_dimensions() {
    assert_eq!(
        infer(OpKind::BatchMatMul, &[f32s(&[3, 2, 5]), f32s(&[5, 7])]),
        Ok(vec![f32s(&[3, 2, 7])])
    );
    assert!(matches!(
        infer(OpKind::BatchMatMul, &[f32s(&[2, 5]), f32s(&[4, 7])]),
        Err(ShapeError::NotBroadcastable { .. })
    ));
    assert!(matches!(
        infer(OpKind::BatchMatMul, &[f32s(&[5]), f32s(&[5, 7])]),
        Err(ShapeError::RankMismatch { expected: 2, found: 1, .. })
    ));
}

#[test]
fn broadcast_in_dim_validates_its_mapping() {
    let kind = |dims: Vec<usize>| {
        OpKind::BroadcastInDim(BroadcastSpec {
            result_shape: Shape::from(&[3usize, 2, 2][..]),
            dimensions: dims,
        })
    };
    assert_eq!(infer(kind(vec![1, 2]), &[f32s(&[2, 2])]), Ok(vec![f32s(&[3, 2, 2])]));
    assert!(matches!(
        infer(kind(vec![2, 1]), &[f32s(&[2, 2])]),
        Err(ShapeError::InvalidAttribute { .. })
    ));
    assert!(matches!(
        infer(kind(vec![1]), &[f32s(&[2, 2])]),
        Err(ShapeError::RankMismatch { .. })
    ));
    assert!(matches!(
        infer(kind(vec![0, 1]), &[f32s(&[2, 2])]),
        Err(ShapeError::NotBroadcastable { .. })
    ));
}

#[test]
fn reduce_drops_dimensions_and_tuples_variadic_results() {
    let f32_scalar = f32s(&[]);
    assert_eq!(
        infer(reduce(vec![1]), &[f32s(&[5, 3, 4]), f32_scalar.clone()]),
        Ok(vec![f32s(&[5, 4])])
    );

    let ints = tensor_type_static(DType::S32, &[5, 3]);
    assert_eq!(
        infer(
            reduce(vec![0]),
            &[f32s(&[5, 3]), ints, f32_scalar.clone(), s32_scalar()]
        ),
        Ok(vec![ValueType::Tuple(vec![
            f32s(&[3]),
            tensor_type_static(DType::S32, &[3]),
        ])])
    );

    assert!(matches!(
        infer(reduce(vec![1, 1]), &[f32s(&[5, 3]), f32_scalar.clone()]),
        Err(ShapeError::InvalidAttribute { .. })
    ));
    assert!(matches!(
        infer(reduce(vec![2]), &[f32s(&[5, 3]), f32_scalar]),
        Err(ShapeError::InvalidDimension { dimension: 2, rank: 2, .. })
    ));
    assert!(matches!(
        infer(reduce(vec![0]), &[f32s(&[5, 3]), s32_scalar()]),
        Err(ShapeError::ElementTypeMismatch { .. })
    ));
}

#[test]
fn dimension_size_ops() {
    assert_eq!(
        infer(OpKind::GetDimensionSize { dimension: 1 }, &[f32s(&[5, 3])]),
        Ok(vec![s32_scalar()])
    );
    assert!(matches!(
        infer(OpKind::GetDimensionSize { dimension: 2 }, &[f32s(&[5, 3])]),
        Err(ShapeError::InvalidDimension { .. })
    ));
    assert_eq!(
        infer(
            OpKind::SetDimensionSize { dimension: 0 },
            &[f32s(&[5, 3]), s32_scalar()]
        ),
        Ok(vec![ValueType::tensor(DType::F32, shape_mixed(&[None, Some(3)]))])
    );
    assert!(matches!(
        infer(
            OpKind::SetDimensionSize { dimension: 0 },
            &[f32s(&[5, 3]), tensor_type_static(DType::S64, &[])]
        ),
        Err(ShapeError::UnexpectedType { index: 1, .. })
    ));
}

#[test]
fn shape_queries_and_variables() {
    let resource = ValueType::Resource(tensor_spec_static(DType::F32, &[2, 3]));
    assert_eq!(
        infer(OpKind::Shape, &[f32s(&[2, 3, 4])]),
        Ok(vec![tensor_type_static(DType::S32, &[3])])
    );
    assert_eq!(
        infer(OpKind::ReadVariable, &[resource.clone()]),
        Ok(vec![f32s(&[2, 3])])
    );
    assert_eq!(
        infer(OpKind::VariableShape, &[resource]),
        Ok(vec![tensor_type_static(DType::S32, &[2])])
    );
    assert!(matches!(
        infer(OpKind::ReadVariable, &[f32s(&[2])]),
        Err(ShapeError::UnexpectedType { index: 0, .. })
    ));
}

#[test]
fn tuple_access_is_bounds_checked() {
    let tuple = ValueType::Tuple(vec![f32s(&[2]), s32_scalar()]);
    assert_eq!(
        infer(OpKind::GetTupleElement { index: 1 }, &[tuple.clone()]),
        Ok(vec![s32_scalar()])
    );
    assert!(matches!(
        infer(OpKind::GetTupleElement { index: 2 }, &[tuple]),
        Err(ShapeError::InvalidDimension { .. })
    ));
}

#[test]
fn replicate_results_repeat_per_replica() {
    let kind = |n: usize| {
        OpKind::Replicate(ReplicateSpec {
            n,
            devices: BTreeMap::new(),
        })
    };
    let regions = vec![vec![f32s(&[4]), s32_scalar()]];
    assert_eq!(
        infer_result_types(&kind(2), &[f32s(&[4]), f32s(&[4])], &regions),
        Ok(vec![f32s(&[4]), f32s(&[4]), s32_scalar(), s32_scalar()])
    );
    assert!(matches!(
        infer_result_types(&kind(2), &[f32s(&[4]), f32s(&[3])], &regions),
        Err(ShapeError::UnexpectedType { index: 1, .. })
    ));
    assert!(matches!(
        infer_result_types(&kind(0), &[], &regions),
        Err(ShapeError::InvalidAttribute { .. })
    ));
}

#[test]
fn dynamic_extents_pair_with_static_ones() {
    let dynamic = ValueType::tensor(DType::F32, shape_mixed(&[None, Some(4)]));
    let result = infer(OpKind::Binary(BinaryOp::Mul), &[dynamic, f32s(&[3, 1])])
        .expect("compatible shapes");
    let spec = result[0].as_tensor().expect("tensor");
    assert_eq!(spec.shape.dims(), &[Dimension::Static(3), Dimension::Static(4)]);
}
