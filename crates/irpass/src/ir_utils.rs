//! Shorthand constructors for shapes, specs and literals.

use std::sync::Arc;

use crate::ir::{DType, Dimension, Layout, Shape, TensorLiteral, TensorSpec, ValueType};

/// Fully static shape from explicit extents.
pub fn shape_static(dims: &[usize]) -> Shape {
    Shape::from(dims)
}

/// Shape where `None` marks an extent unknown until run time.
pub fn shape_mixed(dims: &[Option<usize>]) -> Shape {
    Shape::new(
        dims.iter()
            .map(|dim| match dim {
                Some(value) => Dimension::Static(*value),
                None => Dimension::Dynamic,
            })
            .collect::<Vec<_>>(),
    )
}

pub fn tensor_spec_static(dtype: DType, dims: &[usize]) -> TensorSpec {
    TensorSpec::new(dtype, shape_static(dims))
}

pub fn tensor_spec_mixed(dtype: DType, dims: &[Option<usize>]) -> TensorSpec {
    TensorSpec::new(dtype, shape_mixed(dims))
}

/// Static tensor type with an explicit `minor_to_major` layout.
pub fn tensor_type_with_layout(
    dtype: DType,
    dims: &[usize],
    minor_to_major: &[usize],
) -> ValueType {
    ValueType::Tensor(tensor_spec_static(dtype, dims).with_layout(Layout::new(minor_to_major)))
}

pub fn value_type_tensor(spec: TensorSpec) -> ValueType {
    ValueType::Tensor(spec)
}

pub fn tensor_type_static(dtype: DType, dims: &[usize]) -> ValueType {
    ValueType::Tensor(tensor_spec_static(dtype, dims))
}

/// Zero-filled literal for a fully static tensor, `None` when any extent is unknown.
pub fn tensor_literal_zeros(spec: TensorSpec) -> Option<TensorLiteral> {
    let byte_len = spec.byte_len()?;
    Some(TensorLiteral::new(spec, Arc::<[u8]>::from(vec![0u8; byte_len])))
}
