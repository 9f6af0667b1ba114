use std::{fmt, sync::Arc};

use serde::{ser::SerializeStruct, Deserialize, Serialize};

/// Scalar element types carried by tensor values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    Pred,
    S8,
    S16,
    S32,
    S64,
    U8,
    U16,
    U32,
    U64,
    F16,
    Bf16,
    F32,
    F64,
}

impl DType {
    pub fn is_integer(self) -> bool {
        self.is_signed_integer() || self.is_unsigned_integer()
    }

    pub fn is_signed_integer(self) -> bool {
        matches!(self, DType::S8 | DType::S16 | DType::S32 | DType::S64)
    }

    pub fn is_unsigned_integer(self) -> bool {
        matches!(self, DType::U8 | DType::U16 | DType::U32 | DType::U64)
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::F16 | DType::Bf16 | DType::F32 | DType::F64)
    }

    /// Returns the size in bytes of a single element.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::Pred | DType::S8 | DType::U8 => 1,
            DType::S16 | DType::U16 | DType::F16 | DType::Bf16 => 2,
            DType::S32 | DType::U32 | DType::F32 => 4,
            DType::S64 | DType::U64 | DType::F64 => 8,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DType::Pred => "pred",
            DType::S8 => "s8",
            DType::S16 => "s16",
            DType::S32 => "s32",
            DType::S64 => "s64",
            DType::U8 => "u8",
            DType::U16 => "u16",
            DType::U32 => "u32",
            DType::U64 => "u64",
            DType::F16 => "f16",
            DType::Bf16 => "bf16",
            DType::F32 => "f32",
            DType::F64 => "f64",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single axis extent. `Dynamic` extents are unknown until run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dimension {
    Static(usize),
    Dynamic,
}

impl Dimension {
    pub fn as_static(self) -> Option<usize> {
        match self {
            Dimension::Static(value) => Some(value),
            Dimension::Dynamic => None,
        }
    }

    pub fn is_dynamic(self) -> bool {
        matches!(self, Dimension::Dynamic)
    }
}

impl From<usize> for Dimension {
    fn from(value: usize) -> Self {
        Dimension::Static(value)
    }
}

/// Logical tensor shape as an ordered list of dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Shape {
    dims: Vec<Dimension>,
}

impl Shape {
    pub fn new(dims: impl Into<Vec<Dimension>>) -> Self {
        Self { dims: dims.into() }
    }

    pub fn scalar() -> Self {
        Self { dims: Vec::new() }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[Dimension] {
        &self.dims
    }

    pub fn dim(&self, index: usize) -> Option<Dimension> {
        self.dims.get(index).copied()
    }

    pub fn into_dims(self) -> Vec<Dimension> {
        self.dims
    }

    pub fn is_static(&self) -> bool {
        self.dims.iter().all(|dim| !dim.is_dynamic())
    }

    /// Returns static dimensions when all dims are static.
    pub fn static_dims(&self) -> Option<Vec<usize>> {
        self.dims.iter().map(|dim| dim.as_static()).collect()
    }

    /// Returns element count when all dims are static.
    pub fn element_count(&self) -> Option<usize> {
        let mut count = 1usize;
        for dim in self.static_dims()? {
            count = count.checked_mul(dim)?;
        }
        Some(count)
    }

    /// `true` when `self` is at least as static as `other` and agrees with it wherever
    /// `other` is static.
    pub fn refines(&self, other: &Shape) -> bool {
        self.rank() == other.rank()
            && self
                .dims
                .iter()
                .zip(other.dims.iter())
                .all(|(mine, theirs)| match (mine, theirs) {
                    (_, Dimension::Dynamic) => true,
                    (Dimension::Static(a), Dimension::Static(b)) => a == b,
                    (Dimension::Dynamic, Dimension::Static(_)) => false,
                })
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::new(dims.iter().copied().map(Dimension::Static).collect::<Vec<_>>())
    }
}

/// Physical dimension ordering, listed from the most minor dimension to the most major.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Layout {
    pub minor_to_major: Vec<usize>,
}

impl Layout {
    pub fn new(minor_to_major: impl Into<Vec<usize>>) -> Self {
        Self {
            minor_to_major: minor_to_major.into(),
        }
    }

    /// Descending row-major layout `{rank-1, ..., 1, 0}`.
    pub fn natural(rank: usize) -> Self {
        Self {
            minor_to_major: (0..rank).rev().collect(),
        }
    }

    pub fn is_natural(&self) -> bool {
        let rank = self.minor_to_major.len();
        self.minor_to_major
            .iter()
            .enumerate()
            .all(|(idx, dim)| *dim == rank - 1 - idx)
    }

    /// `true` when the layout is a permutation of `0..rank`.
    pub fn is_valid_for_rank(&self, rank: usize) -> bool {
        if self.minor_to_major.len() != rank {
            return false;
        }
        let mut seen = vec![false; rank];
        for dim in &self.minor_to_major {
            match seen.get_mut(*dim) {
                Some(flag) if !*flag => *flag = true,
                _ => return false,
            }
        }
        true
    }
}

/// Tensor metadata coupling dtype, shape and an optional physical layout.
///
/// A `None` layout stands for the natural layout of the shape's rank.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorSpec {
    pub dtype: DType,
    pub shape: Shape,
    #[serde(default)]
    pub layout: Option<Layout>,
}

impl TensorSpec {
    pub fn new(dtype: DType, shape: Shape) -> Self {
        Self {
            dtype,
            shape,
            layout: None,
        }
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    /// Layout after resolving the implicit natural default.
    pub fn effective_layout(&self) -> Layout {
        self.layout
            .clone()
            .unwrap_or_else(|| Layout::natural(self.shape.rank()))
    }

    pub fn has_natural_layout(&self) -> bool {
        self.layout.as_ref().map_or(true, Layout::is_natural)
    }

    /// Same spec with the implicit natural layout.
    pub fn without_layout(&self) -> TensorSpec {
        TensorSpec::new(self.dtype, self.shape.clone())
    }

    pub fn element_count(&self) -> Option<usize> {
        self.shape.element_count()
    }

    pub fn byte_len(&self) -> Option<usize> {
        self.element_count()?.checked_mul(self.dtype.size_in_bytes())
    }
}

/// Typing information for SSA values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Tensor(TensorSpec),
    Tuple(Vec<ValueType>),
    /// Handle to a mutable variable holding a tensor of the given spec.
    Resource(TensorSpec),
}

impl ValueType {
    pub fn tensor(dtype: DType, shape: Shape) -> Self {
        ValueType::Tensor(TensorSpec::new(dtype, shape))
    }

    pub fn as_tensor(&self) -> Option<&TensorSpec> {
        match self {
            ValueType::Tensor(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[ValueType]> {
        match self {
            ValueType::Tuple(elements) => Some(elements),
            _ => None,
        }
    }

    /// `true` when every tensor shape reachable from this type is fully static.
    pub fn is_static(&self) -> bool {
        match self {
            ValueType::Tensor(spec) | ValueType::Resource(spec) => spec.shape.is_static(),
            ValueType::Tuple(elements) => elements.iter().all(ValueType::is_static),
        }
    }

    /// Structural equality that ignores physical layouts.
    pub fn same_logical_type(&self, other: &ValueType) -> bool {
        match (self, other) {
            (ValueType::Tensor(a), ValueType::Tensor(b))
            | (ValueType::Resource(a), ValueType::Resource(b)) => {
                a.dtype == b.dtype && a.shape == b.shape
            }
            (ValueType::Tuple(a), ValueType::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_logical_type(y))
            }
            _ => false,
        }
    }

    /// `true` when `self` carries at least as much static information as `other` and never
    /// contradicts it. Layouts are ignored.
    pub fn refines(&self, other: &ValueType) -> bool {
        match (self, other) {
            (ValueType::Tensor(a), ValueType::Tensor(b))
            | (ValueType::Resource(a), ValueType::Resource(b)) => {
                a.dtype == b.dtype && a.shape.refines(&b.shape)
            }
            (ValueType::Tuple(a), ValueType::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.refines(y))
            }
            _ => false,
        }
    }
}

/// Dense literal tensor payload stored as little-endian bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorLiteral {
    pub spec: TensorSpec,
    pub bytes: Arc<[u8]>,
}

impl TensorLiteral {
    pub fn new(spec: TensorSpec, bytes: Arc<[u8]>) -> Self {
        Self { spec, bytes }
    }

    /// Rank-0 `s32` literal.
    pub fn scalar_s32(value: i32) -> Self {
        Self {
            spec: TensorSpec::new(DType::S32, Shape::scalar()),
            bytes: Arc::from(value.to_le_bytes().to_vec()),
        }
    }

    /// Rank-0 `f32` literal.
    pub fn scalar_f32(value: f32) -> Self {
        Self {
            spec: TensorSpec::new(DType::F32, Shape::scalar()),
            bytes: Arc::from(value.to_le_bytes().to_vec()),
        }
    }

    /// Reads the literal back as a scalar `s32`, if that is what it holds.
    pub fn as_scalar_s32(&self) -> Option<i32> {
        if self.spec.dtype != DType::S32 || self.spec.shape.rank() != 0 {
            return None;
        }
        let bytes: [u8; 4] = self.bytes.as_ref().try_into().ok()?;
        Some(i32::from_le_bytes(bytes))
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }
}

impl Serialize for TensorLiteral {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("TensorLiteral", 2)?;
        state.serialize_field("spec", &self.spec)?;
        state.serialize_field("bytes", &self.bytes.as_ref())?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for TensorLiteral {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct TensorLiteralHelper {
            spec: TensorSpec,
            bytes: Vec<u8>,
        }

        let helper = TensorLiteralHelper::deserialize(deserializer)?;
        Ok(TensorLiteral {
            spec: helper.spec,
            bytes: Arc::<[u8]>::from(helper.bytes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn natural_layout_is_descending() {
        assert_eq!(Layout::natural(3).minor_to_major, vec![2, 1, 0]);
        assert!(Layout::new(vec![1, 0]).is_natural());
        assert!(!Layout::new(vec![0, 1]).is_natural());
        assert!(Layout::natural(0).is_natural());
    }

    #[test]
    fn layout_validity_requires_permutation() {
        assert!(Layout::new(vec![0, 2, 1]).is_valid_for_rank(3));
        assert!(!Layout::new(vec![0, 0, 1]).is_valid_for_rank(3));
        assert!(!Layout::new(vec![0, 1]).is_valid_for_rank(3));
    }

    #[test]
    fn shape_refinement_only_adds_static_information() {
        let dynamic = Shape::new(vec![Dimension::Static(2), Dimension::Dynamic]);
        let refined = Shape::from(&[2usize, 7][..]);
        assert!(refined.refines(&dynamic));
        assert!(!dynamic.refines(&refined));
        assert!(!Shape::from(&[3usize, 7][..]).refines(&dynamic));
    }

    #[test]
    fn scalar_s32_literal_roundtrips() {
        let literal = TensorLiteral::scalar_s32(-17);
        assert_eq!(literal.as_scalar_s32(), Some(-17));
        assert_eq!(TensorLiteral::scalar_f32(1.0).as_scalar_s32(), None);
    }
}
