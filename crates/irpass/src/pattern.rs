use crate::error::IrError;
use crate::ir::{OpId, Operation};
use crate::rewriter::Rewriter;

/// Predicate used to restrict which operations a pattern should consider.
pub type OperationMatcher = fn(&Operation) -> bool;

/// Typed snapshot of an operation, extracted before a typed pattern runs.
pub trait OperationView: Clone {
    const MATCHER: OperationMatcher;
    fn extract(root: OpId, rewriter: &Rewriter) -> Option<Self>;
}

mod views;
pub use views::*;

/// Base trait for rewrite patterns.
///
/// `Ok(false)` is a match failure: the normal "does not apply" outcome. Errors are reserved
/// for failures the enclosing pass must surface.
pub trait Pattern: Send + Sync {
    fn matches_operation(&self, op: &Operation) -> bool {
        let _ = op;
        true
    }
    fn benefit(&self) -> u16 {
        1
    }
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
    fn match_and_rewrite(&self, root: OpId, rewriter: &mut Rewriter) -> Result<bool, IrError>;
}

/// Typed convenience trait over an [`OperationView`].
pub trait OpRewritePattern<T> {
    fn benefit(&self) -> u16 {
        1
    }
    fn may_match(&self, _op: &T, _rewriter: &Rewriter) -> bool {
        true
    }
    fn match_and_rewrite(&self, op: T, rewriter: &mut Rewriter) -> Result<bool, IrError>;
}

/// Adapter converting a typed pattern into a `Pattern`.
pub struct TypedPattern<P, T> {
    pattern: P,
    matcher: Option<OperationMatcher>,
    extractor: fn(OpId, &Rewriter) -> Option<T>,
}

impl<P, T> TypedPattern<P, T> {
    pub fn with_operation_matcher(
        pattern: P,
        matcher: OperationMatcher,
        extractor: fn(OpId, &Rewriter) -> Option<T>,
    ) -> Self {
        Self {
            pattern,
            matcher: Some(matcher),
            extractor,
        }
    }

    pub fn match_any(pattern: P, extractor: fn(OpId, &Rewriter) -> Option<T>) -> Self {
        Self {
            pattern,
            matcher: None,
            extractor,
        }
    }
}

impl<P, V> TypedPattern<P, V>
where
    V: OperationView,
{
    pub fn from_view(pattern: P) -> Self {
        Self::with_operation_matcher(pattern, V::MATCHER, V::extract)
    }
}

impl<P, T> Pattern for TypedPattern<P, T>
where
    P: OpRewritePattern<T> + Send + Sync,
    T: Send,
{
    fn matches_operation(&self, op: &Operation) -> bool {
        match self.matcher {
            Some(matcher) => matcher(op),
            None => true,
        }
    }

    fn benefit(&self) -> u16 {
        self.pattern.benefit()
    }

    fn name(&self) -> &'static str {
        std::any::type_name::<P>()
    }

    fn match_and_rewrite(&self, root: OpId, rewriter: &mut Rewriter) -> Result<bool, IrError> {
        let Some(view) = (self.extractor)(root, rewriter) else {
            return Ok(false);
        };
        if !self.pattern.may_match(&view, rewriter) {
            return Ok(false);
        }
        self.pattern.match_and_rewrite(view, rewriter)
    }
}

/// Mutable set that collects rewrite patterns prior to freezing.
pub struct PatternSet {
    patterns: Vec<Box<dyn Pattern>>,
}

impl PatternSet {
    pub fn new() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    pub fn add<P>(&mut self, pattern: P) -> &mut Self
    where
        P: Pattern + 'static,
    {
        self.patterns.push(Box::new(pattern));
        self
    }

    pub fn insert_view<V, P>(&mut self, pattern: P) -> &mut Self
    where
        V: OperationView + Send + 'static,
        P: OpRewritePattern<V> + Send + Sync + 'static,
    {
        self.add(TypedPattern::<P, V>::from_view(pattern))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Orders patterns by descending benefit. The sort is stable, so equal-benefit patterns
    /// keep their registration order and the first match wins.
    pub fn freeze(mut self) -> FrozenPatternSet {
        self.patterns
            .sort_by_key(|pattern| std::cmp::Reverse(pattern.benefit()));
        FrozenPatternSet {
            patterns: self.patterns,
        }
    }
}

impl Default for PatternSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable collection of rewrite patterns ready for use by the driver.
pub struct FrozenPatternSet {
    patterns: Vec<Box<dyn Pattern>>,
}

impl FrozenPatternSet {
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &dyn Pattern)> {
        self.patterns.iter().enumerate().map(|(idx, p)| (idx, &**p))
    }

    pub fn matching<'a>(
        &'a self,
        op: &'a Operation,
    ) -> impl Iterator<Item = (usize, &'a dyn Pattern)> + 'a {
        self.patterns
            .iter()
            .enumerate()
            .filter(move |(_, pattern)| pattern.matches_operation(op))
            .map(|(idx, pattern)| (idx, &**pattern))
    }
}

/// Common operation matchers.
pub mod filters {
    use crate::ir::{OpKind, OpTrait, Operation};

    pub const fn any(op: &Operation) -> bool {
        let _ = op;
        true
    }

    pub fn constant(op: &Operation) -> bool {
        matches!(op.kind, OpKind::Constant(_))
    }

    pub fn broadcast_in_dim(op: &Operation) -> bool {
        matches!(op.kind, OpKind::BroadcastInDim(_))
    }

    /// Two-operand ops whose result shape is the broadcast of the operand shapes.
    pub fn results_broadcastable_binary(op: &Operation) -> bool {
        op.operands.len() == 2
            && op.results.len() == 1
            && op.kind.has_trait(OpTrait::ResultsBroadcastable)
    }

    /// `compare` in `eq`/`ne` direction that errors on incompatible shapes.
    pub fn shape_checked_equality(op: &Operation) -> bool {
        matches!(&op.kind, OpKind::Compare(spec)
            if spec.direction.is_equality() && spec.incompatible_shape_error)
    }

    pub fn reduce(op: &Operation) -> bool {
        matches!(op.kind, OpKind::Reduce(_))
    }

    pub fn get_dimension_size(op: &Operation) -> bool {
        matches!(op.kind, OpKind::GetDimensionSize { .. })
    }

    pub fn side_effect_free(op: &Operation) -> bool {
        op.kind.has_trait(OpTrait::SideEffectFree)
    }
}
