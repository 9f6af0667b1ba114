//! Concrete rewrite passes.

mod broadcast_canonicalization;
mod broadcast_fold;
mod dce;
mod dimension_size;
mod reduce_decomposer;
mod replicate_hoisting;
mod shape_inference;

pub use broadcast_canonicalization::{
    BroadcastCanonicalizationPass, CollapseBroadcastChain, EliminateIdentityBroadcast,
};
pub use broadcast_fold::{
    BroadcastFoldPass, FoldBroadcastIntoEqualityCompare, FoldBroadcastOperands,
};
pub use dce::DeadCodeEliminationPass;
pub use dimension_size::{rewrite_with_inference, DimensionSizeRewriterPass};
pub use reduce_decomposer::{CustomLayoutAllowed, DecomposeReduceLayout, ReduceDecomposerPass};
pub use replicate_hoisting::ReplicateInvariantHoistingPass;
pub use shape_inference::ShapeInferencePass;
