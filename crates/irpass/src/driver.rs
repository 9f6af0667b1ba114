use std::collections::{HashMap, VecDeque};

use crate::error::IrError;
use crate::ir::{Computation, OpId, OpTrait};
use crate::pattern::FrozenPatternSet;
use crate::rewriter::Rewriter;

#[derive(Debug, Clone)]
pub struct GreedyConfig {
    /// Upper bound on successful rewrites in a single driver invocation.
    pub max_iterations: usize,
    /// Erase trivially dead ops once the worklist drains.
    pub enable_dce: bool,
}

impl Default for GreedyConfig {
    fn default() -> Self {
        Self {
            max_iterations: usize::MAX,
            enable_dce: true,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GreedyRewriteStats {
    pub iterations: usize,
    pub applied: usize,
    pub dce_removed: usize,
    /// Every op erased while the driver ran, by patterns or DCE.
    pub erased: usize,
}

impl GreedyRewriteStats {
    pub fn changed(&self) -> bool {
        self.applied > 0 || self.dce_removed > 0
    }
}

/// Applies `patterns` to every op of `computation` until none of them matches.
///
/// Ops are visited from a worklist seeded in pre-order; after each successful rewrite the
/// worklist is reseeded. A `(pattern, op)` pair that failed is skipped until the op's
/// version changes.
pub fn apply_patterns_greedily(
    computation: &mut Computation,
    patterns: &FrozenPatternSet,
    cfg: &GreedyConfig,
) -> Result<GreedyRewriteStats, IrError> {
    if patterns.is_empty() {
        return Ok(GreedyRewriteStats::default());
    }

    let mut rewriter = Rewriter::new(computation);
    let mut worklist = VecDeque::new();
    seed_worklist(&rewriter, &mut worklist);

    let mut failure_cache: HashMap<(usize, OpId), u32> = HashMap::new();
    let mut stats = GreedyRewriteStats::default();

    while let Some(op) = worklist.pop_front() {
        if stats.iterations >= cfg.max_iterations {
            tracing::debug!(
                computation = rewriter.computation().name(),
                max_iterations = cfg.max_iterations,
                "greedy driver hit its iteration cap"
            );
            break;
        }
        if !rewriter.contains(op) {
            continue;
        }

        let version = rewriter.version(op);
        let op_snapshot = rewriter.op(op).clone();

        for (idx, pattern) in patterns.matching(&op_snapshot) {
            if failure_cache.get(&(idx, op)).copied() == Some(version) {
                continue;
            }
            tracing::trace!(pattern = pattern.name(), op = op.0, "trying pattern");

            if pattern.match_and_rewrite(op, &mut rewriter)? {
                tracing::debug!(
                    pattern = pattern.name(),
                    op = op.0,
                    opcode = op_snapshot.kind.name(),
                    "pattern applied"
                );
                stats.applied += 1;
                stats.iterations = stats.iterations.saturating_add(1);
                clear_failure_entries(op, &mut failure_cache);
                seed_worklist(&rewriter, &mut worklist);
                break;
            }
            failure_cache.insert((idx, op), version);
        }
    }

    if cfg.enable_dce {
        stats.dce_removed = run_trivial_dce(&mut rewriter);
    }
    stats.erased = rewriter.erased_ops();
    Ok(stats)
}

fn seed_worklist(rewriter: &Rewriter, worklist: &mut VecDeque<OpId>) {
    worklist.clear();
    worklist.extend(rewriter.ops_in_order());
}

fn clear_failure_entries(op: OpId, cache: &mut HashMap<(usize, OpId), u32>) {
    cache.retain(|(_, cached_op), _| *cached_op != op);
}

/// Erases side-effect-free ops without uses, repeating until nothing changes.
pub(crate) fn run_trivial_dce(rewriter: &mut Rewriter) -> usize {
    let mut removed_total = 0;
    loop {
        let mut removed_in_pass = 0;
        for op in rewriter.ops_in_order().into_iter().rev() {
            if !rewriter.contains(op) || !is_trivially_removable(rewriter, op) {
                continue;
            }
            if rewriter.erase_if_unused(op) {
                removed_in_pass += 1;
            }
        }
        if removed_in_pass == 0 {
            break;
        }
        removed_total += removed_in_pass;
    }
    removed_total
}

fn is_trivially_removable(rewriter: &Rewriter, op: OpId) -> bool {
    let kind = &rewriter.op(op).kind;
    kind.has_trait(OpTrait::SideEffectFree) && !kind.is_terminator()
}
