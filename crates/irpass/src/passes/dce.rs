use std::collections::HashSet;

use crate::error::IrError;
use crate::ir::{Computation, Module, OpId, OpTrait};
use crate::pass::{for_each_computation, Pass, PassContext, PassResult};
use crate::rewriter::Rewriter;

#[derive(Debug, Default, Clone, Copy)]
pub struct DeadCodeEliminationPass;

impl DeadCodeEliminationPass {
    pub const NAME: &'static str = "dce";
}

impl Pass for DeadCodeEliminationPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "erase side-effect-free ops whose results never reach a terminator"
    }

    fn run(&self, module: &mut Module, _cx: &mut PassContext) -> Result<PassResult, IrError> {
        for_each_computation(module, |computation| {
            let live = live_ops(computation);
            let order = computation.walk_preorder();
            let mut rewriter = Rewriter::new(computation);
            for op in order.into_iter().rev() {
                if live.contains(&op) || !rewriter.contains(op) {
                    continue;
                }
                rewriter.erase_if_unused(op);
            }
            let removed = rewriter.erased_ops();
            if removed > 0 {
                tracing::debug!(
                    computation = rewriter.computation().name(),
                    removed,
                    "dead code eliminated"
                );
            }
            Ok(PassResult {
                changed: removed > 0,
                erased_ops: removed,
                ..PassResult::default()
            })
        })
    }
}

/// Ops reachable from a terminator or a side-effecting op through operands.
///
/// Region terminators are roots too, so dead ops inside a live region still go away.
fn live_ops(computation: &Computation) -> HashSet<OpId> {
    let mut worklist: Vec<OpId> = computation
        .walk_preorder()
        .into_iter()
        .filter(|op| is_root(computation, *op))
        .collect();

    let mut live = HashSet::new();
    while let Some(op) = worklist.pop() {
        if !live.insert(op) {
            continue;
        }
        let operation = computation.op(op);
        for operand in &operation.operands {
            if let Some(producer) = computation.defining_op(*operand) {
                worklist.push(producer);
            }
        }
        // Region contents keep their owner alive.
        if let Some(owner) = computation.block(operation.parent()).parent {
            worklist.push(owner);
        }
    }
    live
}

fn is_root(computation: &Computation, op: OpId) -> bool {
    let kind = &computation.op(op).kind;
    kind.is_terminator() || !kind.has_trait(OpTrait::SideEffectFree)
}
