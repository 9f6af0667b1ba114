//! Structural verifier.
//!
//! Checks terminators, region ownership, dominance of every operand and exactness of the
//! use-lists. Violations are reported as located diagnostics on the offending operation.

use std::collections::HashMap;

use super::computation::{BlockId, Computation, OpId, ValueDef, ValueId};
use super::module::Module;
use super::ops::OpKind;
use crate::error::{Diagnostic, IrError};

pub fn verify_module(module: &Module) -> Result<(), IrError> {
    for computation in module.computations() {
        verify_computation(computation)?;
    }
    Ok(())
}

pub fn verify_computation(computation: &Computation) -> Result<(), IrError> {
    verify_handles(computation)?;
    let blocks: Vec<BlockId> = computation.block_ids().collect();
    for block in &blocks {
        verify_block(computation, *block)?;
    }
    for op in computation.walk_preorder() {
        verify_op(computation, op)?;
    }
    verify_use_lists(computation)
}

fn violation(computation: &Computation, op: OpId, message: impl Into<String>) -> IrError {
    IrError::StructuralInvariant(Diagnostic::at(computation, op, message))
}

fn dangling(computation: &Computation, message: String) -> IrError {
    IrError::StructuralInvariant(Diagnostic::on_computation(computation, message))
}

/// Every handle stored in the arena must name a live entity, and region nesting must be a
/// tree rooted at the entry block. The walks below rely on both.
fn verify_handles(computation: &Computation) -> Result<(), IrError> {
    match computation.try_block(Computation::ENTRY) {
        Some(entry) if entry.parent.is_none() => {}
        Some(_) => return Err(dangling(computation, "entry block has an owner".to_string())),
        None => return Err(dangling(computation, "entry block is missing".to_string())),
    }

    for value in computation.value_ids() {
        let live = match computation.value(value).def {
            ValueDef::OpResult { op, index } => computation
                .try_op(op)
                .is_some_and(|owner| owner.results.get(index) == Some(&value)),
            ValueDef::BlockArg { block, index } => computation
                .try_block(block)
                .is_some_and(|owner| owner.args.get(index) == Some(&value)),
        };
        if !live {
            return Err(dangling(
                computation,
                format!("value %{} has a dangling definition", value.0),
            ));
        }
    }

    for block in computation.block_ids() {
        let data = computation.block(block);
        if let Some(arg) = data.args.iter().find(|arg| !computation.contains_value(**arg)) {
            return Err(dangling(
                computation,
                format!("block ^{} lists erased argument %{}", block.0, arg.0),
            ));
        }
        if let Some(owner) = data.parent {
            let owns = computation
                .try_op(owner)
                .is_some_and(|op| op.regions.contains(&block));
            if !owns {
                return Err(dangling(
                    computation,
                    format!("block ^{} claims op#{} as owner", block.0, owner.0),
                ));
            }
        }
    }

    for op in computation.op_ids() {
        let operation = computation.op(op);
        let linked = computation
            .try_block(operation.parent())
            .is_some_and(|block| block.ops.contains(&op));
        if !linked {
            return Err(violation(computation, op, "op is not linked into its parent block"));
        }
        if let Some(region) = operation
            .regions
            .iter()
            .find(|region| computation.try_block(**region).and_then(|b| b.parent) != Some(op))
        {
            return Err(violation(
                computation,
                op,
                format!("region ^{} is not owned by this op", region.0),
            ));
        }
        if let Some(value) = operation
            .operands
            .iter()
            .chain(&operation.results)
            .find(|value| !computation.contains_value(**value))
        {
            return Err(violation(
                computation,
                op,
                format!("references erased value %{}", value.0),
            ));
        }
    }

    // Climbing from any block must reach the entry within as many steps as there are blocks.
    let limit = computation.block_ids().count();
    for block in computation.block_ids() {
        let mut current = block;
        let mut steps = 0;
        while let Some(owner) = computation.block(current).parent {
            current = computation.op(owner).parent();
            steps += 1;
            if steps > limit {
                return Err(dangling(
                    computation,
                    format!("region ^{} is nested inside itself", block.0),
                ));
            }
        }
        if current != Computation::ENTRY {
            return Err(dangling(
                computation,
                format!("block ^{} is detached from the body", block.0),
            ));
        }
    }
    Ok(())
}

fn verify_block(computation: &Computation, block: BlockId) -> Result<(), IrError> {
    let data = computation.block(block);
    let Some(last) = data.ops.last().copied() else {
        let message = format!("block ^{} has no terminator", block.0);
        return Err(match data.parent {
            Some(owner) => violation(computation, owner, message),
            None => IrError::StructuralInvariant(Diagnostic::on_computation(computation, message)),
        });
    };

    for (index, op) in data.ops.iter().enumerate() {
        let operation = computation
            .try_op(*op)
            .ok_or_else(|| {
                IrError::StructuralInvariant(Diagnostic::on_computation(
                    computation,
                    format!("block ^{} links erased op#{}", block.0, op.0),
                ))
            })?;
        if operation.parent() != block {
            return Err(violation(computation, *op, "parent block does not list the op"));
        }
        let is_last = index + 1 == data.ops.len();
        if operation.kind.is_terminator() != is_last {
            let message = if is_last {
                "block does not end with a terminator"
            } else {
                "terminator in the middle of a block"
            };
            return Err(violation(computation, *op, message));
        }
    }

    let terminator = &computation.op(last).kind;
    match (data.parent, terminator) {
        (None, OpKind::Return) | (Some(_), OpKind::Yield) => Ok(()),
        (None, _) => Err(violation(computation, last, "body must end with return")),
        (Some(_), _) => Err(violation(computation, last, "region must end with yield")),
    }
}

fn verify_op(computation: &Computation, op: OpId) -> Result<(), IrError> {
    let operation = computation.op(op);
    for (slot, operand) in operation.operands.iter().enumerate() {
        if !computation.contains_value(*operand) {
            return Err(violation(
                computation,
                op,
                format!("operand {slot} references erased value %{}", operand.0),
            ));
        }
        if !computation.dominates(*operand, op) {
            return Err(violation(
                computation,
                op,
                format!("operand {slot} (%{}) does not dominate its use", operand.0),
            ));
        }
    }

    for (index, result) in operation.results.iter().enumerate() {
        let def = computation.try_value(*result).map(|data| data.def);
        if def != Some(ValueDef::OpResult { op, index }) {
            return Err(violation(
                computation,
                op,
                format!("result {index} (%{}) is not defined by this op", result.0),
            ));
        }
    }

    if operation.regions.len() != operation.kind.num_regions() {
        return Err(violation(
            computation,
            op,
            format!(
                "expected {} regions, found {}",
                operation.kind.num_regions(),
                operation.regions.len()
            ),
        ));
    }
    if let OpKind::Replicate(spec) = &operation.kind {
        let region = operation.regions[0];
        let args = computation.block(region).args.len();
        if operation.operands.len() != args * spec.n {
            return Err(violation(
                computation,
                op,
                format!(
                    "replicate with {args} region arguments and n = {} takes {} operands, found {}",
                    spec.n,
                    args * spec.n,
                    operation.operands.len()
                ),
            ));
        }
        let yielded = computation
            .terminator(region)
            .map(|term| computation.op(term).operands.len())
            .unwrap_or(0);
        if operation.results.len() != yielded * spec.n {
            return Err(violation(
                computation,
                op,
                format!(
                    "replicate yields {yielded} values and must return {}, found {}",
                    yielded * spec.n,
                    operation.results.len()
                ),
            ));
        }
    }
    Ok(())
}

fn verify_use_lists(computation: &Computation) -> Result<(), IrError> {
    let mut expected: HashMap<(ValueId, OpId), usize> = HashMap::new();
    let mut values: Vec<ValueId> = Vec::new();
    for block in computation.block_ids() {
        values.extend(computation.block(block).args.iter().copied());
    }
    for op in computation.op_ids() {
        let operation = computation.op(op);
        values.extend(operation.results.iter().copied());
        for operand in &operation.operands {
            *expected.entry((*operand, op)).or_default() += 1;
        }
    }

    let mut recorded: HashMap<(ValueId, OpId), usize> = HashMap::new();
    for value in values {
        for user in computation.value(value).uses() {
            if !computation.contains_op(*user) {
                return Err(IrError::StructuralInvariant(Diagnostic::on_computation(
                    computation,
                    format!("value %{} lists erased user op#{}", value.0, user.0),
                )));
            }
            *recorded.entry((value, *user)).or_default() += 1;
        }
    }

    for ((value, user), count) in &expected {
        if recorded.get(&(*value, *user)) != Some(count) {
            return Err(violation(
                computation,
                *user,
                format!("use-list of %{} is out of sync with this op", value.0),
            ));
        }
    }
    if let Some(((value, user), _)) = recorded.iter().find(|(key, _)| !expected.contains_key(key)) {
        return Err(violation(
            computation,
            *user,
            format!("use-list of %{} records a stale use", value.0),
        ));
    }
    Ok(())
}
