use std::collections::BTreeMap;

use crate::error::IrError;
use crate::ir::{BlockId, Computation, Module, OpId, OpKind, ValueDef, ValueId};
use crate::pass::{for_each_computation, Pass, PassContext, PassResult};
use crate::rewriter::Rewriter;

/// Hoists replica-invariant ops out of `replicate` regions.
///
/// An op is invariant when everything it reads, including values read by its own nested
/// regions, is defined outside the replicated region. Ops assigned to one of the region's
/// virtual devices stay put. Hoisted ops land right before the `replicate`, in their
/// original relative order.
#[derive(Default)]
pub struct ReplicateInvariantHoistingPass;

impl ReplicateInvariantHoistingPass {
    pub const NAME: &'static str = "replicate-invariant-hoisting";

    fn run_on_computation(&self, computation: &mut Computation) -> Result<PassResult, IrError> {
        // Innermost first: ops hoisted out of a nested replicate land in the enclosing body
        // before that body is visited.
        let replicates: Vec<OpId> = computation
            .walk_postorder()
            .into_iter()
            .filter(|op| matches!(computation.op(*op).kind, OpKind::Replicate(_)))
            .collect();

        let mut rewriter = Rewriter::new(computation);
        let mut result = PassResult::default();
        for replicate in replicates {
            if !rewriter.contains(replicate) {
                continue;
            }
            result = result.merge(hoist_replicate_invariant_ops(&mut rewriter, replicate)?);
        }
        result.erased_ops = rewriter.erased_ops();
        Ok(result)
    }
}

fn hoist_replicate_invariant_ops(
    rewriter: &mut Rewriter,
    replicate: OpId,
) -> Result<PassResult, IrError> {
    let OpKind::Replicate(spec) = rewriter.op(replicate).kind.clone() else {
        return Ok(PassResult::default());
    };
    let region = rewriter.op(replicate).regions[0];
    let mut result = PassResult::default();

    let shape_queries: Vec<OpId> = rewriter
        .computation()
        .walk_block(region)
        .into_iter()
        .filter(|op| matches!(rewriter.op(*op).kind, OpKind::Shape))
        .collect();
    for op in shape_queries {
        if !rewriter.contains(op) {
            continue;
        }
        if make_shape_op_invariant(rewriter, replicate, spec.n, op)? {
            result.changed = true;
            result.rewrites_applied += 1;
        }
    }

    let body = rewriter.computation().block(region).ops.clone();
    for op in body {
        if !rewriter.contains(op) || rewriter.op(op).kind.is_terminator() {
            continue;
        }
        if uses_virtual_device(rewriter.computation(), op, &spec.devices) {
            continue;
        }
        if !is_replicate_invariant(rewriter.computation(), op, region) {
            continue;
        }
        tracing::debug!(
            op = op.0,
            opcode = rewriter.op(op).kind.name(),
            replicate = replicate.0,
            "hoisting replica-invariant op"
        );
        rewriter.move_before(op, replicate)?;
        result.changed = true;
        result.rewrites_applied += 1;
    }
    Ok(result)
}

/// Points a `shape` query at replica 0's operand when it reads a replicated argument.
///
/// Every replica carries the same type, so the shape of replica 0 stands for all of them.
/// A query that goes through `read-variable` becomes `variable-shape` on the resource.
fn make_shape_op_invariant(
    rewriter: &mut Rewriter,
    replicate: OpId,
    n: usize,
    shape_op: OpId,
) -> Result<bool, IrError> {
    let region = rewriter.op(replicate).regions[0];
    let operand = rewriter.operands(shape_op)[0];

    if let Some(index) = region_arg_index(rewriter.computation(), operand, region) {
        let replica0 = rewriter.operands(replicate)[index * n];
        rewriter.set_operand(shape_op, 0, replica0)?;
        return Ok(true);
    }

    let Some(read) = rewriter.defining_op(operand) else {
        return Ok(false);
    };
    if !matches!(rewriter.op(read).kind, OpKind::ReadVariable) {
        return Ok(false);
    }
    let resource = rewriter.operands(read)[0];
    let Some(index) = region_arg_index(rewriter.computation(), resource, region) else {
        return Ok(false);
    };
    let replica0 = rewriter.operands(replicate)[index * n];
    let variable_shape = rewriter.build_before(shape_op, OpKind::VariableShape, &[replica0])?;
    let replacement = rewriter.op(variable_shape).result();
    let shape_result = rewriter.op(shape_op).result();
    rewriter.replace_all_uses(shape_result, replacement)?;
    rewriter.erase_op(shape_op)?;
    Ok(true)
}

fn region_arg_index(computation: &Computation, value: ValueId, region: BlockId) -> Option<usize> {
    match computation.value(value).def {
        ValueDef::BlockArg { block, index } if block == region => Some(index),
        _ => None,
    }
}

/// `true` when `op` or any op nested in it is assigned to one of `devices`.
fn uses_virtual_device(
    computation: &Computation,
    op: OpId,
    devices: &BTreeMap<String, Vec<String>>,
) -> bool {
    if devices.is_empty() {
        return false;
    }
    let mut ops = vec![op];
    for region in &computation.op(op).regions {
        ops.extend(computation.walk_block(*region));
    }
    ops.into_iter().any(|candidate| {
        computation
            .op(candidate)
            .device()
            .is_some_and(|device| devices.contains_key(device))
    })
}

fn is_replicate_invariant(computation: &Computation, op: OpId, region: BlockId) -> bool {
    let defined_outside = |value: &ValueId| !computation.is_defined_within(*value, region);
    computation.op(op).operands.iter().all(defined_outside)
        && computation.values_used_above(op).iter().all(defined_outside)
}

impl Pass for ReplicateInvariantHoistingPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "hoist replica-invariant ops out of replicate regions"
    }

    fn run(&self, module: &mut Module, _cx: &mut PassContext) -> Result<PassResult, IrError> {
        for_each_computation(module, |computation| self.run_on_computation(computation))
    }
}
