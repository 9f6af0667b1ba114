use std::collections::HashMap;

use crate::error::{Diagnostic, IrError};
use crate::ir::{
    verify_computation, Attribute, Computation, OpId, OpKind, OpSpec, Operation, TensorLiteral,
    ValueId, ValueType,
};
use crate::shape_inference::infer_result_types;

/// Mutable IR editor over a single computation.
///
/// Every mutation keeps use-lists exact and refuses edits that would break dominance.
/// Version counters let the greedy driver tell whether an op changed since a pattern last
/// failed on it.
pub struct Rewriter<'a> {
    computation: &'a mut Computation,
    versions: HashMap<OpId, u32>,
    erased: usize,
    created: usize,
}

impl<'a> Rewriter<'a> {
    pub fn new(computation: &'a mut Computation) -> Self {
        Self {
            computation,
            versions: HashMap::new(),
            erased: 0,
            created: 0,
        }
    }

    pub fn computation(&self) -> &Computation {
        self.computation
    }

    pub fn op(&self, op: OpId) -> &Operation {
        self.computation.op(op)
    }

    pub fn operands(&self, op: OpId) -> &[ValueId] {
        &self.computation.op(op).operands
    }

    pub fn type_of(&self, value: ValueId) -> &ValueType {
        self.computation.type_of(value)
    }

    pub fn users_of(&self, value: ValueId) -> &[OpId] {
        self.computation.users_of(value)
    }

    pub fn defining_op(&self, value: ValueId) -> Option<OpId> {
        self.computation.defining_op(value)
    }

    pub fn contains(&self, op: OpId) -> bool {
        self.computation.contains_op(op)
    }

    /// Current version counter of `op`. Starts at zero and bumps on every in-place edit.
    pub fn version(&self, op: OpId) -> u32 {
        self.versions.get(&op).copied().unwrap_or(0)
    }

    pub fn ops_in_order(&self) -> Vec<OpId> {
        self.computation.walk_preorder()
    }

    /// Number of ops erased through this rewriter, nested region ops included.
    pub fn erased_ops(&self) -> usize {
        self.erased
    }

    pub fn created_ops(&self) -> usize {
        self.created
    }

    /// Redirects every use of `from` to `to`.
    ///
    /// # Panics
    /// When the two values have different logical types. Matchers pair with the oracle so
    /// that this never happens for a correct pattern.
    pub fn replace_all_uses(&mut self, from: ValueId, to: ValueId) -> Result<(), IrError> {
        if from == to {
            return Ok(());
        }
        let (from_ty, to_ty) = (self.type_of(from), self.type_of(to));
        if !from_ty.same_logical_type(to_ty) {
            panic!(
                "replace_all_uses type mismatch: %{} is {from_ty}, %{} is {to_ty}",
                from.0, to.0
            );
        }
        for user in self.computation.users_of(from).to_vec() {
            if !self.computation.dominates(to, user) {
                return Err(self.violation(
                    user,
                    format!("replacement %{} does not dominate this use of %{}", to.0, from.0),
                ));
            }
        }
        for user in self.computation.replace_all_uses(from, to) {
            self.bump_version(user);
        }
        Ok(())
    }

    /// Rewires a single operand slot. The new value may have a different type; callers are
    /// responsible for checking the op remains well typed.
    pub fn set_operand(&mut self, op: OpId, index: usize, value: ValueId) -> Result<(), IrError> {
        if index >= self.operands(op).len() {
            return Err(IrError::InvalidOperand(Diagnostic::at(
                self.computation,
                op,
                format!("operand index {index} is out of range"),
            )));
        }
        if !self.computation.dominates(value, op) {
            return Err(self.violation(op, format!("%{} does not dominate this op", value.0)));
        }
        self.computation.set_operand(op, index, value);
        self.bump_version(op);
        Ok(())
    }

    /// Erases `op` when none of its results is used. Never forces deletion.
    pub fn erase_if_unused(&mut self, op: OpId) -> bool {
        if !self.contains(op) || self.has_live_results(op) {
            return false;
        }
        self.remove(op);
        true
    }

    /// Erases `op`, reporting a structural violation if a result is still used.
    pub fn erase_op(&mut self, op: OpId) -> Result<(), IrError> {
        if self.has_live_results(op) {
            return Err(self.violation(op, "cannot erase an op whose results are still used"));
        }
        self.remove(op);
        Ok(())
    }

    /// Inserts a fully described op right before `anchor`.
    pub fn insert_before(&mut self, anchor: OpId, spec: OpSpec) -> Result<OpId, IrError> {
        let block = self.op(anchor).parent();
        let index = self.computation.position(anchor);
        for operand in &spec.operands {
            if !self.computation.is_available_at(*operand, block, index) {
                return Err(self.violation(
                    anchor,
                    format!("operand %{} is not visible before this op", operand.0),
                ));
            }
        }
        if spec.regions.len() != spec.kind.num_regions() {
            let message = format!("{} built with the wrong region count", spec.kind.name());
            return Err(self.violation(anchor, message));
        }
        let id = self.computation.create_op(block, Some(index), spec);
        self.created += 1;
        Ok(id)
    }

    /// Inserts an op before `anchor`, typing its results through the oracle.
    pub fn build_before(
        &mut self,
        anchor: OpId,
        kind: OpKind,
        operands: &[ValueId],
    ) -> Result<OpId, IrError> {
        let types: Vec<ValueType> = operands
            .iter()
            .map(|value| self.type_of(*value).clone())
            .collect();
        let result_types =
            infer_result_types(&kind, &types, &[]).map_err(|source| IrError::ShapeInference {
                diagnostic: Diagnostic::at(
                    self.computation,
                    anchor,
                    format!("building {} before this op", kind.name()),
                ),
                source,
            })?;
        let location = self.op(anchor).location.clone();
        let spec = OpSpec::new(kind, operands.to_vec(), result_types).with_location(location);
        self.insert_before(anchor, spec)
    }

    /// Inserts `constant(literal)` before `anchor` and returns its result.
    pub fn materialize_constant(
        &mut self,
        anchor: OpId,
        literal: TensorLiteral,
    ) -> Result<ValueId, IrError> {
        let op = self.build_before(anchor, OpKind::Constant(literal), &[])?;
        Ok(self.op(op).result())
    }

    /// Moves `op` (with its regions) right before `anchor`.
    ///
    /// Fails without touching the graph when the op's operands would not dominate it at the
    /// new position, or when one of its users would end up before it.
    pub fn move_before(&mut self, op: OpId, anchor: OpId) -> Result<(), IrError> {
        if op == anchor {
            return Ok(());
        }
        if self.op(op).kind.is_terminator() {
            return Err(self.violation(op, "terminators cannot be moved"));
        }
        if self.computation.is_op_within(anchor, op) {
            return Err(self.violation(op, "cannot move an op into its own region"));
        }
        let block = self.op(anchor).parent();
        let index = self.computation.position(anchor);
        let mut needed = self.operands(op).to_vec();
        needed.extend(self.computation.values_used_above(op));
        for value in needed {
            if !self.computation.is_available_at(value, block, index) {
                return Err(self.violation(
                    op,
                    format!("operand %{} would not dominate the op at its new position", value.0),
                ));
            }
        }

        let origin = self.op(op).parent();
        let next = self.computation.block(origin).ops[self.computation.position(op) + 1];
        self.computation.move_op_before(op, anchor);
        let results = self.op(op).results.clone();
        for result in results {
            for user in self.computation.users_of(result).to_vec() {
                if !self.computation.dominates(result, user) {
                    self.computation.move_op_before(op, next);
                    return Err(self.violation(
                        user,
                        format!("moving op#{} would place it after this user", op.0),
                    ));
                }
            }
        }
        self.bump_version(op);
        Ok(())
    }

    /// Replaces the type of `value` with a strictly more static one.
    ///
    /// Returns `false` when `ty` adds no information. A contradicting type is an internal
    /// consistency error.
    pub fn refine_value_type(&mut self, value: ValueId, ty: ValueType) -> Result<bool, IrError> {
        let current = self.type_of(value).clone();
        if current == ty {
            return Ok(false);
        }
        if !ty.refines(&current) {
            let message = format!("type {ty} does not refine {current} of %{}", value.0);
            return Err(IrError::InternalConsistency(match self.defining_op(value) {
                Some(op) => Diagnostic::at(self.computation, op, message),
                None => Diagnostic::on_computation(self.computation, message),
            }));
        }
        self.computation.set_value_type(value, ty);
        if let Some(op) = self.defining_op(value) {
            self.bump_version(op);
        }
        for user in self.users_of(value).to_vec() {
            self.bump_version(user);
        }
        Ok(true)
    }

    pub fn set_attr(&mut self, op: OpId, name: impl Into<String>, value: Attribute) {
        self.computation.set_attr(op, name, value);
        self.bump_version(op);
    }

    pub fn verify(&self) -> Result<(), IrError> {
        verify_computation(self.computation)
    }

    pub fn bump_version(&mut self, op: OpId) {
        let version = self.versions.entry(op).or_insert(0);
        *version = version.wrapping_add(1);
    }

    fn has_live_results(&self, op: OpId) -> bool {
        self.op(op)
            .results
            .iter()
            .any(|result| self.computation.has_uses(*result))
    }

    fn remove(&mut self, op: OpId) {
        let nested = self
            .op(op)
            .regions
            .iter()
            .map(|region| self.computation.walk_block(*region).len())
            .sum::<usize>();
        let operands = self.operands(op).to_vec();
        self.computation.remove_op(op);
        self.versions.remove(&op);
        self.erased += 1 + nested;
        // Producers lost a user; give patterns keyed on use counts another chance.
        for operand in operands {
            if let Some(producer) = self.defining_op(operand) {
                self.bump_version(producer);
            }
        }
    }

    fn violation(&self, op: OpId, message: impl Into<String>) -> IrError {
        IrError::StructuralInvariant(Diagnostic::at(self.computation, op, message))
    }
}
