use std::collections::BTreeMap;

use super::computation::{BlockId, Computation, OpId, OpSpec, ValueId};
use super::ops::{Attribute, Location, OpKind, ReplicateSpec};
use super::types::ValueType;
use super::verify::verify_computation;
use crate::error::{Diagnostic, IrError};
use crate::shape_inference::infer_result_types;

/// Builds a computation op by op, typing results through the shape oracle.
///
/// Operands must already be visible at the insertion point, so anything built this way
/// satisfies dominance by construction.
pub struct ComputationBuilder {
    computation: Computation,
    /// Insertion blocks, innermost last. Region bodies push while they are being built.
    scopes: Vec<BlockId>,
    location: Option<Location>,
}

impl ComputationBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            computation: Computation::new(name),
            scopes: vec![Computation::ENTRY],
            location: None,
        }
    }

    pub fn add_parameter(&mut self, ty: ValueType) -> ValueId {
        self.computation.add_block_arg(Computation::ENTRY, ty)
    }

    /// Location stamped on every op emitted from now on.
    pub fn set_location(&mut self, location: Option<Location>) {
        self.location = location;
    }

    pub fn computation(&self) -> &Computation {
        &self.computation
    }

    pub fn value_type(&self, id: ValueId) -> Option<&ValueType> {
        self.computation.try_value(id).map(|data| &data.ty)
    }

    /// Emits an op whose result types come from the oracle.
    pub fn emit(&mut self, kind: OpKind, operands: &[ValueId]) -> Result<Vec<ValueId>, IrError> {
        self.emit_with_attrs(kind, operands, BTreeMap::new())
    }

    /// Emits a single-result op and returns that result.
    pub fn emit_single(&mut self, kind: OpKind, operands: &[ValueId]) -> Result<ValueId, IrError> {
        let op = self.emit_op(kind, operands, None, BTreeMap::new())?;
        self.single_result(op)
    }

    pub fn emit_with_attrs(
        &mut self,
        kind: OpKind,
        operands: &[ValueId],
        attrs: BTreeMap<String, Attribute>,
    ) -> Result<Vec<ValueId>, IrError> {
        let op = self.emit_op(kind, operands, None, attrs)?;
        Ok(self.computation.op(op).results.clone())
    }

    /// Emits an op with declared result types.
    ///
    /// Declared types may carry layouts and may be more or less static than what the oracle
    /// infers, but must never contradict it.
    pub fn emit_typed(
        &mut self,
        kind: OpKind,
        operands: &[ValueId],
        result_types: Vec<ValueType>,
    ) -> Result<Vec<ValueId>, IrError> {
        let op = self.emit_op(kind, operands, Some(result_types), BTreeMap::new())?;
        Ok(self.computation.op(op).results.clone())
    }

    /// Emits a fully described op and returns its handle.
    pub fn emit_op(
        &mut self,
        kind: OpKind,
        operands: &[ValueId],
        result_types: Option<Vec<ValueType>>,
        attrs: BTreeMap<String, Attribute>,
    ) -> Result<OpId, IrError> {
        if kind.num_regions() != 0 {
            return Err(self.invalid(&kind, "region ops are built with a dedicated helper"));
        }
        self.check_operands(&kind, operands)?;
        let result_types = self.resolve_types(&kind, operands, &[], result_types)?;
        let mut spec = OpSpec::new(kind, operands.to_vec(), result_types)
            .with_location(self.location.clone());
        spec.attrs = attrs;
        Ok(self.append(spec))
    }

    /// Builds a `replicate` op with `n` replicas.
    ///
    /// `replicated` holds one group of `n` operands per region argument; the region argument
    /// takes the type of the group. `body` receives the region arguments and returns the
    /// values to yield. Results are laid out `result[i * n + replica]`.
    pub fn replicate<F>(
        &mut self,
        n: usize,
        replicated: &[Vec<ValueId>],
        devices: BTreeMap<String, Vec<String>>,
        body: F,
    ) -> Result<Vec<ValueId>, IrError>
    where
        F: FnOnce(&mut ComputationBuilder, &[ValueId]) -> Result<Vec<ValueId>, IrError>,
    {
        let kind = OpKind::Replicate(ReplicateSpec { n, devices });
        let operands: Vec<ValueId> = replicated.iter().flatten().copied().collect();
        if replicated.iter().any(|group| group.len() != n) {
            return Err(self.invalid(&kind, format!("every replicated group needs {n} operands")));
        }
        self.check_operands(&kind, &operands)?;

        let region = self.computation.new_block();
        let args = replicated
            .iter()
            .map(|group| {
                let ty = self.computation.type_of(group[0]).clone();
                self.computation.add_block_arg(region, ty)
            })
            .collect::<Vec<_>>();

        self.scopes.push(region);
        let built = body(self, &args).and_then(|yielded| {
            self.check_operands(&OpKind::Yield, &yielded)?;
            let terminator = OpSpec::new(OpKind::Yield, yielded.clone(), Vec::new())
                .with_location(self.location.clone());
            self.append(terminator);
            Ok(yielded)
        });
        self.scopes.pop();
        let resolved = built.and_then(|yielded| {
            let region_types = vec![yielded
                .iter()
                .map(|value| self.computation.type_of(*value).clone())
                .collect::<Vec<_>>()];
            self.resolve_types(&kind, &operands, &region_types, None)
        });
        let result_types = match resolved {
            Ok(types) => types,
            Err(err) => {
                // An abandoned region must not stay behind as a detached block.
                self.computation.remove_block(region);
                return Err(err);
            }
        };
        let spec = OpSpec::new(kind, operands, result_types)
            .with_regions(vec![region])
            .with_location(self.location.clone());
        let op = self.append(spec);
        Ok(self.computation.op(op).results.clone())
    }

    /// Terminates the body with `return(results)` and verifies the computation.
    pub fn finish(mut self, results: &[ValueId]) -> Result<Computation, IrError> {
        self.check_operands(&OpKind::Return, results)?;
        let terminator = OpSpec::new(OpKind::Return, results.to_vec(), Vec::new())
            .with_location(self.location.clone());
        self.append(terminator);
        verify_computation(&self.computation)?;
        Ok(self.computation)
    }

    fn append(&mut self, spec: OpSpec) -> OpId {
        let block = self.current_block();
        self.computation.create_op(block, None, spec)
    }

    fn current_block(&self) -> BlockId {
        *self.scopes.last().unwrap_or(&Computation::ENTRY)
    }

    fn single_result(&self, op: OpId) -> Result<ValueId, IrError> {
        match self.computation.op(op).results.as_slice() {
            [value] => Ok(*value),
            other => Err(IrError::InvalidOperand(Diagnostic::at(
                &self.computation,
                op,
                format!("expected a single result, found {}", other.len()),
            ))),
        }
    }

    /// Every operand must be visible at the end of some enclosing insertion block.
    fn check_operands(&self, kind: &OpKind, operands: &[ValueId]) -> Result<(), IrError> {
        for operand in operands {
            let visible = self.scopes.iter().any(|block| {
                let end = self.computation.block(*block).ops.len();
                self.computation.is_available_at(*operand, *block, end)
            });
            if !visible {
                return Err(
                    self.invalid(kind, format!("operand %{} is not visible here", operand.0))
                );
            }
        }
        Ok(())
    }

    fn resolve_types(
        &self,
        kind: &OpKind,
        operands: &[ValueId],
        regions: &[Vec<ValueType>],
        declared: Option<Vec<ValueType>>,
    ) -> Result<Vec<ValueType>, IrError> {
        let operand_types: Vec<ValueType> = operands
            .iter()
            .map(|value| self.computation.type_of(*value).clone())
            .collect();
        let inferred = infer_result_types(kind, &operand_types, regions).map_err(|source| {
            IrError::ShapeInference {
                diagnostic: Diagnostic::on_computation(
                    &self.computation,
                    format!("while building {}", kind.name()),
                ),
                source,
            }
        })?;
        let Some(declared) = declared else {
            return Ok(inferred);
        };
        let compatible = declared.len() == inferred.len()
            && declared
                .iter()
                .zip(&inferred)
                .all(|(d, i)| d.refines(i) || i.refines(d));
        if !compatible {
            return Err(self.invalid(
                kind,
                format!("declared result types {declared:?} contradict inferred {inferred:?}"),
            ));
        }
        Ok(declared)
    }

    fn invalid(&self, kind: &OpKind, message: impl Into<String>) -> IrError {
        let mut diagnostic = Diagnostic::on_computation(&self.computation, message);
        diagnostic.opcode = Some(kind.name());
        diagnostic.location = self.location.clone();
        IrError::InvalidOperand(diagnostic)
    }
}
