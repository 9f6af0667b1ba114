use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::ops::{Attribute, Location, OpKind, DEVICE_ATTR};
use super::types::ValueType;

/// Stable handle of an operation inside its computation's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpId(pub u32);

/// Stable handle of an SSA value inside its computation's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueId(pub u32);

/// Stable handle of a block. Block 0 is the computation body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub u32);

/// Total definition of a value (MLIR-style `BlockArgument | OpResult`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueDef {
    OpResult { op: OpId, index: usize },
    BlockArg { block: BlockId, index: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueData {
    pub ty: ValueType,
    pub def: ValueDef,
    /// One entry per operand slot referencing this value.
    uses: SmallVec<[OpId; 4]>,
}

impl ValueData {
    pub fn uses(&self) -> &[OpId] {
        &self.uses
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub kind: OpKind,
    pub operands: Vec<ValueId>,
    pub results: Vec<ValueId>,
    pub regions: Vec<BlockId>,
    #[serde(default)]
    pub attrs: BTreeMap<String, Attribute>,
    #[serde(default)]
    pub location: Option<Location>,
    parent: BlockId,
}

impl Operation {
    pub fn parent(&self) -> BlockId {
        self.parent
    }

    pub fn attr(&self, name: &str) -> Option<&Attribute> {
        self.attrs.get(name)
    }

    pub fn device(&self) -> Option<&str> {
        self.attr(DEVICE_ATTR).and_then(Attribute::as_str)
    }

    pub fn result(&self) -> ValueId {
        self.results[0]
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Block {
    pub args: Vec<ValueId>,
    pub ops: Vec<OpId>,
    pub parent: Option<OpId>,
}

/// Everything needed to materialise a new operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OpSpec {
    pub kind: OpKind,
    pub operands: Vec<ValueId>,
    pub result_types: Vec<ValueType>,
    pub regions: Vec<BlockId>,
    pub attrs: BTreeMap<String, Attribute>,
    pub location: Option<Location>,
}

impl OpSpec {
    pub fn new(kind: OpKind, operands: Vec<ValueId>, result_types: Vec<ValueType>) -> Self {
        Self {
            kind,
            operands,
            result_types,
            regions: Vec::new(),
            attrs: BTreeMap::new(),
            location: None,
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: Attribute) -> Self {
        self.attrs.insert(name.into(), value);
        self
    }

    pub fn with_regions(mut self, regions: Vec<BlockId>) -> Self {
        self.regions = regions;
        self
    }

    pub fn with_location(mut self, location: Option<Location>) -> Self {
        self.location = location;
        self
    }
}

/// Function-like body: an arena of operations, values and blocks.
///
/// Handles stay valid until the entity they name is erased; erased slots are never reused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Computation {
    name: String,
    ops: Vec<Option<Operation>>,
    values: Vec<Option<ValueData>>,
    blocks: Vec<Option<Block>>,
}

impl Computation {
    pub const ENTRY: BlockId = BlockId(0);

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ops: Vec::new(),
            values: Vec::new(),
            blocks: vec![Some(Block::default())],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry(&self) -> &Block {
        self.block(Self::ENTRY)
    }

    pub fn parameters(&self) -> &[ValueId] {
        &self.entry().args
    }

    /// Operands of the body's `return`, if the body is terminated.
    pub fn results(&self) -> &[ValueId] {
        match self.terminator(Self::ENTRY) {
            Some(term) => &self.op(term).operands,
            None => &[],
        }
    }

    pub fn op(&self, id: OpId) -> &Operation {
        self.try_op(id).expect("operation id must be valid")
    }

    pub fn try_op(&self, id: OpId) -> Option<&Operation> {
        self.ops.get(id.0 as usize).and_then(Option::as_ref)
    }

    pub fn contains_op(&self, id: OpId) -> bool {
        self.try_op(id).is_some()
    }

    pub fn value(&self, id: ValueId) -> &ValueData {
        self.try_value(id).expect("value id must be valid")
    }

    pub fn try_value(&self, id: ValueId) -> Option<&ValueData> {
        self.values.get(id.0 as usize).and_then(Option::as_ref)
    }

    pub fn contains_value(&self, id: ValueId) -> bool {
        self.try_value(id).is_some()
    }

    pub fn type_of(&self, id: ValueId) -> &ValueType {
        &self.value(id).ty
    }

    pub fn users_of(&self, id: ValueId) -> &[OpId] {
        self.try_value(id).map(ValueData::uses).unwrap_or(&[])
    }

    pub fn has_uses(&self, id: ValueId) -> bool {
        !self.users_of(id).is_empty()
    }

    pub fn defining_op(&self, id: ValueId) -> Option<OpId> {
        match self.try_value(id)?.def {
            ValueDef::OpResult { op, .. } => Some(op),
            ValueDef::BlockArg { .. } => None,
        }
    }

    pub fn block(&self, id: BlockId) -> &Block {
        self.try_block(id).expect("block id must be valid")
    }

    pub fn try_block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id.0 as usize).and_then(Option::as_ref)
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks
            .iter()
            .enumerate()
            .filter(|(_, block)| block.is_some())
            .map(|(idx, _)| BlockId(idx as u32))
    }

    pub fn op_ids(&self) -> impl Iterator<Item = OpId> + '_ {
        self.ops
            .iter()
            .enumerate()
            .filter(|(_, op)| op.is_some())
            .map(|(idx, _)| OpId(idx as u32))
    }

    pub fn value_ids(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.values
            .iter()
            .enumerate()
            .filter(|(_, value)| value.is_some())
            .map(|(idx, _)| ValueId(idx as u32))
    }

    pub fn num_ops(&self) -> usize {
        self.ops.iter().filter(|op| op.is_some()).count()
    }

    /// Last operation of `block` when it is a terminator.
    pub fn terminator(&self, block: BlockId) -> Option<OpId> {
        let last = *self.try_block(block)?.ops.last()?;
        self.op(last).kind.is_terminator().then_some(last)
    }

    /// Block that defines `value` (the owner of a block argument or the parent of the
    /// defining op).
    pub fn defining_block(&self, value: ValueId) -> BlockId {
        match self.value(value).def {
            ValueDef::OpResult { op, .. } => self.op(op).parent,
            ValueDef::BlockArg { block, .. } => block,
        }
    }

    /// Index of `op` inside its parent block.
    pub fn position(&self, op: OpId) -> usize {
        let parent = self.op(op).parent;
        self.block(parent)
            .ops
            .iter()
            .position(|candidate| *candidate == op)
            .expect("operation must be linked into its parent block")
    }

    /// `true` when `block` is `ancestor` or nested (transitively) inside it.
    pub fn is_block_within(&self, block: BlockId, ancestor: BlockId) -> bool {
        let mut current = block;
        loop {
            if current == ancestor {
                return true;
            }
            match self.block(current).parent {
                Some(op) => current = self.op(op).parent,
                None => return false,
            }
        }
    }

    /// `true` when `value` is defined inside `block` or any region nested within it.
    pub fn is_defined_within(&self, value: ValueId, block: BlockId) -> bool {
        self.is_block_within(self.defining_block(value), block)
    }

    /// `true` when `op` is `ancestor` or nested inside one of its regions.
    pub fn is_op_within(&self, op: OpId, ancestor: OpId) -> bool {
        let mut current = op;
        loop {
            if current == ancestor {
                return true;
            }
            match self.block(self.op(current).parent).parent {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    /// `true` when `value` is visible at position `index` of `block`, i.e. right before the
    /// operation currently at that index.
    pub fn is_available_at(&self, value: ValueId, block: BlockId, index: usize) -> bool {
        let Some(data) = self.try_value(value) else {
            return false;
        };
        let def_block = self.defining_block(value);
        let mut block = block;
        let mut index = index;
        while block != def_block {
            let Some(parent_op) = self.block(block).parent else {
                return false;
            };
            block = self.op(parent_op).parent;
            index = self.position(parent_op);
        }
        match data.def {
            ValueDef::BlockArg { .. } => true,
            ValueDef::OpResult { op, .. } => self.position(op) < index,
        }
    }

    /// `true` when `value` dominates the use by `user`.
    pub fn dominates(&self, value: ValueId, user: OpId) -> bool {
        let op = self.op(user);
        self.is_available_at(value, op.parent, self.position(user))
    }

    /// Pre-order walk over every operation: each op precedes the ops of its regions.
    pub fn walk_preorder(&self) -> Vec<OpId> {
        let mut out = Vec::with_capacity(self.ops.len());
        self.collect_preorder(Self::ENTRY, &mut out);
        out
    }

    /// Pre-order walk restricted to `block` and its nested regions.
    pub fn walk_block(&self, block: BlockId) -> Vec<OpId> {
        let mut out = Vec::new();
        self.collect_preorder(block, &mut out);
        out
    }

    /// Post-order walk: the ops of a region precede the op owning the region.
    pub fn walk_postorder(&self) -> Vec<OpId> {
        let mut out = Vec::with_capacity(self.ops.len());
        self.collect_postorder(Self::ENTRY, &mut out);
        out
    }

    fn collect_preorder(&self, block: BlockId, out: &mut Vec<OpId>) {
        for op in &self.block(block).ops {
            out.push(*op);
            for region in &self.op(*op).regions {
                self.collect_preorder(*region, out);
            }
        }
    }

    fn collect_postorder(&self, block: BlockId, out: &mut Vec<OpId>) {
        for op in &self.block(block).ops {
            for region in &self.op(*op).regions {
                self.collect_postorder(*region, out);
            }
            out.push(*op);
        }
    }

    /// Values used inside the regions of `op` that are defined outside of them.
    pub fn values_used_above(&self, op: OpId) -> Vec<ValueId> {
        let mut used = Vec::new();
        for region in &self.op(op).regions {
            for nested in self.walk_block(*region) {
                for operand in &self.op(nested).operands {
                    if !self.is_defined_within(*operand, *region) && !used.contains(operand) {
                        used.push(*operand);
                    }
                }
            }
        }
        used
    }

    // Mutation primitives. They keep use-lists exact but do not check dominance; the
    // rewriter and builder layer those checks on top.

    pub(crate) fn new_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Some(Block::default()));
        id
    }

    pub(crate) fn add_block_arg(&mut self, block: BlockId, ty: ValueType) -> ValueId {
        let index = self.block(block).args.len();
        let value = self.alloc_value(ty, ValueDef::BlockArg { block, index });
        self.block_mut(block).args.push(value);
        value
    }

    /// Links a new operation into `block` at `index` (appends when `None`).
    pub(crate) fn create_op(&mut self, block: BlockId, index: Option<usize>, spec: OpSpec) -> OpId {
        let id = OpId(self.ops.len() as u32);
        let results = spec
            .result_types
            .into_iter()
            .enumerate()
            .map(|(index, ty)| self.alloc_value(ty, ValueDef::OpResult { op: id, index }))
            .collect();
        for operand in &spec.operands {
            self.value_mut(*operand).uses.push(id);
        }
        for region in &spec.regions {
            self.block_mut(*region).parent = Some(id);
        }
        self.ops.push(Some(Operation {
            kind: spec.kind,
            operands: spec.operands,
            results,
            regions: spec.regions,
            attrs: spec.attrs,
            location: spec.location,
            parent: block,
        }));
        let ops = &mut self.block_mut(block).ops;
        match index {
            Some(index) => ops.insert(index, id),
            None => ops.push(id),
        }
        id
    }

    pub(crate) fn set_operand(&mut self, op: OpId, index: usize, value: ValueId) {
        let previous = self.op(op).operands[index];
        if previous == value {
            return;
        }
        self.remove_use(previous, op);
        self.value_mut(value).uses.push(op);
        self.op_mut(op).operands[index] = value;
    }

    /// Redirects every use of `from` to `to`, returning the rewired users.
    pub(crate) fn replace_all_uses(&mut self, from: ValueId, to: ValueId) -> Vec<OpId> {
        if from == to {
            return Vec::new();
        }
        let users: SmallVec<[OpId; 4]> = std::mem::take(&mut self.value_mut(from).uses);
        let mut touched = Vec::with_capacity(users.len());
        for user in users {
            for operand in &mut self.op_mut(user).operands {
                if *operand == from {
                    *operand = to;
                }
            }
            if !touched.contains(&user) {
                touched.push(user);
            }
            self.value_mut(to).uses.push(user);
        }
        touched
    }

    pub(crate) fn set_value_type(&mut self, value: ValueId, ty: ValueType) {
        self.value_mut(value).ty = ty;
    }

    pub(crate) fn set_attr(&mut self, op: OpId, name: impl Into<String>, value: Attribute) {
        self.op_mut(op).attrs.insert(name.into(), value);
    }

    /// Unlinks `op` from its block and relinks it right before `anchor`.
    pub(crate) fn move_op_before(&mut self, op: OpId, anchor: OpId) {
        let from = self.op(op).parent;
        self.block_mut(from).ops.retain(|candidate| *candidate != op);
        let to = self.op(anchor).parent;
        let index = self.position(anchor);
        self.block_mut(to).ops.insert(index, op);
        self.op_mut(op).parent = to;
    }

    /// Removes `op`, its nested regions and its results from the arena.
    ///
    /// Callers guarantee that no result of `op` is used outside of `op` itself.
    pub(crate) fn remove_op(&mut self, op: OpId) {
        for region in self.op(op).regions.clone() {
            self.remove_block(region);
        }
        let parent = self.op(op).parent;
        self.block_mut(parent).ops.retain(|candidate| *candidate != op);
        let operands = self.op(op).operands.clone();
        for operand in operands {
            if self.contains_value(operand) {
                self.remove_use(operand, op);
            }
        }
        for result in self.op(op).results.clone() {
            self.values[result.0 as usize] = None;
        }
        self.ops[op.0 as usize] = None;
    }

    /// Erases `block` with everything inside it.
    pub(crate) fn remove_block(&mut self, block: BlockId) {
        for nested in self.block(block).ops.clone().into_iter().rev() {
            self.remove_op(nested);
        }
        for arg in self.block(block).args.clone() {
            self.values[arg.0 as usize] = None;
        }
        self.blocks[block.0 as usize] = None;
    }

    fn remove_use(&mut self, value: ValueId, user: OpId) {
        let uses = &mut self.value_mut(value).uses;
        if let Some(pos) = uses.iter().position(|candidate| *candidate == user) {
            uses.remove(pos);
        }
    }

    fn alloc_value(&mut self, ty: ValueType, def: ValueDef) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(Some(ValueData {
            ty,
            def,
            uses: SmallVec::new(),
        }));
        id
    }

    fn op_mut(&mut self, id: OpId) -> &mut Operation {
        self.ops
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .expect("operation id must be valid")
    }

    fn value_mut(&mut self, id: ValueId) -> &mut ValueData {
        self.values
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .expect("value id must be valid")
    }

    fn block_mut(&mut self, id: BlockId) -> &mut Block {
        self.blocks
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .expect("block id must be valid")
    }
}
