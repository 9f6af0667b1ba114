mod support;

use std::collections::BTreeMap;

use irpass::ir::{
    verify_module, Attribute, BinaryOp, Computation, DType, OpId, OpKind, UnaryOp, DEVICE_ATTR,
};
use irpass::ir_utils::tensor_spec_static;
use irpass::passes::ReplicateInvariantHoistingPass;
use irpass::{ComputationBuilder, Pass, PassContext, ValueType};
use support::{entry_opcodes, f32_tensor, init_tracing, main_of, module_with};

const VIRTUAL_DEVICE: &str = "TPU_REPLICATED_CORE_0";

fn replicate_op(computation: &Computation) -> OpId {
    computation
        .entry()
        .ops
        .iter()
        .copied()
        .find(|op| matches!(computation.op(*op).kind, OpKind::Replicate(_)))
        .expect("replicate op")
}

fn region_opcodes(computation: &Computation) -> Vec<&'static str> {
    let region = computation.op(replicate_op(computation)).regions[0];
    computation
        .block(region)
        .ops
        .iter()
        .map(|op| computation.op(*op).kind.name())
        .collect()
}

fn device_attr(device: &str) -> BTreeMap<String, Attribute> {
    BTreeMap::from([(DEVICE_ATTR.to_string(), Attribute::String(device.to_string()))])
}

fn virtual_devices() -> BTreeMap<String, Vec<String>> {
    BTreeMap::from([(
        VIRTUAL_DEVICE.to_string(),
        vec!["/device:TPU:0".to_string(), "/device:TPU:1".to_string()],
    )])
}

#[test]
fn invariant_ops_move_above_replicate_in_order() -> anyhow::Result<()> {
    init_tracing();
    let mut builder = ComputationBuilder::new("main");
    let c = builder.add_parameter(f32_tensor(&[4]));
    let r0 = builder.add_parameter(f32_tensor(&[4]));
    let r1 = builder.add_parameter(f32_tensor(&[4]));
    let outputs = builder.replicate(2, &[vec![r0, r1]], BTreeMap::new(), |b, args| {
        let negated = b.emit_single(OpKind::Unary(UnaryOp::Neg), &[c])?;
        let offset = b.emit_single(OpKind::Binary(BinaryOp::Add), &[negated, c])?;
        let per_replica = b.emit_single(OpKind::Binary(BinaryOp::Add), &[args[0], offset])?;
        Ok(vec![per_replica])
    })?;
    let mut module = module_with(builder.finish(&outputs)?);

    let result = ReplicateInvariantHoistingPass.run(&mut module, &mut PassContext::default())?;
    assert!(result.changed);
    assert_eq!(result.rewrites_applied, 2);
    verify_module(&module)?;

    let main = main_of(&module);
    assert_eq!(
        entry_opcodes(main),
        vec!["negate", "add", "replicate", "return"]
    );
    assert_eq!(region_opcodes(main), vec!["add", "yield"]);

    let again = ReplicateInvariantHoistingPass.run(&mut module, &mut PassContext::default())?;
    assert!(!again.changed);
    Ok(())
}

#[test]
fn virtual_device_ops_stay_inside() -> anyhow::Result<()> {
    let mut builder = ComputationBuilder::new("main");
    let c = builder.add_parameter(f32_tensor(&[4]));
    let r0 = builder.add_parameter(f32_tensor(&[4]));
    let r1 = builder.add_parameter(f32_tensor(&[4]));
    let outputs = builder.replicate(2, &[vec![r0, r1]], virtual_devices(), |b, args| {
        let pinned = b.emit_with_attrs(
            OpKind::Unary(UnaryOp::Exp),
            &[c],
            device_attr(VIRTUAL_DEVICE),
        )?[0];
        let host = b.emit_with_attrs(
            OpKind::Unary(UnaryOp::Abs),
            &[c],
            device_attr("/device:CPU:0"),
        )?[0];
        let sum = b.emit_single(OpKind::Binary(BinaryOp::Add), &[pinned, host])?;
        let per_replica = b.emit_single(OpKind::Binary(BinaryOp::Mul), &[args[0], sum])?;
        Ok(vec![per_replica])
    })?;
    let mut module = module_with(builder.finish(&outputs)?);

    let result = ReplicateInvariantHoistingPass.run(&mut module, &mut PassContext::default())?;
    assert!(result.changed);
    verify_module(&module)?;

    let main = main_of(&module);
    assert_eq!(entry_opcodes(main), vec!["abs", "replicate", "return"]);
    assert_eq!(
        region_opcodes(main),
        vec!["exponential", "add", "multiply", "yield"]
    );
    for op in main.walk_preorder() {
        if main.op(op).device() == Some(VIRTUAL_DEVICE) {
            assert_ne!(main.op(op).parent(), Computation::ENTRY);
        }
    }
    Ok(())
}

#[test]
fn shape_of_replicated_argument_reads_replica_zero() -> anyhow::Result<()> {
    let mut builder = ComputationBuilder::new("main");
    let r0 = builder.add_parameter(f32_tensor(&[4, 2]));
    let r1 = builder.add_parameter(f32_tensor(&[4, 2]));
    let outputs = builder.replicate(2, &[vec![r0, r1]], BTreeMap::new(), |b, args| {
        let shape = b.emit_single(OpKind::Shape, &[args[0]])?;
        Ok(vec![args[0], shape])
    })?;
    let mut module = module_with(builder.finish(&outputs)?);

    let result = ReplicateInvariantHoistingPass.run(&mut module, &mut PassContext::default())?;
    assert!(result.changed);
    verify_module(&module)?;

    let main = main_of(&module);
    assert_eq!(entry_opcodes(main), vec!["shape", "replicate", "return"]);
    let shape_op = main.entry().ops[0];
    assert_eq!(main.op(shape_op).operands, vec![r0]);
    assert_eq!(region_opcodes(main), vec!["yield"]);

    let again = ReplicateInvariantHoistingPass.run(&mut module, &mut PassContext::default())?;
    assert!(!again.changed);
    Ok(())
}

#[test]
fn shape_of_variable_read_becomes_variable_shape() -> anyhow::Result<()> {
    let resource = ValueType::Resource(tensor_spec_static(DType::F32, &[3, 5]));
    let mut builder = ComputationBuilder::new("main");
    let v0 = builder.add_parameter(resource.clone());
    let v1 = builder.add_parameter(resource);
    let outputs = builder.replicate(2, &[vec![v0, v1]], BTreeMap::new(), |b, args| {
        let value = b.emit_single(OpKind::ReadVariable, &[args[0]])?;
        let shape = b.emit_single(OpKind::Shape, &[value])?;
        Ok(vec![shape])
    })?;
    let mut module = module_with(builder.finish(&outputs)?);

    let result = ReplicateInvariantHoistingPass.run(&mut module, &mut PassContext::default())?;
    assert!(result.changed);
    verify_module(&module)?;

    let main = main_of(&module);
    assert_eq!(
        entry_opcodes(main),
        vec!["variable-shape", "replicate", "return"]
    );
    let variable_shape = main.entry().ops[0];
    assert_eq!(main.op(variable_shape).operands, vec![v0]);
    assert_eq!(
        main.type_of(main.op(variable_shape).result()),
        &irpass::ir_utils::tensor_type_static(DType::S32, &[2])
    );
    assert_eq!(region_opcodes(main), vec!["read-variable", "yield"]);
    Ok(())
}

#[test]
fn ops_reading_region_values_are_not_hoisted() -> anyhow::Result<()> {
    let mut builder = ComputationBuilder::new("main");
    let r0 = builder.add_parameter(f32_tensor(&[4]));
    let r1 = builder.add_parameter(f32_tensor(&[4]));
    let outputs = builder.replicate(2, &[vec![r0, r1]], BTreeMap::new(), |b, args| {
        let negated = b.emit_single(OpKind::Unary(UnaryOp::Neg), &[args[0]])?;
        let doubled = b.emit_single(OpKind::Binary(BinaryOp::Add), &[negated, negated])?;
        Ok(vec![doubled])
    })?;
    let mut module = module_with(builder.finish(&outputs)?);
    let before = module.clone();

    let result = ReplicateInvariantHoistingPass.run(&mut module, &mut PassContext::default())?;
    assert!(!result.changed);
    assert_eq!(module, before);
    Ok(())
}

#[test]
fn nested_replicates_hoist_in_one_run() -> anyhow::Result<()> {
    let mut builder = ComputationBuilder::new("main");
    let r0 = builder.add_parameter(f32_tensor(&[4, 2]));
    let r1 = builder.add_parameter(f32_tensor(&[4, 2]));
    let outputs = builder.replicate(2, &[vec![r0, r1]], BTreeMap::new(), |b, args| {
        let inner = b.replicate(1, &[vec![args[0]]], BTreeMap::new(), |b, inner_args| {
            let shape = b.emit_single(OpKind::Shape, &[inner_args[0]])?;
            Ok(vec![shape])
        })?;
        Ok(vec![inner[0]])
    })?;
    let mut module = module_with(builder.finish(&outputs)?);

    let first = ReplicateInvariantHoistingPass.run(&mut module, &mut PassContext::default())?;
    assert!(first.changed);
    // Inner: retarget + hoist. Outer: retarget + hoist.
    assert_eq!(first.rewrites_applied, 4);
    verify_module(&module)?;

    let main = main_of(&module);
    assert_eq!(entry_opcodes(main), vec!["shape", "replicate", "return"]);
    let shape_op = main.entry().ops[0];
    assert_eq!(main.op(shape_op).operands, vec![r0]);
    assert_eq!(region_opcodes(main), vec!["replicate", "yield"]);

    let second = ReplicateInvariantHoistingPass.run(&mut module, &mut PassContext::default())?;
    assert!(!second.changed);
    Ok(())
}

#[test]
fn shape_queries_in_nested_regions_read_replica_zero() -> anyhow::Result<()> {
    let mut builder = ComputationBuilder::new("main");
    let c = builder.add_parameter(f32_tensor(&[4]));
    let r0 = builder.add_parameter(f32_tensor(&[4, 2]));
    let r1 = builder.add_parameter(f32_tensor(&[4, 2]));
    let mut nested_shape = None;
    let outputs = builder.replicate(2, &[vec![r0, r1]], BTreeMap::new(), |b, args| {
        // The nested query reads the outer argument directly.
        let inner = b.replicate(1, &[vec![c]], BTreeMap::new(), |b, inner_args| {
            let shape = b.emit_single(OpKind::Shape, &[args[0]])?;
            nested_shape = b.computation().defining_op(shape);
            let negated = b.emit_single(OpKind::Unary(UnaryOp::Neg), &[inner_args[0]])?;
            Ok(vec![shape, negated])
        })?;
        Ok(inner)
    })?;
    let mut module = module_with(builder.finish(&outputs)?);
    let nested_shape = nested_shape.expect("inner body built");

    ReplicateInvariantHoistingPass.run(&mut module, &mut PassContext::default())?;
    verify_module(&module)?;

    let main = main_of(&module);
    assert_eq!(main.op(nested_shape).operands, vec![r0]);
    assert_eq!(main.op(nested_shape).parent(), Computation::ENTRY);
    let again = ReplicateInvariantHoistingPass.run(&mut module, &mut PassContext::default())?;
    assert!(!again.changed);
    Ok(())
}

#[test]
fn region_ops_hoist_only_when_their_captures_are_invariant() -> anyhow::Result<()> {
    let mut builder = ComputationBuilder::new("main");
    let c = builder.add_parameter(f32_tensor(&[4]));
    let r0 = builder.add_parameter(f32_tensor(&[4]));
    let r1 = builder.add_parameter(f32_tensor(&[4]));
    let outputs = builder.replicate(2, &[vec![r0, r1]], BTreeMap::new(), |b, args| {
        let invariant = b.replicate(1, &[vec![c]], BTreeMap::new(), |b, inner_args| {
            let negated = b.emit_single(OpKind::Unary(UnaryOp::Neg), &[inner_args[0]])?;
            let offset = b.emit_single(OpKind::Binary(BinaryOp::Add), &[negated, c])?;
            Ok(vec![offset])
        })?;
        let captured = b.replicate(1, &[vec![c]], BTreeMap::new(), |b, inner_args| {
            let sum = b.emit_single(OpKind::Binary(BinaryOp::Add), &[inner_args[0], args[0]])?;
            Ok(vec![sum])
        })?;
        let sum = b.emit_single(OpKind::Binary(BinaryOp::Add), &[invariant[0], captured[0]])?;
        Ok(vec![sum])
    })?;
    let mut module = module_with(builder.finish(&outputs)?);

    let result = ReplicateInvariantHoistingPass.run(&mut module, &mut PassContext::default())?;
    assert_eq!(result.rewrites_applied, 1);
    verify_module(&module)?;

    let main = main_of(&module);
    assert_eq!(entry_opcodes(main), vec!["replicate", "replicate", "return"]);
    let outer = main.defining_op(outputs[0]).expect("outer replicate");
    let outer_body: Vec<&str> = main
        .block(main.op(outer).regions[0])
        .ops
        .iter()
        .map(|op| main.op(*op).kind.name())
        .collect();
    assert_eq!(outer_body, vec!["replicate", "add", "yield"]);
    Ok(())
}
