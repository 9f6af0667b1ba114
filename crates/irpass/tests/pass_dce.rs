mod support;

use std::collections::BTreeMap;

use irpass::ir::{verify_module, DType, OpKind, UnaryOp};
use irpass::ir_utils::tensor_spec_static;
use irpass::passes::DeadCodeEliminationPass;
use irpass::{ComputationBuilder, Pass, PassContext, ValueType};
use support::{entry_opcodes, f32_tensor, init_tracing, main_of, module_with};

#[test]
fn unused_pure_ops_go_and_reads_stay() -> anyhow::Result<()> {
    init_tracing();
    let mut builder = ComputationBuilder::new("main");
    let x = builder.add_parameter(f32_tensor(&[4]));
    let v = builder.add_parameter(ValueType::Resource(tensor_spec_static(DType::F32, &[4])));
    let negated = builder.emit_single(OpKind::Unary(UnaryOp::Neg), &[x])?;
    builder.emit_single(OpKind::Unary(UnaryOp::Abs), &[negated])?;
    builder.emit_single(OpKind::ReadVariable, &[v])?;
    let mut module = module_with(builder.finish(&[x])?);

    let result = DeadCodeEliminationPass.run(&mut module, &mut PassContext::default())?;
    assert!(result.changed);
    assert_eq!(result.erased_ops, 2);
    verify_module(&module)?;
    assert_eq!(
        entry_opcodes(main_of(&module)),
        vec!["read-variable", "return"]
    );

    let again = DeadCodeEliminationPass.run(&mut module, &mut PassContext::default())?;
    assert!(!again.changed);
    Ok(())
}

#[test]
fn dead_ops_inside_a_replicate_region_are_removed() -> anyhow::Result<()> {
    let mut builder = ComputationBuilder::new("main");
    let r0 = builder.add_parameter(f32_tensor(&[4]));
    let r1 = builder.add_parameter(f32_tensor(&[4]));
    let outputs = builder.replicate(2, &[vec![r0, r1]], BTreeMap::new(), |b, args| {
        b.emit_single(OpKind::Unary(UnaryOp::Exp), &[args[0]])?;
        let kept = b.emit_single(OpKind::Unary(UnaryOp::Abs), &[args[0]])?;
        Ok(vec![kept])
    })?;
    // Only replica 0 reaches the return; the replicate itself still stays.
    let mut module = module_with(builder.finish(&outputs[..1])?);

    let result = DeadCodeEliminationPass.run(&mut module, &mut PassContext::default())?;
    assert_eq!(result.erased_ops, 1);
    verify_module(&module)?;

    let main = main_of(&module);
    assert_eq!(entry_opcodes(main), vec!["replicate", "return"]);
    let replicate = main.entry().ops[0];
    let region = main.op(replicate).regions[0];
    let region_ops: Vec<&str> = main
        .block(region)
        .ops
        .iter()
        .map(|op| main.op(*op).kind.name())
        .collect();
    assert_eq!(region_ops, vec!["abs", "yield"]);
    Ok(())
}

#[test]
fn unreturned_replicate_keeps_its_body() -> anyhow::Result<()> {
    let mut builder = ComputationBuilder::new("main");
    let r0 = builder.add_parameter(f32_tensor(&[4]));
    let r1 = builder.add_parameter(f32_tensor(&[4]));
    builder.replicate(2, &[vec![r0, r1]], BTreeMap::new(), |b, args| {
        let kept = b.emit_single(OpKind::Unary(UnaryOp::Neg), &[args[0]])?;
        Ok(vec![kept])
    })?;
    let mut module = module_with(builder.finish(&[r0])?);

    let result = DeadCodeEliminationPass.run(&mut module, &mut PassContext::default())?;
    assert!(!result.changed);
    assert_eq!(main_of(&module).num_ops(), 4);
    Ok(())
}
