mod support;

use std::collections::BTreeMap;

use irpass::ir::{verify_module, DType, Layout, OpKind, TensorSpec, UnaryOp};
use irpass::ir_utils::{shape_mixed, tensor_type_static};
use irpass::passes::ShapeInferencePass;
use irpass::{ComputationBuilder, Pass, PassContext, ValueType};
use support::{f32_tensor, init_tracing, main_of, module_with};

fn f32_dynamic(dims: &[Option<usize>]) -> ValueType {
    ValueType::tensor(DType::F32, shape_mixed(dims))
}

#[test]
fn dynamic_results_become_static_in_program_order() -> anyhow::Result<()> {
    init_tracing();
    let mut builder = ComputationBuilder::new("main");
    let x = builder.add_parameter(f32_tensor(&[2, 3]));
    let negated = builder.emit_typed(
        OpKind::Unary(UnaryOp::Neg),
        &[x],
        vec![f32_dynamic(&[None, Some(3)])],
    )?[0];
    let absolute = builder.emit_single(OpKind::Unary(UnaryOp::Abs), &[negated])?;
    assert_eq!(builder.value_type(absolute), Some(&f32_dynamic(&[None, Some(3)])));
    let mut module = module_with(builder.finish(&[absolute])?);

    let result = ShapeInferencePass.run(&mut module, &mut PassContext::default())?;
    assert!(result.changed);
    assert_eq!(result.rewrites_applied, 2);
    verify_module(&module)?;

    let main = main_of(&module);
    assert_eq!(main.type_of(negated), &f32_tensor(&[2, 3]));
    assert_eq!(main.type_of(absolute), &f32_tensor(&[2, 3]));

    let again = ShapeInferencePass.run(&mut module, &mut PassContext::default())?;
    assert!(!again.changed);
    Ok(())
}

#[test]
fn declared_layout_survives_refinement() -> anyhow::Result<()> {
    let mut builder = ComputationBuilder::new("main");
    let x = builder.add_parameter(f32_tensor(&[2, 3]));
    let declared = TensorSpec::new(DType::F32, shape_mixed(&[Some(2), None]))
        .with_layout(Layout::new([0, 1]));
    let copied = builder.emit_typed(OpKind::Copy, &[x], vec![ValueType::Tensor(declared)])?[0];
    let mut module = module_with(builder.finish(&[copied])?);

    let result = ShapeInferencePass.run(&mut module, &mut PassContext::default())?;
    assert!(result.changed);

    let spec = main_of(&module)
        .type_of(copied)
        .as_tensor()
        .expect("tensor")
        .clone();
    assert_eq!(spec.shape, shape_mixed(&[Some(2), Some(3)]));
    assert_eq!(spec.layout, Some(Layout::new([0, 1])));
    Ok(())
}

#[test]
fn replicate_region_arguments_follow_replica_zero() -> anyhow::Result<()> {
    let mut builder = ComputationBuilder::new("main");
    let p0 = builder.add_parameter(f32_tensor(&[4]));
    let p1 = builder.add_parameter(f32_tensor(&[4]));
    let r0 = builder.emit_typed(
        OpKind::Unary(UnaryOp::Neg),
        &[p0],
        vec![f32_dynamic(&[None])],
    )?[0];
    let r1 = builder.emit_typed(
        OpKind::Unary(UnaryOp::Neg),
        &[p1],
        vec![f32_dynamic(&[None])],
    )?[0];
    let mut region_arg = None;
    let outputs = builder.replicate(2, &[vec![r0, r1]], BTreeMap::new(), |b, args| {
        region_arg = Some(args[0]);
        let inner = b.emit_single(OpKind::Unary(UnaryOp::Abs), &[args[0]])?;
        Ok(vec![inner])
    })?;
    let mut module = module_with(builder.finish(&outputs)?);
    let region_arg = region_arg.expect("region built");

    let result = ShapeInferencePass.run(&mut module, &mut PassContext::default())?;
    // r0, r1, the region argument, abs and both replicate results.
    assert_eq!(result.rewrites_applied, 6);
    verify_module(&module)?;

    let main = main_of(&module);
    assert_eq!(main.type_of(region_arg), &f32_tensor(&[4]));
    for output in &outputs {
        assert_eq!(main.type_of(*output), &f32_tensor(&[4]));
    }
    Ok(())
}

#[test]
fn ops_the_oracle_rejects_are_skipped() -> anyhow::Result<()> {
    let mut builder = ComputationBuilder::new("main");
    let x = builder.add_parameter(tensor_type_static(DType::S32, &[3]));
    let negated = builder.emit_typed(
        OpKind::Unary(UnaryOp::Neg),
        &[x],
        vec![ValueType::tensor(DType::S32, shape_mixed(&[None]))],
    )?[0];
    let mut module = module_with(builder.finish(&[negated])?);
    // A dtype flip the oracle cannot accept; the pass must leave it alone.
    let json = module.to_json_string()?.replace("\"S32\"", "\"Pred\"");
    module = irpass::Module::from_json_str(&json)?;

    let result = ShapeInferencePass.run(&mut module, &mut PassContext::default())?;
    assert!(!result.changed);
    let main = main_of(&module);
    assert_eq!(
        main.type_of(main.results()[0]),
        &ValueType::tensor(DType::Pred, shape_mixed(&[None]))
    );
    Ok(())
}
