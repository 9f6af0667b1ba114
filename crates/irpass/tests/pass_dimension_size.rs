mod support;

use irpass::dynamic_dimension::DynamicDimensionInference;
use irpass::ir::{verify_module, DType, OpKind, TensorLiteral, UnaryOp};
use irpass::ir_utils::{shape_mixed, tensor_spec_mixed, tensor_type_static, value_type_tensor};
use irpass::passes::{rewrite_with_inference, DimensionSizeRewriterPass};
use irpass::{ComputationBuilder, Pass, PassContext};
use support::{entry_opcodes, f32_tensor, init_tracing, main_of, module_with};

fn s32_scalar() -> irpass::ValueType {
    tensor_type_static(DType::S32, &[])
}

#[test]
fn static_dimension_becomes_constant() -> anyhow::Result<()> {
    init_tracing();
    let mut builder = ComputationBuilder::new("main");
    let v = builder.add_parameter(f32_tensor(&[5, 3, 4]));
    let size = builder.emit_single(OpKind::GetDimensionSize { dimension: 1 }, &[v])?;
    let mut module = module_with(builder.finish(&[size])?);

    let result = DimensionSizeRewriterPass.run(&mut module, &mut PassContext::default())?;
    assert!(result.changed);
    assert_eq!(result.erased_ops, 1);
    verify_module(&module)?;

    let main = main_of(&module);
    assert_eq!(entry_opcodes(main), vec!["constant", "return"]);
    let output = main.results()[0];
    let constant = main.defining_op(output).expect("constant");
    assert_eq!(
        main.op(constant).kind,
        OpKind::Constant(TensorLiteral::scalar_s32(3))
    );
    assert_eq!(main.type_of(output), &s32_scalar());

    let again = DimensionSizeRewriterPass.run(&mut module, &mut PassContext::default())?;
    assert!(!again.changed);
    Ok(())
}

#[test]
fn dynamic_dimension_resolves_to_inferred_size() -> anyhow::Result<()> {
    let mut builder = ComputationBuilder::new("main");
    let x = builder.add_parameter(f32_tensor(&[8, 4]));
    let n = builder.add_parameter(s32_scalar());
    let bounded = builder.emit_single(OpKind::SetDimensionSize { dimension: 0 }, &[x, n])?;
    let negated = builder.emit_single(OpKind::Unary(UnaryOp::Neg), &[bounded])?;
    let rows = builder.emit_single(OpKind::GetDimensionSize { dimension: 0 }, &[negated])?;
    let cols = builder.emit_single(OpKind::GetDimensionSize { dimension: 1 }, &[negated])?;
    let mut module = module_with(builder.finish(&[negated, rows, cols])?);

    let result = DimensionSizeRewriterPass.run(&mut module, &mut PassContext::default())?;
    assert!(result.changed);
    assert_eq!(result.rewrites_applied, 2);
    verify_module(&module)?;

    let main = main_of(&module);
    assert_eq!(main.results()[1], n, "dynamic rows must be the exact size value");
    let cols_op = main.defining_op(main.results()[2]).expect("constant");
    assert_eq!(
        main.op(cols_op).kind,
        OpKind::Constant(TensorLiteral::scalar_s32(4))
    );
    Ok(())
}

#[test]
fn unknown_dynamic_dimension_is_left_alone() -> anyhow::Result<()> {
    let mut builder = ComputationBuilder::new("main");
    let p = builder.add_parameter(value_type_tensor(tensor_spec_mixed(
        DType::F32,
        &[None, Some(4)],
    )));
    let size = builder.emit_single(OpKind::GetDimensionSize { dimension: 0 }, &[p])?;
    let mut module = module_with(builder.finish(&[size])?);
    let before = module.clone();

    let result = DimensionSizeRewriterPass.run(&mut module, &mut PassContext::default())?;
    assert!(!result.changed);
    assert_eq!(module, before);
    Ok(())
}

#[test]
fn caller_seeded_parameter_sizes_are_used() -> anyhow::Result<()> {
    let mut builder = ComputationBuilder::new("main");
    let p = builder.add_parameter(irpass::ValueType::tensor(
        DType::F32,
        shape_mixed(&[None, Some(4)]),
    ));
    let len = builder.add_parameter(s32_scalar());
    let size = builder.emit_single(OpKind::GetDimensionSize { dimension: 0 }, &[p])?;
    let mut computation = builder.finish(&[size])?;

    let inference = DynamicDimensionInference::run_with_seeds(&computation, [((p, 0), len)]);
    assert_eq!(inference.get_dynamic_size(p, 0), Some(len));

    let result = rewrite_with_inference(&mut computation, &inference)?;
    assert!(result.changed);
    assert_eq!(computation.results(), &[len]);
    Ok(())
}
