//! HLO-flavoured text dump of modules and computations. Output only, there is no parser.

use std::fmt;

use super::computation::{BlockId, Computation, OpId, ValueId};
use super::module::Module;
use super::ops::{Attribute, OpKind};
use super::types::{Dimension, Shape, TensorSpec, ValueType};

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_line(f, 0, &format!("module @{} {{", self.name))?;
        for computation in self.computations() {
            fmt_computation(computation, 1, f)?;
        }
        write_line(f, 0, "}")
    }
}

impl fmt::Display for Computation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_computation(self, 0, f)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_value_type(self))
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_shape(self))
    }
}

fn fmt_computation(
    computation: &Computation,
    indent: usize,
    f: &mut fmt::Formatter<'_>,
) -> fmt::Result {
    write_line(f, indent, &format!("computation @{} {{", computation.name()))?;
    let params = computation.parameters();
    if !params.is_empty() {
        write_line(f, indent + 1, "params:")?;
        for param in params {
            write_line(
                f,
                indent + 2,
                &format!("%{} : {}", param.0, format_value_type(computation.type_of(*param))),
            )?;
        }
    }
    write_line(f, indent + 1, "body:")?;
    fmt_block_ops(computation, Computation::ENTRY, indent + 2, f)?;
    write_line(f, indent, "}")
}

fn fmt_block_ops(
    computation: &Computation,
    block: BlockId,
    indent: usize,
    f: &mut fmt::Formatter<'_>,
) -> fmt::Result {
    for op in &computation.block(block).ops {
        fmt_operation(computation, *op, indent, f)?;
    }
    Ok(())
}

fn fmt_operation(
    computation: &Computation,
    id: OpId,
    indent: usize,
    f: &mut fmt::Formatter<'_>,
) -> fmt::Result {
    let op = computation.op(id);
    let mut line = String::new();
    if !op.results.is_empty() {
        line.push_str(&join_values(&op.results));
        line.push_str(" = ");
    }
    line.push_str(op.kind.name());
    line.push('(');
    line.push_str(&join_values(&op.operands));
    line.push(')');

    let mut attrs = kind_attributes(&op.kind);
    attrs.extend(
        op.attrs
            .iter()
            .map(|(name, value)| format!("{name} = {}", format_attribute(value))),
    );
    if !attrs.is_empty() {
        line.push_str(&format!(" {{{}}}", attrs.join(", ")));
    }
    if !op.results.is_empty() {
        let types = op
            .results
            .iter()
            .map(|result| format_value_type(computation.type_of(*result)))
            .collect::<Vec<_>>();
        line.push_str(" : ");
        line.push_str(&types.join(", "));
    }
    if let Some(location) = &op.location {
        line.push_str(&format!("  // {location}"));
    }
    write_line(f, indent, &line)?;

    for region in &op.regions {
        let args = computation
            .block(*region)
            .args
            .iter()
            .map(|arg| format!("%{} : {}", arg.0, format_value_type(computation.type_of(*arg))))
            .collect::<Vec<_>>();
        write_line(f, indent + 1, &format!("^{}({}) {{", region.0, args.join(", ")))?;
        fmt_block_ops(computation, *region, indent + 2, f)?;
        write_line(f, indent + 1, "}")?;
    }
    Ok(())
}

fn kind_attributes(kind: &OpKind) -> Vec<String> {
    match kind {
        OpKind::Constant(literal) => vec![format!("bytes = {}", literal.byte_len())],
        OpKind::Compare(spec) => vec![
            format!("direction = {:?}", spec.direction),
            format!("incompatible_shape_error = {}", spec.incompatible_shape_error),
        ],
        OpKind::BroadcastInDim(spec) => vec![
            format!("shape = {}", format_shape(&spec.result_shape)),
            format!("dimensions = {:?}", spec.dimensions),
        ],
        OpKind::Reduce(spec) => vec![
            format!("dimensions = {:?}", spec.dimensions),
            format!("to_apply = @{}", spec.to_apply),
        ],
        OpKind::GetTupleElement { index } => vec![format!("index = {index}")],
        OpKind::GetDimensionSize { dimension } | OpKind::SetDimensionSize { dimension } => {
            vec![format!("dimension = {dimension}")]
        }
        OpKind::Replicate(spec) => {
            let mut attrs = vec![format!("n = {}", spec.n)];
            for (virtual_device, devices) in &spec.devices {
                attrs.push(format!("{virtual_device} = {devices:?}"));
            }
            attrs
        }
        _ => Vec::new(),
    }
}

fn format_attribute(attribute: &Attribute) -> String {
    match attribute {
        Attribute::Bool(value) => value.to_string(),
        Attribute::Int(value) => value.to_string(),
        Attribute::String(value) => format!("{value:?}"),
        Attribute::IntArray(values) => format!("{values:?}"),
        Attribute::StringArray(values) => format!("{values:?}"),
    }
}

fn join_values(values: &[ValueId]) -> String {
    values
        .iter()
        .map(|value| format!("%{}", value.0))
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_value_type(value_type: &ValueType) -> String {
    match value_type {
        ValueType::Tensor(spec) => format!("tensor<{}>", format_tensor_spec(spec)),
        ValueType::Resource(spec) => format!("resource<{}>", format_tensor_spec(spec)),
        ValueType::Tuple(elements) => {
            let inner = elements
                .iter()
                .map(format_value_type)
                .collect::<Vec<_>>()
                .join(", ");
            format!("tuple<{inner}>")
        }
    }
}

fn format_tensor_spec(spec: &TensorSpec) -> String {
    let mut out = format!("{} x {}", spec.dtype, format_shape(&spec.shape));
    if let Some(layout) = &spec.layout {
        let dims = layout
            .minor_to_major
            .iter()
            .map(usize::to_string)
            .collect::<Vec<_>>();
        out.push_str(&format!(" {{{}}}", dims.join(",")));
    }
    out
}

fn format_shape(shape: &Shape) -> String {
    let dims = shape
        .dims()
        .iter()
        .map(|dim| match dim {
            Dimension::Static(v) => v.to_string(),
            Dimension::Dynamic => "?".to_string(),
        })
        .collect::<Vec<_>>();
    if dims.is_empty() {
        "[]".to_string()
    } else {
        dims.join("x")
    }
}

fn write_line(f: &mut fmt::Formatter<'_>, indent: usize, line: &str) -> fmt::Result {
    for _ in 0..indent {
        f.write_str("  ")?;
    }
    writeln!(f, "{line}")
}
