#![allow(dead_code)]

use std::sync::Once;

use irpass::ir::{Computation, DType, Module};
use irpass::ir_utils::tensor_type_static;
use irpass::ValueType;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Routes pass logs to the test harness. Honors `RUST_LOG`, defaults to `warn`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

pub fn f32_tensor(dims: &[usize]) -> ValueType {
    tensor_type_static(DType::F32, dims)
}

pub fn module_with(computation: Computation) -> Module {
    Module::new("test")
        .with_computation(computation)
        .expect("fresh module accepts computation")
}

pub fn main_of(module: &Module) -> &Computation {
    module.computations().first().expect("module has a computation")
}

/// Opcode names of the entry block in order.
pub fn entry_opcodes(computation: &Computation) -> Vec<&'static str> {
    computation
        .entry()
        .ops
        .iter()
        .map(|op| computation.op(*op).kind.name())
        .collect()
}
