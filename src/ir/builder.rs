//! Fluent construction of `ProgramIr` for frontends and tests.

use super::*;

/// Builds a `ProgramIr` line by line.
#[derive(Default)]
pub struct ProgramBuilder {
    ir: ProgramIr,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn graph_id(mut self, id: u32) -> Self {
        self.ir.graph_id = id;
        self
    }

    pub fn hint(mut self, symbol: &str, value: i64) -> Self {
        self.ir.size_hints.insert(symbol.to_string(), value);
        self
    }

    pub fn input(mut self, name: &str, meta: TensorMeta) -> Self {
        self.ir.push(Line::InputDecl(GraphInput {
            name: name.to_string(),
            kind: InputKind::Tensor(meta),
        }));
        self
    }

    pub fn symbolic_input(mut self, name: &str) -> Self {
        self.ir.push(Line::InputDecl(GraphInput {
            name: name.to_string(),
            kind: InputKind::Symbolic,
        }));
        self
    }

    pub fn constant(mut self, name: &str, meta: TensorMeta) -> Self {
        self.ir.push(Line::ConstantDecl(ConstantDecl {
            name: name.to_string(),
            meta,
        }));
        self
    }

    pub fn buffer(mut self, name: &str, meta: TensorMeta) -> Self {
        self.ir.push(Line::BufferDecl(BufferDecl {
            name: name.to_string(),
            meta,
        }));
        self
    }

    /// Extern call with no bound result.
    pub fn call(self, target: &str, args: &[&str]) -> Self {
        self.push_call(None, target, args, Launch::Extern)
    }

    /// Extern call whose return value is bound to `result`.
    pub fn call_into(self, result: &str, target: &str, args: &[&str]) -> Self {
        self.push_call(Some(result), target, args, Launch::Extern)
    }

    /// Device kernel launch on the stream of the enclosing guard.
    pub fn launch(self, target: &str, args: &[&str], grid: Vec<SizeExpr>) -> Self {
        self.push_call(None, target, args, Launch::Device { grid })
    }

    fn push_call(mut self, result: Option<&str>, target: &str, args: &[&str], launch: Launch) -> Self {
        self.ir.push(Line::KernelCall(KernelCall {
            target: target.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            result: result.map(str::to_string),
            launch,
        }));
        self
    }

    pub fn guard(mut self, device_index: u32) -> Self {
        self.ir.push(Line::DeviceGuardEnter { device_index });
        self
    }

    pub fn end_guard(mut self) -> Self {
        self.ir.push(Line::DeviceGuardExit);
        self
    }

    pub fn raw(mut self, text: &str) -> Self {
        self.ir.push(Line::RawStatement {
            text: text.to_string(),
        });
        self
    }

    pub fn output(mut self, name: &str) -> Self {
        self.ir.outputs.push(name.to_string());
        self
    }

    pub fn build(self) -> ProgramIr {
        self.ir
    }
}

/// Contiguous tensor metadata with static dims.
pub fn tensor(dtype: Dtype, size: &[i64], device: Device) -> TensorMeta {
    let size: Vec<SizeExpr> = size.iter().map(|d| SizeExpr::Int(*d)).collect();
    let stride = contiguous_strides(&size).unwrap_or_default();
    TensorMeta {
        size,
        stride,
        device,
        dtype,
    }
}
