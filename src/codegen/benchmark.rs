//! Standalone timing harness appended to generated modules.
//!
//! The harness fabricates one random tensor per constant and tensor input
//! and one integer per symbolic input, then times `call` on them.

use super::emitter::{CodeEmitter, Region};
use super::python_tuple;
use crate::config::CodegenConfig;
use crate::error::CodegenError;
use crate::ir::{evaluate, Device, Dtype, InputKind, Line, ProgramIr, SizeHints, TensorMeta};

/// A tensor whose every dimension has been resolved to a number.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyntheticTensor {
    pub name: String,
    pub size: Vec<i64>,
    pub stride: Vec<i64>,
    pub device: Device,
    pub dtype: Dtype,
}

impl SyntheticTensor {
    fn resolve(
        name: &str,
        meta: &TensorMeta,
        hints: &dyn SizeHints,
        line: usize,
    ) -> Result<Self, CodegenError> {
        let eval = |dims: &[crate::ir::SizeExpr]| {
            dims.iter()
                .map(|d| evaluate(d, hints).map_err(|e| e.at_line(line)))
                .collect::<Result<Vec<i64>, _>>()
        };
        Ok(Self {
            name: name.to_string(),
            size: eval(&meta.size)?,
            stride: eval(&meta.stride)?,
            device: meta.device,
            dtype: meta.dtype,
        })
    }

    fn rand_strided(&self) -> String {
        format!(
            "{} = rand_strided({}, {}, device='{}', dtype={})",
            self.name,
            python_tuple(&self.size),
            python_tuple(&self.stride),
            self.device,
            self.dtype.torch_name()
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BenchmarkInput {
    Tensor(SyntheticTensor),
    Scalar { name: String, value: i64 },
}

impl BenchmarkInput {
    pub fn name(&self) -> &str {
        match self {
            BenchmarkInput::Tensor(t) => &t.name,
            BenchmarkInput::Scalar { name, .. } => name,
        }
    }
}

/// Synthetic arguments for one graph, built fresh per generation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BenchmarkSpec {
    pub constants: Vec<SyntheticTensor>,
    /// In `call` argument order.
    pub inputs: Vec<BenchmarkInput>,
}

impl BenchmarkSpec {
    pub fn from_ir(ir: &ProgramIr, hints: &dyn SizeHints) -> Result<Self, CodegenError> {
        let mut spec = BenchmarkSpec::default();
        for (i, line) in ir.lines.iter().enumerate() {
            match line {
                Line::ConstantDecl(c) => {
                    spec.constants
                        .push(SyntheticTensor::resolve(&c.name, &c.meta, hints, i)?);
                }
                Line::InputDecl(input) => match &input.kind {
                    InputKind::Tensor(meta) => spec.inputs.push(BenchmarkInput::Tensor(
                        SyntheticTensor::resolve(&input.name, meta, hints, i)?,
                    )),
                    InputKind::Symbolic => {
                        let value = hints.size_hint(&input.name).ok_or_else(|| {
                            CodegenError::malformed(
                                format!("no size hint for symbolic input '{}'", input.name),
                                Some(i),
                            )
                        })?;
                        spec.inputs.push(BenchmarkInput::Scalar {
                            name: input.name.clone(),
                            value,
                        });
                    }
                },
                _ => {}
            }
        }
        Ok(spec)
    }

    /// Random tensors the harness creates (constants plus tensor inputs).
    pub fn tensor_count(&self) -> usize {
        self.constants.len()
            + self
                .inputs
                .iter()
                .filter(|i| matches!(i, BenchmarkInput::Tensor(_)))
                .count()
    }

    pub fn scalar_count(&self) -> usize {
        self.inputs
            .iter()
            .filter(|i| matches!(i, BenchmarkInput::Scalar { .. }))
            .count()
    }
}

/// Append `benchmark_compiled_module` and the `__main__` entry point.
pub fn write_harness(out: &mut CodeEmitter, spec: &BenchmarkSpec, config: &CodegenConfig) {
    out.set_origin(None);
    out.blank(Region::Suffix);
    out.blank(Region::Suffix);
    out.writeline(
        Region::Suffix,
        &format!(
            "def benchmark_compiled_module(times={}, repeat={}):",
            config.benchmark_times, config.benchmark_repeat
        ),
    );
    {
        let mut body = out.scoped_indent(Region::Suffix);
        body.writeline(Region::Suffix, "from torch._dynamo.testing import rand_strided");
        body.writeline(Region::Suffix, "from torch._inductor.utils import print_performance");

        // Constants are module globals, so the harness rebinds them globally.
        for c in &spec.constants {
            body.writeline(Region::Suffix, &format!("global {}", c.name));
            body.writeline(Region::Suffix, &c.rand_strided());
        }
        for input in &spec.inputs {
            match input {
                BenchmarkInput::Tensor(t) => body.writeline(Region::Suffix, &t.rand_strided()),
                BenchmarkInput::Scalar { name, value } => {
                    body.writeline(Region::Suffix, &format!("{} = {}", name, value))
                }
            }
        }

        let args: Vec<&str> = spec.inputs.iter().map(BenchmarkInput::name).collect();
        body.writeline(
            Region::Suffix,
            &format!(
                "return print_performance(lambda: call([{}]), times=times, repeat=repeat, device='xpu')",
                args.join(", ")
            ),
        );
    }

    out.blank(Region::Suffix);
    out.blank(Region::Suffix);
    out.writeline(Region::Suffix, "if __name__ == \"__main__\":");
    let mut main = out.scoped_indent(Region::Suffix);
    main.writeline(
        Region::Suffix,
        "from intel_extension_for_pytorch._inductor.xpu.wrapper_benchmark import compiled_module_main",
    );
    main.writeline(
        Region::Suffix,
        &format!(
            "compiled_module_main('{}', benchmark_compiled_module)",
            config.benchmark_name
        ),
    );
}
