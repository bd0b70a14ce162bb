//! Python wrapper generation for XPU graphs.
//!
//! One `generate` call owns all of its mutable state: the emitter (and with
//! it the write-once header registry), the guard stack and the stream cache
//! live in locals and are dropped when the call returns. Any error means no
//! module is produced.

use std::collections::HashSet;

use tracing::{debug, info_span};

use super::benchmark::{self, BenchmarkSpec};
use super::emitter::{CodeEmitter, Region};
use super::{python_tuple, shape_tuple, GeneratedModule};
use crate::config::CodegenConfig;
use crate::dispatch::DeviceFamily;
use crate::error::{CodegenError, GuardFault};
use crate::ir::deps;
use crate::ir::memory::{self, NameAllocator, Scheduled};
use crate::ir::{
    BufferDecl, InputKind, KernelCall, Launch, Line, MemoryLine, ProgramIr, SizeExpr, SizeHints,
};

const HEADER: &str = r#"
from ctypes import c_void_p, c_long
import torch
import intel_extension_for_pytorch
import math
import random
import os
import tempfile
from math import inf, nan
from torch._inductor.hooks import run_intermediate_hooks
from torch._inductor.utils import maybe_profile
from torch._inductor.codegen.memory_planning import _align as align

from torch import empty_strided, device
from intel_extension_for_pytorch._inductor.xpu.codecache import XPUAsyncCompile
from torch._inductor.select_algorithm import extern_kernels
from torch._inductor.codegen.multi_kernel import MultiKernelCall

aten = torch.ops.aten
inductor_ops = torch.ops.inductor
assert_size_stride = torch._C._dynamo.guards.assert_size_stride
empty_strided_cpu = torch._C._dynamo.guards._empty_strided_cpu
alloc_from_pool = torch.ops.inductor._alloc_from_pool
reinterpret_tensor = torch.ops.inductor._reinterpret_tensor
async_compile = XPUAsyncCompile()
"#;

pub const HEADER_ID: &str = "header";

pub const TRITON_HEADER_ID: &str = "triton_header";

const TRITON_HEADER: &str = r#"
import triton
import triton.language as tl
from torch._inductor.triton_heuristics import grid, split_scan_grid, start_graph, end_graph
from torch._C import _xpu_getCurrentRawStream as get_raw_stream
"#;

const RESET_KERNEL_SAVED_FLAGS: &str = r#"
for kernel in globals().values():
    if isinstance(kernel, torch._inductor.triton_heuristics.CachingAutotuner):
        kernel.cuda_kernel_saved = False
"#;

const SAVE_UNCOMPILED_KERNELS: &str = r#"
for kernel in globals().values():
    if isinstance(kernel, torch._inductor.triton_heuristics.CachingAutotuner):
        if not kernel.cuda_kernel_saved:
            if len(kernel.launchers) == 0:
                kernel.precompile()
            kernel.save_cuda_kernel(
                grid=(0, 0, 0),  # use dummy grid
                stream="stream",  # use dummy stream
                launcher=kernel.launchers[0],
            )
"#;

/// An open device guard during the walk.
struct GuardFrame {
    device_index: u32,
    /// IR line of the matching enter.
    line: Option<usize>,
    /// `streamN` already fetched inside this scope.
    stream_ready: bool,
}

#[derive(Default)]
struct EmissionContext {
    guards: Vec<GuardFrame>,
}

/// Generates the host-side module for one compiled graph.
pub struct WrapperGenerator<'a> {
    config: &'a CodegenConfig,
    hints: Option<&'a dyn SizeHints>,
}

impl<'a> WrapperGenerator<'a> {
    pub fn new(config: &'a CodegenConfig) -> Self {
        Self {
            config,
            hints: None,
        }
    }

    /// Override the program's own `hint` table for the benchmark harness.
    pub fn with_size_hints(mut self, hints: &'a dyn SizeHints) -> Self {
        self.hints = Some(hints);
        self
    }

    fn size_hints<'b>(&'b self, ir: &'b ProgramIr) -> &'b dyn SizeHints {
        match self.hints {
            Some(hints) => hints,
            None => &ir.size_hints,
        }
    }

    /// Validate `ir`, run a memory pass and emit the module.
    pub fn generate(
        &self,
        ir: ProgramIr,
        is_inference: bool,
    ) -> Result<GeneratedModule, CodegenError> {
        let span = info_span!("generate", graph = ir.graph_id, lines = ir.lines.len());
        let _enter = span.enter();

        let (deps, output_kinds) = deps::validate(&ir)?;

        let planned = is_inference && self.config.memory_planning;
        let schedule = if planned {
            let mut names = NameAllocator::new("pool");
            memory::plan_pools(&ir, &deps, &mut names)
        } else {
            memory::plan_reuse(&ir, &deps)
        };
        debug!(planned, scheduled = schedule.len(), "memory pass done");

        let mut out = CodeEmitter::new();
        write_header(&mut out, self.config);
        self.write_prefix(&mut out, &ir);

        if self.config.profiler_mark_wrapper_call {
            out.writeline(Region::Body, "from torch.profiler import record_function");
            out.writeline(
                Region::Body,
                &format!(
                    "with record_function('graph_{}_inductor_wrapper_call'):",
                    ir.graph_id
                ),
            );
            let mut scope = out.scoped_indent(Region::Body);
            self.write_body(&mut scope, &ir, &schedule)?;
        } else {
            self.write_body(&mut out, &ir, &schedule)?;
        }

        if self.config.benchmark_harness {
            let spec = BenchmarkSpec::from_ir(&ir, self.size_hints(&ir))?;
            benchmark::write_harness(&mut out, &spec, self.config);
        }

        let (source, line_map) = out.finalize();
        debug!(
            bytes = source.len(),
            mapped = line_map.entries().len(),
            "module emitted"
        );
        Ok(GeneratedModule::new(source, line_map, output_kinds, !planned))
    }

    fn write_prefix(&self, out: &mut CodeEmitter, ir: &ProgramIr) {
        out.blank(Region::Prefix);
        out.blank(Region::Prefix);
        out.writeline(Region::Prefix, "async_compile.wait(globals())");
        out.writeline(Region::Prefix, "del async_compile");
        out.blank(Region::Prefix);
        out.writeline(Region::Prefix, "def call(args):");

        let mut scope = out.scoped_indent(Region::Prefix);
        if self.config.debug_sync_graph {
            scope.writeline(Region::Prefix, "torch.xpu.synchronize()");
        }

        let names = ir.input_names();
        match names.as_slice() {
            [] => {}
            [one] => scope.writeline(Region::Prefix, &format!("{}, = args", one)),
            many => scope.writeline(Region::Prefix, &format!("{} = args", many.join(", "))),
        }
        if !names.is_empty() {
            scope.writeline(Region::Prefix, "args.clear()");
        }

        // Symbols carried by tensor dims are read back from the tensors.
        let mut bound: HashSet<&str> = ir
            .inputs()
            .filter(|i| i.kind == InputKind::Symbolic)
            .map(|i| i.name.as_str())
            .collect();
        for (i, line) in ir.lines.iter().enumerate() {
            let Line::InputDecl(input) = line else { continue };
            let Some(meta) = input.tensor_meta() else { continue };
            scope.set_origin(Some(i));
            for (method, dims) in [("size", &meta.size), ("stride", &meta.stride)] {
                for (dim, expr) in dims.iter().enumerate() {
                    if let SizeExpr::Sym(sym) = expr {
                        if bound.insert(sym.as_str()) {
                            scope.writeline(
                                Region::Prefix,
                                &format!("{} = {}.{}({})", sym, input.name, method, dim),
                            );
                        }
                    }
                }
            }
            scope.set_origin(None);
        }

        if self.config.size_asserts {
            for (i, line) in ir.lines.iter().enumerate() {
                let Line::InputDecl(input) = line else { continue };
                let Some(meta) = input.tensor_meta() else { continue };
                scope.set_origin(Some(i));
                scope.writeline(
                    Region::Prefix,
                    &format!(
                        "assert_size_stride({}, {}, {})",
                        input.name,
                        shape_tuple(&meta.size),
                        shape_tuple(&meta.stride)
                    ),
                );
            }
            scope.set_origin(None);
        }
    }

    fn write_body(
        &self,
        out: &mut CodeEmitter,
        ir: &ProgramIr,
        schedule: &[Scheduled],
    ) -> Result<(), CodegenError> {
        if self.config.profile_bandwidth {
            out.writeline(Region::Body, "start_graph()");
        }
        if self.config.store_cubin {
            out.append(Region::Body, RESET_KERNEL_SAVED_FLAGS);
        }

        let mut cx = EmissionContext::default();
        for scheduled in schedule {
            out.set_origin(scheduled.origin);
            write_line(out, &mut cx, &scheduled.line, scheduled.origin)?;
        }
        out.set_origin(None);

        if let Some(open) = cx.guards.last() {
            return Err(CodegenError::GuardStackViolation {
                fault: GuardFault::Unclosed {
                    device_index: open.device_index,
                },
                line: open.line,
            });
        }

        if self.config.debug_sync_graph {
            out.writeline(Region::Body, "torch.xpu.synchronize()");
        }
        if self.config.profile_bandwidth {
            out.writeline(Region::Body, "end_graph()");
        }
        if self.config.store_cubin {
            out.append(Region::Body, SAVE_UNCOMPILED_KERNELS);
        }

        if ir.outputs.is_empty() {
            out.writeline(Region::Body, "return ()");
        } else {
            out.writeline(
                Region::Body,
                &format!("return ({}, )", ir.outputs.join(", ")),
            );
        }
        Ok(())
    }
}

/// Runtime imports and helper aliases, plus the Triton imports when
/// bandwidth profiling needs `start_graph` before any stream is fetched.
fn write_header(out: &mut CodeEmitter, config: &CodegenConfig) {
    out.write_once(HEADER_ID, HEADER);
    if config.profile_bandwidth {
        write_triton_header_once(out);
    }
}

fn write_triton_header_once(out: &mut CodeEmitter) {
    out.write_once(TRITON_HEADER_ID, TRITON_HEADER);
}

/// One handler per line variant. `at` is the IR line, `None` for
/// directives a memory pass synthesized.
fn write_line(
    out: &mut CodeEmitter,
    cx: &mut EmissionContext,
    line: &Line,
    at: Option<usize>,
) -> Result<(), CodegenError> {
    match line {
        // Inputs are unpacked in the prefix; constants are module globals.
        Line::InputDecl(_) | Line::ConstantDecl(_) => {}
        Line::BufferDecl(buffer) => out.writeline(Region::Body, &allocation(buffer)),
        Line::KernelCall(call) => write_kernel_call(out, cx, call, at)?,
        Line::DeviceGuardEnter { device_index } => {
            debug!(device = device_index, line = ?at, "enter device guard");
            out.writeline(
                Region::Body,
                &format!("with torch.xpu._DeviceGuard({}):", device_index),
            );
            out.push_indent(Region::Body);
            out.writeline(
                Region::Body,
                &format!("torch.xpu.set_device({})", device_index),
            );
            cx.guards.push(GuardFrame {
                device_index: *device_index,
                line: at,
                stream_ready: false,
            });
        }
        Line::DeviceGuardExit => {
            if cx.guards.pop().is_none() {
                return Err(CodegenError::GuardStackViolation {
                    fault: GuardFault::ExitWithoutEnter,
                    line: at,
                });
            }
            out.pop_indent(Region::Body);
        }
        Line::RawStatement { text } => out.append(Region::Body, text),
        Line::Memory(directive) => out.writeline(Region::Body, &memory_directive(directive)),
    }
    Ok(())
}

fn write_kernel_call(
    out: &mut CodeEmitter,
    cx: &mut EmissionContext,
    call: &KernelCall,
    at: Option<usize>,
) -> Result<(), CodegenError> {
    let args = call.args.join(", ");
    match &call.launch {
        Launch::Extern => {
            let text = match &call.result {
                Some(result) => format!("{} = {}({})", result, call.target, args),
                None => format!("{}({})", call.target, args),
            };
            out.writeline(Region::Body, &text);
        }
        Launch::Device { grid } => {
            let Some(frame) = cx.guards.last_mut() else {
                return Err(CodegenError::malformed(
                    format!(
                        "device kernel '{}' is launched outside a device guard",
                        call.target
                    ),
                    at,
                ));
            };
            let stream = format!("stream{}", frame.device_index);
            if !frame.stream_ready {
                write_triton_header_once(out);
                out.writeline(
                    Region::Body,
                    &format!("{} = get_raw_stream({})", stream, frame.device_index),
                );
                frame.stream_ready = true;
            }
            let grid: Vec<String> = grid.iter().map(|g| g.to_string()).collect();
            let mut parts = Vec::with_capacity(call.args.len() + 2);
            if !args.is_empty() {
                parts.push(args);
            }
            parts.push(format!("grid=grid({})", grid.join(", ")));
            parts.push(format!("stream={}", stream));
            out.writeline(
                Region::Body,
                &format!("{}.run({})", call.target, parts.join(", ")),
            );
        }
    }
    Ok(())
}

fn allocation(buffer: &BufferDecl) -> String {
    let meta = &buffer.meta;
    let size = shape_tuple(&meta.size);
    let stride = shape_tuple(&meta.stride);
    match meta.device.family {
        DeviceFamily::Cpu => format!(
            "{} = empty_strided_cpu({}, {}, {})",
            buffer.name,
            size,
            stride,
            meta.dtype.torch_name()
        ),
        DeviceFamily::Xpu => format!(
            "{} = empty_strided({}, {}, device='xpu', dtype={})",
            buffer.name,
            size,
            stride,
            meta.dtype.torch_name()
        ),
    }
}

fn memory_directive(directive: &MemoryLine) -> String {
    match directive {
        MemoryLine::Free { name } => format!("del {}", name),
        MemoryLine::Reuse { from, to } => format!("{} = {}; del {}  # reuse", to, from, from),
        MemoryLine::PoolCreate {
            pool,
            bytes,
            device,
        } => {
            let size = python_tuple(&[*bytes]);
            match device.family {
                DeviceFamily::Cpu => {
                    format!("{} = empty_strided_cpu({}, (1, ), torch.uint8)", pool, size)
                }
                DeviceFamily::Xpu => format!(
                    "{} = empty_strided({}, (1, ), device='xpu', dtype=torch.uint8)",
                    pool, size
                ),
            }
        }
        MemoryLine::PoolAlloc {
            pool,
            offset,
            buffer,
        } => format!(
            "{} = alloc_from_pool({}, {}, {}, {}, {})",
            buffer.name,
            pool,
            offset,
            buffer.meta.dtype.torch_name(),
            shape_tuple(&buffer.meta.size),
            shape_tuple(&buffer.meta.stride)
        ),
        MemoryLine::PoolFree { pool } => format!("del {}", pool),
    }
}

#[cfg(test)]
mod tests;
