use super::*;
use crate::ir::builder::tensor;
use crate::ir::deps::OutputKind;
use crate::ir::{Device, Dtype, ProgramBuilder, TensorMeta};

fn quiet() -> CodegenConfig {
    CodegenConfig {
        benchmark_harness: false,
        size_asserts: false,
        ..CodegenConfig::default()
    }
}

fn f32x(size: &[i64], device: u32) -> TensorMeta {
    tensor(Dtype::Float32, size, Device::xpu(device))
}

fn generate(config: &CodegenConfig, ir: ProgramIr, is_inference: bool) -> GeneratedModule {
    WrapperGenerator::new(config)
        .generate(ir, is_inference)
        .unwrap()
}

fn add_program() -> ProgramIr {
    ProgramBuilder::new()
        .input("x", f32x(&[4, 4], 0))
        .call_into("buf0", "add", &["x", "x"])
        .output("buf0")
        .build()
}

#[test]
fn test_single_input_call_and_return() {
    let config = CodegenConfig {
        benchmark_harness: false,
        ..CodegenConfig::default()
    };
    let module = generate(&config, add_program(), true);
    let tail = "async_compile = XPUAsyncCompile()


async_compile.wait(globals())
del async_compile

def call(args):
    x, = args
    args.clear()
    assert_size_stride(x, (4, 4), (4, 1))
    buf0 = add(x, x)
    del x
    return (buf0, )
";
    assert!(module.source.ends_with(tail), "got:\n{}", module.source);
    assert!(module.source.starts_with("from ctypes import c_void_p, c_long\n"));
    assert!(!module.source.contains("alloc_from_pool(pool"));
    assert!(!module.source.contains("import triton\n"));
    assert_eq!(module.output_kinds, vec![OutputKind::Tensor]);
    assert!(module.allow_stack_allocation);
}

#[test]
fn test_multiple_inputs_unpack_in_order() {
    let ir = ProgramBuilder::new()
        .input("a", f32x(&[2], 0))
        .input("b", f32x(&[2], 0))
        .call_into("buf0", "aten.mul", &["a", "b"])
        .output("buf0")
        .build();
    let module = generate(&quiet(), ir, true);
    assert!(module.source.contains("    a, b = args\n    args.clear()\n"));
}

#[test]
fn test_no_inputs_and_no_outputs() {
    let ir = ProgramBuilder::new().raw("print('hi')").build();
    let module = generate(&quiet(), ir, true);
    assert!(module.source.ends_with("def call(args):\n    print('hi')\n    return ()\n"));
    assert!(!module.source.contains("args.clear()"));
}

#[test]
fn test_guard_scopes_are_sequential() {
    let ir = ProgramBuilder::new()
        .input("x", f32x(&[4], 0))
        .input("y", f32x(&[4], 1))
        .guard(0)
        .launch("triton_poi_0", &["x"], vec![SizeExpr::Int(4)])
        .end_guard()
        .guard(1)
        .launch("triton_poi_1", &["y"], vec![SizeExpr::Int(4)])
        .end_guard()
        .build();
    let module = generate(&quiet(), ir, true);
    let body = "    with torch.xpu._DeviceGuard(0):
        torch.xpu.set_device(0)
        stream0 = get_raw_stream(0)
        triton_poi_0.run(x, grid=grid(4), stream=stream0)
        del x
    with torch.xpu._DeviceGuard(1):
        torch.xpu.set_device(1)
        stream1 = get_raw_stream(1)
        triton_poi_1.run(y, grid=grid(4), stream=stream1)
        del y
    return ()
";
    assert!(module.source.ends_with(body), "got:\n{}", module.source);
    assert_eq!(module.source.matches("import triton\n").count(), 1);
    assert_eq!(
        module
            .source
            .matches("from torch._C import _xpu_getCurrentRawStream as get_raw_stream")
            .count(),
        1
    );
}

#[test]
fn test_stream_fetched_once_per_guard_scope() {
    let ir = ProgramBuilder::new()
        .input("x", f32x(&[4], 0))
        .guard(0)
        .launch("k0", &["x"], vec![SizeExpr::Int(1)])
        .launch("k1", &["x"], vec![SizeExpr::Int(1)])
        .end_guard()
        .guard(0)
        .launch("k2", &["x"], vec![SizeExpr::Int(1)])
        .end_guard()
        .output("x")
        .build();
    let module = generate(&quiet(), ir, true);
    assert_eq!(module.source.matches("stream0 = get_raw_stream(0)").count(), 2);
    assert_eq!(module.source.matches("stream=stream0)").count(), 3);
}

#[test]
fn test_nested_guards_restore_indentation() {
    let ir = ProgramBuilder::new()
        .guard(0)
        .guard(1)
        .raw("pass")
        .end_guard()
        .raw("after_inner()")
        .end_guard()
        .raw("after_outer()")
        .build();
    let module = generate(&quiet(), ir, true);
    assert!(module.source.contains(
        "    with torch.xpu._DeviceGuard(0):
        torch.xpu.set_device(0)
        with torch.xpu._DeviceGuard(1):
            torch.xpu.set_device(1)
            pass
        after_inner()
    after_outer()
"
    ));
}

#[test]
fn test_unclosed_guard_is_rejected() {
    let ir = ProgramBuilder::new().raw("pass").guard(2).raw("pass").build();
    let err = WrapperGenerator::new(&quiet())
        .generate(ir, true)
        .unwrap_err();
    assert_eq!(
        err,
        CodegenError::GuardStackViolation {
            fault: GuardFault::Unclosed { device_index: 2 },
            line: Some(1),
        }
    );
}

#[test]
fn test_exit_without_enter_is_rejected() {
    let ir = ProgramBuilder::new().raw("pass").end_guard().build();
    let err = WrapperGenerator::new(&quiet())
        .generate(ir, true)
        .unwrap_err();
    assert_eq!(
        err,
        CodegenError::GuardStackViolation {
            fault: GuardFault::ExitWithoutEnter,
            line: Some(1),
        }
    );
}

#[test]
fn test_launch_outside_guard_is_rejected() {
    let ir = ProgramBuilder::new()
        .input("x", f32x(&[4], 0))
        .launch("k0", &["x"], vec![SizeExpr::Int(4)])
        .build();
    let err = WrapperGenerator::new(&quiet())
        .generate(ir, true)
        .unwrap_err();
    assert_eq!(err.line(), Some(1));
    assert!(err.to_string().contains("outside a device guard"));
}

#[test]
fn test_malformed_ir_produces_no_module() {
    let ir = ProgramBuilder::new()
        .call_into("buf0", "aten.relu", &["missing"])
        .output("buf0")
        .build();
    let err = WrapperGenerator::new(&quiet())
        .generate(ir, true)
        .unwrap_err();
    assert!(matches!(err, CodegenError::MalformedIr { line: Some(0), .. }));

    let ir = ProgramBuilder::new().input("x", f32x(&[1], 0)).output("buf7").build();
    assert!(WrapperGenerator::new(&quiet()).generate(ir, true).is_err());
}

fn pool_program() -> ProgramIr {
    ProgramBuilder::new()
        .input("x", f32x(&[4], 0))
        .buffer("buf0", f32x(&[4], 0))
        .call("k0", &["x", "buf0"])
        .call_into("buf1", "k1", &["buf0"])
        .output("buf1")
        .build()
}

#[test]
fn test_memory_planning_uses_pools_for_inference() {
    let config = CodegenConfig {
        memory_planning: true,
        ..quiet()
    };
    let module = generate(&config, pool_program(), true);
    assert!(module.source.ends_with(
        "    pool0 = empty_strided((64, ), (1, ), device='xpu', dtype=torch.uint8)
    buf0 = alloc_from_pool(pool0, 0, torch.float32, (4, ), (1, ))
    k0(x, buf0)
    buf1 = k1(buf0)
    del pool0
    return (buf1, )
"
    ));
    assert!(!module.allow_stack_allocation);
}

#[test]
fn test_training_uses_reuse_pass() {
    let config = CodegenConfig {
        memory_planning: true,
        ..quiet()
    };
    let module = generate(&config, pool_program(), false);
    assert!(!module.source.contains("pool0"));
    assert!(module.source.ends_with(
        "    buf0 = empty_strided((4, ), (1, ), device='xpu', dtype=torch.float32)
    k0(x, buf0)
    del x
    buf1 = k1(buf0)
    del buf0
    return (buf1, )
"
    ));
    assert!(module.allow_stack_allocation);
}

#[test]
fn test_reuse_line_and_cpu_allocation() {
    let cpu = |size: &[i64]| tensor(Dtype::Int64, size, Device::cpu());
    let ir = ProgramBuilder::new()
        .buffer("buf0", cpu(&[8]))
        .call("fill", &["buf0"])
        .buffer("buf1", cpu(&[8]))
        .call("copy", &["buf0", "buf1"])
        .buffer("buf2", cpu(&[8]))
        .call("copy", &["buf1", "buf2"])
        .output("buf2")
        .build();
    let module = generate(&quiet(), ir, true);
    assert!(module
        .source
        .contains("    buf0 = empty_strided_cpu((8, ), (1, ), torch.int64)\n"));
    assert!(module.source.contains("    buf2 = buf0; del buf0  # reuse\n"));
}

#[test]
fn test_profiler_mark_wraps_whole_body() {
    let config = CodegenConfig {
        profiler_mark_wrapper_call: true,
        ..quiet()
    };
    let mut ir = add_program();
    ir.graph_id = 3;
    let module = generate(&config, ir, true);
    assert!(module.source.ends_with(
        "    from torch.profiler import record_function
    with record_function('graph_3_inductor_wrapper_call'):
        buf0 = add(x, x)
        del x
        return (buf0, )
"
    ));
}

#[test]
fn test_debug_flags_frame_the_body() {
    let config = CodegenConfig {
        debug_sync_graph: true,
        profile_bandwidth: true,
        store_cubin: true,
        ..quiet()
    };
    let module = generate(&config, add_program(), true);
    let src = &module.source;
    assert!(src.contains("import triton\n"));
    assert!(src.contains("def call(args):\n    torch.xpu.synchronize()\n    x, = args\n"));

    let start = src.find("    start_graph()").unwrap();
    let reset = src.find("kernel.cuda_kernel_saved = False").unwrap();
    let call = src.find("    buf0 = add(x, x)").unwrap();
    let sync = src.rfind("    torch.xpu.synchronize()").unwrap();
    let end = src.find("    end_graph()").unwrap();
    let save = src.find("kernel.save_cuda_kernel(").unwrap();
    let ret = src.find("    return (buf0, )").unwrap();
    assert!(start < reset && reset < call && call < sync);
    assert!(sync < end && end < save && save < ret);
    assert!(src.contains("                grid=(0, 0, 0),  # use dummy grid\n"));
}

#[test]
fn test_symbols_bound_from_input_dims() {
    let mut meta = f32x(&[1, 8], 0);
    meta.size[0] = SizeExpr::Sym("s0".into());
    let ir = ProgramBuilder::new()
        .input("x", meta)
        .symbolic_input("s1")
        .call_into("buf0", "aten.sum", &["x", "s0", "s1"])
        .output("buf0")
        .output("s1")
        .build();
    let config = CodegenConfig {
        size_asserts: true,
        ..quiet()
    };
    let module = generate(&config, ir, true);
    assert!(module.source.contains(
        "    x, s1 = args
    args.clear()
    s0 = x.size(0)
    assert_size_stride(x, (s0, 8), (8, 1))
"
    ));
    assert_eq!(module.output_kinds, vec![OutputKind::Tensor, OutputKind::Shape]);
    assert!(module.source.contains("    return (buf0, s1, )\n"));
}

#[test]
fn test_line_map_points_at_ir_lines() {
    let module = generate(&quiet(), add_program(), true);
    let line_of = |needle: &str| {
        module
            .source
            .lines()
            .position(|l| l == needle)
            .map(|i| i + 1)
            .unwrap()
    };
    assert_eq!(module.line_map.lookup(line_of("    buf0 = add(x, x)")), Some(1));
    assert_eq!(module.line_map.lookup(line_of("    del x")), None);
    assert_eq!(module.line_map.lookup(line_of("def call(args):")), None);
}

#[test]
fn test_harness_uses_override_hints() {
    let ir = ProgramBuilder::new()
        .symbolic_input("s0")
        .raw("pass")
        .build();
    let config = CodegenConfig::default();
    assert!(WrapperGenerator::new(&config).generate(ir.clone(), true).is_err());

    let hints: std::collections::BTreeMap<String, i64> =
        std::collections::BTreeMap::from([("s0".to_string(), 12)]);
    let module = WrapperGenerator::new(&config)
        .with_size_hints(&hints)
        .generate(ir, true)
        .unwrap();
    assert!(module.source.contains("    s0 = 12\n"));
    assert!(module.source.contains("call([s0])"));
}

#[test]
fn test_generation_is_deterministic() {
    let config = CodegenConfig::default();
    let a = generate(&config, add_program(), true);
    let b = generate(&config, add_program(), true);
    assert_eq!(a.source, b.source);
    assert_eq!(a.key, b.key);
}

#[test]
fn test_raw_read_is_emitted_before_del() {
    let ir = ProgramBuilder::new()
        .input("x", f32x(&[4], 0))
        .buffer("buf0", f32x(&[4], 0))
        .call("k", &["x", "buf0"])
        .raw("print(buf0.sum())")
        .build();
    let module = generate(&quiet(), ir, false);
    assert!(
        module.source.ends_with(
            "    k(x, buf0)\n    del x\n    print(buf0.sum())\n    del buf0\n    return ()\n"
        ),
        "got:\n{}",
        module.source
    );
}

#[test]
fn test_reinterpreted_buffer_is_not_reused_while_live() {
    let ir = ProgramBuilder::new()
        .input("x", f32x(&[4], 0))
        .buffer("buf0", f32x(&[4], 0))
        .call("k", &["x", "buf0"])
        .buffer("buf1", f32x(&[4], 0))
        .call_into(
            "buf2",
            "extern_kernels.mm",
            &["reinterpret_tensor(buf0, (4, ), (1, ), 0)", "buf1"],
        )
        .output("buf2")
        .build();
    let module = generate(&quiet(), ir, false);
    assert!(!module.source.contains("# reuse"));
    assert!(module.source.ends_with(
        "    buf1 = empty_strided((4, ), (1, ), device='xpu', dtype=torch.float32)
    buf2 = extern_kernels.mm(reinterpret_tensor(buf0, (4, ), (1, ), 0), buf1)
    del buf0
    del buf1
    return (buf2, )
"
    ));
}

#[test]
fn test_header_fragments_written_once() {
    let config = CodegenConfig {
        profile_bandwidth: true,
        ..quiet()
    };
    let mut out = CodeEmitter::new();
    write_header(&mut out, &config);
    write_header(&mut out, &config);
    write_triton_header_once(&mut out);
    assert!(out.has_fragment(HEADER_ID));
    assert!(out.has_fragment(TRITON_HEADER_ID));

    let header = out.region_text(Region::Header);
    assert!(header.starts_with("from ctypes import c_void_p, c_long\n"));
    assert_eq!(header.matches("async_compile = XPUAsyncCompile()").count(), 1);
    assert_eq!(header.matches("import triton\n").count(), 1);
}

#[test]
fn test_synthesized_lines_report_no_ir_line() {
    let launch = Line::KernelCall(KernelCall {
        target: "k0".to_string(),
        args: vec!["x".to_string()],
        result: None,
        launch: Launch::Device {
            grid: vec![SizeExpr::Int(4)],
        },
    });
    let mut out = CodeEmitter::new();
    let mut cx = EmissionContext::default();

    let err = write_line(&mut out, &mut cx, &launch, None).unwrap_err();
    assert_eq!(err.line(), None);
    let err = write_line(&mut out, &mut cx, &launch, Some(3)).unwrap_err();
    assert_eq!(err.line(), Some(3));
    let err = write_line(&mut out, &mut cx, &Line::DeviceGuardExit, None).unwrap_err();
    assert_eq!(
        err,
        CodegenError::GuardStackViolation {
            fault: GuardFault::ExitWithoutEnter,
            line: None,
        }
    );
}
