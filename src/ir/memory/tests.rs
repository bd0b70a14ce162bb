use super::*;
use crate::ir::builder::tensor;
use crate::ir::{Dtype, ProgramBuilder};

fn f32x(size: &[i64]) -> crate::ir::TensorMeta {
    tensor(Dtype::Float32, size, Device::xpu(0))
}

fn render(schedule: &[Scheduled]) -> Vec<String> {
    schedule.iter().map(|s| s.line.to_string()).collect()
}

#[test]
fn test_reuse_same_layout() {
    let ir = ProgramBuilder::new()
        .input("x", f32x(&[4, 4]))
        .buffer("buf0", f32x(&[4, 4]))
        .call("k0", &["x", "buf0"])
        .buffer("buf1", f32x(&[4, 4]))
        .call("k1", &["buf0", "buf1"])
        .buffer("buf2", f32x(&[4, 4]))
        .call("k2", &["buf1", "buf2"])
        .output("buf2")
        .build();
    let deps = DependencyGraph::analyze(&ir).unwrap();
    let planned = plan_reuse(&ir, &deps);
    assert_eq!(
        render(&planned),
        vec![
            "input x: f32[4, 4] stride [4, 1] @ xpu:0",
            "buffer buf0: f32[4, 4] stride [4, 1] @ xpu:0",
            "call k0(x, buf0)",
            "free x",
            "buffer buf1: f32[4, 4] stride [4, 1] @ xpu:0",
            "call k1(buf0, buf1)",
            "reuse buf0 -> buf2",
            "call k2(buf1, buf2)",
            "free buf1",
        ]
    );
    // The reuse line keeps its buffer declaration as origin.
    assert_eq!(planned[6].origin, Some(5));
    assert_eq!(planned[3].origin, None);
}

#[test]
fn test_reuse_requires_identical_layout() {
    let ir = ProgramBuilder::new()
        .buffer("buf0", f32x(&[8]))
        .call("k0", &["buf0"])
        .buffer("buf1", f32x(&[4]))
        .call("k1", &["buf1"])
        .output("buf1")
        .build();
    let deps = DependencyGraph::analyze(&ir).unwrap();
    let planned = render(&plan_reuse(&ir, &deps));
    assert!(planned.contains(&"free buf0".to_string()));
    assert!(!planned.iter().any(|l| l.starts_with("reuse")));
}

#[test]
fn test_outputs_and_constants_are_never_freed() {
    let ir = ProgramBuilder::new()
        .constant("c0", f32x(&[4]))
        .call_into("buf0", "aten.relu", &["c0"])
        .output("buf0")
        .build();
    let deps = DependencyGraph::analyze(&ir).unwrap();
    let planned = render(&plan_reuse(&ir, &deps));
    assert!(!planned.iter().any(|l| l.starts_with("free")));
}

#[test]
fn test_planned_schedule_revalidates() {
    let ir = ProgramBuilder::new()
        .input("x", f32x(&[16]))
        .buffer("buf0", f32x(&[16]))
        .call("k0", &["x", "buf0"])
        .buffer("buf1", f32x(&[16]))
        .call("k1", &["buf0", "buf1"])
        .output("buf1")
        .build();
    let deps = DependencyGraph::analyze(&ir).unwrap();
    let mut planned_ir = ir.clone();
    planned_ir.lines = plan_reuse(&ir, &deps).into_iter().map(|s| s.line).collect();
    planned_ir.spans.clear();
    assert!(DependencyGraph::analyze(&planned_ir).is_ok());
}

#[test]
fn test_assign_pools_overlapping_lifetimes() {
    // buf0 and buf1 are live together; buf2 starts after buf0 dies.
    let ir = ProgramBuilder::new()
        .buffer("buf0", f32x(&[16]))
        .buffer("buf1", f32x(&[32]))
        .call("k0", &["buf0", "buf1"])
        .buffer("buf2", f32x(&[8]))
        .call("k1", &["buf1", "buf2"])
        .call_into("out", "finish", &["buf2"])
        .output("out")
        .build();
    let deps = DependencyGraph::analyze(&ir).unwrap();
    let mut names = NameAllocator::new("pool");
    let pools = assign_pools(&ir, &deps, &mut names);
    assert_eq!(pools.len(), 1);
    let pool = &pools[0];
    assert_eq!(pool.name, "pool0");
    let offsets: Vec<u64> = pool.placements.iter().map(|p| p.offset).collect();
    // buf0: 64 bytes @0, buf1: 128 bytes @64, buf2 reuses the dead buf0 slot.
    assert_eq!(offsets, vec![0, 64, 0]);
    assert_eq!(pool.bytes, 192);
}

#[test]
fn test_plan_pools_emits_create_alloc_free() {
    let ir = ProgramBuilder::new()
        .input("x", f32x(&[4]))
        .buffer("buf0", f32x(&[4]))
        .call("k0", &["x", "buf0"])
        .call_into("buf1", "k1", &["buf0"])
        .output("buf1")
        .build();
    let deps = DependencyGraph::analyze(&ir).unwrap();
    let mut names = NameAllocator::new("pool");
    let planned = render(&plan_pools(&ir, &deps, &mut names));
    assert_eq!(
        planned,
        vec![
            "input x: f32[4] stride [1] @ xpu:0",
            "pool pool0 64 bytes @ xpu:0",
            "alloc buf0 from pool0+0",
            "call k0(x, buf0)",
            "call buf1 = k1(buf0)",
            "free pool pool0",
        ]
    );
}

#[test]
fn test_plan_pools_skips_symbolic_and_output_buffers() {
    let mut dynamic = f32x(&[4]);
    dynamic.size[0] = "s0".into();
    let ir = ProgramBuilder::new()
        .symbolic_input("s0")
        .buffer("buf0", dynamic)
        .buffer("buf1", f32x(&[4]))
        .call("k0", &["buf0", "buf1"])
        .output("buf1")
        .build();
    let deps = DependencyGraph::analyze(&ir).unwrap();
    let mut names = NameAllocator::new("pool");
    assert!(assign_pools(&ir, &deps, &mut names).is_empty());
}

#[test]
fn test_separate_pools_per_device() {
    let ir = ProgramBuilder::new()
        .buffer("buf0", f32x(&[4]))
        .buffer("buf1", tensor(Dtype::Float32, &[4], Device::xpu(1)))
        .call("k0", &["buf0", "buf1"])
        .build();
    let deps = DependencyGraph::analyze(&ir).unwrap();
    let mut names = NameAllocator::new("pool");
    let pools = assign_pools(&ir, &deps, &mut names);
    let names: Vec<&str> = pools.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["pool0", "pool1"]);
}

#[test]
fn test_align_and_name_allocator() {
    assert_eq!(align(0), 0);
    assert_eq!(align(1), 64);
    assert_eq!(align(64), 64);
    assert_eq!(align(65), 128);
    let mut names = NameAllocator::new("pool");
    assert_eq!(names.next_name(), "pool0");
    assert_eq!(names.next_name(), "pool1");
}

#[test]
fn test_raw_read_keeps_buffer_alive() {
    let ir = ProgramBuilder::new()
        .input("x", f32x(&[4]))
        .buffer("buf0", f32x(&[4]))
        .call("k", &["x", "buf0"])
        .raw("print(buf0.sum())")
        .build();
    let deps = DependencyGraph::analyze(&ir).unwrap();
    assert_eq!(
        render(&plan_reuse(&ir, &deps)),
        vec![
            "input x: f32[4] stride [1] @ xpu:0",
            "buffer buf0: f32[4] stride [1] @ xpu:0",
            "call k(x, buf0)",
            "free x",
            "raw print(buf0.sum())",
            "free buf0",
        ]
    );
}

fn reinterpret_program() -> ProgramIr {
    ProgramBuilder::new()
        .input("x", f32x(&[4]))
        .buffer("buf0", f32x(&[4]))
        .call("k", &["x", "buf0"])
        .buffer("buf1", f32x(&[4]))
        .call_into(
            "buf2",
            "extern_kernels.mm",
            &["reinterpret_tensor(buf0, (4, ), (1, ), 0)", "buf1"],
        )
        .output("buf2")
        .build()
}

#[test]
fn test_nested_argument_blocks_reuse() {
    let ir = reinterpret_program();
    let deps = DependencyGraph::analyze(&ir).unwrap();
    let planned = plan_reuse(&ir, &deps);
    assert_eq!(
        render(&planned),
        vec![
            "input x: f32[4] stride [1] @ xpu:0",
            "buffer buf0: f32[4] stride [1] @ xpu:0",
            "call k(x, buf0)",
            "free x",
            "buffer buf1: f32[4] stride [1] @ xpu:0",
            "call buf2 = extern_kernels.mm(reinterpret_tensor(buf0, (4, ), (1, ), 0), buf1)",
            "free buf0",
            "free buf1",
        ]
    );
    let rebuilt = ProgramIr {
        lines: planned.into_iter().map(|s| s.line).collect(),
        ..ir
    };
    assert!(DependencyGraph::analyze(&rebuilt).is_ok());
}

#[test]
fn test_nested_argument_keeps_pool_slot() {
    let ir = reinterpret_program();
    let deps = DependencyGraph::analyze(&ir).unwrap();
    let mut names = NameAllocator::new("pool");
    let pools = assign_pools(&ir, &deps, &mut names);
    let offsets: Vec<u64> = pools[0].placements.iter().map(|p| p.offset).collect();
    assert_eq!(offsets, vec![0, 64]);
    assert_eq!(pools[0].bytes, 128);
}
