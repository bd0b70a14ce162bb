//! Memory passes: turn buffer lifetimes into explicit storage directives.
//!
//! Both passes read the original line list plus its `DependencyGraph` and
//! produce a new schedule. Inserted directives never precede a line that
//! still reads the storage they release.

use std::collections::{BTreeMap, HashSet};

use super::deps::DependencyGraph;
use super::{BufferDecl, Device, InputKind, Line, MemoryLine, ProgramIr};

/// Pool offsets are aligned to this many bytes.
pub const ALIGN_BYTES: u64 = 64;

/// A line in emission order, tagged with the IR line it came from.
#[derive(Clone, Debug, PartialEq)]
pub struct Scheduled {
    pub line: Line,
    /// `None` for directives synthesized by a pass.
    pub origin: Option<usize>,
}

/// Monotonic name source for synthesized storage (`pool0`, `pool1`, ...).
#[derive(Debug)]
pub struct NameAllocator {
    prefix: &'static str,
    next: u32,
}

impl NameAllocator {
    pub fn new(prefix: &'static str) -> Self {
        Self { prefix, next: 0 }
    }

    pub fn next_name(&mut self) -> String {
        let name = format!("{}{}", self.prefix, self.next);
        self.next += 1;
        name
    }
}

pub fn align(bytes: u64) -> u64 {
    bytes.div_ceil(ALIGN_BYTES) * ALIGN_BYTES
}

/// Names whose storage this program owns and may release early.
fn owned_names(ir: &ProgramIr) -> Vec<(usize, String)> {
    let outputs: HashSet<&str> = ir.outputs.iter().map(String::as_str).collect();
    let mut owned = Vec::new();
    for (i, line) in ir.lines.iter().enumerate() {
        let name = match line {
            Line::InputDecl(input) if matches!(input.kind, InputKind::Tensor(_)) => {
                Some(input.name.as_str())
            }
            Line::BufferDecl(b) => Some(b.name.as_str()),
            Line::KernelCall(call) => call.result.as_deref(),
            _ => None,
        };
        if let Some(name) = name {
            if !outputs.contains(name) {
                owned.push((i, name.to_string()));
            }
        }
    }
    owned
}

/// Lifetime-based reuse: free each owned value after its last use, and let
/// a new buffer take over a freed buffer with the identical layout.
pub fn plan_reuse(ir: &ProgramIr, deps: &DependencyGraph) -> Vec<Scheduled> {
    let mut dies_at: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    for (_, name) in owned_names(ir) {
        if let Some(last) = deps.last_use(&name) {
            dies_at.entry(last).or_default().push(name);
        }
    }

    // Slots are `None` once a pending free has been folded into a reuse.
    let mut out: Vec<Option<Scheduled>> = Vec::with_capacity(ir.lines.len());
    // Freed buffers available for reuse: (name, layout, slot of its free).
    let mut freed: Vec<(String, BufferDecl, usize)> = Vec::new();
    let buffers: BTreeMap<&str, &BufferDecl> = ir
        .lines
        .iter()
        .filter_map(|l| match l {
            Line::BufferDecl(b) => Some((b.name.as_str(), b)),
            _ => None,
        })
        .collect();

    for (i, line) in ir.lines.iter().enumerate() {
        let reused = match line {
            Line::BufferDecl(new) => freed
                .iter()
                .rposition(|(_, old, _)| old.meta == new.meta)
                .map(|pos| (freed.remove(pos), new.name.clone())),
            _ => None,
        };

        match reused {
            Some(((from, _, slot), to)) => {
                out[slot] = None;
                out.push(Some(Scheduled {
                    line: Line::Memory(MemoryLine::Reuse { from, to }),
                    origin: Some(i),
                }));
            }
            None => out.push(Some(Scheduled {
                line: line.clone(),
                origin: Some(i),
            })),
        }

        for name in dies_at.remove(&i).unwrap_or_default() {
            let slot = out.len();
            if let Some(decl) = buffers.get(name.as_str()) {
                freed.push((name.clone(), (*decl).clone(), slot));
            }
            out.push(Some(Scheduled {
                line: Line::Memory(MemoryLine::Free { name }),
                origin: None,
            }));
        }
    }

    out.into_iter().flatten().collect()
}

/// One buffer placed inside a pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Placement {
    pub line: usize,
    pub offset: u64,
    pub bytes: u64,
    pub last_use: usize,
}

/// Pool layout for one device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolPlan {
    pub name: String,
    pub device: Device,
    pub bytes: u64,
    pub placements: Vec<Placement>,
}

/// First-fit offset assignment over live intervals, per device.
pub fn assign_pools(
    ir: &ProgramIr,
    deps: &DependencyGraph,
    names: &mut NameAllocator,
) -> Vec<PoolPlan> {
    let outputs: HashSet<&str> = ir.outputs.iter().map(String::as_str).collect();
    let mut pools: Vec<PoolPlan> = Vec::new();

    for (i, line) in ir.lines.iter().enumerate() {
        let Line::BufferDecl(b) = line else { continue };
        if outputs.contains(b.name.as_str()) {
            continue;
        }
        let Some(bytes) = b.meta.storage_bytes().filter(|n| *n > 0) else {
            continue;
        };
        let last_use = deps.last_use(&b.name).unwrap_or(i);

        let size = align(bytes);

        let idx = match pools.iter().position(|p| p.device == b.meta.device) {
            Some(p) => p,
            None => {
                pools.push(PoolPlan {
                    name: names.next_name(),
                    device: b.meta.device,
                    bytes: 0,
                    placements: Vec::new(),
                });
                pools.len() - 1
            }
        };
        let pool = &mut pools[idx];

        let mut live: Vec<&Placement> = pool
            .placements
            .iter()
            .filter(|p| p.last_use >= i)
            .collect();
        live.sort_by_key(|p| p.offset);

        let mut offset = 0u64;
        for p in live {
            if offset.saturating_add(size) <= p.offset {
                break;
            }
            offset = offset.max(p.offset + align(p.bytes));
        }
        // Buffers that cannot fit in the address space keep a plain allocation.
        let Some(end) = offset.checked_add(size) else {
            continue;
        };

        pool.bytes = pool.bytes.max(end);
        pool.placements.push(Placement {
            line: i,
            offset,
            bytes,
            last_use,
        });
    }

    pools
}

/// Pool-based planning: planned buffers become pool views, each pool is
/// created before its first view and released after its last use.
pub fn plan_pools(
    ir: &ProgramIr,
    deps: &DependencyGraph,
    names: &mut NameAllocator,
) -> Vec<Scheduled> {
    let pools = assign_pools(ir, deps, names);

    let mut out = Vec::with_capacity(ir.lines.len() + pools.len() * 2);
    for (i, line) in ir.lines.iter().enumerate() {
        let placed = pools.iter().find_map(|pool| {
            pool.placements
                .iter()
                .position(|p| p.line == i)
                .map(|idx| (pool, idx))
        });

        match (placed, line) {
            (Some((pool, idx)), Line::BufferDecl(b)) => {
                if idx == 0 {
                    out.push(Scheduled {
                        line: Line::Memory(MemoryLine::PoolCreate {
                            pool: pool.name.clone(),
                            bytes: pool.bytes,
                            device: pool.device,
                        }),
                        origin: None,
                    });
                }
                out.push(Scheduled {
                    line: Line::Memory(MemoryLine::PoolAlloc {
                        pool: pool.name.clone(),
                        offset: pool.placements[idx].offset,
                        buffer: b.clone(),
                    }),
                    origin: Some(i),
                });
            }
            _ => out.push(Scheduled {
                line: line.clone(),
                origin: Some(i),
            }),
        }

        for pool in &pools {
            let end = pool.placements.iter().map(|p| p.last_use).max();
            if end == Some(i) {
                out.push(Scheduled {
                    line: Line::Memory(MemoryLine::PoolFree {
                        pool: pool.name.clone(),
                    }),
                    origin: None,
                });
            }
        }
    }
    out
}

#[cfg(test)]
mod tests;
