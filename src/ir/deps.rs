//! Def/use analysis over IR lines.
//!
//! Nodes are line indices; an edge `d → u` labelled `name` means line `u`
//! reads `name` defined by line `d`. Every edge points forward in program
//! order, so the graph doubles as the dependency order the emitter must
//! preserve and as the liveness table for the memory passes.

use std::collections::{HashMap, HashSet};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use super::{is_value_name, InputKind, KernelCall, Launch, Line, MemoryLine, ProgramIr};
use crate::diagnostic::Diagnostic;
use crate::error::{CodegenError, GuardFault};

/// What an output reference evaluates to at run time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Tensor,
    /// A size symbol or literal returned in place of a tensor.
    Shape,
}

pub struct DependencyGraph {
    graph: DiGraph<usize, String>,
    nodes: Vec<NodeIndex>,
    /// name → defining line
    defs: HashMap<String, usize>,
    /// size symbol → binding line
    symbols: HashMap<String, usize>,
}

impl DependencyGraph {
    /// Build the graph, rejecting uses of undefined, later-defined or freed names.
    ///
    /// Soft references (attribute roots, raw statement text) add edges only
    /// when they name a live value defined earlier.
    pub fn analyze(ir: &ProgramIr) -> Result<Self, CodegenError> {
        let mut graph = DiGraph::new();
        let nodes: Vec<NodeIndex> = (0..ir.lines.len()).map(|i| graph.add_node(i)).collect();

        let mut defs: HashMap<String, usize> = HashMap::new();
        let mut symbols: HashMap<String, usize> = HashMap::new();
        for (i, line) in ir.lines.iter().enumerate() {
            let rebinds = matches!(line, Line::RawStatement { .. });
            for name in line.defines() {
                if let Line::InputDecl(input) = line {
                    if input.kind == InputKind::Symbolic {
                        symbols.entry(name.to_string()).or_insert(i);
                        continue;
                    }
                }
                if let Some(prev) = defs.get(name) {
                    if !rebinds {
                        return Err(CodegenError::malformed(
                            format!("'{}' is defined twice (first on IR line {})", name, prev + 1),
                            Some(i),
                        ));
                    }
                    continue;
                }
                defs.insert(name.to_string(), i);
            }
            for sym in line.binds_symbols() {
                symbols.entry(sym.to_string()).or_insert(i);
            }
        }

        let mut dead: HashSet<&str> = HashSet::new();
        for (i, line) in ir.lines.iter().enumerate() {
            for name in line.uses() {
                if dead.contains(name) {
                    return Err(CodegenError::malformed(
                        format!("'{}' is used after it was freed", name),
                        Some(i),
                    ));
                }
                let def = defs.get(name).or_else(|| symbols.get(name)).copied();
                match def {
                    Some(d) if d < i => {
                        graph.add_edge(nodes[d], nodes[i], name.to_string());
                    }
                    Some(d) => {
                        return Err(CodegenError::malformed(
                            format!(
                                "'{}' is used before it is defined (defined on IR line {})",
                                name,
                                d + 1
                            ),
                            Some(i),
                        ));
                    }
                    None => {
                        return Err(CodegenError::malformed(
                            format!("'{}' is never defined", name),
                            Some(i),
                        ));
                    }
                }
            }
            for name in line.references() {
                if let Some(&d) = defs.get(name) {
                    if d < i && !dead.contains(name) {
                        graph.add_edge(nodes[d], nodes[i], name.to_string());
                    }
                }
            }
            match line {
                Line::Memory(MemoryLine::Free { name }) => {
                    dead.insert(name);
                }
                Line::Memory(MemoryLine::Reuse { from, .. }) => {
                    dead.insert(from);
                }
                Line::Memory(MemoryLine::PoolFree { pool }) => {
                    dead.insert(pool);
                }
                _ => {}
            }
        }

        Ok(Self {
            graph,
            nodes,
            defs,
            symbols,
        })
    }

    pub fn def_line(&self, name: &str) -> Option<usize> {
        self.defs.get(name).copied()
    }

    pub fn is_symbol(&self, name: &str) -> bool {
        !self.defs.contains_key(name) && self.symbols.contains_key(name)
    }

    /// Index of the last line reading `name`, or its def line if never read.
    pub fn last_use(&self, name: &str) -> Option<usize> {
        let def = self.def_line(name)?;
        let last = self
            .graph
            .edges_directed(self.nodes[def], Direction::Outgoing)
            .filter(|e| e.weight() == name)
            .map(|e| self.graph[e.target()])
            .max();
        Some(last.unwrap_or(def))
    }

    /// Lines whose definitions `line` reads.
    pub fn producers(&self, line: usize) -> Vec<usize> {
        let mut out: Vec<usize> = self
            .graph
            .neighbors_directed(self.nodes[line], Direction::Incoming)
            .map(|n| self.graph[n])
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Classify and validate the program outputs.
    pub fn output_kinds(&self, outputs: &[String]) -> Result<Vec<OutputKind>, CodegenError> {
        outputs
            .iter()
            .map(|name| {
                if self.defs.contains_key(name.as_str()) {
                    Ok(OutputKind::Tensor)
                } else if self.symbols.contains_key(name.as_str())
                    || (!is_value_name(name) && name.parse::<i64>().is_ok())
                {
                    Ok(OutputKind::Shape)
                } else {
                    Err(CodegenError::malformed(
                        format!("output '{}' is never defined", name),
                        None,
                    ))
                }
            })
            .collect()
    }
}

/// Warnings for buffers that are allocated and then never read.
pub fn unused_buffers(ir: &ProgramIr, deps: &DependencyGraph) -> Vec<Diagnostic> {
    let outputs: HashSet<&str> = ir.outputs.iter().map(String::as_str).collect();
    ir.lines
        .iter()
        .enumerate()
        .filter_map(|(i, line)| {
            let Line::BufferDecl(b) = line else { return None };
            if outputs.contains(b.name.as_str()) || deps.last_use(&b.name) != Some(i) {
                return None;
            }
            Some(
                Diagnostic::warning(
                    format!("buffer '{}' is allocated but never used", b.name),
                    ir.span_of(i),
                )
                .with_help("pass it to a kernel or remove the declaration".to_string()),
            )
        })
        .collect()
}

/// Device guards must nest, and device kernels need an open guard.
pub fn check_guards(ir: &ProgramIr) -> Result<(), CodegenError> {
    let mut open: Vec<(u32, usize)> = Vec::new();
    for (i, line) in ir.lines.iter().enumerate() {
        match line {
            Line::DeviceGuardEnter { device_index } => open.push((*device_index, i)),
            Line::DeviceGuardExit => {
                if open.pop().is_none() {
                    return Err(CodegenError::GuardStackViolation {
                        fault: GuardFault::ExitWithoutEnter,
                        line: Some(i),
                    });
                }
            }
            Line::KernelCall(KernelCall {
                target,
                launch: Launch::Device { .. },
                ..
            }) if open.is_empty() => {
                return Err(CodegenError::malformed(
                    format!("device kernel '{}' is launched outside a device guard", target),
                    Some(i),
                ));
            }
            _ => {}
        }
    }
    match open.last() {
        Some(&(device_index, line)) => Err(CodegenError::GuardStackViolation {
            fault: GuardFault::Unclosed { device_index },
            line: Some(line),
        }),
        None => Ok(()),
    }
}

/// Everything generation checks before writing any text.
pub fn validate(ir: &ProgramIr) -> Result<(DependencyGraph, Vec<OutputKind>), CodegenError> {
    let deps = DependencyGraph::analyze(ir)?;
    check_guards(ir)?;
    let kinds = deps.output_kinds(&ir.outputs)?;
    Ok((deps, kinds))
}
