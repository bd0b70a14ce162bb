//! Wrapper IR: the ordered line program a compiled graph hands to codegen.
//!
//! A `ProgramIr` is a flat list of `Line`s. Execution order is list order.
//! Only the memory passes insert lines (`Line::Memory`), and they never
//! move a use ahead of its definition. Each line variant has exactly one
//! emission handler in `codegen::wrapper`.

pub mod builder;
pub mod deps;
pub mod memory;
pub mod parse;

use std::collections::BTreeMap;
use std::fmt;

use crate::dispatch::DeviceFamily;
use crate::error::CodegenError;
use crate::span::Span;

pub use builder::ProgramBuilder;

// ─── Tensor metadata ──────────────────────────────────────────────

/// Element types, spelled the way the emitted program spells them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Dtype {
    Float32,
    Float16,
    BFloat16,
    Float64,
    Int64,
    Int32,
    Int16,
    Int8,
    UInt8,
    Bool,
}

impl Dtype {
    /// Short `.wir` spelling (`f32`, `bf16`, ...).
    pub fn parse(s: &str) -> Option<Dtype> {
        Some(match s {
            "f32" | "float32" => Dtype::Float32,
            "f16" | "float16" => Dtype::Float16,
            "bf16" | "bfloat16" => Dtype::BFloat16,
            "f64" | "float64" => Dtype::Float64,
            "i64" | "int64" => Dtype::Int64,
            "i32" | "int32" => Dtype::Int32,
            "i16" | "int16" => Dtype::Int16,
            "i8" | "int8" => Dtype::Int8,
            "u8" | "uint8" => Dtype::UInt8,
            "bool" => Dtype::Bool,
            _ => return None,
        })
    }

    pub fn short_name(&self) -> &'static str {
        match self {
            Dtype::Float32 => "f32",
            Dtype::Float16 => "f16",
            Dtype::BFloat16 => "bf16",
            Dtype::Float64 => "f64",
            Dtype::Int64 => "i64",
            Dtype::Int32 => "i32",
            Dtype::Int16 => "i16",
            Dtype::Int8 => "i8",
            Dtype::UInt8 => "u8",
            Dtype::Bool => "bool",
        }
    }

    /// `torch.float32` etc.
    pub fn torch_name(&self) -> &'static str {
        match self {
            Dtype::Float32 => "torch.float32",
            Dtype::Float16 => "torch.float16",
            Dtype::BFloat16 => "torch.bfloat16",
            Dtype::Float64 => "torch.float64",
            Dtype::Int64 => "torch.int64",
            Dtype::Int32 => "torch.int32",
            Dtype::Int16 => "torch.int16",
            Dtype::Int8 => "torch.int8",
            Dtype::UInt8 => "torch.uint8",
            Dtype::Bool => "torch.bool",
        }
    }

    pub fn itemsize(&self) -> u64 {
        match self {
            Dtype::Float64 | Dtype::Int64 => 8,
            Dtype::Float32 | Dtype::Int32 => 4,
            Dtype::Float16 | Dtype::BFloat16 | Dtype::Int16 => 2,
            Dtype::Int8 | Dtype::UInt8 | Dtype::Bool => 1,
        }
    }
}

/// A device a tensor lives on: `cpu`, `xpu` or `xpu:N`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Device {
    pub family: DeviceFamily,
    pub index: Option<u32>,
}

impl Device {
    pub fn cpu() -> Self {
        Self {
            family: DeviceFamily::Cpu,
            index: None,
        }
    }

    pub fn xpu(index: u32) -> Self {
        Self {
            family: DeviceFamily::Xpu,
            index: Some(index),
        }
    }

    pub fn parse(s: &str) -> Option<Device> {
        let (family, index) = match s.split_once(':') {
            Some((f, i)) => (f, Some(i.parse::<u32>().ok()?)),
            None => (s, None),
        };
        let family = family.parse::<DeviceFamily>().ok()?;
        if family == DeviceFamily::Cpu && index.is_some() {
            return None;
        }
        Some(Device { family, index })
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(i) => write!(f, "{}:{}", self.family, i),
            None => write!(f, "{}", self.family),
        }
    }
}

/// One dimension of a shape or stride: a literal or a size symbol.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SizeExpr {
    Int(i64),
    Sym(String),
}

impl SizeExpr {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            SizeExpr::Int(v) => Some(*v),
            SizeExpr::Sym(_) => None,
        }
    }

    pub fn symbol(&self) -> Option<&str> {
        match self {
            SizeExpr::Int(_) => None,
            SizeExpr::Sym(s) => Some(s),
        }
    }
}

impl fmt::Display for SizeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeExpr::Int(v) => write!(f, "{}", v),
            SizeExpr::Sym(s) => f.write_str(s),
        }
    }
}

impl From<i64> for SizeExpr {
    fn from(v: i64) -> Self {
        SizeExpr::Int(v)
    }
}

impl From<&str> for SizeExpr {
    fn from(s: &str) -> Self {
        SizeExpr::Sym(s.to_string())
    }
}

/// Shape, stride, device and dtype of a tensor-valued name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TensorMeta {
    pub size: Vec<SizeExpr>,
    pub stride: Vec<SizeExpr>,
    pub device: Device,
    pub dtype: Dtype,
}

impl TensorMeta {
    /// Row-major layout. `None` when a trailing dimension is symbolic.
    pub fn contiguous(dtype: Dtype, size: Vec<SizeExpr>, device: Device) -> Option<Self> {
        let stride = contiguous_strides(&size)?;
        Some(Self {
            size,
            stride,
            device,
            dtype,
        })
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.size
            .iter()
            .chain(self.stride.iter())
            .filter_map(SizeExpr::symbol)
    }

    pub fn is_static(&self) -> bool {
        self.symbols().next().is_none()
    }

    /// Bytes of backing storage, for fully static layouts whose byte size
    /// fits in an `i64`.
    pub fn storage_bytes(&self) -> Option<u64> {
        let mut sizes = Vec::with_capacity(self.size.len());
        for (s, st) in self.size.iter().zip(&self.stride) {
            sizes.push((s.as_int()?, st.as_int()?));
        }
        if sizes.iter().any(|(s, _)| *s == 0) {
            return Some(0);
        }
        let mut extent: i64 = 1;
        for (s, st) in sizes {
            extent = extent.checked_add(s.checked_sub(1)?.checked_mul(st)?)?;
        }
        let bytes = (extent.max(0) as u64).checked_mul(self.dtype.itemsize())?;
        (bytes <= i64::MAX as u64).then_some(bytes)
    }
}

impl fmt::Display for TensorMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims = |v: &[SizeExpr]| {
            v.iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(
            f,
            "{}[{}] stride [{}] @ {}",
            self.dtype.short_name(),
            dims(&self.size),
            dims(&self.stride),
            self.device
        )
    }
}

/// Row-major strides for `size`. Symbolic dims are only allowed in front.
///
/// `None` when an inner dim is symbolic or a stride overflows `i64`.
pub fn contiguous_strides(size: &[SizeExpr]) -> Option<Vec<SizeExpr>> {
    let mut stride = vec![SizeExpr::Int(1); size.len()];
    let mut running: i64 = 1;
    for i in (0..size.len()).rev() {
        stride[i] = SizeExpr::Int(running);
        if i > 0 {
            running = running.checked_mul(size[i].as_int()?)?;
        }
    }
    Some(stride)
}

// ─── Lines ────────────────────────────────────────────────────────

/// A graph input: a tensor, or a scalar size symbol.
#[derive(Clone, Debug, PartialEq)]
pub enum InputKind {
    Tensor(TensorMeta),
    Symbolic,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GraphInput {
    pub name: String,
    pub kind: InputKind,
}

impl GraphInput {
    pub fn tensor_meta(&self) -> Option<&TensorMeta> {
        match &self.kind {
            InputKind::Tensor(meta) => Some(meta),
            InputKind::Symbolic => None,
        }
    }
}

/// A module-level constant tensor.
#[derive(Clone, Debug, PartialEq)]
pub struct ConstantDecl {
    pub name: String,
    pub meta: TensorMeta,
}

/// A computed buffer the wrapper allocates.
#[derive(Clone, Debug, PartialEq)]
pub struct BufferDecl {
    pub name: String,
    pub meta: TensorMeta,
}

/// How a kernel is invoked.
#[derive(Clone, Debug, PartialEq)]
pub enum Launch {
    /// Plain call expression: `[result = ]target(args)`.
    Extern,
    /// Generated device kernel: `target.run(args, grid=grid(..), stream=streamN)`.
    Device { grid: Vec<SizeExpr> },
}

#[derive(Clone, Debug, PartialEq)]
pub struct KernelCall {
    pub target: String,
    pub args: Vec<String>,
    pub result: Option<String>,
    pub launch: Launch,
}

impl KernelCall {
    /// Values the arguments read, including names nested inside argument
    /// expressions such as `reinterpret_tensor(buf0, (4, ), (1, ), 0)`.
    pub fn arg_names(&self) -> impl Iterator<Item = &str> {
        self.arg_refs(NameUse::Value)
    }

    fn arg_refs(&self, kind: NameUse) -> impl Iterator<Item = &str> {
        self.args
            .iter()
            .flat_map(|a| expr_names(a))
            .filter(move |(_, u)| *u == kind)
            .map(|(name, _)| name)
    }
}

/// Storage directives written by the memory passes.
#[derive(Clone, Debug, PartialEq)]
pub enum MemoryLine {
    /// Drop a dead buffer or input.
    Free { name: String },
    /// Take over a dead buffer's storage for a new buffer of the same layout.
    Reuse { from: String, to: String },
    /// Allocate a byte pool on a device.
    PoolCreate {
        pool: String,
        bytes: u64,
        device: Device,
    },
    /// Carve a buffer out of a pool at a byte offset.
    PoolAlloc {
        pool: String,
        offset: u64,
        buffer: BufferDecl,
    },
    /// Drop a pool after its last buffer dies.
    PoolFree { pool: String },
}

/// One line of the wrapper program.
#[derive(Clone, Debug, PartialEq)]
pub enum Line {
    InputDecl(GraphInput),
    ConstantDecl(ConstantDecl),
    BufferDecl(BufferDecl),
    KernelCall(KernelCall),
    DeviceGuardEnter { device_index: u32 },
    DeviceGuardExit,
    RawStatement { text: String },
    Memory(MemoryLine),
}

impl Line {
    /// Names this line brings into scope.
    pub fn defines(&self) -> Vec<&str> {
        match self {
            Line::InputDecl(input) => vec![input.name.as_str()],
            Line::ConstantDecl(c) => vec![c.name.as_str()],
            Line::BufferDecl(b) => vec![b.name.as_str()],
            Line::KernelCall(call) => call.result.as_deref().into_iter().collect(),
            Line::RawStatement { text } => raw_assignment_target(text).into_iter().collect(),
            Line::Memory(MemoryLine::Reuse { to, .. }) => vec![to.as_str()],
            Line::Memory(MemoryLine::PoolCreate { pool, .. }) => vec![pool.as_str()],
            Line::Memory(MemoryLine::PoolAlloc { buffer, .. }) => vec![buffer.name.as_str()],
            Line::Memory(_) | Line::DeviceGuardEnter { .. } | Line::DeviceGuardExit => {
                Vec::new()
            }
        }
    }

    /// Size symbols a tensor input binds from its own dims (`s0 = x.size(0)`).
    pub fn binds_symbols(&self) -> Vec<&str> {
        match self {
            Line::InputDecl(GraphInput {
                kind: InputKind::Tensor(meta),
                ..
            }) => meta.symbols().collect(),
            _ => Vec::new(),
        }
    }

    /// Names this line reads.
    pub fn uses(&self) -> Vec<&str> {
        match self {
            Line::KernelCall(call) => {
                let mut names: Vec<&str> = call.arg_names().collect();
                if let Launch::Device { grid } = &call.launch {
                    names.extend(grid.iter().filter_map(SizeExpr::symbol));
                }
                names
            }
            Line::BufferDecl(b) => b.meta.symbols().collect(),
            Line::ConstantDecl(_) => Vec::new(),
            Line::Memory(MemoryLine::Free { name }) => vec![name.as_str()],
            Line::Memory(MemoryLine::Reuse { from, .. }) => vec![from.as_str()],
            Line::Memory(MemoryLine::PoolAlloc { pool, buffer, .. }) => {
                let mut names = vec![pool.as_str()];
                names.extend(buffer.meta.symbols());
                names
            }
            Line::Memory(MemoryLine::PoolFree { pool }) => vec![pool.as_str()],
            _ => Vec::new(),
        }
    }

    /// Names this line may read that need not be program values: attribute
    /// roots (`torch.float32`, `buf0.sum()`) and every name in a raw
    /// statement. When they do name a value they keep it alive.
    pub fn references(&self) -> Vec<&str> {
        match self {
            Line::KernelCall(call) => call.arg_refs(NameUse::AttrRoot).collect(),
            Line::RawStatement { text } => {
                expr_names(text).into_iter().map(|(name, _)| name).collect()
            }
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Line::InputDecl(GraphInput {
                name,
                kind: InputKind::Symbolic,
            }) => write!(f, "input {}: sym", name),
            Line::InputDecl(GraphInput {
                name,
                kind: InputKind::Tensor(meta),
            }) => write!(f, "input {}: {}", name, meta),
            Line::ConstantDecl(c) => write!(f, "const {}: {}", c.name, c.meta),
            Line::BufferDecl(b) => write!(f, "buffer {}: {}", b.name, b.meta),
            Line::KernelCall(call) => {
                let result = call
                    .result
                    .as_ref()
                    .map(|r| format!("{} = ", r))
                    .unwrap_or_default();
                match &call.launch {
                    Launch::Extern => {
                        write!(f, "call {}{}({})", result, call.target, call.args.join(", "))
                    }
                    Launch::Device { grid } => {
                        let grid: Vec<String> = grid.iter().map(|g| g.to_string()).collect();
                        write!(
                            f,
                            "launch {}({}) grid [{}]",
                            call.target,
                            call.args.join(", "),
                            grid.join(", ")
                        )
                    }
                }
            }
            Line::DeviceGuardEnter { device_index } => write!(f, "guard {}", device_index),
            Line::DeviceGuardExit => write!(f, "endguard"),
            Line::RawStatement { text } => write!(f, "raw {}", text),
            Line::Memory(MemoryLine::Free { name }) => write!(f, "free {}", name),
            Line::Memory(MemoryLine::Reuse { from, to }) => write!(f, "reuse {} -> {}", from, to),
            Line::Memory(MemoryLine::PoolCreate {
                pool,
                bytes,
                device,
            }) => write!(f, "pool {} {} bytes @ {}", pool, bytes, device),
            Line::Memory(MemoryLine::PoolAlloc {
                pool,
                offset,
                buffer,
            }) => write!(f, "alloc {} from {}+{}", buffer.name, pool, offset),
            Line::Memory(MemoryLine::PoolFree { pool }) => write!(f, "free pool {}", pool),
        }
    }
}

/// `true` for identifiers that can name a value (not literals or keywords).
pub fn is_value_name(s: &str) -> bool {
    let mut chars = s.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    first_ok
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !matches!(s, "None" | "True" | "False")
}

const PY_KEYWORDS: &[&str] = &[
    "None", "True", "False", "and", "or", "not", "in", "is", "if", "else", "lambda", "for",
    "del", "return", "pass", "assert", "global", "import", "from", "as", "with",
];

/// How an identifier appears inside an argument or raw expression.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NameUse {
    /// Read as a value.
    Value,
    /// Root of an attribute chain; may be a module rather than a value.
    AttrRoot,
}

/// Identifier tokens of a Python expression that could name program values.
///
/// String literals, numbers, keywords, attribute names, callees and
/// keyword-argument names are skipped.
pub fn expr_names(text: &str) -> Vec<(&str, NameUse)> {
    let bytes = text.as_bytes();
    let ident = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
    let mut names = Vec::new();
    // Quote of the f-string being scanned and the `{}` depth inside it.
    let mut fstring: Option<u8> = None;
    let mut braces = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if let Some(quote) = fstring {
            if braces == 0 {
                if c == b'{' && bytes.get(i + 1) == Some(&b'{') {
                    i += 2;
                    continue;
                }
                if c == b'{' {
                    braces = 1;
                } else if c == quote {
                    fstring = None;
                }
                i += 1;
                continue;
            }
            if c == b'{' || c == b'}' {
                braces = if c == b'{' { braces + 1 } else { braces - 1 };
                i += 1;
                continue;
            }
        }
        if c == b'\'' || c == b'"' {
            i += 1;
            if string_prefix(&text[..i - 1]).is_some_and(|p| p.contains(['f', 'F'])) {
                fstring = Some(c);
                continue;
            }
            while i < bytes.len() && bytes[i] != c {
                if bytes[i] == b'\\' {
                    i += 1;
                }
                i += 1;
            }
            i += 1;
            continue;
        }
        if c.is_ascii_digit() {
            while i < bytes.len() && (ident(bytes[i]) || bytes[i] == b'.') {
                i += 1;
            }
            continue;
        }
        if !(c.is_ascii_alphabetic() || c == b'_') {
            i += 1;
            continue;
        }

        let start = i;
        while i < bytes.len() && ident(bytes[i]) {
            i += 1;
        }
        let name = &text[start..i];
        if text[i..].starts_with(['\'', '"']) && string_prefix(&text[..i]).is_some() {
            continue;
        }
        let before = text[..start].trim_end().chars().next_back();
        let after = text[i..].trim_start();
        if before == Some('.') || PY_KEYWORDS.contains(&name) || after.starts_with('(') {
            continue;
        }
        if after.starts_with('=') && !after.starts_with("==") {
            continue;
        }
        let kind = if after.starts_with('.') {
            NameUse::AttrRoot
        } else {
            NameUse::Value
        };
        names.push((name, kind));
    }
    names
}

/// String-literal prefix (`f`, `rb`, ...) ending `text`, if any.
fn string_prefix(text: &str) -> Option<&str> {
    let start = text
        .rfind(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .map_or(0, |i| i + 1);
    let prefix = &text[start..];
    let valid = !prefix.is_empty()
        && prefix.len() <= 2
        && prefix.chars().all(|c| "rRbBuUfF".contains(c));
    valid.then_some(prefix)
}

/// Left-hand side of a `name = ...` raw statement.
fn raw_assignment_target(text: &str) -> Option<&str> {
    let (lhs, rhs) = text.split_once('=')?;
    if rhs.starts_with('=') {
        return None;
    }
    let lhs = lhs.trim();
    is_value_name(lhs).then_some(lhs)
}

// ─── Program ──────────────────────────────────────────────────────

/// Symbol → concrete size, used wherever a number must stand in for a symbol.
pub trait SizeHints {
    fn size_hint(&self, symbol: &str) -> Option<i64>;
}

impl SizeHints for BTreeMap<String, i64> {
    fn size_hint(&self, symbol: &str) -> Option<i64> {
        self.get(symbol).copied()
    }
}

/// Evaluate a dimension through a hint table.
pub fn evaluate(expr: &SizeExpr, hints: &dyn SizeHints) -> Result<i64, CodegenError> {
    match expr {
        SizeExpr::Int(v) => Ok(*v),
        SizeExpr::Sym(s) => hints
            .size_hint(s)
            .ok_or_else(|| CodegenError::malformed(format!("no size hint for symbol '{}'", s), None)),
    }
}

/// A compiled graph's wrapper program.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProgramIr {
    /// Graph id, used to name the profiler region.
    pub graph_id: u32,
    pub lines: Vec<Line>,
    /// Source span per line (dummy for built IR).
    pub spans: Vec<Span>,
    /// Names returned from `call`, in order.
    pub outputs: Vec<String>,
    pub size_hints: BTreeMap<String, i64>,
}

impl ProgramIr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: Line) {
        self.push_spanned(line, Span::dummy());
    }

    pub fn push_spanned(&mut self, line: Line, span: Span) {
        self.lines.push(line);
        self.spans.push(span);
    }

    pub fn span_of(&self, line: usize) -> Span {
        self.spans.get(line).copied().unwrap_or_else(Span::dummy)
    }

    pub fn inputs(&self) -> impl Iterator<Item = &GraphInput> {
        self.lines.iter().filter_map(|l| match l {
            Line::InputDecl(input) => Some(input),
            _ => None,
        })
    }

    pub fn constants(&self) -> impl Iterator<Item = &ConstantDecl> {
        self.lines.iter().filter_map(|l| match l {
            Line::ConstantDecl(c) => Some(c),
            _ => None,
        })
    }

    pub fn kernel_calls(&self) -> impl Iterator<Item = &KernelCall> {
        self.lines.iter().filter_map(|l| match l {
            Line::KernelCall(call) => Some(call),
            _ => None,
        })
    }

    pub fn input_names(&self) -> Vec<&str> {
        self.inputs().map(|i| i.name.as_str()).collect()
    }
}

impl fmt::Display for ProgramIr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "graph {}", self.graph_id)?;
        for (sym, v) in &self.size_hints {
            writeln!(f, "hint {} = {}", sym, v)?;
        }
        for line in &self.lines {
            writeln!(f, "{}", line)?;
        }
        if !self.outputs.is_empty() {
            writeln!(f, "output {}", self.outputs.join(", "))?;
        }
        Ok(())
    }
}
