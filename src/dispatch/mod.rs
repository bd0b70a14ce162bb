//! Device-op dispatch: picks the fused-op kernel module for a device family.
//!
//! The registry keeps a single-slot cache of the last resolution. When the
//! requested family equals the cached family the cached handle is returned
//! as-is, whatever operator kind is asked for. Callers that interleave
//! operator kinds on one family must use one registry per operator kind.

mod table;

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use tracing::debug;

use crate::error::DispatchError;

pub use table::{default_tables, KernelTable};

/// Device families that can host fused ops.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceFamily {
    Cpu,
    Xpu,
}

impl DeviceFamily {
    pub const ALL: [DeviceFamily; 2] = [DeviceFamily::Cpu, DeviceFamily::Xpu];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceFamily::Cpu => "cpu",
            DeviceFamily::Xpu => "xpu",
        }
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceFamily {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(DeviceFamily::Cpu),
            "xpu" | "accelerator" => Ok(DeviceFamily::Xpu),
            other => Err(DispatchError::UnsupportedDevice(other.to_string())),
        }
    }
}

/// Fused operator kinds a higher-level fusion layer can ask for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperatorKind {
    LinearSilu,
    LinearSiluMul,
    Linear2SiluMul,
    LinearRelu,
    LinearNewGelu,
    LinearGelu,
    LinearAdd,
    LinearAddAdd,
    LinearMul,
    Rope,
    RmsNorm,
    PagedAttention,
    FastLayerNorm,
    VarlenAttention,
    IndirectAccessKvCache,
}

impl OperatorKind {
    pub const ALL: [OperatorKind; 15] = [
        OperatorKind::LinearSilu,
        OperatorKind::LinearSiluMul,
        OperatorKind::Linear2SiluMul,
        OperatorKind::LinearRelu,
        OperatorKind::LinearNewGelu,
        OperatorKind::LinearGelu,
        OperatorKind::LinearAdd,
        OperatorKind::LinearAddAdd,
        OperatorKind::LinearMul,
        OperatorKind::Rope,
        OperatorKind::RmsNorm,
        OperatorKind::PagedAttention,
        OperatorKind::FastLayerNorm,
        OperatorKind::VarlenAttention,
        OperatorKind::IndirectAccessKvCache,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperatorKind::LinearSilu => "linear_silu",
            OperatorKind::LinearSiluMul => "linear_silu_mul",
            OperatorKind::Linear2SiluMul => "linear2_silu_mul",
            OperatorKind::LinearRelu => "linear_relu",
            OperatorKind::LinearNewGelu => "linear_new_gelu",
            OperatorKind::LinearGelu => "linear_gelu",
            OperatorKind::LinearAdd => "linear_add",
            OperatorKind::LinearAddAdd => "linear_add_add",
            OperatorKind::LinearMul => "linear_mul",
            OperatorKind::Rope => "rope",
            OperatorKind::RmsNorm => "rms_norm",
            OperatorKind::PagedAttention => "paged_attention",
            OperatorKind::FastLayerNorm => "fast_layernorm",
            OperatorKind::VarlenAttention => "varlen_attention",
            OperatorKind::IndirectAccessKvCache => "indirectaccess_kvcache",
        }
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperatorKind {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperatorKind::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| DispatchError::UnknownOperator(s.to_string()))
    }
}

/// A registered kernel module (the uninstantiated "class").
#[derive(Debug, PartialEq, Eq)]
pub struct KernelModule {
    pub name: String,
    pub family: DeviceFamily,
    pub op: OperatorKind,
}

/// Constructor argument for an instantiated kernel.
#[derive(Clone, Debug, PartialEq)]
pub enum CtorArg {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl CtorArg {
    /// Parse a CLI-style literal: integers, floats, `true`/`false`, else a string.
    pub fn parse(s: &str) -> CtorArg {
        if let Ok(v) = s.parse::<i64>() {
            return CtorArg::Int(v);
        }
        if let Ok(v) = s.parse::<f64>() {
            return CtorArg::Float(v);
        }
        match s {
            "true" | "True" => CtorArg::Bool(true),
            "false" | "False" => CtorArg::Bool(false),
            _ => CtorArg::Str(s.to_string()),
        }
    }
}

impl fmt::Display for CtorArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CtorArg::Int(v) => write!(f, "{}", v),
            CtorArg::Float(v) => write!(f, "{:?}", v),
            CtorArg::Bool(true) => f.write_str("True"),
            CtorArg::Bool(false) => f.write_str("False"),
            CtorArg::Str(s) => write!(f, "'{}'", s),
        }
    }
}

/// A kernel module constructed with arguments.
#[derive(Debug, PartialEq)]
pub struct KernelInstance {
    pub module: Rc<KernelModule>,
    pub args: Vec<CtorArg>,
}

/// Result of a resolution: the module itself or a constructed instance.
#[derive(Clone, Debug)]
pub enum KernelHandle {
    Module(Rc<KernelModule>),
    Instance(Rc<KernelInstance>),
}

impl KernelHandle {
    pub fn module(&self) -> &KernelModule {
        match self {
            KernelHandle::Module(m) => m,
            KernelHandle::Instance(i) => &i.module,
        }
    }

    pub fn is_instance(&self) -> bool {
        matches!(self, KernelHandle::Instance(_))
    }

    /// Identity comparison: same module object or same instance object.
    pub fn same_as(&self, other: &KernelHandle) -> bool {
        match (self, other) {
            (KernelHandle::Module(a), KernelHandle::Module(b)) => Rc::ptr_eq(a, b),
            (KernelHandle::Instance(a), KernelHandle::Instance(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for KernelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelHandle::Module(m) => f.write_str(&m.name),
            KernelHandle::Instance(i) => {
                let args: Vec<String> = i.args.iter().map(|a| a.to_string()).collect();
                write!(f, "{}({})", i.module.name, args.join(", "))
            }
        }
    }
}

/// Per-family operator tables with a single-slot last-family cache.
pub struct DispatchRegistry {
    tables: HashMap<DeviceFamily, KernelTable>,
    cached: Option<(DeviceFamily, KernelHandle)>,
}

impl Default for DispatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchRegistry {
    /// Registry with the built-in CPU and XPU fused-op tables.
    pub fn new() -> Self {
        Self::with_tables(default_tables())
    }

    pub fn with_tables(tables: HashMap<DeviceFamily, KernelTable>) -> Self {
        Self {
            tables,
            cached: None,
        }
    }

    /// Register (or replace) the kernel module for a key.
    pub fn register(&mut self, family: DeviceFamily, op: OperatorKind, name: &str) {
        self.tables.entry(family).or_default().insert(
            op,
            Rc::new(KernelModule {
                name: name.to_string(),
                family,
                op,
            }),
        );
    }

    /// Family of the handle currently held in the cache slot.
    pub fn cached_family(&self) -> Option<DeviceFamily> {
        self.cached.as_ref().map(|(family, _)| *family)
    }

    pub fn cached_handle(&self) -> Option<&KernelHandle> {
        self.cached.as_ref().map(|(_, handle)| handle)
    }

    /// Resolve a fused-op kernel for `device`.
    ///
    /// The device string is validated before anything else. A hit on the
    /// cached family returns the cached handle without a table lookup.
    pub fn resolve(
        &mut self,
        device: &str,
        op: OperatorKind,
        construct_instance: bool,
        ctor_args: &[CtorArg],
    ) -> Result<KernelHandle, DispatchError> {
        let family: DeviceFamily = device.parse()?;

        if let Some((cached_family, handle)) = &self.cached {
            if *cached_family == family {
                debug!(%family, %op, "dispatch cache hit");
                return Ok(handle.clone());
            }
        }

        let module = self
            .tables
            .get(&family)
            .and_then(|table| table.get(&op))
            .cloned()
            .ok_or(DispatchError::UnregisteredOperator { family, op })?;

        let handle = if construct_instance {
            KernelHandle::Instance(Rc::new(KernelInstance {
                module,
                args: ctor_args.to_vec(),
            }))
        } else {
            KernelHandle::Module(module)
        };
        debug!(%family, %op, kernel = %handle, "dispatch resolved");
        self.cached = Some((family, handle.clone()));
        Ok(handle)
    }
}
