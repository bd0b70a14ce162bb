//! Built-in fused-op kernel tables.

use std::collections::HashMap;
use std::rc::Rc;

use super::{DeviceFamily, KernelModule, OperatorKind};

pub type KernelTable = HashMap<OperatorKind, Rc<KernelModule>>;

const CPU_KERNELS: &[(OperatorKind, &str)] = &[
    (OperatorKind::Rope, "_IPEXRopeCPU"),
    (OperatorKind::RmsNorm, "_IPEXRMSNormCPU"),
    (OperatorKind::PagedAttention, "_IPEXPagedAttentionCPU"),
    (OperatorKind::FastLayerNorm, "_IPEXFastLayerNormCPU"),
    (OperatorKind::VarlenAttention, "_IPEXVarlenScaledDotProductCPU"),
    (OperatorKind::IndirectAccessKvCache, "_IPEXScaleDotProductCPU"),
    (OperatorKind::LinearSilu, "_IPEXlinearSiluCPU"),
    (OperatorKind::LinearSiluMul, "_IPEXlinearSiluAndMulCPU"),
    (OperatorKind::Linear2SiluMul, "_IPEXlinearSiluMulCPU"),
    (OperatorKind::LinearRelu, "_IPEXlinearReluCPU"),
    (OperatorKind::LinearNewGelu, "_IPEXlinearNewGeluCPU"),
    (OperatorKind::LinearGelu, "_IPEXlinearGeluCPU"),
    (OperatorKind::LinearAdd, "_IPEXlinearAddCPU"),
    (OperatorKind::LinearAddAdd, "_IPEXlinearAddAddCPU"),
    (OperatorKind::LinearMul, "_IPEXlinearMulCPU"),
];

// The fused linear family has no XPU kernels yet.
const XPU_KERNELS: &[(OperatorKind, &str)] = &[
    (OperatorKind::Rope, "_IPEXRopeXPU"),
    (OperatorKind::RmsNorm, "_IPEXRMSNormXPU"),
    (OperatorKind::PagedAttention, "_IPEXPagedAttentionXPU"),
    (OperatorKind::FastLayerNorm, "_IPEXFastLayerNormXPU"),
    (OperatorKind::VarlenAttention, "_IPEXVarlenScaledDotProductXPU"),
];

fn build_table(family: DeviceFamily, entries: &[(OperatorKind, &str)]) -> KernelTable {
    entries
        .iter()
        .map(|(op, name)| {
            (
                *op,
                Rc::new(KernelModule {
                    name: name.to_string(),
                    family,
                    op: *op,
                }),
            )
        })
        .collect()
}

/// The CPU and XPU tables shipped with the crate.
pub fn default_tables() -> HashMap<DeviceFamily, KernelTable> {
    HashMap::from([
        (DeviceFamily::Cpu, build_table(DeviceFamily::Cpu, CPU_KERNELS)),
        (DeviceFamily::Xpu, build_table(DeviceFamily::Xpu, XPU_KERNELS)),
    ])
}
