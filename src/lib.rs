pub mod codegen;
pub mod config;
pub mod diagnostic;
pub mod dispatch;
pub mod error;
pub mod ir;
pub mod logging;
pub mod span;

pub use codegen::{GeneratedModule, WrapperGenerator};
pub use config::CodegenConfig;
pub use dispatch::{CtorArg, DeviceFamily, DispatchRegistry, KernelHandle, OperatorKind};
pub use error::{CodegenError, DispatchError};
pub use ir::{ProgramBuilder, ProgramIr};

use diagnostic::{render_diagnostics, Diagnostic};

/// A validated program and the warnings found while checking it.
#[derive(Debug)]
pub struct CheckedProgram {
    pub ir: ProgramIr,
    pub warnings: Vec<Diagnostic>,
}

/// Parse and validate `.wir` source without generating anything.
pub fn check_source(source: &str) -> Result<CheckedProgram, Vec<Diagnostic>> {
    let ir = ir::parse::parse_program(source)?;
    let (deps, _) = ir::deps::validate(&ir).map_err(|e| vec![e.to_diagnostic(&ir.spans)])?;
    let warnings = ir::deps::unused_buffers(&ir, &deps);
    Ok(CheckedProgram { ir, warnings })
}

/// Parse `.wir` source and generate its wrapper module.
pub fn generate_source(
    source: &str,
    config: &CodegenConfig,
    is_inference: bool,
) -> Result<GeneratedModule, Vec<Diagnostic>> {
    let ir = ir::parse::parse_program(source)?;
    let spans = ir.spans.clone();
    WrapperGenerator::new(config)
        .generate(ir, is_inference)
        .map_err(|e| vec![e.to_diagnostic(&spans)])
}

/// Like `generate_source`, rendering any diagnostics to stderr.
pub fn generate_file(
    source: &str,
    filename: &str,
    config: &CodegenConfig,
    is_inference: bool,
) -> Result<GeneratedModule, Vec<Diagnostic>> {
    generate_source(source, config, is_inference).inspect_err(|errors| {
        render_diagnostics(errors, filename, source);
    })
}

/// Like `check_source`, rendering errors and warnings to stderr.
pub fn check_file(source: &str, filename: &str) -> Result<CheckedProgram, Vec<Diagnostic>> {
    check_source(source)
        .inspect(|checked| render_diagnostics(&checked.warnings, filename, source))
        .inspect_err(|errors| render_diagnostics(errors, filename, source))
}
