use std::path::PathBuf;
use std::process;

use clap::Args;

use xpuwrap::ir::Line;

use super::read_program;

#[derive(Args)]
pub struct CheckArgs {
    /// Input .wir program
    pub input: PathBuf,
}

pub fn cmd_check(args: CheckArgs) {
    let source = read_program(&args.input);
    let filename = args.input.display().to_string();
    match xpuwrap::check_file(&source, &filename) {
        Ok(checked) => {
            let ir = &checked.ir;
            let calls = ir
                .lines
                .iter()
                .filter(|l| matches!(l, Line::KernelCall(_)))
                .count();
            eprintln!(
                "OK: {} ({} lines, {} kernel calls, {} outputs, {} warnings)",
                args.input.display(),
                ir.lines.len(),
                calls,
                ir.outputs.len(),
                checked.warnings.len()
            );
        }
        Err(_) => process::exit(1),
    }
}
