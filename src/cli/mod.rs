pub mod check;
pub mod dispatch;
pub mod generate;

use std::path::Path;
use std::process;

use xpuwrap::config::CodegenConfig;
use xpuwrap::diagnostic::render_diagnostics;

/// Read a `.wir` input, exiting with a message on failure.
pub fn read_program(input: &Path) -> String {
    if !input.extension().is_some_and(|e| e == "wir") {
        eprintln!("error: input must be a .wir file");
        process::exit(1);
    }
    match std::fs::read_to_string(input) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", input.display(), e);
            process::exit(1);
        }
    }
}

/// Explicit `--config`, else the nearest xpuwrap.toml above the input,
/// else defaults.
pub fn load_config(explicit: Option<&Path>, input: &Path) -> CodegenConfig {
    let path = match explicit {
        Some(p) => Some(p.to_path_buf()),
        None => CodegenConfig::find(input.parent().unwrap_or(Path::new("."))),
    };
    let Some(path) = path else {
        return CodegenConfig::default();
    };
    match CodegenConfig::load(&path) {
        Ok(config) => config,
        Err(diag) => {
            let filename = path.display().to_string();
            let source = std::fs::read_to_string(&path).unwrap_or_default();
            render_diagnostics(&[diag], &filename, &source);
            process::exit(1);
        }
    }
}
