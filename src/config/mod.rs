use std::path::{Path, PathBuf};

use crate::diagnostic::Diagnostic;
use crate::span::Span;

pub const CONFIG_FILE: &str = "xpuwrap.toml";

/// Flags that shape the generated wrapper.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodegenConfig {
    /// Synchronize the device at the start and end of `call`.
    pub debug_sync_graph: bool,
    /// Use the pool planner for inference graphs.
    pub memory_planning: bool,
    /// Bracket the body with `start_graph()` / `end_graph()`.
    pub profile_bandwidth: bool,
    /// Wrap the body in a profiler `record_function` region.
    pub profiler_mark_wrapper_call: bool,
    /// Check input sizes and strides on entry.
    pub size_asserts: bool,
    /// Save compiled kernel binaries after the body runs.
    pub store_cubin: bool,
    pub benchmark_harness: bool,
    pub benchmark_times: u32,
    pub benchmark_repeat: u32,
    /// Module name passed to `compiled_module_main`.
    pub benchmark_name: String,
}

impl Default for CodegenConfig {
    fn default() -> Self {
        Self {
            debug_sync_graph: false,
            memory_planning: false,
            profile_bandwidth: false,
            profiler_mark_wrapper_call: false,
            size_asserts: true,
            store_cubin: false,
            benchmark_harness: true,
            benchmark_times: 10,
            benchmark_repeat: 10,
            benchmark_name: "None".to_string(),
        }
    }
}

impl CodegenConfig {
    /// Load from an xpuwrap.toml file.
    pub fn load(toml_path: &Path) -> Result<CodegenConfig, Diagnostic> {
        let content = std::fs::read_to_string(toml_path).map_err(|e| {
            Diagnostic::error(
                format!("cannot read '{}': {}", toml_path.display(), e),
                Span::dummy(),
            )
        })?;
        Self::parse(&content)
    }

    /// Section-aware minimal TOML: `[codegen]`, `[triton]`, `[benchmark]`.
    /// Keys missing from the file keep their defaults.
    pub fn parse(content: &str) -> Result<CodegenConfig, Diagnostic> {
        let mut config = CodegenConfig::default();
        let mut current_section = String::new();
        let mut offset = 0usize;

        for line in content.lines() {
            let span = Span::new(offset as u32, (offset + line.len()) as u32);
            offset += line.len() + 1;

            let trimmed = line.trim();
            if trimmed.starts_with('#') || trimmed.is_empty() {
                continue;
            }
            if trimmed.starts_with('[') && trimmed.ends_with(']') {
                current_section = trimmed[1..trimmed.len() - 1].trim().to_string();
                if !matches!(current_section.as_str(), "codegen" | "triton" | "benchmark") {
                    return Err(Diagnostic::error(
                        format!("unknown section [{}]", current_section),
                        span,
                    )
                    .with_help("expected [codegen], [triton] or [benchmark]".to_string()));
                }
                continue;
            }
            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(Diagnostic::error(
                    format!("expected 'key = value', found '{}'", trimmed),
                    span,
                ));
            };
            let key = key.trim().trim_matches('"');
            let value = value.trim();

            match (current_section.as_str(), key) {
                ("codegen", "memory_planning") => config.memory_planning = parse_bool(value, span)?,
                ("codegen", "size_asserts") => config.size_asserts = parse_bool(value, span)?,
                ("codegen", "profile_bandwidth") => {
                    config.profile_bandwidth = parse_bool(value, span)?
                }
                ("codegen", "profiler_mark_wrapper_call") => {
                    config.profiler_mark_wrapper_call = parse_bool(value, span)?
                }
                ("codegen", "benchmark_harness") => {
                    config.benchmark_harness = parse_bool(value, span)?
                }
                ("triton", "debug_sync_graph") => {
                    config.debug_sync_graph = parse_bool(value, span)?
                }
                ("triton", "store_cubin") => config.store_cubin = parse_bool(value, span)?,
                ("benchmark", "times") => config.benchmark_times = parse_count(value, span)?,
                ("benchmark", "repeat") => config.benchmark_repeat = parse_count(value, span)?,
                ("benchmark", "name") => config.benchmark_name = value.trim_matches('"').to_string(),
                (section, key) => {
                    let section = if section.is_empty() { "<top level>" } else { section };
                    return Err(Diagnostic::error(
                        format!("unknown key '{}' in {}", key, section),
                        span,
                    ));
                }
            }
        }

        Ok(config)
    }

    /// Try to find an xpuwrap.toml in the given directory or its ancestors.
    pub fn find(start_dir: &Path) -> Option<PathBuf> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_FILE);
            if candidate.exists() {
                return Some(candidate);
            }
            if !dir.pop() {
                return None;
            }
        }
    }
}

fn parse_bool(value: &str, span: Span) -> Result<bool, Diagnostic> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(Diagnostic::error(
            format!("expected true or false, found '{}'", value),
            span,
        )),
    }
}

fn parse_count(value: &str, span: Span) -> Result<u32, Diagnostic> {
    match value.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(Diagnostic::error(
            format!("expected a positive integer, found '{}'", value),
            span,
        )),
    }
}
