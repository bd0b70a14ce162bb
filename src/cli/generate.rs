use std::path::PathBuf;
use std::process;

use clap::Args;

use xpuwrap::config::CodegenConfig;

use super::{load_config, read_program};

#[derive(Args)]
pub struct GenArgs {
    /// Input .wir program
    pub input: PathBuf,
    /// Output .py file (default: <input>.py)
    #[arg(short, long, conflicts_with = "stdout")]
    pub output: Option<PathBuf>,
    /// Print the module to stdout instead of writing a file
    #[arg(long)]
    pub stdout: bool,
    /// Configuration file (default: nearest xpuwrap.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
    /// Generate for a training graph (memory planning stays off)
    #[arg(long)]
    pub training: bool,
    /// Save the output-line to IR-line map as JSON
    #[arg(long, value_name = "PATH")]
    pub line_map: Option<PathBuf>,
    /// Lay out buffers in pools (inference only)
    #[arg(long)]
    pub memory_planning: bool,
    /// Skip assert_size_stride checks on inputs
    #[arg(long)]
    pub no_size_asserts: bool,
    /// Synchronize the device around the graph body
    #[arg(long)]
    pub debug_sync: bool,
    /// Bracket the body with start_graph()/end_graph()
    #[arg(long)]
    pub profile_bandwidth: bool,
    /// Wrap the body in a profiler record_function region
    #[arg(long)]
    pub profiler_mark: bool,
    /// Save compiled kernel binaries after the body runs
    #[arg(long)]
    pub store_cubin: bool,
    /// Leave out the benchmark harness
    #[arg(long)]
    pub no_benchmark: bool,
    /// Module name reported by the benchmark harness
    #[arg(long, value_name = "NAME")]
    pub benchmark_name: Option<String>,
}

impl GenArgs {
    /// Command-line switches layered over the file configuration.
    fn apply(&self, config: &mut CodegenConfig) {
        config.memory_planning |= self.memory_planning;
        config.debug_sync_graph |= self.debug_sync;
        config.profile_bandwidth |= self.profile_bandwidth;
        config.profiler_mark_wrapper_call |= self.profiler_mark;
        config.store_cubin |= self.store_cubin;
        if self.no_size_asserts {
            config.size_asserts = false;
        }
        if self.no_benchmark {
            config.benchmark_harness = false;
        }
        if let Some(name) = &self.benchmark_name {
            config.benchmark_name = name.clone();
        }
    }
}

pub fn cmd_generate(args: GenArgs) {
    let source = read_program(&args.input);
    let mut config = load_config(args.config.as_deref(), &args.input);
    args.apply(&mut config);

    let filename = args.input.display().to_string();
    let module = match xpuwrap::generate_file(&source, &filename, &config, !args.training) {
        Ok(m) => m,
        Err(_) => process::exit(1),
    };

    if args.stdout {
        print!("{}", module.source);
    } else {
        let out_path = args
            .output
            .clone()
            .unwrap_or_else(|| args.input.with_extension("py"));
        if let Err(e) = std::fs::write(&out_path, &module.source) {
            eprintln!("error: cannot write '{}': {}", out_path.display(), e);
            process::exit(1);
        }
        eprintln!(
            "Generated {} ({} lines, key {})",
            out_path.display(),
            module.source.lines().count(),
            module.short_key()
        );
    }

    if let Some(map_path) = &args.line_map {
        let json = match serde_json::to_string_pretty(&module.line_map) {
            Ok(json) => json,
            Err(e) => {
                eprintln!("error: cannot serialize line map: {}", e);
                process::exit(1);
            }
        };
        if let Err(e) = std::fs::write(map_path, json) {
            eprintln!("error: cannot write '{}': {}", map_path.display(), e);
            process::exit(1);
        }
    }
}
