use std::process;

use clap::Args;

use xpuwrap::dispatch::{CtorArg, DispatchRegistry, OperatorKind};

#[derive(Args)]
pub struct DispatchArgs {
    /// Device family: cpu, xpu or accelerator
    pub device: String,
    /// Operator kind, e.g. rms_norm or paged_attention
    pub op: String,
    /// Construct a kernel instance instead of returning the module
    #[arg(long)]
    pub instance: bool,
    /// Constructor arguments (ints, floats, true/false, strings)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

pub fn cmd_dispatch(args: DispatchArgs) {
    let op: OperatorKind = match args.op.parse() {
        Ok(op) => op,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };
    let ctor_args: Vec<CtorArg> = args.args.iter().map(|a| CtorArg::parse(a)).collect();

    let mut registry = DispatchRegistry::new();
    match registry.resolve(&args.device, op, args.instance, &ctor_args) {
        Ok(handle) => {
            println!("{}", handle);
            eprintln!("{} -> {} ({})", args.device, op, handle.module().family);
        }
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    }
}
