use std::path::PathBuf;
use std::process;

use clap::Args;

use catface::sandbox::HeadlessSandbox;
use catface::vm::{self, TermReason, DEFAULT_MEMORY_SIZE};

use super::read_executable;

#[derive(Args)]
pub struct RunArgs {
    /// Input executable
    pub input: PathBuf,
    /// RAM size in bytes
    #[arg(short, long, default_value_t = DEFAULT_MEMORY_SIZE)]
    pub memory_size: u32,
}

pub fn cmd_run(args: RunArgs) {
    let exe = read_executable(&args.input);

    let mut sandbox = HeadlessSandbox::new();
    let info = vm::execute(&exe, args.memory_size, &mut sandbox);

    if info.reason != TermReason::Halt {
        eprintln!("program terminated: {}", info);
        process::exit(1);
    }
}
