use std::path::PathBuf;
use std::process;

use clap::Args;

use catface::disasm::disassemble;

use super::read_executable;

#[derive(Args)]
pub struct DisasmArgs {
    /// Input executable
    pub input: PathBuf,
    /// Output .cfasm file (default: stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub fn cmd_disasm(args: DisasmArgs) {
    let exe = read_executable(&args.input);

    let text = match disassemble(&exe.code) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };

    match args.output {
        Some(path) => {
            if let Err(e) = std::fs::write(&path, text) {
                eprintln!("error: cannot write '{}': {}", path.display(), e);
                process::exit(1);
            }
        }
        None => print!("{}", text),
    }
}
