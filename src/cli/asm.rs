use std::path::PathBuf;
use std::process;

use clap::Args;

use catface::asm::assemble;
use catface::linker::link;

use super::{file_name, read_source, write_executable, write_object};

#[derive(Args)]
pub struct AsmArgs {
    /// Input .cfasm file
    pub input: PathBuf,
    /// Output path (default: <input>.cfobj, or <input>.cfexe with -l)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Link the assembled object into an executable immediately
    #[arg(short = 'l', long)]
    pub link: bool,
}

pub fn cmd_asm(args: AsmArgs) {
    let source = read_source(&args.input);
    let name = file_name(&args.input);

    let object = match assemble(&source, &name) {
        Ok(object) => object,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };

    if args.link {
        let exe = match link(&[object]) {
            Ok(exe) => exe,
            Err(e) => {
                eprintln!("error: {}", e);
                process::exit(1);
            }
        };
        let output = args
            .output
            .unwrap_or_else(|| args.input.with_extension("cfexe"));
        write_executable(&output, &exe);
    } else {
        let output = args
            .output
            .unwrap_or_else(|| args.input.with_extension("cfobj"));
        write_object(&output, &object);
    }
}
