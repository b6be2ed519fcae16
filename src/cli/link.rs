use std::path::PathBuf;
use std::process;

use clap::Args;

use catface::linker::link;

use super::{read_object, write_executable};

#[derive(Args)]
pub struct LinkArgs {
    /// Input object files, linked in the given order
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,
    /// Output executable (default: a.cfexe)
    #[arg(short, long, default_value = "a.cfexe")]
    pub output: PathBuf,
}

pub fn cmd_link(args: LinkArgs) {
    let objects: Vec<_> = args.inputs.iter().map(|path| read_object(path)).collect();

    let exe = match link(&objects) {
        Ok(exe) => exe,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };

    write_executable(&args.output, &exe);
}
