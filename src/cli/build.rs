use std::path::PathBuf;
use std::process;

use clap::Args;

use super::{file_name, read_source, write_object};

#[derive(Args)]
pub struct BuildArgs {
    /// Input .cf source file
    pub input: PathBuf,
    /// Output object file (default: <input>.cfobj)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub fn cmd_build(args: BuildArgs) {
    let source = read_source(&args.input);
    let name = file_name(&args.input);

    let object = match catface::compile_source(&source, &name) {
        Ok(object) => object,
        Err(diagnostic) => {
            diagnostic.render(&name, &source);
            process::exit(1);
        }
    };

    let output = args
        .output
        .unwrap_or_else(|| args.input.with_extension("cfobj"));
    write_object(&output, &object);
}
