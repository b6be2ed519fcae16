mod cli;

use clap::{Parser, Subcommand};

use cli::asm::AsmArgs;
use cli::build::BuildArgs;
use cli::disasm::DisasmArgs;
use cli::link::LinkArgs;
use cli::run::RunArgs;

#[derive(Parser)]
#[command(
    name = "catface",
    version,
    about = "CF toolchain — compiler, assembler, linker and virtual machine"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a .cf source file into a relocatable object
    Build(BuildArgs),
    /// Assemble textual bytecode into an object, optionally linking it
    Asm(AsmArgs),
    /// Link objects into an executable image
    Link(LinkArgs),
    /// Execute a linked image in the virtual machine
    Run(RunArgs),
    /// Disassemble an executable back into textual bytecode
    Disasm(DisasmArgs),
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Command::Build(args) => cli::build::cmd_build(args),
        Command::Asm(args) => cli::asm::cmd_asm(args),
        Command::Link(args) => cli::link::cmd_link(args),
        Command::Run(args) => cli::run::cmd_run(args),
        Command::Disasm(args) => cli::disasm::cmd_disasm(args),
    }
}
