//! The CF toolchain: a compiler, assembler, linker, disassembler and
//! virtual machine for a small statically-typed language targeting a
//! sandboxed stack VM.
//!
//! The pipeline is strictly staged: lexer -> parser -> TIR builder ->
//! code generator produce a relocatable [`object::Object`]; the
//! [`linker`] combines objects into an [`executable::Executable`]; the
//! [`vm`] interprets the linked image against host capabilities supplied
//! through [`sandbox::Sandbox`].

pub mod asm;
pub mod ast;
pub mod bytecode;
pub mod codegen;
pub mod diagnostic;
pub mod disasm;
pub mod executable;
pub mod lexeme;
pub mod lexer;
pub mod linker;
pub mod object;
pub mod parser;
pub mod sandbox;
pub mod span;
pub mod tir;
pub mod types;
pub mod vm;

use diagnostic::Diagnostic;
use lexer::Lexer;
use object::Object;
use parser::Parser;

/// Lex and parse a CF source text into an AST.
pub fn parse_source(source: &str, file_name: &str) -> Result<ast::SourceFile, Diagnostic> {
    let (tokens, _comments) = Lexer::new(source, 0).tokenize()?;
    Parser::new(tokens, file_name).parse_file()
}

/// Run the full front half of the pipeline: source text to relocatable
/// object. The first failing stage aborts the build.
pub fn compile_source(source: &str, file_name: &str) -> Result<Object, Diagnostic> {
    let file = parse_source(source, file_name)?;
    let tir = tir::builder::build(&file)?;
    codegen::generate(&tir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_source_produces_linkable_object() {
        let object = compile_source(
            "fn main() { let x: i32 = 2 as i32 + 3 as i32; }",
            "smoke.cf",
        )
        .unwrap();
        assert_eq!(object.source_name, "smoke.cf");
        let exe = linker::link(&[object]).unwrap();
        assert!(!exe.code.is_empty());
    }

    #[test]
    fn test_compile_source_reports_first_error() {
        let err = compile_source("fn main() { let x: i32 = 1; }", "bad.cf").unwrap_err();
        assert_eq!(err.message, "cannot deduce literal type");
    }
}
