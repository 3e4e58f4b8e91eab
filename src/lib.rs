//! nanocc: a compiler for a pragmatic subset of C, targeting x86-64 System V.
//!
//! The pipeline is a single forward pass — preprocess, tokenize, parse (name
//! resolution and type-checking happen inline during parsing), generate
//! assembly — followed by handing the result to the platform's `cc` to
//! assemble and link. There is no separate type-check pass and no IR: by
//! the time `codegen` sees a [`ast::Program`] every node already carries its
//! resolved type and storage, so codegen itself cannot fail.

pub mod ast;
pub mod codegen;
pub mod error;
pub mod initializer;
pub mod lexer;
pub mod parser;
pub mod preprocessor;
pub mod symbols;
pub mod types;

pub use error::{CompileError, Result, Stage};

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Driver options surfaced by the CLI (§6).
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Stop after writing the `.s` file; don't invoke the assembler/linker.
    pub emit_asm_only: bool,
    /// Don't delete the intermediate `.s` file once linking succeeds.
    pub keep_asm: bool,
}

/// Runs preprocessing through codegen and returns the generated assembly
/// text, without touching the filesystem beyond reading `source_path` (and
/// whatever it `#include`s).
pub fn compile_to_asm(source_path: &Path) -> Result<String> {
    let source = preprocessor::preprocess(source_path)?;
    let tokens = lexer::Scanner::new(&source, source_path).tokenize()?;
    let program = parser::parse(tokens)?;
    Ok(codegen::generate(&program))
}

/// Compiles `source_path` to `output_path`, shelling out to `cc` to
/// assemble and link unless `options.emit_asm_only` is set.
pub fn compile_file(source_path: &Path, output_path: &Path, options: &CompileOptions) -> Result<()> {
    let asm = compile_to_asm(source_path)?;
    let asm_path = output_path.with_extension("s");
    fs::write(&asm_path, &asm).map_err(|e| CompileError::io(&asm_path, e.to_string()))?;

    if options.emit_asm_only {
        return Ok(());
    }

    let result = link(&asm_path, output_path);

    if !options.keep_asm {
        fs::remove_file(&asm_path).ok();
    }

    result
}

fn link(asm_path: &Path, output_path: &Path) -> Result<()> {
    let output = Command::new("cc")
        .arg(asm_path)
        .arg("-o")
        .arg(output_path)
        .output()
        .map_err(|e| CompileError::io(output_path, format!("failed to run cc: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CompileError::io(
            output_path,
            format!("cc failed:\n{stderr}"),
        ));
    }
    Ok(())
}

/// The output path a bare `SOURCE` argument with no explicit `-o` implies:
/// the input's file stem, in the current directory.
pub fn default_output_path(source_path: &Path) -> PathBuf {
    PathBuf::from(source_path.file_stem().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_source(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn compile_to_asm_produces_text_mentioning_main() {
        let dir = TempDir::new().unwrap();
        let src = write_source(&dir, "t.c", "int main() { return 0; }");
        let asm = compile_to_asm(&src).unwrap();
        assert!(asm.contains("main:"));
    }

    #[test]
    fn emit_asm_only_skips_the_linker() {
        let dir = TempDir::new().unwrap();
        let src = write_source(&dir, "t.c", "int main() { return 0; }");
        let out = dir.path().join("t");
        let options = CompileOptions {
            emit_asm_only: true,
            keep_asm: true,
        };
        compile_file(&src, &out, &options).unwrap();
        assert!(out.with_extension("s").exists());
        assert!(!out.exists());
    }

    #[test]
    fn parse_error_reports_location() {
        let dir = TempDir::new().unwrap();
        let src = write_source(&dir, "t.c", "int main() { return 0");
        let err = compile_to_asm(&src).unwrap_err();
        assert!(err.to_string().contains("t.c:"));
    }

    #[test]
    fn default_output_path_strips_extension() {
        assert_eq!(default_output_path(Path::new("foo/bar.c")), PathBuf::from("bar"));
    }
}
