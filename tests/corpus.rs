//! End-to-end tests compiling the fixture programs under `tests/fixtures/`.
//!
//! Each fixture pairs with `test.h`'s `ASSERT`/`assert` harness: every
//! assertion failure inside the compiled program calls `exit(1)`, so a
//! fixture that links and runs cleanly to exit code 0 is itself evidence
//! every assertion in it passed. The `#[ignore]` group actually links and
//! runs the binaries (needs a working `cc` + libc on PATH); the un-ignored
//! group only checks that each file makes it through parsing and codegen,
//! which is enough to run in sandboxes with no linker available.

use nanocc::compile_to_asm;
use std::path::{Path, PathBuf};

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

fn compiles_with_main_and_assert(name: &str) {
    let asm = compile_to_asm(&fixture(name)).unwrap_or_else(|e| panic!("{name}: {e}"));
    assert!(asm.contains("\nmain:\n"), "{name}: missing main label");
    assert!(asm.contains("\nassert:\n"), "{name}: missing assert label");
}

#[test]
fn arithmetic_compiles() {
    compiles_with_main_and_assert("arithmetic.c");
}

#[test]
fn character_compiles() {
    compiles_with_main_and_assert("character.c");
}

#[test]
fn control_compiles() {
    compiles_with_main_and_assert("control.c");
}

#[test]
fn pointer_compiles() {
    compiles_with_main_and_assert("pointer.c");
}

#[test]
fn sizeof_compiles() {
    compiles_with_main_and_assert("sizeof.c");
}

#[test]
fn string_compiles() {
    compiles_with_main_and_assert("string.c");
}

#[test]
fn struct_compiles() {
    compiles_with_main_and_assert("struct.c");
}

#[test]
fn union_compiles() {
    compiles_with_main_and_assert("union.c");
}

/// References undeclared externs (`ret3`, `ret5`, `power`, `modulo`,
/// `add6_weight`) with no definition anywhere in the fixture set, so it can
/// compile to assembly but never actually link. See the ignored group below
/// for why it's excluded there.
#[test]
fn function_compiles_to_asm() {
    let asm = compile_to_asm(&fixture("function.c")).unwrap();
    assert!(asm.contains("\nmain:\n"));
    assert!(asm.contains("call factorial@PLT"));
}

mod run {
    use super::fixture;
    use nanocc::{compile_file, CompileOptions};
    use std::process::Command;
    use tempfile::TempDir;

    fn run_fixture(name: &str) {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("a.out");
        compile_file(&fixture(name), &out, &CompileOptions::default())
            .unwrap_or_else(|e| panic!("{name}: {e}"));
        let status = Command::new(&out).status().unwrap_or_else(|e| panic!("{name}: {e}"));
        assert!(status.success(), "{name}: program exited with failing assertions");
    }

    // Requires a working `cc` (assembler + linker) and libc on PATH; not
    // available in every sandboxed build environment.
    #[test]
    #[ignore]
    fn arithmetic_runs() {
        run_fixture("arithmetic.c");
    }

    #[test]
    #[ignore]
    fn character_runs() {
        run_fixture("character.c");
    }

    #[test]
    #[ignore]
    fn control_runs() {
        run_fixture("control.c");
    }

    #[test]
    #[ignore]
    fn pointer_runs() {
        run_fixture("pointer.c");
    }

    #[test]
    #[ignore]
    fn sizeof_runs() {
        run_fixture("sizeof.c");
    }

    #[test]
    #[ignore]
    fn string_runs() {
        run_fixture("string.c");
    }

    #[test]
    #[ignore]
    fn struct_runs() {
        run_fixture("struct.c");
    }

    #[test]
    #[ignore]
    fn union_runs() {
        run_fixture("union.c");
    }

    // function.c needs ret3/ret5/power/modulo/add6_weight supplied by some
    // other translation unit; this crate's test corpus doesn't carry one,
    // so it's left out of the link-and-run group entirely.
}
