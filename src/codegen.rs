//! x86-64 System V code generator (§4.5).
//!
//! Every function and global has already been fully resolved by the parser
//! — types, storage offsets, field offsets, pointer scale factors — so this
//! pass never fails and never consults the symbol table. It walks the typed
//! tree once and prints AT&T assembly text for `as`/`cc` to pick up.
//!
//! The central trick is the address/value split driven by `Expr::is_lvalue`
//! (§9): `gen_addr` computes a memory address into `%rax`, `gen_value`
//! leaves the fully-loaded rvalue there. Aggregates never have a "value"
//! distinct from their address, so `gen_value` routes any record/union typed
//! expression straight to `gen_addr`.

use crate::ast::{BinOp, Expr, ExprKind, Function, Global, InitEntry, Program, Stmt, UnOp};
use crate::types::{self, TypeKind};

const ARG_REG64: [&str; 6] = ["%rdi", "%rsi", "%rdx", "%rcx", "%r8", "%r9"];
const ARG_REG8: [&str; 6] = ["%dil", "%sil", "%dl", "%cl", "%r8b", "%r9b"];

pub fn generate(program: &Program) -> String {
    let mut cg = Codegen::default();
    cg.gen_program(program);
    cg.out
}

#[derive(Default)]
struct Codegen {
    out: String,
    label_id: usize,
    /// Net push()/pop() calls since the current function's prologue, used
    /// only to decide whether a `call` needs an extra 8 bytes of padding to
    /// keep `%rsp` 16-byte aligned.
    depth: i64,
    return_label: String,
}

impl Codegen {
    fn emit(&mut self, line: impl std::fmt::Display) {
        self.out.push('\t');
        self.out.push_str(&line.to_string());
        self.out.push('\n');
    }

    fn label_line(&mut self, label: impl std::fmt::Display) {
        self.out.push_str(&label.to_string());
        self.out.push_str(":\n");
    }

    fn new_label(&mut self) -> usize {
        self.label_id += 1;
        self.label_id
    }

    fn push(&mut self) {
        self.emit("pushq %rax");
        self.depth += 1;
    }

    fn pop(&mut self, reg: &str) {
        self.emit(format!("popq {reg}"));
        self.depth -= 1;
    }

    fn call(&mut self, name: &str) {
        // System V requires %al to hold the vararg FP-register count; we
        // never pass floating-point args, so it's always 0.
        self.emit("xorl %eax, %eax");
        let pad = self.depth % 2 != 0;
        if pad {
            self.emit("subq $8, %rsp");
        }
        self.emit(format!("call {name}@PLT"));
        if pad {
            self.emit("addq $8, %rsp");
        }
    }

    // ---- top level ----

    fn gen_program(&mut self, program: &Program) {
        self.out.push_str("\t.text\n");
        for f in &program.functions {
            self.gen_function(f);
        }
        if !program.globals.is_empty() {
            self.out.push_str("\t.data\n");
            for g in &program.globals {
                self.gen_global(g);
            }
        }
        if !program.strings.is_empty() {
            self.out.push_str("\t.section .rodata\n");
            for s in &program.strings {
                self.label_line(&s.label);
                let bytes: Vec<String> = s.bytes.iter().map(|b| b.to_string()).collect();
                self.emit(format!(".byte {}", bytes.join(",")));
            }
        }
    }

    fn gen_global(&mut self, g: &Global) {
        self.emit(format!(".globl {}", g.name));
        self.label_line(&g.name);
        let size = types::size_of(&g.ty);
        if g.init.is_empty() {
            if size > 0 {
                self.emit(format!(".zero {size}"));
            }
            return;
        }
        let mut entries: Vec<&InitEntry> = g.init.iter().collect();
        entries.sort_by_key(|e| match e {
            InitEntry::Bytes { offset, .. } => *offset,
            InitEntry::Address { offset, .. } => *offset,
        });
        let mut cursor = 0usize;
        for entry in entries {
            let (offset, entry_size) = match entry {
                InitEntry::Bytes { offset, bytes } => (*offset, bytes.len()),
                InitEntry::Address { offset, .. } => (*offset, 8),
            };
            if offset > cursor {
                self.emit(format!(".zero {}", offset - cursor));
            }
            match entry {
                InitEntry::Bytes { bytes, .. } if bytes.len() == 1 => {
                    self.emit(format!(".byte {}", bytes[0]));
                }
                InitEntry::Bytes { bytes, .. } => {
                    let mut buf = [0u8; 8];
                    buf[..bytes.len()].copy_from_slice(bytes);
                    self.emit(format!(".quad {}", i64::from_le_bytes(buf)));
                }
                InitEntry::Address { label, addend, .. } => {
                    if *addend == 0 {
                        self.emit(format!(".quad {label}"));
                    } else if *addend > 0 {
                        self.emit(format!(".quad {label}+{addend}"));
                    } else {
                        self.emit(format!(".quad {label}{addend}"));
                    }
                }
            }
            cursor = offset + entry_size;
        }
        if cursor < size {
            self.emit(format!(".zero {}", size - cursor));
        }
    }

    fn gen_function(&mut self, f: &Function) {
        self.depth = 0;
        self.return_label = format!(".Lreturn_{}", f.name);
        self.emit(format!(".globl {}", f.name));
        self.label_line(&f.name);
        self.emit("pushq %rbp");
        self.emit("movq %rsp, %rbp");
        if f.frame_size > 0 {
            self.emit(format!("subq ${}, %rsp", f.frame_size));
        }
        for (i, (offset, (_, ty))) in f.param_offsets.iter().zip(f.params.iter()).enumerate() {
            match ty.as_ref() {
                TypeKind::Char => self.emit(format!("movb {}, {offset}(%rbp)", ARG_REG8[i])),
                _ => self.emit(format!("movq {}, {offset}(%rbp)", ARG_REG64[i])),
            }
        }
        for stmt in &f.body {
            self.gen_stmt(stmt);
        }
        self.label_line(&self.return_label.clone());
        self.emit("movq %rbp, %rsp");
        self.emit("popq %rbp");
        self.emit("ret");
        debug_assert_eq!(self.depth, 0, "unbalanced push/pop in {}", f.name);
    }

    // ---- statements ----

    fn gen_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Expr(e) => self.gen_value(e),
            Stmt::Compound(stmts) => {
                for s in stmts {
                    self.gen_stmt(s);
                }
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let id = self.new_label();
                self.gen_value(cond);
                self.emit("cmpq $0, %rax");
                if let Some(else_branch) = else_branch {
                    self.emit(format!("je .Lelse{id}"));
                    self.gen_stmt(then_branch);
                    self.emit(format!("jmp .Lend{id}"));
                    self.label_line(format!(".Lelse{id}"));
                    self.gen_stmt(else_branch);
                    self.label_line(format!(".Lend{id}"));
                } else {
                    self.emit(format!("je .Lend{id}"));
                    self.gen_stmt(then_branch);
                    self.label_line(format!(".Lend{id}"));
                }
            }
            Stmt::While { cond, body } => {
                let id = self.new_label();
                self.label_line(format!(".Lbegin{id}"));
                self.gen_value(cond);
                self.emit("cmpq $0, %rax");
                self.emit(format!("je .Lend{id}"));
                self.gen_stmt(body);
                self.emit(format!("jmp .Lbegin{id}"));
                self.label_line(format!(".Lend{id}"));
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
            } => {
                let id = self.new_label();
                if let Some(init) = init {
                    self.gen_stmt(init);
                }
                self.label_line(format!(".Lbegin{id}"));
                if let Some(cond) = cond {
                    self.gen_value(cond);
                    self.emit("cmpq $0, %rax");
                    self.emit(format!("je .Lend{id}"));
                }
                self.gen_stmt(body);
                if let Some(step) = step {
                    self.gen_value(step);
                }
                self.emit(format!("jmp .Lbegin{id}"));
                self.label_line(format!(".Lend{id}"));
            }
            Stmt::Return(value, _) => {
                if let Some(value) = value {
                    self.gen_value(value);
                }
                let label = self.return_label.clone();
                self.emit(format!("jmp {label}"));
            }
            Stmt::Empty => {}
            Stmt::ZeroFill { addr, size } => {
                self.gen_addr(addr);
                self.emit("movq %rax, %rdi");
                let mut off = 0usize;
                while off + 8 <= *size {
                    self.emit(format!("movq $0, {off}(%rdi)"));
                    off += 8;
                }
                while off < *size {
                    self.emit(format!("movb $0, {off}(%rdi)"));
                    off += 1;
                }
            }
        }
    }

    // ---- expressions: value ----

    fn gen_value(&mut self, e: &Expr) {
        if types::is_aggregate(&e.ty) {
            self.gen_addr(e);
            return;
        }
        if e.is_lvalue {
            self.gen_addr(e);
            self.emit_load(&e.ty);
            return;
        }
        match &e.kind {
            ExprKind::IntegerLiteral(v) => self.emit(format!("movq ${v}, %rax")),
            ExprKind::StringLiteral { .. } => self.gen_addr(e),
            ExprKind::Variable(_) => unreachable!("variables are always lvalues"),
            ExprKind::Unary(UnOp::Plus, inner) => self.gen_value(inner),
            ExprKind::Unary(UnOp::Neg, inner) => {
                self.gen_value(inner);
                self.emit("negq %rax");
            }
            ExprKind::Binary(op, lhs, rhs) => self.gen_binary(*op, lhs, rhs),
            ExprKind::PointerArith {
                op,
                ptr,
                index,
                elem_size,
            } => self.gen_pointer_arith(*op, ptr, index, *elem_size),
            ExprKind::PointerDiff { lhs, rhs, elem_size } => self.gen_pointer_diff(lhs, rhs, *elem_size),
            ExprKind::Call { callee, args } => self.gen_call(callee, args),
            ExprKind::Index { .. } => unreachable!("index is always an lvalue"),
            ExprKind::Member { .. } => unreachable!("member is always an lvalue"),
            ExprKind::Arrow { .. } => unreachable!("arrow is always an lvalue"),
            ExprKind::Assign(lhs, rhs) => self.gen_assign(lhs, rhs, &e.ty),
            ExprKind::AggregateAssign { .. } => unreachable!("aggregate type routed through gen_addr"),
            ExprKind::Comma(lhs, rhs) => {
                self.gen_value(lhs);
                self.gen_value(rhs);
            }
            ExprKind::AddressOf(inner) => self.gen_addr(inner),
            ExprKind::Deref(_) => unreachable!("deref is always an lvalue"),
            ExprKind::Decay(inner) => self.gen_addr(inner),
            ExprKind::Block(stmts, value) => {
                for s in stmts {
                    self.gen_stmt(s);
                }
                self.gen_value(value);
            }
            ExprKind::FrameSlot(_) => unreachable!("frame slot is always an lvalue"),
        }
    }

    fn emit_load(&mut self, ty: &crate::types::Type) {
        match ty.as_ref() {
            TypeKind::Char => self.emit("movsbq (%rax), %rax"),
            _ => self.emit("movq (%rax), %rax"),
        }
    }

    fn gen_binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr) {
        self.gen_value(lhs);
        self.push();
        self.gen_value(rhs);
        self.pop("%rdi");
        // Now %rdi holds lhs, %rax holds rhs.
        match op {
            BinOp::Add => self.emit("addq %rdi, %rax"),
            BinOp::Sub => {
                self.emit("subq %rax, %rdi");
                self.emit("movq %rdi, %rax");
            }
            BinOp::Mul => self.emit("imulq %rdi, %rax"),
            BinOp::Div => {
                self.emit("movq %rax, %rcx");
                self.emit("movq %rdi, %rax");
                self.emit("cqto");
                self.emit("idivq %rcx");
            }
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                self.emit("cmpq %rax, %rdi");
                let setcc = match op {
                    BinOp::Eq => "sete",
                    BinOp::Ne => "setne",
                    BinOp::Lt => "setl",
                    BinOp::Le => "setle",
                    BinOp::Gt => "setg",
                    BinOp::Ge => "setge",
                    _ => unreachable!(),
                };
                self.emit(format!("{setcc} %al"));
                self.emit("movzbq %al, %rax");
            }
        }
    }

    fn gen_pointer_arith(&mut self, op: BinOp, ptr: &Expr, index: &Expr, elem_size: usize) {
        self.gen_value(ptr);
        self.push();
        self.gen_value(index);
        self.pop("%rdi");
        // %rdi holds the pointer, %rax holds the index.
        self.emit(format!("imulq ${elem_size}, %rax"));
        match op {
            BinOp::Add => self.emit("addq %rdi, %rax"),
            BinOp::Sub => {
                self.emit("subq %rax, %rdi");
                self.emit("movq %rdi, %rax");
            }
            _ => unreachable!("pointer arithmetic is only Add/Sub"),
        }
    }

    fn gen_pointer_diff(&mut self, lhs: &Expr, rhs: &Expr, elem_size: usize) {
        self.gen_value(lhs);
        self.push();
        self.gen_value(rhs);
        self.pop("%rdi");
        // %rdi holds lhs, %rax holds rhs.
        self.emit("subq %rax, %rdi");
        self.emit("movq %rdi, %rax");
        self.emit("cqto");
        self.emit(format!("movq ${elem_size}, %rdi"));
        self.emit("idivq %rdi");
    }

    fn gen_call(&mut self, callee: &str, args: &[Expr]) {
        for arg in args {
            self.gen_value(arg);
            self.push();
        }
        for i in (0..args.len()).rev() {
            self.pop(ARG_REG64[i]);
        }
        self.call(callee);
    }

    fn gen_assign(&mut self, lhs: &Expr, rhs: &Expr, ty: &crate::types::Type) {
        self.gen_addr(lhs);
        self.push();
        self.gen_value(rhs);
        self.pop("%rdi");
        // %rdi holds the destination address, %rax holds the value.
        match ty.as_ref() {
            TypeKind::Char => {
                self.emit("movb %al, (%rdi)");
                self.emit("movsbq (%rdi), %rax");
            }
            _ => self.emit("movq %rax, (%rdi)"),
        }
    }

    // ---- expressions: address ----

    fn gen_addr(&mut self, e: &Expr) {
        match &e.kind {
            ExprKind::Variable(v) => match &v.storage {
                crate::symbols::Storage::Local(offset) => self.emit(format!("leaq {offset}(%rbp), %rax")),
                crate::symbols::Storage::Global(label) => self.emit(format!("leaq {label}(%rip), %rax")),
            },
            ExprKind::StringLiteral { label, .. } => self.emit(format!("leaq {label}(%rip), %rax")),
            ExprKind::Deref(inner) => self.gen_value(inner),
            ExprKind::Index { base, index } => {
                let elem_size = types::size_of(&e.ty);
                self.gen_value(base);
                self.push();
                self.gen_value(index);
                self.pop("%rdi");
                // %rdi holds the base address, %rax holds the index.
                self.emit(format!("imulq ${elem_size}, %rax"));
                self.emit("addq %rdi, %rax");
            }
            ExprKind::Member { base, offset, .. } => {
                self.gen_addr(base);
                if *offset != 0 {
                    self.emit(format!("addq ${offset}, %rax"));
                }
            }
            ExprKind::Arrow { base, offset, .. } => {
                self.gen_value(base);
                if *offset != 0 {
                    self.emit(format!("addq ${offset}, %rax"));
                }
            }
            ExprKind::FrameSlot(offset) => self.emit(format!("leaq {offset}(%rbp), %rax")),
            ExprKind::AggregateAssign { dst, src, size } => self.gen_aggregate_assign(dst, src, *size),
            ExprKind::Comma(lhs, rhs) => {
                self.gen_value(lhs);
                self.gen_addr(rhs);
            }
            ExprKind::Block(stmts, value) => {
                for s in stmts {
                    self.gen_stmt(s);
                }
                self.gen_addr(value);
            }
            _ => unreachable!("not an addressable expression: {:?}", e.kind),
        }
    }

    fn gen_aggregate_assign(&mut self, dst: &Expr, src: &Expr, size: usize) {
        self.gen_addr(dst);
        self.push();
        self.gen_addr(src);
        self.emit("movq %rax, %rsi");
        self.pop("%rdi");
        // %rdi holds the destination address, %rsi holds the source.
        let mut off = 0usize;
        while off + 8 <= size {
            self.emit(format!("movq {off}(%rsi), %rax"));
            self.emit(format!("movq %rax, {off}(%rdi)"));
            off += 8;
        }
        while off < size {
            self.emit(format!("movb {off}(%rsi), %al"));
            self.emit(format!("movb %al, {off}(%rdi)"));
            off += 1;
        }
        self.emit("movq %rdi, %rax");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Scanner;
    use crate::parser;
    use std::path::Path;

    fn compile(src: &str) -> String {
        let tokens = Scanner::new(src, Path::new("t.c")).tokenize().unwrap();
        let program = parser::parse(tokens).unwrap();
        generate(&program)
    }

    #[test]
    fn emits_function_prologue_and_epilogue() {
        let asm = compile("int main() { return 0; }");
        assert!(asm.contains("main:"));
        assert!(asm.contains("pushq %rbp"));
        assert!(asm.contains(".Lreturn_main:"));
        assert!(asm.contains("ret"));
    }

    #[test]
    fn binary_add_uses_push_pop_idiom() {
        let asm = compile("int main() { return 1 + 2; }");
        assert!(asm.contains("pushq %rax"));
        assert!(asm.contains("popq %rdi"));
        assert!(asm.contains("addq %rdi, %rax"));
    }

    #[test]
    fn global_with_zero_initializer_uses_zero_directive() {
        let asm = compile("int g;\nint main() { return 0; }");
        assert!(asm.contains(".zero 8"));
    }

    #[test]
    fn global_with_initializer_emits_quad() {
        let asm = compile("int g = 7;\nint main() { return 0; }");
        assert!(asm.contains(".quad 7"));
    }

    #[test]
    fn string_literal_emitted_to_rodata() {
        let asm = compile("int main() { char *p; p = \"hi\"; return 0; }");
        assert!(asm.contains(".section .rodata"));
        assert!(asm.contains(".byte 104,105,0"));
    }

    #[test]
    fn function_call_pads_stack_when_depth_is_odd() {
        let asm = compile("int f(int a, int b, int c) { return a + b + c; }\nint main() { return f(1, 2, 3); }");
        assert!(asm.contains("call f@PLT"));
    }

    #[test]
    fn char_param_spilled_with_byte_store() {
        let asm = compile("int f(char c) { return c; }");
        assert!(asm.contains("movb %dil,"));
    }
}
