//! Typed syntax tree.
//!
//! Every expression node carries its resolved [`Type`] and an `is_lvalue`
//! flag (§9 "Lvalue/rvalue duality") rather than living in a type
//! hierarchy; codegen picks "emit address" vs. "emit value" from that flag
//! instead of matching on node kind.

use crate::error::SourceLocation;
use crate::types::Type;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Plus,
    Neg,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Type,
    pub is_lvalue: bool,
    pub location: SourceLocation,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    IntegerLiteral(i64),
    /// A string literal's decoded bytes (trailing zero included) and the
    /// label codegen will emit for its anonymous data.
    StringLiteral { label: String, bytes: Rc<Vec<u8>> },
    /// A reference to a local/global variable, already resolved to its
    /// storage locator.
    Variable(crate::symbols::VarSymbol),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// `p + n` / `n + p` / `p - n` where the pointer side's pointee size
    /// has already been folded into the node so codegen never has to
    /// rediscover it.
    PointerArith {
        op: BinOp,
        ptr: Box<Expr>,
        index: Box<Expr>,
        elem_size: usize,
    },
    /// `p - q`, both pointers to the same T: byte difference scaled down
    /// by `elem_size`.
    PointerDiff {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        elem_size: usize,
    },
    Call {
        callee: String,
        args: Vec<Expr>,
    },
    /// `a[b]`, already normalized so that whichever operand is the
    /// pointer/array is recorded as `base` and the other as `index` —
    /// this is what makes `i[p] == p[i]` fall out for free.
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Member {
        base: Box<Expr>,
        field: String,
        offset: usize,
    },
    /// `p->f`, kept distinct from `Member` only in that `base` is loaded
    /// (dereferenced) before the offset is added; see §4.3.
    Arrow {
        base: Box<Expr>,
        field: String,
        offset: usize,
    },
    Assign(Box<Expr>, Box<Expr>),
    /// Assignment between two same-tag record/union operands: a
    /// byte-count-driven copy rather than a scalar store (§4.3).
    AggregateAssign {
        dst: Box<Expr>,
        src: Box<Expr>,
        size: usize,
    },
    Comma(Box<Expr>, Box<Expr>),
    AddressOf(Box<Expr>),
    Deref(Box<Expr>),
    /// Array-to-pointer decay (§4.3): the value is the *address* of the
    /// array operand, not a load from it. Never produced for `&`/`sizeof`
    /// operands, which see the undecayed array type.
    Decay(Box<Expr>),
    /// A block expression used where a value is expected: `({ ...; e; })`.
    /// Its type and lvalue-ness are those of the final expression
    /// statement.
    Block(Vec<Stmt>, Box<Expr>),
    /// A synthesized lvalue at a raw frame offset with an explicit type.
    /// Produced only by the initializer engine, for the sub-object
    /// addresses of a local's brace initializer (there is no surface
    /// syntax for this — see `initializer.rs`).
    FrameSlot(i64),
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Expr(Expr),
    /// A scoped block of statements. Locals declared inside are only
    /// visible for the remainder of this vector.
    Compound(Vec<Stmt>),
    If {
        cond: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Box<Stmt>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    Return(Option<Expr>, SourceLocation),
    Empty,
    /// The whole-object zero-fill synthesized ahead of a local aggregate's
    /// explicit initializer leaves (§4.3 initializer engine).
    ZeroFill { addr: Box<Expr>, size: usize },
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub params: Vec<(String, Type)>,
    /// Frame offset codegen spills each parameter to at entry, in the same
    /// order as `params`; assigned by the parser's `alloc_local` alongside
    /// every other local (§4.5), so this is the one piece of layout a
    /// parameter needs that a plain `(name, Type)` pair can't carry.
    pub param_offsets: Vec<i64>,
    pub return_type: Type,
    pub body: Vec<Stmt>,
    /// Total stack frame size in bytes, rounded up to 16 (§4.5).
    pub frame_size: i64,
    pub location: SourceLocation,
}

/// One contiguous run of explicit bytes in a global's flat initializer
/// image, or a relocation naming another global/string label (§4.3's
/// note on initializer elements that are themselves addresses).
#[derive(Debug, Clone)]
pub enum InitEntry {
    Bytes { offset: usize, bytes: Vec<u8> },
    Address { offset: usize, label: String, addend: i64 },
}

#[derive(Debug, Clone)]
pub struct Global {
    pub name: String,
    pub ty: Type,
    /// Omitted entirely (implicit zero-initialization) when the
    /// declaration had no initializer.
    pub init: Vec<InitEntry>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone)]
pub struct StringData {
    pub label: String,
    pub bytes: Rc<Vec<u8>>,
}

#[derive(Debug, Default)]
pub struct Program {
    pub functions: Vec<Function>,
    pub globals: Vec<Global>,
    pub strings: Vec<StringData>,
}
