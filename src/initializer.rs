//! Initializer engine (§4.3 "Initializer engine").
//!
//! The parser's brace-tree walk (see `parser.rs`, `parse_initializer_leaves`)
//! reduces any initializer — however deeply nested, with or without inner
//! braces — to a flat, offset-ordered list of `(offset, leaf type, value
//! expression)` triples. Everything in this module consumes that flat
//! list: for a global it becomes a byte image plus relocations; for a
//! local it becomes a zero-fill followed by a run of assignment
//! statements.

use crate::ast::{Expr, ExprKind, InitEntry, Stmt, UnOp};
use crate::error::{CompileError, Result, SourceLocation};
use crate::symbols::Storage;
use crate::types::{self, Type};

pub type InitLeaf = (usize, Type, Expr);

enum ConstValue {
    Int(i64),
    Address { label: String, addend: i64 },
}

/// Evaluates a global initializer element at compile time. Only integer
/// constants, negation/plus of one, and addresses of other globals or
/// string literals are accepted — exactly what §4.3 requires for a flat
/// static image.
fn const_eval(expr: &Expr) -> Result<ConstValue> {
    match &expr.kind {
        ExprKind::IntegerLiteral(v) => Ok(ConstValue::Int(*v)),
        ExprKind::Unary(UnOp::Neg, inner) => match const_eval(inner)? {
            ConstValue::Int(v) => Ok(ConstValue::Int(-v)),
            ConstValue::Address { .. } => Err(not_constant(&expr.location)),
        },
        ExprKind::Unary(UnOp::Plus, inner) => const_eval(inner),
        ExprKind::StringLiteral { label, .. } => Ok(ConstValue::Address {
            label: label.clone(),
            addend: 0,
        }),
        ExprKind::AddressOf(inner) => match &inner.kind {
            ExprKind::Variable(v) => match &v.storage {
                Storage::Global(label) => Ok(ConstValue::Address {
                    label: label.clone(),
                    addend: 0,
                }),
                Storage::Local(_) => Err(not_constant(&expr.location)),
            },
            _ => Err(not_constant(&expr.location)),
        },
        ExprKind::Binary(op, lhs, rhs) => {
            let l = const_eval(lhs)?;
            let r = const_eval(rhs)?;
            fold_const_binary(*op, l, r, &expr.location)
        }
        _ => Err(not_constant(&expr.location)),
    }
}

fn fold_const_binary(
    op: crate::ast::BinOp,
    l: ConstValue,
    r: ConstValue,
    loc: &SourceLocation,
) -> Result<ConstValue> {
    use crate::ast::BinOp::*;
    match (op, l, r) {
        (Add, ConstValue::Int(a), ConstValue::Int(b)) => Ok(ConstValue::Int(a + b)),
        (Sub, ConstValue::Int(a), ConstValue::Int(b)) => Ok(ConstValue::Int(a - b)),
        (Mul, ConstValue::Int(a), ConstValue::Int(b)) => Ok(ConstValue::Int(a * b)),
        (Div, ConstValue::Int(a), ConstValue::Int(b)) => Ok(ConstValue::Int(a / b)),
        (Add, ConstValue::Address { label, addend }, ConstValue::Int(b))
        | (Add, ConstValue::Int(b), ConstValue::Address { label, addend }) => {
            Ok(ConstValue::Address {
                label,
                addend: addend + b,
            })
        }
        (Sub, ConstValue::Address { label, addend }, ConstValue::Int(b)) => {
            Ok(ConstValue::Address {
                label,
                addend: addend - b,
            })
        }
        _ => Err(not_constant(loc)),
    }
}

fn not_constant(loc: &SourceLocation) -> CompileError {
    CompileError::initializer(loc.clone(), "initializer element is not a compile-time constant")
}

/// Turns flattened leaves into a global's flat byte/relocation image.
pub fn leaves_to_global_entries(leaves: &[InitLeaf]) -> Result<Vec<InitEntry>> {
    let mut entries = Vec::with_capacity(leaves.len());
    for (offset, ty, expr) in leaves {
        match const_eval(expr)? {
            ConstValue::Int(v) => {
                let size = types::size_of(ty);
                let bytes = v.to_le_bytes()[..size.min(8)].to_vec();
                entries.push(InitEntry::Bytes {
                    offset: *offset,
                    bytes,
                });
            }
            ConstValue::Address { label, addend } => {
                entries.push(InitEntry::Address {
                    offset: *offset,
                    label,
                    addend,
                });
            }
        }
    }
    Ok(entries)
}

/// Turns flattened leaves into the statements that initialize a local:
/// one zero-fill of the whole object (skipped for a fully-covered scalar)
/// followed by one assignment per leaf, in flattening order.
pub fn leaves_to_local_stmts(
    base_offset: i64,
    whole_size: usize,
    whole_ty: &Type,
    leaves: Vec<InitLeaf>,
    location: &SourceLocation,
) -> Vec<Stmt> {
    let mut stmts = Vec::with_capacity(leaves.len() + 1);
    let is_scalar_whole = !types::is_aggregate(whole_ty) && !matches!(whole_ty.as_ref(), crate::types::TypeKind::Array(..));
    if !is_scalar_whole {
        stmts.push(Stmt::ZeroFill {
            addr: Box::new(frame_slot(base_offset, whole_ty.clone(), location.clone())),
            size: whole_size,
        });
    }
    for (offset, ty, value) in leaves {
        let target = frame_slot(base_offset + offset as i64, ty.clone(), location.clone());
        let assign_ty = target.ty.clone();
        stmts.push(Stmt::Expr(Expr {
            kind: ExprKind::Assign(Box::new(target), Box::new(value)),
            ty: assign_ty,
            is_lvalue: false,
            location: location.clone(),
        }));
    }
    stmts
}

fn frame_slot(offset: i64, ty: Type, location: SourceLocation) -> Expr {
    Expr {
        kind: ExprKind::FrameSlot(offset),
        ty,
        is_lvalue: true,
        location,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceLocation;
    use crate::types::new_int;

    fn loc() -> SourceLocation {
        SourceLocation::new("t.c", 1, 1)
    }

    fn int_lit(v: i64) -> Expr {
        Expr {
            kind: ExprKind::IntegerLiteral(v),
            ty: new_int(),
            is_lvalue: false,
            location: loc(),
        }
    }

    #[test]
    fn global_entries_encode_little_endian() {
        let leaves = vec![(0usize, new_int(), int_lit(7)), (8usize, new_int(), int_lit(5))];
        let entries = leaves_to_global_entries(&leaves).unwrap();
        match &entries[0] {
            InitEntry::Bytes { offset, bytes } => {
                assert_eq!(*offset, 0);
                assert_eq!(bytes, &7i64.to_le_bytes());
            }
            _ => panic!("expected bytes entry"),
        }
        match &entries[1] {
            InitEntry::Bytes { offset, .. } => assert_eq!(*offset, 8),
            _ => panic!("expected bytes entry"),
        }
    }

    #[test]
    fn rejects_non_constant_global_initializer() {
        let not_const = Expr {
            kind: ExprKind::FrameSlot(-8),
            ty: new_int(),
            is_lvalue: true,
            location: loc(),
        };
        let leaves = vec![(0usize, new_int(), not_const)];
        assert!(leaves_to_global_entries(&leaves).is_err());
    }
}
