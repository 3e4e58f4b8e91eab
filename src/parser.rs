//! Recursive-descent parser with integrated name resolution and type
//! checking (§4.3 "Parser", §5 "Type engine", §6 "Symbol table").
//!
//! There is no separate type-checking pass: every [`Expr`] this module
//! builds already carries its resolved type and lvalue-ness the moment the
//! parser constructs it, and every identifier is resolved against the
//! live [`SymbolTable`] as soon as it is seen. A declarator's array
//! brackets are parsed separately from its pointer stars (`parse_declarator`
//! then `parse_array_suffixes`) because a function definition's name is
//! followed directly by `(`, never by `[`.

use crate::ast::{BinOp, Expr, ExprKind, Function, Global, InitEntry, Program, Stmt, StringData, UnOp};
use crate::error::{CompileError, Result, SourceLocation};
use crate::initializer::{self, InitLeaf};
use crate::lexer::{Keyword, Token, TokenKind};
use crate::symbols::{FuncSymbol, Storage, Symbol, SymbolTable, TagEntry, VarSymbol};
use crate::types::{self, Aggregate, Type, TypeKind};
use std::cell::RefCell;
use std::rc::Rc;

pub fn parse(tokens: Vec<Token>) -> Result<Program> {
    Parser::new(tokens).parse_program()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    symbols: SymbolTable,
    program: Program,
    string_counter: usize,
    /// Running stack-offset cursor for the function currently being
    /// parsed; locals (including parameters) are assigned offsets in
    /// declaration order as the parser walks the body (§4.5).
    frame_cursor: i64,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Parser {
            tokens,
            pos: 0,
            symbols: SymbolTable::new(),
            program: Program::default(),
            string_counter: 0,
            frame_cursor: 0,
        }
    }

    // ---- token-stream plumbing ----

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn loc(&self) -> SourceLocation {
        self.peek().location.clone()
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn is_punct(&self, p: &str) -> bool {
        self.peek().is_punct(p)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> Result<()> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(CompileError::parse(self.loc(), format!("expected '{p}'")))
        }
    }

    fn is_keyword(&self, kw: Keyword) -> bool {
        self.peek().is_keyword(kw)
    }

    fn eat_keyword(&mut self, kw: Keyword) -> bool {
        if self.is_keyword(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_ident(&mut self) -> Result<(String, SourceLocation)> {
        let loc = self.loc();
        if self.peek().ident().is_some() {
            let t = self.advance();
            match t.kind {
                TokenKind::Ident(s) => Ok((s, loc)),
                _ => unreachable!(),
            }
        } else {
            Err(CompileError::parse(loc, "expected identifier"))
        }
    }

    fn at_decl_specifier_start(&self) -> bool {
        self.is_keyword(Keyword::Int)
            || self.is_keyword(Keyword::Char)
            || self.is_keyword(Keyword::Void)
            || self.is_keyword(Keyword::Struct)
            || self.is_keyword(Keyword::Union)
    }

    fn require_complete(&self, ty: &Type, loc: &SourceLocation) -> Result<()> {
        match ty.as_ref() {
            TypeKind::Record(agg) | TypeKind::Union(agg) if !agg.borrow().complete => Err(
                CompileError::ty(loc.clone(), format!("'{}' is an incomplete type", ty)),
            ),
            _ => Ok(()),
        }
    }

    // ---- top level ----

    fn parse_program(&mut self) -> Result<Program> {
        while !self.at_eof() {
            self.parse_top_level_decl()?;
        }
        Ok(std::mem::take(&mut self.program))
    }

    fn parse_top_level_decl(&mut self) -> Result<()> {
        let base_ty = self.parse_decl_specifier()?;
        if self.eat_punct(";") {
            // `struct X { ... };` with no declarator: registers the tag only.
            return Ok(());
        }
        loop {
            let (name, ptr_ty, loc) = self.parse_declarator(base_ty.clone())?;
            if self.is_punct("(") {
                self.parse_function(name, ptr_ty, loc)?;
                return Ok(());
            }
            let full_ty = self.parse_array_suffixes(ptr_ty)?;
            self.require_complete(&full_ty, &loc)?;
            let init = if self.eat_punct("=") {
                let mut leaves = Vec::new();
                self.parse_initializer_leaves(&full_ty, 0, &mut leaves)?;
                initializer::leaves_to_global_entries(&leaves)?
            } else {
                Vec::new()
            };
            self.declare_global(name, full_ty, init, loc)?;
            if self.eat_punct(",") {
                continue;
            }
            self.expect_punct(";")?;
            return Ok(());
        }
    }

    fn declare_global(
        &mut self,
        name: String,
        ty: Type,
        init: Vec<InitEntry>,
        loc: SourceLocation,
    ) -> Result<()> {
        let symbol = Symbol::Var(VarSymbol {
            name: name.clone(),
            ty: ty.clone(),
            storage: Storage::Global(name.clone()),
        });
        if !self.symbols.declare(&name, symbol) {
            return Err(CompileError::name(loc, format!("redefinition of '{name}'")));
        }
        self.program.globals.push(Global {
            name,
            ty,
            init,
            location: loc,
        });
        Ok(())
    }

    // ---- types ----

    fn parse_decl_specifier(&mut self) -> Result<Type> {
        let loc = self.loc();
        if self.eat_keyword(Keyword::Int) {
            return Ok(types::new_int());
        }
        if self.eat_keyword(Keyword::Char) {
            return Ok(types::new_char());
        }
        if self.eat_keyword(Keyword::Void) {
            return Ok(types::new_void());
        }
        if self.eat_keyword(Keyword::Struct) {
            return self.parse_aggregate_specifier(true, loc);
        }
        if self.eat_keyword(Keyword::Union) {
            return self.parse_aggregate_specifier(false, loc);
        }
        Err(CompileError::parse(loc, "expected a type"))
    }

    fn parse_aggregate_specifier(&mut self, is_record: bool, loc: SourceLocation) -> Result<Type> {
        let tag = if self.peek().ident().is_some() {
            Some(self.expect_ident()?.0)
        } else {
            None
        };

        if !self.is_punct("{") {
            let name = tag.ok_or_else(|| {
                CompileError::parse(loc.clone(), "expected a tag name or '{' after struct/union")
            })?;
            let agg = self.find_or_forward_declare_tag(&name, is_record, &loc)?;
            return Ok(Self::aggregate_type(is_record, agg));
        }

        let agg = match &tag {
            Some(name) => self.find_or_forward_declare_tag_in_current_scope(name, is_record, &loc)?,
            None => Rc::new(RefCell::new(Aggregate::default())),
        };

        self.expect_punct("{")?;
        let mut fields: Vec<(String, Type)> = Vec::new();
        while !self.is_punct("}") {
            let field_base = self.parse_decl_specifier()?;
            loop {
                let (fname, fptr_ty, floc) = self.parse_declarator(field_base.clone())?;
                let fty = self.parse_array_suffixes(fptr_ty)?;
                self.require_complete(&fty, &floc)?;
                if fields.iter().any(|(n, _)| n == &fname) {
                    return Err(CompileError::name(floc, format!("duplicate field '{fname}'")));
                }
                fields.push((fname, fty));
                if self.eat_punct(",") {
                    continue;
                }
                break;
            }
            self.expect_punct(";")?;
        }
        self.expect_punct("}")?;

        let (laid_out, size, align) = if is_record {
            types::layout_record(&fields)
        } else {
            types::layout_union(&fields)
        };
        {
            let mut a = agg.borrow_mut();
            a.tag = tag;
            a.fields = laid_out;
            a.size = size;
            a.align = align;
            a.complete = true;
        }
        Ok(Self::aggregate_type(is_record, agg))
    }

    fn aggregate_type(is_record: bool, agg: Rc<RefCell<Aggregate>>) -> Type {
        if is_record {
            types::new_record(agg)
        } else {
            types::new_union(agg)
        }
    }

    fn find_or_forward_declare_tag(
        &mut self,
        name: &str,
        is_record: bool,
        loc: &SourceLocation,
    ) -> Result<Rc<RefCell<Aggregate>>> {
        match self.symbols.lookup_tag(name) {
            Some(TagEntry::Record(a)) if is_record => Ok(a.clone()),
            Some(TagEntry::Union(a)) if !is_record => Ok(a.clone()),
            Some(_) => Err(CompileError::name(
                loc.clone(),
                format!("'{name}' was previously declared as a different kind of tag"),
            )),
            None => {
                let fresh = Rc::new(RefCell::new(Aggregate {
                    tag: Some(name.to_string()),
                    ..Default::default()
                }));
                let entry = if is_record {
                    TagEntry::Record(fresh.clone())
                } else {
                    TagEntry::Union(fresh.clone())
                };
                self.symbols.declare_tag(name, entry);
                Ok(fresh)
            }
        }
    }

    fn find_or_forward_declare_tag_in_current_scope(
        &mut self,
        name: &str,
        is_record: bool,
        loc: &SourceLocation,
    ) -> Result<Rc<RefCell<Aggregate>>> {
        match self.symbols.lookup_tag_in_current_scope(name) {
            Some(TagEntry::Record(a)) if is_record => Ok(a.clone()),
            Some(TagEntry::Union(a)) if !is_record => Ok(a.clone()),
            Some(_) => Err(CompileError::name(
                loc.clone(),
                format!("'{name}' redeclared as a different kind of tag"),
            )),
            None => {
                let fresh = Rc::new(RefCell::new(Aggregate {
                    tag: Some(name.to_string()),
                    ..Default::default()
                }));
                let entry = if is_record {
                    TagEntry::Record(fresh.clone())
                } else {
                    TagEntry::Union(fresh.clone())
                };
                self.symbols.declare_tag(name, entry);
                Ok(fresh)
            }
        }
    }

    /// Pointer stars and the declared name only; array brackets are handled
    /// separately by [`Self::parse_array_suffixes`] so a function
    /// definition's `(` can be told apart from an array declarator's `[`.
    fn parse_declarator(&mut self, base: Type) -> Result<(String, Type, SourceLocation)> {
        let mut ty = base;
        while self.eat_punct("*") {
            ty = types::new_pointer(ty);
        }
        let (name, loc) = self.expect_ident()?;
        Ok((name, ty, loc))
    }

    fn parse_array_suffixes(&mut self, base: Type) -> Result<Type> {
        let mut dims = Vec::new();
        while self.eat_punct("[") {
            let loc = self.loc();
            let n = self.parse_array_dim_literal(&loc)?;
            self.expect_punct("]")?;
            dims.push(n);
        }
        let mut ty = base;
        for n in dims.into_iter().rev() {
            ty = types::new_array(ty, n);
        }
        Ok(ty)
    }

    fn parse_array_dim_literal(&mut self, loc: &SourceLocation) -> Result<usize> {
        match self.peek().kind.clone() {
            TokenKind::Integer(v) => {
                self.advance();
                if v < 0 {
                    return Err(CompileError::parse(loc.clone(), "array size cannot be negative"));
                }
                Ok(v as usize)
            }
            _ => Err(CompileError::parse(loc.clone(), "expected an array size")),
        }
    }

    // ---- functions ----

    fn parse_function(&mut self, name: String, return_type: Type, loc: SourceLocation) -> Result<()> {
        self.expect_punct("(")?;
        self.symbols.push_scope();
        self.frame_cursor = 0;

        let mut params: Vec<(String, Type)> = Vec::new();
        if !self.is_punct(")") {
            loop {
                let pbase = self.parse_decl_specifier()?;
                let (pname, pty, ploc) = self.parse_declarator(pbase)?;
                self.require_complete(&pty, &ploc)?;
                params.push((pname, pty));
                if self.eat_punct(",") {
                    continue;
                }
                break;
            }
        }
        self.expect_punct(")")?;
        if params.len() > 6 {
            self.symbols.pop_scope();
            return Err(CompileError::parse(
                loc,
                "more than six parameters is not supported",
            ));
        }

        let mut param_offsets = Vec::with_capacity(params.len());
        for (pname, pty) in &params {
            let offset = self.alloc_local(pty);
            param_offsets.push(offset);
            let symbol = Symbol::Var(VarSymbol {
                name: pname.clone(),
                ty: pty.clone(),
                storage: Storage::Local(offset),
            });
            if !self.symbols.declare(pname, symbol) {
                self.symbols.pop_scope();
                return Err(CompileError::name(loc, format!("duplicate parameter '{pname}'")));
            }
        }

        self.register_function_symbol(&name, &params, &return_type, &loc)?;

        self.expect_punct("{")?;
        let mut body = Vec::new();
        while !self.is_punct("}") {
            self.parse_block_item(&mut body)?;
        }
        self.expect_punct("}")?;

        let frame_size = types::round_up(self.frame_cursor.unsigned_abs() as usize, 16) as i64;
        self.symbols.pop_scope();

        self.program.functions.push(Function {
            name,
            params,
            param_offsets,
            return_type,
            body,
            frame_size,
            location: loc,
        });
        Ok(())
    }

    /// Registers a function's signature at file scope. A function may be
    /// called before its definition is reached (mutual recursion), so a
    /// prior entry for the same name is accepted as-is rather than treated
    /// as a redefinition; only a clash with a global *variable* is an
    /// error.
    fn register_function_symbol(
        &mut self,
        name: &str,
        params: &[(String, Type)],
        return_type: &Type,
        loc: &SourceLocation,
    ) -> Result<()> {
        if let Some(Symbol::Var(_)) = self.symbols.lookup(name) {
            return Err(CompileError::name(
                loc.clone(),
                format!("'{name}' redeclared as a function after being declared a variable"),
            ));
        }
        if self.symbols.lookup(name).is_none() {
            let symbol = Symbol::Func(FuncSymbol {
                name: name.to_string(),
                param_types: params.iter().map(|(_, t)| t.clone()).collect(),
                return_type: return_type.clone(),
            });
            self.symbols.declare(name, symbol);
        }
        Ok(())
    }

    fn alloc_local(&mut self, ty: &Type) -> i64 {
        let size = types::size_of(ty) as i64;
        let align = types::align_of(ty) as i64;
        self.frame_cursor -= size;
        self.frame_cursor = round_down(self.frame_cursor, align);
        self.frame_cursor
    }

    // ---- statements ----

    fn parse_block_item(&mut self, out: &mut Vec<Stmt>) -> Result<()> {
        if self.at_decl_specifier_start() {
            self.parse_local_decl(out)
        } else {
            let s = self.parse_stmt()?;
            out.push(s);
            Ok(())
        }
    }

    /// Parses one local declaration, possibly several comma-separated
    /// declarators sharing a base type, and appends the statements its
    /// initializers synthesize (§4.3 initializer engine). Zero
    /// declarators is legal (`int;`), matching a corpus edge case.
    fn parse_local_decl(&mut self, out: &mut Vec<Stmt>) -> Result<()> {
        let base_ty = self.parse_decl_specifier()?;
        if self.eat_punct(";") {
            return Ok(());
        }
        loop {
            let (name, ptr_ty, loc) = self.parse_declarator(base_ty.clone())?;
            let full_ty = self.parse_array_suffixes(ptr_ty)?;
            self.require_complete(&full_ty, &loc)?;
            let offset = self.alloc_local(&full_ty);
            let symbol = Symbol::Var(VarSymbol {
                name: name.clone(),
                ty: full_ty.clone(),
                storage: Storage::Local(offset),
            });
            if !self.symbols.declare(&name, symbol) {
                return Err(CompileError::name(loc, format!("redeclaration of '{name}'")));
            }
            if self.eat_punct("=") {
                let mut leaves = Vec::new();
                self.parse_initializer_leaves(&full_ty, 0, &mut leaves)?;
                let size = types::size_of(&full_ty);
                out.extend(initializer::leaves_to_local_stmts(
                    offset, size, &full_ty, leaves, &loc,
                ));
            }
            if self.eat_punct(",") {
                continue;
            }
            break;
        }
        self.expect_punct(";")?;
        Ok(())
    }

    fn parse_stmt(&mut self) -> Result<Stmt> {
        if self.eat_punct(";") {
            return Ok(Stmt::Empty);
        }
        if self.is_punct("{") {
            return self.parse_compound();
        }
        if self.eat_keyword(Keyword::Return) {
            let loc = self.loc();
            if self.eat_punct(";") {
                return Ok(Stmt::Return(None, loc));
            }
            let e = self.to_rvalue(self.parse_expr()?);
            self.expect_punct(";")?;
            return Ok(Stmt::Return(Some(e), loc));
        }
        if self.eat_keyword(Keyword::If) {
            self.expect_punct("(")?;
            let cond = self.to_rvalue(self.parse_expr()?);
            self.expect_punct(")")?;
            let then_branch = Box::new(self.parse_stmt()?);
            let else_branch = if self.eat_keyword(Keyword::Else) {
                Some(Box::new(self.parse_stmt()?))
            } else {
                None
            };
            return Ok(Stmt::If {
                cond,
                then_branch,
                else_branch,
            });
        }
        if self.eat_keyword(Keyword::While) {
            self.expect_punct("(")?;
            let cond = self.to_rvalue(self.parse_expr()?);
            self.expect_punct(")")?;
            let body = Box::new(self.parse_stmt()?);
            return Ok(Stmt::While { cond, body });
        }
        if self.eat_keyword(Keyword::For) {
            return self.parse_for();
        }
        let e = self.to_rvalue(self.parse_expr()?);
        self.expect_punct(";")?;
        Ok(Stmt::Expr(e))
    }

    fn parse_for(&mut self) -> Result<Stmt> {
        self.expect_punct("(")?;
        self.symbols.push_scope();

        let init: Option<Box<Stmt>> = if self.eat_punct(";") {
            None
        } else if self.at_decl_specifier_start() {
            let mut decl_stmts = Vec::new();
            self.parse_local_decl(&mut decl_stmts)?;
            Some(Box::new(Stmt::Compound(decl_stmts)))
        } else {
            let e = self.to_rvalue(self.parse_expr()?);
            self.expect_punct(";")?;
            Some(Box::new(Stmt::Expr(e)))
        };

        let cond = if self.is_punct(";") {
            None
        } else {
            Some(self.to_rvalue(self.parse_expr()?))
        };
        self.expect_punct(";")?;

        let step = if self.is_punct(")") {
            None
        } else {
            Some(self.to_rvalue(self.parse_expr()?))
        };
        self.expect_punct(")")?;

        let body = Box::new(self.parse_stmt()?);
        self.symbols.pop_scope();
        Ok(Stmt::For { init, cond, step, body })
    }

    fn parse_compound(&mut self) -> Result<Stmt> {
        self.expect_punct("{")?;
        self.symbols.push_scope();
        let mut stmts = Vec::new();
        while !self.is_punct("}") {
            self.parse_block_item(&mut stmts)?;
        }
        self.expect_punct("}")?;
        self.symbols.pop_scope();
        Ok(Stmt::Compound(stmts))
    }

    // ---- expressions ----

    /// Array-to-pointer decay (§4.3), applied at every point an expression
    /// is consumed for its value. `&`/`sizeof` operands bypass this and see
    /// the undecayed type directly.
    fn to_rvalue(&self, e: Expr) -> Expr {
        if let TypeKind::Array(..) = e.ty.as_ref() {
            let elem = types::pointee(&e.ty).expect("array always has an element type");
            let loc = e.location.clone();
            Expr {
                kind: ExprKind::Decay(Box::new(e)),
                ty: types::new_pointer(elem),
                is_lvalue: false,
                location: loc,
            }
        } else {
            e
        }
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        let mut e = self.to_rvalue(self.parse_assign()?);
        while self.eat_punct(",") {
            let loc = self.loc();
            let rhs = self.to_rvalue(self.parse_assign()?);
            let ty = rhs.ty.clone();
            let is_lvalue = rhs.is_lvalue;
            e = Expr {
                kind: ExprKind::Comma(Box::new(e), Box::new(rhs)),
                ty,
                is_lvalue,
                location: loc,
            };
        }
        Ok(e)
    }

    fn parse_assign(&mut self) -> Result<Expr> {
        let lhs = self.parse_equality()?;
        if self.eat_punct("=") {
            let loc = self.loc();
            let rhs = self.parse_assign()?;
            return self.build_assign(lhs, rhs, loc);
        }
        Ok(lhs)
    }

    fn build_assign(&mut self, lhs: Expr, rhs: Expr, loc: SourceLocation) -> Result<Expr> {
        if !lhs.is_lvalue {
            return Err(CompileError::ty(loc, "left-hand side of assignment is not an lvalue"));
        }
        if types::is_aggregate(&lhs.ty) {
            if !self.same_aggregate_type(&lhs.ty, &rhs.ty) {
                return Err(CompileError::ty(loc, "incompatible types in aggregate assignment"));
            }
            let size = types::size_of(&lhs.ty);
            let ty = lhs.ty.clone();
            return Ok(Expr {
                kind: ExprKind::AggregateAssign {
                    dst: Box::new(lhs),
                    src: Box::new(rhs),
                    size,
                },
                ty,
                is_lvalue: false,
                location: loc,
            });
        }
        let rhs = self.to_rvalue(rhs);
        if types::is_aggregate(&rhs.ty) {
            return Err(CompileError::ty(loc, "cannot assign an aggregate value to a scalar"));
        }
        let ty = lhs.ty.clone();
        Ok(Expr {
            kind: ExprKind::Assign(Box::new(lhs), Box::new(rhs)),
            ty,
            is_lvalue: false,
            location: loc,
        })
    }

    fn same_aggregate_type(&self, a: &Type, b: &Type) -> bool {
        match (a.as_ref(), b.as_ref()) {
            (TypeKind::Record(x), TypeKind::Record(y)) => types::same_aggregate(x, y),
            (TypeKind::Union(x), TypeKind::Union(y)) => types::same_aggregate(x, y),
            _ => false,
        }
    }

    fn parse_equality(&mut self) -> Result<Expr> {
        let mut e = self.parse_relational()?;
        loop {
            let op = if self.is_punct("==") {
                BinOp::Eq
            } else if self.is_punct("!=") {
                BinOp::Ne
            } else {
                break;
            };
            let loc = self.loc();
            self.advance();
            let rhs = self.parse_relational()?;
            e = self.build_binary(op, e, rhs, loc)?;
        }
        Ok(e)
    }

    fn parse_relational(&mut self) -> Result<Expr> {
        let mut e = self.parse_additive()?;
        loop {
            let op = if self.is_punct("<=") {
                BinOp::Le
            } else if self.is_punct(">=") {
                BinOp::Ge
            } else if self.is_punct("<") {
                BinOp::Lt
            } else if self.is_punct(">") {
                BinOp::Gt
            } else {
                break;
            };
            let loc = self.loc();
            self.advance();
            let rhs = self.parse_additive()?;
            e = self.build_binary(op, e, rhs, loc)?;
        }
        Ok(e)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut e = self.parse_multiplicative()?;
        loop {
            let op = if self.is_punct("+") {
                BinOp::Add
            } else if self.is_punct("-") {
                BinOp::Sub
            } else {
                break;
            };
            let loc = self.loc();
            self.advance();
            let rhs = self.parse_multiplicative()?;
            e = self.build_binary(op, e, rhs, loc)?;
        }
        Ok(e)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut e = self.parse_unary()?;
        loop {
            let op = if self.is_punct("*") {
                BinOp::Mul
            } else if self.is_punct("/") {
                BinOp::Div
            } else {
                break;
            };
            let loc = self.loc();
            self.advance();
            let rhs = self.parse_unary()?;
            e = self.build_binary(op, e, rhs, loc)?;
        }
        Ok(e)
    }

    /// Builds a binary node, routing `+`/`-` into pointer arithmetic or
    /// pointer difference when either operand is a pointer/array (§4.3,
    /// §9 "Pointer arithmetic"). `n + p` and `p + n` both normalize to
    /// `PointerArith` with `ptr` holding the pointer operand.
    fn build_binary(&mut self, op: BinOp, lhs: Expr, rhs: Expr, loc: SourceLocation) -> Result<Expr> {
        let lhs = self.to_rvalue(lhs);
        let rhs = self.to_rvalue(rhs);
        let lhs_elem = types::pointee(&lhs.ty);
        let rhs_elem = types::pointee(&rhs.ty);

        match op {
            BinOp::Add => {
                if let Some(elem) = lhs_elem {
                    if rhs_elem.is_some() {
                        return Err(CompileError::ty(loc, "cannot add two pointers"));
                    }
                    self.require_integer(&rhs, &loc)?;
                    let elem_size = types::size_of(&elem);
                    return Ok(Expr {
                        kind: ExprKind::PointerArith {
                            op,
                            ptr: Box::new(lhs),
                            index: Box::new(rhs),
                            elem_size,
                        },
                        ty: types::new_pointer(elem),
                        is_lvalue: false,
                        location: loc,
                    });
                }
                if let Some(elem) = rhs_elem {
                    self.require_integer(&lhs, &loc)?;
                    let elem_size = types::size_of(&elem);
                    return Ok(Expr {
                        kind: ExprKind::PointerArith {
                            op,
                            ptr: Box::new(rhs),
                            index: Box::new(lhs),
                            elem_size,
                        },
                        ty: types::new_pointer(elem),
                        is_lvalue: false,
                        location: loc,
                    });
                }
                self.require_integer(&lhs, &loc)?;
                self.require_integer(&rhs, &loc)?;
                Ok(Self::plain_binary(op, lhs, rhs, loc))
            }
            BinOp::Sub => {
                if let (Some(le), Some(re)) = (lhs_elem.clone(), rhs_elem.clone()) {
                    if !types::types_equal(&le, &re) {
                        return Err(CompileError::ty(
                            loc,
                            "pointer difference requires matching pointee types",
                        ));
                    }
                    let elem_size = types::size_of(&le);
                    return Ok(Expr {
                        kind: ExprKind::PointerDiff {
                            lhs: Box::new(lhs),
                            rhs: Box::new(rhs),
                            elem_size,
                        },
                        ty: types::new_int(),
                        is_lvalue: false,
                        location: loc,
                    });
                }
                if let Some(elem) = lhs_elem {
                    self.require_integer(&rhs, &loc)?;
                    let elem_size = types::size_of(&elem);
                    return Ok(Expr {
                        kind: ExprKind::PointerArith {
                            op,
                            ptr: Box::new(lhs),
                            index: Box::new(rhs),
                            elem_size,
                        },
                        ty: types::new_pointer(elem),
                        is_lvalue: false,
                        location: loc,
                    });
                }
                if rhs_elem.is_some() {
                    return Err(CompileError::ty(loc, "cannot subtract a pointer from an integer"));
                }
                self.require_integer(&lhs, &loc)?;
                self.require_integer(&rhs, &loc)?;
                Ok(Self::plain_binary(op, lhs, rhs, loc))
            }
            BinOp::Mul | BinOp::Div => {
                self.require_integer(&lhs, &loc)?;
                self.require_integer(&rhs, &loc)?;
                Ok(Self::plain_binary(op, lhs, rhs, loc))
            }
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                Ok(Self::plain_binary(op, lhs, rhs, loc))
            }
        }
    }

    fn plain_binary(op: BinOp, lhs: Expr, rhs: Expr, loc: SourceLocation) -> Expr {
        Expr {
            kind: ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)),
            ty: types::new_int(),
            is_lvalue: false,
            location: loc,
        }
    }

    fn require_integer(&self, e: &Expr, loc: &SourceLocation) -> Result<()> {
        if types::is_integer(&e.ty) {
            Ok(())
        } else {
            Err(CompileError::ty(loc.clone(), "expected an integer operand"))
        }
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.eat_punct("+") {
            let loc = self.loc();
            let e = self.to_rvalue(self.parse_unary()?);
            self.require_integer(&e, &loc)?;
            return Ok(Expr {
                kind: ExprKind::Unary(UnOp::Plus, Box::new(e)),
                ty: types::new_int(),
                is_lvalue: false,
                location: loc,
            });
        }
        if self.eat_punct("-") {
            let loc = self.loc();
            let e = self.to_rvalue(self.parse_unary()?);
            self.require_integer(&e, &loc)?;
            return Ok(Expr {
                kind: ExprKind::Unary(UnOp::Neg, Box::new(e)),
                ty: types::new_int(),
                is_lvalue: false,
                location: loc,
            });
        }
        if self.eat_punct("*") {
            let loc = self.loc();
            let e = self.to_rvalue(self.parse_unary()?);
            let pointee = types::pointee(&e.ty)
                .ok_or_else(|| CompileError::ty(loc.clone(), "cannot dereference a non-pointer"))?;
            return Ok(Expr {
                kind: ExprKind::Deref(Box::new(e)),
                ty: pointee,
                is_lvalue: true,
                location: loc,
            });
        }
        if self.eat_punct("&") {
            let loc = self.loc();
            // Undecayed: `&array` reports the array's own type, not a
            // decayed pointer's.
            let e = self.parse_unary()?;
            if !e.is_lvalue {
                return Err(CompileError::ty(loc, "cannot take the address of a non-lvalue"));
            }
            let ty = types::new_pointer(e.ty.clone());
            return Ok(Expr {
                kind: ExprKind::AddressOf(Box::new(e)),
                ty,
                is_lvalue: false,
                location: loc,
            });
        }
        if self.eat_keyword(Keyword::Sizeof) {
            let loc = self.loc();
            // Undecayed and unevaluated: only the operand's type is used.
            let e = self.parse_unary()?;
            let size = types::size_of(&e.ty) as i64;
            return Ok(Expr {
                kind: ExprKind::IntegerLiteral(size),
                ty: types::new_int(),
                is_lvalue: false,
                location: loc,
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut e = self.parse_primary()?;
        loop {
            if self.eat_punct("[") {
                let loc = self.loc();
                let idx = self.parse_expr()?;
                self.expect_punct("]")?;
                e = self.build_index(e, idx, loc)?;
            } else if self.eat_punct(".") {
                let (field, floc) = self.expect_ident()?;
                e = self.build_member(e, field, floc)?;
            } else if self.eat_punct("->") {
                let (field, floc) = self.expect_ident()?;
                e = self.build_arrow(e, field, floc)?;
            } else {
                break;
            }
        }
        Ok(e)
    }

    /// `a[b]`: whichever operand is the pointer/array becomes `base`,
    /// which is what makes `i[p] == p[i]` fall out for free (§9).
    fn build_index(&mut self, a: Expr, b: Expr, loc: SourceLocation) -> Result<Expr> {
        let a = self.to_rvalue(a);
        let b = self.to_rvalue(b);
        let (base, index) = if types::pointee(&a.ty).is_some() {
            (a, b)
        } else if types::pointee(&b.ty).is_some() {
            (b, a)
        } else {
            return Err(CompileError::ty(loc, "subscript requires a pointer or array operand"));
        };
        self.require_integer(&index, &loc)?;
        let elem = types::pointee(&base.ty).expect("checked above");
        Ok(Expr {
            kind: ExprKind::Index {
                base: Box::new(base),
                index: Box::new(index),
            },
            ty: elem,
            is_lvalue: true,
            location: loc,
        })
    }

    fn build_member(&mut self, base: Expr, field: String, loc: SourceLocation) -> Result<Expr> {
        if !base.is_lvalue {
            return Err(CompileError::ty(loc, "member access requires an addressable aggregate"));
        }
        let agg = self.aggregate_of(&base.ty, &loc)?;
        let (fty, offset) = self.resolve_field(&agg, &field, &loc)?;
        Ok(Expr {
            kind: ExprKind::Member {
                base: Box::new(base),
                field,
                offset,
            },
            ty: fty,
            is_lvalue: true,
            location: loc,
        })
    }

    /// `p->f`: `base` is loaded (the pointer's value) before the field
    /// offset is added, unlike `.` which addresses its base in place.
    fn build_arrow(&mut self, base: Expr, field: String, loc: SourceLocation) -> Result<Expr> {
        let base = self.to_rvalue(base);
        let pointee = types::pointee(&base.ty)
            .ok_or_else(|| CompileError::ty(loc.clone(), "'->' requires a pointer operand"))?;
        let agg = self.aggregate_of(&pointee, &loc)?;
        let (fty, offset) = self.resolve_field(&agg, &field, &loc)?;
        Ok(Expr {
            kind: ExprKind::Arrow {
                base: Box::new(base),
                field,
                offset,
            },
            ty: fty,
            is_lvalue: true,
            location: loc,
        })
    }

    fn aggregate_of(&self, ty: &Type, loc: &SourceLocation) -> Result<Rc<RefCell<Aggregate>>> {
        match ty.as_ref() {
            TypeKind::Record(a) | TypeKind::Union(a) => Ok(a.clone()),
            _ => Err(CompileError::ty(loc.clone(), "expected a struct or union")),
        }
    }

    fn resolve_field(
        &self,
        agg: &Rc<RefCell<Aggregate>>,
        field: &str,
        loc: &SourceLocation,
    ) -> Result<(Type, usize)> {
        let a = agg.borrow();
        if !a.complete {
            return Err(CompileError::ty(loc.clone(), "member access on an incomplete type"));
        }
        let f = a
            .field(field)
            .ok_or_else(|| CompileError::name(loc.clone(), format!("no member named '{field}'")))?;
        Ok((f.ty.clone(), f.offset))
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let loc = self.loc();
        match self.peek().kind.clone() {
            TokenKind::Integer(v) => {
                self.advance();
                Ok(Expr {
                    kind: ExprKind::IntegerLiteral(v),
                    ty: types::new_int(),
                    is_lvalue: false,
                    location: loc,
                })
            }
            TokenKind::Character(v) => {
                self.advance();
                Ok(Expr {
                    kind: ExprKind::IntegerLiteral(v),
                    ty: types::new_char(),
                    is_lvalue: false,
                    location: loc,
                })
            }
            TokenKind::Str(bytes) => {
                self.advance();
                let label = self.new_string_label();
                let rc = Rc::new(bytes);
                self.program.strings.push(StringData {
                    label: label.clone(),
                    bytes: rc.clone(),
                });
                let len = rc.len();
                Ok(Expr {
                    kind: ExprKind::StringLiteral { label, bytes: rc },
                    ty: types::new_array(types::new_char(), len),
                    is_lvalue: false,
                    location: loc,
                })
            }
            TokenKind::Ident(name) => {
                self.advance();
                if self.is_punct("(") {
                    self.parse_call(name, loc)
                } else {
                    self.resolve_variable(&name, loc)
                }
            }
            TokenKind::Punct("(") => {
                self.advance();
                if self.is_punct("{") {
                    self.parse_block_expr(loc)
                } else {
                    let e = self.parse_expr()?;
                    self.expect_punct(")")?;
                    Ok(e)
                }
            }
            _ => Err(CompileError::parse(loc, "expected an expression")),
        }
    }

    fn resolve_variable(&self, name: &str, loc: SourceLocation) -> Result<Expr> {
        match self.symbols.lookup(name) {
            Some(Symbol::Var(v)) => Ok(Expr {
                kind: ExprKind::Variable(v.clone()),
                ty: v.ty.clone(),
                is_lvalue: true,
                location: loc,
            }),
            Some(Symbol::Func(_)) => {
                Err(CompileError::ty(loc, format!("'{name}' is a function, not a value")))
            }
            None => Err(CompileError::name(
                loc,
                format!("use of undeclared identifier '{name}'"),
            )),
        }
    }

    fn new_string_label(&mut self) -> String {
        let label = format!(".LC{}", self.string_counter);
        self.string_counter += 1;
        label
    }

    /// A call never checks its target's declared signature: every call in
    /// this dialect returns `int` (the corpus never declares otherwise),
    /// and an entirely undeclared callee — common for the handful of
    /// external helper functions the corpus links against but never
    /// defines — is simply passed through by name for the linker to
    /// resolve.
    fn parse_call(&mut self, callee: String, loc: SourceLocation) -> Result<Expr> {
        self.expect_punct("(")?;
        let mut args = Vec::new();
        if !self.is_punct(")") {
            loop {
                let a = self.to_rvalue(self.parse_assign()?);
                args.push(a);
                if self.eat_punct(",") {
                    continue;
                }
                break;
            }
        }
        self.expect_punct(")")?;
        if args.len() > 6 {
            return Err(CompileError::parse(loc, "more than six call arguments is not supported"));
        }
        Ok(Expr {
            kind: ExprKind::Call { callee, args },
            ty: types::new_int(),
            is_lvalue: false,
            location: loc,
        })
    }

    /// `({ stmt* })`: the value and type are those of the trailing
    /// expression statement; an early `return` inside still escapes the
    /// enclosing function (§9 "Block expressions").
    fn parse_block_expr(&mut self, loc: SourceLocation) -> Result<Expr> {
        self.expect_punct("{")?;
        self.symbols.push_scope();
        let mut stmts = Vec::new();
        while !self.is_punct("}") {
            self.parse_block_item(&mut stmts)?;
        }
        self.expect_punct("}")?;
        self.expect_punct(")")?;
        self.symbols.pop_scope();

        let last = stmts
            .pop()
            .ok_or_else(|| CompileError::ty(loc.clone(), "block expression has no value"))?;
        let Stmt::Expr(value) = last else {
            return Err(CompileError::ty(
                loc,
                "block expression must end with an expression statement",
            ));
        };
        let ty = value.ty.clone();
        let is_lvalue = value.is_lvalue;
        Ok(Expr {
            kind: ExprKind::Block(stmts, Box::new(value)),
            ty,
            is_lvalue,
            location: loc,
        })
    }

    // ---- initializers ----

    /// The brace/flat-tree walk (§4.3 "Initializer engine"). Reduces
    /// whatever shape the initializer was written in — fully braced,
    /// partially braced, or entirely flat — to offset-ordered leaves.
    /// Fewer elements than the target holds is legal at every level: the
    /// remainder is left for the caller to zero-fill.
    fn parse_initializer_leaves(&mut self, ty: &Type, offset: usize, leaves: &mut Vec<InitLeaf>) -> Result<()> {
        if self.eat_punct("{") {
            match ty.as_ref() {
                TypeKind::Array(elem, n) => {
                    let elem_size = types::size_of(elem);
                    for i in 0..*n {
                        if self.is_punct("}") {
                            break;
                        }
                        self.parse_initializer_leaves(elem, offset + i * elem_size, leaves)?;
                        if i + 1 < *n && !self.is_punct("}") {
                            self.expect_punct(",")?;
                        } else {
                            self.eat_punct(",");
                        }
                    }
                }
                TypeKind::Record(agg) => {
                    let fields = agg.borrow().fields.clone();
                    for (i, f) in fields.iter().enumerate() {
                        if self.is_punct("}") {
                            break;
                        }
                        self.parse_initializer_leaves(&f.ty, offset + f.offset, leaves)?;
                        if i + 1 < fields.len() && !self.is_punct("}") {
                            self.expect_punct(",")?;
                        } else {
                            self.eat_punct(",");
                        }
                    }
                }
                TypeKind::Union(agg) => {
                    let fields = agg.borrow().fields.clone();
                    if let Some(f0) = fields.first() {
                        if !self.is_punct("}") {
                            self.parse_initializer_leaves(&f0.ty, offset + f0.offset, leaves)?;
                            self.eat_punct(",");
                        }
                    }
                }
                _ => {
                    if !self.is_punct("}") {
                        self.parse_scalar_initializer_leaf(ty, offset, leaves)?;
                        self.eat_punct(",");
                    }
                }
            }
            self.expect_punct("}")?;
            return Ok(());
        }

        match ty.as_ref() {
            TypeKind::Array(elem, n) if matches!(elem.as_ref(), TypeKind::Char) => {
                if let TokenKind::Str(_) = &self.peek().kind {
                    self.fill_char_array_from_string(*n, offset, leaves);
                    return Ok(());
                }
                self.parse_flat_sequence(elem, *n, offset, leaves)
            }
            TypeKind::Array(elem, n) => self.parse_flat_sequence(elem, *n, offset, leaves),
            TypeKind::Record(agg) => {
                let fields = agg.borrow().fields.clone();
                for f in &fields {
                    if self.is_punct("}") || self.is_punct(",") {
                        break;
                    }
                    self.parse_initializer_leaves(&f.ty, offset + f.offset, leaves)?;
                }
                Ok(())
            }
            TypeKind::Union(agg) => {
                let fields = agg.borrow().fields.clone();
                if let Some(f0) = fields.first() {
                    self.parse_initializer_leaves(&f0.ty, offset + f0.offset, leaves)?;
                }
                Ok(())
            }
            _ => self.parse_scalar_initializer_leaf(ty, offset, leaves),
        }
    }

    fn parse_flat_sequence(
        &mut self,
        elem: &Type,
        n: usize,
        offset: usize,
        leaves: &mut Vec<InitLeaf>,
    ) -> Result<()> {
        let elem_size = types::size_of(elem);
        for i in 0..n {
            if self.is_punct("}") {
                break;
            }
            self.parse_initializer_leaves(elem, offset + i * elem_size, leaves)?;
            if i + 1 < n {
                if self.is_punct("}") || !self.eat_punct(",") {
                    break;
                }
            }
        }
        Ok(())
    }

    fn fill_char_array_from_string(&mut self, n: usize, offset: usize, leaves: &mut Vec<InitLeaf>) {
        let loc = self.loc();
        let bytes = match self.advance().kind {
            TokenKind::Str(b) => b,
            _ => unreachable!("caller already peeked a Str token"),
        };
        for i in 0..n {
            let v = *bytes.get(i).unwrap_or(&0) as i64;
            leaves.push((
                offset + i,
                types::new_char(),
                Expr {
                    kind: ExprKind::IntegerLiteral(v),
                    ty: types::new_char(),
                    is_lvalue: false,
                    location: loc.clone(),
                },
            ));
        }
    }

    fn parse_scalar_initializer_leaf(&mut self, ty: &Type, offset: usize, leaves: &mut Vec<InitLeaf>) -> Result<()> {
        let loc = self.loc();
        let e = self.to_rvalue(self.parse_assign()?);
        if types::is_aggregate(&e.ty) {
            return Err(CompileError::ty(loc, "aggregate value where a scalar initializer is expected"));
        }
        leaves.push((offset, ty.clone(), e));
        Ok(())
    }
}

fn round_down(value: i64, align: i64) -> i64 {
    let r = value.rem_euclid(align);
    value - r
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Scanner;
    use std::path::Path;

    fn parse_src(src: &str) -> Program {
        let tokens = Scanner::new(src, Path::new("t.c")).tokenize().unwrap();
        parse(tokens).unwrap()
    }

    #[test]
    fn parses_function_with_return() {
        let prog = parse_src("int main() { return 42; }");
        assert_eq!(prog.functions.len(), 1);
        assert_eq!(prog.functions[0].name, "main");
        match &prog.functions[0].body[0] {
            Stmt::Return(Some(e), _) => assert!(matches!(e.kind, ExprKind::IntegerLiteral(42))),
            other => panic!("expected a return statement, got {other:?}"),
        }
    }

    #[test]
    fn array_declarator_builds_nested_array_type() {
        let prog = parse_src("int g[3][4];");
        match prog.globals[0].ty.as_ref() {
            TypeKind::Array(inner, 3) => match inner.as_ref() {
                TypeKind::Array(elem, 4) => assert!(matches!(elem.as_ref(), TypeKind::Int)),
                other => panic!("expected an inner array, got {other:?}"),
            },
            other => panic!("expected an outer array, got {other:?}"),
        }
    }

    #[test]
    fn pointer_arithmetic_scales_by_pointee_size() {
        let prog = parse_src("int f(int *p) { return p + 1; }");
        match &prog.functions[0].body[0] {
            Stmt::Return(Some(e), _) => match &e.kind {
                ExprKind::PointerArith { elem_size, .. } => assert_eq!(*elem_size, 8),
                other => panic!("expected pointer arithmetic, got {other:?}"),
            },
            other => panic!("expected a return statement, got {other:?}"),
        }
    }

    #[test]
    fn subscript_normalizes_to_the_pointer_operand_regardless_of_order() {
        let prog = parse_src("int f(int *p, int i) { return i[p]; }");
        match &prog.functions[0].body[0] {
            Stmt::Return(Some(e), _) => match &e.kind {
                ExprKind::Index { base, .. } => assert!(types::pointee(&base.ty).is_some()),
                other => panic!("expected an index expression, got {other:?}"),
            },
            other => panic!("expected a return statement, got {other:?}"),
        }
    }

    #[test]
    fn struct_member_access_resolves_offset() {
        let prog = parse_src("struct P { int x; char y; }; int f() { struct P a; return a.y; }");
        match prog.functions[0].body.last().unwrap() {
            Stmt::Return(Some(e), _) => match &e.kind {
                ExprKind::Member { field, offset, .. } => {
                    assert_eq!(field, "y");
                    assert_eq!(*offset, 8);
                }
                other => panic!("expected a member access, got {other:?}"),
            },
            other => panic!("expected a return statement, got {other:?}"),
        }
    }

    #[test]
    fn partial_global_array_initializer_only_records_given_leaves() {
        let prog = parse_src("int g[4] = {1, 2};");
        assert_eq!(prog.globals[0].init.len(), 2);
    }

    #[test]
    fn sizeof_reports_the_undecayed_array_size() {
        let prog = parse_src("int f() { int x[3][2]; return sizeof x; }");
        match prog.functions[0].body.last().unwrap() {
            Stmt::Return(Some(e), _) => assert!(matches!(e.kind, ExprKind::IntegerLiteral(48))),
            other => panic!("expected a return statement, got {other:?}"),
        }
    }

    #[test]
    fn self_referential_struct_field_resolves_to_the_same_tag() {
        let prog = parse_src(
            "struct Node { struct Node *next; int val; }; \
             int f() { struct Node a; struct Node *p = &a; return p->val; }",
        );
        match prog.functions[0].body.last().unwrap() {
            Stmt::Expr(_) => panic!("expected the final statement to be a return"),
            Stmt::Return(Some(e), _) => match &e.kind {
                ExprKind::Arrow { field, .. } => assert_eq!(field, "val"),
                other => panic!("expected an arrow access, got {other:?}"),
            },
            _ => panic!("unexpected statement shape"),
        }
    }
}
