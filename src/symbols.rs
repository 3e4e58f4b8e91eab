//! Scopes, symbols and the tag namespaces (§3 "Scope", "Symbol").
//!
//! A [`SymbolTable`] is a stack of frames. Each frame holds two maps —
//! ordinary identifiers and tags — keyed by name. Lookup walks outward
//! from the innermost frame; declaration always writes to the innermost
//! one. This is exactly the nested-stack model §5 describes: push/pop is
//! disciplined entirely by parser recursion, so there is never a scope
//! alive that doesn't correspond to a live stack frame of the parser.

use crate::types::{Aggregate, Type};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, Clone)]
pub enum Storage {
    /// Offset from the frame pointer, assigned in declaration order as the
    /// parser walks a function body (§4.5 "Frame layout per function").
    Local(i64),
    Global(String),
}

#[derive(Debug, Clone)]
pub struct VarSymbol {
    pub name: String,
    pub ty: Type,
    pub storage: Storage,
}

#[derive(Debug, Clone)]
pub struct FuncSymbol {
    pub name: String,
    pub param_types: Vec<Type>,
    pub return_type: Type,
}

#[derive(Debug, Clone)]
pub enum Symbol {
    Var(VarSymbol),
    Func(FuncSymbol),
}

#[derive(Debug, Clone)]
pub enum TagEntry {
    Record(Rc<RefCell<Aggregate>>),
    Union(Rc<RefCell<Aggregate>>),
}

#[derive(Default)]
struct Frame {
    idents: HashMap<String, Symbol>,
    tags: HashMap<String, TagEntry>,
}

pub struct SymbolTable {
    frames: Vec<Frame>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        // File scope: the one frame that is never popped.
        SymbolTable {
            frames: vec![Frame::default()],
        }
    }

    pub fn push_scope(&mut self) {
        self.frames.push(Frame::default());
    }

    pub fn pop_scope(&mut self) {
        debug_assert!(self.frames.len() > 1, "cannot pop file scope");
        self.frames.pop();
    }

    pub fn is_file_scope(&self) -> bool {
        self.frames.len() == 1
    }

    /// Declares `symbol` under `name` in the innermost scope. Returns
    /// `false` if `name` is already declared in that same scope (a name
    /// error at the call site), matching "duplicate definition in the
    /// same scope" from §7.
    pub fn declare(&mut self, name: &str, symbol: Symbol) -> bool {
        let frame = self.frames.last_mut().expect("file scope always present");
        if frame.idents.contains_key(name) {
            return false;
        }
        frame.idents.insert(name.to_string(), symbol);
        true
    }

    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.idents.get(name))
    }

    /// Declares a tag in the innermost scope, shadowing any outer tag of
    /// the same name for the remainder of that scope (the corpus
    /// redeclares `struct G0` inside a block to change its size).
    pub fn declare_tag(&mut self, name: &str, entry: TagEntry) {
        self.frames
            .last_mut()
            .expect("file scope always present")
            .tags
            .insert(name.to_string(), entry);
    }

    pub fn lookup_tag(&self, name: &str) -> Option<&TagEntry> {
        self.frames.iter().rev().find_map(|frame| frame.tags.get(name))
    }

    /// A tag lookup restricted to the innermost scope only: used to decide
    /// whether `struct X { ... }` is introducing a new tag or completing
    /// one already forward-declared in this exact scope.
    pub fn lookup_tag_in_current_scope(&self, name: &str) -> Option<&TagEntry> {
        self.frames.last().and_then(|f| f.tags.get(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::new_int;

    fn var(name: &str, offset: i64) -> Symbol {
        Symbol::Var(VarSymbol {
            name: name.to_string(),
            ty: new_int(),
            storage: Storage::Local(offset),
        })
    }

    #[test]
    fn inner_scope_shadows_outer() {
        let mut table = SymbolTable::new();
        assert!(table.declare("x", var("x", -8)));
        table.push_scope();
        assert!(table.declare("x", var("x", -16)));
        match table.lookup("x").unwrap() {
            Symbol::Var(v) => assert!(matches!(v.storage, Storage::Local(-16))),
            _ => panic!("expected var"),
        }
        table.pop_scope();
        match table.lookup("x").unwrap() {
            Symbol::Var(v) => assert!(matches!(v.storage, Storage::Local(-8))),
            _ => panic!("expected var"),
        }
    }

    #[test]
    fn duplicate_declaration_in_same_scope_fails() {
        let mut table = SymbolTable::new();
        assert!(table.declare("x", var("x", -8)));
        assert!(!table.declare("x", var("x", -16)));
    }

    #[test]
    fn tag_lookup_walks_outward() {
        let mut table = SymbolTable::new();
        let agg = Rc::new(RefCell::new(Aggregate {
            tag: Some("G0".to_string()),
            complete: true,
            ..Default::default()
        }));
        table.declare_tag("G0", TagEntry::Record(agg.clone()));
        table.push_scope();
        assert!(table.lookup_tag("G0").is_some());
        assert!(table.lookup_tag_in_current_scope("G0").is_none());
    }
}
