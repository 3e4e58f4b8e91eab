//! Type system: the kinds from the data model, plus size/alignment/offset
//! computation (§3, §4.4).
//!
//! Records and variant-unions are represented as a shared, mutable
//! [`Aggregate`] behind `Rc<RefCell<_>>` rather than a plain struct: a tag
//! can be forward-declared (`struct X *next;` inside `struct X { ... }`)
//! before its body is known, and every `Type` built from that tag before
//! completion must see the fields once the closing `}` fills them in.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// An interned type handle. Cheap to clone; equality is structural for the
/// scalar/pointer/array cases and by aggregate identity for record/union
/// (two distinct anonymous `struct { int x; }` declarations are different
/// types even though they have identical layout, matching C).
pub type Type = Rc<TypeKind>;

#[derive(Debug)]
pub enum TypeKind {
    Void,
    Char,
    Int,
    Pointer(Type),
    Array(Type, usize),
    Record(Rc<RefCell<Aggregate>>),
    Union(Rc<RefCell<Aggregate>>),
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub ty: Type,
    pub offset: usize,
}

/// The shared body of a record or variant-union tag. `complete` is false
/// between a forward declaration (`struct X;`) and its defining `{ ... }`.
#[derive(Debug, Default)]
pub struct Aggregate {
    pub tag: Option<String>,
    pub fields: Vec<Field>,
    pub size: usize,
    pub align: usize,
    pub complete: bool,
}

impl Aggregate {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

pub fn new_void() -> Type {
    Rc::new(TypeKind::Void)
}

pub fn new_char() -> Type {
    Rc::new(TypeKind::Char)
}

pub fn new_int() -> Type {
    Rc::new(TypeKind::Int)
}

pub fn new_pointer(to: Type) -> Type {
    Rc::new(TypeKind::Pointer(to))
}

pub fn new_array(of: Type, len: usize) -> Type {
    Rc::new(TypeKind::Array(of, len))
}

pub fn new_record(agg: Rc<RefCell<Aggregate>>) -> Type {
    Rc::new(TypeKind::Record(agg))
}

pub fn new_union(agg: Rc<RefCell<Aggregate>>) -> Type {
    Rc::new(TypeKind::Union(agg))
}

/// Size in bytes (§3 invariant 5: always a positive multiple of `align`).
pub fn size_of(ty: &Type) -> usize {
    match ty.as_ref() {
        TypeKind::Void => 0,
        TypeKind::Char => 1,
        TypeKind::Int => 8,
        TypeKind::Pointer(_) => 8,
        TypeKind::Array(of, n) => size_of(of) * n,
        TypeKind::Record(agg) | TypeKind::Union(agg) => agg.borrow().size,
    }
}

pub fn align_of(ty: &Type) -> usize {
    match ty.as_ref() {
        TypeKind::Void => 1,
        TypeKind::Char => 1,
        TypeKind::Int => 8,
        TypeKind::Pointer(_) => 8,
        TypeKind::Array(of, _) => align_of(of),
        TypeKind::Record(agg) | TypeKind::Union(agg) => agg.borrow().align,
    }
}

pub fn is_integer(ty: &Type) -> bool {
    matches!(ty.as_ref(), TypeKind::Char | TypeKind::Int)
}

/// Pointer-or-array-to-T, for the purposes of pointer arithmetic and
/// `*`/`[]`. Returns the pointee/element type.
pub fn pointee(ty: &Type) -> Option<Type> {
    match ty.as_ref() {
        TypeKind::Pointer(to) => Some(to.clone()),
        TypeKind::Array(of, _) => Some(of.clone()),
        _ => None,
    }
}

pub fn is_aggregate(ty: &Type) -> bool {
    matches!(ty.as_ref(), TypeKind::Record(_) | TypeKind::Union(_))
}

/// Array-to-pointer decay (§4.3): an array of T becomes a pointer to T in
/// any scalar context. Non-arrays pass through unchanged.
pub fn decay(ty: &Type) -> Type {
    match ty.as_ref() {
        TypeKind::Array(of, _) => new_pointer(of.clone()),
        _ => ty.clone(),
    }
}

/// Same underlying tag/shape: used for `y = x` aggregate-copy compatibility
/// and for matching a forward-declared tag against its completion.
pub fn same_aggregate(a: &Rc<RefCell<Aggregate>>, b: &Rc<RefCell<Aggregate>>) -> bool {
    Rc::ptr_eq(a, b)
}

/// Structural equality: scalars and pointers/arrays compare by shape,
/// records/unions by tag identity (two distinct anonymous declarations with
/// identical fields are not the same type).
pub fn types_equal(a: &Type, b: &Type) -> bool {
    match (a.as_ref(), b.as_ref()) {
        (TypeKind::Void, TypeKind::Void) => true,
        (TypeKind::Char, TypeKind::Char) => true,
        (TypeKind::Int, TypeKind::Int) => true,
        (TypeKind::Pointer(x), TypeKind::Pointer(y)) => types_equal(x, y),
        (TypeKind::Array(x, m), TypeKind::Array(y, n)) => m == n && types_equal(x, y),
        (TypeKind::Record(x), TypeKind::Record(y)) => same_aggregate(x, y),
        (TypeKind::Union(x), TypeKind::Union(y)) => same_aggregate(x, y),
        _ => false,
    }
}

/// Lays out `fields` in declaration order with natural alignment padding
/// and returns `(size, align)`. Used to complete a record tag.
pub fn layout_record(fields: &[(String, Type)]) -> (Vec<Field>, usize, usize) {
    let mut offset = 0usize;
    let mut max_align = 1usize;
    let mut laid_out = Vec::with_capacity(fields.len());
    for (name, ty) in fields {
        let a = align_of(ty);
        max_align = max_align.max(a);
        offset = round_up(offset, a);
        laid_out.push(Field {
            name: name.clone(),
            ty: ty.clone(),
            offset,
        });
        offset += size_of(ty);
    }
    let size = round_up(offset, max_align).max(max_align);
    (laid_out, size, max_align)
}

/// All fields at offset 0; size is the largest field rounded up to the
/// largest alignment (§3).
pub fn layout_union(fields: &[(String, Type)]) -> (Vec<Field>, usize, usize) {
    let mut max_size = 0usize;
    let mut max_align = 1usize;
    let mut laid_out = Vec::with_capacity(fields.len());
    for (name, ty) in fields {
        max_size = max_size.max(size_of(ty));
        max_align = max_align.max(align_of(ty));
        laid_out.push(Field {
            name: name.clone(),
            ty: ty.clone(),
            offset: 0,
        });
    }
    let size = round_up(max_size, max_align).max(max_align);
    (laid_out, size, max_align)
}

pub fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeKind::Void => write!(f, "void"),
            TypeKind::Char => write!(f, "char"),
            TypeKind::Int => write!(f, "int"),
            TypeKind::Pointer(to) => write!(f, "{}*", to),
            TypeKind::Array(of, n) => write!(f, "{}[{}]", of, n),
            TypeKind::Record(agg) => {
                write!(f, "struct {}", agg.borrow().tag.as_deref().unwrap_or("<anon>"))
            }
            TypeKind::Union(agg) => {
                write!(f, "union {}", agg.borrow().tag.as_deref().unwrap_or("<anon>"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_size_is_element_size_times_len() {
        let arr = new_array(new_int(), 3);
        assert_eq!(size_of(&arr), 24);
        let arr = new_array(new_array(new_int(), 2), 3);
        assert_eq!(size_of(&arr), 48);
    }

    #[test]
    fn record_layout_pads_to_max_alignment() {
        // struct { int *x; char y; } -> pads to 16, confirmed by the corpus.
        let fields = vec![
            ("x".to_string(), new_pointer(new_int())),
            ("y".to_string(), new_char()),
        ];
        let (laid_out, size, align) = layout_record(&fields);
        assert_eq!(laid_out[0].offset, 0);
        assert_eq!(laid_out[1].offset, 8);
        assert_eq!(size, 16);
        assert_eq!(align, 8);
    }

    #[test]
    fn union_layout_shares_offset_zero() {
        let fields = vec![
            ("x".to_string(), new_pointer(new_int())),
            ("y".to_string(), new_char()),
        ];
        let (laid_out, size, _align) = layout_union(&fields);
        assert!(laid_out.iter().all(|f| f.offset == 0));
        assert_eq!(size, 8);
    }

    #[test]
    fn decay_only_affects_arrays() {
        let arr = new_array(new_int(), 4);
        assert!(matches!(decay(&arr).as_ref(), TypeKind::Pointer(_)));
        let p = new_pointer(new_int());
        assert!(matches!(decay(&p).as_ref(), TypeKind::Pointer(_)));
    }
}
