//! Runtime values.
//!
//! `Value` is a tagged union. Scalars are stored inline; every structured
//! value (list, dict, struct instance) lives in an `Rc<RefCell<…>>` cell so
//! identical values can be aliased through multiple variables and containers,
//! and cycles are possible. The cycle collector discovers container graphs
//! through [`Value::traverse`].
//!
//! All conversions (`to_display_string`, `to_bool`, `to_int`, `to_float`)
//! are total.

use std::{
    cell::RefCell,
    collections::HashSet,
    fmt,
    rc::Rc,
    sync::Arc,
};

use indexmap::IndexMap;

use crate::{
    ast::FunctionDecl,
    env::Env,
    executor::{Executor, Language},
    gc::GcState,
    structs::StructDef,
    types::Type,
};

/// A struct instance: the definition it was constructed from plus field
/// values parallel to `def.fields`.
pub struct StructValue {
    pub def: Rc<StructDef>,
    pub fields: Vec<Value>,
}

/// An enum member with its underlying integer value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumMember {
    pub enum_name: String,
    pub variant: String,
    pub value: i64,
}

/// The lightweight marker `a..b` / `a..=b` materializes as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeValue {
    pub start: i64,
    pub end: i64,
    pub inclusive: bool,
}

impl RangeValue {
    pub fn iter(&self) -> Box<dyn Iterator<Item = i64>> {
        if self.inclusive {
            Box::new(self.start..=self.end)
        } else {
            Box::new(self.start..self.end)
        }
    }
}

/// A user function value: the shared declaration plus the captured
/// environment realizing lexical scope.
pub struct FunctionValue {
    pub name: String,
    pub decl: Rc<FunctionDecl>,
    /// Captured defining environment; module-level functions see their
    /// module's imports through this.
    pub closure: Env,
    pub source_file: String,
    pub source_line: u32,
    /// Cache for structurally inferred return types.
    pub inferred_return: RefCell<Option<Type>>,
}

/// Identity and provenance of a polyglot block.
#[derive(Debug, Clone)]
pub struct BlockMetadata {
    pub id: String,
    pub language: Language,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub source_hint: Option<String>,
}

/// How a block value holds its executor.
///
/// `Shared` handles reference the single process-wide runtime for languages
/// that keep incremental global state; `Owned` instances belong to one block
/// (compiled-per-block targets). Member accessors share the same `Arc`, so
/// accessing a member of an owned block never clones or moves the instance.
#[derive(Clone)]
pub enum BlockBackend {
    Shared(Arc<dyn Executor>),
    Owned(Arc<dyn Executor>),
}

impl BlockBackend {
    pub fn executor(&self) -> &Arc<dyn Executor> {
        match self {
            Self::Shared(e) | Self::Owned(e) => e,
        }
    }
}

/// A block value: metadata, the raw source, its executor handle, and the
/// member path accumulated by chained member access.
pub struct BlockValue {
    pub meta: BlockMetadata,
    pub code: String,
    pub backend: BlockBackend,
    pub member_path: Vec<String>,
}

impl BlockValue {
    /// A new accessor extending the member path; the backend is shared, not
    /// duplicated.
    pub fn member(&self, name: &str) -> Self {
        let mut member_path = self.member_path.clone();
        member_path.push(name.to_owned());
        Self {
            meta: self.meta.clone(),
            code: self.code.clone(),
            backend: self.backend.clone(),
            member_path,
        }
    }

    pub fn member_path_string(&self) -> String {
        self.member_path.join(".")
    }
}

/// An opaque executor-owned handle with a textual repr. Member access and
/// chained calls go back through the owning executor.
pub struct ForeignObject {
    pub language: Language,
    pub handle: u64,
    pub repr: String,
    pub path: Vec<String>,
    pub executor: Arc<dyn Executor>,
}

impl ForeignObject {
    pub fn member(&self, name: &str) -> Self {
        let mut path = self.path.clone();
        path.push(name.to_owned());
        Self {
            language: self.language,
            handle: self.handle,
            repr: self.repr.clone(),
            path,
            executor: Arc::clone(&self.executor),
        }
    }

    pub fn path_string(&self) -> String {
        self.path.join(".")
    }
}

#[derive(Clone)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    List(Rc<RefCell<Vec<Value>>>),
    Dict(Rc<RefCell<IndexMap<String, Value>>>),
    Struct(Rc<RefCell<StructValue>>),
    Function(Rc<FunctionValue>),
    Block(Rc<BlockValue>),
    Foreign(Rc<ForeignObject>),
    Range(RangeValue),
    EnumMember(EnumMember),
}

impl Value {
    /// Allocates a list cell and registers it with the cycle collector.
    pub fn new_list(items: Vec<Value>, gc: &mut GcState) -> Self {
        let cell = Rc::new(RefCell::new(items));
        gc.track_list(&cell);
        Self::List(cell)
    }

    /// Allocates a dict cell and registers it with the cycle collector.
    pub fn new_dict(entries: IndexMap<String, Value>, gc: &mut GcState) -> Self {
        let cell = Rc::new(RefCell::new(entries));
        gc.track_dict(&cell);
        Self::Dict(cell)
    }

    /// Allocates a struct cell and registers it with the cycle collector.
    pub fn new_struct(instance: StructValue, gc: &mut GcState) -> Self {
        let cell = Rc::new(RefCell::new(instance));
        gc.track_struct(&cell);
        Self::Struct(cell)
    }

    /// The type name used in diagnostics.
    pub fn type_name(&self) -> String {
        match self {
            Self::Null => "null".to_owned(),
            Self::Int(_) => "int".to_owned(),
            Self::Float(_) => "float".to_owned(),
            Self::Bool(_) => "bool".to_owned(),
            Self::Str(_) => "string".to_owned(),
            Self::List(_) => "list".to_owned(),
            Self::Dict(_) => "dict".to_owned(),
            Self::Struct(instance) => instance.borrow().def.name.clone(),
            Self::Function(_) => "function".to_owned(),
            Self::Block(_) => "block".to_owned(),
            Self::Foreign(_) => "foreign".to_owned(),
            Self::Range(_) => "range".to_owned(),
            Self::EnumMember(member) => member.enum_name.clone(),
        }
    }

    /// Boolean coercion. Falsity is exactly `null`, `0`, `0.0`, `false`, and
    /// the empty string; every other value (including empty containers) is
    /// truthy.
    pub fn to_bool(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Int(v) => *v != 0,
            Self::Float(v) => *v != 0.0,
            Self::Bool(v) => *v,
            Self::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Total integer coercion; unparseable strings and structured values
    /// coerce to 0.
    pub fn to_int(&self) -> i64 {
        match self {
            Self::Null => 0,
            Self::Int(v) => *v,
            Self::Float(v) => *v as i64,
            Self::Bool(v) => i64::from(*v),
            Self::Str(s) => s.trim().parse::<i64>().unwrap_or(0),
            Self::EnumMember(member) => member.value,
            _ => 0,
        }
    }

    /// Total float coercion, mirroring `to_int`.
    pub fn to_float(&self) -> f64 {
        match self {
            Self::Null => 0.0,
            Self::Int(v) => *v as f64,
            Self::Float(v) => *v,
            Self::Bool(v) => f64::from(u8::from(*v)),
            Self::Str(s) => s.trim().parse::<f64>().unwrap_or(0.0),
            Self::EnumMember(member) => member.value as f64,
            _ => 0.0,
        }
    }

    /// The display form: strings render bare, everything else as its repr.
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            other => other.repr(),
        }
    }

    /// The repr form: strings are quoted, containers render recursively with
    /// a cycle guard (`[...]` / `{...}` on revisit).
    pub fn repr(&self) -> String {
        let mut out = String::new();
        let mut seen = HashSet::new();
        self.repr_into(&mut out, &mut seen);
        out
    }

    fn repr_into(&self, out: &mut String, seen: &mut HashSet<usize>) {
        match self {
            Self::Null => out.push_str("null"),
            Self::Int(v) => out.push_str(&v.to_string()),
            Self::Float(v) => out.push_str(&format_float(*v)),
            Self::Bool(v) => out.push_str(if *v { "true" } else { "false" }),
            Self::Str(s) => {
                out.push('"');
                for c in s.chars() {
                    match c {
                        '"' => out.push_str("\\\""),
                        '\\' => out.push_str("\\\\"),
                        '\n' => out.push_str("\\n"),
                        '\t' => out.push_str("\\t"),
                        other => out.push(other),
                    }
                }
                out.push('"');
            }
            Self::List(items) => {
                let key = Rc::as_ptr(items) as usize;
                if !seen.insert(key) {
                    out.push_str("[...]");
                    return;
                }
                out.push('[');
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.repr_into(out, seen);
                }
                out.push(']');
                seen.remove(&key);
            }
            Self::Dict(entries) => {
                let key = Rc::as_ptr(entries) as usize;
                if !seen.insert(key) {
                    out.push_str("{...}");
                    return;
                }
                out.push('{');
                for (i, (k, v)) in entries.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push('"');
                    out.push_str(k);
                    out.push_str("\": ");
                    v.repr_into(out, seen);
                }
                out.push('}');
                seen.remove(&key);
            }
            Self::Struct(instance) => {
                let key = Rc::as_ptr(instance) as usize;
                if !seen.insert(key) {
                    out.push_str("{...}");
                    return;
                }
                let instance = instance.borrow();
                out.push_str(&instance.def.name);
                out.push_str(" { ");
                for (i, (field, value)) in
                    instance.def.fields.iter().zip(&instance.fields).enumerate()
                {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&field.0);
                    out.push_str(": ");
                    value.repr_into(out, seen);
                }
                out.push_str(" }");
                seen.remove(&key);
            }
            Self::Function(f) => {
                out.push_str("<fn ");
                out.push_str(&f.name);
                out.push('>');
            }
            Self::Block(b) => {
                out.push_str("<block ");
                out.push_str(&b.meta.language.to_string());
                if !b.meta.id.is_empty() {
                    out.push(' ');
                    out.push_str(&b.meta.id);
                }
                out.push('>');
            }
            Self::Foreign(obj) => out.push_str(&obj.repr),
            Self::Range(r) => {
                out.push_str(&r.start.to_string());
                out.push_str(if r.inclusive { "..=" } else { ".." });
                out.push_str(&r.end.to_string());
            }
            Self::EnumMember(member) => {
                out.push_str(&member.enum_name);
                out.push('.');
                out.push_str(&member.variant);
            }
        }
    }

    /// Equality as the language defines it today: string-form equality after
    /// display coercion on both sides. This equates `1` and `"1"`; the
    /// behavior is preserved deliberately rather than silently corrected.
    pub fn loosely_eq(&self, other: &Self) -> bool {
        self.to_display_string() == other.to_display_string()
    }

    /// Structural comparison used by `catch` payload checks and tests:
    /// scalars by value, containers element-wise, struct instances by
    /// definition and fields.
    pub fn structural_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.structural_eq(y))
            }
            (Self::Dict(a), Self::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter().all(|(k, v)| {
                        b.get(k).is_some_and(|other| v.structural_eq(other))
                    })
            }
            (Self::Struct(a), Self::Struct(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.def.name == b.def.name
                    && a.fields.len() == b.fields.len()
                    && a.fields.iter().zip(&b.fields).all(|(x, y)| x.structural_eq(y))
            }
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            (Self::Block(a), Self::Block(b)) => Rc::ptr_eq(a, b),
            (Self::Foreign(a), Self::Foreign(b)) => {
                a.handle == b.handle && a.path == b.path
            }
            (Self::Range(a), Self::Range(b)) => a == b,
            (Self::EnumMember(a), Self::EnumMember(b)) => a == b,
            _ => false,
        }
    }

    /// Visits every directly referenced child value: list elements, dict
    /// values, and struct fields. Scalars have no children. The cycle
    /// collector relies on this to find reachable graph nodes.
    pub fn traverse(&self, visitor: &mut dyn FnMut(&Value)) {
        match self {
            Self::List(items) => {
                for item in items.borrow().iter() {
                    visitor(item);
                }
            }
            Self::Dict(entries) => {
                for value in entries.borrow().values() {
                    visitor(value);
                }
            }
            Self::Struct(instance) => {
                for field in &instance.borrow().fields {
                    visitor(field);
                }
            }
            _ => {}
        }
    }

    /// Deep copy used for by-value parameter binding. Aliasing and cycles
    /// inside the copied graph are preserved through a pointer map, so a
    /// self-referencing list copies to a self-referencing list instead of
    /// recursing forever.
    pub fn deep_copy(&self, gc: &mut GcState) -> Self {
        let mut copies: ahash::AHashMap<usize, Value> = ahash::AHashMap::new();
        self.deep_copy_inner(gc, &mut copies)
    }

    fn deep_copy_inner(
        &self,
        gc: &mut GcState,
        copies: &mut ahash::AHashMap<usize, Value>,
    ) -> Self {
        match self {
            Self::List(items) => {
                let key = Rc::as_ptr(items) as usize;
                if let Some(copy) = copies.get(&key) {
                    return copy.clone();
                }
                let cell = Rc::new(RefCell::new(Vec::new()));
                gc.track_list(&cell);
                copies.insert(key, Self::List(Rc::clone(&cell)));
                let copied: Vec<Value> = items
                    .borrow()
                    .iter()
                    .map(|v| v.deep_copy_inner(gc, copies))
                    .collect();
                *cell.borrow_mut() = copied;
                Self::List(cell)
            }
            Self::Dict(entries) => {
                let key = Rc::as_ptr(entries) as usize;
                if let Some(copy) = copies.get(&key) {
                    return copy.clone();
                }
                let cell = Rc::new(RefCell::new(IndexMap::new()));
                gc.track_dict(&cell);
                copies.insert(key, Self::Dict(Rc::clone(&cell)));
                let copied: IndexMap<String, Value> = entries
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.deep_copy_inner(gc, copies)))
                    .collect();
                *cell.borrow_mut() = copied;
                Self::Dict(cell)
            }
            Self::Struct(instance) => {
                let key = Rc::as_ptr(instance) as usize;
                if let Some(copy) = copies.get(&key) {
                    return copy.clone();
                }
                let def = Rc::clone(&instance.borrow().def);
                let cell = Rc::new(RefCell::new(StructValue {
                    def,
                    fields: Vec::new(),
                }));
                gc.track_struct(&cell);
                copies.insert(key, Self::Struct(Rc::clone(&cell)));
                let copied: Vec<Value> = instance
                    .borrow()
                    .fields
                    .iter()
                    .map(|v| v.deep_copy_inner(gc, copies))
                    .collect();
                cell.borrow_mut().fields = copied;
                Self::Struct(cell)
            }
            scalar => scalar.clone(),
        }
    }
}

/// Floats display with a trailing `.0` when they have no fractional part so
/// `4 / 2` prints as `2.0`, keeping float results visually distinct.
pub fn format_float(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Shallow on purpose: deriving Debug would recurse into cyclic
        // containers.
        match self {
            Self::Null => write!(f, "Null"),
            Self::Int(v) => write!(f, "Int({v})"),
            Self::Float(v) => write!(f, "Float({v})"),
            Self::Bool(v) => write!(f, "Bool({v})"),
            Self::Str(s) => write!(f, "Str({s:?})"),
            Self::List(items) => write!(f, "List(len={})", items.borrow().len()),
            Self::Dict(entries) => write!(f, "Dict(len={})", entries.borrow().len()),
            Self::Struct(instance) => write!(f, "Struct({})", instance.borrow().def.name),
            Self::Function(func) => write!(f, "Function({})", func.name),
            Self::Block(block) => write!(f, "Block({})", block.meta.language),
            Self::Foreign(obj) => write!(f, "Foreign({})", obj.repr),
            Self::Range(r) => write!(f, "Range({r:?})"),
            Self::EnumMember(m) => write!(f, "EnumMember({}.{})", m.enum_name, m.variant),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gc() -> GcState {
        GcState::new(usize::MAX)
    }

    #[test]
    fn falsity_is_exactly_the_five_values() {
        assert!(!Value::Null.to_bool());
        assert!(!Value::Int(0).to_bool());
        assert!(!Value::Float(0.0).to_bool());
        assert!(!Value::Bool(false).to_bool());
        assert!(!Value::Str(String::new()).to_bool());
        // Empty containers are truthy.
        assert!(Value::new_list(vec![], &mut gc()).to_bool());
        assert!(Value::new_dict(IndexMap::new(), &mut gc()).to_bool());
    }

    #[test]
    fn string_form_equality_equates_int_and_digit_string() {
        assert!(Value::Int(1).loosely_eq(&Value::Str("1".to_owned())));
        assert!(!Value::Int(1).loosely_eq(&Value::Float(1.0)));
    }

    #[test]
    fn repr_handles_cycles() {
        let mut gc = gc();
        let list = Value::new_list(vec![Value::Int(1)], &mut gc);
        if let Value::List(cell) = &list {
            cell.borrow_mut().push(list.clone());
        }
        assert_eq!(list.repr(), "[1, [...]]");
    }

    #[test]
    fn deep_copy_preserves_internal_aliasing() {
        let mut gc = gc();
        let shared = Value::new_list(vec![Value::Int(7)], &mut gc);
        let outer = Value::new_list(vec![shared.clone(), shared.clone()], &mut gc);
        let copy = outer.deep_copy(&mut gc);
        let Value::List(copy_cell) = &copy else {
            panic!("expected list");
        };
        let copied = copy_cell.borrow();
        let (Value::List(a), Value::List(b)) = (&copied[0], &copied[1]) else {
            panic!("expected lists");
        };
        // Aliased inside the copy but independent of the original.
        assert!(Rc::ptr_eq(a, b));
        if let Value::List(orig) = &shared {
            assert!(!Rc::ptr_eq(a, orig));
        }
    }

    #[test]
    fn deep_copy_of_cycle_terminates() {
        let mut gc = gc();
        let list = Value::new_list(vec![], &mut gc);
        if let Value::List(cell) = &list {
            cell.borrow_mut().push(list.clone());
        }
        let copy = list.deep_copy(&mut gc);
        assert_eq!(copy.repr(), "[[...]]");
    }

    #[test]
    fn traverse_visits_direct_children_only() {
        let mut gc = gc();
        let inner = Value::new_list(vec![Value::Int(1)], &mut gc);
        let outer = Value::new_list(vec![inner, Value::Str("x".into())], &mut gc);
        let mut seen = Vec::new();
        outer.traverse(&mut |v| seen.push(v.type_name()));
        assert_eq!(seen, vec!["list".to_owned(), "string".to_owned()]);
    }

    #[test]
    fn float_display() {
        assert_eq!(format_float(2.0), "2.0");
        assert_eq!(format_float(1.5), "1.5");
    }
}
