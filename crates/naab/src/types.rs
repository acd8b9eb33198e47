//! The static type model.
//!
//! `Type` is a small sum with two orthogonal flags: `nullable` (written `T?`)
//! and `reference` (legal on parameter positions only). Union members are
//! never themselves unions, `TypeParameter` only appears inside generic
//! definitions and is erased by monomorphization before evaluation, and
//! `Void` is never nullable.

use std::fmt;

use ahash::AHashMap;

use crate::{structs::StructRegistry, value::Value};

#[derive(Debug, Clone, PartialEq)]
pub enum TypeKind {
    Any,
    Void,
    Int,
    Float,
    Bool,
    Str,
    List(Box<Type>),
    Dict(Box<Type>, Box<Type>),
    Struct {
        name: String,
        type_args: Vec<Type>,
        module: Option<String>,
    },
    Enum(String),
    Function,
    Block,
    TypeParameter(String),
    Union(Vec<Type>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Type {
    pub kind: TypeKind,
    pub nullable: bool,
    pub reference: bool,
}

impl Type {
    pub fn new(kind: TypeKind) -> Self {
        Self {
            kind,
            nullable: false,
            reference: false,
        }
    }

    pub fn any() -> Self {
        Self::new(TypeKind::Any)
    }

    pub fn void() -> Self {
        Self::new(TypeKind::Void)
    }

    pub fn int() -> Self {
        Self::new(TypeKind::Int)
    }

    pub fn float() -> Self {
        Self::new(TypeKind::Float)
    }

    pub fn bool_() -> Self {
        Self::new(TypeKind::Bool)
    }

    pub fn string() -> Self {
        Self::new(TypeKind::Str)
    }

    pub fn list_of(element: Type) -> Self {
        Self::new(TypeKind::List(Box::new(element)))
    }

    pub fn dict_of(key: Type, value: Type) -> Self {
        Self::new(TypeKind::Dict(Box::new(key), Box::new(value)))
    }

    pub fn named_struct(name: impl Into<String>) -> Self {
        Self::new(TypeKind::Struct {
            name: name.into(),
            type_args: Vec::new(),
            module: None,
        })
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Builds a union from alternatives, flattening nested unions and
    /// deduplicating, so the "members are never unions" invariant holds by
    /// construction. A single distinct member collapses to itself.
    pub fn union_of(alternatives: Vec<Type>) -> Self {
        let mut members: Vec<Type> = Vec::new();
        let mut nullable = false;
        for alt in alternatives {
            nullable |= alt.nullable;
            match alt.kind {
                TypeKind::Union(inner) => {
                    for t in inner {
                        if !members.contains(&t) {
                            members.push(t);
                        }
                    }
                }
                _ => {
                    let flat = Type {
                        nullable: false,
                        reference: false,
                        ..alt
                    };
                    if !members.contains(&flat) {
                        members.push(flat);
                    }
                }
            }
        }
        if members.len() == 1 {
            return members.pop().expect("one member").with_nullable(nullable);
        }
        Self::new(TypeKind::Union(members)).with_nullable(nullable)
    }

    /// Infers the static type describing a runtime value, recursively for
    /// list elements and dict value types.
    pub fn of_value(value: &Value) -> Self {
        match value {
            Value::Null => Self::any().with_nullable(true),
            Value::Int(_) => Self::int(),
            Value::Float(_) => Self::float(),
            Value::Bool(_) => Self::bool_(),
            Value::Str(_) => Self::string(),
            Value::List(items) => {
                let items = items.borrow();
                Self::list_of(Self::unify_all(items.iter()))
            }
            Value::Dict(entries) => {
                let entries = entries.borrow();
                Self::dict_of(Self::string(), Self::unify_all(entries.values()))
            }
            Value::Struct(instance) => Self::named_struct(instance.borrow().def.name.clone()),
            Value::EnumMember(member) => Self::new(TypeKind::Enum(member.enum_name.clone())),
            Value::Function(_) => Self::new(TypeKind::Function),
            Value::Block(_) => Self::new(TypeKind::Block),
            Value::Foreign(_) | Value::Range(_) => Self::any(),
        }
    }

    fn unify_all<'v>(values: impl Iterator<Item = &'v Value>) -> Self {
        let mut result: Option<Type> = None;
        for value in values {
            let t = Self::of_value(value);
            match &result {
                None => result = Some(t),
                Some(current) if *current == t => {}
                Some(_) => return Self::any(),
            }
        }
        result.unwrap_or_else(Self::any)
    }

    /// Whether a runtime value satisfies this declared type.
    ///
    /// `Any` matches any value (and, when nullable, `null` too); `null` only
    /// matches nullable types; unions match when any alternative matches;
    /// struct types match the exact name or a monomorphized specialization
    /// mangled from it.
    pub fn matches_value(&self, value: &Value, structs: &StructRegistry) -> bool {
        if matches!(value, Value::Null) {
            return self.nullable;
        }
        match &self.kind {
            TypeKind::Any | TypeKind::TypeParameter(_) => true,
            TypeKind::Void => false,
            TypeKind::Int => matches!(value, Value::Int(_)),
            // An int is accepted where a float is declared; arithmetic
            // widening already treats it as one.
            TypeKind::Float => matches!(value, Value::Float(_) | Value::Int(_)),
            TypeKind::Bool => matches!(value, Value::Bool(_)),
            TypeKind::Str => matches!(value, Value::Str(_)),
            TypeKind::List(element) => match value {
                Value::List(items) => {
                    if matches!(element.kind, TypeKind::Any) {
                        return true;
                    }
                    items.borrow().iter().all(|v| element.matches_value(v, structs))
                }
                _ => false,
            },
            TypeKind::Dict(_, value_ty) => match value {
                Value::Dict(entries) => {
                    if matches!(value_ty.kind, TypeKind::Any) {
                        return true;
                    }
                    entries
                        .borrow()
                        .values()
                        .all(|v| value_ty.matches_value(v, structs))
                }
                _ => false,
            },
            TypeKind::Struct { name, type_args, .. } => match value {
                Value::Struct(instance) => {
                    let instance = instance.borrow();
                    let actual = &instance.def.name;
                    if actual == name {
                        return true;
                    }
                    if type_args.is_empty() {
                        // `Box` accepts any `Box_…` specialization.
                        actual.starts_with(&format!("{name}_"))
                    } else {
                        *actual == mangle_name(name, type_args)
                    }
                }
                _ => false,
            },
            TypeKind::Enum(name) => match value {
                Value::EnumMember(member) => member.enum_name == *name,
                _ => false,
            },
            TypeKind::Function => matches!(value, Value::Function(_)),
            TypeKind::Block => matches!(value, Value::Block(_)),
            TypeKind::Union(alternatives) => alternatives
                .iter()
                .any(|alt| alt.matches_value(value, structs)),
        }
    }

    /// True when a `TypeParameter` occurs anywhere in this type.
    pub fn has_type_parameter(&self) -> bool {
        match &self.kind {
            TypeKind::TypeParameter(_) => true,
            TypeKind::List(e) => e.has_type_parameter(),
            TypeKind::Dict(k, v) => k.has_type_parameter() || v.has_type_parameter(),
            TypeKind::Struct { type_args, .. } => {
                type_args.iter().any(Type::has_type_parameter)
            }
            TypeKind::Union(alts) => alts.iter().any(Type::has_type_parameter),
            _ => false,
        }
    }

    /// Applies a type-parameter substitution, erasing every `TypeParameter`
    /// that has a binding. Unbound parameters are left in place for the
    /// caller to default.
    pub fn substitute(&self, map: &AHashMap<String, Type>) -> Self {
        let kind = match &self.kind {
            TypeKind::TypeParameter(name) => match map.get(name) {
                Some(bound) => bound.kind.clone(),
                None => return self.clone(),
            },
            TypeKind::List(e) => TypeKind::List(Box::new(e.substitute(map))),
            TypeKind::Dict(k, v) => {
                TypeKind::Dict(Box::new(k.substitute(map)), Box::new(v.substitute(map)))
            }
            TypeKind::Struct {
                name,
                type_args,
                module,
            } => TypeKind::Struct {
                name: name.clone(),
                type_args: type_args.iter().map(|t| t.substitute(map)).collect(),
                module: module.clone(),
            },
            TypeKind::Union(alts) => {
                return Self::union_of(alts.iter().map(|t| t.substitute(map)).collect())
                    .with_nullable(self.nullable);
            }
            other => other.clone(),
        };
        Self {
            kind,
            nullable: self.nullable,
            reference: self.reference,
        }
    }

    /// Unifies a declared parameter type against the runtime type of an
    /// argument, recording bindings for any type parameters encountered.
    ///
    /// Conflicting constraints keep the first binding; the later call-site
    /// type check reports the mismatch with a proper message.
    pub fn unify_with(&self, actual: &Type, bindings: &mut AHashMap<String, Type>) {
        match (&self.kind, &actual.kind) {
            (TypeKind::TypeParameter(name), _) => {
                bindings
                    .entry(name.clone())
                    .or_insert_with(|| actual.clone().with_nullable(false));
            }
            (TypeKind::List(e), TypeKind::List(ae)) => e.unify_with(ae, bindings),
            (TypeKind::Dict(k, v), TypeKind::Dict(ak, av)) => {
                k.unify_with(ak, bindings);
                v.unify_with(av, bindings);
            }
            (
                TypeKind::Struct { type_args, .. },
                TypeKind::Struct {
                    type_args: actual_args,
                    ..
                },
            ) => {
                for (param, arg) in type_args.iter().zip(actual_args) {
                    param.unify_with(arg, bindings);
                }
            }
            _ => {}
        }
    }

    /// The suffix this type contributes to a monomorphized struct name.
    pub fn mangle_suffix(&self) -> String {
        match &self.kind {
            TypeKind::Any => "any".to_owned(),
            TypeKind::Void => "void".to_owned(),
            TypeKind::Int => "int".to_owned(),
            TypeKind::Float => "float".to_owned(),
            TypeKind::Bool => "bool".to_owned(),
            TypeKind::Str => "string".to_owned(),
            TypeKind::List(e) => format!("list_{}", e.mangle_suffix()),
            TypeKind::Dict(k, v) => {
                format!("dict_{}_{}", k.mangle_suffix(), v.mangle_suffix())
            }
            TypeKind::Struct { name, type_args, .. } => {
                if type_args.is_empty() {
                    name.clone()
                } else {
                    mangle_name(name, type_args)
                }
            }
            TypeKind::Enum(name) => name.clone(),
            TypeKind::Function => "function".to_owned(),
            TypeKind::Block => "block".to_owned(),
            TypeKind::TypeParameter(name) => name.clone(),
            TypeKind::Union(alts) => alts
                .iter()
                .map(Type::mangle_suffix)
                .collect::<Vec<_>>()
                .join("_or_"),
        }
    }
}

/// Deterministic name for a specialization of `base` at `type_args`, e.g.
/// `Box<int>` becomes `Box_int`.
pub fn mangle_name(base: &str, type_args: &[Type]) -> String {
    let mut name = base.to_owned();
    for arg in type_args {
        name.push('_');
        name.push_str(&arg.mangle_suffix());
    }
    name
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TypeKind::Any => write!(f, "any")?,
            TypeKind::Void => write!(f, "void")?,
            TypeKind::Int => write!(f, "int")?,
            TypeKind::Float => write!(f, "float")?,
            TypeKind::Bool => write!(f, "bool")?,
            TypeKind::Str => write!(f, "string")?,
            TypeKind::List(e) => write!(f, "list<{e}>")?,
            TypeKind::Dict(k, v) => write!(f, "dict<{k}, {v}>")?,
            TypeKind::Struct {
                name,
                type_args,
                module,
            } => {
                if let Some(module) = module {
                    write!(f, "{module}.")?;
                }
                write!(f, "{name}")?;
                if !type_args.is_empty() {
                    write!(f, "<")?;
                    for (i, arg) in type_args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{arg}")?;
                    }
                    write!(f, ">")?;
                }
            }
            TypeKind::Enum(name) => write!(f, "{name}")?,
            TypeKind::Function => write!(f, "function")?,
            TypeKind::Block => write!(f, "block")?,
            TypeKind::TypeParameter(name) => write!(f, "{name}")?,
            TypeKind::Union(alts) => {
                for (i, alt) in alts.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{alt}")?;
                }
            }
        }
        if self.nullable {
            write!(f, "?")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_flattens_and_dedupes() {
        let u = Type::union_of(vec![
            Type::int(),
            Type::union_of(vec![Type::string(), Type::int()]),
        ]);
        match &u.kind {
            TypeKind::Union(members) => {
                assert_eq!(members.len(), 2);
                assert!(members.iter().all(|m| !matches!(m.kind, TypeKind::Union(_))));
            }
            other => panic!("expected union, got {other:?}"),
        }
    }

    #[test]
    fn single_member_union_collapses() {
        let u = Type::union_of(vec![Type::int(), Type::int()]);
        assert_eq!(u.kind, TypeKind::Int);
    }

    #[test]
    fn mangling_is_deterministic() {
        assert_eq!(mangle_name("Box", &[Type::int()]), "Box_int");
        assert_eq!(
            mangle_name("Pair", &[Type::int(), Type::list_of(Type::string())]),
            "Pair_int_list_string"
        );
    }

    #[test]
    fn substitution_erases_bound_parameters() {
        let mut map = AHashMap::new();
        map.insert("T".to_owned(), Type::int());
        let t = Type::list_of(Type::new(TypeKind::TypeParameter("T".into())));
        assert_eq!(t.substitute(&map), Type::list_of(Type::int()));
        assert!(!t.substitute(&map).has_type_parameter());
    }

    #[test]
    fn display_forms() {
        assert_eq!(Type::int().with_nullable(true).to_string(), "int?");
        assert_eq!(
            Type::dict_of(Type::string(), Type::int()).to_string(),
            "dict<string, int>"
        );
        assert_eq!(
            Type::union_of(vec![Type::int(), Type::string()]).to_string(),
            "int | string"
        );
    }
}
