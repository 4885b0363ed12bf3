//! The type system and the type-checker's scope tree.
//!
//! [`Type`] is the type checker's view of a Slang type: a built-in scalar,
//! an array, a named struct, or a function signature. [`TypeContext`] mirrors
//! the source's lexical namespaces as a scope tree addressed by index, per
//! the "cyclic ownership" design note: scopes point to their parent by index
//! rather than by owning pointer, so the tree has no reference cycles.

use std::collections::HashMap;
use std::fmt;

/// A function's type: its return type plus its ordered argument types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionSignature {
    /// The function's return type.
    pub return_type: Box<Type>,
    /// The function's argument types, in declaration order.
    pub arg_types: Vec<Type>,
}

impl FunctionSignature {
    /// Build a signature from a return type and argument types.
    pub fn new(return_type: Type, arg_types: Vec<Type>) -> Self {
        FunctionSignature {
            return_type: Box::new(return_type),
            arg_types,
        }
    }
}

/// A resolved or pending Slang type.
///
/// Scalars are `void`, `i32`, `f32`, `str` and `@null`. `@null` is special:
/// it is compatible with any reference type for assignment but is not itself
/// a first-class value type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// `void`, the only valid return type for procedures.
    Void,
    /// 32-bit signed integer.
    I32,
    /// 32-bit IEEE-754 float.
    F32,
    /// Reference-counted UTF-8 string.
    Str,
    /// The type of the `null` literal; assignable to any reference type.
    Null,
    /// `[T]`, an array of `T`.
    Array(Box<Type>),
    /// A struct, named by its fully qualified name (`pkg::Name` or `Name`).
    Struct(String),
    /// A function type (used for prototypes, not as a first-class value type).
    Function(Box<FunctionSignature>),
    /// A name that has not yet been resolved to a concrete type.
    Unresolved(String),
}

impl Type {
    /// Whether this type denotes a heap reference (string, array, struct) as
    /// opposed to a scalar value type (`i32`/`f32`/`void`).
    pub fn is_reference(&self) -> bool {
        matches!(self, Type::Str | Type::Array(_) | Type::Struct(_))
    }

    /// Whether `other` can be assigned to a variable of this type.
    /// `@null` is compatible with any reference type.
    pub fn assignable_from(&self, other: &Type) -> bool {
        if self == other {
            return true;
        }
        if *other == Type::Null && self.is_reference() {
            return true;
        }
        false
    }

    /// Whether this type is fully resolved (no dangling name references).
    pub fn is_resolved(&self) -> bool {
        match self {
            Type::Unresolved(_) => false,
            Type::Array(inner) => inner.is_resolved(),
            Type::Function(sig) => {
                sig.return_type.is_resolved() && sig.arg_types.iter().all(Type::is_resolved)
            }
            _ => true,
        }
    }

    /// Element type of an array, if this is one.
    pub fn element_type(&self) -> Option<&Type> {
        match self {
            Type::Array(t) => Some(t),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::I32 => write!(f, "i32"),
            Type::F32 => write!(f, "f32"),
            Type::Str => write!(f, "str"),
            Type::Null => write!(f, "@null"),
            Type::Array(t) => write!(f, "[{t}]"),
            Type::Struct(name) => write!(f, "{name}"),
            Type::Function(sig) => {
                write!(f, "fn(")?;
                for (i, a) in sig.arg_types.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ") -> {}", sig.return_type)
            }
            Type::Unresolved(name) => write!(f, "<unresolved {name}>"),
        }
    }
}

/// Interns resolved types and hands out stable integer ids, per the data
/// model's "once resolved, a unique integer id".
#[derive(Debug, Default)]
pub struct TypeInterner {
    types: Vec<Type>,
    ids: HashMap<Type, u32>,
}

impl TypeInterner {
    /// Create an empty interner.
    pub fn new() -> Self {
        TypeInterner::default()
    }

    /// Intern `ty`, returning its (new or existing) id. Panics if `ty` is
    /// not fully resolved — only resolved types get ids.
    pub fn intern(&mut self, ty: Type) -> u32 {
        assert!(ty.is_resolved(), "cannot intern an unresolved type");
        if let Some(id) = self.ids.get(&ty) {
            return *id;
        }
        let id = self.types.len() as u32;
        self.ids.insert(ty.clone(), id);
        self.types.push(ty);
        id
    }

    /// Look up a previously interned type by id.
    pub fn get(&self, id: u32) -> Option<&Type> {
        self.types.get(id as usize)
    }
}

/// One level of the type checker's scope tree.
#[derive(Debug, Default)]
pub struct Scope {
    /// Index of the parent scope, or `None` for the root.
    pub parent: Option<usize>,
    /// Variables declared directly in this scope.
    pub variables: HashMap<String, Type>,
    /// Function signatures declared directly in this scope.
    pub functions: HashMap<String, FunctionSignature>,
    /// Struct definitions declared directly in this scope (field name -> type).
    pub structs: HashMap<String, Vec<(String, Type)>>,
    /// Constants declared directly in this scope.
    pub constants: HashMap<String, Type>,
    /// Indices of child scopes.
    pub children: Vec<usize>,
}

/// Scope tree mirroring source namespaces, used by the type checker and by
/// name collection. Scopes are addressed by index into `scopes`, never by
/// owning pointer, so the tree is trivially movable and has no cycles.
#[derive(Debug)]
pub struct TypeContext {
    /// Arena of all scopes; index 0 is the global scope.
    pub scopes: Vec<Scope>,
    /// Index of the scope currently being checked.
    pub current: usize,
    /// Index of the function scope currently being checked, if any
    /// (used to validate `return` and to type-check its body).
    pub current_function: Option<usize>,
    /// Names of modules imported by the current compile.
    pub imports: Vec<String>,
    /// Counter used to name anonymous (block) scopes uniquely.
    pub anonymous_counter: u32,
    /// Stack of namespace components used to resolve `a::b::c` chains.
    pub resolution_scope: Vec<String>,
    /// Stack used while type-checking nested `x.y.z` member accesses.
    pub struct_access_stack: Vec<Type>,
    /// Interner handing out stable ids for resolved types.
    pub interner: TypeInterner,
}

impl TypeContext {
    /// Create a context with a single, empty global scope.
    pub fn new() -> Self {
        TypeContext {
            scopes: vec![Scope::default()],
            current: 0,
            current_function: None,
            imports: Vec::new(),
            anonymous_counter: 0,
            resolution_scope: Vec::new(),
            struct_access_stack: Vec::new(),
            interner: TypeInterner::new(),
        }
    }

    /// Push a new anonymous child scope under the current scope and make it
    /// current. Returns the new scope's index.
    pub fn push_scope(&mut self) -> usize {
        let parent = self.current;
        let idx = self.scopes.len();
        self.scopes.push(Scope {
            parent: Some(parent),
            ..Scope::default()
        });
        self.scopes[parent].children.push(idx);
        self.anonymous_counter += 1;
        self.current = idx;
        idx
    }

    /// Pop back to the current scope's parent.
    pub fn pop_scope(&mut self) {
        if let Some(parent) = self.scopes[self.current].parent {
            self.current = parent;
        }
    }

    /// Walk the parent chain from `start` looking up a variable's type.
    pub fn lookup_variable(&self, start: usize, name: &str) -> Option<&Type> {
        let mut idx = Some(start);
        while let Some(i) = idx {
            if let Some(t) = self.scopes[i].variables.get(name) {
                return Some(t);
            }
            if let Some(t) = self.scopes[i].constants.get(name) {
                return Some(t);
            }
            idx = self.scopes[i].parent;
        }
        None
    }

    /// Walk the parent chain from `start` looking up a function signature.
    pub fn lookup_function(&self, start: usize, name: &str) -> Option<&FunctionSignature> {
        let mut idx = Some(start);
        while let Some(i) = idx {
            if let Some(f) = self.scopes[i].functions.get(name) {
                return Some(f);
            }
            idx = self.scopes[i].parent;
        }
        None
    }

    /// Walk the parent chain from `start` looking up a struct's field list.
    pub fn lookup_struct(&self, start: usize, name: &str) -> Option<&Vec<(String, Type)>> {
        let mut idx = Some(start);
        while let Some(i) = idx {
            if let Some(s) = self.scopes[i].structs.get(name) {
                return Some(s);
            }
            idx = self.scopes[i].parent;
        }
        None
    }

    /// Declare a variable in the current scope. Returns `false` if the name
    /// is already declared directly in this scope (a duplicate definition).
    pub fn declare_variable(&mut self, name: &str, ty: Type) -> bool {
        let scope = &mut self.scopes[self.current];
        if scope.variables.contains_key(name) {
            return false;
        }
        scope.variables.insert(name.to_string(), ty);
        true
    }
}

impl Default for TypeContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_assignable_to_reference_not_value() {
        assert!(Type::Array(Box::new(Type::I32)).assignable_from(&Type::Null));
        assert!(!Type::I32.assignable_from(&Type::Null));
    }

    #[test]
    fn scope_lookup_walks_parents() {
        let mut ctx = TypeContext::new();
        ctx.declare_variable("x", Type::I32);
        ctx.push_scope();
        ctx.declare_variable("y", Type::F32);
        assert_eq!(ctx.lookup_variable(ctx.current, "x"), Some(&Type::I32));
        assert_eq!(ctx.lookup_variable(ctx.current, "y"), Some(&Type::F32));
        ctx.pop_scope();
        assert_eq!(ctx.lookup_variable(ctx.current, "y"), None);
    }

    #[test]
    fn interner_is_stable() {
        let mut interner = TypeInterner::new();
        let a = interner.intern(Type::I32);
        let b = interner.intern(Type::I32);
        assert_eq!(a, b);
        let c = interner.intern(Type::F32);
        assert_ne!(a, c);
    }
}
