//! The abstract syntax tree.
//!
//! The AST is a closed sum type: [`ExprKind`], [`StmtKind`] and [`ItemKind`]
//! enumerate every syntactic form, and every compiler pass (name collection,
//! type checking, code generation, constant folding, pretty printing)
//! dispatches on them with a single `match`. There is no open inheritance
//! hierarchy — see the "Dynamic dispatch in the AST" design note.

use crate::directive::Directive;
use crate::source::SourceLocation;

/// A parsed (not yet resolved) type expression: either a named type
/// (possibly `pkg::Name`) or an array of one.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr {
    /// `Name` or `pkg::Name`, with `path` holding the namespace segments
    /// before the final component.
    Named {
        /// Namespace path segments preceding the type name, e.g. `["pkg"]`.
        path: Vec<String>,
        /// The final type name.
        name: String,
    },
    /// `[T]`.
    Array(Box<TypeExpr>),
}

impl TypeExpr {
    /// Construct a simple unqualified named type.
    pub fn simple(name: impl Into<String>) -> Self {
        TypeExpr::Named {
            path: Vec::new(),
            name: name.into(),
        }
    }
}

/// Binary operators, in the grammar's precedence-climbing order (low to high).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `||`
    LogOr,
    /// `&&`
    LogAnd,
    /// `|`
    BitOr,
    /// `^`
    BitXor,
    /// `&`
    BitAnd,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
}

impl BinaryOp {
    /// Whether this operator requires both operands to be `i32` and always
    /// produces `i32` (`% << >> & ^ | && ||`, per the type checker rules).
    pub fn requires_i32(&self) -> bool {
        matches!(
            self,
            BinaryOp::Mod
                | BinaryOp::Shl
                | BinaryOp::Shr
                | BinaryOp::BitAnd
                | BinaryOp::BitXor
                | BinaryOp::BitOr
                | BinaryOp::LogAnd
                | BinaryOp::LogOr
        )
    }

    /// Whether this operator is a comparison (accepts `i32`/`f32`, produces `i32`).
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::Gt
                | BinaryOp::Ge
        )
    }
}

/// Prefix unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `+`
    Plus,
    /// `-`
    Neg,
    /// `!`
    Not,
    /// `~`
    BitNot,
    /// `++` prefix
    PreInc,
    /// `--` prefix
    PreDec,
}

/// Postfix `++`/`--`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostfixOp {
    /// `++`
    Inc,
    /// `--`
    Dec,
}

/// Compound-assignment operators; `=` itself is represented as `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    /// `=`
    Assign,
    /// `+=`
    AddAssign,
    /// `-=`
    SubAssign,
    /// `*=`
    MulAssign,
    /// `/=`
    DivAssign,
    /// `%=`
    ModAssign,
    /// `&=`
    AndAssign,
    /// `|=`
    OrAssign,
    /// `<<=`
    ShlAssign,
    /// `>>=`
    ShrAssign,
}

/// A struct initializer's field list: either positional (anonymous) or
/// named. The two forms must not mix within one initializer.
#[derive(Debug, Clone, PartialEq)]
pub enum StructInitFields {
    /// `T { a, b }` — positional, in declared field order.
    Anonymous(Vec<Expr>),
    /// `T { name: expr, ... }` — named, any order, every field present.
    Named(Vec<(String, Expr)>),
}

/// A macro invocation's argument expressions.
#[derive(Debug, Clone, PartialEq)]
pub struct MacroInvocation {
    /// Namespace path preceding the macro name, if any.
    pub path: Vec<String>,
    /// The invoked macro's name (without the trailing `!`).
    pub name: String,
    /// Argument expressions as written at the call site.
    pub args: Vec<Expr>,
}

/// An expression AST node's syntactic form.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// An `i32` literal.
    IntLiteral(i32),
    /// An `f32` literal.
    FloatLiteral(f32),
    /// A `str` literal.
    StringLiteral(String),
    /// The `null` literal.
    NullLiteral,
    /// A bare identifier reference.
    Identifier(String),
    /// `pkg::name` resolved to a single qualified reference.
    Namespaced {
        /// Path segments before the final name.
        path: Vec<String>,
        /// The final referenced name.
        name: String,
    },
    /// A binary operator expression.
    Binary {
        /// The operator.
        op: BinaryOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
    /// A prefix unary operator expression.
    Unary {
        /// The operator.
        op: UnaryOp,
        /// The operand.
        operand: Box<Expr>,
    },
    /// A postfix `++`/`--` expression.
    Postfix {
        /// The operator.
        op: PostfixOp,
        /// The operand (must be an lvalue).
        operand: Box<Expr>,
    },
    /// An assignment, plain or compound.
    Assign {
        /// The assignment operator.
        op: AssignOp,
        /// The assignment target (must be an lvalue).
        target: Box<Expr>,
        /// The right-hand side.
        value: Box<Expr>,
    },
    /// A function call.
    Call {
        /// Namespace path preceding the function name, if any.
        path: Vec<String>,
        /// The called function's name.
        name: String,
        /// Argument expressions.
        args: Vec<Expr>,
    },
    /// `base[index]`.
    Index {
        /// The array expression.
        base: Box<Expr>,
        /// The index expression (must be `i32`).
        index: Box<Expr>,
    },
    /// `base.member`, also used for the `.length` array property.
    Member {
        /// The struct or array expression.
        base: Box<Expr>,
        /// The accessed member's name.
        member: String,
    },
    /// `expr as T`.
    Cast {
        /// The expression being cast.
        expr: Box<Expr>,
        /// The target type.
        type_expr: TypeExpr,
    },
    /// `new T[n]`.
    NewArray {
        /// The element type.
        type_expr: TypeExpr,
        /// The length expression (must be `i32`).
        size: Box<Expr>,
    },
    /// `T { ... }`, either form.
    StructInit {
        /// The struct type's name (path + final name).
        path: Vec<String>,
        /// The struct type's final name.
        name: String,
        /// The supplied fields.
        fields: StructInitFields,
    },
    /// A macro invocation, e.g. `my_macro!(1, 2)`.
    Macro(MacroInvocation),
    /// `[e1, e2, ...]`, an array initializer. Element type and length are
    /// inferred from the elements; an empty literal requires a declared
    /// array type at its use site to resolve its element type.
    ArrayLiteral(Vec<Expr>),
}

/// An expression node: its syntactic form plus location and directives.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    /// A parse-time-assigned id, used to key the constant-folding side table.
    pub node_id: u32,
    /// The expression's syntactic form.
    pub kind: ExprKind,
    /// Where the expression starts in source.
    pub location: SourceLocation,
    /// Directives attached directly to this expression.
    pub directives: Vec<Directive>,
}

impl Expr {
    /// The identifier this expression names, for named-expression forms
    /// (`Identifier`, `Namespaced`, `Call`). Returns `None` otherwise.
    pub fn identifier_name(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Identifier(name) => Some(name),
            ExprKind::Namespaced { name, .. } => Some(name),
            ExprKind::Call { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Whether this expression form can appear on the left of an assignment.
    pub fn is_lvalue(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Identifier(_)
                | ExprKind::Namespaced { .. }
                | ExprKind::Index { .. }
                | ExprKind::Member { .. }
        )
    }
}

/// A statement node's syntactic form.
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `let name: T = init;` (also used for global `let`s at item level).
    Let {
        /// The declared variable's name.
        name: String,
        /// The declared type, if given explicitly.
        type_expr: Option<TypeExpr>,
        /// The initializer expression.
        init: Expr,
    },
    /// `if (cond) then [else else_]`.
    If {
        /// The condition (must be `i32`).
        cond: Expr,
        /// The taken branch.
        then_branch: Block,
        /// The optional alternative branch.
        else_branch: Option<Block>,
    },
    /// `while (cond) body`.
    While {
        /// The loop condition (must be `i32`).
        cond: Expr,
        /// The loop body.
        body: Block,
    },
    /// `break;`
    Break,
    /// `continue;`
    Continue,
    /// `return [expr];`
    Return(Option<Expr>),
    /// An expression used as a statement, followed by `;`.
    Expr(Expr),
}

/// A statement node: its syntactic form plus location and directives.
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    /// A parse-time-assigned id.
    pub node_id: u32,
    /// The statement's syntactic form.
    pub kind: StmtKind,
    /// Where the statement starts in source.
    pub location: SourceLocation,
    /// Directives attached directly to this statement.
    pub directives: Vec<Directive>,
}

/// A `{ ... }` sequence of statements.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    /// The statements, in source order.
    pub stmts: Vec<Stmt>,
}

/// A function parameter: name plus declared type.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    /// The parameter's name.
    pub name: String,
    /// The parameter's declared type.
    pub type_expr: TypeExpr,
}

/// One `($name: kind [...]) => { body }` branch of a macro definition.
#[derive(Debug, Clone, PartialEq)]
pub struct MacroBranch {
    /// The branch's formal parameters.
    pub params: Vec<MacroParam>,
    /// The branch's replacement body (itself parsed as a block of statements
    /// so it can both declare names and yield a trailing expression value).
    pub body: Block,
}

/// A macro branch's formal parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct MacroParam {
    /// The parameter's name (referenced in the body as `$name`).
    pub name: String,
    /// Whether this is the trailing variadic parameter (`$name: expr ...`).
    pub variadic: bool,
}

/// A top-level item's syntactic form.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemKind {
    /// `import pkg::path;`
    Import {
        /// The dotted/`::`-separated module path.
        path: Vec<String>,
    },
    /// `const name: T = init;`
    Const {
        /// The constant's name.
        name: String,
        /// The declared type, if given explicitly.
        type_expr: Option<TypeExpr>,
        /// The initializer (must be compile-time evaluable).
        init: Expr,
    },
    /// A global `let name: T = init;`.
    Global {
        /// The variable's name.
        name: String,
        /// The declared type, if given explicitly.
        type_expr: Option<TypeExpr>,
        /// The initializer expression.
        init: Expr,
    },
    /// `struct Name { field: T, ... }`
    Struct {
        /// The struct's name.
        name: String,
        /// Its fields, in declaration order.
        fields: Vec<Param>,
    },
    /// `fn name(args) -> T { body }` or, with a `native(lib=...)` directive,
    /// a prototype with no body.
    Function {
        /// The function's name.
        name: String,
        /// Its parameters.
        args: Vec<Param>,
        /// Its declared return type.
        return_type: TypeExpr,
        /// The function body, or `None` for a native binding.
        body: Option<Block>,
    },
    /// `macro name! { (args) => { body }; ... }`
    Macro {
        /// The macro's name (without the trailing `!`).
        name: String,
        /// Its branches, tried in declaration order.
        branches: Vec<MacroBranch>,
    },
}

/// A top-level item: its syntactic form plus location and directives.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    /// A parse-time-assigned id.
    pub node_id: u32,
    /// The item's syntactic form.
    pub kind: ItemKind,
    /// Where the item starts in source.
    pub location: SourceLocation,
    /// Directives attached directly to this item.
    pub directives: Vec<Directive>,
}

/// A fully parsed source file: an ordered list of top-level items.
#[derive(Debug, Clone, Default)]
pub struct Module {
    /// The module's top-level items, in source order.
    pub items: Vec<Item>,
}
