//! The type checker: two passes over the (import-resolved, macro-expanded)
//! AST — name collection, then type-checking proper — each dispatching
//! exhaustively on [`crate::ast::ItemKind`]/[`crate::ast::StmtKind`]/
//! [`crate::ast::ExprKind`].

use crate::ast::*;
use crate::error::{Error, Result};
use crate::resolver::{ResolvedImport, ResolvedModule};
use crate::source::SourceLocation;
use crate::types::{FunctionSignature, Type, TypeContext};
use std::collections::HashMap;

/// The type-checked module: the AST plus every expression's resolved type,
/// ready for codegen.
pub struct CheckedModule {
    pub module: Module,
    pub ctx: TypeContext,
    /// Every expression node's resolved type, keyed by its parse-time id.
    pub node_types: HashMap<u32, Type>,
    /// The per-`import` symbol tables, preserved so codegen can tell which
    /// module path a foreign call/identifier came from. Name resolution
    /// above flattens these into `ctx.scopes[0]`, which is enough for type
    /// checking but loses that association.
    pub imports: Vec<ResolvedImport>,
}

/// Run both passes and return a fully checked module, or the first error
/// encountered.
pub fn check(resolved: ResolvedModule) -> Result<CheckedModule> {
    let imports = resolved.imports.clone();
    let mut ctx = TypeContext::new();
    for import in &resolved.imports {
        for (name, sig) in &import.functions {
            ctx.scopes[0].functions.insert(name.clone(), sig.clone());
        }
        for (name, fields) in &import.structs {
            ctx.scopes[0].structs.insert(name.clone(), fields.clone());
        }
        for (name, ty) in &import.constants {
            ctx.scopes[0].constants.insert(name.clone(), ty.clone());
        }
    }

    collect_structs(&mut ctx, &resolved.module)?;
    collect_functions(&mut ctx, &resolved.module)?;
    collect_globals(&mut ctx, &resolved.module)?;

    let mut node_types = HashMap::new();
    for item in &resolved.module.items {
        check_item(&mut ctx, &mut node_types, item)?;
    }

    Ok(CheckedModule {
        module: resolved.module,
        ctx,
        node_types,
        imports,
    })
}

fn resolve_type_expr(ctx: &TypeContext, te: &TypeExpr, location: SourceLocation) -> Result<Type> {
    match te {
        TypeExpr::Array(inner) => Ok(Type::Array(Box::new(resolve_type_expr(
            ctx, inner, location,
        )?))),
        TypeExpr::Named { path, name } => {
            if path.is_empty() {
                match name.as_str() {
                    "void" => return Ok(Type::Void),
                    "i32" => return Ok(Type::I32),
                    "f32" => return Ok(Type::F32),
                    "str" => return Ok(Type::Str),
                    _ => {}
                }
            }
            let qualified = qualify(path, name);
            if ctx.scopes[0].structs.contains_key(&qualified) {
                return Ok(Type::Struct(qualified));
            }
            if path.is_empty() && ctx.scopes[0].structs.contains_key(name) {
                return Ok(Type::Struct(name.clone()));
            }
            Err(Error::UnresolvedType {
                location,
                name: qualified,
            })
        }
    }
}

fn qualify(path: &[String], name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}::{}", path.join("::"), name)
    }
}

fn collect_structs(ctx: &mut TypeContext, module: &Module) -> Result<()> {
    for item in &module.items {
        if let ItemKind::Struct { name, fields } = &item.kind {
            if ctx.scopes[0].structs.contains_key(name) {
                return Err(Error::DuplicateDefinition {
                    location: item.location,
                    name: name.clone(),
                });
            }
            // Field types may reference structs declared later, so register
            // an empty placeholder now and fill it in once every struct name
            // is known.
            ctx.scopes[0].structs.insert(name.clone(), Vec::new());
            let _ = fields;
        }
    }
    for item in &module.items {
        if let ItemKind::Struct { name, fields } = &item.kind {
            let mut resolved_fields = Vec::with_capacity(fields.len());
            for f in fields {
                let ty = resolve_type_expr(ctx, &f.type_expr, item.location)?;
                resolved_fields.push((f.name.clone(), ty));
            }
            ctx.scopes[0].structs.insert(name.clone(), resolved_fields);
        }
    }
    Ok(())
}

fn collect_functions(ctx: &mut TypeContext, module: &Module) -> Result<()> {
    for item in &module.items {
        if let ItemKind::Function {
            name,
            args,
            return_type,
            ..
        } = &item.kind
        {
            if ctx.scopes[0].functions.contains_key(name) {
                return Err(Error::DuplicateDefinition {
                    location: item.location,
                    name: name.clone(),
                });
            }
            let ret = resolve_type_expr(ctx, return_type, item.location)?;
            let mut arg_types = Vec::with_capacity(args.len());
            for a in args {
                arg_types.push(resolve_type_expr(ctx, &a.type_expr, item.location)?);
            }
            ctx.scopes[0]
                .functions
                .insert(name.clone(), FunctionSignature::new(ret, arg_types));
        }
    }
    Ok(())
}

fn collect_globals(ctx: &mut TypeContext, module: &Module) -> Result<()> {
    for item in &module.items {
        match &item.kind {
            ItemKind::Const {
                name, type_expr, ..
            }
            | ItemKind::Global {
                name, type_expr, ..
            } => {
                if ctx.scopes[0].constants.contains_key(name)
                    || ctx.scopes[0].variables.contains_key(name)
                {
                    return Err(Error::DuplicateDefinition {
                        location: item.location,
                        name: name.clone(),
                    });
                }
                let ty = match type_expr {
                    Some(te) => resolve_type_expr(ctx, te, item.location)?,
                    None => Type::Unresolved(name.clone()),
                };
                ctx.scopes[0].constants.insert(name.clone(), ty);
            }
            _ => {}
        }
    }
    Ok(())
}

fn check_item(
    ctx: &mut TypeContext,
    node_types: &mut HashMap<u32, Type>,
    item: &Item,
) -> Result<()> {
    match &item.kind {
        ItemKind::Import { .. } => Ok(()),
        ItemKind::Const {
            name,
            type_expr,
            init,
        }
        | ItemKind::Global {
            name,
            type_expr,
            init,
        } => {
            let declared = match type_expr {
                Some(te) => Some(resolve_type_expr(ctx, te, item.location)?),
                None => None,
            };
            let actual = check_expr(ctx, node_types, init)?;
            let final_ty = match declared {
                Some(d) => {
                    if !d.assignable_from(&actual) {
                        return Err(Error::TypeMismatch {
                            location: item.location,
                            expected: d.to_string(),
                            found: actual.to_string(),
                        });
                    }
                    d
                }
                None => actual,
            };
            ctx.scopes[0].constants.insert(name.clone(), final_ty);
            Ok(())
        }
        ItemKind::Struct { .. } => Ok(()),
        ItemKind::Function {
            args,
            return_type,
            body,
            ..
        } => {
            let ret = resolve_type_expr(ctx, return_type, item.location)?;
            let Some(body) = body else { return Ok(()) };
            ctx.push_scope();
            for a in args {
                let ty = resolve_type_expr(ctx, &a.type_expr, item.location)?;
                ctx.declare_variable(&a.name, ty);
            }
            let prev_fn = ctx.current_function.replace(ctx.current);
            check_block(ctx, node_types, body, &ret, false)?;
            ctx.current_function = prev_fn;
            ctx.pop_scope();
            Ok(())
        }
        ItemKind::Macro { .. } => Ok(()),
    }
}

fn check_block(
    ctx: &mut TypeContext,
    node_types: &mut HashMap<u32, Type>,
    block: &Block,
    return_type: &Type,
    in_loop: bool,
) -> Result<()> {
    ctx.push_scope();
    for stmt in &block.stmts {
        check_stmt(ctx, node_types, stmt, return_type, in_loop)?;
    }
    ctx.pop_scope();
    Ok(())
}

fn check_stmt(
    ctx: &mut TypeContext,
    node_types: &mut HashMap<u32, Type>,
    stmt: &Stmt,
    return_type: &Type,
    in_loop: bool,
) -> Result<()> {
    match &stmt.kind {
        StmtKind::Let {
            name,
            type_expr,
            init,
        } => {
            let declared = match type_expr {
                Some(te) => Some(resolve_type_expr(ctx, te, stmt.location)?),
                None => None,
            };
            let actual = check_expr(ctx, node_types, init)?;
            let final_ty = match declared {
                Some(d) => {
                    if !d.assignable_from(&actual) {
                        return Err(Error::TypeMismatch {
                            location: stmt.location,
                            expected: d.to_string(),
                            found: actual.to_string(),
                        });
                    }
                    d
                }
                None => actual,
            };
            if !ctx.declare_variable(name, final_ty) {
                return Err(Error::DuplicateDefinition {
                    location: stmt.location,
                    name: name.clone(),
                });
            }
            Ok(())
        }
        StmtKind::If {
            cond,
            then_branch,
            else_branch,
        } => {
            let cond_ty = check_expr(ctx, node_types, cond)?;
            if cond_ty != Type::I32 {
                return Err(Error::TypeMismatch {
                    location: stmt.location,
                    expected: "i32".to_string(),
                    found: cond_ty.to_string(),
                });
            }
            check_block(ctx, node_types, then_branch, return_type, in_loop)?;
            if let Some(else_branch) = else_branch {
                check_block(ctx, node_types, else_branch, return_type, in_loop)?;
            }
            Ok(())
        }
        StmtKind::While { cond, body } => {
            let cond_ty = check_expr(ctx, node_types, cond)?;
            if cond_ty != Type::I32 {
                return Err(Error::TypeMismatch {
                    location: stmt.location,
                    expected: "i32".to_string(),
                    found: cond_ty.to_string(),
                });
            }
            check_block(ctx, node_types, body, return_type, true)?;
            Ok(())
        }
        StmtKind::Break => {
            if !in_loop {
                return Err(Error::LoopControlOutsideLoop {
                    location: stmt.location,
                    keyword: "break".to_string(),
                });
            }
            Ok(())
        }
        StmtKind::Continue => {
            if !in_loop {
                return Err(Error::LoopControlOutsideLoop {
                    location: stmt.location,
                    keyword: "continue".to_string(),
                });
            }
            Ok(())
        }
        StmtKind::Return(value) => {
            if ctx.current_function.is_none() {
                return Err(Error::ReturnOutsideFunction {
                    location: stmt.location,
                });
            }
            match value {
                Some(expr) => {
                    let ty = check_expr(ctx, node_types, expr)?;
                    if !return_type.assignable_from(&ty) {
                        return Err(Error::TypeMismatch {
                            location: stmt.location,
                            expected: return_type.to_string(),
                            found: ty.to_string(),
                        });
                    }
                }
                None => {
                    if *return_type != Type::Void {
                        return Err(Error::TypeMismatch {
                            location: stmt.location,
                            expected: return_type.to_string(),
                            found: "void".to_string(),
                        });
                    }
                }
            }
            Ok(())
        }
        StmtKind::Expr(expr) => {
            check_expr(ctx, node_types, expr)?;
            Ok(())
        }
    }
}

fn check_expr(ctx: &mut TypeContext, node_types: &mut HashMap<u32, Type>, expr: &Expr) -> Result<Type> {
    let ty = check_expr_kind(ctx, node_types, expr)?;
    node_types.insert(expr.node_id, ty.clone());
    Ok(ty)
}

fn check_expr_kind(
    ctx: &mut TypeContext,
    node_types: &mut HashMap<u32, Type>,
    expr: &Expr,
) -> Result<Type> {
    match &expr.kind {
        ExprKind::IntLiteral(_) => Ok(Type::I32),
        ExprKind::FloatLiteral(_) => Ok(Type::F32),
        ExprKind::StringLiteral(_) => Ok(Type::Str),
        ExprKind::NullLiteral => Ok(Type::Null),
        ExprKind::Identifier(name) => ctx
            .lookup_variable(ctx.current, name)
            .cloned()
            .ok_or_else(|| Error::UnknownName {
                location: expr.location,
                name: name.clone(),
            }),
        ExprKind::Namespaced { path, name } => {
            let qualified = qualify(path, name);
            ctx.lookup_variable(ctx.current, &qualified)
                .or_else(|| ctx.lookup_variable(ctx.current, name))
                .cloned()
                .ok_or_else(|| Error::UnknownName {
                    location: expr.location,
                    name: qualified,
                })
        }
        ExprKind::Binary { op, lhs, rhs } => {
            let lt = check_expr(ctx, node_types, lhs)?;
            let rt = check_expr(ctx, node_types, rhs)?;
            check_binary(*op, &lt, &rt, expr.location)
        }
        ExprKind::Unary { op, operand } => {
            let ty = check_expr(ctx, node_types, operand)?;
            check_unary(*op, &ty, expr.location)
        }
        ExprKind::Postfix { operand, .. } => {
            let ty = check_expr(ctx, node_types, operand)?;
            if ty != Type::I32 && ty != Type::F32 {
                return Err(Error::TypeMismatch {
                    location: expr.location,
                    expected: "i32 or f32".to_string(),
                    found: ty.to_string(),
                });
            }
            Ok(ty)
        }
        ExprKind::Assign { target, value, .. } => {
            if !target.is_lvalue() {
                return Err(Error::TypeMismatch {
                    location: expr.location,
                    expected: "lvalue".to_string(),
                    found: "expression".to_string(),
                });
            }
            let target_ty = check_expr(ctx, node_types, target)?;
            let value_ty = check_expr(ctx, node_types, value)?;
            if !target_ty.assignable_from(&value_ty) {
                return Err(Error::TypeMismatch {
                    location: expr.location,
                    expected: target_ty.to_string(),
                    found: value_ty.to_string(),
                });
            }
            Ok(target_ty)
        }
        ExprKind::Call { path, name, args } => {
            let qualified = qualify(path, name);
            let sig = ctx
                .lookup_function(ctx.current, &qualified)
                .or_else(|| ctx.lookup_function(ctx.current, name))
                .cloned()
                .ok_or_else(|| Error::UnknownName {
                    location: expr.location,
                    name: qualified.clone(),
                })?;
            if sig.arg_types.len() != args.len() {
                return Err(Error::WrongArgumentCount {
                    location: expr.location,
                    name: qualified,
                    expected: sig.arg_types.len(),
                    found: args.len(),
                });
            }
            for (arg, expected) in args.iter().zip(sig.arg_types.iter()) {
                let actual = check_expr(ctx, node_types, arg)?;
                if !expected.assignable_from(&actual) {
                    return Err(Error::TypeMismatch {
                        location: arg.location,
                        expected: expected.to_string(),
                        found: actual.to_string(),
                    });
                }
            }
            Ok(*sig.return_type)
        }
        ExprKind::Index { base, index } => {
            let base_ty = check_expr(ctx, node_types, base)?;
            let index_ty = check_expr(ctx, node_types, index)?;
            if index_ty != Type::I32 {
                return Err(Error::TypeMismatch {
                    location: expr.location,
                    expected: "i32".to_string(),
                    found: index_ty.to_string(),
                });
            }
            base_ty
                .element_type()
                .cloned()
                .ok_or_else(|| Error::TypeMismatch {
                    location: expr.location,
                    expected: "array".to_string(),
                    found: base_ty.to_string(),
                })
        }
        ExprKind::Member { base, member } => {
            let base_ty = check_expr(ctx, node_types, base)?;
            if member == "length" && (base_ty.element_type().is_some() || base_ty == Type::Str) {
                return Ok(Type::I32);
            }
            let Type::Struct(name) = &base_ty else {
                return Err(Error::TypeMismatch {
                    location: expr.location,
                    expected: "struct".to_string(),
                    found: base_ty.to_string(),
                });
            };
            let fields = ctx
                .lookup_struct(ctx.current, name)
                .ok_or_else(|| Error::UnknownName {
                    location: expr.location,
                    name: name.clone(),
                })?;
            fields
                .iter()
                .find(|(f, _)| f == member)
                .map(|(_, t)| t.clone())
                .ok_or_else(|| Error::UnknownName {
                    location: expr.location,
                    name: member.clone(),
                })
        }
        ExprKind::Cast { expr: inner, type_expr } => {
            let from = check_expr(ctx, node_types, inner)?;
            let to = resolve_type_expr(ctx, type_expr, expr.location)?;
            let ok = matches!(
                (&from, &to),
                (Type::I32, Type::F32) | (Type::F32, Type::I32)
            ) || from == to
                || (to.is_reference() && matches!(from, Type::Struct(_)));
            if !ok {
                return Err(Error::InvalidCast {
                    location: expr.location,
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
            Ok(to)
        }
        ExprKind::NewArray { type_expr, size } => {
            let size_ty = check_expr(ctx, node_types, size)?;
            if size_ty != Type::I32 {
                return Err(Error::TypeMismatch {
                    location: expr.location,
                    expected: "i32".to_string(),
                    found: size_ty.to_string(),
                });
            }
            let elem = resolve_type_expr(ctx, type_expr, expr.location)?;
            if elem == Type::Void {
                return Err(Error::UnresolvedType {
                    location: expr.location,
                    name: "void".to_string(),
                });
            }
            Ok(Type::Array(Box::new(elem)))
        }
        ExprKind::ArrayLiteral(elements) => {
            if elements.is_empty() {
                return Ok(Type::Array(Box::new(Type::Unresolved(String::new()))));
            }
            let mut elem_ty = check_expr(ctx, node_types, &elements[0])?;
            for e in &elements[1..] {
                let t = check_expr(ctx, node_types, e)?;
                if t != elem_ty {
                    if elem_ty.assignable_from(&t) {
                        // keep elem_ty
                    } else if t.assignable_from(&elem_ty) {
                        elem_ty = t;
                    } else {
                        return Err(Error::TypeMismatch {
                            location: e.location,
                            expected: elem_ty.to_string(),
                            found: t.to_string(),
                        });
                    }
                }
            }
            Ok(Type::Array(Box::new(elem_ty)))
        }
        ExprKind::StructInit { path, name, fields } => {
            let qualified = qualify(path, name);
            let struct_name = if ctx.lookup_struct(ctx.current, &qualified).is_some() {
                qualified
            } else {
                name.clone()
            };
            let declared = ctx
                .lookup_struct(ctx.current, &struct_name)
                .cloned()
                .ok_or_else(|| Error::UnknownName {
                    location: expr.location,
                    name: struct_name.clone(),
                })?;
            match fields {
                StructInitFields::Anonymous(values) => {
                    if values.len() != declared.len() {
                        return Err(Error::WrongArgumentCount {
                            location: expr.location,
                            name: struct_name.clone(),
                            expected: declared.len(),
                            found: values.len(),
                        });
                    }
                    for (value, (_, field_ty)) in values.iter().zip(declared.iter()) {
                        let actual = check_expr(ctx, node_types, value)?;
                        if !field_ty.assignable_from(&actual) {
                            return Err(Error::TypeMismatch {
                                location: value.location,
                                expected: field_ty.to_string(),
                                found: actual.to_string(),
                            });
                        }
                    }
                }
                StructInitFields::Named(named) => {
                    if named.len() != declared.len() {
                        return Err(Error::WrongArgumentCount {
                            location: expr.location,
                            name: struct_name.clone(),
                            expected: declared.len(),
                            found: named.len(),
                        });
                    }
                    for (field_name, value) in named {
                        let field_ty = declared
                            .iter()
                            .find(|(f, _)| f == field_name)
                            .map(|(_, t)| t.clone())
                            .ok_or_else(|| Error::UnknownName {
                                location: value.location,
                                name: field_name.clone(),
                            })?;
                        let actual = check_expr(ctx, node_types, value)?;
                        if !field_ty.assignable_from(&actual) {
                            return Err(Error::TypeMismatch {
                                location: value.location,
                                expected: field_ty.to_string(),
                                found: actual.to_string(),
                            });
                        }
                    }
                }
            }
            Ok(Type::Struct(struct_name))
        }
        ExprKind::Macro(_) => Err(Error::fault(
            "macro invocation survived to type-checking (expansion pass was skipped)",
        )),
    }
}

fn check_binary(op: BinaryOp, lhs: &Type, rhs: &Type, location: SourceLocation) -> Result<Type> {
    if op.requires_i32() {
        if *lhs != Type::I32 || *rhs != Type::I32 {
            return Err(Error::TypeMismatch {
                location,
                expected: "i32".to_string(),
                found: format!("{lhs}, {rhs}"),
            });
        }
        return Ok(Type::I32);
    }
    if op.is_comparison() {
        if lhs != rhs || !matches!(lhs, Type::I32 | Type::F32) {
            return Err(Error::TypeMismatch {
                location,
                expected: "matching i32 or f32".to_string(),
                found: format!("{lhs}, {rhs}"),
            });
        }
        return Ok(Type::I32);
    }
    // arithmetic: +, -, *, /
    if lhs == rhs && matches!(lhs, Type::I32 | Type::F32) {
        return Ok(lhs.clone());
    }
    if op == BinaryOp::Add && *lhs == Type::Str && *rhs == Type::Str {
        return Ok(Type::Str);
    }
    Err(Error::TypeMismatch {
        location,
        expected: "matching numeric types".to_string(),
        found: format!("{lhs}, {rhs}"),
    })
}

fn check_unary(op: UnaryOp, ty: &Type, location: SourceLocation) -> Result<Type> {
    match op {
        UnaryOp::Not | UnaryOp::BitNot => {
            if *ty != Type::I32 {
                return Err(Error::TypeMismatch {
                    location,
                    expected: "i32".to_string(),
                    found: ty.to_string(),
                });
            }
            Ok(Type::I32)
        }
        UnaryOp::Plus | UnaryOp::Neg | UnaryOp::PreInc | UnaryOp::PreDec => {
            if !matches!(ty, Type::I32 | Type::F32) {
                return Err(Error::TypeMismatch {
                    location,
                    expected: "i32 or f32".to_string(),
                    found: ty.to_string(),
                });
            }
            Ok(ty.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ResolvedModule;

    fn check_source(src: &str) -> Result<CheckedModule> {
        let module = crate::parse_source(src).unwrap();
        check(ResolvedModule {
            module,
            imports: Vec::new(),
        })
    }

    #[test]
    fn arithmetic_expression_is_i32() {
        let checked = check_source("fn f() -> i32 { return 2 + 3 * 4; }").unwrap();
        let ItemKind::Function { body, .. } = &checked.module.items[0].kind else {
            panic!()
        };
        let StmtKind::Return(Some(expr)) = &body.as_ref().unwrap().stmts[0].kind else {
            panic!()
        };
        assert_eq!(checked.node_types[&expr.node_id], Type::I32);
    }

    #[test]
    fn break_outside_loop_is_error() {
        let err = check_source("fn f() -> void { break; }").unwrap_err();
        assert!(matches!(err, Error::LoopControlOutsideLoop { .. }));
    }

    #[test]
    fn wrong_argument_count_is_error() {
        let err = check_source(
            "fn g(a: i32) -> i32 { return a; } fn f() -> i32 { return g(1, 2); }",
        )
        .unwrap_err();
        assert!(matches!(err, Error::WrongArgumentCount { .. }));
    }

    #[test]
    fn null_assignable_to_struct_field() {
        let checked = check_source(
            "struct Node { next: Node } fn f() -> void { let n: Node = Node { next: null }; }",
        )
        .unwrap();
        assert!(!checked.ctx.scopes[0].structs["Node"].is_empty());
    }
}
