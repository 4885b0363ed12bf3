//! Macro expansion: rewrites every `name!(args)` invocation into the body of
//! the matching branch of `macro name! { ... }`, before type checking runs.
//!
//! Each branch's `let`-declared names are mangled with a per-invocation
//! suffix so that expanding the same macro twice into the same block never
//! collides (hygiene). A variadic branch's trailing parameter can only be
//! referenced as a bare `$name` used directly as a call/invocation argument,
//! where it splices its captured expressions into that argument list —
//! anywhere else a variadic binding is an error.

use crate::ast::*;
use crate::error::{Error, Result};
use crate::resolver::ResolvedModule;
use std::collections::HashMap;

const MAX_EXPANSION_DEPTH: u32 = 128;

/// What a macro parameter name is bound to at one invocation.
#[derive(Clone)]
enum Binding {
    Single(Expr),
    Variadic(Vec<Expr>),
}

struct Expander {
    macros: HashMap<String, Vec<MacroBranch>>,
    counter: u32,
}

/// Expand every macro invocation in `resolved.module`.
pub fn expand(mut resolved: ResolvedModule) -> Result<ResolvedModule> {
    let macros = resolved
        .module
        .items
        .iter()
        .filter_map(|item| match &item.kind {
            ItemKind::Macro { name, branches } => Some((name.clone(), branches.clone())),
            _ => None,
        })
        .collect();

    let mut expander = Expander { macros, counter: 0 };

    for item in &mut resolved.module.items {
        match &mut item.kind {
            ItemKind::Const { init, .. } | ItemKind::Global { init, .. } => {
                expander.expand_expr(init, &HashMap::new(), 0)?;
            }
            ItemKind::Function { body: Some(body), .. } => {
                expander.expand_block(body, &HashMap::new(), 0)?;
            }
            _ => {}
        }
    }

    Ok(resolved)
}

impl Expander {
    fn fresh_suffix(&mut self) -> u32 {
        self.counter += 1;
        self.counter
    }

    fn check_depth(&self, depth: u32) -> Result<()> {
        if depth > MAX_EXPANSION_DEPTH {
            return Err(Error::SizeOverflow {
                reason: "macro expansion exceeded the recursion depth limit".to_string(),
            });
        }
        Ok(())
    }

    /// Expand every invocation reachable from `block`'s statements in
    /// place, splicing multi-statement bodies in for invocations that are
    /// a statement's entire expression.
    fn expand_block(
        &mut self,
        block: &mut Block,
        bound: &HashMap<String, Binding>,
        depth: u32,
    ) -> Result<()> {
        let mut new_stmts = Vec::with_capacity(block.stmts.len());
        for mut stmt in block.stmts.drain(..) {
            if let StmtKind::Expr(expr) = &stmt.kind {
                if let ExprKind::Macro(_) = &expr.kind {
                    let location = stmt.location;
                    let directives = stmt.directives.clone();
                    let StmtKind::Expr(Expr { kind: ExprKind::Macro(inv), .. }) = stmt.kind else {
                        unreachable!()
                    };
                    let expanded = self.expand_invocation_as_stmts(inv, bound, depth, location)?;
                    new_stmts.extend(expanded.into_iter().map(|mut s| {
                        if s.directives.is_empty() {
                            s.directives = directives.clone();
                        }
                        s
                    }));
                    continue;
                }
            }
            self.expand_stmt(&mut stmt, bound, depth)?;
            new_stmts.push(stmt);
        }
        block.stmts = new_stmts;
        Ok(())
    }

    fn expand_stmt(
        &mut self,
        stmt: &mut Stmt,
        bound: &HashMap<String, Binding>,
        depth: u32,
    ) -> Result<()> {
        match &mut stmt.kind {
            StmtKind::Let { init, .. } => self.expand_expr(init, bound, depth),
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.expand_expr(cond, bound, depth)?;
                self.expand_block(then_branch, bound, depth)?;
                if let Some(else_branch) = else_branch {
                    self.expand_block(else_branch, bound, depth)?;
                }
                Ok(())
            }
            StmtKind::While { cond, body } => {
                self.expand_expr(cond, bound, depth)?;
                self.expand_block(body, bound, depth)
            }
            StmtKind::Break | StmtKind::Continue => Ok(()),
            StmtKind::Return(Some(expr)) => self.expand_expr(expr, bound, depth),
            StmtKind::Return(None) => Ok(()),
            StmtKind::Expr(expr) => self.expand_expr(expr, bound, depth),
        }
    }

    /// Expand every invocation reachable from `expr`, then — if `expr`
    /// itself is an invocation — replace it with its (single-expression)
    /// expansion.
    fn expand_expr(
        &mut self,
        expr: &mut Expr,
        bound: &HashMap<String, Binding>,
        depth: u32,
    ) -> Result<()> {
        match &mut expr.kind {
            ExprKind::IntLiteral(_)
            | ExprKind::FloatLiteral(_)
            | ExprKind::StringLiteral(_)
            | ExprKind::NullLiteral => {}
            ExprKind::Identifier(name) => {
                if let Some(Binding::Single(value)) = bound.get(name) {
                    *expr = value.clone();
                }
            }
            ExprKind::Namespaced { .. } => {}
            ExprKind::Binary { lhs, rhs, .. } => {
                self.expand_expr(lhs, bound, depth)?;
                self.expand_expr(rhs, bound, depth)?;
            }
            ExprKind::Unary { operand, .. } => self.expand_expr(operand, bound, depth)?,
            ExprKind::Postfix { operand, .. } => self.expand_expr(operand, bound, depth)?,
            ExprKind::Assign { target, value, .. } => {
                self.expand_expr(target, bound, depth)?;
                self.expand_expr(value, bound, depth)?;
            }
            ExprKind::Call { args, .. } => self.expand_arg_list(args, bound, depth)?,
            ExprKind::Index { base, index } => {
                self.expand_expr(base, bound, depth)?;
                self.expand_expr(index, bound, depth)?;
            }
            ExprKind::Member { base, .. } => self.expand_expr(base, bound, depth)?,
            ExprKind::Cast { expr: inner, .. } => self.expand_expr(inner, bound, depth)?,
            ExprKind::NewArray { size, .. } => self.expand_expr(size, bound, depth)?,
            ExprKind::ArrayLiteral(elements) => {
                for e in elements.iter_mut() {
                    self.expand_expr(e, bound, depth)?;
                }
            }
            ExprKind::StructInit { fields, .. } => match fields {
                StructInitFields::Anonymous(values) => {
                    for v in values.iter_mut() {
                        self.expand_expr(v, bound, depth)?;
                    }
                }
                StructInitFields::Named(named) => {
                    for (_, v) in named.iter_mut() {
                        self.expand_expr(v, bound, depth)?;
                    }
                }
            },
            ExprKind::Macro(_) => {}
        }

        if let ExprKind::Macro(_) = &expr.kind {
            self.check_depth(depth)?;
            let location = expr.location;
            let ExprKind::Macro(inv) = std::mem::replace(&mut expr.kind, ExprKind::NullLiteral)
            else {
                unreachable!()
            };
            *expr = self.expand_invocation_as_expr(inv, bound, depth, location)?;
        }
        Ok(())
    }

    /// Expand the args of a call or nested macro invocation, splicing a
    /// variadic binding referenced by bare name into the list in place.
    fn expand_arg_list(
        &mut self,
        args: &mut Vec<Expr>,
        bound: &HashMap<String, Binding>,
        depth: u32,
    ) -> Result<()> {
        let mut expanded = Vec::with_capacity(args.len());
        for arg in args.drain(..) {
            if let ExprKind::Identifier(name) = &arg.kind {
                if let Some(Binding::Variadic(values)) = bound.get(name) {
                    expanded.extend(values.iter().cloned());
                    continue;
                }
            }
            let mut arg = arg;
            self.expand_expr(&mut arg, bound, depth)?;
            expanded.push(arg);
        }
        *args = expanded;
        Ok(())
    }

    fn select_branch<'b>(
        branches: &'b [MacroBranch],
        arg_count: usize,
    ) -> Option<&'b MacroBranch> {
        branches.iter().find(|b| {
            let fixed = b.params.iter().filter(|p| !p.variadic).count();
            match b.params.last() {
                Some(p) if p.variadic => arg_count >= fixed,
                _ => arg_count == b.params.len(),
            }
        })
    }

    fn bind_params(branch: &MacroBranch, args: Vec<Expr>) -> HashMap<String, Binding> {
        let mut bound = HashMap::new();
        let mut args = args.into_iter();
        for param in &branch.params {
            if param.variadic {
                bound.insert(param.name.clone(), Binding::Variadic(args.by_ref().collect()));
            } else if let Some(arg) = args.next() {
                bound.insert(param.name.clone(), Binding::Single(arg));
            }
        }
        bound
    }

    /// Clone `body`, substituting parameter bindings and mangling every
    /// locally `let`-declared name with a fresh per-invocation suffix.
    fn instantiate_body(
        &mut self,
        body: &Block,
        params: &HashMap<String, Binding>,
    ) -> Result<Block> {
        let suffix = self.fresh_suffix();
        let mut renames: HashMap<String, String> = HashMap::new();
        let new_bound = params.clone();
        let mut block = body.clone();
        self.rename_and_bind_block(&mut block, &mut renames, &new_bound, suffix)?;
        Ok(block)
    }

    fn rename_and_bind_block(
        &mut self,
        block: &mut Block,
        renames: &mut HashMap<String, String>,
        bound: &HashMap<String, Binding>,
        suffix: u32,
    ) -> Result<()> {
        for stmt in &mut block.stmts {
            self.rename_and_bind_stmt(stmt, renames, bound, suffix)?;
        }
        Ok(())
    }

    fn rename_and_bind_stmt(
        &mut self,
        stmt: &mut Stmt,
        renames: &mut HashMap<String, String>,
        bound: &HashMap<String, Binding>,
        suffix: u32,
    ) -> Result<()> {
        match &mut stmt.kind {
            StmtKind::Let { name, init, .. } => {
                self.rename_and_bind_expr(init, renames, bound, suffix)?;
                if !bound.contains_key(name) {
                    let mangled = format!("{name}$${suffix}");
                    renames.insert(name.clone(), mangled.clone());
                    *name = mangled;
                }
            }
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.rename_and_bind_expr(cond, renames, bound, suffix)?;
                self.rename_and_bind_block(then_branch, renames, bound, suffix)?;
                if let Some(else_branch) = else_branch {
                    self.rename_and_bind_block(else_branch, renames, bound, suffix)?;
                }
            }
            StmtKind::While { cond, body } => {
                self.rename_and_bind_expr(cond, renames, bound, suffix)?;
                self.rename_and_bind_block(body, renames, bound, suffix)?;
            }
            StmtKind::Break | StmtKind::Continue => {}
            StmtKind::Return(Some(expr)) => {
                self.rename_and_bind_expr(expr, renames, bound, suffix)?;
            }
            StmtKind::Return(None) => {}
            StmtKind::Expr(expr) => self.rename_and_bind_expr(expr, renames, bound, suffix)?,
        }
        Ok(())
    }

    fn rename_and_bind_expr(
        &mut self,
        expr: &mut Expr,
        renames: &mut HashMap<String, String>,
        bound: &HashMap<String, Binding>,
        suffix: u32,
    ) -> Result<()> {
        match &mut expr.kind {
            ExprKind::Identifier(name) => {
                if let Some(mangled) = renames.get(name) {
                    *name = mangled.clone();
                }
            }
            ExprKind::Binary { lhs, rhs, .. } => {
                self.rename_and_bind_expr(lhs, renames, bound, suffix)?;
                self.rename_and_bind_expr(rhs, renames, bound, suffix)?;
            }
            ExprKind::Unary { operand, .. } | ExprKind::Postfix { operand, .. } => {
                self.rename_and_bind_expr(operand, renames, bound, suffix)?;
            }
            ExprKind::Assign { target, value, .. } => {
                self.rename_and_bind_expr(target, renames, bound, suffix)?;
                self.rename_and_bind_expr(value, renames, bound, suffix)?;
            }
            ExprKind::Call { args, .. } => {
                for a in args.iter_mut() {
                    self.rename_and_bind_expr(a, renames, bound, suffix)?;
                }
            }
            ExprKind::Index { base, index } => {
                self.rename_and_bind_expr(base, renames, bound, suffix)?;
                self.rename_and_bind_expr(index, renames, bound, suffix)?;
            }
            ExprKind::Member { base, .. } => {
                self.rename_and_bind_expr(base, renames, bound, suffix)?;
            }
            ExprKind::Cast { expr: inner, .. } => {
                self.rename_and_bind_expr(inner, renames, bound, suffix)?;
            }
            ExprKind::NewArray { size, .. } => {
                self.rename_and_bind_expr(size, renames, bound, suffix)?;
            }
            ExprKind::ArrayLiteral(elements) => {
                for e in elements.iter_mut() {
                    self.rename_and_bind_expr(e, renames, bound, suffix)?;
                }
            }
            ExprKind::StructInit { fields, .. } => match fields {
                StructInitFields::Anonymous(values) => {
                    for v in values.iter_mut() {
                        self.rename_and_bind_expr(v, renames, bound, suffix)?;
                    }
                }
                StructInitFields::Named(named) => {
                    for (_, v) in named.iter_mut() {
                        self.rename_and_bind_expr(v, renames, bound, suffix)?;
                    }
                }
            },
            ExprKind::Macro(inv) => {
                for a in inv.args.iter_mut() {
                    self.rename_and_bind_expr(a, renames, bound, suffix)?;
                }
            }
            ExprKind::IntLiteral(_)
            | ExprKind::FloatLiteral(_)
            | ExprKind::StringLiteral(_)
            | ExprKind::NullLiteral
            | ExprKind::Namespaced { .. } => {}
        }
        Ok(())
    }

    fn expand_invocation_as_expr(
        &mut self,
        inv: MacroInvocation,
        bound: &HashMap<String, Binding>,
        depth: u32,
        location: crate::source::SourceLocation,
    ) -> Result<Expr> {
        let mut body = self.instantiate_invocation_body(&inv, bound, location)?;
        self.expand_block(&mut body, &HashMap::new(), depth + 1)?;
        let [stmt] = <[Stmt; 1]>::try_from(body.stmts).map_err(|_| Error::InvalidInsertionPoint {
            reason: format!(
                "macro '{}' used as an expression must expand to exactly one expression",
                inv.name
            ),
        })?;
        let StmtKind::Expr(value) = stmt.kind else {
            return Err(Error::InvalidInsertionPoint {
                reason: format!(
                    "macro '{}' used as an expression must expand to an expression, not a statement",
                    inv.name
                ),
            });
        };
        Ok(value)
    }

    fn expand_invocation_as_stmts(
        &mut self,
        inv: MacroInvocation,
        bound: &HashMap<String, Binding>,
        depth: u32,
        location: crate::source::SourceLocation,
    ) -> Result<Vec<Stmt>> {
        let mut body = self.instantiate_invocation_body(&inv, bound, location)?;
        self.expand_block(&mut body, &HashMap::new(), depth + 1)?;
        Ok(body.stmts)
    }

    fn instantiate_invocation_body(
        &mut self,
        inv: &MacroInvocation,
        bound: &HashMap<String, Binding>,
        location: crate::source::SourceLocation,
    ) -> Result<Block> {
        if !inv.path.is_empty() {
            return Err(Error::UnknownName {
                location,
                name: format!("{}::{}", inv.path.join("::"), inv.name),
            });
        }
        let Some(branches) = self.macros.get(&inv.name).cloned() else {
            return Err(Error::UnknownName {
                location,
                name: inv.name.clone(),
            });
        };
        let mut args = inv.args.clone();
        self.expand_arg_list(&mut args, bound, 0)?;
        let arg_count = args.len();
        let branch = Self::select_branch(&branches, arg_count).ok_or_else(|| {
            Error::WrongArgumentCount {
                location,
                name: inv.name.clone(),
                expected: branches.first().map(|b| b.params.len()).unwrap_or(0),
                found: arg_count,
            }
        })?;
        let params = Self::bind_params(branch, args);
        self.instantiate_body(&branch.body, &params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expand_source(src: &str) -> Result<Module> {
        let module = crate::parse_source(src).unwrap();
        let resolved = ResolvedModule {
            module,
            imports: Vec::new(),
        };
        Ok(expand(resolved)?.module)
    }

    #[test]
    fn simple_macro_expands_to_expression() {
        let module = expand_source(
            "macro double! { ($x: expr) => { $x * 2 }; } fn f() -> i32 { return double!(21); }",
        )
        .unwrap();
        let ItemKind::Function { body, .. } = &module.items[1].kind else {
            panic!()
        };
        let StmtKind::Return(Some(expr)) = &body.as_ref().unwrap().stmts[0].kind else {
            panic!()
        };
        assert!(matches!(expr.kind, ExprKind::Binary { .. }));
    }

    #[test]
    fn statement_position_macro_splices_multiple_statements() {
        let module = expand_source(
            "macro log_twice! { ($x: expr) => { let a = $x; let b = $x; } ; } \
             fn f() -> void { log_twice!(1); }",
        )
        .unwrap();
        let ItemKind::Function { body, .. } = &module.items[1].kind else {
            panic!()
        };
        assert_eq!(body.as_ref().unwrap().stmts.len(), 2);
    }

    #[test]
    fn repeated_expansion_does_not_collide_local_names() {
        let module = expand_source(
            "macro make! { () => { let tmp = 1; } ; } \
             fn f() -> void { make!(); make!(); }",
        )
        .unwrap();
        let ItemKind::Function { body, .. } = &module.items[1].kind else {
            panic!()
        };
        let names: Vec<&str> = body
            .as_ref()
            .unwrap()
            .stmts
            .iter()
            .map(|s| match &s.kind {
                StmtKind::Let { name, .. } => name.as_str(),
                _ => panic!(),
            })
            .collect();
        assert_ne!(names[0], names[1]);
    }

    #[test]
    fn unknown_macro_is_error() {
        let err = expand_source("fn f() -> void { nope!(1); }").unwrap_err();
        assert!(matches!(err, Error::UnknownName { .. }));
    }
}
