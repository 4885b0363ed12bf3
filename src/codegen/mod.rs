//! Lowers a type-checked module to [`crate::ir::Program`].
//!
//! Every codegen pass dispatches exhaustively on `ExprKind`/`StmtKind`/
//! `ItemKind`, matching the AST's closed-sum-type discipline. Control flow
//! (`if`/`while`/`break`/`continue`) lowers to explicit basic blocks joined
//! by `Jmp`/`Jnz`; there is no separate "unstructure" pass. `&&`/`||` lower
//! to the dedicated `LAnd`/`LOr` opcodes rather than short-circuit branches:
//! both operands are always evaluated.

use crate::ast::*;
use crate::error::{Error, Result};
use crate::ir::{
    BasicBlock, CastKind, Constant, ConstantFoldTable, Function, GlobalConstant, ImportEntry, ImportKind,
    Instruction, Local, Program, StructLayout,
};
use crate::resolver::ResolvedImport;
use crate::source::SourceLocation;
use crate::typeck::CheckedModule;
use crate::types::Type;
use std::collections::HashMap;

/// Lower a checked module into IR, ready for [`crate::module::emit`].
///
/// `fold_constants` gates the constant-folding pass (`--no-eval-const-subexpr`
/// disables it, per §4.6: every other lowering decision is unaffected).
pub fn generate(checked: &CheckedModule, fold_constants: bool) -> Result<Program> {
    let mut program = Program::default();

    for item in &checked.module.items {
        if let ItemKind::Struct { name, .. } = &item.kind {
            let fields = checked
                .ctx
                .scopes[0]
                .structs
                .get(name)
                .cloned()
                .unwrap_or_default();
            program.structs.push(StructLayout {
                name: name.clone(),
                fields,
            });
        }
    }

    // Module-level `const`/`let` bindings must be compile-time constants:
    // the opcode set has no instruction for loading module-level state, so
    // there is nowhere else for a mutable global to live at runtime.
    let mut global_values: HashMap<String, Constant> = HashMap::new();
    for item in &checked.module.items {
        let (name, init, type_expr) = match &item.kind {
            ItemKind::Const { name, init, type_expr } => (name, init, type_expr),
            ItemKind::Global { name, init, type_expr } => (name, init, type_expr),
            _ => continue,
        };
        let value = eval_const_expr(init)?;
        let ty = match type_expr {
            Some(te) => resolve_checked_type(checked, te, item.location)?,
            None => checked
                .node_types
                .get(&init.node_id)
                .cloned()
                .unwrap_or_else(|| constant_type(&value)),
        };
        global_values.insert(name.clone(), value.clone());
        program.global_constants.push(GlobalConstant {
            name: name.clone(),
            ty,
            value,
        });
    }

    for item in &checked.module.items {
        if let ItemKind::Function {
            name,
            args,
            return_type,
            body,
        } = &item.kind
        {
            let native_lib = item
                .directives
                .iter()
                .find(|d| d.name == "native")
                .map(|d| d.arg("lib").map(|s| s.to_string()).unwrap_or_default());

            let ret_ty = resolve_checked_type(checked, return_type, item.location)?;
            let params = args
                .iter()
                .map(|a| {
                    Ok(Local {
                        name: a.name.clone(),
                        ty: resolve_checked_type(checked, &a.type_expr, item.location)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            let function = if let Some(lib) = native_lib {
                Function {
                    name: name.clone(),
                    return_type: ret_ty,
                    params,
                    locals: Vec::new(),
                    blocks: Vec::new(),
                    entry_label: String::new(),
                    native_lib: Some(lib),
                }
            } else {
                let Some(body) = body else {
                    return Err(Error::InvalidInsertionPoint {
                        reason: format!("function '{name}' has no body and no native directive"),
                    });
                };
                let mut fc = FunctionBuilder::new(
                    checked,
                    &global_values,
                    &mut program.imports,
                    &mut program.constants,
                    &mut program.fold_table,
                    fold_constants,
                    params.clone(),
                    ret_ty.clone(),
                );
                fc.lower_block(body)?;
                if fc.needs_str_len {
                    ensure_str_len_native(&mut program.functions);
                }
                if !fc.current_block().is_terminated() {
                    if ret_ty == Type::Void {
                        fc.emit(Instruction::RetVoid);
                    } else {
                        return Err(Error::MalformedBlock {
                            label: fc.current_label(),
                            reason: "function falls off the end without returning a value"
                                .to_string(),
                        });
                    }
                }
                Function {
                    name: name.clone(),
                    return_type: ret_ty,
                    params,
                    locals: fc.locals,
                    blocks: fc.blocks,
                    entry_label: "entry".to_string(),
                    native_lib: None,
                }
            };
            program.functions.push(function);
        }
    }

    Ok(program)
}

fn constant_type(c: &Constant) -> Type {
    match c {
        Constant::I32(_) => Type::I32,
        Constant::F32(_) => Type::F32,
        Constant::Str(_) => Type::Str,
    }
}

/// Register the `std::str_len` native binding as a local, zero-body
/// function so `.length` on a `str` can reach it through an ordinary
/// local `invoke`, the same way a `#[native(lib=...)]` declaration would.
/// A no-op if already present.
fn ensure_str_len_native(functions: &mut Vec<Function>) {
    if functions.iter().any(|f| f.name == "str_len") {
        return;
    }
    functions.push(Function {
        name: "str_len".to_string(),
        return_type: Type::I32,
        params: vec![Local {
            name: "s".to_string(),
            ty: Type::Str,
        }],
        locals: Vec::new(),
        blocks: Vec::new(),
        entry_label: String::new(),
        native_lib: Some("std".to_string()),
    });
}

fn resolve_checked_type(checked: &CheckedModule, te: &TypeExpr, location: SourceLocation) -> Result<Type> {
    match te {
        TypeExpr::Array(inner) => Ok(Type::Array(Box::new(resolve_checked_type(
            checked, inner, location,
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
            let qualified = if path.is_empty() {
                name.clone()
            } else {
                format!("{}::{}", path.join("::"), name)
            };
            if checked.ctx.scopes[0].structs.contains_key(&qualified) {
                return Ok(Type::Struct(qualified));
            }
            if checked.ctx.scopes[0].structs.contains_key(name) {
                return Ok(Type::Struct(name.clone()));
            }
            Err(Error::UnresolvedType {
                location,
                name: qualified,
            })
        }
    }
}

/// Evaluate a module-level initializer at compile time. Only literals and
/// arithmetic/unary expressions over literals are supported: anything
/// requiring runtime state (a call, a field access, an array) cannot be
/// represented, since the opcode set has no global-state instruction.
///
/// This is a distinct, stricter requirement from the general constant
/// folder below: a module-level `const`/`let` initializer *must* reduce
/// to a value or the module fails to compile, so this reports an error
/// rather than declining to fold. It shares its arithmetic with the
/// folder (`fold_unary`/`fold_binary`) rather than duplicating it.
fn eval_const_expr(expr: &Expr) -> Result<Constant> {
    match &expr.kind {
        ExprKind::IntLiteral(v) => Ok(Constant::I32(*v)),
        ExprKind::FloatLiteral(v) => Ok(Constant::F32(*v)),
        ExprKind::StringLiteral(v) => Ok(Constant::Str(v.clone())),
        ExprKind::Unary { op, operand } => {
            let inner = eval_const_expr(operand)?;
            fold_unary(*op, inner).ok_or_else(|| Error::InvalidInsertionPoint {
                reason: "unsupported constant unary expression".to_string(),
            })
        }
        ExprKind::Binary { op, lhs, rhs } => {
            let l = eval_const_expr(lhs)?;
            let r = eval_const_expr(rhs)?;
            fold_binary(*op, l, r).ok_or_else(|| Error::InvalidInsertionPoint {
                reason: "constant binary expression is ill-typed or rejected (e.g. division by zero)"
                    .to_string(),
            })
        }
        _ => Err(Error::InvalidInsertionPoint {
            reason: "module-level bindings must be compile-time constants".to_string(),
        }),
    }
}

/// Fold a pure expression subtree to a constant, or decline with `None` if
/// any part of it depends on runtime state. Consults and populates `table`
/// by the expression's parse node id so a repeated reference to the same
/// subtree doesn't get re-evaluated (§8's "folding an already-folded tree
/// yields an identical tree").
fn fold_expr(expr: &Expr, globals: &HashMap<String, Constant>, table: &mut ConstantFoldTable) -> Option<Constant> {
    if let Some(cached) = table.values.get(&expr.node_id) {
        return Some(cached.clone());
    }
    let folded = match &expr.kind {
        ExprKind::IntLiteral(v) => Some(Constant::I32(*v)),
        ExprKind::FloatLiteral(v) => Some(Constant::F32(*v)),
        ExprKind::StringLiteral(v) => Some(Constant::Str(v.clone())),
        ExprKind::Identifier(name) => globals.get(name).cloned(),
        ExprKind::Unary { op, operand }
            if matches!(op, UnaryOp::Neg | UnaryOp::Plus | UnaryOp::Not | UnaryOp::BitNot) =>
        {
            let inner = fold_expr(operand, globals, table)?;
            fold_unary(*op, inner)
        }
        ExprKind::Binary { op, lhs, rhs } => {
            let l = fold_expr(lhs, globals, table)?;
            let r = fold_expr(rhs, globals, table)?;
            fold_binary(*op, l, r)
        }
        _ => None,
    };
    if let Some(value) = &folded {
        table.values.insert(expr.node_id, value.clone());
    }
    folded
}

fn fold_unary(op: UnaryOp, inner: Constant) -> Option<Constant> {
    match (op, inner) {
        (UnaryOp::Neg, Constant::I32(v)) => Some(Constant::I32(v.wrapping_neg())),
        (UnaryOp::Neg, Constant::F32(v)) => Some(Constant::F32(-v)),
        (UnaryOp::Plus, v) => Some(v),
        (UnaryOp::BitNot, Constant::I32(v)) => Some(Constant::I32(!v)),
        (UnaryOp::Not, Constant::I32(v)) => Some(Constant::I32(if v == 0 { 1 } else { 0 })),
        _ => None,
    }
}

/// Fold a binary operator over two already-folded operands. Division and
/// modulo by zero decline rather than fold (the operation still happens,
/// and fails, at runtime); `f32` has no shift/bitwise form, so those
/// operators on `F32` operands decline too.
fn fold_binary(op: BinaryOp, l: Constant, r: Constant) -> Option<Constant> {
    use Constant::*;
    match (l, r) {
        (I32(a), I32(b)) => fold_i32_binary(op, a, b),
        (F32(a), F32(b)) => fold_f32_binary(op, a, b),
        (Str(a), Str(b)) if op == BinaryOp::Add => Some(Str(a + &b)),
        (Str(a), Str(b)) if op == BinaryOp::Eq => Some(I32((a == b) as i32)),
        (Str(a), Str(b)) if op == BinaryOp::Ne => Some(I32((a != b) as i32)),
        _ => None,
    }
}

fn fold_i32_binary(op: BinaryOp, a: i32, b: i32) -> Option<Constant> {
    Some(Constant::I32(match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Div => {
            if b == 0 {
                return None;
            }
            a.wrapping_div(b)
        }
        BinaryOp::Mod => {
            if b == 0 {
                return None;
            }
            a.wrapping_rem(b)
        }
        BinaryOp::Shl => a.wrapping_shl((b & 31) as u32),
        BinaryOp::Shr => a.wrapping_shr((b & 31) as u32),
        BinaryOp::BitAnd => a & b,
        BinaryOp::BitOr => a | b,
        BinaryOp::BitXor => a ^ b,
        BinaryOp::LogAnd => (a != 0 && b != 0) as i32,
        BinaryOp::LogOr => (a != 0 || b != 0) as i32,
        BinaryOp::Eq => (a == b) as i32,
        BinaryOp::Ne => (a != b) as i32,
        BinaryOp::Lt => (a < b) as i32,
        BinaryOp::Le => (a <= b) as i32,
        BinaryOp::Gt => (a > b) as i32,
        BinaryOp::Ge => (a >= b) as i32,
    }))
}

fn fold_f32_binary(op: BinaryOp, a: f32, b: f32) -> Option<Constant> {
    match op {
        BinaryOp::Add => Some(Constant::F32(a + b)),
        BinaryOp::Sub => Some(Constant::F32(a - b)),
        BinaryOp::Mul => Some(Constant::F32(a * b)),
        BinaryOp::Div => Some(Constant::F32(a / b)),
        BinaryOp::Eq => Some(Constant::I32((a == b) as i32)),
        BinaryOp::Ne => Some(Constant::I32((a != b) as i32)),
        BinaryOp::Lt => Some(Constant::I32((a < b) as i32)),
        BinaryOp::Le => Some(Constant::I32((a <= b) as i32)),
        BinaryOp::Gt => Some(Constant::I32((a > b) as i32)),
        BinaryOp::Ge => Some(Constant::I32((a >= b) as i32)),
        _ => None,
    }
}

/// Per-function lowering state.
struct FunctionBuilder<'a> {
    checked: &'a CheckedModule,
    globals: &'a HashMap<String, Constant>,
    imports: &'a mut Vec<ImportEntry>,
    constants: &'a mut Vec<Constant>,
    fold_table: &'a mut ConstantFoldTable,
    fold_enabled: bool,
    return_type: Type,
    locals: Vec<Local>,
    slots: Vec<HashMap<String, u32>>,
    blocks: Vec<BasicBlock>,
    current: usize,
    label_counter: u32,
    loop_stack: Vec<(String, String)>,
    temp_counter: u32,
    /// Set once this function lowers `.length` on a `str`, telling
    /// `generate` to register the `str_len` native the call needs.
    needs_str_len: bool,
}

impl<'a> FunctionBuilder<'a> {
    fn new(
        checked: &'a CheckedModule,
        globals: &'a HashMap<String, Constant>,
        imports: &'a mut Vec<ImportEntry>,
        constants: &'a mut Vec<Constant>,
        fold_table: &'a mut ConstantFoldTable,
        fold_enabled: bool,
        params: Vec<Local>,
        return_type: Type,
    ) -> Self {
        let mut top = HashMap::new();
        for (i, p) in params.iter().enumerate() {
            top.insert(p.name.clone(), i as u32);
        }
        let locals = params;
        let blocks = vec![BasicBlock::new("entry")];
        FunctionBuilder {
            checked,
            globals,
            imports,
            constants,
            fold_table,
            fold_enabled,
            return_type,
            locals,
            slots: vec![top],
            blocks,
            current: 0,
            label_counter: 0,
            loop_stack: Vec::new(),
            temp_counter: 0,
            needs_str_len: false,
        }
    }

    fn current_block(&mut self) -> &mut BasicBlock {
        &mut self.blocks[self.current]
    }

    fn current_label(&self) -> String {
        self.blocks[self.current].label.clone()
    }

    fn emit(&mut self, instr: Instruction) {
        self.blocks[self.current].instructions.push(instr);
    }

    fn new_label(&mut self, prefix: &str) -> String {
        self.label_counter += 1;
        format!("{prefix}{}", self.label_counter)
    }

    fn new_block(&mut self, label: String) -> usize {
        self.blocks.push(BasicBlock::new(label));
        self.blocks.len() - 1
    }

    fn switch_to(&mut self, idx: usize) {
        self.current = idx;
    }

    /// Start a fresh, unreachable block after a `break`/`continue`/`return`
    /// so any dead code that follows in source has somewhere to land
    /// without corrupting the terminated block.
    fn terminate_unreachable(&mut self) {
        let label = self.new_label("$dead");
        let idx = self.new_block(label);
        self.blocks[idx].unreachable = true;
        self.switch_to(idx);
    }

    fn push_scope(&mut self) {
        self.slots.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.slots.pop();
    }

    fn declare_local(&mut self, name: &str, ty: Type) -> u32 {
        let slot = self.locals.len() as u32;
        self.locals.push(Local {
            name: name.to_string(),
            ty,
        });
        self.slots.last_mut().unwrap().insert(name.to_string(), slot);
        slot
    }

    fn fresh_temp(&mut self, ty: Type) -> u32 {
        self.temp_counter += 1;
        let name = format!("$tmp{}", self.temp_counter);
        self.declare_local(&name, ty)
    }

    fn lookup_local(&self, name: &str) -> Option<u32> {
        for scope in self.slots.iter().rev() {
            if let Some(slot) = scope.get(name) {
                return Some(*slot);
            }
        }
        None
    }

    fn node_type(&self, node_id: u32) -> Type {
        self.checked
            .node_types
            .get(&node_id)
            .cloned()
            .unwrap_or(Type::Void)
    }

    fn intern_import(&mut self, module_path: Vec<String>, name: String, kind: ImportKind) {
        if self
            .imports
            .iter()
            .any(|i| i.module_path == module_path && i.name == name)
        {
            return;
        }
        self.imports.push(ImportEntry {
            module_path,
            name,
            kind,
        });
    }

    fn find_import(&self, name: &str) -> Option<&'a ResolvedImport> {
        self.checked.imports.iter().find(|i| {
            i.functions.contains_key(name)
                || i.structs.contains_key(name)
                || i.constants.contains_key(name)
        })
    }

    fn struct_name_of(&self, expr: &Expr) -> Result<String> {
        match self.node_type(expr.node_id) {
            Type::Struct(name) => Ok(name),
            other => Err(Error::TypeMismatch {
                location: expr.location,
                expected: "struct".to_string(),
                found: other.to_string(),
            }),
        }
    }

    fn lower_block(&mut self, block: &Block) -> Result<()> {
        self.push_scope();
        for stmt in &block.stmts {
            self.lower_stmt(stmt)?;
        }
        self.pop_scope();
        Ok(())
    }

    fn lower_stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match &stmt.kind {
            StmtKind::Let { name, init, .. } => {
                let ty = self.node_type(init.node_id);
                self.lower_initializer(init, &ty)?;
                let slot = self.declare_local(name, ty);
                self.emit(Instruction::Store(slot));
                Ok(())
            }
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.lower_expr(cond)?;
                let then_label = self.new_label("$then");
                let else_label = self.new_label("$else");
                let after_label = self.new_label("$endif");
                self.emit(Instruction::Jnz(then_label.clone(), else_label.clone()));

                let then_idx = self.new_block(then_label);
                self.switch_to(then_idx);
                self.lower_block(then_branch)?;
                if !self.current_block().is_terminated() {
                    self.emit(Instruction::Jmp(after_label.clone()));
                }

                let else_idx = self.new_block(else_label);
                self.switch_to(else_idx);
                if let Some(else_branch) = else_branch {
                    self.lower_block(else_branch)?;
                }
                if !self.current_block().is_terminated() {
                    self.emit(Instruction::Jmp(after_label.clone()));
                }

                let after_idx = self.new_block(after_label);
                self.switch_to(after_idx);
                Ok(())
            }
            StmtKind::While { cond, body } => {
                let cond_label = self.new_label("$cond");
                let body_label = self.new_label("$body");
                let after_label = self.new_label("$endwhile");
                self.emit(Instruction::Jmp(cond_label.clone()));

                let cond_idx = self.new_block(cond_label.clone());
                self.switch_to(cond_idx);
                self.lower_expr(cond)?;
                self.emit(Instruction::Jnz(body_label.clone(), after_label.clone()));

                let body_idx = self.new_block(body_label);
                self.switch_to(body_idx);
                self.loop_stack.push((cond_label.clone(), after_label.clone()));
                self.lower_block(body)?;
                self.loop_stack.pop();
                if !self.current_block().is_terminated() {
                    self.emit(Instruction::Jmp(cond_label));
                }

                let after_idx = self.new_block(after_label);
                self.switch_to(after_idx);
                Ok(())
            }
            StmtKind::Break => {
                let (_, break_label) = self.loop_stack.last().cloned().ok_or_else(|| {
                    Error::LoopControlOutsideLoop {
                        location: stmt.location,
                        keyword: "break".to_string(),
                    }
                })?;
                self.emit(Instruction::Jmp(break_label));
                self.terminate_unreachable();
                Ok(())
            }
            StmtKind::Continue => {
                let (continue_label, _) = self.loop_stack.last().cloned().ok_or_else(|| {
                    Error::LoopControlOutsideLoop {
                        location: stmt.location,
                        keyword: "continue".to_string(),
                    }
                })?;
                self.emit(Instruction::Jmp(continue_label));
                self.terminate_unreachable();
                Ok(())
            }
            StmtKind::Return(value) => {
                match value {
                    Some(expr) => {
                        self.lower_expr(expr)?;
                        self.emit(Instruction::Ret);
                    }
                    None => self.emit(Instruction::RetVoid),
                }
                self.terminate_unreachable();
                Ok(())
            }
            StmtKind::Expr(expr) => {
                self.lower_expr(expr)?;
                if self.node_type(expr.node_id) != Type::Void {
                    self.emit(Instruction::Pop);
                }
                Ok(())
            }
        }
    }

    /// Lower an initializer expression, special-casing an empty array
    /// literal whose element type only the declared type at this use site
    /// can supply.
    fn lower_initializer(&mut self, expr: &Expr, declared: &Type) -> Result<()> {
        if let ExprKind::ArrayLiteral(elements) = &expr.kind {
            if elements.is_empty() {
                let elem_ty = declared.element_type().cloned().ok_or_else(|| {
                    Error::UnresolvedType {
                        location: expr.location,
                        name: "[]".to_string(),
                    }
                })?;
                self.emit(Instruction::ConstI32(0));
                self.emit(Instruction::NewArray(elem_ty));
                return Ok(());
            }
        }
        self.lower_expr(expr)
    }

    fn lower_expr(&mut self, expr: &Expr) -> Result<()> {
        match &expr.kind {
            ExprKind::IntLiteral(v) => self.emit(Instruction::ConstI32(*v)),
            ExprKind::FloatLiteral(v) => self.emit(Instruction::ConstF32(*v)),
            ExprKind::StringLiteral(v) => {
                let idx = self.intern_constant(Constant::Str(v.clone()));
                self.emit(Instruction::ConstStr(idx));
            }
            ExprKind::NullLiteral => self.emit(Instruction::ConstNull),
            ExprKind::Identifier(name) => self.lower_name_load(name, expr.location)?,
            ExprKind::Namespaced { name, .. } => self.lower_name_load(name, expr.location)?,
            ExprKind::Binary { op, lhs, rhs } => {
                if let Some(value) = self.try_fold(expr) {
                    self.emit_constant(value);
                } else {
                    self.lower_expr(lhs)?;
                    self.lower_expr(rhs)?;
                    self.emit(binary_instruction(*op));
                }
            }
            ExprKind::Unary { op, operand } => {
                if let Some(value) = self.try_fold(expr) {
                    self.emit_constant(value);
                } else {
                    self.lower_unary(*op, operand)?
                }
            }
            ExprKind::Postfix { op, operand } => self.lower_incdec(*op, operand, false)?,
            ExprKind::Assign { op, target, value } => self.lower_assign(*op, target, value)?,
            ExprKind::Call { path, name, args } => {
                self.lower_call(path, name, args, expr.location)?
            }
            ExprKind::Index { base, index } => {
                self.lower_expr(base)?;
                self.lower_expr(index)?;
                self.emit(Instruction::LoadElement);
            }
            ExprKind::Member { base, member } => {
                let base_ty = self.node_type(base.node_id);
                if member == "length" && base_ty.element_type().is_some() {
                    self.lower_expr(base)?;
                    self.emit(Instruction::ArrayLength);
                } else if member == "length" && base_ty == Type::Str {
                    self.lower_expr(base)?;
                    self.needs_str_len = true;
                    self.emit(Instruction::Invoke {
                        path: Vec::new(),
                        name: "str_len".to_string(),
                    });
                } else {
                    let struct_name = self.struct_name_of(base)?;
                    self.lower_expr(base)?;
                    self.emit(Instruction::GetField {
                        struct_name,
                        field: member.clone(),
                    });
                }
            }
            ExprKind::Cast { expr: inner, .. } => {
                let from = self.node_type(inner.node_id);
                let to = self.node_type(expr.node_id);
                self.lower_expr(inner)?;
                match (&from, &to) {
                    (Type::I32, Type::F32) => self.emit(Instruction::Cast(CastKind::I32ToF32)),
                    (Type::F32, Type::I32) => self.emit(Instruction::Cast(CastKind::F32ToI32)),
                    _ if to.is_reference() => self.emit(Instruction::CheckCast(to)),
                    _ => {}
                }
            }
            ExprKind::NewArray { size, .. } => {
                let elem_ty = match self.node_type(expr.node_id) {
                    Type::Array(inner) => *inner,
                    other => other,
                };
                self.lower_expr(size)?;
                self.emit(Instruction::NewArray(elem_ty));
            }
            ExprKind::ArrayLiteral(elements) => {
                let elem_ty = match self.node_type(expr.node_id) {
                    Type::Array(inner) => *inner,
                    _ => Type::I32,
                };
                self.emit(Instruction::ConstI32(elements.len() as i32));
                self.emit(Instruction::NewArray(elem_ty));
                for (i, element) in elements.iter().enumerate() {
                    self.emit(Instruction::Dup);
                    self.emit(Instruction::ConstI32(i as i32));
                    self.lower_expr(element)?;
                    self.emit(Instruction::StoreElement);
                }
            }
            ExprKind::StructInit { name, fields, .. } => {
                let struct_name = match self.node_type(expr.node_id) {
                    Type::Struct(n) => n,
                    _ => name.clone(),
                };
                let layout = self
                    .checked
                    .ctx
                    .scopes[0]
                    .structs
                    .get(&struct_name)
                    .cloned()
                    .ok_or_else(|| Error::UnknownName {
                        location: expr.location,
                        name: struct_name.clone(),
                    })?;
                self.emit(Instruction::New(struct_name.clone()));
                match fields {
                    StructInitFields::Anonymous(values) => {
                        for (value, (field_name, _)) in values.iter().zip(layout.iter()) {
                            self.emit(Instruction::Dup);
                            self.lower_expr(value)?;
                            self.emit(Instruction::SetField {
                                struct_name: struct_name.clone(),
                                field: field_name.clone(),
                            });
                        }
                    }
                    StructInitFields::Named(named) => {
                        for (field_name, value) in named {
                            self.emit(Instruction::Dup);
                            self.lower_expr(value)?;
                            self.emit(Instruction::SetField {
                                struct_name: struct_name.clone(),
                                field: field_name.clone(),
                            });
                        }
                    }
                }
            }
            ExprKind::Macro(_) => {
                return Err(Error::fault(
                    "macro invocation survived to codegen (expansion pass was skipped)",
                ))
            }
        }
        Ok(())
    }

    fn intern_constant(&mut self, value: Constant) -> u32 {
        if let Some(idx) = self.constants.iter().position(|existing| existing == &value) {
            return idx as u32;
        }
        self.constants.push(value);
        (self.constants.len() - 1) as u32
    }

    /// Try to fold `expr` to a constant, honoring `--no-eval-const-subexpr`.
    fn try_fold(&mut self, expr: &Expr) -> Option<Constant> {
        if !self.fold_enabled {
            return None;
        }
        fold_expr(expr, self.globals, self.fold_table)
    }

    fn emit_constant(&mut self, value: Constant) {
        let instr = match value {
            Constant::I32(v) => Instruction::ConstI32(v),
            Constant::F32(v) => Instruction::ConstF32(v),
            Constant::Str(s) => {
                let idx = self.intern_constant(Constant::Str(s));
                Instruction::ConstStr(idx)
            }
        };
        self.emit(instr);
    }

    fn lower_name_load(&mut self, name: &str, location: SourceLocation) -> Result<()> {
        if let Some(slot) = self.lookup_local(name) {
            self.emit(Instruction::Load(slot));
            return Ok(());
        }
        if let Some(value) = self.globals.get(name).cloned() {
            self.emit_constant(value);
            return Ok(());
        }
        if let Some(import) = self.find_import(name) {
            if let Some(ty) = import.constants.get(name) {
                let _ = ty;
                return Err(Error::MissingSymbol {
                    name: format!("{}::{name}", import.path.join("::")),
                });
            }
        }
        Err(Error::UnknownName { location, name: name.to_string() })
    }

    fn lower_unary(&mut self, op: UnaryOp, operand: &Expr) -> Result<()> {
        let ty = self.node_type(operand.node_id);
        match op {
            UnaryOp::Plus => self.lower_expr(operand),
            UnaryOp::Neg => {
                self.emit(zero_of(&ty));
                self.lower_expr(operand)?;
                self.emit(Instruction::Sub);
                Ok(())
            }
            UnaryOp::Not => {
                self.lower_expr(operand)?;
                self.emit(Instruction::ConstI32(0));
                self.emit(Instruction::CmpEq);
                Ok(())
            }
            UnaryOp::BitNot => {
                self.lower_expr(operand)?;
                self.emit(Instruction::ConstI32(-1));
                self.emit(Instruction::Xor);
                Ok(())
            }
            UnaryOp::PreInc | UnaryOp::PreDec => self.lower_incdec(
                if op == UnaryOp::PreInc {
                    PostfixOp::Inc
                } else {
                    PostfixOp::Dec
                },
                operand,
                true,
            ),
        }
    }

    fn lower_incdec(&mut self, op: PostfixOp, target: &Expr, pre: bool) -> Result<()> {
        let ty = self.node_type(target.node_id);
        let one = one_of(&ty);
        let apply = |fb: &mut Self| {
            fb.emit(one.clone());
            fb.emit(match op {
                PostfixOp::Inc => Instruction::Add,
                PostfixOp::Dec => Instruction::Sub,
            });
        };
        match &target.kind {
            ExprKind::Identifier(name) => {
                let slot = self.lookup_local(name).ok_or_else(|| Error::UnknownName {
                    location: target.location,
                    name: name.clone(),
                })?;
                self.emit(Instruction::Load(slot));
                if pre {
                    apply(self);
                    self.emit(Instruction::Dup);
                    self.emit(Instruction::Store(slot));
                } else {
                    let old = self.fresh_temp(ty.clone());
                    self.emit(Instruction::Dup);
                    self.emit(Instruction::Store(old));
                    apply(self);
                    self.emit(Instruction::Store(slot));
                    self.emit(Instruction::Load(old));
                }
                Ok(())
            }
            ExprKind::Index { base, index } => {
                let base_ty = self.node_type(base.node_id);
                let tmp_base = self.fresh_temp(base_ty);
                let tmp_index = self.fresh_temp(Type::I32);
                self.lower_expr(base)?;
                self.emit(Instruction::Store(tmp_base));
                self.lower_expr(index)?;
                self.emit(Instruction::Store(tmp_index));

                self.emit(Instruction::Load(tmp_base));
                self.emit(Instruction::Load(tmp_index));
                self.emit(Instruction::LoadElement);
                let old = self.fresh_temp(ty.clone());
                self.emit(Instruction::Store(old));
                self.emit(Instruction::Load(old));
                apply(self);
                let new = self.fresh_temp(ty.clone());
                self.emit(Instruction::Store(new));

                self.emit(Instruction::Load(tmp_base));
                self.emit(Instruction::Load(tmp_index));
                self.emit(Instruction::Load(new));
                self.emit(Instruction::StoreElement);
                self.emit(Instruction::Load(if pre { new } else { old }));
                Ok(())
            }
            ExprKind::Member { base, member } => {
                let struct_name = self.struct_name_of(base)?;
                let base_ty = self.node_type(base.node_id);
                let tmp_base = self.fresh_temp(base_ty);
                self.lower_expr(base)?;
                self.emit(Instruction::Store(tmp_base));

                self.emit(Instruction::Load(tmp_base));
                self.emit(Instruction::GetField {
                    struct_name: struct_name.clone(),
                    field: member.clone(),
                });
                let old = self.fresh_temp(ty.clone());
                self.emit(Instruction::Store(old));
                self.emit(Instruction::Load(old));
                apply(self);
                let new = self.fresh_temp(ty.clone());
                self.emit(Instruction::Store(new));

                self.emit(Instruction::Load(tmp_base));
                self.emit(Instruction::Load(new));
                self.emit(Instruction::SetField {
                    struct_name,
                    field: member.clone(),
                });
                self.emit(Instruction::Load(if pre { new } else { old }));
                Ok(())
            }
            _ => Err(Error::InvalidInsertionPoint {
                reason: "increment/decrement target is not an lvalue".to_string(),
            }),
        }
    }

    fn lower_assign(&mut self, op: AssignOp, target: &Expr, value: &Expr) -> Result<()> {
        let ty = self.node_type(target.node_id);
        match &target.kind {
            ExprKind::Identifier(name) => {
                let slot = self.lookup_local(name).ok_or_else(|| Error::UnknownName {
                    location: target.location,
                    name: name.clone(),
                })?;
                if op == AssignOp::Assign {
                    self.lower_expr(value)?;
                } else {
                    self.emit(Instruction::Load(slot));
                    self.lower_expr(value)?;
                    self.emit(compound_instruction(op));
                }
                self.emit(Instruction::Dup);
                self.emit(Instruction::Store(slot));
                Ok(())
            }
            ExprKind::Index { base, index } => {
                let base_ty = self.node_type(base.node_id);
                let tmp_base = self.fresh_temp(base_ty);
                let tmp_index = self.fresh_temp(Type::I32);
                self.lower_expr(base)?;
                self.emit(Instruction::Store(tmp_base));
                self.lower_expr(index)?;
                self.emit(Instruction::Store(tmp_index));

                if op != AssignOp::Assign {
                    self.emit(Instruction::Load(tmp_base));
                    self.emit(Instruction::Load(tmp_index));
                    self.emit(Instruction::LoadElement);
                    self.lower_expr(value)?;
                    self.emit(compound_instruction(op));
                } else {
                    self.lower_expr(value)?;
                }
                let result = self.fresh_temp(ty);
                self.emit(Instruction::Store(result));

                self.emit(Instruction::Load(tmp_base));
                self.emit(Instruction::Load(tmp_index));
                self.emit(Instruction::Load(result));
                self.emit(Instruction::StoreElement);
                self.emit(Instruction::Load(result));
                Ok(())
            }
            ExprKind::Member { base, member } => {
                let struct_name = self.struct_name_of(base)?;
                let base_ty = self.node_type(base.node_id);
                let tmp_base = self.fresh_temp(base_ty);
                self.lower_expr(base)?;
                self.emit(Instruction::Store(tmp_base));

                if op != AssignOp::Assign {
                    self.emit(Instruction::Load(tmp_base));
                    self.emit(Instruction::GetField {
                        struct_name: struct_name.clone(),
                        field: member.clone(),
                    });
                    self.lower_expr(value)?;
                    self.emit(compound_instruction(op));
                } else {
                    self.lower_expr(value)?;
                }
                let result = self.fresh_temp(ty);
                self.emit(Instruction::Store(result));

                self.emit(Instruction::Load(tmp_base));
                self.emit(Instruction::Load(result));
                self.emit(Instruction::SetField {
                    struct_name,
                    field: member.clone(),
                });
                self.emit(Instruction::Load(result));
                Ok(())
            }
            _ => Err(Error::InvalidInsertionPoint {
                reason: "assignment target is not an lvalue".to_string(),
            }),
        }
    }

    fn lower_call(
        &mut self,
        path: &[String],
        name: &str,
        args: &[Expr],
        location: SourceLocation,
    ) -> Result<()> {
        for arg in args {
            self.lower_expr(arg)?;
        }
        let is_local = self
            .checked
            .module
            .items
            .iter()
            .any(|i| matches!(&i.kind, ItemKind::Function { name: n, .. } if n == name));
        if is_local && path.is_empty() {
            self.emit(Instruction::Invoke {
                path: Vec::new(),
                name: name.to_string(),
            });
            return Ok(());
        }
        if let Some(import) = self.find_import(name) {
            if let Some(sig) = import.functions.get(name) {
                let module_path = import.path.clone();
                self.intern_import(
                    module_path.clone(),
                    name.to_string(),
                    ImportKind::Function(sig.clone()),
                );
                self.emit(Instruction::Invoke {
                    path: module_path,
                    name: name.to_string(),
                });
                return Ok(());
            }
        }
        Err(Error::UnknownName {
            location,
            name: name.to_string(),
        })
    }
}

fn binary_instruction(op: BinaryOp) -> Instruction {
    match op {
        BinaryOp::LogOr => Instruction::LOr,
        BinaryOp::LogAnd => Instruction::LAnd,
        BinaryOp::BitOr => Instruction::Or,
        BinaryOp::BitXor => Instruction::Xor,
        BinaryOp::BitAnd => Instruction::And,
        BinaryOp::Eq => Instruction::CmpEq,
        BinaryOp::Ne => Instruction::CmpNe,
        BinaryOp::Lt => Instruction::CmpL,
        BinaryOp::Le => Instruction::CmpLe,
        BinaryOp::Gt => Instruction::CmpG,
        BinaryOp::Ge => Instruction::CmpGe,
        BinaryOp::Shl => Instruction::Shl,
        BinaryOp::Shr => Instruction::Shr,
        BinaryOp::Add => Instruction::Add,
        BinaryOp::Sub => Instruction::Sub,
        BinaryOp::Mul => Instruction::Mul,
        BinaryOp::Div => Instruction::Div,
        BinaryOp::Mod => Instruction::Mod,
    }
}

fn compound_instruction(op: AssignOp) -> Instruction {
    match op {
        AssignOp::AddAssign => Instruction::Add,
        AssignOp::SubAssign => Instruction::Sub,
        AssignOp::MulAssign => Instruction::Mul,
        AssignOp::DivAssign => Instruction::Div,
        AssignOp::ModAssign => Instruction::Mod,
        AssignOp::AndAssign => Instruction::And,
        AssignOp::OrAssign => Instruction::Or,
        AssignOp::ShlAssign => Instruction::Shl,
        AssignOp::ShrAssign => Instruction::Shr,
        AssignOp::Assign => unreachable!("plain assignment has no compound instruction"),
    }
}

fn zero_of(ty: &Type) -> Instruction {
    match ty {
        Type::F32 => Instruction::ConstF32(0.0),
        _ => Instruction::ConstI32(0),
    }
}

fn one_of(ty: &Type) -> Instruction {
    match ty {
        Type::F32 => Instruction::ConstF32(1.0),
        _ => Instruction::ConstI32(1),
    }
}
