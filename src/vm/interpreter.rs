//! The bytecode execution loop: decodes opcodes straight out of a loaded
//! module's code segment and drives a typed operand stack plus a growable
//! local-variable frame.
//!
//! Module loading recursively follows every `import` entry through the same
//! [`ModuleLoader`] hook the compile-time resolver uses, registers every
//! loaded module's struct layouts with the [`Heap`], and keeps every loaded
//! module keyed by its dotted path (the entry module's key is the empty
//! string) so `invoke` can jump across module boundaries.

use crate::error::{Error, Result};
use crate::ir::StructLayout;
use crate::module::archive::{self, Reader};
use crate::module::opcode::Opcode;
use crate::module::{CompiledModule, ExportEntry, ExportKind};
use crate::resolver::ModuleLoader;
use crate::types::Type;
use crate::vm::heap::{Heap, HeapObject};
use crate::vm::native::NativeRegistry;
use crate::vm::value::{Ref, Value};
use std::collections::HashMap;

/// Operand-stack cells beyond this count are a runaway program, not a
/// legitimate deep recursion; matches the fail-fast contract for resource
/// exhaustion elsewhere in the toolchain.
const MAX_OPERAND_STACK: usize = 1 << 16;

/// A loaded, linked program ready to execute. Owns every module reachable
/// from the entry module's imports, the GC heap, and the native registry.
pub struct Interpreter {
    modules: HashMap<String, CompiledModule>,
    heap: Heap,
    natives: NativeRegistry,
}

impl Interpreter {
    /// Load `entry` and every module it (transitively) imports via `loader`,
    /// registering struct layouts with the GC as each module is linked.
    pub fn load(entry: CompiledModule, loader: &dyn ModuleLoader) -> Result<Self> {
        let mut interp = Interpreter {
            modules: HashMap::new(),
            heap: Heap::new(),
            natives: NativeRegistry::with_stdlib(),
        };
        interp.link_module(String::new(), entry, loader)?;
        Ok(interp)
    }

    /// Register `natives` lib functions beyond the bundled `std`/`math`.
    pub fn register_native(&mut self, lib: &str, name: &str, f: crate::vm::native::NativeFn) {
        self.natives.register(lib, name, f);
    }

    fn link_module(&mut self, key: String, compiled: CompiledModule, loader: &dyn ModuleLoader) -> Result<()> {
        if self.modules.contains_key(&key) {
            return Ok(());
        }
        for export in &compiled.exports {
            if let ExportKind::Struct(fields) = &export.kind {
                self.heap.register_layout(StructLayout {
                    name: export.name.clone(),
                    fields: fields.clone(),
                });
            }
        }
        let imports = compiled.imports.clone();
        self.modules.insert(key, compiled);
        for import in imports {
            let child_key = import.module_path.join("::");
            if self.modules.contains_key(&child_key) {
                continue;
            }
            let bytes = loader.load(&import.module_path)?;
            let child = archive::decode_module(&bytes)?;
            self.link_module(child_key, child, loader)?;
        }
        Ok(())
    }

    /// Run `name` in the entry module with `args`, returning its result
    /// (`None` for a `void` function), then sweep the heap so an embedder
    /// can assert no leaks survive the call.
    pub fn run(&mut self, name: &str, args: Vec<Value>) -> Result<Option<Value>> {
        let export = self
            .modules
            .get("")
            .and_then(|m| m.find_export(name))
            .cloned()
            .ok_or_else(|| Error::MissingSymbol {
                name: name.to_string(),
            })?;
        let result = self.exec_function("", &export, args)?;
        let roots = result.and_then(Value::as_ref);
        self.heap.collect(roots);
        Ok(result)
    }

    /// Number of heap objects still alive. Exposed for leak assertions.
    pub fn live_object_count(&self) -> usize {
        self.heap.live_count()
    }

    /// Build a `[str]` array out of `argv`, suitable as the sole argument to
    /// a `main(args: [str]) -> i32` entry point.
    pub fn alloc_argv(&mut self, argv: Vec<String>) -> Value {
        let elements = argv
            .into_iter()
            .map(|s| Value::Ref(self.heap.alloc_string(s)))
            .collect();
        Value::Ref(self.heap.alloc_array(true, elements))
    }

    fn exec_function(&mut self, module_key: &str, export: &ExportEntry, args: Vec<Value>) -> Result<Option<Value>> {
        let ExportKind::Function {
            sig,
            offset,
            size,
            native_lib,
        } = &export.kind
        else {
            return Err(Error::fault(format!("'{}' is not a function", export.name)));
        };

        if let Some(lib) = native_lib {
            let mut stack = args;
            self.natives.call(lib, &export.name, &mut self.heap, &mut stack)?;
            return Ok(if *sig.return_type == Type::Void {
                None
            } else {
                Some(stack.pop().ok_or(Error::StackOverflow {
                    direction: "underflow",
                })?)
            });
        }

        let code = self.modules[module_key].code.clone();
        let start = *offset as usize;
        let end = start + *size as usize;
        let mut locals = args;
        let mut stack: Vec<Value> = Vec::new();
        let mut pc = start;

        loop {
            if pc >= end {
                return Err(Error::fault(format!(
                    "function '{}' fell off the end of its code without returning",
                    export.name
                )));
            }
            let opcode = Opcode::from_u8(code[pc]).ok_or_else(|| Error::InvalidTag {
                tag: code[pc],
                context: "opcode".to_string(),
            })?;
            pc += 1;

            match opcode {
                Opcode::ConstI32 => {
                    let v = read_u32(&code, &mut pc)? as i32;
                    push(&mut stack, Value::I32(v))?;
                }
                Opcode::ConstF32 => {
                    let v = f32::from_bits(read_u32(&code, &mut pc)?);
                    push(&mut stack, Value::F32(v))?;
                }
                Opcode::ConstStr => {
                    let idx = read_u32(&code, &mut pc)?;
                    let s = match self.modules[module_key].constants.get(idx as usize) {
                        Some(crate::ir::Constant::Str(s)) => s.clone(),
                        _ => {
                            return Err(Error::fault(format!(
                                "constant pool index {idx} is not a string"
                            )))
                        }
                    };
                    let r = self.heap.alloc_string(s);
                    push(&mut stack, Value::Ref(r))?;
                }
                Opcode::ConstNull => push(&mut stack, Value::Null)?,

                Opcode::Load => {
                    let slot = read_u32(&code, &mut pc)? as usize;
                    let v = *locals.get(slot).ok_or_else(|| {
                        Error::fault(format!("load of undefined local slot {slot}"))
                    })?;
                    push(&mut stack, v)?;
                }
                Opcode::Store => {
                    let slot = read_u32(&code, &mut pc)? as usize;
                    let v = pop(&mut stack)?;
                    if slot >= locals.len() {
                        locals.resize(slot + 1, Value::Null);
                    }
                    locals[slot] = v;
                }

                Opcode::Dup => {
                    let a = *stack.last().ok_or(Error::StackOverflow {
                        direction: "underflow",
                    })?;
                    push(&mut stack, a)?;
                }
                Opcode::DupX1 => {
                    let b = pop(&mut stack)?;
                    let a = pop(&mut stack)?;
                    push(&mut stack, b)?;
                    push(&mut stack, a)?;
                    push(&mut stack, b)?;
                }
                Opcode::DupX2 => {
                    let c = pop(&mut stack)?;
                    let b = pop(&mut stack)?;
                    let a = pop(&mut stack)?;
                    push(&mut stack, c)?;
                    push(&mut stack, a)?;
                    push(&mut stack, b)?;
                    push(&mut stack, c)?;
                }
                Opcode::Dup2X0 => {
                    let b = pop(&mut stack)?;
                    let a = pop(&mut stack)?;
                    push(&mut stack, a)?;
                    push(&mut stack, b)?;
                    push(&mut stack, a)?;
                    push(&mut stack, b)?;
                }
                Opcode::Pop => {
                    pop(&mut stack)?;
                }

                Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => {
                    let rhs = pop(&mut stack)?;
                    let lhs = pop(&mut stack)?;
                    push(&mut stack, arith(opcode, lhs, rhs)?)?;
                }
                Opcode::Shl | Opcode::Shr | Opcode::And | Opcode::Xor | Opcode::Or | Opcode::LAnd
                | Opcode::LOr => {
                    let rhs = pop(&mut stack)?;
                    let lhs = pop(&mut stack)?;
                    push(&mut stack, bitwise(opcode, lhs, rhs)?)?;
                }

                Opcode::CmpL | Opcode::CmpLe | Opcode::CmpG | Opcode::CmpGe | Opcode::CmpEq
                | Opcode::CmpNe => {
                    let rhs = pop(&mut stack)?;
                    let lhs = pop(&mut stack)?;
                    push(&mut stack, Value::I32(compare(opcode, lhs, rhs)? as i32))?;
                }

                Opcode::NewArray => {
                    let ty = decode_type_inline(&code, &mut pc)?;
                    let len = pop(&mut stack)?
                        .as_i32()
                        .ok_or_else(|| Error::fault("newarray length must be i32"))?;
                    if len < 0 {
                        return Err(Error::ArrayBoundsViolation { index: len, length: 0 });
                    }
                    let r = self.alloc_array_of(&ty, len as usize);
                    push(&mut stack, Value::Ref(r))?;
                }
                Opcode::ANewArray => {
                    let name = read_string(&code, &mut pc)?;
                    let len = pop(&mut stack)?
                        .as_i32()
                        .ok_or_else(|| Error::fault("anewarray length must be i32"))?;
                    if len < 0 {
                        return Err(Error::ArrayBoundsViolation { index: len, length: 0 });
                    }
                    let r = self
                        .heap
                        .alloc_array(true, vec![Value::Null; len as usize]);
                    let _ = name;
                    push(&mut stack, Value::Ref(r))?;
                }
                Opcode::ArrayLength => {
                    let r = pop_ref(&mut stack)?;
                    let len = match self.heap.get(r)? {
                        HeapObject::Array { elements, .. } => elements.len() as i32,
                        _ => return Err(Error::fault("arraylength of a non-array reference")),
                    };
                    push(&mut stack, Value::I32(len))?;
                }
                Opcode::LoadElement => {
                    let index = pop(&mut stack)?
                        .as_i32()
                        .ok_or_else(|| Error::fault("array index must be i32"))?;
                    let base = pop_ref(&mut stack)?;
                    let v = match self.heap.get(base)? {
                        HeapObject::Array { elements, .. } => *elements.get(index as usize).ok_or(
                            Error::ArrayBoundsViolation {
                                index,
                                length: elements.len() as i32,
                            },
                        )?,
                        _ => return Err(Error::fault("load_element of a non-array reference")),
                    };
                    push(&mut stack, v)?;
                }
                Opcode::StoreElement => {
                    let value = pop(&mut stack)?;
                    let index = pop(&mut stack)?
                        .as_i32()
                        .ok_or_else(|| Error::fault("array index must be i32"))?;
                    let base = pop_ref(&mut stack)?;
                    match self.heap.get_mut(base)? {
                        HeapObject::Array { elements, .. } => {
                            let len = elements.len() as i32;
                            let slot = elements
                                .get_mut(index as usize)
                                .ok_or(Error::ArrayBoundsViolation { index, length: len })?;
                            *slot = value;
                        }
                        _ => return Err(Error::fault("store_element into a non-array reference")),
                    }
                }

                Opcode::New => {
                    let name = read_string(&code, &mut pc)?;
                    let field_count = self
                        .heap
                        .layout(&name)
                        .ok_or_else(|| Error::MissingSymbol { name: name.clone() })?
                        .fields
                        .len();
                    let r = self.heap.alloc_struct(name, vec![Value::Null; field_count]);
                    push(&mut stack, Value::Ref(r))?;
                }
                Opcode::GetField => {
                    let struct_name = read_string(&code, &mut pc)?;
                    let field = read_string(&code, &mut pc)?;
                    let base = pop_ref(&mut stack)?;
                    let idx = self.field_index(&struct_name, &field)?;
                    let v = match self.heap.get(base)? {
                        HeapObject::Struct { fields, .. } => *fields.get(idx).ok_or_else(|| {
                            Error::fault(format!("field index {idx} out of range for {struct_name}"))
                        })?,
                        _ => return Err(Error::fault("get_field of a non-struct reference")),
                    };
                    push(&mut stack, v)?;
                }
                Opcode::SetField => {
                    let struct_name = read_string(&code, &mut pc)?;
                    let field = read_string(&code, &mut pc)?;
                    let value = pop(&mut stack)?;
                    let base = pop_ref(&mut stack)?;
                    let idx = self.field_index(&struct_name, &field)?;
                    match self.heap.get_mut(base)? {
                        HeapObject::Struct { fields, .. } => {
                            let slot = fields.get_mut(idx).ok_or_else(|| {
                                Error::fault(format!(
                                    "field index {idx} out of range for {struct_name}"
                                ))
                            })?;
                            *slot = value;
                        }
                        _ => return Err(Error::fault("set_field of a non-struct reference")),
                    }
                }

                Opcode::Jmp => {
                    let target = read_u32(&code, &mut pc)? as usize;
                    pc = target;
                }
                Opcode::Jnz => {
                    let then_target = read_u32(&code, &mut pc)? as usize;
                    let else_target = read_u32(&code, &mut pc)? as usize;
                    let cond = pop(&mut stack)?;
                    pc = if cond.truthy() { then_target } else { else_target };
                }
                Opcode::Ret => {
                    let v = pop(&mut stack)?;
                    return Ok(Some(v));
                }
                Opcode::RetVoid => return Ok(None),

                Opcode::Invoke => {
                    let tag = read_u8(&code, &mut pc)?;
                    let idx = read_u32(&code, &mut pc)? as usize;
                    let (callee_module, callee_export, argc) = self.resolve_invoke(module_key, tag, idx)?;
                    if stack.len() < argc {
                        return Err(Error::StackOverflow {
                            direction: "underflow",
                        });
                    }
                    let call_args = stack.split_off(stack.len() - argc);
                    let result = self.exec_function(&callee_module, &callee_export, call_args)?;
                    if let Some(v) = result {
                        push(&mut stack, v)?;
                    }
                }

                Opcode::CastI32ToF32 => {
                    let v = pop(&mut stack)?
                        .as_i32()
                        .ok_or_else(|| Error::fault("cast i32_to_f32 of a non-i32 value"))?;
                    push(&mut stack, Value::F32(v as f32))?;
                }
                Opcode::CastF32ToI32 => {
                    let v = pop(&mut stack)?
                        .as_f32()
                        .ok_or_else(|| Error::fault("cast f32_to_i32 of a non-f32 value"))?;
                    push(&mut stack, Value::I32(v as i32))?;
                }
                Opcode::CheckCast => {
                    let ty = decode_type_inline(&code, &mut pc)?;
                    let top = *stack.last().ok_or(Error::StackOverflow {
                        direction: "underflow",
                    })?;
                    self.check_cast(top, &ty)?;
                }
            }
        }
    }

    fn alloc_array_of(&mut self, elem_ty: &Type, len: usize) -> Ref {
        let fill = match elem_ty {
            Type::F32 => Value::F32(0.0),
            Type::I32 => Value::I32(0),
            _ => Value::Null,
        };
        self.heap.alloc_array(elem_ty.is_reference(), vec![fill; len])
    }

    fn field_index(&self, struct_name: &str, field: &str) -> Result<usize> {
        let layout = self
            .heap
            .layout(struct_name)
            .ok_or_else(|| Error::MissingSymbol {
                name: struct_name.to_string(),
            })?;
        layout
            .fields
            .iter()
            .position(|(name, _)| name == field)
            .ok_or_else(|| Error::MissingSymbol {
                name: format!("{struct_name}.{field}"),
            })
    }

    fn resolve_invoke(
        &self,
        module_key: &str,
        tag: u8,
        idx: usize,
    ) -> Result<(String, ExportEntry, usize)> {
        let module = &self.modules[module_key];
        match tag {
            0 => {
                let export = module
                    .exports
                    .get(idx)
                    .cloned()
                    .ok_or_else(|| Error::fault(format!("invoke: no local function at index {idx}")))?;
                let argc = match &export.kind {
                    ExportKind::Function { sig, .. } => sig.arg_types.len(),
                    _ => return Err(Error::fault("invoke target is not a function")),
                };
                Ok((module_key.to_string(), export, argc))
            }
            1 => {
                let import = module
                    .imports
                    .get(idx)
                    .ok_or_else(|| Error::fault(format!("invoke: no import at index {idx}")))?;
                let child_key = import.module_path.join("::");
                let child = self
                    .modules
                    .get(&child_key)
                    .ok_or_else(|| Error::MissingSymbol {
                        name: child_key.clone(),
                    })?;
                let export = child
                    .find_export(&import.name)
                    .cloned()
                    .ok_or_else(|| Error::MissingSymbol {
                        name: import.name.clone(),
                    })?;
                let argc = match &export.kind {
                    ExportKind::Function { sig, .. } => sig.arg_types.len(),
                    _ => return Err(Error::fault("invoke target is not a function")),
                };
                Ok((child_key, export, argc))
            }
            _ => Err(Error::InvalidTag {
                tag,
                context: "invoke discriminator".to_string(),
            }),
        }
    }

    fn check_cast(&self, value: Value, ty: &Type) -> Result<()> {
        let r = match value {
            Value::Null => return Ok(()),
            Value::Ref(r) => r,
            _ => {
                return Err(Error::CheckcastFailed {
                    expected: ty.to_string(),
                })
            }
        };
        let matches = match ty {
            Type::Str => matches!(self.heap.get(r)?, HeapObject::Str(_)),
            Type::Array(_) => matches!(self.heap.get(r)?, HeapObject::Array { .. }),
            Type::Struct(name) => {
                matches!(self.heap.get(r)?, HeapObject::Struct { layout, .. } if layout == name)
            }
            _ => false,
        };
        if matches {
            Ok(())
        } else {
            Err(Error::CheckcastFailed {
                expected: ty.to_string(),
            })
        }
    }
}

fn push(stack: &mut Vec<Value>, v: Value) -> Result<()> {
    if stack.len() >= MAX_OPERAND_STACK {
        return Err(Error::StackOverflow { direction: "overflow" });
    }
    stack.push(v);
    Ok(())
}

fn pop(stack: &mut Vec<Value>) -> Result<Value> {
    stack.pop().ok_or(Error::StackOverflow {
        direction: "underflow",
    })
}

fn pop_ref(stack: &mut Vec<Value>) -> Result<Ref> {
    match pop(stack)? {
        Value::Ref(r) => Ok(r),
        Value::Null => Err(Error::NullDereference),
        _ => Err(Error::fault("expected a reference value")),
    }
}

fn arith(opcode: Opcode, lhs: Value, rhs: Value) -> Result<Value> {
    match (lhs, rhs) {
        (Value::I32(a), Value::I32(b)) => Ok(Value::I32(match opcode {
            Opcode::Add => a.wrapping_add(b),
            Opcode::Sub => a.wrapping_sub(b),
            Opcode::Mul => a.wrapping_mul(b),
            Opcode::Div => {
                if b == 0 {
                    return Err(Error::DivisionByZero);
                }
                a.wrapping_div(b)
            }
            Opcode::Mod => {
                if b == 0 {
                    return Err(Error::DivisionByZero);
                }
                a.wrapping_rem(b)
            }
            _ => unreachable!(),
        })),
        (Value::F32(a), Value::F32(b)) => Ok(Value::F32(match opcode {
            Opcode::Add => a + b,
            Opcode::Sub => a - b,
            Opcode::Mul => a * b,
            Opcode::Div => a / b,
            Opcode::Mod => a % b,
            _ => unreachable!(),
        })),
        _ => Err(Error::fault("arithmetic operand type mismatch")),
    }
}

fn bitwise(opcode: Opcode, lhs: Value, rhs: Value) -> Result<Value> {
    let (a, b) = match (lhs, rhs) {
        (Value::I32(a), Value::I32(b)) => (a, b),
        _ => return Err(Error::fault("bitwise/logical operand must be i32")),
    };
    Ok(Value::I32(match opcode {
        Opcode::Shl => a << (b & 31),
        Opcode::Shr => a >> (b & 31),
        Opcode::And => a & b,
        Opcode::Xor => a ^ b,
        Opcode::Or => a | b,
        Opcode::LAnd => {
            if a != 0 && b != 0 {
                1
            } else {
                0
            }
        }
        Opcode::LOr => {
            if a != 0 || b != 0 {
                1
            } else {
                0
            }
        }
        _ => unreachable!(),
    }))
}

fn compare(opcode: Opcode, lhs: Value, rhs: Value) -> Result<bool> {
    match (lhs, rhs) {
        (Value::I32(a), Value::I32(b)) => Ok(match opcode {
            Opcode::CmpL => a < b,
            Opcode::CmpLe => a <= b,
            Opcode::CmpG => a > b,
            Opcode::CmpGe => a >= b,
            Opcode::CmpEq => a == b,
            Opcode::CmpNe => a != b,
            _ => unreachable!(),
        }),
        (Value::F32(a), Value::F32(b)) => Ok(match opcode {
            Opcode::CmpL => a < b,
            Opcode::CmpLe => a <= b,
            Opcode::CmpG => a > b,
            Opcode::CmpGe => a >= b,
            Opcode::CmpEq => a == b,
            Opcode::CmpNe => a != b,
            _ => unreachable!(),
        }),
        (Value::Ref(a), Value::Ref(b)) => match opcode {
            Opcode::CmpEq => Ok(a == b),
            Opcode::CmpNe => Ok(a != b),
            _ => Err(Error::fault("relational comparison of reference values")),
        },
        (Value::Null, Value::Null) => match opcode {
            Opcode::CmpEq => Ok(true),
            Opcode::CmpNe => Ok(false),
            _ => Err(Error::fault("relational comparison of null")),
        },
        (Value::Null, Value::Ref(_)) | (Value::Ref(_), Value::Null) => match opcode {
            Opcode::CmpEq => Ok(false),
            Opcode::CmpNe => Ok(true),
            _ => Err(Error::fault("relational comparison of null")),
        },
        _ => Err(Error::fault("comparison operand type mismatch")),
    }
}

fn read_u8(code: &[u8], pc: &mut usize) -> Result<u8> {
    let b = *code.get(*pc).ok_or(Error::TruncatedStream {
        context: "opcode operand byte".to_string(),
    })?;
    *pc += 1;
    Ok(b)
}

fn read_u32(code: &[u8], pc: &mut usize) -> Result<u32> {
    let bytes = code.get(*pc..*pc + 4).ok_or(Error::TruncatedStream {
        context: "opcode u32 operand".to_string(),
    })?;
    *pc += 4;
    Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
}

/// Strings inside the code segment use the same VLE-length-prefixed codec as
/// the archive format; `archive::Reader` is reused here rather than
/// reimplementing it, positioned at each read via a fresh slice view.
fn read_string(code: &[u8], pc: &mut usize) -> Result<String> {
    let mut reader = Reader::new(&code[*pc..]);
    let s = reader.read_string()?;
    *pc += (code.len() - *pc) - reader.remaining().len();
    Ok(s)
}

fn decode_type_inline(code: &[u8], pc: &mut usize) -> Result<Type> {
    let tag = read_u8(code, pc)?;
    Ok(match tag {
        0 => Type::Void,
        1 => Type::I32,
        2 => Type::F32,
        3 => Type::Str,
        4 => Type::Null,
        5 => Type::Array(Box::new(decode_type_inline(code, pc)?)),
        6 => Type::Struct(read_string(code, pc)?),
        _ => {
            return Err(Error::InvalidTag {
                tag,
                context: "inline Type operand".to_string(),
            })
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{self, BasicBlock, Function, Program};
    use crate::module;
    use crate::resolver::EmptyLoader;

    fn compile(program: Program) -> CompiledModule {
        module::emit(&program).unwrap()
    }

    #[test]
    fn adds_two_constants_and_returns() {
        let mut entry = BasicBlock::new("entry");
        entry.instructions.push(ir::Instruction::ConstI32(2));
        entry.instructions.push(ir::Instruction::ConstI32(3));
        entry.instructions.push(ir::Instruction::Add);
        entry.instructions.push(ir::Instruction::Ret);
        let function = Function {
            name: "main".to_string(),
            return_type: Type::I32,
            params: vec![],
            locals: vec![],
            blocks: vec![entry],
            entry_label: "entry".to_string(),
            native_lib: None,
        };
        let compiled = compile(Program {
            functions: vec![function],
            ..Program::default()
        });
        let mut interp = Interpreter::load(compiled, &EmptyLoader).unwrap();
        let result = interp.run("main", vec![]).unwrap();
        assert_eq!(result, Some(Value::I32(5)));
        assert_eq!(interp.live_object_count(), 0);
    }

    #[test]
    fn array_alloc_store_load_roundtrips() {
        let mut entry = BasicBlock::new("entry");
        // newarray i32[3]; dup; const 1; const 42; store_element; const 1; load_element; ret
        entry.instructions.push(ir::Instruction::ConstI32(3));
        entry
            .instructions
            .push(ir::Instruction::NewArray(Type::I32));
        entry.instructions.push(ir::Instruction::Dup);
        entry.instructions.push(ir::Instruction::ConstI32(1));
        entry.instructions.push(ir::Instruction::ConstI32(42));
        entry.instructions.push(ir::Instruction::StoreElement);
        entry.instructions.push(ir::Instruction::ConstI32(1));
        entry.instructions.push(ir::Instruction::LoadElement);
        entry.instructions.push(ir::Instruction::Ret);
        let function = Function {
            name: "main".to_string(),
            return_type: Type::I32,
            params: vec![],
            locals: vec![],
            blocks: vec![entry],
            entry_label: "entry".to_string(),
            native_lib: None,
        };
        let compiled = compile(Program {
            functions: vec![function],
            ..Program::default()
        });
        let mut interp = Interpreter::load(compiled, &EmptyLoader).unwrap();
        let result = interp.run("main", vec![]).unwrap();
        assert_eq!(result, Some(Value::I32(42)));
    }

    #[test]
    fn division_by_zero_is_a_runtime_error() {
        let mut entry = BasicBlock::new("entry");
        entry.instructions.push(ir::Instruction::ConstI32(1));
        entry.instructions.push(ir::Instruction::ConstI32(0));
        entry.instructions.push(ir::Instruction::Div);
        entry.instructions.push(ir::Instruction::Ret);
        let function = Function {
            name: "main".to_string(),
            return_type: Type::I32,
            params: vec![],
            locals: vec![],
            blocks: vec![entry],
            entry_label: "entry".to_string(),
            native_lib: None,
        };
        let compiled = compile(Program {
            functions: vec![function],
            ..Program::default()
        });
        let mut interp = Interpreter::load(compiled, &EmptyLoader).unwrap();
        let err = interp.run("main", vec![]).unwrap_err();
        assert!(matches!(err, Error::DivisionByZero));
    }

    #[test]
    fn calling_a_native_function_dispatches_through_the_registry() {
        let native_fn = Function {
            name: "sqrt".to_string(),
            return_type: Type::F32,
            params: vec![ir::Local {
                name: "x".to_string(),
                ty: Type::F32,
            }],
            locals: vec![],
            blocks: vec![],
            entry_label: String::new(),
            native_lib: Some("math".to_string()),
        };
        let mut entry = BasicBlock::new("entry");
        entry.instructions.push(ir::Instruction::ConstF32(16.0));
        entry.instructions.push(ir::Instruction::Invoke {
            path: Vec::new(),
            name: "sqrt".to_string(),
        });
        entry.instructions.push(ir::Instruction::Ret);
        let caller = Function {
            name: "main".to_string(),
            return_type: Type::F32,
            params: vec![],
            locals: vec![],
            blocks: vec![entry],
            entry_label: "entry".to_string(),
            native_lib: None,
        };
        let compiled = compile(Program {
            functions: vec![native_fn, caller],
            ..Program::default()
        });
        let mut interp = Interpreter::load(compiled, &EmptyLoader).unwrap();
        let result = interp.run("main", vec![]).unwrap();
        assert_eq!(result, Some(Value::F32(4.0)));
    }

    #[test]
    fn struct_field_roundtrips_through_new_set_get() {
        let layout = ir::StructLayout {
            name: "Point".to_string(),
            fields: vec![("x".to_string(), Type::I32), ("y".to_string(), Type::I32)],
        };
        let mut entry = BasicBlock::new("entry");
        entry.instructions.push(ir::Instruction::New("Point".to_string()));
        entry.instructions.push(ir::Instruction::Dup);
        entry.instructions.push(ir::Instruction::ConstI32(7));
        entry.instructions.push(ir::Instruction::SetField {
            struct_name: "Point".to_string(),
            field: "x".to_string(),
        });
        entry.instructions.push(ir::Instruction::GetField {
            struct_name: "Point".to_string(),
            field: "x".to_string(),
        });
        entry.instructions.push(ir::Instruction::Ret);
        let function = Function {
            name: "main".to_string(),
            return_type: Type::I32,
            params: vec![],
            locals: vec![],
            blocks: vec![entry],
            entry_label: "entry".to_string(),
            native_lib: None,
        };
        let compiled = compile(Program {
            structs: vec![layout],
            functions: vec![function],
            ..Program::default()
        });
        let mut interp = Interpreter::load(compiled, &EmptyLoader).unwrap();
        let result = interp.run("main", vec![]).unwrap();
        assert_eq!(result, Some(Value::I32(7)));
    }

    #[test]
    fn invoke_recurses_into_a_local_function() {
        let mut callee_entry = BasicBlock::new("entry");
        callee_entry.instructions.push(ir::Instruction::Load(0));
        callee_entry.instructions.push(ir::Instruction::ConstI32(1));
        callee_entry.instructions.push(ir::Instruction::Add);
        callee_entry.instructions.push(ir::Instruction::Ret);
        let callee = Function {
            name: "inc".to_string(),
            return_type: Type::I32,
            params: vec![ir::Local {
                name: "n".to_string(),
                ty: Type::I32,
            }],
            locals: vec![],
            blocks: vec![callee_entry],
            entry_label: "entry".to_string(),
            native_lib: None,
        };
        let mut caller_entry = BasicBlock::new("entry");
        caller_entry.instructions.push(ir::Instruction::ConstI32(41));
        caller_entry.instructions.push(ir::Instruction::Invoke {
            path: Vec::new(),
            name: "inc".to_string(),
        });
        caller_entry.instructions.push(ir::Instruction::Ret);
        let caller = Function {
            name: "main".to_string(),
            return_type: Type::I32,
            params: vec![],
            locals: vec![],
            blocks: vec![caller_entry],
            entry_label: "entry".to_string(),
            native_lib: None,
        };
        let compiled = compile(Program {
            functions: vec![callee, caller],
            ..Program::default()
        });
        let mut interp = Interpreter::load(compiled, &EmptyLoader).unwrap();
        let result = interp.run("main", vec![]).unwrap();
        assert_eq!(result, Some(Value::I32(42)));
    }
}
