//! Walks an [`ir::Program`] and produces a [`CompiledModule`]: resolves jump
//! labels to absolute code-segment byte offsets, assigns each function's
//! body a `(offset, size)` span, and builds the import/export/constant
//! tables.

use crate::error::{Error, Result};
use crate::ir::{self, CastKind, Constant, Instruction, Program};
use crate::module::archive::Writer;
use crate::module::opcode::Opcode;
use crate::types::{FunctionSignature, Type};
use std::collections::HashMap;

use super::{CompiledModule, ExportEntry, ExportKind, ImportEntryKind, ImportTableEntry};

/// A forward jump reference: the byte position (in the global code buffer)
/// of the 4-byte offset operand to patch, and the label it targets.
struct Patch {
    position: usize,
    label: String,
}

/// Emit `program` into a `.cmod`-ready [`CompiledModule`].
pub fn emit(program: &Program) -> Result<CompiledModule> {
    let mut writer = Writer::new();
    let mut exports = Vec::new();

    let imports = program
        .imports
        .iter()
        .map(import_table_entry)
        .collect::<Vec<_>>();

    for function in &program.functions {
        let export = emit_function(&mut writer, function, program)?;
        exports.push(export);
    }

    for s in &program.structs {
        exports.push(ExportEntry {
            name: s.name.clone(),
            kind: ExportKind::Struct(s.fields.clone()),
        });
    }

    let mut constants = program.constants.clone();
    for gc in &program.global_constants {
        let value_index = intern(&mut constants, gc.value.clone());
        exports.push(ExportEntry {
            name: gc.name.clone(),
            kind: ExportKind::Constant {
                ty: gc.ty.clone(),
                value_index,
            },
        });
    }

    Ok(CompiledModule {
        imports,
        exports,
        constants,
        code: writer.buf,
    })
}

fn intern(pool: &mut Vec<Constant>, value: Constant) -> u32 {
    if let Some(idx) = pool.iter().position(|existing| existing == &value) {
        return idx as u32;
    }
    pool.push(value);
    (pool.len() - 1) as u32
}

fn import_table_entry(entry: &ir::ImportEntry) -> ImportTableEntry {
    let kind = match &entry.kind {
        ir::ImportKind::Function(sig) => ImportEntryKind::Function(sig.clone()),
        ir::ImportKind::Struct(fields) => ImportEntryKind::Struct(fields.clone()),
        ir::ImportKind::Constant(ty) => ImportEntryKind::Constant(ty.clone()),
    };
    ImportTableEntry {
        module_path: entry.module_path.clone(),
        name: entry.name.clone(),
        kind,
    }
}

fn emit_function(
    writer: &mut Writer,
    function: &ir::Function,
    program: &Program,
) -> Result<ExportEntry> {
    let sig = FunctionSignature::new(
        function.return_type.clone(),
        function.params.iter().map(|p| p.ty.clone()).collect(),
    );

    if let Some(lib) = &function.native_lib {
        return Ok(ExportEntry {
            name: function.name.clone(),
            kind: ExportKind::Function {
                sig,
                offset: 0,
                size: 0,
                native_lib: Some(lib.clone()),
            },
        });
    }

    let start = writer.buf.len() as u32;
    let mut label_offsets: HashMap<String, u32> = HashMap::new();
    let mut local_patches: Vec<Patch> = Vec::new();

    for block in &function.blocks {
        if block.unreachable {
            continue;
        }
        label_offsets.insert(block.label.clone(), writer.buf.len() as u32);
        for instruction in &block.instructions {
            encode_instruction(writer, instruction, program, &mut local_patches)?;
        }
    }

    for patch in local_patches {
        let target = *label_offsets
            .get(&patch.label)
            .ok_or_else(|| Error::MissingSymbol {
                name: patch.label.clone(),
            })?;
        let bytes = target.to_le_bytes();
        writer.buf[patch.position..patch.position + 4].copy_from_slice(&bytes);
    }

    let end = writer.buf.len() as u32;
    Ok(ExportEntry {
        name: function.name.clone(),
        kind: ExportKind::Function {
            sig,
            offset: start,
            size: end - start,
            native_lib: None,
        },
    })
}

fn write_placeholder_offset(writer: &mut Writer, label: &str, patches: &mut Vec<Patch>) {
    patches.push(Patch {
        position: writer.buf.len(),
        label: label.to_string(),
    });
    writer.write_u32(0);
}

fn encode_instruction(
    writer: &mut Writer,
    instruction: &Instruction,
    program: &Program,
    patches: &mut Vec<Patch>,
) -> Result<()> {
    match instruction {
        Instruction::ConstI32(v) => {
            writer.write_u8(Opcode::ConstI32 as u8);
            writer.write_u32(*v as u32);
        }
        Instruction::ConstF32(v) => {
            writer.write_u8(Opcode::ConstF32 as u8);
            writer.write_u32(v.to_bits());
        }
        Instruction::ConstStr(idx) => {
            writer.write_u8(Opcode::ConstStr as u8);
            writer.write_u32(*idx);
        }
        Instruction::ConstNull => writer.write_u8(Opcode::ConstNull as u8),

        Instruction::Load(slot) => {
            writer.write_u8(Opcode::Load as u8);
            writer.write_u32(*slot);
        }
        Instruction::Store(slot) => {
            writer.write_u8(Opcode::Store as u8);
            writer.write_u32(*slot);
        }

        Instruction::Dup => writer.write_u8(Opcode::Dup as u8),
        Instruction::DupX1 => writer.write_u8(Opcode::DupX1 as u8),
        Instruction::DupX2 => writer.write_u8(Opcode::DupX2 as u8),
        Instruction::Dup2X0 => writer.write_u8(Opcode::Dup2X0 as u8),
        Instruction::Pop => writer.write_u8(Opcode::Pop as u8),

        Instruction::Add => writer.write_u8(Opcode::Add as u8),
        Instruction::Sub => writer.write_u8(Opcode::Sub as u8),
        Instruction::Mul => writer.write_u8(Opcode::Mul as u8),
        Instruction::Div => writer.write_u8(Opcode::Div as u8),
        Instruction::Mod => writer.write_u8(Opcode::Mod as u8),
        Instruction::Shl => writer.write_u8(Opcode::Shl as u8),
        Instruction::Shr => writer.write_u8(Opcode::Shr as u8),
        Instruction::And => writer.write_u8(Opcode::And as u8),
        Instruction::Xor => writer.write_u8(Opcode::Xor as u8),
        Instruction::Or => writer.write_u8(Opcode::Or as u8),
        Instruction::LAnd => writer.write_u8(Opcode::LAnd as u8),
        Instruction::LOr => writer.write_u8(Opcode::LOr as u8),

        Instruction::CmpL => writer.write_u8(Opcode::CmpL as u8),
        Instruction::CmpLe => writer.write_u8(Opcode::CmpLe as u8),
        Instruction::CmpG => writer.write_u8(Opcode::CmpG as u8),
        Instruction::CmpGe => writer.write_u8(Opcode::CmpGe as u8),
        Instruction::CmpEq => writer.write_u8(Opcode::CmpEq as u8),
        Instruction::CmpNe => writer.write_u8(Opcode::CmpNe as u8),

        Instruction::NewArray(ty) => {
            writer.write_u8(Opcode::NewArray as u8);
            encode_type(writer, ty);
        }
        Instruction::ANewArray(name) => {
            writer.write_u8(Opcode::ANewArray as u8);
            writer.write_string(name);
        }
        Instruction::ArrayLength => writer.write_u8(Opcode::ArrayLength as u8),
        Instruction::LoadElement => writer.write_u8(Opcode::LoadElement as u8),
        Instruction::StoreElement => writer.write_u8(Opcode::StoreElement as u8),

        Instruction::New(name) => {
            writer.write_u8(Opcode::New as u8);
            writer.write_string(name);
        }
        Instruction::GetField { struct_name, field } => {
            writer.write_u8(Opcode::GetField as u8);
            writer.write_string(struct_name);
            writer.write_string(field);
        }
        Instruction::SetField { struct_name, field } => {
            writer.write_u8(Opcode::SetField as u8);
            writer.write_string(struct_name);
            writer.write_string(field);
        }

        Instruction::Jmp(label) => {
            writer.write_u8(Opcode::Jmp as u8);
            write_placeholder_offset(writer, label, patches);
        }
        Instruction::Jnz(then_label, else_label) => {
            writer.write_u8(Opcode::Jnz as u8);
            write_placeholder_offset(writer, then_label, patches);
            write_placeholder_offset(writer, else_label, patches);
        }
        Instruction::Ret => writer.write_u8(Opcode::Ret as u8),
        Instruction::RetVoid => writer.write_u8(Opcode::RetVoid as u8),

        Instruction::Invoke { path, name } => {
            writer.write_u8(Opcode::Invoke as u8);
            if path.is_empty() {
                let idx = program
                    .functions
                    .iter()
                    .position(|f| &f.name == name)
                    .ok_or_else(|| Error::MissingSymbol { name: name.clone() })?;
                writer.write_u8(0);
                writer.write_u32(idx as u32);
            } else {
                let idx = program
                    .imports
                    .iter()
                    .position(|i| &i.module_path == path && &i.name == name)
                    .ok_or_else(|| Error::MissingSymbol {
                        name: format!("{}::{}", path.join("::"), name),
                    })?;
                writer.write_u8(1);
                writer.write_u32(idx as u32);
            }
        }

        Instruction::Cast(CastKind::I32ToF32) => writer.write_u8(Opcode::CastI32ToF32 as u8),
        Instruction::Cast(CastKind::F32ToI32) => writer.write_u8(Opcode::CastF32ToI32 as u8),
        Instruction::CheckCast(ty) => {
            writer.write_u8(Opcode::CheckCast as u8);
            encode_type(writer, ty);
        }
    }
    Ok(())
}

fn encode_type(writer: &mut Writer, ty: &Type) {
    match ty {
        Type::Void => writer.write_u8(0),
        Type::I32 => writer.write_u8(1),
        Type::F32 => writer.write_u8(2),
        Type::Str => writer.write_u8(3),
        Type::Null => writer.write_u8(4),
        Type::Array(inner) => {
            writer.write_u8(5);
            encode_type(writer, inner);
        }
        Type::Struct(name) => {
            writer.write_u8(6);
            writer.write_string(name);
        }
        Type::Function(_) | Type::Unresolved(_) => writer.write_u8(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BasicBlock, Function, Local};

    fn sample_function() -> Function {
        let mut entry = BasicBlock::new("entry");
        entry.instructions.push(Instruction::ConstI32(1));
        entry.instructions.push(Instruction::Jmp("done".to_string()));
        let mut done = BasicBlock::new("done");
        done.instructions.push(Instruction::Ret);
        Function {
            name: "main".to_string(),
            return_type: Type::I32,
            params: vec![],
            locals: vec![Local {
                name: "x".to_string(),
                ty: Type::I32,
            }],
            blocks: vec![entry, done],
            entry_label: "entry".to_string(),
            native_lib: None,
        }
    }

    #[test]
    fn jump_is_patched_to_absolute_offset() {
        let program = Program {
            functions: vec![sample_function()],
            ..Program::default()
        };
        let compiled = emit(&program).unwrap();
        assert_eq!(compiled.exports.len(), 1);
        match &compiled.exports[0].kind {
            ExportKind::Function { offset, size, .. } => {
                assert_eq!(*offset, 0);
                assert!(*size > 0);
            }
            _ => panic!("expected a function export"),
        }
        // ConstI32 opcode + 4 bytes, Jmp opcode + 4 byte offset: the Jmp's
        // offset operand must point past the Jmp instruction itself.
        let jmp_offset_pos = 1 + 4 + 1;
        let patched = u32::from_le_bytes(
            compiled.code[jmp_offset_pos..jmp_offset_pos + 4]
                .try_into()
                .unwrap(),
        );
        assert_eq!(patched, 10); // entry block is 10 bytes, done starts right after
    }

    #[test]
    fn native_function_has_zero_size_export() {
        let mut f = sample_function();
        f.native_lib = Some("libm".to_string());
        f.blocks.clear();
        let program = Program {
            functions: vec![f],
            ..Program::default()
        };
        let compiled = emit(&program).unwrap();
        match &compiled.exports[0].kind {
            ExportKind::Function {
                size, native_lib, ..
            } => {
                assert_eq!(*size, 0);
                assert_eq!(native_lib.as_deref(), Some("libm"));
            }
            _ => panic!("expected a function export"),
        }
    }
}
