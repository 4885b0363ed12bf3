//! Text disassembly of a compiled module's code segment, for `exec
//! --disasm`. A small standalone decoder mirroring the interpreter's, since
//! a disassembler only ever reads a function's own span and never executes
//! a jump.

use super::{CompiledModule, ExportKind};
use crate::module::archive::Reader;
use crate::module::opcode::Opcode;
use std::fmt::Write as _;

/// Render every function export's bytecode as a human-readable listing.
pub fn disassemble(module: &CompiledModule) -> String {
    let mut out = String::new();
    for export in &module.exports {
        let ExportKind::Function {
            sig,
            offset,
            size,
            native_lib,
        } = &export.kind
        else {
            continue;
        };
        let _ = writeln!(out, "fn {} {}", export.name, sig.return_type);
        if let Some(lib) = native_lib {
            let _ = writeln!(out, "  <native: {lib}>");
            continue;
        }
        let start = *offset as usize;
        let end = start + *size as usize;
        let mut pc = start;
        while pc < end {
            let instr_offset = pc - start;
            let tag = module.code[pc];
            pc += 1;
            let Some(opcode) = Opcode::from_u8(tag) else {
                let _ = writeln!(out, "  {instr_offset:04}: <bad opcode {tag:#04x}>");
                break;
            };
            let operands = decode_operands(module, opcode, &mut pc);
            let _ = writeln!(out, "  {instr_offset:04}: {opcode:?} {operands}");
        }
    }
    out
}

fn decode_operands(module: &CompiledModule, opcode: Opcode, pc: &mut usize) -> String {
    let code = &module.code;
    match opcode {
        Opcode::ConstI32 => format!("{}", read_u32(code, pc) as i32),
        Opcode::ConstF32 => format!("{}", f32::from_bits(read_u32(code, pc))),
        Opcode::ConstStr => format!("#{}", read_u32(code, pc)),
        Opcode::Load | Opcode::Store => format!("slot {}", read_u32(code, pc)),
        Opcode::NewArray | Opcode::CheckCast => format!("{:?}", decode_type(code, pc)),
        Opcode::ANewArray | Opcode::New => read_string(code, pc),
        Opcode::GetField | Opcode::SetField => {
            let struct_name = read_string(code, pc);
            let field = read_string(code, pc);
            format!("{struct_name}.{field}")
        }
        Opcode::Jmp => format!("-> {}", read_u32(code, pc)),
        Opcode::Jnz => {
            let then_target = read_u32(code, pc);
            let else_target = read_u32(code, pc);
            format!("-> {then_target} : {else_target}")
        }
        Opcode::Invoke => {
            let tag = code[*pc];
            *pc += 1;
            let idx = read_u32(code, pc);
            match tag {
                0 => format!("local #{idx}"),
                1 => format!("import #{idx}"),
                _ => format!("<bad invoke tag {tag}>"),
            }
        }
        _ => String::new(),
    }
}

fn read_u32(code: &[u8], pc: &mut usize) -> u32 {
    let v = u32::from_le_bytes(code[*pc..*pc + 4].try_into().unwrap());
    *pc += 4;
    v
}

fn read_string(code: &[u8], pc: &mut usize) -> String {
    let mut reader = Reader::new(&code[*pc..]);
    let s = reader.read_string().unwrap_or_default();
    *pc += (code.len() - *pc) - reader.remaining().len();
    s
}

fn decode_type(code: &[u8], pc: &mut usize) -> crate::types::Type {
    use crate::types::Type;
    let tag = code[*pc];
    *pc += 1;
    match tag {
        0 => Type::Void,
        1 => Type::I32,
        2 => Type::F32,
        3 => Type::Str,
        4 => Type::Null,
        5 => Type::Array(Box::new(decode_type(code, pc))),
        6 => Type::Struct(read_string(code, pc)),
        _ => Type::Void,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BasicBlock, Function, Instruction, Program};
    use crate::module;
    use crate::types::Type;

    #[test]
    fn disassembly_lists_every_instruction() {
        let mut entry = BasicBlock::new("entry");
        entry.instructions.push(Instruction::ConstI32(7));
        entry.instructions.push(Instruction::Ret);
        let function = Function {
            name: "main".to_string(),
            return_type: Type::I32,
            params: vec![],
            locals: vec![],
            blocks: vec![entry],
            entry_label: "entry".to_string(),
            native_lib: None,
        };
        let program = Program {
            functions: vec![function],
            ..Program::default()
        };
        let compiled = module::emit(&program).unwrap();
        let text = disassemble(&compiled);
        assert!(text.contains("fn main"));
        assert!(text.contains("ConstI32 7"));
        assert!(text.contains("Ret"));
    }
}
