//! The `.cmod` binary module format: the compiled artifact a source file
//! lowers to, and the thing the resolver reads back in for a foreign import.
//!
//! A module is an import table, an export table, a constant pool and a flat
//! code segment. [`archive`] handles the byte-level codec, [`emitter`] builds
//! a [`CompiledModule`] from an [`crate::ir::Program`], and [`opcode`] is the
//! byte-level tag set the code segment is written in.

pub mod archive;
pub mod disasm;
pub mod emitter;
pub mod opcode;

use crate::types::{FunctionSignature, Type};

/// What a foreign symbol named in the import table resolves to.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportEntryKind {
    Function(FunctionSignature),
    Struct(Vec<(String, Type)>),
    Constant(Type),
}

/// One import-table entry: a foreign module path plus the symbol borrowed
/// from it.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportTableEntry {
    pub module_path: Vec<String>,
    pub name: String,
    pub kind: ImportEntryKind,
}

/// What an export-table entry makes visible to importers.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportKind {
    /// A function. `offset`/`size` locate its body in the code segment;
    /// `native_lib` is `Some` for a function with no emitted body.
    Function {
        sig: FunctionSignature,
        offset: u32,
        size: u32,
        native_lib: Option<String>,
    },
    Struct(Vec<(String, Type)>),
    /// A top-level `const`. `value_index` indexes the module's constant pool.
    Constant { ty: Type, value_index: u32 },
}

/// One export-table entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportEntry {
    pub name: String,
    pub kind: ExportKind,
}

/// A fully emitted module, ready to be archived to bytes or loaded by the
/// interpreter.
#[derive(Debug, Clone, Default)]
pub struct CompiledModule {
    pub imports: Vec<ImportTableEntry>,
    pub exports: Vec<ExportEntry>,
    pub constants: Vec<crate::ir::Constant>,
    pub code: Vec<u8>,
}

impl CompiledModule {
    /// Find an export by name.
    pub fn find_export(&self, name: &str) -> Option<&ExportEntry> {
        self.exports.iter().find(|e| e.name == name)
    }
}

/// Run the emitter over `program`, producing a [`CompiledModule`].
pub fn emit(program: &crate::ir::Program) -> crate::error::Result<CompiledModule> {
    emitter::emit(program)
}
