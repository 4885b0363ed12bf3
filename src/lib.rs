//! Slang: a small statically typed scripting language compiled to a
//! stack-based bytecode and executed by a tracing-GC interpreter.
//!
//! The pipeline mirrors the on-disk module layout: [`lexer`] and [`parser`]
//! build an [`ast::Module`]; [`resolver`] and [`macros`] expand imports and
//! macro invocations over it; [`typeck`] checks it in place; [`codegen`]
//! lowers it to [`ir`]; [`module`] serializes the result to the `.cmod`
//! binary format that [`vm`] loads and executes.

pub mod ast;
pub mod codegen;
pub mod directive;
pub mod error;
pub mod ir;
pub mod lexer;
pub mod macros;
pub mod module;
pub mod parser;
pub mod pkg;
pub mod resolver;
pub mod source;
pub mod typeck;
pub mod types;
pub mod vm;

pub use error::{Error, Result};

use std::path::Path;

/// Compile a single source string into an unresolved [`ast::Module`],
/// running the lexer and parser only — no import resolution, macro
/// expansion or type checking.
pub fn parse_source(source: &str) -> Result<ast::Module> {
    let tokens = lexer::Scanner::new(source).scan_all()?;
    parser::Parser::new(tokens).parse_module()
}

/// Compile a module's full source text down to a binary `.cmod` image,
/// running the whole front end: parse, resolve imports, expand macros,
/// type-check, generate IR, and emit.
///
/// `module_name` is the dotted name this module is known by to `resolver`
/// (used for diagnostics and to seed the import graph's root).
///
/// `fold_constants` controls the codegen's constant-folding pass; pass
/// `false` for `--no-eval-const-subexpr`.
pub fn compile_source(
    source: &str,
    module_name: &str,
    loader: &dyn resolver::ModuleLoader,
    fold_constants: bool,
) -> Result<module::CompiledModule> {
    let ast = parse_source(source)?;
    let resolved = resolver::resolve(ast, module_name, loader)?;
    let expanded = macros::expand(resolved)?;
    let checked = typeck::check(expanded)?;
    let program = codegen::generate(&checked, fold_constants)?;
    module::emit(&program)
}

/// Compile a source file at `path` and write the resulting `.cmod` image to
/// `out_path`.
pub fn compile_file(
    path: &Path,
    out_path: &Path,
    loader: &dyn resolver::ModuleLoader,
    fold_constants: bool,
) -> Result<()> {
    let source = std::fs::read_to_string(path).map_err(|e| Error::fault(e.to_string()))?;
    let module_name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("main")
        .to_string();
    let compiled = compile_source(&source, &module_name, loader, fold_constants)?;
    let bytes = module::archive::encode_module(&compiled)?;
    std::fs::write(out_path, bytes).map_err(|e| Error::fault(e.to_string()))
}
