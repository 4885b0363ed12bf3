//! The import resolver: turns `import pkg::path;` items into foreign-symbol
//! tables the type checker and codegen can reference without re-parsing the
//! foreign module's source.

use crate::ast::{ItemKind, Module};
use crate::error::{Error, Result};
use crate::module::archive;
use crate::types::{FunctionSignature, Type};
use std::collections::{HashMap, HashSet};

/// Host hook asked for a module's compiled bytes by its dotted path.
/// Resolution only ever consumes already-compiled peers: the host (the
/// `pkg`-aware CLI, typically) is responsible for having built them first.
pub trait ModuleLoader {
    /// Return the compiled `.cmod` bytes for the module named by `path`.
    fn load(&self, path: &[String]) -> Result<Vec<u8>>;
}

/// A loader with no modules; importing anything fails. Useful for compiling
/// single, import-free scripts.
#[derive(Debug, Default)]
pub struct EmptyLoader;

impl ModuleLoader for EmptyLoader {
    fn load(&self, path: &[String]) -> Result<Vec<u8>> {
        Err(Error::MissingSymbol {
            name: path.join("::"),
        })
    }
}

/// The foreign symbols one `import` brought into scope.
#[derive(Debug, Clone, Default)]
pub struct ResolvedImport {
    pub path: Vec<String>,
    pub functions: HashMap<String, FunctionSignature>,
    pub structs: HashMap<String, Vec<(String, Type)>>,
    pub constants: HashMap<String, Type>,
}

/// A module and the foreign symbol tables its imports resolved to.
pub struct ResolvedModule {
    pub module: Module,
    pub imports: Vec<ResolvedImport>,
}

/// Resolve every `import` item in `module`. `module_name` is this module's
/// own dotted name, used only to reject a direct self-import.
pub fn resolve(module: Module, module_name: &str, loader: &dyn ModuleLoader) -> Result<ResolvedModule> {
    let mut imports = Vec::new();
    let mut seen = HashSet::new();

    for item in &module.items {
        let ItemKind::Import { path } = &item.kind else {
            continue;
        };
        let joined = path.join("::");
        if joined == module_name {
            return Err(Error::RecursiveImport { name: joined });
        }
        if !seen.insert(joined) {
            continue; // diamond import: idempotent
        }
        let bytes = loader.load(path)?;
        let compiled = archive::decode_module(&bytes)?;
        imports.push(resolved_import_from_compiled(path.clone(), &compiled));
    }

    Ok(ResolvedModule { module, imports })
}

fn resolved_import_from_compiled(
    path: Vec<String>,
    compiled: &crate::module::CompiledModule,
) -> ResolvedImport {
    let mut functions = HashMap::new();
    let mut structs = HashMap::new();
    let mut constants = HashMap::new();

    for export in &compiled.exports {
        match &export.kind {
            crate::module::ExportKind::Function { sig, .. } => {
                functions.insert(export.name.clone(), sig.clone());
            }
            crate::module::ExportKind::Struct(fields) => {
                structs.insert(export.name.clone(), fields.clone());
            }
            crate::module::ExportKind::Constant { ty, .. } => {
                constants.insert(export.name.clone(), ty.clone());
            }
        }
    }

    ResolvedImport {
        path,
        functions,
        structs,
        constants,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_import_is_recursive() {
        let module = crate::parse_source("import self;").unwrap();
        let err = resolve(module, "self", &EmptyLoader).unwrap_err();
        assert!(matches!(err, Error::RecursiveImport { .. }));
    }

    #[test]
    fn diamond_import_is_idempotent() {
        let module = crate::parse_source("import a::b; import a::b;").unwrap();
        // Both imports target the same missing module; the loader is only
        // consulted once because the second import is deduplicated first.
        struct CountingLoader(std::cell::Cell<u32>);
        impl ModuleLoader for CountingLoader {
            fn load(&self, _path: &[String]) -> Result<Vec<u8>> {
                self.0.set(self.0.get() + 1);
                Err(Error::MissingSymbol {
                    name: "a::b".to_string(),
                })
            }
        }
        let loader = CountingLoader(std::cell::Cell::new(0));
        let _ = resolve(module, "main", &loader);
        assert_eq!(loader.0.get(), 1);
    }
}
