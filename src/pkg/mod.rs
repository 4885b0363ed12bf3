//! The package manager: a directory-based store of source and compiled
//! modules, one subdirectory per package, each holding `*.sl` source and
//! `*.cmod` compiled files.

use crate::error::{Error, Result};
use crate::resolver::ModuleLoader;
use std::fs;
use std::path::{Path, PathBuf};

/// Package names a plain `pkg remove` refuses to touch without `--protected`.
const PROTECTED_PACKAGES: &[&str] = &["std"];

/// A directory-based package store rooted at one directory.
///
/// Package names are `::`-separated, e.g. `std::utils`, and map to nested
/// subdirectories (`<root>/std/utils`), mirroring the module path the
/// resolver already uses for imports.
pub struct PackageStore {
    root: PathBuf,
}

/// A package name consists of one or more `::`-separated identifiers, each
/// starting with a letter or `_` and continuing with alphanumerics or `_`.
pub fn is_valid_package_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    name.split("::").all(|part| {
        let mut chars = part.chars();
        match chars.next() {
            Some(c) if c.is_alphabetic() || c == '_' => {}
            _ => return false,
        }
        chars.all(|c| c.is_alphanumeric() || c == '_')
    })
}

fn package_dir(root: &Path, name: &str) -> PathBuf {
    name.split("::").fold(root.to_path_buf(), |dir, part| dir.join(part))
}

/// Summary of one package directory's contents.
#[derive(Debug, Clone)]
pub struct PackageInfo {
    pub name: String,
    pub source_files: Vec<String>,
    pub compiled_files: Vec<String>,
}

impl PackageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        PackageStore { root: root.into() }
    }

    /// `SLANG_PKG_ROOT` if set, else `~/.slang/packages`.
    pub fn default_root() -> PathBuf {
        if let Ok(root) = std::env::var("SLANG_PKG_ROOT") {
            return PathBuf::from(root);
        }
        home_dir().join(".slang").join("packages")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create an empty package directory. Fails if it already exists or the
    /// name is not a valid `::`-separated package identifier.
    pub fn create(&self, name: &str) -> Result<()> {
        if !is_valid_package_name(name) {
            return Err(Error::fault(format!("'{name}' is not a valid package name")));
        }
        let dir = package_dir(&self.root, name);
        if dir.exists() {
            return Err(Error::fault(format!("package '{name}' already exists")));
        }
        fs::create_dir_all(&dir).map_err(|e| Error::fault(e.to_string()))?;
        tracing::info!(package = name, path = %dir.display(), "created package");
        Ok(())
    }

    /// Remove a package directory. Protected packages (`std`) require
    /// `protected = true`.
    pub fn remove(&self, name: &str, protected: bool) -> Result<()> {
        if !is_valid_package_name(name) {
            return Err(Error::fault(format!("'{name}' is not a valid package name")));
        }
        if PROTECTED_PACKAGES.contains(&name) && !protected {
            return Err(Error::fault(format!(
                "refusing to remove protected package '{name}' without --protected"
            )));
        }
        let dir = package_dir(&self.root, name);
        if !dir.exists() {
            return Err(Error::fault(format!("no such package '{name}'")));
        }
        fs::remove_dir_all(&dir).map_err(|e| Error::fault(e.to_string()))?;
        tracing::info!(package = name, "removed package");
        Ok(())
    }

    /// List every package directory, alphabetically by dotted name. `all`
    /// also descends into and lists nested sub-packages; without it, only
    /// the top-level packages are listed.
    pub fn list(&self, all: bool) -> Result<Vec<PackageInfo>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut packages = Vec::new();
        self.collect_packages(&self.root, "", all, &mut packages)?;
        packages.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(packages)
    }

    fn collect_packages(
        &self,
        dir: &Path,
        prefix: &str,
        recurse: bool,
        out: &mut Vec<PackageInfo>,
    ) -> Result<()> {
        for entry in fs::read_dir(dir).map_err(|e| Error::fault(e.to_string()))? {
            let entry = entry.map_err(|e| Error::fault(e.to_string()))?;
            let is_dir = entry
                .file_type()
                .map_err(|e| Error::fault(e.to_string()))?
                .is_dir();
            if !is_dir {
                continue;
            }
            let part = entry.file_name().to_string_lossy().into_owned();
            let name = if prefix.is_empty() {
                part
            } else {
                format!("{prefix}::{part}")
            };
            out.push(self.info_for(&name)?);
            if recurse {
                self.collect_packages(&entry.path(), &name, recurse, out)?;
            }
        }
        Ok(())
    }

    /// Describe one package's contents.
    pub fn info_for(&self, name: &str) -> Result<PackageInfo> {
        let dir = package_dir(&self.root, name);
        let mut source_files = Vec::new();
        let mut compiled_files = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| Error::fault(e.to_string()))? {
            let entry = entry.map_err(|e| Error::fault(e.to_string()))?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if file_name.ends_with(".sl") {
                source_files.push(file_name);
            } else if file_name.ends_with(".cmod") {
                compiled_files.push(file_name);
            }
        }
        source_files.sort();
        compiled_files.sort();
        Ok(PackageInfo {
            name: name.to_string(),
            source_files,
            compiled_files,
        })
    }

    /// The root directory and how many packages it currently holds.
    pub fn describe(&self) -> Result<(PathBuf, usize)> {
        let count = if self.root.exists() {
            self.list(true)?.len()
        } else {
            0
        };
        Ok((self.root.clone(), count))
    }
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// A [`ModuleLoader`] that resolves a dotted module path to
/// `<dir>/a/b/c.cmod`, trying each directory in order. Chains the package
/// store's own root with any `--search-path` directories passed on the CLI.
pub struct PathSearchLoader {
    dirs: Vec<PathBuf>,
}

impl PathSearchLoader {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        PathSearchLoader { dirs }
    }
}

impl ModuleLoader for PathSearchLoader {
    fn load(&self, path: &[String]) -> Result<Vec<u8>> {
        let relative = PathBuf::from(path.join("/")).with_extension("cmod");
        for dir in &self.dirs {
            let candidate = dir.join(&relative);
            if candidate.exists() {
                return fs::read(&candidate).map_err(|e| Error::fault(e.to_string()));
            }
        }
        Err(Error::MissingSymbol {
            name: path.join("::"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_list_then_remove() {
        let tmp = tempfile::tempdir().unwrap();
        let store = PackageStore::new(tmp.path());
        store.create("widgets").unwrap();
        let packages = store.list(true).unwrap();
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].name, "widgets");
        store.remove("widgets", false).unwrap();
        assert!(store.list(true).unwrap().is_empty());
    }

    #[test]
    fn creating_a_duplicate_package_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = PackageStore::new(tmp.path());
        store.create("widgets").unwrap();
        assert!(store.create("widgets").is_err());
    }

    #[test]
    fn removing_a_protected_package_requires_the_flag() {
        let tmp = tempfile::tempdir().unwrap();
        let store = PackageStore::new(tmp.path());
        store.create("std").unwrap();
        assert!(store.remove("std", false).is_err());
        assert!(store.remove("std", true).is_ok());
    }

    #[test]
    fn nested_packages_are_created_and_listed_under_dotted_names() {
        let tmp = tempfile::tempdir().unwrap();
        let store = PackageStore::new(tmp.path());
        store.create("std").unwrap();
        store.create("std::utils").unwrap();
        assert!(tmp.path().join("std").join("utils").is_dir());

        let top_level = store.list(false).unwrap();
        assert_eq!(top_level.len(), 1);
        assert_eq!(top_level[0].name, "std");

        let all = store.list(true).unwrap();
        let names: Vec<_> = all.iter().map(|p| p.name.as_str()).collect();
        assert!(names.contains(&"std"));
        assert!(names.contains(&"std::utils"));
    }

    #[test]
    fn invalid_package_names_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = PackageStore::new(tmp.path());
        assert!(store.create("1bad").is_err());
        assert!(store.create("std::").is_err());
    }

    #[test]
    fn path_search_loader_finds_a_module_in_a_later_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let pkg_dir = tmp.path().join("a");
        fs::create_dir_all(&pkg_dir).unwrap();
        fs::write(pkg_dir.join("b.cmod"), b"not-really-a-module").unwrap();
        let loader = PathSearchLoader::new(vec![tmp.path().to_path_buf()]);
        let bytes = loader.load(&["a".to_string(), "b".to_string()]).unwrap();
        assert_eq!(bytes, b"not-really-a-module");
    }
}
