//! Module resolution and the process-wide module registry.
//!
//! Loading is idempotent: every canonical path maps to at most one
//! [`Module`]. Before execution the interpreter asks for a topological order
//! of the dependency graph; a back-edge discovered during the walk is an
//! import cycle and is fatal, reported with the offending chain. Execution
//! itself (running a module's declarations exactly once) lives in the
//! interpreter; this file owns paths, parsing, and the DAG.

use std::{
    cell::RefCell,
    path::{Path, PathBuf},
    rc::Rc,
};

use ahash::AHashMap;

use crate::{
    ast::{Program, Stmt},
    env::Env,
    errors::{RunError, RunResult},
    parser::parse_program,
};

/// Lifecycle of a module. `Executed` environments are immutable from the
/// callers' perspective; `Executing` seen during a dependency walk means a
/// cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    NotParsed,
    Parsed,
    Executing,
    Executed,
}

pub struct Module {
    pub path: PathBuf,
    pub source: String,
    pub ast: Rc<Program>,
    pub env: Env,
    pub dependencies: Vec<PathBuf>,
    pub state: ExecState,
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("path", &self.path)
            .field("dependencies", &self.dependencies)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct ModuleRegistry {
    modules: AHashMap<PathBuf, Rc<RefCell<Module>>>,
    /// Extra roots searched after the importing file's directory and its
    /// `naab_modules/` subtree (per-user dir, then system-wide dir).
    pub search_dirs: Vec<PathBuf>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        let mut search_dirs = Vec::new();
        if let Ok(home) = std::env::var("HOME") {
            search_dirs.push(Path::new(&home).join(".naab").join("modules"));
        }
        search_dirs.push(PathBuf::from("/usr/local/lib/naab/modules"));
        Self {
            modules: AHashMap::new(),
            search_dirs,
        }
    }

    pub fn get(&self, path: &Path) -> Option<Rc<RefCell<Module>>> {
        self.modules.get(path).cloned()
    }

    /// Environments of every registered module, used as GC roots.
    pub fn all_envs(&self) -> Vec<Env> {
        self.modules
            .values()
            .map(|module| module.borrow().env.clone())
            .collect()
    }

    /// Resolves a dotted `use` path (`path.to.module`) to a file.
    pub fn resolve_use(&self, dotted: &str, importing_dir: &Path) -> RunResult<PathBuf> {
        let mut relative = dotted.replace('.', "/");
        relative.push_str(".naab");
        self.resolve_relative(&relative, importing_dir).ok_or_else(|| {
            RunError::import(format!("cannot resolve module '{dotted}'"))
        })
    }

    /// Resolves a quoted `import … from "path"` string to a file.
    pub fn resolve_import(&self, path: &str, importing_dir: &Path) -> RunResult<PathBuf> {
        let relative = if path.ends_with(".naab") {
            path.to_owned()
        } else {
            format!("{path}.naab")
        };
        self.resolve_relative(&relative, importing_dir).ok_or_else(|| {
            RunError::import(format!("cannot resolve module \"{path}\""))
        })
    }

    /// Search order: (a) relative to the importing file's directory, (b) its
    /// `naab_modules/` subtree, (c) the per-user module directory, (d) the
    /// system-wide module directory. Canonicalization dedupes aliases.
    fn resolve_relative(&self, relative: &str, importing_dir: &Path) -> Option<PathBuf> {
        let mut candidates = vec![
            importing_dir.join(relative),
            importing_dir.join("naab_modules").join(relative),
        ];
        for dir in &self.search_dirs {
            candidates.push(dir.join(relative));
        }
        for candidate in candidates {
            if candidate.is_file() {
                if let Ok(canonical) = candidate.canonicalize() {
                    return Some(canonical);
                }
            }
        }
        None
    }

    /// Parses a module (and, transitively, everything it imports) into the
    /// registry. Already-registered paths are returned as-is.
    pub fn load_parsed(&mut self, path: &Path) -> RunResult<Rc<RefCell<Module>>> {
        if let Some(module) = self.modules.get(path) {
            return Ok(Rc::clone(module));
        }
        let source = std::fs::read_to_string(path).map_err(|err| {
            RunError::import(format!("cannot read module {}: {err}", path.display()))
        })?;
        let ast = parse_program(&source, &path.display().to_string()).map_err(|err| {
            let mut wrapped = RunError::import(format!(
                "parse error in imported module {}:\n{}",
                path.display(),
                err.message
            ));
            wrapped.span = err.span;
            wrapped.file = err.file.clone();
            wrapped
        })?;
        let module = Rc::new(RefCell::new(Module {
            path: path.to_owned(),
            source,
            ast: Rc::new(ast),
            env: Env::new(),
            dependencies: Vec::new(),
            state: ExecState::Parsed,
        }));
        self.modules.insert(path.to_owned(), Rc::clone(&module));

        // Transitively parse dependencies and record their canonical paths.
        let importing_dir = path.parent().unwrap_or_else(|| Path::new(".")).to_owned();
        let ast = Rc::clone(&module.borrow().ast);
        let mut dependencies = Vec::new();
        for stmt in ast.module_uses.iter().chain(&ast.imports) {
            let dep_path = match stmt {
                Stmt::UseModule { path: dotted, .. } => {
                    if crate::modules::BuiltinModule::by_name(dotted).is_some() {
                        continue;
                    }
                    self.resolve_use(dotted, &importing_dir)?
                }
                Stmt::Import { path, .. } => self.resolve_import(path, &importing_dir)?,
                _ => continue,
            };
            self.load_parsed(&dep_path)?;
            if !dependencies.contains(&dep_path) {
                dependencies.push(dep_path);
            }
        }
        module.borrow_mut().dependencies = dependencies;
        Ok(module)
    }

    /// Topological order of `root` and its transitive dependencies, leaves
    /// first. A back-edge is an import cycle, reported with the chain.
    pub fn topological_order(&self, root: &Path) -> RunResult<Vec<PathBuf>> {
        let mut order = Vec::new();
        let mut visiting = Vec::new();
        let mut done: Vec<PathBuf> = Vec::new();
        self.visit(root, &mut visiting, &mut done, &mut order)?;
        Ok(order)
    }

    fn visit(
        &self,
        path: &Path,
        visiting: &mut Vec<PathBuf>,
        done: &mut Vec<PathBuf>,
        order: &mut Vec<PathBuf>,
    ) -> RunResult<()> {
        if done.iter().any(|p| p == path) {
            return Ok(());
        }
        if let Some(start) = visiting.iter().position(|p| p == path) {
            let mut chain: Vec<String> = visiting[start..]
                .iter()
                .map(|p| display_name(p))
                .collect();
            chain.push(display_name(path));
            return Err(RunError::import(format!(
                "import cycle detected: {}",
                chain.join(" -> ")
            )));
        }
        visiting.push(path.to_owned());
        let dependencies = self
            .modules
            .get(path)
            .map(|m| m.borrow().dependencies.clone())
            .unwrap_or_default();
        for dep in &dependencies {
            self.visit(dep, visiting, done, order)?;
        }
        visiting.pop();
        done.push(path.to_owned());
        order.push(path.to_owned());
        Ok(())
    }
}

fn display_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    struct TempTree {
        root: PathBuf,
    }

    impl TempTree {
        fn new(name: &str) -> Self {
            let root = std::env::temp_dir().join(format!(
                "naab-loader-{name}-{}",
                std::process::id()
            ));
            let _ = fs::remove_dir_all(&root);
            fs::create_dir_all(&root).unwrap();
            Self { root }
        }

        fn write(&self, rel: &str, contents: &str) -> PathBuf {
            let path = self.root.join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(&path, contents).unwrap();
            path.canonicalize().unwrap()
        }
    }

    impl Drop for TempTree {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.root);
        }
    }

    #[test]
    fn loading_is_idempotent() {
        let tree = TempTree::new("idempotent");
        let path = tree.write("util.naab", "export fn id(x: any) -> any { return x }");
        let mut registry = ModuleRegistry::new();
        let first = registry.load_parsed(&path).unwrap();
        let second = registry.load_parsed(&path).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn dependencies_resolve_relative_to_importer() {
        let tree = TempTree::new("deps");
        tree.write("lib/helper.naab", "export fn h() -> int { return 1 }");
        let main = tree.write("app.naab", "use lib.helper\n");
        let mut registry = ModuleRegistry::new();
        let module = registry.load_parsed(&main).unwrap();
        assert_eq!(module.borrow().dependencies.len(), 1);
        let order = registry.topological_order(&main).unwrap();
        assert_eq!(order.len(), 2);
        // Leaves come first.
        assert!(order[0].ends_with("helper.naab"));
    }

    #[test]
    fn naab_modules_subtree_is_searched() {
        let tree = TempTree::new("modtree");
        tree.write("naab_modules/vendored.naab", "export fn v() -> int { return 2 }");
        let main = tree.write("app.naab", "use vendored\n");
        let mut registry = ModuleRegistry::new();
        assert!(registry.load_parsed(&main).is_ok());
    }

    #[test]
    fn cycle_is_fatal_with_chain() {
        let tree = TempTree::new("cycle");
        tree.write("a.naab", "use b\n");
        tree.write("b.naab", "use a\n");
        let a = tree.root.join("a.naab").canonicalize().unwrap();
        let mut registry = ModuleRegistry::new();
        registry.load_parsed(&a).unwrap();
        let err = registry.topological_order(&a).unwrap_err();
        assert_eq!(err.kind, crate::errors::ErrorKind::ImportError);
        assert!(err.message.contains("a -> b -> a"), "{}", err.message);
    }

    #[test]
    fn parse_failure_becomes_import_error() {
        let tree = TempTree::new("badparse");
        tree.write("broken.naab", "let = nope");
        let main = tree.write("app.naab", "use broken\n");
        let mut registry = ModuleRegistry::new();
        let err = registry.load_parsed(&main).unwrap_err();
        assert_eq!(err.kind, crate::errors::ErrorKind::ImportError);
        assert!(err.message.contains("broken"));
    }
}
