//! Static ES module roll-up.
//!
//! Follows relative `import` statements depth first and emits every module once in dependency
//! order. Each module runs in its own function scope bound to `__mod_N` and returns its exports
//! object; imports become reads from that object. Namespace imports and re-exports are rejected
//! rather than approximated.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Component, Path, PathBuf};

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::domain::errors::TransformError;
use crate::infra::transform::{ModuleEntry, ResolvedModule};

static IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*import\s*(?:([^'";]*?)\s*from\s*)?["']([^"']+)["'][ \t]*;?"#)
        .unwrap()
});
static EXPORT_STAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*export\s*\*[^;\n]*;?").unwrap());
static EXPORT_LIST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*export\s*\{([^}]*)\}\s*(from\s*["'][^"']+["'])?[ \t]*;?"#).unwrap()
});
static EXPORT_DEFAULT_NAMED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^([ \t]*)export\s+default\s+((?:async\s+)?function\s*\*?|class)\s+([\w$]+)")
        .unwrap()
});
static EXPORT_DEFAULT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^([ \t]*)export\s+default\s+").unwrap());
static EXPORT_DECLARATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^([ \t]*)export\s+((?:async\s+)?function\s*\*?|const|let|var|class)\s+([\w$]+)",
    )
    .unwrap()
});
static IDENTIFIER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_$][\w$]*$").unwrap());

/// Resolve `entry` and everything it imports into a single classic script.
pub fn resolve(entry: &ModuleEntry) -> Result<ResolvedModule, TransformError> {
    let mut graph = ModuleGraph::default();
    match entry {
        ModuleEntry::File(path) => {
            graph.visit(&normalize(path))?;
        }
        ModuleEntry::Inline { code, base_dir } => {
            let virtual_path = base_dir.join("<inline module>");
            graph.in_progress.insert(virtual_path.clone());
            let code = graph.rewrite(code, &virtual_path)?;
            graph.chunks.push(code);
        }
    }

    tracing::debug!(modules = graph.files.len(), "resolved module graph");
    Ok(ResolvedModule {
        code: graph.chunks.join("\n"),
        files: graph.files,
    })
}

/// The scope object of one finished module and the names it exports.
#[derive(Debug)]
struct ModuleScope {
    binding: String,
    exports: HashSet<String>,
}

#[derive(Debug, Default)]
struct ModuleGraph {
    modules: HashMap<PathBuf, ModuleScope>,
    in_progress: HashSet<PathBuf>,
    chunks: Vec<String>,
    files: Vec<PathBuf>,
    next_id: usize,
}

impl ModuleGraph {
    fn visit(&mut self, path: &Path) -> Result<(), TransformError> {
        if self.modules.contains_key(path) {
            return Ok(());
        }
        if !self.in_progress.insert(path.to_path_buf()) {
            return Err(TransformError::UnsupportedModuleSyntax {
                file: path.to_path_buf(),
                statement: "circular import".into(),
            });
        }

        let source = fs::read_to_string(path).map_err(|source| TransformError::ModuleRead {
            path: path.to_path_buf(),
            source,
        })?;
        let source = source.replace("\r\n", "\n");
        let code = self.rewrite(&source, path)?;

        self.in_progress.remove(path);
        self.files.push(path.to_path_buf());
        self.chunks.push(code);
        Ok(())
    }

    /// Inline dependencies of `source` and wrap it in a scope that returns its exports.
    fn rewrite(&mut self, source: &str, path: &Path) -> Result<String, TransformError> {
        let base_dir = path.parent().unwrap_or(Path::new("")).to_path_buf();
        let id = self.next_id;
        self.next_id += 1;

        let mut failure = None;
        let imported = IMPORT.replace_all(source, |caps: &Captures| {
            if failure.is_some() {
                return String::new();
            }
            match self.import(caps, &base_dir, path) {
                Ok(bindings) => bindings,
                Err(err) => {
                    failure = Some(err);
                    String::new()
                }
            }
        });
        if let Some(err) = failure {
            return Err(err);
        }

        let (code, exports) = rewrite_exports(&imported, path, id)?;
        let binding = format!("__mod_{id}");
        let returned = if exports.is_empty() {
            "return {};".to_string()
        } else {
            let fields = exports
                .iter()
                .map(|(exported, local)| format!("{exported}: {local}"))
                .collect::<Vec<_>>();
            format!("return {{ {} }};", fields.join(", "))
        };
        let code = [
            format!("var {binding} = (function () {{"),
            "\"use strict\";".to_string(),
            code,
            returned,
            "})();".to_string(),
        ]
        .join("\n");
        self.modules.insert(
            path.to_path_buf(),
            ModuleScope {
                binding,
                exports: exports.into_keys().collect(),
            },
        );
        Ok(code)
    }

    /// Pull in one imported module and return the binding statements replacing the import.
    fn import(
        &mut self,
        caps: &Captures,
        base_dir: &Path,
        importer: &Path,
    ) -> Result<String, TransformError> {
        let specifier = &caps[2];
        let dependency = locate(specifier, base_dir).ok_or_else(|| {
            TransformError::UnresolvedImport {
                specifier: specifier.to_string(),
                from: importer.to_path_buf(),
            }
        })?;
        self.visit(&dependency)?;

        let Some(clause) = caps
            .get(1)
            .map(|m| m.as_str().trim())
            .filter(|c| !c.is_empty())
        else {
            return Ok(String::new());
        };
        let scope = self.modules.get(&dependency).ok_or_else(|| {
            TransformError::UnsupportedModuleSyntax {
                file: importer.to_path_buf(),
                statement: "circular import".into(),
            }
        })?;
        let unsupported = |statement: &str| TransformError::UnsupportedModuleSyntax {
            file: importer.to_path_buf(),
            statement: statement.to_string(),
        };
        let lookup = |name: &str| {
            if scope.exports.contains(name) {
                Ok(format!("{}.{name}", scope.binding))
            } else {
                Err(unsupported(&format!("'{specifier}' has no export '{name}'")))
            }
        };

        let mut bindings = Vec::new();
        let (default_part, named_part) = match clause.find('{') {
            Some(open) => {
                let close = clause.rfind('}').ok_or_else(|| unsupported(&caps[0]))?;
                (clause[..open].trim().trim_end_matches(',').trim(), Some(&clause[open + 1..close]))
            }
            None => (clause, None),
        };

        if default_part.starts_with('*') {
            return Err(unsupported(&caps[0]));
        }
        if !default_part.is_empty() {
            if !IDENTIFIER.is_match(default_part) {
                return Err(unsupported(&caps[0]));
            }
            bindings.push((default_part.to_string(), lookup("default")?));
        }
        for spec in named_part.into_iter().flat_map(|part| part.split(',')) {
            let (imported, local) = split_alias(spec);
            if imported.is_empty() {
                continue;
            }
            bindings.push((local.to_string(), lookup(imported)?));
        }

        Ok(bindings
            .into_iter()
            .map(|(local, target)| format!("var {local} = {target};"))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

/// Strip export syntax, returning the code and each exported name with its local binding.
fn rewrite_exports(
    code: &str,
    path: &Path,
    id: usize,
) -> Result<(String, BTreeMap<String, String>), TransformError> {
    let unsupported = |statement: &str| TransformError::UnsupportedModuleSyntax {
        file: path.to_path_buf(),
        statement: statement.trim().to_string(),
    };
    if let Some(found) = EXPORT_STAR.find(code) {
        return Err(unsupported(found.as_str()));
    }

    let mut exports = BTreeMap::new();
    for caps in EXPORT_LIST.captures_iter(code) {
        if caps.get(2).is_some() {
            return Err(unsupported(&caps[0]));
        }
        for spec in caps[1].split(',') {
            let (local, exported) = split_alias(spec);
            if !local.is_empty() {
                exports.insert(exported.to_string(), local.to_string());
            }
        }
    }
    let code = EXPORT_LIST.replace_all(code, "");

    for caps in EXPORT_DEFAULT_NAMED.captures_iter(&code) {
        exports.insert("default".to_string(), caps[3].to_string());
    }
    let code = EXPORT_DEFAULT_NAMED.replace_all(&code, "$1$2 $3");

    let default_binding = format!("__default_{id}");
    let code = EXPORT_DEFAULT.replace_all(&code, |caps: &Captures| {
        exports.insert("default".to_string(), default_binding.clone());
        format!("{}var {default_binding} = ", &caps[1])
    });

    for caps in EXPORT_DECLARATION.captures_iter(&code) {
        exports.insert(caps[3].to_string(), caps[3].to_string());
    }
    let code = EXPORT_DECLARATION.replace_all(&code, "$1$2 $3");

    Ok((code.into_owned(), exports))
}

/// `a as b` to `("a", "b")`, `a` to `("a", "a")`.
fn split_alias(spec: &str) -> (&str, &str) {
    let spec = spec.trim();
    match spec.split_once(" as ") {
        Some((name, alias)) => (name.trim(), alias.trim()),
        None => (spec, spec),
    }
}

/// Find the file a relative specifier refers to, trying the usual extension fallbacks.
fn locate(specifier: &str, base_dir: &Path) -> Option<PathBuf> {
    if !(specifier.starts_with("./") || specifier.starts_with("../")) {
        return None;
    }
    let joined = normalize(&base_dir.join(specifier));
    let candidates = [
        joined.clone(),
        joined.with_extension("js"),
        joined.with_extension("mjs"),
        joined.join("index.js"),
    ];
    candidates.into_iter().find(|candidate| candidate.is_file())
}

/// Lexically resolve `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn write(dir: &Path, name: &str, content: &str) -> Result<PathBuf> {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        Ok(path)
    }

    #[test]
    fn rolls_up_dependencies_in_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write(
            dir.path(),
            "lib/math.js",
            "export function add(a, b) { return a + b; }\nexport const ZERO = 0;\n",
        )?;
        write(
            dir.path(),
            "lib/greet.js",
            "export default function greet(n) { return 'hi ' + n; }\n",
        )?;
        let entry = write(
            dir.path(),
            "main.js",
            concat!(
                "import { add, ZERO as nothing } from './lib/math.js';\n",
                "import hello from \"./lib/greet\";\n",
                "console.log(hello(add(1, nothing)));\n",
            ),
        )?;

        let resolved = resolve(&ModuleEntry::File(entry.clone()))?;
        let math = resolved.code.find("function add").expect("math inlined");
        let greet = resolved.code.find("function greet").expect("greet inlined");
        let main = resolved.code.find("console.log").expect("entry inlined");
        assert!(math < greet && greet < main);
        assert!(resolved.code.contains("var nothing = __mod_1.ZERO;"));
        assert!(resolved.code.contains("var hello = __mod_2.default;"));
        assert!(resolved.code.contains("return { ZERO: ZERO, add: add };"));
        assert!(resolved.code.contains("return { default: greet };"));
        assert!(!resolved.code.contains("export"));
        assert!(!resolved.code.contains("import"));
        assert_eq!(resolved.files.len(), 3);
        assert_eq!(resolved.files.last(), Some(&normalize(&entry)));
        Ok(())
    }

    #[test]
    fn shared_dependencies_are_emitted_once() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write(dir.path(), "shared.js", "export const value = 1;\n")?;
        write(
            dir.path(),
            "a.js",
            "import { value } from './shared.js';\nexport const a = value;\n",
        )?;
        let code = concat!(
            "import { value } from './shared.js';\n",
            "import { a } from './a.js';\n",
            "console.log(a, value);",
        );
        let resolved = resolve(&ModuleEntry::Inline {
            code: code.to_string(),
            base_dir: dir.path().to_path_buf(),
        })?;
        assert_eq!(resolved.code.matches("const value = 1;").count(), 1);
        assert_eq!(resolved.files.len(), 2);
        Ok(())
    }

    #[test]
    fn anonymous_default_export_gets_a_binding() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write(dir.path(), "config.js", "export default { debug: true };\n")?;
        let resolved = resolve(&ModuleEntry::Inline {
            code: "import config from './config.js';\nrun(config);".into(),
            base_dir: dir.path().to_path_buf(),
        })?;
        assert!(resolved.code.contains("var __default_1 = { debug: true };"));
        assert!(resolved.code.contains("var config = __mod_1.default;"));
        Ok(())
    }

    #[test]
    fn rejects_what_it_cannot_express() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write(dir.path(), "dep.js", "export const x = 1;\n")?;
        let inline = |code: &str| ModuleEntry::Inline {
            code: code.to_string(),
            base_dir: dir.path().to_path_buf(),
        };

        let bare = resolve(&inline("import x from 'lodash';")).unwrap_err();
        assert!(matches!(bare, TransformError::UnresolvedImport { .. }));

        let namespace = resolve(&inline("import * as dep from './dep.js';")).unwrap_err();
        assert!(matches!(namespace, TransformError::UnsupportedModuleSyntax { .. }));

        let missing = resolve(&inline("import { y } from './dep.js';")).unwrap_err();
        assert!(matches!(missing, TransformError::UnsupportedModuleSyntax { .. }));

        let reexport = resolve(&inline("export { x } from './dep.js';")).unwrap_err();
        assert!(matches!(reexport, TransformError::UnsupportedModuleSyntax { .. }));
        Ok(())
    }

    #[test]
    fn circular_imports_are_reported() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write(
            dir.path(),
            "a.js",
            "import { b } from './b.js';\nexport const a = 1;\n",
        )?;
        let b = write(
            dir.path(),
            "b.js",
            "import { a } from './a.js';\nexport const b = 2;\n",
        )?;
        let err = resolve(&ModuleEntry::File(b)).unwrap_err();
        assert!(matches!(err, TransformError::UnsupportedModuleSyntax { .. }));
        Ok(())
    }

    #[test]
    fn dynamic_import_is_left_alone() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let resolved = resolve(&ModuleEntry::Inline {
            code: "import('./later.js').then(run);".into(),
            base_dir: dir.path().to_path_buf(),
        })?;
        assert!(resolved.code.contains("\nimport('./later.js').then(run);\n"));
        assert!(resolved.files.is_empty());
        Ok(())
    }

    #[test]
    fn private_names_stay_inside_their_module() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write(
            dir.path(),
            "a.js",
            "const helper = 1;\nexport function a() { return helper; }\n",
        )?;
        write(
            dir.path(),
            "b.js",
            "const helper = 2;\nexport function b() { return helper; }\n",
        )?;
        let resolved = resolve(&ModuleEntry::Inline {
            code: concat!(
                "import { a } from './a.js';\n",
                "import { b } from './b.js';\n",
                "run(a() + b());",
            )
            .into(),
            base_dir: dir.path().to_path_buf(),
        })?;

        let code = &resolved.code;
        let a_scope = code.find("var __mod_1 = (function () {").expect("a scoped");
        let b_scope = code.find("var __mod_2 = (function () {").expect("b scoped");
        let first_helper = code.find("const helper = 1;").expect("a helper");
        let second_helper = code.find("const helper = 2;").expect("b helper");
        assert!(a_scope < first_helper && first_helper < b_scope && b_scope < second_helper);
        assert_eq!(code.matches("})();").count(), 3);
        assert!(code.contains("var a = __mod_1.a;\nvar b = __mod_2.b;"));
        Ok(())
    }
}
