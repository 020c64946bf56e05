//! Domain-specific errors.

use std::path::PathBuf;

use thiserror::Error;

/// Failures reported by a transform collaborator. Always fatal for the run.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("syntax error in script at byte {offset}: {message}")]
    ScriptSyntax { offset: usize, message: String },
    #[error("syntax error in stylesheet at byte {offset}: {message}")]
    StyleSyntax { offset: usize, message: String },
    #[error("cannot resolve import '{specifier}' from {}", from.display())]
    UnresolvedImport { specifier: String, from: PathBuf },
    #[error("unsupported module syntax in {}: {statement}", file.display())]
    UnsupportedModuleSyntax { file: PathBuf, statement: String },
    #[error("failed to read module {}", path.display())]
    ModuleRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures raised by the bundling engine itself.
#[derive(Debug, Error)]
pub enum BundleError {
    /// An internal invariant broke; signals a logic bug rather than bad input.
    #[error("internal invariant violated: {0}")]
    Invariant(String),
    #[error("module script in {document} has no resolvable source")]
    MissingModuleSource { document: String },
    #[error("file tree node {0} does not exist")]
    UnknownNode(usize),
    #[error("document stage {from} cannot advance to {to}")]
    StageOrder {
        from: &'static str,
        to: &'static str,
    },
}
