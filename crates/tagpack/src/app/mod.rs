//! Bundling engine: file tree, grouping policy, bundle registry and the run pipeline.

pub mod bundler;
pub mod grouping;
pub mod handled;
pub mod run;
pub mod scripts;
pub mod styles;
pub mod tree;
