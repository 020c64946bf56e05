//! Infrastructure adapters for config, globs, transforms and output.

pub mod config;
pub mod globs;
pub mod modules;
pub mod output;
pub mod transform;
