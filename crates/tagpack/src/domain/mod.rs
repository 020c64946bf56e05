//! Domain types shared across the markup engine and the bundler.

pub mod errors;
pub mod model;
