pub mod app;
pub mod domain;
pub mod infra;
pub mod markup;

pub use app::run::{RunReport, run};
pub use infra::config::Options;

use tracing::Level;

/// Install the stderr log subscriber. `verbose` wins over `quiet`.
pub fn init(verbose: bool, quiet: bool) {
    let level = if verbose {
        Level::DEBUG
    } else if quiet {
        Level::WARN
    } else {
        Level::INFO
    };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
