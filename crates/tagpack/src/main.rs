use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tagpack::infra::config::{Options, OptionsOverride};

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Bundle the scripts and stylesheets of an HTML/PHP site",
    long_about = None
)]
struct Cli {
    /// Project config file (defaults to ./tagpack.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Source directory
    #[arg(long, value_name = "DIR")]
    src: Option<PathBuf>,
    /// Output directory, replaced on every run
    #[arg(long, value_name = "DIR")]
    dist: Option<PathBuf>,
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,
    #[arg(short, long)]
    quiet: bool,
    /// Print the merged options as TOML and exit
    #[arg(long)]
    print_config: bool,
    /// Write a JSON report of the created bundles
    #[arg(long, value_name = "PATH")]
    manifest: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut options = Options::load(cli.config)?;
    options.apply(OptionsOverride {
        src: cli.src,
        dist: cli.dist,
        verbose: cli.verbose.then_some(true),
        ..OptionsOverride::default()
    });

    if cli.print_config {
        print!("{}", options.to_toml()?);
        return Ok(());
    }

    tagpack::init(options.verbose, cli.quiet);

    let report = tagpack::run(options)?;
    if let Some(path) = cli.manifest {
        let json = serde_json::to_string_pretty(&report)?;
        fs::write(&path, json)
            .with_context(|| format!("failed to write manifest {}", path.display()))?;
    }
    println!(
        "{} documents, {} bundles, {} files written to {}",
        report.documents.len(),
        report.bundles.len(),
        report.files_written,
        report.output.display()
    );
    Ok(())
}
