//! Renders the `cnsvol(1)` manual page at build time.
//!
//! The subcommands and `--action` values documented in the page come from
//! `src/cli/mod.rs`, so the page cannot drift from the parser. Packagers pick
//! up `cnsvol.1` from `OUT_DIR`.

use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = io::stdout().lock();
    for watched in ["build.rs", "src/cli/mod.rs"] {
        writeln!(stdout, "cargo:rerun-if-changed={watched}")?;
    }

    let out_dir = env::var_os("OUT_DIR")
        .map(PathBuf::from)
        .ok_or("cargo did not provide OUT_DIR")?;

    let mut page = Vec::new();
    Man::new(cli::Cli::command()).render(&mut page)?;
    fs::write(out_dir.join("cnsvol.1"), page)?;

    Ok(())
}
