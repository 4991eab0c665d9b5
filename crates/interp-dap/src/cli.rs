//! Command line entry point for adapter binaries.
//!
//! The crate does not ship an engine, so it has no binary of its own. An embedding binary
//! supplies its [`EngineFactory`]:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use clap::Parser;
//! # fn factory() -> Arc<dyn interp_debug::EngineFactory> { unimplemented!() }
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     interp_dap::cli::run(interp_dap::cli::Cli::parse(), factory()).await
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use interp_config::AdapterConfig;
use interp_debug::{EngineFactory, ProgramSource};

use crate::adapter::AdapterOptions;
use crate::{hardening, server};

/// Environment variable consulted when `--config` is not given.
pub const CONFIG_ENV: &str = "INTERP_DAP_CONFIG";

/// Debug Adapter Protocol server for an embedded interpreter, speaking DAP over stdio.
#[derive(Debug, Parser)]
#[command(name = "interp-dap", version, about)]
pub struct Cli {
    /// Path to a TOML config file.
    ///
    /// If unset, `INTERP_DAP_CONFIG` is used as a fallback. When neither are provided
    /// the adapter uses in-memory defaults.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Halt the main thread on entry after `configurationDone`.
    #[arg(long)]
    pub stop_at_entry: bool,

    /// Path under which the compiled program is shown to the client.
    #[arg(long, value_name = "PATH")]
    pub source_alias: Option<String>,

    /// Debug the given source text instead of a program on disk.
    #[arg(long, value_name = "SOURCE", conflicts_with = "program")]
    pub eval: Option<String>,

    /// Program to debug. `launch` requests may name a different one.
    pub program: Option<PathBuf>,
}

impl Cli {
    pub fn source(&self) -> Option<ProgramSource> {
        match (&self.eval, &self.program) {
            (Some(source), _) => Some(ProgramSource::Source(source.clone())),
            (None, Some(path)) => Some(ProgramSource::Path(path.clone())),
            (None, None) => None,
        }
    }

    /// Flags take precedence over the config file.
    pub fn apply(&self, config: &mut AdapterConfig) {
        if self.stop_at_entry {
            config.adapter.stop_at_entry = true;
        }
        if let Some(alias) = &self.source_alias {
            config.adapter.source_alias = Some(alias.clone());
        }
    }
}

/// Load the adapter config, falling back to defaults (with a note on stderr) when the
/// file cannot be used.
pub fn load_config(cli_path: Option<&Path>) -> AdapterConfig {
    let path = cli_path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
    let Some(path) = path else {
        return AdapterConfig::default();
    };

    match AdapterConfig::load_from_path(&path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!(
                "interp-dap: failed to load config from {}: {err}; continuing with defaults",
                path.display()
            );
            AdapterConfig::default()
        }
    }
}

pub async fn run(cli: Cli, factory: Arc<dyn EngineFactory>) -> anyhow::Result<()> {
    let mut config = load_config(cli.config.as_deref());
    cli.apply(&mut config);

    // Logging and the panic hook go in before anything can fail.
    hardening::init(&config);

    let options = AdapterOptions::from_config(cli.source(), &config.adapter);
    server::run_stdio(factory, options)
        .await
        .context("debug adapter session failed")
}
