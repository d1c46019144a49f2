// SPDX-License-Identifier: Apache-2.0

//! Argument plumbing shared by the subcommands that run the pipeline.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::ArgMatches;
use rtlwrap::{BuiltWrapper, Pipeline, PipelineOptions, ToolchainConfig, WrapperConfig};

/// Where generated artifacts go for one invocation. Without `--build_dir`
/// they land in a temp dir that is removed when this value is dropped.
pub struct BuildDir {
    path: PathBuf,
    _temp: Option<tempfile::TempDir>,
}

impl BuildDir {
    pub fn from_matches(matches: &ArgMatches) -> anyhow::Result<Self> {
        if let Some(dir) = matches.get_one::<String>("build_dir") {
            let path = PathBuf::from(dir);
            std::fs::create_dir_all(&path)
                .with_context(|| format!("creating build directory {}", path.display()))?;
            return Ok(BuildDir { path, _temp: None });
        }
        let temp = tempfile::Builder::new()
            .prefix("rtlwrap-driver-")
            .tempdir()
            .context("creating temporary build directory")?;
        log::info!("no --build_dir given; using {}", temp.path().display());
        Ok(BuildDir {
            path: temp.path().to_path_buf(),
            _temp: Some(temp),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub fn config_path(matches: &ArgMatches) -> PathBuf {
    // `config` is a required positional on every subcommand that calls this.
    PathBuf::from(
        matches
            .get_one::<String>("config")
            .map(String::as_str)
            .unwrap_or_default(),
    )
}

pub fn load_config(matches: &ArgMatches) -> anyhow::Result<WrapperConfig> {
    let path = config_path(matches);
    WrapperConfig::load(&path).with_context(|| format!("loading {}", path.display()))
}

/// Runs generate, map and assemble for the config named on the command line.
pub fn build_wrapper(
    matches: &ArgMatches,
    toolchain: &Option<ToolchainConfig>,
    build_dir: &BuildDir,
) -> anyhow::Result<BuiltWrapper> {
    let config = load_config(matches)?;
    let mut options = PipelineOptions::new(build_dir.path());
    if let Some(toolchain) = toolchain {
        options = options.with_toolchain(toolchain.clone());
    }
    let name = config.module.name.clone();
    Pipeline::new(options)
        .build(config)
        .with_context(|| format!("building wrapper for `{name}`"))
}

/// Writes `text` to `--output` when given, otherwise to stdout.
pub fn emit(matches: &ArgMatches, text: &str) -> anyhow::Result<()> {
    match matches.get_one::<String>("output") {
        Some(path) => {
            std::fs::write(path, text).with_context(|| format!("writing {path}"))?;
            log::info!("wrote {path}");
        }
        None => print!("{text}"),
    }
    Ok(())
}
