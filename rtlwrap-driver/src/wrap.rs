// SPDX-License-Identifier: Apache-2.0

//! `shim` and `component`: emit the assembled wrapper.

use clap::ArgMatches;
use rtlwrap::ToolchainConfig;

use crate::common::{build_wrapper, emit, BuildDir};

pub fn handle_shim(matches: &ArgMatches, toolchain: &Option<ToolchainConfig>) -> anyhow::Result<()> {
    log::info!("handle_shim");
    let build_dir = BuildDir::from_matches(matches)?;
    let built = build_wrapper(matches, toolchain, &build_dir)?;
    emit(matches, &built.component.emit_verilog_shim())
}

pub fn handle_component(
    matches: &ArgMatches,
    toolchain: &Option<ToolchainConfig>,
) -> anyhow::Result<()> {
    log::info!("handle_component");
    let build_dir = BuildDir::from_matches(matches)?;
    let built = build_wrapper(matches, toolchain, &build_dir)?;
    let mut json = built.component.to_json()?;
    json.push('\n');
    emit(matches, &json)
}
