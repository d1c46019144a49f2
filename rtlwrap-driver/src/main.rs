// SPDX-License-Identifier: Apache-2.0

//! This is a command line driver program over the rtlwrap pipeline: it
//! checks wrapper configs, runs generator backends and shows how a foreign
//! module's flat signals bind to the declared bus ports and pins.
//!
//! Commands are given like:
//!
//! ```text
//! rtlwrap-driver <global-options> <command> <config.toml> <command-options>
//! ```
//!
//! Commands are:
//!
//! - check: Validates a wrapper config without running any tool.
//! - ports: Prints the generated top module's flat port list.
//! - map: Prints the resolved member -> signal bindings.
//! - shim: Emits a Verilog wrapper module with structured port names.
//! - component: Emits the wrapper component as JSON.
//!
//! Sample usage:
//!
//! ```shell
//! $ cargo run -- --toolchain=$HOME/rtlwrap-toolchain.toml \
//!     map cores/wb_timer.toml
//! $ cargo run -- shim cores/wb_timer.toml --output=wb_timer_wrapper.v
//! ```

mod check;
mod common;
mod map;
mod ports;
mod report_cli_error;
mod wrap;

use std::path::Path;

use clap;
use clap::{Arg, ArgAction};
use report_cli_error::Report;
use rtlwrap::ToolchainConfig;

trait AppExt {
    fn add_config_arg(self) -> Self;
    fn add_build_dir_arg(self) -> Self;
    fn add_output_arg(self) -> Self;
    fn add_json_flag(self) -> Self;
}

impl AppExt for clap::Command {
    fn add_config_arg(self) -> Self {
        (self as clap::Command).arg(
            Arg::new("config")
                .help("The wrapper config TOML file")
                .required(true)
                .index(1),
        )
    }

    fn add_build_dir_arg(self) -> Self {
        (self as clap::Command).arg(
            Arg::new("build_dir")
                .long("build_dir")
                .value_name("BUILD_DIR")
                .help("Directory for generated artifacts (default: a temporary directory)")
                .action(ArgAction::Set),
        )
    }

    fn add_output_arg(self) -> Self {
        (self as clap::Command).arg(
            Arg::new("output")
                .long("output")
                .value_name("OUTPUT")
                .help("Write the result here instead of stdout")
                .action(ArgAction::Set),
        )
    }

    fn add_json_flag(self) -> Self {
        (self as clap::Command).arg(
            Arg::new("json")
                .long("json")
                .help("Print JSON instead of a table")
                .action(ArgAction::SetTrue),
        )
    }
}

fn load_toolchain(path: &str) -> ToolchainConfig {
    if !Path::new(path).exists() {
        let cwd = std::env::current_dir()
            .map(|d| d.display().to_string())
            .unwrap_or_else(|_| "<unknown>".to_string());
        Report::new("toolchain toml file does not exist")
            .detail("path", path)
            .detail("working directory", cwd)
            .exit(None);
    }
    match ToolchainConfig::load(Path::new(path)) {
        Ok(config) => config,
        Err(e) => Report::new("could not parse toolchain toml file")
            .detail("path", path)
            .detail("error", e.to_string())
            .exit(None),
    }
}

fn main() {
    let _ = env_logger::try_init();

    log::info!(
        "rtlwrap-driver starting; version: {}",
        env!("CARGO_PKG_VERSION")
    );

    let matches = clap::Command::new("rtlwrap-driver")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Command line driver for wrapping foreign RTL modules")
        .arg(
            Arg::new("toolchain")
                .long("toolchain")
                .value_name("TOOLCHAIN")
                .help("Path to a rtlwrap-toolchain.toml file")
                .action(ArgAction::Set),
        )
        .subcommand(clap::Command::new("version").about("Prints the version of the driver"))
        .subcommand(
            clap::Command::new("check")
                .about("Validates a wrapper config")
                .add_config_arg(),
        )
        .subcommand(
            clap::Command::new("ports")
                .about("Generates the module and prints its flat port list")
                .add_config_arg()
                .add_build_dir_arg()
                .add_json_flag(),
        )
        .subcommand(
            clap::Command::new("map")
                .about("Prints how structured members bind to foreign signals")
                .add_config_arg()
                .add_build_dir_arg()
                .add_json_flag(),
        )
        .subcommand(
            clap::Command::new("shim")
                .about("Emits a Verilog wrapper module around the foreign module")
                .add_config_arg()
                .add_build_dir_arg()
                .add_output_arg(),
        )
        .subcommand(
            clap::Command::new("component")
                .about("Emits the wrapper component description as JSON")
                .add_config_arg()
                .add_build_dir_arg()
                .add_output_arg(),
        )
        .get_matches();

    let config = matches
        .get_one::<String>("toolchain")
        .map(|path| load_toolchain(path));

    let (subcommand, result) = match matches.subcommand() {
        Some(("check", m)) => ("check", check::handle_check(m)),
        Some(("ports", m)) => ("ports", ports::handle_ports(m, &config)),
        Some(("map", m)) => ("map", map::handle_map(m, &config)),
        Some(("shim", m)) => ("shim", wrap::handle_shim(m, &config)),
        Some(("component", m)) => ("component", wrap::handle_component(m, &config)),
        Some(("version", _)) => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            return;
        }
        _ => Report::new("No valid subcommand provided.").exit(None),
    };
    if let Err(e) = result {
        Report::from_error(&e).exit(Some(subcommand));
    }
}
