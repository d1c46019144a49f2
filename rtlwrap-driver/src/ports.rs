// SPDX-License-Identifier: Apache-2.0

//! `ports`: runs the generator and prints the foreign module's flat ports.

use clap::ArgMatches;
use rtlwrap::generate::GeneratedArtifact;
use rtlwrap::{Generator, ToolchainConfig};

use crate::common::{load_config, BuildDir};

pub fn format_ports(artifact: &GeneratedArtifact) -> String {
    let mut text = format!(
        "// {} ({} backend)\n",
        artifact.top_module, artifact.backend
    );
    let name_width = artifact
        .ports
        .iter()
        .map(|p| p.name.len())
        .max()
        .unwrap_or(0);
    for port in &artifact.ports {
        text.push_str(&format!(
            "{:<6} {:<name_width$} [{}]\n",
            port.direction.verilog_keyword(),
            port.name,
            port.width
        ));
    }
    text
}

pub fn handle_ports(
    matches: &ArgMatches,
    toolchain: &Option<ToolchainConfig>,
) -> anyhow::Result<()> {
    log::info!("handle_ports");
    let config = load_config(matches)?;
    let build_dir = BuildDir::from_matches(matches)?;
    let generator = Generator::new(
        toolchain.clone().unwrap_or_default(),
        build_dir.path().join("gen"),
    );
    let artifact = generator.generate(&config.module, &config.generator)?;
    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&artifact.ports)?);
    } else {
        print!("{}", format_ports(&artifact));
    }
    Ok(())
}
