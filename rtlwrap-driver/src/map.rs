// SPDX-License-Identifier: Apache-2.0

//! `map`: shows which foreign signal every structured member resolved to.

use clap::ArgMatches;
use rtlwrap::auto_map::BindingOrigin;
use rtlwrap::{SignalMapping, ToolchainConfig};

use crate::common::{build_wrapper, BuildDir};

pub fn format_mapping(mapping: &SignalMapping) -> String {
    let mut rows: Vec<(String, String, String)> = Vec::new();
    for clock in mapping.clocks() {
        rows.push((
            format!("clocks.{}", clock.domain),
            clock.signal.clone(),
            "explicit".to_string(),
        ));
    }
    for reset in mapping.resets() {
        rows.push((
            format!("resets.{}", reset.domain),
            reset.signal.clone(),
            "explicit".to_string(),
        ));
    }
    for member in mapping.members() {
        let origin = match &member.origin {
            BindingOrigin::Explicit => "explicit".to_string(),
            BindingOrigin::Heuristic { pattern } => format!("auto: {pattern}"),
        };
        rows.push((member.path.clone(), member.signal.clone(), origin));
    }
    for path in mapping.unbound() {
        rows.push((path.clone(), "-".to_string(), "unbound".to_string()));
    }

    let path_width = rows.iter().map(|r| r.0.len()).max().unwrap_or(0);
    let signal_width = rows.iter().map(|r| r.1.len()).max().unwrap_or(0);
    rows.iter()
        .map(|(path, signal, origin)| {
            format!("{path:<path_width$} -> {signal:<signal_width$}  ({origin})\n")
        })
        .collect()
}

pub fn handle_map(matches: &ArgMatches, toolchain: &Option<ToolchainConfig>) -> anyhow::Result<()> {
    log::info!("handle_map");
    let build_dir = BuildDir::from_matches(matches)?;
    let built = build_wrapper(matches, toolchain, &build_dir)?;
    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(built.mapping.as_ref())?);
    } else {
        print!("{}", format_mapping(&built.mapping));
    }
    Ok(())
}
