// SPDX-License-Identifier: Apache-2.0

//! `check`: validates a wrapper config without invoking any tool.

use clap::ArgMatches;
use rtlwrap::config::WrapperConfig;

use crate::common::load_config;

/// One line per declared item, in document order.
pub fn summarize(config: &WrapperConfig) -> String {
    let mut lines = vec![
        format!("module {}", config.module.name),
        format!("generator {}", config.generator.backend.backend()),
    ];
    for (name, value) in &config.module.parameters {
        lines.push(format!("parameter {name} = {value}"));
    }
    for clock in &config.clocks {
        lines.push(format!("clock {} <- {}", clock.domain, clock.signal));
    }
    for reset in &config.resets {
        let polarity = if reset.active_low { "active-low" } else { "active-high" };
        lines.push(format!("reset {} <- {} ({polarity})", reset.domain, reset.signal));
    }
    for spec in config.interfaces() {
        let count = spec.members().len();
        let plural = if count == 1 { "" } else { "s" };
        if spec.shape.is_scalar() {
            lines.push(format!("{} {}, {count} member{plural}", spec.field(), spec.shape.tag()));
        } else {
            lines.push(format!(
                "{} {}, direction {}, {count} member{plural}",
                spec.field(),
                spec.shape.tag(),
                spec.direction,
            ));
        }
    }
    if let Some(driver) = &config.driver {
        if let Some(regs) = &driver.regs_struct {
            lines.push(format!("driver {regs}"));
        }
    }
    let mut text = lines.join("\n");
    text.push('\n');
    text
}

pub fn handle_check(matches: &ArgMatches) -> anyhow::Result<()> {
    log::info!("handle_check");
    let config = load_config(matches)?;
    print!("{}", summarize(&config));
    Ok(())
}
