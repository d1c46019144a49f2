// SPDX-License-Identifier: Apache-2.0

//! Failure reporting at the binary edge. Typed pipeline errors found in an
//! error's source chain are broken out into labeled lines, and tool output
//! is printed as an indented block after them.

use colored::Colorize;
use rtlwrap::rtlwrap_error::{
    BuildError, ConfigError, GenerationError, MappingError, RtlwrapError, SimError,
};

/// What one pipeline error contributes to a report.
struct Described {
    summary: String,
    details: Vec<(&'static str, String)>,
    diagnostics: String,
}

impl Described {
    fn new(summary: String) -> Self {
        Described {
            summary,
            details: Vec::new(),
            diagnostics: String::new(),
        }
    }
}

fn describe_config(e: &ConfigError) -> Described {
    let mut d = Described::new("invalid wrapper config".to_string());
    d.details.push(("field", e.field.clone()));
    d.details.push(("problem", e.message.clone()));
    d
}

fn describe_generation(e: &GenerationError) -> Described {
    let mut d = Described::new(format!("{} generation failed: {}", e.backend, e.failure));
    d.details.push(("backend", e.backend.to_string()));
    d.diagnostics = e.diagnostics.clone();
    d
}

fn describe_mapping(e: &MappingError) -> Described {
    let mut d = Described::new(format!("signal mapping failed: {e}"));
    let member = match e {
        MappingError::Missing { member, .. }
        | MappingError::Ambiguous { member, .. }
        | MappingError::Incompatible { member, .. }
        | MappingError::UnknownSignal { member, .. }
        | MappingError::Unbound(member) => member,
        MappingError::AlreadyClaimed { second, .. } => second,
    };
    d.details.push(("member", member.clone()));
    if let MappingError::Ambiguous { candidates, .. } = e {
        d.details.push(("candidates", candidates.join(", ")));
    }
    d
}

fn describe_build(e: &BuildError) -> Described {
    let mut d = Described::new(format!(
        "simulation build failed during {}: {}",
        e.stage, e.message
    ));
    d.diagnostics = e.diagnostics.clone();
    d
}

fn describe_sim(e: &SimError) -> Described {
    Described::new(format!("simulation error: {e}"))
}

fn describe(cause: &(dyn std::error::Error + 'static)) -> Option<Described> {
    if let Some(e) = cause.downcast_ref::<RtlwrapError>() {
        return Some(match e {
            RtlwrapError::Config(e) => describe_config(e),
            RtlwrapError::Generation(e) => describe_generation(e),
            RtlwrapError::Mapping(e) => describe_mapping(e),
            RtlwrapError::Build(e) => describe_build(e),
            RtlwrapError::Sim(e) => describe_sim(e),
        });
    }
    if let Some(e) = cause.downcast_ref::<ConfigError>() {
        return Some(describe_config(e));
    }
    if let Some(e) = cause.downcast_ref::<GenerationError>() {
        return Some(describe_generation(e));
    }
    if let Some(e) = cause.downcast_ref::<MappingError>() {
        return Some(describe_mapping(e));
    }
    if let Some(e) = cause.downcast_ref::<BuildError>() {
        return Some(describe_build(e));
    }
    cause.downcast_ref::<SimError>().map(describe_sim)
}

/// A failure message with labeled details, printed to stderr before the
/// driver exits with status 1.
#[derive(Debug, Default)]
pub struct Report {
    message: String,
    details: Vec<(&'static str, String)>,
    diagnostics: Vec<String>,
}

impl Report {
    pub fn new(message: impl Into<String>) -> Self {
        Report {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn detail(mut self, label: &'static str, value: impl Into<String>) -> Self {
        self.details.push((label, value.into()));
        self
    }

    /// Builds a report from `error` and its source chain, outermost first.
    pub fn from_error(error: &anyhow::Error) -> Self {
        let mut report = Report::new(error.to_string());
        for (depth, cause) in error.chain().enumerate() {
            match describe(cause) {
                Some(described) => {
                    if depth == 0 {
                        report.message = described.summary;
                    } else {
                        report.details.push(("error", described.summary));
                    }
                    report.details.extend(described.details);
                    let diagnostics = described.diagnostics.trim_end();
                    if !diagnostics.is_empty() {
                        report.diagnostics.push(diagnostics.to_string());
                    }
                }
                None if depth > 0 => report.details.push(("caused by", cause.to_string())),
                None => {}
            }
        }
        report
    }

    pub fn render(&self, subcommand: Option<&str>) -> String {
        let prefix = subcommand.map(|s| format!("{s}: ")).unwrap_or_default();
        let mut out = format!("rtlwrap-driver: {prefix}{}\n", self.message.red().bold());
        for (label, value) in &self.details {
            out.push_str(&format!("  {label}: {value}\n"));
        }
        for block in &self.diagnostics {
            out.push_str("  tool output:\n");
            for line in block.lines() {
                out.push_str(&format!("    {line}\n"));
            }
        }
        out
    }

    pub fn exit(self, subcommand: Option<&str>) -> ! {
        eprint!("{}", self.render(subcommand));
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use pretty_assertions::assert_eq;
    use rtlwrap::config::Backend;
    use rtlwrap::rtlwrap_error::GenerationFailure;

    fn plain() {
        colored::control::set_override(false);
    }

    #[test]
    fn plain_report_lists_details() {
        plain();
        let report = Report::new("toolchain toml file does not exist")
            .detail("path", "/tmp/t.toml")
            .detail("working directory", "/work");
        assert_eq!(
            report.render(None),
            "rtlwrap-driver: toolchain toml file does not exist\n  path: /tmp/t.toml\n  working directory: /work\n"
        );
    }

    #[test]
    fn generation_failure_shows_backend_and_tool_output() {
        plain();
        let failure = GenerationError::new(
            Backend::SystemVerilog,
            GenerationFailure::NonZeroExit {
                tool: "sv2v".to_string(),
                status: "exit code 1".to_string(),
            },
        )
        .with_diagnostics("timer.sv:3:1: parse error\nsecond line\n");
        let error = Err::<(), _>(RtlwrapError::from(failure))
            .context("building wrapper for `timer`")
            .unwrap_err();
        assert_eq!(
            Report::from_error(&error).render(Some("map")),
            "rtlwrap-driver: map: building wrapper for `timer`\n\
             \x20 error: systemverilog generation failed: `sv2v` exited unsuccessfully (exit code 1)\n\
             \x20 backend: systemverilog\n\
             \x20 tool output:\n\
             \x20   timer.sv:3:1: parse error\n\
             \x20   second line\n"
        );
    }

    #[test]
    fn bare_typed_error_becomes_the_headline() {
        plain();
        let error = anyhow::Error::new(ConfigError::new(
            "ports.bus.params.data_width",
            "must be 8, 16, 32 or 64",
        ));
        let report = Report::from_error(&error);
        assert_eq!(
            report.render(Some("check")),
            "rtlwrap-driver: check: invalid wrapper config\n  field: ports.bus.params.data_width\n  problem: must be 8, 16, 32 or 64\n"
        );
    }

    #[test]
    fn ambiguous_mapping_lists_candidates() {
        plain();
        let error = Err::<(), _>(RtlwrapError::from(MappingError::Ambiguous {
            member: "irq".to_string(),
            pattern: "name contains `irq`".to_string(),
            candidates: vec!["i_a_irq".to_string(), "i_b_irq".to_string()],
        }))
        .context("building wrapper for `m`")
        .unwrap_err();
        let report = Report::from_error(&error);
        assert_eq!(
            report.details[1..].to_vec(),
            vec![
                ("member", "irq".to_string()),
                ("candidates", "i_a_irq, i_b_irq".to_string()),
            ]
        );
    }

    #[test]
    fn untyped_causes_are_listed() {
        plain();
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let error = Err::<(), _>(io).context("writing out.v").unwrap_err();
        assert_eq!(
            Report::from_error(&error).details,
            vec![("caused by", "no such file".to_string())]
        );
    }
}
