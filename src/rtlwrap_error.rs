// SPDX-License-Identifier: Apache-2.0

//! Error types for each pipeline stage, plus the umbrella [`RtlwrapError`]
//! returned by the end-to-end entry points.

use thiserror::Error;

use crate::config::Backend;
use crate::interface::Direction;

/// Malformed or contradictory wrapper configuration. `field` is the dotted
/// path of the offending entry (e.g. `ports.bus.params.data_width`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("config error at `{field}`: {message}")]
pub struct ConfigError {
    pub field: String,
    pub message: String,
}

impl ConfigError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationFailure {
    #[error("required tool `{0}` is not available")]
    ToolNotFound(String),
    #[error("could not launch `{tool}`: {message}")]
    SpawnFailed { tool: String, message: String },
    #[error("`{tool}` exited unsuccessfully ({status})")]
    NonZeroExit { tool: String, status: String },
    #[error("`{tool}` did not finish within {secs}s")]
    TimedOut { tool: String, secs: u64 },
    #[error("top module `{0}` is not declared in the generated output")]
    MissingTopModule(String),
    #[error("no HDL sources found under {0}")]
    NoSources(String),
    #[error("could not read port list: {0}")]
    PortParse(String),
    #[error("i/o: {0}")]
    Io(String),
}

/// A generator backend failed. Carries whatever the tool printed so the
/// caller can show it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{backend} generation failed: {failure}{}", format_diagnostics(.diagnostics))]
pub struct GenerationError {
    pub backend: Backend,
    pub failure: GenerationFailure,
    pub diagnostics: String,
}

impl GenerationError {
    pub fn new(backend: Backend, failure: GenerationFailure) -> Self {
        GenerationError {
            backend,
            failure,
            diagnostics: String::new(),
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: impl Into<String>) -> Self {
        self.diagnostics = diagnostics.into();
        self
    }
}

fn format_diagnostics(diagnostics: &str) -> String {
    let trimmed = diagnostics.trim_end();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("\n{trimmed}")
    }
}

/// A structured member could not be bound to a flat signal. `member` is the
/// full member path (`bus.cyc`, `irq`, `clocks.sys`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("no signal found for `{member}` (tried: {})", .patterns.join("; "))]
    Missing {
        member: String,
        patterns: Vec<String>,
    },
    #[error("`{member}` is ambiguous: {pattern} matches {}", .candidates.join(", "))]
    Ambiguous {
        member: String,
        pattern: String,
        candidates: Vec<String>,
    },
    #[error(
        "`{member}` needs {expected_direction} [{expected_width}] but `{signal}` is \
         {actual_direction} [{actual_width}]"
    )]
    Incompatible {
        member: String,
        signal: String,
        expected_width: u32,
        actual_width: u32,
        expected_direction: Direction,
        actual_direction: Direction,
    },
    #[error("`{member}` names `{signal}`, which the module does not declare")]
    UnknownSignal { member: String, signal: String },
    #[error("`{signal}` is claimed by both `{first}` and `{second}`")]
    AlreadyClaimed {
        signal: String,
        first: String,
        second: String,
    },
    #[error("wrapper assembly found an unbound member `{0}`")]
    Unbound(String),
}

/// Compiling or loading a simulation model failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("simulation build failed during {stage}: {message}{}", format_diagnostics(.diagnostics))]
pub struct BuildError {
    pub stage: String,
    pub message: String,
    pub diagnostics: String,
}

impl BuildError {
    pub fn new(stage: impl Into<String>, message: impl Into<String>) -> Self {
        BuildError {
            stage: stage.into(),
            message: message.into(),
            diagnostics: String::new(),
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: impl Into<String>) -> Self {
        self.diagnostics = diagnostics.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimError {
    #[error("unknown signal path `{0}`")]
    UnknownSignal(String),
    #[error("simulation handle is closed")]
    ClosedHandle,
    #[error("value {value:#x} does not fit in the {width} bit(s) of `{path}`")]
    ValueOutOfRange { path: String, value: u64, width: u32 },
    #[error("`{path}` is {width} bits wide; only signals up to 64 bits can be accessed")]
    TooWide { path: String, width: u32 },
    #[error("simulation engine: {0}")]
    Engine(String),
}

#[derive(Debug, Error)]
pub enum RtlwrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Sim(#[from] SimError),
}

pub type Result<T> = std::result::Result<T, RtlwrapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_names_field() {
        let e = ConfigError::new("ports.bus.interface", "unknown interface `axi`");
        assert_eq!(
            e.to_string(),
            "config error at `ports.bus.interface`: unknown interface `axi`"
        );
    }

    #[test]
    fn generation_error_appends_diagnostics() {
        let e = GenerationError::new(
            Backend::SystemVerilog,
            GenerationFailure::NonZeroExit {
                tool: "sv2v".to_string(),
                status: "exit status: 1".to_string(),
            },
        )
        .with_diagnostics("top.sv:3: parse error\n");
        assert_eq!(
            e.to_string(),
            "systemverilog generation failed: `sv2v` exited unsuccessfully (exit status: 1)\ntop.sv:3: parse error"
        );
    }

    #[test]
    fn generation_error_without_diagnostics_is_one_line() {
        let e = GenerationError::new(
            Backend::Verilog,
            GenerationFailure::MissingTopModule("wb_timer".to_string()),
        );
        assert!(!e.to_string().contains('\n'));
    }

    #[test]
    fn mapping_error_lists_candidates() {
        let e = MappingError::Ambiguous {
            member: "bus.dat_w".to_string(),
            pattern: "core == `dat` (input)".to_string(),
            candidates: vec!["a_dat".to_string(), "b_dat".to_string()],
        };
        assert_eq!(
            e.to_string(),
            "`bus.dat_w` is ambiguous: core == `dat` (input) matches a_dat, b_dat"
        );
    }

    #[test]
    fn umbrella_error_is_transparent() {
        let e: RtlwrapError = SimError::ClosedHandle.into();
        assert_eq!(e.to_string(), "simulation handle is closed");
        assert!(matches!(e, RtlwrapError::Sim(SimError::ClosedHandle)));
    }
}
