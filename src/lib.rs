// SPDX-License-Identifier: Apache-2.0

//! Wraps foreign RTL modules, which only expose a flat list of named signals,
//! in structured bus/pin interfaces described by a TOML document, and drives
//! compiled simulations of those modules through the same structured names.
//!
//! The pipeline runs strictly downward:
//!
//! ```text
//! config::WrapperConfig::load
//!   -> generate::Generator::generate      (canonical artifact + flat ports)
//!   -> auto_map::map_signals              (SignalMapping)
//!   -> wrapper::assemble                  (WrapperComponent)
//!   -> sim::SimulationHandle::build       (runtime control surface)
//! ```
//!
//! [`pipeline::Pipeline`] strings these stages together.

pub mod artifact_cache;
pub mod auto_map;
pub mod config;
pub mod cxxrtl;
pub mod generate;
pub mod interface;
pub mod pipeline;
pub mod rtlwrap_error;
pub mod sim;
pub mod toolchain;
pub mod verilog_ports;
pub mod wrapper;

pub use auto_map::{map_signals, SignalMapping};
pub use config::WrapperConfig;
pub use generate::{GeneratedArtifact, Generator};
pub use interface::{Direction, InterfaceShape};
pub use pipeline::{load_wrapper, BuiltWrapper, Pipeline, PipelineOptions};
pub use rtlwrap_error::{
    BuildError, ConfigError, GenerationError, MappingError, RtlwrapError, SimError,
};
pub use sim::{SimEngine, SimulationHandle, SimulatorBuilder};
pub use toolchain::ToolchainConfig;
pub use verilog_ports::PortInfo;
pub use wrapper::WrapperComponent;
