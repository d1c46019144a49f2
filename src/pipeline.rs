// SPDX-License-Identifier: Apache-2.0

//! End-to-end build: config -> generated artifact -> signal mapping ->
//! wrapper component, and from there to a simulation handle.
//!
//! Every stage either hands a complete result to the next one or stops the
//! build; nothing partially built is returned.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::info;

use crate::auto_map::{map_signals, SignalMapping};
use crate::config::WrapperConfig;
use crate::cxxrtl::CxxrtlBuilder;
use crate::generate::{GeneratedArtifact, Generator};
use crate::rtlwrap_error::{BuildError, Result};
use crate::sim::{SimulationHandle, SimulatorBuilder};
use crate::toolchain::ToolchainConfig;
use crate::wrapper::{self, WrapperComponent};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub toolchain: ToolchainConfig,
    /// Generated artifacts land under `<build_dir>/gen`, compiled simulation
    /// models under `<build_dir>/sim`.
    pub build_dir: PathBuf,
}

impl PipelineOptions {
    pub fn new(build_dir: impl Into<PathBuf>) -> Self {
        PipelineOptions {
            toolchain: ToolchainConfig::default(),
            build_dir: build_dir.into(),
        }
    }

    pub fn with_toolchain(mut self, toolchain: ToolchainConfig) -> Self {
        self.toolchain = toolchain;
        self
    }
}

/// A successfully built wrapper: everything downstream consumers need.
#[derive(Debug, Clone)]
pub struct BuiltWrapper {
    pub config: WrapperConfig,
    pub artifact: Arc<GeneratedArtifact>,
    pub mapping: Arc<SignalMapping>,
    pub component: WrapperComponent,
}

impl BuiltWrapper {
    pub fn top_module(&self) -> &str {
        &self.artifact.top_module
    }

    pub fn source_files(&self) -> &[PathBuf] {
        &self.artifact.sources
    }

    /// Builds a simulation of this wrapper with `builder`.
    pub fn simulate(
        &self,
        builder: &dyn SimulatorBuilder,
    ) -> std::result::Result<SimulationHandle, BuildError> {
        SimulationHandle::build(
            builder,
            &self.component,
            Arc::clone(&self.artifact),
            Arc::clone(&self.mapping),
        )
    }
}

/// Runs builds against one shared generator, so repeated and concurrent
/// builds of the same module reuse its artifact.
pub struct Pipeline {
    options: PipelineOptions,
    generator: Generator,
}

impl Pipeline {
    pub fn new(options: PipelineOptions) -> Self {
        let generator = Generator::new(options.toolchain.clone(), options.build_dir.join("gen"));
        Pipeline { options, generator }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    /// Generates, maps and assembles `config`.
    pub fn build(&self, config: WrapperConfig) -> Result<BuiltWrapper> {
        let name = config.module.name.clone();
        info!("building wrapper for {name}");
        let artifact = self.generator.generate(&config.module, &config.generator)?;
        let mapping = map_signals(
            &artifact.ports,
            &config.clocks,
            &config.resets,
            config.interfaces(),
        )?;
        info!(
            "{name}: mapped {} member(s), {} optional member(s) unbound",
            mapping.members().len(),
            mapping.unbound().len()
        );
        let component = wrapper::assemble(&config, &artifact, &mapping)?;
        Ok(BuiltWrapper {
            config,
            artifact,
            mapping: Arc::new(mapping),
            component,
        })
    }

    pub fn build_from_path(&self, path: &Path) -> Result<BuiltWrapper> {
        self.build(WrapperConfig::load(path)?)
    }

    /// The CXXRTL builder for this pipeline's toolchain and build directory.
    pub fn cxxrtl_builder(&self) -> CxxrtlBuilder {
        CxxrtlBuilder::new(
            self.options.toolchain.clone(),
            self.options.build_dir.join("sim"),
        )
    }

    /// Builds the wrapper described at `path` and a CXXRTL simulation of it.
    pub fn simulate_path(&self, path: &Path) -> Result<SimulationHandle> {
        let built = self.build_from_path(path)?;
        Ok(built.simulate(&self.cxxrtl_builder())?)
    }
}

/// Loads and builds the wrapper described by the TOML file at `path`.
pub fn load_wrapper(path: &Path, options: PipelineOptions) -> Result<BuiltWrapper> {
    Pipeline::new(options).build_from_path(path)
}

/// Builds the wrapper at `path` and a simulation of it with `builder`.
pub fn build_simulation(
    path: &Path,
    options: PipelineOptions,
    builder: &dyn SimulatorBuilder,
) -> Result<SimulationHandle> {
    let built = load_wrapper(path, options)?;
    Ok(built.simulate(builder)?)
}
