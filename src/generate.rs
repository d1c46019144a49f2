// SPDX-License-Identifier: Apache-2.0

//! Generator dispatcher: turns a module's sources into a canonical flat-port
//! Verilog artifact using the configured backend.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::info;
use serde::{Deserialize, Serialize};

use crate::artifact_cache::{self, ArtifactCache, Fingerprint};
use crate::config::{
    render_template, Backend, BackendConfig, FrontendOptions, GeneratorConfig, ModuleSpec,
    SpinalHdlOptions,
};
use crate::rtlwrap_error::{GenerationError, GenerationFailure};
use crate::toolchain::{run_tool, Tool, ToolInvocation, ToolOutput, ToolStatus, ToolchainConfig};
use crate::verilog_ports::{self, ModuleHeader, PortInfo};

/// A backend-normalized module: Verilog sources plus the top module's flat
/// port list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedArtifact {
    pub backend: Backend,
    pub top_module: String,
    /// Parameters `top_module` declares, i.e. the ones an instance may set.
    pub parameters: Vec<String>,
    /// The file that declares `top_module`.
    pub top_source: PathBuf,
    /// Every file needed to elaborate `top_module`, `top_source` included.
    pub sources: Vec<PathBuf>,
    pub ports: Vec<PortInfo>,
    pub fingerprint: String,
}

impl GeneratedArtifact {
    pub fn port(&self, name: &str) -> Option<&PortInfo> {
        self.ports.iter().find(|p| p.name == name)
    }

    /// The subset of `values` naming parameters this artifact still accepts.
    pub fn applicable_parameters<'a>(
        &self,
        values: &'a BTreeMap<String, toml::Value>,
    ) -> Vec<(&'a str, &'a toml::Value)> {
        values
            .iter()
            .filter(|(name, _)| self.parameters.iter().any(|p| p == *name))
            .map(|(name, value)| (name.as_str(), value))
            .collect()
    }
}

/// Runs backends and remembers their results. One `Generator` can be shared
/// by concurrent builds.
pub struct Generator {
    toolchain: ToolchainConfig,
    output_root: PathBuf,
    cache: ArtifactCache,
}

struct Job<'a> {
    module: &'a ModuleSpec,
    backend: Backend,
    dest: PathBuf,
    timeout: Duration,
    fingerprint: Fingerprint,
}

impl<'a> Job<'a> {
    fn fail(&self, failure: GenerationFailure) -> GenerationError {
        GenerationError::new(self.backend, failure)
    }

    fn io(&self, context: &str, e: io::Error) -> GenerationError {
        self.fail(GenerationFailure::Io(format!("{context}: {e}")))
    }

    fn tool(&self, toolchain: &ToolchainConfig, tool: Tool) -> Result<PathBuf, GenerationError> {
        toolchain
            .resolve(tool)
            .map_err(|e| self.fail(GenerationFailure::ToolNotFound(e)))
    }

    /// Runs `invocation` and turns every unsuccessful outcome into an error
    /// carrying what the tool printed.
    fn run(&self, invocation: ToolInvocation) -> Result<ToolOutput, GenerationError> {
        let invocation = invocation.timeout(self.timeout);
        let output = run_tool(&invocation).map_err(|e| {
            self.fail(GenerationFailure::SpawnFailed {
                tool: invocation.description().to_string(),
                message: e.to_string(),
            })
        })?;
        let failure = match output.status {
            ToolStatus::Success => return Ok(output),
            ToolStatus::TimedOut => GenerationFailure::TimedOut {
                tool: invocation.description().to_string(),
                secs: self.timeout.as_secs(),
            },
            ToolStatus::Failed { .. } => GenerationFailure::NonZeroExit {
                tool: invocation.description().to_string(),
                status: output.status_text(),
            },
        };
        Err(self.fail(failure).with_diagnostics(output.diagnostics()))
    }

    fn artifact(
        &self,
        top: &str,
        sources: Vec<PathBuf>,
        diagnostics: &str,
    ) -> Result<GeneratedArtifact, GenerationError> {
        let overrides = self.module.integer_parameters();
        let (top_source, header) = locate_top(&sources, top, &overrides)
            .map_err(|f| self.fail(f).with_diagnostics(diagnostics))?;
        info!(
            "{} artifact for {}: top {} in {} with {} port(s)",
            self.backend,
            self.module.name,
            top,
            top_source.display(),
            header.ports.len()
        );
        Ok(GeneratedArtifact {
            backend: self.backend,
            top_module: top.to_string(),
            parameters: header.overridable,
            top_source,
            sources,
            ports: header.ports,
            fingerprint: self.fingerprint.to_hex(),
        })
    }
}

/// Collects files with one of `extensions` under `root` (or `root` itself
/// when it is a file), sorted for determinism.
pub fn collect_sources(root: &Path, extensions: &[&str]) -> io::Result<Vec<PathBuf>> {
    fn walk(dir: &Path, extensions: &[&str], out: &mut Vec<PathBuf>) -> io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if name.starts_with('.') || name == "target" {
                continue;
            }
            if path.is_dir() {
                walk(&path, extensions, out)?;
            } else if path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| extensions.contains(&e))
                .unwrap_or(false)
            {
                out.push(path);
            }
        }
        Ok(())
    }
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }
    let mut out = Vec::new();
    walk(root, extensions, &mut out)?;
    out.sort();
    Ok(out)
}

/// Finds the file declaring `top` among `sources` and reads its header.
pub fn locate_top(
    sources: &[PathBuf],
    top: &str,
    overrides: &BTreeMap<String, i64>,
) -> Result<(PathBuf, ModuleHeader), GenerationFailure> {
    for source in sources {
        let text = std::fs::read_to_string(source)
            .map_err(|e| GenerationFailure::Io(format!("{}: {e}", source.display())))?;
        match verilog_ports::parse_module(&text, top, overrides) {
            Ok(Some(header)) => return Ok((source.clone(), header)),
            Ok(None) => {}
            Err(e) => {
                return Err(GenerationFailure::PortParse(format!(
                    "{}: {e}",
                    source.display()
                )))
            }
        }
    }
    Err(GenerationFailure::MissingTopModule(top.to_string()))
}

fn frontend_inputs(
    job: &Job,
    options: &FrontendOptions,
) -> Result<(Vec<PathBuf>, Vec<PathBuf>), GenerationError> {
    let source_dir = &job.module.source_dir;
    let inputs = collect_sources(source_dir, &["sv", "v"])
        .map_err(|e| job.io(&format!("reading {}", source_dir.display()), e))?;
    if inputs.is_empty() {
        return Err(job.fail(GenerationFailure::NoSources(
            source_dir.display().to_string(),
        )));
    }
    let base = if source_dir.is_file() {
        source_dir.parent().unwrap_or(Path::new(".")).to_path_buf()
    } else {
        source_dir.clone()
    };
    let mut include_dirs = vec![base.clone()];
    include_dirs.extend(options.include_dirs.iter().map(|d| base.join(d)));
    Ok((inputs, include_dirs))
}

impl Generator {
    pub fn new(toolchain: ToolchainConfig, output_root: impl Into<PathBuf>) -> Self {
        Generator {
            toolchain,
            output_root: output_root.into(),
            cache: ArtifactCache::new(),
        }
    }

    pub fn toolchain(&self) -> &ToolchainConfig {
        &self.toolchain
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// Produces (or reuses) the canonical artifact for `module`.
    pub fn generate(
        &self,
        module: &ModuleSpec,
        generator: &GeneratorConfig,
    ) -> Result<Arc<GeneratedArtifact>, GenerationError> {
        let backend = generator.backend.backend();
        let fingerprint =
            artifact_cache::fingerprint(module, generator, Some(&self.output_root)).map_err(
                |e| {
                    GenerationError::new(
                        backend,
                        GenerationFailure::Io(format!(
                            "fingerprinting {}: {e}",
                            module.source_dir.display()
                        )),
                    )
                },
            )?;
        let job = Job {
            module,
            backend,
            dest: self
                .output_root
                .join(format!("{}-{}", module.name, fingerprint.short())),
            timeout: generator
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| self.toolchain.timeout()),
            fingerprint,
        };
        self.cache.get_or_generate(fingerprint, || {
            if let Some(artifact) = artifact_cache::read_manifest(&job.dest, &fingerprint) {
                info!(
                    "reusing {} artifact for {} from {}",
                    backend,
                    module.name,
                    job.dest.display()
                );
                return Ok(artifact);
            }
            let artifact = self.run_backend(&job, &generator.backend)?;
            std::fs::create_dir_all(&job.dest)
                .and_then(|_| artifact_cache::write_manifest(&job.dest, &artifact))
                .map_err(|e| job.io("writing manifest", e))?;
            Ok(artifact)
        })
    }

    fn run_backend(
        &self,
        job: &Job,
        backend: &BackendConfig,
    ) -> Result<GeneratedArtifact, GenerationError> {
        match backend {
            BackendConfig::Verilog => self.pass_through(job),
            BackendConfig::SystemVerilog(options) => self.sv2v(job, options),
            BackendConfig::YosysSlang(options) => self.yosys_slang(job, options),
            BackendConfig::SpinalHdl(options) => self.spinalhdl(job, options),
        }
    }

    fn pass_through(&self, job: &Job) -> Result<GeneratedArtifact, GenerationError> {
        let source_dir = &job.module.source_dir;
        let sources = collect_sources(source_dir, &["v"])
            .map_err(|e| job.io(&format!("reading {}", source_dir.display()), e))?;
        if sources.is_empty() {
            return Err(job.fail(GenerationFailure::NoSources(
                source_dir.display().to_string(),
            )));
        }
        job.artifact(&job.module.name, sources, "")
    }

    fn sv2v(&self, job: &Job, options: &FrontendOptions) -> Result<GeneratedArtifact, GenerationError> {
        let sv2v = job.tool(&self.toolchain, Tool::Sv2v)?;
        let (inputs, include_dirs) = frontend_inputs(job, options)?;
        let top = options.top_module.as_deref().unwrap_or(&job.module.name);
        std::fs::create_dir_all(&job.dest)
            .map_err(|e| job.io(&format!("creating {}", job.dest.display()), e))?;
        let out = job.dest.join(format!("{}.v", job.module.name));

        let mut inv = ToolInvocation::new("sv2v", sv2v).arg(format!("--top={top}"));
        for dir in &include_dirs {
            inv = inv.arg(format!("-I{}", dir.display()));
        }
        for (k, v) in &options.defines {
            inv = inv.arg(if v.is_empty() {
                format!("-D{k}")
            } else {
                format!("-D{k}={v}")
            });
        }
        inv = inv.args(inputs.iter().map(|p| p.as_os_str().to_owned()));
        let output = job.run(inv)?;
        std::fs::write(&out, &output.stdout)
            .map_err(|e| job.io(&format!("writing {}", out.display()), e))?;
        job.artifact(top, vec![out], &output.diagnostics())
    }

    fn yosys_slang(
        &self,
        job: &Job,
        options: &FrontendOptions,
    ) -> Result<GeneratedArtifact, GenerationError> {
        let yosys = job.tool(&self.toolchain, Tool::Yosys)?;
        let (inputs, include_dirs) = frontend_inputs(job, options)?;
        let top = options.top_module.as_deref().unwrap_or(&job.module.name);
        std::fs::create_dir_all(&job.dest)
            .map_err(|e| job.io(&format!("creating {}", job.dest.display()), e))?;
        let out = job.dest.join(format!("{}.v", job.module.name));

        let mut read = format!("read_slang --top {top}");
        for dir in &include_dirs {
            read.push_str(&format!(" -I \"{}\"", dir.display()));
        }
        for (k, v) in &options.defines {
            if v.is_empty() {
                read.push_str(&format!(" -D {k}"));
            } else {
                read.push_str(&format!(" -D {k}={v}"));
            }
        }
        for (name, value) in &job.module.integer_parameters() {
            read.push_str(&format!(" -G {name}={value}"));
        }
        for input in &inputs {
            read.push_str(&format!(" \"{}\"", input.display()));
        }
        let script = format!(
            "{read}; hierarchy -top {top}; proc; opt_clean; write_verilog -noattr \"{}\"",
            out.display()
        );
        let output = job.run(
            ToolInvocation::new("yosys", yosys)
                .args(["-q", "-m", "slang", "-p"])
                .arg(script),
        )?;
        if !out.is_file() {
            return Err(job
                .fail(GenerationFailure::MissingTopModule(top.to_string()))
                .with_diagnostics(output.diagnostics()));
        }
        job.artifact(top, vec![out], &output.diagnostics())
    }

    fn spinalhdl(
        &self,
        job: &Job,
        options: &SpinalHdlOptions,
    ) -> Result<GeneratedArtifact, GenerationError> {
        let sbt = job.tool(&self.toolchain, Tool::Sbt)?;
        let vendored = job.module.source_dir.join("ext").join("SpinalHDL");
        let project = if vendored.is_dir() {
            vendored
        } else {
            job.module.source_dir.clone()
        };
        std::fs::create_dir_all(&job.dest)
            .map_err(|e| job.io(&format!("creating {}", job.dest.display()), e))?;
        let dest = job
            .dest
            .canonicalize()
            .map_err(|e| job.io(&format!("resolving {}", job.dest.display()), e))?;

        let mut args = Vec::with_capacity(options.options.len() + 2);
        for option in &options.options {
            args.push(
                render_template(option, &job.module.parameters)
                    .map_err(|e| job.fail(GenerationFailure::Io(e)))?,
            );
        }
        args.push(format!("--netlist-directory={}", dest.display()));
        args.push(format!("--netlist-name={}", job.module.name));

        let output = job.run(
            ToolInvocation::new("sbt", sbt)
                .current_dir(project)
                .env("GRADLE_OPTS", "--enable-native-access=ALL-UNNAMED")
                .args(["-J--enable-native-access=ALL-UNNAMED", "-v"])
                .arg(format!("lib/runMain {} {}", options.scala_class, args.join(" "))),
        )?;
        let out = dest.join(format!("{}.v", job.module.name));
        if !out.is_file() {
            return Err(job
                .fail(GenerationFailure::MissingTopModule(job.module.name.clone()))
                .with_diagnostics(output.diagnostics()));
        }
        job.artifact(&job.module.name, vec![out], &output.diagnostics())
    }
}
