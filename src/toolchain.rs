// SPDX-License-Identifier: Apache-2.0

//! External tool configuration and the process boundary every generator and
//! simulator build goes through.
//!
//! Children run in their own process group with stdout/stderr captured to
//! temp files, and are polled against a deadline. When the deadline passes
//! the whole group is sent SIGKILL, so tools that fork helpers (sbt, yosys
//! plugins) do not outlive the invocation.

use std::ffi::OsString;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::Deserialize;

use crate::rtlwrap_error::ConfigError;

pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolchainConfig {
    /// Path to the `sv2v` executable.
    pub sv2v_path: Option<PathBuf>,
    /// Path to `yosys`; must have the `slang` plugin for the yosys_slang
    /// backend.
    pub yosys_path: Option<PathBuf>,
    /// Path to `yosys-config`, used to locate the CXXRTL runtime headers.
    pub yosys_config_path: Option<PathBuf>,
    pub sbt_path: Option<PathBuf>,
    /// C++ compiler used to build CXXRTL simulation libraries.
    pub cxx_path: Option<PathBuf>,
    /// Default per-invocation timeout.
    pub timeout_secs: Option<u64>,
}

/// Document shape of a toolchain file: everything lives under `[toolchain]`.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ToolchainFile {
    toolchain: ToolchainConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Sv2v,
    Yosys,
    YosysConfig,
    Sbt,
    Cxx,
}

impl Tool {
    pub fn executable_name(self) -> &'static str {
        match self {
            Tool::Sv2v => "sv2v",
            Tool::Yosys => "yosys",
            Tool::YosysConfig => "yosys-config",
            Tool::Sbt => "sbt",
            Tool::Cxx => "c++",
        }
    }
}

impl ToolchainConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let file: ToolchainFile = toml::from_str(text)
            .map_err(|e| ConfigError::new("toolchain", e.message().to_string()))?;
        if file.toolchain.timeout_secs == Some(0) {
            return Err(ConfigError::new(
                "toolchain.timeout_secs",
                "timeout must be at least one second",
            ));
        }
        Ok(file.toolchain)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::new(
                path.display().to_string(),
                format!("could not read toolchain file: {e}"),
            )
        })?;
        Self::from_toml_str(&text)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TOOL_TIMEOUT_SECS))
    }

    fn configured(&self, tool: Tool) -> Option<&PathBuf> {
        match tool {
            Tool::Sv2v => self.sv2v_path.as_ref(),
            Tool::Yosys => self.yosys_path.as_ref(),
            Tool::YosysConfig => self.yosys_config_path.as_ref(),
            Tool::Sbt => self.sbt_path.as_ref(),
            Tool::Cxx => self.cxx_path.as_ref(),
        }
    }

    /// Locates `tool`: the configured path if there is one, otherwise a
    /// `PATH` lookup.
    pub fn resolve(&self, tool: Tool) -> Result<PathBuf, String> {
        if let Some(path) = self.configured(tool) {
            return if path.is_file() {
                Ok(path.clone())
            } else {
                Err(format!(
                    "configured {} path {} does not exist",
                    tool.executable_name(),
                    path.display()
                ))
            };
        }
        which::which(tool.executable_name())
            .map_err(|e| format!("`{}` not found on PATH: {e}", tool.executable_name()))
    }
}

/// A fully described child process, built up before it is run.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    description: String,
    program: PathBuf,
    args: Vec<OsString>,
    current_dir: Option<PathBuf>,
    envs: Vec<(OsString, OsString)>,
    timeout: Duration,
}

impl ToolInvocation {
    pub fn new(description: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        ToolInvocation {
            description: description.into(),
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            envs: Vec::new(),
            timeout: Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        for (k, v) in &self.envs {
            cmd.env(k, v);
        }
        cmd.stdin(Stdio::null());
        cmd
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolStatus {
    Success,
    /// Exited unsuccessfully; `code` is `None` when killed by a signal.
    Failed { code: Option<i32> },
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub status: ToolStatus,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status == ToolStatus::Success
    }

    pub fn status_text(&self) -> String {
        match &self.status {
            ToolStatus::Success => "success".to_string(),
            ToolStatus::Failed { code: Some(code) } => format!("exit code {code}"),
            ToolStatus::Failed { code: None } => "terminated by signal".to_string(),
            ToolStatus::TimedOut => format!("timed out after {:.1}s", self.elapsed.as_secs_f64()),
        }
    }

    /// Everything the tool printed, stderr first.
    pub fn diagnostics(&self) -> String {
        let mut text = self.stderr.trim_end().to_string();
        let stdout = self.stdout.trim_end();
        if !stdout.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(stdout);
        }
        text
    }
}

fn read_captured(file: &mut std::fs::File) -> io::Result<String> {
    file.seek(SeekFrom::Start(0))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(unix)]
fn isolate_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    // The child becomes leader of its own group so a timeout can kill the
    // whole subtree.
    unsafe {
        cmd.pre_exec(|| {
            if libc::setpgid(0, 0) != 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "Failed to setpgid"));
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn isolate_process_group(_cmd: &mut Command) {}

fn kill_tree(child: &mut std::process::Child) {
    #[cfg(unix)]
    unsafe {
        let _ = libc::kill(-(child.id() as i32), libc::SIGKILL);
    }
    let _ = child.kill();
}

fn interpret(status: ExitStatus) -> ToolStatus {
    if status.success() {
        ToolStatus::Success
    } else {
        ToolStatus::Failed {
            code: status.code(),
        }
    }
}

/// Runs `invocation` to completion or until its timeout expires. Only a
/// failure to launch the child is an `Err`; every outcome after launch is
/// reported through [`ToolStatus`].
pub fn run_tool(invocation: &ToolInvocation) -> io::Result<ToolOutput> {
    let mut cmd = invocation.to_command();
    let stdout_tmp = tempfile::Builder::new().suffix(".stdout").tempfile()?;
    let stderr_tmp = tempfile::Builder::new().suffix(".stderr").tempfile()?;
    cmd.stdout(Stdio::from(stdout_tmp.as_file().try_clone()?));
    cmd.stderr(Stdio::from(stderr_tmp.as_file().try_clone()?));
    isolate_process_group(&mut cmd);

    info!(
        "Running {}: {}",
        invocation.description,
        invocation.command_line()
    );
    let start = Instant::now();
    let mut child = cmd.spawn()?;
    debug!("{}: pid={}", invocation.description, child.id());

    let mut poll = Duration::from_millis(5);
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break interpret(status);
        }
        if start.elapsed() >= invocation.timeout {
            warn!(
                "{} exceeded its {}s timeout; killing process group",
                invocation.description,
                invocation.timeout.as_secs()
            );
            kill_tree(&mut child);
            let _ = child.wait();
            break ToolStatus::TimedOut;
        }
        std::thread::sleep(poll);
        poll = (poll * 2).min(Duration::from_millis(100));
    };
    let elapsed = start.elapsed();

    let stdout = read_captured(&mut stdout_tmp.reopen()?)?;
    let stderr = read_captured(&mut stderr_tmp.reopen()?)?;
    debug!(
        "{} finished in {:.2}s: {:?}",
        invocation.description,
        elapsed.as_secs_f64(),
        status
    );
    Ok(ToolOutput {
        status,
        stdout,
        stderr,
        elapsed,
    })
}
