// SPDX-License-Identifier: Apache-2.0

//! Typed wrapper configuration loaded from a TOML document.
//!
//! Every check happens here, once, at load time. Later stages can assume the
//! configuration is internally consistent: shapes are known, parameter
//! references resolve, explicit map keys name real members, and no two
//! interfaces share a name.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::interface::{Direction, InterfaceShape, Member};
use crate::rtlwrap_error::ConfigError;

/// Environment variable listing directories that `files.package` references
/// are resolved against.
pub const PACKAGE_PATH_ENV: &str = "RTLWRAP_PACKAGE_PATH";

const TOP_LEVEL_KEYS: &[&str] = &[
    "name", "files", "generate", "clocks", "resets", "ports", "pins", "driver",
];
const RESERVED_INTERFACE_NAMES: &[&str] = &["clocks", "resets"];

static IDENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());
static PARAM_REF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\{([A-Za-z_][A-Za-z0-9_]*)\}$").unwrap());
static TEMPLATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Backend {
    #[serde(rename = "verilog")]
    Verilog,
    #[serde(rename = "systemverilog")]
    SystemVerilog,
    #[serde(rename = "spinalhdl")]
    SpinalHdl,
    #[serde(rename = "yosys_slang")]
    YosysSlang,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Backend::Verilog => "verilog",
            Backend::SystemVerilog => "systemverilog",
            Backend::SpinalHdl => "spinalhdl",
            Backend::YosysSlang => "yosys_slang",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceLocation {
    Path(PathBuf),
    Package(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleSpec {
    pub name: String,
    pub source: SourceLocation,
    /// `source` resolved to a concrete file or directory.
    pub source_dir: PathBuf,
    pub parameters: BTreeMap<String, toml::Value>,
}

impl ModuleSpec {
    /// Integer-valued parameters, the only ones port-width evaluation uses.
    pub fn integer_parameters(&self) -> BTreeMap<String, i64> {
        self.parameters
            .iter()
            .filter_map(|(k, v)| match v {
                toml::Value::Integer(i) => Some((k.clone(), *i)),
                toml::Value::Boolean(b) => Some((k.clone(), i64::from(*b))),
                _ => None,
            })
            .collect()
    }
}

/// Options shared by the backends that front-end SystemVerilog sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FrontendOptions {
    pub top_module: Option<String>,
    #[serde(default)]
    pub include_dirs: Vec<PathBuf>,
    #[serde(default)]
    pub defines: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpinalHdlOptions {
    pub scala_class: String,
    /// Arguments passed to the generator class; `{param}` expands to the
    /// module parameter of that name.
    #[serde(default)]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum BackendConfig {
    Verilog,
    #[serde(rename = "systemverilog")]
    SystemVerilog(FrontendOptions),
    #[serde(rename = "spinalhdl")]
    SpinalHdl(SpinalHdlOptions),
    YosysSlang(FrontendOptions),
}

impl BackendConfig {
    pub fn backend(&self) -> Backend {
        match self {
            BackendConfig::Verilog => Backend::Verilog,
            BackendConfig::SystemVerilog(_) => Backend::SystemVerilog,
            BackendConfig::SpinalHdl(_) => Backend::SpinalHdl,
            BackendConfig::YosysSlang(_) => Backend::YosysSlang,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratorConfig {
    pub backend: BackendConfig,
    /// Overrides the toolchain-wide tool timeout for this module.
    pub timeout_secs: Option<u64>,
}

impl GeneratorConfig {
    pub fn pass_through() -> Self {
        GeneratorConfig {
            backend: BackendConfig::Verilog,
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClockSpec {
    pub domain: String,
    pub signal: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResetSpec {
    pub domain: String,
    pub signal: String,
    pub active_low: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceRole {
    Port,
    Pin,
}

/// One `[ports.X]` or `[pins.X]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceSpec {
    pub name: String,
    pub role: InterfaceRole,
    pub shape: InterfaceShape,
    pub direction: Direction,
    pub prefix: Option<String>,
    /// Integer index variables usable as `{var}` in mapped signal names.
    pub vars: Vec<String>,
    /// Explicit member -> foreign signal overrides, with index variables
    /// already expanded. Scalar shapes use the empty member name.
    pub map: BTreeMap<String, String>,
}

impl InterfaceSpec {
    pub fn members(&self) -> Vec<Member> {
        let mut members = self.shape.members(self.direction);
        if self.shape.is_scalar() {
            for m in &mut members {
                m.aliases = std::iter::once(self.name.to_ascii_lowercase())
                    .chain(self.prefix.iter().map(|p| p.to_ascii_lowercase()))
                    .collect();
            }
        }
        members
    }

    pub fn field(&self) -> String {
        match self.role {
            InterfaceRole::Port => format!("ports.{}", self.name),
            InterfaceRole::Pin => format!("pins.{}", self.name),
        }
    }
}

/// Opaque driver metadata carried through to the wrapper component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DriverSpec {
    pub regs_struct: Option<String>,
    #[serde(default)]
    pub c_files: Vec<PathBuf>,
    #[serde(default)]
    pub h_files: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WrapperConfig {
    pub module: ModuleSpec,
    pub generator: GeneratorConfig,
    pub clocks: Vec<ClockSpec>,
    pub resets: Vec<ResetSpec>,
    pub ports: Vec<InterfaceSpec>,
    pub pins: Vec<InterfaceSpec>,
    pub driver: Option<DriverSpec>,
    /// Directory relative paths in the document are resolved against.
    pub config_dir: PathBuf,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFiles {
    path: Option<PathBuf>,
    package: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawGenerate {
    generator: Backend,
    #[serde(default)]
    parameters: BTreeMap<String, toml::Value>,
    timeout_secs: Option<u64>,
    sv2v: Option<FrontendOptions>,
    spinalhdl: Option<SpinalHdlOptions>,
    yosys_slang: Option<FrontendOptions>,
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum RawDirection {
    In,
    Out,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawInterface {
    interface: String,
    direction: Option<RawDirection>,
    #[serde(default)]
    params: toml::Table,
    #[serde(default)]
    vars: BTreeMap<String, String>,
    prefix: Option<String>,
    map: Option<toml::Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawReset {
    Signal(String),
    Detailed {
        signal: String,
        #[serde(default = "default_active_low")]
        active_low: bool,
    },
}

fn default_active_low() -> bool {
    true
}

fn section<T: serde::de::DeserializeOwned>(
    value: &toml::Value,
    field: &str,
) -> Result<T, ConfigError> {
    value
        .clone()
        .try_into::<T>()
        .map_err(|e| ConfigError::new(field, e.message().to_string()))
}

fn table<'a>(value: &'a toml::Value, field: &str) -> Result<&'a toml::Table, ConfigError> {
    value
        .as_table()
        .ok_or_else(|| ConfigError::new(field, format!("expected a table, got {}", value.type_str())))
}

fn identifier(name: &str, field: &str) -> Result<(), ConfigError> {
    if IDENT_RE.is_match(name) {
        Ok(())
    } else {
        Err(ConfigError::new(
            field,
            format!("`{name}` is not a valid identifier"),
        ))
    }
}

/// Resolves a `files.package` reference (`vendor.timer`) against the
/// directories listed in [`PACKAGE_PATH_ENV`].
pub fn resolve_package(package: &str) -> Result<PathBuf, ConfigError> {
    let relative: PathBuf = package.split('.').collect();
    let search = std::env::var_os(PACKAGE_PATH_ENV).ok_or_else(|| {
        ConfigError::new(
            "files.package",
            format!("{PACKAGE_PATH_ENV} is not set; cannot resolve `{package}`"),
        )
    })?;
    for root in std::env::split_paths(&search) {
        let candidate = root.join(&relative);
        if candidate.is_dir() {
            log::debug!("resolved package {package} to {}", candidate.display());
            return Ok(candidate);
        }
    }
    Err(ConfigError::new(
        "files.package",
        format!("package `{package}` not found on {PACKAGE_PATH_ENV}"),
    ))
}

fn flatten_map(
    value: &toml::Value,
    prefix: &str,
    field: &str,
    out: &mut BTreeMap<String, String>,
) -> Result<(), ConfigError> {
    match value {
        toml::Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
            Ok(())
        }
        toml::Value::Table(t) => {
            for (k, v) in t {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                flatten_map(v, &key, &format!("{field}.{k}"), out)?;
            }
            Ok(())
        }
        other => Err(ConfigError::new(
            field,
            format!("expected a signal name or table, got {}", other.type_str()),
        )),
    }
}

fn resolve_params(
    params: &toml::Table,
    parameters: &BTreeMap<String, toml::Value>,
    field: &str,
) -> Result<toml::Table, ConfigError> {
    let mut resolved = toml::Table::new();
    for (key, value) in params {
        let value = match value.as_str().and_then(|s| PARAM_REF_RE.captures(s)) {
            Some(caps) => parameters.get(&caps[1]).cloned().ok_or_else(|| {
                ConfigError::new(
                    format!("{field}.params.{key}"),
                    format!("references unknown parameter `{}`", &caps[1]),
                )
            })?,
            None => value.clone(),
        };
        resolved.insert(key.clone(), value);
    }
    Ok(resolved)
}

fn parse_interface(
    name: &str,
    role: InterfaceRole,
    value: &toml::Value,
    parameters: &BTreeMap<String, toml::Value>,
) -> Result<InterfaceSpec, ConfigError> {
    let field = match role {
        InterfaceRole::Port => format!("ports.{name}"),
        InterfaceRole::Pin => format!("pins.{name}"),
    };
    identifier(name, &field)?;
    if RESERVED_INTERFACE_NAMES.contains(&name) {
        return Err(ConfigError::new(
            &field,
            format!("`{name}` is reserved for simulation paths"),
        ));
    }
    let raw: RawInterface = section(value, &field)?;
    let params = resolve_params(&raw.params, parameters, &field)?;
    let shape = InterfaceShape::from_config(&raw.interface, &params, &field)?;

    let direction = match (raw.direction, shape.is_scalar()) {
        (Some(_), true) => {
            return Err(ConfigError::new(
                format!("{field}.direction"),
                "scalar interfaces take their direction from in(N)/out(N)",
            ))
        }
        (Some(RawDirection::Out), false) => Direction::Out,
        _ => Direction::In,
    };

    let mut vars = Vec::new();
    for (var, kind) in &raw.vars {
        let var_field = format!("{field}.vars.{var}");
        identifier(var, &var_field)?;
        if kind != "int" {
            return Err(ConfigError::new(
                var_field,
                format!("unsupported variable type `{kind}`; expected \"int\""),
            ));
        }
        vars.push(var.clone());
    }

    let members = shape.members(direction);
    let mut map = BTreeMap::new();
    match &raw.map {
        None => {}
        Some(toml::Value::String(signal)) => {
            if !shape.is_scalar() {
                return Err(ConfigError::new(
                    format!("{field}.map"),
                    "a single signal name is only valid for in(N)/out(N); map members with a table",
                ));
            }
            map.insert(
                String::new(),
                expand_signal(signal, &vars, &format!("{field}.map"))?,
            );
        }
        Some(v @ toml::Value::Table(_)) => {
            if shape.is_scalar() {
                return Err(ConfigError::new(
                    format!("{field}.map"),
                    "scalar interfaces are mapped with a single signal name",
                ));
            }
            let mut flat = BTreeMap::new();
            flatten_map(v, "", &format!("{field}.map"), &mut flat)?;
            for (key, signal) in flat {
                let signal = expand_signal(&signal, &vars, &format!("{field}.map.{key}"))?;
                let member = if members.iter().any(|m| m.name == key) {
                    key.clone()
                } else {
                    let underscored = key.replace('.', "_");
                    if members.iter().any(|m| m.name == underscored) {
                        underscored
                    } else {
                        return Err(ConfigError::new(
                            format!("{field}.map.{key}"),
                            format!("`{}` has no member `{key}`", shape.tag()),
                        ));
                    }
                };
                if map.insert(member.clone(), signal).is_some() {
                    return Err(ConfigError::new(
                        format!("{field}.map.{key}"),
                        format!("member `{member}` is mapped twice"),
                    ));
                }
            }
        }
        Some(other) => {
            return Err(ConfigError::new(
                format!("{field}.map"),
                format!("expected a signal name or table, got {}", other.type_str()),
            ))
        }
    }

    if let Some(prefix) = &raw.prefix {
        if prefix.is_empty() {
            return Err(ConfigError::new(format!("{field}.prefix"), "prefix is empty"));
        }
    }

    Ok(InterfaceSpec {
        name: name.to_string(),
        role,
        shape,
        direction,
        prefix: raw.prefix,
        vars,
        map,
    })
}

/// Expands index variables in a mapped signal name. Indexed signals bind
/// their first instance, so every declared variable becomes `0`.
fn expand_signal(signal: &str, vars: &[String], field: &str) -> Result<String, ConfigError> {
    let mut undeclared = None;
    let expanded = TEMPLATE_RE.replace_all(signal, |caps: &regex::Captures| {
        if vars.iter().any(|v| v == &caps[1]) {
            "0".to_string()
        } else {
            undeclared.get_or_insert_with(|| caps[1].to_string());
            caps[0].to_string()
        }
    });
    match undeclared {
        Some(name) => Err(ConfigError::new(
            field,
            format!("`{{{name}}}` in `{signal}` is not declared in `vars`"),
        )),
        None => Ok(expanded.into_owned()),
    }
}

fn parse_generator(
    raw: RawGenerate,
) -> Result<(GeneratorConfig, BTreeMap<String, toml::Value>), ConfigError> {
    let stray = [
        ("sv2v", raw.sv2v.is_some(), Backend::SystemVerilog),
        ("spinalhdl", raw.spinalhdl.is_some(), Backend::SpinalHdl),
        ("yosys_slang", raw.yosys_slang.is_some(), Backend::YosysSlang),
    ];
    for (key, present, owner) in stray {
        if present && owner != raw.generator {
            return Err(ConfigError::new(
                format!("generate.{key}"),
                format!("options for `{owner}` given but generator is `{}`", raw.generator),
            ));
        }
    }
    let backend = match raw.generator {
        Backend::Verilog => BackendConfig::Verilog,
        Backend::SystemVerilog => BackendConfig::SystemVerilog(raw.sv2v.unwrap_or_default()),
        Backend::YosysSlang => BackendConfig::YosysSlang(raw.yosys_slang.unwrap_or_default()),
        Backend::SpinalHdl => {
            let options = raw.spinalhdl.ok_or_else(|| {
                ConfigError::new(
                    "generate.spinalhdl",
                    "the spinalhdl generator needs a [generate.spinalhdl] table with `scala_class`",
                )
            })?;
            for (i, option) in options.options.iter().enumerate() {
                for caps in TEMPLATE_RE.captures_iter(option) {
                    if !raw.parameters.contains_key(&caps[1]) {
                        return Err(ConfigError::new(
                            format!("generate.spinalhdl.options[{i}]"),
                            format!("references unknown parameter `{}`", &caps[1]),
                        ));
                    }
                }
            }
            BackendConfig::SpinalHdl(options)
        }
    };
    if raw.timeout_secs == Some(0) {
        return Err(ConfigError::new(
            "generate.timeout_secs",
            "timeout must be at least one second",
        ));
    }
    Ok((
        GeneratorConfig {
            backend,
            timeout_secs: raw.timeout_secs,
        },
        raw.parameters,
    ))
}

impl WrapperConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::new(
                path.display().to_string(),
                format!("could not read config: {e}"),
            )
        })?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_toml_str(&text, dir)
    }

    pub fn from_bytes(bytes: &[u8], config_dir: &Path) -> Result<Self, ConfigError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| ConfigError::new("<document>", format!("not valid UTF-8: {e}")))?;
        Self::from_toml_str(text, config_dir)
    }

    pub fn from_toml_str(text: &str, config_dir: &Path) -> Result<Self, ConfigError> {
        let doc: toml::Table = text
            .parse()
            .map_err(|e: toml::de::Error| ConfigError::new("<document>", e.message().to_string()))?;
        for key in doc.keys() {
            if !TOP_LEVEL_KEYS.contains(&key.as_str()) {
                return Err(ConfigError::new(key.as_str(), "unknown top-level key"));
            }
        }

        let name = doc
            .get("name")
            .ok_or_else(|| ConfigError::new("name", "required field is missing"))?
            .as_str()
            .ok_or_else(|| ConfigError::new("name", "expected a string"))?
            .to_string();
        identifier(&name, "name")?;

        let files: RawFiles = section(
            doc.get("files")
                .ok_or_else(|| ConfigError::new("files", "required section is missing"))?,
            "files",
        )?;
        let (source, source_dir) = match (files.path, files.package) {
            (Some(path), None) => {
                let resolved = if path.is_absolute() {
                    path.clone()
                } else {
                    config_dir.join(&path)
                };
                (SourceLocation::Path(path), resolved)
            }
            (None, Some(package)) => {
                let resolved = resolve_package(&package)?;
                (SourceLocation::Package(package), resolved)
            }
            _ => {
                return Err(ConfigError::new(
                    "files",
                    "exactly one of `path` or `package` must be given",
                ))
            }
        };

        let (generator, parameters) = match doc.get("generate") {
            Some(v) => parse_generator(section(v, "generate")?)?,
            None => (GeneratorConfig::pass_through(), BTreeMap::new()),
        };

        let mut claimed_signals: HashMap<String, String> = HashMap::new();
        let mut claim = |signal: &str, field: String| -> Result<(), ConfigError> {
            if signal.is_empty() {
                return Err(ConfigError::new(field, "signal name is empty"));
            }
            if let Some(previous) = claimed_signals.insert(signal.to_string(), field.clone()) {
                return Err(ConfigError::new(
                    field,
                    format!("signal `{signal}` is already used by `{previous}`"),
                ));
            }
            Ok(())
        };

        let mut clocks = Vec::new();
        if let Some(v) = doc.get("clocks") {
            for (domain, signal) in table(v, "clocks")? {
                let field = format!("clocks.{domain}");
                identifier(domain, &field)?;
                let signal = signal
                    .as_str()
                    .ok_or_else(|| ConfigError::new(&field, "expected a signal name"))?;
                claim(signal, field)?;
                clocks.push(ClockSpec {
                    domain: domain.clone(),
                    signal: signal.to_string(),
                });
            }
        }

        let mut resets = Vec::new();
        if let Some(v) = doc.get("resets") {
            for (domain, entry) in table(v, "resets")? {
                let field = format!("resets.{domain}");
                identifier(domain, &field)?;
                let (signal, active_low) = match section::<RawReset>(entry, &field)? {
                    RawReset::Signal(signal) => (signal, true),
                    RawReset::Detailed { signal, active_low } => (signal, active_low),
                };
                claim(&signal, field)?;
                resets.push(ResetSpec {
                    domain: domain.clone(),
                    signal,
                    active_low,
                });
            }
        }

        let mut seen_interfaces: HashMap<String, String> = HashMap::new();
        let mut interfaces = |key: &str, role: InterfaceRole| -> Result<Vec<InterfaceSpec>, ConfigError> {
            let mut specs = Vec::new();
            if let Some(v) = doc.get(key) {
                for (name, entry) in table(v, key)? {
                    let spec = parse_interface(name, role, entry, &parameters)?;
                    if let Some(previous) = seen_interfaces.insert(name.clone(), spec.field()) {
                        return Err(ConfigError::new(
                            spec.field(),
                            format!("name is already declared as `{previous}`"),
                        ));
                    }
                    specs.push(spec);
                }
            }
            Ok(specs)
        };
        let ports = interfaces("ports", InterfaceRole::Port)?;
        let pins = interfaces("pins", InterfaceRole::Pin)?;

        let driver = match doc.get("driver") {
            Some(v) => Some(section::<DriverSpec>(v, "driver")?),
            None => None,
        };

        log::debug!(
            "loaded wrapper config {name}: {} clock(s), {} reset(s), {} port(s), {} pin(s)",
            clocks.len(),
            resets.len(),
            ports.len(),
            pins.len()
        );

        Ok(WrapperConfig {
            module: ModuleSpec {
                name,
                source,
                source_dir,
                parameters,
            },
            generator,
            clocks,
            resets,
            ports,
            pins,
            driver,
            config_dir: config_dir.to_path_buf(),
        })
    }

    /// Ports followed by pins, each in declaration order.
    pub fn interfaces(&self) -> impl Iterator<Item = &InterfaceSpec> {
        self.ports.iter().chain(self.pins.iter())
    }

    pub fn interface(&self, name: &str) -> Option<&InterfaceSpec> {
        self.interfaces().find(|i| i.name == name)
    }
}

/// Expands `{param}` references in `template` with module parameter values.
pub fn render_template(
    template: &str,
    parameters: &BTreeMap<String, toml::Value>,
) -> Result<String, String> {
    let mut missing = None;
    let rendered = TEMPLATE_RE.replace_all(template, |caps: &regex::Captures| {
        match parameters.get(&caps[1]) {
            Some(toml::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => {
                missing = Some(caps[1].to_string());
                String::new()
            }
        }
    });
    match missing {
        Some(name) => Err(format!("unknown parameter `{name}` in `{template}`")),
        None => Ok(rendered.into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn load(text: &str) -> Result<WrapperConfig, ConfigError> {
        WrapperConfig::from_toml_str(text, Path::new("/work"))
    }

    const TIMER: &str = r#"
name = "wb_timer"

[files]
path = "rtl"

[generate]
generator = "systemverilog"
parameters = { width = 32 }

[generate.sv2v]
top_module = "wb_timer"
defines = { SYNTHESIS = "1" }

[clocks]
sys = "i_clk"

[resets]
sys = "i_rst_n"

[ports.bus]
interface = "wishbone"
params = { addr_width = 4, data_width = "{width}" }
map = { dat = { r = "o_wb_dat", w = "i_wb_dat" } }

[pins.irq]
interface = "out(1)"
map = "o_irq"

[driver]
regs_struct = "timer_regs_t"
h_files = ["drivers/timer.h"]
"#;

    #[test]
    fn loads_complete_document() {
        let cfg = load(TIMER).unwrap();
        assert_eq!(cfg.module.name, "wb_timer");
        assert_eq!(cfg.module.source_dir, PathBuf::from("/work/rtl"));
        assert_eq!(cfg.generator.backend.backend(), Backend::SystemVerilog);
        assert_eq!(
            cfg.clocks,
            vec![ClockSpec {
                domain: "sys".to_string(),
                signal: "i_clk".to_string()
            }]
        );
        assert!(cfg.resets[0].active_low);

        let bus = &cfg.ports[0];
        assert_eq!(
            bus.shape,
            InterfaceShape::Wishbone {
                addr_width: 4,
                data_width: 32,
                granularity: 32,
                features: Default::default(),
            }
        );
        assert_eq!(bus.map.get("dat_r").map(String::as_str), Some("o_wb_dat"));
        assert_eq!(bus.map.get("dat_w").map(String::as_str), Some("i_wb_dat"));

        let irq = &cfg.pins[0];
        assert_eq!(irq.map.get("").map(String::as_str), Some("o_irq"));
        assert_eq!(
            cfg.driver.as_ref().unwrap().regs_struct.as_deref(),
            Some("timer_regs_t")
        );
    }

    #[test]
    fn missing_generate_means_pass_through() {
        let cfg = load("name = \"m\"\n[files]\npath = \"rtl\"\n").unwrap();
        assert_eq!(cfg.generator, GeneratorConfig::pass_through());
        assert!(cfg.ports.is_empty());
    }

    #[test]
    fn unknown_top_level_key_is_rejected() {
        let err = load("name = \"m\"\nfiles = { path = \"x\" }\nextra = 1\n").unwrap_err();
        assert_eq!(err.field, "extra");
    }

    #[test]
    fn unknown_interface_key_is_rejected() {
        let err = load(
            "name = \"m\"\nfiles = { path = \"x\" }\n[pins.led]\ninterface = \"out(1)\"\nwidth = 1\n",
        )
        .unwrap_err();
        assert_eq!(err.field, "pins.led");
        assert!(err.message.contains("width"), "{}", err.message);
    }

    #[test]
    fn index_vars_expand_to_first_instance() {
        let cfg = load(
            r#"
name = "m"
files = { path = "x" }
[ports.gpio]
interface = "gpio"
params = { pin_count = 1 }
vars = { n = "int" }
map = { o = "o_gpio{n}", oe = "o_gpio{n}_oe", i = "i_gpio{n}" }
[pins.led]
interface = "out(1)"
vars = { n = "int" }
map = "o_led{n}"
"#,
        )
        .unwrap();
        let gpio = &cfg.ports[0];
        assert_eq!(gpio.vars, vec!["n".to_string()]);
        assert_eq!(gpio.map["o"], "o_gpio0");
        assert_eq!(gpio.map["oe"], "o_gpio0_oe");
        assert_eq!(gpio.map["i"], "i_gpio0");
        assert_eq!(cfg.pins[0].map[""], "o_led0");
    }

    #[test]
    fn index_vars_are_validated() {
        let base = "name = \"m\"\nfiles = { path = \"x\" }\n[pins.led]\ninterface = \"out(1)\"\n";
        let err = load(&format!("{base}vars = {{ n = \"str\" }}\nmap = \"o_led{{n}}\"\n")).unwrap_err();
        assert_eq!(err.field, "pins.led.vars.n");
        let err = load(&format!("{base}map = \"o_led{{n}}\"\n")).unwrap_err();
        assert_eq!(err.field, "pins.led.map");
        assert!(err.message.contains("{n}"), "{}", err.message);
    }

    #[test]
    fn member_mapped_twice_is_rejected() {
        let err = load(
            r#"
name = "m"
files = { path = "x" }
[ports.bus]
interface = "wishbone"
params = { addr_width = 4, data_width = 32 }
map = { dat = { r = "o_dat" }, dat_r = "o_dat2" }
"#,
        )
        .unwrap_err();
        assert_eq!(err.field, "ports.bus.map.dat_r");
        assert!(err.message.contains("mapped twice"), "{}", err.message);
    }

    #[test]
    fn files_needs_exactly_one_location() {
        let err = load("name = \"m\"\n[files]\npath = \"a\"\npackage = \"b.c\"\n").unwrap_err();
        assert_eq!(err.field, "files");
        let err = load("name = \"m\"\n[files]\n").unwrap_err();
        assert_eq!(err.field, "files");
    }

    #[test]
    fn unresolved_parameter_reference_is_named() {
        let err = load(
            "name = \"m\"\nfiles = { path = \"x\" }\n[ports.bus]\ninterface = \"csr\"\nparams = { addr_width = \"{aw}\", data_width = 8 }\n",
        )
        .unwrap_err();
        assert_eq!(err.field, "ports.bus.params.addr_width");
    }

    #[test]
    fn map_key_must_name_member() {
        let err = load(
            "name = \"m\"\nfiles = { path = \"x\" }\n[ports.bus]\ninterface = \"csr\"\nparams = { addr_width = 4, data_width = 8 }\nmap = { strobe = \"s\" }\n",
        )
        .unwrap_err();
        assert_eq!(err.field, "ports.bus.map.strobe");
    }

    #[test]
    fn string_map_only_for_scalars() {
        let err = load(
            "name = \"m\"\nfiles = { path = \"x\" }\n[pins.uart]\ninterface = \"uart\"\nmap = \"tx\"\n",
        )
        .unwrap_err();
        assert_eq!(err.field, "pins.uart.map");
    }

    #[test]
    fn nested_uart_map_flattens_to_dotted_members() {
        let cfg = load(
            "name = \"m\"\nfiles = { path = \"x\" }\n[pins.uart]\ninterface = \"uart\"\nmap = { tx = { o = \"txd_o\" }, rx = { i = \"rxd_i\" } }\n",
        )
        .unwrap();
        let uart = &cfg.pins[0];
        assert_eq!(uart.map.get("tx.o").map(String::as_str), Some("txd_o"));
        assert_eq!(uart.map.get("rx.i").map(String::as_str), Some("rxd_i"));
    }

    #[test]
    fn reserved_interface_names() {
        let err = load(
            "name = \"m\"\nfiles = { path = \"x\" }\n[pins.clocks]\ninterface = \"in(1)\"\n",
        )
        .unwrap_err();
        assert_eq!(err.field, "pins.clocks");
    }

    #[test]
    fn duplicate_interface_names_across_sections() {
        let err = load(
            "name = \"m\"\nfiles = { path = \"x\" }\n[ports.a]\ninterface = \"uart\"\n[pins.a]\ninterface = \"in(1)\"\n",
        )
        .unwrap_err();
        assert_eq!(err.field, "pins.a");
    }

    #[test]
    fn reset_polarity_forms() {
        let cfg = load(
            "name = \"m\"\nfiles = { path = \"x\" }\n[resets]\nsys = \"rst_n\"\nio = { signal = \"rst\", active_low = false }\n",
        )
        .unwrap();
        assert_eq!(
            cfg.resets,
            vec![
                ResetSpec {
                    domain: "sys".to_string(),
                    signal: "rst_n".to_string(),
                    active_low: true
                },
                ResetSpec {
                    domain: "io".to_string(),
                    signal: "rst".to_string(),
                    active_low: false
                },
            ]
        );
    }

    #[test]
    fn clock_and_reset_cannot_share_a_signal() {
        let err = load(
            "name = \"m\"\nfiles = { path = \"x\" }\n[clocks]\nsys = \"clk\"\n[resets]\nsys = \"clk\"\n",
        )
        .unwrap_err();
        assert_eq!(err.field, "resets.sys");
    }

    #[test]
    fn backend_options_must_match_generator() {
        let err = load(
            "name = \"m\"\nfiles = { path = \"x\" }\n[generate]\ngenerator = \"verilog\"\n[generate.sv2v]\ntop_module = \"m\"\n",
        )
        .unwrap_err();
        assert_eq!(err.field, "generate.sv2v");
    }

    #[test]
    fn spinalhdl_requires_its_table_and_known_templates() {
        let err = load(
            "name = \"m\"\nfiles = { path = \"x\" }\n[generate]\ngenerator = \"spinalhdl\"\n",
        )
        .unwrap_err();
        assert_eq!(err.field, "generate.spinalhdl");

        let err = load(
            "name = \"m\"\nfiles = { path = \"x\" }\n[generate]\ngenerator = \"spinalhdl\"\nparameters = { width = 8 }\n[generate.spinalhdl]\nscala_class = \"a.B\"\noptions = [\"--width={width}\", \"--depth={depth}\"]\n",
        )
        .unwrap_err();
        assert_eq!(err.field, "generate.spinalhdl.options[1]");
    }

    #[test]
    fn scalar_direction_key_is_rejected() {
        let err = load(
            "name = \"m\"\nfiles = { path = \"x\" }\n[pins.irq]\ninterface = \"out(1)\"\ndirection = \"in\"\n",
        )
        .unwrap_err();
        assert_eq!(err.field, "pins.irq.direction");
    }

    #[test]
    fn declaration_order_is_preserved() {
        let cfg = load(
            "name = \"m\"\nfiles = { path = \"x\" }\n[pins.zeta]\ninterface = \"in(1)\"\n[pins.alpha]\ninterface = \"in(1)\"\n",
        )
        .unwrap();
        let names: Vec<&str> = cfg.pins.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }

    #[test]
    fn render_template_expands_parameters() {
        let mut params = BTreeMap::new();
        params.insert("width".to_string(), toml::Value::Integer(16));
        params.insert("mode".to_string(), toml::Value::String("fast".to_string()));
        assert_eq!(
            render_template("--width={width} --mode={mode}", &params).unwrap(),
            "--width=16 --mode=fast"
        );
        assert!(render_template("{nope}", &params).is_err());
    }
}
