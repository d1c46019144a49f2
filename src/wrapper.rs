// SPDX-License-Identifier: Apache-2.0

//! Wrapper assembler: regroups a [`SignalMapping`] into the structured ports
//! and pins the config declared, producing the component description handed
//! to the host design framework.
//!
//! Assembly never touches signal values. It can fail only when the mapping
//! it is given does not cover the config it is assembled against.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::auto_map::SignalMapping;
use crate::config::{Backend, DriverSpec, InterfaceRole, InterfaceSpec, WrapperConfig};
use crate::generate::GeneratedArtifact;
use crate::interface::{Direction, InterfaceShape};
use crate::rtlwrap_error::MappingError;
use crate::verilog_ports::PortInfo;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClockDomain {
    pub name: String,
    pub signal: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResetDomain {
    pub name: String,
    pub signal: String,
    pub active_low: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WrapperMember {
    /// Empty for scalar pins.
    pub name: String,
    pub path: String,
    pub width: u32,
    pub direction: Direction,
    pub required: bool,
    /// `None` only for an optional member that nothing matched.
    pub signal: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WrapperInterface {
    pub name: String,
    pub role: InterfaceRole,
    pub shape: InterfaceShape,
    pub direction: Direction,
    pub members: Vec<WrapperMember>,
}

impl WrapperInterface {
    pub fn member(&self, name: &str) -> Option<&WrapperMember> {
        self.members.iter().find(|m| m.name == name)
    }

    pub fn is_scalar(&self) -> bool {
        self.shape.is_scalar()
    }
}

/// What one foreign port is wired to when the module is instantiated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConnectionTarget {
    Clock { domain: String },
    /// `inverted` is set for active-low resets: the domain's logical reset is
    /// active-high.
    Reset { domain: String, inverted: bool },
    Member { path: String },
    /// An unclaimed input, driven with zero.
    TiedOff,
    /// An unclaimed output, left unconnected.
    Open,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceConnection {
    pub signal: String,
    pub width: u32,
    pub direction: Direction,
    pub target: ConnectionTarget,
}

/// The host-consumable description of one wrapped module.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WrapperComponent {
    pub name: String,
    pub top_module: String,
    pub backend: Backend,
    /// Parameter overrides the generated top module accepts.
    pub parameters: BTreeMap<String, toml::Value>,
    pub clock_domains: Vec<ClockDomain>,
    pub reset_domains: Vec<ResetDomain>,
    pub ports: Vec<WrapperInterface>,
    pub pins: Vec<WrapperInterface>,
    pub sources: Vec<PathBuf>,
    pub foreign_ports: Vec<PortInfo>,
    pub driver: Option<DriverSpec>,
}

fn assemble_interface(
    spec: &InterfaceSpec,
    mapping: &SignalMapping,
    artifact: &GeneratedArtifact,
) -> Result<WrapperInterface, MappingError> {
    let mut members = Vec::new();
    for member in spec.members() {
        let path = member.path(&spec.name);
        let signal = mapping.member(&path).map(|b| b.signal.clone());
        match &signal {
            None if member.required => return Err(MappingError::Unbound(path)),
            Some(signal) if artifact.port(signal).is_none() => {
                return Err(MappingError::UnknownSignal {
                    member: path,
                    signal: signal.clone(),
                })
            }
            _ => {}
        }
        members.push(WrapperMember {
            name: member.name,
            path,
            width: member.width,
            direction: member.direction,
            required: member.required,
            signal,
        });
    }
    Ok(WrapperInterface {
        name: spec.name.clone(),
        role: spec.role,
        shape: spec.shape.clone(),
        direction: spec.direction,
        members,
    })
}

/// Renders a parameter value as a Verilog constant, if it has one.
fn verilog_literal(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Boolean(b) => Some(if *b { "1" } else { "0" }.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::String(s) => Some(format!("\"{}\"", s.replace('"', "\\\""))),
        _ => None,
    }
}

/// Builds the component for `config` out of its generated artifact and
/// resolved mapping.
pub fn assemble(
    config: &WrapperConfig,
    artifact: &GeneratedArtifact,
    mapping: &SignalMapping,
) -> Result<WrapperComponent, MappingError> {
    let mut clock_domains = Vec::with_capacity(config.clocks.len());
    for clock in &config.clocks {
        let binding = mapping
            .clocks()
            .iter()
            .find(|c| c.domain == clock.domain)
            .ok_or_else(|| MappingError::Unbound(format!("clocks.{}", clock.domain)))?;
        clock_domains.push(ClockDomain {
            name: binding.domain.clone(),
            signal: binding.signal.clone(),
        });
    }
    let mut reset_domains = Vec::with_capacity(config.resets.len());
    for reset in &config.resets {
        let binding = mapping
            .resets()
            .iter()
            .find(|r| r.domain == reset.domain)
            .ok_or_else(|| MappingError::Unbound(format!("resets.{}", reset.domain)))?;
        reset_domains.push(ResetDomain {
            name: binding.domain.clone(),
            signal: binding.signal.clone(),
            active_low: binding.active_low,
        });
    }

    let ports = config
        .ports
        .iter()
        .map(|spec| assemble_interface(spec, mapping, artifact))
        .collect::<Result<Vec<_>, _>>()?;
    let pins = config
        .pins
        .iter()
        .map(|spec| assemble_interface(spec, mapping, artifact))
        .collect::<Result<Vec<_>, _>>()?;

    let mut parameters = BTreeMap::new();
    for (name, value) in artifact.applicable_parameters(&config.module.parameters) {
        if verilog_literal(value).is_some() {
            parameters.insert(name.to_string(), value.clone());
        } else {
            log::warn!(
                "parameter {name} of {} has no Verilog form; not passed to the instance",
                config.module.name
            );
        }
    }

    log::info!(
        "assembled {}: {} clock(s), {} reset(s), {} port(s), {} pin(s)",
        config.module.name,
        clock_domains.len(),
        reset_domains.len(),
        ports.len(),
        pins.len()
    );
    Ok(WrapperComponent {
        name: config.module.name.clone(),
        top_module: artifact.top_module.clone(),
        backend: artifact.backend,
        parameters,
        clock_domains,
        reset_domains,
        ports,
        pins,
        sources: artifact.sources.clone(),
        foreign_ports: artifact.ports.clone(),
        driver: config.driver.clone(),
    })
}

impl WrapperComponent {
    /// Looks up a port or pin by name.
    pub fn interface(&self, name: &str) -> Option<&WrapperInterface> {
        self.interfaces().find(|i| i.name == name)
    }

    pub fn interfaces(&self) -> impl Iterator<Item = &WrapperInterface> {
        self.ports.iter().chain(self.pins.iter())
    }

    /// One entry per foreign port, in the module's declaration order.
    pub fn connections(&self) -> Vec<InstanceConnection> {
        let mut by_signal: BTreeMap<&str, ConnectionTarget> = BTreeMap::new();
        for clock in &self.clock_domains {
            by_signal.insert(
                &clock.signal,
                ConnectionTarget::Clock {
                    domain: clock.name.clone(),
                },
            );
        }
        for reset in &self.reset_domains {
            by_signal.insert(
                &reset.signal,
                ConnectionTarget::Reset {
                    domain: reset.name.clone(),
                    inverted: reset.active_low,
                },
            );
        }
        for member in self.interfaces().flat_map(|i| i.members.iter()) {
            if let Some(signal) = &member.signal {
                by_signal.insert(
                    signal,
                    ConnectionTarget::Member {
                        path: member.path.clone(),
                    },
                );
            }
        }
        self.foreign_ports
            .iter()
            .map(|port| InstanceConnection {
                signal: port.name.clone(),
                width: port.width,
                direction: port.direction,
                target: match by_signal.remove(port.name.as_str()) {
                    Some(target) => target,
                    None if port.direction == Direction::In => ConnectionTarget::TiedOff,
                    None => ConnectionTarget::Open,
                },
            })
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn shim_module_name(&self) -> String {
        format!("{}_wrapper", self.name)
    }

    /// A Verilog module exposing the structured ports as flat
    /// `<port>__<member>` signals around an instance of the foreign module.
    pub fn verilog_shim(&self) -> VerilogShim<'_> {
        VerilogShim { component: self }
    }

    pub fn emit_verilog_shim(&self) -> String {
        self.verilog_shim().to_string()
    }
}

/// Name of the shim port carrying `member` of `interface`.
pub fn shim_port_name(interface: &str, member: &str) -> String {
    if member.is_empty() {
        interface.to_string()
    } else {
        format!("{}__{}", interface, member.replace('.', "_"))
    }
}

fn range(width: u32) -> String {
    if width == 1 {
        String::new()
    } else {
        format!("[{}:0] ", width - 1)
    }
}

pub struct VerilogShim<'a> {
    component: &'a WrapperComponent,
}

impl fmt::Display for VerilogShim<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = self.component;
        let mut ports = Vec::new();
        for clock in &c.clock_domains {
            ports.push(format!("input wire clk_{}", clock.name));
        }
        for reset in &c.reset_domains {
            ports.push(format!("input wire rst_{}", reset.name));
        }
        for interface in c.interfaces() {
            for member in interface.members.iter().filter(|m| m.signal.is_some()) {
                ports.push(format!(
                    "{} wire {}{}",
                    member.direction.verilog_keyword(),
                    range(member.width),
                    shim_port_name(&interface.name, &member.name)
                ));
            }
        }

        writeln!(f, "module {}(", c.shim_module_name())?;
        writeln!(f, "  {}", ports.join(",\n  "))?;
        writeln!(f, ");")?;

        write!(f, "  {} ", c.top_module)?;
        if !c.parameters.is_empty() {
            let overrides: Vec<String> = c
                .parameters
                .iter()
                .filter_map(|(name, value)| {
                    verilog_literal(value).map(|v| format!(".{name}({v})"))
                })
                .collect();
            writeln!(f, "#(")?;
            writeln!(f, "    {}", overrides.join(",\n    "))?;
            write!(f, "  ) ")?;
        }
        writeln!(f, "u_{} (", c.name)?;

        let mut member_ports: BTreeMap<&str, String> = BTreeMap::new();
        for interface in c.interfaces() {
            for member in &interface.members {
                if let Some(signal) = &member.signal {
                    member_ports.insert(signal, shim_port_name(&interface.name, &member.name));
                }
            }
        }
        let connections: Vec<String> = c
            .connections()
            .into_iter()
            .map(|conn| {
                let expr = match conn.target {
                    ConnectionTarget::Clock { domain } => format!("clk_{domain}"),
                    ConnectionTarget::Reset { domain, inverted } => {
                        format!("{}rst_{domain}", if inverted { "~" } else { "" })
                    }
                    ConnectionTarget::Member { .. } => member_ports
                        .get(conn.signal.as_str())
                        .cloned()
                        .unwrap_or_default(),
                    ConnectionTarget::TiedOff => format!("{}'d0", conn.width),
                    ConnectionTarget::Open => String::new(),
                };
                format!(".{}({})", conn.signal, expr)
            })
            .collect();
        writeln!(f, "    {}", connections.join(",\n    "))?;
        writeln!(f, "  );")?;
        writeln!(f, "endmodule")
    }
}
