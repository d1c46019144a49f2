// SPDX-License-Identifier: Apache-2.0

//! Resolves structured interface members to the foreign module's flat
//! signals.
//!
//! Order of resolution:
//!
//! 1. Clocks and resets, by configured name.
//! 2. Every explicit `map` override, in declaration order.
//! 3. Every remaining member, in declaration order, by name heuristics.
//!
//! A signal is claimed at most once. Heuristics only ever see signals that
//! nothing has claimed yet, and never pick between several equally good
//! candidates.

use std::collections::HashMap;
use std::fmt;

use log::debug;
use serde::Serialize;

use crate::config::{ClockSpec, InterfaceSpec, ResetSpec};
use crate::interface::{Direction, Member};
use crate::rtlwrap_error::MappingError;
use crate::verilog_ports::PortInfo;

const PREFIX_MARKERS: &[&str] = &["out_", "in_", "i_", "o_"];
const SUFFIX_MARKERS: &[&str] = &["_out", "_in", "_ni", "_no", "_i", "_o"];

/// Lowercased `_`-separated tokens of `name` with one direction marker
/// (`i_`, `o_`, `in_`, `out_`, `_i`, `_o`, `_ni`, `_no`, `_in`, `_out`)
/// removed.
pub fn core_tokens(name: &str) -> Vec<String> {
    let lowered = name.to_ascii_lowercase();
    let mut core = lowered.as_str();
    if let Some(rest) = PREFIX_MARKERS
        .iter()
        .find_map(|p| core.strip_prefix(p))
        .filter(|rest| !rest.is_empty())
    {
        core = rest;
    } else if let Some(rest) = SUFFIX_MARKERS
        .iter()
        .find_map(|s| core.strip_suffix(s))
        .filter(|rest| !rest.is_empty())
    {
        core = rest;
    }
    core.split('_')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn tokens(s: &str) -> Vec<String> {
    s.to_ascii_lowercase()
        .split(|c| c == '_' || c == '.')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn contains_run(haystack: &[String], needle: &[String]) -> bool {
    !needle.is_empty()
        && haystack.len() >= needle.len()
        && haystack.windows(needle.len()).any(|w| w == needle)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Tier {
    Exact,
    Suffix,
    Contains,
    ContainsAnyDirection,
}

struct NamePattern {
    tier: Tier,
    alias: Vec<String>,
    direction: Direction,
}

impl NamePattern {
    fn matches(&self, candidate: &Candidate) -> bool {
        let core = &candidate.core;
        let by_name = match self.tier {
            Tier::Exact => core == &self.alias,
            Tier::Suffix => core.len() > self.alias.len() && core.ends_with(&self.alias),
            Tier::Contains | Tier::ContainsAnyDirection => contains_run(core, &self.alias),
        };
        by_name
            && (self.tier == Tier::ContainsAnyDirection
                || candidate.port.direction.can_carry(self.direction))
    }
}

impl fmt::Display for NamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let alias = self.alias.join("_");
        match self.tier {
            Tier::Exact => write!(f, "name == `{alias}` ({})", self.direction),
            Tier::Suffix => write!(f, "name ends with `_{alias}` ({})", self.direction),
            Tier::Contains => write!(f, "name contains `{alias}` ({})", self.direction),
            Tier::ContainsAnyDirection => write!(f, "name contains `{alias}` (any direction)"),
        }
    }
}

/// Patterns for `member`, tier-major: every alias at the strictest tier
/// before any alias at the next.
fn patterns_for(member: &Member) -> Vec<NamePattern> {
    let aliases: Vec<Vec<String>> = member
        .aliases
        .iter()
        .map(|a| tokens(a))
        .filter(|t| !t.is_empty())
        .collect();
    let mut patterns = Vec::new();
    for tier in [
        Tier::Exact,
        Tier::Suffix,
        Tier::Contains,
        Tier::ContainsAnyDirection,
    ] {
        for alias in &aliases {
            patterns.push(NamePattern {
                tier,
                alias: alias.clone(),
                direction: member.direction,
            });
        }
    }
    patterns
}

struct Candidate<'a> {
    port: &'a PortInfo,
    core: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BindingOrigin {
    Explicit,
    Heuristic { pattern: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberBinding {
    pub interface: String,
    /// Empty for scalar pins.
    pub member: String,
    /// `interface.member`, or just `interface` for scalar pins.
    pub path: String,
    pub signal: String,
    pub width: u32,
    /// Direction the member needs, from the module's point of view.
    pub direction: Direction,
    pub origin: BindingOrigin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClockBinding {
    pub domain: String,
    pub signal: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResetBinding {
    pub domain: String,
    pub signal: String,
    pub active_low: bool,
}

/// Resolution of a structured path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolved<'a> {
    Clock(&'a ClockBinding),
    Reset(&'a ResetBinding),
    Member(&'a MemberBinding),
}

impl<'a> Resolved<'a> {
    pub fn signal(&self) -> &'a str {
        match self {
            Resolved::Clock(c) => &c.signal,
            Resolved::Reset(r) => &r.signal,
            Resolved::Member(m) => &m.signal,
        }
    }
}

/// The resolved binding table for one module instance. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignalMapping {
    clocks: Vec<ClockBinding>,
    resets: Vec<ResetBinding>,
    members: Vec<MemberBinding>,
    /// Optional members nothing matched.
    unbound: Vec<String>,
}

impl SignalMapping {
    pub fn clocks(&self) -> &[ClockBinding] {
        &self.clocks
    }

    pub fn resets(&self) -> &[ResetBinding] {
        &self.resets
    }

    pub fn members(&self) -> &[MemberBinding] {
        &self.members
    }

    pub fn unbound(&self) -> &[String] {
        &self.unbound
    }

    pub fn member(&self, path: &str) -> Option<&MemberBinding> {
        self.members.iter().find(|m| m.path == path)
    }

    pub fn interface_members<'a>(
        &'a self,
        interface: &'a str,
    ) -> impl Iterator<Item = &'a MemberBinding> + 'a {
        self.members.iter().filter(move |m| m.interface == interface)
    }

    /// Resolves `clocks.<domain>`, `resets.<domain>`, `<port>.<member>` or
    /// `<pin>`.
    pub fn resolve(&self, path: &str) -> Option<Resolved<'_>> {
        if let Some(domain) = path.strip_prefix("clocks.") {
            return self
                .clocks
                .iter()
                .find(|c| c.domain == domain)
                .map(Resolved::Clock);
        }
        if let Some(domain) = path.strip_prefix("resets.") {
            return self
                .resets
                .iter()
                .find(|r| r.domain == domain)
                .map(Resolved::Reset);
        }
        self.member(path).map(Resolved::Member)
    }

    /// Signals claimed by this mapping, in claim order.
    pub fn claimed_signals(&self) -> Vec<&str> {
        self.clocks
            .iter()
            .map(|c| c.signal.as_str())
            .chain(self.resets.iter().map(|r| r.signal.as_str()))
            .chain(self.members.iter().map(|m| m.signal.as_str()))
            .collect()
    }
}

/// One member the mapper must resolve.
#[derive(Debug, Clone)]
pub struct MemberRequest {
    pub interface: String,
    pub member: Member,
    pub explicit: Option<String>,
    pub prefix: Option<String>,
}

impl MemberRequest {
    pub fn path(&self) -> String {
        self.member.path(&self.interface)
    }
}

/// Expands interface specs into member requests, in declaration order.
pub fn requests_for<'a, I>(interfaces: I) -> Vec<MemberRequest>
where
    I: IntoIterator<Item = &'a InterfaceSpec>,
{
    let mut requests = Vec::new();
    for spec in interfaces {
        for member in spec.members() {
            requests.push(MemberRequest {
                interface: spec.name.clone(),
                explicit: spec.map.get(&member.name).cloned(),
                prefix: spec.prefix.clone(),
                member,
            });
        }
    }
    requests
}

struct Mapper<'a> {
    ports: &'a [PortInfo],
    candidates: Vec<Candidate<'a>>,
    /// signal -> path of the claimant
    claimed: HashMap<String, String>,
}

impl<'a> Mapper<'a> {
    fn new(ports: &'a [PortInfo]) -> Self {
        Mapper {
            ports,
            candidates: ports
                .iter()
                .map(|port| Candidate {
                    port,
                    core: core_tokens(&port.name),
                })
                .collect(),
            claimed: HashMap::new(),
        }
    }

    fn port(&self, path: &str, signal: &str) -> Result<&'a PortInfo, MappingError> {
        self.ports
            .iter()
            .find(|p| p.name == signal)
            .ok_or_else(|| MappingError::UnknownSignal {
                member: path.to_string(),
                signal: signal.to_string(),
            })
    }

    fn check(
        path: &str,
        port: &PortInfo,
        width: u32,
        direction: Direction,
    ) -> Result<(), MappingError> {
        if port.width == width && port.direction.can_carry(direction) {
            Ok(())
        } else {
            Err(MappingError::Incompatible {
                member: path.to_string(),
                signal: port.name.clone(),
                expected_width: width,
                actual_width: port.width,
                expected_direction: direction,
                actual_direction: port.direction,
            })
        }
    }

    fn claim(&mut self, signal: &str, path: &str) -> Result<(), MappingError> {
        if let Some(first) = self.claimed.get(signal) {
            return Err(MappingError::AlreadyClaimed {
                signal: signal.to_string(),
                first: first.clone(),
                second: path.to_string(),
            });
        }
        self.claimed.insert(signal.to_string(), path.to_string());
        Ok(())
    }

    /// Binds a clock or reset input by its configured name.
    fn bind_control(&mut self, path: &str, signal: &str) -> Result<(), MappingError> {
        let port = self.port(path, signal)?;
        Self::check(path, port, 1, Direction::In)?;
        self.claim(signal, path)
    }

    fn bind_explicit(
        &mut self,
        request: &MemberRequest,
        signal: &str,
    ) -> Result<MemberBinding, MappingError> {
        let path = request.path();
        let port = self.port(&path, signal)?;
        Self::check(&path, port, request.member.width, request.member.direction)?;
        self.claim(signal, &path)?;
        debug!("{path} -> {signal} (explicit)");
        Ok(MemberBinding {
            interface: request.interface.clone(),
            member: request.member.name.clone(),
            path,
            signal: signal.to_string(),
            width: request.member.width,
            direction: request.member.direction,
            origin: BindingOrigin::Explicit,
        })
    }

    fn bind_heuristic(
        &mut self,
        request: &MemberRequest,
    ) -> Result<Option<MemberBinding>, MappingError> {
        let path = request.path();
        let patterns = patterns_for(&request.member);
        let found = {
            let prefix = request.prefix.as_deref().map(tokens);
            let pool: Vec<&Candidate> = self
                .candidates
                .iter()
                .filter(|c| !self.claimed.contains_key(&c.port.name))
                .filter(|c| prefix.as_ref().map_or(true, |p| contains_run(&c.core, p)))
                .collect();
            let mut found: Option<(&'a PortInfo, &NamePattern)> = None;
            for pattern in &patterns {
                let hits: Vec<&'a PortInfo> = pool
                    .iter()
                    .filter(|c| pattern.matches(c))
                    .map(|c| c.port)
                    .collect();
                match hits.as_slice() {
                    [] => continue,
                    [only] => {
                        found = Some((*only, pattern));
                        break;
                    }
                    many => {
                        return Err(MappingError::Ambiguous {
                            member: path,
                            pattern: pattern.to_string(),
                            candidates: many.iter().map(|p| p.name.clone()).collect(),
                        })
                    }
                }
            }
            found
        };

        let Some((port, pattern)) = found else {
            if request.member.required {
                return Err(MappingError::Missing {
                    member: path,
                    patterns: patterns.iter().map(|p| p.to_string()).collect(),
                });
            }
            debug!("{path} left unbound (optional)");
            return Ok(None);
        };
        Self::check(&path, port, request.member.width, request.member.direction)?;
        self.claim(&port.name, &path)?;
        debug!("{path} -> {} ({pattern})", port.name);
        Ok(Some(MemberBinding {
            interface: request.interface.clone(),
            member: request.member.name.clone(),
            path,
            signal: port.name.clone(),
            width: request.member.width,
            direction: request.member.direction,
            origin: BindingOrigin::Heuristic {
                pattern: pattern.to_string(),
            },
        }))
    }
}

/// Resolves every request against `ports`. Pure: the same inputs always give
/// the same mapping.
pub fn map_members(
    ports: &[PortInfo],
    clocks: &[ClockSpec],
    resets: &[ResetSpec],
    requests: &[MemberRequest],
) -> Result<SignalMapping, MappingError> {
    let mut mapper = Mapper::new(ports);

    let mut clock_bindings = Vec::with_capacity(clocks.len());
    for clock in clocks {
        mapper.bind_control(&format!("clocks.{}", clock.domain), &clock.signal)?;
        clock_bindings.push(ClockBinding {
            domain: clock.domain.clone(),
            signal: clock.signal.clone(),
        });
    }
    let mut reset_bindings = Vec::with_capacity(resets.len());
    for reset in resets {
        mapper.bind_control(&format!("resets.{}", reset.domain), &reset.signal)?;
        reset_bindings.push(ResetBinding {
            domain: reset.domain.clone(),
            signal: reset.signal.clone(),
            active_low: reset.active_low,
        });
    }

    let mut bound: Vec<Option<MemberBinding>> = vec![None; requests.len()];
    for (slot, request) in bound.iter_mut().zip(requests) {
        if let Some(signal) = &request.explicit {
            *slot = Some(mapper.bind_explicit(request, signal)?);
        }
    }
    let mut unbound = Vec::new();
    for (slot, request) in bound.iter_mut().zip(requests) {
        if slot.is_some() {
            continue;
        }
        match mapper.bind_heuristic(request)? {
            Some(binding) => *slot = Some(binding),
            None => unbound.push(request.path()),
        }
    }

    Ok(SignalMapping {
        clocks: clock_bindings,
        resets: reset_bindings,
        members: bound.into_iter().flatten().collect(),
        unbound,
    })
}

/// Maps every member of `interfaces` (ports then pins, in declaration order).
pub fn map_signals<'a, I>(
    ports: &[PortInfo],
    clocks: &[ClockSpec],
    resets: &[ResetSpec],
    interfaces: I,
) -> Result<SignalMapping, MappingError>
where
    I: IntoIterator<Item = &'a InterfaceSpec>,
{
    map_members(ports, clocks, resets, &requests_for(interfaces))
}
