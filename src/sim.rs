// SPDX-License-Identifier: Apache-2.0

//! Simulation bridge: a runtime control surface over a compiled model of the
//! wrapped module, addressed by the same structured paths the wrapper
//! exposes (`bus.cyc`, `irq`, `clocks.sys`, `resets.sys`).
//!
//! The compiled model itself sits behind [`SimEngine`]; [`SimulatorBuilder`]
//! turns a component plus its artifact into one. A [`SimulationHandle`] owns
//! exactly one engine and releases it on [`SimulationHandle::close`] or drop.

use std::sync::Arc;

use log::{debug, info};

use crate::auto_map::{Resolved, SignalMapping};
use crate::generate::GeneratedArtifact;
use crate::rtlwrap_error::{BuildError, SimError};
use crate::verilog_ports::PortInfo;
use crate::wrapper::WrapperComponent;

/// Signal-level access to one running model, by foreign signal name.
///
/// Writes take effect at the next [`SimEngine::step`]; reads reflect the
/// state after the last step.
pub trait SimEngine {
    fn set(&mut self, signal: &str, value: u64) -> Result<(), SimError>;
    fn get(&self, signal: &str) -> Result<u64, SimError>;
    /// Evaluates the model until it settles.
    fn step(&mut self) -> Result<(), SimError>;
    /// Signals the model exposes.
    fn signals(&self) -> Vec<PortInfo>;
}

pub trait SimulatorBuilder {
    fn build_engine(
        &self,
        component: &WrapperComponent,
        artifact: &GeneratedArtifact,
    ) -> Result<Box<dyn SimEngine>, BuildError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimState {
    Built,
    Closed,
}

struct Target {
    signal: String,
    width: u32,
    /// Active-low reset addressed through its logical, active-high path.
    inverted: bool,
}

/// One simulation instance. Not shareable between threads of control: every
/// call takes the handle exclusively or reads it while nothing else runs.
pub struct SimulationHandle {
    engine: Option<Box<dyn SimEngine>>,
    mapping: Arc<SignalMapping>,
    artifact: Arc<GeneratedArtifact>,
    steps: u64,
}

impl std::fmt::Debug for SimulationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationHandle")
            .field("top_module", &self.artifact.top_module)
            .field("state", &self.state())
            .field("steps", &self.steps)
            .finish()
    }
}

impl SimulationHandle {
    pub fn build(
        builder: &dyn SimulatorBuilder,
        component: &WrapperComponent,
        artifact: Arc<GeneratedArtifact>,
        mapping: Arc<SignalMapping>,
    ) -> Result<Self, BuildError> {
        let engine = builder.build_engine(component, &artifact)?;
        info!("simulation of {} built", artifact.top_module);
        Ok(Self::from_engine(engine, artifact, mapping))
    }

    /// Wraps an engine that was built elsewhere.
    pub fn from_engine(
        engine: Box<dyn SimEngine>,
        artifact: Arc<GeneratedArtifact>,
        mapping: Arc<SignalMapping>,
    ) -> Self {
        SimulationHandle {
            engine: Some(engine),
            mapping,
            artifact,
            steps: 0,
        }
    }

    pub fn state(&self) -> SimState {
        match self.engine {
            Some(_) => SimState::Built,
            None => SimState::Closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SimState::Closed
    }

    /// Number of steps taken since the handle was built.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn mapping(&self) -> &SignalMapping {
        &self.mapping
    }

    pub fn artifact(&self) -> &GeneratedArtifact {
        &self.artifact
    }

    fn engine(&self) -> Result<&dyn SimEngine, SimError> {
        self.engine.as_deref().ok_or(SimError::ClosedHandle)
    }

    fn engine_mut(&mut self) -> Result<&mut (dyn SimEngine + 'static), SimError> {
        self.engine.as_deref_mut().ok_or(SimError::ClosedHandle)
    }

    fn foreign_width(&self, signal: &str) -> Option<u32> {
        self.artifact.port(signal).map(|p| p.width)
    }

    fn target(&self, path: &str) -> Result<Target, SimError> {
        let target = match self.mapping.resolve(path) {
            Some(Resolved::Clock(clock)) => Target {
                signal: clock.signal.clone(),
                width: 1,
                inverted: false,
            },
            Some(Resolved::Reset(reset)) => Target {
                signal: reset.signal.clone(),
                width: 1,
                inverted: reset.active_low,
            },
            Some(Resolved::Member(member)) => Target {
                width: self.foreign_width(&member.signal).unwrap_or(member.width),
                signal: member.signal.clone(),
                inverted: false,
            },
            None => return Err(SimError::UnknownSignal(path.to_string())),
        };
        if target.width > 64 {
            return Err(SimError::TooWide {
                path: path.to_string(),
                width: target.width,
            });
        }
        Ok(target)
    }

    fn write(&mut self, path: &str, target: Target, value: u64) -> Result<(), SimError> {
        if target.width < 64 && value >> target.width != 0 {
            return Err(SimError::ValueOutOfRange {
                path: path.to_string(),
                value,
                width: target.width,
            });
        }
        let value = if target.inverted { value ^ 1 } else { value };
        self.engine_mut()?
            .set(&target.signal, value)
            .map_err(|e| rename_unknown(e, path))
    }

    fn read(&self, path: &str, target: Target) -> Result<u64, SimError> {
        let value = self
            .engine()?
            .get(&target.signal)
            .map_err(|e| rename_unknown(e, path))?;
        Ok(if target.inverted { value ^ 1 } else { value })
    }

    /// Writes `value` to the signal behind `path`; it takes effect at the
    /// next step.
    pub fn set(&mut self, path: &str, value: u64) -> Result<(), SimError> {
        self.engine()?;
        let target = self.target(path)?;
        self.write(path, target, value)
    }

    /// Reads the signal behind `path` as of the last step.
    pub fn get(&self, path: &str) -> Result<u64, SimError> {
        self.engine()?;
        let target = self.target(path)?;
        self.read(path, target)
    }

    /// Writes a foreign signal by its own name, bypassing the mapping.
    pub fn set_foreign(&mut self, signal: &str, value: u64) -> Result<(), SimError> {
        self.engine()?;
        let width = self
            .foreign_width(signal)
            .ok_or_else(|| SimError::UnknownSignal(signal.to_string()))?;
        let target = Target {
            signal: signal.to_string(),
            width,
            inverted: false,
        };
        self.write(signal, target, value)
    }

    pub fn get_foreign(&self, signal: &str) -> Result<u64, SimError> {
        self.engine()?;
        if self.foreign_width(signal).is_none() {
            return Err(SimError::UnknownSignal(signal.to_string()));
        }
        self.engine()?.get(signal)
    }

    pub fn step(&mut self) -> Result<(), SimError> {
        self.engine_mut()?.step()?;
        self.steps += 1;
        Ok(())
    }

    /// One full cycle of clock `domain`: low, step, high, step.
    pub fn tick(&mut self, domain: &str) -> Result<(), SimError> {
        let path = format!("clocks.{domain}");
        self.set(&path, 0)?;
        self.step()?;
        self.set(&path, 1)?;
        self.step()
    }

    /// Holds every reset domain asserted for `cycles` cycles of every clock
    /// domain, then releases them. The release takes effect at the caller's
    /// next step. Resets are released even when the pulse fails; the first
    /// error is returned.
    pub fn reset(&mut self, cycles: u32) -> Result<(), SimError> {
        self.engine()?;
        let resets: Vec<String> = self
            .mapping
            .resets()
            .iter()
            .map(|r| format!("resets.{}", r.domain))
            .collect();
        let clocks: Vec<String> = self
            .mapping
            .clocks()
            .iter()
            .map(|c| c.domain.clone())
            .collect();
        debug!("reset: {} cycle(s) on {:?}", cycles, resets);
        let pulse = self.pulse_reset(&resets, &clocks, cycles);
        let mut released = Ok(());
        for reset in &resets {
            if let Err(e) = self.set(reset, 0) {
                released = released.and(Err(e));
            }
        }
        if pulse.is_err() {
            debug!("reset pulse failed; resets released");
        }
        pulse.and(released)
    }

    fn pulse_reset(
        &mut self,
        resets: &[String],
        clocks: &[String],
        cycles: u32,
    ) -> Result<(), SimError> {
        for reset in resets {
            self.set(reset, 1)?;
        }
        for _ in 0..cycles {
            if clocks.is_empty() {
                self.step()?;
                self.step()?;
            }
            for domain in clocks {
                self.tick(domain)?;
            }
        }
        Ok(())
    }

    /// Every signal the engine exposes.
    pub fn signals(&self) -> Result<Vec<PortInfo>, SimError> {
        Ok(self.engine()?.signals())
    }

    /// Releases the engine. Closing a closed handle does nothing.
    pub fn close(&mut self) {
        if let Some(engine) = self.engine.take() {
            drop(engine);
            info!(
                "simulation of {} closed after {} step(s)",
                self.artifact.top_module, self.steps
            );
        }
    }
}

impl Drop for SimulationHandle {
    fn drop(&mut self) {
        self.close();
    }
}

fn rename_unknown(e: SimError, path: &str) -> SimError {
    match e {
        SimError::UnknownSignal(_) => SimError::UnknownSignal(path.to_string()),
        other => other,
    }
}
