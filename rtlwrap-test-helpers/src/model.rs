// SPDX-License-Identifier: Apache-2.0

//! An in-process behavioral simulation engine. Tests describe the module's
//! logic as a closure over signal values; the engine applies pending writes,
//! runs the closure once per step and counts how often it is released.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rtlwrap::generate::GeneratedArtifact;
use rtlwrap::rtlwrap_error::{BuildError, SimError};
use rtlwrap::sim::{SimEngine, SimulatorBuilder};
use rtlwrap::verilog_ports::PortInfo;
use rtlwrap::wrapper::WrapperComponent;

fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Signal values as seen by a behavior during one step.
pub struct ModelState {
    values: BTreeMap<String, u64>,
    previous: BTreeMap<String, u64>,
    widths: BTreeMap<String, u32>,
    registers: BTreeMap<String, u64>,
}

impl ModelState {
    fn new(ports: &[PortInfo]) -> Self {
        ModelState {
            values: ports.iter().map(|p| (p.name.clone(), 0)).collect(),
            previous: BTreeMap::new(),
            widths: ports.iter().map(|p| (p.name.clone(), p.width)).collect(),
            registers: BTreeMap::new(),
        }
    }

    pub fn get(&self, signal: &str) -> u64 {
        self.values.get(signal).copied().unwrap_or(0)
    }

    /// Drives `signal`, truncated to its width.
    pub fn set(&mut self, signal: &str, value: u64) {
        let width = self.widths.get(signal).copied().unwrap_or(64);
        self.values.insert(signal.to_string(), value & mask(width));
    }

    /// True when `signal` went from 0 to 1 with this step's writes.
    pub fn rose(&self, signal: &str) -> bool {
        self.previous.get(signal).copied().unwrap_or(0) == 0 && self.get(signal) == 1
    }

    /// Internal state that survives between steps.
    pub fn reg(&mut self, name: &str) -> &mut u64 {
        self.registers.entry(name.to_string()).or_insert(0)
    }
}

pub type Behavior = Box<dyn FnMut(&mut ModelState)>;

pub struct ModelEngine {
    state: ModelState,
    pending: BTreeMap<String, u64>,
    ports: Vec<PortInfo>,
    behavior: Behavior,
    taken: usize,
    fail_at_step: Option<usize>,
    steps: Arc<AtomicUsize>,
    destroyed: Arc<AtomicUsize>,
}

impl ModelEngine {
    pub fn new(ports: Vec<PortInfo>, behavior: Behavior) -> Self {
        ModelEngine {
            state: ModelState::new(&ports),
            pending: BTreeMap::new(),
            ports,
            behavior,
            taken: 0,
            fail_at_step: None,
            steps: Arc::new(AtomicUsize::new(0)),
            destroyed: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl SimEngine for ModelEngine {
    fn set(&mut self, signal: &str, value: u64) -> Result<(), SimError> {
        if !self.state.widths.contains_key(signal) {
            return Err(SimError::UnknownSignal(signal.to_string()));
        }
        self.pending.insert(signal.to_string(), value);
        Ok(())
    }

    fn get(&self, signal: &str) -> Result<u64, SimError> {
        self.state
            .values
            .get(signal)
            .copied()
            .ok_or_else(|| SimError::UnknownSignal(signal.to_string()))
    }

    fn step(&mut self) -> Result<(), SimError> {
        let index = self.taken;
        self.taken += 1;
        if self.fail_at_step == Some(index) {
            return Err(SimError::Engine(format!("step {index} failed")));
        }
        self.state.previous = self.state.values.clone();
        for (signal, value) in std::mem::take(&mut self.pending) {
            self.state.set(&signal, value);
        }
        (self.behavior)(&mut self.state);
        self.steps.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn signals(&self) -> Vec<PortInfo> {
        self.ports.clone()
    }
}

impl Drop for ModelEngine {
    fn drop(&mut self) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Builds [`ModelEngine`]s over the artifact's port list, each with a fresh
/// behavior from the factory.
pub struct ModelBuilder {
    factory: Box<dyn Fn() -> Behavior>,
    failure: Option<String>,
    fail_at_step: Option<usize>,
    built: Arc<AtomicUsize>,
    steps: Arc<AtomicUsize>,
    destroyed: Arc<AtomicUsize>,
}

impl ModelBuilder {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Behavior + 'static,
    {
        ModelBuilder {
            factory: Box::new(factory),
            failure: None,
            fail_at_step: None,
            built: Arc::new(AtomicUsize::new(0)),
            steps: Arc::new(AtomicUsize::new(0)),
            destroyed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A builder whose every build fails with `message`.
    pub fn failing(message: &str) -> Self {
        let mut builder = ModelBuilder::new(|| -> Behavior { Box::new(|_: &mut ModelState| {}) });
        builder.failure = Some(message.to_string());
        builder
    }

    /// Engines from this builder fail their step number `step` (zero based).
    /// Pending writes stay pending across the failed step.
    pub fn failing_step(mut self, step: usize) -> Self {
        self.fail_at_step = Some(step);
        self
    }

    pub fn built(&self) -> usize {
        self.built.load(Ordering::SeqCst)
    }

    /// Steps taken across every engine this builder produced.
    pub fn steps(&self) -> usize {
        self.steps.load(Ordering::SeqCst)
    }

    /// Engines released so far.
    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }
}

impl SimulatorBuilder for ModelBuilder {
    fn build_engine(
        &self,
        component: &WrapperComponent,
        artifact: &GeneratedArtifact,
    ) -> Result<Box<dyn SimEngine>, BuildError> {
        if let Some(message) = &self.failure {
            return Err(BuildError::new("model", message.clone()));
        }
        log::debug!(
            "building model engine for {} ({} ports)",
            component.name,
            artifact.ports.len()
        );
        let mut engine = ModelEngine::new(artifact.ports.clone(), (self.factory)());
        engine.steps = Arc::clone(&self.steps);
        engine.destroyed = Arc::clone(&self.destroyed);
        engine.fail_at_step = self.fail_at_step;
        self.built.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(engine))
    }
}

/// Cycle model of the `wb_timer` fixture, evaluated on rising `i_clk`.
pub fn wb_timer_behavior() -> Behavior {
    Box::new(|s: &mut ModelState| {
        let word = mask(32);
        let ack = s.get("o_wb_ack");
        let irq = |s: &mut ModelState| (*s.reg("status") & 1) & ((*s.reg("ctrl") >> 1) & 1);
        if !s.rose("i_clk") {
            let value = irq(s);
            s.set("o_irq", value);
            return;
        }
        if s.get("i_rst_n") == 0 {
            for r in ["ctrl", "compare", "counter", "status", "prescale"] {
                *s.reg(r) = 0;
            }
            s.set("o_wb_ack", 0);
            s.set("o_wb_dat", 0);
            s.set("o_irq", 0);
            return;
        }

        let access = s.get("i_wb_cyc") == 1 && s.get("i_wb_stb") == 1 && ack == 0;
        let write = access && s.get("i_wb_we") == 1;
        let (adr, dat) = (s.get("i_wb_adr"), s.get("i_wb_dat"));
        let ctrl = *s.reg("ctrl");
        let prescale = *s.reg("prescale");
        let counter = *s.reg("counter");
        let compare = *s.reg("compare");
        let status = *s.reg("status");
        let tick = ctrl & 1 == 1 && prescale == (ctrl >> 16) & 0xffff;

        if ctrl & 1 == 1 {
            *s.reg("prescale") = if tick { 0 } else { (prescale + 1) & 0xffff };
        }
        if tick {
            *s.reg("counter") = (counter + 1) & word;
            if (counter + 1) & word == compare {
                *s.reg("status") = 0b11;
            }
        }
        if write {
            match adr {
                0 => *s.reg("ctrl") = dat,
                1 => *s.reg("compare") = dat,
                2 => *s.reg("counter") = dat,
                3 => *s.reg("status") = status & !dat & 0b11,
                _ => {}
            }
        }
        if access && !write {
            let value = match adr {
                0 => ctrl,
                1 => compare,
                2 => counter,
                3 => status,
                _ => 0,
            };
            s.set("o_wb_dat", value);
        }
        s.set("o_wb_ack", u64::from(access));
        let value = irq(s);
        s.set("o_irq", value);
    })
}
