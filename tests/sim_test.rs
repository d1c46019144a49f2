// SPDX-License-Identifier: Apache-2.0

//! Simulation handle behavior against the behavioral engine from the test
//! helpers, driven through the wb_timer fixture.

use pretty_assertions::assert_eq;
use rtlwrap::pipeline::build_simulation;
use rtlwrap::sim::SimState;
use rtlwrap::{load_wrapper, BuiltWrapper, PipelineOptions, SimError, SimulationHandle};
use rtlwrap_test_helpers::{
    init_logging, make_test_tmpdir, wb_timer_behavior, write_wb_timer, Behavior, ModelBuilder,
    ModelState,
};

fn build_wb_timer(dir: &std::path::Path) -> BuiltWrapper {
    init_logging();
    let config = write_wb_timer(dir);
    load_wrapper(&config, PipelineOptions::new(dir.join("build"))).unwrap()
}

fn timer_builder() -> ModelBuilder {
    ModelBuilder::new(wb_timer_behavior)
}

/// Drives one Wishbone write and waits out the acknowledge.
fn wb_write(sim: &mut SimulationHandle, adr: u64, dat: u64) {
    sim.set("bus.cyc", 1).unwrap();
    sim.set("bus.stb", 1).unwrap();
    sim.set("bus.we", 1).unwrap();
    sim.set("bus.adr", adr).unwrap();
    sim.set("bus.dat_w", dat).unwrap();
    sim.tick("sys").unwrap();
    assert_eq!(sim.get("bus.ack").unwrap(), 1, "write to {adr} not acknowledged");
    sim.set("bus.cyc", 0).unwrap();
    sim.set("bus.stb", 0).unwrap();
    sim.set("bus.we", 0).unwrap();
    sim.tick("sys").unwrap();
}

fn wb_read(sim: &mut SimulationHandle, adr: u64) -> u64 {
    sim.set("bus.cyc", 1).unwrap();
    sim.set("bus.stb", 1).unwrap();
    sim.set("bus.we", 0).unwrap();
    sim.set("bus.adr", adr).unwrap();
    sim.tick("sys").unwrap();
    assert_eq!(sim.get("bus.ack").unwrap(), 1, "read of {adr} not acknowledged");
    let value = sim.get("bus.dat_r").unwrap();
    sim.set("bus.cyc", 0).unwrap();
    sim.set("bus.stb", 0).unwrap();
    sim.tick("sys").unwrap();
    value
}

#[test]
fn set_step_get_reflects_design_logic() {
    let dir = make_test_tmpdir("rtlwrap_sim_sequence");
    let built = build_wb_timer(dir.path());
    // Combinational acknowledge: ack follows cyc & stb on every evaluation.
    let builder = ModelBuilder::new(|| -> Behavior {
        Box::new(|s: &mut ModelState| {
            let ack = s.get("i_wb_cyc") & s.get("i_wb_stb");
            s.set("o_wb_ack", ack);
        })
    });
    let mut sim = built.simulate(&builder).unwrap();
    assert_eq!(sim.state(), SimState::Built);

    sim.reset(2).unwrap();
    sim.set("bus.cyc", 1).unwrap();
    sim.set("bus.stb", 1).unwrap();
    sim.step().unwrap();
    sim.step().unwrap();
    assert_eq!(sim.get("bus.ack").unwrap(), 1);

    sim.set("bus.stb", 0).unwrap();
    sim.step().unwrap();
    assert_eq!(sim.get("bus.ack").unwrap(), 0);
}

#[test]
fn reset_counts_two_steps_per_cycle_and_releases() {
    let dir = make_test_tmpdir("rtlwrap_sim_reset");
    let built = build_wb_timer(dir.path());
    let builder = timer_builder();
    let mut sim = built.simulate(&builder).unwrap();

    sim.reset(3).unwrap();
    assert_eq!(sim.steps(), 6);
    // Asserted (logical 1) is driven as 0 on the active-low input.
    assert_eq!(sim.get_foreign("i_rst_n").unwrap(), 0);
    assert_eq!(sim.get("resets.sys").unwrap(), 1);

    sim.step().unwrap();
    assert_eq!(sim.get_foreign("i_rst_n").unwrap(), 1);
    assert_eq!(sim.get("resets.sys").unwrap(), 0);
    assert_eq!(builder.steps(), 7);
}

#[test]
fn failed_reset_pulse_still_releases() {
    let dir = make_test_tmpdir("rtlwrap_sim_reset_failure");
    let built = build_wb_timer(dir.path());
    let builder = timer_builder().failing_step(3);
    let mut sim = built.simulate(&builder).unwrap();

    assert_eq!(
        sim.reset(3),
        Err(SimError::Engine("step 3 failed".to_string()))
    );
    assert_eq!(sim.steps(), 3);
    assert_eq!(sim.state(), SimState::Built);

    sim.step().unwrap();
    assert_eq!(sim.get("resets.sys").unwrap(), 0);
    assert_eq!(sim.get_foreign("i_rst_n").unwrap(), 1);
}

#[test]
fn timer_registers_and_interrupt() {
    let dir = make_test_tmpdir("rtlwrap_sim_timer");
    let built = build_wb_timer(dir.path());
    let mut sim = built.simulate(&timer_builder()).unwrap();
    sim.reset(2).unwrap();

    wb_write(&mut sim, 1, 3);
    assert_eq!(wb_read(&mut sim, 1), 3);
    assert_eq!(sim.get("irq").unwrap(), 0);

    // Enable with interrupts, prescaler 0: the counter advances every cycle.
    wb_write(&mut sim, 0, 0b11);
    let mut cycles = 0;
    while sim.get("irq").unwrap() == 0 {
        sim.tick("sys").unwrap();
        cycles += 1;
        assert!(cycles < 10, "interrupt never fired");
    }
    assert_eq!(wb_read(&mut sim, 3), 0b11);

    // Clearing the pending bit drops the interrupt; the match bit stays.
    wb_write(&mut sim, 3, 0b01);
    assert_eq!(sim.get("irq").unwrap(), 0);
    assert_eq!(wb_read(&mut sim, 3), 0b10);
}

#[test]
fn handles_do_not_share_state() {
    let dir = make_test_tmpdir("rtlwrap_sim_independent");
    let built = build_wb_timer(dir.path());
    let builder = timer_builder();
    let mut a = built.simulate(&builder).unwrap();
    let mut b = built.simulate(&builder).unwrap();
    a.reset(1).unwrap();
    b.reset(1).unwrap();

    wb_write(&mut a, 1, 0x55);
    assert_eq!(wb_read(&mut a, 1), 0x55);
    assert_eq!(wb_read(&mut b, 1), 0);
    assert_eq!(builder.built(), 2);
}

#[test]
fn close_is_idempotent_and_releases_once() {
    let dir = make_test_tmpdir("rtlwrap_sim_close");
    let built = build_wb_timer(dir.path());
    let builder = timer_builder();
    let mut sim = built.simulate(&builder).unwrap();
    sim.reset(1).unwrap();

    sim.close();
    assert!(sim.is_closed());
    assert_eq!(builder.destroyed(), 1);
    sim.close();
    assert_eq!(builder.destroyed(), 1);

    assert_eq!(sim.get("bus.ack"), Err(SimError::ClosedHandle));
    assert_eq!(sim.set("bus.cyc", 1), Err(SimError::ClosedHandle));
    assert_eq!(sim.step(), Err(SimError::ClosedHandle));
    assert_eq!(sim.reset(1), Err(SimError::ClosedHandle));
    assert_eq!(sim.get_foreign("o_irq"), Err(SimError::ClosedHandle));
    assert_eq!(sim.signals(), Err(SimError::ClosedHandle));
    // Closed handles refuse even paths that never existed.
    assert_eq!(sim.get("bus.nope"), Err(SimError::ClosedHandle));

    drop(sim);
    assert_eq!(builder.destroyed(), 1);
}

#[test]
fn dropping_a_handle_releases_its_engine() {
    let dir = make_test_tmpdir("rtlwrap_sim_drop");
    let built = build_wb_timer(dir.path());
    let builder = timer_builder();
    {
        let _sim = built.simulate(&builder).unwrap();
        assert_eq!(builder.destroyed(), 0);
    }
    assert_eq!(builder.destroyed(), 1);
}

#[test]
fn unknown_and_out_of_range_accesses_are_rejected() {
    let dir = make_test_tmpdir("rtlwrap_sim_misuse");
    let built = build_wb_timer(dir.path());
    let mut sim = built.simulate(&timer_builder()).unwrap();

    assert_eq!(
        sim.set("bus.nope", 1),
        Err(SimError::UnknownSignal("bus.nope".to_string()))
    );
    assert_eq!(
        sim.get("clocks.io"),
        Err(SimError::UnknownSignal("clocks.io".to_string()))
    );
    assert_eq!(
        sim.get_foreign("o_missing"),
        Err(SimError::UnknownSignal("o_missing".to_string()))
    );
    assert_eq!(
        sim.set("bus.adr", 16),
        Err(SimError::ValueOutOfRange {
            path: "bus.adr".to_string(),
            value: 16,
            width: 4,
        })
    );
    sim.set("bus.adr", 15).unwrap();
    sim.set("bus.dat_w", u64::from(u32::MAX)).unwrap();
}

#[test]
fn failed_build_produces_no_handle() {
    let dir = make_test_tmpdir("rtlwrap_sim_build_failure");
    init_logging();
    let config = write_wb_timer(dir.path());
    let builder = ModelBuilder::failing("link failed: undefined symbol");
    let err = build_simulation(
        &config,
        PipelineOptions::new(dir.path().join("build")),
        &builder,
    )
    .unwrap_err();
    match err {
        rtlwrap::RtlwrapError::Build(e) => {
            assert_eq!(e.stage, "model");
            assert!(e.message.contains("undefined symbol"));
        }
        other => panic!("expected a build error, got {other}"),
    }
    assert_eq!(builder.built(), 0);
    assert_eq!(builder.destroyed(), 0);
}

#[test]
fn signals_lists_foreign_ports() {
    let dir = make_test_tmpdir("rtlwrap_sim_signals");
    let built = build_wb_timer(dir.path());
    let sim = built.simulate(&timer_builder()).unwrap();
    let names: Vec<String> = sim.signals().unwrap().into_iter().map(|p| p.name).collect();
    assert_eq!(names.len(), 10);
    assert!(names.contains(&"o_wb_ack".to_string()));
}
