// SPDX-License-Identifier: Apache-2.0

//! End-to-end builds: config file -> artifact -> mapping -> component.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use rtlwrap::rtlwrap_error::GenerationFailure;
use rtlwrap::wrapper::ConnectionTarget;
use rtlwrap::{
    load_wrapper, MappingError, Pipeline, PipelineOptions, RtlwrapError, WrapperConfig,
};
use rtlwrap_test_helpers::{init_logging, make_test_tmpdir, write_fixture, write_wb_timer, WB_TIMER_V};

#[test]
fn wb_timer_builds_into_component() {
    init_logging();
    let dir = make_test_tmpdir("rtlwrap_pipeline_wb_timer");
    let config = write_wb_timer(dir.path());
    let built = load_wrapper(&config, PipelineOptions::new(dir.path().join("build"))).unwrap();

    assert_eq!(built.top_module(), "wb_timer");
    assert_eq!(built.source_files(), &[dir.path().join("rtl/wb_timer.v")]);

    let component = &built.component;
    assert_eq!(component.clock_domains[0].signal, "i_clk");
    assert!(component.reset_domains[0].active_low);
    let bus = component.interface("bus").unwrap();
    let bound: Vec<(&str, Option<&str>)> = bus
        .members
        .iter()
        .map(|m| (m.name.as_str(), m.signal.as_deref()))
        .collect();
    assert_eq!(
        bound,
        vec![
            ("adr", Some("i_wb_adr")),
            ("dat_w", Some("i_wb_dat")),
            ("dat_r", Some("o_wb_dat")),
            ("cyc", Some("i_wb_cyc")),
            ("stb", Some("i_wb_stb")),
            ("we", Some("i_wb_we")),
            ("ack", Some("o_wb_ack")),
        ]
    );
    assert_eq!(
        component.interface("irq").unwrap().members[0].signal.as_deref(),
        Some("o_irq")
    );

    let connections = component.connections();
    assert_eq!(connections.len(), 10);
    assert_eq!(
        connections[1].target,
        ConnectionTarget::Reset {
            domain: "sys".to_string(),
            inverted: true
        }
    );
    assert!(connections
        .iter()
        .all(|c| !matches!(c.target, ConnectionTarget::TiedOff | ConnectionTarget::Open)));
}

#[test]
fn concurrent_builds_share_one_artifact() {
    init_logging();
    let dir = make_test_tmpdir("rtlwrap_pipeline_concurrent");
    let config = write_wb_timer(dir.path());
    let pipeline = Pipeline::new(PipelineOptions::new(dir.path().join("build")));

    let artifacts: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| pipeline.build_from_path(&config).unwrap().artifact))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert!(artifacts.iter().all(|a| Arc::ptr_eq(a, &artifacts[0])));
    assert_eq!(pipeline.generator().cache().len(), 1);
}

#[test]
fn changed_sources_get_a_new_artifact() {
    init_logging();
    let dir = make_test_tmpdir("rtlwrap_pipeline_changed");
    let config = write_wb_timer(dir.path());
    let pipeline = Pipeline::new(PipelineOptions::new(dir.path().join("build")));
    let first = pipeline.build_from_path(&config).unwrap();

    let edited = WB_TIMER_V.replace("reg [15:0]      prescale;", "reg [15:0] prescale; // edited");
    std::fs::write(dir.path().join("rtl/wb_timer.v"), edited).unwrap();
    let second = pipeline.build_from_path(&config).unwrap();
    assert_ne!(first.artifact.fingerprint, second.artifact.fingerprint);
    assert_eq!(first.artifact.ports, second.artifact.ports);
    assert_eq!(pipeline.generator().cache().len(), 2);
}

#[test]
fn config_errors_stop_before_generation() {
    init_logging();
    let dir = make_test_tmpdir("rtlwrap_pipeline_config_error");
    let config = write_fixture(
        dir.path(),
        "m",
        "module m(input a);\nendmodule\n",
        "name = \"m\"\n[files]\npath = \"rtl\"\n[pins.a]\ninterface = \"in(0)\"\n",
    );
    let build = dir.path().join("build");
    let err = load_wrapper(&config, PipelineOptions::new(&build)).unwrap_err();
    assert!(matches!(err, RtlwrapError::Config(ref e) if e.field == "pins.a.interface"));
    assert!(!build.join("gen").exists());
}

#[test]
fn missing_top_module_is_a_generation_error() {
    init_logging();
    let dir = make_test_tmpdir("rtlwrap_pipeline_missing_top");
    let config = write_fixture(
        dir.path(),
        "wanted",
        "module other(input a);\nendmodule\n",
        "name = \"wanted\"\n[files]\npath = \"rtl\"\n",
    );
    let err = load_wrapper(&config, PipelineOptions::new(dir.path().join("build"))).unwrap_err();
    match err {
        RtlwrapError::Generation(e) => assert_eq!(
            e.failure,
            GenerationFailure::MissingTopModule("wanted".to_string())
        ),
        other => panic!("expected a generation error, got {other}"),
    }
}

#[test]
fn ambiguous_signals_fail_the_build() {
    init_logging();
    let dir = make_test_tmpdir("rtlwrap_pipeline_ambiguous");
    let config = write_fixture(
        dir.path(),
        "dual",
        "module dual(input i_a_irq, input i_b_irq);\nendmodule\n",
        "name = \"dual\"\n[files]\npath = \"rtl\"\n[pins.irq]\ninterface = \"in(1)\"\n",
    );
    let err = load_wrapper(&config, PipelineOptions::new(dir.path().join("build"))).unwrap_err();
    assert!(
        matches!(
            err,
            RtlwrapError::Mapping(MappingError::Ambiguous { ref member, .. }) if member == "irq"
        ),
        "{err}"
    );
}

#[test]
fn unclaimed_ports_are_tied_off_or_left_open() {
    init_logging();
    let dir = make_test_tmpdir("rtlwrap_pipeline_unclaimed");
    let config = write_fixture(
        dir.path(),
        "gpio_blk",
        "module gpio_blk(input clk, input [3:0] gpio_i, output [3:0] gpio_o, output [3:0] gpio_oe, input test_mode, output [7:0] dbg_o);\nendmodule\n",
        "name = \"gpio_blk\"\n[files]\npath = \"rtl\"\n[clocks]\nsys = \"clk\"\n[ports.gpio]\ninterface = \"gpio\"\nparams = { pin_count = 4 }\n",
    );
    let built = load_wrapper(&config, PipelineOptions::new(dir.path().join("build"))).unwrap();
    let targets: Vec<(String, ConnectionTarget)> = built
        .component
        .connections()
        .into_iter()
        .map(|c| (c.signal, c.target))
        .collect();
    assert_eq!(targets[4], ("test_mode".to_string(), ConnectionTarget::TiedOff));
    assert_eq!(targets[5], ("dbg_o".to_string(), ConnectionTarget::Open));

    let shim = built.component.emit_verilog_shim();
    assert!(shim.contains(".test_mode(1'd0)"), "{shim}");
    assert!(shim.contains(".dbg_o()"), "{shim}");
    assert!(shim.contains("output wire [3:0] gpio__oe"), "{shim}");
}

#[test]
fn bytes_config_builds_like_file_config() {
    init_logging();
    let dir = make_test_tmpdir("rtlwrap_pipeline_bytes");
    let path = write_wb_timer(dir.path());
    let bytes = std::fs::read(&path).unwrap();
    let pipeline = Pipeline::new(PipelineOptions::new(dir.path().join("build")));
    let from_bytes = pipeline
        .build(WrapperConfig::from_bytes(&bytes, dir.path()).unwrap())
        .unwrap();
    let from_path = pipeline.build_from_path(&path).unwrap();
    assert_eq!(from_bytes.component, from_path.component);
    assert!(Arc::ptr_eq(&from_bytes.artifact, &from_path.artifact));
}

#[test]
fn indexed_signal_names_bind_the_first_instance() {
    init_logging();
    let dir = make_test_tmpdir("rtlwrap_pipeline_indexed");
    let config = write_fixture(
        dir.path(),
        "gpio_arr",
        "module gpio_arr(input i_gpio0, output o_gpio0, output o_gpio0_oe, input i_gpio1, output o_gpio1, output o_gpio1_oe);\nendmodule\n",
        r#"name = "gpio_arr"
[files]
path = "rtl"
[ports.gpio]
interface = "gpio"
params = { pin_count = 1 }
vars = { n = "int" }
map = { i = "i_gpio{n}", o = "o_gpio{n}", oe = "o_gpio{n}_oe" }
"#,
    );
    let built = load_wrapper(&config, PipelineOptions::new(dir.path().join("build"))).unwrap();
    assert_eq!(built.mapping.member("gpio.i").unwrap().signal, "i_gpio0");
    assert_eq!(built.mapping.member("gpio.o").unwrap().signal, "o_gpio0");
    assert_eq!(built.mapping.member("gpio.oe").unwrap().signal, "o_gpio0_oe");
}
