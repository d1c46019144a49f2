// SPDX-License-Identifier: Apache-2.0

mod fixtures;
mod model;

pub use fixtures::{write_fixture, write_wb_timer, WB_TIMER_TOML, WB_TIMER_V};
pub use model::{wb_timer_behavior, Behavior, ModelBuilder, ModelEngine, ModelState};

/// Creates a unique temporary directory for tests under the system temp dir,
/// using the provided base prefix combined with the process id and a nanosecond
/// timestamp.
///
/// The directory is cleaned up automatically when the returned `TempDir` is
/// dropped.
pub fn make_test_tmpdir(base_prefix: &str) -> tempfile::TempDir {
    let pid = std::process::id();
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let prefix = format!("{}_{}_{}", base_prefix, pid, nanos);
    tempfile::Builder::new()
        .prefix(&prefix)
        .tempdir_in(std::env::temp_dir())
        .expect("tempdir create")
}

/// Whether `tool` can be found on `PATH`. Tests that need an external tool
/// call this and return early when it is missing.
pub fn tool_available(tool: &str) -> bool {
    let found = which::which(tool).is_ok();
    if !found {
        log::info!("{tool} not found on PATH; skipping");
    }
    found
}

/// Installs `env_logger` once for the test binary; later calls are no-ops.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
