// SPDX-License-Identifier: Apache-2.0

//! CXXRTL simulation engine: compiles a generated artifact to C++ with
//! `yosys write_cxxrtl`, links it into a shared object together with the
//! CXXRTL C API and drives it through `libloading`.

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_void};
use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};
use log::{debug, info};

use crate::generate::GeneratedArtifact;
use crate::interface::Direction;
use crate::rtlwrap_error::{BuildError, SimError};
use crate::sim::{SimEngine, SimulatorBuilder};
use crate::toolchain::{run_tool, Tool, ToolInvocation, ToolchainConfig};
use crate::verilog_ports::PortInfo;
use crate::wrapper::WrapperComponent;

#[repr(C)]
struct CxxrtlToplevel {
    _private: [u8; 0], // Opaque; owned by the handle once created.
}

#[repr(C)]
struct CxxrtlHandle {
    _private: [u8; 0],
}

/// Mirrors `struct cxxrtl_object` from `cxxrtl_capi.h`.
#[allow(dead_code)]
#[repr(C)]
struct CxxrtlObject {
    kind: u32,
    flags: u32,
    width: usize,
    lsb_at: usize,
    depth: usize,
    zero_at: usize,
    curr: *mut u32,
    next: *mut u32,
    outline: *mut c_void,
    attrs: *mut c_void,
}

const CXXRTL_INPUT: u32 = 1 << 0;
const CXXRTL_OUTPUT: u32 = 1 << 1;

type DesignCreate = unsafe extern "C" fn() -> *mut CxxrtlToplevel;
type DesignDestroy = unsafe extern "C" fn(design: *mut CxxrtlToplevel);
type Create = unsafe extern "C" fn(design: *mut CxxrtlToplevel) -> *mut CxxrtlHandle;
type Destroy = unsafe extern "C" fn(handle: *mut CxxrtlHandle);
type Step = unsafe extern "C" fn(handle: *mut CxxrtlHandle) -> libc::size_t;
type GetParts = unsafe extern "C" fn(
    handle: *mut CxxrtlHandle,
    name: *const c_char,
    parts: *mut libc::size_t,
) -> *mut CxxrtlObject;
type EnumCallback = unsafe extern "C" fn(
    data: *mut c_void,
    name: *const c_char,
    object: *mut CxxrtlObject,
    parts: libc::size_t,
);
type Enumerate =
    unsafe extern "C" fn(handle: *mut CxxrtlHandle, data: *mut c_void, callback: EnumCallback);

/// Number of 32-bit chunks CXXRTL stores a `width`-bit value in.
fn chunks(width: usize) -> usize {
    (width + 31) / 32
}

/// Splits `value` into the chunk layout of a `width`-bit CXXRTL value.
fn to_chunks(value: u64, width: usize) -> Vec<u32> {
    (0..chunks(width))
        .map(|i| {
            let word = (value >> (32 * i)) as u32;
            let remaining = width - 32 * i;
            if remaining < 32 {
                word & ((1u32 << remaining) - 1)
            } else {
                word
            }
        })
        .collect()
}

fn from_chunks(words: &[u32]) -> u64 {
    words
        .iter()
        .take(2)
        .enumerate()
        .fold(0u64, |acc, (i, w)| acc | (u64::from(*w) << (32 * i)))
}

struct Signal {
    object: *mut CxxrtlObject,
    width: usize,
}

/// A loaded CXXRTL model. The handle is destroyed before the library that
/// provides its code is unloaded.
pub struct CxxrtlEngine {
    handle: *mut CxxrtlHandle,
    destroy: Destroy,
    step: Step,
    signals: HashMap<String, Signal>,
    ports: Vec<PortInfo>,
    library_path: PathBuf,
    _library: Library,
}

unsafe extern "C" fn collect_object(
    data: *mut c_void,
    name: *const c_char,
    object: *mut CxxrtlObject,
    parts: libc::size_t,
) {
    if name.is_null() || object.is_null() || parts != 1 {
        return;
    }
    let out = &mut *(data as *mut Vec<(String, u32, usize)>);
    if let Ok(name) = CStr::from_ptr(name).to_str() {
        out.push((name.to_string(), (*object).flags, (*object).width));
    }
}

/// Owns a design toplevel until `cxxrtl_create` takes it over.
struct PendingDesign {
    toplevel: *mut CxxrtlToplevel,
    destroy: DesignDestroy,
}

impl PendingDesign {
    /// Hands the toplevel to its new owner; it is no longer freed here.
    fn release(mut self) -> *mut CxxrtlToplevel {
        std::mem::replace(&mut self.toplevel, std::ptr::null_mut())
    }
}

impl Drop for PendingDesign {
    fn drop(&mut self) {
        if !self.toplevel.is_null() {
            unsafe { (self.destroy)(self.toplevel) };
        }
    }
}

/// Copies a function pointer out of `library`. The caller keeps `library`
/// alive for as long as the pointer is used.
unsafe fn symbol<T: Copy>(library: &Library, name: &str) -> Result<T, BuildError> {
    let found: Symbol<T> = library
        .get(name.as_bytes())
        .map_err(|e| BuildError::new("load", format!("missing symbol `{name}`: {e}")))?;
    Ok(*found)
}

impl CxxrtlEngine {
    /// Loads `library_path` and instantiates the design it contains.
    pub fn load(library_path: &Path) -> Result<Self, BuildError> {
        unsafe {
            let library = Library::new(library_path).map_err(|e| {
                BuildError::new("load", format!("cannot open {}: {e}", library_path.display()))
            })?;
            let design_create: DesignCreate = symbol(&library, "cxxrtl_design_create")?;
            let design_destroy: DesignDestroy = symbol(&library, "rtlwrap_design_destroy")?;
            let create: Create = symbol(&library, "cxxrtl_create")?;
            let destroy: Destroy = symbol(&library, "cxxrtl_destroy")?;
            let step: Step = symbol(&library, "cxxrtl_step")?;
            let get_parts: GetParts = symbol(&library, "cxxrtl_get_parts")?;
            let enumerate: Enumerate = symbol(&library, "cxxrtl_enum")?;

            let toplevel = design_create();
            if toplevel.is_null() {
                return Err(BuildError::new("load", "cxxrtl_design_create returned null"));
            }
            let design = PendingDesign {
                toplevel,
                destroy: design_destroy,
            };
            let handle = create(design.toplevel);
            if handle.is_null() {
                return Err(BuildError::new("load", "cxxrtl_create returned null"));
            }
            // cxxrtl_create consumed the toplevel.
            design.release();

            let mut found: Vec<(String, u32, usize)> = Vec::new();
            enumerate(
                handle,
                &mut found as *mut Vec<(String, u32, usize)> as *mut c_void,
                collect_object,
            );

            let mut signals = HashMap::new();
            let mut ports = Vec::new();
            for (name, flags, width) in found {
                // Hierarchical names are space separated; only top-level
                // ports are addressable.
                if name.contains(' ') {
                    continue;
                }
                let direction = match (flags & CXXRTL_INPUT != 0, flags & CXXRTL_OUTPUT != 0) {
                    (true, true) => Direction::InOut,
                    (true, false) => Direction::In,
                    (false, true) => Direction::Out,
                    (false, false) => continue,
                };
                let Ok(c_name) = CString::new(name.as_str()) else {
                    continue;
                };
                let mut parts: libc::size_t = 0;
                let object = get_parts(handle, c_name.as_ptr(), &mut parts);
                if object.is_null() || parts != 1 {
                    continue;
                }
                ports.push(PortInfo {
                    name: name.clone(),
                    width: width as u32,
                    direction,
                });
                signals.insert(name, Signal { object, width });
            }
            ports.sort_by(|a, b| a.name.cmp(&b.name));
            debug!(
                "loaded {} with {} port(s)",
                library_path.display(),
                ports.len()
            );

            Ok(CxxrtlEngine {
                handle,
                destroy,
                step,
                signals,
                ports,
                library_path: library_path.to_path_buf(),
                _library: library,
            })
        }
    }

    pub fn library_path(&self) -> &Path {
        &self.library_path
    }

    fn signal(&self, name: &str) -> Result<&Signal, SimError> {
        let signal = self
            .signals
            .get(name)
            .ok_or_else(|| SimError::UnknownSignal(name.to_string()))?;
        if signal.width > 64 {
            return Err(SimError::TooWide {
                path: name.to_string(),
                width: signal.width as u32,
            });
        }
        Ok(signal)
    }
}

impl SimEngine for CxxrtlEngine {
    fn set(&mut self, signal: &str, value: u64) -> Result<(), SimError> {
        let signal = self.signal(signal)?;
        let words = to_chunks(value, signal.width);
        unsafe {
            let object = &*signal.object;
            // Wires latch from `next`; plain values have only `curr`.
            let dest = if object.next.is_null() {
                object.curr
            } else {
                object.next
            };
            if dest.is_null() {
                return Err(SimError::Engine("signal has no storage".to_string()));
            }
            std::ptr::copy_nonoverlapping(words.as_ptr(), dest, words.len());
        }
        Ok(())
    }

    fn get(&self, signal: &str) -> Result<u64, SimError> {
        let signal = self.signal(signal)?;
        unsafe {
            let object = &*signal.object;
            if object.curr.is_null() {
                return Err(SimError::Engine("signal has no storage".to_string()));
            }
            let words = std::slice::from_raw_parts(object.curr, chunks(signal.width));
            Ok(from_chunks(words))
        }
    }

    fn step(&mut self) -> Result<(), SimError> {
        let deltas = unsafe { (self.step)(self.handle) };
        log::trace!("cxxrtl step settled in {deltas} delta(s)");
        Ok(())
    }

    fn signals(&self) -> Vec<PortInfo> {
        self.ports.clone()
    }
}

impl Drop for CxxrtlEngine {
    fn drop(&mut self) {
        if !self.handle.is_null() {
            unsafe { (self.destroy)(self.handle) };
            self.handle = std::ptr::null_mut();
        }
    }
}

/// Builds [`CxxrtlEngine`]s, reusing a previously linked model when the
/// artifact fingerprint has not changed.
pub struct CxxrtlBuilder {
    toolchain: ToolchainConfig,
    build_dir: PathBuf,
}

/// The CXXRTL C API plus a destructor for a toplevel that never reached
/// `cxxrtl_create`.
const GLUE_SOURCE: &str = r#"#include <cxxrtl/capi/cxxrtl_capi.cc>

extern "C" void rtlwrap_design_destroy(cxxrtl_toplevel design) {
  delete design;
}
"#;

fn shared_library_name(top: &str) -> String {
    let extension = if cfg!(target_os = "macos") {
        "dylib"
    } else {
        "so"
    };
    format!("lib{top}.{extension}")
}

/// `-chparam` arguments for the parameter overrides yosys understands.
fn chparams(component: &WrapperComponent) -> String {
    let mut out = String::new();
    for (name, value) in &component.parameters {
        let rendered = match value {
            toml::Value::Integer(i) => i.to_string(),
            toml::Value::Boolean(b) => u8::from(*b).to_string(),
            toml::Value::String(s) => format!("\"{s}\""),
            other => {
                debug!("not passing parameter {name} = {other} to yosys");
                continue;
            }
        };
        out.push_str(&format!(" -chparam {name} {rendered}"));
    }
    out
}

/// The yosys script that turns `artifact` into CXXRTL C++ at `output`.
pub fn yosys_script(
    component: &WrapperComponent,
    artifact: &GeneratedArtifact,
    output: &Path,
) -> String {
    let sources: Vec<String> = artifact
        .sources
        .iter()
        .map(|s| format!("\"{}\"", s.display()))
        .collect();
    format!(
        "read_verilog -sv {}; hierarchy -top {}{}; proc; write_cxxrtl \"{}\"",
        sources.join(" "),
        artifact.top_module,
        chparams(component),
        output.display()
    )
}

impl CxxrtlBuilder {
    pub fn new(toolchain: ToolchainConfig, build_dir: impl Into<PathBuf>) -> Self {
        CxxrtlBuilder {
            toolchain,
            build_dir: build_dir.into(),
        }
    }

    fn tool(&self, tool: Tool) -> Result<PathBuf, BuildError> {
        self.toolchain
            .resolve(tool)
            .map_err(|e| BuildError::new(tool.executable_name(), e))
    }

    fn run(&self, stage: &str, invocation: ToolInvocation) -> Result<String, BuildError> {
        let invocation = invocation.timeout(self.toolchain.timeout());
        let output = run_tool(&invocation)
            .map_err(|e| BuildError::new(stage, format!("could not run: {e}")))?;
        if !output.success() {
            return Err(BuildError::new(stage, output.status_text())
                .with_diagnostics(output.diagnostics()));
        }
        Ok(output.stdout)
    }

    /// Produces the shared object for `artifact`, returning its path.
    pub fn compile(
        &self,
        component: &WrapperComponent,
        artifact: &GeneratedArtifact,
    ) -> Result<PathBuf, BuildError> {
        let short = artifact.fingerprint.get(..12).unwrap_or(&artifact.fingerprint);
        let dir = self
            .build_dir
            .join("cxxrtl")
            .join(format!("{}-{}", component.name, short));
        let library = dir.join(shared_library_name(&artifact.top_module));
        if library.is_file() && !artifact.fingerprint.is_empty() {
            info!("reusing {}", library.display());
            return Ok(library);
        }
        std::fs::create_dir_all(&dir)
            .map_err(|e| BuildError::new("setup", format!("{}: {e}", dir.display())))?;

        let design_cc = dir.join(format!("{}.cc", artifact.top_module));
        let yosys = self.tool(Tool::Yosys)?;
        self.run(
            "yosys",
            ToolInvocation::new("yosys write_cxxrtl", yosys)
                .arg("-q")
                .arg("-p")
                .arg(yosys_script(component, artifact, &design_cc)),
        )?;

        let yosys_config = self.tool(Tool::YosysConfig)?;
        let datdir = self.run(
            "yosys-config",
            ToolInvocation::new("yosys-config --datdir", yosys_config).arg("--datdir"),
        )?;
        let runtime = Path::new(datdir.trim())
            .join("include")
            .join("backends")
            .join("cxxrtl")
            .join("runtime");

        let glue_cc = dir.join("capi.cc");
        std::fs::write(&glue_cc, GLUE_SOURCE)
            .map_err(|e| BuildError::new("setup", format!("{}: {e}", glue_cc.display())))?;

        let cxx = self.tool(Tool::Cxx)?;
        self.run(
            "c++",
            ToolInvocation::new("c++ cxxrtl model", cxx)
                .args(["-std=c++17", "-O1", "-shared", "-fPIC"])
                .arg(format!("-I{}", runtime.display()))
                .arg(&design_cc)
                .arg(&glue_cc)
                .arg("-o")
                .arg(&library),
        )?;
        info!("linked {}", library.display());
        Ok(library)
    }
}

impl SimulatorBuilder for CxxrtlBuilder {
    fn build_engine(
        &self,
        component: &WrapperComponent,
        artifact: &GeneratedArtifact,
    ) -> Result<Box<dyn SimEngine>, BuildError> {
        let library = self.compile(component, artifact)?;
        Ok(Box::new(CxxrtlEngine::load(&library)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Backend;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use test_case::test_case;

    #[test_case(0x1, 1, vec![0x1]; "single bit")]
    #[test_case(0xff, 4, vec![0xf]; "masked to width")]
    #[test_case(0x1_2345_6789, 40, vec![0x2345_6789, 0x01]; "two chunks")]
    #[test_case(u64::MAX, 64, vec![u32::MAX, u32::MAX]; "full width")]
    fn chunk_layout(value: u64, width: usize, want: Vec<u32>) {
        assert_eq!(to_chunks(value, width), want);
    }

    #[test]
    fn chunks_reassemble() {
        assert_eq!(from_chunks(&[0x2345_6789, 0x01]), 0x1_2345_6789);
        assert_eq!(from_chunks(&[7]), 7);
    }

    #[test]
    fn script_reads_sources_and_sets_parameters() {
        let artifact = GeneratedArtifact {
            backend: Backend::Verilog,
            top_module: "timer".to_string(),
            parameters: vec!["W".to_string()],
            top_source: PathBuf::from("/rtl/timer.v"),
            sources: vec![PathBuf::from("/rtl/pkg.v"), PathBuf::from("/rtl/timer.v")],
            ports: Vec::new(),
            fingerprint: String::new(),
        };
        let mut parameters = BTreeMap::new();
        parameters.insert("W".to_string(), toml::Value::Integer(16));
        parameters.insert("EN".to_string(), toml::Value::Boolean(true));
        let component = WrapperComponent {
            name: "timer".to_string(),
            top_module: "timer".to_string(),
            backend: Backend::Verilog,
            parameters,
            clock_domains: Vec::new(),
            reset_domains: Vec::new(),
            ports: Vec::new(),
            pins: Vec::new(),
            sources: artifact.sources.clone(),
            foreign_ports: Vec::new(),
            driver: None,
        };
        assert_eq!(
            yosys_script(&component, &artifact, Path::new("/b/timer.cc")),
            "read_verilog -sv \"/rtl/pkg.v\" \"/rtl/timer.v\"; hierarchy -top timer -chparam EN 1 -chparam W 16; proc; write_cxxrtl \"/b/timer.cc\""
        );
    }

    static DESTROYED: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

    unsafe extern "C" fn count_destroy(_design: *mut CxxrtlToplevel) {
        DESTROYED.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }

    #[test]
    fn unclaimed_design_is_destroyed() {
        use std::sync::atomic::Ordering;
        let mut storage = 0u8;
        let fake = &mut storage as *mut u8 as *mut CxxrtlToplevel;

        let before = DESTROYED.load(Ordering::SeqCst);
        drop(PendingDesign {
            toplevel: fake,
            destroy: count_destroy,
        });
        assert_eq!(DESTROYED.load(Ordering::SeqCst), before + 1);

        let released = PendingDesign {
            toplevel: fake,
            destroy: count_destroy,
        }
        .release();
        assert_eq!(released, fake);
        assert_eq!(DESTROYED.load(Ordering::SeqCst), before + 1);
    }

    #[test]
    fn glue_exports_design_destructor() {
        assert!(GLUE_SOURCE.contains("cxxrtl_capi.cc"));
        assert!(GLUE_SOURCE.contains("extern \"C\" void rtlwrap_design_destroy(cxxrtl_toplevel design)"));
    }

    #[test]
    fn missing_library_is_a_load_error() {
        let err = match CxxrtlEngine::load(Path::new("/nonexistent/libnothing.so")) {
            Ok(_) => panic!("loading a missing library succeeded"),
            Err(e) => e,
        };
        assert_eq!(err.stage, "load");
    }
}
