// SPDX-License-Identifier: Apache-2.0

//! Content-addressed reuse of generated artifacts.
//!
//! Within a process, concurrent requests for the same fingerprint coalesce
//! onto one generation; a failed generation is not remembered, so the next
//! caller tries again. Across processes, a `manifest.json` written next to
//! the artifact lets a later run skip the tools entirely.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use once_cell::sync::OnceCell;

use crate::config::{GeneratorConfig, ModuleSpec};
use crate::generate::GeneratedArtifact;
use crate::rtlwrap_error::GenerationError;

pub const MANIFEST_FILE: &str = "manifest.json";

/// Files that can influence what a backend produces.
const FINGERPRINT_EXTENSIONS: &[&str] = &["v", "vh", "sv", "svh", "scala", "sbt", "java"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(blake3::Hash);

impl Fingerprint {
    pub fn to_hex(&self) -> String {
        self.0.to_hex().to_string()
    }

    /// First 12 hex digits, used to name output directories.
    pub fn short(&self) -> String {
        self.to_hex()[..12].to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

fn walk(dir: &Path, exclude: Option<&Path>, out: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if Some(path.as_path()) == exclude {
            continue;
        }
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with('.') || n == "target")
            .unwrap_or(false);
        if hidden {
            continue;
        }
        if path.is_dir() {
            walk(&path, exclude, out)?;
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| FINGERPRINT_EXTENSIONS.contains(&e))
            .unwrap_or(false)
        {
            out.push(path);
        }
    }
    Ok(())
}

/// BLAKE3 over the module and generator description plus every HDL-ish file
/// under the module's source location. `exclude` keeps an output directory
/// nested inside the sources from feeding back into its own key.
pub fn fingerprint(
    module: &ModuleSpec,
    generator: &GeneratorConfig,
    exclude: Option<&Path>,
) -> io::Result<Fingerprint> {
    let mut hasher = blake3::Hasher::new();
    let description = serde_json::to_vec(&(module, generator))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    hasher.update(&(description.len() as u64).to_le_bytes());
    hasher.update(&description);

    let root = &module.source_dir;
    let mut files = Vec::new();
    if root.is_file() {
        files.push(root.clone());
    } else if root.is_dir() {
        walk(root, exclude, &mut files)?;
    }
    files.sort();
    for file in &files {
        let rel = file.strip_prefix(root).unwrap_or(file);
        let rel = rel.to_string_lossy();
        let contents = std::fs::read(file)?;
        hasher.update(&(rel.len() as u64).to_le_bytes());
        hasher.update(rel.as_bytes());
        hasher.update(&(contents.len() as u64).to_le_bytes());
        hasher.update(&contents);
    }
    log::debug!(
        "fingerprinted {} ({} source file(s))",
        module.name,
        files.len()
    );
    Ok(Fingerprint(hasher.finalize()))
}

type Slot = Arc<OnceCell<Arc<GeneratedArtifact>>>;

#[derive(Default)]
pub struct ArtifactCache {
    entries: Mutex<HashMap<Fingerprint, Slot>>,
}

impl ArtifactCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: Fingerprint) -> Slot {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.entry(key).or_default().clone()
    }

    /// Returns the cached artifact for `key`, running `generate` if there is
    /// none. Callers racing on the same key block until the first finishes
    /// and share its result.
    pub fn get_or_generate<F>(
        &self,
        key: Fingerprint,
        generate: F,
    ) -> Result<Arc<GeneratedArtifact>, GenerationError>
    where
        F: FnOnce() -> Result<GeneratedArtifact, GenerationError>,
    {
        let slot = self.slot(key);
        slot.get_or_try_init(|| generate().map(Arc::new)).cloned()
    }

    pub fn get(&self, key: &Fingerprint) -> Option<Arc<GeneratedArtifact>> {
        let entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.get(key).and_then(|slot| slot.get().cloned())
    }

    /// Number of successfully generated entries.
    pub fn len(&self) -> usize {
        let entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.values().filter(|slot| slot.get().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reads a manifest from `dir`, returning it only if it was written for
/// `key` and every file it names still exists.
pub fn read_manifest(dir: &Path, key: &Fingerprint) -> Option<GeneratedArtifact> {
    let text = std::fs::read_to_string(dir.join(MANIFEST_FILE)).ok()?;
    let artifact: GeneratedArtifact = match serde_json::from_str(&text) {
        Ok(a) => a,
        Err(e) => {
            log::warn!("ignoring unreadable manifest in {}: {e}", dir.display());
            return None;
        }
    };
    if artifact.fingerprint != key.to_hex() {
        return None;
    }
    if !artifact.sources.iter().all(|s| s.is_file()) {
        log::info!("manifest in {} names missing files; regenerating", dir.display());
        return None;
    }
    Some(artifact)
}

pub fn write_manifest(dir: &Path, artifact: &GeneratedArtifact) -> io::Result<()> {
    let text = serde_json::to_string_pretty(artifact)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    std::fs::write(dir.join(MANIFEST_FILE), text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Backend, SourceLocation};
    use crate::interface::Direction;
    use crate::rtlwrap_error::GenerationFailure;
    use crate::verilog_ports::PortInfo;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn module(dir: &Path) -> ModuleSpec {
        ModuleSpec {
            name: "m".to_string(),
            source: SourceLocation::Path(dir.to_path_buf()),
            source_dir: dir.to_path_buf(),
            parameters: BTreeMap::new(),
        }
    }

    fn artifact(fingerprint: &Fingerprint, source: PathBuf) -> GeneratedArtifact {
        GeneratedArtifact {
            backend: Backend::Verilog,
            top_module: "m".to_string(),
            parameters: Vec::new(),
            top_source: source.clone(),
            sources: vec![source],
            ports: vec![PortInfo {
                name: "a".to_string(),
                width: 1,
                direction: Direction::In,
            }],
            fingerprint: fingerprint.to_hex(),
        }
    }

    #[test]
    fn fingerprint_tracks_sources_and_description() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("m.v"), "module m(input a); endmodule").unwrap();
        std::fs::write(dir.path().join("README"), "ignored").unwrap();
        let spec = module(dir.path());
        let gen = GeneratorConfig::pass_through();

        let a = fingerprint(&spec, &gen, None).unwrap();
        assert_eq!(a, fingerprint(&spec, &gen, None).unwrap());

        std::fs::write(dir.path().join("README"), "still ignored").unwrap();
        assert_eq!(a, fingerprint(&spec, &gen, None).unwrap());

        std::fs::write(dir.path().join("m.v"), "module m(input b); endmodule").unwrap();
        let b = fingerprint(&spec, &gen, None).unwrap();
        assert_ne!(a, b);

        let mut with_param = spec.clone();
        with_param
            .parameters
            .insert("W".to_string(), toml::Value::Integer(8));
        assert_ne!(b, fingerprint(&with_param, &gen, None).unwrap());
    }

    #[test]
    fn excluded_output_dir_does_not_change_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("m.v"), "module m; endmodule").unwrap();
        let out = dir.path().join("build");
        let spec = module(dir.path());
        let gen = GeneratorConfig::pass_through();
        let before = fingerprint(&spec, &gen, Some(&out)).unwrap();
        std::fs::create_dir(&out).unwrap();
        std::fs::write(out.join("m.v"), "module m(input z); endmodule").unwrap();
        assert_eq!(before, fingerprint(&spec, &gen, Some(&out)).unwrap());
    }

    #[test]
    fn concurrent_requests_generate_once() {
        let dir = tempfile::tempdir().unwrap();
        let key = fingerprint(&module(dir.path()), &GeneratorConfig::pass_through(), None).unwrap();
        let cache = Arc::new(ArtifactCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let source = dir.path().join("m.v");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                let source = source.clone();
                std::thread::spawn(move || {
                    cache
                        .get_or_generate(key, || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(50));
                            Ok(artifact(&key, source))
                        })
                        .unwrap()
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn failures_are_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let key = fingerprint(&module(dir.path()), &GeneratorConfig::pass_through(), None).unwrap();
        let cache = ArtifactCache::new();
        let err = cache
            .get_or_generate(key, || {
                Err(GenerationError::new(
                    Backend::Verilog,
                    GenerationFailure::MissingTopModule("m".to_string()),
                ))
            })
            .unwrap_err();
        assert_eq!(err.backend, Backend::Verilog);
        assert!(cache.is_empty());

        let ok = cache
            .get_or_generate(key, || Ok(artifact(&key, dir.path().join("m.v"))))
            .unwrap();
        assert_eq!(ok.top_module, "m");
        assert!(cache.get(&key).is_some());
    }

    #[test]
    fn manifest_round_trip_checks_key_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("m.v");
        std::fs::write(&source, "module m(input a); endmodule").unwrap();
        let key = fingerprint(&module(dir.path()), &GeneratorConfig::pass_through(), None).unwrap();
        let art = artifact(&key, source.clone());
        write_manifest(dir.path(), &art).unwrap();
        assert_eq!(read_manifest(dir.path(), &key), Some(art));

        std::fs::remove_file(&source).unwrap();
        assert_eq!(read_manifest(dir.path(), &key), None);
    }
}
