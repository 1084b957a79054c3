//! CPU/heap profiling plumbing: an optional CPU profile file and per-pass
//! heap profile files at caller-chosen paths. Internals of the profiling
//! crates themselves are out of scope - this is thin wiring from
//! `ScanConfig` paths to `pprof`'s and `dhat`'s own guard objects.

use std::path::{Path, PathBuf};

use pprof::protos::Message;
use tracing::{info, warn};

/// Holds an active CPU profiler guard for the lifetime of the run, if
/// `--cpuprofile` was given.
pub struct CpuProfiler {
    guard: Option<pprof::ProfilerGuard<'static>>,
    output_path: Option<PathBuf>,
}

impl CpuProfiler {
    pub fn start(path: Option<&Path>) -> anyhow::Result<Self> {
        let guard = match path {
            Some(_) => Some(pprof::ProfilerGuardBuilder::default().frequency(100).build()?),
            None => None,
        };
        Ok(Self {
            guard,
            output_path: path.map(PathBuf::from),
        })
    }

    /// Stop profiling and write the protobuf report, if one was started.
    pub fn stop(self) -> anyhow::Result<()> {
        let (Some(guard), Some(path)) = (self.guard, self.output_path) else {
            return Ok(());
        };
        let report = guard.report().build()?;
        let profile = report.pprof()?;
        let mut bytes = Vec::new();
        profile.write_to_vec(&mut bytes)?;
        std::fs::write(&path, bytes)?;
        info!(path = %path.display(), "wrote CPU profile");
        Ok(())
    }
}

/// Writes one heap snapshot per pass, named with the pass number as a
/// suffix, if `--memprofile` was given.
pub struct HeapProfiler {
    path_template: Option<PathBuf>,
    active: Option<dhat::Profiler>,
}

impl HeapProfiler {
    pub fn new(path_template: Option<PathBuf>) -> Self {
        Self {
            path_template,
            active: None,
        }
    }

    pub fn begin_pass(&mut self, pass_number: u32) {
        if let Some(template) = &self.path_template {
            let path = suffixed(template, pass_number);
            self.active = Some(dhat::Profiler::builder().file_name(path).build());
        }
    }

    /// Dropping the guard flushes the heap snapshot to disk.
    pub fn end_pass(&mut self, pass_number: u32) {
        if self.active.take().is_some() {
            if let Some(template) = &self.path_template {
                info!(path = %suffixed(template, pass_number).display(), "wrote heap profile");
            }
        } else if self.path_template.is_some() {
            warn!(pass = pass_number, "heap profiler was not active at pass end");
        }
    }
}

fn suffixed(path: &Path, pass_number: u32) -> PathBuf {
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    path.with_file_name(format!("{stem}_pass{pass_number}{ext}"))
}
