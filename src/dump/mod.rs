//! Live-process dump collaborator (C11). Producing a dump is platform- and
//! debugger-specific, so the agent only defines the contract here plus a
//! no-op implementation for platforms and tests that have nothing to dump to.

use std::path::PathBuf;
use std::sync::Mutex;

use thiserror::Error;

/// Dump verbosity requested on an Error verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpKind {
    Mini,
    MiniPlus,
    Full,
}

#[derive(Debug, Clone)]
pub struct DumpRequest {
    pub pid: u32,
    pub kind: DumpKind,
    pub process_name: String,
}

#[derive(Debug, Error)]
pub enum DumpError {
    #[error("dump volume usage above guard threshold, refusing to write")]
    VolumeGuardTripped,
    #[error("dump budget exhausted for process {0}")]
    BudgetExhausted(String),
    #[error("target process {0} is gone")]
    ProcessVanished(u32),
    #[error("dump write failed: {0}")]
    WriteFailed(String),
}

/// Implementations MUST NOT propagate failures up through the evaluation
/// pipeline — a failed dump is logged by the caller and evaluation continues.
pub trait DumpWriter: Send + Sync {
    fn request_dump(&self, request: DumpRequest) -> Result<PathBuf, DumpError>;
}

/// Refuses to dump once the target volume is at or above this usage fraction.
pub const DUMP_VOLUME_GUARD_PCT: f64 = 90.0;

/// Default number of dumps allowed per process name per run.
pub const DEFAULT_DUMP_BUDGET: u32 = 5;

/// No-op dump writer for platforms without a debugger backend and for tests
/// that only need to assert a dump was *requested*, not that bytes landed.
pub struct NoopDumpWriter {
    requests: Mutex<Vec<DumpRequest>>,
}

impl NoopDumpWriter {
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<DumpRequest> {
        self.requests.lock().expect("dump writer lock poisoned").clone()
    }
}

impl Default for NoopDumpWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl DumpWriter for NoopDumpWriter {
    fn request_dump(&self, request: DumpRequest) -> Result<PathBuf, DumpError> {
        let pid = request.pid;
        self.requests.lock().expect("dump writer lock poisoned").push(request);
        Ok(PathBuf::from(format!("/dev/null/{pid}.dmp")))
    }
}

/// Tracks how many dumps have been taken per process name this run and
/// refuses once `budget` is reached, independent of what the underlying
/// writer does.
pub struct BudgetedDumpWriter<W: DumpWriter> {
    inner: W,
    budget: u32,
    taken: Mutex<std::collections::HashMap<String, u32>>,
}

impl<W: DumpWriter> BudgetedDumpWriter<W> {
    pub fn new(inner: W, budget: u32) -> Self {
        Self {
            inner,
            budget,
            taken: Mutex::new(std::collections::HashMap::new()),
        }
    }
}

impl<W: DumpWriter> DumpWriter for BudgetedDumpWriter<W> {
    fn request_dump(&self, request: DumpRequest) -> Result<PathBuf, DumpError> {
        let mut taken = self.taken.lock().expect("dump budget lock poisoned");
        let count = taken.entry(request.process_name.clone()).or_insert(0);
        if *count >= self.budget {
            return Err(DumpError::BudgetExhausted(request.process_name.clone()));
        }
        *count += 1;
        drop(taken);
        self.inner.request_dump(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(name: &str) -> DumpRequest {
        DumpRequest {
            pid: 100,
            kind: DumpKind::MiniPlus,
            process_name: name.to_string(),
        }
    }

    #[test]
    fn noop_writer_records_requests() {
        let w = NoopDumpWriter::new();
        w.request_dump(req("svchost")).unwrap();
        assert_eq!(w.requests().len(), 1);
    }

    #[test]
    fn budgeted_writer_refuses_past_limit() {
        let w = BudgetedDumpWriter::new(NoopDumpWriter::new(), 2);
        assert!(w.request_dump(req("svchost")).is_ok());
        assert!(w.request_dump(req("svchost")).is_ok());
        assert!(matches!(w.request_dump(req("svchost")), Err(DumpError::BudgetExhausted(_))));
    }

    #[test]
    fn budget_is_tracked_per_process_name() {
        let w = BudgetedDumpWriter::new(NoopDumpWriter::new(), 1);
        assert!(w.request_dump(req("svchost")).is_ok());
        assert!(w.request_dump(req("other")).is_ok());
    }
}
