//! CUDA graph capture and replay for the per-node inference stream.
//!
//! After a warm-up quota of regular runs, the stream's work for one
//! inference is captured into a graph and instantiated; later inferences
//! with identical bindings replay the executable instead of re-issuing
//! kernels.  An engine rebuild invalidates the capture and restarts the
//! warm-up count.

use std::ptr;

use tracing::debug;

use kiln_core::error::Result;
use kiln_core::ffi_types::CudaStreamHandle;

use crate::sys;

/// Pure gating state: capture is allowed once `regular_runs` reaches the
/// warm-up threshold, and only one capture ever happens per gate until it
/// is invalidated.
#[derive(Debug)]
pub struct CaptureGate {
    threshold: u64,
    regular_runs: u64,
    captured: bool,
}

impl CaptureGate {
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold,
            regular_runs: 0,
            captured: false,
        }
    }

    /// Warm-up complete and nothing captured yet.
    pub fn capture_allowed(&self) -> bool {
        !self.captured && self.regular_runs >= self.threshold
    }

    pub fn is_captured(&self) -> bool {
        self.captured
    }

    pub fn note_regular_run(&mut self) {
        self.regular_runs += 1;
    }

    pub fn note_captured(&mut self) {
        self.captured = true;
    }

    /// Reset after an engine rebuild: the captured work no longer matches
    /// the engine, and the new engine gets its own warm-up.
    pub fn invalidate(&mut self) {
        self.captured = false;
        self.regular_runs = 0;
    }
}

/// Owns the capture lifecycle on one stream plus the instantiated
/// executable graph.
pub struct CudaGraph {
    stream: CudaStreamHandle,
    exec: sys::cudaGraphExec_t,
}

// SAFETY: graph handles are opaque driver objects; the provider serializes
// all use under its per-provider mutex.
unsafe impl Send for CudaGraph {}

impl CudaGraph {
    pub fn new() -> Self {
        Self {
            stream: ptr::null_mut(),
            exec: ptr::null_mut(),
        }
    }

    /// Point the capture at the stream this inference runs on.
    // `stream` is an opaque CUDA handle passed through to the runtime API.
    #[allow(clippy::not_unsafe_ptr_arg_deref)]
    pub fn set_stream(&mut self, stream: CudaStreamHandle) {
        self.stream = stream;
    }

    /// Begin recording GPU work issued to the stream.
    pub fn begin_capture(&self) -> Result<()> {
        // SAFETY: stream is the valid per-inference stream set beforehand.
        let rc = unsafe {
            sys::cuda_stream_begin_capture(self.stream, sys::STREAM_CAPTURE_MODE_THREAD_LOCAL)?
        };
        sys::check_cuda(rc, "cudaStreamBeginCapture")
    }

    /// Finish recording and instantiate the executable graph.
    pub fn end_capture(&mut self) -> Result<()> {
        let mut graph: sys::cudaGraph_t = ptr::null_mut();
        // SAFETY: stream is capturing; graph is writable storage.
        let rc = unsafe { sys::cuda_stream_end_capture(self.stream, &mut graph)? };
        sys::check_cuda(rc, "cudaStreamEndCapture")?;

        if !self.exec.is_null() {
            // SAFETY: previous executable is not in flight (provider mutex).
            let _ = unsafe { sys::cuda_graph_exec_destroy(self.exec) };
            self.exec = ptr::null_mut();
        }

        let mut exec: sys::cudaGraphExec_t = ptr::null_mut();
        // SAFETY: graph is the finalized capture from above.
        let rc = unsafe { sys::cuda_graph_instantiate(&mut exec, graph, 0)? };
        let instantiate = sys::check_cuda(rc, "cudaGraphInstantiate");
        // SAFETY: the template graph is no longer needed once instantiated.
        let _ = unsafe { sys::cuda_graph_destroy(graph) };
        instantiate?;
        self.exec = exec;
        debug!("CUDA graph captured and instantiated");
        Ok(())
    }

    /// Replay the captured work on the capture stream.
    pub fn replay(&self) -> Result<()> {
        // SAFETY: exec was instantiated by end_capture on this stream.
        let rc = unsafe { sys::cuda_graph_launch(self.exec, self.stream)? };
        sys::check_cuda(rc, "cudaGraphLaunch")
    }

    /// Drop the instantiated executable (engine rebuilt underneath it).
    pub fn reset(&mut self) {
        if !self.exec.is_null() {
            // SAFETY: exec is not in flight (provider mutex).
            let _ = unsafe { sys::cuda_graph_exec_destroy(self.exec) };
            self.exec = ptr::null_mut();
        }
    }
}

impl Default for CudaGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CudaGraph {
    fn drop(&mut self) {
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_waits_for_warmup() {
        let mut gate = CaptureGate::new(2);
        assert!(!gate.capture_allowed());
        gate.note_regular_run();
        assert!(!gate.capture_allowed());
        gate.note_regular_run();
        assert!(gate.capture_allowed());
    }

    #[test]
    fn gate_captures_once() {
        let mut gate = CaptureGate::new(0);
        assert!(gate.capture_allowed());
        gate.note_captured();
        assert!(gate.is_captured());
        assert!(!gate.capture_allowed());
    }

    #[test]
    fn invalidate_restarts_warmup() {
        let mut gate = CaptureGate::new(1);
        gate.note_regular_run();
        gate.note_captured();
        gate.invalidate();
        assert!(!gate.is_captured());
        assert!(!gate.capture_allowed());
        gate.note_regular_run();
        assert!(gate.capture_allowed());
    }
}
