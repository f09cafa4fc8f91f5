//! The provider-wide `IRuntime`: deserializes engines from bytes.

use std::sync::Arc;

use kiln_core::error::Result;

use crate::builder::build_err;
use crate::engine::Engine;
use crate::logger::TrtLogger;
use crate::sys;

/// One `IRuntime` per provider.  Deserializing an engine from a runtime is
/// thread safe per the TensorRT threading contract, but the provider
/// serializes it under its mutex anyway alongside cache I/O.
pub struct Runtime {
    handle: sys::TrtRuntimeHandle,
}

// SAFETY: see above; the handle is an opaque pointer.
unsafe impl Send for Runtime {}
unsafe impl Sync for Runtime {}

impl Runtime {
    pub fn new(logger: &TrtLogger) -> Result<Self> {
        // SAFETY: logger is the process-wide logger handle.
        let handle = unsafe { sys::trt_runtime_create(logger.handle()) };
        if handle.is_null() {
            return Err(build_err(
                "createInferRuntime",
                "TensorRT runtime unavailable (null handle)",
            ));
        }
        Ok(Self { handle })
    }

    /// Deserialize a serialized engine into a live one.
    pub fn deserialize_engine(&self, bytes: &[u8]) -> Result<Arc<Engine>> {
        // SAFETY: bytes is valid for len; handle is a live runtime.
        let engine =
            unsafe { sys::trt_runtime_deserialize_engine(self.handle, bytes.as_ptr(), bytes.len()) };
        if engine.is_null() {
            return Err(build_err(
                "deserializeCudaEngine",
                "runtime returned null engine",
            ));
        }
        Ok(Arc::new(Engine::from_handle(engine)))
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        // SAFETY: engines hold no back-reference to the runtime handle in
        // the shim; provider state drops engines first regardless.
        unsafe { sys::trt_runtime_destroy(self.handle) };
    }
}
