//! Refitter wrappers for weight-stripped engines.

use std::path::Path;

use kiln_core::error::Result;

use crate::builder::{build_err, cstring};
use crate::engine::Engine;
use crate::logger::TrtLogger;
use crate::sys;

/// `IRefitter` bound to a deserialized engine.
pub struct Refitter {
    handle: sys::TrtRefitterHandle,
}

// SAFETY: refit runs under the per-provider mutex.
unsafe impl Send for Refitter {}

impl Refitter {
    pub fn new(engine: &Engine, logger: &TrtLogger) -> Result<Self> {
        // SAFETY: engine and logger handles are live.
        let handle = unsafe { sys::trt_refitter_create(engine.handle(), logger.handle()) };
        if handle.is_null() {
            return Err(build_err("createInferRefitter", "refitter creation returned null"));
        }
        Ok(Self { handle })
    }

    /// Apply all supplied weights to the engine.
    pub fn refit_cuda_engine(&self) -> Result<()> {
        // SAFETY: handle is a live refitter with weights supplied.
        let ok = unsafe { sys::trt_refitter_refit_cuda_engine(self.handle) };
        if ok == 0 {
            return Err(build_err(
                "refitCudaEngine",
                "refitter could not refit the weight-stripped engine",
            ));
        }
        Ok(())
    }
}

impl Drop for Refitter {
    fn drop(&mut self) {
        // SAFETY: handle is live; parser refitters are dropped first.
        unsafe { sys::trt_refitter_destroy(self.handle) };
    }
}

/// `nvonnxparser::IParserRefitter` — streams weights from the original
/// ONNX file into a refitter.
pub struct ParserRefitter {
    handle: sys::TrtParserRefitterHandle,
}

// SAFETY: refit runs under the per-provider mutex.
unsafe impl Send for ParserRefitter {}

impl ParserRefitter {
    pub fn new(refitter: &Refitter, logger: &TrtLogger) -> Result<Self> {
        // SAFETY: refitter and logger handles are live.
        let handle = unsafe { sys::trt_parser_refitter_create(refitter.handle, logger.handle()) };
        if handle.is_null() {
            return Err(build_err(
                "createParserRefitter",
                "parser refitter creation returned null",
            ));
        }
        Ok(Self { handle })
    }

    pub fn refit_from_file(&self, onnx_path: &Path) -> Result<()> {
        let cpath = cstring(&onnx_path.to_string_lossy())?;
        // SAFETY: cpath is NUL-terminated; handle is live.
        let ok = unsafe { sys::trt_parser_refitter_refit_from_file(self.handle, cpath.as_ptr()) };
        if ok == 0 {
            return Err(build_err(
                "refitFromFile",
                format!(
                    "parser refitter could not refit from weights in {}",
                    onnx_path.display()
                ),
            ));
        }
        Ok(())
    }
}

impl Drop for ParserRefitter {
    fn drop(&mut self) {
        // SAFETY: handle is live.
        unsafe { sys::trt_parser_refitter_destroy(self.handle) };
    }
}
