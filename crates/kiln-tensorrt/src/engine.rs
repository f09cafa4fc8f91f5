//! Engine and execution-context wrappers.
//!
//! An [`ExecutionContext`] holds an `Arc` of its [`Engine`], so the engine
//! cannot be destroyed while any context is alive; dropping a node's
//! context field before its engine field preserves the required
//! context-before-engine destruction order.

use std::ffi::CStr;
use std::sync::Arc;

use kiln_core::error::{ProviderError, Result};
use kiln_core::ffi_types::CudaStreamHandle;
use kiln_core::types::{Dims, TensorElementType};

use crate::builder::{build_err, cstring, data_type_to_element, dims_to_trt, trt_to_dims};
use crate::output_allocator::DdsOutputAllocator;
use crate::sys;

fn bind_err(detail: impl Into<String>) -> ProviderError {
    ProviderError::Bind {
        node: String::new(),
        detail: detail.into(),
    }
}

/// A deserialized `ICudaEngine`.
pub struct Engine {
    handle: sys::TrtEngineHandle,
}

// SAFETY: engine queries are const per the TensorRT threading contract;
// mutation happens only through contexts, serialized by the provider mutex.
unsafe impl Send for Engine {}
unsafe impl Sync for Engine {}

impl Engine {
    pub(crate) fn from_handle(handle: sys::TrtEngineHandle) -> Self {
        Self { handle }
    }

    pub fn nb_io_tensors(&self) -> i32 {
        // SAFETY: handle is a live engine.
        unsafe { sys::trt_engine_get_nb_io_tensors(self.handle) }
    }

    /// IO tensor names in engine order with their input/output mode.
    pub fn io_tensors(&self) -> Vec<(String, bool)> {
        let mut out = Vec::new();
        for i in 0..self.nb_io_tensors() {
            // SAFETY: handle is a live engine; i is in range.
            let name_ptr = unsafe { sys::trt_engine_get_io_tensor_name(self.handle, i) };
            if name_ptr.is_null() {
                continue;
            }
            // SAFETY: name_ptr is an engine-owned NUL-terminated string.
            let name = unsafe { CStr::from_ptr(name_ptr) }
                .to_string_lossy()
                .into_owned();
            // SAFETY: name_ptr stays valid for the mode query.
            let mode = unsafe { sys::trt_engine_get_tensor_io_mode(self.handle, name_ptr) };
            out.push((name, mode == sys::IO_MODE_INPUT));
        }
        out
    }

    pub fn tensor_shape(&self, name: &str) -> Result<Dims> {
        let cname = cstring(name)?;
        let mut dims = sys::TrtDims::zeroed();
        // SAFETY: cname is NUL-terminated; dims is writable.
        unsafe { sys::trt_engine_get_tensor_shape(self.handle, cname.as_ptr(), &mut dims) };
        Ok(trt_to_dims(&dims))
    }

    pub fn tensor_element_type(&self, name: &str) -> Result<TensorElementType> {
        let cname = cstring(name)?;
        // SAFETY: cname is NUL-terminated.
        let dtype = unsafe { sys::trt_engine_get_tensor_data_type(self.handle, cname.as_ptr()) };
        data_type_to_element(dtype)
            .ok_or_else(|| bind_err(format!("engine reports unknown data type {dtype} for '{name}'")))
    }

    /// Whether this input participates in shape inference (a shape tensor
    /// whose *values* must be visible to the host).
    pub fn is_shape_inference_io(&self, name: &str) -> Result<bool> {
        let cname = cstring(name)?;
        // SAFETY: cname is NUL-terminated.
        Ok(unsafe { sys::trt_engine_is_shape_inference_io(self.handle, cname.as_ptr()) != 0 })
    }

    pub fn device_memory_size(&self) -> usize {
        // SAFETY: handle is a live engine.
        unsafe { sys::trt_engine_get_device_memory_size(self.handle) }
    }

    /// Serialize the (possibly refitted) engine back to bytes.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        // SAFETY: handle is a live engine.
        let mem = unsafe { sys::trt_engine_serialize(self.handle) };
        if mem.is_null() {
            return Err(build_err("serialize", "engine serialize returned null"));
        }
        let bytes = crate::builder::HostMemory::from_handle(mem).to_vec();
        Ok(bytes)
    }

    pub(crate) fn handle(&self) -> sys::TrtEngineHandle {
        self.handle
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // SAFETY: contexts hold an Arc of the engine, so none outlive it.
        unsafe { sys::trt_engine_destroy(self.handle) };
    }
}

/// An `IExecutionContext` pinned to its engine.
pub struct ExecutionContext {
    handle: sys::TrtContextHandle,
    _engine: Arc<Engine>,
}

// SAFETY: context use is serialized under the per-provider mutex.
unsafe impl Send for ExecutionContext {}

impl ExecutionContext {
    /// Create a context owning its device memory.
    pub fn new(engine: &Arc<Engine>) -> Result<Self> {
        // SAFETY: engine handle is live.
        let handle = unsafe { sys::trt_engine_create_execution_context(engine.handle()) };
        Self::wrap(handle, engine)
    }

    /// Create a context whose device memory the caller supplies before
    /// launch (context-memory sharing).
    pub fn new_without_device_memory(engine: &Arc<Engine>) -> Result<Self> {
        // SAFETY: engine handle is live.
        let handle =
            unsafe { sys::trt_engine_create_execution_context_without_device_memory(engine.handle()) };
        Self::wrap(handle, engine)
    }

    fn wrap(handle: sys::TrtContextHandle, engine: &Arc<Engine>) -> Result<Self> {
        if handle.is_null() {
            return Err(build_err(
                "createExecutionContext",
                "engine returned null execution context",
            ));
        }
        Ok(Self {
            handle,
            _engine: Arc::clone(engine),
        })
    }

    pub fn set_input_shape(&self, name: &str, dims: &Dims) -> Result<()> {
        let cname = cstring(name)?;
        let trt_dims = dims_to_trt(dims);
        // SAFETY: cname is NUL-terminated; trt_dims lives across the call.
        let rc = unsafe { sys::trt_context_set_input_shape(self.handle, cname.as_ptr(), &trt_dims) };
        if rc == 0 {
            return Err(bind_err(format!("setInputShape rejected for input '{name}'")));
        }
        Ok(())
    }

    /// Bind a device (or, for shape tensors, host) address for a tensor.
    // `address` is an opaque pointer handed through to TensorRT.
    #[allow(clippy::not_unsafe_ptr_arg_deref)]
    pub fn set_tensor_address(&self, name: &str, address: *mut std::ffi::c_void) -> Result<()> {
        let cname = cstring(name)?;
        // SAFETY: cname is NUL-terminated; address validity is the caller's
        // binding contract with TensorRT.
        let rc = unsafe { sys::trt_context_set_tensor_address(self.handle, cname.as_ptr(), address) };
        if rc == 0 {
            return Err(bind_err(format!("setTensorAddress rejected for '{name}'")));
        }
        Ok(())
    }

    /// Tensor shape as currently resolved by the context (post
    /// `set_input_shape` propagation; `-1` marks data-dependent dims).
    pub fn tensor_shape(&self, name: &str) -> Result<Dims> {
        let cname = cstring(name)?;
        let mut dims = sys::TrtDims::zeroed();
        // SAFETY: cname is NUL-terminated; dims is writable.
        unsafe { sys::trt_context_get_tensor_shape(self.handle, cname.as_ptr(), &mut dims) };
        Ok(trt_to_dims(&dims))
    }

    /// Point the context at externally managed device memory.
    // `memory` is an opaque device pointer handed through to TensorRT.
    #[allow(clippy::not_unsafe_ptr_arg_deref)]
    pub fn set_device_memory(&self, memory: *mut std::ffi::c_void) {
        // SAFETY: caller guarantees the buffer covers device_memory_size().
        unsafe { sys::trt_context_set_device_memory(self.handle, memory) };
    }

    /// Install a DDS output allocator for one data-dependent output.
    pub fn set_output_allocator(
        &self,
        name: &str,
        allocator: &mut DdsOutputAllocator,
    ) -> Result<()> {
        let cname = cstring(name)?;
        // SAFETY: the allocator is heap-pinned by the node state and
        // outlives the context registration.
        let rc = unsafe {
            sys::trt_context_set_output_allocator(
                self.handle,
                cname.as_ptr(),
                allocator.user_ptr(),
                Some(crate::output_allocator::dds_reallocate_output),
                Some(crate::output_allocator::dds_notify_shape),
            )
        };
        if rc == 0 {
            return Err(bind_err(format!("setOutputAllocator rejected for output '{name}'")));
        }
        Ok(())
    }

    /// Launch the inference on `stream`.
    // `stream` is an opaque CUDA handle handed through to TensorRT.
    #[allow(clippy::not_unsafe_ptr_arg_deref)]
    pub fn enqueue_v3(&self, stream: CudaStreamHandle) -> Result<()> {
        // SAFETY: all bindings were installed under the provider mutex.
        let ok = unsafe { sys::trt_context_enqueue_v3(self.handle, stream) };
        if ok == 0 {
            return Err(ProviderError::Exec {
                node: String::new(),
                detail: "execution context enqueue failed".into(),
            });
        }
        Ok(())
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        // SAFETY: handle is live; the Arc keeps the engine alive past this.
        unsafe { sys::trt_context_destroy(self.handle) };
    }
}
