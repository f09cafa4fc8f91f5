//! CUDA stream helpers.
//!
//! Streams the provider *creates* (the host's `CreateStream` callback) are
//! owned and destroyed here; streams handed in per inference stay borrowed
//! raw handles.

use std::ptr;

use kiln_core::error::Result;
use kiln_core::ffi_types::CudaStreamHandle;

use crate::sys;

/// A non-blocking CUDA stream owned by the provider.
pub struct OwnedStream {
    raw: CudaStreamHandle,
}

// SAFETY: a cudaStream_t is usable from any thread; ordering within the
// stream is the driver's concern.
unsafe impl Send for OwnedStream {}
unsafe impl Sync for OwnedStream {}

impl OwnedStream {
    /// Create a non-blocking stream (does not synchronize with stream 0).
    pub fn new_non_blocking() -> Result<Self> {
        let mut raw: CudaStreamHandle = ptr::null_mut();
        // SAFETY: raw is writable stream storage.
        let rc = unsafe { sys::cuda_stream_create_with_flags(&mut raw, sys::STREAM_NON_BLOCKING)? };
        sys::check_cuda(rc, "cudaStreamCreateWithFlags")?;
        Ok(Self { raw })
    }

    #[inline]
    pub fn raw(&self) -> CudaStreamHandle {
        self.raw
    }
}

impl Drop for OwnedStream {
    fn drop(&mut self) {
        if !self.raw.is_null() {
            // SAFETY: raw was created by cudaStreamCreateWithFlags.
            let _ = unsafe { sys::cuda_stream_destroy(self.raw) };
        }
    }
}

/// Block until all work enqueued on `stream` has completed.
// `stream` is an opaque CUDA handle passed through to the runtime API.
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub fn synchronize(stream: CudaStreamHandle) -> Result<()> {
    // SAFETY: stream handles are produced by CUDA runtime-backed APIs.
    let rc = unsafe { sys::cuda_stream_synchronize(stream)? };
    sys::check_cuda(rc, "cudaStreamSynchronize")
}
