//! Device memory: RAII buffers and stream-ordered copies.

use std::ffi::c_void;
use std::os::raw::c_int;
use std::ptr;

use kiln_core::error::Result;
use kiln_core::ffi_types::CudaStreamHandle;

use crate::sys;

/// A device allocation owned by the provider (`cudaMalloc`/`cudaFree`).
pub struct DeviceBuffer {
    ptr: *mut c_void,
    len: usize,
}

// SAFETY: the buffer is a raw device allocation; access is mediated by
// stream ordering, not host-side aliasing.
unsafe impl Send for DeviceBuffer {}
unsafe impl Sync for DeviceBuffer {}

impl DeviceBuffer {
    /// Allocate `len` bytes of device memory.
    pub fn alloc(len: usize) -> Result<Self> {
        let mut ptr: *mut c_void = ptr::null_mut();
        // SAFETY: ptr is writable device-pointer storage.
        let rc = unsafe { sys::cuda_malloc(&mut ptr, len)? };
        sys::check_cuda(rc, "cudaMalloc")?;
        Ok(Self { ptr, len })
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut c_void {
        self.ptr
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            // SAFETY: ptr came from cudaMalloc and is freed exactly once.
            let _ = unsafe { sys::cuda_free(self.ptr) };
        }
    }
}

/// Query the compute capability of `device` as a `"<major><minor>"` string
/// (the `sm` tag used in cache file names, e.g. `"86"`).
pub fn compute_capability(device: i32) -> Result<String> {
    let mut major: c_int = 0;
    let mut minor: c_int = 0;
    // SAFETY: out-params are writable; attribute ids are runtime constants.
    unsafe {
        sys::check_cuda(
            sys::cuda_device_get_attribute(
                &mut major,
                sys::DEV_ATTR_COMPUTE_CAPABILITY_MAJOR,
                device,
            )?,
            "cudaDeviceGetAttribute",
        )?;
        sys::check_cuda(
            sys::cuda_device_get_attribute(
                &mut minor,
                sys::DEV_ATTR_COMPUTE_CAPABILITY_MINOR,
                device,
            )?,
            "cudaDeviceGetAttribute",
        )?;
    }
    Ok(format!("{major}{minor}"))
}

/// Asynchronous host→device copy on `stream`.
// Raw pointers are opaque handles validated by the CUDA runtime.
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub fn copy_htod_async(
    dst: *mut c_void,
    src: *const c_void,
    bytes: usize,
    stream: CudaStreamHandle,
) -> Result<()> {
    // SAFETY: caller guarantees dst/src are valid for `bytes` on their sides.
    let rc =
        unsafe { sys::cuda_memcpy_async(dst, src, bytes, sys::MEMCPY_HOST_TO_DEVICE, stream)? };
    sys::check_cuda(rc, "cudaMemcpyAsync(H2D)")
}

/// Asynchronous device→host copy on `stream`.
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub fn copy_dtoh_async(
    dst: *mut c_void,
    src: *const c_void,
    bytes: usize,
    stream: CudaStreamHandle,
) -> Result<()> {
    // SAFETY: caller guarantees dst/src are valid for `bytes` on their sides.
    let rc =
        unsafe { sys::cuda_memcpy_async(dst, src, bytes, sys::MEMCPY_DEVICE_TO_HOST, stream)? };
    sys::check_cuda(rc, "cudaMemcpyAsync(D2H)")
}

/// Asynchronous device→device copy on `stream`.
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub fn copy_dtod_async(
    dst: *mut c_void,
    src: *const c_void,
    bytes: usize,
    stream: CudaStreamHandle,
) -> Result<()> {
    // SAFETY: caller guarantees dst/src are valid device ranges.
    let rc =
        unsafe { sys::cuda_memcpy_async(dst, src, bytes, sys::MEMCPY_DEVICE_TO_DEVICE, stream)? };
    sys::check_cuda(rc, "cudaMemcpyAsync(D2D)")
}

/// Device→host copy that completes before returning: async on `stream`,
/// then a stream synchronize.  Used for shape-tensor readback, where the
/// values participate in shape inference on the host.
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub fn copy_dtoh_sync(
    dst: *mut c_void,
    src: *const c_void,
    bytes: usize,
    stream: CudaStreamHandle,
) -> Result<()> {
    copy_dtoh_async(dst, src, bytes, stream)?;
    crate::stream::synchronize(stream)
}
