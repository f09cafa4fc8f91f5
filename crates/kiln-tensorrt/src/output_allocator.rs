//! Output allocator for data-dependent-shape (DDS) outputs.
//!
//! For an output whose shape is only known after execution, the context
//! gets an allocator instead of a pre-bound buffer: TensorRT calls
//! `reallocate_output` during `enqueueV3` with the byte size it settled
//! on, then `notify_shape` with the concrete dims.  The allocator keeps
//! its buffer across inferences and only grows it.
//!
//! The state lives in a `Box` owned by the node, and raw trampolines hand
//! TensorRT back into it — the same shape as a decoder's C callback state.

use std::ffi::{CStr, c_void};
use std::os::raw::c_char;
use std::ptr;

use tracing::trace;

use kiln_cuda::sys as cuda;

use crate::sys::TrtDims;

/// Per-output allocator state: last buffer, its capacity, and the shape
/// TensorRT notified for the most recent inference.
pub struct DdsOutputAllocator {
    buffer: *mut c_void,
    capacity: usize,
    shape: Vec<i64>,
}

// SAFETY: TensorRT invokes the trampolines only during enqueueV3, which the
// provider serializes under its mutex.
unsafe impl Send for DdsOutputAllocator {}

impl DdsOutputAllocator {
    pub fn new() -> Box<Self> {
        Box::new(Self {
            buffer: ptr::null_mut(),
            capacity: 0,
            shape: Vec::new(),
        })
    }

    /// Device pointer of the most recent allocation (null before first use).
    pub fn buffer(&self) -> *mut c_void {
        self.buffer
    }

    /// Shape TensorRT notified after the last enqueue.
    pub fn shape(&self) -> &[i64] {
        &self.shape
    }

    /// Opaque user pointer for the shim registration.
    pub fn user_ptr(&mut self) -> *mut c_void {
        std::ptr::from_mut(self).cast()
    }

    fn reallocate(&mut self, size: usize) -> *mut c_void {
        // Grow-only: a smaller request reuses the existing buffer.
        if size <= self.capacity && !self.buffer.is_null() {
            return self.buffer;
        }
        if !self.buffer.is_null() {
            // SAFETY: buffer came from cudaMalloc below.
            let _ = unsafe { cuda::cuda_free(self.buffer) };
            self.buffer = ptr::null_mut();
            self.capacity = 0;
        }
        let mut fresh: *mut c_void = ptr::null_mut();
        // SAFETY: fresh is writable device-pointer storage.
        match unsafe { cuda::cuda_malloc(&mut fresh, size.max(1)) } {
            Ok(cuda::CUDA_SUCCESS) => {
                self.buffer = fresh;
                self.capacity = size.max(1);
                self.buffer
            }
            _ => ptr::null_mut(),
        }
    }

    fn notify(&mut self, dims: &TrtDims) {
        self.shape = dims.as_slice().to_vec();
    }
}

impl Drop for DdsOutputAllocator {
    fn drop(&mut self) {
        if !self.buffer.is_null() {
            // SAFETY: buffer came from cudaMalloc and is not in flight.
            let _ = unsafe { cuda::cuda_free(self.buffer) };
        }
    }
}

/// Trampoline TensorRT calls to obtain the output buffer.
pub(crate) unsafe extern "C" fn dds_reallocate_output(
    user: *mut c_void,
    tensor_name: *const c_char,
    size: usize,
    _alignment: usize,
    _stream: *mut c_void,
) -> *mut c_void {
    if user.is_null() {
        return ptr::null_mut();
    }
    // SAFETY: user is the Box<DdsOutputAllocator> registered for this output.
    let allocator = unsafe { &mut *user.cast::<DdsOutputAllocator>() };
    let buffer = allocator.reallocate(size);
    if !tensor_name.is_null() {
        // SAFETY: TensorRT passes a NUL-terminated tensor name.
        let name = unsafe { CStr::from_ptr(tensor_name) }.to_string_lossy();
        trace!(output = %name, size, "DDS reallocate");
    }
    buffer
}

/// Trampoline TensorRT calls once the output shape is concrete.
pub(crate) unsafe extern "C" fn dds_notify_shape(
    user: *mut c_void,
    _tensor_name: *const c_char,
    dims: *const TrtDims,
) {
    if user.is_null() || dims.is_null() {
        return;
    }
    // SAFETY: user is the registered allocator; dims is valid for the call.
    let allocator = unsafe { &mut *user.cast::<DdsOutputAllocator>() };
    // SAFETY: dims points at a TrtDims valid for this call.
    allocator.notify(unsafe { &*dims });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_records_shape() {
        let mut allocator = DdsOutputAllocator::new();
        let dims = TrtDims {
            nb_dims: 2,
            d: [5, 2, 0, 0, 0, 0, 0, 0],
        };
        allocator.notify(&dims);
        assert_eq!(allocator.shape(), &[5, 2]);
    }

    #[test]
    fn trampolines_tolerate_null_user() {
        // SAFETY: both trampolines guard null user/dims before deref.
        unsafe {
            assert!(dds_reallocate_output(
                ptr::null_mut(),
                ptr::null(),
                16,
                256,
                ptr::null_mut()
            )
            .is_null());
            dds_notify_shape(ptr::null_mut(), ptr::null(), ptr::null());
        }
    }
}
