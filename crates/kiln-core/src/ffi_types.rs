//! Raw handle aliases shared by the FFI crates.

#![allow(non_camel_case_types)]

use std::ffi::c_void;

/// CUDA runtime error code.
pub type cudaError_t = i32;
pub const CUDA_SUCCESS: cudaError_t = 0;

/// Opaque CUDA stream handle (`cudaStream_t`).
pub type CudaStreamHandle = *mut c_void;

/// Raw device pointer.
pub type DevicePtr = *mut c_void;
