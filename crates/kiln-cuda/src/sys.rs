//! CUDA runtime FFI used by the provider.
//!
//! On Linux the symbols are resolved from `libcudart` at first use via
//! `dlopen`/`dlsym`, so the crate builds and its pure-logic tests run on
//! machines without the CUDA toolkit.  Elsewhere the symbols are linked
//! directly.

#![allow(non_camel_case_types, non_snake_case)]

use std::ffi::c_void;
#[cfg(target_os = "linux")]
use std::ffi::{CStr, CString, c_char};
use std::os::raw::{c_int, c_uint};
#[cfg(target_os = "linux")]
use std::sync::OnceLock;

use kiln_core::error::{ProviderError, Result};
pub use kiln_core::ffi_types::{CUDA_SUCCESS, CudaStreamHandle, cudaError_t};

/// Opaque CUDA graph handle.
pub type cudaGraph_t = *mut c_void;
/// Opaque instantiated-graph handle.
pub type cudaGraphExec_t = *mut c_void;

/// `cudaMemcpyKind` values.
pub const MEMCPY_HOST_TO_HOST: c_int = 0;
pub const MEMCPY_HOST_TO_DEVICE: c_int = 1;
pub const MEMCPY_DEVICE_TO_HOST: c_int = 2;
pub const MEMCPY_DEVICE_TO_DEVICE: c_int = 3;

/// `cudaStreamNonBlocking` creation flag.
pub const STREAM_NON_BLOCKING: c_uint = 1;

/// `cudaStreamCaptureModeThreadLocal`.
pub const STREAM_CAPTURE_MODE_THREAD_LOCAL: c_int = 1;

/// `cudaDevAttrComputeCapabilityMajor` / `Minor`.
pub const DEV_ATTR_COMPUTE_CAPABILITY_MAJOR: c_int = 75;
pub const DEV_ATTR_COMPUTE_CAPABILITY_MINOR: c_int = 76;

#[cfg(not(target_os = "linux"))]
unsafe extern "C" {
    fn cudaMalloc(ptr: *mut *mut c_void, size: usize) -> cudaError_t;
    fn cudaFree(ptr: *mut c_void) -> cudaError_t;
    fn cudaMemcpy(dst: *mut c_void, src: *const c_void, count: usize, kind: c_int) -> cudaError_t;
    fn cudaMemcpyAsync(
        dst: *mut c_void,
        src: *const c_void,
        count: usize,
        kind: c_int,
        stream: CudaStreamHandle,
    ) -> cudaError_t;
    fn cudaStreamCreateWithFlags(stream: *mut CudaStreamHandle, flags: c_uint) -> cudaError_t;
    fn cudaStreamDestroy(stream: CudaStreamHandle) -> cudaError_t;
    fn cudaStreamSynchronize(stream: CudaStreamHandle) -> cudaError_t;
    fn cudaStreamBeginCapture(stream: CudaStreamHandle, mode: c_int) -> cudaError_t;
    fn cudaStreamEndCapture(stream: CudaStreamHandle, graph: *mut cudaGraph_t) -> cudaError_t;
    fn cudaGraphInstantiate(
        exec: *mut cudaGraphExec_t,
        graph: cudaGraph_t,
        flags: u64,
    ) -> cudaError_t;
    fn cudaGraphLaunch(exec: cudaGraphExec_t, stream: CudaStreamHandle) -> cudaError_t;
    fn cudaGraphDestroy(graph: cudaGraph_t) -> cudaError_t;
    fn cudaGraphExecDestroy(exec: cudaGraphExec_t) -> cudaError_t;
    fn cudaDeviceGetAttribute(value: *mut c_int, attr: c_int, device: c_int) -> cudaError_t;
    fn cudaSetDevice(device: c_int) -> cudaError_t;
}

#[cfg(target_os = "linux")]
unsafe extern "C" {
    fn dlopen(filename: *const c_char, flags: i32) -> *mut c_void;
    fn dlerror() -> *const c_char;
    fn dlsym(handle: *mut c_void, symbol: *const c_char) -> *mut c_void;
}

#[cfg(target_os = "linux")]
const RTLD_NOW: i32 = 2;
#[cfg(target_os = "linux")]
const RTLD_GLOBAL: i32 = 0x100;

#[cfg(target_os = "linux")]
struct CudaRuntimeApi {
    cuda_malloc: unsafe extern "C" fn(*mut *mut c_void, usize) -> cudaError_t,
    cuda_free: unsafe extern "C" fn(*mut c_void) -> cudaError_t,
    cuda_memcpy: unsafe extern "C" fn(*mut c_void, *const c_void, usize, c_int) -> cudaError_t,
    cuda_memcpy_async: unsafe extern "C" fn(
        *mut c_void,
        *const c_void,
        usize,
        c_int,
        CudaStreamHandle,
    ) -> cudaError_t,
    cuda_stream_create_with_flags:
        unsafe extern "C" fn(*mut CudaStreamHandle, c_uint) -> cudaError_t,
    cuda_stream_destroy: unsafe extern "C" fn(CudaStreamHandle) -> cudaError_t,
    cuda_stream_synchronize: unsafe extern "C" fn(CudaStreamHandle) -> cudaError_t,
    cuda_stream_begin_capture: unsafe extern "C" fn(CudaStreamHandle, c_int) -> cudaError_t,
    cuda_stream_end_capture:
        unsafe extern "C" fn(CudaStreamHandle, *mut cudaGraph_t) -> cudaError_t,
    cuda_graph_instantiate:
        unsafe extern "C" fn(*mut cudaGraphExec_t, cudaGraph_t, u64) -> cudaError_t,
    cuda_graph_launch: unsafe extern "C" fn(cudaGraphExec_t, CudaStreamHandle) -> cudaError_t,
    cuda_graph_destroy: unsafe extern "C" fn(cudaGraph_t) -> cudaError_t,
    cuda_graph_exec_destroy: unsafe extern "C" fn(cudaGraphExec_t) -> cudaError_t,
    cuda_device_get_attribute: unsafe extern "C" fn(*mut c_int, c_int, c_int) -> cudaError_t,
    cuda_set_device: unsafe extern "C" fn(c_int) -> cudaError_t,
}

#[cfg(target_os = "linux")]
static CUDA_RUNTIME_API: OnceLock<std::result::Result<CudaRuntimeApi, String>> = OnceLock::new();

#[cfg(target_os = "linux")]
fn load_symbol<T>(handle: *mut c_void, name: &'static str) -> std::result::Result<T, String> {
    let cname = CString::new(name).map_err(|_| format!("invalid CUDA symbol name: {name}"))?;
    // SAFETY: handle is a valid dlopen handle and cname is a valid C symbol name.
    let ptr = unsafe { dlsym(handle, cname.as_ptr()) };
    if ptr.is_null() {
        // SAFETY: dlerror returns a thread-local C string or null.
        let err = unsafe {
            let p = dlerror();
            if p.is_null() {
                "unknown dlsym error".to_string()
            } else {
                CStr::from_ptr(p).to_string_lossy().to_string()
            }
        };
        Err(format!("dlsym({name}) failed: {err}"))
    } else {
        // SAFETY: ptr points to a function with signature T.
        Ok(unsafe { std::mem::transmute_copy(&ptr) })
    }
}

#[cfg(target_os = "linux")]
fn init_cuda_runtime_api() -> std::result::Result<CudaRuntimeApi, String> {
    let mut handle = std::ptr::null_mut();
    let mut last_err = "unknown dlopen error".to_string();
    for candidate in ["libcudart.so.12", "libcudart.so.11.0", "libcudart.so"] {
        let soname =
            CString::new(candidate).map_err(|_| format!("invalid CUDA soname: {candidate}"))?;
        // SAFETY: static soname and valid dlopen flags.
        handle = unsafe { dlopen(soname.as_ptr(), RTLD_NOW | RTLD_GLOBAL) };
        if !handle.is_null() {
            break;
        }
        // SAFETY: dlerror returns a thread-local C string or null.
        last_err = unsafe {
            let p = dlerror();
            if p.is_null() {
                "unknown dlopen error".to_string()
            } else {
                CStr::from_ptr(p).to_string_lossy().to_string()
            }
        };
    }

    if handle.is_null() {
        return Err(format!("dlopen(libcudart.so.12|libcudart.so) failed: {last_err}"));
    }

    Ok(CudaRuntimeApi {
        cuda_malloc: load_symbol(handle, "cudaMalloc")?,
        cuda_free: load_symbol(handle, "cudaFree")?,
        cuda_memcpy: load_symbol(handle, "cudaMemcpy")?,
        cuda_memcpy_async: load_symbol(handle, "cudaMemcpyAsync")?,
        cuda_stream_create_with_flags: load_symbol(handle, "cudaStreamCreateWithFlags")?,
        cuda_stream_destroy: load_symbol(handle, "cudaStreamDestroy")?,
        cuda_stream_synchronize: load_symbol(handle, "cudaStreamSynchronize")?,
        cuda_stream_begin_capture: load_symbol(handle, "cudaStreamBeginCapture")?,
        cuda_stream_end_capture: load_symbol(handle, "cudaStreamEndCapture")?,
        cuda_graph_instantiate: load_symbol(handle, "cudaGraphInstantiate")?,
        cuda_graph_launch: load_symbol(handle, "cudaGraphLaunch")?,
        cuda_graph_destroy: load_symbol(handle, "cudaGraphDestroy")?,
        cuda_graph_exec_destroy: load_symbol(handle, "cudaGraphExecDestroy")?,
        cuda_device_get_attribute: load_symbol(handle, "cudaDeviceGetAttribute")?,
        cuda_set_device: load_symbol(handle, "cudaSetDevice")?,
    })
}

#[cfg(target_os = "linux")]
fn cuda_runtime_api() -> Result<&'static CudaRuntimeApi> {
    let api = CUDA_RUNTIME_API.get_or_init(init_cuda_runtime_api);
    api.as_ref().map_err(|err| {
        ProviderError::Config(format!(
            "failed to load CUDA runtime API: {err}. Ensure the CUDA runtime is installed \
and visible via LD_LIBRARY_PATH (on WSL, prepend /usr/lib/wsl/lib)."
        ))
    })
}

macro_rules! cuda_call {
    ($api_field:ident, $direct:ident, ($($arg:expr),*)) => {{
        #[cfg(target_os = "linux")]
        {
            let api = cuda_runtime_api()?;
            // SAFETY: function pointer was resolved from libcudart with matching signature.
            Ok(unsafe { (api.$api_field)($($arg),*) })
        }
        #[cfg(not(target_os = "linux"))]
        {
            // SAFETY: FFI call into the CUDA runtime API.
            Ok(unsafe { $direct($($arg),*) })
        }
    }};
}

/// Call `cudaMalloc`.
///
/// # Safety
/// `ptr` must be a valid, writable pointer to device-pointer storage.
pub unsafe fn cuda_malloc(ptr: *mut *mut c_void, size: usize) -> Result<cudaError_t> {
    cuda_call!(cuda_malloc, cudaMalloc, (ptr, size))
}

/// Call `cudaFree`.
///
/// # Safety
/// `ptr` must be a device pointer from `cudaMalloc` (or null).
pub unsafe fn cuda_free(ptr: *mut c_void) -> Result<cudaError_t> {
    cuda_call!(cuda_free, cudaFree, (ptr))
}

/// Call `cudaMemcpy`.
///
/// # Safety
/// `dst`/`src` must be valid for `count` bytes on the sides `kind` names.
pub unsafe fn cuda_memcpy(
    dst: *mut c_void,
    src: *const c_void,
    count: usize,
    kind: c_int,
) -> Result<cudaError_t> {
    cuda_call!(cuda_memcpy, cudaMemcpy, (dst, src, count, kind))
}

/// Call `cudaMemcpyAsync`.
///
/// # Safety
/// `dst`/`src` must be valid for `count` bytes and outlive the stream work.
pub unsafe fn cuda_memcpy_async(
    dst: *mut c_void,
    src: *const c_void,
    count: usize,
    kind: c_int,
    stream: CudaStreamHandle,
) -> Result<cudaError_t> {
    cuda_call!(cuda_memcpy_async, cudaMemcpyAsync, (dst, src, count, kind, stream))
}

/// Call `cudaStreamCreateWithFlags`.
///
/// # Safety
/// `stream` must be a valid, writable pointer to stream storage.
pub unsafe fn cuda_stream_create_with_flags(
    stream: *mut CudaStreamHandle,
    flags: c_uint,
) -> Result<cudaError_t> {
    cuda_call!(cuda_stream_create_with_flags, cudaStreamCreateWithFlags, (stream, flags))
}

/// Call `cudaStreamDestroy`.
///
/// # Safety
/// `stream` must be a stream created by this process (or null).
pub unsafe fn cuda_stream_destroy(stream: CudaStreamHandle) -> Result<cudaError_t> {
    cuda_call!(cuda_stream_destroy, cudaStreamDestroy, (stream))
}

/// Call `cudaStreamSynchronize`.
///
/// # Safety
/// `stream` must be a valid stream handle (or null for the default stream).
pub unsafe fn cuda_stream_synchronize(stream: CudaStreamHandle) -> Result<cudaError_t> {
    cuda_call!(cuda_stream_synchronize, cudaStreamSynchronize, (stream))
}

/// Call `cudaStreamBeginCapture`.
///
/// # Safety
/// `stream` must be a valid stream not already capturing.
pub unsafe fn cuda_stream_begin_capture(
    stream: CudaStreamHandle,
    mode: c_int,
) -> Result<cudaError_t> {
    cuda_call!(cuda_stream_begin_capture, cudaStreamBeginCapture, (stream, mode))
}

/// Call `cudaStreamEndCapture`.
///
/// # Safety
/// `stream` must be capturing; `graph` must be writable graph storage.
pub unsafe fn cuda_stream_end_capture(
    stream: CudaStreamHandle,
    graph: *mut cudaGraph_t,
) -> Result<cudaError_t> {
    cuda_call!(cuda_stream_end_capture, cudaStreamEndCapture, (stream, graph))
}

/// Call `cudaGraphInstantiate`.
///
/// # Safety
/// `exec` must be writable; `graph` must be a finalized capture.
pub unsafe fn cuda_graph_instantiate(
    exec: *mut cudaGraphExec_t,
    graph: cudaGraph_t,
    flags: u64,
) -> Result<cudaError_t> {
    cuda_call!(cuda_graph_instantiate, cudaGraphInstantiate, (exec, graph, flags))
}

/// Call `cudaGraphLaunch`.
///
/// # Safety
/// `exec` must be a valid instantiated graph; `stream` a valid stream.
pub unsafe fn cuda_graph_launch(
    exec: cudaGraphExec_t,
    stream: CudaStreamHandle,
) -> Result<cudaError_t> {
    cuda_call!(cuda_graph_launch, cudaGraphLaunch, (exec, stream))
}

/// Call `cudaGraphDestroy`.
///
/// # Safety
/// `graph` must be a valid graph handle not in use.
pub unsafe fn cuda_graph_destroy(graph: cudaGraph_t) -> Result<cudaError_t> {
    cuda_call!(cuda_graph_destroy, cudaGraphDestroy, (graph))
}

/// Call `cudaGraphExecDestroy`.
///
/// # Safety
/// `exec` must be a valid instantiated graph not in use.
pub unsafe fn cuda_graph_exec_destroy(exec: cudaGraphExec_t) -> Result<cudaError_t> {
    cuda_call!(cuda_graph_exec_destroy, cudaGraphExecDestroy, (exec))
}

/// Call `cudaDeviceGetAttribute`.
///
/// # Safety
/// `value` must be writable; `device` must be a valid ordinal.
pub unsafe fn cuda_device_get_attribute(
    value: *mut c_int,
    attr: c_int,
    device: c_int,
) -> Result<cudaError_t> {
    cuda_call!(cuda_device_get_attribute, cudaDeviceGetAttribute, (value, attr, device))
}

/// Call `cudaSetDevice`.
///
/// # Safety
/// `device` must be a valid ordinal.
pub unsafe fn cuda_set_device(device: c_int) -> Result<cudaError_t> {
    cuda_call!(cuda_set_device, cudaSetDevice, (device))
}

/// Convert a non-success CUDA result into a [`ProviderError::Cuda`].
#[inline]
pub fn check_cuda(result: cudaError_t, op: &'static str) -> Result<()> {
    if result == CUDA_SUCCESS {
        Ok(())
    } else {
        Err(ProviderError::Cuda { op, code: result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_cuda_maps_codes() {
        assert!(check_cuda(CUDA_SUCCESS, "cudaMalloc").is_ok());
        let err = check_cuda(2, "cudaMalloc").unwrap_err();
        assert!(err.to_string().contains("cudaMalloc"));
        assert!(err.to_string().contains('2'));
    }
}
