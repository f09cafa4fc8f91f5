//! Process-wide TensorRT logger bridged into `tracing`.
//!
//! TensorRT wants exactly one `ILogger` for the lifetime of the process.
//! The handle is created on first use and kept in a `OnceLock`; later
//! callers may raise or lower the severity floor (the `detailed_build_log`
//! option flips it to verbose).

use std::ffi::{CStr, c_void};
use std::os::raw::{c_char, c_int};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicI32, Ordering};

use tracing::{debug, error, info, trace, warn};

use crate::sys;

/// The shim-side logger handle.  Null in stub mode; the wrappers surface
/// that as a build error at the first construction that needs it.
pub struct TrtLogger {
    handle: sys::TrtLoggerHandle,
}

// SAFETY: the shim's ILogger is internally synchronized; the handle itself
// is an opaque pointer.
unsafe impl Send for TrtLogger {}
unsafe impl Sync for TrtLogger {}

impl TrtLogger {
    #[inline]
    pub fn handle(&self) -> sys::TrtLoggerHandle {
        self.handle
    }
}

static TRT_LOGGER: OnceLock<TrtLogger> = OnceLock::new();
static SEVERITY_FLOOR: AtomicI32 = AtomicI32::new(sys::SEVERITY_WARNING);

unsafe extern "C" fn log_trampoline(severity: c_int, msg: *const c_char, _user: *mut c_void) {
    if msg.is_null() {
        return;
    }
    // SAFETY: the shim passes a NUL-terminated message valid for this call.
    let text = unsafe { CStr::from_ptr(msg) }.to_string_lossy();
    match severity {
        sys::SEVERITY_INTERNAL_ERROR | sys::SEVERITY_ERROR => {
            error!(target: "tensorrt", "{text}");
        }
        sys::SEVERITY_WARNING => warn!(target: "tensorrt", "{text}"),
        sys::SEVERITY_INFO => info!(target: "tensorrt", "{text}"),
        _ => trace!(target: "tensorrt", "{text}"),
    }
}

/// Fetch the process-wide logger, adjusting the severity floor when the
/// requested verbosity differs from the current one.
pub fn global_logger(verbose: bool) -> &'static TrtLogger {
    let logger = TRT_LOGGER.get_or_init(|| {
        let handle =
            // SAFETY: trampoline is 'static and ignores its user pointer.
            unsafe { sys::trt_logger_create(Some(log_trampoline), std::ptr::null_mut()) };
        debug!(stub = handle.is_null(), "TensorRT logger initialized");
        TrtLogger { handle }
    });

    let desired = if verbose {
        sys::SEVERITY_VERBOSE
    } else {
        sys::SEVERITY_WARNING
    };
    if SEVERITY_FLOOR.swap(desired, Ordering::Relaxed) != desired && !logger.handle.is_null() {
        // SAFETY: handle is the live logger created above.
        unsafe { sys::trt_logger_set_severity(logger.handle, desired) };
    }
    logger
}
