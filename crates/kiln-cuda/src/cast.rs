//! Transport casts for element types the engine cannot carry natively.
//!
//! Engines transport `int64` as `int32` (builder major < 10) and `float64`
//! as `float32`.  These helpers convert between the host-visible type and
//! the transport type, staged through host memory with stream-ordered
//! copies.  Signatures take `(stream, src, dst, count)` so a device-side
//! kernel can replace the staging body without touching call sites.

use std::ffi::c_void;

use kiln_core::error::Result;
use kiln_core::ffi_types::CudaStreamHandle;

use crate::memory::{copy_dtoh_sync, copy_htod_async};

macro_rules! staged_cast {
    ($name:ident, $src_ty:ty, $dst_ty:ty, $doc:literal) => {
        #[doc = $doc]
        // Raw pointers are opaque device handles validated by the CUDA runtime.
        #[allow(clippy::not_unsafe_ptr_arg_deref)]
        pub fn $name(
            stream: CudaStreamHandle,
            src: *const c_void,
            dst: *mut c_void,
            count: usize,
        ) -> Result<()> {
            if count == 0 {
                return Ok(());
            }
            let mut staging = vec![<$src_ty>::default(); count];
            copy_dtoh_sync(
                staging.as_mut_ptr().cast(),
                src,
                count * size_of::<$src_ty>(),
                stream,
            )?;
            let converted: Vec<$dst_ty> = staging.iter().map(|&v| v as $dst_ty).collect();
            copy_htod_async(
                dst,
                converted.as_ptr().cast(),
                count * size_of::<$dst_ty>(),
                stream,
            )?;
            // The upload sources host memory we are about to drop.
            crate::stream::synchronize(stream)
        }
    };
}

staged_cast!(
    widen_i32_to_i64,
    i32,
    i64,
    "Widen an `int32` transport buffer into an `int64` destination."
);
staged_cast!(
    narrow_i64_to_i32,
    i64,
    i32,
    "Narrow an `int64` source into an `int32` transport buffer (values are truncated)."
);
staged_cast!(
    widen_f32_to_f64,
    f32,
    f64,
    "Widen a `float32` transport buffer into a `float64` destination."
);
staged_cast!(
    narrow_f64_to_f32,
    f64,
    f32,
    "Narrow a `float64` source into a `float32` transport buffer (precision is reduced)."
);
