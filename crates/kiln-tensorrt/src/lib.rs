#![doc = include_str!("../README.md")]

pub mod builder;
pub mod engine;
pub mod logger;
pub mod output_allocator;
pub mod refit;
pub mod runtime;
pub mod sys;

#[cfg(kiln_trt_stub)]
mod sys_stub;

/// (major, minor) of the TensorRT the shim was built against, `(0, 0)` in
/// stub mode.
pub fn builder_version() -> (i32, i32) {
    // SAFETY: no arguments, returns a plain integer.
    decode_version(unsafe { sys::trt_version() })
}

/// `NV_TENSORRT_VERSION` packs 8.6.1 as 8601 and 10.3.0 as 100300; decode
/// either encoding.
fn decode_version(version: i32) -> (i32, i32) {
    if version >= 100_000 {
        (version / 10_000, (version / 100) % 100)
    } else {
        (version / 1_000, (version / 100) % 10)
    }
}

/// TensorRT major version the shim was built against (0 in stub mode).
pub fn builder_major_version() -> i32 {
    builder_version().0
}

/// Whether weight-stripped builds (`STRIP_PLAN`/`REFIT_IDENTICAL`) and
/// parser-driven refit are available.
pub fn supports_weight_stripping() -> bool {
    builder_major_version() >= 10
}

/// Whether the engine can transport `int64` tensors natively.
pub fn supports_native_int64() -> bool {
    builder_major_version() >= 10
}

/// Whether builder optimization levels and the auxiliary-stream cap exist
/// (TensorRT 8.6 onwards).
pub fn supports_builder_tuning() -> bool {
    let (major, minor) = builder_version();
    major > 8 || (major == 8 && minor >= 6)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_both_version_encodings() {
        assert_eq!(decode_version(8601), (8, 6));
        assert_eq!(decode_version(8501), (8, 5));
        assert_eq!(decode_version(100_300), (10, 3));
        assert_eq!(decode_version(0), (0, 0));
    }

    #[test]
    #[cfg(kiln_trt_stub)]
    fn stub_build_reports_no_capabilities() {
        assert_eq!(builder_version(), (0, 0));
        assert!(!supports_weight_stripping());
        assert!(!supports_native_int64());
        assert!(!supports_builder_tuning());
    }
}
