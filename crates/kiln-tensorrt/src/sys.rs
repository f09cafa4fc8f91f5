//! Raw FFI surface of the `kiln_trt_shim` bridge library.
//!
//! TensorRT has no C API, so a thin C++ bridge exposes the subset the
//! provider needs as `trt_*` C functions over opaque handles.  Enum values
//! here are shim-level constants; the bridge translates them to the
//! `nvinfer1` equivalents of the TensorRT it was built against.
//!
//! # Safety
//!
//! All functions are `unsafe extern "C"`.  The safe wrappers in `builder`,
//! `engine`, `runtime`, and `refit` enforce handle validity and drop order.

#![allow(non_camel_case_types, dead_code)]

use std::ffi::c_void;
use std::os::raw::{c_char, c_int};

// ═══════════════════════════════════════════════════════════════════════
//  HANDLES & COMMON TYPES
// ═══════════════════════════════════════════════════════════════════════

pub type TrtLoggerHandle = *mut c_void;
pub type TrtBuilderHandle = *mut c_void;
pub type TrtNetworkHandle = *mut c_void;
pub type TrtConfigHandle = *mut c_void;
pub type TrtParserHandle = *mut c_void;
pub type TrtProfileHandle = *mut c_void;
pub type TrtTensorHandle = *mut c_void;
pub type TrtLayerHandle = *mut c_void;
pub type TrtHostMemoryHandle = *mut c_void;
pub type TrtTimingCacheHandle = *mut c_void;
pub type TrtRuntimeHandle = *mut c_void;
pub type TrtEngineHandle = *mut c_void;
pub type TrtContextHandle = *mut c_void;
pub type TrtRefitterHandle = *mut c_void;
pub type TrtParserRefitterHandle = *mut c_void;

/// Mirror of `nvinfer1::Dims` with 64-bit extents.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrtDims {
    pub nb_dims: i32,
    pub d: [i64; 8],
}

impl TrtDims {
    pub const fn zeroed() -> Self {
        Self {
            nb_dims: 0,
            d: [0; 8],
        }
    }

    pub fn as_slice(&self) -> &[i64] {
        &self.d[..self.nb_dims as usize]
    }
}

// ─── Logger severity (matches nvinfer1::ILogger::Severity) ─────────────

pub const SEVERITY_INTERNAL_ERROR: c_int = 0;
pub const SEVERITY_ERROR: c_int = 1;
pub const SEVERITY_WARNING: c_int = 2;
pub const SEVERITY_INFO: c_int = 3;
pub const SEVERITY_VERBOSE: c_int = 4;

/// Log sink installed into the shim's `ILogger` implementation.
pub type TrtLogCallback =
    unsafe extern "C" fn(severity: c_int, msg: *const c_char, user: *mut c_void);

// ─── Shim-level enum constants ─────────────────────────────────────────

/// `NetworkDefinitionCreationFlag` bits.
pub const NETWORK_FLAG_EXPLICIT_BATCH: u32 = 1 << 0;
pub const NETWORK_FLAG_STRONGLY_TYPED: u32 = 1 << 1;

/// `BuilderFlag` ids.
pub const BUILDER_FLAG_FP16: c_int = 0;
pub const BUILDER_FLAG_INT8: c_int = 1;
pub const BUILDER_FLAG_GPU_FALLBACK: c_int = 2;
pub const BUILDER_FLAG_SPARSE_WEIGHTS: c_int = 3;
pub const BUILDER_FLAG_STRIP_PLAN: c_int = 4;
pub const BUILDER_FLAG_REFIT_IDENTICAL: c_int = 5;

/// `MemoryPoolType` ids.
pub const MEMORY_POOL_WORKSPACE: c_int = 0;

/// `DeviceType` ids.
pub const DEVICE_TYPE_GPU: c_int = 0;
pub const DEVICE_TYPE_DLA: c_int = 1;

/// `HardwareCompatibilityLevel` ids.
pub const HW_COMPAT_NONE: c_int = 0;
pub const HW_COMPAT_AMPERE_PLUS: c_int = 1;

/// `OptProfileSelector` ids (matches nvinfer1: kMIN=0, kOPT=1, kMAX=2).
pub const PROFILE_SELECTOR_MIN: c_int = 0;
pub const PROFILE_SELECTOR_OPT: c_int = 1;
pub const PROFILE_SELECTOR_MAX: c_int = 2;

/// `TensorIOMode` ids.
pub const IO_MODE_NONE: c_int = 0;
pub const IO_MODE_INPUT: c_int = 1;
pub const IO_MODE_OUTPUT: c_int = 2;

/// `DataType` ids.
pub const DATA_TYPE_FLOAT: c_int = 0;
pub const DATA_TYPE_HALF: c_int = 1;
pub const DATA_TYPE_INT8: c_int = 2;
pub const DATA_TYPE_INT32: c_int = 3;
pub const DATA_TYPE_BOOL: c_int = 4;
pub const DATA_TYPE_UINT8: c_int = 5;
pub const DATA_TYPE_INT64: c_int = 6;

/// `LayerType` ids the provider inspects; everything else is OTHER.
pub const LAYER_TYPE_OTHER: c_int = 0;
pub const LAYER_TYPE_ELEMENTWISE: c_int = 1;
pub const LAYER_TYPE_REDUCE: c_int = 2;

/// `ElementWiseOperation` ids the provider inspects.
pub const ELEMENTWISE_OP_OTHER: c_int = 0;
pub const ELEMENTWISE_OP_POW: c_int = 1;

/// `TacticSource` bit positions.
pub const TACTIC_SOURCE_CUBLAS: u32 = 1 << 0;
pub const TACTIC_SOURCE_CUBLAS_LT: u32 = 1 << 1;
pub const TACTIC_SOURCE_CUDNN: u32 = 1 << 2;
pub const TACTIC_SOURCE_EDGE_MASK_CONVOLUTIONS: u32 = 1 << 3;
pub const TACTIC_SOURCE_JIT_CONVOLUTIONS: u32 = 1 << 4;

/// DDS output-allocator callbacks installed on an execution context.
pub type TrtReallocateOutputFn = unsafe extern "C" fn(
    user: *mut c_void,
    tensor_name: *const c_char,
    size: usize,
    alignment: usize,
    stream: *mut c_void,
) -> *mut c_void;

pub type TrtNotifyShapeFn =
    unsafe extern "C" fn(user: *mut c_void, tensor_name: *const c_char, dims: *const TrtDims);

// ═══════════════════════════════════════════════════════════════════════
//  SHIM FUNCTIONS
// ═══════════════════════════════════════════════════════════════════════

unsafe extern "C" {
    // ─── Version ───────────────────────────────────────────────────────
    /// `NV_TENSORRT_VERSION` the shim was compiled against (0 in stub mode).
    pub fn trt_version() -> c_int;

    // ─── Logger ────────────────────────────────────────────────────────
    pub fn trt_logger_create(cb: Option<TrtLogCallback>, user: *mut c_void) -> TrtLoggerHandle;
    pub fn trt_logger_set_severity(logger: TrtLoggerHandle, severity: c_int);

    // ─── Builder ───────────────────────────────────────────────────────
    pub fn trt_builder_create(logger: TrtLoggerHandle) -> TrtBuilderHandle;
    pub fn trt_builder_destroy(builder: TrtBuilderHandle);
    pub fn trt_builder_create_network(builder: TrtBuilderHandle, flags: u32) -> TrtNetworkHandle;
    pub fn trt_builder_create_config(builder: TrtBuilderHandle) -> TrtConfigHandle;
    pub fn trt_builder_create_optimization_profile(builder: TrtBuilderHandle) -> TrtProfileHandle;
    pub fn trt_builder_platform_has_fast_fp16(builder: TrtBuilderHandle) -> c_int;
    pub fn trt_builder_platform_has_fast_int8(builder: TrtBuilderHandle) -> c_int;
    pub fn trt_builder_get_nb_dla_cores(builder: TrtBuilderHandle) -> c_int;
    pub fn trt_builder_build_serialized_network(
        builder: TrtBuilderHandle,
        network: TrtNetworkHandle,
        config: TrtConfigHandle,
    ) -> TrtHostMemoryHandle;

    // ─── Network ───────────────────────────────────────────────────────
    pub fn trt_network_destroy(network: TrtNetworkHandle);
    pub fn trt_network_get_nb_inputs(network: TrtNetworkHandle) -> c_int;
    pub fn trt_network_get_nb_outputs(network: TrtNetworkHandle) -> c_int;
    pub fn trt_network_get_input(network: TrtNetworkHandle, index: c_int) -> TrtTensorHandle;
    pub fn trt_network_get_output(network: TrtNetworkHandle, index: c_int) -> TrtTensorHandle;
    pub fn trt_network_get_nb_layers(network: TrtNetworkHandle) -> c_int;
    pub fn trt_network_get_layer(network: TrtNetworkHandle, index: c_int) -> TrtLayerHandle;

    // ─── ITensor ───────────────────────────────────────────────────────
    pub fn trt_tensor_get_name(tensor: TrtTensorHandle) -> *const c_char;
    pub fn trt_tensor_get_dimensions(tensor: TrtTensorHandle, dims: *mut TrtDims);
    pub fn trt_tensor_is_shape_tensor(tensor: TrtTensorHandle) -> c_int;
    pub fn trt_tensor_set_dynamic_range(tensor: TrtTensorHandle, min: f32, max: f32) -> c_int;

    // ─── ILayer ────────────────────────────────────────────────────────
    pub fn trt_layer_get_type(layer: TrtLayerHandle) -> c_int;
    pub fn trt_layer_get_elementwise_operation(layer: TrtLayerHandle) -> c_int;
    pub fn trt_layer_set_precision(layer: TrtLayerHandle, dtype: c_int);
    pub fn trt_layer_set_output_type(layer: TrtLayerHandle, index: c_int, dtype: c_int);
    pub fn trt_layer_get_nb_outputs(layer: TrtLayerHandle) -> c_int;
    pub fn trt_layer_get_output(layer: TrtLayerHandle, index: c_int) -> TrtTensorHandle;

    // ─── ONNX parser ───────────────────────────────────────────────────
    pub fn trt_parser_create(network: TrtNetworkHandle, logger: TrtLoggerHandle)
    -> TrtParserHandle;
    pub fn trt_parser_destroy(parser: TrtParserHandle);
    pub fn trt_parser_parse(
        parser: TrtParserHandle,
        data: *const u8,
        len: usize,
        model_path: *const c_char,
    ) -> c_int;

    // ─── Builder config ────────────────────────────────────────────────
    pub fn trt_config_destroy(config: TrtConfigHandle);
    pub fn trt_config_set_memory_pool_limit(config: TrtConfigHandle, pool: c_int, bytes: usize);
    pub fn trt_config_set_flag(config: TrtConfigHandle, flag: c_int);
    pub fn trt_config_set_builder_optimization_level(config: TrtConfigHandle, level: c_int);
    pub fn trt_config_set_max_aux_streams(config: TrtConfigHandle, n: c_int);
    pub fn trt_config_set_default_device_type(config: TrtConfigHandle, device: c_int);
    pub fn trt_config_set_dla_core(config: TrtConfigHandle, core: c_int);
    pub fn trt_config_set_hardware_compatibility_level(config: TrtConfigHandle, level: c_int);
    pub fn trt_config_get_tactic_sources(config: TrtConfigHandle) -> u32;
    pub fn trt_config_set_tactic_sources(config: TrtConfigHandle, mask: u32);
    pub fn trt_config_add_optimization_profile(
        config: TrtConfigHandle,
        profile: TrtProfileHandle,
    ) -> c_int;
    pub fn trt_config_clear_int8_calibrator(config: TrtConfigHandle);
    pub fn trt_config_create_timing_cache(
        config: TrtConfigHandle,
        data: *const u8,
        len: usize,
    ) -> TrtTimingCacheHandle;
    pub fn trt_config_set_timing_cache(
        config: TrtConfigHandle,
        cache: TrtTimingCacheHandle,
        ignore_mismatch: c_int,
    ) -> c_int;
    pub fn trt_config_get_timing_cache(config: TrtConfigHandle) -> TrtTimingCacheHandle;

    // ─── Timing cache ──────────────────────────────────────────────────
    pub fn trt_timing_cache_serialize(cache: TrtTimingCacheHandle) -> TrtHostMemoryHandle;
    pub fn trt_timing_cache_destroy(cache: TrtTimingCacheHandle);

    // ─── Optimization profile ──────────────────────────────────────────
    pub fn trt_profile_set_shape_values(
        profile: TrtProfileHandle,
        name: *const c_char,
        selector: c_int,
        values: *const i32,
        count: c_int,
    ) -> c_int;
    pub fn trt_profile_set_dimensions(
        profile: TrtProfileHandle,
        name: *const c_char,
        selector: c_int,
        dims: *const TrtDims,
    ) -> c_int;

    // ─── Host memory ───────────────────────────────────────────────────
    pub fn trt_host_memory_data(mem: TrtHostMemoryHandle) -> *const u8;
    pub fn trt_host_memory_size(mem: TrtHostMemoryHandle) -> usize;
    pub fn trt_host_memory_destroy(mem: TrtHostMemoryHandle);

    // ─── Runtime / engine deserialization ──────────────────────────────
    pub fn trt_runtime_create(logger: TrtLoggerHandle) -> TrtRuntimeHandle;
    pub fn trt_runtime_destroy(runtime: TrtRuntimeHandle);
    pub fn trt_runtime_deserialize_engine(
        runtime: TrtRuntimeHandle,
        data: *const u8,
        len: usize,
    ) -> TrtEngineHandle;

    // ─── Engine ────────────────────────────────────────────────────────
    pub fn trt_engine_destroy(engine: TrtEngineHandle);
    pub fn trt_engine_get_nb_io_tensors(engine: TrtEngineHandle) -> c_int;
    pub fn trt_engine_get_io_tensor_name(engine: TrtEngineHandle, index: c_int) -> *const c_char;
    pub fn trt_engine_get_tensor_io_mode(engine: TrtEngineHandle, name: *const c_char) -> c_int;
    pub fn trt_engine_get_tensor_shape(
        engine: TrtEngineHandle,
        name: *const c_char,
        dims: *mut TrtDims,
    );
    pub fn trt_engine_get_tensor_data_type(engine: TrtEngineHandle, name: *const c_char) -> c_int;
    pub fn trt_engine_is_shape_inference_io(engine: TrtEngineHandle, name: *const c_char)
    -> c_int;
    pub fn trt_engine_get_device_memory_size(engine: TrtEngineHandle) -> usize;
    pub fn trt_engine_create_execution_context(engine: TrtEngineHandle) -> TrtContextHandle;
    pub fn trt_engine_create_execution_context_without_device_memory(
        engine: TrtEngineHandle,
    ) -> TrtContextHandle;
    pub fn trt_engine_serialize(engine: TrtEngineHandle) -> TrtHostMemoryHandle;

    // ─── Execution context ─────────────────────────────────────────────
    pub fn trt_context_destroy(context: TrtContextHandle);
    pub fn trt_context_set_input_shape(
        context: TrtContextHandle,
        name: *const c_char,
        dims: *const TrtDims,
    ) -> c_int;
    pub fn trt_context_set_tensor_address(
        context: TrtContextHandle,
        name: *const c_char,
        address: *mut c_void,
    ) -> c_int;
    pub fn trt_context_get_tensor_shape(
        context: TrtContextHandle,
        name: *const c_char,
        dims: *mut TrtDims,
    );
    pub fn trt_context_set_device_memory(context: TrtContextHandle, memory: *mut c_void);
    pub fn trt_context_set_output_allocator(
        context: TrtContextHandle,
        name: *const c_char,
        user: *mut c_void,
        reallocate: Option<TrtReallocateOutputFn>,
        notify_shape: Option<TrtNotifyShapeFn>,
    ) -> c_int;
    pub fn trt_context_enqueue_v3(context: TrtContextHandle, stream: *mut c_void) -> c_int;

    // ─── Refitter ──────────────────────────────────────────────────────
    pub fn trt_refitter_create(
        engine: TrtEngineHandle,
        logger: TrtLoggerHandle,
    ) -> TrtRefitterHandle;
    pub fn trt_refitter_destroy(refitter: TrtRefitterHandle);
    pub fn trt_refitter_refit_cuda_engine(refitter: TrtRefitterHandle) -> c_int;
    pub fn trt_parser_refitter_create(
        refitter: TrtRefitterHandle,
        logger: TrtLoggerHandle,
    ) -> TrtParserRefitterHandle;
    pub fn trt_parser_refitter_destroy(parser_refitter: TrtParserRefitterHandle);
    pub fn trt_parser_refitter_refit_from_file(
        parser_refitter: TrtParserRefitterHandle,
        path: *const c_char,
    ) -> c_int;
}
