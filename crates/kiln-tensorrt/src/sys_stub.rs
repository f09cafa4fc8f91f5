//! Stub implementations of the `trt_*` shim surface.
//!
//! Compiled in when `build.rs` finds no TensorRT installation
//! (`kiln_trt_stub` cfg).  Every constructor returns null and every status
//! returns failure, so the safe wrappers surface a build error instead of
//! dereferencing a missing library.  This keeps the workspace buildable and
//! the pure-logic tests runnable on machines without the SDK.

#![allow(unused_variables, missing_docs)]

use std::ffi::c_void;
use std::os::raw::{c_char, c_int};
use std::ptr;

use crate::sys::{
    TrtDims, TrtLogCallback, TrtNotifyShapeFn, TrtReallocateOutputFn,
};

#[unsafe(no_mangle)]
pub extern "C" fn trt_version() -> c_int {
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_logger_create(cb: Option<TrtLogCallback>, user: *mut c_void) -> *mut c_void {
    ptr::null_mut()
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_logger_set_severity(logger: *mut c_void, severity: c_int) {}

#[unsafe(no_mangle)]
pub extern "C" fn trt_builder_create(logger: *mut c_void) -> *mut c_void {
    ptr::null_mut()
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_builder_destroy(builder: *mut c_void) {}

#[unsafe(no_mangle)]
pub extern "C" fn trt_builder_create_network(builder: *mut c_void, flags: u32) -> *mut c_void {
    ptr::null_mut()
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_builder_create_config(builder: *mut c_void) -> *mut c_void {
    ptr::null_mut()
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_builder_create_optimization_profile(builder: *mut c_void) -> *mut c_void {
    ptr::null_mut()
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_builder_platform_has_fast_fp16(builder: *mut c_void) -> c_int {
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_builder_platform_has_fast_int8(builder: *mut c_void) -> c_int {
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_builder_get_nb_dla_cores(builder: *mut c_void) -> c_int {
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_builder_build_serialized_network(
    builder: *mut c_void,
    network: *mut c_void,
    config: *mut c_void,
) -> *mut c_void {
    ptr::null_mut()
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_network_destroy(network: *mut c_void) {}

#[unsafe(no_mangle)]
pub extern "C" fn trt_network_get_nb_inputs(network: *mut c_void) -> c_int {
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_network_get_nb_outputs(network: *mut c_void) -> c_int {
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_network_get_input(network: *mut c_void, index: c_int) -> *mut c_void {
    ptr::null_mut()
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_network_get_output(network: *mut c_void, index: c_int) -> *mut c_void {
    ptr::null_mut()
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_network_get_nb_layers(network: *mut c_void) -> c_int {
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_network_get_layer(network: *mut c_void, index: c_int) -> *mut c_void {
    ptr::null_mut()
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_tensor_get_name(tensor: *mut c_void) -> *const c_char {
    ptr::null()
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_tensor_get_dimensions(tensor: *mut c_void, dims: *mut TrtDims) {}

#[unsafe(no_mangle)]
pub extern "C" fn trt_tensor_is_shape_tensor(tensor: *mut c_void) -> c_int {
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_tensor_set_dynamic_range(tensor: *mut c_void, min: f32, max: f32) -> c_int {
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_layer_get_type(layer: *mut c_void) -> c_int {
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_layer_get_elementwise_operation(layer: *mut c_void) -> c_int {
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_layer_set_precision(layer: *mut c_void, dtype: c_int) {}

#[unsafe(no_mangle)]
pub extern "C" fn trt_layer_set_output_type(layer: *mut c_void, index: c_int, dtype: c_int) {}

#[unsafe(no_mangle)]
pub extern "C" fn trt_layer_get_nb_outputs(layer: *mut c_void) -> c_int {
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_layer_get_output(layer: *mut c_void, index: c_int) -> *mut c_void {
    ptr::null_mut()
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_parser_create(network: *mut c_void, logger: *mut c_void) -> *mut c_void {
    ptr::null_mut()
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_parser_destroy(parser: *mut c_void) {}

#[unsafe(no_mangle)]
pub extern "C" fn trt_parser_parse(
    parser: *mut c_void,
    data: *const u8,
    len: usize,
    model_path: *const c_char,
) -> c_int {
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_config_destroy(config: *mut c_void) {}

#[unsafe(no_mangle)]
pub extern "C" fn trt_config_set_memory_pool_limit(config: *mut c_void, pool: c_int, bytes: usize) {
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_config_set_flag(config: *mut c_void, flag: c_int) {}

#[unsafe(no_mangle)]
pub extern "C" fn trt_config_set_builder_optimization_level(config: *mut c_void, level: c_int) {}

#[unsafe(no_mangle)]
pub extern "C" fn trt_config_set_max_aux_streams(config: *mut c_void, n: c_int) {}

#[unsafe(no_mangle)]
pub extern "C" fn trt_config_set_default_device_type(config: *mut c_void, device: c_int) {}

#[unsafe(no_mangle)]
pub extern "C" fn trt_config_set_dla_core(config: *mut c_void, core: c_int) {}

#[unsafe(no_mangle)]
pub extern "C" fn trt_config_set_hardware_compatibility_level(config: *mut c_void, level: c_int) {}

#[unsafe(no_mangle)]
pub extern "C" fn trt_config_get_tactic_sources(config: *mut c_void) -> u32 {
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_config_set_tactic_sources(config: *mut c_void, mask: u32) {}

#[unsafe(no_mangle)]
pub extern "C" fn trt_config_add_optimization_profile(
    config: *mut c_void,
    profile: *mut c_void,
) -> c_int {
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_config_clear_int8_calibrator(config: *mut c_void) {}

#[unsafe(no_mangle)]
pub extern "C" fn trt_config_create_timing_cache(
    config: *mut c_void,
    data: *const u8,
    len: usize,
) -> *mut c_void {
    ptr::null_mut()
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_config_set_timing_cache(
    config: *mut c_void,
    cache: *mut c_void,
    ignore_mismatch: c_int,
) -> c_int {
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_config_get_timing_cache(config: *mut c_void) -> *mut c_void {
    ptr::null_mut()
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_timing_cache_serialize(cache: *mut c_void) -> *mut c_void {
    ptr::null_mut()
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_timing_cache_destroy(cache: *mut c_void) {}

#[unsafe(no_mangle)]
pub extern "C" fn trt_profile_set_shape_values(
    profile: *mut c_void,
    name: *const c_char,
    selector: c_int,
    values: *const i32,
    count: c_int,
) -> c_int {
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_profile_set_dimensions(
    profile: *mut c_void,
    name: *const c_char,
    selector: c_int,
    dims: *const TrtDims,
) -> c_int {
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_host_memory_data(mem: *mut c_void) -> *const u8 {
    ptr::null()
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_host_memory_size(mem: *mut c_void) -> usize {
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_host_memory_destroy(mem: *mut c_void) {}

#[unsafe(no_mangle)]
pub extern "C" fn trt_runtime_create(logger: *mut c_void) -> *mut c_void {
    ptr::null_mut()
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_runtime_destroy(runtime: *mut c_void) {}

#[unsafe(no_mangle)]
pub extern "C" fn trt_runtime_deserialize_engine(
    runtime: *mut c_void,
    data: *const u8,
    len: usize,
) -> *mut c_void {
    ptr::null_mut()
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_engine_destroy(engine: *mut c_void) {}

#[unsafe(no_mangle)]
pub extern "C" fn trt_engine_get_nb_io_tensors(engine: *mut c_void) -> c_int {
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_engine_get_io_tensor_name(engine: *mut c_void, index: c_int) -> *const c_char {
    ptr::null()
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_engine_get_tensor_io_mode(engine: *mut c_void, name: *const c_char) -> c_int {
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_engine_get_tensor_shape(
    engine: *mut c_void,
    name: *const c_char,
    dims: *mut TrtDims,
) {
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_engine_get_tensor_data_type(
    engine: *mut c_void,
    name: *const c_char,
) -> c_int {
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_engine_is_shape_inference_io(
    engine: *mut c_void,
    name: *const c_char,
) -> c_int {
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_engine_get_device_memory_size(engine: *mut c_void) -> usize {
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_engine_create_execution_context(engine: *mut c_void) -> *mut c_void {
    ptr::null_mut()
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_engine_create_execution_context_without_device_memory(
    engine: *mut c_void,
) -> *mut c_void {
    ptr::null_mut()
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_engine_serialize(engine: *mut c_void) -> *mut c_void {
    ptr::null_mut()
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_context_destroy(context: *mut c_void) {}

#[unsafe(no_mangle)]
pub extern "C" fn trt_context_set_input_shape(
    context: *mut c_void,
    name: *const c_char,
    dims: *const TrtDims,
) -> c_int {
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_context_set_tensor_address(
    context: *mut c_void,
    name: *const c_char,
    address: *mut c_void,
) -> c_int {
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_context_get_tensor_shape(
    context: *mut c_void,
    name: *const c_char,
    dims: *mut TrtDims,
) {
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_context_set_device_memory(context: *mut c_void, memory: *mut c_void) {}

#[unsafe(no_mangle)]
pub extern "C" fn trt_context_set_output_allocator(
    context: *mut c_void,
    name: *const c_char,
    user: *mut c_void,
    reallocate: Option<TrtReallocateOutputFn>,
    notify_shape: Option<TrtNotifyShapeFn>,
) -> c_int {
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_context_enqueue_v3(context: *mut c_void, stream: *mut c_void) -> c_int {
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_refitter_create(engine: *mut c_void, logger: *mut c_void) -> *mut c_void {
    ptr::null_mut()
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_refitter_destroy(refitter: *mut c_void) {}

#[unsafe(no_mangle)]
pub extern "C" fn trt_refitter_refit_cuda_engine(refitter: *mut c_void) -> c_int {
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_parser_refitter_create(
    refitter: *mut c_void,
    logger: *mut c_void,
) -> *mut c_void {
    ptr::null_mut()
}

#[unsafe(no_mangle)]
pub extern "C" fn trt_parser_refitter_destroy(parser_refitter: *mut c_void) {}

#[unsafe(no_mangle)]
pub extern "C" fn trt_parser_refitter_refit_from_file(
    parser_refitter: *mut c_void,
    path: *const c_char,
) -> c_int {
    0
}
