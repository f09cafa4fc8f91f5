//! Safe wrappers over the builder-side shim handles: builder, network,
//! builder config, ONNX parser, optimization profiles, host memory, and
//! the timing cache.
//!
//! Every null return maps to a build error naming the step; the caller
//! attributes it to a fused node via [`ProviderError::for_node`].

use std::ffi::{CStr, CString};
use std::os::raw::c_int;

use kiln_core::error::{ProviderError, Result};
use kiln_core::types::{Dims, TensorElementType};

use crate::logger::TrtLogger;
use crate::sys;

pub(crate) fn build_err(step: &'static str, detail: impl Into<String>) -> ProviderError {
    ProviderError::Build {
        node: String::new(),
        step,
        detail: detail.into(),
    }
}

pub(crate) fn cstring(name: &str) -> Result<CString> {
    CString::new(name).map_err(|_| {
        ProviderError::Config(format!("tensor name '{name}' contains an interior NUL"))
    })
}

pub(crate) fn dims_to_trt(dims: &Dims) -> sys::TrtDims {
    let mut out = sys::TrtDims::zeroed();
    out.nb_dims = dims.nb_dims;
    out.d[..dims.nb_dims as usize].copy_from_slice(dims.as_slice());
    out
}

pub(crate) fn trt_to_dims(dims: &sys::TrtDims) -> Dims {
    let mut d = [0i64; kiln_core::types::MAX_DIMS];
    d[..dims.nb_dims as usize].copy_from_slice(dims.as_slice());
    Dims {
        nb_dims: dims.nb_dims,
        d,
    }
}

pub(crate) fn data_type_to_element(dtype: c_int) -> Option<TensorElementType> {
    match dtype {
        sys::DATA_TYPE_FLOAT => Some(TensorElementType::Float32),
        sys::DATA_TYPE_HALF => Some(TensorElementType::Float16),
        sys::DATA_TYPE_INT8 => Some(TensorElementType::Int8),
        sys::DATA_TYPE_INT32 => Some(TensorElementType::Int32),
        sys::DATA_TYPE_BOOL => Some(TensorElementType::Bool),
        sys::DATA_TYPE_UINT8 => Some(TensorElementType::UInt8),
        sys::DATA_TYPE_INT64 => Some(TensorElementType::Int64),
        _ => None,
    }
}

// ─── Builder ────────────────────────────────────────────────────────────

/// The provider-wide `IBuilder`.
pub struct Builder {
    handle: sys::TrtBuilderHandle,
}

// SAFETY: all builder use is serialized under the per-provider mutex.
unsafe impl Send for Builder {}

impl Builder {
    pub fn new(logger: &TrtLogger) -> Result<Self> {
        // SAFETY: logger handle is the process-wide logger (may be null in
        // stub mode, which the shim answers with null).
        let handle = unsafe { sys::trt_builder_create(logger.handle()) };
        if handle.is_null() {
            return Err(build_err(
                "createInferBuilder",
                "TensorRT builder unavailable (null handle)",
            ));
        }
        Ok(Self { handle })
    }

    pub fn create_network(&self, flags: u32) -> Result<Network> {
        // SAFETY: handle is a live builder.
        let network = unsafe { sys::trt_builder_create_network(self.handle, flags) };
        if network.is_null() {
            return Err(build_err("createNetworkV2", "builder returned null network"));
        }
        Ok(Network { handle: network })
    }

    pub fn create_config(&self) -> Result<BuilderConfig> {
        // SAFETY: handle is a live builder.
        let config = unsafe { sys::trt_builder_create_config(self.handle) };
        if config.is_null() {
            return Err(build_err("createBuilderConfig", "builder returned null config"));
        }
        Ok(BuilderConfig { handle: config })
    }

    /// Profiles are owned by the builder; the wrapper carries no drop.
    pub fn create_optimization_profile(&self) -> Result<OptimizationProfile> {
        // SAFETY: handle is a live builder.
        let profile = unsafe { sys::trt_builder_create_optimization_profile(self.handle) };
        if profile.is_null() {
            return Err(build_err(
                "createOptimizationProfile",
                "builder returned null profile",
            ));
        }
        Ok(OptimizationProfile { handle: profile })
    }

    pub fn platform_has_fast_fp16(&self) -> bool {
        // SAFETY: handle is a live builder.
        unsafe { sys::trt_builder_platform_has_fast_fp16(self.handle) != 0 }
    }

    pub fn platform_has_fast_int8(&self) -> bool {
        // SAFETY: handle is a live builder.
        unsafe { sys::trt_builder_platform_has_fast_int8(self.handle) != 0 }
    }

    pub fn nb_dla_cores(&self) -> i32 {
        // SAFETY: handle is a live builder.
        unsafe { sys::trt_builder_get_nb_dla_cores(self.handle) }
    }

    pub fn build_serialized_network(
        &self,
        network: &Network,
        config: &BuilderConfig,
    ) -> Result<HostMemory> {
        // SAFETY: all three handles are live and belong to this builder.
        let mem =
            unsafe { sys::trt_builder_build_serialized_network(self.handle, network.handle, config.handle) };
        if mem.is_null() {
            return Err(build_err(
                "buildSerializedNetwork",
                "builder returned null serialized engine",
            ));
        }
        Ok(HostMemory { handle: mem })
    }
}

impl Drop for Builder {
    fn drop(&mut self) {
        // SAFETY: handle is live and no dependent object outlives the
        // provider state that owns them.
        unsafe { sys::trt_builder_destroy(self.handle) };
    }
}

// ─── Network ────────────────────────────────────────────────────────────

/// An `INetworkDefinition` populated by the ONNX parser.
pub struct Network {
    handle: sys::TrtNetworkHandle,
}

// SAFETY: network access is serialized under the per-provider mutex.
unsafe impl Send for Network {}

impl Network {
    pub fn nb_inputs(&self) -> i32 {
        // SAFETY: handle is a live network.
        unsafe { sys::trt_network_get_nb_inputs(self.handle) }
    }

    pub fn nb_outputs(&self) -> i32 {
        // SAFETY: handle is a live network.
        unsafe { sys::trt_network_get_nb_outputs(self.handle) }
    }

    pub fn input(&self, index: i32) -> Result<NetworkTensor> {
        // SAFETY: handle is a live network; the shim bounds-checks index.
        let tensor = unsafe { sys::trt_network_get_input(self.handle, index) };
        if tensor.is_null() {
            return Err(build_err("getInput", format!("no network input at index {index}")));
        }
        Ok(NetworkTensor { handle: tensor })
    }

    pub fn output(&self, index: i32) -> Result<NetworkTensor> {
        // SAFETY: handle is a live network; the shim bounds-checks index.
        let tensor = unsafe { sys::trt_network_get_output(self.handle, index) };
        if tensor.is_null() {
            return Err(build_err("getOutput", format!("no network output at index {index}")));
        }
        Ok(NetworkTensor { handle: tensor })
    }

    pub fn nb_layers(&self) -> i32 {
        // SAFETY: handle is a live network.
        unsafe { sys::trt_network_get_nb_layers(self.handle) }
    }

    pub fn layer(&self, index: i32) -> Option<NetworkLayer> {
        // SAFETY: handle is a live network; the shim bounds-checks index.
        let layer = unsafe { sys::trt_network_get_layer(self.handle, index) };
        (!layer.is_null()).then_some(NetworkLayer { handle: layer })
    }

    pub(crate) fn handle(&self) -> sys::TrtNetworkHandle {
        self.handle
    }
}

impl Drop for Network {
    fn drop(&mut self) {
        // SAFETY: handle is live; the parser that populated it is dropped
        // separately.
        unsafe { sys::trt_network_destroy(self.handle) };
    }
}

/// Non-owning view of an `ITensor` inside a network.
#[derive(Clone, Copy)]
pub struct NetworkTensor {
    handle: sys::TrtTensorHandle,
}

impl NetworkTensor {
    pub fn name(&self) -> String {
        // SAFETY: the shim returns a network-owned NUL-terminated string.
        let ptr = unsafe { sys::trt_tensor_get_name(self.handle) };
        if ptr.is_null() {
            return String::new();
        }
        // SAFETY: ptr is valid while the network lives.
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
    }

    pub fn dimensions(&self) -> Dims {
        let mut dims = sys::TrtDims::zeroed();
        // SAFETY: dims is writable; handle is a live tensor.
        unsafe { sys::trt_tensor_get_dimensions(self.handle, &mut dims) };
        trt_to_dims(&dims)
    }

    pub fn is_shape_tensor(&self) -> bool {
        // SAFETY: handle is a live tensor.
        unsafe { sys::trt_tensor_is_shape_tensor(self.handle) != 0 }
    }

    pub fn set_dynamic_range(&self, min: f32, max: f32) -> bool {
        // SAFETY: handle is a live tensor.
        unsafe { sys::trt_tensor_set_dynamic_range(self.handle, min, max) != 0 }
    }
}

/// Non-owning view of an `ILayer` inside a network.
#[derive(Clone, Copy)]
pub struct NetworkLayer {
    handle: sys::TrtLayerHandle,
}

impl NetworkLayer {
    pub fn is_elementwise_pow(&self) -> bool {
        // SAFETY: handle is a live layer.
        unsafe {
            sys::trt_layer_get_type(self.handle) == sys::LAYER_TYPE_ELEMENTWISE
                && sys::trt_layer_get_elementwise_operation(self.handle) == sys::ELEMENTWISE_OP_POW
        }
    }

    pub fn is_reduce(&self) -> bool {
        // SAFETY: handle is a live layer.
        unsafe { sys::trt_layer_get_type(self.handle) == sys::LAYER_TYPE_REDUCE }
    }

    /// Pin the layer to FP32 precision and FP32 output type.
    pub fn pin_fp32(&self) {
        // SAFETY: handle is a live layer.
        unsafe {
            sys::trt_layer_set_precision(self.handle, sys::DATA_TYPE_FLOAT);
            sys::trt_layer_set_output_type(self.handle, 0, sys::DATA_TYPE_FLOAT);
        }
    }

    pub fn nb_outputs(&self) -> i32 {
        // SAFETY: handle is a live layer.
        unsafe { sys::trt_layer_get_nb_outputs(self.handle) }
    }

    pub fn output(&self, index: i32) -> Option<NetworkTensor> {
        // SAFETY: handle is a live layer; the shim bounds-checks index.
        let tensor = unsafe { sys::trt_layer_get_output(self.handle, index) };
        (!tensor.is_null()).then_some(NetworkTensor { handle: tensor })
    }
}

// ─── Parser ─────────────────────────────────────────────────────────────

/// `nvonnxparser::IParser` bound to one network.  Kept alive after parsing
/// only when the engine may need a parser-driven refit.
pub struct Parser {
    handle: sys::TrtParserHandle,
}

// SAFETY: parser access is serialized under the per-provider mutex.
unsafe impl Send for Parser {}

impl Parser {
    pub fn new(network: &Network, logger: &TrtLogger) -> Result<Self> {
        // SAFETY: network and logger handles are live.
        let handle = unsafe { sys::trt_parser_create(network.handle(), logger.handle()) };
        if handle.is_null() {
            return Err(build_err("createParser", "parser creation returned null"));
        }
        Ok(Self { handle })
    }

    pub fn parse(&self, onnx: &[u8], model_path: &str) -> Result<()> {
        let cpath = cstring(model_path)?;
        // SAFETY: onnx is valid for len bytes; cpath is NUL-terminated.
        let ok =
            unsafe { sys::trt_parser_parse(self.handle, onnx.as_ptr(), onnx.len(), cpath.as_ptr()) };
        if ok == 0 {
            return Err(build_err("parse", "ONNX parser rejected the subgraph"));
        }
        Ok(())
    }
}

impl Drop for Parser {
    fn drop(&mut self) {
        // SAFETY: handle is live.
        unsafe { sys::trt_parser_destroy(self.handle) };
    }
}

// ─── Builder config ─────────────────────────────────────────────────────

/// `IBuilderConfig` assembled per build.
pub struct BuilderConfig {
    handle: sys::TrtConfigHandle,
}

// SAFETY: config access is serialized under the per-provider mutex.
unsafe impl Send for BuilderConfig {}

impl BuilderConfig {
    pub fn set_workspace_limit(&self, bytes: usize) {
        // SAFETY: handle is a live config.
        unsafe {
            sys::trt_config_set_memory_pool_limit(self.handle, sys::MEMORY_POOL_WORKSPACE, bytes)
        };
    }

    pub fn set_flag(&self, flag: c_int) {
        // SAFETY: handle is a live config.
        unsafe { sys::trt_config_set_flag(self.handle, flag) };
    }

    pub fn set_builder_optimization_level(&self, level: i32) {
        // SAFETY: handle is a live config.
        unsafe { sys::trt_config_set_builder_optimization_level(self.handle, level) };
    }

    pub fn set_max_aux_streams(&self, n: i32) {
        // SAFETY: handle is a live config.
        unsafe { sys::trt_config_set_max_aux_streams(self.handle, n) };
    }

    pub fn set_dla(&self, core: i32) {
        // SAFETY: handle is a live config.
        unsafe {
            sys::trt_config_set_flag(self.handle, sys::BUILDER_FLAG_GPU_FALLBACK);
            sys::trt_config_set_default_device_type(self.handle, sys::DEVICE_TYPE_DLA);
            sys::trt_config_set_dla_core(self.handle, core);
        }
    }

    pub fn set_hardware_compat_ampere_plus(&self) {
        // SAFETY: handle is a live config.
        unsafe {
            sys::trt_config_set_hardware_compatibility_level(self.handle, sys::HW_COMPAT_AMPERE_PLUS)
        };
    }

    pub fn tactic_sources(&self) -> u32 {
        // SAFETY: handle is a live config.
        unsafe { sys::trt_config_get_tactic_sources(self.handle) }
    }

    pub fn set_tactic_sources(&self, mask: u32) {
        // SAFETY: handle is a live config.
        unsafe { sys::trt_config_set_tactic_sources(self.handle, mask) };
    }

    pub fn add_optimization_profile(&self, profile: &OptimizationProfile) -> Result<()> {
        // SAFETY: both handles are live and from the same builder.
        let rc = unsafe { sys::trt_config_add_optimization_profile(self.handle, profile.handle) };
        if rc == 0 {
            return Err(build_err(
                "addOptimizationProfile",
                "config rejected optimization profile",
            ));
        }
        Ok(())
    }

    pub fn clear_int8_calibrator(&self) {
        // SAFETY: handle is a live config.
        unsafe { sys::trt_config_clear_int8_calibrator(self.handle) };
    }

    /// Create a timing cache from serialized bytes (empty slice → fresh
    /// cache) and attach it to this config.  `force_match` tolerates a
    /// device-profile mismatch between the cache and this GPU.
    pub fn attach_timing_cache(&self, data: &[u8], force_match: bool) -> Result<TimingCache> {
        // SAFETY: data is valid for len bytes; handle is a live config.
        let cache =
            unsafe { sys::trt_config_create_timing_cache(self.handle, data.as_ptr(), data.len()) };
        if cache.is_null() {
            return Err(build_err("createTimingCache", "timing cache creation returned null"));
        }
        // SAFETY: cache was just created from this config.
        let rc = unsafe {
            sys::trt_config_set_timing_cache(self.handle, cache, i32::from(force_match))
        };
        if rc == 0 {
            // SAFETY: cache is live and not attached.
            unsafe { sys::trt_timing_cache_destroy(cache) };
            return Err(build_err("setTimingCache", "config rejected timing cache"));
        }
        Ok(TimingCache { handle: cache })
    }

    /// Serialize the timing cache currently attached to this config.
    pub fn serialize_timing_cache(&self) -> Result<Vec<u8>> {
        // SAFETY: handle is a live config.
        let cache = unsafe { sys::trt_config_get_timing_cache(self.handle) };
        if cache.is_null() {
            return Err(build_err("getTimingCache", "no timing cache attached"));
        }
        // SAFETY: cache is live while attached to the config.
        let mem = unsafe { sys::trt_timing_cache_serialize(cache) };
        if mem.is_null() {
            return Err(build_err("serializeTimingCache", "timing cache serialize returned null"));
        }
        Ok(HostMemory { handle: mem }.to_vec())
    }
}

impl Drop for BuilderConfig {
    fn drop(&mut self) {
        // SAFETY: handle is live.
        unsafe { sys::trt_config_destroy(self.handle) };
    }
}

/// A timing cache owned by the provider while attached to a config.
pub struct TimingCache {
    handle: sys::TrtTimingCacheHandle,
}

// SAFETY: timing cache use is serialized under the per-provider mutex.
unsafe impl Send for TimingCache {}

impl Drop for TimingCache {
    fn drop(&mut self) {
        // SAFETY: the config it was attached to has been dropped or no
        // longer references it once the build completed.
        unsafe { sys::trt_timing_cache_destroy(self.handle) };
    }
}

// ─── Optimization profile ───────────────────────────────────────────────

/// Builder-owned `IOptimizationProfile`; no drop.
#[derive(Clone, Copy)]
pub struct OptimizationProfile {
    handle: sys::TrtProfileHandle,
}

// SAFETY: profile use is serialized under the per-provider mutex.
unsafe impl Send for OptimizationProfile {}

impl OptimizationProfile {
    /// Set min/opt/max *values* for a shape tensor.
    pub fn set_shape_values(&self, name: &str, selector: c_int, values: &[i32]) -> Result<()> {
        let cname = cstring(name)?;
        // SAFETY: values is valid for count entries; cname is NUL-terminated.
        let rc = unsafe {
            sys::trt_profile_set_shape_values(
                self.handle,
                cname.as_ptr(),
                selector,
                values.as_ptr(),
                values.len() as c_int,
            )
        };
        if rc == 0 {
            return Err(build_err(
                "setShapeValues",
                format!("profile rejected shape values for '{name}'"),
            ));
        }
        Ok(())
    }

    /// Set min/opt/max *dimensions* for an execution tensor.
    pub fn set_dimensions(&self, name: &str, selector: c_int, dims: &Dims) -> Result<()> {
        let cname = cstring(name)?;
        let trt_dims = dims_to_trt(dims);
        // SAFETY: cname is NUL-terminated; trt_dims lives across the call.
        let rc = unsafe {
            sys::trt_profile_set_dimensions(self.handle, cname.as_ptr(), selector, &trt_dims)
        };
        if rc == 0 {
            return Err(build_err(
                "setDimensions",
                format!("profile rejected dimensions for '{name}'"),
            ));
        }
        Ok(())
    }
}

// ─── Host memory ────────────────────────────────────────────────────────

/// `IHostMemory` — serialized engine or timing cache bytes.
pub struct HostMemory {
    handle: sys::TrtHostMemoryHandle,
}

// SAFETY: host memory is immutable after creation.
unsafe impl Send for HostMemory {}

impl HostMemory {
    pub(crate) fn from_handle(handle: sys::TrtHostMemoryHandle) -> Self {
        Self { handle }
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the shim guarantees data/size describe a live buffer for
        // the lifetime of the handle.
        unsafe {
            let data = sys::trt_host_memory_data(self.handle);
            let size = sys::trt_host_memory_size(self.handle);
            if data.is_null() || size == 0 {
                &[]
            } else {
                std::slice::from_raw_parts(data, size)
            }
        }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }
}

impl Drop for HostMemory {
    fn drop(&mut self) {
        // SAFETY: handle is live and dropped exactly once.
        unsafe { sys::trt_host_memory_destroy(self.handle) };
    }
}
