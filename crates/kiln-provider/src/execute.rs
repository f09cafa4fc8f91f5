//! The per-inference path: profile folding and rebuild, input/output
//! binding, launch, and output finalization.
//!
//! The whole body runs under the per-provider mutex; combined with the
//! conditional stream synchronize before returning, that guarantees
//! one-context-per-stream semantics when the host calls concurrently with
//! distinct streams.

use std::collections::HashMap;
use std::ffi::c_void;
use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, info, warn};

use kiln_core::config::ProviderOptions;
use kiln_core::error::{ProviderError, Result};
use kiln_core::ffi_types::CudaStreamHandle;
use kiln_core::host::{DeviceAllocator, KernelContext, TensorView};
use kiln_core::types::{TensorElementType, element_count};
use kiln_cuda::{cast, memory, stream as cuda_stream};
use kiln_tensorrt::builder::Builder;
use kiln_tensorrt::engine::{Engine, ExecutionContext};
use kiln_tensorrt::output_allocator::DdsOutputAllocator;
use kiln_tensorrt::runtime::Runtime;
use kiln_tensorrt::supports_native_int64;
use kiln_tensorrt::sys::{PROFILE_SELECTOR_MAX, PROFILE_SELECTOR_MIN, PROFILE_SELECTOR_OPT};

use crate::compile::{self, BuildSpec, dims_from_shape};
use crate::ep_context::EngineRef;
use crate::profile::ShapeRangeStore;
use crate::state::{NodeState, ProviderInner};

// ─── Per-inference scratch ──────────────────────────────────────────────

/// Device allocations scoped to one inference: empty-tensor placeholders,
/// transport-cast staging, and shared context memory.  All freed on drop,
/// error paths included.
pub struct ScratchArena {
    allocator: Arc<dyn DeviceAllocator>,
    ptrs: Vec<*mut c_void>,
}

impl ScratchArena {
    pub fn new(allocator: Arc<dyn DeviceAllocator>) -> Self {
        Self {
            allocator,
            ptrs: Vec::new(),
        }
    }

    pub fn alloc(&mut self, bytes: usize) -> Result<*mut c_void> {
        let ptr = self.allocator.alloc(bytes)?;
        self.ptrs.push(ptr);
        Ok(ptr)
    }
}

impl Drop for ScratchArena {
    fn drop(&mut self) {
        for ptr in self.ptrs.drain(..) {
            self.allocator.free(ptr);
        }
    }
}

/// Host-side copies of shape-tensor values, read back once per inference
/// and bound by host address.
#[derive(Default)]
struct ShapeTensorValues {
    i32_values: HashMap<String, Vec<i32>>,
    i64_values: HashMap<String, Vec<i64>>,
}

/// A post-enqueue widen from the engine's transport type into the
/// host-visible output tensor.
struct PendingCast {
    kind: CastKind,
    src: *mut c_void,
    dst: *mut c_void,
    count: usize,
}

enum CastKind {
    I32ToI64,
    F32ToF64,
}

// ─── Entry point ────────────────────────────────────────────────────────

/// Run one inference for `node_name`.  The caller holds the provider
/// mutex for the entire duration.
pub(crate) fn compute_node(
    opts: &ProviderOptions,
    inner: &mut ProviderInner,
    max_ctx_mem: &AtomicUsize,
    node_name: &str,
    kctx: &mut dyn KernelContext,
) -> Result<()> {
    let ProviderInner { builder, runtime, nodes } = inner;
    let state = nodes
        .get_mut(node_name)
        .ok_or_else(|| ProviderError::exec(node_name, "fused node was never compiled"))?;

    let stream = kctx.stream();
    let mut scratch = ScratchArena::new(kctx.allocator());
    let mut shape_values = ShapeTensorValues::default();

    // ── Stage A: cache reload, shape folding, rebuild ────────────────
    let mut context_update = false;
    if opts.engine_cache_enable && state.engine.is_none() {
        context_update |= try_load_cached_engine(opts, runtime.as_ref(), state)?;
    }

    let engine_update =
        fold_observed_shapes(state, kctx, stream, &mut shape_values)?;

    if engine_update || state.engine.is_none() {
        rebuild_engine(opts, builder.as_ref(), runtime.as_ref(), state)?;
        context_update = true;
    }

    if context_update {
        let engine = match &state.engine {
            Some(engine) => Arc::clone(engine),
            None => return Err(ProviderError::exec(node_name, "no engine installed")),
        };
        state.context = None;
        state.context =
            Some(compile::create_context(&engine, opts, max_ctx_mem).map_err(|e| e.for_node(node_name))?);
    }

    let engine = match &state.engine {
        Some(engine) => Arc::clone(engine),
        None => return Err(ProviderError::exec(node_name, "no engine installed")),
    };

    // Split the node state so binding can mutate the allocator map while
    // the context stays borrowed.
    let NodeState {
        name,
        context,
        input_indexes,
        output_indexes,
        output_types,
        dds_allocators,
        cuda_graph,
        capture_gate,
        ..
    } = state;
    let context = match context.as_ref() {
        Some(context) => context,
        None => return Err(ProviderError::exec(node_name, "no execution context installed")),
    };

    let mut input_names = Vec::new();
    let mut output_names = Vec::new();
    for (tensor_name, is_input) in engine.io_tensors() {
        if is_input {
            input_names.push(tensor_name);
        } else {
            output_names.push(tensor_name);
        }
    }

    // ── Stage B: input binding ───────────────────────────────────────
    for input_name in &input_names {
        bind_input(
            name,
            &engine,
            context,
            input_name,
            input_indexes.get(input_name).copied().unwrap_or(0),
            kctx,
            &mut scratch,
            &mut shape_values,
            stream,
        )?;
    }

    // ── Stage C: output binding ──────────────────────────────────────
    let mut pending_casts = Vec::new();
    for output_name in &output_names {
        bind_output(
            name,
            context,
            output_name,
            output_indexes.get(output_name).copied().unwrap_or(0),
            output_types
                .get(output_name)
                .copied()
                .unwrap_or(TensorElementType::Float32),
            kctx,
            &mut scratch,
            dds_allocators,
            &mut pending_casts,
        )?;
    }

    // ── Stage D: shared context memory ───────────────────────────────
    if opts.context_memory_sharing_enable {
        max_ctx_mem.fetch_max(engine.device_memory_size(), Ordering::Relaxed);
        let bytes = max_ctx_mem.load(Ordering::Relaxed);
        let memory = scratch.alloc(bytes)?;
        context.set_device_memory(memory);
    }

    // ── Stage E: launch (or replay the captured graph) ───────────────
    let graph_on = opts.cuda_graph_enable;
    let capturing = graph_on && capture_gate.capture_allowed();
    if capturing {
        info!(node = %name, "capturing CUDA graph for this fused node");
        cuda_graph.set_stream(stream);
        cuda_graph.begin_capture()?;
    }
    if graph_on && capture_gate.is_captured() {
        cuda_graph.replay()?;
    } else {
        context.enqueue_v3(stream).map_err(|e| e.for_node(name))?;
    }

    // ── Stage F: output finalization ─────────────────────────────────
    for output_name in &output_names {
        if let Some(allocator) = dds_allocators.get(output_name) {
            finalize_dds_output(
                allocator,
                output_indexes.get(output_name).copied().unwrap_or(0),
                output_types
                    .get(output_name)
                    .copied()
                    .unwrap_or(TensorElementType::Float32),
                kctx,
                stream,
            )?;
        }
    }
    for cast_op in &pending_casts {
        match cast_op.kind {
            CastKind::I32ToI64 => {
                cast::widen_i32_to_i64(stream, cast_op.src, cast_op.dst, cast_op.count)?;
            }
            CastKind::F32ToF64 => {
                cast::widen_f32_to_f64(stream, cast_op.src, cast_op.dst, cast_op.count)?;
            }
        }
    }

    if capturing {
        // Work issued to a capturing stream did not execute; replay the
        // fresh graph to actually run it.
        cuda_graph.end_capture()?;
        cuda_graph.replay()?;
        capture_gate.note_captured();
    } else if graph_on && !capture_gate.is_captured() {
        capture_gate.note_regular_run();
    }

    // ── Stage G: synchronize ─────────────────────────────────────────
    // The host may call concurrently with distinct streams on a shared
    // execution context; draining the stream before releasing the mutex
    // forces one-context-per-stream ordering.  Not allowed during graph
    // capture.
    if opts.sync_stream_after_enqueue && !graph_on {
        cuda_stream::synchronize(stream)?;
    }

    Ok(())
}

// ─── Stage A helpers ────────────────────────────────────────────────────

/// Load the engine + profile cache pair at inference time (dynamic-shape
/// nodes whose engine was deferred).  One without the other means both
/// are invalid.  Returns whether an engine was installed.
fn try_load_cached_engine(
    opts: &ProviderOptions,
    runtime: Option<&Runtime>,
    state: &mut NodeState,
) -> Result<bool> {
    let Some(runtime) = runtime else {
        return Ok(false);
    };

    let mut engine_path = state.paths.engine.clone();
    if opts.weight_stripped_engine_enable && !engine_path.exists() {
        engine_path = state.paths.stripped.clone();
        state.refit_required = true;
    }
    if !state.paths.profile.exists() {
        return Ok(false);
    }

    let bytes = if !opts.engine_decryption_enable && engine_path.exists() {
        fs::read(&engine_path)?
    } else if opts.engine_decryption_enable && state.paths.encrypted.exists() {
        let crypto = opts.crypto.as_ref().ok_or_else(|| {
            ProviderError::Config(
                "engine_decryption_enable is set but no decryption callback was installed".into(),
            )
        })?;
        (crypto.decrypt)(&state.paths.encrypted)?
    } else {
        return Ok(false);
    };

    let ranges = match ShapeRangeStore::load(&state.paths.profile) {
        Ok(ranges) => ranges,
        Err(err) => {
            warn!(node = %state.name, error = %err, "profile cache is corrupt, rebuilding");
            return Ok(false);
        }
    };
    match runtime.deserialize_engine(&bytes) {
        Ok(engine) => {
            info!(node = %state.name, cache = %engine_path.display(), "deserialized engine cache");
            state.shape_ranges = ranges;
            state.engine = Some(engine);
            Ok(true)
        }
        Err(err) => {
            warn!(node = %state.name, error = %err, "engine cache is corrupt, rebuilding");
            Ok(false)
        }
    }
}

/// Fold the observed input shapes (or shape-tensor values) into the
/// shape-range store and push the widened ranges into the TensorRT
/// profile.  Returns whether any bound moved.
fn fold_observed_shapes(
    state: &mut NodeState,
    kctx: &dyn KernelContext,
    stream: CudaStreamHandle,
    shape_values: &mut ShapeTensorValues,
) -> Result<bool> {
    if state.shape_ranges.is_empty() {
        return Ok(false);
    }
    let node_name = state.name.clone();
    let Some(network) = &state.network else {
        return Ok(false);
    };
    let Some(profile) = state.profiles.first().copied() else {
        return Err(ProviderError::bind(&node_name, "dynamic input without an optimization profile"));
    };

    let mut engine_update = false;
    for i in 0..network.nb_inputs() {
        let input = network.input(i).map_err(|e| e.for_node(&node_name))?;
        let input_name = input.name();
        if !state.shape_ranges.contains_input(&input_name) {
            continue;
        }
        let input_index = state.input_indexes.get(&input_name).copied().unwrap_or(0);
        let tensor = kctx.input(input_index).ok_or_else(|| {
            ProviderError::bind(&node_name, format!("missing input tensor '{input_name}'"))
        })?;

        if input.is_shape_tensor() {
            let rank0 = input.dimensions().nb_dims == 0;
            let shape_size = if rank0 {
                1
            } else {
                tensor.shape.first().copied().unwrap_or(0) as usize
            };
            let values = read_shape_tensor_values(
                &node_name,
                &input_name,
                &tensor,
                shape_size,
                stream,
                shape_values,
            )?;
            for (j, &value) in values.iter().enumerate() {
                if state.shape_ranges.fold_observed(&input_name, j, value) {
                    engine_update = true;
                }
            }
            let mut mins = Vec::with_capacity(values.len());
            let mut maxs = Vec::with_capacity(values.len());
            let mut opts_v = Vec::with_capacity(values.len());
            for j in 0..values.len() {
                let triple = state
                    .shape_ranges
                    .triples(&input_name, j)
                    .and_then(|t| t.first())
                    .copied()
                    .unwrap_or([values[j], values[j], values[j]]);
                mins.push(shape_i32(&node_name, triple[0])?);
                maxs.push(shape_i32(&node_name, triple[1])?);
                opts_v.push(shape_i32(&node_name, triple[2])?);
            }
            profile.set_shape_values(&input_name, PROFILE_SELECTOR_MIN, &mins)?;
            profile.set_shape_values(&input_name, PROFILE_SELECTOR_MAX, &maxs)?;
            profile.set_shape_values(&input_name, PROFILE_SELECTOR_OPT, &opts_v)?;
        } else {
            for (j, &dim) in tensor.shape.iter().enumerate() {
                if state.shape_ranges.triples(&input_name, j).is_some()
                    && state.shape_ranges.fold_observed(&input_name, j, dim)
                {
                    engine_update = true;
                }
            }
            let mut dims_min = dims_from_shape(&node_name, &tensor.shape)?;
            let mut dims_max = dims_min;
            let mut dims_opt = dims_min;
            for j in 0..tensor.shape.len() {
                if let Some(triple) = state
                    .shape_ranges
                    .triples(&input_name, j)
                    .and_then(|t| t.first())
                {
                    dims_min.d[j] = triple[0];
                    dims_max.d[j] = triple[1];
                    dims_opt.d[j] = triple[2];
                }
            }
            profile.set_dimensions(&input_name, PROFILE_SELECTOR_MIN, &dims_min)?;
            profile.set_dimensions(&input_name, PROFILE_SELECTOR_MAX, &dims_max)?;
            profile.set_dimensions(&input_name, PROFILE_SELECTOR_OPT, &dims_opt)?;
        }
    }
    if engine_update {
        debug!(node = %node_name, "observed shapes widened the profile, engine will be rebuilt");
    }
    Ok(engine_update)
}

/// Rebuild the engine after the profile widened (or because nothing was
/// cached).  The old context is destroyed strictly before the old engine,
/// and any captured CUDA graph is invalidated.
fn rebuild_engine(
    opts: &ProviderOptions,
    builder: Option<&Builder>,
    runtime: Option<&Runtime>,
    state: &mut NodeState,
) -> Result<()> {
    let node_name = state.name.clone();
    let (Some(builder), Some(runtime)) = (builder, runtime) else {
        return Err(ProviderError::build(&node_name, "rebuild", "TensorRT builder unavailable"));
    };
    if state.network.is_none() {
        return Err(ProviderError::build(
            &node_name,
            "rebuild",
            "no network retained for this fused node (pre-compiled engines cannot be rebuilt)",
        ));
    }

    state.reset_engine();
    state.cuda_graph.reset();
    state.capture_gate.invalidate();

    let serialized = {
        let network = match &state.network {
            Some(network) => network,
            None => {
                return Err(ProviderError::build(&node_name, "rebuild", "network disappeared"));
            }
        };
        let spec = BuildSpec {
            node_name: &node_name,
            name_with_precision: &state.name_with_precision,
            network,
            profiles: &state.profiles,
            paths: &state.paths,
            applied: state.applied,
            dynamic_ranges: state.dynamic_ranges.as_ref(),
            ranges_to_persist: opts.engine_cache_enable.then_some(&state.shape_ranges),
            add_profiles: true,
        };
        compile::configure_and_build(opts, builder, &spec)?
    };
    let engine = runtime
        .deserialize_engine(&serialized)
        .map_err(|e| e.for_node(&node_name))?;
    state.engine = Some(engine);

    if state.ep_context_pending && opts.dump_ep_context_model && opts.ep_context_embed_mode == 1 {
        compile::emit_ep_context(opts, state, EngineRef::Embedded(&serialized))?;
        state.ep_context_pending = false;
    }

    if state.refit_required {
        let model_path = state.model_path.clone();
        let refitted_path = state.paths.engine.clone();
        let engine = match &state.engine {
            Some(engine) => engine,
            None => return Err(ProviderError::build(&node_name, "refit", "no engine installed")),
        };
        crate::refit::refit_engine(
            &model_path,
            std::path::Path::new(&opts.onnx_model_folder_path),
            engine,
            false,
            Some(&refitted_path),
            opts.detailed_build_log,
        )?;
        state.refit_required = false;
    }
    Ok(())
}

// ─── Stage B helpers ────────────────────────────────────────────────────

/// Read a shape tensor's values back to the host (synchronously on the
/// inference stream), caching them for the rest of the call.
fn read_shape_tensor_values(
    node: &str,
    input_name: &str,
    tensor: &TensorView,
    shape_size: usize,
    stream: CudaStreamHandle,
    shape_values: &mut ShapeTensorValues,
) -> Result<Vec<i64>> {
    if tensor.data.is_null() || shape_size == 0 {
        // Shape-tensor values feed shape inference; an empty one is
        // malformed input rather than an empty-tensor binding.
        return Err(ProviderError::bind(
            node,
            format!("shape tensor '{input_name}' has no values to read"),
        ));
    }
    match tensor.dtype {
        TensorElementType::Int32 => {
            if !shape_values.i32_values.contains_key(input_name) {
                let mut host = vec![0i32; shape_size];
                memory::copy_dtoh_sync(
                    host.as_mut_ptr().cast(),
                    tensor.data,
                    shape_size * size_of::<i32>(),
                    stream,
                )?;
                shape_values.i32_values.insert(input_name.to_string(), host);
            }
            Ok(shape_values.i32_values[input_name]
                .iter()
                .map(|&v| i64::from(v))
                .collect())
        }
        TensorElementType::Int64 => {
            if !shape_values.i64_values.contains_key(input_name) {
                let mut host = vec![0i64; shape_size];
                memory::copy_dtoh_sync(
                    host.as_mut_ptr().cast(),
                    tensor.data,
                    shape_size * size_of::<i64>(),
                    stream,
                )?;
                shape_values.i64_values.insert(input_name.to_string(), host);
            }
            Ok(shape_values.i64_values[input_name].clone())
        }
        other => Err(ProviderError::bind(
            node,
            format!("the data type of shape tensor '{input_name}' should be int32 or int64, got {other}"),
        )),
    }
}

#[allow(clippy::too_many_arguments)]
fn bind_input(
    node: &str,
    engine: &Engine,
    context: &ExecutionContext,
    input_name: &str,
    input_index: usize,
    kctx: &dyn KernelContext,
    scratch: &mut ScratchArena,
    shape_values: &mut ShapeTensorValues,
    stream: CudaStreamHandle,
) -> Result<()> {
    let tensor = kctx.input(input_index).ok_or_else(|| {
        ProviderError::bind(node, format!("missing input tensor '{input_name}' at index {input_index}"))
    })?;

    if engine.is_shape_inference_io(input_name)? {
        // Shape tensors bind the host copy of their values.
        let rank0 = engine.tensor_shape(input_name)?.nb_dims == 0;
        let shape_size = if rank0 {
            1
        } else {
            tensor.shape.first().copied().unwrap_or(0) as usize
        };
        read_shape_tensor_values(node, input_name, &tensor, shape_size, stream, shape_values)?;
        let address: *mut c_void = match tensor.dtype {
            TensorElementType::Int32 => shape_values
                .i32_values
                .get_mut(input_name)
                .map(|v| v.as_mut_ptr().cast())
                .unwrap_or(std::ptr::null_mut()),
            TensorElementType::Int64 => shape_values
                .i64_values
                .get_mut(input_name)
                .map(|v| v.as_mut_ptr().cast())
                .unwrap_or(std::ptr::null_mut()),
            _ => std::ptr::null_mut(),
        };
        return context
            .set_tensor_address(input_name, address)
            .map_err(|e| e.for_node(node));
    }

    // Execution tensor: propagate the concrete shape, then bind.
    let dims = dims_from_shape(node, &tensor.shape)?;
    context
        .set_input_shape(input_name, &dims)
        .map_err(|e| e.for_node(node))?;

    let elem_cnt = tensor.element_count();
    let address = if tensor.data.is_null() || elem_cnt == 0 {
        // An empty tensor still needs a non-null, per-tensor distinct
        // address.
        scratch.alloc(1)?
    } else {
        resolve_input_address(node, input_name, &tensor, elem_cnt as usize, scratch, stream)?
    };
    context
        .set_tensor_address(input_name, address)
        .map_err(|e| e.for_node(node))
}

/// Device address for an execution-tensor input, staging through a
/// transport type when the engine cannot carry the host-visible one.
fn resolve_input_address(
    node: &str,
    input_name: &str,
    tensor: &TensorView,
    elem_cnt: usize,
    scratch: &mut ScratchArena,
    stream: CudaStreamHandle,
) -> Result<*mut c_void> {
    match tensor.dtype {
        TensorElementType::Float32
        | TensorElementType::Float16
        | TensorElementType::Bool
        | TensorElementType::Int8
        | TensorElementType::UInt8
        | TensorElementType::Int32 => Ok(tensor.data),
        TensorElementType::Int64 => {
            if supports_native_int64() {
                Ok(tensor.data)
            } else {
                let staging = scratch.alloc(elem_cnt * size_of::<i32>())?;
                cast::narrow_i64_to_i32(stream, tensor.data, staging, elem_cnt)?;
                Ok(staging)
            }
        }
        TensorElementType::Float64 => {
            let staging = scratch.alloc(elem_cnt * size_of::<f32>())?;
            cast::narrow_f64_to_f32(stream, tensor.data, staging, elem_cnt)?;
            Ok(staging)
        }
    }
}

// ─── Stage C helpers ────────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
fn bind_output(
    node: &str,
    context: &ExecutionContext,
    output_name: &str,
    output_index: usize,
    output_type: TensorElementType,
    kctx: &mut dyn KernelContext,
    scratch: &mut ScratchArena,
    dds_allocators: &mut HashMap<String, Box<DdsOutputAllocator>>,
    pending_casts: &mut Vec<PendingCast>,
) -> Result<()> {
    let dims = context.tensor_shape(output_name).map_err(|e| e.for_node(node))?;
    let is_dds = dims.as_slice().contains(&-1);

    if is_dds || dds_allocators.contains_key(output_name) {
        // Data-dependent shape: defer allocation to TensorRT through the
        // output allocator; no address is pre-bound.
        if !dds_allocators.contains_key(output_name) {
            let mut allocator = DdsOutputAllocator::new();
            context
                .set_output_allocator(output_name, &mut allocator)
                .map_err(|e| e.for_node(node))?;
            dds_allocators.insert(output_name.to_string(), allocator);
        }
        return Ok(());
    }

    let shape = dims.as_slice().to_vec();
    let tensor = kctx.allocate_output(output_index, &shape)?;
    let elem_cnt = element_count(&shape);

    let address = if tensor.data.is_null() || elem_cnt == 0 {
        scratch.alloc(1)?
    } else {
        let elem_cnt = elem_cnt as usize;
        match output_type {
            TensorElementType::Int64 if !supports_native_int64() => {
                // The engine transports int32; widen after the launch.
                let staging = scratch.alloc(elem_cnt * size_of::<i32>())?;
                pending_casts.push(PendingCast {
                    kind: CastKind::I32ToI64,
                    src: staging,
                    dst: tensor.data,
                    count: elem_cnt,
                });
                staging
            }
            TensorElementType::Float64 => {
                let staging = scratch.alloc(elem_cnt * size_of::<f32>())?;
                pending_casts.push(PendingCast {
                    kind: CastKind::F32ToF64,
                    src: staging,
                    dst: tensor.data,
                    count: elem_cnt,
                });
                staging
            }
            _ => tensor.data,
        }
    };
    context
        .set_tensor_address(output_name, address)
        .map_err(|e| e.for_node(node))
}

// ─── Stage F helpers ────────────────────────────────────────────────────

/// Bind a DDS output after the launch: the allocator knows the shape
/// TensorRT settled on; copy (or widen) its buffer into the host output.
fn finalize_dds_output(
    allocator: &DdsOutputAllocator,
    output_index: usize,
    output_type: TensorElementType,
    kctx: &mut dyn KernelContext,
    stream: CudaStreamHandle,
) -> Result<()> {
    let shape = allocator.shape().to_vec();
    let tensor = kctx.allocate_output(output_index, &shape)?;
    let elem_cnt = element_count(&shape);
    if elem_cnt <= 0 || tensor.data.is_null() {
        // Nothing to copy for an empty result, and copying would risk
        // clobbering adjacent tensors.
        return Ok(());
    }
    let elem_cnt = elem_cnt as usize;
    match output_type {
        TensorElementType::Int64 if !supports_native_int64() => {
            cast::widen_i32_to_i64(stream, allocator.buffer(), tensor.data, elem_cnt)?;
        }
        TensorElementType::Float64 => {
            cast::widen_f32_to_f64(stream, allocator.buffer(), tensor.data, elem_cnt)?;
        }
        _ => {
            memory::copy_dtod_async(
                tensor.data,
                allocator.buffer(),
                elem_cnt * output_type.size(),
                stream,
            )?;
        }
    }
    Ok(())
}

fn shape_i32(node: &str, value: i64) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| ProviderError::bind(node, format!("shape value {value} does not fit in 32 bits")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CountingAllocator {
        live: Mutex<Vec<usize>>,
        next: Mutex<usize>,
    }

    impl CountingAllocator {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                live: Mutex::new(Vec::new()),
                next: Mutex::new(0x1000),
            })
        }
    }

    impl DeviceAllocator for CountingAllocator {
        fn alloc(&self, _bytes: usize) -> Result<*mut c_void> {
            let mut next = self.next.lock().unwrap();
            let addr = *next;
            *next += 0x100;
            self.live.lock().unwrap().push(addr);
            Ok(addr as *mut c_void)
        }

        fn free(&self, ptr: *mut c_void) {
            let mut live = self.live.lock().unwrap();
            let addr = ptr as usize;
            if let Some(pos) = live.iter().position(|&p| p == addr) {
                live.remove(pos);
            }
        }
    }

    #[test]
    fn scratch_arena_frees_everything_on_drop() {
        let allocator = CountingAllocator::new();
        {
            let mut arena = ScratchArena::new(allocator.clone());
            arena.alloc(1).unwrap();
            arena.alloc(64).unwrap();
            arena.alloc(4096).unwrap();
            assert_eq!(allocator.live.lock().unwrap().len(), 3);
        }
        assert!(allocator.live.lock().unwrap().is_empty());
    }

    #[test]
    fn scratch_allocations_are_distinct() {
        let allocator = CountingAllocator::new();
        let mut arena = ScratchArena::new(allocator);
        let a = arena.alloc(1).unwrap();
        let b = arena.alloc(1).unwrap();
        assert_ne!(a, b);
    }
}
