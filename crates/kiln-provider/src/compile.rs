//! Subgraph → engine compilation and the on-disk cache decision ladder.
//!
//! The full path parses the subgraph's ONNX bytes into a network, sets up
//! optimization profiles (explicit from options, or sentinel-seeded for
//! deferred resolution), configures precision/DLA/sparsity/timing-cache
//! flags, and either deserializes a valid cache pair or builds a fresh
//! serialized engine and persists it.  Subgraphs carrying an `EPContext`
//! node skip all of that and deserialize the embedded or referenced
//! engine directly.
//!
//! Everything here runs under the per-provider mutex.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use tracing::{debug, info, warn};

use kiln_core::config::{ProviderOptions, TacticSourceSpec};
use kiln_core::error::{ProviderError, Result};
use kiln_core::host::{FusedNode, SubgraphView};
use kiln_core::types::Dims;
use kiln_cuda::graph::{CaptureGate, CudaGraph};
use kiln_tensorrt::builder::{Builder, Network, NetworkTensor, OptimizationProfile, Parser};
use kiln_tensorrt::engine::{Engine, ExecutionContext};
use kiln_tensorrt::logger::global_logger;
use kiln_tensorrt::runtime::Runtime;
use kiln_tensorrt::{supports_builder_tuning, supports_weight_stripping, sys};

use crate::cache::{self, CachePaths};
use crate::calibrate::read_dynamic_ranges;
use crate::ep_context::{self, EngineRef, ParsedEpContext};
use crate::profile::{ShapeRangeStore, profiles_diverge};
use crate::refit::refit_engine;
use crate::state::{AppliedPrecision, GRAPH_CAPTURE_WARMUP_RUNS, NodeState};

/// Outcome of profile setup over the parsed network.
pub(crate) struct ProfileSetup {
    pub profiles: Vec<OptimizationProfile>,
    pub explicit_ranges: ShapeRangeStore,
    pub implicit_ranges: ShapeRangeStore,
    pub has_dynamic_shape: bool,
    pub has_explicit_profile: bool,
}

/// Everything a (re)build needs beyond the live handles.
pub(crate) struct BuildSpec<'a> {
    pub node_name: &'a str,
    pub name_with_precision: &'a str,
    pub network: &'a Network,
    pub profiles: &'a [OptimizationProfile],
    pub paths: &'a CachePaths,
    pub applied: AppliedPrecision,
    pub dynamic_ranges: Option<&'a HashMap<String, f32>>,
    /// Shape-range store persisted to the profile cache alongside the
    /// engine (explicit ranges at compile time, the folded store at
    /// rebuild time).
    pub ranges_to_persist: Option<&'a ShapeRangeStore>,
    pub add_profiles: bool,
}

/// Compile one fused subgraph into a node state.  Dispatches to the
/// precompiled-engine fast path when the subgraph carries an EPContext
/// node.
pub(crate) fn compile_subgraph(
    opts: &ProviderOptions,
    builder: &Builder,
    runtime: &Runtime,
    compute_capability: &str,
    max_ctx_mem: &AtomicUsize,
    graph: &SubgraphView,
    node: &FusedNode,
) -> Result<NodeState> {
    if let Some(ctx) = ep_context::parse_ctx_node(&graph.onnx) {
        return compile_from_precompiled(opts, runtime, max_ctx_mem, graph, node, ctx);
    }
    compile_from_graph(opts, builder, runtime, compute_capability, max_ctx_mem, graph, node)
}

fn compile_from_graph(
    opts: &ProviderOptions,
    builder: &Builder,
    runtime: &Runtime,
    compute_capability: &str,
    max_ctx_mem: &AtomicUsize,
    graph: &SubgraphView,
    node: &FusedNode,
) -> Result<NodeState> {
    let node_name = node.name.as_str();
    let logger = global_logger(opts.detailed_build_log);

    // A network without FP16/INT8 builder flags is strongly typed: op
    // precisions are driven by the network itself.
    let mut network_flags = sys::NETWORK_FLAG_EXPLICIT_BATCH;
    if !opts.fp16_enable && !opts.int8_enable {
        network_flags |= sys::NETWORK_FLAG_STRONGLY_TYPED;
    }
    let network = builder
        .create_network(network_flags)
        .map_err(|e| e.for_node(node_name))?;
    let parser = Parser::new(&network, logger).map_err(|e| e.for_node(node_name))?;
    parser
        .parse(&graph.onnx, &graph.model_path.to_string_lossy())
        .map_err(|e| e.for_node(node_name))?;

    if opts.fp16_enable && opts.layer_norm_fp32_fallback {
        pin_layer_norm_fp32(&network);
    }

    let ProfileSetup {
        profiles,
        explicit_ranges,
        implicit_ranges,
        has_dynamic_shape,
        has_explicit_profile,
    } = setup_profiles(builder, &network, opts, node_name)?;

    // Platform clamps for low precision.
    let mut fp16 = opts.fp16_enable;
    if fp16 && !builder.platform_has_fast_fp16() {
        fp16 = false;
        warn!(node = node_name, "fp16_enable is set, but the platform lacks fast native fp16");
    }
    let mut int8 = opts.int8_enable;
    if int8 && !builder.platform_has_fast_int8() {
        int8 = false;
        warn!(node = node_name, "int8_enable is set, but the platform lacks fast native int8");
    }

    let dynamic_ranges = if int8 && !opts.int8_calibration_cache_name.is_empty() {
        let table = cache::cache_path(&opts.cache_path, &opts.int8_calibration_cache_name);
        Some(read_dynamic_ranges(&table, opts.int8_use_native_calibration_table)?)
    } else {
        None
    };

    // DLA runs FP16/INT8 only; clamp the core to what the platform has.
    let mut dla_core = None;
    if (fp16 || int8) && opts.dla_enable {
        let cores = builder.nb_dla_cores();
        if cores == 0 {
            warn!(node = node_name, "dla_enable is set, but the platform has no DLA cores");
        } else {
            let mut core = opts.dla_core;
            if core >= cores {
                warn!(
                    node = node_name,
                    requested = core,
                    available = cores,
                    "DLA core out of range, using core 0"
                );
                core = 0;
            }
            dla_core = Some(core);
        }
    }

    let applied = AppliedPrecision { fp16, int8, dla_core };
    let name_with_precision = cache::name_with_precision(node_name, fp16, int8, dla_core);
    let hw_compatible = opts.engine_cache_enable && opts.engine_hw_compatible;
    let paths = CachePaths::new(
        &opts.cache_path,
        &opts.cache_prefix,
        &opts.timing_cache_path,
        node_name,
        &name_with_precision,
        compute_capability,
        hw_compatible,
    );

    let mut state = NodeState {
        name: node_name.to_string(),
        name_with_precision,
        compute_capability: compute_capability.to_string(),
        paths,
        model_path: graph.model_path.clone(),
        graph_inputs: graph.inputs.clone(),
        graph_outputs: graph.outputs.iter().map(|(name, _)| name.clone()).collect(),
        context: None,
        engine: None,
        parser: Some(parser),
        network: None,
        profiles,
        input_indexes: node.input_index_map(),
        output_indexes: node.output_index_map(),
        output_types: graph.outputs.iter().cloned().collect(),
        shape_ranges: implicit_ranges,
        has_explicit_profile,
        applied,
        dynamic_ranges,
        refit_required: false,
        ep_context_pending: false,
        dds_allocators: HashMap::new(),
        capture_gate: CaptureGate::new(GRAPH_CAPTURE_WARMUP_RUNS),
        cuda_graph: CudaGraph::new(),
    };

    if has_dynamic_shape {
        // Engine build defers to the first inference, where observed
        // shapes resolve the sentinel ranges.  The network stays alive for
        // that rebuild.
        state.network = Some(network);
        if opts.dump_ep_context_model {
            if opts.ep_context_embed_mode == 0 {
                emit_ep_context(opts, &state, EngineRef::CachePath(&engine_file_name(&state)))?;
            } else {
                state.ep_context_pending = true;
            }
        }
        debug!(node = node_name, "dynamic-shape subgraph, deferring engine build");
        return Ok(state);
    }

    obtain_static_engine(opts, builder, runtime, &network, &explicit_ranges, &mut state)?;
    state.network = Some(network);

    let engine = match &state.engine {
        Some(engine) => engine,
        None => {
            return Err(ProviderError::build(node_name, "compile", "no engine installed"));
        }
    };
    state.context = Some(create_context(engine, opts, max_ctx_mem).map_err(|e| e.for_node(node_name))?);
    Ok(state)
}

/// The engine-cache decision ladder for static-shape subgraphs:
/// deserialize a valid cache pair, fall back to a stripped engine awaiting
/// refit, or build fresh and persist.
fn obtain_static_engine(
    opts: &ProviderOptions,
    builder: &Builder,
    runtime: &Runtime,
    network: &Network,
    explicit_ranges: &ShapeRangeStore,
    state: &mut NodeState,
) -> Result<()> {
    let node_name = state.name.clone();
    let mut engine_update = false;

    if state.has_explicit_profile && opts.engine_cache_enable {
        engine_update = match ShapeRangeStore::load(&state.paths.profile) {
            Ok(cached) => profiles_diverge(
                &cached,
                &opts.profile_min_shapes,
                &opts.profile_max_shapes,
                &opts.profile_opt_shapes,
            ),
            // Missing or corrupt profile cache: the pair is invalid.
            Err(_) => true,
        };
        if engine_update {
            debug!(node = %node_name, "explicit profiles diverge from cache, engine will be rebuilt");
        }
    }

    // A cache pair is engine + profile; with explicit profiles one without
    // the other is invalid.  Weight-stripped fallback kicks in when only
    // the stripped variant is on disk.
    let mut engine_path = state.paths.engine.clone();
    if opts.weight_stripped_engine_enable && !engine_path.exists() {
        engine_path = state.paths.stripped.clone();
        state.refit_required = true;
    }
    let pair_ok = !state.has_explicit_profile || state.paths.profile.exists();

    if opts.engine_cache_enable && !engine_update && pair_ok {
        if !opts.engine_decryption_enable && engine_path.exists() {
            let bytes = fs::read(&engine_path)?;
            match runtime.deserialize_engine(&bytes) {
                Ok(engine) => {
                    info!(node = %node_name, cache = %engine_path.display(), "deserialized engine cache");
                    state.engine = Some(engine);
                    return finish_cached_engine(opts, state);
                }
                Err(err) => {
                    // Corrupted engine cache: rebuild.
                    warn!(node = %node_name, error = %err, "engine cache is corrupt, rebuilding");
                }
            }
        } else if opts.engine_decryption_enable && state.paths.encrypted.exists() {
            let crypto = opts.crypto.as_ref().ok_or_else(|| {
                ProviderError::Config(
                    "engine_decryption_enable is set but no decryption callback was installed"
                        .into(),
                )
            })?;
            let bytes = (crypto.decrypt)(&state.paths.encrypted)?;
            let engine = runtime
                .deserialize_engine(&bytes)
                .map_err(|e| e.for_node(&node_name))?;
            info!(node = %node_name, cache = %state.paths.encrypted.display(), "decrypted and deserialized engine cache");
            state.engine = Some(engine);
            return finish_cached_engine(opts, state);
        }
    }

    let spec = BuildSpec {
        node_name: &node_name,
        name_with_precision: &state.name_with_precision,
        network,
        profiles: &state.profiles,
        paths: &state.paths,
        applied: state.applied,
        dynamic_ranges: state.dynamic_ranges.as_ref(),
        ranges_to_persist: state.has_explicit_profile.then_some(explicit_ranges),
        add_profiles: state.has_explicit_profile,
    };
    let serialized = configure_and_build(opts, builder, &spec)?;
    let engine = runtime
        .deserialize_engine(&serialized)
        .map_err(|e| e.for_node(&node_name))?;
    state.engine = Some(engine);
    state.refit_required = false;

    if opts.dump_ep_context_model {
        let engine_ref = if opts.ep_context_embed_mode == 1 {
            EngineRef::Embedded(&serialized)
        } else {
            EngineRef::CachePath(&engine_file_name(state))
        };
        emit_ep_context(opts, state, engine_ref)?;
    }
    Ok(())
}

/// Post-deserialize step for cache-loaded engines: refit when only the
/// stripped variant was on disk.
fn finish_cached_engine(opts: &ProviderOptions, state: &mut NodeState) -> Result<()> {
    if !state.refit_required {
        return Ok(());
    }
    let model_path = state.model_path.clone();
    let refitted_path = state.paths.engine.clone();
    let engine = match &state.engine {
        Some(engine) => engine,
        None => return Err(ProviderError::build(&state.name, "refit", "no engine installed")),
    };
    refit_engine(
        &model_path,
        Path::new(&opts.onnx_model_folder_path),
        engine,
        false,
        Some(&refitted_path),
        opts.detailed_build_log,
    )?;
    state.refit_required = false;
    Ok(())
}

/// Assemble a builder config and run `buildSerializedNetwork`, persisting
/// the engine/profile/timing artifacts.  Shared by compile-time builds and
/// inference-time rebuilds; the caller holds the provider mutex.
pub(crate) fn configure_and_build(
    opts: &ProviderOptions,
    builder: &Builder,
    spec: &BuildSpec<'_>,
) -> Result<Vec<u8>> {
    let named = |e: ProviderError| e.for_node(spec.node_name);
    let config = builder.create_config().map_err(named)?;
    config.set_workspace_limit(opts.max_workspace_size);

    if spec.add_profiles {
        for profile in spec.profiles {
            config.add_optimization_profile(profile).map_err(named)?;
        }
    }

    match (spec.applied.fp16, spec.applied.int8) {
        (true, true) => {
            config.set_flag(sys::BUILDER_FLAG_FP16);
            config.set_flag(sys::BUILDER_FLAG_INT8);
        }
        (true, false) => config.set_flag(sys::BUILDER_FLAG_FP16),
        (false, true) => config.set_flag(sys::BUILDER_FLAG_INT8),
        (false, false) => {}
    }
    if let Some(core) = spec.applied.dla_core {
        config.set_dla(core);
        debug!(node = spec.node_name, core, "building for DLA with GPU fallback");
    }
    if opts.sparsity_enable {
        config.set_flag(sys::BUILDER_FLAG_SPARSE_WEIGHTS);
    }
    if opts.builder_optimization_level != 3 {
        if supports_builder_tuning() {
            config.set_builder_optimization_level(opts.builder_optimization_level);
            debug!(
                node = spec.node_name,
                level = opts.builder_optimization_level,
                "builder optimization level set"
            );
        } else {
            warn!(
                node = spec.node_name,
                "builder optimization level requires TensorRT 8.6 or newer"
            );
        }
    }
    if opts.auxiliary_streams >= 0 {
        if supports_builder_tuning() {
            config.set_max_aux_streams(opts.auxiliary_streams);
        } else {
            warn!(
                node = spec.node_name,
                "the auxiliary-stream cap requires TensorRT 8.6 or newer"
            );
        }
    }
    if opts.weight_stripped_engine_enable {
        if supports_weight_stripping() {
            config.set_flag(sys::BUILDER_FLAG_STRIP_PLAN);
            config.set_flag(sys::BUILDER_FLAG_REFIT_IDENTICAL);
        } else {
            warn!(
                node = spec.node_name,
                "weight-stripped engines require TensorRT 10.0 or newer; building a full engine"
            );
        }
    }
    if !opts.tactic_sources.is_empty() {
        let user_mask = tactic_source_mask(&opts.tactic_sources)?;
        let mask = config.tactic_sources() | user_mask;
        config.set_tactic_sources(mask);
        debug!(node = spec.node_name, mask, "tactic sources limited");
    }
    if opts.engine_cache_enable && opts.engine_hw_compatible {
        config.set_hardware_compat_ampere_plus();
    }

    if spec.applied.int8
        && let Some(ranges) = spec.dynamic_ranges
    {
        // Per-tensor dynamic ranges replace a calibrator.
        config.clear_int8_calibrator();
        set_network_dynamic_ranges(spec.network, ranges)
            .map_err(|e| e.for_node(spec.node_name))?;
    }

    // Missing timing cache file: silently start a fresh one.
    let timing = if opts.timing_cache_enable {
        let data = fs::read(&spec.paths.timing).unwrap_or_default();
        Some(
            config
                .attach_timing_cache(&data, opts.force_timing_cache_match)
                .map_err(named)?,
        )
    } else {
        None
    };

    let build_start = Instant::now();
    let serialized = builder
        .build_serialized_network(spec.network, &config)
        .map_err(named)?;
    let bytes = serialized.to_vec();
    if opts.detailed_build_log {
        info!(
            node = spec.name_with_precision,
            elapsed_ms = build_start.elapsed().as_millis() as u64,
            "engine build finished"
        );
    }

    if opts.engine_cache_enable {
        // Profile first, engine second: an engine on disk implies its
        // profile is already there.
        if let Some(ranges) = spec.ranges_to_persist {
            ranges.save(&spec.paths.profile)?;
            debug!(cache = %spec.paths.profile.display(), "serialized profile cache");
        }
        if opts.engine_decryption_enable {
            match opts.crypto.as_ref().and_then(|c| c.encrypt.as_ref()) {
                Some(encrypt) => {
                    encrypt(&spec.paths.encrypted, &bytes)?;
                    debug!(cache = %spec.paths.encrypted.display(), "serialized and encrypted engine cache");
                }
                None => warn!(
                    node = spec.node_name,
                    "engine cache encryption function not found; no cache written to disk"
                ),
            }
        } else {
            fs::write(&spec.paths.engine, &bytes)?;
            debug!(cache = %spec.paths.engine.display(), "serialized engine cache");
        }
    }

    if timing.is_some() {
        let data = config.serialize_timing_cache().map_err(named)?;
        fs::write(&spec.paths.timing, data)?;
        debug!(cache = %spec.paths.timing.display(), "serialized timing cache");
    }

    Ok(bytes)
}

/// Fast path: the subgraph is an EP-context model carrying a pre-compiled
/// engine (embedded bytes or a relative cache path).
fn compile_from_precompiled(
    opts: &ProviderOptions,
    runtime: &Runtime,
    max_ctx_mem: &AtomicUsize,
    graph: &SubgraphView,
    node: &FusedNode,
    ctx: ParsedEpContext,
) -> Result<NodeState> {
    let node_name = node.name.as_str();
    let model_dir = graph
        .model_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let bytes = ep_context::load_engine_payload(&ctx, &model_dir)?;
    let engine = runtime
        .deserialize_engine(&bytes)
        .map_err(|e| e.for_node(node_name))?;
    let context = create_context(&engine, opts, max_ctx_mem).map_err(|e| e.for_node(node_name))?;

    // Index maps straight from the engine's IO tensors.
    let fused_inputs = node.input_index_map();
    let fused_outputs = node.output_index_map();
    let mut input_indexes = HashMap::new();
    let mut output_indexes = HashMap::new();
    for (name, is_input) in engine.io_tensors() {
        if is_input {
            if let Some(&index) = fused_inputs.get(&name) {
                input_indexes.insert(name, index);
            }
        } else if let Some(&index) = fused_outputs.get(&name) {
            output_indexes.insert(name, index);
        }
    }

    let cc = ctx.hardware_architecture.clone();
    let hw_compatible = cc.ends_with('+');
    let name_with_precision = node_name.to_string();
    let paths = CachePaths::new(
        &opts.cache_path,
        &opts.cache_prefix,
        &opts.timing_cache_path,
        node_name,
        &name_with_precision,
        cc.trim_end_matches('+'),
        hw_compatible,
    );

    info!(node = node_name, hardware = %cc, "loaded pre-compiled engine from EP-context model");

    Ok(NodeState {
        name: node_name.to_string(),
        name_with_precision,
        compute_capability: cc,
        paths,
        model_path: graph.model_path.clone(),
        graph_inputs: graph.inputs.clone(),
        graph_outputs: graph.outputs.iter().map(|(name, _)| name.clone()).collect(),
        context: Some(context),
        engine: Some(engine),
        parser: None,
        network: None,
        profiles: Vec::new(),
        input_indexes,
        output_indexes,
        output_types: graph.outputs.iter().cloned().collect(),
        shape_ranges: ShapeRangeStore::new(),
        has_explicit_profile: false,
        applied: AppliedPrecision::default(),
        dynamic_ranges: None,
        refit_required: false,
        ep_context_pending: false,
        dds_allocators: HashMap::new(),
        capture_gate: CaptureGate::new(GRAPH_CAPTURE_WARMUP_RUNS),
        cuda_graph: CudaGraph::new(),
    })
}

/// Create the node's execution context, honoring context-memory sharing.
pub(crate) fn create_context(
    engine: &Arc<Engine>,
    opts: &ProviderOptions,
    max_ctx_mem: &AtomicUsize,
) -> Result<ExecutionContext> {
    if opts.context_memory_sharing_enable {
        max_ctx_mem.fetch_max(engine.device_memory_size(), Ordering::Relaxed);
        ExecutionContext::new_without_device_memory(engine)
    } else {
        ExecutionContext::new(engine)
    }
}

/// Emit the EP-context model for a node.
pub(crate) fn emit_ep_context(
    opts: &ProviderOptions,
    state: &NodeState,
    engine_ref: EngineRef<'_>,
) -> Result<()> {
    let hw_arch = if opts.engine_cache_enable && opts.engine_hw_compatible {
        "80+".to_string()
    } else {
        state.compute_capability.clone()
    };
    let model = ep_context::build_ctx_model(
        &state.name,
        &state.graph_inputs,
        &state.graph_outputs,
        engine_ref,
        &hw_arch,
    );
    let path = ep_context::ctx_model_path(&opts.ep_context_file_path, &state.model_path);
    ep_context::dump_ctx_model(&model, &path)?;
    info!(node = %state.name, model = %path.display(), "dumped EP-context model");
    Ok(())
}

/// Engine cache file name relative to the context-model directory.
pub(crate) fn engine_file_name(state: &NodeState) -> PathBuf {
    state
        .paths
        .engine
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| state.paths.engine.clone())
}

// ─── Profiles ───────────────────────────────────────────────────────────

/// Walk the network inputs, creating explicit profiles from options or
/// seeding sentinel ranges for deferred resolution.  With explicit
/// profiles, *every* dynamic input must be covered.
pub(crate) fn setup_profiles(
    builder: &Builder,
    network: &Network,
    opts: &ProviderOptions,
    node_name: &str,
) -> Result<ProfileSetup> {
    let has_explicit_profile = opts.has_explicit_profiles();
    let num_profiles = opts.num_explicit_profiles();

    let mut profiles = Vec::new();
    if has_explicit_profile {
        for _ in 0..num_profiles {
            profiles.push(
                builder
                    .create_optimization_profile()
                    .map_err(|e| e.for_node(node_name))?,
            );
        }
    }

    let mut explicit_ranges = ShapeRangeStore::new();
    let mut implicit_ranges = ShapeRangeStore::new();
    let mut has_dynamic_shape = false;

    for i in 0..network.nb_inputs() {
        let input = network.input(i).map_err(|e| e.for_node(node_name))?;
        let applied = if has_explicit_profile {
            apply_explicit_profiles(&profiles, &input, opts, &mut explicit_ranges)?
        } else {
            false
        };
        if applied {
            continue;
        }

        let name = input.name();
        if input.is_shape_tensor() {
            implicit_ranges.seed_implicit(&name, 0);
            has_dynamic_shape = true;
        } else {
            for (j, &dim) in input.dimensions().as_slice().iter().enumerate() {
                if dim == -1 {
                    implicit_ranges.seed_implicit(&name, j);
                    has_dynamic_shape = true;
                }
            }
        }
    }

    if has_explicit_profile && has_dynamic_shape {
        return Err(ProviderError::Config(format!(
            "explicit optimization profiles must cover every dynamic-shape input of fused node \
             '{node_name}'; missing profiles for: {}",
            implicit_ranges.input_names().join(", ")
        )));
    }
    if !has_explicit_profile && has_dynamic_shape {
        // One profile, resolved from observed shapes at inference time.
        profiles.push(
            builder
                .create_optimization_profile()
                .map_err(|e| e.for_node(node_name))?,
        );
    }

    Ok(ProfileSetup {
        profiles,
        explicit_ranges,
        implicit_ranges,
        has_dynamic_shape,
        has_explicit_profile,
    })
}

/// Apply the user's min/max/opt shapes for one input across all profiles,
/// recording every triple into the explicit store.
fn apply_explicit_profiles(
    profiles: &[OptimizationProfile],
    input: &NetworkTensor,
    opts: &ProviderOptions,
    ranges: &mut ShapeRangeStore,
) -> Result<bool> {
    let name = input.name();
    let Some(min_profiles) = opts.profile_min_shapes.get(&name) else {
        return Ok(false);
    };
    let (Some(max_profiles), Some(opt_profiles)) = (
        opts.profile_max_shapes.get(&name),
        opts.profile_opt_shapes.get(&name),
    ) else {
        return Ok(false);
    };
    let num_profiles = profiles.len();
    let dims = input.dimensions();

    for (i, profile) in profiles.iter().enumerate() {
        let fetch = |map: &[Vec<i64>], j: usize| -> Result<i64> {
            map.get(i).and_then(|p| p.get(j)).copied().ok_or_else(|| {
                ProviderError::Config(format!(
                    "profile {i} for input '{name}' is missing dimension {j}"
                ))
            })
        };

        if input.is_shape_tensor() {
            let shape_size = if dims.nb_dims == 0 {
                1
            } else {
                min_profiles.get(i).map(Vec::len).unwrap_or(0)
            };
            let mut mins = Vec::with_capacity(shape_size);
            let mut maxs = Vec::with_capacity(shape_size);
            let mut opts_v = Vec::with_capacity(shape_size);
            for j in 0..shape_size {
                let (min, max, opt) =
                    (fetch(min_profiles, j)?, fetch(max_profiles, j)?, fetch(opt_profiles, j)?);
                mins.push(shape_value_i32(&name, min)?);
                maxs.push(shape_value_i32(&name, max)?);
                opts_v.push(shape_value_i32(&name, opt)?);
                ranges.record_explicit(&name, j, i, num_profiles, [min, max, opt]);
            }
            profile.set_shape_values(&name, sys::PROFILE_SELECTOR_MIN, &mins)?;
            profile.set_shape_values(&name, sys::PROFILE_SELECTOR_MAX, &maxs)?;
            profile.set_shape_values(&name, sys::PROFILE_SELECTOR_OPT, &opts_v)?;
        } else {
            let mut dims_min = dims;
            let mut dims_max = dims;
            let mut dims_opt = dims;
            for j in 0..dims.nb_dims as usize {
                if dims.d[j] == -1 {
                    let (min, max, opt) =
                        (fetch(min_profiles, j)?, fetch(max_profiles, j)?, fetch(opt_profiles, j)?);
                    dims_min.d[j] = min;
                    dims_max.d[j] = max;
                    dims_opt.d[j] = opt;
                    ranges.record_explicit(&name, j, i, num_profiles, [min, max, opt]);
                }
                // Static dimensions are echoed from the network definition.
            }
            profile.set_dimensions(&name, sys::PROFILE_SELECTOR_MIN, &dims_min)?;
            profile.set_dimensions(&name, sys::PROFILE_SELECTOR_MAX, &dims_max)?;
            profile.set_dimensions(&name, sys::PROFILE_SELECTOR_OPT, &dims_opt)?;
        }
    }
    Ok(true)
}

fn shape_value_i32(input: &str, value: i64) -> Result<i32> {
    i32::try_from(value).map_err(|_| {
        ProviderError::Config(format!(
            "shape value {value} for shape tensor '{input}' does not fit in 32 bits"
        ))
    })
}

// ─── Network tweaks ─────────────────────────────────────────────────────

/// FP16 overflow guard: pin adjacent POW → REDUCE layer pairs (the layer
/// norm pattern) to FP32 precision and output type.
pub(crate) fn pin_layer_norm_fp32(network: &Network) {
    let nb_layers = network.nb_layers();
    let mut idx = 1;
    while idx < nb_layers - 1 {
        if let (Some(layer), Some(next)) = (network.layer(idx), network.layer(idx + 1))
            && layer.is_elementwise_pow()
            && next.is_reduce()
        {
            layer.pin_fp32();
            next.pin_fp32();
            debug!(layer = idx, "pinned POW+REDUCE pair to FP32");
        }
        idx += 1;
    }
}

/// Install INT8 per-tensor dynamic ranges on network inputs and every
/// layer output present in the calibration map.
fn set_network_dynamic_ranges(network: &Network, ranges: &HashMap<String, f32>) -> Result<()> {
    let apply = |tensor: &NetworkTensor| -> Result<()> {
        let name = tensor.name();
        if let Some(&range) = ranges.get(&name)
            && !tensor.set_dynamic_range(-range, range)
        {
            return Err(ProviderError::Build {
                node: String::new(),
                step: "setDynamicRange",
                detail: format!("could not set INT8 dynamic range for tensor '{name}'"),
            });
        }
        Ok(())
    };

    for i in 0..network.nb_inputs() {
        apply(&network.input(i)?)?;
    }
    for i in 0..network.nb_layers() {
        if let Some(layer) = network.layer(i) {
            for j in 0..layer.nb_outputs() {
                if let Some(output) = layer.output(j) {
                    apply(&output)?;
                }
            }
        }
    }
    Ok(())
}

/// Translate `+NAME`/`-NAME` tactic-source specs into the shim bitmask.
pub(crate) fn tactic_source_mask(specs: &[TacticSourceSpec]) -> Result<u32> {
    let mut mask = 0u32;
    for spec in specs {
        let bit = match spec.name.as_str() {
            "CUBLAS" => sys::TACTIC_SOURCE_CUBLAS,
            "CUBLAS_LT" => sys::TACTIC_SOURCE_CUBLAS_LT,
            "CUDNN" => sys::TACTIC_SOURCE_CUDNN,
            "EDGE_MASK_CONVOLUTIONS" => sys::TACTIC_SOURCE_EDGE_MASK_CONVOLUTIONS,
            "JIT_CONVOLUTIONS" => sys::TACTIC_SOURCE_JIT_CONVOLUTIONS,
            other => {
                return Err(ProviderError::Config(format!(
                    "unknown tactic source '{other}'"
                )));
            }
        };
        if spec.enable {
            mask |= bit;
        } else {
            mask &= !bit;
        }
    }
    Ok(mask)
}

/// Build a [`Dims`] from a concrete shape, for `set_input_shape`.
pub(crate) fn dims_from_shape(node: &str, shape: &[i64]) -> Result<Dims> {
    Dims::from_slice(shape).map_err(|_| {
        ProviderError::bind(node, format!("tensor rank {} exceeds the maximum", shape.len()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tactic_masks_apply_signs_in_order() {
        let specs = vec![
            TacticSourceSpec { enable: true, name: "CUBLAS".into() },
            TacticSourceSpec { enable: true, name: "CUDNN".into() },
            TacticSourceSpec { enable: false, name: "CUBLAS".into() },
        ];
        let mask = tactic_source_mask(&specs).unwrap();
        assert_eq!(mask, sys::TACTIC_SOURCE_CUDNN);
    }

    #[test]
    fn unknown_tactic_source_is_config_error() {
        let specs = vec![TacticSourceSpec { enable: true, name: "NO_SUCH".into() }];
        assert!(tactic_source_mask(&specs).is_err());
    }

    #[test]
    fn shape_values_must_fit_i32() {
        assert_eq!(shape_value_i32("x", 42).unwrap(), 42);
        assert!(shape_value_i32("x", i64::from(i32::MAX) + 1).is_err());
    }
}
