//! Per-provider and per-fused-node state.
//!
//! One provider owns one TensorRT builder, one runtime, and a map of node
//! states keyed by fused-node name.  A single mutex guards all of it —
//! engine/context/profile mutation, cache I/O, and the whole compute body
//! run under that lock (one compile or rebuild at a time, and
//! one-context-per-stream semantics at run time).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex, OnceLock};

use kiln_core::config::ProviderOptions;
use kiln_core::error::Result;
use kiln_core::types::TensorElementType;
use kiln_cuda::graph::{CaptureGate, CudaGraph};
use kiln_cuda::memory::compute_capability;
use kiln_tensorrt::builder::{Builder, Network, OptimizationProfile, Parser};
use kiln_tensorrt::engine::{Engine, ExecutionContext};
use kiln_tensorrt::logger::global_logger;
use kiln_tensorrt::output_allocator::DdsOutputAllocator;
use kiln_tensorrt::runtime::Runtime;

use crate::cache::CachePaths;
use crate::profile::ShapeRangeStore;

/// Number of regular runs required before a CUDA graph may be captured.
pub const GRAPH_CAPTURE_WARMUP_RUNS: u64 = 1;

/// The precision actually applied after platform clamps; drives cache
/// naming and rebuild configs.
#[derive(Clone, Copy, Debug, Default)]
pub struct AppliedPrecision {
    pub fp16: bool,
    pub int8: bool,
    pub dla_core: Option<i32>,
}

/// Everything one fused node owns across its lifetime.
///
/// Field order matters: `context` is declared before `engine`, so a
/// dropped state destroys the execution context strictly before the
/// engine it was created from.
pub struct NodeState {
    pub name: String,
    pub name_with_precision: String,
    pub compute_capability: String,
    pub paths: CachePaths,
    pub model_path: PathBuf,
    pub graph_inputs: Vec<String>,
    pub graph_outputs: Vec<String>,

    pub context: Option<ExecutionContext>,
    pub engine: Option<Arc<Engine>>,

    /// Parser kept alive only while a refit may still need it.
    pub parser: Option<Parser>,
    /// Network retained for dynamic-shape nodes that rebuild at inference.
    pub network: Option<Network>,
    pub profiles: Vec<OptimizationProfile>,

    pub input_indexes: HashMap<String, usize>,
    pub output_indexes: HashMap<String, usize>,
    pub output_types: HashMap<String, TensorElementType>,

    /// Dynamic dims still resolved from observed shapes (implicit path),
    /// or the store deserialized from the profile cache.
    pub shape_ranges: ShapeRangeStore,
    pub has_explicit_profile: bool,

    pub applied: AppliedPrecision,
    pub dynamic_ranges: Option<HashMap<String, f32>>,

    pub refit_required: bool,
    /// Dynamic-shape node with `dump_ep_context_model` and embed mode 1:
    /// the context model is emitted at the first rebuild, when the engine
    /// is concrete.
    pub ep_context_pending: bool,

    pub dds_allocators: HashMap<String, Box<DdsOutputAllocator>>,
    pub capture_gate: CaptureGate,
    pub cuda_graph: CudaGraph,
}

impl NodeState {
    /// Tear down the engine pair in the required order: context first,
    /// then engine.
    pub fn reset_engine(&mut self) {
        self.context.take();
        self.engine.take();
    }
}

/// State behind the per-provider mutex.
pub struct ProviderInner {
    pub builder: Option<Builder>,
    pub runtime: Option<Runtime>,
    pub nodes: HashMap<String, NodeState>,
}

impl ProviderInner {
    /// Create the provider-wide builder and runtime on first use.
    pub fn ensure_trt(&mut self, verbose: bool) -> Result<()> {
        if self.builder.is_none() {
            self.builder = Some(Builder::new(global_logger(verbose))?);
        }
        if self.runtime.is_none() {
            self.runtime = Some(Runtime::new(global_logger(verbose))?);
        }
        Ok(())
    }
}

/// Shared provider state: options, the mutex, and the running maximum of
/// context device-memory sizes (context-memory sharing).
pub struct ProviderShared {
    pub options: ProviderOptions,
    pub max_ctx_mem_size: AtomicUsize,
    pub inner: Mutex<ProviderInner>,
    device_cc: OnceLock<String>,
}

impl ProviderShared {
    pub fn new(options: ProviderOptions) -> Self {
        Self {
            options,
            max_ctx_mem_size: AtomicUsize::new(0),
            inner: Mutex::new(ProviderInner {
                builder: None,
                runtime: None,
                nodes: HashMap::new(),
            }),
            device_cc: OnceLock::new(),
        }
    }

    /// Compute capability of the configured device, queried once.
    pub fn compute_capability(&self) -> Result<&str> {
        if let Some(cc) = self.device_cc.get() {
            return Ok(cc);
        }
        let cc = compute_capability(self.options.device_id)?;
        Ok(self.device_cc.get_or_init(|| cc))
    }
}
