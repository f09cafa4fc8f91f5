//! The provider shell: the callbacks the host runtime invokes.
//!
//! The surface is a capability set, not an inheritance hierarchy —
//! [`ProviderHooks`] packages the five callbacks as function values over a
//! shared provider handle, mirroring how the host consumes them.

use std::ptr;
use std::sync::Arc;

use tracing::debug;

use kiln_core::config::ProviderOptions;
use kiln_core::error::{ProviderError, Result};
use kiln_core::ffi_types::CudaStreamHandle;
use kiln_core::host::{ClaimedSubgraph, FusedNode, KernelContext, SubgraphView};
use kiln_core::types::{DeviceKind, DeviceLocation, MemoryKind};
use kiln_cuda::stream::OwnedStream;
use kiln_cuda::{memory, stream as cuda_stream, sys as cuda_sys};

use crate::compile;
use crate::execute;
use crate::state::ProviderShared;

/// Compute record returned per compiled fused node.  State creation is
/// folded into [`TensorrtExecutionProvider::compile`] and teardown into
/// the provider's drop; what remains is the compute function itself.
pub struct NodeComputeInfo {
    pub node_name: String,
    pub compute: Box<dyn Fn(&mut dyn KernelContext) -> Result<()> + Send + Sync>,
}

/// One cross-device tensor copy.
#[derive(Clone, Copy)]
pub struct CopyRequest {
    pub src: *const std::ffi::c_void,
    pub src_location: DeviceLocation,
    pub dst: *mut std::ffi::c_void,
    pub dst_location: DeviceLocation,
    pub bytes: usize,
    pub stream: Option<CudaStreamHandle>,
}

/// The TensorRT-backed execution provider.
pub struct TensorrtExecutionProvider {
    shared: Arc<ProviderShared>,
}

impl std::fmt::Debug for TensorrtExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TensorrtExecutionProvider").finish_non_exhaustive()
    }
}

impl TensorrtExecutionProvider {
    pub fn new(options: ProviderOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            shared: Arc::new(ProviderShared::new(options)),
        })
    }

    /// Build from the host's flat key/value option list.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        Self::new(ProviderOptions::from_pairs(pairs)?)
    }

    pub fn options(&self) -> &ProviderOptions {
        &self.shared.options
    }

    /// Pure inspection: claim the presented region as one indexed
    /// subgraph.  The host has already partitioned the model into
    /// TensorRT-assignable regions, so the whole view is taken.
    pub fn get_capability(&self, graph: &SubgraphView) -> Vec<ClaimedSubgraph> {
        if graph.node_count == 0 {
            return Vec::new();
        }
        vec![ClaimedSubgraph {
            node_indices: (0..graph.node_count).collect(),
        }]
    }

    /// Compile each (subgraph, fused node) pair into an engine-backed
    /// compute record.  Engines for dynamic-shape subgraphs are deferred
    /// to the first inference.
    pub fn compile(&self, pairs: &[(SubgraphView, FusedNode)]) -> Result<Vec<NodeComputeInfo>> {
        let mut infos = Vec::with_capacity(pairs.len());
        for (graph, node) in pairs {
            let mut inner = self.shared.inner.lock().unwrap();
            inner.ensure_trt(self.shared.options.detailed_build_log)?;

            // The compute capability is only needed for cache naming on
            // the full compile path; EP-context subgraphs carry their own
            // hardware tag.
            let compute_capability =
                if crate::ep_context::parse_ctx_node(&graph.onnx).is_some() {
                    String::new()
                } else {
                    self.shared.compute_capability()?.to_string()
                };

            let inner = &mut *inner;
            let (Some(builder), Some(runtime)) = (inner.builder.as_ref(), inner.runtime.as_ref())
            else {
                return Err(ProviderError::build(
                    &node.name,
                    "compile",
                    "TensorRT builder/runtime unavailable",
                ));
            };
            let state = compile::compile_subgraph(
                &self.shared.options,
                builder,
                runtime,
                &compute_capability,
                &self.shared.max_ctx_mem_size,
                graph,
                node,
            )
            .map_err(|e| e.for_node(&node.name))?;
            inner.nodes.insert(node.name.clone(), state);
            debug!(node = %node.name, "fused node compiled");

            let shared = Arc::clone(&self.shared);
            let node_name = node.name.clone();
            let compute_name = node_name.clone();
            infos.push(NodeComputeInfo {
                node_name,
                compute: Box::new(move |kctx: &mut dyn KernelContext| {
                    // The whole compute body is the critical section.
                    let mut inner = shared.inner.lock().unwrap();
                    execute::compute_node(
                        &shared.options,
                        &mut inner,
                        &shared.max_ctx_mem_size,
                        &compute_name,
                        kctx,
                    )
                    .map_err(|e| e.for_node(&compute_name))
                }),
            });
        }
        Ok(infos)
    }

    /// The provider can service a copy when either side is GPU memory or
    /// CUDA-pinned host memory.
    pub fn can_copy(src: DeviceLocation, dst: DeviceLocation) -> bool {
        src.device == DeviceKind::Gpu
            || src.memory == MemoryKind::CudaPinned
            || dst.device == DeviceKind::Gpu
            || dst.memory == MemoryKind::CudaPinned
    }

    /// Cross-device copy contract: device↔device copies stay on the GPU,
    /// host↔device copies are stream-ordered when a stream is supplied and
    /// synchronous otherwise, and host↔host copies drain the stream first
    /// when the source is pinned.
    pub fn copy_tensor(req: &CopyRequest) -> Result<()> {
        let CopyRequest {
            src,
            src_location,
            dst,
            dst_location,
            bytes,
            stream,
        } = *req;
        match (src_location.device, dst_location.device) {
            (DeviceKind::Gpu, DeviceKind::Gpu) => {
                if std::ptr::eq(src, dst as *const _) {
                    return Ok(());
                }
                match stream {
                    Some(stream) => memory::copy_dtod_async(dst, src, bytes, stream),
                    None => {
                        // SAFETY: caller guarantees both device ranges.
                        let rc = unsafe {
                            cuda_sys::cuda_memcpy(
                                dst,
                                src,
                                bytes,
                                cuda_sys::MEMCPY_DEVICE_TO_DEVICE,
                            )?
                        };
                        cuda_sys::check_cuda(rc, "cudaMemcpy(D2D)")
                    }
                }
            }
            (DeviceKind::Cpu, DeviceKind::Gpu) => match stream {
                Some(stream) => memory::copy_htod_async(dst, src, bytes, stream),
                None => {
                    // SAFETY: caller guarantees host src and device dst.
                    let rc = unsafe {
                        cuda_sys::cuda_memcpy(dst, src, bytes, cuda_sys::MEMCPY_HOST_TO_DEVICE)?
                    };
                    cuda_sys::check_cuda(rc, "cudaMemcpy(H2D)")?;
                    cuda_stream::synchronize(ptr::null_mut())
                }
            },
            (DeviceKind::Gpu, DeviceKind::Cpu) => match stream {
                Some(stream) => memory::copy_dtoh_async(dst, src, bytes, stream),
                None => {
                    // SAFETY: caller guarantees device src and host dst.
                    let rc = unsafe {
                        cuda_sys::cuda_memcpy(dst, src, bytes, cuda_sys::MEMCPY_DEVICE_TO_HOST)?
                    };
                    cuda_sys::check_cuda(rc, "cudaMemcpy(D2H)")?;
                    cuda_stream::synchronize(ptr::null_mut())
                }
            },
            (DeviceKind::Cpu, DeviceKind::Cpu) => {
                // Pinned host memory may still be the target of in-flight
                // device work.
                if let Some(stream) = stream
                    && src_location.memory == MemoryKind::CudaPinned
                {
                    cuda_stream::synchronize(stream)?;
                }
                // SAFETY: caller guarantees both host ranges, non-overlapping.
                unsafe {
                    std::ptr::copy_nonoverlapping(src.cast::<u8>(), dst.cast::<u8>(), bytes);
                }
                Ok(())
            }
        }
    }

    /// Create a non-blocking CUDA stream for the host runtime.
    pub fn create_stream(&self) -> Result<OwnedStream> {
        OwnedStream::new_non_blocking()
    }

    /// Package the callback surface as function values over this provider.
    pub fn hooks(self: Arc<Self>) -> ProviderHooks {
        let capability = Arc::clone(&self);
        let compile = Arc::clone(&self);
        let stream = self;
        ProviderHooks {
            get_capability: Box::new(move |graph| capability.get_capability(graph)),
            compile: Box::new(move |pairs| compile.compile(pairs)),
            can_copy: Box::new(|src, dst| Self::can_copy(src, dst)),
            copy_tensor: Box::new(|req| Self::copy_tensor(req)),
            create_stream: Box::new(move || stream.create_stream()),
        }
    }
}

/// The callback surface handed to the host runtime.
pub struct ProviderHooks {
    pub get_capability: Box<dyn Fn(&SubgraphView) -> Vec<ClaimedSubgraph> + Send + Sync>,
    pub compile:
        Box<dyn Fn(&[(SubgraphView, FusedNode)]) -> Result<Vec<NodeComputeInfo>> + Send + Sync>,
    pub can_copy: Box<dyn Fn(DeviceLocation, DeviceLocation) -> bool + Send + Sync>,
    pub copy_tensor: Box<dyn Fn(&CopyRequest) -> Result<()> + Send + Sync>,
    pub create_stream: Box<dyn Fn() -> Result<OwnedStream> + Send + Sync>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn provider() -> TensorrtExecutionProvider {
        TensorrtExecutionProvider::from_pairs([("engine_cache_enable", "1")]).unwrap()
    }

    #[test]
    fn capability_claims_the_whole_view() {
        let graph = SubgraphView {
            node_count: 3,
            model_path: PathBuf::from("model.onnx"),
            onnx: Vec::new(),
            inputs: vec!["x".into()],
            outputs: vec![("y".into(), kiln_core::types::TensorElementType::Float32)],
        };
        let claimed = provider().get_capability(&graph);
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].node_indices, vec![0, 1, 2]);

        let empty = SubgraphView { node_count: 0, ..graph };
        assert!(provider().get_capability(&empty).is_empty());
    }

    #[test]
    fn can_copy_requires_a_gpu_or_pinned_side() {
        assert!(TensorrtExecutionProvider::can_copy(
            DeviceLocation::GPU,
            DeviceLocation::CPU
        ));
        assert!(TensorrtExecutionProvider::can_copy(
            DeviceLocation::CPU,
            DeviceLocation::GPU
        ));
        assert!(TensorrtExecutionProvider::can_copy(
            DeviceLocation::CPU_PINNED,
            DeviceLocation::CPU
        ));
        assert!(!TensorrtExecutionProvider::can_copy(
            DeviceLocation::CPU,
            DeviceLocation::CPU
        ));
    }

    #[test]
    fn host_to_host_copy_runs_without_cuda() {
        let src = [1u8, 2, 3, 4];
        let mut dst = [0u8; 4];
        TensorrtExecutionProvider::copy_tensor(&CopyRequest {
            src: src.as_ptr().cast(),
            src_location: DeviceLocation::CPU,
            dst: dst.as_mut_ptr().cast(),
            dst_location: DeviceLocation::CPU,
            bytes: 4,
            stream: None,
        })
        .unwrap();
        assert_eq!(dst, src);
    }

    #[test]
    fn invalid_options_fail_construction() {
        assert!(TensorrtExecutionProvider::from_pairs([("dla_enable", "1")]).is_err());
    }
}
