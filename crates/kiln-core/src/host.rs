//! The host-runtime contract.
//!
//! The provider is a plugin: the host partitions the model, serializes each
//! assigned subgraph, and calls back into the provider per inference.  These
//! types are the narrow waist between the two sides — everything the
//! provider needs from the host and nothing more.

use std::collections::HashMap;
use std::ffi::c_void;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::Result;
use crate::ffi_types::CudaStreamHandle;
use crate::types::{TensorElementType, element_count};

/// A borrowed device tensor handed across the boundary.
///
/// `data` is a raw device pointer owned by whoever produced the view; the
/// provider never frees it.
#[derive(Clone, Debug)]
pub struct TensorView {
    pub data: *mut c_void,
    pub shape: Vec<i64>,
    pub dtype: TensorElementType,
}

impl TensorView {
    /// Element count with the host convention (rank 0 → 1, any zero dim →
    /// 0, any negative dim → -1).
    pub fn element_count(&self) -> i64 {
        element_count(&self.shape)
    }
}

/// Device memory arena supplied by the host.  Scratch allocations for
/// empty-tensor placeholders, transport casts, and shared context memory go
/// through this handle.
pub trait DeviceAllocator: Send + Sync {
    fn alloc(&self, bytes: usize) -> Result<*mut c_void>;
    fn free(&self, ptr: *mut c_void);
}

/// Per-inference kernel context: resolves input views, materializes output
/// tensors, and carries the call's CUDA stream.
pub trait KernelContext {
    fn input_count(&self) -> usize;

    /// Input tensor by host kernel index.
    fn input(&self, index: usize) -> Option<TensorView>;

    /// Ask the host to materialize the output tensor at `index` with the
    /// given concrete shape, returning its device view.
    fn allocate_output(&mut self, index: usize, shape: &[i64]) -> Result<TensorView>;

    /// The CUDA stream this inference runs on.  The same stream serves data
    /// transfers and enqueue, so operations on it are ordered.
    fn stream(&self) -> CudaStreamHandle;

    /// The host's device-memory arena.
    fn allocator(&self) -> Arc<dyn DeviceAllocator>;
}

/// A fused subgraph as presented by the host at compile time (and, for
/// capability queries, a view of the candidate graph region).
#[derive(Clone, Debug)]
pub struct SubgraphView {
    /// Number of host-graph nodes in this view.
    pub node_count: usize,
    /// Path of the source ONNX model (used for refit and EP-context
    /// naming).  May be relative; the provider security-checks it before
    /// touching the filesystem.
    pub model_path: PathBuf,
    /// The subgraph serialized as ONNX bytes.
    pub onnx: Vec<u8>,
    /// Graph input names in host order.
    pub inputs: Vec<String>,
    /// Graph output names and element types in host order.
    pub outputs: Vec<(String, TensorElementType)>,
}

/// Identity of the fused node the subgraph was collapsed into.
#[derive(Clone, Debug)]
pub struct FusedNode {
    pub name: String,
    /// Input names in host kernel-context order.
    pub inputs: Vec<String>,
    /// Output names in host kernel-context order.
    pub outputs: Vec<String>,
}

impl FusedNode {
    /// Engine-tensor-name → host kernel input index.
    pub fn input_index_map(&self) -> HashMap<String, usize> {
        self.inputs
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect()
    }

    /// Engine-tensor-name → host kernel output index.
    pub fn output_index_map(&self) -> HashMap<String, usize> {
        self.outputs
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect()
    }
}

/// One subgraph claimed by [`get_capability`](crate::host): the indices of
/// the host-graph nodes the provider will take.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaimedSubgraph {
    pub node_indices: Vec<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_maps_follow_host_order() {
        let node = FusedNode {
            name: "fused".into(),
            inputs: vec!["a".into(), "b".into()],
            outputs: vec!["y".into()],
        };
        let inputs = node.input_index_map();
        assert_eq!(inputs["a"], 0);
        assert_eq!(inputs["b"], 1);
        assert_eq!(node.output_index_map()["y"], 0);
    }

    #[test]
    fn tensor_view_element_count() {
        let view = TensorView {
            data: std::ptr::null_mut(),
            shape: vec![2, 3],
            dtype: TensorElementType::Float32,
        };
        assert_eq!(view.element_count(), 6);
    }
}
