//! Tensor element types, dimension vectors, and device/memory locations.

use crate::error::{ProviderError, Result};

/// Maximum tensor rank, matching `nvinfer1::Dims::MAX_DIMS`.
pub const MAX_DIMS: usize = 8;

/// Fixed-capacity dimension vector mirroring `nvinfer1::Dims`.
///
/// A dimension of `-1` marks a dynamic (or data-dependent) extent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dims {
    pub nb_dims: i32,
    pub d: [i64; MAX_DIMS],
}

impl Dims {
    /// Build from a slice, failing when the rank exceeds [`MAX_DIMS`].
    pub fn from_slice(dims: &[i64]) -> Result<Self> {
        if dims.len() > MAX_DIMS {
            return Err(ProviderError::Config(format!(
                "tensor rank {} exceeds the maximum of {MAX_DIMS}",
                dims.len()
            )));
        }
        let mut d = [0i64; MAX_DIMS];
        d[..dims.len()].copy_from_slice(dims);
        Ok(Self {
            nb_dims: dims.len() as i32,
            d,
        })
    }

    /// The populated dimensions.
    pub fn as_slice(&self) -> &[i64] {
        &self.d[..self.nb_dims as usize]
    }

    /// Whether any dimension is dynamic (`-1`).
    pub fn is_dynamic(&self) -> bool {
        self.as_slice().contains(&-1)
    }

    /// Element count with the host-runtime convention:
    /// rank 0 → 1, any dimension `< 0` → -1, otherwise the product
    /// (so any zero dimension yields 0).
    pub fn element_count(&self) -> i64 {
        element_count(self.as_slice())
    }
}

/// See [`Dims::element_count`].
pub fn element_count(shape: &[i64]) -> i64 {
    if shape.iter().any(|&d| d < 0) {
        return -1;
    }
    shape.iter().product()
}

/// Element types the provider binds.  The set matches what the engine can
/// transport plus the two host-side types staged through narrower
/// transports (`Int64` on old builders, `Float64` always).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TensorElementType {
    Float32,
    Float16,
    Bool,
    Int8,
    UInt8,
    Int32,
    Int64,
    Float64,
}

impl TensorElementType {
    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            Self::Bool | Self::Int8 | Self::UInt8 => 1,
            Self::Float16 => 2,
            Self::Float32 | Self::Int32 => 4,
            Self::Int64 | Self::Float64 => 8,
        }
    }

    /// Map from the ONNX `TensorProto.DataType` wire value.
    pub fn from_onnx(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::Float32),
            2 => Some(Self::UInt8),
            3 => Some(Self::Int8),
            6 => Some(Self::Int32),
            7 => Some(Self::Int64),
            9 => Some(Self::Bool),
            10 => Some(Self::Float16),
            11 => Some(Self::Float64),
            _ => None,
        }
    }

    /// ONNX `TensorProto.DataType` wire value.
    pub fn to_onnx(self) -> i32 {
        match self {
            Self::Float32 => 1,
            Self::UInt8 => 2,
            Self::Int8 => 3,
            Self::Int32 => 6,
            Self::Int64 => 7,
            Self::Bool => 9,
            Self::Float16 => 10,
            Self::Float64 => 11,
        }
    }
}

impl std::fmt::Display for TensorElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Float32 => "float32",
            Self::Float16 => "float16",
            Self::Bool => "bool",
            Self::Int8 => "int8",
            Self::UInt8 => "uint8",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float64 => "float64",
        };
        f.write_str(name)
    }
}

/// Which side of the PCIe bus a buffer lives on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceKind {
    Cpu,
    Gpu,
}

/// Memory class within a device, for the cross-device copy contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryKind {
    Default,
    CudaPinned,
}

/// A (device, memory-class) pair identifying where a tensor lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceLocation {
    pub device: DeviceKind,
    pub memory: MemoryKind,
}

impl DeviceLocation {
    pub const CPU: Self = Self {
        device: DeviceKind::Cpu,
        memory: MemoryKind::Default,
    };
    pub const GPU: Self = Self {
        device: DeviceKind::Gpu,
        memory: MemoryKind::Default,
    };
    pub const CPU_PINNED: Self = Self {
        device: DeviceKind::Cpu,
        memory: MemoryKind::CudaPinned,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_count_conventions() {
        assert_eq!(element_count(&[]), 1);
        assert_eq!(element_count(&[1, 3, 4]), 12);
        assert_eq!(element_count(&[2, 0, 4]), 0);
        assert_eq!(element_count(&[-1, 3, 4]), -1);
    }

    #[test]
    fn dims_roundtrip_and_dynamic() {
        let dims = Dims::from_slice(&[1, -1, 768]).unwrap();
        assert_eq!(dims.as_slice(), &[1, -1, 768]);
        assert!(dims.is_dynamic());
        assert_eq!(dims.element_count(), -1);

        assert!(Dims::from_slice(&[1; 9]).is_err());
    }

    #[test]
    fn onnx_type_mapping_roundtrips() {
        for ty in [
            TensorElementType::Float32,
            TensorElementType::Int64,
            TensorElementType::Bool,
            TensorElementType::Float64,
        ] {
            assert_eq!(TensorElementType::from_onnx(ty.to_onnx()), Some(ty));
        }
        assert_eq!(TensorElementType::from_onnx(999), None);
    }
}
