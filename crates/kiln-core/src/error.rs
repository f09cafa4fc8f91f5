//! Typed error hierarchy for the provider.
//!
//! Uses `thiserror` for library-grade errors.  Every error that leaves the
//! provider names the fused node and the step that failed, so the host
//! runtime can attribute failures without string parsing.
//!
//! # Error codes
//!
//! Each variant maps to a stable integer code via [`ProviderError::error_code`]
//! for structured telemetry.

/// All errors originating from the provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    // ── Configuration / security ─────────────────────────────────────
    #[error("configuration error: {0}")]
    Config(String),

    #[error("unsafe model path: {0}")]
    Security(String),

    // ── Cache I/O ────────────────────────────────────────────────────
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache format error: {0}")]
    CacheFormat(String),

    // ── Engine lifecycle ─────────────────────────────────────────────
    #[error("engine build failed for '{node}' at {step}: {detail}")]
    Build {
        node: String,
        step: &'static str,
        detail: String,
    },

    // ── Per-inference ────────────────────────────────────────────────
    #[error("binding failed for '{node}': {detail}")]
    Bind { node: String, detail: String },

    #[error("execution failed for '{node}': {detail}")]
    Exec { node: String, detail: String },

    // ── Raw CUDA runtime ─────────────────────────────────────────────
    #[error("{op} failed with CUDA error code {code}")]
    Cuda { op: &'static str, code: i32 },
}

impl ProviderError {
    /// Engine-build failure attributed to a fused node and pipeline step.
    pub fn build(node: impl Into<String>, step: &'static str, detail: impl Into<String>) -> Self {
        Self::Build {
            node: node.into(),
            step,
            detail: detail.into(),
        }
    }

    /// Binding failure attributed to a fused node.
    pub fn bind(node: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Bind {
            node: node.into(),
            detail: detail.into(),
        }
    }

    /// Execution failure attributed to a fused node.
    pub fn exec(node: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Exec {
            node: node.into(),
            detail: detail.into(),
        }
    }

    /// Attribute an un-attributed Build/Bind/Exec error to a fused node.
    /// Low-level wrappers raise errors without node context; the compile
    /// and compute paths fill it in at the boundary.
    pub fn for_node(self, node: &str) -> Self {
        match self {
            Self::Build { node: n, step, detail } if n.is_empty() => Self::Build {
                node: node.to_string(),
                step,
                detail,
            },
            Self::Bind { node: n, detail } if n.is_empty() => Self::Bind {
                node: node.to_string(),
                detail,
            },
            Self::Exec { node: n, detail } if n.is_empty() => Self::Exec {
                node: node.to_string(),
                detail,
            },
            other => other,
        }
    }

    /// Stable integer error code for structured telemetry.
    ///
    /// Codes are grouped by category:
    /// - 1xx: configuration / security
    /// - 2xx: cache I/O
    /// - 3xx: engine lifecycle
    /// - 4xx: per-inference binding / execution
    /// - 5xx: raw CUDA
    pub fn error_code(&self) -> u32 {
        match self {
            Self::Config(_) => 100,
            Self::Security(_) => 101,
            Self::Io(_) => 200,
            Self::CacheFormat(_) => 201,
            Self::Build { .. } => 300,
            Self::Bind { .. } => 400,
            Self::Exec { .. } => 401,
            Self::Cuda { .. } => 500,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_error_names_node_and_step() {
        let err = ProviderError::build("fused_gemm_0", "buildSerializedNetwork", "builder returned null");
        let msg = err.to_string();
        assert!(msg.contains("fused_gemm_0"));
        assert!(msg.contains("buildSerializedNetwork"));
        assert_eq!(err.error_code(), 300);
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: ProviderError = io.into();
        assert_eq!(err.error_code(), 200);
    }
}
