//! Refit a weight-stripped engine from the original ONNX model.
//!
//! The engine on disk carries no weight payload; a parser refitter streams
//! the weights back in from the source model.  The model reference is
//! caller-supplied, so it is security-checked before any filesystem access.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use kiln_core::error::{ProviderError, Result};
use kiln_tensorrt::engine::Engine;
use kiln_tensorrt::logger::global_logger;
use kiln_tensorrt::refit::{ParserRefitter, Refitter};
use kiln_tensorrt::supports_weight_stripping;

use crate::cache::{check_path_is_relative, check_path_stays_inside};

/// Resolve and security-check the model reference: the combined path must
/// be relative, `..`-free, and present on disk.
fn validate_model_path(
    onnx_model_filename: &Path,
    onnx_model_folder: &Path,
    path_check: bool,
) -> Result<PathBuf> {
    let onnx_path: PathBuf = onnx_model_folder.join(onnx_model_filename);
    if path_check {
        check_path_is_relative(&onnx_path)?;
        check_path_stays_inside(&onnx_path)?;
    }
    if !onnx_path.exists() {
        return Err(ProviderError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("the ONNX model {} does not exist", onnx_path.display()),
        )));
    }
    Ok(onnx_path)
}

/// Refit `engine` from `onnx_model_folder/onnx_model_filename`.
///
/// When `serialize_to` is given the refitted engine is written there (the
/// standard engine cache path, so later sessions skip the refit).
pub fn refit_engine(
    onnx_model_filename: &Path,
    onnx_model_folder: &Path,
    engine: &Engine,
    path_check: bool,
    serialize_to: Option<&Path>,
    detailed_build_log: bool,
) -> Result<()> {
    let onnx_path = validate_model_path(onnx_model_filename, onnx_model_folder, path_check)?;

    if !supports_weight_stripping() {
        return Err(ProviderError::Config(
            "weight-stripped engine refit requires TensorRT 10.0 or newer".into(),
        ));
    }

    let logger = global_logger(detailed_build_log);
    let refitter = Refitter::new(engine, logger)?;
    let parser_refitter = ParserRefitter::new(&refitter, logger)?;
    parser_refitter.refit_from_file(&onnx_path)?;
    refitter.refit_cuda_engine()?;
    debug!(model = %onnx_path.display(), "refitted weight-stripped engine");

    if let Some(path) = serialize_to {
        let bytes = engine.serialize()?;
        fs::write(path, bytes)?;
        info!(cache = %path.display(), "serialized refitted engine");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_model_path_is_rejected() {
        let err =
            validate_model_path(Path::new("/etc/model.onnx"), Path::new(""), true).unwrap_err();
        assert_eq!(err.error_code(), 101);
    }

    #[test]
    fn parent_traversal_is_rejected() {
        let err =
            validate_model_path(Path::new("../model.onnx"), Path::new("models"), true).unwrap_err();
        assert_eq!(err.error_code(), 101);
    }

    #[test]
    fn missing_model_is_io_error() {
        let err = validate_model_path(Path::new("nope.onnx"), Path::new("models"), true)
            .unwrap_err();
        assert_eq!(err.error_code(), 200);
    }

    #[test]
    fn checks_skipped_when_disabled() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("model.onnx"), b"stub").unwrap();
        // An absolute folder is fine with path_check off (internal refits
        // resolve against provider-owned paths).
        let path =
            validate_model_path(Path::new("model.onnx"), dir.path(), false).unwrap();
        assert!(path.ends_with("model.onnx"));
    }
}
