//! Provider options parsed from the host runtime's key/value pairs.
//!
//! The host hands an execution-provider factory a flat list of string
//! options.  [`ProviderOptions::from_pairs`] turns those into typed fields
//! with defaults; [`ProviderOptions::validate`] rejects inconsistent
//! combinations up front so compile-time code can assume a sane snapshot.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::warn;

use crate::error::{ProviderError, Result};

/// Per-input profile shapes: input name → one shape vector per profile.
pub type ShapeMap = HashMap<String, Vec<Vec<i64>>>;

/// Engine cache encryption hooks.  The decrypt side is required when
/// `engine_decryption_enable` is set; the encrypt side is optional (the
/// library is not always deployed with it).
#[derive(Clone)]
pub struct EngineCrypto {
    /// Read and decrypt the engine at `path` into plaintext bytes.
    pub decrypt: Arc<dyn Fn(&Path) -> Result<Vec<u8>> + Send + Sync>,
    /// Encrypt `plaintext` and write it to `path`.
    pub encrypt: Option<Arc<dyn Fn(&Path, &[u8]) -> Result<()> + Send + Sync>>,
}

impl std::fmt::Debug for EngineCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineCrypto")
            .field("encrypt", &self.encrypt.is_some())
            .finish()
    }
}

/// One entry of the tactic-source filter, e.g. `+CUBLAS` or `-CUDNN`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TacticSourceSpec {
    pub enable: bool,
    pub name: String,
}

/// Typed snapshot of every option the provider recognizes.
#[derive(Clone, Debug)]
pub struct ProviderOptions {
    pub device_id: i32,

    // Precision
    pub fp16_enable: bool,
    pub int8_enable: bool,
    pub int8_calibration_cache_name: String,
    pub int8_use_native_calibration_table: bool,
    pub layer_norm_fp32_fallback: bool,

    // DLA
    pub dla_enable: bool,
    pub dla_core: i32,

    // Builder
    pub max_workspace_size: usize,
    pub sparsity_enable: bool,
    pub builder_optimization_level: i32,
    pub auxiliary_streams: i32,
    pub tactic_sources: Vec<TacticSourceSpec>,
    pub weight_stripped_engine_enable: bool,
    pub onnx_model_folder_path: String,

    // Engine cache
    pub engine_cache_enable: bool,
    pub engine_hw_compatible: bool,
    pub cache_path: String,
    pub cache_prefix: String,
    pub engine_decryption_enable: bool,
    pub crypto: Option<EngineCrypto>,

    // Timing cache
    pub timing_cache_enable: bool,
    pub timing_cache_path: String,
    pub force_timing_cache_match: bool,

    // EP-context model
    pub dump_ep_context_model: bool,
    pub ep_context_file_path: String,
    pub ep_context_embed_mode: i32,

    // Execution
    pub context_memory_sharing_enable: bool,
    pub cuda_graph_enable: bool,
    pub sync_stream_after_enqueue: bool,
    pub detailed_build_log: bool,

    // Explicit optimization profiles
    pub profile_min_shapes: ShapeMap,
    pub profile_max_shapes: ShapeMap,
    pub profile_opt_shapes: ShapeMap,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            device_id: 0,
            fp16_enable: false,
            int8_enable: false,
            int8_calibration_cache_name: String::new(),
            int8_use_native_calibration_table: false,
            layer_norm_fp32_fallback: false,
            dla_enable: false,
            dla_core: 0,
            max_workspace_size: 1 << 30,
            sparsity_enable: false,
            builder_optimization_level: 3,
            auxiliary_streams: -1,
            tactic_sources: Vec::new(),
            weight_stripped_engine_enable: false,
            onnx_model_folder_path: String::new(),
            engine_cache_enable: false,
            engine_hw_compatible: false,
            cache_path: String::new(),
            cache_prefix: String::new(),
            engine_decryption_enable: false,
            crypto: None,
            timing_cache_enable: false,
            timing_cache_path: String::new(),
            force_timing_cache_match: false,
            dump_ep_context_model: false,
            ep_context_file_path: String::new(),
            ep_context_embed_mode: 0,
            context_memory_sharing_enable: false,
            cuda_graph_enable: false,
            sync_stream_after_enqueue: true,
            detailed_build_log: false,
            profile_min_shapes: ShapeMap::new(),
            profile_max_shapes: ShapeMap::new(),
            profile_opt_shapes: ShapeMap::new(),
        }
    }
}

impl ProviderOptions {
    /// Parse from the host's flat key/value option list.  Unknown keys are
    /// logged and ignored so newer hosts can pass options an older provider
    /// doesn't know.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut opts = Self::default();
        for (key, value) in pairs {
            match key {
                "device_id" => opts.device_id = parse_int(key, value)?,
                "fp16_enable" => opts.fp16_enable = parse_bool(key, value)?,
                "int8_enable" => opts.int8_enable = parse_bool(key, value)?,
                "int8_calibration_cache_name" => {
                    opts.int8_calibration_cache_name = value.to_string();
                }
                "int8_use_native_calibration_table" => {
                    opts.int8_use_native_calibration_table = parse_bool(key, value)?;
                }
                "layer_norm_fp32_fallback" => {
                    opts.layer_norm_fp32_fallback = parse_bool(key, value)?;
                }
                "dla_enable" => opts.dla_enable = parse_bool(key, value)?,
                "dla_core" => opts.dla_core = parse_int(key, value)?,
                "max_workspace_size" => {
                    opts.max_workspace_size = parse_int::<u64>(key, value)? as usize;
                }
                "sparsity_enable" => opts.sparsity_enable = parse_bool(key, value)?,
                "builder_optimization_level" => {
                    opts.builder_optimization_level = parse_int(key, value)?;
                }
                "auxiliary_streams" => opts.auxiliary_streams = parse_int(key, value)?,
                "tactic_sources" => opts.tactic_sources = parse_tactic_sources(value)?,
                "weight_stripped_engine_enable" => {
                    opts.weight_stripped_engine_enable = parse_bool(key, value)?;
                }
                "onnx_model_folder_path" => opts.onnx_model_folder_path = value.to_string(),
                "engine_cache_enable" => opts.engine_cache_enable = parse_bool(key, value)?,
                "engine_hw_compatible" => opts.engine_hw_compatible = parse_bool(key, value)?,
                "cache_path" => opts.cache_path = value.to_string(),
                "cache_prefix" => opts.cache_prefix = value.to_string(),
                "engine_decryption_enable" => {
                    opts.engine_decryption_enable = parse_bool(key, value)?;
                }
                "timing_cache_enable" => opts.timing_cache_enable = parse_bool(key, value)?,
                "timing_cache_path" => opts.timing_cache_path = value.to_string(),
                "force_timing_cache_match" => {
                    opts.force_timing_cache_match = parse_bool(key, value)?;
                }
                "dump_ep_context_model" => opts.dump_ep_context_model = parse_bool(key, value)?,
                "ep_context_file_path" => opts.ep_context_file_path = value.to_string(),
                "ep_context_embed_mode" => opts.ep_context_embed_mode = parse_int(key, value)?,
                "context_memory_sharing_enable" => {
                    opts.context_memory_sharing_enable = parse_bool(key, value)?;
                }
                "cuda_graph_enable" => opts.cuda_graph_enable = parse_bool(key, value)?,
                "sync_stream_after_enqueue" => {
                    opts.sync_stream_after_enqueue = parse_bool(key, value)?;
                }
                "detailed_build_log" => opts.detailed_build_log = parse_bool(key, value)?,
                "profile_min_shapes" => opts.profile_min_shapes = parse_shape_map(key, value)?,
                "profile_max_shapes" => opts.profile_max_shapes = parse_shape_map(key, value)?,
                "profile_opt_shapes" => opts.profile_opt_shapes = parse_shape_map(key, value)?,
                other => warn!(key = other, "ignoring unrecognized provider option"),
            }
        }
        opts.validate()?;
        Ok(opts)
    }

    /// Reject inconsistent option combinations.
    pub fn validate(&self) -> Result<()> {
        if self.dla_enable && !self.fp16_enable && !self.int8_enable {
            return Err(ProviderError::Config(
                "dla_enable requires fp16_enable or int8_enable (DLA runs FP16/INT8 only)".into(),
            ));
        }
        if !(0..=1).contains(&self.ep_context_embed_mode) {
            return Err(ProviderError::Config(format!(
                "ep_context_embed_mode must be 0 (path) or 1 (embedded), got {}",
                self.ep_context_embed_mode
            )));
        }
        if self.dla_core < 0 {
            return Err(ProviderError::Config(format!(
                "dla_core must be non-negative, got {}",
                self.dla_core
            )));
        }
        self.validate_profile_maps()?;
        Ok(())
    }

    /// Whether the user supplied explicit optimization profiles at all.
    pub fn has_explicit_profiles(&self) -> bool {
        !self.profile_min_shapes.is_empty()
            && !self.profile_max_shapes.is_empty()
            && !self.profile_opt_shapes.is_empty()
    }

    /// Number of explicit profiles (all inputs carry the same count once
    /// validated).
    pub fn num_explicit_profiles(&self) -> usize {
        self.profile_min_shapes
            .values()
            .map(Vec::len)
            .max()
            .unwrap_or(0)
    }

    fn validate_profile_maps(&self) -> Result<()> {
        let any = !self.profile_min_shapes.is_empty()
            || !self.profile_max_shapes.is_empty()
            || !self.profile_opt_shapes.is_empty();
        if !any {
            return Ok(());
        }
        if !self.has_explicit_profiles() {
            return Err(ProviderError::Config(
                "profile_min_shapes, profile_max_shapes, and profile_opt_shapes must all be set \
                 when any of them is"
                    .into(),
            ));
        }
        for (name, mins) in &self.profile_min_shapes {
            let maxs = self.profile_max_shapes.get(name).ok_or_else(|| {
                ProviderError::Config(format!("profile_max_shapes missing input '{name}'"))
            })?;
            let opts = self.profile_opt_shapes.get(name).ok_or_else(|| {
                ProviderError::Config(format!("profile_opt_shapes missing input '{name}'"))
            })?;
            if mins.len() != maxs.len() || mins.len() != opts.len() {
                return Err(ProviderError::Config(format!(
                    "input '{name}' has {} min, {} max, {} opt profiles; counts must match",
                    mins.len(),
                    maxs.len(),
                    opts.len()
                )));
            }
            for (i, min) in mins.iter().enumerate() {
                if min.len() != maxs[i].len() || min.len() != opts[i].len() {
                    return Err(ProviderError::Config(format!(
                        "input '{name}' profile {i} has mismatched ranks across min/max/opt"
                    )));
                }
            }
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "1" | "true" | "True" => Ok(true),
        "0" | "false" | "False" => Ok(false),
        other => Err(ProviderError::Config(format!(
            "option '{key}' expects a boolean, got '{other}'"
        ))),
    }
}

fn parse_int<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        ProviderError::Config(format!("option '{key}' expects an integer, got '{value}'"))
    })
}

/// Parse `"+CUBLAS,-CUDNN"` style tactic-source filters.
fn parse_tactic_sources(value: &str) -> Result<Vec<TacticSourceSpec>> {
    let mut specs = Vec::new();
    for item in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (enable, name) = match item.split_at(1) {
            ("+", rest) => (true, rest),
            ("-", rest) => (false, rest),
            _ => (true, item),
        };
        if name.is_empty() {
            return Err(ProviderError::Config(format!(
                "tactic_sources entry '{item}' has no source name"
            )));
        }
        specs.push(TacticSourceSpec {
            enable,
            name: name.to_ascii_uppercase(),
        });
    }
    Ok(specs)
}

/// Parse `"input_a:1x3x224x224,input_b:1x1"`.  Repeating an input name adds
/// another profile for it.
fn parse_shape_map(key: &str, value: &str) -> Result<ShapeMap> {
    let mut map = ShapeMap::new();
    for entry in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (name, dims_str) = entry.split_once(':').ok_or_else(|| {
            ProviderError::Config(format!(
                "option '{key}' entry '{entry}' is not of the form name:AxBxC"
            ))
        })?;
        let dims = dims_str
            .split('x')
            .map(|d| {
                d.trim().parse::<i64>().map_err(|_| {
                    ProviderError::Config(format!(
                        "option '{key}' entry '{entry}' has non-integer dimension '{d}'"
                    ))
                })
            })
            .collect::<Result<Vec<i64>>>()?;
        if dims.iter().any(|&d| d < 0) {
            return Err(ProviderError::Config(format!(
                "option '{key}' entry '{entry}' has a negative dimension; profile shapes \
                 must be concrete"
            )));
        }
        map.entry(name.to_string()).or_default().push(dims);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let opts = ProviderOptions::default();
        assert_eq!(opts.max_workspace_size, 1 << 30);
        assert_eq!(opts.builder_optimization_level, 3);
        assert_eq!(opts.auxiliary_streams, -1);
        assert!(opts.sync_stream_after_enqueue);
        assert!(!opts.has_explicit_profiles());
    }

    #[test]
    fn parses_typed_options() {
        let opts = ProviderOptions::from_pairs([
            ("fp16_enable", "1"),
            ("engine_cache_enable", "true"),
            ("cache_path", "/tmp/trt"),
            ("builder_optimization_level", "5"),
            ("auxiliary_streams", "2"),
            ("max_workspace_size", "2147483648"),
        ])
        .unwrap();
        assert!(opts.fp16_enable);
        assert!(opts.engine_cache_enable);
        assert_eq!(opts.cache_path, "/tmp/trt");
        assert_eq!(opts.builder_optimization_level, 5);
        assert_eq!(opts.auxiliary_streams, 2);
        assert_eq!(opts.max_workspace_size, 2 << 30);
    }

    #[test]
    fn rejects_dla_without_low_precision() {
        let err = ProviderOptions::from_pairs([("dla_enable", "1")]).unwrap_err();
        assert!(err.to_string().contains("dla_enable"));
    }

    #[test]
    fn rejects_bad_boolean() {
        assert!(ProviderOptions::from_pairs([("fp16_enable", "maybe")]).is_err());
    }

    #[test]
    fn shape_map_supports_multiple_profiles() {
        let opts = ProviderOptions::from_pairs([
            ("profile_min_shapes", "x:1x3x224x224,x:1x3x64x64,y:1"),
            ("profile_max_shapes", "x:8x3x224x224,x:4x3x64x64,y:16"),
            ("profile_opt_shapes", "x:4x3x224x224,x:2x3x64x64,y:8"),
        ])
        .unwrap();
        assert_eq!(opts.profile_min_shapes["x"].len(), 2);
        assert_eq!(opts.profile_min_shapes["x"][0], vec![1, 3, 224, 224]);
        assert_eq!(opts.profile_min_shapes["y"], vec![vec![1]]);
        assert_eq!(opts.num_explicit_profiles(), 2);
    }

    #[test]
    fn rejects_partial_profile_maps() {
        let err = ProviderOptions::from_pairs([("profile_min_shapes", "x:1x3")]).unwrap_err();
        assert!(err.to_string().contains("must all be set"));

        let err = ProviderOptions::from_pairs([
            ("profile_min_shapes", "x:1x3"),
            ("profile_max_shapes", "x:4x3,x:8x3"),
            ("profile_opt_shapes", "x:2x3"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("counts must match"));
    }

    #[test]
    fn tactic_sources_parse_signs() {
        let specs = parse_tactic_sources("+CUBLAS, -cudnn,CUBLAS_LT").unwrap();
        assert_eq!(
            specs,
            vec![
                TacticSourceSpec { enable: true, name: "CUBLAS".into() },
                TacticSourceSpec { enable: false, name: "CUDNN".into() },
                TacticSourceSpec { enable: true, name: "CUBLAS_LT".into() },
            ]
        );
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let opts = ProviderOptions::from_pairs([("no_such_option", "1")]).unwrap();
        assert!(!opts.fp16_enable);
    }
}
