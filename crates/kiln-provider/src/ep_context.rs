//! EP-context models: one-op ONNX graphs carrying a pre-compiled engine.
//!
//! After a successful build the provider can dump a tiny model whose
//! single `EPContext` node embeds the serialized engine (embed mode 1) or
//! references the engine cache file by relative path (embed mode 0).  A
//! later session that receives such a model skips compilation entirely.
//!
//! Only the handful of ONNX messages involved are modeled, as hand-tagged
//! `prost` structs — the provider never parses full models (the TensorRT
//! ONNX parser does that).

use std::fs;
use std::path::{Path, PathBuf};

use prost::Message;

use kiln_core::error::{ProviderError, Result};

use crate::cache::{check_path_is_relative, check_path_stays_inside};

pub const EP_CONTEXT_OP: &str = "EPContext";
pub const EP_CONTEXT_DOMAIN: &str = "com.microsoft";

const ATTR_TYPE_INT: i32 = 2;
const ATTR_TYPE_STRING: i32 = 3;

// ─── Minimal ONNX protobuf subset ───────────────────────────────────────

#[derive(Clone, PartialEq, Message)]
pub struct ModelProto {
    #[prost(int64, tag = "1")]
    pub ir_version: i64,
    #[prost(string, tag = "2")]
    pub producer_name: String,
    #[prost(message, optional, tag = "7")]
    pub graph: Option<GraphProto>,
    #[prost(message, repeated, tag = "8")]
    pub opset_import: Vec<OperatorSetIdProto>,
}

#[derive(Clone, PartialEq, Message)]
pub struct GraphProto {
    #[prost(message, repeated, tag = "1")]
    pub node: Vec<NodeProto>,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(message, repeated, tag = "11")]
    pub input: Vec<ValueInfoProto>,
    #[prost(message, repeated, tag = "12")]
    pub output: Vec<ValueInfoProto>,
}

#[derive(Clone, PartialEq, Message)]
pub struct NodeProto {
    #[prost(string, repeated, tag = "1")]
    pub input: Vec<String>,
    #[prost(string, repeated, tag = "2")]
    pub output: Vec<String>,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(string, tag = "4")]
    pub op_type: String,
    #[prost(message, repeated, tag = "5")]
    pub attribute: Vec<AttributeProto>,
    #[prost(string, tag = "7")]
    pub domain: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct AttributeProto {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(int64, tag = "3")]
    pub i: i64,
    #[prost(bytes = "vec", tag = "4")]
    pub s: Vec<u8>,
    #[prost(int32, tag = "20")]
    pub r#type: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct ValueInfoProto {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct OperatorSetIdProto {
    #[prost(string, tag = "1")]
    pub domain: String,
    #[prost(int64, tag = "2")]
    pub version: i64,
}

// ─── Emission ───────────────────────────────────────────────────────────

/// What `ep_cache_context` carries.
pub enum EngineRef<'a> {
    /// Embed mode 1: the serialized engine itself.
    Embedded(&'a [u8]),
    /// Embed mode 0: path to the engine cache file, relative to the
    /// context-model directory.
    CachePath(&'a Path),
}

fn int_attr(name: &str, value: i64) -> AttributeProto {
    AttributeProto {
        name: name.to_string(),
        i: value,
        s: Vec::new(),
        r#type: ATTR_TYPE_INT,
    }
}

fn string_attr(name: &str, value: impl Into<Vec<u8>>) -> AttributeProto {
    AttributeProto {
        name: name.to_string(),
        i: 0,
        s: value.into(),
        r#type: ATTR_TYPE_STRING,
    }
}

/// Build the one-op context model for a fused subgraph.
pub fn build_ctx_model(
    node_name: &str,
    inputs: &[String],
    outputs: &[String],
    engine: EngineRef<'_>,
    hardware_architecture: &str,
) -> ModelProto {
    let (embed_mode, payload) = match engine {
        EngineRef::Embedded(bytes) => (1, bytes.to_vec()),
        EngineRef::CachePath(path) => (0, path.to_string_lossy().into_owned().into_bytes()),
    };

    let node = NodeProto {
        input: inputs.to_vec(),
        output: outputs.to_vec(),
        name: node_name.to_string(),
        op_type: EP_CONTEXT_OP.to_string(),
        domain: EP_CONTEXT_DOMAIN.to_string(),
        attribute: vec![
            int_attr("embed_mode", embed_mode),
            string_attr("ep_cache_context", payload),
            string_attr("hardware_architecture", hardware_architecture.as_bytes().to_vec()),
            string_attr("partition_name", node_name.as_bytes().to_vec()),
        ],
    };

    ModelProto {
        ir_version: 10,
        producer_name: "kiln".to_string(),
        graph: Some(GraphProto {
            node: vec![node],
            name: node_name.to_string(),
            input: inputs
                .iter()
                .map(|name| ValueInfoProto { name: name.clone() })
                .collect(),
            output: outputs
                .iter()
                .map(|name| ValueInfoProto { name: name.clone() })
                .collect(),
        }),
        opset_import: vec![OperatorSetIdProto {
            domain: EP_CONTEXT_DOMAIN.to_string(),
            version: 1,
        }],
    }
}

/// Where the context model is written: the configured path, or the source
/// model's stem with `_ctx.onnx` appended.
pub fn ctx_model_path(ep_context_file_path: &str, model_path: &Path) -> PathBuf {
    if !ep_context_file_path.is_empty() {
        return PathBuf::from(ep_context_file_path);
    }
    let stem = model_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "model".to_string());
    model_path.with_file_name(format!("{stem}_ctx.onnx"))
}

/// Serialize and write a context model.
pub fn dump_ctx_model(model: &ModelProto, path: &Path) -> Result<()> {
    fs::write(path, model.encode_to_vec())?;
    Ok(())
}

// ─── Loading ────────────────────────────────────────────────────────────

/// The EPContext node recovered from an incoming subgraph.
#[derive(Clone, Debug)]
pub struct ParsedEpContext {
    pub embed_mode: i64,
    pub payload: Vec<u8>,
    pub hardware_architecture: String,
}

/// Detect and decode an `EPContext` node in serialized ONNX bytes.
/// Returns `Ok(None)` for ordinary subgraphs (including undecodable bytes,
/// which the TensorRT parser will diagnose on the normal compile path).
pub fn parse_ctx_node(onnx: &[u8]) -> Option<ParsedEpContext> {
    let model = ModelProto::decode(onnx).ok()?;
    let node = model
        .graph?
        .node
        .into_iter()
        .find(|n| n.op_type == EP_CONTEXT_OP)?;

    let mut embed_mode = 0;
    let mut payload = Vec::new();
    let mut hardware_architecture = String::new();
    for attr in node.attribute {
        match attr.name.as_str() {
            "embed_mode" => embed_mode = attr.i,
            "ep_cache_context" => payload = attr.s,
            "hardware_architecture" => {
                hardware_architecture = String::from_utf8_lossy(&attr.s).into_owned();
            }
            _ => {}
        }
    }
    Some(ParsedEpContext {
        embed_mode,
        payload,
        hardware_architecture,
    })
}

/// Resolve the serialized engine bytes from a parsed EPContext node.  In
/// embed mode 0 the payload is a relative, `..`-free path resolved against
/// the context model's directory.
pub fn load_engine_payload(ctx: &ParsedEpContext, model_dir: &Path) -> Result<Vec<u8>> {
    if ctx.embed_mode != 0 {
        if ctx.payload.is_empty() {
            return Err(ProviderError::CacheFormat(
                "EPContext node has embed_mode=1 but carries no engine bytes".into(),
            ));
        }
        return Ok(ctx.payload.clone());
    }

    let rel = PathBuf::from(String::from_utf8_lossy(&ctx.payload).into_owned());
    check_path_is_relative(&rel)?;
    check_path_stays_inside(&rel)?;
    let full = model_dir.join(rel);
    if !full.exists() {
        return Err(ProviderError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("engine cache referenced by EPContext model not found: {}", full.display()),
        )));
    }
    Ok(fs::read(full)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn io_names() -> (Vec<String>, Vec<String>) {
        (vec!["x".to_string()], vec!["y".to_string()])
    }

    #[test]
    fn embedded_model_roundtrips() {
        let (inputs, outputs) = io_names();
        let engine = vec![0xAAu8; 64];
        let model = build_ctx_model("fused_0", &inputs, &outputs, EngineRef::Embedded(&engine), "86");

        let parsed = parse_ctx_node(&model.encode_to_vec()).expect("EPContext node");
        assert_eq!(parsed.embed_mode, 1);
        assert_eq!(parsed.hardware_architecture, "86");
        let payload = load_engine_payload(&parsed, Path::new("/irrelevant")).unwrap();
        assert_eq!(payload, engine);
    }

    #[test]
    fn path_model_reads_engine_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let engine_bytes = vec![0x42u8; 16];
        fs::write(dir.path().join("fused_0_sm86.engine"), &engine_bytes).unwrap();

        let (inputs, outputs) = io_names();
        let model = build_ctx_model(
            "fused_0",
            &inputs,
            &outputs,
            EngineRef::CachePath(Path::new("fused_0_sm86.engine")),
            "86",
        );

        let parsed = parse_ctx_node(&model.encode_to_vec()).unwrap();
        assert_eq!(parsed.embed_mode, 0);
        let payload = load_engine_payload(&parsed, dir.path()).unwrap();
        assert_eq!(payload, engine_bytes);
    }

    #[test]
    fn path_model_rejects_escaping_paths() {
        let (inputs, outputs) = io_names();
        for bad in ["../outside.engine", "/abs/path.engine"] {
            let model = build_ctx_model(
                "fused_0",
                &inputs,
                &outputs,
                EngineRef::CachePath(Path::new(bad)),
                "86",
            );
            let parsed = parse_ctx_node(&model.encode_to_vec()).unwrap();
            let err = load_engine_payload(&parsed, Path::new("/tmp")).unwrap_err();
            assert_eq!(err.error_code(), 101, "path {bad} should be rejected");
        }
    }

    #[test]
    fn ordinary_graphs_have_no_ctx_node() {
        assert!(parse_ctx_node(b"definitely not protobuf").is_none());

        let (inputs, outputs) = io_names();
        let mut model = build_ctx_model("n", &inputs, &outputs, EngineRef::Embedded(&[1]), "86");
        if let Some(graph) = model.graph.as_mut() {
            graph.node[0].op_type = "Gemm".to_string();
        }
        assert!(parse_ctx_node(&model.encode_to_vec()).is_none());
    }

    #[test]
    fn ctx_model_path_defaults_to_model_stem() {
        assert_eq!(
            ctx_model_path("", Path::new("models/resnet.onnx")),
            PathBuf::from("models/resnet_ctx.onnx")
        );
        assert_eq!(
            ctx_model_path("custom/ctx.onnx", Path::new("models/resnet.onnx")),
            PathBuf::from("custom/ctx.onnx")
        );
    }

    #[test]
    fn dump_writes_decodable_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fused_ctx.onnx");
        let (inputs, outputs) = io_names();
        let model = build_ctx_model("fused", &inputs, &outputs, EngineRef::Embedded(&[7, 7]), "80+");
        dump_ctx_model(&model, &path).unwrap();

        let bytes = fs::read(&path).unwrap();
        let parsed = parse_ctx_node(&bytes).unwrap();
        assert_eq!(parsed.payload, vec![7, 7]);
        assert_eq!(parsed.hardware_architecture, "80+");
    }
}
