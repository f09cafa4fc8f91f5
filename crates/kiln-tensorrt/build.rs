#![allow(missing_docs)]
//! Build script — locate TensorRT and the kiln C shim bridge.
//!
//! Search order for the TensorRT libraries (`nvinfer`, `nvonnxparser`) and
//! the bridge (`kiln_trt_shim`):
//!   1. TENSORRT_ROOT env var (lib/ under it)
//!   2. /usr/lib/x86_64-linux-gnu and /usr/local/tensorrt/lib
//!
//! When nothing is found the crate builds in stub mode
//! (`cargo:rustc-cfg=kiln_trt_stub`): every `trt_*` symbol resolves to a
//! no-op returning null/0, and GPU-dependent tests stay `#[ignore]`d.

use std::env;
use std::path::PathBuf;

fn candidate_lib_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(root) = env::var("TENSORRT_ROOT") {
        let root = PathBuf::from(root);
        dirs.push(root.join("lib"));
        dirs.push(root);
    }
    if cfg!(target_os = "linux") {
        dirs.push(PathBuf::from("/usr/lib/x86_64-linux-gnu"));
        dirs.push(PathBuf::from("/usr/local/tensorrt/lib"));
    }
    dirs
}

fn find_tensorrt() -> Option<PathBuf> {
    let names = if cfg!(target_os = "windows") {
        ["nvinfer.lib", "nvinfer_10.lib"]
    } else {
        ["libnvinfer.so", "libnvinfer.so.10"]
    };
    candidate_lib_dirs()
        .into_iter()
        .find(|dir| names.iter().any(|name| dir.join(name).exists()))
}

fn main() {
    println!("cargo:rustc-check-cfg=cfg(kiln_trt_stub)");
    println!("cargo:rerun-if-env-changed=TENSORRT_ROOT");
    println!("cargo:rerun-if-changed=build.rs");

    if env::var_os("DOCS_RS").is_some() {
        println!("cargo:warning=DOCS_RS detected; building kiln-tensorrt in stub mode");
        println!("cargo:rustc-cfg=kiln_trt_stub");
        return;
    }

    let Some(lib_dir) = find_tensorrt() else {
        println!(
            "cargo:warning=TensorRT not found (TENSORRT_ROOT unset and no system libnvinfer); \
             building kiln-tensorrt in stub mode"
        );
        println!("cargo:rustc-cfg=kiln_trt_stub");
        return;
    };

    println!("cargo:rustc-link-search=native={}", lib_dir.display());
    println!("cargo:rustc-link-lib=dylib=nvinfer");
    println!("cargo:rustc-link-lib=dylib=nvonnxparser");
    println!("cargo:rustc-link-lib=dylib=kiln_trt_shim");
}
