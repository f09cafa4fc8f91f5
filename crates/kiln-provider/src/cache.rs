//! Cache path naming and path-security checks.
//!
//! Engine caches are named after the fused node, its precision tags, and
//! the GPU compute capability, so a cache produced under one configuration
//! is never picked up by another.  All functions here are pure.

use std::path::{Component, Path, PathBuf};

use kiln_core::error::{ProviderError, Result};

/// Join the cache directory and a file stem; an empty directory means the
/// working directory.
pub fn cache_path(root: &str, name: &str) -> PathBuf {
    if root.is_empty() {
        PathBuf::from(name)
    } else {
        Path::new(root).join(name)
    }
}

/// Append the precision tags the engine was built with:
/// `_fp16`, `_int8`, `_fp16_int8`, and `_dlacore<N>` when DLA is applied.
pub fn name_with_precision(
    node_name: &str,
    fp16: bool,
    int8: bool,
    dla_core: Option<i32>,
) -> String {
    let mut name = node_name.to_string();
    match (fp16, int8) {
        (true, true) => name.push_str("_fp16_int8"),
        (true, false) => name.push_str("_fp16"),
        (false, true) => name.push_str("_int8"),
        (false, false) => {}
    }
    if let Some(core) = dla_core {
        name.push_str(&format!("_dlacore{core}"));
    }
    name
}

/// Hardware tag appended to every cache name: `_sm<cc>`, or `_sm80+` when
/// the engine is built hardware-compatible (Ampere and newer).
pub fn hardware_tag(compute_capability: &str, hw_compatible: bool) -> String {
    if hw_compatible {
        "_sm80+".to_string()
    } else {
        format!("_sm{compute_capability}")
    }
}

/// Stable suffix used when the user configures a custom cache prefix, so
/// distinct fused nodes sharing that prefix still get distinct files.
/// FNV-1a over the precision-annotated node name.
pub fn cache_suffix(node_name: &str, name_with_precision: &str) -> String {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = FNV_OFFSET;
    for byte in node_name.bytes().chain(name_with_precision.bytes()) {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    format!("_{hash:016x}")
}

/// The full family of on-disk artifacts for one fused node.
#[derive(Clone, Debug)]
pub struct CachePaths {
    /// `<prefix><hw_tag>` — stem every artifact derives from.
    pub prefix: PathBuf,
    /// `<prefix>.engine` — raw serialized engine.
    pub engine: PathBuf,
    /// `<prefix>.engine.encrypted` — encrypted serialized engine.
    pub encrypted: PathBuf,
    /// `<prefix>.profile` — serialized shape-range store.
    pub profile: PathBuf,
    /// `<prefix>.stripped.engine` — weight-stripped engine awaiting refit.
    pub stripped: PathBuf,
    /// `<dir>/timing_sm<cc>.cache` — shared TensorRT timing cache.
    pub timing: PathBuf,
}

impl CachePaths {
    /// Assemble the artifact family.  When `cache_prefix` is set the file
    /// stem is `<cache_prefix><suffix>` (suffix hashed from the node name);
    /// otherwise it is the precision-annotated node name.
    pub fn new(
        cache_dir: &str,
        cache_prefix: &str,
        timing_dir: &str,
        node_name: &str,
        name_with_precision: &str,
        compute_capability: &str,
        hw_compatible: bool,
    ) -> Self {
        let stem = if cache_prefix.is_empty() {
            cache_path(cache_dir, name_with_precision)
        } else {
            let suffix = cache_suffix(node_name, name_with_precision);
            let mut p = cache_path(cache_dir, cache_prefix);
            p.as_mut_os_string().push(&suffix);
            p
        };
        let mut prefix = stem;
        prefix
            .as_mut_os_string()
            .push(hardware_tag(compute_capability, hw_compatible));

        let with_ext = |ext: &str| {
            let mut p = prefix.clone();
            p.as_mut_os_string().push(ext);
            p
        };
        let timing_root = if timing_dir.is_empty() { cache_dir } else { timing_dir };
        Self {
            engine: with_ext(".engine"),
            encrypted: with_ext(".engine.encrypted"),
            profile: with_ext(".profile"),
            stripped: with_ext(".stripped.engine"),
            timing: cache_path(timing_root, &format!("timing_sm{compute_capability}.cache")),
            prefix,
        }
    }
}

/// Reject absolute caller-supplied ONNX model references.
pub fn check_path_is_relative(path: &Path) -> Result<()> {
    if path.is_absolute() {
        return Err(ProviderError::Security(format!(
            "the ONNX model path must be relative, but it is absolute: {}",
            path.display()
        )));
    }
    Ok(())
}

/// Reject caller-supplied paths that climb above their parent.
pub fn check_path_stays_inside(path: &Path) -> Result<()> {
    if path.components().any(|c| c == Component::ParentDir) {
        return Err(ProviderError::Security(format!(
            "the ONNX model path contains '..' and may point outside its directory: {}",
            path.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precision_tags() {
        assert_eq!(name_with_precision("node", false, false, None), "node");
        assert_eq!(name_with_precision("node", true, false, None), "node_fp16");
        assert_eq!(name_with_precision("node", false, true, None), "node_int8");
        assert_eq!(name_with_precision("node", true, true, None), "node_fp16_int8");
        assert_eq!(
            name_with_precision("node", true, false, Some(1)),
            "node_fp16_dlacore1"
        );
    }

    #[test]
    fn hardware_tags() {
        assert_eq!(hardware_tag("86", false), "_sm86");
        assert_eq!(hardware_tag("86", true), "_sm80+");
    }

    #[test]
    fn artifact_family_names() {
        let paths = CachePaths::new("/tmp/cache", "", "", "node", "node_fp16", "86", false);
        assert_eq!(paths.engine, PathBuf::from("/tmp/cache/node_fp16_sm86.engine"));
        assert_eq!(
            paths.encrypted,
            PathBuf::from("/tmp/cache/node_fp16_sm86.engine.encrypted")
        );
        assert_eq!(paths.profile, PathBuf::from("/tmp/cache/node_fp16_sm86.profile"));
        assert_eq!(
            paths.stripped,
            PathBuf::from("/tmp/cache/node_fp16_sm86.stripped.engine")
        );
        assert_eq!(paths.timing, PathBuf::from("/tmp/cache/timing_sm86.cache"));
    }

    #[test]
    fn custom_prefix_gets_hashed_suffix() {
        let a = CachePaths::new("", "shared", "", "node_a", "node_a_fp16", "80", false);
        let b = CachePaths::new("", "shared", "", "node_b", "node_b_fp16", "80", false);
        assert_ne!(a.engine, b.engine);
        assert!(a.engine.to_string_lossy().starts_with("shared_"));
    }

    #[test]
    fn hw_compat_changes_tag_only() {
        let paths = CachePaths::new("", "", "", "n", "n", "89", true);
        assert_eq!(paths.engine, PathBuf::from("n_sm80+.engine"));
        // The timing cache stays per-capability.
        assert_eq!(paths.timing, PathBuf::from("timing_sm89.cache"));
    }

    #[test]
    fn timing_cache_honors_dedicated_dir() {
        let paths = CachePaths::new("/tmp/cache", "", "/var/timing", "n", "n", "86", false);
        assert_eq!(paths.timing, PathBuf::from("/var/timing/timing_sm86.cache"));
    }

    #[test]
    fn cache_suffix_is_stable_and_distinct() {
        let a = cache_suffix("node_a", "node_a_fp16");
        assert_eq!(a, cache_suffix("node_a", "node_a_fp16"));
        assert_ne!(a, cache_suffix("node_b", "node_b_fp16"));
        assert_eq!(a.len(), 17);
    }

    #[test]
    fn security_checks() {
        assert!(check_path_is_relative(Path::new("models/net.onnx")).is_ok());
        assert!(check_path_is_relative(Path::new("/etc/net.onnx")).is_err());
        assert!(check_path_stays_inside(Path::new("models/net.onnx")).is_ok());
        assert!(check_path_stays_inside(Path::new("../net.onnx")).is_err());
        assert!(check_path_stays_inside(Path::new("models/../../net.onnx")).is_err());
    }
}
