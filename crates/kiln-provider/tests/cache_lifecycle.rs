//! On-disk cache lifecycle: naming, the engine↔profile pair rule, and the
//! rebuild decision against cached explicit profiles.

use std::fs;

use kiln_provider::cache::CachePaths;
use kiln_provider::profile::{ShapeRangeStore, profiles_diverge};

fn shape_map(entries: &[(&str, Vec<Vec<i64>>)]) -> kiln_core::config::ShapeMap {
    entries
        .iter()
        .map(|(name, profiles)| (name.to_string(), profiles.clone()))
        .collect()
}

#[test]
fn artifact_family_lives_under_the_cache_dir() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_string_lossy().into_owned();
    let paths = CachePaths::new(&root, "", "", "fused_0", "fused_0_fp16", "86", false);

    for path in [&paths.engine, &paths.profile, &paths.stripped, &paths.timing] {
        assert!(path.starts_with(dir.path()), "{} escapes the cache dir", path.display());
    }
    assert!(paths.engine.to_string_lossy().ends_with("fused_0_fp16_sm86.engine"));
}

#[test]
fn profile_cache_written_and_reloaded_next_to_engine() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_string_lossy().into_owned();
    let paths = CachePaths::new(&root, "", "", "fused_0", "fused_0", "86", false);

    let mut store = ShapeRangeStore::new();
    store.record_explicit("x", 0, 0, 1, [1, 8, 4]);
    store.save(&paths.profile).unwrap();
    fs::write(&paths.engine, b"serialized engine bytes").unwrap();

    // Both halves of the pair are present and the profile matches.
    assert!(paths.engine.exists() && paths.profile.exists());
    let cached = ShapeRangeStore::load(&paths.profile).unwrap();
    assert_eq!(cached, store);
}

#[test]
fn profile_mismatch_decides_rebuild() {
    // The cached engine was built for max=16/opt=8; this session requests
    // max=8/opt=4.  The cached pair must be rejected.
    let dir = tempfile::tempdir().unwrap();
    let profile_path = dir.path().join("fused_0_sm86.profile");

    let mut cached = ShapeRangeStore::new();
    cached.record_explicit("x", 0, 0, 1, [1, 16, 8]);
    cached.save(&profile_path).unwrap();

    let reloaded = ShapeRangeStore::load(&profile_path).unwrap();
    let min = shape_map(&[("x", vec![vec![1, 128]])]);
    let max = shape_map(&[("x", vec![vec![8, 128]])]);
    let opt = shape_map(&[("x", vec![vec![4, 128]])]);
    assert!(profiles_diverge(&reloaded, &min, &max, &opt));

    // Matching request: the cached engine may be reused.
    let max_ok = shape_map(&[("x", vec![vec![16, 128]])]);
    let opt_ok = shape_map(&[("x", vec![vec![8, 128]])]);
    assert!(!profiles_diverge(&reloaded, &min, &max_ok, &opt_ok));
}

#[test]
fn corrupt_profile_cache_reads_as_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let profile_path = dir.path().join("fused_0_sm86.profile");
    fs::write(&profile_path, b"\x00\x01 garbage").unwrap();
    assert!(ShapeRangeStore::load(&profile_path).is_err());
}

#[test]
fn stripped_engine_name_is_distinct_from_refitted() {
    let paths = CachePaths::new("", "", "", "n", "n", "90", false);
    assert_ne!(paths.engine, paths.stripped);
    assert!(paths.stripped.to_string_lossy().ends_with(".stripped.engine"));
}
