//! The shape-range store: per-input, per-dimension (min, max, opt) triples
//! driving TensorRT optimization profiles.
//!
//! Two populations feed it.  *Explicit* profiles come from provider
//! options and are fixed at compile time; one triple per profile index.
//! *Implicit* entries are seeded with a sentinel and folded from observed
//! input shapes at inference time — any change means the engine no longer
//! covers the observed range and must be rebuilt.
//!
//! The store serializes to the `.profile` cache file (v2, versioned JSON)
//! written next to every engine cache; a reader that finds a cached
//! profile diverging from the requested one rebuilds.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use kiln_core::config::ShapeMap;
use kiln_core::error::{ProviderError, Result};

/// `[min, max, opt]`, in the order the store persists them.
pub type ProfileTriple = [i64; 3];

/// Sentinel seeded for a dynamic dimension before any shape is observed:
/// `min` starts at the top so the first fold always narrows it, and
/// `max`/`opt` start at the bottom so the first fold always raises them.
pub const SENTINEL: ProfileTriple = [i32::MAX as i64, i32::MIN as i64, i32::MIN as i64];

const PROFILE_CACHE_VERSION: u32 = 2;

/// input name → (dimension index → one triple per profile).
///
/// For a shape tensor the "dimension index" is the index into the tensor's
/// *values*, which participate in shape inference.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeRangeStore {
    ranges: BTreeMap<String, BTreeMap<usize, Vec<ProfileTriple>>>,
}

impl ShapeRangeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn contains_input(&self, input: &str) -> bool {
        self.ranges.contains_key(input)
    }

    /// Input names still lacking profiles, for the partial-explicit-profile
    /// error message.
    pub fn input_names(&self) -> Vec<&str> {
        self.ranges.keys().map(String::as_str).collect()
    }

    pub fn input(&self, input: &str) -> Option<&BTreeMap<usize, Vec<ProfileTriple>>> {
        self.ranges.get(input)
    }

    /// Seed one dynamic dimension with the sentinel (single implicit
    /// profile).
    pub fn seed_implicit(&mut self, input: &str, dim: usize) {
        self.ranges
            .entry(input.to_string())
            .or_default()
            .insert(dim, vec![SENTINEL]);
    }

    /// Record an explicit (min, max, opt) for `(input, dim)` under
    /// `profile_index`, growing the per-profile vector as needed.
    pub fn record_explicit(
        &mut self,
        input: &str,
        dim: usize,
        profile_index: usize,
        num_profiles: usize,
        triple: ProfileTriple,
    ) {
        let profiles = self
            .ranges
            .entry(input.to_string())
            .or_default()
            .entry(dim)
            .or_insert_with(|| vec![SENTINEL; num_profiles]);
        if profiles.len() < num_profiles {
            profiles.resize(num_profiles, SENTINEL);
        }
        profiles[profile_index] = triple;
    }

    /// Fold an observed extent into the (single) implicit profile of
    /// `(input, dim)`:  `min ← min(min, v)`, `max ← max(max, v)`,
    /// `opt ← max(opt, v)`.  Returns whether any bound moved — the
    /// engine-rebuild trigger.
    pub fn fold_observed(&mut self, input: &str, dim: usize, observed: i64) -> bool {
        let profiles = self
            .ranges
            .entry(input.to_string())
            .or_default()
            .entry(dim)
            .or_insert_with(|| vec![SENTINEL]);
        let triple = &mut profiles[0];
        let folded = [
            triple[0].min(observed),
            triple[1].max(observed),
            triple[2].max(observed),
        ];
        let changed = *triple != folded;
        *triple = folded;
        changed
    }

    /// The current triples for `(input, dim)`.
    pub fn triples(&self, input: &str, dim: usize) -> Option<&[ProfileTriple]> {
        self.ranges.get(input)?.get(&dim).map(Vec::as_slice)
    }

    // ─── Profile cache (v2) ──────────────────────────────────────────

    /// Write the `.profile` cache file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = ProfileCacheFile {
            version: PROFILE_CACHE_VERSION,
            ranges: self.clone(),
        };
        let json = serde_json::to_vec(&file)
            .map_err(|e| ProviderError::CacheFormat(format!("profile cache encode: {e}")))?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Read a `.profile` cache file.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let file: ProfileCacheFile = serde_json::from_slice(&bytes).map_err(|e| {
            ProviderError::CacheFormat(format!("profile cache {} is corrupt: {e}", path.display()))
        })?;
        if file.version != PROFILE_CACHE_VERSION {
            return Err(ProviderError::CacheFormat(format!(
                "profile cache {} has version {}, expected {PROFILE_CACHE_VERSION}",
                path.display(),
                file.version
            )));
        }
        Ok(file.ranges)
    }
}

#[derive(Serialize, Deserialize)]
struct ProfileCacheFile {
    version: u32,
    ranges: ShapeRangeStore,
}

/// Whether the cached profile diverges from the explicit shapes requested
/// now (a rebuild trigger).  Inputs come from the requested maps; the
/// cached store drives which dimensions are compared — static dimensions
/// never enter the store.
pub fn profiles_diverge(
    cached: &ShapeRangeStore,
    min_shapes: &ShapeMap,
    max_shapes: &ShapeMap,
    opt_shapes: &ShapeMap,
) -> bool {
    for (input, min_profiles) in min_shapes {
        let Some(cached_dims) = cached.input(input) else {
            return true;
        };
        let (Some(max_profiles), Some(opt_profiles)) =
            (max_shapes.get(input), opt_shapes.get(input))
        else {
            return true;
        };
        for (&dim, cached_profiles) in cached_dims {
            if cached_profiles.len() != min_profiles.len() {
                return true;
            }
            for (i, cached_triple) in cached_profiles.iter().enumerate() {
                let requested = [
                    min_profiles[i].get(dim).copied(),
                    max_profiles[i].get(dim).copied(),
                    opt_profiles[i].get(dim).copied(),
                ];
                match requested {
                    [Some(min), Some(max), Some(opt)] => {
                        if *cached_triple != [min, max, opt] {
                            return true;
                        }
                    }
                    _ => return true,
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape_map(entries: &[(&str, &[&[i64]])]) -> ShapeMap {
        entries
            .iter()
            .map(|(name, profiles)| {
                (
                    name.to_string(),
                    profiles.iter().map(|p| p.to_vec()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn sentinel_folds_to_first_observation() {
        let mut store = ShapeRangeStore::new();
        store.seed_implicit("x", 0);
        assert!(store.fold_observed("x", 0, 3));
        assert_eq!(store.triples("x", 0).unwrap()[0], [3, 3, 3]);
    }

    #[test]
    fn dynamic_batch_sequence_matches_expected_store() {
        // Observed batches 1, 4, 2: rebuild on the first two calls only,
        // store ends at (min=1, max=4, opt=4).
        let mut store = ShapeRangeStore::new();
        store.seed_implicit("input", 0);

        assert!(store.fold_observed("input", 0, 1));
        assert!(store.fold_observed("input", 0, 4));
        assert!(!store.fold_observed("input", 0, 2));

        assert_eq!(store.triples("input", 0).unwrap()[0], [1, 4, 4]);
    }

    #[test]
    fn fold_is_monotonic() {
        let mut store = ShapeRangeStore::new();
        store.seed_implicit("x", 1);
        let observations = [7i64, 3, 9, 5, 9, 1];
        let mut last = SENTINEL;
        for v in observations {
            store.fold_observed("x", 1, v);
            let now = store.triples("x", 1).unwrap()[0];
            assert!(now[0] <= last[0].min(v));
            assert!(now[1] >= last[1]);
            assert!(now[2] >= last[2]);
            last = now;
        }
        assert_eq!(last, [1, 9, 9]);
    }

    #[test]
    fn explicit_records_per_profile() {
        let mut store = ShapeRangeStore::new();
        store.record_explicit("x", 0, 0, 2, [1, 8, 4]);
        store.record_explicit("x", 0, 1, 2, [1, 16, 8]);
        assert_eq!(store.triples("x", 0).unwrap(), &[[1, 8, 4], [1, 16, 8]]);
    }

    #[test]
    fn profile_cache_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node_sm86.profile");

        let mut store = ShapeRangeStore::new();
        store.record_explicit("x", 0, 0, 1, [1, 8, 4]);
        store.seed_implicit("y", 2);
        store.save(&path).unwrap();

        let loaded = ShapeRangeStore::load(&path).unwrap();
        assert_eq!(loaded, store);
    }

    #[test]
    fn corrupt_profile_cache_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.profile");
        fs::write(&path, b"not json").unwrap();
        let err = ShapeRangeStore::load(&path).unwrap_err();
        assert_eq!(err.error_code(), 201);
    }

    #[test]
    fn matching_explicit_profiles_do_not_diverge() {
        let mut cached = ShapeRangeStore::new();
        cached.record_explicit("x", 0, 0, 1, [1, 8, 4]);

        let min = shape_map(&[("x", &[&[1, 128]])]);
        let max = shape_map(&[("x", &[&[8, 128]])]);
        let opt = shape_map(&[("x", &[&[4, 128]])]);
        assert!(!profiles_diverge(&cached, &min, &max, &opt));
    }

    #[test]
    fn changed_max_triggers_divergence() {
        // Cached engine was built for max=16; the session now asks max=8.
        let mut cached = ShapeRangeStore::new();
        cached.record_explicit("x", 0, 0, 1, [1, 16, 8]);

        let min = shape_map(&[("x", &[&[1, 128]])]);
        let max = shape_map(&[("x", &[&[8, 128]])]);
        let opt = shape_map(&[("x", &[&[4, 128]])]);
        assert!(profiles_diverge(&cached, &min, &max, &opt));
    }

    #[test]
    fn missing_cached_input_diverges() {
        let cached = ShapeRangeStore::new();
        let min = shape_map(&[("x", &[&[1]])]);
        let max = shape_map(&[("x", &[&[8]])]);
        let opt = shape_map(&[("x", &[&[4]])]);
        assert!(profiles_diverge(&cached, &min, &max, &opt));
    }

    #[test]
    fn profile_count_mismatch_diverges() {
        let mut cached = ShapeRangeStore::new();
        cached.record_explicit("x", 0, 0, 2, [1, 8, 4]);
        cached.record_explicit("x", 0, 1, 2, [1, 16, 8]);

        let min = shape_map(&[("x", &[&[1]])]);
        let max = shape_map(&[("x", &[&[8]])]);
        let opt = shape_map(&[("x", &[&[4]])]);
        assert!(profiles_diverge(&cached, &min, &max, &opt));
    }
}
