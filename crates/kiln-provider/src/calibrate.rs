//! INT8 calibration tables → per-tensor dynamic ranges.
//!
//! With INT8 enabled and a calibration file present, the provider installs
//! per-tensor dynamic ranges on the network instead of a calibrator.  Two
//! formats are read: the native TensorRT calibration table (header line
//! followed by `name: <hex float bits>` scale entries) and a plain JSON
//! map of tensor name → dynamic range.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use kiln_core::error::{ProviderError, Result};

/// Read a calibration table into tensor → dynamic-range-magnitude.
pub fn read_dynamic_ranges(path: &Path, native_table: bool) -> Result<HashMap<String, f32>> {
    let bytes = fs::read(path)?;
    if native_table {
        parse_native_table(&bytes, path)
    } else {
        serde_json::from_slice(&bytes).map_err(|e| {
            ProviderError::CacheFormat(format!(
                "calibration table {} is not a JSON range map: {e}",
                path.display()
            ))
        })
    }
}

/// Native table: first line is the `TRT-<version>-<algorithm>` header, each
/// following line is `tensor name: <hex>` where `<hex>` is the IEEE-754
/// bits of the per-tensor scale.  Dynamic range = scale × 127.
fn parse_native_table(bytes: &[u8], path: &Path) -> Result<HashMap<String, f32>> {
    let text = std::str::from_utf8(bytes).map_err(|_| {
        ProviderError::CacheFormat(format!(
            "calibration table {} is not valid UTF-8",
            path.display()
        ))
    })?;
    let mut lines = text.lines();
    match lines.next() {
        Some(header) if header.starts_with("TRT-") => {}
        _ => {
            return Err(ProviderError::CacheFormat(format!(
                "calibration table {} lacks the TRT-<version> header",
                path.display()
            )));
        }
    }

    let mut ranges = HashMap::new();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((name, hex)) = line.rsplit_once(": ") else {
            return Err(ProviderError::CacheFormat(format!(
                "calibration table {} has a malformed entry: '{line}'",
                path.display()
            )));
        };
        let bits = u32::from_str_radix(hex.trim(), 16).map_err(|_| {
            ProviderError::CacheFormat(format!(
                "calibration table {} has a non-hex scale for '{name}'",
                path.display()
            ))
        })?;
        let scale = f32::from_bits(bits);
        ranges.insert(name.to_string(), scale * 127.0);
    }
    Ok(ranges)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_native_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.flatbuffers");
        // 0x3c010a14 ≈ 0.007876 → range ≈ 1.00
        fs::write(
            &path,
            "TRT-8601-EntropyCalibration2\ninput: 3c010a14\nconv1.out: 3d000000\n",
        )
        .unwrap();

        let ranges = read_dynamic_ranges(&path, true).unwrap();
        assert_eq!(ranges.len(), 2);
        let input = ranges["input"];
        assert!((input - f32::from_bits(0x3c01_0a14) * 127.0).abs() < f32::EPSILON);
    }

    #[test]
    fn rejects_headerless_native_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.cache");
        fs::write(&path, "input: 3c010a14\n").unwrap();
        assert!(read_dynamic_ranges(&path, true).is_err());
    }

    #[test]
    fn parses_json_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ranges.json");
        fs::write(&path, r#"{"input": 2.5, "conv1.out": 6.0}"#).unwrap();

        let ranges = read_dynamic_ranges(&path, false).unwrap();
        assert_eq!(ranges["input"], 2.5);
        assert_eq!(ranges["conv1.out"], 6.0);
    }

    #[test]
    fn missing_table_is_io_error() {
        let err = read_dynamic_ranges(Path::new("/nonexistent/table"), true).unwrap_err();
        assert_eq!(err.error_code(), 200);
    }

    #[test]
    fn tensor_names_may_contain_colons() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.cache");
        fs::write(&path, "TRT-8601-EntropyCalibration2\nmodel/conv:0: 3c010a14\n").unwrap();
        let ranges = read_dynamic_ranges(&path, true).unwrap();
        assert!(ranges.contains_key("model/conv:0"));
    }
}
