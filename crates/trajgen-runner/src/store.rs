use serde::de::DeserializeOwned;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::error::{Result, TrajGenError};
use crate::fsutil::atomic_write_bytes;

/// Serializes as `{"0": t0, "1": t1, ...}` with keys in input order.
struct Indexed<'a, T>(&'a [T]);

impl<T: Serialize> Serialize for Indexed<'_, T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (idx, item) in self.0.iter().enumerate() {
            map.serialize_entry(&idx.to_string(), item)?;
        }
        map.end()
    }
}

/// Writes the trajectories to `dest`, replacing any previous file atomically.
pub fn persist<T: Serialize>(trajectories: &[T], dest: &Path) -> Result<()> {
    let bytes = serde_json::to_vec(&Indexed(trajectories))?;
    atomic_write_bytes(dest, &bytes).map_err(|source| TrajGenError::PersistWrite {
        path: dest.to_path_buf(),
        source,
    })?;
    info!(count = trajectories.len(), path = %dest.display(), "persisted safe trajectories");
    Ok(())
}

/// Reads a persisted set back in index order, rejecting gaps and non-numeric keys.
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let load_error = |reason: String| TrajGenError::TrajectoriesLoad {
        path: path.to_path_buf(),
        reason,
    };
    let bytes = fs::read(path).map_err(|e| load_error(e.to_string()))?;
    let raw: BTreeMap<String, T> =
        serde_json::from_slice(&bytes).map_err(|e| load_error(e.to_string()))?;

    let mut by_index = BTreeMap::new();
    for (key, value) in raw {
        let idx: usize = key
            .parse()
            .map_err(|_| load_error(format!("non-numeric key {:?}", key)))?;
        if idx.to_string() != key {
            return Err(load_error(format!("non-canonical key {:?}", key)));
        }
        by_index.insert(idx, value);
    }
    let count = by_index.len();
    if let Some((&last, _)) = by_index.iter().next_back() {
        if last + 1 != count {
            return Err(load_error(format!(
                "indices are not dense: {} entries but highest index {}",
                count, last
            )));
        }
    }
    Ok(by_index.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn trajectories(k: usize) -> Vec<Vec<Vec<f64>>> {
        (0..k)
            .map(|i| vec![vec![i as f64, 0.0], vec![i as f64, 1.0]])
            .collect()
    }

    #[test]
    fn persisted_document_has_dense_string_keys_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("safe.json");
        persist(&trajectories(12), &dest).expect("persist");

        let raw = fs::read_to_string(&dest).expect("read");
        let doc: Value = serde_json::from_str(&raw).expect("json");
        let obj = doc.as_object().expect("object");
        assert_eq!(obj.len(), 12);
        for i in 0..12 {
            assert_eq!(obj[&i.to_string()], json!([[i as f64, 0.0], [i as f64, 1.0]]));
        }
        // Written in input order, not lexicographic key order.
        let pos2 = raw.find("\"2\":").expect("key 2");
        let pos10 = raw.find("\"10\":").expect("key 10");
        assert!(pos2 < pos10);
    }

    #[test]
    fn persist_then_load_preserves_sequence() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("safe.json");
        let input = trajectories(11);
        persist(&input, &dest).expect("persist");
        let loaded: Vec<Vec<Vec<f64>>> = load(&dest).expect("load");
        assert_eq!(loaded, input);
    }

    #[test]
    fn empty_set_is_empty_object() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("safe.json");
        persist::<Value>(&[], &dest).expect("persist");
        assert_eq!(fs::read_to_string(&dest).expect("read"), "{}");
        assert!(load::<Value>(&dest).expect("load").is_empty());
    }

    #[test]
    fn load_rejects_gaps() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("safe.json");
        fs::write(&dest, r#"{"0": 1, "2": 3}"#).expect("write");
        assert!(matches!(
            load::<Value>(&dest),
            Err(TrajGenError::TrajectoriesLoad { .. })
        ));
        fs::write(&dest, r#"{"00": 1}"#).expect("write");
        assert!(load::<Value>(&dest).is_err());
    }

    #[test]
    fn failed_write_keeps_previous_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("safe.json");
        persist(&trajectories(1), &dest).expect("persist");
        let before = fs::read(&dest).expect("read");

        // The existing file cannot act as a parent directory.
        let bad_dest = dest.join("nested.json");
        let err = persist(&trajectories(2), &bad_dest).expect_err("cannot write under a file");
        assert!(matches!(err, TrajGenError::PersistWrite { .. }));
        assert_eq!(fs::read(&dest).expect("read"), before);
    }
}
