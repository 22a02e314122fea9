use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::{Map, Value};

/// A JSON object persisted to one file. Every read refreshes from disk and
/// every write merges only the keys this handle touched, so several processes
/// sharing the file keep each other's updates.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    payload: Option<Map<String, Value>>,
    dirty_keys: Vec<String>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            payload: None,
            dirty_keys: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&mut self, key: &str) -> anyhow::Result<Option<Value>> {
        let payload = self.ensure_loaded()?;
        Ok(payload.get(key).cloned())
    }

    pub fn set(&mut self, key: &str, value: Value) -> anyhow::Result<()> {
        let payload = self.ensure_loaded()?;
        if payload.get(key) == Some(&value) {
            return Ok(());
        }
        payload.insert(key.to_string(), value);
        self.mark_dirty(key);
        self.flush()
    }

    /// Read-modify-write of one key against the freshest on-disk state.
    pub fn update<F>(&mut self, key: &str, apply: F) -> anyhow::Result<Value>
    where
        F: FnOnce(Option<&Value>) -> Value,
    {
        let payload = self.ensure_loaded()?;
        let next = apply(payload.get(key));
        payload.insert(key.to_string(), next.clone());
        self.mark_dirty(key);
        self.flush()?;
        Ok(next)
    }

    pub fn flush(&mut self) -> anyhow::Result<()> {
        if self.payload.is_none() || self.dirty_keys.is_empty() {
            return Ok(());
        }

        let mut on_disk = read_json_object(&self.path)?.unwrap_or_default();
        if let Some(payload) = &self.payload {
            for key in &self.dirty_keys {
                if let Some(value) = payload.get(key) {
                    on_disk.insert(key.clone(), value.clone());
                }
            }
        }
        write_json_object(&self.path, &on_disk)?;
        self.payload = Some(on_disk);
        self.dirty_keys.clear();
        Ok(())
    }

    fn mark_dirty(&mut self, key: &str) {
        if !self.dirty_keys.iter().any(|existing| existing == key) {
            self.dirty_keys.push(key.to_string());
        }
    }

    fn ensure_loaded(&mut self) -> anyhow::Result<&mut Map<String, Value>> {
        let fresh = read_json_object(&self.path)?.unwrap_or_default();
        Ok(self.payload.insert(fresh))
    }
}

fn read_json_object(path: &Path) -> anyhow::Result<Option<Map<String, Value>>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed reading {}", path.display()))
        }
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }
    let parsed: Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    Ok(parsed.as_object().cloned())
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(
        path,
        serde_json::to_string_pretty(&Value::Object(payload.clone()))?,
    )
    .with_context(|| format!("failed writing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::JsonFileStore;

    #[test]
    fn file_store_basic() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut store = JsonFileStore::new(temp.path().join("store.json"));
        store.set("key", json!({"value": 1}))?;
        assert_eq!(store.get("key")?, Some(json!({"value": 1})));
        assert_eq!(store.get("missing")?, None);
        Ok(())
    }

    #[test]
    fn set_merges_with_concurrent_writer() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("store.json");
        let mut store_a = JsonFileStore::new(&path);
        let mut store_b = JsonFileStore::new(&path);

        store_a.set("a", json!(1))?;
        store_b.set("b", json!(2))?;
        store_a.set("c", json!(3))?;

        let mut reloaded = JsonFileStore::new(path);
        assert_eq!(reloaded.get("a")?, Some(json!(1)));
        assert_eq!(reloaded.get("b")?, Some(json!(2)));
        assert_eq!(reloaded.get("c")?, Some(json!(3)));
        Ok(())
    }

    #[test]
    fn update_sees_other_handles_writes() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("store.json");
        let mut store_a = JsonFileStore::new(&path);
        let mut store_b = JsonFileStore::new(&path);

        let bump = |current: Option<&Value>| {
            json!(current.and_then(Value::as_u64).unwrap_or(0) + 1)
        };
        store_a.update("count", bump)?;
        store_b.update("count", bump)?;
        let last = store_a.update("count", bump)?;

        assert_eq!(last, json!(3));
        Ok(())
    }

    #[test]
    fn corrupt_file_is_reported() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("store.json");
        std::fs::write(&path, "{not json")?;
        let mut store = JsonFileStore::new(path);
        assert!(store.get("key").is_err());
        Ok(())
    }
}
