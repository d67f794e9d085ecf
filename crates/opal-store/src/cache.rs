//! In-memory mirror of data writes, so a Client can export a full snapshot
//! without round-tripping through the policy engine.

use std::sync::RwLock;

use serde_json::Value;

/// Root-relative JSON-pointer tree. `path` uses the Store's own
/// slash-delimited convention (`a/b/c`), translated to a JSON pointer
/// internally.
pub struct DataCache {
    root: RwLock<Value>,
}

impl DataCache {
    pub fn new() -> Self {
        Self {
            root: RwLock::new(Value::Object(Default::default())),
        }
    }

    pub fn set(&self, path: &str, value: Value) {
        let pointer = to_pointer(path);
        let mut root = self.root.write().unwrap();
        if pointer.is_empty() {
            *root = value;
            return;
        }
        set_pointer(&mut root, &pointer, value);
    }

    pub fn delete(&self, path: &str) {
        let pointer = to_pointer(path);
        let mut root = self.root.write().unwrap();
        if pointer.is_empty() {
            *root = Value::Object(Default::default());
            return;
        }
        if let Some((parent, key)) = split_parent(&pointer)
            && let Some(parent_value) = root.pointer_mut(&parent)
        {
            if let Some(obj) = parent_value.as_object_mut() {
                obj.remove(&key);
            } else if let Some(arr) = parent_value.as_array_mut()
                && let Ok(index) = key.parse::<usize>()
                && index < arr.len()
            {
                arr.remove(index);
            }
        }
    }

    pub fn get(&self, path: &str) -> Value {
        let pointer = to_pointer(path);
        let root = self.root.read().unwrap();
        if pointer.is_empty() {
            return root.clone();
        }
        root.pointer(&pointer).cloned().unwrap_or(Value::Null)
    }

    pub fn snapshot(&self) -> Value {
        self.root.read().unwrap().clone()
    }
}

impl Default for DataCache {
    fn default() -> Self {
        Self::new()
    }
}

fn to_pointer(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return String::new();
    }
    let escaped: Vec<String> = trimmed
        .split('/')
        .map(|segment| segment.replace('~', "~0").replace('/', "~1"))
        .collect();
    format!("/{}", escaped.join("/"))
}

fn split_parent(pointer: &str) -> Option<(String, String)> {
    let idx = pointer.rfind('/')?;
    Some((pointer[..idx].to_string(), pointer[idx + 1..].to_string()))
}

fn set_pointer(root: &mut Value, pointer: &str, value: Value) {
    let segments: Vec<&str> = pointer.trim_start_matches('/').split('/').collect();
    let mut current = root;
    for (i, segment) in segments.iter().enumerate() {
        let is_last = i == segments.len() - 1;
        if !current.is_object() {
            *current = Value::Object(Default::default());
        }
        let obj = current.as_object_mut().unwrap();
        if is_last {
            obj.insert(segment.to_string(), value);
            return;
        }
        current = obj
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_and_get_nested_path() {
        let cache = DataCache::new();
        cache.set("a/b/c", json!(42));
        assert_eq!(cache.get("a/b/c"), json!(42));
        assert_eq!(cache.get("a/b"), json!({"c": 42}));
    }

    #[test]
    fn delete_removes_leaf() {
        let cache = DataCache::new();
        cache.set("a/b", json!(1));
        cache.delete("a/b");
        assert_eq!(cache.get("a/b"), Value::Null);
    }

    #[test]
    fn set_root_replaces_snapshot() {
        let cache = DataCache::new();
        cache.set("", json!({"x": 1}));
        assert_eq!(cache.snapshot(), json!({"x": 1}));
    }
}
