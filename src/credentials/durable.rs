//! 持久化凭证存储
//!
//! 键值语义，两个固定键 `accessToken` / `refreshToken`。
//! `MemoryStore` 用于测试和无状态进程，`FileStore` 把凭证写入本地 JSON 文件，
//! 进程重启后仍可恢复会话。

use crate::error::{ClientError, Result};
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

pub const ACCESS_TOKEN_KEY: &str = "accessToken";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

const SAVED_AT_KEY: &str = "savedAt";

/// 持久化存储后端
pub trait DurableStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;

    /// 读取 (access, refresh)；能一次读出两者的后端应覆盖此方法
    fn load_pair(&self) -> Result<(Option<String>, Option<String>)> {
        Ok((self.get(ACCESS_TOKEN_KEY)?, self.get(REFRESH_TOKEN_KEY)?))
    }

    /// 同时写入两个令牌
    fn save_pair(&self, access_token: &str, refresh_token: &str) -> Result<()> {
        self.set(ACCESS_TOKEN_KEY, access_token)?;
        self.set(REFRESH_TOKEN_KEY, refresh_token)
    }

    /// 同时删除两个令牌
    fn clear_pair(&self) -> Result<()> {
        self.remove(ACCESS_TOKEN_KEY)?;
        self.remove(REFRESH_TOKEN_KEY)
    }
}

/// 内存存储
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置凭证（模拟上一个进程留下的数据）
    pub fn with_pair(access_token: &str, refresh_token: &str) -> Self {
        let store = Self::new();
        {
            let mut entries = store.entries.lock().unwrap_or_else(PoisonError::into_inner);
            entries.insert(ACCESS_TOKEN_KEY.to_string(), access_token.to_string());
            entries.insert(REFRESH_TOKEN_KEY.to_string(), refresh_token.to_string());
        }
        store
    }
}

impl DurableStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }

    fn load_pair(&self) -> Result<(Option<String>, Option<String>)> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok((
            entries.get(ACCESS_TOKEN_KEY).cloned(),
            entries.get(REFRESH_TOKEN_KEY).cloned(),
        ))
    }
}

/// 文件存储
///
/// 文件内容为 JSON 对象，写入时先写临时文件再 rename，Unix 下权限为 0600。
/// 文件不存在等价于没有凭证。
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    // 串行化同一进程内的读改写
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<Map<String, Value>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => {
                return Err(ClientError::storage(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        if raw.trim().is_empty() {
            return Ok(Map::new());
        }

        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(ClientError::storage(format!(
                "{} does not contain a JSON object",
                self.path.display()
            ))),
            Err(e) => Err(ClientError::storage(format!(
                "failed to parse {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    fn write_map(&self, mut map: Map<String, Value>) -> Result<()> {
        map.remove(SAVED_AT_KEY);

        // 没有剩余令牌时直接删除文件
        if map.is_empty() {
            return match std::fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            };
        }

        map.insert(SAVED_AT_KEY.to_string(), Value::String(Utc::now().to_rfc3339()));

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        let content = serde_json::to_string_pretty(&Value::Object(map))?;
        std::fs::write(&tmp, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
        }

        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Map<String, Value>),
    {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut map = self.read_map()?;
        f(&mut map);
        self.write_map(map)
    }
}

impl DurableStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let map = self.read_map()?;
        Ok(map.get(key).and_then(Value::as_str).map(str::to_string))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.update(|map| {
            map.insert(key.to_string(), Value::String(value.to_string()));
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.update(|map| {
            map.remove(key);
        })
    }

    // 一次读文件，避免两次读取之间被其他进程改写而拼出错配的令牌对
    fn load_pair(&self) -> Result<(Option<String>, Option<String>)> {
        let map = self.read_map()?;
        let field = |key: &str| map.get(key).and_then(Value::as_str).map(str::to_string);
        Ok((field(ACCESS_TOKEN_KEY), field(REFRESH_TOKEN_KEY)))
    }

    fn save_pair(&self, access_token: &str, refresh_token: &str) -> Result<()> {
        self.update(|map| {
            map.insert(ACCESS_TOKEN_KEY.to_string(), Value::String(access_token.to_string()));
            map.insert(REFRESH_TOKEN_KEY.to_string(), Value::String(refresh_token.to_string()));
        })
    }

    fn clear_pair(&self) -> Result<()> {
        self.update(|map| {
            map.remove(ACCESS_TOKEN_KEY);
            map.remove(REFRESH_TOKEN_KEY);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store_set_get_remove() {
        let store = MemoryStore::new();
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap(), None);

        store.save_pair("A1", "R1").unwrap();
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("A1"));
        assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("R1"));

        store.clear_pair().unwrap();
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap(), None);
        assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn test_file_store_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("credentials.json"));

        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn test_file_store_survives_new_instance() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("credentials.json");

        FileStore::new(&path).save_pair("A1", "R1").unwrap();

        let reopened = FileStore::new(&path);
        assert_eq!(reopened.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("A1"));
        assert_eq!(reopened.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("R1"));

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(raw[SAVED_AT_KEY].is_string());
    }

    #[test]
    fn test_file_store_load_pair_reads_one_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, r#"{"accessToken":"A3","refreshToken":"R3"}"#).unwrap();

        let store = FileStore::new(&path);
        assert_eq!(
            store.load_pair().unwrap(),
            (Some("A3".to_string()), Some("R3".to_string()))
        );

        std::fs::remove_file(&path).unwrap();
        assert_eq!(store.load_pair().unwrap(), (None, None));
    }

    #[test]
    fn test_file_store_clear_removes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");
        let store = FileStore::new(&path);

        store.save_pair("A1", "R1").unwrap();
        assert!(path.exists());

        store.clear_pair().unwrap();
        assert!(!path.exists());
        assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, "not json").unwrap();

        let store = FileStore::new(&path);
        assert!(matches!(store.get(ACCESS_TOKEN_KEY), Err(ClientError::Storage(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");
        FileStore::new(&path).save_pair("A1", "R1").unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
