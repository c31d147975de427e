//! 存储抽象
//!
//! 核心逻辑只依赖键值接口：每个 key 对应一份完整的 JSON 快照。
//! - `FileStorage`: 每个 key 一个 `<key>.json` 文件
//! - `MemoryStorage`: 进程内存（重启即丢失，用于测试或无状态部署）

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 存储模式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    #[default]
    File,
    Memory,
}

impl StorageMode {
    /// 对外展示的名称（FILE / MEMORY）
    pub fn as_upper_str(&self) -> &'static str {
        match self {
            StorageMode::File => "FILE",
            StorageMode::Memory => "MEMORY",
        }
    }
}

/// 键值存储接口
pub trait Storage: Send + Sync {
    /// 读取 key 对应的快照，不存在时返回 None
    fn load(&self, key: &str) -> anyhow::Result<Option<Value>>;

    /// 整体覆盖写入 key 对应的快照
    fn save(&self, key: &str, value: &Value) -> anyhow::Result<()>;

    /// 当前存储模式
    fn mode(&self) -> StorageMode;
}

/// 读取并反序列化为指定类型
pub fn load_typed<T: DeserializeOwned>(storage: &dyn Storage, key: &str) -> anyhow::Result<Option<T>> {
    match storage.load(key)? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// 序列化后写入
pub fn save_typed<T: Serialize>(storage: &dyn Storage, key: &str, value: &T) -> anyhow::Result<()> {
    let value = serde_json::to_value(value)?;
    storage.save(key, &value)
}

/// 文件存储
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// 创建文件存储（目录不存在时自动创建）
    pub fn new<P: AsRef<Path>>(dir: P) -> anyhow::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl Storage for FileStorage {
    fn load(&self, key: &str) -> anyhow::Result<Option<Value>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)?;
        if content.trim().is_empty() {
            return Ok(None);
        }

        Ok(Some(serde_json::from_str(&content)?))
    }

    fn save(&self, key: &str, value: &Value) -> anyhow::Result<()> {
        let path = self.path_for(key);
        let tmp_path = self.dir.join(format!("{}.json.tmp", key));

        // 先写临时文件再 rename，避免写到一半被读到
        let content = serde_json::to_string_pretty(value)?;
        fs::write(&tmp_path, content)?;
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    fn mode(&self) -> StorageMode {
        StorageMode::File
    }
}

/// 内存存储
#[derive(Default)]
pub struct MemoryStorage {
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn load(&self, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn save(&self, key: &str, value: &Value) -> anyhow::Result<()> {
        self.values.write().insert(key.to_string(), value.clone());
        Ok(())
    }

    fn mode(&self) -> StorageMode {
        StorageMode::Memory
    }
}

/// 可以切换为写入失败的内存存储（测试用）
#[cfg(test)]
#[derive(Default)]
pub(crate) struct FailingStorage {
    inner: MemoryStorage,
    fail_saves: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl FailingStorage {
    pub(crate) fn set_failing(&self, failing: bool) {
        self.fail_saves
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl Storage for FailingStorage {
    fn load(&self, key: &str) -> anyhow::Result<Option<Value>> {
        self.inner.load(key)
    }

    fn save(&self, key: &str, value: &Value) -> anyhow::Result<()> {
        if self.fail_saves.load(std::sync::atomic::Ordering::SeqCst) {
            anyhow::bail!("磁盘已满");
        }
        self.inner.save(key, value)
    }

    fn mode(&self) -> StorageMode {
        StorageMode::Memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_file_storage_roundtrip() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("data")).unwrap();

        assert!(storage.load("token").unwrap().is_none());

        storage.save("token", &json!({"ssoNormal": {}})).unwrap();
        assert_eq!(
            storage.load("token").unwrap(),
            Some(json!({"ssoNormal": {}}))
        );
        assert!(dir.path().join("data").join("token.json").exists());
        assert!(!dir.path().join("data").join("token.json.tmp").exists());
        assert_eq!(storage.mode(), StorageMode::File);
    }

    #[test]
    fn test_file_storage_empty_file_is_none() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        fs::write(dir.path().join("api_keys.json"), "  \n").unwrap();
        assert!(storage.load("api_keys").unwrap().is_none());
    }

    #[test]
    fn test_memory_storage_typed() {
        let storage = MemoryStorage::new();
        save_typed(&storage, "numbers", &vec![1, 2, 3]).unwrap();

        let loaded: Option<Vec<i32>> = load_typed(&storage, "numbers").unwrap();
        assert_eq!(loaded, Some(vec![1, 2, 3]));
        assert_eq!(storage.mode().as_upper_str(), "MEMORY");
    }

    #[test]
    fn test_failing_storage_keeps_last_good_value() {
        let storage = FailingStorage::default();
        storage.save("k", &json!(1)).unwrap();

        storage.set_failing(true);
        assert!(storage.save("k", &json!(2)).is_err());
        assert_eq!(storage.load("k").unwrap(), Some(json!(1)));
    }
}
