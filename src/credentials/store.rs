//! 凭证缓存
//!
//! 内存中的凭证对是权威值；持久化存储只在每个进程首次读取时水合一次，
//! 之后所有写入同时落到内存和持久化存储。

use super::durable::{DurableStore, MemoryStore};
use super::CredentialPair;
use crate::error::Result;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// 可注入的凭证存储
pub struct CredentialStore {
    durable: Arc<dyn DurableStore>,
    /// `None` 表示尚未从持久化存储水合
    cache: Mutex<Option<CredentialPair>>,
}

impl CredentialStore {
    pub fn new(durable: Arc<dyn DurableStore>) -> Self {
        Self {
            durable,
            cache: Mutex::new(None),
        }
    }

    /// 仅内存（持久化层同样在内存中）
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    fn lock(&self) -> MutexGuard<'_, Option<CredentialPair>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 当前凭证对，首次调用时从持久化存储水合
    pub fn get(&self) -> CredentialPair {
        let mut cache = self.lock();
        if let Some(pair) = cache.as_ref() {
            return pair.clone();
        }

        let pair = self.hydrate();
        *cache = Some(pair.clone());
        pair
    }

    /// 当前访问令牌
    pub fn access_token(&self) -> Option<String> {
        self.get().access_token
    }

    /// 当前刷新令牌
    pub fn refresh_token(&self) -> Option<String> {
        self.get().refresh_token
    }

    /// 写入新的凭证对，覆盖旧值
    pub fn set(&self, access_token: &str, refresh_token: &str) -> Result<()> {
        *self.lock() = Some(CredentialPair::new(access_token, refresh_token));

        self.durable.save_pair(access_token, refresh_token).map_err(|e| {
            tracing::warn!(error = %e, "Failed to persist credentials");
            e
        })
    }

    /// 清除内存与持久化存储中的凭证
    pub fn clear(&self) -> Result<()> {
        *self.lock() = Some(CredentialPair::empty());

        self.durable.clear_pair().map_err(|e| {
            tracing::warn!(error = %e, "Failed to clear persisted credentials");
            e
        })
    }

    fn hydrate(&self) -> CredentialPair {
        match self.durable.load_pair() {
            Ok((Some(access), Some(refresh))) => {
                tracing::debug!("Hydrated credentials from durable store");
                CredentialPair::new(access, refresh)
            }
            Ok((None, None)) => CredentialPair::empty(),
            Ok(_) => {
                // 只存在一个令牌时视为无效会话
                tracing::warn!("Durable store holds an incomplete credential pair, ignoring it");
                CredentialPair::empty()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read durable credentials");
                CredentialPair::empty()
            }
        }
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("cache", &*self.lock())
            .finish_non_exhaustive()
    }
}
