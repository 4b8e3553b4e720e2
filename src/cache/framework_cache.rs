//! 框架缓存 - 按内容寻址，单飞加载
//!
//! ## 保证
//!
//! 1. **单飞**：同一 `FrameworkIdentity` 同时最多只有一个加载在执行，
//!    所有并发请求者拿到同一个结果（或同一个错误）
//! 2. **失败不缓存**：加载失败后下一个请求会重新加载
//! 3. **成功永久缓存**：存储在可注入的 [`ExtractStore`] 中，淘汰策略属于存储的能力

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{AppResult, PipelineError};
use crate::models::framework::{FrameworkExtract, FrameworkIdentity};

/// 已解析框架的存储
pub trait ExtractStore: Send + Sync {
    fn get(&self, identity: &FrameworkIdentity) -> Option<Arc<FrameworkExtract>>;
    fn put(&self, extract: Arc<FrameworkExtract>);
    /// 淘汰一条记录，返回是否存在
    fn evict(&self, identity: &FrameworkIdentity) -> bool;
    fn len(&self) -> usize;
}

/// 进程内存储，不做自动淘汰
#[derive(Default)]
pub struct InMemoryExtractStore {
    extracts: RwLock<HashMap<FrameworkIdentity, Arc<FrameworkExtract>>>,
}

impl InMemoryExtractStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExtractStore for InMemoryExtractStore {
    fn get(&self, identity: &FrameworkIdentity) -> Option<Arc<FrameworkExtract>> {
        let extracts = self.extracts.read().unwrap_or_else(|e| e.into_inner());
        extracts.get(identity).cloned()
    }

    fn put(&self, extract: Arc<FrameworkExtract>) {
        let mut extracts = self.extracts.write().unwrap_or_else(|e| e.into_inner());
        extracts.insert(extract.identity.clone(), extract);
    }

    fn evict(&self, identity: &FrameworkIdentity) -> bool {
        let mut extracts = self.extracts.write().unwrap_or_else(|e| e.into_inner());
        extracts.remove(identity).is_some()
    }

    fn len(&self) -> usize {
        let extracts = self.extracts.read().unwrap_or_else(|e| e.into_inner());
        extracts.len()
    }
}

type LoadFuture = Shared<BoxFuture<'static, AppResult<Arc<FrameworkExtract>>>>;

/// 框架缓存
pub struct FrameworkCache {
    store: Arc<dyn ExtractStore>,
    in_flight: Mutex<HashMap<FrameworkIdentity, LoadFuture>>,
    loads_started: AtomicU64,
}

impl FrameworkCache {
    pub fn new(store: Arc<dyn ExtractStore>) -> Self {
        Self {
            store,
            in_flight: Mutex::new(HashMap::new()),
            loads_started: AtomicU64::new(0),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryExtractStore::new()))
    }

    /// 获取框架；未命中时调用 `load`
    ///
    /// `load` 只在本次请求成为"领头者"时才会被调用，调用方应把重试和超时策略包进去，
    /// 这样等待者的等待时间也受同一策略约束。
    pub async fn get_or_load<F, Fut>(
        &self,
        identity: &FrameworkIdentity,
        load: F,
    ) -> AppResult<Arc<FrameworkExtract>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<FrameworkExtract>> + Send + 'static,
    {
        let shared = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());

            // 在同一把锁内查缓存，避免"刚写入缓存、刚移出单飞表"的窗口里重复加载
            if let Some(hit) = self.store.get(identity) {
                debug!("框架缓存命中: {}", identity.short());
                return Ok(hit);
            }

            match in_flight.get(identity) {
                Some(existing) => {
                    debug!("框架 {} 正在加载，等待已有结果", identity.short());
                    existing.clone()
                }
                None => {
                    self.loads_started.fetch_add(1, Ordering::SeqCst);
                    info!("📚 开始加载框架: {}", identity.short());

                    let expected = identity.clone();
                    let fut = load();
                    let shared = async move {
                        let extract = fut.await?;
                        if extract.identity != expected {
                            return Err(PipelineError::framework_load_failed(
                                extract.name.clone(),
                                format!("解析结果的指纹 {} 与请求不一致", extract.identity.short()),
                            ));
                        }
                        Ok(Arc::new(extract))
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(identity.clone(), shared.clone());
                    shared
                }
            }
        };

        let result = shared.clone().await;

        // 第一个拿到结果的请求者负责收尾：成功写缓存，然后移出单飞表
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        let owns_entry = in_flight
            .get(identity)
            .is_some_and(|current| current.ptr_eq(&shared));
        if owns_entry {
            if let Ok(extract) = &result {
                self.store.put(extract.clone());
            }
            in_flight.remove(identity);
        }

        result
    }

    /// 主动淘汰一个框架
    pub fn evict(&self, identity: &FrameworkIdentity) -> bool {
        self.store.evict(identity)
    }

    pub fn cached_count(&self) -> usize {
        self.store.len()
    }

    /// 实际执行过的加载次数（不含缓存命中和单飞合并）
    pub fn loads_started(&self) -> u64 {
        self.loads_started.load(Ordering::SeqCst)
    }
}
