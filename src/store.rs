//! JSON 配置存储：加载 / 缺省 / 变更即保存 / 关停等待。
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;
use std::{
    cell::RefCell,
    fmt,
    future::Future,
    marker::PhantomData,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::{runtime::Handle, sync::broadcast};

use crate::{
    config::StoreConfig,
    error::{ConfStoreError, Result},
    flight::{FlightClaim, SaveFlight},
    fs::FileSystem,
    view::{ConfigView, MutationHook, ReadOnlyView, TrackedView},
};

/// A JSON document on disk mirrored by an in-memory tree of shape `T`.
///
/// Writes made through [`config`](Self::config) after a successful
/// [`load`](Self::load) are persisted automatically. Saves coalesce: while one
/// is in flight, further writes are applied in memory but do not start another
/// save, so a write landing during an in-flight save reaches disk only once a
/// later write triggers the next one (or on an explicit [`save`](Self::save)).
pub struct ConfigStore<T> {
    inner: Arc<StoreInner>,
    _shape: PhantomData<fn() -> T>,
}

struct StoreInner {
    location: PathBuf,
    // 构造时冻结的默认值快照；每个实例独占，不与调用方共享
    defaults: Value,
    loaded: Mutex<Option<Value>>,
    auto_save: AtomicBool,
    flight: Arc<SaveFlight>,
    pretty: bool,
    fs: Arc<dyn FileSystem>,
    errors: broadcast::Sender<Arc<ConfStoreError>>,
    // load() 时记录，供运行时之外发生的写入派发保存任务
    runtime: Mutex<Option<Handle>>,
}

impl<T> Clone for ConfigStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _shape: PhantomData,
        }
    }
}

impl<T> fmt::Debug for ConfigStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigStore")
            .field("location", &self.inner.location)
            // try_lock：在 config() 闭包内打印也不会自锁
            .field("loaded", &self.inner.loaded.try_lock().map(|g| g.is_some()))
            .field("auto_save", &self.inner.auto_save.load(Ordering::Relaxed))
            .field("saving", &self.inner.flight.is_saving())
            .finish()
    }
}

impl<T: Serialize + DeserializeOwned> ConfigStore<T> {
    /// No I/O happens here; `defaults` is only encoded to a JSON snapshot.
    pub fn new(location: impl Into<PathBuf>, defaults: T) -> Result<Self> {
        Self::with_config(StoreConfig::default(), location, defaults)
    }

    pub fn with_config(cfg: StoreConfig, location: impl Into<PathBuf>, defaults: T) -> Result<Self> {
        let defaults = serde_json::to_value(&defaults).map_err(ConfStoreError::Encode)?;
        let (errors, _) = broadcast::channel(cfg.error_capacity.max(1));
        Ok(Self {
            inner: Arc::new(StoreInner {
                location: location.into(),
                defaults,
                loaded: Mutex::new(None),
                auto_save: AtomicBool::new(cfg.auto_save),
                flight: Arc::new(SaveFlight::default()),
                pretty: cfg.pretty,
                fs: cfg.filesystem,
                errors,
                runtime: Mutex::new(None),
            }),
            _shape: PhantomData,
        })
    }

    /// Reads the document, first creating it from the defaults if absent.
    ///
    /// Not guarded against running concurrently with itself. On failure the
    /// previously loaded tree (if any) is kept.
    pub async fn load(&self) -> Result<()> {
        let inner = &self.inner;
        if let Ok(h) = Handle::try_current() {
            *inner.runtime.lock() = Some(h);
        }
        if !inner.fs.exists(&inner.location).await {
            tracing::debug!(path = %inner.location.display(), "config file missing; writing defaults");
            let bytes = inner.encode(&inner.defaults)?;
            inner.write(&bytes).await?;
        }
        let bytes = inner
            .fs
            .read_all(&inner.location)
            .await
            .map_err(|e| ConfStoreError::io(&inner.location, e))?;
        let value: Value = serde_json::from_slice(&bytes).map_err(|e| inner.decode_err(e))?;
        // 只校验能否解码为 T；内存里保留原始树，允许形状之外的键
        T::deserialize(&value).map_err(|e| inner.decode_err(e))?;
        *inner.loaded.lock() = Some(value);
        tracing::debug!(path = %inner.location.display(), "config loaded");
        Ok(())
    }

    /// Typed copy of the current configuration (loaded tree, else defaults).
    pub fn get(&self) -> Result<T> {
        serde_json::from_value(self.snapshot()).map_err(|e| self.inner.decode_err(e))
    }
}

impl<T> ConfigStore<T> {
    /// Runs `f` against the configuration.
    ///
    /// Once loaded, `f` receives a tracking view: every write is applied
    /// immediately and, when auto-save is on and no save is in flight, claims
    /// the save slot. The snapshot is taken when `f` returns, so all writes of
    /// the closure land in that save. Before `load` succeeds, `f` receives a
    /// read-only view over the defaults and its writes are silently dropped.
    ///
    /// # Panics
    ///
    /// `f` must not call back into this store or any of its clones
    /// (`config`, `snapshot`, `get`, `is_loaded`, `save`): the tree lock is
    /// held for the whole call, so re-entry panics instead of deadlocking.
    pub fn config<R>(&self, f: impl FnOnce(&mut ConfigView<'_>) -> R) -> R {
        let inner = &self.inner;
        let trigger = SaveTrigger {
            inner,
            claim: RefCell::new(None),
        };
        let mut loaded = self.lock_tree();
        let _entered = ConfigScope::enter(self.id());
        let out = match loaded.as_mut() {
            Some(tree) => f(&mut ConfigView::Tracked(TrackedView::new(tree, &trigger))),
            None => f(&mut ConfigView::ReadOnly(ReadOnlyView::new(&inner.defaults))),
        };
        if let Some(claim) = trigger.claim.take() {
            let snapshot = loaded.as_ref().map(|tree| inner.encode(tree));
            drop(loaded);
            match snapshot {
                Some(Ok(bytes)) => inner.spawn_save(claim, bytes),
                Some(Err(e)) => {
                    drop(claim);
                    inner.report(e);
                }
                None => {}
            }
        }
        out
    }

    /// Plain copy of the underlying tree (loaded, else defaults); no tracking.
    pub fn snapshot(&self) -> Value {
        self.lock_tree()
            .clone()
            .unwrap_or_else(|| self.inner.defaults.clone())
    }

    /// Writes the current tree now, regardless of `auto_save`.
    ///
    /// Waits for any in-flight save first; two saves never overlap.
    pub async fn save(&self) -> Result<()> {
        let _claim = self.inner.flight.begin().await;
        let bytes = {
            let loaded = self.lock_tree();
            self.inner.encode(loaded.as_ref().unwrap_or(&self.inner.defaults))?
        };
        self.inner.write(&bytes).await
    }

    /// Turns auto-save off immediately, then resolves once any in-flight save
    /// has finished. Never cancels a save and never fails; any number of
    /// callers may wait concurrently.
    pub fn close(&self) -> impl Future<Output = ()> + Send + 'static {
        self.inner.auto_save.store(false, Ordering::Release);
        let waiter = self.inner.flight.wait_idle();
        let path = self.inner.location.clone();
        async move {
            if let Some(rx) = waiter {
                tracing::debug!(path = %path.display(), "close waiting for in-flight save");
                let _ = rx.await;
            }
        }
    }

    pub fn auto_save(&self) -> bool {
        self.inner.auto_save.load(Ordering::Acquire)
    }
    pub fn set_auto_save(&self, on: bool) {
        self.inner.auto_save.store(on, Ordering::Release);
    }
    pub fn is_loaded(&self) -> bool {
        self.lock_tree().is_some()
    }
    pub fn is_saving(&self) -> bool {
        self.inner.flight.is_saving()
    }
    pub fn location(&self) -> &Path {
        &self.inner.location
    }
    pub fn defaults(&self) -> &Value {
        &self.inner.defaults
    }

    fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    fn lock_tree(&self) -> parking_lot::MutexGuard<'_, Option<Value>> {
        if ConfigScope::is_active(self.id()) {
            panic!(
                "ConfigStore for {} re-entered from inside its own config() closure",
                self.inner.location.display()
            );
        }
        self.inner.loaded.lock()
    }

    /// Failures of automatic saves. They never surface at the write site, so
    /// this channel (plus the `tracing` error log) is where they go.
    pub fn subscribe_errors(&self) -> broadcast::Receiver<Arc<ConfStoreError>> {
        self.inner.errors.subscribe()
    }
}

thread_local! {
    // 本线程上正处于 config() 闭包内的存储（按 inner 地址）
    static ACTIVE_CONFIG: RefCell<SmallVec<[usize; 2]>> = RefCell::new(SmallVec::new());
}

// config() 调用期间的标记；panic 展开时同样撤销
struct ConfigScope(usize);

impl ConfigScope {
    fn enter(id: usize) -> Self {
        ACTIVE_CONFIG.with(|a| a.borrow_mut().push(id));
        ConfigScope(id)
    }

    fn is_active(id: usize) -> bool {
        ACTIVE_CONFIG.with(|a| a.borrow().contains(&id))
    }
}

impl Drop for ConfigScope {
    fn drop(&mut self) {
        ACTIVE_CONFIG.with(|a| {
            let mut a = a.borrow_mut();
            if let Some(pos) = a.iter().rposition(|&id| id == self.0) {
                a.remove(pos);
            }
        });
    }
}

impl StoreInner {
    fn encode(&self, tree: &Value) -> Result<Vec<u8>> {
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(tree)
        } else {
            serde_json::to_vec(tree)
        };
        bytes.map_err(ConfStoreError::Encode)
    }

    fn decode_err(&self, source: serde_json::Error) -> ConfStoreError {
        ConfStoreError::Decode {
            path: self.location.clone(),
            source,
        }
    }

    async fn write(&self, bytes: &[u8]) -> Result<()> {
        self.fs
            .write_all(&self.location, bytes)
            .await
            .map_err(|e| ConfStoreError::io(&self.location, e))
    }

    fn report(&self, e: ConfStoreError) {
        tracing::error!(path = %self.location.display(), error = %e, "config auto-save failed");
        // 无订阅者时发送失败，忽略即可（日志已记录）
        let _ = self.errors.send(Arc::new(e));
    }

    fn spawn_save(self: &Arc<Self>, claim: FlightClaim, bytes: Vec<u8>) {
        let handle = match Handle::try_current() {
            Ok(h) => h,
            Err(_) => match self.runtime.lock().clone() {
                Some(h) => h,
                None => {
                    drop(claim);
                    self.report(ConfStoreError::NoRuntime);
                    return;
                }
            },
        };
        let inner = self.clone();
        handle.spawn(async move {
            // 凭据随任务结束释放：先回到空闲，再唤醒 close 等待者
            let _claim = claim;
            match inner.write(&bytes).await {
                Ok(()) => tracing::trace!(path = %inner.location.display(), bytes = bytes.len(), "config auto-saved"),
                Err(e) => inner.report(e),
            }
        });
    }
}

// 单次 config() 调用内所有层级视图共享的钩子
struct SaveTrigger<'s> {
    inner: &'s StoreInner,
    claim: RefCell<Option<FlightClaim>>,
}

impl MutationHook for SaveTrigger<'_> {
    fn mutated(&self) {
        if !self.inner.auto_save.load(Ordering::Acquire) {
            return;
        }
        let mut claim = self.claim.borrow_mut();
        // 本次调用已占用保存槽位，后续写入并入同一次保存
        if claim.is_some() {
            return;
        }
        let fresh = self.inner.flight.try_begin();
        // close() 可能在上面的检查与占用之间完成；此时放弃槽位（drop 即唤醒等待者）
        if self.inner.auto_save.load(Ordering::Acquire) {
            *claim = fresh;
        }
    }
}
