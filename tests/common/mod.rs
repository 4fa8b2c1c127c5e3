#![allow(dead_code)]
// 各测试文件共享的内存文件系统：可挂起写入、注入失败、统计并发。
use async_trait::async_trait;
use mmg_confstore::prelude::*;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{Notify, Semaphore};

pub const WAIT: Duration = Duration::from_secs(2);

pub struct MemFs {
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
    started: AtomicUsize,
    finished: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    hold: AtomicBool,
    permits: Semaphore,
    entered: Notify,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl MemFs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            files: Mutex::new(HashMap::new()),
            started: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            hold: AtomicBool::new(false),
            permits: Semaphore::new(0),
            entered: Notify::new(),
            fail_writes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
        })
    }

    pub fn put(&self, path: &Path, bytes: impl Into<Vec<u8>>) {
        self.files.lock().insert(path.to_path_buf(), bytes.into());
    }

    pub fn json(&self, path: &Path) -> Option<serde_json::Value> {
        let files = self.files.lock();
        files
            .get(path)
            .map(|b| serde_json::from_slice(b).expect("stored bytes are JSON"))
    }

    /// 已完成的写入次数
    pub fn writes(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
    /// 已开始（含仍挂起）的写入次数
    pub fn writes_started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
    pub fn max_concurrent_writes(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// 之后的写入在 release 之前一直挂起
    pub fn hold_writes(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }
    pub fn release_one(&self) {
        self.permits.add_permits(1);
    }
    pub fn release_all(&self) {
        self.hold.store(false, Ordering::SeqCst);
        self.permits.add_permits(1024);
    }
    pub fn fail_writes(&self, on: bool) {
        self.fail_writes.store(on, Ordering::SeqCst);
    }
    pub fn fail_reads(&self, on: bool) {
        self.fail_reads.store(on, Ordering::SeqCst);
    }

    /// 等到累计至少 n 次写入已进入 write_all
    pub async fn wait_write_started(&self, n: usize) {
        tokio::time::timeout(WAIT, async {
            loop {
                let notified = self.entered.notified();
                if self.started.load(Ordering::SeqCst) >= n {
                    return;
                }
                notified.await;
            }
        })
        .await
        .expect("write never started");
    }
}

#[async_trait]
impl FileSystem for MemFs {
    async fn exists(&self, path: &Path) -> bool {
        self.files.lock().contains_key(path)
    }

    async fn read_all(&self, path: &Path) -> io::Result<Vec<u8>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read denied"));
        }
        self.files
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }

    async fn write_all(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.started.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_waiters();
        if self.hold.load(Ordering::SeqCst) {
            self.permits.acquire().await.expect("semaphore open").forget();
        }
        let out = if self.fail_writes.load(Ordering::SeqCst) {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "write denied"))
        } else {
            self.files.lock().insert(path.to_path_buf(), bytes.to_vec());
            Ok(())
        };
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.finished.fetch_add(1, Ordering::SeqCst);
        out
    }
}

pub fn store_on<T>(fs: &Arc<MemFs>, path: &str, defaults: T) -> ConfigStore<T>
where
    T: Serialize + DeserializeOwned,
{
    let cfg = StoreConfig {
        pretty: false,
        ..StoreConfig::default()
    }
    .with_filesystem(fs.clone());
    ConfigStore::with_config(cfg, path, defaults).expect("encode defaults")
}

/// 等待当前在途保存结束（不关闭自动保存）
pub async fn settled<T>(store: &ConfigStore<T>) {
    tokio::time::timeout(WAIT, async {
        while store.is_saving() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("save never settled");
}
