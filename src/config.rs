use std::sync::Arc;

use crate::fs::{FileSystem, TokioFs};

/// Options for a single [`ConfigStore`](crate::store::ConfigStore).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// 初始 autoSave 状态；运行期可通过 `set_auto_save` 修改
    pub auto_save: bool,
    /// 写盘时是否缩进输出
    pub pretty: bool,
    /// 保存失败广播通道容量（慢订阅者超出容量后丢弃最旧的错误）
    pub error_capacity: usize,
    pub filesystem: Arc<dyn FileSystem>,
}

pub const STORE_DEFAULT_ERROR_CAPACITY: usize = 16;

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            auto_save: true,
            pretty: true,
            error_capacity: STORE_DEFAULT_ERROR_CAPACITY,
            filesystem: Arc::new(TokioFs),
        }
    }
}

impl StoreConfig {
    pub fn with_filesystem(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.filesystem = fs;
        self
    }
}
