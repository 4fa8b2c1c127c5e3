//! 统一错误类型：加载/保存路径上的全部失败都归入此枚举。
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfStoreError {
    /// 文件系统读写失败（不自动重试）
    #[error("I/O error accessing config at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// 文件内容不是合法 JSON，或无法解码为配置类型
    #[error("failed to decode config at {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// 配置值无法序列化
    #[error("failed to encode config: {0}")]
    Encode(#[source] serde_json::Error),
    /// 自动保存触发时找不到 tokio 运行时
    #[error("no tokio runtime available to run the save")]
    NoRuntime,
}

impl ConfStoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfStoreError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T = ()> = std::result::Result<T, ConfStoreError>;
