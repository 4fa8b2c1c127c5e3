//! 文件系统协作者：存储只依赖 exists / read_all / write_all 三个操作。
use async_trait::async_trait;
use std::{fmt, io, path::Path};

#[async_trait]
pub trait FileSystem: Send + Sync + 'static {
    async fn exists(&self, path: &Path) -> bool;
    async fn read_all(&self, path: &Path) -> io::Result<Vec<u8>>;
    async fn write_all(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;
}

impl fmt::Debug for dyn FileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileSystem(..)")
    }
}

/// Host filesystem via `tokio::fs`.
///
/// Writes go to a uniquely named sibling temp file and are renamed into place,
/// so readers never observe a half-written document and two stores sharing a
/// location never collide on the temp name.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioFs;

#[async_trait]
impl FileSystem for TokioFs {
    async fn exists(&self, path: &Path) -> bool {
        // 无法判定（如权限问题）按不存在处理，随后的写入会把真实错误暴露出来
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn read_all(&self, path: &Path) -> io::Result<Vec<u8>> {
        tokio::fs::read(path).await
    }

    async fn write_all(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let mut tmp_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        tmp_name.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
        let tmp = path.with_file_name(tmp_name);
        if let Err(e) = tokio::fs::write(&tmp, bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(())
    }
}
