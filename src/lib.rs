pub mod config;
pub mod error;
mod flight;
pub mod fs;
pub mod store;
pub mod view;

pub mod prelude {
    pub use crate::config::StoreConfig;
    pub use crate::error::{ConfStoreError, Result};
    pub use crate::fs::{FileSystem, TokioFs};
    pub use crate::store::ConfigStore;
    // 视图只通过 ConfigStore::config 的闭包参数获得
    pub use crate::view::{ConfigView, Entry, Key};
}
