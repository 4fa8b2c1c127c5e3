//! 两个实例指向同一文件：第一个加载后做一次深层写入，等待落盘后关闭。
//!
//! cargo run --example two_stores -- [path]

use mmg_confstore::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Work {
    today: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Chores {
    work: Work,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Mood {
    want: Chores,
    really: Chores,
}

fn chores(today: &str) -> Chores {
    Chores {
        work: Work {
            today: today.to_string(),
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let path = std::env::args()
        .nth(1)
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("mmg-confstore-demo.json"));
    if path.exists() {
        std::fs::remove_file(&path)?;
    }

    let defaults = Mood {
        want: chores("i dont want to do the work today"),
        really: chores("i dont really want to do the work today"),
    };
    let first = ConfigStore::new(&path, defaults.clone())?;
    // 第二个实例只构造不加载：与第一个之间没有任何协调
    let second = ConfigStore::new(&path, defaults)?;

    first.load().await?;
    tracing::info!(config = %first.snapshot(), "loaded");

    tracing::info!("making mutation");
    first.config(|c| {
        if let Some(mut work) = c.at(["really", "work"]) {
            work.set("today", "no wait i really want to do the work today");
        }
    });
    first.close().await;

    second.load().await?;
    let mood: Mood = second.get()?;
    tracing::info!(today = %mood.really.work.today, "second store sees");
    Ok(())
}
