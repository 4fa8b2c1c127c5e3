//! 保存闸门：空闲 / 保存中 两态，外加“保存结束”等待者列表。
//!
//! 同一存储实例任一时刻最多只有一个保存在执行；新请求不排队（合并），
//! 需要等待的一方（close、显式 save）登记一次性等待者。
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::Arc;
use tokio::sync::oneshot;

#[derive(Default)]
struct FlightState {
    saving: bool,
    waiters: SmallVec<[oneshot::Sender<()>; 2]>,
}

#[derive(Default)]
pub(crate) struct SaveFlight {
    state: Mutex<FlightState>,
}

/// 持有即代表“保存中”；析构时回到空闲并唤醒全部等待者（含 panic / 取消路径）。
#[must_use]
pub(crate) struct FlightClaim {
    flight: Arc<SaveFlight>,
}

impl Drop for FlightClaim {
    fn drop(&mut self) {
        self.flight.finish();
    }
}

impl SaveFlight {
    pub(crate) fn is_saving(&self) -> bool {
        self.state.lock().saving
    }

    /// 空闲则占用并返回凭据；保存中返回 None（调用方放弃本次保存）
    pub(crate) fn try_begin(self: &Arc<Self>) -> Option<FlightClaim> {
        let mut s = self.state.lock();
        if s.saving {
            return None;
        }
        s.saving = true;
        Some(FlightClaim {
            flight: self.clone(),
        })
    }

    /// 等到空闲后占用
    pub(crate) async fn begin(self: &Arc<Self>) -> FlightClaim {
        loop {
            if let Some(claim) = self.try_begin() {
                return claim;
            }
            // 竞态：登记前保存可能已结束，wait_idle 返回 None 时直接重试
            if let Some(rx) = self.wait_idle() {
                let _ = rx.await;
            }
        }
    }

    /// 保存中则登记一个等待者；空闲返回 None
    pub(crate) fn wait_idle(&self) -> Option<oneshot::Receiver<()>> {
        let mut s = self.state.lock();
        if !s.saving {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        s.waiters.push(tx);
        Some(rx)
    }

    fn finish(&self) {
        let waiters = {
            let mut s = self.state.lock();
            s.saving = false;
            std::mem::take(&mut s.waiters)
        };
        for tx in waiters {
            let _ = tx.send(());
        }
    }
}
