//! 会话：同一时刻最多一个进行中的 winget 调用

use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// 一次进行中的操作
#[derive(Debug, Clone)]
pub struct Operation {
    generation: u64,
    token: CancellationToken,
}

impl Operation {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    current: Option<CancellationToken>,
}

/// 持有当前操作的取消令牌
///
/// 开始新操作前先取消上一个操作；取消是协作式的，
/// 由执行器在进程启动到退出之间观察令牌并结束进程树。
#[derive(Debug, Default)]
pub struct Session {
    slot: Mutex<Slot>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取消上一个操作（如果有），返回新操作
    pub fn begin(&self) -> Operation {
        let token = CancellationToken::new();
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.current.replace(token.clone()) {
            log::debug!("Session::begin: 取消上一个操作");
            previous.cancel();
        }
        slot.generation += 1;
        Operation {
            generation: slot.generation,
            token,
        }
    }

    /// 请求取消当前操作
    pub fn cancel(&self) {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(token) = &slot.current {
            token.cancel();
        }
    }

    /// 操作结束后释放槽位；槽位已被更新的操作占用时不动
    pub fn finish(&self, operation: &Operation) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if slot.generation == operation.generation {
            slot.current = None;
        }
    }

    pub fn is_busy(&self) -> bool {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        slot.current.as_ref().is_some_and(|t| !t.is_cancelled())
    }
}
