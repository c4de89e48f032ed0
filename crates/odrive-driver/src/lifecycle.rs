//! 会话生命周期状态
//!
//! ```text
//! Uninitialized → BusOpen → (AwaitingClosedLoop → ClosedLoop) → Running → Stopped
//! ```

use std::sync::atomic::{AtomicU8, Ordering};

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum SessionState {
    #[default]
    Uninitialized = 0,
    /// 总线已打开并清空了积压帧
    BusOpen = 1,
    /// 已请求闭环控制，等待心跳确认
    AwaitingClosedLoop = 2,
    /// 节点已确认进入闭环控制
    ClosedLoop = 3,
    /// 接收/持久化循环运行中
    Running = 4,
    /// 已停止（终态）
    Stopped = 5,
}

impl SessionState {
    /// 从 u8 转换，无效值视为 `Stopped`
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Uninitialized,
            1 => Self::BusOpen,
            2 => Self::AwaitingClosedLoop,
            3 => Self::ClosedLoop,
            4 => Self::Running,
            _ => Self::Stopped,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// 是否处于可以启动循环的状态
    pub fn is_ready(self) -> bool {
        matches!(self, Self::BusOpen | Self::ClosedLoop)
    }
}

/// 会话状态（原子版本，任务间共享）
#[derive(Debug, Default)]
pub struct AtomicSessionState {
    inner: AtomicU8,
}

impl AtomicSessionState {
    pub fn new(state: SessionState) -> Self {
        Self {
            inner: AtomicU8::new(state.as_u8()),
        }
    }

    pub fn get(&self) -> SessionState {
        SessionState::from_u8(self.inner.load(Ordering::Acquire))
    }

    pub fn set(&self, state: SessionState) {
        self.inner.store(state.as_u8(), Ordering::Release);
    }

    /// 比较并交换，失败时返回当前状态
    pub fn transition(&self, from: SessionState, to: SessionState) -> Result<(), SessionState> {
        self.inner
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(SessionState::from_u8)
    }
}
