//! 驱动层错误类型定义

use crate::lifecycle::SessionState;
use odrive_can::CanError;
use odrive_protocol::ProtocolError;
use odrive_store::StoreError;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 总线不可用（打开失败、发送失败、连接已关闭）
    #[error("CAN transport error: {0}")]
    Transport(#[from] CanError),

    /// 协议解析错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 持久化失败
    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    /// 握手期间在超时内未收到闭环状态心跳
    #[error("Node {node_id} did not report closed-loop control within {timeout_ms} ms")]
    HandshakeStalled { node_id: u8, timeout_ms: u64 },

    /// 操作被取消（会话已停止）
    #[error("Operation cancelled")]
    Cancelled,

    /// 会话状态不允许该操作
    #[error("Invalid session state: expected {expected:?}, got {actual:?}")]
    InvalidState {
        expected: SessionState,
        actual: SessionState,
    },

    /// 总线尚未打开
    #[error("Bus connection not open")]
    NotConnected,

    /// 等待超时
    #[error("Operation timeout after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// 配置无效
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DriverError {
    /// 是否为停止/取消导致的结束（而非故障）
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DriverError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::HandshakeStalled {
            node_id: 1,
            timeout_ms: 5000,
        };
        assert_eq!(
            err.to_string(),
            "Node 1 did not report closed-loop control within 5000 ms"
        );

        let err = DriverError::from(CanError::NotStarted);
        assert!(err.to_string().contains("Device not started"));

        let err = DriverError::from(ProtocolError::InvalidNodeId { id: 0x40 });
        assert!(err.to_string().starts_with("Protocol error"));
    }

    #[test]
    fn test_is_cancelled() {
        assert!(DriverError::Cancelled.is_cancelled());
        assert!(!DriverError::NotConnected.is_cancelled());
    }
}
