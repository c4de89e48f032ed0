//! # ODrive CAN Adapter Layer
//!
//! CAN 硬件抽象层，提供统一的 CAN 接口抽象。
//!
//! - Linux: [`SocketCanAdapter`]（内核 SocketCAN）
//! - 所有平台: [`VirtualCanAdapter`]（进程内虚拟总线，按通道名互联，用于测试和仿真）

use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

// 重新导出 odrive-protocol 中的 OdriveFrame
pub use odrive_protocol::OdriveFrame;

#[cfg(target_os = "linux")]
pub mod socketcan;

#[cfg(target_os = "linux")]
pub use socketcan::SocketCanAdapter;

pub mod virtual_bus;

pub use virtual_bus::{VirtualBus, VirtualCanAdapter};

/// CAN 适配层统一错误类型
#[derive(Error, Debug)]
pub enum CanError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device Error: {0}")]
    Device(#[from] CanDeviceError),
    #[error("Read timeout")]
    Timeout,
    #[error("Device not started")]
    NotStarted,
}

impl CanError {
    /// 是否为"本次没有数据"（超时），而不是真正的故障
    pub fn is_timeout(&self) -> bool {
        matches!(self, CanError::Timeout)
    }
}

/// 设备/后端错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanDeviceErrorKind {
    Unknown,
    NotFound,
    AccessDenied,
    Unsupported,
    InvalidFrame,
    Backend,
}

/// 结构化设备错误
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct CanDeviceError {
    pub kind: CanDeviceErrorKind,
    pub message: String,
}

impl CanDeviceError {
    pub fn new(kind: CanDeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            CanDeviceErrorKind::NotFound
                | CanDeviceErrorKind::AccessDenied
                | CanDeviceErrorKind::Unsupported
        )
    }
}

/// CAN 适配器
///
/// 所有方法都是同步的；会话层只在协作式任务里调用 `try_receive`（零超时），
/// 因此不会阻塞调度器。
pub trait CanAdapter {
    fn send(&mut self, frame: OdriveFrame) -> Result<(), CanError>;
    fn receive(&mut self) -> Result<OdriveFrame, CanError>;
    fn set_receive_timeout(&mut self, _timeout: Duration) {}
    fn receive_timeout(&mut self, timeout: Duration) -> Result<OdriveFrame, CanError> {
        self.set_receive_timeout(timeout);
        self.receive()
    }
    fn try_receive(&mut self) -> Result<Option<OdriveFrame>, CanError> {
        match self.receive_timeout(Duration::ZERO) {
            Ok(frame) => Ok(Some(frame)),
            Err(e) if e.is_timeout() => Ok(None),
            Err(e) => Err(e),
        }
    }
    /// 关闭连接；之后的收发返回 `CanError::NotStarted`。重复调用无副作用。
    fn shutdown(&mut self) -> Result<(), CanError> {
        Ok(())
    }
}

impl<A: CanAdapter + ?Sized> CanAdapter for Box<A> {
    fn send(&mut self, frame: OdriveFrame) -> Result<(), CanError> {
        (**self).send(frame)
    }
    fn receive(&mut self) -> Result<OdriveFrame, CanError> {
        (**self).receive()
    }
    fn set_receive_timeout(&mut self, timeout: Duration) {
        (**self).set_receive_timeout(timeout)
    }
    fn receive_timeout(&mut self, timeout: Duration) -> Result<OdriveFrame, CanError> {
        (**self).receive_timeout(timeout)
    }
    fn try_receive(&mut self) -> Result<Option<OdriveFrame>, CanError> {
        (**self).try_receive()
    }
    fn shutdown(&mut self) -> Result<(), CanError> {
        (**self).shutdown()
    }
}

/// 总线类型（python-can 的 `bustype`）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum BusKind {
    /// Linux SocketCAN（默认）
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "socketcan", alias = "socket_can"))]
    SocketCan,
    /// 进程内虚拟总线：相同通道名的适配器互相可见
    Virtual,
}

impl FromStr for BusKind {
    type Err = CanDeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "socketcan" | "socket_can" => Ok(BusKind::SocketCan),
            "virtual" => Ok(BusKind::Virtual),
            _ => Err(CanDeviceError::new(
                CanDeviceErrorKind::Unsupported,
                format!("Unsupported bus kind: {s:?}"),
            )),
        }
    }
}

impl fmt::Display for BusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusKind::SocketCan => write!(f, "socketcan"),
            BusKind::Virtual => write!(f, "virtual"),
        }
    }
}

/// 已打开的适配器（跨任务共享时需要 `Send`）
pub type BoxedAdapter = Box<dyn CanAdapter + Send>;

/// 打开总线连接
///
/// # 参数
/// - `interface`: SocketCAN 接口名（如 `"can0"`）或虚拟总线通道名
/// - `kind`: 总线类型
pub fn open(interface: &str, kind: BusKind) -> Result<BoxedAdapter, CanError> {
    match kind {
        BusKind::Virtual => Ok(Box::new(VirtualCanAdapter::open(interface))),
        #[cfg(target_os = "linux")]
        BusKind::SocketCan => Ok(Box::new(SocketCanAdapter::new(interface)?)),
        #[cfg(not(target_os = "linux"))]
        BusKind::SocketCan => Err(CanError::Device(CanDeviceError::new(
            CanDeviceErrorKind::Unsupported,
            format!("SocketCAN is only available on Linux (interface '{interface}')"),
        ))),
    }
}
