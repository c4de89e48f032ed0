//! # ODrive Protocol
//!
//! ODrive CANSimple 协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `ids`: 命令码常量与仲裁 ID 组合/拆分
//! - `control`: 控制帧构建（主机 → 节点）
//! - `feedback`: 遥测帧解析（节点 → 主机），按命令码查表分发
//!
//! ## 仲裁 ID
//!
//! 标准帧 11-bit ID 的低 5 位是命令码，高 6 位是节点地址：
//!
//! ```text
//! arbitration_id = node_id << 5 | command_code
//! ```
//!
//! ## 字节序
//!
//! CANSimple 的所有多字节字段都是
//! **小端字节序**（Intel）。本模块提供了字节序转换工具函数。

pub mod control;
pub mod feedback;
pub mod ids;

// 重新导出常用类型
pub use control::*;
pub use feedback::*;
pub use ids::*;

use std::fmt;
use thiserror::Error;

/// CAN 2.0 标准帧的统一抽象
///
/// `OdriveFrame` 是协议层和硬件层之间的中间抽象：
/// 协议层只产生/消费 `OdriveFrame`，具体的 SocketCAN/虚拟总线转换在 CAN 层完成。
///
/// # 设计特性
///
/// - **Copy trait**：零成本复制
/// - **固定 8 字节**：避免堆分配
/// - **RTR 标志**：CANSimple 用远程帧请求遥测数据，`is_remote` 帧不携带数据
///
/// ```rust
/// use odrive_protocol::OdriveFrame;
///
/// let frame = OdriveFrame::new(0x02E, &[0xCD, 0xCC, 0xCC, 0x3D]);
/// assert_eq!(frame.node_id(), 1);
/// assert_eq!(frame.command_code(), 0x0E);
/// assert_eq!(frame.data_slice(), &[0xCD, 0xCC, 0xCC, 0x3D]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OdriveFrame {
    /// 仲裁 ID（11-bit 标准帧）
    pub id: u32,

    /// 帧数据（固定 8 字节，未使用部分为 0）
    pub data: [u8; 8],

    /// 有效数据长度 (0-8)；远程帧时为请求的 DLC
    pub len: u8,

    /// 是否为远程请求帧（RTR）
    pub is_remote: bool,
}

impl OdriveFrame {
    /// 创建数据帧
    pub fn new(id: u16, data: &[u8]) -> Self {
        let mut fixed_data = [0u8; 8];
        let len = data.len().min(8);
        fixed_data[..len].copy_from_slice(&data[..len]);

        Self {
            id: id as u32,
            data: fixed_data,
            len: len as u8,
            is_remote: false,
        }
    }

    /// 创建远程请求帧（RTR，无数据）
    pub fn new_remote(id: u16, dlc: u8) -> Self {
        Self {
            id: id as u32,
            data: [0u8; 8],
            len: dlc.min(8),
            is_remote: true,
        }
    }

    /// 获取数据切片（只包含有效数据）
    ///
    /// 远程帧没有数据，始终返回空切片。
    pub fn data_slice(&self) -> &[u8] {
        if self.is_remote {
            return &[];
        }
        &self.data[..self.len as usize]
    }

    /// 获取仲裁 ID
    pub fn id(&self) -> u32 {
        self.id
    }

    /// 节点地址（仲裁 ID 高 6 位）
    pub fn node_id(&self) -> u8 {
        split_arbitration_id(self.id).0
    }

    /// 命令码（仲裁 ID 低 5 位）
    pub fn command_code(&self) -> u8 {
        split_arbitration_id(self.id).1
    }
}

/// 节点地址
///
/// 仲裁 ID 只有 6 位留给节点地址，构造时即校验范围，
/// 之后所有编码路径都不会失败。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u8", into = "u8"))]
pub struct NodeId(u8);

impl NodeId {
    /// 创建节点地址（0..=0x3F）
    pub fn new(id: u8) -> Result<Self, ProtocolError> {
        if id > MAX_NODE_ID {
            return Err(ProtocolError::InvalidNodeId { id });
        }
        Ok(Self(id))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for NodeId {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NodeId> for u8 {
    fn from(value: NodeId) -> Self {
        value.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 协议解析错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// 已识别的命令码，但载荷长度与协议定义不符
    #[error("Malformed frame for command 0x{code:02X}: expected {expected} bytes, got {actual}")]
    MalformedFrame {
        code: u8,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid node id: {id} (max 0x3F)")]
    InvalidNodeId { id: u8 },

    #[error("Unexpected command code: expected 0x{expected:02X}, got 0x{actual:02X}")]
    UnexpectedCommand { expected: u8, actual: u8 },

    #[error("Invalid value for field {field}: {value}")]
    InvalidValue { field: String, value: u32 },

    #[error("Unknown name for {kind}: {name:?}")]
    InvalidName { kind: &'static str, name: String },
}

/// 校验帧的命令码和载荷长度，返回有效数据
///
/// 控制帧解码（模拟节点、回环测试）和遥测帧解码共用。
pub(crate) fn expect_payload(
    frame: &OdriveFrame,
    code: u8,
    expected: usize,
) -> Result<&[u8], ProtocolError> {
    if frame.command_code() != code {
        return Err(ProtocolError::UnexpectedCommand {
            expected: code,
            actual: frame.command_code(),
        });
    }
    let data = frame.data_slice();
    if data.len() != expected {
        return Err(ProtocolError::MalformedFrame {
            code,
            expected,
            actual: data.len(),
        });
    }
    Ok(data)
}

/// 字节序转换工具函数
///
/// CANSimple 使用小端字节序，`offset` 越界由调用方在长度校验阶段保证。
pub fn read_f32_le(data: &[u8], offset: usize) -> f32 {
    f32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// 小端字节序转 u32
pub fn read_u32_le(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// 小端字节序转 i16
pub fn read_i16_le(data: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([data[offset], data[offset + 1]])
}
