//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use odrive_sdk::prelude::*;
//! ```

// 编排层
pub use crate::{ControlTask, NodeConfig, Orchestrator, OrchestratorConfig, SdkError};

// 会话层
pub use odrive_driver::{DriverError, NodeSession, NodeSessionBuilder, NodeState, SessionState};

// 协议层常用类型
pub use odrive_protocol::{AxisState, ControlMode, InputMode, NodeId, Telemetry, TelemetryKind};

// 总线与存储
pub use odrive_can::{BusKind, CanAdapter, CanError};
pub use odrive_store::{ColumnType, StateSnapshotRow, StoreError, TelemetryStore};
