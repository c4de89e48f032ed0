//! Builder 模式实现
//!
//! 提供链式构造 `NodeSession` 实例的便捷方式。

use crate::error::DriverError;
use crate::session::NodeSession;
use odrive_can::BusKind;
use odrive_protocol::NodeId;
use odrive_store::TelemetryStore;
use std::sync::Arc;
use std::time::Duration;

/// 会话配置
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// 总线接口名（SocketCAN 接口或虚拟总线通道）
    pub interface: String,
    pub bus_kind: BusKind,
    /// `initialize()` 时是否请求闭环控制并等待心跳确认
    pub closed_loop: bool,
    /// 闭环握手的最长等待时间
    pub handshake_timeout: Duration,
    /// 持久化周期
    pub persist_interval: Duration,
    /// 接收循环空闲时的休眠时间
    pub idle_poll_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            interface: "can0".to_string(),
            bus_kind: BusKind::SocketCan,
            closed_loop: true,
            handshake_timeout: Duration::from_secs(5),
            persist_interval: Duration::from_millis(10),
            idle_poll_interval: Duration::from_millis(1),
        }
    }
}

impl SessionConfig {
    /// 校验配置（周期不能为 0）
    pub fn validate(&self) -> Result<(), DriverError> {
        if self.persist_interval.is_zero() {
            return Err(DriverError::InvalidConfig(
                "persist_interval must be greater than zero".into(),
            ));
        }
        if self.idle_poll_interval.is_zero() {
            return Err(DriverError::InvalidConfig(
                "idle_poll_interval must be greater than zero".into(),
            ));
        }
        if self.interface.is_empty() {
            return Err(DriverError::InvalidConfig("interface must not be empty".into()));
        }
        Ok(())
    }
}

/// NodeSession Builder（链式构造）
///
/// # Example
///
/// ```no_run
/// use odrive_driver::NodeSessionBuilder;
/// use odrive_store::TelemetryStore;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let store = Arc::new(TelemetryStore::open("odrive_data.db").unwrap());
/// let session = NodeSessionBuilder::new(1, store)
///     .interface("can0")
///     .persist_interval(Duration::from_millis(20))
///     .build()
///     .unwrap();
/// ```
pub struct NodeSessionBuilder {
    node_id: u8,
    store: Arc<TelemetryStore>,
    config: SessionConfig,
}

impl NodeSessionBuilder {
    pub fn new(node_id: u8, store: Arc<TelemetryStore>) -> Self {
        Self {
            node_id,
            store,
            config: SessionConfig::default(),
        }
    }

    /// 整体替换配置
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// 设置总线接口（默认 `"can0"`）
    pub fn interface(mut self, interface: impl Into<String>) -> Self {
        self.config.interface = interface.into();
        self
    }

    /// 设置总线类型（默认 SocketCAN）
    pub fn bus_kind(mut self, bus_kind: BusKind) -> Self {
        self.config.bus_kind = bus_kind;
        self
    }

    /// 是否在初始化时进入闭环控制（默认 true）
    pub fn closed_loop(mut self, closed_loop: bool) -> Self {
        self.config.closed_loop = closed_loop;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    pub fn persist_interval(mut self, interval: Duration) -> Self {
        self.config.persist_interval = interval;
        self
    }

    pub fn idle_poll_interval(mut self, interval: Duration) -> Self {
        self.config.idle_poll_interval = interval;
        self
    }

    /// 构建会话（不打开总线，见 [`NodeSession::initialize`]）
    pub fn build(self) -> Result<NodeSession, DriverError> {
        let node = NodeId::new(self.node_id)?;
        self.config.validate()?;
        Ok(NodeSession::new(node, self.config, self.store))
    }
}
