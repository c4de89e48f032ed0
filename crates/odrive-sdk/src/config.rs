//! 编排器配置文件（TOML）
//!
//! ```toml
//! database = "odrive_data.db"
//!
//! [[nodes]]
//! node_id = 0
//! interface = "can0"
//!
//! [[nodes]]
//! node_id = 1
//! interface = "can0"
//! closed_loop = false
//! persist_interval_ms = 20
//! ```

use crate::error::SdkError;
use odrive_can::BusKind;
use odrive_driver::SessionConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_database() -> PathBuf {
    PathBuf::from("odrive_data.db")
}

fn default_interface() -> String {
    "can0".to_string()
}

fn default_true() -> bool {
    true
}

fn default_handshake_timeout_ms() -> u64 {
    5000
}

fn default_persist_interval_ms() -> u64 {
    10
}

fn default_idle_poll_interval_us() -> u64 {
    1000
}

/// 编排器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// SQLite 数据库路径
    #[serde(default = "default_database")]
    pub database: PathBuf,

    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            nodes: Vec::new(),
        }
    }
}

/// 单个节点的配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    pub node_id: u8,

    #[serde(default = "default_interface")]
    pub interface: String,

    #[serde(default)]
    pub bus_kind: BusKind,

    #[serde(default = "default_true")]
    pub closed_loop: bool,

    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    #[serde(default = "default_persist_interval_ms")]
    pub persist_interval_ms: u64,

    #[serde(default = "default_idle_poll_interval_us")]
    pub idle_poll_interval_us: u64,
}

impl NodeConfig {
    /// 使用默认值创建
    pub fn new(node_id: u8) -> Self {
        Self {
            node_id,
            interface: default_interface(),
            bus_kind: BusKind::default(),
            closed_loop: true,
            handshake_timeout_ms: default_handshake_timeout_ms(),
            persist_interval_ms: default_persist_interval_ms(),
            idle_poll_interval_us: default_idle_poll_interval_us(),
        }
    }

    /// 转换为会话配置
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            interface: self.interface.clone(),
            bus_kind: self.bus_kind,
            closed_loop: self.closed_loop,
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            persist_interval: Duration::from_millis(self.persist_interval_ms),
            idle_poll_interval: Duration::from_micros(self.idle_poll_interval_us),
        }
    }
}

impl OrchestratorConfig {
    /// 从 TOML 文本解析并校验
    pub fn from_toml_str(content: &str) -> Result<Self, SdkError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SdkError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// 同一接口上的节点 ID 不能重复
    pub fn validate(&self) -> Result<(), SdkError> {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert((node.interface.as_str(), node.node_id)) {
                return Err(SdkError::InvalidConfig(format!(
                    "node {} configured twice on interface {}",
                    node.node_id, node.interface
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied() {
        let config = OrchestratorConfig::from_toml_str(
            r#"
            [[nodes]]
            node_id = 1
            "#,
        )
        .unwrap();
        assert_eq!(config.database, PathBuf::from("odrive_data.db"));
        assert_eq!(config.nodes, vec![NodeConfig::new(1)]);

        let session = config.nodes[0].session_config();
        assert_eq!(session, SessionConfig::default());
    }

    #[test]
    fn test_full_node_entry() {
        let config = OrchestratorConfig::from_toml_str(
            r#"
            database = "/tmp/trials.db"

            [[nodes]]
            node_id = 0
            interface = "vcan0"
            bus_kind = "virtual"
            closed_loop = false
            handshake_timeout_ms = 250
            persist_interval_ms = 20
            idle_poll_interval_us = 500
            "#,
        )
        .unwrap();
        let node = &config.nodes[0];
        assert_eq!(node.bus_kind, BusKind::Virtual);

        let session = node.session_config();
        assert_eq!(session.interface, "vcan0");
        assert!(!session.closed_loop);
        assert_eq!(session.handshake_timeout, Duration::from_millis(250));
        assert_eq!(session.persist_interval, Duration::from_millis(20));
        assert_eq!(session.idle_poll_interval, Duration::from_micros(500));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = OrchestratorConfig::from_toml_str(
            r#"
            [[nodes]]
            node_id = 1
            bitrate = 500000
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, SdkError::Config(_)));
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let err = OrchestratorConfig::from_toml_str(
            r#"
            [[nodes]]
            node_id = 1

            [[nodes]]
            node_id = 1
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, SdkError::InvalidConfig(_)));

        // 不同接口上的相同 ID 是允许的
        OrchestratorConfig::from_toml_str(
            r#"
            [[nodes]]
            node_id = 1
            interface = "can0"

            [[nodes]]
            node_id = 1
            interface = "can1"
            "#,
        )
        .unwrap();
    }

    #[test]
    fn test_load_missing_file() {
        let err = OrchestratorConfig::load("/nonexistent/odrive.toml").unwrap_err();
        assert!(matches!(err, SdkError::Io(_)));
    }
}
