//! SDK 顶层错误类型

use odrive_driver::DriverError;
use odrive_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SdkError {
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// 配置文件解析失败
    #[error("Config parse error: {0}")]
    Config(#[from] toml::de::Error),

    /// 配置内容不合法（重复节点等）
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SdkError {
    /// 是否为停止/取消导致的结束
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SdkError::Driver(e) if e.is_cancelled())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_layers() {
        let err = SdkError::from(DriverError::Cancelled);
        assert!(err.is_cancelled());
        assert_eq!(err.to_string(), "Driver error: Operation cancelled");

        let err = SdkError::from(StoreError::InvalidIdentifier("x y".into()));
        assert!(!err.is_cancelled());
        assert!(err.to_string().starts_with("Store error"));
    }
}
