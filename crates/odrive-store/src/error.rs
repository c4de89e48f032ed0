//! 存储层错误类型定义

use thiserror::Error;

/// 存储层错误类型
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite 错误（连接、语句执行、约束）
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// 表名/列名不是合法标识符
    #[error("Invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    /// 值与列声明类型不符
    #[error("Value for column '{column}' does not match expected type '{expected}'")]
    TypeMismatch { column: String, expected: String },

    /// 表中不存在该列
    #[error("Unknown column '{column}' in table '{table}'")]
    UnknownColumn { table: String, column: String },

    /// 查询没有指定任何列
    #[error("No columns requested from table '{0}'")]
    NoColumns(String),
}
