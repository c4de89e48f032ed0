//! # ODrive Telemetry Store
//!
//! 追加写入的 SQLite 时序存储。
//!
//! ## 表结构
//!
//! ```text
//! ODriveData(
//!     UniqueID INTEGER PRIMARY KEY AUTOINCREMENT,
//!     trial_id INTEGER NOT NULL,
//!     node_ID TEXT, time REAL,
//!     position, velocity, torque_target, torque_estimate,
//!     bus_voltage, bus_current, iq_setpoint, iq_measured,
//!     electrical_power, mechanical_power   -- 均为 REAL
//! )
//! ```
//!
//! ## 并发模型
//!
//! 一个 [`TelemetryStore`] 实例就是一个单写者：连接由互斥锁保护，
//! 多个会话共享同一实例（`Arc<TelemetryStore>`）时所有写入串行化。
//! Trial ID 的分配也在同一把锁内完成，因此共享实例的会话不会拿到重复的 ID。

mod error;
mod row;

pub use error::StoreError;
pub use row::StateSnapshotRow;
pub use rusqlite::types::Value;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use tracing::{debug, trace};

/// 主表名
pub const ODRIVE_TABLE: &str = "ODriveData";

const CREATE_ODRIVE_TABLE: &str = "
CREATE TABLE IF NOT EXISTS ODriveData (
    UniqueID INTEGER PRIMARY KEY AUTOINCREMENT,
    trial_id INTEGER NOT NULL,
    node_ID TEXT,
    time REAL,
    position REAL,
    velocity REAL,
    torque_target REAL,
    torque_estimate REAL,
    bus_voltage REAL,
    bus_current REAL,
    iq_setpoint REAL,
    iq_measured REAL,
    electrical_power REAL,
    mechanical_power REAL
);";

const INSERT_ROW: &str = "
INSERT INTO ODriveData (
    trial_id, node_ID, time, position, velocity, torque_target, torque_estimate,
    bus_voltage, bus_current, iq_setpoint, iq_measured, electrical_power, mechanical_power
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)";

const SELECT_TRIAL: &str = "
SELECT trial_id, node_ID, time, position, velocity, torque_target, torque_estimate,
       bus_voltage, bus_current, iq_setpoint, iq_measured, electrical_power, mechanical_power
FROM ODriveData WHERE trial_id = ?1 ORDER BY UniqueID";

/// 辅助表的列类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "UPPERCASE"))]
pub enum ColumnType {
    Integer,
    Real,
    Text,
}

impl ColumnType {
    pub fn as_sql(self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
        }
    }

    fn from_declared(declared: &str) -> Option<Self> {
        match declared.trim().to_ascii_uppercase().as_str() {
            "INTEGER" | "INT" => Some(ColumnType::Integer),
            "REAL" | "FLOAT" | "DOUBLE" => Some(ColumnType::Real),
            "TEXT" => Some(ColumnType::Text),
            _ => None,
        }
    }

    /// 值是否可以写入该类型的列
    ///
    /// `REAL` 列也接受整数；`NULL` 对任何列都合法。
    pub fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (ColumnType::Integer, Value::Integer(_))
                | (ColumnType::Real, Value::Integer(_) | Value::Real(_))
                | (ColumnType::Text, Value::Text(_))
        )
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// 校验 SQL 标识符：ASCII 字母/数字/下划线，且不以数字开头
fn validate_identifier(name: &str) -> Result<&str, StoreError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        },
        _ => false,
    };
    if valid {
        Ok(name)
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

fn opt_f64(value: Option<f32>) -> Option<f64> {
    value.map(f64::from)
}

struct Inner {
    conn: Connection,
    /// 本实例已分配但可能尚未写入的最大 trial ID
    last_reserved_trial: Option<i64>,
}

/// SQLite 遥测存储
pub struct TelemetryStore {
    inner: Mutex<Inner>,
}

impl fmt::Debug for TelemetryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryStore").finish_non_exhaustive()
    }
}

impl TelemetryStore {
    /// 打开（或创建）数据库文件并确保主表存在
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        debug!(path = %path.display(), "telemetry store opened");
        Self::with_connection(conn)
    }

    /// 内存数据库（测试、仿真）
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(CREATE_ODRIVE_TABLE)?;
        Ok(Self {
            inner: Mutex::new(Inner {
                conn,
                last_reserved_trial: None,
            }),
        })
    }

    /// 下一个 trial ID：`max(trial_id) + 1`，空表时为 1
    ///
    /// 只读查询，不做预留；并发会话应使用 [`allocate_trial_id`](Self::allocate_trial_id)。
    pub fn next_trial_id(&self) -> Result<i64, StoreError> {
        let inner = self.inner.lock();
        max_trial_id(&inner.conn).map(|max| max.map_or(1, |m| m + 1))
    }

    /// 分配并预留一个 trial ID
    ///
    /// 在存储锁内完成"读最大值 + 预留"，共享同一实例的会话即使尚未写入任何行
    /// 也不会拿到相同的 ID。
    pub fn allocate_trial_id(&self) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock();
        let from_table = max_trial_id(&inner.conn)?.map_or(1, |m| m + 1);
        let id = match inner.last_reserved_trial {
            Some(reserved) if reserved >= from_table => reserved + 1,
            _ => from_table,
        };
        inner.last_reserved_trial = Some(id);
        debug!(trial_id = id, "trial id allocated");
        Ok(id)
    }

    /// 追加一行，返回 rowid
    pub fn append(&self, row: &StateSnapshotRow) -> Result<i64, StoreError> {
        let inner = self.inner.lock();
        insert_row(&inner.conn, row)?;
        let rowid = inner.conn.last_insert_rowid();
        trace!(trial_id = row.trial_id, node_id = %row.node_id, rowid, "row appended");
        Ok(rowid)
    }

    /// 事务内批量追加；任一行失败则整批回滚
    pub fn append_batch(&self, rows: &[StateSnapshotRow]) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock();
        let tx = inner.conn.transaction()?;
        for row in rows {
            insert_row(&tx, row)?;
        }
        tx.commit()?;
        trace!(count = rows.len(), "rows appended in batch");
        Ok(rows.len())
    }

    /// 读回某次 trial 的所有行（按写入顺序）
    pub fn rows_for_trial(&self, trial_id: i64) -> Result<Vec<StateSnapshotRow>, StoreError> {
        let inner = self.inner.lock();
        let mut stmt = inner.conn.prepare(SELECT_TRIAL)?;
        let rows = stmt
            .query_map(params![trial_id], |r| {
                let f = |idx: usize| -> rusqlite::Result<Option<f32>> {
                    Ok(r.get::<_, Option<f64>>(idx)?.map(|v| v as f32))
                };
                Ok(StateSnapshotRow {
                    trial_id: r.get(0)?,
                    node_id: r.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    time: r.get::<_, Option<f64>>(2)?.unwrap_or_default(),
                    position: f(3)?,
                    velocity: f(4)?,
                    torque_target: f(5)?,
                    torque_estimate: f(6)?,
                    bus_voltage: f(7)?,
                    bus_current: f(8)?,
                    iq_setpoint: f(9)?,
                    iq_measured: f(10)?,
                    electrical_power: f(11)?,
                    mechanical_power: f(12)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// 创建辅助表（如控制器参数记录）
    ///
    /// 表自带 `UniqueID`、`trial_id INTEGER NOT NULL` 以及指向
    /// `ODriveData(trial_id)` 的外键。表已存在时不做任何修改。
    pub fn create_auxiliary_table(
        &self,
        name: &str,
        columns: &[(&str, ColumnType)],
    ) -> Result<(), StoreError> {
        let name = validate_identifier(name)?;
        let mut column_defs = Vec::with_capacity(columns.len());
        for (column, ty) in columns {
            column_defs.push(format!("{} {}", validate_identifier(column)?, ty));
        }

        let mut body = vec![
            "UniqueID INTEGER PRIMARY KEY AUTOINCREMENT".to_string(),
            "trial_id INTEGER NOT NULL".to_string(),
        ];
        body.extend(column_defs);
        body.push(format!("FOREIGN KEY (trial_id) REFERENCES {ODRIVE_TABLE}(trial_id)"));
        let sql = format!("CREATE TABLE IF NOT EXISTS {name} (\n    {}\n);", body.join(",\n    "));

        self.inner.lock().conn.execute_batch(&sql)?;
        debug!(table = name, columns = columns.len(), "auxiliary table ensured");
        Ok(())
    }

    /// 向辅助表插入一行
    ///
    /// 插入前按 `PRAGMA table_info` 声明的列类型逐个校验；
    /// 任何一列校验失败都不会写入。
    pub fn insert_auxiliary(
        &self,
        table: &str,
        trial_id: i64,
        values: &[(&str, Value)],
    ) -> Result<i64, StoreError> {
        let table = validate_identifier(table)?;
        let inner = self.inner.lock();
        let declared = column_types(&inner.conn, table)?;

        for (column, value) in values {
            validate_identifier(column)?;
            let Some(decl) = declared.get(*column) else {
                return Err(StoreError::UnknownColumn {
                    table: table.to_string(),
                    column: column.to_string(),
                });
            };
            let accepted = ColumnType::from_declared(decl).is_none_or(|ty| ty.accepts(value));
            if !accepted {
                return Err(StoreError::TypeMismatch {
                    column: column.to_string(),
                    expected: decl.clone(),
                });
            }
        }

        let mut column_list = vec!["trial_id"];
        column_list.extend(values.iter().map(|(c, _)| *c));
        let placeholders = (1..=column_list.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({placeholders})",
            column_list.join(", ")
        );

        let params = std::iter::once(Value::Integer(trial_id))
            .chain(values.iter().map(|(_, v)| v.clone()));
        inner.conn.execute(&sql, params_from_iter(params))?;
        Ok(inner.conn.last_insert_rowid())
    }

    /// 读取辅助表某次 trial 的所有行（列顺序同传入的 `columns`）
    pub fn auxiliary_rows(
        &self,
        table: &str,
        trial_id: i64,
        columns: &[&str],
    ) -> Result<Vec<Vec<Value>>, StoreError> {
        let table = validate_identifier(table)?;
        if columns.is_empty() {
            return Err(StoreError::NoColumns(table.to_string()));
        }
        for column in columns {
            validate_identifier(column)?;
        }
        let sql = format!(
            "SELECT {} FROM {table} WHERE trial_id = ?1 ORDER BY UniqueID",
            columns.join(", ")
        );
        let inner = self.inner.lock();
        let mut stmt = inner.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![trial_id], |r| {
                (0..columns.len())
                    .map(|i| r.get::<_, Value>(i))
                    .collect::<rusqlite::Result<Vec<_>>>()
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn max_trial_id(conn: &Connection) -> Result<Option<i64>, StoreError> {
    let max = conn
        .query_row("SELECT MAX(trial_id) FROM ODriveData", [], |r| {
            r.get::<_, Option<i64>>(0)
        })
        .optional()?
        .flatten();
    Ok(max)
}

fn insert_row(conn: &Connection, row: &StateSnapshotRow) -> Result<(), StoreError> {
    let m = row.measurements().map(opt_f64);
    conn.execute(
        INSERT_ROW,
        params![
            row.trial_id,
            row.node_id,
            row.time,
            m[0],
            m[1],
            m[2],
            m[3],
            m[4],
            m[5],
            m[6],
            m[7],
            m[8],
            m[9],
        ],
    )?;
    Ok(())
}

/// 列名 → 声明类型
fn column_types(conn: &Connection, table: &str) -> Result<HashMap<String, String>, StoreError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let columns = stmt
        .query_map([], |r| Ok((r.get::<_, String>(1)?, r.get::<_, String>(2)?)))?
        .collect::<Result<HashMap<_, _>, _>>()?;
    Ok(columns)
}
