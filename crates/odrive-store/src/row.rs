//! 持久化行

/// `ODriveData` 表中的一行
///
/// 未观测到的量保持 `None`，写入时为 SQL `NULL`。
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StateSnapshotRow {
    pub trial_id: i64,
    /// 节点地址（文本形式，如 `"1"`）
    pub node_id: String,
    /// 会话启动后经过的秒数
    pub time: f64,
    pub position: Option<f32>,
    pub velocity: Option<f32>,
    pub torque_target: Option<f32>,
    pub torque_estimate: Option<f32>,
    pub bus_voltage: Option<f32>,
    pub bus_current: Option<f32>,
    pub iq_setpoint: Option<f32>,
    pub iq_measured: Option<f32>,
    pub electrical_power: Option<f32>,
    pub mechanical_power: Option<f32>,
}

impl StateSnapshotRow {
    /// 十个测量值，按表中列顺序
    pub fn measurements(&self) -> [Option<f32>; 10] {
        [
            self.position,
            self.velocity,
            self.torque_target,
            self.torque_estimate,
            self.bus_voltage,
            self.bus_current,
            self.iq_setpoint,
            self.iq_measured,
            self.electrical_power,
            self.mechanical_power,
        ]
    }
}
