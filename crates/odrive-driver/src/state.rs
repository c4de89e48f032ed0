//! 节点状态缓存
//!
//! 接收循环是唯一的写者，持久化循环和控制逻辑只读。
//! 每次写入都整体替换一个不可变快照（`ArcSwap`），读者永远看不到只更新了一半的测量对。

use arc_swap::ArcSwap;
use odrive_protocol::{Heartbeat, Telemetry};
use odrive_store::StateSnapshotRow;
use std::sync::Arc;
use tokio::sync::{Notify, broadcast};

/// 遥测广播的缓冲深度，落后更多的订阅者会丢失旧消息
const UPDATE_CAPACITY: usize = 64;

/// 节点最近一次观测到的状态
///
/// 所有字段初始为 `None`，收到对应遥测后才被设置。
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeState {
    /// 位置（rev）
    pub position: Option<f32>,
    /// 速度（rev/s）
    pub velocity: Option<f32>,
    /// 目标扭矩（N·m）
    pub torque_target: Option<f32>,
    /// 估计扭矩（N·m）
    pub torque_estimate: Option<f32>,
    /// 母线电压（V）
    pub bus_voltage: Option<f32>,
    /// 母线电流（A）
    pub bus_current: Option<f32>,
    /// Iq 设定值（A）
    pub iq_setpoint: Option<f32>,
    /// Iq 测量值（A）
    pub iq_measured: Option<f32>,
    /// 电功率（W）
    pub electrical_power: Option<f32>,
    /// 机械功率（W）
    pub mechanical_power: Option<f32>,
    /// 最近一次心跳（不持久化）
    pub heartbeat: Option<Heartbeat>,
}

impl NodeState {
    /// 应用一条遥测，只覆盖该类别对应的字段
    pub fn apply(&mut self, telemetry: &Telemetry) {
        match *telemetry {
            Telemetry::Heartbeat(hb) => self.heartbeat = Some(hb),
            Telemetry::EncoderEstimates { position, velocity } => {
                self.position = Some(position);
                self.velocity = Some(velocity);
            },
            Telemetry::Torques { target, estimate } => {
                self.torque_target = Some(target);
                self.torque_estimate = Some(estimate);
            },
            Telemetry::BusVoltageCurrent { voltage, current } => {
                self.bus_voltage = Some(voltage);
                self.bus_current = Some(current);
            },
            Telemetry::Iq { setpoint, measured } => {
                self.iq_setpoint = Some(setpoint);
                self.iq_measured = Some(measured);
            },
            Telemetry::Powers {
                electrical,
                mechanical,
            } => {
                self.electrical_power = Some(electrical);
                self.mechanical_power = Some(mechanical);
            },
        }
    }

    /// 转换为持久化行
    pub fn to_row(&self, trial_id: i64, node_id: u8, elapsed_secs: f64) -> StateSnapshotRow {
        StateSnapshotRow {
            trial_id,
            node_id: node_id.to_string(),
            time: elapsed_secs,
            position: self.position,
            velocity: self.velocity,
            torque_target: self.torque_target,
            torque_estimate: self.torque_estimate,
            bus_voltage: self.bus_voltage,
            bus_current: self.bus_current,
            iq_setpoint: self.iq_setpoint,
            iq_measured: self.iq_measured,
            electrical_power: self.electrical_power,
            mechanical_power: self.mechanical_power,
        }
    }
}

/// 状态缓存
///
/// `apply` 每次整体替换快照并唤醒所有等待者（如速度等待），
/// 同时把这条遥测广播给 [`subscribe`](Self::subscribe) 的订阅者。
#[derive(Debug)]
pub struct StateCache {
    state: ArcSwap<NodeState>,
    changed: Notify,
    updates: broadcast::Sender<Telemetry>,
}

impl Default for StateCache {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCache {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        Self {
            state: ArcSwap::default(),
            changed: Notify::new(),
            updates,
        }
    }

    /// 订阅之后写入的每一条遥测
    pub fn subscribe(&self) -> broadcast::Receiver<Telemetry> {
        self.updates.subscribe()
    }

    /// 写入一条遥测
    pub fn apply(&self, telemetry: &Telemetry) {
        self.state.rcu(|current| {
            let mut next = **current;
            next.apply(telemetry);
            next
        });
        self.changed.notify_waiters();
        // 没有订阅者时发送失败，忽略
        let _ = self.updates.send(*telemetry);
    }

    /// 一致的时间点快照
    pub fn snapshot(&self) -> NodeState {
        **self.state.load()
    }

    /// 共享快照（避免拷贝）
    pub fn load(&self) -> Arc<NodeState> {
        self.state.load_full()
    }

    /// 等待直到 `pick` 从快照中取出值
    ///
    /// 不设超时；调用方通过 `select!` 与取消信号组合。
    pub async fn wait_for<T>(&self, mut pick: impl FnMut(&NodeState) -> Option<T>) -> T {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            // 先登记再检查，避免检查与 apply 之间的唤醒丢失
            notified.as_mut().enable();
            if let Some(value) = pick(&**self.state.load()) {
                return value;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odrive_protocol::AxisState;

    #[test]
    fn test_initial_state_unset() {
        let cache = StateCache::new();
        assert_eq!(cache.snapshot(), NodeState::default());
        assert!(cache.snapshot().velocity.is_none());
    }

    #[test]
    fn test_apply_only_touches_covered_pair() {
        let cache = StateCache::new();
        cache.apply(&Telemetry::EncoderEstimates {
            position: 1.5,
            velocity: 0.25,
        });
        let after_encoder = cache.snapshot();
        assert_eq!(after_encoder.position, Some(1.5));
        assert_eq!(after_encoder.velocity, Some(0.25));
        assert_eq!(after_encoder.torque_target, None);

        cache.apply(&Telemetry::Torques {
            target: 0.1,
            estimate: 0.09,
        });
        let after_torque = cache.snapshot();
        assert_eq!(after_torque.torque_target, Some(0.1));
        assert_eq!(after_torque.torque_estimate, Some(0.09));
        // 其余字段保持不变
        assert_eq!(after_torque.position, after_encoder.position);
        assert_eq!(after_torque.velocity, after_encoder.velocity);
        assert_eq!(after_torque.bus_voltage, None);
    }

    #[test]
    fn test_each_category_maps_to_its_fields() {
        let cases = [
            (
                Telemetry::BusVoltageCurrent {
                    voltage: 24.0,
                    current: 1.0,
                },
                NodeState {
                    bus_voltage: Some(24.0),
                    bus_current: Some(1.0),
                    ..Default::default()
                },
            ),
            (
                Telemetry::Iq {
                    setpoint: 2.0,
                    measured: 1.9,
                },
                NodeState {
                    iq_setpoint: Some(2.0),
                    iq_measured: Some(1.9),
                    ..Default::default()
                },
            ),
            (
                Telemetry::Powers {
                    electrical: 10.0,
                    mechanical: 8.0,
                },
                NodeState {
                    electrical_power: Some(10.0),
                    mechanical_power: Some(8.0),
                    ..Default::default()
                },
            ),
        ];
        for (telemetry, expected) in cases {
            let mut state = NodeState::default();
            state.apply(&telemetry);
            assert_eq!(state, expected);
        }
    }

    #[test]
    fn test_heartbeat_not_in_row() {
        let mut state = NodeState::default();
        state.apply(&Telemetry::Heartbeat(Heartbeat {
            axis_state: AxisState::ClosedLoopControl,
            ..Default::default()
        }));
        assert_eq!(
            state.heartbeat.map(|hb| hb.axis_state),
            Some(AxisState::ClosedLoopControl)
        );

        let row = state.to_row(3, 1, 0.5);
        assert_eq!(row.trial_id, 3);
        assert_eq!(row.node_id, "1");
        assert_eq!(row.measurements(), [None; 10]);
    }

    #[tokio::test]
    async fn test_wait_for_wakes_on_apply() {
        let cache = Arc::new(StateCache::new());
        let waiter = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.wait_for(|s| s.velocity).await })
        };
        tokio::task::yield_now().await;

        cache.apply(&Telemetry::Torques {
            target: 0.0,
            estimate: 0.0,
        });
        cache.apply(&Telemetry::EncoderEstimates {
            position: 0.0,
            velocity: 3.0,
        });
        assert_eq!(waiter.await.unwrap(), 3.0);
    }

    #[tokio::test]
    async fn test_subscribe_sees_only_later_updates() {
        let cache = StateCache::new();
        cache.apply(&Telemetry::Torques {
            target: 1.0,
            estimate: 1.0,
        });

        let mut updates = cache.subscribe();
        assert!(updates.try_recv().is_err());

        let powers = Telemetry::Powers {
            electrical: 5.0,
            mechanical: 4.0,
        };
        cache.apply(&powers);
        assert_eq!(updates.recv().await.unwrap(), powers);
    }

    #[tokio::test]
    async fn test_wait_for_returns_immediately_when_set() {
        let cache = StateCache::new();
        cache.apply(&Telemetry::EncoderEstimates {
            position: 0.0,
            velocity: -1.0,
        });
        assert_eq!(cache.wait_for(|s| s.velocity).await, -1.0);
    }
}
