//! 单节点会话
//!
//! 一个 [`NodeSession`] 独占一条总线连接和一个节点地址：
//!
//! - 控制命令：编码后立即发送，不等待确认
//! - 接收循环：非阻塞轮询，解码后写入 [`StateCache`]
//! - 持久化循环：按固定周期把缓存快照追加到存储
//! - 闭环握手：请求闭环控制，等待心跳确认（有超时，可取消）
//!
//! 所有循环都在同一个取消令牌上协作退出。`NodeSession` 是 `Arc` 句柄，
//! 克隆后可以交给控制任务使用。

use crate::builder::{NodeSessionBuilder, SessionConfig};
use crate::error::DriverError;
use crate::lifecycle::{AtomicSessionState, SessionState};
use crate::metrics::{MetricsSnapshot, SessionMetrics};
use crate::state::{NodeState, StateCache};
use odrive_can::{BoxedAdapter, CanAdapter, CanError};
use odrive_protocol::{
    AxisState, ClearErrorsCommand, Command, ControlMode, EstopCommand, InputMode, NodeId,
    OdriveFrame, RebootCommand, SetAbsolutePositionCommand, SetAxisStateCommand,
    SetControllerModeCommand, SetInputPosCommand, SetInputTorqueCommand, SetInputVelCommand,
    SetLimitsCommand, Telemetry, TelemetryKind, decode_telemetry,
};
use odrive_store::TelemetryStore;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// 单次轮询的结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PollOutcome {
    /// 总线上没有待处理的帧
    Empty,
    /// 收到帧但与本节点无关（其他节点、未知命令码、远程请求帧）
    Ignored,
    /// 解码成功并已写入缓存
    Applied(Telemetry),
}

struct SessionInner {
    node: NodeId,
    config: SessionConfig,
    bus: Mutex<Option<BoxedAdapter>>,
    cache: StateCache,
    store: Arc<TelemetryStore>,
    metrics: SessionMetrics,
    state: AtomicSessionState,
    cancel: CancellationToken,
    started_at: Mutex<Instant>,
    trial_id: Mutex<Option<i64>>,
}

/// 单节点会话句柄
#[derive(Clone)]
pub struct NodeSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for NodeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSession")
            .field("node", &self.inner.node)
            .field("state", &self.state())
            .field("interface", &self.inner.config.interface)
            .finish_non_exhaustive()
    }
}

impl NodeSession {
    /// 链式构造
    pub fn builder(node_id: u8, store: Arc<TelemetryStore>) -> NodeSessionBuilder {
        NodeSessionBuilder::new(node_id, store)
    }

    pub(crate) fn new(node: NodeId, config: SessionConfig, store: Arc<TelemetryStore>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                node,
                config,
                bus: Mutex::new(None),
                cache: StateCache::new(),
                store,
                metrics: SessionMetrics::new(),
                state: AtomicSessionState::new(SessionState::Uninitialized),
                cancel: CancellationToken::new(),
                started_at: Mutex::new(Instant::now()),
                trial_id: Mutex::new(None),
            }),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.inner.node
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.get()
    }

    /// 状态缓存（只读访问）
    pub fn cache(&self) -> &StateCache {
        &self.inner.cache
    }

    /// 当前状态快照
    pub fn snapshot(&self) -> NodeState {
        self.inner.cache.snapshot()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// 会话的取消令牌（控制任务用它观察停止信号）
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// 是否仍在运行（未被停止）
    pub fn is_running(&self) -> bool {
        !self.inner.cancel.is_cancelled()
    }

    /// 本会话持久化使用的 trial ID（持久化开始前为 `None`）
    pub fn trial_id(&self) -> Option<i64> {
        *self.inner.trial_id.lock()
    }

    /// 会话开始后经过的时间
    pub fn elapsed(&self) -> Duration {
        self.inner.started_at.lock().elapsed()
    }

    // ==================== 生命周期 ====================

    /// 打开总线、清空积压帧，按配置完成闭环握手
    ///
    /// # 错误
    /// - `InvalidState`: 会话已初始化过
    /// - `Transport`: 总线打开失败
    /// - `HandshakeStalled`: 超时内未收到闭环心跳
    /// - `Cancelled`: 握手期间会话被停止
    pub async fn initialize(&self) -> Result<(), DriverError> {
        let inner = &self.inner;
        inner
            .state
            .transition(SessionState::Uninitialized, SessionState::BusOpen)
            .map_err(|actual| DriverError::InvalidState {
                expected: SessionState::Uninitialized,
                actual,
            })?;

        let adapter = match odrive_can::open(&inner.config.interface, inner.config.bus_kind) {
            Ok(adapter) => adapter,
            Err(e) => {
                inner.state.set(SessionState::Uninitialized);
                return Err(e.into());
            },
        };
        *inner.bus.lock() = Some(adapter);
        *inner.started_at.lock() = Instant::now();
        info!(
            node_id = inner.node.get(),
            interface = %inner.config.interface,
            bus_kind = %inner.config.bus_kind,
            "bus connection opened"
        );

        let flushed = self.flush()?;
        debug!(node_id = inner.node.get(), flushed, "pending frames flushed");

        if inner.config.closed_loop {
            self.enter_closed_loop().await?;
        }
        Ok(())
    }

    /// 丢弃所有积压的入站帧，返回丢弃数量
    pub fn flush(&self) -> Result<usize, DriverError> {
        let mut guard = self.inner.bus.lock();
        let adapter = guard.as_mut().ok_or(DriverError::NotConnected)?;
        let mut count = 0;
        while adapter.try_receive()?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    /// 请求闭环控制并等待心跳确认
    ///
    /// 等待期间收到的本节点遥测照常写入缓存。只认发送请求之后收到的心跳，
    /// 缓存中旧的心跳不算数。
    ///
    /// 只能在 `BusOpen` 或 `ClosedLoop` 状态调用（循环运行中不行，
    /// 否则会和接收循环争抢帧）；请求发送失败时状态不变。
    pub async fn enter_closed_loop(&self) -> Result<(), DriverError> {
        let inner = &self.inner;
        let node_id = inner.node.get();
        let timeout = inner.config.handshake_timeout;

        let previous = inner.state.get();
        if !previous.is_ready() {
            return Err(DriverError::InvalidState {
                expected: SessionState::BusOpen,
                actual: previous,
            });
        }
        inner
            .state
            .transition(previous, SessionState::AwaitingClosedLoop)
            .map_err(|actual| DriverError::InvalidState {
                expected: previous,
                actual,
            })?;

        info!(node_id, "requesting closed-loop control");
        if let Err(e) = self.send_command(&SetAxisStateCommand::closed_loop()) {
            let _ = inner.state.transition(SessionState::AwaitingClosedLoop, previous);
            warn!(node_id, error = %e, "failed to request closed-loop control");
            return Err(e);
        }

        let result = tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => Err(DriverError::Cancelled),
            res = tokio::time::timeout(timeout, self.await_closed_loop_heartbeat()) => match res {
                Ok(res) => res,
                Err(_) => Err(DriverError::HandshakeStalled {
                    node_id,
                    timeout_ms: timeout.as_millis() as u64,
                }),
            },
        };

        // 等待期间 shutdown() 可能已把状态改为 Stopped，不能覆盖
        match &result {
            Ok(()) => {
                let _ = inner
                    .state
                    .transition(SessionState::AwaitingClosedLoop, SessionState::ClosedLoop);
                info!(node_id, "closed-loop control confirmed");
            },
            Err(e) => {
                let _ = inner
                    .state
                    .transition(SessionState::AwaitingClosedLoop, SessionState::BusOpen);
                warn!(node_id, error = %e, "closed-loop handshake failed");
            },
        }
        result
    }

    /// 消费入站帧直到本节点心跳报告闭环控制
    async fn await_closed_loop_heartbeat(&self) -> Result<(), DriverError> {
        let node_id = self.inner.node.get();
        loop {
            if let Some(Telemetry::Heartbeat(hb)) = self.pump().await? {
                if hb.has_error() {
                    warn!(node_id, axis_error = hb.axis_error, "heartbeat reports axis error");
                }
                if hb.axis_state == AxisState::ClosedLoopControl {
                    return Ok(());
                }
                trace!(node_id, axis_state = ?hb.axis_state, "waiting for closed loop");
            }
        }
    }

    /// 停止所有循环（幂等）
    pub fn stop(&self) {
        if !self.inner.cancel.is_cancelled() {
            self.inner.cancel.cancel();
            info!(node_id = self.inner.node.get(), "session stop requested");
        }
    }

    /// 停止并关闭总线连接（幂等）
    pub fn shutdown(&self) -> Result<(), DriverError> {
        self.stop();
        let adapter = self.inner.bus.lock().take();
        self.inner.state.set(SessionState::Stopped);
        if let Some(mut adapter) = adapter {
            adapter.shutdown()?;
            info!(node_id = self.inner.node.get(), "bus connection closed");
        }
        Ok(())
    }

    // ==================== 控制命令 ====================

    /// 编码并发送任意命令
    pub fn send_command<C: Command>(&self, command: &C) -> Result<(), DriverError> {
        self.send_frame(command.to_frame(self.inner.node))
    }

    fn send_frame(&self, frame: OdriveFrame) -> Result<(), DriverError> {
        let mut guard = self.inner.bus.lock();
        let adapter = guard.as_mut().ok_or(DriverError::NotConnected)?;
        adapter.send(frame)?;
        self.inner.metrics.tx_frames_total.fetch_add(1, Ordering::Relaxed);
        trace!(
            node_id = self.inner.node.get(),
            "sent frame id=0x{:03X} len={}",
            frame.id,
            frame.len
        );
        Ok(())
    }

    /// 急停
    pub fn estop(&self) -> Result<(), DriverError> {
        self.send_command(&EstopCommand)
    }

    /// 清除错误；`identify` 为 true 时节点同时闪烁 LED
    pub fn clear_errors(&self, identify: bool) -> Result<(), DriverError> {
        self.send_command(&ClearErrorsCommand::new(identify))
    }

    /// 位置控制（前馈单位：0.001 rev/s、0.001 N·m）
    pub fn set_position(
        &self,
        position: f32,
        velocity_ff: i16,
        torque_ff: i16,
    ) -> Result<(), DriverError> {
        self.send_command(&SetInputPosCommand::with_feedforward(position, velocity_ff, torque_ff))
    }

    pub fn set_velocity(&self, velocity: f32, torque_ff: f32) -> Result<(), DriverError> {
        self.send_command(&SetInputVelCommand::new(velocity, torque_ff))
    }

    pub fn set_torque(&self, torque: f32) -> Result<(), DriverError> {
        self.send_command(&SetInputTorqueCommand::new(torque))
    }

    pub fn set_axis_state(&self, axis_state: AxisState) -> Result<(), DriverError> {
        self.send_command(&SetAxisStateCommand::new(axis_state))
    }

    pub fn set_controller_mode(
        &self,
        control_mode: ControlMode,
        input_mode: InputMode,
    ) -> Result<(), DriverError> {
        self.send_command(&SetControllerModeCommand::new(control_mode, input_mode))
    }

    pub fn set_limits(&self, velocity_limit: f32, current_limit: f32) -> Result<(), DriverError> {
        self.send_command(&SetLimitsCommand::new(velocity_limit, current_limit))
    }

    pub fn set_absolute_position(&self, position: f32) -> Result<(), DriverError> {
        self.send_command(&SetAbsolutePositionCommand::new(position))
    }

    pub fn reboot(&self) -> Result<(), DriverError> {
        self.send_command(&RebootCommand)
    }

    /// 发送远程请求帧，节点回复的遥测由接收循环写入缓存
    pub fn request_telemetry(&self, kind: TelemetryKind) -> Result<(), DriverError> {
        self.send_frame(kind.request_frame(self.inner.node))
    }

    /// 发送远程请求帧并等待节点回复该类遥测
    ///
    /// 只认请求发出之后写入缓存的遥测。会话处于 `Running` 时由接收循环读帧，
    /// 否则本方法自己驱动接收。
    ///
    /// # 错误
    /// - `Timeout`: 超时内没有收到回复
    /// - `Cancelled`: 等待期间会话被停止
    pub async fn request_and_wait(
        &self,
        kind: TelemetryKind,
        timeout: Duration,
    ) -> Result<Telemetry, DriverError> {
        let updates = self.inner.cache.subscribe();
        self.request_telemetry(kind)?;

        tokio::select! {
            biased;
            _ = self.inner.cancel.cancelled() => Err(DriverError::Cancelled),
            res = tokio::time::timeout(timeout, self.await_telemetry(updates, kind)) => {
                res.unwrap_or(Err(DriverError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                }))
            },
        }
    }

    async fn await_telemetry(
        &self,
        mut updates: broadcast::Receiver<Telemetry>,
        kind: TelemetryKind,
    ) -> Result<Telemetry, DriverError> {
        let drive = self.state() != SessionState::Running;
        loop {
            tokio::select! {
                biased;
                update = updates.recv() => match update {
                    Ok(telemetry) if telemetry.kind() == kind => return Ok(telemetry),
                    Ok(_) => {},
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(node_id = self.inner.node.get(), skipped, "telemetry subscriber lagged");
                    },
                    Err(RecvError::Closed) => return Err(DriverError::NotConnected),
                },
                res = self.pump(), if drive => {
                    res?;
                },
            }
        }
    }

    // ==================== 接收 ====================

    /// 非阻塞地处理一帧
    ///
    /// # 错误
    /// - `NotConnected`: 总线未打开或已关闭
    /// - `Transport`: 底层接收失败
    /// - `Protocol`: 本节点的遥测帧长度不符（帧已丢弃，缓存不变）
    pub fn poll_once(&self) -> Result<PollOutcome, DriverError> {
        let inner = &self.inner;
        let frame = {
            let mut guard = inner.bus.lock();
            let adapter = guard.as_mut().ok_or(DriverError::NotConnected)?;
            adapter.try_receive()?
        };
        let Some(frame) = frame else {
            return Ok(PollOutcome::Empty);
        };
        inner.metrics.rx_frames_total.fetch_add(1, Ordering::Relaxed);

        if frame.node_id() != inner.node.get() {
            return Ok(PollOutcome::Ignored);
        }

        match decode_telemetry(&frame) {
            Ok(Some(decoded)) => {
                inner.cache.apply(&decoded.telemetry);
                inner.metrics.rx_frames_applied.fetch_add(1, Ordering::Relaxed);
                trace!(node_id = inner.node.get(), telemetry = ?decoded.telemetry, "applied");
                Ok(PollOutcome::Applied(decoded.telemetry))
            },
            Ok(None) => Ok(PollOutcome::Ignored),
            Err(e) => {
                inner.metrics.rx_malformed.fetch_add(1, Ordering::Relaxed);
                warn!(node_id = inner.node.get(), error = %e, "dropping malformed frame");
                Err(e.into())
            },
        }
    }

    /// 轮询一次并让出调度
    ///
    /// 有帧时 `yield_now`，无帧或接收出错时休眠 `idle_poll_interval`。
    /// 只有总线已关闭才返回错误。
    async fn pump(&self) -> Result<Option<Telemetry>, DriverError> {
        let idle = self.inner.config.idle_poll_interval;
        match self.poll_once() {
            Ok(PollOutcome::Applied(telemetry)) => {
                tokio::task::yield_now().await;
                Ok(Some(telemetry))
            },
            Ok(PollOutcome::Ignored) | Err(DriverError::Protocol(_)) => {
                tokio::task::yield_now().await;
                Ok(None)
            },
            Ok(PollOutcome::Empty) => {
                tokio::time::sleep(idle).await;
                Ok(None)
            },
            Err(DriverError::NotConnected) => Err(DriverError::NotConnected),
            Err(e) => {
                self.inner.metrics.rx_errors.fetch_add(1, Ordering::Relaxed);
                let fatal = matches!(&e, DriverError::Transport(CanError::Device(dev)) if dev.is_fatal());
                if fatal {
                    warn!(node_id = self.inner.node.get(), error = %e, "receive failed");
                } else {
                    debug!(node_id = self.inner.node.get(), error = %e, "receive failed");
                }
                tokio::time::sleep(idle).await;
                Ok(None)
            },
        }
    }

    /// 接收循环：直到会话停止
    pub async fn receive_loop(&self) -> Result<(), DriverError> {
        let cancel = &self.inner.cancel;
        debug!(node_id = self.inner.node.get(), "receive loop started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                res = self.pump() => {
                    res?;
                },
            }
        }
        debug!(node_id = self.inner.node.get(), "receive loop stopped");
        Ok(())
    }

    // ==================== 持久化 ====================

    /// 本会话的 trial ID；首次调用时向存储申请
    pub fn start_trial(&self) -> Result<i64, DriverError> {
        let mut trial = self.inner.trial_id.lock();
        if let Some(id) = *trial {
            return Ok(id);
        }
        let id = self.inner.store.allocate_trial_id()?;
        *trial = Some(id);
        info!(node_id = self.inner.node.get(), trial_id = id, "trial started");
        Ok(id)
    }

    /// 把当前快照追加为一行，返回 rowid
    pub fn persist_snapshot(&self, trial_id: i64) -> Result<i64, DriverError> {
        let inner = &self.inner;
        let elapsed = self.elapsed().as_secs_f64();
        let row = inner.cache.snapshot().to_row(trial_id, inner.node.get(), elapsed);
        match inner.store.append(&row) {
            Ok(rowid) => {
                inner.metrics.rows_persisted.fetch_add(1, Ordering::Relaxed);
                Ok(rowid)
            },
            Err(e) => {
                inner.metrics.persist_failures.fetch_add(1, Ordering::Relaxed);
                Err(e.into())
            },
        }
    }

    /// 持久化循环：每个周期追加一行；单行失败只记录，不中断循环
    pub async fn persist_loop(&self) -> Result<(), DriverError> {
        let inner = &self.inner;
        let node_id = inner.node.get();
        let trial_id = self.start_trial()?;

        let mut ticker = tokio::time::interval(inner.config.persist_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // 第一个 tick 立即完成，跳过
        ticker.tick().await;

        debug!(node_id, trial_id, "persist loop started");
        loop {
            tokio::select! {
                biased;
                _ = inner.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.persist_snapshot(trial_id) {
                        warn!(node_id, trial_id, error = %e, "failed to persist snapshot");
                    }
                },
            }
        }
        debug!(node_id, trial_id, "persist loop stopped");
        Ok(())
    }

    // ==================== 等待 ====================

    /// 等待直到缓存中出现速度值；会话先停止则返回 `None`
    pub async fn get_velocity_blocking(&self) -> Option<f32> {
        tokio::select! {
            biased;
            velocity = self.inner.cache.wait_for(|state| state.velocity) => Some(velocity),
            _ = self.inner.cancel.cancelled() => None,
        }
    }

    /// 等待缓存中的心跳报告指定轴状态（依赖接收循环在运行）
    pub async fn wait_for_axis_state(
        &self,
        axis_state: AxisState,
        timeout: Duration,
    ) -> Result<(), DriverError> {
        let wait = self.inner.cache.wait_for(|state| {
            state
                .heartbeat
                .filter(|hb| hb.axis_state == axis_state)
                .map(|_| ())
        });
        tokio::select! {
            biased;
            _ = self.inner.cancel.cancelled() => Err(DriverError::Cancelled),
            res = tokio::time::timeout(timeout, wait) => res.map_err(|_| DriverError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    // ==================== 运行 ====================

    /// 并发运行接收循环、持久化循环和外部控制任务，直到会话被停止
    ///
    /// 控制任务通过 [`cancellation_token`](Self::cancellation_token) 或
    /// [`stop`](Self::stop) 结束整个会话；某个任务提前返回不会影响其他任务。
    /// 返回第一个失败任务的错误。
    pub async fn run<I, F>(&self, extra_tasks: I) -> Result<(), DriverError>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<(), DriverError>> + Send + 'static,
    {
        let inner = &self.inner;
        let node_id = inner.node.get();
        let current = self.state();
        if !current.is_ready() {
            return Err(DriverError::InvalidState {
                expected: SessionState::BusOpen,
                actual: current,
            });
        }
        inner.state.set(SessionState::Running);
        info!(node_id, "session running");

        let mut tasks = JoinSet::new();
        let session = self.clone();
        tasks.spawn(async move { session.receive_loop().await });
        let session = self.clone();
        tasks.spawn(async move { session.persist_loop().await });
        for task in extra_tasks {
            tasks.spawn(task);
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {},
                Ok(Err(e)) if e.is_cancelled() => {},
                Ok(Err(e)) => {
                    error!(node_id, error = %e, "session task failed");
                    first_error.get_or_insert(e);
                },
                Err(join_err) => {
                    error!(node_id, error = %join_err, "session task panicked");
                },
            }
        }

        if inner.state.get() == SessionState::Running {
            inner.state.set(SessionState::Stopped);
        }
        let metrics = self.metrics();
        info!(
            node_id,
            rx_frames = metrics.rx_frames_total,
            rows_persisted = metrics.rows_persisted,
            persist_failures = metrics.persist_failures,
            malformed_pct = metrics.malformed_rate(),
            "session finished"
        );
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odrive_can::{BusKind, VirtualBus};
    use odrive_protocol::Heartbeat;

    fn session(channel: &str) -> NodeSession {
        let store = Arc::new(TelemetryStore::open_in_memory().unwrap());
        NodeSession::builder(1, store)
            .interface(channel)
            .bus_kind(BusKind::Virtual)
            .closed_loop(false)
            .build()
            .unwrap()
    }

    #[test]
    fn test_commands_require_connection() {
        let session = session("session-unit-noconn");
        assert!(matches!(session.set_torque(0.1), Err(DriverError::NotConnected)));
        assert!(matches!(session.poll_once(), Err(DriverError::NotConnected)));
    }

    #[tokio::test]
    async fn test_initialize_opens_bus() {
        let mut bus = VirtualBus::handle("session-unit-open");
        let session = session("session-unit-open");
        session.initialize().await.unwrap();
        assert_eq!(session.state(), SessionState::BusOpen);

        bus.send(
            Telemetry::EncoderEstimates {
                position: 1.0,
                velocity: 2.0,
            }
            .to_frame(NodeId::new(1).unwrap()),
        )
        .unwrap();
        assert!(matches!(session.poll_once().unwrap(), PollOutcome::Applied(_)));
        assert_eq!(session.poll_once().unwrap(), PollOutcome::Empty);
    }

    #[tokio::test]
    async fn test_flush_discards_pending() {
        let mut bus = VirtualBus::handle("session-unit-flush");
        let session = session("session-unit-flush");
        session.initialize().await.unwrap();

        let node = NodeId::new(1).unwrap();
        for i in 0..3 {
            bus.send(
                Telemetry::Torques {
                    target: i as f32,
                    estimate: 0.0,
                }
                .to_frame(node),
            )
            .unwrap();
        }
        assert_eq!(session.flush().unwrap(), 3);
        assert_eq!(session.poll_once().unwrap(), PollOutcome::Empty);
        assert_eq!(session.snapshot(), NodeState::default());
    }

    #[tokio::test]
    async fn test_initialize_twice_rejected() {
        let session = session("session-unit-twice");
        session.initialize().await.unwrap();
        let err = session.initialize().await.unwrap_err();
        assert!(matches!(
            err,
            DriverError::InvalidState {
                expected: SessionState::Uninitialized,
                actual: SessionState::BusOpen,
            }
        ));
    }

    #[tokio::test]
    async fn test_other_nodes_ignored() {
        let mut bus = VirtualBus::handle("session-unit-other");
        let session = session("session-unit-other");
        session.initialize().await.unwrap();

        let other = NodeId::new(2).unwrap();
        bus.send(Telemetry::Heartbeat(Heartbeat::default()).to_frame(other))
            .unwrap();
        assert_eq!(session.poll_once().unwrap(), PollOutcome::Ignored);
        assert_eq!(session.snapshot(), NodeState::default());
    }

    #[tokio::test]
    async fn test_shutdown_idempotent() {
        let bus = VirtualBus::handle("session-unit-shutdown");
        let session = session("session-unit-shutdown");
        session.initialize().await.unwrap();
        assert_eq!(bus.endpoint_count(), 2);

        session.shutdown().unwrap();
        session.shutdown().unwrap();
        assert_eq!(bus.endpoint_count(), 1);
        assert!(!session.is_running());
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(matches!(session.estop(), Err(DriverError::NotConnected)));
    }

    #[tokio::test]
    async fn test_run_requires_initialize() {
        let session = session("session-unit-run-uninit");
        let err = session
            .run(Vec::<std::future::Ready<Result<(), DriverError>>>::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::InvalidState { .. }));
    }
}
