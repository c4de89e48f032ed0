//! 多节点编排器
//!
//! 把多个 [`NodeSession`] 的 `run` 循环和跨节点控制任务组合成一次并发执行。
//! 外部中断（Ctrl-C）时停止所有会话并关闭总线。

use crate::config::OrchestratorConfig;
use crate::error::SdkError;
use odrive_driver::{DriverError, NodeSession};
use odrive_store::TelemetryStore;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// 跨节点控制任务
pub type ControlTask = Pin<Box<dyn Future<Output = Result<(), DriverError>> + Send + 'static>>;

pub struct Orchestrator {
    sessions: Vec<NodeSession>,
    store: Arc<TelemetryStore>,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("sessions", &self.sessions)
            .field("shut_down", &self.shut_down.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// 由已构建的会话组成编排器
    pub fn new(store: Arc<TelemetryStore>, sessions: Vec<NodeSession>) -> Self {
        Self {
            sessions,
            store,
            shut_down: AtomicBool::new(false),
        }
    }

    /// 按配置为每个节点构建会话（共享同一个存储）
    pub fn from_config(
        config: &OrchestratorConfig,
        store: Arc<TelemetryStore>,
    ) -> Result<Self, SdkError> {
        config.validate()?;
        let sessions = config
            .nodes
            .iter()
            .map(|node| {
                NodeSession::builder(node.node_id, Arc::clone(&store))
                    .config(node.session_config())
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(store, sessions))
    }

    /// 打开配置中的数据库并构建会话
    pub fn open(config: &OrchestratorConfig) -> Result<Self, SdkError> {
        let store = Arc::new(TelemetryStore::open(&config.database)?);
        Self::from_config(config, store)
    }

    pub fn sessions(&self) -> &[NodeSession] {
        &self.sessions
    }

    /// 按节点 ID 查找会话（多个接口上有相同 ID 时返回第一个）
    pub fn session(&self, node_id: u8) -> Option<&NodeSession> {
        self.sessions.iter().find(|s| s.node_id().get() == node_id)
    }

    pub fn store(&self) -> &Arc<TelemetryStore> {
        &self.store
    }

    /// 依次初始化所有会话；任何一个失败即返回
    pub async fn initialize_all(&self) -> Result<(), SdkError> {
        for session in &self.sessions {
            session.initialize().await?;
        }
        info!(nodes = self.sessions.len(), "all sessions initialized");
        Ok(())
    }

    /// 运行所有会话和控制任务，直到全部会话停止或收到 Ctrl-C
    pub async fn run<I>(&self, control_tasks: I) -> Result<(), SdkError>
    where
        I: IntoIterator<Item = ControlTask>,
    {
        self.run_until(control_tasks, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                // 无法安装信号处理时只能依靠会话自身停止
                warn!(error = %e, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// 与 [`run`](Self::run) 相同，但由 `interrupt` 完成代替 Ctrl-C
    ///
    /// 结束后所有会话都已停止且总线已关闭。返回第一个失败任务的错误。
    pub async fn run_until<I, S>(&self, control_tasks: I, interrupt: S) -> Result<(), SdkError>
    where
        I: IntoIterator<Item = ControlTask>,
        S: Future<Output = ()>,
    {
        let mut runs = JoinSet::new();
        for session in &self.sessions {
            let session = session.clone();
            runs.spawn(async move { session.run(std::iter::empty::<ControlTask>()).await });
        }
        let mut controls = JoinSet::new();
        for task in control_tasks {
            controls.spawn(task);
        }
        info!(
            nodes = self.sessions.len(),
            control_tasks = controls.len(),
            "orchestrator running"
        );

        tokio::pin!(interrupt);
        let mut interrupted = false;
        let mut first_error: Option<DriverError> = None;

        loop {
            tokio::select! {
                biased;
                _ = &mut interrupt, if !interrupted => {
                    interrupted = true;
                    warn!("interrupt received, stopping all sessions");
                    self.stop_all();
                },
                joined = runs.join_next() => match joined {
                    None => break,
                    Some(joined) => record(joined, "session", &mut first_error),
                },
                Some(joined) = controls.join_next(), if !controls.is_empty() => {
                    record(joined, "control task", &mut first_error);
                },
            }
        }

        // 会话全部结束后，剩余控制任务已无意义
        controls.shutdown().await;
        self.shutdown()?;
        first_error.map_or(Ok(()), |e| Err(e.into()))
    }

    /// 停止所有会话（幂等）
    pub fn stop_all(&self) {
        for session in &self.sessions {
            session.stop();
        }
    }

    /// 停止所有会话并关闭总线（幂等）；返回第一个关闭失败的错误
    pub fn shutdown(&self) -> Result<(), SdkError> {
        let mut first_error = None;
        for session in &self.sessions {
            if let Err(e) = session.shutdown() {
                error!(node_id = session.node_id().get(), error = %e, "failed to close bus");
                first_error.get_or_insert(e);
            }
        }
        if !self.shut_down.swap(true, Ordering::AcqRel) {
            info!(nodes = self.sessions.len(), "orchestrator shut down");
        }
        first_error.map_or(Ok(()), |e| Err(e.into()))
    }
}

fn record(
    joined: Result<Result<(), DriverError>, tokio::task::JoinError>,
    what: &str,
    first_error: &mut Option<DriverError>,
) {
    match joined {
        Ok(Ok(())) => {},
        Ok(Err(e)) if e.is_cancelled() => {},
        Ok(Err(e)) => {
            error!(error = %e, "{what} failed");
            first_error.get_or_insert(e);
        },
        Err(join_err) => error!(error = %join_err, "{what} panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use odrive_can::BusKind;

    fn virtual_config(channel: &str, ids: &[u8]) -> OrchestratorConfig {
        OrchestratorConfig {
            nodes: ids
                .iter()
                .map(|&id| NodeConfig {
                    interface: channel.to_string(),
                    bus_kind: BusKind::Virtual,
                    closed_loop: false,
                    ..NodeConfig::new(id)
                })
                .collect(),
            ..OrchestratorConfig::default()
        }
    }

    #[test]
    fn test_from_config_builds_sessions() {
        let store = Arc::new(TelemetryStore::open_in_memory().unwrap());
        let orchestrator =
            Orchestrator::from_config(&virtual_config("orch-unit-build", &[0, 5]), store)
                .unwrap();
        assert_eq!(orchestrator.sessions().len(), 2);
        assert!(orchestrator.session(5).is_some());
        assert!(orchestrator.session(7).is_none());
    }

    #[test]
    fn test_from_config_rejects_bad_node() {
        let store = Arc::new(TelemetryStore::open_in_memory().unwrap());
        let err = Orchestrator::from_config(&virtual_config("orch-unit-bad", &[0x40]), store)
            .unwrap_err();
        assert!(matches!(err, SdkError::Driver(DriverError::Protocol(_))));
    }

    #[test]
    fn test_shutdown_without_initialize() {
        let store = Arc::new(TelemetryStore::open_in_memory().unwrap());
        let orchestrator =
            Orchestrator::from_config(&virtual_config("orch-unit-idle", &[1]), store).unwrap();
        orchestrator.shutdown().unwrap();
        orchestrator.shutdown().unwrap();
    }
}
