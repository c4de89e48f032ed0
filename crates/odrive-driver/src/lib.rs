//! # ODrive Driver
//!
//! 单节点会话层：状态缓存、接收/持久化循环、闭环握手。
//!
//! ## 并发模型
//!
//! 协作式单线程（tokio `current_thread`）。每个会话持有一个
//! `CancellationToken`，接收循环、持久化循环、等待操作和外部控制任务
//! 都在自己的挂起点观察它，停止时全部协作退出。
//!
//! ## 示例
//!
//! ```no_run
//! use odrive_driver::NodeSession;
//! use odrive_store::TelemetryStore;
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), odrive_driver::DriverError> {
//! let store = Arc::new(TelemetryStore::open("odrive_data.db")?);
//! let session = NodeSession::builder(1, store).interface("can0").build()?;
//! session.initialize().await?;
//!
//! let control = {
//!     let session = session.clone();
//!     async move {
//!         session.set_torque(0.10)?;
//!         tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!         session.stop();
//!         Ok::<(), odrive_driver::DriverError>(())
//!     }
//! };
//! session.run([control]).await?;
//! session.shutdown()?;
//! # Ok(())
//! # }
//! ```

mod builder;
mod error;
pub mod lifecycle;
pub mod metrics;
mod session;
pub mod state;

pub use builder::{NodeSessionBuilder, SessionConfig};
pub use error::DriverError;
pub use lifecycle::{AtomicSessionState, SessionState};
pub use metrics::{MetricsSnapshot, SessionMetrics};
pub use session::{NodeSession, PollOutcome};
pub use state::{NodeState, StateCache};
