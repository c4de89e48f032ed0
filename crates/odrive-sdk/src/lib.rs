//! # ODrive SDK
//!
//! 通过 CAN 总线（CANSimple 协议）控制 ODrive 节点，并把遥测数据按 trial 写入 SQLite。
//!
//! # 架构设计
//!
//! 从底层到高层：
//!
//! - **协议层** (`odrive-protocol`): 仲裁 ID、命令编码、遥测解码
//! - **总线层** (`odrive-can`): SocketCAN 与进程内虚拟总线
//! - **存储层** (`odrive-store`): `ODriveData` 表、trial 分配、辅助表
//! - **会话层** (`odrive-driver`): 单节点状态缓存、接收/持久化循环、闭环握手
//! - **编排层** (本 crate): 多节点并发运行、配置文件、日志初始化
//!
//! # 快速开始
//!
//! ```no_run
//! use odrive_sdk::prelude::*;
//!
//! # async fn demo() -> Result<(), SdkError> {
//! odrive_sdk::init_logging("odrive_sdk=info,odrive_driver=info");
//!
//! let config = OrchestratorConfig::load("odrive.toml")?;
//! let orchestrator = Orchestrator::open(&config)?;
//! orchestrator.initialize_all().await?;
//!
//! let node = orchestrator.sessions()[0].clone();
//! let control: ControlTask = Box::pin(async move {
//!     node.set_velocity(2.0, 0.0)?;
//!     if let Some(velocity) = node.get_velocity_blocking().await {
//!         tracing::info!(velocity, "first velocity sample");
//!     }
//!     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!     node.stop();
//!     Ok::<(), DriverError>(())
//! });
//!
//! // Ctrl-C 停止所有节点
//! orchestrator.run([control]).await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod logging;
mod orchestrator;

pub mod prelude;

pub use config::{NodeConfig, OrchestratorConfig};
pub use error::SdkError;
pub use logging::{env_filter, init_logging};
pub use orchestrator::{ControlTask, Orchestrator};

// 下层 crate 整体导出，高级用户通过模块路径访问
pub use odrive_can as can;
pub use odrive_driver as driver;
pub use odrive_protocol as protocol;
pub use odrive_store as store;
