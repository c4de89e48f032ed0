//! 进程内虚拟 CAN 总线
//!
//! 同一通道名下的所有 [`VirtualCanAdapter`] 共享一条总线：任一端点发送的帧
//! 会投递到其他所有端点的接收队列（发送者自己收不到，等同于关闭 loopback）。
//!
//! 测试通过 [`VirtualBus`] 句柄扮演"节点"一侧，并可以注入发送/接收故障。

use crate::{CanAdapter, CanDeviceError, CanDeviceErrorKind, CanError, OdriveFrame};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};
use tracing::trace;

/// 单个端点的接收队列
#[derive(Default)]
struct Endpoint {
    queue: Mutex<VecDeque<OdriveFrame>>,
    ready: Condvar,
}

impl Endpoint {
    fn push(&self, frame: OdriveFrame) {
        self.queue.lock().push_back(frame);
        self.ready.notify_one();
    }
}

#[derive(Default)]
struct Faults {
    send: Option<CanDeviceErrorKind>,
    receive: Option<CanDeviceErrorKind>,
}

#[derive(Default)]
struct Channel {
    endpoints: Mutex<Vec<(u64, Weak<Endpoint>)>>,
    faults: Mutex<Faults>,
    next_endpoint: Mutex<u64>,
}

impl Channel {
    fn attach(self: &Arc<Self>) -> (u64, Arc<Endpoint>) {
        let id = {
            let mut next = self.next_endpoint.lock();
            *next += 1;
            *next
        };
        let endpoint = Arc::new(Endpoint::default());
        let mut endpoints = self.endpoints.lock();
        endpoints.retain(|(_, weak)| weak.strong_count() > 0);
        endpoints.push((id, Arc::downgrade(&endpoint)));
        (id, endpoint)
    }

    fn detach(&self, id: u64) {
        self.endpoints.lock().retain(|(eid, _)| *eid != id);
    }

    /// 投递到除 `from` 以外的所有端点
    fn broadcast(&self, from: u64, frame: OdriveFrame) {
        let endpoints = self.endpoints.lock();
        for (id, weak) in endpoints.iter() {
            if *id == from {
                continue;
            }
            if let Some(endpoint) = weak.upgrade() {
                endpoint.push(frame);
            }
        }
    }

    fn endpoint_count(&self) -> usize {
        self.endpoints
            .lock()
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .count()
    }
}

fn registry() -> &'static Mutex<HashMap<String, Arc<Channel>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Arc<Channel>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// 连接到通道（不存在时创建）
///
/// 注册表锁在连接和断开期间一直持有，正在被移除的通道不会再接收新端点。
fn attach(name: &str) -> (Arc<Channel>, u64, Arc<Endpoint>) {
    let mut registry = registry().lock();
    let channel = Arc::clone(registry.entry(name.to_string()).or_default());
    let (id, endpoint) = channel.attach();
    (channel, id, endpoint)
}

/// 断开端点；通道上不再有端点时从注册表移除
fn detach(name: &str, channel: &Arc<Channel>, id: u64) {
    let mut registry = registry().lock();
    channel.detach(id);
    if channel.endpoint_count() > 0 {
        return;
    }
    // 同名通道可能已被重建，只移除自己这一个
    if registry.get(name).is_some_and(|current| Arc::ptr_eq(current, channel)) {
        registry.remove(name);
        trace!("Virtual CAN channel '{}' removed", name);
    }
}

fn fault_error(kind: CanDeviceErrorKind, op: &str) -> CanError {
    CanError::Device(CanDeviceError::new(kind, format!("injected {op} fault")))
}

/// 虚拟总线适配器
pub struct VirtualCanAdapter {
    channel_name: String,
    channel: Arc<Channel>,
    endpoint_id: u64,
    /// `None` 表示已关闭
    endpoint: Option<Arc<Endpoint>>,
    read_timeout: Duration,
}

impl VirtualCanAdapter {
    /// 连接到指定通道（通道不存在时自动创建）
    pub fn open(channel_name: &str) -> Self {
        let (channel, endpoint_id, endpoint) = attach(channel_name);
        trace!(
            "Virtual CAN endpoint {} attached to '{}'",
            endpoint_id, channel_name
        );
        Self {
            channel_name: channel_name.to_string(),
            channel,
            endpoint_id,
            endpoint: Some(endpoint),
            read_timeout: Duration::from_millis(2),
        }
    }

    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    pub fn is_started(&self) -> bool {
        self.endpoint.is_some()
    }
}

impl CanAdapter for VirtualCanAdapter {
    fn send(&mut self, frame: OdriveFrame) -> Result<(), CanError> {
        if self.endpoint.is_none() {
            return Err(CanError::NotStarted);
        }
        if let Some(kind) = self.channel.faults.lock().send {
            return Err(fault_error(kind, "send"));
        }
        self.channel.broadcast(self.endpoint_id, frame);
        Ok(())
    }

    fn receive(&mut self) -> Result<OdriveFrame, CanError> {
        let endpoint = self.endpoint.as_ref().ok_or(CanError::NotStarted)?;
        if let Some(kind) = self.channel.faults.lock().receive {
            return Err(fault_error(kind, "receive"));
        }

        let deadline = Instant::now() + self.read_timeout;
        let mut queue = endpoint.queue.lock();
        loop {
            if let Some(frame) = queue.pop_front() {
                return Ok(frame);
            }
            if endpoint.ready.wait_until(&mut queue, deadline).timed_out() {
                return queue.pop_front().ok_or(CanError::Timeout);
            }
        }
    }

    fn set_receive_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }

    fn receive_timeout(&mut self, timeout: Duration) -> Result<OdriveFrame, CanError> {
        let old_timeout = self.read_timeout;
        self.read_timeout = timeout;
        let result = self.receive();
        self.read_timeout = old_timeout;
        result
    }

    fn try_receive(&mut self) -> Result<Option<OdriveFrame>, CanError> {
        let endpoint = self.endpoint.as_ref().ok_or(CanError::NotStarted)?;
        if let Some(kind) = self.channel.faults.lock().receive {
            return Err(fault_error(kind, "receive"));
        }
        Ok(endpoint.queue.lock().pop_front())
    }

    fn shutdown(&mut self) -> Result<(), CanError> {
        if self.endpoint.take().is_some() {
            detach(&self.channel_name, &self.channel, self.endpoint_id);
            trace!(
                "Virtual CAN endpoint {} detached from '{}'",
                self.endpoint_id, self.channel_name
            );
        }
        Ok(())
    }
}

impl Drop for VirtualCanAdapter {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

/// 通道控制句柄
///
/// 持有一个独立端点：`send` 的帧对通道上其他适配器可见，
/// 其他适配器发送的帧可以通过 `try_receive`/`drain` 观察。
pub struct VirtualBus {
    adapter: VirtualCanAdapter,
}

impl VirtualBus {
    pub fn handle(channel_name: &str) -> Self {
        Self {
            adapter: VirtualCanAdapter::open(channel_name),
        }
    }

    /// 以"节点"身份向总线发送一帧
    pub fn send(&mut self, frame: OdriveFrame) -> Result<(), CanError> {
        self.adapter.send(frame)
    }

    pub fn try_receive(&mut self) -> Result<Option<OdriveFrame>, CanError> {
        self.adapter.try_receive()
    }

    /// 取出所有已收到的帧
    pub fn drain(&mut self) -> Vec<OdriveFrame> {
        let mut frames = Vec::new();
        while let Ok(Some(frame)) = self.adapter.try_receive() {
            frames.push(frame);
        }
        frames
    }

    /// 之后通道上所有 `send` 调用返回该类错误（`None` 清除）
    pub fn set_send_fault(&self, kind: Option<CanDeviceErrorKind>) {
        self.adapter.channel.faults.lock().send = kind;
    }

    /// 之后通道上所有接收调用返回该类错误（`None` 清除）
    pub fn set_receive_fault(&self, kind: Option<CanDeviceErrorKind>) {
        self.adapter.channel.faults.lock().receive = kind;
    }

    /// 通道上仍然打开的端点数（包括本句柄）
    pub fn endpoint_count(&self) -> usize {
        self.adapter.channel.endpoint_count()
    }
}
