//! 会话指标
//!
//! 原子计数器，任意任务都可以无锁读取。

use std::sync::atomic::{AtomicU64, Ordering};

/// 会话实时指标
///
/// ```rust
/// use odrive_driver::SessionMetrics;
/// use std::sync::atomic::Ordering;
///
/// let metrics = SessionMetrics::default();
/// metrics.rx_frames_total.fetch_add(1, Ordering::Relaxed);
/// assert_eq!(metrics.snapshot().rx_frames_total, 1);
/// ```
#[derive(Debug, Default)]
pub struct SessionMetrics {
    /// 接收的总帧数（包括其他节点的帧）
    pub rx_frames_total: AtomicU64,

    /// 成功解码并写入缓存的遥测帧数
    pub rx_frames_applied: AtomicU64,

    /// 长度不符被丢弃的帧数
    pub rx_malformed: AtomicU64,

    /// 接收错误次数（在接收循环中按"本轮无数据"处理）
    pub rx_errors: AtomicU64,

    /// 发送的总帧数
    pub tx_frames_total: AtomicU64,

    /// 成功写入存储的行数
    pub rows_persisted: AtomicU64,

    /// 写入存储失败次数
    pub persist_failures: AtomicU64,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取指标快照
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rx_frames_total: self.rx_frames_total.load(Ordering::Relaxed),
            rx_frames_applied: self.rx_frames_applied.load(Ordering::Relaxed),
            rx_malformed: self.rx_malformed.load(Ordering::Relaxed),
            rx_errors: self.rx_errors.load(Ordering::Relaxed),
            tx_frames_total: self.tx_frames_total.load(Ordering::Relaxed),
            rows_persisted: self.rows_persisted.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
        }
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetricsSnapshot {
    pub rx_frames_total: u64,
    pub rx_frames_applied: u64,
    pub rx_malformed: u64,
    pub rx_errors: u64,
    pub tx_frames_total: u64,
    pub rows_persisted: u64,
    pub persist_failures: u64,
}

impl MetricsSnapshot {
    /// 畸形帧占接收帧的百分比（无接收时为 0）
    pub fn malformed_rate(&self) -> f64 {
        if self.rx_frames_total == 0 {
            return 0.0;
        }
        (self.rx_malformed as f64 / self.rx_frames_total as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let metrics = SessionMetrics::new();
        metrics.rx_frames_total.fetch_add(4, Ordering::Relaxed);
        metrics.rx_malformed.fetch_add(1, Ordering::Relaxed);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.rx_frames_total, 4);
        assert_eq!(snapshot.malformed_rate(), 25.0);
        assert_eq!(snapshot.rx_malformed, 1);
        assert_eq!(snapshot.persist_failures, 0);
    }

    #[test]
    fn test_malformed_rate_empty() {
        assert_eq!(MetricsSnapshot::default().malformed_rate(), 0.0);
    }
}
