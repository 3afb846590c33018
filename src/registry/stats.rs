use serde::Serialize;

use super::task::{TaskSnapshot, TaskStatus};

/// 对任务集的聚合视图，每次读取重新计算，绝不缓存
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransferStats {
    pub num_active: usize,
    pub num_queued: usize,
    pub num_paused: usize,
    pub num_completed: usize,
    pub num_error: usize,
    pub num_canceled: usize,
    pub total_rate_bytes_per_sec: u64,
    pub transferred_bytes: u64,
}

impl TransferStats {
    pub fn collect<'a>(snapshots: impl IntoIterator<Item = &'a TaskSnapshot>) -> Self {
        let mut stats = TransferStats::default();
        for snap in snapshots {
            match snap.status {
                TaskStatus::Active => stats.num_active += 1,
                TaskStatus::Queued => stats.num_queued += 1,
                TaskStatus::Paused => stats.num_paused += 1,
                TaskStatus::Completed => stats.num_completed += 1,
                TaskStatus::Error => stats.num_error += 1,
                TaskStatus::Canceled => stats.num_canceled += 1,
            }
            stats.total_rate_bytes_per_sec += snap.rate_bytes_per_sec;
            stats.transferred_bytes += snap.transferred_bytes;
        }
        stats
    }

    /// 没有进行中或排队中的任务
    pub fn is_idle(&self) -> bool {
        self.num_active + self.num_queued == 0
    }
}
