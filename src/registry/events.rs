use super::task::{TaskId, TaskSnapshot, TaskStatus};

/// 注册表对外广播的事件，任何界面技术都可以基于它刷新视图
#[derive(Debug, Clone)]
pub enum TaskEvent {
    TaskAdded {
        snapshot: TaskSnapshot,
    },
    StatusChanged {
        id: TaskId,
        status: TaskStatus,
    },
    Progress {
        id: TaskId,
        transferred_bytes: u64,
        size_bytes: Option<u64>,
        rate_bytes_per_sec: u64,
    },
    TaskRemoved {
        id: TaskId,
    },
}
