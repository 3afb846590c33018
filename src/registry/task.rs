use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::source::models::SourceSpec;

pub type TaskId = Uuid;

/// 任务来源类型，创建时确定，决定由哪种后端驱动处理
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Direct,  // 直链下载
    Torrent, // 种子 / 磁力链接
    Social,  // 社媒内容提取
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Active,
    Paused,
    Completed,
    Error,
    Canceled,
}

impl TaskStatus {
    /// 终态任务除移除外不接受任何命令
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Canceled)
    }
}

// --------------------------------------------------------------------

/// 注册表内部的可变任务记录，外部只能拿到快照
#[derive(Debug)]
pub struct TaskRecord {
    pub id: TaskId,
    pub seq: u64, // 到达顺序，列表按此倒序排列
    pub kind: TaskKind,
    pub source: SourceSpec,
    pub display_name: String,
    pub name_corrected: bool, // 元数据到达后的显示名修正只允许一次
    pub status: TaskStatus,
    pub size_bytes: Option<u64>, // 总大小未知时为 None，一经确定不再改变
    pub transferred_bytes: u64,
    pub rate_bytes_per_sec: u64,
    pub error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub cancel_token: CancellationToken,
}

impl TaskRecord {
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// 生成某一时刻的一致性快照
    pub fn snapshot(&self) -> TaskSnapshot {
        let progress_ratio = match (self.status, self.size_bytes) {
            (TaskStatus::Completed, _) => 1.0,
            (_, Some(size)) if size > 0 => {
                (self.transferred_bytes as f64 / size as f64).min(1.0)
            }
            // 大小未知且后端未给出完成信号时不猜测进度
            _ => 0.0,
        };

        TaskSnapshot {
            id: self.id,
            seq: self.seq,
            kind: self.kind,
            source: self.source.raw().to_string(),
            display_name: self.display_name.clone(),
            status: self.status,
            progress_ratio,
            size_bytes: self.size_bytes,
            transferred_bytes: self.transferred_bytes,
            rate_bytes_per_sec: self.rate_bytes_per_sec,
            error_detail: self.error_detail.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// 交给界面层 / 持久化协作方的纯数据记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    #[serde(skip)]
    pub(crate) seq: u64,
    pub kind: TaskKind,
    pub source: String,
    pub display_name: String,
    pub status: TaskStatus,
    pub progress_ratio: f64,
    pub size_bytes: Option<u64>,
    pub transferred_bytes: u64,
    pub rate_bytes_per_sec: u64,
    pub error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// --------------------------------------------------------------------

/// 任务列表的只读投影条件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskFilter {
    All,
    /// 界面上的 Active 标签：下载中 + 排队中
    Active,
    ByStatus(TaskStatus),
    ByKind(TaskKind),
}

impl TaskFilter {
    pub fn matches(&self, snap: &TaskSnapshot) -> bool {
        match self {
            TaskFilter::All => true,
            TaskFilter::Active => {
                matches!(snap.status, TaskStatus::Active | TaskStatus::Queued)
            }
            TaskFilter::ByStatus(status) => snap.status == *status,
            TaskFilter::ByKind(kind) => snap.kind == *kind,
        }
    }
}
