use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::{RegistryError, Result};
use super::events::TaskEvent;
use super::stats::TransferStats;
use super::task::{TaskFilter, TaskId, TaskKind, TaskRecord, TaskSnapshot, TaskStatus};
use crate::source::detector::parse_source;
use crate::source::models::{InitialMetadata, SourceInput, SourceSpec};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// 任务注册表：全部任务状态的唯一属主。
///
/// 单个任务的所有变更经由它的记录锁串行化，不同任务的变更可以并行；
/// 查询返回某一时刻的快照，不会读到写了一半的记录。
#[derive(Clone)]
pub struct TaskRegistry {
    tasks: Arc<DashMap<TaskId, Arc<Mutex<TaskRecord>>>>, // task_id -> 记录
    seq: Arc<AtomicU64>,                                 // 到达顺序计数
    events: broadcast::Sender<TaskEvent>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            tasks: Arc::new(DashMap::new()),
            seq: Arc::new(AtomicU64::new(0)),
            events,
        }
    }

    /// 订阅任务事件（新增 / 状态变化 / 进度 / 移除）
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: TaskEvent) {
        // 没有订阅者时发送失败，直接忽略
        let _ = self.events.send(event);
    }

    fn handle(&self, id: TaskId) -> Result<Arc<Mutex<TaskRecord>>> {
        self.tasks
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(RegistryError::NotFound(id))
    }

    // ----------------------------------------------------------------
    // 命令操作（界面层调用）
    // ----------------------------------------------------------------

    /// 新增下载任务，校验来源后以排队状态插入到达顺序头部
    pub async fn add_task(
        &self,
        kind: TaskKind,
        input: &SourceInput,
        metadata: Option<InitialMetadata>,
    ) -> Result<TaskSnapshot> {
        let source = parse_source(kind, input)?;

        let id = Uuid::new_v4();
        let now = Utc::now();
        let display_name = metadata
            .as_ref()
            .and_then(|m| m.display_name.clone())
            .unwrap_or_else(|| source.display_name());
        let size_bytes = metadata.as_ref().and_then(|m| m.size_bytes);

        let record = TaskRecord {
            id,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            kind,
            source,
            display_name,
            name_corrected: false,
            status: TaskStatus::Queued,
            size_bytes,
            transferred_bytes: 0,
            rate_bytes_per_sec: 0,
            error_detail: None,
            created_at: now,
            updated_at: now,
            cancel_token: CancellationToken::new(),
        };
        let snapshot = record.snapshot();
        self.tasks.insert(id, Arc::new(Mutex::new(record)));

        info!("新增下载任务: {} ({:?}) {}", id, kind, snapshot.display_name);
        self.emit(TaskEvent::TaskAdded {
            snapshot: snapshot.clone(),
        });
        Ok(snapshot)
    }

    /// 暂停 / 恢复开关：下载中与暂停互相切换，排队中视同暂停可直接恢复
    pub async fn pause_or_resume(&self, id: TaskId) -> Result<TaskSnapshot> {
        let handle = self.handle(id)?;
        let mut task = handle.lock().await;

        let next = match task.status {
            TaskStatus::Active => TaskStatus::Paused,
            TaskStatus::Paused | TaskStatus::Queued => TaskStatus::Active,
            status => return Err(RegistryError::InvalidTransition { id, status }),
        };
        task.status = next;
        if next == TaskStatus::Paused {
            task.rate_bytes_per_sec = 0;
        }
        task.touch();

        info!("任务 {} 状态切换为 {:?}", id, next);
        self.emit(TaskEvent::StatusChanged { id, status: next });
        Ok(task.snapshot())
    }

    /// 从任意非终态取消任务，向后端发出合作式取消信号后立即生效
    pub async fn cancel(&self, id: TaskId) -> Result<TaskSnapshot> {
        let handle = self.handle(id)?;
        let mut task = handle.lock().await;

        if task.status.is_terminal() {
            return Err(RegistryError::InvalidTransition {
                id,
                status: task.status,
            });
        }
        task.cancel_token.cancel();
        task.status = TaskStatus::Canceled;
        task.rate_bytes_per_sec = 0;
        task.touch();

        info!("任务 {} 已取消", id);
        self.emit(TaskEvent::StatusChanged {
            id,
            status: TaskStatus::Canceled,
        });
        Ok(task.snapshot())
    }

    /// 失败任务重试：回到排队状态。这是进度单调性约束的显式重置点，
    /// 已传输字节清零，已确定的总大小保留
    pub async fn retry(&self, id: TaskId) -> Result<TaskSnapshot> {
        let handle = self.handle(id)?;
        let mut task = handle.lock().await;

        if task.status != TaskStatus::Error {
            return Err(RegistryError::InvalidTransition {
                id,
                status: task.status,
            });
        }
        task.status = TaskStatus::Queued;
        task.transferred_bytes = 0;
        task.rate_bytes_per_sec = 0;
        task.error_detail = None;
        task.touch();

        info!("任务 {} 重试，回到排队状态", id);
        self.emit(TaskEvent::StatusChanged {
            id,
            status: TaskStatus::Queued,
        });
        Ok(task.snapshot())
    }

    /// 移除任务，任何状态均可。活动任务先发合作式取消信号（至多一次），
    /// 不等待后端收尾，移除立即生效
    pub async fn remove(&self, id: TaskId) -> Result<()> {
        let (_, handle) = self.tasks.remove(&id).ok_or(RegistryError::NotFound(id))?;
        let task = handle.lock().await;
        if !task.status.is_terminal() {
            task.cancel_token.cancel();
        }

        info!("移除任务 {}", id);
        self.emit(TaskEvent::TaskRemoved { id });
        Ok(())
    }

    // ----------------------------------------------------------------
    // 后端驱动上报（传输驱动专用）
    // ----------------------------------------------------------------

    /// 进度上报。排队中的任务随首次上报进入下载中；暂停期间的上报被丢弃；
    /// 进度回退按原值截断并告警；已知大小传满后自动完结
    pub async fn report_progress(
        &self,
        id: TaskId,
        transferred_bytes: u64,
        size_bytes: Option<u64>,
        rate_bytes_per_sec: u64,
    ) -> Result<()> {
        let handle = self.handle(id)?;
        let mut task = handle.lock().await;

        match task.status {
            TaskStatus::Active => {}
            TaskStatus::Queued => {
                task.status = TaskStatus::Active;
                self.emit(TaskEvent::StatusChanged {
                    id,
                    status: TaskStatus::Active,
                });
            }
            TaskStatus::Paused => {
                // 暂停期间进度冻结，等后端观察到暂停后自然停报
                debug!("任务 {} 处于暂停状态，忽略进度上报", id);
                return Ok(());
            }
            status => return Err(RegistryError::InvalidTransition { id, status }),
        }

        // 总大小一经确定不再改变
        if let Some(size) = size_bytes {
            match task.size_bytes {
                None => task.size_bytes = Some(size),
                Some(known) if known != size => {
                    warn!("任务 {} 上报大小 {} 与已知 {} 不一致，保持原值", id, size, known);
                }
                _ => {}
            }
        }

        // 单调性：回退的进度按原值截断，告警但不视为致命错误
        let transferred = if transferred_bytes < task.transferred_bytes {
            warn!(
                "任务 {} 进度回退 ({} -> {})，忽略本次回退",
                id, task.transferred_bytes, transferred_bytes
            );
            task.transferred_bytes
        } else {
            transferred_bytes
        };
        task.transferred_bytes = match task.size_bytes {
            Some(size) => transferred.min(size),
            None => transferred,
        };
        task.rate_bytes_per_sec = rate_bytes_per_sec;
        task.touch();

        if let Some(size) = task.size_bytes {
            if task.transferred_bytes >= size {
                task.status = TaskStatus::Completed;
                task.rate_bytes_per_sec = 0;
                info!("✅ 任务完成: {} {}", id, task.display_name);
                self.emit(TaskEvent::StatusChanged {
                    id,
                    status: TaskStatus::Completed,
                });
            }
        }

        self.emit(TaskEvent::Progress {
            id,
            transferred_bytes: task.transferred_bytes,
            size_bytes: task.size_bytes,
            rate_bytes_per_sec: task.rate_bytes_per_sec,
        });
        Ok(())
    }

    /// 显式完结信号，用于总大小未知的流（如部分社媒提取）
    pub async fn report_completed(&self, id: TaskId) -> Result<()> {
        let handle = self.handle(id)?;
        let mut task = handle.lock().await;

        match task.status {
            TaskStatus::Active | TaskStatus::Queued => {}
            status => return Err(RegistryError::InvalidTransition { id, status }),
        }
        if let Some(size) = task.size_bytes {
            task.transferred_bytes = size;
        }
        task.status = TaskStatus::Completed;
        task.rate_bytes_per_sec = 0;
        task.touch();

        info!("✅ 任务完成: {} {}", id, task.display_name);
        self.emit(TaskEvent::StatusChanged {
            id,
            status: TaskStatus::Completed,
        });
        Ok(())
    }

    /// 后端失败上报，进入错误状态并记录原因；重复上报幂等
    pub async fn report_failure(&self, id: TaskId, detail: impl Into<String>) -> Result<()> {
        let handle = self.handle(id)?;
        let mut task = handle.lock().await;
        let detail = detail.into();

        match task.status {
            TaskStatus::Error => {
                task.error_detail = Some(detail);
                task.touch();
                return Ok(());
            }
            status if status.is_terminal() => {
                return Err(RegistryError::InvalidTransition { id, status });
            }
            _ => {}
        }
        task.status = TaskStatus::Error;
        task.rate_bytes_per_sec = 0;
        task.error_detail = Some(detail.clone());
        task.touch();

        warn!("❌ 任务失败: {} 原因: {}", id, detail);
        self.emit(TaskEvent::StatusChanged {
            id,
            status: TaskStatus::Error,
        });
        Ok(())
    }

    /// 元数据到达后的修正：显示名只允许修正一次（如种子元数据交换、
    /// 社媒探测完成后），总大小只允许从未知变为已知
    pub async fn report_metadata(
        &self,
        id: TaskId,
        display_name: Option<&str>,
        size_bytes: Option<u64>,
    ) -> Result<()> {
        let handle = self.handle(id)?;
        let mut task = handle.lock().await;

        if task.status.is_terminal() {
            return Err(RegistryError::InvalidTransition {
                id,
                status: task.status,
            });
        }
        if let Some(name) = display_name {
            if task.name_corrected {
                debug!("任务 {} 显示名已修正过，忽略 {}", id, name);
            } else {
                task.display_name = name.to_string();
                task.name_corrected = true;
            }
        }
        if let Some(size) = size_bytes {
            if task.size_bytes.is_none() {
                task.size_bytes = Some(size);
            }
        }
        task.touch();
        Ok(())
    }

    // ----------------------------------------------------------------
    // 查询操作
    // ----------------------------------------------------------------

    /// 单个任务的当前快照
    pub async fn get(&self, id: TaskId) -> Result<TaskSnapshot> {
        let handle = self.handle(id)?;
        let task = handle.lock().await;
        Ok(task.snapshot())
    }

    /// 按过滤条件列出任务快照，新任务在前。
    /// 快照是取出那一刻的一致视图，之后的变更不会反映进来
    pub async fn list(&self, filter: TaskFilter) -> Vec<TaskSnapshot> {
        // 先收集句柄再逐个取锁，避免占着分片锁等待任务锁
        let handles: Vec<Arc<Mutex<TaskRecord>>> = self
            .tasks
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut snapshots = Vec::with_capacity(handles.len());
        for handle in handles {
            let task = handle.lock().await;
            let snap = task.snapshot();
            if filter.matches(&snap) {
                snapshots.push(snap);
            }
        }
        snapshots.sort_by(|a, b| b.seq.cmp(&a.seq));
        snapshots
    }

    /// 聚合统计，读取时现算
    pub async fn stats(&self) -> TransferStats {
        let snapshots = self.list(TaskFilter::All).await;
        TransferStats::collect(&snapshots)
    }

    // ----------------------------------------------------------------
    // 驱动派发用的内部访问
    // ----------------------------------------------------------------

    pub(crate) async fn source(&self, id: TaskId) -> Result<SourceSpec> {
        let handle = self.handle(id)?;
        let task = handle.lock().await;
        Ok(task.source.clone())
    }

    pub(crate) async fn cancel_token(&self, id: TaskId) -> Result<CancellationToken> {
        let handle = self.handle(id)?;
        let task = handle.lock().await;
        Ok(task.cancel_token.clone())
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
